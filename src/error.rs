//! Run-level error taxonomy.
//!
//! Allocation and launch failures are fatal and abort the run before any
//! report is produced. A numerical mismatch is *not* an error: it is carried in
//! [`ValidationReport`](crate::bench::validate::ValidationReport) and the run
//! still completes.

use thiserror::Error;

use crate::device::DeviceError;

#[derive(Debug, Error)]
pub enum BenchError {
    #[error("allocation failure: {0}")]
    AllocationFailure(#[source] DeviceError),
    #[error("launch failure: {0}")]
    LaunchFailure(#[source] DeviceError),
    #[error("accelerator initialization failed: {0}")]
    Initialization(#[source] DeviceError),
    #[error("degenerate input: {0}")]
    DegenerateInput(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
}

impl BenchError {
    /// True for the failures that abort a run after the accelerator was acquired.
    #[inline]
    pub fn is_device_fault(&self) -> bool {
        matches!(
            self,
            BenchError::AllocationFailure(_) | BenchError::LaunchFailure(_)
        )
    }
}
