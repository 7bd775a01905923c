//! Host SIMD vs GPU fused multiply-add benchmark.
//!
//! `c[i] = a[i] * b[i] + d[i]` is computed once on an accelerator (pinned
//! host buffers, async copies on one stream, a grid-stride kernel, event
//! timing) and once on the host, and the two results are compared
//! element-wise.

#![allow(clippy::needless_range_loop)]

pub mod bench;
pub mod cuda;
pub mod device;
pub mod error;
pub mod host;
pub mod utilities;

pub use bench::{run_benchmark, BenchConfig, BenchReport, ValidationReport};
pub use device::{Accelerator, DeviceError, EmulatorOptions, HostEmulator, LaunchConfig};
pub use error::BenchError;
pub use utilities::enums::Kernel;

#[cfg(feature = "cuda")]
pub use cuda::CudaFma;
