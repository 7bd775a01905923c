use std::fmt;

use crate::bench::validate::ValidationReport;
use crate::device::LaunchConfig;
use crate::utilities::enums::Kernel;

#[derive(Debug, Clone, PartialEq)]
pub struct BenchReport {
    pub backend: String,
    pub n: usize,
    /// `None` when nothing was launched (n = 0).
    pub launch: Option<LaunchConfig>,
    pub host_kernel: Kernel,
    /// Host reference wall-clock, in seconds.
    pub host_seconds: f64,
    /// Device event time, in seconds; `None` when unmeasured.
    pub device_seconds: Option<f64>,
    pub validation: ValidationReport,
}

impl BenchReport {
    /// `host / device`, or `None` when the device time is zero, missing or not finite.
    pub fn speedup(&self) -> Option<f64> {
        let device = self.device_seconds?;
        if device > 0.0 && device.is_finite() && self.host_seconds.is_finite() {
            Some(self.host_seconds / device)
        } else {
            None
        }
    }

    #[inline]
    pub fn passed(&self) -> bool {
        self.validation.passed()
    }
}

impl fmt::Display for BenchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "fused multiply-add  c = a * b + d")?;
        writeln!(f, "  backend       : {}", self.backend)?;
        writeln!(f, "  n             : {}", self.n)?;
        match self.launch {
            Some(l) => writeln!(f, "  launch        : {l}")?,
            None => writeln!(f, "  launch        : none")?,
        }
        writeln!(f, "  host kernel   : {}", self.host_kernel.name())?;
        writeln!(f, "  host time     : {:.6} s", self.host_seconds)?;
        match self.device_seconds {
            Some(s) => writeln!(f, "  device time   : {s:.6} s")?,
            None => writeln!(f, "  device time   : unmeasured")?,
        }
        match self.speedup() {
            Some(x) => writeln!(f, "  speedup       : {x:.2}x")?,
            None => writeln!(f, "  speedup       : undefined")?,
        }
        write!(f, "{}", self.validation)
    }
}
