use crate::error::BenchError;
use crate::utilities::enums::Kernel;

pub const DEFAULT_N: usize = 10_000_000;
pub const DEFAULT_THREADS_PER_BLOCK: u32 = 256;
pub const DEFAULT_RTOL: f64 = 1e-4;
pub const DEFAULT_ATOL: f64 = 1e-6;

/// Largest array the kernel can address; its length parameter is an `int`.
pub const MAX_N: usize = i32::MAX as usize;

#[derive(Debug, Clone, PartialEq)]
pub struct BenchConfig {
    pub n: usize,
    pub threads_per_block: u32,
    pub rtol: f64,
    pub atol: f64,
    pub host_kernel: Kernel,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            n: DEFAULT_N,
            threads_per_block: DEFAULT_THREADS_PER_BLOCK,
            rtol: DEFAULT_RTOL,
            atol: DEFAULT_ATOL,
            host_kernel: Kernel::Auto,
        }
    }
}

impl BenchConfig {
    pub fn builder() -> BenchConfigBuilder {
        BenchConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<(), BenchError> {
        if self.n > MAX_N {
            return Err(BenchError::DegenerateInput(format!(
                "n={} exceeds the kernel's addressable length {}",
                self.n, MAX_N
            )));
        }
        if self.threads_per_block == 0 {
            return Err(BenchError::InvalidConfig(
                "threads_per_block must be at least 1".into(),
            ));
        }
        for (name, tol) in [("rtol", self.rtol), ("atol", self.atol)] {
            if !tol.is_finite() || tol < 0.0 {
                return Err(BenchError::InvalidConfig(format!(
                    "{name} must be finite and non-negative, got {tol}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct BenchConfigBuilder {
    cfg: BenchConfig,
}

impl BenchConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn n(mut self, n: usize) -> Self {
        self.cfg.n = n;
        self
    }
    pub fn threads_per_block(mut self, tpb: u32) -> Self {
        self.cfg.threads_per_block = tpb;
        self
    }
    pub fn rtol(mut self, rtol: f64) -> Self {
        self.cfg.rtol = rtol;
        self
    }
    pub fn atol(mut self, atol: f64) -> Self {
        self.cfg.atol = atol;
        self
    }
    pub fn host_kernel(mut self, k: Kernel) -> Self {
        self.cfg.host_kernel = k;
        self
    }
    pub fn build(self) -> Result<BenchConfig, BenchError> {
        self.cfg.validate()?;
        Ok(self.cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_tunables() {
        let cfg = BenchConfig::default();
        assert_eq!(cfg.n, 10_000_000);
        assert_eq!(cfg.threads_per_block, 256);
        assert_eq!(cfg.rtol, 1e-4);
        assert_eq!(cfg.atol, 1e-6);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn builder_rejects_bad_values() {
        assert!(matches!(
            BenchConfig::builder().threads_per_block(0).build(),
            Err(BenchError::InvalidConfig(_))
        ));
        assert!(matches!(
            BenchConfig::builder().rtol(-1.0).build(),
            Err(BenchError::InvalidConfig(_))
        ));
        assert!(matches!(
            BenchConfig::builder().atol(f64::NAN).build(),
            Err(BenchError::InvalidConfig(_))
        ));
        assert!(matches!(
            BenchConfig::builder().n(MAX_N + 1).build(),
            Err(BenchError::DegenerateInput(_))
        ));
        let cfg = BenchConfig::builder().n(0).threads_per_block(1024).build().unwrap();
        assert_eq!((cfg.n, cfg.threads_per_block), (0, 1024));
    }
}
