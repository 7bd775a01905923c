//! End-to-end benchmark driver.

use std::time::Instant;

use tracing::info;

use crate::device::Accelerator;
use crate::error::BenchError;
use crate::host::fma::HostFmaBuilder;
use crate::utilities::helpers::resolve_kernel;

pub mod buffers;
pub mod config;
pub mod pipeline;
pub mod report;
pub mod validate;

pub use buffers::{DeviceBuffers, HostBuffers};
pub use config::{BenchConfig, BenchConfigBuilder};
pub use pipeline::{run_device_pipeline, DeviceTiming};
pub use report::BenchReport;
pub use validate::{validate, Mismatch, ValidationReport};

/// Generate inputs, run the device pipeline, compute the host reference and compare.
///
/// A numerical mismatch is returned inside the report. Only failures that
/// prevent a comparison (allocation, launch, invalid input) are errors.
pub fn run_benchmark<A: Accelerator>(acc: &A, config: &BenchConfig) -> Result<BenchReport, BenchError> {
    config.validate()?;
    let n = config.n;

    if n == 0 {
        info!("n = 0, nothing to offload");
        return Ok(BenchReport {
            backend: acc.name(),
            n,
            launch: None,
            host_kernel: resolve_kernel(config.host_kernel),
            host_seconds: 0.0,
            device_seconds: None,
            validation: ValidationReport::empty(config.rtol, config.atol),
        });
    }

    let mut host = HostBuffers::allocate(acc, n)?;
    host.fill_inputs()?;

    let timing = {
        let mut dev = DeviceBuffers::allocate(acc, n)?;
        run_device_pipeline(acc, &mut host, &mut dev, config.threads_per_block)?
    };
    info!(elapsed_ms = timing.elapsed_ms, "device pipeline finished");

    let t0 = Instant::now();
    let reference = HostFmaBuilder::new()
        .kernel(config.host_kernel)
        .apply_slices(&host.a, &host.b, &host.d)?;
    let host_seconds = t0.elapsed().as_secs_f64();
    info!(kernel = reference.kernel.name(), host_seconds, "host reference finished");

    let validation = validate(&host.c, &reference.values, config.rtol, config.atol)?;

    Ok(BenchReport {
        backend: acc.name(),
        n,
        launch: Some(timing.launch),
        host_kernel: reference.kernel,
        host_seconds,
        device_seconds: Some(timing.seconds()),
        validation,
    })
}
