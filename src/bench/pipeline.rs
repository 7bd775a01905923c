//! Transfer/execute orchestration on a single stream.
//!
//! ```text
//! record start -> H2D a -> H2D b -> H2D d -> fused_op -> D2H c -> record end
//! ```
//!
//! Nothing on the host waits between those steps; stream order alone makes the
//! kernel see complete inputs and the D2H copy see the complete result. The
//! host blocks once, on the end event.

use tracing::{debug, info, warn};

use crate::bench::buffers::{DeviceBuffers, HostBuffers};
use crate::device::{Accelerator, DeviceError, LaunchConfig};
use crate::error::BenchError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceTiming {
    /// Event-to-event device time, transfers included.
    pub elapsed_ms: f32,
    pub launch: LaunchConfig,
}

impl DeviceTiming {
    #[inline]
    pub fn seconds(&self) -> f64 {
        self.elapsed_ms as f64 / 1e3
    }
}

/// Copy inputs to the device, run `fused_op`, copy `c` back into `host.c`.
///
/// On return (success or error) no operation issued here is still in flight.
pub fn run_device_pipeline<A: Accelerator>(
    acc: &A,
    host: &mut HostBuffers<A>,
    dev: &mut DeviceBuffers<A>,
    threads_per_block: u32,
) -> Result<DeviceTiming, BenchError> {
    let n = host.len();
    if n == 0 {
        return Err(BenchError::DegenerateInput("nothing to launch for n=0".into()));
    }
    if dev.len() != n {
        return Err(BenchError::DegenerateInput(format!(
            "host buffers hold {n} elements but device buffers hold {}",
            dev.len()
        )));
    }
    let n_arg = i32::try_from(n).map_err(|_| {
        BenchError::DegenerateInput(format!("n={n} does not fit the kernel's int length"))
    })?;
    if threads_per_block == 0 {
        return Err(BenchError::InvalidConfig("threads_per_block must be at least 1".into()));
    }

    let launch = LaunchConfig::cover(n, threads_per_block);
    // Rejected before the start event so a bad block size never reaches the stream.
    launch
        .validate(acc.max_threads_per_block())
        .map_err(BenchError::LaunchFailure)?;

    let stream = acc.create_stream().map_err(BenchError::LaunchFailure)?;
    let start = acc.create_event().map_err(BenchError::LaunchFailure)?;
    let end = acc.create_event().map_err(BenchError::LaunchFailure)?;

    info!(
        backend = %acc.name(),
        n,
        grid = launch.grid,
        block = launch.block,
        padding = launch.padding(n),
        "launching fused_op"
    );

    // SAFETY: host and device buffers stay mutably borrowed until this function
    // returns, and every return path below has drained the stream first.
    let issued = unsafe { enqueue(acc, host, dev, &stream, &start, &end, launch, n_arg) };
    if let Err(e) = issued {
        return Err(abort(acc, &stream, e));
    }

    if let Err(e) = acc.synchronize_event(&end) {
        return Err(abort(acc, &stream, e));
    }
    debug!("8/8 end event complete");

    let elapsed_ms = acc.elapsed_ms(&start, &end).map_err(BenchError::LaunchFailure)?;
    debug!(elapsed_ms, "device time");
    Ok(DeviceTiming { elapsed_ms, launch })
}

#[allow(clippy::too_many_arguments)]
unsafe fn enqueue<A: Accelerator>(
    acc: &A,
    host: &mut HostBuffers<A>,
    dev: &mut DeviceBuffers<A>,
    stream: &A::Stream,
    start: &A::Event,
    end: &A::Event,
    launch: LaunchConfig,
    n: i32,
) -> Result<(), DeviceError> {
    acc.record_event(start, stream)?;
    debug!("1/8 start event recorded");
    unsafe {
        acc.copy_to_device_async(&mut dev.a, &host.a, stream)?;
        debug!("2/8 a enqueued host->device");
        acc.copy_to_device_async(&mut dev.b, &host.b, stream)?;
        debug!("3/8 b enqueued host->device");
        acc.copy_to_device_async(&mut dev.d, &host.d, stream)?;
        debug!("4/8 d enqueued host->device");
        acc.launch_fused_op(launch, &dev.a, &dev.b, &dev.d, &mut dev.c, n, stream)?;
        debug!(grid = launch.grid, block = launch.block, "5/8 fused_op enqueued");
        acc.copy_to_host_async(&mut host.c, &dev.c, stream)?;
        debug!("6/8 c enqueued device->host");
    }
    acc.record_event(end, stream)?;
    debug!("7/8 end event recorded");
    Ok(())
}

/// Drain whatever was already issued, then surface the original failure.
fn abort<A: Accelerator>(acc: &A, stream: &A::Stream, err: DeviceError) -> BenchError {
    if let Err(sync_err) = acc.synchronize_stream(stream) {
        warn!(error = %sync_err, "stream drain after failure also failed");
    }
    BenchError::LaunchFailure(err)
}
