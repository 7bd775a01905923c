// End-to-end tests of the benchmark pipeline on the host emulator

use fma_bench::bench::validate::validate;
use fma_bench::bench::{run_device_pipeline, BenchConfig, DeviceBuffers, HostBuffers};
use fma_bench::device::{DeviceError, StreamOp};
use fma_bench::host::fma::HostFmaBuilder;
use fma_bench::host::inputs::generate_inputs;
use fma_bench::{run_benchmark, BenchError, EmulatorOptions, HostEmulator, Kernel, LaunchConfig};

fn config(n: usize, tpb: u32) -> BenchConfig {
    BenchConfig::builder()
        .n(n)
        .threads_per_block(tpb)
        .build()
        .expect("valid config")
}

#[test]
fn four_elements_one_block() -> Result<(), Box<dyn std::error::Error>> {
    let emu = HostEmulator::default();
    let report = run_benchmark(&emu, &config(4, 4))?;
    assert!(report.passed(), "{report}");
    assert_eq!(report.launch, Some(LaunchConfig { grid: 1, block: 4 }));
    assert_eq!(report.validation.checked, 4);

    let mut host = HostBuffers::allocate(&emu, 4)?;
    host.fill_inputs()?;
    let mut dev = DeviceBuffers::allocate(&emu, 4)?;
    run_device_pipeline(&emu, &mut host, &mut dev, 4)?;
    for (i, x) in [1.0f32, 34.0, 67.0, 100.0].into_iter().enumerate() {
        let want = x.sin() * x.ln() + (-x / 50.0).exp();
        assert!(
            (host.c[i] - want).abs() <= 1e-6 + 1e-4 * want.abs(),
            "c[{i}] = {} want {want}",
            host.c[i]
        );
    }
    Ok(())
}

#[test]
fn empty_run_is_a_match_without_device_work() -> Result<(), Box<dyn std::error::Error>> {
    let emu = HostEmulator::default();
    let report = run_benchmark(&emu, &config(0, 256))?;
    assert!(report.passed());
    assert_eq!(report.validation.total_mismatches, 0);
    assert!(report.validation.mismatches.is_empty());
    assert_eq!(report.launch, None);
    assert_eq!(report.speedup(), None);
    assert!(emu.trace().is_empty());
    assert_eq!(emu.peak_device_bytes(), 0);
    Ok(())
}

#[test]
fn single_element_single_thread() -> Result<(), Box<dyn std::error::Error>> {
    let emu = HostEmulator::default();
    let report = run_benchmark(&emu, &config(1, 256))?;
    assert!(report.passed());
    assert_eq!(report.launch, Some(LaunchConfig { grid: 1, block: 256 }));
    Ok(())
}

#[test]
fn partial_last_block_is_bounds_checked() -> Result<(), Box<dyn std::error::Error>> {
    let emu = HostEmulator::default();
    let report = run_benchmark(&emu, &config(1000, 256))?;
    assert!(report.passed(), "{report}");
    assert_eq!(report.launch, Some(LaunchConfig { grid: 4, block: 256 }));
    assert_eq!(report.validation.checked, 1000);
    Ok(())
}

#[test]
fn every_host_kernel_agrees_with_device() -> Result<(), Box<dyn std::error::Error>> {
    let emu = HostEmulator::default();
    for kernel in [Kernel::Auto, Kernel::Scalar, Kernel::Avx2, Kernel::Avx512] {
        let cfg = BenchConfig::builder()
            .n(50_000)
            .host_kernel(kernel)
            .build()?;
        let report = run_benchmark(&emu, &cfg)?;
        assert!(report.passed(), "kernel {:?}: {report}", kernel);
        assert_ne!(report.host_kernel, Kernel::Auto);
    }
    Ok(())
}

#[test]
fn inputs_are_deterministic() -> Result<(), Box<dyn std::error::Error>> {
    let emu = HostEmulator::default();
    let mut first = HostBuffers::allocate(&emu, 10_007)?;
    let mut second = HostBuffers::allocate(&emu, 10_007)?;
    first.fill_inputs()?;
    second.fill_inputs()?;
    let bits = |s: &[f32]| s.iter().map(|v| v.to_bits()).collect::<Vec<_>>();
    assert_eq!(bits(&first.a), bits(&second.a));
    assert_eq!(bits(&first.b), bits(&second.b));
    assert_eq!(bits(&first.d), bits(&second.d));
    assert_eq!(bits(&first.a), bits(&generate_inputs(10_007).a));
    Ok(())
}

#[test]
fn injected_error_is_reported_exactly_once() -> Result<(), Box<dyn std::error::Error>> {
    let emu = HostEmulator::default();
    let n = 1000;
    let mut host = HostBuffers::allocate(&emu, n)?;
    host.fill_inputs()?;
    let mut dev = DeviceBuffers::allocate(&emu, n)?;
    run_device_pipeline(&emu, &mut host, &mut dev, 256)?;

    host.c[2] += 1.0;
    let reference = HostFmaBuilder::new()
        .kernel(Kernel::Scalar)
        .apply_slices(&host.a, &host.b, &host.d)?;
    let report = validate(&host.c, &reference.values, 1e-4, 1e-6)?;

    assert_eq!(report.total_mismatches, 1);
    assert_eq!(report.mismatches.len(), 1);
    let m = report.mismatches[0];
    assert_eq!(m.index, 2);
    assert_eq!(m.gpu, host.c[2]);
    assert_eq!(m.cpu, reference.values[2]);
    assert!((m.abs_diff - 1.0).abs() < 1e-5, "abs_diff = {}", m.abs_diff);
    let text = report.to_string();
    assert!(text.contains("[2]"));
    assert!(text.ends_with("total mismatches: 1"));
    Ok(())
}

#[test]
fn zero_device_time_leaves_speedup_undefined() -> Result<(), Box<dyn std::error::Error>> {
    let emu = HostEmulator::new(EmulatorOptions {
        frozen_clock: true,
        ..Default::default()
    });
    let report = run_benchmark(&emu, &config(4096, 256))?;
    assert!(report.passed());
    assert_eq!(report.device_seconds, Some(0.0));
    assert_eq!(report.speedup(), None);
    let text = report.to_string();
    assert!(text.contains("undefined"));
    assert!(!text.contains("inf"));
    Ok(())
}

#[test]
fn stream_sees_operations_in_pipeline_order() -> Result<(), Box<dyn std::error::Error>> {
    let emu = HostEmulator::default();
    run_benchmark(&emu, &config(1000, 128))?;
    let trace = emu.trace();
    assert_eq!(trace.len(), 8, "{trace:?}");

    let (start, end) = match (&trace[0], &trace[6]) {
        (StreamOp::RecordEvent { event: s }, StreamOp::RecordEvent { event: e }) => (*s, *e),
        other => panic!("events out of place: {other:?}"),
    };
    assert_ne!(start, end);

    let copied: Vec<u64> = trace[1..4]
        .iter()
        .map(|op| match op {
            StreamOp::CopyToDevice { buffer, len: 1000 } => *buffer,
            other => panic!("expected host->device copy, got {other:?}"),
        })
        .collect();
    assert_eq!(copied.len(), 3);
    assert!(copied[0] != copied[1] && copied[1] != copied[2] && copied[0] != copied[2]);

    assert_eq!(
        trace[4],
        StreamOp::Launch {
            kernel: "fused_op",
            grid: 8,
            block: 128,
            n: 1000
        }
    );
    match &trace[5] {
        StreamOp::CopyToHost { buffer, len: 1000 } => assert!(!copied.contains(buffer)),
        other => panic!("expected device->host copy, got {other:?}"),
    }
    assert_eq!(trace[7], StreamOp::SynchronizeEvent { event: end });
    Ok(())
}

#[test]
fn device_allocation_failure_is_fatal_and_leaks_nothing() {
    let n = 1000;
    let emu = HostEmulator::new(EmulatorOptions {
        memory_limit: Some(3 * n * 4),
        ..Default::default()
    });
    let err = run_benchmark(&emu, &config(n, 256)).unwrap_err();
    assert!(
        matches!(
            err,
            BenchError::AllocationFailure(DeviceError::OutOfMemory { required, .. }) if required == 4 * n * 4
        ),
        "{err}"
    );
    assert!(err.is_device_fault());
    assert_eq!(emu.live_device_bytes(), 0);
    assert_eq!(emu.live_device_buffers(), 0);
    assert!(emu.trace().is_empty());
}

#[test]
fn oversized_block_is_a_launch_failure_and_leaks_nothing() {
    let emu = HostEmulator::default();
    let err = run_benchmark(&emu, &config(5000, 2048)).unwrap_err();
    assert!(
        matches!(
            err,
            BenchError::LaunchFailure(DeviceError::LaunchConfigTooLarge { block: 2048, .. })
        ),
        "{err}"
    );
    assert_eq!(emu.live_device_bytes(), 0);
    assert_eq!(emu.live_device_buffers(), 0);
    assert_eq!(emu.peak_device_bytes(), 4 * 5000 * 4);

    // Nothing reaches the stream, not even the start event.
    assert!(emu.trace().is_empty(), "{:?}", emu.trace());
}

#[test]
fn block_size_is_checked_against_the_backend_limit() -> Result<(), Box<dyn std::error::Error>> {
    let emu = HostEmulator::new(EmulatorOptions {
        max_threads_per_block: 64,
        ..Default::default()
    });
    let mut host = HostBuffers::allocate(&emu, 1000)?;
    host.fill_inputs()?;
    let mut dev = DeviceBuffers::allocate(&emu, 1000)?;

    let err = run_device_pipeline(&emu, &mut host, &mut dev, 128).unwrap_err();
    assert!(
        matches!(
            err,
            BenchError::LaunchFailure(DeviceError::LaunchConfigTooLarge {
                block: 128,
                max_threads: 64,
                ..
            })
        ),
        "{err}"
    );
    assert!(emu.trace().is_empty());
    assert!(host.c.iter().all(|&v| v == 0.0));

    let timing = run_device_pipeline(&emu, &mut host, &mut dev, 64)?;
    assert_eq!(timing.launch, LaunchConfig { grid: 16, block: 64 });
    let reference = HostFmaBuilder::new()
        .kernel(Kernel::Scalar)
        .apply_slices(&host.a, &host.b, &host.d)?;
    let report = validate(&host.c, &reference.values, 1e-4, 1e-6)?;
    assert!(report.passed(), "{report}");
    Ok(())
}

#[test]
fn mismatched_buffer_sets_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let emu = HostEmulator::default();
    let mut host = HostBuffers::allocate(&emu, 16)?;
    host.fill_inputs()?;
    let mut dev = DeviceBuffers::allocate(&emu, 8)?;
    let err = run_device_pipeline(&emu, &mut host, &mut dev, 4).unwrap_err();
    assert!(matches!(err, BenchError::DegenerateInput(_)));
    assert!(emu.trace().is_empty());
    Ok(())
}
