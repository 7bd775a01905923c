use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use fma_bench::bench::config::{DEFAULT_ATOL, DEFAULT_N, DEFAULT_RTOL, DEFAULT_THREADS_PER_BLOCK};
use fma_bench::cuda::cuda_available;
use fma_bench::{run_benchmark, Accelerator, BenchConfig, BenchError, HostEmulator, Kernel};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum BackendArg {
    /// CUDA when compiled in and a device is present, otherwise the host emulator.
    Auto,
    Cuda,
    Emulated,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum HostKernelArg {
    Auto,
    Scalar,
    Avx2,
    Avx512,
}

impl From<HostKernelArg> for Kernel {
    fn from(k: HostKernelArg) -> Self {
        match k {
            HostKernelArg::Auto => Kernel::Auto,
            HostKernelArg::Scalar => Kernel::Scalar,
            HostKernelArg::Avx2 => Kernel::Avx2,
            HostKernelArg::Avx512 => Kernel::Avx512,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "fma-bench", version, about = "Host SIMD vs GPU fused multiply-add benchmark")]
struct Cli {
    /// Number of elements.
    #[arg(long, default_value_t = DEFAULT_N)]
    n: usize,

    #[arg(long, default_value_t = DEFAULT_THREADS_PER_BLOCK)]
    threads_per_block: u32,

    /// Relative tolerance of the element-wise comparison.
    #[arg(long, default_value_t = DEFAULT_RTOL)]
    rtol: f64,

    /// Absolute tolerance of the element-wise comparison.
    #[arg(long, default_value_t = DEFAULT_ATOL)]
    atol: f64,

    #[arg(long, value_enum, default_value_t = BackendArg::Auto)]
    backend: BackendArg,

    #[arg(long, value_enum, default_value_t = HostKernelArg::Auto)]
    host_kernel: HostKernelArg,

    #[arg(long, default_value_t = 0)]
    device_id: usize,
}

const EXIT_MISMATCH: u8 = 1;
const EXIT_FATAL: u8 = 2;

fn init_logging() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .with_env_var("FMA_BENCH_LOG")
        .from_env_lossy();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

fn run<A: Accelerator>(acc: &A, cfg: &BenchConfig) -> ExitCode {
    match run_benchmark(acc, cfg) {
        Ok(report) => {
            println!("{report}");
            if report.passed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_MISMATCH)
            }
        }
        Err(e) => fatal(e),
    }
}

fn fatal(e: BenchError) -> ExitCode {
    error!(error = %e, "benchmark aborted");
    eprintln!("error: {e}");
    ExitCode::from(EXIT_FATAL)
}

#[cfg(feature = "cuda")]
fn run_cuda(device_id: usize, cfg: &BenchConfig) -> ExitCode {
    match fma_bench::CudaFma::new(device_id) {
        Ok(acc) => run(&acc, cfg),
        Err(e) => fatal(BenchError::Initialization(e)),
    }
}

#[cfg(not(feature = "cuda"))]
fn run_cuda(_device_id: usize, _cfg: &BenchConfig) -> ExitCode {
    fatal(BenchError::BackendUnavailable(
        "this build has no CUDA support (rebuild with --features cuda)".into(),
    ))
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let cfg = match BenchConfig::builder()
        .n(cli.n)
        .threads_per_block(cli.threads_per_block)
        .rtol(cli.rtol)
        .atol(cli.atol)
        .host_kernel(cli.host_kernel.into())
        .build()
    {
        Ok(cfg) => cfg,
        Err(e) => return fatal(e),
    };

    let backend = match cli.backend {
        BackendArg::Auto if cuda_available() => BackendArg::Cuda,
        BackendArg::Auto => {
            warn!("no CUDA device available, using the host emulator");
            BackendArg::Emulated
        }
        other => other,
    };
    info!(?backend, n = cfg.n, threads_per_block = cfg.threads_per_block, "starting");

    match backend {
        BackendArg::Cuda => run_cuda(cli.device_id, &cfg),
        _ => run(&HostEmulator::default(), &cfg),
    }
}
