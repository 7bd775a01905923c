use std::env;
use std::path::PathBuf;
use std::process::Command;

const FUSED_OP_SRC: &str = "kernels/cuda/fused_op.cu";
const FUSED_OP_PTX: &str = "fused_op.ptx";
const DEFAULT_ARCH: &str = "compute_70";
const FALLBACK_ARCH: &str = "compute_80";

fn main() {
    // Only compile CUDA PTX when the crate feature `cuda` is enabled.
    // Cargo exposes active features to build.rs via env vars like CARGO_FEATURE_CUDA.
    if env::var("CARGO_FEATURE_CUDA").is_ok() {
        compile_cuda_kernels();
    }
}

fn compile_cuda_kernels() {
    println!("cargo:rerun-if-changed=kernels/cuda");
    println!("cargo:rerun-if-env-changed=CUDA_PATH");
    println!("cargo:rerun-if-env-changed=CUDA_HOME");
    println!("cargo:rerun-if-env-changed=CUDA_ARCH");
    println!("cargo:rerun-if-env-changed=CUDA_ARCHS");
    println!("cargo:rerun-if-env-changed=NVCC");
    println!("cargo:rerun-if-env-changed=NVCC_ARGS");
    println!("cargo:rerun-if-env-changed=CUDA_DEBUG");
    println!("cargo:rerun-if-env-changed=CUDA_FAST_MATH");

    // PTX is JIT-loaded at runtime; no cudart linkage is needed here.
    let cuda_path = find_cuda_path();
    compile_kernel(&cuda_path, FUSED_OP_SRC, FUSED_OP_PTX);
}

fn find_cuda_path() -> String {
    env::var("CUDA_PATH")
        .or_else(|_| env::var("CUDA_HOME"))
        .unwrap_or_else(|_| {
            if cfg!(target_os = "windows") {
                "C:/Program Files/NVIDIA GPU Computing Toolkit/CUDA/v12.4".to_string()
            } else {
                "/usr/local/cuda".to_string()
            }
        })
}

// Accept forms: 89, 8.9, sm_89, compute_89
fn normalize_arch(s: &str) -> String {
    let t = s.trim();
    if t.is_empty() {
        return String::new();
    }
    if t.starts_with("sm_") {
        // -ptx wants a virtual architecture
        return t.replacen("sm_", "compute_", 1);
    }
    if t.starts_with("compute_") {
        return t.to_string();
    }
    let digits: String = t.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() >= 2 {
        return format!("compute_{}", digits);
    }
    t.to_string()
}

fn select_arch() -> String {
    if let Ok(list) = env::var("CUDA_ARCHS") {
        list.split(|c: char| c == ',' || c.is_ascii_whitespace())
            .find(|t| !t.trim().is_empty())
            .map(normalize_arch)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_ARCH.to_string())
    } else if let Ok(a) = env::var("CUDA_ARCH") {
        let n = normalize_arch(&a);
        if n.is_empty() {
            DEFAULT_ARCH.to_string()
        } else {
            n
        }
    } else {
        DEFAULT_ARCH.to_string()
    }
}

fn nvcc_command(nvcc: &str, arch: &str, src: &str, ptx_path: &str) -> Command {
    let mut cmd = Command::new(nvcc);
    cmd.args(["-std=c++17", "-ptx", "-O3"]);

    // CUDA_FAST_MATH=1 opts into fast math; the FMA kernel does not need it.
    if env::var("CUDA_FAST_MATH").ok().as_deref() == Some("1") {
        cmd.arg("--use_fast_math");
    }
    if env::var("CUDA_DEBUG").ok().as_deref() == Some("1") {
        cmd.arg("-lineinfo");
    }

    cmd.args(["-arch", arch, "-o", ptx_path, src]);

    if let Ok(extra) = env::var("NVCC_ARGS") {
        for tok in extra.split_whitespace() {
            cmd.arg(tok);
        }
    }
    if cfg!(target_os = "windows") {
        cmd.arg("-D_ALLOW_COMPILER_AND_STL_VERSION_MISMATCH");
        cmd.arg("-allow-unsupported-compiler");
    }
    cmd
}

fn compile_kernel(cuda_path: &str, src: &str, ptx_name: &str) {
    println!("cargo:rerun-if-changed={}", src);

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));
    let ptx_path = out_dir.join(ptx_name);
    let ptx_path = ptx_path.to_str().expect("ptx path");

    // NVCC env var wins; else cuda_path/bin/nvcc
    let nvcc = env::var("NVCC").unwrap_or_else(|_| {
        if cfg!(target_os = "windows") {
            format!("{}/bin/nvcc.exe", cuda_path)
        } else {
            format!("{}/bin/nvcc", cuda_path)
        }
    });

    let arch = select_arch();
    let mut cmd = nvcc_command(&nvcc, &arch, src, ptx_path);
    eprintln!("Running nvcc command: {:?}", cmd);
    let mut output = cmd.output().expect("Failed to execute nvcc");

    // If the arch is unsupported by this nvcc, retry once with a widely supported one.
    if !output.status.success() {
        let err_s = String::from_utf8_lossy(&output.stderr);
        let maybe_arch_fail = err_s.contains("unsupported gpu architecture")
            || err_s.contains("Value 'compute_");
        if arch != FALLBACK_ARCH && maybe_arch_fail {
            eprintln!(
                "Falling back to -arch={} for {} (nvcc doesn't support {})",
                FALLBACK_ARCH, src, arch
            );
            let mut cmd2 = nvcc_command(&nvcc, FALLBACK_ARCH, src, ptx_path);
            output = cmd2.output().expect("Failed to execute nvcc (fallback)");
        }
    }

    if !output.status.success() {
        eprintln!("CUDA compilation failed for {}!", src);
        eprintln!("stdout: {}", String::from_utf8_lossy(&output.stdout));
        eprintln!("stderr: {}", String::from_utf8_lossy(&output.stderr));
        panic!("nvcc compilation failed");
    }
}
