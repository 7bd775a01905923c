//! # Host fused multiply-add
//!
//! Computes `out[i] = a[i] * b[i] + d[i]` on the CPU. This is the reference the
//! device result is validated against and the baseline of the speedup figure.
//!
//! ## Kernels
//! - **Scalar**: separate multiply and add, one element at a time
//! - **Avx2**: 8 lanes per `vfmadd` (needs `avx2` + `fma`)
//! - **Avx512**: 16 lanes per `vfmadd` (feature `nightly-avx`)
//!
//! ## Errors
//! - **DegenerateInput**: `a`, `b`, `d` and `out` differ in length

use aligned_vec::{AVec, CACHELINE_ALIGN};
#[cfg(target_arch = "x86_64")]
use core::arch::x86_64::*;
use rayon::prelude::*;

use crate::error::BenchError;
use crate::host::inputs::FmaInputs;
use crate::utilities::enums::Kernel;
use crate::utilities::helpers::resolve_kernel;

/// Elements per rayon task in [`fma_par_into_slice`].
pub const PAR_CHUNK: usize = 1 << 16;

#[derive(Debug, Clone)]
pub struct FmaOutput {
    pub values: AVec<f32>,
    pub kernel: Kernel,
}

#[derive(Debug, Clone, Copy)]
pub struct HostFmaBuilder {
    kernel: Kernel,
    parallel: bool,
}

impl Default for HostFmaBuilder {
    fn default() -> Self {
        Self {
            kernel: Kernel::Auto,
            parallel: true,
        }
    }
}

impl HostFmaBuilder {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn kernel(mut self, k: Kernel) -> Self {
        self.kernel = k;
        self
    }
    pub fn parallel(mut self, on: bool) -> Self {
        self.parallel = on;
        self
    }
    pub fn apply_slices(self, a: &[f32], b: &[f32], d: &[f32]) -> Result<FmaOutput, BenchError> {
        let mut values = AVec::from_iter(CACHELINE_ALIGN, std::iter::repeat(0.0f32).take(a.len()));
        let kernel = if self.parallel {
            fma_par_into_slice(a, b, d, &mut values, self.kernel)?
        } else {
            fma_into_slice(a, b, d, &mut values, self.kernel)?
        };
        Ok(FmaOutput { values, kernel })
    }
    pub fn apply(self, inputs: &FmaInputs) -> Result<FmaOutput, BenchError> {
        self.apply_slices(&inputs.a, &inputs.b, &inputs.d)
    }
}

pub fn fma_host(inputs: &FmaInputs) -> Result<FmaOutput, BenchError> {
    HostFmaBuilder::new().apply(inputs)
}

fn check_lengths(a: &[f32], b: &[f32], d: &[f32], out: &[f32]) -> Result<(), BenchError> {
    let n = a.len();
    if b.len() != n || d.len() != n || out.len() != n {
        return Err(BenchError::DegenerateInput(format!(
            "length mismatch: a={} b={} d={} out={}",
            n,
            b.len(),
            d.len(),
            out.len()
        )));
    }
    Ok(())
}

/// Single-threaded FMA with the requested kernel. Returns the kernel actually used.
pub fn fma_into_slice(
    a: &[f32],
    b: &[f32],
    d: &[f32],
    out: &mut [f32],
    kernel: Kernel,
) -> Result<Kernel, BenchError> {
    check_lengths(a, b, d, out)?;
    let chosen = resolve_kernel(kernel);
    unsafe { fma_dispatch(a, b, d, out, chosen) };
    Ok(chosen)
}

/// Same as [`fma_into_slice`] with the work split over rayon in `PAR_CHUNK` pieces.
pub fn fma_par_into_slice(
    a: &[f32],
    b: &[f32],
    d: &[f32],
    out: &mut [f32],
    kernel: Kernel,
) -> Result<Kernel, BenchError> {
    check_lengths(a, b, d, out)?;
    let chosen = resolve_kernel(kernel);
    out.par_chunks_mut(PAR_CHUNK)
        .enumerate()
        .for_each(|(chunk, dst)| {
            let start = chunk * PAR_CHUNK;
            let end = start + dst.len();
            unsafe { fma_dispatch(&a[start..end], &b[start..end], &d[start..end], dst, chosen) };
        });
    Ok(chosen)
}

/// # Safety
///
/// `kernel` must be resolved and supported by the running CPU; all slices share one length.
#[inline]
unsafe fn fma_dispatch(a: &[f32], b: &[f32], d: &[f32], out: &mut [f32], kernel: Kernel) {
    match kernel {
        #[cfg(target_arch = "x86_64")]
        Kernel::Avx2 => unsafe { fma_avx2(a, b, d, out) },
        #[cfg(all(feature = "nightly-avx", target_arch = "x86_64"))]
        Kernel::Avx512 => unsafe { fma_avx512(a, b, d, out) },
        _ => fma_scalar(a, b, d, out),
    }
}

#[inline]
pub fn fma_scalar(a: &[f32], b: &[f32], d: &[f32], out: &mut [f32]) {
    for (((o, &x), &y), &z) in out.iter_mut().zip(a).zip(b).zip(d) {
        *o = x * y + z;
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
pub unsafe fn fma_avx2(a: &[f32], b: &[f32], d: &[f32], out: &mut [f32]) {
    const LANES: usize = 8;
    let n = out.len();
    let body = n - n % LANES;
    let mut i = 0;
    while i < body {
        let va = _mm256_loadu_ps(a.as_ptr().add(i));
        let vb = _mm256_loadu_ps(b.as_ptr().add(i));
        let vd = _mm256_loadu_ps(d.as_ptr().add(i));
        _mm256_storeu_ps(out.as_mut_ptr().add(i), _mm256_fmadd_ps(va, vb, vd));
        i += LANES;
    }
    for j in body..n {
        out[j] = a[j].mul_add(b[j], d[j]);
    }
}

#[cfg(all(feature = "nightly-avx", target_arch = "x86_64"))]
#[target_feature(enable = "avx512f,fma")]
pub unsafe fn fma_avx512(a: &[f32], b: &[f32], d: &[f32], out: &mut [f32]) {
    const LANES: usize = 16;
    let n = out.len();
    let body = n - n % LANES;
    let mut i = 0;
    while i < body {
        let va = _mm512_loadu_ps(a.as_ptr().add(i));
        let vb = _mm512_loadu_ps(b.as_ptr().add(i));
        let vd = _mm512_loadu_ps(d.as_ptr().add(i));
        _mm512_storeu_ps(out.as_mut_ptr().add(i), _mm512_fmadd_ps(va, vb, vd));
        i += LANES;
    }
    if body < n {
        let mask: __mmask16 = (1u16 << (n - body)) - 1;
        let va = _mm512_maskz_loadu_ps(mask, a.as_ptr().add(body));
        let vb = _mm512_maskz_loadu_ps(mask, b.as_ptr().add(body));
        let vd = _mm512_maskz_loadu_ps(mask, d.as_ptr().add(body));
        _mm512_mask_storeu_ps(out.as_mut_ptr().add(body), mask, _mm512_fmadd_ps(va, vb, vd));
    }
}
