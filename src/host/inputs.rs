//! Deterministic input arrays for the FMA benchmark.
//!
//! `x` is `n` points evenly spaced over `[1, 100]` (both ends inclusive) and
//!
//! - `a[i] = sin(x[i])`
//! - `b[i] = ln(x[i])`
//! - `d[i] = exp(-x[i] / 50)`
//!
//! The spacing is computed in `f64` and the last point is pinned to exactly
//! `100.0`; everything after the cast is single precision.

use rayon::prelude::*;

use crate::error::BenchError;

pub const X_START: f64 = 1.0;
pub const X_END: f64 = 100.0;

/// Below this length the fill stays on the calling thread.
const PAR_THRESHOLD: usize = 1 << 16;

#[derive(Debug, Clone, PartialEq)]
pub struct FmaInputs {
    pub a: Vec<f32>,
    pub b: Vec<f32>,
    pub d: Vec<f32>,
}

impl FmaInputs {
    #[inline]
    pub fn len(&self) -> usize {
        self.a.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.a.is_empty()
    }
}

/// `i`-th of `n` evenly spaced points over `[X_START, X_END]`.
#[inline]
pub fn linspace_point(i: usize, n: usize) -> f32 {
    if n <= 1 {
        return X_START as f32;
    }
    if i == n - 1 {
        return X_END as f32;
    }
    let step = (X_END - X_START) / (n - 1) as f64;
    (X_START + i as f64 * step) as f32
}

#[inline(always)]
fn triple_at(i: usize, n: usize) -> (f32, f32, f32) {
    let x = linspace_point(i, n);
    (x.sin(), x.ln(), (-x / 50.0).exp())
}

pub fn generate_inputs(n: usize) -> FmaInputs {
    let mut a = vec![0.0f32; n];
    let mut b = vec![0.0f32; n];
    let mut d = vec![0.0f32; n];
    fill(&mut a, &mut b, &mut d);
    FmaInputs { a, b, d }
}

/// Fill caller-owned slices (typically pinned buffers) in place.
pub fn generate_into(a: &mut [f32], b: &mut [f32], d: &mut [f32]) -> Result<(), BenchError> {
    if a.len() != b.len() || a.len() != d.len() {
        return Err(BenchError::DegenerateInput(format!(
            "input slices differ in length: a={} b={} d={}",
            a.len(),
            b.len(),
            d.len()
        )));
    }
    fill(a, b, d);
    Ok(())
}

fn fill(a: &mut [f32], b: &mut [f32], d: &mut [f32]) {
    let n = a.len();
    if n < PAR_THRESHOLD {
        for (i, ((ai, bi), di)) in a.iter_mut().zip(b.iter_mut()).zip(d.iter_mut()).enumerate() {
            (*ai, *bi, *di) = triple_at(i, n);
        }
    } else {
        a.par_iter_mut()
            .zip(b.par_iter_mut())
            .zip(d.par_iter_mut())
            .enumerate()
            .for_each(|(i, ((ai, bi), di))| {
                (*ai, *bi, *di) = triple_at(i, n);
            });
    }
}
