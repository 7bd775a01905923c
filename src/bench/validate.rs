//! Element-wise comparison of the device result against the host reference.
//!
//! An element passes when `|gpu - cpu| <= atol + rtol * |cpu|`. NaN on either
//! side never passes.

use std::fmt;

use rayon::prelude::*;

use crate::error::BenchError;

/// Mismatches listed individually; the rest are only counted.
pub const MAX_REPORTED: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mismatch {
    pub index: usize,
    pub gpu: f32,
    pub cpu: f32,
    pub abs_diff: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub checked: usize,
    pub total_mismatches: usize,
    /// First `MAX_REPORTED` mismatches in index order.
    pub mismatches: Vec<Mismatch>,
    pub rtol: f64,
    pub atol: f64,
}

impl ValidationReport {
    pub fn empty(rtol: f64, atol: f64) -> Self {
        Self {
            checked: 0,
            total_mismatches: 0,
            mismatches: Vec::new(),
            rtol,
            atol,
        }
    }

    #[inline]
    pub fn passed(&self) -> bool {
        self.total_mismatches == 0
    }
}

#[inline]
pub fn within_tolerance(gpu: f32, cpu: f32, rtol: f64, atol: f64) -> bool {
    if gpu == cpu {
        return true;
    }
    let (g, c) = (gpu as f64, cpu as f64);
    (g - c).abs() <= atol + rtol * c.abs()
}

pub fn validate(gpu: &[f32], cpu: &[f32], rtol: f64, atol: f64) -> Result<ValidationReport, BenchError> {
    if gpu.len() != cpu.len() {
        return Err(BenchError::DegenerateInput(format!(
            "cannot compare {} device values with {} host values",
            gpu.len(),
            cpu.len()
        )));
    }

    let total_mismatches = gpu
        .par_iter()
        .zip(cpu.par_iter())
        .filter(|&(&g, &c)| !within_tolerance(g, c, rtol, atol))
        .count();

    let mismatches = if total_mismatches == 0 {
        Vec::new()
    } else {
        gpu.iter()
            .zip(cpu)
            .enumerate()
            .filter(|&(_, (&g, &c))| !within_tolerance(g, c, rtol, atol))
            .take(MAX_REPORTED)
            .map(|(index, (&g, &c))| Mismatch {
                index,
                gpu: g,
                cpu: c,
                abs_diff: (g - c).abs(),
            })
            .collect()
    };

    if total_mismatches > 0 {
        tracing::warn!(total_mismatches, checked = gpu.len(), "device result outside tolerance");
    }

    Ok(ValidationReport {
        checked: gpu.len(),
        total_mismatches,
        mismatches,
        rtol,
        atol,
    })
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.passed() {
            return write!(
                f,
                "PASS: all {} elements match (rtol={:e}, atol={:e})",
                self.checked, self.rtol, self.atol
            );
        }
        writeln!(
            f,
            "FAIL: {} of {} elements outside tolerance (rtol={:e}, atol={:e})",
            self.total_mismatches, self.checked, self.rtol, self.atol
        )?;
        for m in &self.mismatches {
            writeln!(
                f,
                "  [{}] gpu={:.8e} cpu={:.8e} |diff|={:.3e}",
                m.index, m.gpu, m.cpu, m.abs_diff
            )?;
        }
        let hidden = self.total_mismatches - self.mismatches.len();
        if hidden > 0 {
            writeln!(f, "  ... {hidden} more")?;
        }
        write!(f, "total mismatches: {}", self.total_mismatches)
    }
}
