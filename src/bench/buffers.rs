//! Host (page-locked) and device buffers for one benchmark run.
//!
//! Both sets are plain owners: dropping them frees the memory, so every exit
//! path of a run (success, allocation failure half way, launch failure)
//! releases exactly what was acquired.

use crate::device::{Accelerator, BufferLayout, DeviceError};
use crate::error::BenchError;
use crate::host::inputs::generate_into;

/// Number of device regions a run needs: a, b, d and c.
pub const DEVICE_REGIONS: usize = 4;

pub struct HostBuffers<A: Accelerator> {
    pub a: A::PinnedBuffer,
    pub b: A::PinnedBuffer,
    pub d: A::PinnedBuffer,
    pub c: A::PinnedBuffer,
}

impl<A: Accelerator> HostBuffers<A> {
    pub fn allocate(acc: &A, n: usize) -> Result<Self, BenchError> {
        let alloc = || acc.alloc_pinned(n).map_err(BenchError::AllocationFailure);
        Ok(Self {
            a: alloc()?,
            b: alloc()?,
            d: alloc()?,
            c: alloc()?,
        })
    }

    /// Fill a, b, d with the deterministic benchmark inputs.
    pub fn fill_inputs(&mut self) -> Result<(), BenchError> {
        generate_into(&mut self.a, &mut self.b, &mut self.d)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.a.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.a.is_empty()
    }
}

pub struct DeviceBuffers<A: Accelerator> {
    pub a: A::DeviceBuffer,
    pub b: A::DeviceBuffer,
    pub d: A::DeviceBuffer,
    pub c: A::DeviceBuffer,
    len: usize,
}

impl<A: Accelerator> DeviceBuffers<A> {
    /// Four `n`-element `f32` regions, after checking the backend can hold all of them.
    pub fn allocate(acc: &A, n: usize) -> Result<Self, BenchError> {
        let layout = BufferLayout::f32(n);
        let required = layout
            .bytes()
            .and_then(|per| {
                per.checked_mul(DEVICE_REGIONS)
                    .ok_or(DeviceError::SizeOverflow {
                        len: n.saturating_mul(DEVICE_REGIONS),
                        elem_size: layout.elem_size,
                    })
            })
            .map_err(BenchError::AllocationFailure)?;
        acc.check_capacity(required)
            .map_err(BenchError::AllocationFailure)?;
        tracing::debug!(n, required_bytes = required, "allocating device buffers");

        let alloc = || acc.alloc_device(layout).map_err(BenchError::AllocationFailure);
        Ok(Self {
            a: alloc()?,
            b: alloc()?,
            d: alloc()?,
            c: alloc()?,
            len: n,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
