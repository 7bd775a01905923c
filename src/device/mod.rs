//! Accelerator runtime boundary.
//!
//! The benchmark only needs a small capability surface from whatever runs
//! the kernel: pinned host memory, device memory, async copies on an in-order
//! stream, one kernel launch, and timing events. [`Accelerator`] is that
//! surface. `CudaFma` (feature `cuda`) implements it over cust;
//! [`HostEmulator`] implements it on the CPU so the pipeline runs and is tested
//! on machines without a GPU.

use std::fmt;
use std::mem;
use std::ops::{Deref, DerefMut};

use thiserror::Error;

use crate::utilities::helpers::blocks_for;

pub mod emulated;

pub use emulated::{EmulatorOptions, HostEmulator, StreamOp};

/// Name of the kernel symbol in the PTX module and in emulator traces.
pub const FUSED_OP_KERNEL: &str = "fused_op";

/// Hardware limit on threads per block for every CUDA architecture we target.
pub const MAX_THREADS_PER_BLOCK: u32 = 1024;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[cfg(feature = "cuda")]
    #[error(transparent)]
    Cuda(#[from] cust::error::CudaError),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("out of memory: required={required} free={free} headroom={headroom}")]
    OutOfMemory {
        required: usize,
        free: usize,
        headroom: usize,
    },
    #[error("invalid buffer layout: elem_size={elem_size} but buffer holds {expected}-byte elements")]
    InvalidLayout { elem_size: usize, expected: usize },
    #[error("buffer size overflow: len={len} elem_size={elem_size}")]
    SizeOverflow { len: usize, elem_size: usize },
    #[error("launch config too large: grid={grid} block={block} (max threads per block {max_threads})")]
    LaunchConfigTooLarge {
        grid: u32,
        block: u32,
        max_threads: u32,
    },
    #[error("empty launch: grid={grid} block={block}")]
    EmptyLaunch { grid: u32, block: u32 },
    #[error("length mismatch for {what}: expected={expected} got={got}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("illegal address: index {index} is outside a buffer of {len} elements")]
    IllegalAddress { index: usize, len: usize },
    #[error("read of device buffer {buffer} before anything was written to it")]
    UninitializedRead { buffer: u64 },
    #[error("missing kernel symbol: {name}")]
    MissingKernelSymbol { name: &'static str },
    #[error("timing unavailable: {0}")]
    Timing(String),
}

/// Explicit element count and element size for a device allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferLayout {
    pub len: usize,
    pub elem_size: usize,
}

impl BufferLayout {
    #[inline]
    pub const fn new(len: usize, elem_size: usize) -> Self {
        Self { len, elem_size }
    }

    #[inline]
    pub const fn f32(len: usize) -> Self {
        Self::new(len, mem::size_of::<f32>())
    }

    #[inline]
    pub fn bytes(&self) -> Result<usize, DeviceError> {
        self.len
            .checked_mul(self.elem_size)
            .ok_or(DeviceError::SizeOverflow {
                len: self.len,
                elem_size: self.elem_size,
            })
    }

    /// Rejects a layout that disagrees with the element type `T` the backend stores.
    #[inline]
    pub fn expect_elem<T>(&self) -> Result<(), DeviceError> {
        if self.elem_size != mem::size_of::<T>() {
            return Err(DeviceError::InvalidLayout {
                elem_size: self.elem_size,
                expected: mem::size_of::<T>(),
            });
        }
        Ok(())
    }
}

/// One-dimensional grid/block configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaunchConfig {
    pub grid: u32,
    pub block: u32,
}

impl LaunchConfig {
    /// Smallest grid of `threads_per_block`-sized blocks that covers `n` items.
    ///
    /// The last block is padded when `n` is not a multiple of the block size;
    /// the kernel's `idx < n` check keeps the padding threads from writing.
    pub fn cover(n: usize, threads_per_block: u32) -> Self {
        let blocks = blocks_for(n, threads_per_block);
        Self {
            grid: u32::try_from(blocks).unwrap_or(u32::MAX),
            block: threads_per_block,
        }
    }

    #[inline]
    pub fn total_threads(&self) -> u64 {
        self.grid as u64 * self.block as u64
    }

    /// Threads past `n` in the last block.
    #[inline]
    pub fn padding(&self, n: usize) -> u64 {
        self.total_threads().saturating_sub(n as u64)
    }

    pub fn validate(&self, max_threads: u32) -> Result<(), DeviceError> {
        if self.grid == 0 || self.block == 0 {
            return Err(DeviceError::EmptyLaunch {
                grid: self.grid,
                block: self.block,
            });
        }
        if self.block > max_threads {
            return Err(DeviceError::LaunchConfigTooLarge {
                grid: self.grid,
                block: self.block,
                max_threads,
            });
        }
        Ok(())
    }
}

impl fmt::Display for LaunchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} blocks x {} threads", self.grid, self.block)
    }
}

/// Capability surface the orchestrator needs from an accelerator runtime.
///
/// All `*_async` operations and launches are ordered by the stream they are
/// issued on and may complete after the call returns. Host memory handed to an
/// async copy must stay alive and untouched until the stream has passed the
/// copy (an event sync or stream sync after it).
pub trait Accelerator {
    /// Page-locked host memory.
    type PinnedBuffer: Deref<Target = [f32]> + DerefMut;
    type DeviceBuffer;
    type Stream;
    type Event;

    fn name(&self) -> String;

    fn max_threads_per_block(&self) -> u32 {
        MAX_THREADS_PER_BLOCK
    }

    /// Fails early when `required_bytes` of device memory cannot be satisfied.
    fn check_capacity(&self, _required_bytes: usize) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Zero-filled page-locked host buffer of `len` elements.
    fn alloc_pinned(&self, len: usize) -> Result<Self::PinnedBuffer, DeviceError>;

    fn alloc_device(&self, layout: BufferLayout) -> Result<Self::DeviceBuffer, DeviceError>;

    fn create_stream(&self) -> Result<Self::Stream, DeviceError>;

    fn create_event(&self) -> Result<Self::Event, DeviceError>;

    fn record_event(&self, event: &Self::Event, stream: &Self::Stream) -> Result<(), DeviceError>;

    /// # Safety
    ///
    /// `src` must outlive the copy and must not be written until the stream has
    /// completed it.
    unsafe fn copy_to_device_async(
        &self,
        dst: &mut Self::DeviceBuffer,
        src: &Self::PinnedBuffer,
        stream: &Self::Stream,
    ) -> Result<(), DeviceError>;

    /// # Safety
    ///
    /// `dst` must outlive the copy and must not be read until the stream has
    /// completed it.
    unsafe fn copy_to_host_async(
        &self,
        dst: &mut Self::PinnedBuffer,
        src: &Self::DeviceBuffer,
        stream: &Self::Stream,
    ) -> Result<(), DeviceError>;

    /// Enqueue `fused_op(a, b, d, c, n)` with `config`.
    ///
    /// # Safety
    ///
    /// Every buffer must hold at least `n` elements and `c` must not alias the
    /// inputs.
    #[allow(clippy::too_many_arguments)]
    unsafe fn launch_fused_op(
        &self,
        config: LaunchConfig,
        a: &Self::DeviceBuffer,
        b: &Self::DeviceBuffer,
        d: &Self::DeviceBuffer,
        c: &mut Self::DeviceBuffer,
        n: i32,
        stream: &Self::Stream,
    ) -> Result<(), DeviceError>;

    /// Block the host until all work recorded before `event` has completed.
    fn synchronize_event(&self, event: &Self::Event) -> Result<(), DeviceError>;

    fn synchronize_stream(&self, stream: &Self::Stream) -> Result<(), DeviceError>;

    /// Device time between two completed events, in milliseconds.
    fn elapsed_ms(&self, start: &Self::Event, end: &Self::Event) -> Result<f32, DeviceError>;
}
