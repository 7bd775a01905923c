//! CUDA backend for the fused multiply-add benchmark.
//!
//! - PTX built by `build.rs` from `kernels/cuda/fused_op.cu`, loaded with
//!   DetermineTargetFromContext + O2 and progressively simpler JIT options
//! - Streams are NON_BLOCKING; pinned host memory is `LockedBuffer`
//! - VRAM pre-check with 64 MiB headroom (`FMA_MEM_CHECK=0` disables it)

#![cfg(feature = "cuda")]

use std::ffi::c_void;

use cust::context::Context;
use cust::device::{Device, DeviceAttribute};
use cust::event::{Event, EventFlags};
use cust::function::{BlockSize, GridSize};
use cust::memory::{mem_get_info, AsyncCopyDestination, DeviceBuffer, LockedBuffer};
use cust::module::{Module, ModuleJitOption, OptLevel};
use cust::prelude::*;
use cust::stream::{Stream, StreamFlags};

use crate::device::{
    Accelerator, BufferLayout, DeviceError, LaunchConfig, FUSED_OP_KERNEL, MAX_THREADS_PER_BLOCK,
};

const VRAM_HEADROOM: usize = 64 * 1024 * 1024;

pub struct CudaFma {
    module: Module,
    device_id: u32,
    max_threads_per_block: u32,
    _context: Context,
}

impl CudaFma {
    pub fn new(device_id: usize) -> Result<Self, DeviceError> {
        cust::init(CudaFlags::empty())?;
        let device = Device::get_device(device_id as u32)?;
        let context = Context::new(device)?;

        let ptx: &str = include_str!(concat!(env!("OUT_DIR"), "/fused_op.ptx"));
        let jit_opts = &[
            ModuleJitOption::DetermineTargetFromContext,
            ModuleJitOption::OptLevel(OptLevel::O2),
        ];
        let module = Module::from_ptx(ptx, jit_opts)
            .or_else(|_| Module::from_ptx(ptx, &[ModuleJitOption::DetermineTargetFromContext]))
            .or_else(|_| Module::from_ptx(ptx, &[]))?;

        let max_threads_per_block = device
            .get_attribute(DeviceAttribute::MaxThreadsPerBlock)
            .map(|v| v as u32)
            .unwrap_or(MAX_THREADS_PER_BLOCK);

        tracing::info!(
            device_id,
            device = %device.name().unwrap_or_else(|_| "unknown".into()),
            max_threads_per_block,
            "CUDA context ready"
        );

        Ok(Self {
            module,
            device_id: device_id as u32,
            max_threads_per_block,
            _context: context,
        })
    }

    #[inline]
    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    fn mem_check_enabled() -> bool {
        match std::env::var("FMA_MEM_CHECK") {
            Ok(v) => v != "0" && v.to_lowercase() != "false",
            Err(_) => true,
        }
    }

    fn will_fit(required_bytes: usize, headroom_bytes: usize) -> Result<(), DeviceError> {
        if !Self::mem_check_enabled() {
            return Ok(());
        }
        match mem_get_info() {
            Ok((free, _total)) if required_bytes.saturating_add(headroom_bytes) > free => {
                Err(DeviceError::OutOfMemory {
                    required: required_bytes,
                    free,
                    headroom: headroom_bytes,
                })
            }
            _ => Ok(()),
        }
    }
}

impl Accelerator for CudaFma {
    type PinnedBuffer = LockedBuffer<f32>;
    type DeviceBuffer = DeviceBuffer<f32>;
    type Stream = Stream;
    type Event = Event;

    fn name(&self) -> String {
        format!("cuda:{}", self.device_id)
    }

    fn max_threads_per_block(&self) -> u32 {
        self.max_threads_per_block
    }

    fn check_capacity(&self, required_bytes: usize) -> Result<(), DeviceError> {
        Self::will_fit(required_bytes, VRAM_HEADROOM)
    }

    fn alloc_pinned(&self, len: usize) -> Result<LockedBuffer<f32>, DeviceError> {
        Ok(LockedBuffer::new(&0.0f32, len)?)
    }

    fn alloc_device(&self, layout: BufferLayout) -> Result<DeviceBuffer<f32>, DeviceError> {
        layout.expect_elem::<f32>()?;
        layout.bytes()?;
        Ok(unsafe { DeviceBuffer::uninitialized(layout.len) }?)
    }

    fn create_stream(&self) -> Result<Stream, DeviceError> {
        Ok(Stream::new(StreamFlags::NON_BLOCKING, None)?)
    }

    fn create_event(&self) -> Result<Event, DeviceError> {
        Ok(Event::new(EventFlags::DEFAULT)?)
    }

    fn record_event(&self, event: &Event, stream: &Stream) -> Result<(), DeviceError> {
        Ok(event.record(stream)?)
    }

    unsafe fn copy_to_device_async(
        &self,
        dst: &mut DeviceBuffer<f32>,
        src: &LockedBuffer<f32>,
        stream: &Stream,
    ) -> Result<(), DeviceError> {
        unsafe { dst.async_copy_from(src.as_slice(), stream)? };
        Ok(())
    }

    unsafe fn copy_to_host_async(
        &self,
        dst: &mut LockedBuffer<f32>,
        src: &DeviceBuffer<f32>,
        stream: &Stream,
    ) -> Result<(), DeviceError> {
        unsafe { src.async_copy_to(dst.as_mut_slice(), stream)? };
        Ok(())
    }

    unsafe fn launch_fused_op(
        &self,
        config: LaunchConfig,
        a: &DeviceBuffer<f32>,
        b: &DeviceBuffer<f32>,
        d: &DeviceBuffer<f32>,
        c: &mut DeviceBuffer<f32>,
        n: i32,
        stream: &Stream,
    ) -> Result<(), DeviceError> {
        config.validate(self.max_threads_per_block)?;
        let func = self
            .module
            .get_function(FUSED_OP_KERNEL)
            .map_err(|_| DeviceError::MissingKernelSymbol {
                name: FUSED_OP_KERNEL,
            })?;

        let grid: GridSize = config.grid.into();
        let block: BlockSize = config.block.into();
        unsafe {
            let mut a_ptr = a.as_device_ptr().as_raw();
            let mut b_ptr = b.as_device_ptr().as_raw();
            let mut d_ptr = d.as_device_ptr().as_raw();
            let mut c_ptr = c.as_device_ptr().as_raw();
            let mut n_i = n;
            let args: &mut [*mut c_void] = &mut [
                &mut a_ptr as *mut _ as *mut c_void,
                &mut b_ptr as *mut _ as *mut c_void,
                &mut d_ptr as *mut _ as *mut c_void,
                &mut c_ptr as *mut _ as *mut c_void,
                &mut n_i as *mut _ as *mut c_void,
            ];
            stream.launch(&func, grid, block, 0, args)?;
        }
        Ok(())
    }

    fn synchronize_event(&self, event: &Event) -> Result<(), DeviceError> {
        Ok(event.synchronize()?)
    }

    fn synchronize_stream(&self, stream: &Stream) -> Result<(), DeviceError> {
        Ok(stream.synchronize()?)
    }

    fn elapsed_ms(&self, start: &Event, end: &Event) -> Result<f32, DeviceError> {
        Ok(end.elapsed_time_f32(start)?)
    }
}
