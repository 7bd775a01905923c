//! CPU-backed [`Accelerator`].
//!
//! Every stream operation executes eagerly in issue order, which is a valid
//! schedule for a single in-order stream. The emulator additionally records a
//! trace of the operations, accounts live device bytes, and checks reads of
//! device memory that nothing has written yet, so tests can assert on the
//! orchestration itself and not only on the numbers it produces.

use std::cell::Cell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use aligned_vec::{AVec, ConstAlign};

use super::{
    Accelerator, BufferLayout, DeviceError, LaunchConfig, FUSED_OP_KERNEL, MAX_THREADS_PER_BLOCK,
};

const PAGE_ALIGN: usize = 4096;

#[derive(Clone, Debug)]
pub struct EmulatorOptions {
    /// Device memory capacity in bytes; `None` is unbounded.
    pub memory_limit: Option<usize>,
    pub max_threads_per_block: u32,
    /// Every event reads the same timestamp, so elapsed time is exactly zero.
    pub frozen_clock: bool,
}

impl Default for EmulatorOptions {
    fn default() -> Self {
        Self {
            memory_limit: None,
            max_threads_per_block: MAX_THREADS_PER_BLOCK,
            frozen_clock: false,
        }
    }
}

/// One operation as the stream saw it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamOp {
    RecordEvent { event: u64 },
    CopyToDevice { buffer: u64, len: usize },
    Launch {
        kernel: &'static str,
        grid: u32,
        block: u32,
        n: i32,
    },
    CopyToHost { buffer: u64, len: usize },
    SynchronizeEvent { event: u64 },
    SynchronizeStream { stream: u64 },
}

#[derive(Debug, Default)]
struct MemoryLedger {
    live_bytes: AtomicUsize,
    peak_bytes: AtomicUsize,
    live_buffers: AtomicUsize,
}

impl MemoryLedger {
    fn acquire(&self, bytes: usize) {
        let now = self.live_bytes.fetch_add(bytes, Ordering::SeqCst) + bytes;
        self.peak_bytes.fetch_max(now, Ordering::SeqCst);
        self.live_buffers.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self, bytes: usize) {
        self.live_bytes.fetch_sub(bytes, Ordering::SeqCst);
        self.live_buffers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Page-aligned host memory standing in for page-locked memory.
pub struct EmulatedPinned {
    data: AVec<f32, ConstAlign<PAGE_ALIGN>>,
}

impl Deref for EmulatedPinned {
    type Target = [f32];
    fn deref(&self) -> &[f32] {
        &self.data
    }
}

impl DerefMut for EmulatedPinned {
    fn deref_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }
}

pub struct EmulatedBuffer {
    id: u64,
    data: Vec<f32>,
    initialized: bool,
    bytes: usize,
    ledger: Arc<MemoryLedger>,
}

impl EmulatedBuffer {
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn ensure_initialized(&self) -> Result<(), DeviceError> {
        if self.initialized {
            Ok(())
        } else {
            Err(DeviceError::UninitializedRead { buffer: self.id })
        }
    }
}

impl Drop for EmulatedBuffer {
    fn drop(&mut self) {
        self.ledger.release(self.bytes);
    }
}

pub struct EmulatedStream {
    id: u64,
}

pub struct EmulatedEvent {
    id: u64,
    recorded_at: Cell<Option<Instant>>,
}

pub struct HostEmulator {
    options: EmulatorOptions,
    ledger: Arc<MemoryLedger>,
    next_id: AtomicU64,
    trace: Mutex<Vec<StreamOp>>,
    epoch: Instant,
}

impl Default for HostEmulator {
    fn default() -> Self {
        Self::new(EmulatorOptions::default())
    }
}

impl HostEmulator {
    pub fn new(options: EmulatorOptions) -> Self {
        tracing::debug!(?options, "host emulator created");
        Self {
            options,
            ledger: Arc::new(MemoryLedger::default()),
            next_id: AtomicU64::new(1),
            trace: Mutex::new(Vec::new()),
            epoch: Instant::now(),
        }
    }

    /// Bytes of device memory currently allocated.
    #[inline]
    pub fn live_device_bytes(&self) -> usize {
        self.ledger.live_bytes.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn live_device_buffers(&self) -> usize {
        self.ledger.live_buffers.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn peak_device_bytes(&self) -> usize {
        self.ledger.peak_bytes.load(Ordering::SeqCst)
    }

    /// Snapshot of every stream operation issued so far.
    pub fn trace(&self) -> Vec<StreamOp> {
        self.trace.lock().map(|t| t.clone()).unwrap_or_default()
    }

    pub fn clear_trace(&self) {
        if let Ok(mut t) = self.trace.lock() {
            t.clear();
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn push(&self, op: StreamOp) {
        if let Ok(mut t) = self.trace.lock() {
            t.push(op);
        }
    }

    fn free_bytes(&self) -> Option<usize> {
        self.options
            .memory_limit
            .map(|limit| limit.saturating_sub(self.live_device_bytes()))
    }
}

/// Run `fused_op` over the full grid the way the device would: every
/// `(block, thread)` pair walks a grid-stride loop and only touches
/// `idx < n`. Writes are checked against the output allocation.
fn run_fused_op(
    config: LaunchConfig,
    a: &[f32],
    b: &[f32],
    d: &[f32],
    c: &mut [f32],
    n: usize,
) -> Result<(), DeviceError> {
    let block = config.block as usize;
    let stride = config.grid as usize * block;
    for block_idx in 0..config.grid as usize {
        for thread_idx in 0..block {
            let mut idx = block_idx * block + thread_idx;
            while idx < n {
                let (Some(&x), Some(&y), Some(&z)) = (a.get(idx), b.get(idx), d.get(idx)) else {
                    return Err(DeviceError::IllegalAddress {
                        index: idx,
                        len: a.len().min(b.len()).min(d.len()),
                    });
                };
                let len = c.len();
                let slot = c
                    .get_mut(idx)
                    .ok_or(DeviceError::IllegalAddress { index: idx, len })?;
                *slot = x.mul_add(y, z);
                idx += stride;
            }
        }
    }
    Ok(())
}

impl Accelerator for HostEmulator {
    type PinnedBuffer = EmulatedPinned;
    type DeviceBuffer = EmulatedBuffer;
    type Stream = EmulatedStream;
    type Event = EmulatedEvent;

    fn name(&self) -> String {
        "host-emulator".to_string()
    }

    fn max_threads_per_block(&self) -> u32 {
        self.options.max_threads_per_block
    }

    fn check_capacity(&self, required_bytes: usize) -> Result<(), DeviceError> {
        match self.free_bytes() {
            Some(free) if required_bytes > free => Err(DeviceError::OutOfMemory {
                required: required_bytes,
                free,
                headroom: 0,
            }),
            _ => Ok(()),
        }
    }

    fn alloc_pinned(&self, len: usize) -> Result<EmulatedPinned, DeviceError> {
        BufferLayout::f32(len).bytes()?;
        Ok(EmulatedPinned {
            data: AVec::from_iter(PAGE_ALIGN, std::iter::repeat(0.0f32).take(len)),
        })
    }

    fn alloc_device(&self, layout: BufferLayout) -> Result<EmulatedBuffer, DeviceError> {
        layout.expect_elem::<f32>()?;
        let bytes = layout.bytes()?;
        self.check_capacity(bytes)?;
        self.ledger.acquire(bytes);
        let id = self.next_id();
        tracing::trace!(buffer = id, bytes, "device alloc");
        Ok(EmulatedBuffer {
            id,
            data: vec![0.0; layout.len],
            initialized: false,
            bytes,
            ledger: Arc::clone(&self.ledger),
        })
    }

    fn create_stream(&self) -> Result<EmulatedStream, DeviceError> {
        Ok(EmulatedStream { id: self.next_id() })
    }

    fn create_event(&self) -> Result<EmulatedEvent, DeviceError> {
        Ok(EmulatedEvent {
            id: self.next_id(),
            recorded_at: Cell::new(None),
        })
    }

    fn record_event(&self, event: &EmulatedEvent, _stream: &EmulatedStream) -> Result<(), DeviceError> {
        let at = if self.options.frozen_clock {
            self.epoch
        } else {
            Instant::now()
        };
        event.recorded_at.set(Some(at));
        self.push(StreamOp::RecordEvent { event: event.id });
        Ok(())
    }

    unsafe fn copy_to_device_async(
        &self,
        dst: &mut EmulatedBuffer,
        src: &EmulatedPinned,
        _stream: &EmulatedStream,
    ) -> Result<(), DeviceError> {
        if dst.len() != src.len() {
            return Err(DeviceError::LengthMismatch {
                what: "host to device copy",
                expected: dst.len(),
                got: src.len(),
            });
        }
        dst.data.copy_from_slice(src);
        dst.initialized = true;
        self.push(StreamOp::CopyToDevice {
            buffer: dst.id,
            len: src.len(),
        });
        Ok(())
    }

    unsafe fn copy_to_host_async(
        &self,
        dst: &mut EmulatedPinned,
        src: &EmulatedBuffer,
        _stream: &EmulatedStream,
    ) -> Result<(), DeviceError> {
        if dst.len() != src.len() {
            return Err(DeviceError::LengthMismatch {
                what: "device to host copy",
                expected: src.len(),
                got: dst.len(),
            });
        }
        src.ensure_initialized()?;
        dst.copy_from_slice(&src.data);
        self.push(StreamOp::CopyToHost {
            buffer: src.id,
            len: src.len(),
        });
        Ok(())
    }

    unsafe fn launch_fused_op(
        &self,
        config: LaunchConfig,
        a: &EmulatedBuffer,
        b: &EmulatedBuffer,
        d: &EmulatedBuffer,
        c: &mut EmulatedBuffer,
        n: i32,
        _stream: &EmulatedStream,
    ) -> Result<(), DeviceError> {
        config.validate(self.options.max_threads_per_block)?;
        let n = usize::try_from(n).map_err(|_| DeviceError::Runtime(format!("negative n={n}")))?;
        for input in [a, b, d] {
            input.ensure_initialized()?;
        }
        run_fused_op(config, &a.data, &b.data, &d.data, &mut c.data, n)?;
        c.initialized = true;
        self.push(StreamOp::Launch {
            kernel: FUSED_OP_KERNEL,
            grid: config.grid,
            block: config.block,
            n: n as i32,
        });
        Ok(())
    }

    fn synchronize_event(&self, event: &EmulatedEvent) -> Result<(), DeviceError> {
        if event.recorded_at.get().is_none() {
            return Err(DeviceError::Timing(format!("event {} was never recorded", event.id)));
        }
        self.push(StreamOp::SynchronizeEvent { event: event.id });
        Ok(())
    }

    fn synchronize_stream(&self, stream: &EmulatedStream) -> Result<(), DeviceError> {
        self.push(StreamOp::SynchronizeStream { stream: stream.id });
        Ok(())
    }

    fn elapsed_ms(&self, start: &EmulatedEvent, end: &EmulatedEvent) -> Result<f32, DeviceError> {
        match (start.recorded_at.get(), end.recorded_at.get()) {
            (Some(s), Some(e)) => Ok(e.saturating_duration_since(s).as_secs_f32() * 1e3),
            _ => Err(DeviceError::Timing(format!(
                "events {} and {} must both be recorded",
                start.id, end.id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(emu: &HostEmulator, values: &[f32]) -> EmulatedBuffer {
        let stream = emu.create_stream().unwrap();
        let mut host = emu.alloc_pinned(values.len()).unwrap();
        host.copy_from_slice(values);
        let mut dev = emu.alloc_device(BufferLayout::f32(values.len())).unwrap();
        unsafe { emu.copy_to_device_async(&mut dev, &host, &stream).unwrap() };
        dev
    }

    #[test]
    fn grid_stride_covers_more_items_than_threads() {
        let emu = HostEmulator::default();
        let stream = emu.create_stream().unwrap();
        let a = filled(&emu, &[1.0; 10]);
        let b = filled(&emu, &[2.0; 10]);
        let d = filled(&emu, &[0.5; 10]);
        let mut c = emu.alloc_device(BufferLayout::f32(10)).unwrap();

        let cfg = LaunchConfig { grid: 1, block: 4 };
        unsafe { emu.launch_fused_op(cfg, &a, &b, &d, &mut c, 10, &stream).unwrap() };
        assert_eq!(c.data, vec![2.5; 10]);
    }

    #[test]
    fn out_of_bounds_write_is_an_illegal_address() {
        let emu = HostEmulator::default();
        let stream = emu.create_stream().unwrap();
        let a = filled(&emu, &[1.0; 8]);
        let b = filled(&emu, &[1.0; 8]);
        let d = filled(&emu, &[1.0; 8]);
        let mut c = emu.alloc_device(BufferLayout::f32(4)).unwrap();

        let err = unsafe {
            emu.launch_fused_op(LaunchConfig { grid: 2, block: 4 }, &a, &b, &d, &mut c, 8, &stream)
        }
        .unwrap_err();
        assert!(matches!(err, DeviceError::IllegalAddress { index: 4, len: 4 }));
    }

    #[test]
    fn reading_unwritten_device_memory_is_rejected() {
        let emu = HostEmulator::default();
        let stream = emu.create_stream().unwrap();
        let c = emu.alloc_device(BufferLayout::f32(3)).unwrap();
        let mut out = emu.alloc_pinned(3).unwrap();
        let err = unsafe { emu.copy_to_host_async(&mut out, &c, &stream) }.unwrap_err();
        assert!(matches!(err, DeviceError::UninitializedRead { .. }));
    }

    #[test]
    fn memory_limit_and_ledger() {
        let emu = HostEmulator::new(EmulatorOptions {
            memory_limit: Some(64),
            ..Default::default()
        });
        let first = emu.alloc_device(BufferLayout::f32(8)).unwrap();
        assert_eq!(emu.live_device_bytes(), 32);
        let second = emu.alloc_device(BufferLayout::f32(8)).unwrap();
        assert!(matches!(
            emu.alloc_device(BufferLayout::f32(1)),
            Err(DeviceError::OutOfMemory { required: 4, free: 0, .. })
        ));
        drop(first);
        drop(second);
        assert_eq!(emu.live_device_bytes(), 0);
        assert_eq!(emu.live_device_buffers(), 0);
        assert_eq!(emu.peak_device_bytes(), 64);
    }

    #[test]
    fn pinned_buffers_are_page_aligned() {
        let emu = HostEmulator::default();
        for len in [1usize, 4, 1000, 4097] {
            let mut buf = emu.alloc_pinned(len).unwrap();
            assert_eq!(buf.len(), len);
            assert_eq!(buf.as_ptr() as usize % PAGE_ALIGN, 0);
            assert!(buf.iter().all(|&v| v == 0.0));
            buf[len - 1] = 3.0;
            assert_eq!(buf[len - 1], 3.0);
        }
    }

    #[test]
    fn block_limit_comes_from_options() {
        let emu = HostEmulator::new(EmulatorOptions {
            max_threads_per_block: 64,
            ..Default::default()
        });
        assert_eq!(emu.max_threads_per_block(), 64);
        let stream = emu.create_stream().unwrap();
        let a = filled(&emu, &[1.0; 8]);
        let b = filled(&emu, &[1.0; 8]);
        let d = filled(&emu, &[1.0; 8]);
        let mut c = emu.alloc_device(BufferLayout::f32(8)).unwrap();
        let err = unsafe {
            emu.launch_fused_op(LaunchConfig { grid: 1, block: 128 }, &a, &b, &d, &mut c, 8, &stream)
        }
        .unwrap_err();
        assert!(matches!(
            err,
            DeviceError::LaunchConfigTooLarge { block: 128, max_threads: 64, .. }
        ));
    }

    #[test]
    fn frozen_clock_gives_zero_elapsed() {
        let emu = HostEmulator::new(EmulatorOptions {
            frozen_clock: true,
            ..Default::default()
        });
        let stream = emu.create_stream().unwrap();
        let (start, end) = (emu.create_event().unwrap(), emu.create_event().unwrap());
        emu.record_event(&start, &stream).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        emu.record_event(&end, &stream).unwrap();
        assert_eq!(emu.elapsed_ms(&start, &end).unwrap(), 0.0);
    }

    #[test]
    fn unrecorded_event_cannot_be_timed() {
        let emu = HostEmulator::default();
        let (start, end) = (emu.create_event().unwrap(), emu.create_event().unwrap());
        assert!(matches!(emu.elapsed_ms(&start, &end), Err(DeviceError::Timing(_))));
        assert!(emu.synchronize_event(&end).is_err());
    }
}
