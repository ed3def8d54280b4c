//! Custom video presenter: owns the frame buffer pool, keeps decoded frames ordered by
//! presentation time and writes the due frame onto the shared surface.

pub mod pool;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use pool::{FrameBuffer, FrameBufferPool, PoolError};

use crate::surface::{PresentedFrame, SharedSurfaceGateway, SurfaceError};

#[derive(Default)]
struct Schedule {
    /// Ascending by pts.
    frames: VecDeque<FrameBuffer>,
    format: Option<(u32, u32)>,
    reverse: bool,
}

pub struct Presenter {
    id: u32,
    depth: usize,
    pool: FrameBufferPool,
    gateway: Arc<SharedSurfaceGateway>,
    schedule: Mutex<Schedule>,
    retire_pending: AtomicBool,
    presented: AtomicU64,
    dropped: AtomicU64,
}

impl Presenter {
    pub fn new(id: u32, gateway: Arc<SharedSurfaceGateway>, depth: usize) -> Self {
        Self {
            id,
            depth: depth.max(1),
            pool: FrameBufferPool::new(),
            gateway,
            schedule: Mutex::new(Schedule::default()),
            retire_pending: AtomicBool::new(false),
            presented: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    fn schedule(&self) -> MutexGuard<'_, Schedule> {
        self.schedule.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn gateway(&self) -> &Arc<SharedSurfaceGateway> {
        &self.gateway
    }

    pub fn format(&self) -> Option<(u32, u32)> {
        self.schedule().format
    }

    /// Called when the decoder announces its output size. Reallocates the pool when the
    /// size changed; buffers still in flight belong to the old generation.
    pub fn set_media_format(&self, width: u32, height: u32) -> Result<(), SurfaceError> {
        if self.format() == Some((width, height)) && self.pool.is_initialized() {
            return Ok(());
        }
        self.flush();
        self.pool.clear();
        let generation = self.pool.generation();
        let device = self.gateway.device();
        let buffers = (0..self.depth as u32)
            .map(|id| {
                device
                    .create_target(width, height)
                    .map(|target| FrameBuffer::new(id, generation, target))
            })
            .collect::<Result<Vec<_>, _>>()?;
        // the pool was cleared above, so this cannot be a double initialize
        if let Err(e) = self.pool.initialize(buffers) {
            log::warn!("Presenter {}: {e}", self.id);
        }
        self.retire_pending.store(false, Ordering::SeqCst);
        self.schedule().format = Some((width, height));
        log::debug!(
            "Presenter {} format {}x{} with {} buffers",
            self.id,
            width,
            height,
            self.depth
        );
        Ok(())
    }

    /// Hand a free decode target to the decoder.
    pub fn acquire_target(&self) -> Result<FrameBuffer, PoolError> {
        self.pool.acquire()
    }

    /// Queue a decoded frame for presentation at `pts`.
    pub fn schedule_frame(&self, mut buffer: FrameBuffer, pts: Duration) {
        buffer.set_pts(pts);
        let mut schedule = self.schedule();
        let at = schedule
            .frames
            .partition_point(|f| f.pts().unwrap_or_default() <= pts);
        schedule.frames.insert(at, buffer);
    }

    /// The clock's rate changed. A direction change makes the queued frames useless.
    pub fn on_clock_rate(&self, speed: f32) {
        let reverse = speed < 0.0;
        let changed = {
            let mut schedule = self.schedule();
            let changed = schedule.reverse != reverse;
            schedule.reverse = reverse;
            changed
        };
        if changed {
            self.flush();
        }
    }

    /// Present the latest frame whose time has come and recycle every older one.
    pub fn present_due(&self, now: Duration) -> Option<PresentedFrame> {
        let mut due = {
            let mut schedule = self.schedule();
            let mut due = Vec::new();
            if schedule.reverse {
                while schedule
                    .frames
                    .back()
                    .is_some_and(|f| f.pts().unwrap_or_default() >= now)
                {
                    due.extend(schedule.frames.pop_back());
                }
            } else {
                while schedule
                    .frames
                    .front()
                    .is_some_and(|f| f.pts().unwrap_or_default() <= now)
                {
                    due.extend(schedule.frames.pop_front());
                }
            }
            due
        };
        let winner = due.pop()?;
        self.dropped.fetch_add(due.len() as u64, Ordering::Relaxed);
        for late in due {
            self.recycle(late);
        }

        let presented = {
            let guard = self.gateway.lock();
            guard.present(&winner)
        };
        self.recycle(winner);
        match presented {
            Ok(frame) => {
                self.presented.fetch_add(1, Ordering::Relaxed);
                Some(frame)
            }
            Err(e) => {
                log::trace!("Presenter {} dropped frame: {e}", self.id);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Return every queued frame to the pool.
    pub fn flush(&self) {
        let frames: Vec<FrameBuffer> = self.schedule().frames.drain(..).collect();
        if !frames.is_empty() {
            log::trace!("Presenter {} flushed {} frames", self.id, frames.len());
        }
        for frame in frames {
            self.recycle(frame);
        }
    }

    fn recycle(&self, buffer: FrameBuffer) {
        if let Err(e) = self.pool.release(buffer) {
            log::trace!("Presenter {} could not recycle buffer: {e}", self.id);
        }
        if self.retire_pending.load(Ordering::SeqCst) && !self.pool.has_outstanding() {
            self.retire_pending.store(false, Ordering::SeqCst);
            self.pool.clear();
            log::debug!("Presenter {} released its buffers", self.id);
        }
    }

    /// Drop the pool. If the decoder still holds buffers the pool is cleared once the last
    /// one comes back.
    pub fn release_resources(&self) {
        self.flush();
        if self.pool.has_outstanding() {
            self.retire_pending.store(true, Ordering::SeqCst);
        } else {
            self.pool.clear();
        }
        self.schedule().format = None;
    }

    pub fn pending_frames(&self) -> usize {
        self.schedule().frames.len()
    }

    pub fn has_outstanding(&self) -> bool {
        self.pool.has_outstanding()
    }

    pub fn free_buffers(&self) -> usize {
        self.pool.available()
    }

    pub fn presented_count(&self) -> u64 {
        self.presented.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Presenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Presenter")
            .field("id", &self.id)
            .field("depth", &self.depth)
            .field("pending", &self.pending_frames())
            .finish()
    }
}
