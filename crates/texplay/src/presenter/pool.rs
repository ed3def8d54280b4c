use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;

use crate::surface::FrameTarget;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("frame buffer pool is not initialized")]
    NotInitialized,
    #[error("frame buffer pool is already initialized")]
    AlreadyInitialized,
    #[error("no free frame buffers")]
    Empty,
}

/// One decode target. Not `Clone`: it is owned by exactly one of the pool, the decoder
/// or the presenter's schedule at any time.
pub struct FrameBuffer {
    id: u32,
    generation: u32,
    pts: Option<Duration>,
    target: Box<dyn FrameTarget>,
}

impl FrameBuffer {
    pub fn new(id: u32, generation: u32, target: Box<dyn FrameTarget>) -> Self {
        Self {
            id,
            generation,
            pts: None,
            target,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn pts(&self) -> Option<Duration> {
        self.pts
    }

    pub fn set_pts(&mut self, pts: Duration) {
        self.pts = Some(pts);
    }

    pub fn target(&self) -> &dyn FrameTarget {
        self.target.as_ref()
    }

    pub fn target_mut(&mut self) -> &mut dyn FrameTarget {
        self.target.as_mut()
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("pts", &self.pts)
            .field("size", &self.target.size())
            .finish()
    }
}

#[derive(Default)]
struct PoolInner {
    initialized: bool,
    generation: u32,
    free: VecDeque<FrameBuffer>,
    outstanding: usize,
}

/// Fixed set of decode targets recycled between the decoder and the presenter.
/// Acquire takes from the front, release appends to the back.
#[derive(Default)]
pub struct FrameBufferPool {
    inner: Mutex<PoolInner>,
}

impl FrameBufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Generation that buffers handed to [`initialize`](Self::initialize) must carry.
    pub fn generation(&self) -> u32 {
        self.inner().generation
    }

    pub fn initialize(&self, buffers: Vec<FrameBuffer>) -> Result<(), PoolError> {
        let mut inner = self.inner();
        if inner.initialized {
            return Err(PoolError::AlreadyInitialized);
        }
        let generation = inner.generation;
        inner.free = buffers
            .into_iter()
            .filter(|b| b.generation == generation)
            .collect();
        inner.outstanding = 0;
        inner.initialized = true;
        log::debug!(
            "Frame buffer pool initialized with {} buffers (generation {})",
            inner.free.len(),
            generation
        );
        Ok(())
    }

    pub fn acquire(&self) -> Result<FrameBuffer, PoolError> {
        let mut inner = self.inner();
        if !inner.initialized {
            return Err(PoolError::NotInitialized);
        }
        let buffer = inner.free.pop_front().ok_or(PoolError::Empty)?;
        inner.outstanding += 1;
        Ok(buffer)
    }

    /// Return a buffer. Buffers from an earlier generation are dropped instead of
    /// re-entering the pool.
    pub fn release(&self, mut buffer: FrameBuffer) -> Result<(), PoolError> {
        let mut inner = self.inner();
        if !inner.initialized {
            return Err(PoolError::NotInitialized);
        }
        if buffer.generation != inner.generation {
            log::trace!(
                "Discarding frame buffer {} from stale generation {}",
                buffer.id,
                buffer.generation
            );
            return Ok(());
        }
        buffer.pts = None;
        inner.outstanding = inner.outstanding.saturating_sub(1);
        inner.free.push_back(buffer);
        Ok(())
    }

    pub fn has_outstanding(&self) -> bool {
        self.inner().outstanding > 0
    }

    pub fn outstanding(&self) -> usize {
        self.inner().outstanding
    }

    pub fn available(&self) -> usize {
        self.inner().free.len()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner().initialized
    }

    /// Drop all free buffers and start a new generation. Buffers still out are discarded
    /// when they come back.
    pub fn clear(&self) {
        let mut inner = self.inner();
        inner.free.clear();
        inner.outstanding = 0;
        inner.initialized = false;
        inner.generation = inner.generation.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::SurfaceDevice;
    use crate::surface::host::HostSurfaceDevice;

    fn buffers(pool: &FrameBufferPool, n: u32) -> Vec<FrameBuffer> {
        let device = HostSurfaceDevice::new();
        (0..n)
            .map(|id| FrameBuffer::new(id, pool.generation(), device.create_target(2, 2).unwrap()))
            .collect()
    }

    #[test]
    fn acquire_before_initialize_fails() {
        let pool = FrameBufferPool::new();
        assert_eq!(pool.acquire().unwrap_err(), PoolError::NotInitialized);
        assert!(!pool.has_outstanding());
    }

    #[test]
    fn empty_pool_leaves_outstanding_unchanged() {
        let pool = FrameBufferPool::new();
        pool.initialize(buffers(&pool, 1)).unwrap();
        let held = pool.acquire().unwrap();
        assert_eq!(pool.outstanding(), 1);
        assert_eq!(pool.acquire().unwrap_err(), PoolError::Empty);
        assert_eq!(pool.outstanding(), 1);
        pool.release(held).unwrap();
    }

    #[test]
    fn release_restores_outstanding() {
        let pool = FrameBufferPool::new();
        pool.initialize(buffers(&pool, 3)).unwrap();
        assert!(!pool.has_outstanding());
        let a = pool.acquire().unwrap();
        assert!(pool.has_outstanding());
        pool.release(a).unwrap();
        assert!(!pool.has_outstanding());
    }

    #[test]
    fn buffers_cycle_through_the_queue() {
        let pool = FrameBufferPool::new();
        pool.initialize(buffers(&pool, 3)).unwrap();
        let first = pool.acquire().unwrap();
        assert_eq!(first.id(), 0);
        pool.release(first).unwrap();
        // the released buffer went to the back
        let ids: Vec<u32> = (0..3).map(|_| pool.acquire().unwrap().id()).collect();
        assert_eq!(ids, vec![1, 2, 0]);
    }

    #[test]
    fn double_initialize_rejected() {
        let pool = FrameBufferPool::new();
        pool.initialize(buffers(&pool, 2)).unwrap();
        assert_eq!(
            pool.initialize(buffers(&pool, 2)),
            Err(PoolError::AlreadyInitialized)
        );
    }

    #[test]
    fn clear_uninitializes_and_discards_stale_buffers() {
        let pool = FrameBufferPool::new();
        pool.initialize(buffers(&pool, 2)).unwrap();
        let stale = pool.acquire().unwrap();
        pool.clear();
        assert_eq!(pool.acquire().unwrap_err(), PoolError::NotInitialized);
        let orphan = FrameBuffer::new(9, 0, HostSurfaceDevice::new().create_target(2, 2).unwrap());
        assert_eq!(pool.release(orphan), Err(PoolError::NotInitialized));

        pool.initialize(buffers(&pool, 2)).unwrap();
        pool.release(stale).unwrap();
        assert_eq!(pool.available(), 2);
        assert!(!pool.has_outstanding());
    }
}
