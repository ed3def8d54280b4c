//! Shared surface gateway: the one GPU surface that the presenter writes decoded frames
//! into and the renderer samples from, plus the lock that keeps the two apart.

pub mod host;
pub mod wgpu_backend;

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use thiserror::Error;

use crate::presenter::pool::FrameBuffer;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SurfaceError {
    #[error("no shared surface has been created")]
    NoSurface,
    #[error("invalid surface size {0}x{1}")]
    InvalidSize(u32, u32),
    #[error("frame is {frame:?} but the shared surface is {surface:?}")]
    SizeMismatch {
        frame: (u32, u32),
        surface: (u32, u32),
    },
    #[error("frame data is {actual} bytes, expected {expected}")]
    DataLength { expected: usize, actual: usize },
    #[error("frame target belongs to a different surface device")]
    ForeignTarget,
    #[error("surface device error: {0}")]
    Device(String),
}

/// Renderer-side name for the shared surface (a texture id in the renderer's namespace).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExternalTexture(pub u64);

/// A decode target: the memory a decoder writes one frame into.
pub trait FrameTarget: Send + Sync {
    fn size(&self) -> (u32, u32);
    /// Upload a tightly packed RGBA8 frame.
    fn write_rgba(&mut self, data: &[u8]) -> Result<(), SurfaceError>;
    fn as_any(&self) -> &dyn Any;
}

/// Backing store of the shared surface.
pub trait SurfaceStore: Send {
    fn size(&self) -> (u32, u32);
    fn external(&self) -> ExternalTexture;
    /// Copy a decoded frame into the surface. Both live on the same device.
    fn copy_from(&mut self, frame: &dyn FrameTarget) -> Result<(), SurfaceError>;
    fn as_any(&self) -> &dyn Any;
}

/// Allocates decode targets and shared surfaces on one device.
pub trait SurfaceDevice: Send + Sync {
    fn create_target(&self, width: u32, height: u32) -> Result<Box<dyn FrameTarget>, SurfaceError>;
    fn create_surface(
        &self,
        width: u32,
        height: u32,
        external: ExternalTexture,
    ) -> Result<Box<dyn SurfaceStore>, SurfaceError>;
    fn name(&self) -> &str;
}

/// The frame currently shown on the shared surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentedFrame {
    pub buffer_id: u32,
    pub pts: Duration,
}

#[derive(Debug, Default)]
struct LockState {
    owner: Option<ThreadId>,
    depth: usize,
}

/// Exclusive-access token that the owning thread may re-enter.
#[derive(Debug, Default)]
pub struct SurfaceLock {
    state: Mutex<LockState>,
    released: Condvar,
}

impl SurfaceLock {
    /// Blocks until the calling thread owns the lock. Returns true on first entry.
    fn enter(&self) -> bool {
        let me = thread::current().id();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.depth = 1;
                    return true;
                }
                Some(owner) if owner == me => {
                    state.depth += 1;
                    return false;
                }
                Some(_) => {
                    state = self
                        .released
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    /// Returns true when the last nested entry has been left.
    fn leave(&self) -> bool {
        let me = thread::current().id();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.owner != Some(me) {
            log::error!("Surface lock released by a thread that does not hold it");
            return false;
        }
        state.depth -= 1;
        if state.depth > 0 {
            return false;
        }
        state.owner = None;
        drop(state);
        self.released.notify_one();
        true
    }

    pub fn is_held(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .owner
            .is_some()
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .owner
            == Some(thread::current().id())
    }
}

struct SurfaceSlot {
    store: Option<Box<dyn SurfaceStore>>,
    current: Option<PresentedFrame>,
}

/// Owns the shared surface and serializes every access to it.
pub struct SharedSurfaceGateway {
    device: Arc<dyn SurfaceDevice>,
    lock: SurfaceLock,
    slot: Mutex<SurfaceSlot>,
    holders: AtomicUsize,
    peak_holders: AtomicUsize,
}

impl SharedSurfaceGateway {
    pub fn new(device: Arc<dyn SurfaceDevice>) -> Self {
        Self {
            device,
            lock: SurfaceLock::default(),
            slot: Mutex::new(SurfaceSlot {
                store: None,
                current: None,
            }),
            holders: AtomicUsize::new(0),
            peak_holders: AtomicUsize::new(0),
        }
    }

    pub fn device(&self) -> &Arc<dyn SurfaceDevice> {
        &self.device
    }

    /// Scoped exclusive access. Released when the guard drops.
    pub fn lock(&self) -> SurfaceGuard<'_> {
        self.lock_unscoped();
        SurfaceGuard { gateway: self }
    }

    /// Exclusive access that outlives a scope (bind on one call, unbind on a later one).
    /// Every call must be paired with [`unlock`](Self::unlock) on the same thread.
    pub fn lock_unscoped(&self) {
        if self.lock.enter() {
            let holders = self.holders.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_holders.fetch_max(holders, Ordering::SeqCst);
        }
    }

    pub fn unlock(&self) {
        // the holder count must drop before another thread can get in
        let me = thread::current().id();
        let last = {
            let state = self.lock.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.owner == Some(me) && state.depth == 1
        };
        if last {
            self.holders.fetch_sub(1, Ordering::SeqCst);
        }
        self.lock.leave();
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_held()
    }

    pub fn is_locked_by_current_thread(&self) -> bool {
        self.lock.is_held_by_current_thread()
    }

    /// Highest number of threads ever holding the lock at once.
    pub fn peak_holders(&self) -> usize {
        self.peak_holders.load(Ordering::SeqCst)
    }

    /// Create the surface, or destroy and recreate it when the size or alias changed.
    /// Returns whether a new surface was made.
    pub fn create_or_resize(
        &self,
        width: u32,
        height: u32,
        external: ExternalTexture,
    ) -> Result<bool, SurfaceError> {
        if width == 0 || height == 0 {
            return Err(SurfaceError::InvalidSize(width, height));
        }
        let guard = self.lock();
        let mut slot = guard.slot();
        if let Some(store) = &slot.store {
            if store.size() == (width, height) && store.external() == external {
                return Ok(false);
            }
            log::debug!(
                "Recreating shared surface {:?} -> {}x{}",
                store.size(),
                width,
                height
            );
        }
        slot.store = None;
        slot.current = None;
        slot.store = Some(self.device.create_surface(width, height, external)?);
        log::info!(
            "Shared surface {}x{} created on {}",
            width,
            height,
            self.device.name()
        );
        Ok(true)
    }

    pub fn release(&self) {
        let guard = self.lock();
        let mut slot = guard.slot();
        if slot.store.take().is_some() {
            log::debug!("Shared surface released");
        }
        slot.current = None;
    }

    pub fn size(&self) -> Option<(u32, u32)> {
        self.read_slot(|slot| slot.store.as_ref().map(|s| s.size()))
    }

    pub fn external(&self) -> Option<ExternalTexture> {
        self.read_slot(|slot| slot.store.as_ref().map(|s| s.external()))
    }

    pub fn is_created(&self) -> bool {
        self.size().is_some()
    }

    pub fn current_frame(&self) -> Option<PresentedFrame> {
        self.read_slot(|slot| slot.current)
    }

    fn read_slot<R>(&self, f: impl FnOnce(&SurfaceSlot) -> R) -> R {
        f(&self.slot.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Proof of exclusive access to the shared surface.
pub struct SurfaceGuard<'a> {
    gateway: &'a SharedSurfaceGateway,
}

impl SurfaceGuard<'_> {
    fn slot(&self) -> MutexGuard<'_, SurfaceSlot> {
        self.gateway
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy a decoded frame onto the shared surface.
    pub fn present(&self, frame: &FrameBuffer) -> Result<PresentedFrame, SurfaceError> {
        let mut slot = self.slot();
        let store = slot.store.as_mut().ok_or(SurfaceError::NoSurface)?;
        let frame_size = frame.target().size();
        if frame_size != store.size() {
            return Err(SurfaceError::SizeMismatch {
                frame: frame_size,
                surface: store.size(),
            });
        }
        store.copy_from(frame.target())?;
        let presented = PresentedFrame {
            buffer_id: frame.id(),
            pts: frame.pts().unwrap_or_default(),
        };
        slot.current = Some(presented);
        Ok(presented)
    }

    pub fn size(&self) -> Option<(u32, u32)> {
        self.slot().store.as_ref().map(|s| s.size())
    }

    /// Run `f` against the backing store, e.g. to fetch a backend texture view.
    pub fn with_store<R>(&self, f: impl FnOnce(&dyn SurfaceStore) -> R) -> Option<R> {
        self.slot().store.as_deref().map(f)
    }
}

impl Drop for SurfaceGuard<'_> {
    fn drop(&mut self) {
        self.gateway.unlock();
    }
}
