use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{MediaPlatform, PlatformError};

#[derive(Default)]
struct Usage {
    leases: usize,
    running: bool,
}

struct Shared {
    platform: Arc<dyn MediaPlatform>,
    usage: Mutex<Usage>,
}

impl Shared {
    fn usage(&self) -> MutexGuard<'_, Usage> {
        self.usage.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Process-wide handle on the media platform. The platform is started by the first lease
/// and shut down when the last lease is dropped.
#[derive(Clone)]
pub struct PlatformContext {
    shared: Arc<Shared>,
}

impl PlatformContext {
    pub fn new(platform: Arc<dyn MediaPlatform>) -> Self {
        Self {
            shared: Arc::new(Shared {
                platform,
                usage: Mutex::new(Usage::default()),
            }),
        }
    }

    pub fn acquire(&self) -> Result<PlatformLease, PlatformError> {
        let mut usage = self.shared.usage();
        if !usage.running {
            self.shared.platform.startup()?;
            usage.running = true;
            log::info!("Media platform started");
        }
        usage.leases += 1;
        Ok(PlatformLease {
            shared: self.shared.clone(),
        })
    }

    pub fn live_leases(&self) -> usize {
        self.shared.usage().leases
    }

    pub fn is_running(&self) -> bool {
        self.shared.usage().running
    }

    /// Tear the platform down now, even with players alive. The next lease restarts it.
    pub fn force_shutdown(&self) {
        let mut usage = self.shared.usage();
        if usage.running {
            log::warn!(
                "Forcing media platform shutdown with {} live players",
                usage.leases
            );
            self.shared.platform.shutdown();
            usage.running = false;
        }
    }
}

/// Keeps the platform running while held.
pub struct PlatformLease {
    shared: Arc<Shared>,
}

impl PlatformLease {
    pub fn platform(&self) -> &Arc<dyn MediaPlatform> {
        &self.shared.platform
    }
}

impl Drop for PlatformLease {
    fn drop(&mut self) {
        let mut usage = self.shared.usage();
        usage.leases = usage.leases.saturating_sub(1);
        if usage.leases == 0 && usage.running {
            self.shared.platform.shutdown();
            usage.running = false;
            log::info!("Media platform shut down");
        }
    }
}
