use std::time::Instant;

use tracing::info;

/// Host capability check run before tracking starts.
pub trait PermissionGate: Send + Sync {
    fn request_location(&self) -> bool;
}

/// A fixed answer, for hosts where permission is decided by configuration.
#[derive(Debug, Clone, Copy)]
pub struct StaticPermission(pub bool);

impl PermissionGate for StaticPermission {
    fn request_location(&self) -> bool {
        self.0
    }
}

/// Keeps the host awake while a trip is active. Released on drop.
#[derive(Debug)]
pub struct ForegroundGuard {
    acquired_at: Instant,
}

impl ForegroundGuard {
    pub fn acquire() -> Self {
        info!("Foreground tracking started");
        Self {
            acquired_at: Instant::now(),
        }
    }
}

impl Drop for ForegroundGuard {
    fn drop(&mut self) {
        info!(
            "Foreground tracking released after {}s",
            self.acquired_at.elapsed().as_secs()
        );
    }
}
