//! Microphone permission gate.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};

/// Platform permission subsystem.
#[async_trait]
pub trait PermissionGate: Send + Sync {
    /// Ask for microphone access. Returns whether it was granted.
    async fn request_microphone_permission(&self) -> bool;
}

/// A gate with a fixed, switchable answer, for platforms without a prompt
/// (desktop, tests).
#[derive(Debug)]
pub struct StaticPermissionGate {
    granted: AtomicBool,
}

impl StaticPermissionGate {
    pub fn new(granted: bool) -> Self {
        Self {
            granted: AtomicBool::new(granted),
        }
    }

    pub fn set_granted(&self, granted: bool) {
        self.granted.store(granted, Ordering::SeqCst);
    }
}

impl Default for StaticPermissionGate {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl PermissionGate for StaticPermissionGate {
    async fn request_microphone_permission(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }
}
