use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::IngestError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub struct SessionKey(pub u64);

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Owns the current session key. Starting a session makes every older one
/// stale; stale sessions stop at their next [`Session::check`].
#[derive(Clone, Default)]
pub struct SessionManager {
    current: Arc<AtomicU64>,
    issued: Arc<AtomicU64>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// A key no earlier call has returned.
    pub fn next_key(&self) -> SessionKey {
        SessionKey(self.issued.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn begin(&self, key: SessionKey) -> Session {
        self.current.store(key.0, Ordering::SeqCst);
        Session {
            key,
            current: Arc::clone(&self.current),
        }
    }

    pub fn current(&self) -> SessionKey {
        SessionKey(self.current.load(Ordering::SeqCst))
    }
}

#[derive(Clone, Debug)]
pub struct Session {
    key: SessionKey,
    current: Arc<AtomicU64>,
}

impl Session {
    pub fn key(&self) -> SessionKey {
        self.key
    }

    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.key.0
    }

    pub fn check(&self) -> Result<(), IngestError> {
        if self.is_current() {
            Ok(())
        } else {
            Err(IngestError::Cancelled)
        }
    }
}
