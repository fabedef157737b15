//! Broadcast -- read-only replication of a small value to every partition.
//! A handle is created once and only read afterwards. When the value changes (e.g., each EM iteration),
//! create a new handle by calling [broadcast] again.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static BROADCAST_ID: AtomicU64 = AtomicU64::new(0);

/// Immutable handle to a replicated value. Cloning a handle does not copy the value.
#[derive(Debug)]
pub struct Broadcast<T> {
    id: u64,
    value: Arc<T>,
}

impl<T> Clone for Broadcast<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            value: Arc::clone(&self.value),
        }
    }
}

impl<T> Broadcast<T> {
    pub fn id(&self) -> u64 {
        self.id
    }
    pub fn value(&self) -> &T {
        &self.value
    }
}

pub fn broadcast<T>(value: T) -> Broadcast<T> {
    let id = BROADCAST_ID.fetch_add(1, Ordering::Relaxed);
    trace!("BROADCAST\t{}", id);
    Broadcast {
        id,
        value: Arc::new(value),
    }
}
