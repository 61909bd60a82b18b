//! Transient audio blobs
//!
//! Inline audio is decoded once into a [`BlobHandle`]. The handle is owned by
//! the queue item it belongs to and unregisters itself when dropped, so the
//! registry's live count is an exact leak detector.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, Default)]
struct RegistryInner {
    next_id: u64,
    live: HashSet<u64>,
    allocated_total: u64,
}

/// Shared registry of live blobs
#[derive(Debug, Clone, Default)]
pub struct TransientAudioRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl TransientAudioRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of decoded bytes and register them
    pub fn allocate(&self, bytes: Vec<u8>) -> BlobHandle {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        inner.allocated_total += 1;
        let id = inner.next_id;
        inner.live.insert(id);
        log::trace!("Allocated audio blob #{} ({} bytes)", id, bytes.len());
        BlobHandle {
            id,
            bytes: Arc::from(bytes),
            registry: Arc::clone(&self.inner),
        }
    }

    /// Number of blobs not yet released
    pub fn live_count(&self) -> usize {
        self.inner.lock().live.len()
    }

    /// Number of blobs ever allocated
    pub fn allocated_total(&self) -> u64 {
        self.inner.lock().allocated_total
    }
}

/// Owned inline audio. Dropping it releases the registry entry.
pub struct BlobHandle {
    id: u64,
    bytes: Arc<[u8]>,
    registry: Arc<Mutex<RegistryInner>>,
}

impl BlobHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Shared view of the bytes for a device to decode from
    pub fn bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobHandle")
            .field("id", &self.id)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl Drop for BlobHandle {
    fn drop(&mut self) {
        if self.registry.lock().live.remove(&self.id) {
            log::trace!("Released audio blob #{}", self.id);
        }
    }
}
