use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

/// Process-wide version counter shared by every snapshot type.
static VERSION: AtomicU64 = AtomicU64::new(0);

/// Returns the next version number. Versions start at 1 and never repeat.
pub fn next_version() -> u64 {
    VERSION.fetch_add(1, Ordering::SeqCst) + 1
}

/// An immutable property snapshot tagged with the version it was published at.
#[derive(Debug)]
pub struct VersionedProperty<P> {
    pub property: Arc<P>,
    pub version: u64,
    pub last_update: SystemTime,
}

impl<P> VersionedProperty<P> {
    pub fn new(property: P) -> Self {
        Self::from_arc(Arc::new(property))
    }

    pub fn from_arc(property: Arc<P>) -> Self {
        Self {
            property,
            version: next_version(),
            last_update: SystemTime::now(),
        }
    }
}

impl<P> Clone for VersionedProperty<P> {
    fn clone(&self) -> Self {
        Self {
            property: Arc::clone(&self.property),
            version: self.version,
            last_update: self.last_update,
        }
    }
}

impl<P> Deref for VersionedProperty<P> {
    type Target = P;

    fn deref(&self) -> &P {
        &self.property
    }
}
