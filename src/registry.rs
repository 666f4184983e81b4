//! Local object registry consulted by the responder.
//!
//! The responder only needs one question answered: "do I serve this
//! identity, and under which reference?". That is the [`ObjectResolver`]
//! trait. [`LocalRegistry`] is a ready-made thread-safe table; any
//! `Fn(&ObjectIdentity) -> Option<Reference>` closure works as well.
//!
//! # Example
//!
//! ```
//! use multicast_lookup::registry::{LocalRegistry, ObjectResolver};
//! use multicast_lookup::{ObjectIdentity, Reference};
//!
//! let registry = LocalRegistry::new();
//! registry.register("printer-1", "printer-1:tcp -h 10.0.0.3 -p 9000");
//!
//! let found = registry.resolve(&ObjectIdentity::from("printer-1"));
//! assert_eq!(found, Some(Reference::from("printer-1:tcp -h 10.0.0.3 -p 9000")));
//! assert!(registry.resolve(&ObjectIdentity::from("printer-99")).is_none());
//! ```

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::types::{ObjectIdentity, Reference};

/// Resolve an identity to the reference of a locally served object.
///
/// Called on the responder's listener task for every request, so it must be
/// cheap and must not block.
pub trait ObjectResolver: Send + Sync + 'static {
    /// `None` means "not served here"; the responder then stays silent.
    fn resolve(&self, identity: &ObjectIdentity) -> Option<Reference>;
}

impl<F> ObjectResolver for F
where
    F: Fn(&ObjectIdentity) -> Option<Reference> + Send + Sync + 'static,
{
    fn resolve(&self, identity: &ObjectIdentity) -> Option<Reference> {
        self(identity)
    }
}

/// Thread-safe identity → reference table.
#[derive(Debug, Default)]
pub struct LocalRegistry {
    objects: RwLock<HashMap<ObjectIdentity, Reference>>,
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `identity` under `reference`, replacing any previous entry.
    ///
    /// Returns the reference that was replaced, if any.
    pub fn register(
        &self,
        identity: impl Into<ObjectIdentity>,
        reference: impl Into<Reference>,
    ) -> Option<Reference> {
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identity.into(), reference.into())
    }

    /// Stop serving `identity`.
    pub fn unregister(&self, identity: &ObjectIdentity) -> Option<Reference> {
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identity)
    }

    pub fn contains(&self, identity: &ObjectIdentity) -> bool {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ObjectResolver for LocalRegistry {
    fn resolve(&self, identity: &ObjectIdentity) -> Option<Reference> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()
    }
}
