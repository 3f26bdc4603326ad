//! Two-tier Object Identity Map: a small strong-ref map for short
//! transactions, promoted once to a large weak-ref map when the live set
//! grows past [`SMALL_MODE_LIMIT`]. There is no demotion.
//!
//! Rust has no transparent weak references the way a GC host does, so the
//! "large mode" here is `Rc`/`Weak`: callers keep objects alive by holding
//! their `Rc`, and once the last external `Rc` drops, the weak map's next
//! lookup or `compact()` call observes it as gone. This is the substitute
//! the spec's design notes call out explicitly for non-GC hosts.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::object::{ObjectMetadata, ObjectRef};
use crate::oid::Oid;

/// Entries beyond this count force promotion to large (weak-ref) mode.
pub const SMALL_MODE_LIMIT: usize = 30;

/// Identifies an object by its `Rc` allocation's address, used as the
/// `object -> metadata` map key since `dyn Any` isn't otherwise hashable and
/// the spec requires reference-equality identity, not value equality.
type ObjectKey = usize;

fn object_key(object: &ObjectRef) -> ObjectKey {
    Rc::as_ptr(object) as *const () as usize
}

enum Mode {
    Small {
        by_oid: HashMap<Oid, ObjectRef>,
        by_object: HashMap<ObjectKey, (ObjectRef, ObjectMetadata)>,
    },
    Large {
        by_oid: HashMap<Oid, Weak<RefCell<dyn Any>>>,
        by_object: HashMap<ObjectKey, (Weak<RefCell<dyn Any>>, ObjectMetadata)>,
    },
}

/// The identity map proper. One instance per transaction.
pub struct IdentityMap {
    mode: Mode,
}

impl IdentityMap {
    #[must_use]
    pub fn new() -> Self {
        Self {
            mode: Mode::Small {
                by_oid: HashMap::new(),
                by_object: HashMap::new(),
            },
        }
    }

    #[must_use]
    pub fn is_large_mode(&self) -> bool {
        matches!(self.mode, Mode::Large { .. })
    }

    pub fn get_by_oid(&mut self, oid: Oid) -> Option<ObjectRef> {
        match &mut self.mode {
            Mode::Small { by_oid, .. } => by_oid.get(&oid).cloned(),
            Mode::Large { by_oid, .. } => {
                let object = by_oid.get(&oid)?.upgrade();
                if object.is_none() {
                    by_oid.remove(&oid);
                }
                object
            }
        }
    }

    pub fn get_metadata(&mut self, object: &ObjectRef) -> Option<ObjectMetadata> {
        let key = object_key(object);
        match &mut self.mode {
            Mode::Small { by_object, .. } => by_object.get(&key).map(|(_, m)| *m),
            Mode::Large { by_object, .. } => by_object.get(&key).map(|(_, m)| *m),
        }
    }

    pub fn set_metadata(&mut self, object: &ObjectRef, metadata: ObjectMetadata) {
        let key = object_key(object);
        match &mut self.mode {
            Mode::Small { by_object, .. } => {
                if let Some(entry) = by_object.get_mut(&key) {
                    entry.1 = metadata;
                }
            }
            Mode::Large { by_object, .. } => {
                if let Some(entry) = by_object.get_mut(&key) {
                    entry.1 = metadata;
                }
            }
        }
    }

    /// Binds both directions for a newly-seen object. Promotes to large
    /// mode if this insertion is the 31st live entry.
    pub fn insert(&mut self, oid: Oid, object: ObjectRef, metadata: ObjectMetadata) {
        let key = object_key(&object);
        match &mut self.mode {
            Mode::Small { by_oid, by_object } => {
                by_oid.insert(oid, object.clone());
                by_object.insert(key, (object, metadata));
                if by_object.len() > SMALL_MODE_LIMIT {
                    self.promote();
                }
            }
            Mode::Large { by_oid, by_object } => {
                by_oid.insert(oid, Rc::downgrade(&object));
                by_object.insert(key, (Rc::downgrade(&object), metadata));
            }
        }
    }

    /// Inserts a metadata-only stub for an object the caller never stored
    /// (the `Delete(unknown object)` case). Kept in whichever mode is
    /// currently active; large mode keeps it as a dead weak entry, which is
    /// harmless since lookups treat a dead weak entry as absent but the
    /// stub's purpose (suppressing a later `Store`) is served entirely by
    /// this call having happened, not by the entry persisting.
    pub fn insert_deleted_stub(&mut self, object: &ObjectRef) {
        let key = object_key(object);
        let metadata = ObjectMetadata::deleted_stub();
        match &mut self.mode {
            Mode::Small { by_object, .. } => {
                by_object.insert(key, (object.clone(), metadata));
            }
            Mode::Large { by_object, .. } => {
                by_object.insert(key, (Rc::downgrade(object), metadata));
            }
        }
    }

    /// Removes an object from both directions (used by `Delete`).
    pub fn remove(&mut self, oid: Oid, object: &ObjectRef) {
        let key = object_key(object);
        match &mut self.mode {
            Mode::Small { by_oid, by_object } => {
                by_oid.remove(&oid);
                by_object.remove(&key);
            }
            Mode::Large { by_oid, by_object } => {
                by_oid.remove(&oid);
                by_object.remove(&key);
            }
        }
    }

    fn promote(&mut self) {
        let Mode::Small { by_oid, by_object } = &self.mode else {
            return;
        };
        let new_by_oid = by_oid.iter().map(|(oid, obj)| (*oid, Rc::downgrade(obj))).collect();
        let new_by_object = by_object
            .iter()
            .map(|(key, (obj, meta))| (*key, (Rc::downgrade(obj), *meta)))
            .collect();
        self.mode = Mode::Large {
            by_oid: new_by_oid,
            by_object: new_by_object,
        };
    }

    /// Opportunistic cleanup of dead weak entries in large mode. A no-op in
    /// small mode. Never required for correctness — `get_by_oid` already
    /// treats a dead weak entry as absent and prunes it lazily.
    pub fn compact(&mut self) {
        if let Mode::Large { by_oid, by_object } = &mut self.mode {
            by_oid.retain(|_, weak| weak.strong_count() > 0);
            by_object.retain(|_, (weak, _)| weak.strong_count() > 0);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match &self.mode {
            Mode::Small { by_object, .. } => by_object.len(),
            Mode::Large { by_object, .. } => by_object.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for IdentityMap {
    fn default() -> Self {
        Self::new()
    }
}
