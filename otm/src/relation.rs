//! Relation Chain: a per-transaction intrusive singly-linked list of
//! relation handles, promoted to a hash map once its length reaches
//! [`LINEAR_SEARCH_LIMIT`].

use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{CResult, Error};

/// Chain length at which the chain is rehashed into a map and abandoned.
pub const LINEAR_SEARCH_LIMIT: usize = 4;

/// Marker for types that may back a `GetRelation<T>()` handle. The original
/// host validates a covariant interface over a class item at the type's
/// registration; Rust's type system already pins the item type at compile
/// time, so `validate_shape` exists only for relation types that need an
/// additional runtime check (e.g. the related table must itself be
/// registered) — most implementors can rely on the default.
pub trait RelationKind: Any {
    fn validate_shape() -> bool
    where
        Self: Sized,
    {
        true
    }
}

/// Produces a fresh, boxed relation handle on demand.
pub type RelationFactory = Rc<dyn Fn() -> Rc<dyn Any>>;

struct FactoryEntry {
    name: &'static str,
    factory: RelationFactory,
}

/// Owner-level registry of relation factories, distinct from the
/// per-transaction [`RelationChain`]: this is where `GetRelation` falls back
/// to on a chain/hash-cache miss, either via an explicit prior
/// `InitRelation` call or by auto-registering `T` on first use.
pub struct RelationRegistry {
    factories: RefCell<HashMap<TypeId, FactoryEntry>>,
    by_name: RefCell<HashMap<&'static str, TypeId>>,
    allow_auto_register: Cell<bool>,
}

impl RelationRegistry {
    #[must_use]
    pub fn new(allow_auto_register: bool) -> Self {
        Self {
            factories: RefCell::new(HashMap::new()),
            by_name: RefCell::new(HashMap::new()),
            allow_auto_register: Cell::new(allow_auto_register),
        }
    }

    pub fn set_allow_auto_register(&self, allow: bool) {
        self.allow_auto_register.set(allow);
    }

    /// `InitRelation(name, interfaceType) -> factory`: explicit registration,
    /// independent of whether any transaction has called `GetRelation` yet.
    pub fn init_relation<T: RelationKind + Default + 'static>(
        &self,
        name: &'static str,
    ) -> CResult<RelationFactory> {
        if !T::validate_shape() {
            return Err(Error::RelationShapeInvalid(name));
        }
        let type_id = TypeId::of::<T>();
        let factory: RelationFactory = Rc::new(|| Rc::new(T::default()) as Rc<dyn Any>);
        self.factories.borrow_mut().insert(type_id, FactoryEntry { name, factory: factory.clone() });
        self.by_name.borrow_mut().insert(name, type_id);
        Ok(factory)
    }

    fn factory_for(&self, type_id: TypeId) -> Option<RelationFactory> {
        self.factories.borrow().get(&type_id).map(|entry| entry.factory.clone())
    }

    /// Every relation type name registered so far, either explicitly via
    /// `init_relation` or by auto-registration on first `GetRelation`.
    pub fn registered_names(&self) -> Vec<&'static str> {
        self.by_name.borrow().keys().copied().collect()
    }

    /// `GetRelation`'s factory-registry fallback: returns the factory
    /// registered by a prior `init_relation` call, or auto-registers `T` via
    /// `Default` if the owner allows it and `T`'s shape validates.
    pub fn resolve_or_auto_register<T: RelationKind + Default + 'static>(
        &self,
        type_name: &'static str,
    ) -> CResult<RelationFactory> {
        let type_id = TypeId::of::<T>();
        if let Some(factory) = self.factory_for(type_id) {
            return Ok(factory);
        }
        if !self.allow_auto_register.get() {
            return Err(Error::AutoRegistrationForbidden(type_name));
        }
        if !T::validate_shape() {
            return Err(Error::RelationShapeInvalid(type_name));
        }
        let factory: RelationFactory = Rc::new(|| Rc::new(T::default()) as Rc<dyn Any>);
        self.factories
            .borrow_mut()
            .insert(type_id, FactoryEntry { name: type_name, factory: factory.clone() });
        self.by_name.borrow_mut().insert(type_name, type_id);
        Ok(factory)
    }
}

struct Link {
    type_id: TypeId,
    relation: Rc<dyn Any>,
    next: Option<Box<Link>>,
}

/// Per-transaction registry of open relation handles.
pub enum RelationChain {
    Chain(Option<Box<Link>>, usize),
    Hashed(HashMap<TypeId, Rc<dyn Any>>),
}

impl RelationChain {
    #[must_use]
    pub fn new() -> Self {
        Self::Chain(None, 0)
    }

    /// Looks up an existing relation by its concrete type, or calls
    /// `create` to obtain one and registers it. `create` is expected to
    /// consult the owner's factory registry and may fail (auto-registration
    /// forbidden, shape mismatch); those failure paths live in the caller,
    /// not here, since this module only manages the chain/map itself.
    pub fn get_or_insert_with<T: Any + 'static>(
        &mut self,
        create: impl FnOnce() -> Rc<dyn Any>,
    ) -> Rc<dyn Any> {
        let type_id = TypeId::of::<T>();

        if let Some(existing) = self.find(type_id) {
            return existing;
        }

        let relation = create();
        self.prepend(type_id, relation.clone());
        relation
    }

    fn find(&mut self, type_id: TypeId) -> Option<Rc<dyn Any>> {
        match self {
            Self::Hashed(map) => map.get(&type_id).cloned(),
            Self::Chain(head, _) => {
                let mut hops = 0usize;
                let mut cursor = head.as_deref();
                let mut found = None;
                while let Some(link) = cursor {
                    hops += 1;
                    if link.type_id == type_id {
                        found = Some(link.relation.clone());
                        break;
                    }
                    cursor = link.next.as_deref();
                }
                if found.is_some() && hops >= LINEAR_SEARCH_LIMIT {
                    self.promote();
                }
                found
            }
        }
    }

    fn prepend(&mut self, type_id: TypeId, relation: Rc<dyn Any>) {
        match self {
            Self::Hashed(map) => {
                map.insert(type_id, relation);
            }
            Self::Chain(head, len) => {
                let new_head = Box::new(Link { type_id, relation, next: head.take() });
                *head = Some(new_head);
                *len += 1;
            }
        }
    }

    fn promote(&mut self) {
        let Self::Chain(head, _) = self else {
            return;
        };
        let mut map = HashMap::new();
        let mut cursor = head.take();
        while let Some(link) = cursor {
            map.entry(link.type_id).or_insert_with(|| link.relation.clone());
            cursor = link.next;
        }
        *self = Self::Hashed(map);
    }

    #[must_use]
    pub fn is_hashed(&self) -> bool {
        matches!(self, Self::Hashed(_))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Hashed(map) => map.len(),
            Self::Chain(_, len) => *len,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RelationChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RelA;
    struct RelB;
    struct RelC;
    struct RelD;
    struct RelE;

    #[test]
    fn reuses_existing_relation_instance() {
        let mut chain = RelationChain::new();
        let mut calls = 0;
        let a1 = chain.get_or_insert_with::<RelA>(|| {
            calls += 1;
            Rc::new(RelA)
        });
        let a2 = chain.get_or_insert_with::<RelA>(|| {
            calls += 1;
            Rc::new(RelA)
        });
        assert!(Rc::ptr_eq(&a1, &a2));
        assert_eq!(calls, 1);
    }

    #[test]
    fn promotes_to_hash_map_at_threshold() {
        let mut chain = RelationChain::new();
        chain.get_or_insert_with::<RelA>(|| Rc::new(RelA));
        chain.get_or_insert_with::<RelB>(|| Rc::new(RelB));
        chain.get_or_insert_with::<RelC>(|| Rc::new(RelC));
        chain.get_or_insert_with::<RelD>(|| Rc::new(RelD));
        assert!(!chain.is_hashed());

        // Hitting the 4th-deep entry on lookup (hop count >= limit) promotes.
        chain.get_or_insert_with::<RelA>(|| panic!("already present"));
        assert!(chain.is_hashed());

        // Still resolves correctly after promotion.
        let e = chain.get_or_insert_with::<RelE>(|| Rc::new(RelE));
        assert!(chain.is_hashed());
        assert_eq!(chain.len(), 5);
        drop(e);
    }

    #[derive(Default)]
    struct RefSet;
    impl RelationKind for RefSet {}

    #[derive(Default)]
    struct BadShape;
    impl RelationKind for BadShape {
        fn validate_shape() -> bool {
            false
        }
    }

    #[test]
    fn auto_register_succeeds_when_allowed() {
        let registry = RelationRegistry::new(true);
        let factory = registry.resolve_or_auto_register::<RefSet>("RefSet").unwrap();
        let handle = factory();
        assert!(handle.downcast_ref::<RefSet>().is_some());

        // A second call finds the same registered factory rather than erroring.
        assert!(registry.resolve_or_auto_register::<RefSet>("RefSet").is_ok());
    }

    #[test]
    fn auto_register_forbidden_when_disabled() {
        let registry = RelationRegistry::new(false);
        let err = registry.resolve_or_auto_register::<RefSet>("RefSet").unwrap_err();
        assert!(matches!(err, Error::AutoRegistrationForbidden("RefSet")));
    }

    #[test]
    fn invalid_shape_rejected_even_when_auto_register_allowed() {
        let registry = RelationRegistry::new(true);
        let err = registry.resolve_or_auto_register::<BadShape>("BadShape").unwrap_err();
        assert!(matches!(err, Error::RelationShapeInvalid("BadShape")));
    }

    #[test]
    fn explicit_init_relation_is_found_without_auto_register() {
        let registry = RelationRegistry::new(false);
        registry.init_relation::<RefSet>("RefSet").unwrap();
        assert!(registry.resolve_or_auto_register::<RefSet>("RefSet").is_ok());
    }
}
