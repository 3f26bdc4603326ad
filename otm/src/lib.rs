//! `otm` is the object-layer transaction manager for an embedded,
//! single-writer/multi-reader, multi-version key-value store: it turns a
//! byte-oriented key-value engine (see [`engine::KvTxn`]) into a
//! transactional graph of typed, identity-preserving objects.
//!
//! ## Getting started
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use otm::error::CResult;
//! use otm::object::{EntityKind, ObjectRef};
//! use otm::oid::{self, Oid};
//! use otm::txn::ObjectStore;
//!
//! struct Foo {
//!     x: i32,
//! }
//!
//! #[derive(Default)]
//! struct FooKind;
//! impl EntityKind for FooKind {
//!     fn type_name(&self) -> &'static str {
//!         "Foo"
//!     }
//!     fn client_type_version(&self) -> u32 {
//!         1
//!     }
//!     fn create(&self) -> ObjectRef {
//!         Rc::new(RefCell::new(Foo { x: 0 }))
//!     }
//!     fn save(&self, object: &ObjectRef, out: &mut Vec<u8>) -> CResult<()> {
//!         let foo = object.borrow();
//!         let foo = foo.downcast_ref::<Foo>().unwrap();
//!         out.extend(oid::encode(Oid(foo.x as u64)));
//!         Ok(())
//!     }
//!     fn load(&self, _version: u32, bytes: &[u8], pos: &mut usize, object: &ObjectRef) -> CResult<()> {
//!         let (value, consumed) = oid::decode(&bytes[*pos..])?;
//!         *pos += consumed;
//!         object.borrow_mut().downcast_mut::<Foo>().unwrap().x = value.0 as i32;
//!         Ok(())
//!     }
//! }
//!
//! fn run() -> CResult<()> {
//!     let store = ObjectStore::new();
//!     {
//!         let mut tx = store.begin_write();
//!         let object = tx.new_object::<FooKind>()?;
//!         object.borrow_mut().downcast_mut::<Foo>().unwrap().x = 7;
//!         tx.store(&object)?;
//!         tx.commit()?;
//!     }
//!     Ok(())
//! }
//!
//! run().unwrap();
//! ```

pub mod cursor;
pub mod engine;
pub mod enumerate;
pub mod error;
pub mod identity;
pub mod inline;
pub mod kvtxn;
pub mod object;
pub mod oid;
pub mod registry;
pub mod relation;
pub mod schema;
pub mod singleton;
pub mod txn;
