//! Enumeration Engine: scans all objects in OID order, merged with a tail of
//! not-yet-committed dirty objects, with Cursor Guard-based recovery from
//! interleaved writes.
//!
//! The scan is lazy and single-pass; resuming an `Enumeration` after a
//! partial consumption that was abandoned (dropped without finishing) is
//! undefined, matching the spec — there is no saved position across
//! separate `enumerate` calls.
//!
//! `Enumerator` deliberately does not hold a `&mut` borrow of the engine
//! across calls (unlike [`crate::cursor::CursorToken`], which is cheap to
//! recreate): `Transaction` needs to interleave engine access with identity
//! map and dirty set access on every step, and those live in sibling fields
//! of the same struct, so the engine reference is passed in fresh on each
//! `next_raw` call rather than captured once at construction.

use crate::cursor::CursorToken;
use crate::engine::KvTxn;
use crate::error::CResult;
use crate::object::ObjectRef;
use crate::oid::{self, Oid};
use crate::schema::all_objects_prefix;

/// One step of enumeration: the OID encountered and its materialized
/// object, already inserted into the identity map by the caller.
pub struct EnumeratedObject {
    pub oid: Oid,
    pub object: ObjectRef,
    pub table_id: u32,
}

enum Phase {
    /// Scanning the committed `AllObjects` range.
    Store,
    /// Walking dirty OIDs strictly greater than the last store OID seen, up
    /// to the snapshot of allocated OIDs taken when enumeration started.
    DirtyTail { next_oid: Oid },
    Done,
}

/// Drives one enumeration pass's bookkeeping (cursor phase, last-seen OID,
/// Cursor Guard token). Resolving a raw `AllObjects` record into an object
/// (decoding `tableId`/version, invoking the registered loader, inserting
/// into the identity map) is the caller's job, since that touches the
/// identity map and table registry that this module has no access to.
pub struct Enumerator {
    phase: Phase,
    last_store_oid: Oid,
    last_allocated_oid_at_start: Oid,
    token: Option<CursorToken>,
}

impl Enumerator {
    /// `last_allocated_oid_at_start` should be the owner's
    /// `GetLastAllocatedOid()` sampled at the moment enumeration begins, so
    /// the dirty tail has a fixed upper bound even if further `Store` calls
    /// happen mid-walk (those are simply not yielded by this pass).
    #[must_use]
    pub fn new(last_allocated_oid_at_start: Oid) -> Self {
        Self {
            phase: Phase::Store,
            last_store_oid: Oid::UNASSIGNED,
            last_allocated_oid_at_start,
            token: None,
        }
    }

    /// Advances the store-scan phase by one key, returning the decoded OID
    /// and raw record bytes, or `None` once the store range is exhausted.
    fn next_store_record<K: KvTxn>(&mut self, engine: &mut K) -> Option<(Oid, Vec<u8>)> {
        let prefix = all_objects_prefix();

        let found = match &self.token {
            None => engine.find_first_key(&prefix),
            Some(token) => token.resume(engine, &prefix),
        };

        if !found {
            return None;
        }

        let key = engine.current_key()?;
        let value = engine.current_value()?;
        let (oid, _) = oid::decode(&key[prefix.len()..]).ok()?;
        self.token = Some(CursorToken::capture(engine, Some(key)));
        self.last_store_oid = oid;
        Some((oid, value))
    }

    /// Pulls the next raw record (from the committed store, then the dirty
    /// tail), handing dirty-tail OIDs back with an empty byte vector (the
    /// caller resolves dirty objects straight from the identity map instead
    /// of decoding bytes). `dirty_oids_ascending` should reflect the dirty
    /// set *at the moment of this call*, not a snapshot taken when
    /// enumeration began, so that objects stored mid-walk are still picked
    /// up once their OID falls within range.
    pub fn next_raw<K: KvTxn>(
        &mut self,
        engine: &mut K,
        dirty_oids_ascending: &[Oid],
    ) -> CResult<Option<(Oid, Vec<u8>)>> {
        loop {
            let dirty_tail_next_oid = match self.phase {
                Phase::Store => None,
                Phase::DirtyTail { next_oid } => Some(next_oid),
                Phase::Done => return Ok(None),
            };

            let Some(next_oid) = dirty_tail_next_oid else {
                if let Some(record) = self.next_store_record(engine) {
                    return Ok(Some(record));
                }
                self.phase = Phase::DirtyTail {
                    next_oid: self.last_store_oid.next(),
                };
                continue;
            };

            if next_oid > self.last_allocated_oid_at_start {
                self.phase = Phase::Done;
                return Ok(None);
            }
            match dirty_oids_ascending.iter().find(|&&o| o >= next_oid) {
                Some(&oid) if oid <= self.last_allocated_oid_at_start => {
                    self.phase = Phase::DirtyTail { next_oid: oid.next() };
                    return Ok(Some((oid, Vec::new())));
                }
                _ => {
                    self.phase = Phase::Done;
                    return Ok(None);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvtxn::Database;
    use crate::schema::all_objects_key;

    #[test]
    fn yields_store_records_in_oid_order() {
        let db = Database::new();
        let mut w = db.begin_write();
        w.create_or_update_key_value(&all_objects_key(Oid(1)), b"a");
        w.create_or_update_key_value(&all_objects_key(Oid(5)), b"b");
        w.create_or_update_key_value(&all_objects_key(Oid(3)), b"c");

        let mut e = Enumerator::new(Oid(5));
        let mut seen = Vec::new();
        while let Some((oid, _)) = e.next_raw(&mut w, &[]).unwrap() {
            seen.push(oid);
        }
        assert_eq!(seen, vec![Oid(1), Oid(3), Oid(5)]);
    }

    #[test]
    fn dirty_tail_yields_oids_beyond_last_store_oid() {
        let db = Database::new();
        let mut w = db.begin_write();
        w.create_or_update_key_value(&all_objects_key(Oid(1)), b"a");

        let mut e = Enumerator::new(Oid(3));
        let mut seen = Vec::new();
        while let Some((oid, _)) = e.next_raw(&mut w, &[Oid(2), Oid(3)]).unwrap() {
            seen.push(oid);
        }
        assert_eq!(seen, vec![Oid(1), Oid(2), Oid(3)]);
    }

    #[test]
    fn dirty_tail_bounded_by_last_allocated_oid_at_start() {
        let db = Database::new();
        let mut w = db.begin_write();
        w.create_or_update_key_value(&all_objects_key(Oid(1)), b"a");

        let mut e = Enumerator::new(Oid(2));
        let mut seen = Vec::new();
        while let Some((oid, _)) = e.next_raw(&mut w, &[Oid(2), Oid(4)]).unwrap() {
            seen.push(oid);
        }
        assert_eq!(seen, vec![Oid(1), Oid(2)]);
    }
}
