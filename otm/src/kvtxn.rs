//! A concrete, in-process [`KvTxn`] backed by a `BTreeMap`: everything lives
//! in memory, ordering comes from the map's own key order, and there is no
//! persistence across process restarts.
//!
//! [`Database`] enforces the single-writer/multi-reader discipline from the
//! spec's concurrency model: at most one [`WriteTxn`] may be open at a time
//! (serialized by `writer_lock`), while any number of [`ReadTxn`]s may be
//! open concurrently with each other *and* with an open writer — a reader
//! only takes a brief read lock on `data` to clone its snapshot, rather than
//! contending with the writer's lock for the writer's whole lifetime.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock};

use crate::engine::{FindResult, KvTxn};
use crate::error::{CResult, Error};

type Store = BTreeMap<Vec<u8>, Vec<u8>>;

/// Owns the committed data set and hands out write/read transactions over it.
pub struct Database {
    data: RwLock<Store>,
    writer_lock: Mutex<()>,
    next_transaction_number: AtomicU64,
}

impl Database {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            writer_lock: Mutex::new(()),
            next_transaction_number: AtomicU64::new(1),
        }
    }

    fn take_transaction_number(&self) -> u64 {
        self.next_transaction_number.fetch_add(1, Ordering::SeqCst)
    }

    /// Opens a writer transaction. Blocks until any other writer transaction
    /// has been committed or disposed, matching the spec's "at most one
    /// writer transaction at a time" rule. The writer works off a private
    /// clone of the committed data and merges it back only at `commit`, so
    /// concurrent readers are never blocked by an open writer.
    pub fn begin_write(&self) -> WriteTxn<'_> {
        let writer_guard = self.writer_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let working = self.data.read().unwrap_or_else(std::sync::PoisonError::into_inner).clone();
        WriteTxn {
            database: self,
            _writer_guard: writer_guard,
            working,
            transaction_number: self.take_transaction_number(),
            generation: 0,
            cursor: None,
        }
    }

    /// Opens a reader transaction observing the snapshot committed as of
    /// this call. Only briefly holds `data`'s read lock to clone it, so it
    /// never blocks on (nor is blocked by) an in-progress writer transaction.
    pub fn begin_read(&self) -> ReadTxn {
        let snapshot = self.data.read().unwrap_or_else(std::sync::PoisonError::into_inner).clone();
        ReadTxn {
            snapshot,
            transaction_number: self.take_transaction_number(),
            generation: 0,
            cursor: None,
        }
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

fn prefix_upper_bound(prefix: &[u8]) -> Bound<Vec<u8>> {
    let mut upper = prefix.to_vec();
    for i in (0..upper.len()).rev() {
        if upper[i] != 0xff {
            upper[i] += 1;
            upper.truncate(i + 1);
            return Bound::Excluded(upper);
        }
    }
    Bound::Unbounded
}

/// A single open writer transaction. Holds the database's writer lock for
/// its entire lifetime (so only one `WriteTxn` can exist at a time) but
/// mutates only its own private `working` copy, merged into `database.data`
/// at `commit`.
pub struct WriteTxn<'a> {
    database: &'a Database,
    _writer_guard: MutexGuard<'a, ()>,
    working: Store,
    transaction_number: u64,
    generation: u64,
    cursor: Option<Vec<u8>>,
}

impl<'a> WriteTxn<'a> {
    fn bump(&mut self) {
        self.generation += 1;
    }
}

impl<'a> KvTxn for WriteTxn<'a> {
    fn find_first_key(&mut self, prefix: &[u8]) -> bool {
        self.bump();
        let lower = Bound::Included(prefix.to_vec());
        let upper = prefix_upper_bound(prefix);
        match self.working.range((lower, upper)).next() {
            Some((k, _)) => {
                self.cursor = Some(k.clone());
                true
            }
            None => {
                self.cursor = None;
                false
            }
        }
    }

    fn find_last_key(&mut self, prefix: &[u8]) -> bool {
        self.bump();
        let lower = Bound::Included(prefix.to_vec());
        let upper = prefix_upper_bound(prefix);
        match self.working.range((lower, upper)).next_back() {
            Some((k, _)) => {
                self.cursor = Some(k.clone());
                true
            }
            None => {
                self.cursor = None;
                false
            }
        }
    }

    fn find_next_key(&mut self, prefix: &[u8]) -> bool {
        self.bump();
        let Some(current) = self.cursor.clone() else {
            return self.find_first_key(prefix);
        };
        let lower = Bound::Excluded(current);
        let upper = prefix_upper_bound(prefix);
        match self.working.range((lower, upper)).next() {
            Some((k, _)) => {
                self.cursor = Some(k.clone());
                true
            }
            None => {
                self.cursor = None;
                false
            }
        }
    }

    fn find_previous_key(&mut self, prefix: &[u8]) -> bool {
        self.bump();
        let Some(current) = self.cursor.clone() else {
            return self.find_last_key(prefix);
        };
        let lower = Bound::Included(prefix.to_vec());
        let upper = Bound::Excluded(current);
        match self.working.range((lower, upper)).next_back() {
            Some((k, _)) => {
                self.cursor = Some(k.clone());
                true
            }
            None => {
                self.cursor = None;
                false
            }
        }
    }

    fn find(&mut self, key: &[u8]) -> FindResult {
        self.bump();
        if self.working.contains_key(key) {
            self.cursor = Some(key.to_vec());
            return FindResult::Exact;
        }
        match self.working.range::<Vec<u8>, _>(..key.to_vec()).next_back() {
            Some((k, _)) => {
                self.cursor = Some(k.clone());
                FindResult::Previous
            }
            None => {
                self.cursor = None;
                FindResult::NotFound
            }
        }
    }

    fn current_key(&self) -> Option<Vec<u8>> {
        self.cursor.clone()
    }

    fn current_value(&self) -> Option<Vec<u8>> {
        self.cursor.as_ref().and_then(|k| self.working.get(k)).cloned()
    }

    fn create_or_update_key_value(&mut self, key: &[u8], value: &[u8]) -> bool {
        self.bump();
        let created = !self.working.contains_key(key);
        self.working.insert(key.to_vec(), value.to_vec());
        self.cursor = Some(key.to_vec());
        created
    }

    fn erase_current(&mut self) {
        self.bump();
        if let Some(key) = self.cursor.take() {
            self.working.remove(&key);
        }
    }

    fn erase_prefix(&mut self, prefix: &[u8]) {
        self.bump();
        let lower = Bound::Included(prefix.to_vec());
        let upper = prefix_upper_bound(prefix);
        let doomed: Vec<Vec<u8>> = self.working.range((lower, upper)).map(|(k, _)| k.clone()).collect();
        for key in doomed {
            self.working.remove(&key);
        }
        self.cursor = None;
    }

    fn transaction_number(&self) -> u64 {
        self.transaction_number
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn cursor_generation(&self) -> u64 {
        self.generation
    }

    fn commit(self: Box<Self>) -> CResult<()> {
        let mut data = self
            .database
            .data
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *data = self.working;
        Ok(())
    }

    fn dispose(self: Box<Self>) {
        // `working` is dropped along with `self`; the committed `data` was
        // never touched, so this is an atomic rollback of everything the
        // transaction did.
    }
}

/// A read-only transaction over a point-in-time snapshot.
pub struct ReadTxn {
    snapshot: Store,
    transaction_number: u64,
    generation: u64,
    cursor: Option<Vec<u8>>,
}

impl ReadTxn {
    fn bump(&mut self) {
        self.generation += 1;
    }
}

impl KvTxn for ReadTxn {
    fn find_first_key(&mut self, prefix: &[u8]) -> bool {
        self.bump();
        let lower = Bound::Included(prefix.to_vec());
        let upper = prefix_upper_bound(prefix);
        match self.snapshot.range((lower, upper)).next() {
            Some((k, _)) => {
                self.cursor = Some(k.clone());
                true
            }
            None => {
                self.cursor = None;
                false
            }
        }
    }

    fn find_last_key(&mut self, prefix: &[u8]) -> bool {
        self.bump();
        let lower = Bound::Included(prefix.to_vec());
        let upper = prefix_upper_bound(prefix);
        match self.snapshot.range((lower, upper)).next_back() {
            Some((k, _)) => {
                self.cursor = Some(k.clone());
                true
            }
            None => {
                self.cursor = None;
                false
            }
        }
    }

    fn find_next_key(&mut self, prefix: &[u8]) -> bool {
        self.bump();
        let Some(current) = self.cursor.clone() else {
            return self.find_first_key(prefix);
        };
        let lower = Bound::Excluded(current);
        let upper = prefix_upper_bound(prefix);
        match self.snapshot.range((lower, upper)).next() {
            Some((k, _)) => {
                self.cursor = Some(k.clone());
                true
            }
            None => {
                self.cursor = None;
                false
            }
        }
    }

    fn find_previous_key(&mut self, prefix: &[u8]) -> bool {
        self.bump();
        let Some(current) = self.cursor.clone() else {
            return self.find_last_key(prefix);
        };
        let lower = Bound::Included(prefix.to_vec());
        let upper = Bound::Excluded(current);
        match self.snapshot.range((lower, upper)).next_back() {
            Some((k, _)) => {
                self.cursor = Some(k.clone());
                true
            }
            None => {
                self.cursor = None;
                false
            }
        }
    }

    fn find(&mut self, key: &[u8]) -> FindResult {
        self.bump();
        if self.snapshot.contains_key(key) {
            self.cursor = Some(key.to_vec());
            return FindResult::Exact;
        }
        match self.snapshot.range::<Vec<u8>, _>(..key.to_vec()).next_back() {
            Some((k, _)) => {
                self.cursor = Some(k.clone());
                FindResult::Previous
            }
            None => {
                self.cursor = None;
                FindResult::NotFound
            }
        }
    }

    fn current_key(&self) -> Option<Vec<u8>> {
        self.cursor.clone()
    }

    fn current_value(&self) -> Option<Vec<u8>> {
        self.cursor.as_ref().and_then(|k| self.snapshot.get(k)).cloned()
    }

    fn create_or_update_key_value(&mut self, _key: &[u8], _value: &[u8]) -> bool {
        false
    }

    fn erase_current(&mut self) {}

    fn erase_prefix(&mut self, _prefix: &[u8]) {}

    fn transaction_number(&self) -> u64 {
        self.transaction_number
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn cursor_generation(&self) -> u64 {
        self.generation
    }

    fn commit(self: Box<Self>) -> CResult<()> {
        Err(Error::ReadOnly)
    }

    fn dispose(self: Box<Self>) {}
}
