//! The underlying key-value engine interface consumed by the transaction
//! manager (spec "EXTERNAL INTERFACES", consumed side).
//!
//! This is deliberately narrow: an ordered byte-key store with a single
//! cursor, relative find, and commit/dispose. [`crate::kvtxn::WriteTxn`] and
//! [`crate::kvtxn::ReadTxn`] are the in-process implementations this crate
//! ships; it adds cursor positioning and a generation counter on top of plain
//! get/put, since the object layer needs to detect when its cursor was moved
//! out from under it by a reentrant write during enumeration (see
//! [`crate::cursor`]).

use crate::error::CResult;

/// Result of a relative `find`: whether the requested key was present
/// exactly, only a preceding key exists, or nothing at or before it exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FindResult {
    Exact,
    Previous,
    NotFound,
}

/// A key-value transaction handle, as consumed by the object transaction
/// manager. Implementors own cursor state; every method that can move the
/// cursor bumps [`KvTxn::cursor_generation`].
pub trait KvTxn {
    /// Positions the cursor at the first key with the given prefix.
    /// Returns `false` if no such key exists.
    fn find_first_key(&mut self, prefix: &[u8]) -> bool;

    /// Positions the cursor at the last key with the given prefix.
    fn find_last_key(&mut self, prefix: &[u8]) -> bool;

    /// Moves the cursor to the next key sharing the given prefix.
    /// Returns `false` if the cursor runs off the end of the prefix.
    fn find_next_key(&mut self, prefix: &[u8]) -> bool;

    /// Moves the cursor to the previous key sharing the given prefix.
    fn find_previous_key(&mut self, prefix: &[u8]) -> bool;

    /// Seeks to `key` exactly if present, otherwise to the greatest key less
    /// than `key`, otherwise positions nowhere.
    fn find(&mut self, key: &[u8]) -> FindResult;

    /// The key at the current cursor position, if positioned.
    fn current_key(&self) -> Option<Vec<u8>>;

    /// The value at the current cursor position, if positioned.
    fn current_value(&self) -> Option<Vec<u8>>;

    /// Inserts or overwrites `key`. Returns `true` if this created a new key.
    fn create_or_update_key_value(&mut self, key: &[u8], value: &[u8]) -> bool;

    /// Erases the key at the current cursor position, if any.
    fn erase_current(&mut self);

    /// Erases every key sharing the given prefix.
    fn erase_prefix(&mut self, prefix: &[u8]);

    /// Monotonic snapshot identifier for this transaction, stable for its
    /// lifetime. Used by [`crate::singleton`] to key the singleton content
    /// cache.
    fn transaction_number(&self) -> u64;

    fn is_read_only(&self) -> bool;

    /// Bumped by every cursor-moving or mutating operation. The object layer
    /// samples this before a cursor-sensitive sequence and compares it
    /// afterward to detect interleaved movement.
    fn cursor_generation(&self) -> u64;

    /// Commits the underlying transaction. The transaction is consumed;
    /// there is no way to continue using it afterward.
    fn commit(self: Box<Self>) -> CResult<()>;

    /// Discards the transaction without committing.
    fn dispose(self: Box<Self>);

    /// Marks the transaction log for rotation once this transaction commits.
    /// Engines that keep a single append-only log (write-ahead log, cask
    /// segment, etc.) use this to start a fresh segment on the next boundary
    /// instead of mid-transaction; engines with no such log are unaffected.
    /// Default no-op, since the in-memory `BTreeMap` backend has no log to
    /// rotate.
    fn request_log_rotation(&mut self) {}
}
