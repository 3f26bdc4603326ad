//! Cursor Guard: detects when a reentrant write has moved the underlying
//! key-value cursor out from under a sequence of cursor reads, and
//! repositions by explicit key instead of assuming the cursor is still where
//! it was left.
//!
//! The classic case is [`crate::enumerate`]: a saver callback invoked while
//! draining the dirty set can call `Store`, which itself seeks and writes
//! through the same transaction's cursor. When the enumerator resumes it
//! must not blindly call `find_next_key` — it has to notice the cursor moved
//! and reseek from the last key it actually observed.

use crate::engine::KvTxn;

/// A `(generation, position)` token captured before a sequence of operations
/// that might yield control back to the caller.
#[derive(Clone, Debug)]
pub struct CursorToken {
    generation: u64,
    last_key: Option<Vec<u8>>,
}

impl CursorToken {
    /// Captures the engine's current generation and the last key this
    /// caller observed (not necessarily the engine's current cursor
    /// position, since the caller may be about to yield control).
    pub fn capture(engine: &dyn KvTxn, last_key: Option<Vec<u8>>) -> Self {
        Self {
            generation: engine.cursor_generation(),
            last_key,
        }
    }

    /// Resumes a prefix scan after potentially losing the cursor. If the
    /// generation hasn't changed the cursor is exactly where it was and a
    /// plain `find_next_key` is correct and cheap. Otherwise, reseeks by the
    /// last observed key: if that key is still present, steps forward once
    /// past it; if the reseek lands on the last key's predecessor instead
    /// (the key itself was erased), one forward step recovers the original
    /// position; if that also fails, the scan is exhausted.
    pub fn resume<K: KvTxn + ?Sized>(&self, engine: &mut K, prefix: &[u8]) -> bool {
        if engine.cursor_generation() == self.generation {
            return engine.find_next_key(prefix);
        }

        let Some(last_key) = &self.last_key else {
            return engine.find_first_key(prefix);
        };

        match engine.find(last_key) {
            crate::engine::FindResult::Exact => engine.find_next_key(prefix),
            crate::engine::FindResult::Previous | crate::engine::FindResult::NotFound => {
                if engine.current_key().is_some() {
                    engine.find_next_key(prefix)
                } else {
                    engine.find_first_key(prefix)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvtxn::Database;

    #[test]
    fn resume_without_interleaving_just_advances() {
        let db = Database::new();
        let mut w = db.begin_write();
        w.create_or_update_key_value(b"p\x00a", b"1");
        w.create_or_update_key_value(b"p\x00b", b"2");

        w.find_first_key(b"p\x00");
        let token = CursorToken::capture(&w, w.current_key());
        assert!(token.resume(&mut w, b"p\x00"));
        assert_eq!(w.current_key(), Some(b"p\x00b".to_vec()));
    }

    #[test]
    fn resume_after_interleaved_delete_of_last_key_steps_forward() {
        let db = Database::new();
        let mut w = db.begin_write();
        w.create_or_update_key_value(b"p\x00a", b"1");
        w.create_or_update_key_value(b"p\x00b", b"2");
        w.create_or_update_key_value(b"p\x00c", b"3");

        w.find_first_key(b"p\x00");
        let token = CursorToken::capture(&w, w.current_key());

        // Simulate an interleaved write: erase the key we were sitting on.
        w.erase_current();

        assert!(token.resume(&mut w, b"p\x00"));
        assert_eq!(w.current_key(), Some(b"p\x00b".to_vec()));
    }
}
