use thiserror::Error as ThisError;

/// Convenience alias used throughout the crate, mirroring the teacher's own
/// `CResult<T>` naming at every `storage`/`codec` call site.
pub type CResult<T> = std::result::Result<T, Error>;

/// Error kinds raised by the object transaction manager.
///
/// Key-value engine errors (`io::Error`, lock contention) pass through
/// unaltered via `#[from]`; everything else corresponds to one of the error
/// kinds in the design (unknown types, storage invariants, auto-registration
/// policy, relation shape).
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),

    #[error("transaction is read-only")]
    ReadOnly,

    #[error("another writer transaction is already open")]
    WriterBusy,

    /// Read path met an unknown `tableId`; fatal for the read.
    #[error("unknown table id {0}")]
    UnknownTypeId(u64),

    /// Type was not registered and auto-registration is disabled or inapplicable.
    #[error("type '{0}' is not registered with the store")]
    UnknownType(&'static str),

    /// Attempt to store a non-class value directly (e.g. a bare collection).
    #[error("cannot store value of type '{0}' directly, it is not a storable class")]
    InvalidStorage(&'static str),

    /// Singleton content decoded to an object not compatible with the requested type.
    #[error("singleton oid {oid} for table '{table}' did not decode to the requested type")]
    SingletonTypeMismatch { oid: u64, table: String },

    /// Internal invariant broken during `StoreObject`; always a bug.
    #[error("missing metadata for object during store (internal invariant violation)")]
    MissingMetadata,

    /// Relation auto-registration disabled by the owner.
    #[error("auto-registration of relation type '{0}' is forbidden")]
    AutoRegistrationForbidden(&'static str),

    /// Relation type does not satisfy the required shape.
    #[error("relation type '{0}' does not satisfy the required relation interface shape")]
    RelationShapeInvalid(&'static str),

    #[error("object has no assigned oid")]
    Unassigned,

    #[error("commit drain loop exceeded its sanity limit ({0} rounds)")]
    CommitDrainOverflow(u64),
}

impl Error {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}
