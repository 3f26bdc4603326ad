//! Key-space layout and the Schema Persistor.
//!
//! Builds the bit-exact key prefixes from the spec's EXTERNAL INTERFACES
//! section and persists table name/version/singleton-oid records the first
//! time a commit touches a table whose on-disk schema lags its client type.

use crate::oid::{self, Oid};
use crate::registry::TableInfo;

/// Key-space prefix bytes. Each is a single tag byte; real deployments would
/// likely want these configurable, but the spec treats them as a fixed,
/// bit-exact layout.
pub const ALL_OBJECTS: u8 = 0x01;
pub const TABLE_NAMES: u8 = 0x02;
pub const TABLE_VERSIONS: u8 = 0x03;
pub const TABLE_SINGLETONS: u8 = 0x04;
pub const ALL_DICTIONARIES: u8 = 0x05;
pub const ALL_RELATIONS_PK: u8 = 0x06;
pub const ALL_RELATIONS_SK: u8 = 0x07;

fn encode_u32(value: u32) -> Vec<u8> {
    oid::encode(Oid(u64::from(value)))
}

/// `AllObjects || Encode(oid)`
#[must_use]
pub fn all_objects_key(oid: Oid) -> Vec<u8> {
    let mut key = vec![ALL_OBJECTS];
    key.extend(oid::encode(oid));
    key
}

#[must_use]
pub fn all_objects_prefix() -> Vec<u8> {
    vec![ALL_OBJECTS]
}

/// `TableNames || Encode(tableId)`
#[must_use]
pub fn table_names_key(table_id: u32) -> Vec<u8> {
    let mut key = vec![TABLE_NAMES];
    key.extend(encode_u32(table_id));
    key
}

/// `TableVersions || BuildKeyForTableVersions(tableId, version)`
#[must_use]
pub fn table_versions_key(table_id: u32, version: u32) -> Vec<u8> {
    let mut key = vec![TABLE_VERSIONS];
    key.extend(encode_u32(table_id));
    key.extend(encode_u32(version));
    key
}

/// `TableSingletons || Encode(tableId)`
#[must_use]
pub fn table_singletons_key(table_id: u32) -> Vec<u8> {
    let mut key = vec![TABLE_SINGLETONS];
    key.extend(encode_u32(table_id));
    key
}

#[must_use]
pub fn all_dictionaries_prefix() -> Vec<u8> {
    vec![ALL_DICTIONARIES]
}

/// `AllDictionaries || Encode(dictionaryId)`, the key a single dictionary's
/// own content would live under (as opposed to `all_dictionaries_prefix`,
/// which scopes the whole sub-store for wholesale erasure).
#[must_use]
pub fn dictionary_key(dictionary_id: u64) -> Vec<u8> {
    let mut key = vec![ALL_DICTIONARIES];
    key.extend(oid::encode(Oid(dictionary_id)));
    key
}

#[must_use]
pub fn all_relations_pk_prefix() -> Vec<u8> {
    vec![ALL_RELATIONS_PK]
}

#[must_use]
pub fn all_relations_sk_prefix() -> Vec<u8> {
    vec![ALL_RELATIONS_SK]
}

/// Writes the schema records for a table whose on-disk state lags its
/// client type. Triggered once per commit per touched table; read-only
/// transactions never call this.
///
/// Writes, in order:
/// - `TableNames` if this is the table's first-ever persistence
///   (`last_persisted_version <= 0`, i.e. never persisted).
/// - `TableVersions` unconditionally, keyed by `(tableId, clientTypeVersion)`.
/// - `TableSingletons` only if `need_store_singleton_oid` is set.
pub fn persist_table_schema(table: &TableInfo, engine: &mut dyn crate::engine::KvTxn) {
    let is_first_persistence = table.last_persisted_version.get() == 0;

    if is_first_persistence {
        engine.create_or_update_key_value(&table_names_key(table.id), table.name.as_bytes());
        log::info!("otm: persisting table name for new table '{}' (id {})", table.name, table.id);
    }

    let version_descriptor = encode_u32(table.client_type_version);
    engine.create_or_update_key_value(
        &table_versions_key(table.id, table.client_type_version),
        &version_descriptor,
    );

    if table.need_store_singleton_oid.get() {
        engine.create_or_update_key_value(
            &table_singletons_key(table.id),
            &oid::encode(table.singleton_oid.get()),
        );
    }

    log::debug!(
        "otm: schema persisted for table '{}' id={} version={}",
        table.name,
        table.id,
        table.client_type_version
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_objects_key_orders_by_oid() {
        let k1 = all_objects_key(Oid(1));
        let k2 = all_objects_key(Oid(2));
        let k1000 = all_objects_key(Oid(1000));
        assert!(k1 < k2);
        assert!(k2 < k1000);
    }

    #[test]
    fn prefixes_are_disjoint_tag_bytes() {
        let tags = [
            ALL_OBJECTS,
            TABLE_NAMES,
            TABLE_VERSIONS,
            TABLE_SINGLETONS,
            ALL_DICTIONARIES,
            ALL_RELATIONS_PK,
            ALL_RELATIONS_SK,
        ];
        let unique: std::collections::HashSet<_> = tags.iter().collect();
        assert_eq!(unique.len(), tags.len());
    }
}
