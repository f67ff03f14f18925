//! Byte-level key-value access over one redb table.

use anyhow::Result;
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::sync::Arc;

/// Trait for stores backed by a single redb table.
///
/// Implementors specify the table definition and database handle; the
/// CRUD methods are shared. Values are raw bytes so each store chooses its
/// own record encoding.
pub trait KvTable: Send + Sync {
    const TABLE: TableDefinition<'static, &'static str, &'static [u8]>;

    fn db(&self) -> &Arc<Database>;

    /// Store raw bytes under an id, replacing any previous value.
    fn put_raw(&self, id: &str, data: &[u8]) -> Result<()> {
        let write_txn = self.db().begin_write()?;
        {
            let mut table = write_txn.open_table(Self::TABLE)?;
            table.insert(id, data)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Insert only if the id is absent. Returns whether the insert happened.
    /// Check and insert share one write transaction.
    fn insert_if_absent(&self, id: &str, data: &[u8]) -> Result<bool> {
        let write_txn = self.db().begin_write()?;
        let inserted = {
            let mut table = write_txn.open_table(Self::TABLE)?;
            let existed = table.get(id)?.is_some();
            if !existed {
                table.insert(id, data)?;
            }
            !existed
        };
        write_txn.commit()?;
        Ok(inserted)
    }

    fn get_raw(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db().begin_read()?;
        let table = read_txn.open_table(Self::TABLE)?;
        if let Some(value) = table.get(id)? {
            Ok(Some(value.value().to_vec()))
        } else {
            Ok(None)
        }
    }

    fn list_raw(&self) -> Result<Vec<(String, Vec<u8>)>> {
        let read_txn = self.db().begin_read()?;
        let table = read_txn.open_table(Self::TABLE)?;
        let mut items = Vec::new();
        for item in table.iter()? {
            let (key, value) = item?;
            items.push((key.value().to_string(), value.value().to_vec()));
        }
        Ok(items)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let write_txn = self.db().begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(Self::TABLE)?;
            table.remove(id)?.is_some()
        };
        write_txn.commit()?;
        Ok(existed)
    }

    fn exists(&self, id: &str) -> Result<bool> {
        let read_txn = self.db().begin_read()?;
        let table = read_txn.open_table(Self::TABLE)?;
        Ok(table.get(id)?.is_some())
    }

    fn count(&self) -> Result<usize> {
        let read_txn = self.db().begin_read()?;
        let table = read_txn.open_table(Self::TABLE)?;
        Ok(table.len()? as usize)
    }

    /// Remove every entry. Returns how many were removed.
    fn clear(&self) -> Result<usize> {
        let write_txn = self.db().begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(Self::TABLE)?;
            let keys: Vec<String> = table
                .iter()?
                .filter_map(|item| item.ok().map(|(k, _)| k.value().to_string()))
                .collect();
            for key in &keys {
                table.remove(key.as_str())?;
            }
            keys.len()
        };
        write_txn.commit()?;
        Ok(removed)
    }
}

/// Generate a store struct over one named redb table.
#[macro_export]
macro_rules! define_kv_store {
    ( $(#[$meta:meta])* $vis:vis struct $name:ident { table: $table_name:literal } ) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        $vis struct $name {
            db: std::sync::Arc<redb::Database>,
        }

        impl $name {
            pub fn new(db: std::sync::Arc<redb::Database>) -> anyhow::Result<Self> {
                let write_txn = db.begin_write()?;
                write_txn.open_table(<Self as $crate::KvTable>::TABLE)?;
                write_txn.commit()?;
                Ok(Self { db })
            }
        }

        impl $crate::KvTable for $name {
            const TABLE: redb::TableDefinition<'static, &'static str, &'static [u8]> =
                redb::TableDefinition::new($table_name);

            fn db(&self) -> &std::sync::Arc<redb::Database> {
                &self.db
            }
        }
    };
}
