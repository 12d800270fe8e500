//! [`Backend`] on top of `redb`, file backed or in memory.

use std::path::Path;

use redb::backends::InMemoryBackend;
use redb::{Database, ReadOnlyTable, ReadableTable, TableDefinition};
use tracing::debug;

use super::{scan_origin, Backend, ReadTransaction, Visitor, WriteTransaction};
use crate::types::{DbError, Result};

/// The whole keyspace lives in one table.
const KEYSPACE: TableDefinition<'static, &'static [u8], &'static [u8]> =
    TableDefinition::new("syncdb");

/// A redb database holding the keyspace.
pub struct RedbBackend {
    db: Database,
}

impl RedbBackend {
    /// Opens or creates the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = Database::create(path)?;
        debug!(path = %path.display(), "syncdb.backend.opened");
        Self::init(db)
    }

    /// A fresh database that only lives as long as the handle.
    pub fn memory() -> Result<Self> {
        let db = Database::builder().create_with_backend(InMemoryBackend::new())?;
        Self::init(db)
    }

    // Readers open the table without creating it. An existing database is
    // left untouched, so inspecting it never commits.
    fn init(db: Database) -> Result<Self> {
        if !has_keyspace(&db)? {
            let txn = db.begin_write()?;
            txn.open_table(KEYSPACE)?;
            txn.commit()?;
            debug!("syncdb.backend.keyspace_created");
        }
        Ok(Self { db })
    }
}

fn has_keyspace(db: &Database) -> Result<bool> {
    match db.begin_read()?.open_table(KEYSPACE) {
        Ok(_) => Ok(true),
        Err(redb::TableError::TableDoesNotExist(_)) => Ok(false),
        Err(err) => Err(err.into()),
    }
}

impl Backend for RedbBackend {
    fn begin_read(&self) -> Result<Box<dyn ReadTransaction>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(KEYSPACE)?;
        Ok(Box::new(RedbRead { table, _txn: txn }))
    }

    fn begin_write(&self) -> Result<Box<dyn WriteTransaction>> {
        let txn = self.db.begin_write()?;
        Ok(Box::new(RedbWrite { txn }))
    }
}

struct RedbRead {
    table: ReadOnlyTable<&'static [u8], &'static [u8]>,
    _txn: redb::ReadTransaction,
}

impl ReadTransaction for RedbRead {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let value = self.table.get(key)?.map(|v| v.value().to_vec());
        Ok(value)
    }

    fn scan(&self, prefix: &[u8], start: &[u8], visit: &mut Visitor<'_>) -> Result<()> {
        for entry in self.table.range(scan_origin(prefix, start)..)? {
            let (k, v) = entry?;
            let key = k.value();
            if !key.starts_with(prefix) || !visit(key, v.value())? {
                break;
            }
        }
        Ok(())
    }
}

// `redb::Table` borrows its transaction, so every operation opens the table
// anew and scans are materialized before the visitor runs.
struct RedbWrite {
    txn: redb::WriteTransaction,
}

impl ReadTransaction for RedbWrite {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let table = self.txn.open_table(KEYSPACE)?;
        let value = table.get(key)?.map(|v| v.value().to_vec());
        Ok(value)
    }

    fn scan(&self, prefix: &[u8], start: &[u8], visit: &mut Visitor<'_>) -> Result<()> {
        let mut rows = Vec::new();
        {
            let table = self.txn.open_table(KEYSPACE)?;
            for entry in table.range(scan_origin(prefix, start)..)? {
                let (k, v) = entry?;
                if !k.value().starts_with(prefix) {
                    break;
                }
                rows.push((k.value().to_vec(), v.value().to_vec()));
            }
        }
        for (k, v) in rows {
            if !visit(&k, &v)? {
                break;
            }
        }
        Ok(())
    }
}

impl WriteTransaction for RedbWrite {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut table = self.txn.open_table(KEYSPACE)?;
        table.insert(key, value)?;
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        let mut table = self.txn.open_table(KEYSPACE)?;
        table.remove(key)?;
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        self.txn.commit()?;
        Ok(())
    }

    fn abort(self: Box<Self>) -> Result<()> {
        self.txn.abort()?;
        Ok(())
    }

    fn as_read(&self) -> &dyn ReadTransaction {
        self
    }
}

macro_rules! backend_error {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for DbError {
                fn from(err: $ty) -> Self {
                    DbError::backend(err)
                }
            }
        )*
    };
}

backend_error!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);
