use std::{ops::Range, path::Path, sync::Arc};

use rocksdb::{DB, IteratorMode, Options, ReadOptions, WriteBatch};
use tracing::debug;

use crate::error::Error;

use super::{
    encdec::Decode,
    table::{Table, TableIterator},
};

/// Thin handle over an embedded rocksdb store holding typed tables.
#[derive(Clone)]
pub struct StorageHandler {
    pub db: Arc<DB>,
}

impl StorageHandler {
    pub fn open(path: &Path) -> Result<Self, Error> {
        debug!("opening kv store at {}", path.display());

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);

        let db = DB::open(&db_opts, path)?;

        Ok(Self { db: Arc::new(db) })
    }

    pub fn get<T>(&self, key: &T::Key) -> Result<Option<T::Value>, Error>
    where
        T: Table,
    {
        self.db
            .get(T::encode_key(key))?
            .map(|x| T::Value::decode_all(&x).map_err(|e| e.into()))
            .transpose()
    }

    pub fn iter<T: Table>(&self, range: Range<Vec<u8>>) -> TableIterator<'_, T> {
        let mut read_opts = ReadOptions::default();
        read_opts.set_iterate_range(range);

        let iter = self.db.iterator_opt(IteratorMode::Start, read_opts);

        TableIterator::<T>::new(iter)
    }

    pub fn write(&self, batch: WriteBatch) -> Result<(), Error> {
        self.db.write(batch)?;
        Ok(())
    }

    pub fn flush(&self) -> Result<(), Error> {
        self.db.flush()?;
        Ok(())
    }
}
