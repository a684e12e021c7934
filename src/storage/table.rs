use std::{marker::PhantomData, ops::Range};

use rocksdb::DB;

use crate::error::Error;

use super::encdec::{Decode, Encode};

/// Common trait with basic table requirements
pub trait Table {
    /// Single byte namespacing the table's keys within the store
    const TABLE_ID: u8;
    /// Key type for the table.
    type Key: Encode + Decode;
    /// Value type for the table.
    type Value: Encode + Decode;

    /// Encodes the full key including the table prefix
    fn encode_key(key: &Self::Key) -> Vec<u8> {
        let mut out = vec![Self::TABLE_ID];
        key.encode_into(&mut out);
        out
    }

    /// Encodes a range with optional start and end bounds
    fn encode_range(start: Option<&impl Encode>, to: Option<&impl Encode>) -> Range<Vec<u8>> {
        let mut start_key = vec![Self::TABLE_ID];
        if let Some(start) = start {
            start.encode_into(&mut start_key);
        }

        let end_key = match to {
            Some(to) => {
                let mut end = vec![Self::TABLE_ID];
                to.encode_into(&mut end);
                end
            }
            None => Self::full_range().end,
        };

        start_key..end_key
    }

    /// Full range covering every key of this table
    fn full_range() -> Range<Vec<u8>> {
        super::encdec::prefix_range(&[Self::TABLE_ID])
    }
}

#[macro_export]
macro_rules! define_table {
    {
        name: $name:ident,
        key_type: $key_type:ty,
        value_type: $value_type:ty,
        table: $table_id:expr
    } => {
        pub struct $name;

        impl $crate::storage::table::Table for $name {
            const TABLE_ID: u8 = $table_id;
            type Key = $key_type;
            type Value = $value_type;
        }
    };
}

type RocksIterator<'a> = rocksdb::DBIteratorWithThreadMode<'a, DB>;

pub struct TableIterator<'a, T>(RocksIterator<'a>, PhantomData<T>);

impl<'a, T> TableIterator<'a, T> {
    pub fn new(inner: RocksIterator<'a>) -> Self {
        Self(inner, Default::default())
    }
}

impl<T> Iterator for TableIterator<'_, T>
where
    T: Table,
{
    type Item = Result<(T::Key, T::Value), Error>;

    fn next(&mut self) -> Option<Result<(T::Key, T::Value), Error>> {
        match self.0.next() {
            Some(Ok((key, value))) => {
                let key_out = match T::Key::decode_all(&key[1..]) {
                    Ok(k) => k,
                    Err(e) => return Some(Err(e.into())),
                };

                let value_out = match T::Value::decode_all(&value[..]) {
                    Ok(v) => v,
                    Err(e) => return Some(Err(e.into())),
                };

                Some(Ok((key_out, value_out)))
            }
            Some(Err(err)) => Some(Err(err.into())),
            None => None,
        }
    }
}
