use thiserror::Error;

use crate::{client::ApiError, storage::encdec::CodecError};

#[derive(Error, Debug)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("malformed outpoint: {0}")]
    MalformedOutpoint(String),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("rocksdb error: {0}")]
    Rocks(#[from] rocksdb::Error),

    #[error("sqlite error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("indexer api error: {0}")]
    Api(#[from] ApiError),

    #[error("transaction decode error: {0}")]
    TxEncoding(#[from] bitcoin::consensus::encode::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("spend verification failed: {0}")]
    Verification(String),

    #[error("broadcast rejected: {0}")]
    Broadcast(String),

    #[error("{0}")]
    Custom(String),
}

impl Error {
    pub fn config(msg: impl ToString) -> Error {
        Error::Config(msg.to_string())
    }

    pub fn storage(msg: impl ToString) -> Error {
        Error::Storage(msg.to_string())
    }

    pub fn custom(msg: impl ToString) -> Error {
        Error::Custom(msg.to_string())
    }
}
