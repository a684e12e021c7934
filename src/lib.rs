pub use storage::encdec::CodecError;

pub mod client;
pub mod engine;
mod error;
pub mod indexers;
pub mod queue;
pub mod storage;
pub mod sync;
pub mod types;
pub mod wallet;

pub use engine::{Engine, EngineConfig};
pub use error::Error;
pub use types::Outpoint;
