pub mod batch;
pub mod error;
pub mod fallback;
pub mod registry;
pub mod schema;
pub mod script;
pub mod snapshot;
pub mod store;

pub use error::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Default window size for safe batch iteration.
pub const BATCH_SIZE: usize = 1000;
