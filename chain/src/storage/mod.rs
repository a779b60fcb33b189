pub mod conversions;
pub mod snapshot;
pub mod store;
pub mod tables;

pub use snapshot::{StateBackend, StateSnapshot, StateWriter};
pub use store::ChainStore;
