pub mod admission;
pub mod config;
pub mod error;
pub mod session;
pub mod store;

// Re-export common error type
pub use error::{BtmuxError, Result};
pub use store::SessionStore;
