pub mod config;
pub mod connectors;
pub mod corpus;
pub mod db;
pub mod error;
pub mod models;
pub mod normalize;
pub mod output;
pub mod store;
pub mod sync;

pub use error::{SyncError, SyncResult};
