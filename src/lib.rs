pub mod cli;
pub mod config;
pub mod highlight;
pub mod search;
pub mod storage;

pub use config::{AppConfig, ConfigLoader, ConfigPaths};
pub use search::{ChatSearchCoordinator, SearchState};
pub use storage::StorageHandle;
