pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use config::{Config, SyncDirection, SyncJob};
pub use core::{ConnectionSupervisor, PassReport, SyncEngine};
pub use error::{Result, SyncError};
