pub mod comparator;
pub mod engine;
pub mod path;
pub mod reconciler;
pub mod scanner;
pub mod supervisor;
pub mod transfer;

pub use comparator::{EqualityResult, FileComparator};
pub use engine::SyncEngine;
pub use path::{join_remote, normalize, RemoteOs};
pub use reconciler::{PassReport, Reconciler};
pub use scanner::{FileScanner, TreeNode};
pub use supervisor::{ConnectionState, ConnectionSupervisor};
pub use transfer::{ProgressThrottle, TransferExecutor, TransferOutcome};

use crate::error::{Result, SyncError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 可被取消的等待
pub(crate) async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> Result<()> {
    if duration.is_zero() {
        return if cancel.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        };
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
