use crate::config::SyncDirection;
use crate::storage::{RemoteFs, TransportError, TransportResult};
use std::path::Path;
use tracing::debug;

/// 文件比较结果（以同步方向的"源"为主语）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqualityResult {
    /// 大小相同
    Equal,
    /// 源文件更大（目标可能是未传完的残留）
    SourceLarger,
    /// 源文件更小
    SourceSmaller,
    /// 任意一边获取大小失败
    Incomparable,
}

impl EqualityResult {
    /// 按大小计算比较结果
    pub fn from_sizes(source_size: u64, dest_size: u64) -> Self {
        use std::cmp::Ordering;
        match source_size.cmp(&dest_size) {
            Ordering::Equal => EqualityResult::Equal,
            Ordering::Greater => EqualityResult::SourceLarger,
            Ordering::Less => EqualityResult::SourceSmaller,
        }
    }
}

/// 文件比较器
///
/// 只比较字节大小，不计算校验和：大小相同但内容不同的两个文件会被视为相同，
/// 这是为了速度而接受的误判。
pub struct FileComparator {
    direction: SyncDirection,
}

impl FileComparator {
    pub fn new(direction: SyncDirection) -> Self {
        Self { direction }
    }

    /// 比较本地文件和远程文件
    ///
    /// 只有连接断开会作为错误返回，其余获取大小失败的情况都视为 `Incomparable`。
    pub async fn compare(
        &self,
        remote_fs: &dyn RemoteFs,
        local_path: &Path,
        remote_path: &str,
    ) -> TransportResult<EqualityResult> {
        let local_size = match tokio::fs::metadata(local_path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                debug!("获取本地文件大小失败: {} - {}", local_path.display(), e);
                return Ok(EqualityResult::Incomparable);
            }
        };

        let remote_size = match remote_fs.stat(remote_path).await {
            Ok(meta) => meta.size,
            Err(e @ TransportError::ConnectionLost(_)) => return Err(e),
            Err(e) => {
                debug!("获取远程文件大小失败: {} - {}", remote_path, e);
                return Ok(EqualityResult::Incomparable);
            }
        };

        let result = match self.direction {
            SyncDirection::Upload => EqualityResult::from_sizes(local_size, remote_size),
            SyncDirection::Download => EqualityResult::from_sizes(remote_size, local_size),
        };

        debug!(
            "比较文件大小: local={} ({}), remote={} ({}) -> {:?}",
            local_path.display(),
            local_size,
            remote_path,
            remote_size,
            result
        );
        Ok(result)
    }
}
