//! 同步引擎错误类型

use crate::storage::TransportError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

/// 同步过程中的错误分类
///
/// - `ConnectionLost`：放弃当前轮次，阻塞重连后下一轮重新扫描
/// - `NotFound` / `MalformedName`：只影响单个文件，记录后继续
/// - `ConfigurationFatal`：停止运行循环
/// - `Other`：保守处理，两边文件都保留
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("连接已断开: {0}")]
    ConnectionLost(String),
    #[error("路径不存在: {0}")]
    NotFound(String),
    #[error("文件格式有误: {name}，格式应为 {suffix}")]
    MalformedName { name: String, suffix: String },
    #[error("配置错误: {0}")]
    ConfigurationFatal(String),
    #[error("操作已取消")]
    Cancelled,
    #[error("{0}")]
    Other(String),
}

impl SyncError {
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, SyncError::ConnectionLost(_))
    }
}

impl From<TransportError> for SyncError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::NotFound(p) => SyncError::NotFound(p),
            TransportError::ConnectionLost(r) => SyncError::ConnectionLost(r),
            TransportError::Other(r) => SyncError::Other(r),
        }
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(e: tokio::task::JoinError) -> Self {
        SyncError::Other(format!("任务执行失败: {}", e))
    }
}
