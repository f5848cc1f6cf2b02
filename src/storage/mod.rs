#[cfg(test)]
pub mod memory;
pub mod sftp;
pub mod webdav;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

pub use sftp::{SftpConnector, SftpTransport};
pub use webdav::{OpendalConnector, OpendalTransport};

// ============ 公共常量 ============

/// 单次读写的块大小（字节）
pub const CHUNK_SIZE: usize = 32 * 1024;

/// 传输层错误，区分"连接断开"与"路径不存在"
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("路径不存在: {0}")]
    NotFound(String),
    #[error("连接已断开: {0}")]
    ConnectionLost(String),
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, TransportError::ConnectionLost(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TransportError::NotFound(_))
    }

    /// 按 io 错误类型分类（本地文件与远程文件流共用）
    pub fn from_io(path: &str, err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => TransportError::NotFound(path.to_string()),
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::TimedOut
            | ErrorKind::UnexpectedEof
            | ErrorKind::NotConnected => TransportError::ConnectionLost(format!("{}: {}", path, err)),
            _ => TransportError::Other(format!("{}: {}", path, err)),
        }
    }
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// 条目类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// 目录列表中的一项
#[derive(Debug, Clone)]
pub struct RemoteEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
}

/// 远程文件元数据
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteMeta {
    pub size: u64,
    pub is_dir: bool,
}

/// 传输进度回调：(已传输字节, 总字节)
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// 远程文件访问接口
///
/// 实现不要求支持并发调用，所有操作由同步引擎串行发起。
#[async_trait]
pub trait RemoteFs: Send + Sync {
    /// 获取文件元数据，不存在时返回 `NotFound`
    async fn stat(&self, path: &str) -> TransportResult<RemoteMeta>;

    /// 列出目录下的直接子项（不递归，不含 `.` 与 `..`）
    async fn list(&self, path: &str) -> TransportResult<Vec<RemoteEntry>>;

    /// 下载远程文件到本地，总是从头写入本地文件，返回写入的字节数
    async fn get(&self, remote: &str, local: &Path, progress: ProgressCallback)
        -> TransportResult<u64>;

    /// 上传本地文件到远程，总是从头写入远程文件，返回写入的字节数
    async fn put(&self, local: &Path, remote: &str, progress: ProgressCallback)
        -> TransportResult<u64>;

    /// 删除远程文件
    async fn remove(&self, path: &str) -> TransportResult<()>;

    /// 创建单级目录，父目录不存在时返回 `NotFound`
    async fn mkdir(&self, path: &str) -> TransportResult<()>;

    /// 检查路径是否存在
    async fn exists(&self, path: &str) -> TransportResult<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(TransportError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// 发送保活包
    async fn keepalive(&self) -> TransportResult<()> {
        Ok(())
    }

    /// 关闭会话，可重复调用
    async fn close(&self) {}

    /// 获取连接名称（用于日志）
    fn name(&self) -> &str;
}

/// 创建传输句柄的连接器，由连接管理器独占使用
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> anyhow::Result<Arc<dyn RemoteFs>>;

    /// 连接目标描述（用于日志）
    fn target(&self) -> String;
}

/// 根据配置创建连接器
pub fn create_connector(config: &crate::config::ServerConfig) -> anyhow::Result<Box<dyn Connector>> {
    match config.backend {
        crate::config::Backend::Sftp => {
            tracing::info!("初始化 SFTP 连接器: {}:{}", config.host, config.port);
            Ok(Box::new(SftpConnector::new(config)?) as Box<dyn Connector>)
        }
        crate::config::Backend::WebDav => {
            let endpoint = config
                .endpoint
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("WebDAV backend requires endpoint"))?;
            tracing::info!("初始化 WebDAV 连接器: endpoint={}, root={:?}", endpoint, config.root);
            Ok(Box::new(OpendalConnector::webdav(
                endpoint,
                &config.username,
                config.password.as_deref().unwrap_or_default(),
                config.root.clone(),
            )
            .with_timeout(std::time::Duration::from_secs(config.connect_timeout.max(1))))
                as Box<dyn Connector>)
        }
        crate::config::Backend::Fs => {
            let root = config
                .root
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("fs backend requires root"))?;
            tracing::info!("初始化目录连接器: root={}", root);
            Ok(Box::new(
                OpendalConnector::fs(root)
                    .with_timeout(std::time::Duration::from_secs(config.connect_timeout.max(1))),
            ) as Box<dyn Connector>)
        }
    }
}
