use super::{
    EntryKind, ProgressCallback, RemoteEntry, RemoteFs, RemoteMeta, TransportError,
    TransportResult, CHUNK_SIZE,
};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use opendal::{layers::TimeoutLayer, Metakey, Operator};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

/// 单次操作超时（秒）
const OP_TIMEOUT_SECS: u64 = 300;

fn classify(path: &str, err: opendal::Error) -> TransportError {
    if err.kind() == opendal::ErrorKind::NotFound {
        TransportError::NotFound(path.to_string())
    } else if err.is_temporary() {
        TransportError::ConnectionLost(format!("{}: {}", path, err))
    } else {
        TransportError::Other(format!("{}: {}", path, err))
    }
}

/// 目录路径需要以 `/` 结尾
fn dir_path(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

fn parent_dir(path: &str) -> Option<String> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => None,
        Some(i) => Some(dir_path(&trimmed[..i])),
    }
}

enum Service {
    WebDav {
        endpoint: String,
        username: String,
        password: String,
        root: Option<String>,
    },
    Fs {
        root: String,
    },
}

/// 基于 OpenDAL 的连接器（WebDAV 服务器或本机目录）
pub struct OpendalConnector {
    service: Service,
    io_timeout: Duration,
}

impl OpendalConnector {
    pub fn webdav(endpoint: &str, username: &str, password: &str, root: Option<String>) -> Self {
        Self {
            service: Service::WebDav {
                endpoint: endpoint.to_string(),
                username: username.to_string(),
                password: password.to_string(),
                root,
            },
            io_timeout: Duration::from_secs(30),
        }
    }

    pub fn fs(root: &str) -> Self {
        Self {
            service: Service::Fs {
                root: root.to_string(),
            },
            io_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    /// 连接目标描述，同时用作传输句柄名称
    pub fn target(&self) -> String {
        match &self.service {
            Service::WebDav { endpoint, root, .. } => format!(
                "webdav://{}{}",
                endpoint.trim_end_matches('/'),
                root.as_deref()
                    .map(|r| format!("/{}", r.trim_start_matches('/')))
                    .unwrap_or_default()
            ),
            Service::Fs { root } => format!("fs://{}", root),
        }
    }

    fn build(&self) -> Result<(Operator, String)> {
        let timeout = TimeoutLayer::default()
            .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
            .with_io_timeout(self.io_timeout);

        match &self.service {
            Service::WebDav {
                endpoint,
                username,
                password,
                root,
            } => {
                use opendal::services::Webdav;

                let mut builder = Webdav::default()
                    .endpoint(endpoint)
                    .username(username)
                    .password(password);
                if let Some(ref r) = root {
                    builder = builder.root(r);
                }
                let operator = Operator::new(builder)?.layer(timeout).finish();
                Ok((operator, self.target()))
            }
            Service::Fs { root } => {
                use opendal::services::Fs;

                let operator = Operator::new(Fs::default().root(root))?
                    .layer(timeout)
                    .finish();
                Ok((operator, self.target()))
            }
        }
    }
}

#[async_trait]
impl super::Connector for OpendalConnector {
    async fn connect(&self) -> Result<Arc<dyn RemoteFs>> {
        let (operator, name) = self.build()?;
        // 连接时确认服务可达
        operator.stat("/").await?;
        Ok(Arc::new(OpendalTransport::new(operator, name)) as Arc<dyn RemoteFs>)
    }

    fn target(&self) -> String {
        OpendalConnector::target(self)
    }
}

pub struct OpendalTransport {
    operator: Operator,
    name: String,
    closed: AtomicBool,
}

impl OpendalTransport {
    pub fn new(operator: Operator, name: String) -> Self {
        Self {
            operator,
            name,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> TransportResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(TransportError::ConnectionLost(format!("{} 已关闭", self.name)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteFs for OpendalTransport {
    async fn stat(&self, path: &str) -> TransportResult<RemoteMeta> {
        self.ensure_open()?;
        let meta = self
            .operator
            .stat(path)
            .await
            .map_err(|e| classify(path, e))?;
        Ok(RemoteMeta {
            size: meta.content_length(),
            is_dir: meta.is_dir(),
        })
    }

    async fn list(&self, path: &str) -> TransportResult<Vec<RemoteEntry>> {
        self.ensure_open()?;
        let dir = dir_path(path);
        let mut lister = self
            .operator
            .lister_with(&dir)
            .metakey(Metakey::ContentLength | Metakey::Mode)
            .await
            .map_err(|e| classify(path, e))?;

        let own_path = dir.trim_matches('/').to_string();
        let mut entries = Vec::new();
        while let Some(entry) = lister.try_next().await.map_err(|e| classify(path, e))? {
            // 跳过目录自身
            if entry.path().trim_matches('/') == own_path {
                continue;
            }
            let meta = entry.metadata();
            let name = entry.name().trim_end_matches('/').to_string();
            if name.is_empty() {
                continue;
            }
            entries.push(RemoteEntry {
                name,
                kind: if meta.is_dir() {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                },
                size: meta.content_length(),
            });
        }
        Ok(entries)
    }

    async fn get(
        &self,
        remote: &str,
        local: &Path,
        progress: ProgressCallback,
    ) -> TransportResult<u64> {
        self.ensure_open()?;
        let total = self.stat(remote).await?.size;
        let local_name = local.display().to_string();
        let mut dest = tokio::fs::File::create(local)
            .await
            .map_err(|e| TransportError::from_io(&local_name, e))?;

        let mut offset = 0u64;
        while offset < total {
            let end = (offset + CHUNK_SIZE as u64).min(total);
            let chunk = self
                .operator
                .read_with(remote)
                .range(offset..end)
                .await
                .map_err(|e| classify(remote, e))?
                .to_vec();
            if chunk.is_empty() {
                return Err(TransportError::ConnectionLost(format!(
                    "{}: 读取在 {} 字节处提前结束",
                    remote, offset
                )));
            }
            dest.write_all(&chunk)
                .await
                .map_err(|e| TransportError::from_io(&local_name, e))?;
            offset += chunk.len() as u64;
            progress(offset, total);
        }
        dest.flush()
            .await
            .map_err(|e| TransportError::from_io(&local_name, e))?;
        Ok(offset)
    }

    async fn put(
        &self,
        local: &Path,
        remote: &str,
        progress: ProgressCallback,
    ) -> TransportResult<u64> {
        self.ensure_open()?;
        let local_name = local.display().to_string();
        let mut source = tokio::fs::File::open(local)
            .await
            .map_err(|e| TransportError::from_io(&local_name, e))?;
        let total = source
            .metadata()
            .await
            .map_err(|e| TransportError::from_io(&local_name, e))?
            .len();

        let mut writer = self
            .operator
            .writer(remote)
            .await
            .map_err(|e| classify(remote, e))?;

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut transferred = 0u64;
        loop {
            let n = source
                .read(&mut buf)
                .await
                .map_err(|e| TransportError::from_io(&local_name, e))?;
            if n == 0 {
                break;
            }
            writer
                .write(Bytes::copy_from_slice(&buf[..n]))
                .await
                .map_err(|e| classify(remote, e))?;
            transferred += n as u64;
            progress(transferred, total);
        }
        writer.close().await.map_err(|e| classify(remote, e))?;
        Ok(transferred)
    }

    async fn remove(&self, path: &str) -> TransportResult<()> {
        self.ensure_open()?;
        // delete 对不存在的路径也返回成功
        if !self.exists(path).await? {
            return Err(TransportError::NotFound(path.to_string()));
        }
        self.operator
            .delete(path)
            .await
            .map_err(|e| classify(path, e))
    }

    async fn mkdir(&self, path: &str) -> TransportResult<()> {
        self.ensure_open()?;
        // create_dir 会递归创建，这里保持单级语义
        if let Some(parent) = parent_dir(path) {
            if !self.exists(&parent).await? {
                return Err(TransportError::NotFound(parent));
            }
        }
        self.operator
            .create_dir(&dir_path(path))
            .await
            .map_err(|e| classify(path, e))
    }

    async fn keepalive(&self) -> TransportResult<()> {
        self.ensure_open()?;
        self.operator
            .stat("/")
            .await
            .map(|_| ())
            .map_err(|e| classify(&self.name, e))
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("已关闭: {}", self.name);
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
