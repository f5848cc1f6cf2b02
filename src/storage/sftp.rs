use super::{
    EntryKind, ProgressCallback, RemoteEntry, RemoteFs, RemoteMeta, TransportError,
    TransportResult, CHUNK_SIZE,
};
use crate::config::{Credentials, ServerConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use ssh2::{ErrorCode, Session, Sftp};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

// libssh2 会话层中表示链路已不可用的错误码
const SESSION_LOST_CODES: &[i32] = &[
    -1,  // SOCKET_NONE
    -7,  // SOCKET_SEND
    -9,  // TIMEOUT
    -13, // SOCKET_DISCONNECT
    -26, // CHANNEL_CLOSED
    -30, // SOCKET_TIMEOUT
    -43, // SOCKET_RECV
];

// SFTP 状态码
const SFTP_NO_SUCH_FILE: i32 = 2;
const SFTP_NO_CONNECTION: i32 = 6;
const SFTP_CONNECTION_LOST: i32 = 7;
const SFTP_NO_SUCH_PATH: i32 = 10;

/// 把 ssh2 错误分类为传输层错误
fn classify(path: &str, err: &ssh2::Error) -> TransportError {
    match err.code() {
        ErrorCode::SFTP(SFTP_NO_SUCH_FILE) | ErrorCode::SFTP(SFTP_NO_SUCH_PATH) => {
            TransportError::NotFound(path.to_string())
        }
        ErrorCode::SFTP(SFTP_NO_CONNECTION) | ErrorCode::SFTP(SFTP_CONNECTION_LOST) => {
            TransportError::ConnectionLost(format!("{}: {}", path, err))
        }
        ErrorCode::Session(code) if SESSION_LOST_CODES.contains(&code) => {
            TransportError::ConnectionLost(format!("{}: {}", path, err))
        }
        _ => TransportError::Other(format!("{}: {}", path, err)),
    }
}

/// 远程文件流的读写错误，优先按内部的 ssh2 错误分类
fn classify_io(path: &str, err: std::io::Error) -> TransportError {
    if let Some(inner) = err.get_ref().and_then(|e| e.downcast_ref::<ssh2::Error>()) {
        return classify(path, inner);
    }
    TransportError::from_io(path, err)
}

/// SFTP 连接器
pub struct SftpConnector {
    host: String,
    port: u16,
    username: String,
    credentials: Credentials,
    connect_timeout: Duration,
    keepalive_interval: u32,
}

impl SftpConnector {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            credentials: config.credentials()?,
            connect_timeout: Duration::from_secs(config.connect_timeout.max(1)),
            keepalive_interval: config.keepalive_interval.min(u32::MAX as u64) as u32,
        })
    }
}

#[async_trait]
impl super::Connector for SftpConnector {
    async fn connect(&self) -> Result<Arc<dyn RemoteFs>> {
        let host = self.host.clone();
        let port = self.port;
        let username = self.username.clone();
        let credentials = self.credentials.clone();
        let timeout = self.connect_timeout;
        let keepalive = self.keepalive_interval;

        let transport = tokio::task::spawn_blocking(move || {
            SftpTransport::open(&host, port, &username, &credentials, timeout, keepalive)
        })
        .await??;
        Ok(Arc::new(transport) as Arc<dyn RemoteFs>)
    }

    fn target(&self) -> String {
        format!("sftp://{}@{}:{}", self.username, self.host, self.port)
    }
}

/// SFTP 会话
///
/// 每次操作在阻塞线程池中打开新的 SFTP 通道，会话本身可跨操作复用。
pub struct SftpTransport {
    session: Arc<Mutex<Option<Session>>>,
    name: String,
}

impl SftpTransport {
    /// 建立 TCP 连接、完成握手与认证
    pub fn open(
        host: &str,
        port: u16,
        username: &str,
        credentials: &Credentials,
        timeout: Duration,
        keepalive_interval: u32,
    ) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        let socket_addr = addr
            .to_socket_addrs()
            .with_context(|| format!("解析地址失败: {}", addr))?
            .next()
            .ok_or_else(|| anyhow::anyhow!("地址无效: {}", addr))?;

        let tcp = TcpStream::connect_timeout(&socket_addr, timeout)
            .with_context(|| format!("TCP 连接 {} 失败", addr))?;

        let mut session = Session::new().context("创建 SSH 会话失败")?;
        session.set_tcp_stream(tcp);
        session.set_timeout(timeout.as_millis().min(u32::MAX as u128) as u32);
        session.handshake().context("SSH 握手失败")?;

        match credentials {
            Credentials::Password(password) => session
                .userauth_password(username, password)
                .context("密码认证失败")?,
            Credentials::PrivateKey { path, passphrase } => session
                .userauth_pubkey_file(username, None, path, passphrase.as_deref())
                .with_context(|| format!("私钥认证失败: {}", path.display()))?,
        }
        if !session.authenticated() {
            anyhow::bail!("认证失败: {}@{}", username, addr);
        }

        session.set_keepalive(keepalive_interval > 0, keepalive_interval);
        info!("SFTP 已认证: {}@{}", username, addr);

        Ok(Self {
            session: Arc::new(Mutex::new(Some(session))),
            name: format!("sftp://{}@{}", username, addr),
        })
    }

    fn current_session(&self) -> TransportResult<Session> {
        let guard = self
            .session
            .lock()
            .map_err(|_| TransportError::Other("会话锁已损坏".to_string()))?;
        guard
            .clone()
            .ok_or_else(|| TransportError::ConnectionLost(format!("{} 已关闭", self.name)))
    }

    /// 在阻塞线程池中打开 SFTP 通道并执行操作
    async fn with_sftp<T, F>(&self, path: &str, op: F) -> TransportResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Sftp) -> TransportResult<T> + Send + 'static,
    {
        let session = self.current_session()?;
        let path = path.to_string();
        tokio::task::spawn_blocking(move || {
            let sftp = session.sftp().map_err(|e| classify(&path, &e))?;
            op(&sftp)
        })
        .await
        .map_err(|e| TransportError::Other(format!("任务执行失败: {}", e)))?
    }
}

#[async_trait]
impl RemoteFs for SftpTransport {
    async fn stat(&self, path: &str) -> TransportResult<RemoteMeta> {
        let remote = path.to_string();
        self.with_sftp(path, move |sftp| {
            let stat = sftp
                .stat(Path::new(&remote))
                .map_err(|e| classify(&remote, &e))?;
            Ok(RemoteMeta {
                size: stat.size.unwrap_or(0),
                is_dir: stat.is_dir(),
            })
        })
        .await
    }

    async fn list(&self, path: &str) -> TransportResult<Vec<RemoteEntry>> {
        let remote = path.to_string();
        self.with_sftp(path, move |sftp| {
            let entries = sftp
                .readdir(Path::new(&remote))
                .map_err(|e| classify(&remote, &e))?;
            Ok(entries
                .into_iter()
                .filter_map(|(entry_path, stat)| {
                    let name = entry_path.file_name()?.to_string_lossy().to_string();
                    let kind = if stat.is_dir() {
                        EntryKind::Directory
                    } else if stat.is_file() {
                        EntryKind::File
                    } else {
                        debug!("跳过非常规文件: {}", entry_path.display());
                        return None;
                    };
                    Some(RemoteEntry {
                        name,
                        kind,
                        size: stat.size.unwrap_or(0),
                    })
                })
                .collect())
        })
        .await
    }

    async fn get(
        &self,
        remote: &str,
        local: &Path,
        progress: ProgressCallback,
    ) -> TransportResult<u64> {
        let remote_path = remote.to_string();
        let local_path: PathBuf = local.to_path_buf();
        self.with_sftp(remote, move |sftp| {
            let total = sftp
                .stat(Path::new(&remote_path))
                .map_err(|e| classify(&remote_path, &e))?
                .size
                .unwrap_or(0);
            let mut source = sftp
                .open(Path::new(&remote_path))
                .map_err(|e| classify(&remote_path, &e))?;

            let local_name = local_path.display().to_string();
            let mut dest = std::fs::File::create(&local_path)
                .map_err(|e| TransportError::from_io(&local_name, e))?;

            let mut buf = vec![0u8; CHUNK_SIZE];
            let mut transferred = 0u64;
            loop {
                let n = source
                    .read(&mut buf)
                    .map_err(|e| classify_io(&remote_path, e))?;
                if n == 0 {
                    break;
                }
                dest.write_all(&buf[..n])
                    .map_err(|e| TransportError::from_io(&local_name, e))?;
                transferred += n as u64;
                progress(transferred, total);
            }
            dest.flush()
                .map_err(|e| TransportError::from_io(&local_name, e))?;
            Ok(transferred)
        })
        .await
    }

    async fn put(
        &self,
        local: &Path,
        remote: &str,
        progress: ProgressCallback,
    ) -> TransportResult<u64> {
        let remote_path = remote.to_string();
        let local_path: PathBuf = local.to_path_buf();
        self.with_sftp(remote, move |sftp| {
            let local_name = local_path.display().to_string();
            let mut source = std::fs::File::open(&local_path)
                .map_err(|e| TransportError::from_io(&local_name, e))?;
            let total = source
                .metadata()
                .map_err(|e| TransportError::from_io(&local_name, e))?
                .len();

            let mut dest = sftp
                .create(Path::new(&remote_path))
                .map_err(|e| classify(&remote_path, &e))?;

            let mut buf = vec![0u8; CHUNK_SIZE];
            let mut transferred = 0u64;
            loop {
                let n = source
                    .read(&mut buf)
                    .map_err(|e| TransportError::from_io(&local_name, e))?;
                if n == 0 {
                    break;
                }
                dest.write_all(&buf[..n])
                    .map_err(|e| classify_io(&remote_path, e))?;
                transferred += n as u64;
                progress(transferred, total);
            }
            dest.flush().map_err(|e| classify_io(&remote_path, e))?;
            Ok(transferred)
        })
        .await
    }

    async fn remove(&self, path: &str) -> TransportResult<()> {
        let remote = path.to_string();
        self.with_sftp(path, move |sftp| {
            sftp.unlink(Path::new(&remote))
                .map_err(|e| classify(&remote, &e))
        })
        .await
    }

    async fn mkdir(&self, path: &str) -> TransportResult<()> {
        let remote = path.to_string();
        self.with_sftp(path, move |sftp| {
            sftp.mkdir(Path::new(&remote), 0o755)
                .map_err(|e| classify(&remote, &e))
        })
        .await
    }

    async fn keepalive(&self) -> TransportResult<()> {
        let session = self.current_session()?;
        let name = self.name.clone();
        tokio::task::spawn_blocking(move || {
            session
                .keepalive_send()
                .map(|_| ())
                .map_err(|e| classify(&name, &e))
        })
        .await
        .map_err(|e| TransportError::Other(format!("任务执行失败: {}", e)))?
    }

    async fn close(&self) {
        let session = match self.session.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(session) = session {
            let name = self.name.clone();
            let result = tokio::task::spawn_blocking(move || {
                session.disconnect(None, "closing", None)
            })
            .await;
            match result {
                Ok(Ok(())) => debug!("已关闭会话: {}", name),
                Ok(Err(e)) => warn!("关闭会话失败 {}: {}", name, e),
                Err(e) => warn!("关闭会话失败 {}: {}", name, e),
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
