//! 内存中的远程存储，用于测试：可模拟连接失败与传输中途断线

use super::{
    Connector, EntryKind, ProgressCallback, RemoteEntry, RemoteFs, RemoteMeta, TransportError,
    TransportResult,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct ServerState {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    /// 还能成功完成的传输次数，用尽后下一次传输中途断线
    transfers_before_loss: Option<usize>,
    /// 路径 -> 还能成功的 stat 次数，用尽后下一次 stat 返回普通错误
    stat_faults: BTreeMap<String, usize>,
    /// 操作记录，如 `put:/in/a.tar.gz`
    ops: Vec<String>,
}

/// 多个连接共享的"服务器"
#[derive(Debug, Clone, Default)]
pub struct MemoryServer {
    state: Arc<Mutex<ServerState>>,
}

fn clean(path: &str) -> String {
    let path = path.replace('\\', "/");
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(i) => path[..i].to_string(),
        None => "/".to_string(),
    }
}

fn name_of(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

impl MemoryServer {
    pub fn new() -> Self {
        let server = Self::default();
        server.state.lock().unwrap().dirs.insert("/".to_string());
        server
    }

    /// 写入文件，自动创建上级目录
    pub fn insert_file(&self, path: &str, data: Vec<u8>) {
        let path = clean(path);
        let mut state = self.state.lock().unwrap();
        let mut parent = parent_of(&path);
        while parent != "/" {
            state.dirs.insert(parent.clone());
            parent = parent_of(&parent);
        }
        state.files.insert(path, data);
    }

    /// 创建目录（含上级目录）
    pub fn insert_dir(&self, path: &str) {
        let mut path = clean(path);
        let mut state = self.state.lock().unwrap();
        while path != "/" {
            state.dirs.insert(path.clone());
            path = parent_of(&path);
        }
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(&clean(path)).cloned()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.state.lock().unwrap().dirs.contains(&clean(path))
    }

    /// 允许再完成 `count` 次传输，之后的一次传输写到一半时断线
    pub fn lose_connection_after(&self, count: usize) {
        self.state.lock().unwrap().transfers_before_loss = Some(count);
    }

    /// 允许 `path` 再成功 stat `count` 次，之后的一次 stat 失败（非断线）
    pub fn fail_stat_after(&self, path: &str, count: usize) {
        self.state.lock().unwrap().stat_faults.insert(clean(path), count);
    }

    pub fn ops(&self) -> Vec<String> {
        self.state.lock().unwrap().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state.lock().unwrap().ops.clear();
    }

    /// 本次传输是否应当中途断线
    fn take_transfer_fault(state: &mut ServerState) -> bool {
        match state.transfers_before_loss {
            Some(0) => {
                state.transfers_before_loss = None;
                true
            }
            Some(n) => {
                state.transfers_before_loss = Some(n - 1);
                false
            }
            None => false,
        }
    }
}

/// 到 `MemoryServer` 的一个连接
pub struct MemoryTransport {
    server: MemoryServer,
    connected: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::attach(MemoryServer::new())
    }

    pub fn attach(server: MemoryServer) -> Self {
        Self {
            server,
            connected: AtomicBool::new(true),
        }
    }

    pub fn server(&self) -> &MemoryServer {
        &self.server
    }

    pub fn insert_file(&self, path: &str, data: Vec<u8>) {
        self.server.insert_file(path, data);
    }

    /// 模拟链路断开
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn check(&self) -> TransportResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::ConnectionLost("memory link down".to_string()))
        }
    }

    fn record(&self, op: &str, path: &str) {
        self.server.state.lock().unwrap().ops.push(format!("{}:{}", op, path));
    }
}

#[async_trait]
impl RemoteFs for MemoryTransport {
    async fn stat(&self, path: &str) -> TransportResult<RemoteMeta> {
        self.check()?;
        let path = clean(path);
        self.record("stat", &path);
        let mut state = self.server.state.lock().unwrap();
        match state.stat_faults.get(&path).copied() {
            Some(0) => {
                state.stat_faults.remove(&path);
                return Err(TransportError::Other(format!("权限不足: {}", path)));
            }
            Some(n) => {
                state.stat_faults.insert(path.clone(), n - 1);
            }
            None => {}
        }
        if let Some(data) = state.files.get(&path) {
            return Ok(RemoteMeta {
                size: data.len() as u64,
                is_dir: false,
            });
        }
        if state.dirs.contains(&path) {
            return Ok(RemoteMeta { size: 0, is_dir: true });
        }
        Err(TransportError::NotFound(path))
    }

    async fn list(&self, path: &str) -> TransportResult<Vec<RemoteEntry>> {
        self.check()?;
        let path = clean(path);
        self.record("list", &path);
        let state = self.server.state.lock().unwrap();
        if !state.dirs.contains(&path) {
            return Err(TransportError::NotFound(path));
        }

        let mut entries: Vec<RemoteEntry> = state
            .dirs
            .iter()
            .filter(|d| d.as_str() != "/" && parent_of(d) == path)
            .map(|d| RemoteEntry {
                name: name_of(d),
                kind: EntryKind::Directory,
                size: 0,
            })
            .collect();
        entries.extend(
            state
                .files
                .iter()
                .filter(|(f, _)| parent_of(f) == path)
                .map(|(f, data)| RemoteEntry {
                    name: name_of(f),
                    kind: EntryKind::File,
                    size: data.len() as u64,
                }),
        );
        Ok(entries)
    }

    async fn get(
        &self,
        remote: &str,
        local: &Path,
        progress: ProgressCallback,
    ) -> TransportResult<u64> {
        self.check()?;
        let remote = clean(remote);
        self.record("get", &remote);
        let (data, fault) = {
            let mut state = self.server.state.lock().unwrap();
            let data = state
                .files
                .get(&remote)
                .cloned()
                .ok_or_else(|| TransportError::NotFound(remote.clone()))?;
            (data, MemoryServer::take_transfer_fault(&mut state))
        };

        let total = data.len() as u64;
        let written = if fault { &data[..data.len() / 2] } else { &data[..] };
        tokio::fs::write(local, written)
            .await
            .map_err(|e| TransportError::from_io(&local.display().to_string(), e))?;
        progress(written.len() as u64, total);

        if fault {
            self.disconnect();
            return Err(TransportError::ConnectionLost(format!("下载中断: {}", remote)));
        }
        Ok(total)
    }

    async fn put(
        &self,
        local: &Path,
        remote: &str,
        progress: ProgressCallback,
    ) -> TransportResult<u64> {
        self.check()?;
        let remote = clean(remote);
        self.record("put", &remote);
        let data = tokio::fs::read(local)
            .await
            .map_err(|e| TransportError::from_io(&local.display().to_string(), e))?;
        let total = data.len() as u64;

        let fault = {
            let mut state = self.server.state.lock().unwrap();
            if !state.dirs.contains(&parent_of(&remote)) {
                return Err(TransportError::NotFound(remote));
            }
            let fault = MemoryServer::take_transfer_fault(&mut state);
            let stored = if fault {
                data[..data.len() / 2].to_vec()
            } else {
                data
            };
            progress(stored.len() as u64, total);
            state.files.insert(remote.clone(), stored);
            fault
        };

        if fault {
            self.disconnect();
            return Err(TransportError::ConnectionLost(format!("上传中断: {}", remote)));
        }
        Ok(total)
    }

    async fn remove(&self, path: &str) -> TransportResult<()> {
        self.check()?;
        let path = clean(path);
        self.record("remove", &path);
        let mut state = self.server.state.lock().unwrap();
        match state.files.remove(&path) {
            Some(_) => Ok(()),
            None => Err(TransportError::NotFound(path)),
        }
    }

    async fn mkdir(&self, path: &str) -> TransportResult<()> {
        self.check()?;
        let path = clean(path);
        self.record("mkdir", &path);
        let mut state = self.server.state.lock().unwrap();
        if !state.dirs.contains(&parent_of(&path)) {
            return Err(TransportError::NotFound(path));
        }
        if state.dirs.contains(&path) || state.files.contains_key(&path) {
            return Err(TransportError::Other(format!("已存在: {}", path)));
        }
        state.dirs.insert(path);
        Ok(())
    }

    async fn keepalive(&self) -> TransportResult<()> {
        self.check()?;
        self.record("keepalive", "");
        Ok(())
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// 连接 `MemoryServer` 的连接器，可让前若干次连接失败
pub struct MemoryConnector {
    server: MemoryServer,
    failures_left: AtomicUsize,
    attempts: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn new(server: MemoryServer) -> Self {
        Self {
            server,
            failures_left: AtomicUsize::new(0),
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 接下来的 `count` 次连接都会失败
    pub fn fail_next(self, count: usize) -> Self {
        self.failures_left.store(count, Ordering::SeqCst);
        self
    }

    /// 连接尝试次数计数器
    pub fn attempts(&self) -> Arc<AtomicUsize> {
        self.attempts.clone()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> anyhow::Result<Arc<dyn RemoteFs>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            anyhow::bail!("connection refused");
        }
        Ok(Arc::new(MemoryTransport::attach(self.server.clone())) as Arc<dyn RemoteFs>)
    }

    fn target(&self) -> String {
        "memory://test".to_string()
    }
}
