//! 目录树对账 - 逐文件决定传输、跳过或覆盖，校验通过后才删除源文件

use crate::config::{SyncDirection, SyncJob};
use crate::core::comparator::{EqualityResult, FileComparator};
use crate::core::path::{join_remote, normalize};
use crate::core::scanner::TreeNode;
use crate::core::sleep_or_cancel;
use crate::core::supervisor::ConnectionSupervisor;
use crate::core::transfer::{TransferExecutor, TransferOutcome, DEFAULT_PROGRESS_INTERVAL};
use crate::error::{Result, SyncError};
use crate::storage::{RemoteFs, TransportError};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 单轮同步统计
#[derive(Debug, Clone)]
pub struct PassReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// 传输并校验通过
    pub transferred: usize,
    /// 目标已是最新，直接删除源文件
    pub skipped: usize,
    /// 保留原处等待下一轮
    pub failed: usize,
    /// 文件名不符合后缀要求
    pub quarantined: usize,
    /// 目标比源文件大，两边都保留
    pub divergent: usize,
    pub dirs_created: usize,
    pub bytes: u64,
}

impl PassReport {
    pub fn begin() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            transferred: 0,
            skipped: 0,
            failed: 0,
            quarantined: 0,
            divergent: 0,
            dirs_created: 0,
            bytes: 0,
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// 本轮是否改动了任何一边
    pub fn changed_anything(&self) -> bool {
        self.transferred > 0 || self.skipped > 0 || self.dirs_created > 0
    }

    fn record(&mut self, outcome: TransferOutcome) {
        match outcome {
            TransferOutcome::Completed => self.transferred += 1,
            TransferOutcome::Skipped => self.skipped += 1,
            TransferOutcome::Failed => self.failed += 1,
        }
    }

    pub fn log_summary(&self, pass: u64) {
        let elapsed = self
            .finished_at
            .map(|end| (end - self.started_at).num_milliseconds() as f64 / 1000.0)
            .unwrap_or_default();
        info!(
            "第 {} 轮同步完成: 传输 {}, 跳过 {}, 失败 {}, 格式错误 {}, 不一致 {}, 新建目录 {}, {} 字节, 耗时 {:.2}s",
            pass,
            self.transferred,
            self.skipped,
            self.failed,
            self.quarantined,
            self.divergent,
            self.dirs_created,
            self.bytes,
            elapsed
        );
    }
}

/// 同一条目在本地与远程两侧的路径
#[derive(Debug, Clone)]
struct Location {
    local: PathBuf,
    remote: String,
}

/// 对账器
///
/// 深度优先遍历源目录树：非空目录先确保目标目录存在再进入，空目录忽略；
/// 文件只有在目标校验大小一致后才删除源文件。
pub struct Reconciler<'a> {
    supervisor: &'a ConnectionSupervisor,
    job: &'a SyncJob,
    cancel: CancellationToken,
    comparator: FileComparator,
    progress_interval: Duration,
}

impl<'a> Reconciler<'a> {
    pub fn new(supervisor: &'a ConnectionSupervisor, job: &'a SyncJob, cancel: CancellationToken) -> Self {
        Self {
            supervisor,
            job,
            cancel,
            comparator: FileComparator::new(job.direction),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// 对账一棵源目录树
    ///
    /// 连接断开或取消时立即返回错误，本轮放弃；单个文件的其他错误只记录。
    pub async fn reconcile(&self, source: &TreeNode) -> Result<PassReport> {
        let mut report = PassReport::begin();
        let root = Location {
            local: self.job.local_root.clone(),
            remote: normalize(&self.job.remote_root, self.job.remote_os),
        };

        if let Some(children) = source.children() {
            self.walk(children, root, &mut report).await?;
        }

        report.finish();
        Ok(report)
    }

    fn walk<'b>(
        &'b self,
        children: &'b BTreeMap<String, TreeNode>,
        location: Location,
        report: &'b mut PassReport,
    ) -> BoxFuture<'b, Result<()>> {
        Box::pin(async move {
            for (name, node) in children {
                let child = Location {
                    local: location.local.join(name),
                    remote: join_remote(&location.remote, name, self.job.remote_os),
                };

                match node {
                    TreeNode::Directory { children, .. } => {
                        if children.is_empty() {
                            debug!("跳过空目录: {}", name);
                            continue;
                        }
                        match self.ensure_dest_dir(&child).await {
                            Ok(created) => {
                                if created {
                                    report.dirs_created += 1;
                                }
                            }
                            Err(e @ (SyncError::ConnectionLost(_) | SyncError::Cancelled)) => {
                                return Err(e)
                            }
                            Err(e) => {
                                error!("创建目标目录失败，跳过该目录: {} - {}", self.dest_display(&child), e);
                                continue;
                            }
                        }
                        self.walk(children, child, report).await?;
                    }
                    TreeNode::File { name, .. } => {
                        self.process_file(name, &child, report).await?;
                    }
                }
            }
            Ok(())
        })
    }

    async fn process_file(&self, name: &str, location: &Location, report: &mut PassReport) -> Result<()> {
        if !name.ends_with(&self.job.file_suffix) {
            let err = SyncError::MalformedName {
                name: self.source_display(location),
                suffix: self.job.file_suffix.clone(),
            };
            warn!("{}", err);
            report.quarantined += 1;
            return Ok(());
        }

        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let outcome = match self.reconcile_file(location, report).await {
            Ok(outcome) => outcome,
            Err(e @ (SyncError::ConnectionLost(_) | SyncError::Cancelled)) => return Err(e),
            Err(e) => {
                warn!("处理文件失败，保留两边文件: {} - {}", self.source_display(location), e);
                TransferOutcome::Failed
            }
        };
        report.record(outcome);

        if outcome != TransferOutcome::Skipped {
            sleep_or_cancel(&self.cancel, self.job.file_interval).await?;
        }
        Ok(())
    }

    async fn reconcile_file(&self, location: &Location, report: &mut PassReport) -> Result<TransferOutcome> {
        let handle = self.handle().await?;

        if self.dest_exists(handle.as_ref(), location).await? {
            match self.compare(handle.as_ref(), location).await? {
                EqualityResult::Equal => {
                    info!("目标文件已存在且大小一致，删除源文件: {}", self.source_display(location));
                    self.remove_source(handle.as_ref(), location).await?;
                    return Ok(TransferOutcome::Skipped);
                }
                EqualityResult::SourceLarger => {
                    info!("目标文件不完整，删除后重新传输: {}", self.dest_display(location));
                    self.remove_dest(handle.as_ref(), location).await?;
                }
                // 旧版脚本在这里会删除源文件；只有大小一致才允许删除，这里两边都保留
                EqualityResult::SourceSmaller => {
                    warn!(
                        "目标文件比源文件大，两边都保留: {} / {}",
                        self.source_display(location),
                        self.dest_display(location)
                    );
                    report.divergent += 1;
                    return Ok(TransferOutcome::Failed);
                }
                EqualityResult::Incomparable => {
                    warn!("无法比较文件大小，稍后重试: {}", self.source_display(location));
                    return Ok(TransferOutcome::Failed);
                }
            }
        }
        drop(handle);

        self.transfer_and_verify(location, report).await
    }

    /// 传输后重新比较，只有大小一致才删除源文件
    async fn transfer_and_verify(&self, location: &Location, report: &mut PassReport) -> Result<TransferOutcome> {
        let executor = TransferExecutor::new(self.supervisor, self.job.direction)
            .with_progress_interval(self.progress_interval);
        let bytes = executor.transfer(&location.local, &location.remote).await?;

        let handle = self.handle().await?;
        match self.compare(handle.as_ref(), location).await? {
            EqualityResult::Equal => {
                self.remove_source(handle.as_ref(), location).await?;
                info!("校验通过，已删除源文件: {}", self.source_display(location));
                report.bytes += bytes;
                Ok(TransferOutcome::Completed)
            }
            other => {
                warn!("传输后校验不一致 ({:?})，保留源文件: {}", other, self.source_display(location));
                Ok(TransferOutcome::Failed)
            }
        }
    }

    async fn handle(&self) -> Result<Arc<dyn RemoteFs>> {
        match self.supervisor.handle().await {
            Ok(handle) => Ok(handle),
            Err(e) => Err(self.escalate(e).await),
        }
    }

    /// 连接断开时通知连接管理器
    async fn escalate(&self, err: TransportError) -> SyncError {
        if let TransportError::ConnectionLost(reason) = &err {
            self.supervisor.report_lost(reason).await;
        }
        err.into()
    }

    async fn compare(&self, handle: &dyn RemoteFs, location: &Location) -> Result<EqualityResult> {
        match self
            .comparator
            .compare(handle, &location.local, &location.remote)
            .await
        {
            Ok(result) => Ok(result),
            Err(e) => Err(self.escalate(e).await),
        }
    }

    async fn dest_exists(&self, handle: &dyn RemoteFs, location: &Location) -> Result<bool> {
        match self.job.direction {
            SyncDirection::Upload => match handle.exists(&location.remote).await {
                Ok(exists) => Ok(exists),
                Err(e) => Err(self.escalate(e).await),
            },
            SyncDirection::Download => tokio::fs::try_exists(&location.local)
                .await
                .map_err(|e| local_error(&location.local, e)),
        }
    }

    /// 确保目标目录存在，返回是否新建
    async fn ensure_dest_dir(&self, location: &Location) -> Result<bool> {
        match self.job.direction {
            SyncDirection::Upload => {
                let handle = self.handle().await?;
                match handle.exists(&location.remote).await {
                    Ok(true) => return Ok(false),
                    Ok(false) => {}
                    Err(e) => return Err(self.escalate(e).await),
                }
                match handle.mkdir(&location.remote).await {
                    Ok(()) => {
                        info!("已创建远程目录: {}", location.remote);
                        Ok(true)
                    }
                    Err(e) => Err(self.escalate(e).await),
                }
            }
            SyncDirection::Download => {
                let path = &location.local;
                if tokio::fs::try_exists(path)
                    .await
                    .map_err(|e| local_error(path, e))?
                {
                    return Ok(false);
                }
                tokio::fs::create_dir(path)
                    .await
                    .map_err(|e| local_error(path, e))?;
                info!("已创建本地目录: {}", path.display());
                Ok(true)
            }
        }
    }

    async fn remove_source(&self, handle: &dyn RemoteFs, location: &Location) -> Result<()> {
        match self.job.direction {
            SyncDirection::Upload => remove_local(&location.local).await,
            SyncDirection::Download => self.remove_remote(handle, &location.remote).await,
        }
    }

    async fn remove_dest(&self, handle: &dyn RemoteFs, location: &Location) -> Result<()> {
        match self.job.direction {
            SyncDirection::Upload => self.remove_remote(handle, &location.remote).await,
            SyncDirection::Download => remove_local(&location.local).await,
        }
    }

    async fn remove_remote(&self, handle: &dyn RemoteFs, path: &str) -> Result<()> {
        match handle.remove(path).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.escalate(e).await),
        }
    }

    fn source_display(&self, location: &Location) -> String {
        match self.job.direction {
            SyncDirection::Upload => location.local.display().to_string(),
            SyncDirection::Download => location.remote.clone(),
        }
    }

    fn dest_display(&self, location: &Location) -> String {
        match self.job.direction {
            SyncDirection::Upload => location.remote.clone(),
            SyncDirection::Download => location.local.display().to_string(),
        }
    }
}

async fn remove_local(path: &Path) -> Result<()> {
    tokio::fs::remove_file(path)
        .await
        .map_err(|e| local_error(path, e))
}

/// 本地磁盘错误不代表连接问题
fn local_error(path: &Path, err: std::io::Error) -> SyncError {
    if err.kind() == std::io::ErrorKind::NotFound {
        SyncError::NotFound(path.display().to_string())
    } else {
        SyncError::Other(format!("{}: {}", path.display(), err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::path::RemoteOs;
    use crate::core::scanner::FileScanner;
    use crate::core::supervisor::ConnectionState;
    use crate::storage::memory::{MemoryConnector, MemoryServer};

    fn job(direction: SyncDirection, local_root: &Path, remote_root: &str) -> SyncJob {
        SyncJob {
            direction,
            local_root: local_root.to_path_buf(),
            remote_root: remote_root.to_string(),
            file_suffix: ".tar.gz".to_string(),
            remote_os: RemoteOs::Unix,
            scan_interval: Duration::ZERO,
            file_interval: Duration::ZERO,
            keepalive_interval: Duration::ZERO,
            max_depth: 64,
        }
    }

    async fn connected(server: &MemoryServer) -> ConnectionSupervisor {
        let supervisor = ConnectionSupervisor::new(
            Box::new(MemoryConnector::new(server.clone())),
            Duration::from_millis(1),
            CancellationToken::new(),
        );
        supervisor.connect().await.unwrap();
        supervisor
    }

    /// 扫描源目录后执行一轮对账
    async fn pass(supervisor: &ConnectionSupervisor, job: &SyncJob) -> Result<PassReport> {
        let scanner = FileScanner::new(job.max_depth);
        let tree = match job.direction {
            SyncDirection::Upload => scanner.scan_local(&job.local_root).await?,
            SyncDirection::Download => {
                let handle = supervisor.handle().await?;
                scanner
                    .scan_remote(handle.as_ref(), &job.remote_root, job.remote_os)
                    .await?
            }
        };
        Reconciler::new(supervisor, job, CancellationToken::new())
            .reconcile(&tree)
            .await
    }

    /// 每个 remove:X 之前紧挨着 stat:X
    fn assert_verified_before_remove(ops: &[String]) {
        for (i, op) in ops.iter().enumerate() {
            if let Some(path) = op.strip_prefix("remove:") {
                assert!(i > 0, "remove without prior stat: {}", op);
                assert_eq!(ops[i - 1], format!("stat:{}", path), "ops: {:?}", ops);
            }
        }
    }

    #[tokio::test]
    async fn test_upload_scenario() {
        let server = MemoryServer::new();
        server.insert_dir("/in");
        let supervisor = connected(&server).await;

        let local = tempfile::tempdir().unwrap();
        std::fs::write(local.path().join("a.tar.gz"), vec![5u8; 100]).unwrap();
        let job = job(SyncDirection::Upload, local.path(), "/in");

        let first = pass(&supervisor, &job).await.unwrap();
        assert_eq!(first.transferred, 1);
        assert_eq!(first.bytes, 100);
        assert!(!local.path().join("a.tar.gz").exists());
        assert_eq!(server.file("/in/a.tar.gz").unwrap().len(), 100);

        server.clear_ops();
        let second = pass(&supervisor, &job).await.unwrap();
        assert_eq!(second.transferred, 0);
        assert!(!second.changed_anything());
        assert!(server.ops().iter().all(|op| !op.starts_with("put:") && !op.starts_with("remove:")));
    }

    #[tokio::test]
    async fn test_download_nested_tree_verifies_before_remove() {
        let server = MemoryServer::new();
        server.insert_file("/out/a.tar.gz", vec![1u8; 10]);
        server.insert_file("/out/2023/05/b.tar.gz", vec![2u8; 20]);
        server.insert_file("/out/2023/c.tar.gz", vec![3u8; 30]);
        let supervisor = connected(&server).await;

        let local = tempfile::tempdir().unwrap();
        let job = job(SyncDirection::Download, local.path(), "/out");

        let report = pass(&supervisor, &job).await.unwrap();
        assert_eq!(report.transferred, 3);
        assert_eq!(report.dirs_created, 2);
        assert_eq!(std::fs::read(local.path().join("2023/05/b.tar.gz")).unwrap(), vec![2u8; 20]);
        assert_eq!(std::fs::metadata(local.path().join("2023/c.tar.gz")).unwrap().len(), 30);
        assert!(server.file("/out/a.tar.gz").is_none());
        assert!(server.file("/out/2023/05/b.tar.gz").is_none());
        assert_verified_before_remove(&server.ops());
    }

    #[tokio::test]
    async fn test_existing_equal_destination_only_removes_source() {
        let server = MemoryServer::new();
        server.insert_file("/out/a.tar.gz", vec![1u8; 10]);
        let supervisor = connected(&server).await;

        let local = tempfile::tempdir().unwrap();
        std::fs::write(local.path().join("a.tar.gz"), vec![1u8; 10]).unwrap();
        let job = job(SyncDirection::Download, local.path(), "/out");

        let report = pass(&supervisor, &job).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.transferred, 0);
        assert!(server.file("/out/a.tar.gz").is_none());
        assert!(!server.ops().iter().any(|op| op.starts_with("get:")));
        assert_verified_before_remove(&server.ops());
    }

    #[tokio::test]
    async fn test_partial_destination_is_replaced() {
        let server = MemoryServer::new();
        server.insert_file("/in/a.tar.gz", vec![0u8; 40]);
        let supervisor = connected(&server).await;

        let local = tempfile::tempdir().unwrap();
        std::fs::write(local.path().join("a.tar.gz"), vec![7u8; 100]).unwrap();
        let job = job(SyncDirection::Upload, local.path(), "/in");

        let report = pass(&supervisor, &job).await.unwrap();
        assert_eq!(report.transferred, 1);
        assert_eq!(server.file("/in/a.tar.gz").unwrap(), vec![7u8; 100]);
        assert!(!local.path().join("a.tar.gz").exists());

        let ops = server.ops();
        let removed = ops.iter().position(|op| op == "remove:/in/a.tar.gz").unwrap();
        let put = ops.iter().position(|op| op == "put:/in/a.tar.gz").unwrap();
        assert!(removed < put);
    }

    #[tokio::test]
    async fn test_larger_destination_keeps_both() {
        let server = MemoryServer::new();
        server.insert_file("/in/a.tar.gz", vec![0u8; 200]);
        let supervisor = connected(&server).await;

        let local = tempfile::tempdir().unwrap();
        std::fs::write(local.path().join("a.tar.gz"), vec![7u8; 100]).unwrap();
        let job = job(SyncDirection::Upload, local.path(), "/in");

        let report = pass(&supervisor, &job).await.unwrap();
        assert_eq!(report.divergent, 1);
        assert_eq!(report.failed, 1);
        assert!(local.path().join("a.tar.gz").exists());
        assert_eq!(server.file("/in/a.tar.gz").unwrap().len(), 200);
    }

    #[tokio::test]
    async fn test_partial_local_download_is_replaced() {
        let server = MemoryServer::new();
        server.insert_file("/out/a.tar.gz", vec![9u8; 100]);
        let supervisor = connected(&server).await;

        let local = tempfile::tempdir().unwrap();
        std::fs::write(local.path().join("a.tar.gz"), vec![0u8; 40]).unwrap();
        let job = job(SyncDirection::Download, local.path(), "/out");

        let report = pass(&supervisor, &job).await.unwrap();
        assert_eq!(report.transferred, 1);
        assert_eq!(report.bytes, 100);
        assert_eq!(std::fs::read(local.path().join("a.tar.gz")).unwrap(), vec![9u8; 100]);
        assert!(server.file("/out/a.tar.gz").is_none());
        assert_verified_before_remove(&server.ops());
    }

    #[tokio::test]
    async fn test_incomparable_destination_keeps_both() {
        let server = MemoryServer::new();
        server.insert_file("/in/a.tar.gz", vec![0u8; 40]);
        // 存在性检查成功，比较大小时失败
        server.fail_stat_after("/in/a.tar.gz", 1);
        let supervisor = connected(&server).await;

        let local = tempfile::tempdir().unwrap();
        std::fs::write(local.path().join("a.tar.gz"), vec![7u8; 100]).unwrap();
        let job = job(SyncDirection::Upload, local.path(), "/in");

        let report = pass(&supervisor, &job).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.divergent, 0);
        assert_eq!(report.transferred, 0);
        assert!(local.path().join("a.tar.gz").exists());
        assert_eq!(server.file("/in/a.tar.gz").unwrap().len(), 40);
        assert!(server
            .ops()
            .iter()
            .all(|op| !op.starts_with("remove:") && !op.starts_with("put:")));
        assert_eq!(supervisor.state().await, ConnectionState::Connected);

        // 下一轮可以正常比较，残留文件被替换
        let report = pass(&supervisor, &job).await.unwrap();
        assert_eq!(report.transferred, 1);
        assert_eq!(server.file("/in/a.tar.gz").unwrap(), vec![7u8; 100]);
        assert!(!local.path().join("a.tar.gz").exists());
    }

    #[tokio::test]
    async fn test_malformed_names_are_quarantined() {
        let server = MemoryServer::new();
        server.insert_dir("/in");
        let supervisor = connected(&server).await;

        let local = tempfile::tempdir().unwrap();
        std::fs::write(local.path().join("report.txt"), b"hello").unwrap();
        let job = job(SyncDirection::Upload, local.path(), "/in");

        for _ in 0..3 {
            let report = pass(&supervisor, &job).await.unwrap();
            assert_eq!(report.quarantined, 1);
            assert_eq!(report.transferred, 0);
        }
        assert!(local.path().join("report.txt").exists());
        assert!(server.file("/in/report.txt").is_none());
        assert!(server.ops().iter().all(|op| !op.contains("report.txt")));
    }

    #[tokio::test]
    async fn test_empty_directory_is_ignored() {
        let server = MemoryServer::new();
        server.insert_dir("/in");
        let supervisor = connected(&server).await;

        let local = tempfile::tempdir().unwrap();
        std::fs::create_dir(local.path().join("empty")).unwrap();
        let job = job(SyncDirection::Upload, local.path(), "/in");

        let report = pass(&supervisor, &job).await.unwrap();
        assert_eq!(report.dirs_created, 0);
        assert!(!server.has_dir("/in/empty"));
        assert!(server.ops().iter().all(|op| !op.starts_with("mkdir:")));
    }

    #[tokio::test]
    async fn test_directory_created_before_transfer() {
        let server = MemoryServer::new();
        server.insert_dir("/in");
        let supervisor = connected(&server).await;

        let local = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(local.path().join("sub")).unwrap();
        std::fs::write(local.path().join("sub/a.tar.gz"), vec![1u8; 8]).unwrap();
        let job = job(SyncDirection::Upload, local.path(), "/in");

        let report = pass(&supervisor, &job).await.unwrap();
        assert_eq!(report.dirs_created, 1);
        let ops = server.ops();
        let mkdir = ops.iter().position(|op| op == "mkdir:/in/sub").unwrap();
        let put = ops.iter().position(|op| op == "put:/in/sub/a.tar.gz").unwrap();
        assert!(mkdir < put);
    }

    #[tokio::test]
    async fn test_connection_loss_abandons_pass_and_next_pass_recovers() {
        let server = MemoryServer::new();
        server.insert_dir("/in");
        server.lose_connection_after(0);
        let supervisor = connected(&server).await;

        let local = tempfile::tempdir().unwrap();
        std::fs::write(local.path().join("a.tar.gz"), vec![3u8; 100]).unwrap();
        std::fs::write(local.path().join("b.tar.gz"), vec![4u8; 60]).unwrap();
        let job = job(SyncDirection::Upload, local.path(), "/in");

        let err = pass(&supervisor, &job).await.unwrap_err();
        assert!(err.is_connection_lost());
        assert_eq!(supervisor.state().await, ConnectionState::Disconnected);
        assert!(local.path().join("a.tar.gz").exists());
        assert!(local.path().join("b.tar.gz").exists());
        assert!(server.file("/in/b.tar.gz").is_none());

        supervisor.reconnect().await.unwrap();
        let report = pass(&supervisor, &job).await.unwrap();
        assert_eq!(report.transferred, 2);
        assert_eq!(server.file("/in/a.tar.gz").unwrap(), vec![3u8; 100]);
        assert!(!local.path().join("a.tar.gz").exists());
    }

    #[tokio::test]
    async fn test_cancelled_before_file() {
        let server = MemoryServer::new();
        server.insert_dir("/in");
        let supervisor = connected(&server).await;

        let local = tempfile::tempdir().unwrap();
        std::fs::write(local.path().join("a.tar.gz"), vec![1u8; 8]).unwrap();
        let job = job(SyncDirection::Upload, local.path(), "/in");
        let tree = FileScanner::new(64).scan_local(local.path()).await.unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let result = Reconciler::new(&supervisor, &job, token).reconcile(&tree).await;
        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert!(server.ops().iter().all(|op| !op.starts_with("put:")));
    }
}
