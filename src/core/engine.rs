use crate::config::{SyncDirection, SyncJob};
use crate::core::path::normalize;
use crate::core::reconciler::{PassReport, Reconciler};
use crate::core::scanner::FileScanner;
use crate::core::sleep_or_cancel;
use crate::core::supervisor::ConnectionSupervisor;
use crate::core::transfer::DEFAULT_PROGRESS_INTERVAL;
use crate::error::{Result, SyncError};
use crate::storage::{RemoteFs, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 同步引擎
///
/// 单个工作循环：扫描源目录、确认目标根目录、对账、休眠，周而复始。
/// 任何未处理的错误都会触发重连，然后继续下一轮。
pub struct SyncEngine {
    supervisor: Arc<ConnectionSupervisor>,
    job: SyncJob,
    cancel: CancellationToken,
    scanner: FileScanner,
    progress_interval: Duration,
}

impl SyncEngine {
    pub fn new(supervisor: Arc<ConnectionSupervisor>, job: SyncJob, cancel: CancellationToken) -> Self {
        let scanner = FileScanner::with_cancel(job.max_depth, cancel.clone());
        Self {
            supervisor,
            job,
            cancel,
            scanner,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// 运行同步循环，直到取消或遇到致命配置错误
    pub async fn run(&self) -> Result<()> {
        info!(
            "启动{}模式: 本地 {} <-> 远程 {}",
            self.job.direction,
            self.job.local_root.display(),
            self.job.remote_root
        );

        match self.supervisor.connect().await {
            Ok(()) => {}
            Err(SyncError::Cancelled) => return Ok(()),
            Err(e) => return Err(e),
        }

        let mut pass = 0u64;
        loop {
            pass += 1;
            debug!("开始第 {} 轮同步", pass);

            let result = match self.run_pass().await {
                Ok(report) => {
                    report.log_summary(pass);
                    self.idle().await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {}
                Err(SyncError::Cancelled) => break,
                Err(SyncError::ConfigurationFatal(msg)) => {
                    error!("配置错误，停止同步: {}", msg);
                    return Err(SyncError::ConfigurationFatal(msg));
                }
                Err(e) => {
                    error!("第 {} 轮同步出错: {}", pass, e);
                    if self.recover(&e).await.is_err() {
                        break;
                    }
                    // 非连接问题重连后也不会消失，等一个扫描间隔再试
                    if !e.is_connection_lost() && self.idle().await.is_err() {
                        break;
                    }
                }
            }
        }

        info!("同步已停止");
        Ok(())
    }

    /// 执行一轮同步
    pub async fn run_pass(&self) -> Result<PassReport> {
        let handle = self.handle().await?;

        let scanned = match self.job.direction {
            SyncDirection::Upload => self.scanner.scan_local(&self.job.local_root).await,
            SyncDirection::Download => {
                self.scanner
                    .scan_remote(handle.as_ref(), &self.remote_root(), self.job.remote_os)
                    .await
            }
        };
        let tree = match scanned {
            Ok(tree) => tree,
            Err(SyncError::NotFound(path)) => {
                warn!("源目录不存在: {}", path);
                return Ok(finished(PassReport::begin()));
            }
            Err(e) => return Err(e),
        };

        if tree.file_count() == 0 {
            info!("源目录为空，没有需要{}的文件", self.job.direction);
            return Ok(finished(PassReport::begin()));
        }

        let created = self.ensure_dest_root(handle.as_ref()).await?;
        drop(handle);

        let mut report = Reconciler::new(&self.supervisor, &self.job, self.cancel.clone())
            .with_progress_interval(self.progress_interval)
            .reconcile(&tree)
            .await?;
        if created {
            report.dirs_created += 1;
        }
        Ok(report)
    }

    fn remote_root(&self) -> String {
        normalize(&self.job.remote_root, self.job.remote_os)
    }

    async fn handle(&self) -> Result<Arc<dyn RemoteFs>> {
        Ok(self.supervisor.handle().await?)
    }

    /// 目标根目录不存在时创建；上级目录也不存在属于配置错误
    async fn ensure_dest_root(&self, handle: &dyn RemoteFs) -> Result<bool> {
        match self.job.direction {
            SyncDirection::Upload => {
                let root = self.remote_root();
                if handle.exists(&root).await? {
                    return Ok(false);
                }
                info!("远程目录不存在，正在创建: {}", root);
                match handle.mkdir(&root).await {
                    Ok(()) => Ok(true),
                    Err(TransportError::NotFound(_)) => Err(SyncError::ConfigurationFatal(format!(
                        "远程目录的上级目录不存在: {}",
                        root
                    ))),
                    Err(e) => Err(e.into()),
                }
            }
            SyncDirection::Download => {
                let root = &self.job.local_root;
                let exists = tokio::fs::try_exists(root)
                    .await
                    .map_err(|e| SyncError::Other(format!("{}: {}", root.display(), e)))?;
                if exists {
                    return Ok(false);
                }
                info!("本地目录不存在，正在创建: {}", root.display());
                match tokio::fs::create_dir(root).await {
                    Ok(()) => Ok(true),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(
                        SyncError::ConfigurationFatal(format!("本地目录的上级目录不存在: {}", root.display())),
                    ),
                    Err(e) => Err(SyncError::Other(format!("{}: {}", root.display(), e))),
                }
            }
        }
    }

    /// 两轮之间休眠，按保活间隔切片并发送保活包
    async fn idle(&self) -> Result<()> {
        let keepalive = self.job.keepalive_interval;
        let mut remaining = self.job.scan_interval;
        debug!("等待 {:.1}s 后开始下一轮", remaining.as_secs_f64());

        while !remaining.is_zero() {
            let slice = if keepalive.is_zero() {
                remaining
            } else {
                remaining.min(keepalive)
            };
            sleep_or_cancel(&self.cancel, slice).await?;
            remaining -= slice;

            if !keepalive.is_zero() && slice == keepalive {
                let handle = self.handle().await?;
                handle.keepalive().await?;
                debug!("已发送保活包: {}", handle.name());
            }
        }
        sleep_or_cancel(&self.cancel, Duration::ZERO).await
    }

    /// 出错后阻塞重连，只有取消时返回错误
    async fn recover(&self, err: &SyncError) -> Result<()> {
        self.supervisor.report_lost(&err.to_string()).await;
        info!("正在重新连接服务器...");
        self.supervisor.reconnect().await
    }
}

fn finished(mut report: PassReport) -> PassReport {
    report.finish();
    report
}
