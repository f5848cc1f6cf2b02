//! 单文件传输 - 上传/下载、进度节流与失败分类

use crate::config::SyncDirection;
use crate::core::supervisor::ConnectionSupervisor;
use crate::storage::{ProgressCallback, TransportError, TransportResult};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// 默认进度输出间隔
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// 单个文件传输加校验的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// 传输完成且校验通过，源文件已删除
    Completed,
    /// 目标已是最新，源文件已删除
    Skipped,
    /// 保留在原处，下一轮重试
    Failed,
}

/// 进度节流器
///
/// 每个间隔最多输出一次进度，最后一个字节到达时总会输出。
pub struct ProgressThrottle {
    label: String,
    interval: Duration,
    last_emit: Mutex<Option<Instant>>,
}

impl ProgressThrottle {
    pub fn new(label: impl Into<String>, interval: Duration) -> Self {
        Self {
            label: label.into(),
            interval,
            last_emit: Mutex::new(None),
        }
    }

    /// 判断本次进度是否需要输出，需要时记录输出时间
    pub fn should_emit(&self, transferred: u64, total: u64) -> bool {
        let now = Instant::now();
        let mut last = match self.last_emit.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let finished = total > 0 && transferred >= total;
        let due = match *last {
            None => true,
            Some(at) => now.duration_since(at) >= self.interval,
        };
        if due || finished {
            *last = Some(now);
            true
        } else {
            false
        }
    }

    /// 生成交给传输层的进度回调
    pub fn callback(self: Arc<Self>) -> ProgressCallback {
        Arc::new(move |transferred, total| {
            if self.should_emit(transferred, total) {
                let percent = if total > 0 {
                    transferred as f64 * 100.0 / total as f64
                } else {
                    100.0
                };
                info!(
                    "{} 进度: {:.1}% ({}/{} 字节)",
                    self.label, percent, transferred, total
                );
            }
        })
    }
}

/// 传输执行器
///
/// 每次传输时从连接管理器借用句柄，不在传输之间保存。
pub struct TransferExecutor<'a> {
    supervisor: &'a ConnectionSupervisor,
    direction: SyncDirection,
    progress_interval: Duration,
}

impl<'a> TransferExecutor<'a> {
    pub fn new(supervisor: &'a ConnectionSupervisor, direction: SyncDirection) -> Self {
        Self {
            supervisor,
            direction,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// 按同步方向传输一个文件，目标总是从头写入
    ///
    /// 连接断开时通知连接管理器，由调用方放弃本轮并等待重连。
    pub async fn transfer(&self, local: &Path, remote: &str) -> TransportResult<u64> {
        let handle = self.supervisor.handle().await?;
        let (from, to) = match self.direction {
            SyncDirection::Upload => (local.display().to_string(), remote.to_string()),
            SyncDirection::Download => (remote.to_string(), local.display().to_string()),
        };
        let file_name = Path::new(&from)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| from.clone());

        info!("开始{}: {} -> {}", self.direction, from, to);
        let throttle = Arc::new(ProgressThrottle::new(
            format!("{} {}", self.direction, file_name),
            self.progress_interval,
        ));
        let started = Instant::now();

        let result = match self.direction {
            SyncDirection::Upload => handle.put(local, remote, throttle.callback()).await,
            SyncDirection::Download => handle.get(remote, local, throttle.callback()).await,
        };

        match result {
            Ok(bytes) => {
                let elapsed = started.elapsed().as_secs_f64();
                let speed = if elapsed > 0.0 {
                    bytes as f64 / elapsed / 1024.0
                } else {
                    0.0
                };
                info!(
                    "{}完成: {} ({} 字节, {:.2}s, {:.1} KB/s)",
                    self.direction, file_name, bytes, elapsed, speed
                );
                Ok(bytes)
            }
            Err(e) => {
                match &e {
                    TransportError::ConnectionLost(reason) => {
                        error!("{}中断: {} - {}", self.direction, file_name, reason);
                        self.supervisor.report_lost(reason).await;
                    }
                    TransportError::NotFound(path) => {
                        warn!("{}失败，路径不存在: {}", self.direction, path);
                    }
                    TransportError::Other(reason) => {
                        error!("{}失败: {} - {}", self.direction, file_name, reason);
                    }
                }
                debug!("传输耗时 {:.2}s 后失败", started.elapsed().as_secs_f64());
                Err(e)
            }
        }
    }
}
