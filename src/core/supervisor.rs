//! 连接管理 - 独占传输句柄的创建、关闭与重连

use crate::core::sleep_or_cancel;
use crate::error::Result;
use crate::storage::{Connector, RemoteFs, TransportError, TransportResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Reconnecting,
}

struct Slot {
    state: ConnectionState,
    handle: Option<Arc<dyn RemoteFs>>,
}

/// 连接管理器
///
/// 唯一可以创建、关闭或替换传输句柄的组件。其他组件通过 [`handle`](Self::handle)
/// 在单次操作期间借用句柄，不跨重连保存。
pub struct ConnectionSupervisor {
    connector: Box<dyn Connector>,
    slot: RwLock<Slot>,
    retry_delay: Duration,
    cancel: CancellationToken,
    attempts: AtomicU64,
}

impl ConnectionSupervisor {
    pub fn new(connector: Box<dyn Connector>, retry_delay: Duration, cancel: CancellationToken) -> Self {
        Self {
            connector,
            slot: RwLock::new(Slot {
                state: ConnectionState::Disconnected,
                handle: None,
            }),
            retry_delay,
            cancel,
            attempts: AtomicU64::new(0),
        }
    }

    pub async fn state(&self) -> ConnectionState {
        self.slot.read().await.state
    }

    /// 累计连接尝试次数
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// 借用当前传输句柄，未连接时返回 `ConnectionLost`
    pub async fn handle(&self) -> TransportResult<Arc<dyn RemoteFs>> {
        let slot = self.slot.read().await;
        match (&slot.state, &slot.handle) {
            (ConnectionState::Connected, Some(handle)) => Ok(handle.clone()),
            _ => Err(TransportError::ConnectionLost(format!(
                "未连接到 {}",
                self.connector.target()
            ))),
        }
    }

    /// 建立连接，失败则等待后进入重连循环
    ///
    /// 只有在取消时才会返回错误。
    pub async fn connect(&self) -> Result<()> {
        match self.try_connect().await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("连接 {} 失败: {:#}", self.connector.target(), e);
                info!("将在{}秒后重连服务器...", self.retry_delay.as_secs_f64());
                sleep_or_cancel(&self.cancel, self.retry_delay).await?;
                self.reconnect().await
            }
        }
    }

    /// 关闭旧句柄并不断重试，直到连接成功或被取消
    ///
    /// 认证失败与网络失败同样处理，都会继续重试。
    pub async fn reconnect(&self) -> Result<()> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(crate::error::SyncError::Cancelled);
            }

            self.close_stale(ConnectionState::Reconnecting).await;

            match self.try_connect().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    error!("重连 {} 失败: {:#}", self.connector.target(), e);
                    info!("将在{}秒后重连服务器...", self.retry_delay.as_secs_f64());
                    sleep_or_cancel(&self.cancel, self.retry_delay).await?;
                }
            }
        }
    }

    /// 断开连接，可重复调用
    pub async fn disconnect(&self) {
        let had_handle = self.close_stale(ConnectionState::Disconnected).await;
        if had_handle {
            info!("已断开与服务器 {} 的连接", self.connector.target());
        }
    }

    /// 标记连接已丢失，等待调用方发起重连
    pub async fn report_lost(&self, reason: &str) {
        let mut slot = self.slot.write().await;
        if slot.state == ConnectionState::Connected {
            warn!("检测到连接断开: {}", reason);
            slot.state = ConnectionState::Disconnected;
        }
    }

    async fn try_connect(&self) -> anyhow::Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        info!("正在连接 {} (第 {} 次尝试)", self.connector.target(), attempt);

        let handle = self.connector.connect().await?;
        let name = handle.name().to_string();

        let mut slot = self.slot.write().await;
        slot.handle = Some(handle);
        slot.state = ConnectionState::Connected;
        info!("连接服务器成功: {}", name);
        Ok(())
    }

    /// 关闭旧句柄，返回之前是否持有句柄
    async fn close_stale(&self, next_state: ConnectionState) -> bool {
        let stale = {
            let mut slot = self.slot.write().await;
            slot.state = next_state;
            slot.handle.take()
        };
        match stale {
            Some(handle) => {
                handle.close().await;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::storage::memory::{MemoryConnector, MemoryServer};

    const FAST: Duration = Duration::from_millis(1);

    #[tokio::test]
    async fn test_connect_retries_until_success() {
        let connector = MemoryConnector::new(MemoryServer::new()).fail_next(3);
        let attempts = connector.attempts();
        let supervisor = ConnectionSupervisor::new(Box::new(connector), FAST, CancellationToken::new());

        assert_eq!(supervisor.state().await, ConnectionState::Disconnected);
        assert!(matches!(supervisor.handle().await, Err(e) if e.is_connection_lost()));

        supervisor.connect().await.unwrap();
        assert_eq!(supervisor.state().await, ConnectionState::Connected);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(supervisor.attempts(), 4);
        assert!(supervisor.handle().await.is_ok());
    }

    #[tokio::test]
    async fn test_reconnect_replaces_handle() {
        let server = MemoryServer::new();
        server.insert_file("/in/a.tar.gz", vec![1, 2, 3]);
        let supervisor = ConnectionSupervisor::new(
            Box::new(MemoryConnector::new(server)),
            FAST,
            CancellationToken::new(),
        );
        supervisor.connect().await.unwrap();

        let old = supervisor.handle().await.unwrap();
        supervisor.report_lost("test").await;
        assert_eq!(supervisor.state().await, ConnectionState::Disconnected);
        assert!(supervisor.handle().await.is_err());

        supervisor.reconnect().await.unwrap();
        // 旧句柄在重连时被关闭
        assert!(old.stat("/in/a.tar.gz").await.unwrap_err().is_connection_lost());
        let new = supervisor.handle().await.unwrap();
        assert_eq!(new.stat("/in/a.tar.gz").await.unwrap().size, 3);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let supervisor = ConnectionSupervisor::new(
            Box::new(MemoryConnector::new(MemoryServer::new())),
            FAST,
            CancellationToken::new(),
        );
        supervisor.disconnect().await;
        supervisor.connect().await.unwrap();
        supervisor.disconnect().await;
        supervisor.disconnect().await;
        assert_eq!(supervisor.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_reconnect_stops_when_cancelled() {
        let token = CancellationToken::new();
        let connector = MemoryConnector::new(MemoryServer::new()).fail_next(usize::MAX);
        let supervisor = Arc::new(ConnectionSupervisor::new(
            Box::new(connector),
            Duration::from_millis(10),
            token.clone(),
        ));

        let task = {
            let supervisor = supervisor.clone();
            tokio::spawn(async move { supervisor.reconnect().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert!(supervisor.attempts() >= 1);
    }
}
