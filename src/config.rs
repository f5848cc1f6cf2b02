//! 应用配置模块

use crate::core::path::RemoteOs;
use crate::logging::LogConfig;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 运行模式（同步方向）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    /// 本地 -> 远程
    Upload,
    /// 远程 -> 本地
    Download,
}

impl std::fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncDirection::Upload => write!(f, "上传"),
            SyncDirection::Download => write!(f, "下载"),
        }
    }
}

/// 远程后端类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Sftp,
    WebDav,
    Fs,
}

/// 登录凭据（密码与私钥二选一）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Password(String),
    PrivateKey {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

/// 远程服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_backend")]
    pub backend: Backend,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key_passphrase: Option<String>,
    /// WebDAV 地址
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// WebDAV / fs 根目录
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    /// 保活间隔（秒），0 表示不发送
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval: u64,
    /// 建立 TCP 连接超时（秒）
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    /// 重连间隔（秒）
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay: u64,
    /// 远程服务器使用的路径风格
    #[serde(default)]
    pub remote_os: RemoteOs,
}

/// 单个方向的同步配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectionConfig {
    pub local_path: String,
    pub remote_path: String,
    /// 只处理以此后缀结尾的文件
    #[serde(default = "default_file_suffix")]
    pub file_suffix: String,
    /// 每轮扫描之间的间隔（秒）
    #[serde(default = "default_scan_interval")]
    pub scan_interval: u64,
    /// 每个文件传输之间的间隔（秒）
    #[serde(default = "default_file_interval")]
    pub file_interval: u64,
}

/// 完整配置文件
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub mode: SyncDirection,
    pub server: ServerConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload: Option<DirectionConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download: Option<DirectionConfig>,
    /// 递归扫描的最大深度
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_backend() -> Backend {
    Backend::Sftp
}

fn default_port() -> u16 {
    22
}

fn default_keepalive_interval() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_reconnect_delay() -> u64 {
    5
}

fn default_file_suffix() -> String {
    ".tar.gz".to_string()
}

fn default_scan_interval() -> u64 {
    10
}

fn default_file_interval() -> u64 {
    1
}

fn default_max_depth() -> usize {
    64
}

/// 一个同步任务在运行期需要的全部参数
#[derive(Debug, Clone)]
pub struct SyncJob {
    pub direction: SyncDirection,
    pub local_root: PathBuf,
    pub remote_root: String,
    pub file_suffix: String,
    pub remote_os: RemoteOs,
    pub scan_interval: Duration,
    pub file_interval: Duration,
    pub keepalive_interval: Duration,
    pub max_depth: usize,
}

impl Config {
    /// 从配置文件加载并校验
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        let config = Self::from_json(&content)
            .with_context(|| format!("解析配置文件失败: {}", path.display()))?;
        Ok(config)
    }

    /// 只读取日志配置，文件缺失或无法解析时使用默认值
    pub fn load_log_config(path: &Path) -> LogConfig {
        fs::read_to_string(path)
            .map(|content| Self::log_config_from_json(&content))
            .unwrap_or_default()
    }

    /// 不做完整校验，其余字段缺失或错误都不影响日志配置
    pub fn log_config_from_json(content: &str) -> LogConfig {
        #[derive(Deserialize)]
        struct LogSection {
            #[serde(default)]
            log: LogConfig,
        }

        serde_json::from_str::<LogSection>(content)
            .map(|section| section.log)
            .unwrap_or_default()
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 校验配置的完整性
    pub fn validate(&self) -> Result<()> {
        let server = &self.server;
        match server.backend {
            Backend::Sftp => {
                if server.host.trim().is_empty() {
                    bail!("SFTP backend requires host");
                }
                if server.username.trim().is_empty() {
                    bail!("SFTP backend requires username");
                }
                self.credentials()?;
            }
            Backend::WebDav => {
                if server.endpoint.as_deref().unwrap_or_default().is_empty() {
                    bail!("WebDAV backend requires endpoint");
                }
            }
            Backend::Fs => {
                if server.root.as_deref().unwrap_or_default().is_empty() {
                    bail!("fs backend requires root");
                }
            }
        }

        if self.max_depth == 0 {
            bail!("maxDepth must be greater than 0");
        }

        let direction = self.direction_config()?;
        if direction.file_suffix.is_empty() {
            bail!("fileSuffix must not be empty");
        }
        if direction.local_path.trim().is_empty() || direction.remote_path.trim().is_empty() {
            bail!("localPath and remotePath are required for {:?} mode", self.mode);
        }
        Ok(())
    }

    /// 解析登录凭据，密码与私钥必须且只能配置一个
    pub fn credentials(&self) -> Result<Credentials> {
        self.server.credentials()
    }

    /// 当前模式对应的方向配置
    pub fn direction_config(&self) -> Result<&DirectionConfig> {
        let section = match self.mode {
            SyncDirection::Upload => self.upload.as_ref(),
            SyncDirection::Download => self.download.as_ref(),
        };
        section.ok_or_else(|| anyhow::anyhow!("missing \"{}\" section", self.mode_key()))
    }

    fn mode_key(&self) -> &'static str {
        match self.mode {
            SyncDirection::Upload => "upload",
            SyncDirection::Download => "download",
        }
    }

    /// 生成当前模式的同步任务
    pub fn job(&self) -> Result<SyncJob> {
        let direction = self.direction_config()?;
        Ok(SyncJob {
            direction: self.mode,
            local_root: PathBuf::from(&direction.local_path),
            remote_root: direction.remote_path.clone(),
            file_suffix: direction.file_suffix.clone(),
            remote_os: self.server.remote_os,
            scan_interval: Duration::from_secs(direction.scan_interval),
            file_interval: Duration::from_secs(direction.file_interval),
            keepalive_interval: Duration::from_secs(self.server.keepalive_interval),
            max_depth: self.max_depth,
        })
    }
}

impl ServerConfig {
    pub fn credentials(&self) -> Result<Credentials> {
        let password = self.password.as_ref().filter(|p| !p.is_empty());
        let key = self.private_key_path.as_ref().filter(|p| !p.is_empty());
        match (password, key) {
            (Some(password), None) => Ok(Credentials::Password(password.clone())),
            (None, Some(path)) => Ok(Credentials::PrivateKey {
                path: PathBuf::from(path),
                passphrase: self.private_key_passphrase.clone(),
            }),
            (Some(_), Some(_)) => bail!("password and privateKeyPath are mutually exclusive"),
            (None, None) => bail!("either password or privateKeyPath is required"),
        }
    }
}
