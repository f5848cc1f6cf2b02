//! 日志模块 - 提供控制台日志、按大小轮转的文件日志

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;

/// 日志文件名
pub const LOG_FILE_NAME: &str = "sftpsync.log";

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 是否启用日志记录
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
    /// 日志目录
    #[serde(default = "default_dir")]
    pub dir: String,
    /// 单个日志文件最大大小（MB）
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    /// 保留的历史日志文件数
    #[serde(default = "default_backup_count")]
    pub backup_count: u32,
}

fn default_enabled() -> bool {
    true
}

fn default_level() -> String {
    "info".to_string()
}

fn default_dir() -> String {
    "log".to_string()
}

fn default_max_size_mb() -> u32 {
    1
}

fn default_backup_count() -> u32 {
    10
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            level: default_level(),
            dir: default_dir(),
            max_size_mb: default_max_size_mb(),
            backup_count: default_backup_count(),
        }
    }
}

impl LogConfig {
    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

/// 带大小限制的日志写入器
///
/// 当前文件超过 `max_size` 后依次重命名为 `.1`、`.2` …，最多保留 `backup_count` 份。
pub struct SizeRotatingWriter {
    file_path: PathBuf,
    max_size: u64,
    backup_count: u32,
    written: u64,
    writer: Option<BufWriter<File>>,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size_bytes: u64, backup_count: u32) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;

        let file_path = log_dir.join(LOG_FILE_NAME);
        let mut this = Self {
            file_path,
            max_size: max_size_bytes.max(1),
            backup_count,
            written: 0,
            writer: None,
        };

        let existing = fs::metadata(&this.file_path).map(|m| m.len()).unwrap_or(0);
        if existing >= this.max_size {
            this.rotate()?;
        } else {
            this.open(existing)?;
        }
        Ok(this)
    }

    fn open(&mut self, existing: u64) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        self.writer = Some(BufWriter::new(file));
        self.written = existing;
        Ok(())
    }

    fn backup_path(&self, index: u32) -> PathBuf {
        let mut name = self.file_path.as_os_str().to_owned();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    /// 轮转日志文件
    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut w) = self.writer.take() {
            let _ = w.flush();
        }

        if self.backup_count == 0 {
            if self.file_path.exists() {
                fs::remove_file(&self.file_path)?;
            }
            return self.open(0);
        }

        let oldest = self.backup_path(self.backup_count);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for index in (1..self.backup_count).rev() {
            let from = self.backup_path(index);
            if from.exists() {
                fs::rename(&from, self.backup_path(index + 1))?;
            }
        }
        if self.file_path.exists() {
            fs::rename(&self.file_path, self.backup_path(1))?;
        }

        self.open(0)
    }
}

impl Write for SizeRotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "Writer not available"))?;
        let n = writer.write(buf)?;
        writer.flush()?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

/// 初始化日志系统，返回的 guard 需要在进程结束前一直持有
pub fn init_logging(config: &LogConfig) -> Option<WorkerGuard> {
    if !config.enabled {
        // 日志已禁用，只初始化一个空的 subscriber
        let _ = tracing::subscriber::set_global_default(tracing_subscriber::registry());
        return None;
    }

    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(config.tracing_level().into())
        .from_env_lossy();

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let max_size = u64::from(config.max_size_mb) * 1024 * 1024;
    match SizeRotatingWriter::new(Path::new(&config.dir), max_size, config.backup_count) {
        Ok(file_writer) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file_writer);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .with_file(true)
                .with_line_number(true);

            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .with(file_layer);
            let _ = tracing::subscriber::set_global_default(subscriber);
            Some(guard)
        }
        Err(e) => {
            // 文件日志创建失败，回退到控制台
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer);
            let _ = tracing::subscriber::set_global_default(subscriber);
            tracing::warn!("创建日志文件失败，仅输出到控制台: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_keeps_backup_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SizeRotatingWriter::new(dir.path(), 16, 2).unwrap();

        for _ in 0..5 {
            writer.write_all(b"0123456789abcdef").unwrap();
        }
        writer.flush().unwrap();

        let log = dir.path().join(LOG_FILE_NAME);
        assert!(log.exists());
        assert!(writer.backup_path(1).exists());
        assert!(writer.backup_path(2).exists());
        assert!(!writer.backup_path(3).exists());
        assert_eq!(fs::metadata(&log).unwrap().len(), 16);
    }

    #[test]
    fn test_existing_large_file_rotated_on_open() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(LOG_FILE_NAME), vec![b'x'; 64]).unwrap();

        let writer = SizeRotatingWriter::new(dir.path(), 32, 3).unwrap();
        assert_eq!(fs::metadata(writer.backup_path(1)).unwrap().len(), 64);
        assert_eq!(fs::metadata(dir.path().join(LOG_FILE_NAME)).unwrap().len(), 0);
    }

    #[test]
    fn test_tracing_level() {
        let config = LogConfig {
            level: "WARN".to_string(),
            ..Default::default()
        };
        assert_eq!(config.tracing_level(), tracing::Level::WARN);
        assert_eq!(LogConfig::default().tracing_level(), tracing::Level::INFO);
    }
}
