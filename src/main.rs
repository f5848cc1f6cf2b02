use anyhow::{Context, Result};
use clap::Parser;
use sftpsync_lib::config::{Config, SyncDirection};
use sftpsync_lib::core::ConnectionSupervisor;
use sftpsync_lib::logging::init_logging;
use sftpsync_lib::storage::create_connector;
use sftpsync_lib::SyncEngine;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// 单向文件同步守护进程
#[derive(Debug, Parser)]
#[command(name = "sftpsync", version, about)]
struct Args {
    /// 配置文件路径
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// 覆盖配置文件中的运行模式
    #[arg(short, long, value_enum)]
    mode: Option<SyncDirection>,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(&args.config)?;
    if let Some(mode) = args.mode {
        config.mode = mode;
        config.validate()?;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // guard 必须活到进程结束，否则文件日志会丢失
    let _log_guard = init_logging(&Config::load_log_config(&args.config));
    info!("加载配置文件: {}", args.config.display());

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("配置无效: {:#}", e);
            return Err(e);
        }
    };

    let job = config.job()?;
    let connector = create_connector(&config.server).context("创建连接器失败")?;

    let cancel = CancellationToken::new();
    let supervisor = Arc::new(ConnectionSupervisor::new(
        connector,
        Duration::from_secs(config.server.reconnect_delay),
        cancel.clone(),
    ));

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("收到退出信号，等待当前文件处理完成...");
                cancel.cancel();
            }
        });
    }

    let engine = SyncEngine::new(supervisor.clone(), job, cancel);
    let result = engine.run().await;
    supervisor.disconnect().await;

    if let Err(e) = result {
        error!("同步终止: {}", e);
        return Err(e.into());
    }
    Ok(())
}
