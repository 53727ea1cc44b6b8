use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use dispatch_core::{config::AppConfig, init_logging};
use tokio::signal;
use tracing::{error, info, warn};

mod app;
mod shutdown;

use app::Application;
use shutdown::ShutdownManager;

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("device-dispatch")
        .version("1.0.0")
        .about("多设备限流消息分发系统")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时依次查找默认路径"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").cloned();

    let mut config = AppConfig::load(config_path.as_deref())
        .with_context(|| format!("加载配置失败: {}", config_path.as_deref().unwrap_or("<默认路径>")))?;
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.clone();
    }

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    )?;
    info!("启动多设备限流消息分发系统");

    if config.observability.metrics_enabled {
        init_metrics(&config.observability.metrics_bind_address)?;
    }

    let app = Arc::new(Application::new(config).await?);
    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let app = Arc::clone(&app);
        let shutdown = shutdown_manager.clone();
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown).await {
                error!("应用运行失败: {e}");
            }
        })
    };

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    // 发送队列排空可能较久，超时后直接退出；未完成的认领由下次启动的超时清理回收
    match tokio::time::timeout(Duration::from_secs(30), app_handle).await {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    info!("多设备限流消息分发系统已退出");
    Ok(())
}

/// 启动 Prometheus 指标端点
fn init_metrics(bind_address: &str) -> Result<()> {
    let addr: SocketAddr = bind_address
        .parse()
        .with_context(|| format!("无效的指标监听地址: {bind_address}"))?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("启动Prometheus指标端点失败")?;
    info!("Prometheus指标端点监听于 {}", addr);
    Ok(())
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
