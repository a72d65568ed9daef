//! Stratus Operator 可执行程序

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use stratus_operator::{config::OperatorConfig, metrics, StratusOperator};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 命令行参数
#[derive(Debug, Parser)]
#[command(name = "stratus-operator", version, about = "Stratus 平台 Kubernetes Operator")]
struct Args {
    /// 配置文件路径（YAML 或 JSON）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 日志级别，RUST_LOG 优先
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("启动 Stratus Operator v{}", env!("CARGO_PKG_VERSION"));

    let config = OperatorConfig::load(args.config.as_deref()).context("加载配置失败")?;
    info!(
        release = %config.release.version,
        components = config.components.len(),
        "配置加载完成"
    );

    let metrics_addr = config.metrics_address()?;
    tokio::spawn(async move {
        if let Err(e) = metrics::serve(metrics_addr).await {
            error!("指标服务器错误: {:#}", e);
        }
    });

    let operator = StratusOperator::new(&config).await?;
    operator.start().await?;

    tokio::signal::ctrl_c()
        .await
        .context("监听退出信号失败")?;
    info!("收到退出信号，正在停止");

    operator.stop().await?;
    info!("Stratus Operator 已退出");
    Ok(())
}
