//! Duplex RPC - 节点程序
//!
//! 按环境变量以监听端或发起端运行，注册一组演示方法，Ctrl-C 退出。

use duplex_rpc::{Node, NodeConfig};
use tracing::info;

mod methods;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // 可以通过环境变量 RUST_LOG 设置日志级别，未设置时使用 LOG_LEVEL
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .init();

    let cfg = NodeConfig::from_env()?;
    info!(
        "✅ 配置加载成功: name={}, role={}, addr={}:{}",
        cfg.name, cfg.role, cfg.host, cfg.port
    );

    let node = Node::new(cfg)?;
    methods::register(&node).await?;
    info!("✅ 已注册方法: {:?}", node.methods().await);

    node.start().await?;
    if let Some(addr) = node.local_addr().await {
        info!("🎯 监听地址: {}", addr);
    }

    tokio::signal::ctrl_c().await?;
    node.stop().await;

    Ok(())
}
