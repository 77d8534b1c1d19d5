//! 主应用程序入口
//!
//! 加载配置，组装存储适配器和服务，启动 Axum Web API。

use std::{sync::Arc, time::Duration};

use application::{AccountService, SystemClock, ThreadRandomSource};
use config::AppConfig;
use infrastructure::Infrastructure;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    tracing::info!("加载配置: {}", config.sanitize());

    let infra = Infrastructure::from_config(&config).await?;
    let state = AppState::build(
        &config,
        infra,
        Arc::new(SystemClock),
        Arc::new(ThreadRandomSource),
    );

    spawn_sweeper(
        state.account_service.clone(),
        Duration::from_secs(config.auth.sweep_interval_secs),
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("直播服务启动在 http://{}", addr);
    axum::serve(listener, router(state)).await?;

    Ok(())
}

/// 定期清理过期的会话和验证码
fn spawn_sweeper(accounts: Arc<AccountService>, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            match accounts.sweep_expired_sessions().await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "过期会话已清理"),
                Err(err) => tracing::warn!(error = %err, "清理过期会话失败"),
            }
            if let Err(err) = accounts.sweep_expired_codes().await {
                tracing::warn!(error = %err, "清理过期验证码失败");
            }
        }
    });
}
