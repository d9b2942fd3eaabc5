//! Bee Durable 服务
//!
//! 入口：加载配置、初始化日志、构建宿主，启动 HTTP 接口与过期实例清理任务。
//! 启动: cargo run（默认端口 7071，`BEE__WEB__PORT` 可覆盖）

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bee_durable::config::load_config;
use bee_durable::core::RuntimeBuilder;
use bee_durable::http::{router, HttpState};
use bee_durable::observability;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load configuration")?;

    let client = RuntimeBuilder::new(cfg.clone()).build_client();

    // 定期清理保留期已过的终态实例
    let purge_client = client.clone();
    let purge_every = Duration::from_secs(cfg.web.purge_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(purge_every);
        interval.tick().await;
        loop {
            interval.tick().await;
            purge_client.purge_expired().await;
        }
    });

    let runtime = Arc::clone(client.runtime());
    let app = router(Arc::new(HttpState {
        client,
        public_base_url: cfg.web.public_base_url.clone(),
    }));

    let addr = format!("{}:{}", cfg.web.host, cfg.web.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(app = %cfg.app.name, "Bee durable agent listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("HTTP server failed")?;

    runtime.shutdown();
    tracing::info!("shut down");
    Ok(())
}
