//! Echo 示例服务
//!
//! 用法：`skynet-echo [config.toml]`，未指定配置文件时使用默认配置。

use anyhow::{Context, Result};
use skynet_rpc::{
    Config, HandlerError, LocalServiceManager, MethodTable, RequestInfo, Service, init_logging,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::load_from_file(&path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => Config::default(),
    };
    init_logging(&config.log);

    let mut methods = MethodTable::new();
    methods.register("Echo", |_ri: RequestInfo, input: String| async move {
        Ok::<_, HandlerError>(input)
    })?;
    methods.register("Upper", |_ri: RequestInfo, input: String| async move {
        Ok::<_, HandlerError>(input.to_uppercase())
    })?;

    let service = Service::builder(config.service)
        .with_methods(methods)
        .with_manager(Arc::new(LocalServiceManager::new()))
        .start(true)
        .await
        .context("Failed to start service")?;

    info!(addr = %service.addr(), "✅ Echo service ready");
    service.shutdown_on_ctrl_c();
    service.wait().await?;
    Ok(())
}
