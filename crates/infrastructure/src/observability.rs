//! 指标导出
//!
//! 把 `metrics` 宏记录的计数器/仪表通过 Prometheus HTTP 端点暴露出去。

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use serpfarm_core::{FarmError, FarmResult};

/// 安装全局Prometheus记录器并启动抓取端点
pub fn init_metrics(bind_address: &str) -> FarmResult<()> {
    let addr: SocketAddr = bind_address
        .parse()
        .map_err(|e| FarmError::config_error(format!("指标监听地址无效 {bind_address}: {e}")))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| FarmError::config_error(format!("安装Prometheus导出器失败: {e}")))?;

    info!("Prometheus指标端点已启动: http://{addr}/metrics");
    Ok(())
}
