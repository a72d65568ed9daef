//! 指标导出模块
//!
//! 记录每个控制器实际写入集群的资源数量，并通过 Prometheus 文本格式导出。

use anyhow::{Context, Result};
use hyper::{
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, Server, StatusCode,
};
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use std::convert::Infallible;
use std::net::SocketAddr;
use tracing::{error, info, warn};

/// 进程级 Prometheus 注册表
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    if let Err(e) = registry.register(Box::new(DEPLOYED_RESOURCES.clone())) {
        warn!("注册指标失败: {}", e);
    }
    registry
});

/// 已部署资源计数器，按控制器名称区分
pub static DEPLOYED_RESOURCES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "deployed_resources_total",
            "Number of resources written to the cluster by the deploy action",
        ),
        &["controller"],
    )
    .expect("deployed_resources_total options are valid")
});

/// 记录一次实际写入
pub fn record_deployed(controller: &str) {
    DEPLOYED_RESOURCES.with_label_values(&[controller]).inc();
}

/// 以文本格式导出所有指标
pub fn gather() -> Result<Vec<u8>> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&REGISTRY.gather(), &mut buffer)
        .context("编码指标失败")?;
    Ok(buffer)
}

async fn handle(req: Request<Body>) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::GET || req.uri().path() != "/metrics" {
        let mut response = Response::new(Body::from("not found"));
        *response.status_mut() = StatusCode::NOT_FOUND;
        return Ok(response);
    }

    let response = match gather() {
        Ok(buffer) => {
            let mut response = Response::new(Body::from(buffer));
            if let Ok(value) = TextEncoder::new().format_type().parse() {
                response
                    .headers_mut()
                    .insert(hyper::header::CONTENT_TYPE, value);
            }
            response
        }
        Err(e) => {
            error!("导出指标失败: {:#}", e);
            let mut response = Response::new(Body::from(e.to_string()));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    };
    Ok(response)
}

/// 启动指标 HTTP 服务器，直到服务器出错才返回
pub async fn serve(addr: SocketAddr) -> Result<()> {
    let make_svc = make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(handle)) });

    info!("指标服务器监听于 {}", addr);
    Server::try_bind(&addr)
        .with_context(|| format!("无法绑定指标地址 {}", addr))?
        .serve(make_svc)
        .await
        .context("指标服务器异常退出")
}
