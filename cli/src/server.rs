// Inbound HTTP server for the direct gateway
//
// Peers that learned our advertised endpoint POST encoded messages to it;
// every body is handed to the HTTP gateway, which feeds the cloud's receiver.

use cloudbus_core::config::HttpConfig;
use cloudbus_core::transport::HttpGateway;
use std::net::SocketAddr;
use std::sync::Arc;
use warp::filters::BoxedFilter;
use warp::http::StatusCode;
use warp::Filter;

/// Largest message body accepted
const MAX_BODY: u64 = 1024 * 1024;

pub fn routes(gateway: Arc<HttpGateway>, path: &str) -> BoxedFilter<(StatusCode,)> {
    let path = path.to_string();
    warp::post()
        .and(warp::path::full())
        .and(warp::body::content_length_limit(MAX_BODY))
        .and(warp::body::json::<serde_json::Value>())
        .map(move |full: warp::path::FullPath, body: serde_json::Value| {
            accept(&gateway, &path, full.as_str(), &body)
        })
        .boxed()
}

fn accept(gateway: &HttpGateway, expected: &str, path: &str, body: &serde_json::Value) -> StatusCode {
    if path.trim_end_matches('/') != expected.trim_end_matches('/') {
        return StatusCode::NOT_FOUND;
    }
    match gateway.deliver(&body.to_string()) {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::debug!("Rejected inbound HTTP message: {}", e);
            StatusCode::BAD_REQUEST
        }
    }
}

/// Serve `config.advertise_path` on every interface at the advertised port
pub fn start(gateway: Arc<HttpGateway>, config: &HttpConfig) -> SocketAddr {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.advertise_port));
    let routes = routes(gateway, &config.advertise_path);

    tracing::info!("Serving direct HTTP gateway on {}{}", addr, config.advertise_path);
    tokio::spawn(async move {
        warp::serve(routes).run(addr).await;
    });
    addr
}
