#![allow(dead_code)]
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dipper::api;
use dipper::clock::{Clock, SystemClock};
use dipper::cluster::AccessControl;
use dipper::limiters::RateLimitingConfig;
use dipper::node::DipperNode;
use dipper::settings::Settings;

pub const LIMITS: &str = r#"{
    "limit_groups": [
        {
            "id": "customer-limits",
            "groups": ["customer"],
            "limits": [
                {"id": "one", "uri": "/service/*", "uri_regex": "/service/.*",
                 "http_methods": ["GET"], "unit": "HOUR", "value": 10}
            ]
        }
    ]
}"#;

pub fn limits() -> RateLimitingConfig {
    RateLimitingConfig::from_json(LIMITS).unwrap()
}

pub fn settings(node_address: SocketAddr, members: &[SocketAddr]) -> Settings {
    Settings {
        listen_address: node_address.ip().to_string(),
        listen_port: node_address.port(),
        node_address: Some(node_address),
        cluster_members: members.to_vec(),
        host_key: Some(format!("node-{}", node_address.port())),
        remote_timeout_ms: 500,
        ..Settings::default()
    }
}

pub fn node(
    node_address: SocketAddr,
    members: &[SocketAddr],
    access: AccessControl,
    clock: Arc<dyn Clock>,
) -> DipperNode {
    DipperNode::build(&settings(node_address, members), &limits(), access, clock).unwrap()
}

/// Reserve a loopback listener for a node that has not been built yet
pub async fn listener() -> (tokio::net::TcpListener, SocketAddr) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

pub fn serve(listener: tokio::net::TcpListener, node: DipperNode) {
    let app = api::api(node).unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
}

/// Two nodes serving on loopback, each knowing about the other
pub async fn two_node_cluster() -> (DipperNode, DipperNode) {
    let (listener_a, addr_a) = listener().await;
    let (listener_b, addr_b) = listener().await;
    let members = [addr_a, addr_b];
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let a = node(addr_a, &members, AccessControl::AllowAll, clock.clone());
    let b = node(addr_b, &members, AccessControl::AllowAll, clock);
    serve(listener_a, a.clone());
    serve(listener_b, b.clone());
    // let both servers start accepting
    tokio::time::sleep(Duration::from_millis(50)).await;
    (a, b)
}

/// An address with nothing listening on it
pub fn dead_address() -> SocketAddr {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
}
