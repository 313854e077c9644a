use std::convert::Infallible;
use std::future::Future;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;

use hyper::body::HttpBody as _;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use log::{debug, info, warn};
use serde_json::{json, Value};

use crate::network::forward::{ForwardedRequest, Forwarder, FORWARDED_BY};
use crate::network::metrics;
use crate::raft::{ClusterNode, ConfigSnapshot, NodeRole, RaftError};

pub const MAX_BODY_BYTES: usize = 1024 * 1024;

const UNAVAILABLE: &str = "service temporarily unavailable, check cluster state";

pub struct Gateway {
    node: ClusterNode,
    forwarder: Forwarder,
}

impl Gateway {
    pub fn new(node: ClusterNode, forwarder: Forwarder) -> Self {
        Self { node, forwarder }
    }
}

pub async fn run_http_gateway(addr: SocketAddr, gateway: Arc<Gateway>) -> Result<(), hyper::Error> {
    info!("HTTP gateway listening on {addr}");
    Server::try_bind(&addr)?
        .serve(make_service_fn(move |_conn| {
            let gateway = Arc::clone(&gateway);
            async move { Ok::<_, Infallible>(service_fn(move |req| handle(req, Arc::clone(&gateway)))) }
        }))
        .await
}

pub fn serve_http_gateway(
    listener: TcpListener,
    gateway: Arc<Gateway>,
) -> Result<impl Future<Output = Result<(), hyper::Error>>, hyper::Error> {
    Ok(Server::from_tcp(listener)?.serve(make_service_fn(move |_conn| {
        let gateway = Arc::clone(&gateway);
        async move { Ok::<_, Infallible>(service_fn(move |req| handle(req, Arc::clone(&gateway)))) }
    })))
}

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Body>) -> Response<Body> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn json_response(status: StatusCode, value: Value) -> Response<Body> {
    respond(status, "application/json", value.to_string())
}

fn json_error(status: StatusCode, msg: &str) -> Response<Body> {
    json_response(status, json!({ "error": msg }))
}

fn error_response(err: &RaftError) -> Response<Body> {
    match err {
        e if e.is_retryable() => json_error(StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE),
        RaftError::KeyNotFound(_) => json_error(StatusCode::NOT_FOUND, &err.to_string()),
        RaftError::SerializationError(_) => json_error(StatusCode::BAD_REQUEST, &err.to_string()),
        _ => json_error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

enum ReadBodyLimitedError {
    TooLarge,
    Hyper(hyper::Error),
}

impl From<hyper::Error> for ReadBodyLimitedError {
    fn from(e: hyper::Error) -> Self {
        Self::Hyper(e)
    }
}

async fn read_body_limited(
    mut body: Body,
    max_bytes: usize,
) -> Result<Vec<u8>, ReadBodyLimitedError> {
    let mut out = Vec::new();
    while let Some(next) = body.data().await {
        let chunk = next?;
        if out.len() + chunk.len() > max_bytes {
            return Err(ReadBodyLimitedError::TooLarge);
        }
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

#[derive(Debug, Clone)]
enum ConfigWrite {
    Put(String, Value),
    Delete(String),
    Replace(ConfigSnapshot),
}

impl ConfigWrite {
    fn parse(method: &Method, key: Option<&str>, body: &[u8]) -> Result<Self, RaftError> {
        match (method, key) {
            (&Method::PUT, Some(key)) => Ok(ConfigWrite::Put(
                key.to_string(),
                serde_json::from_slice(body)?,
            )),
            (&Method::DELETE, Some(key)) => Ok(ConfigWrite::Delete(key.to_string())),
            _ => Ok(ConfigWrite::Replace(ConfigSnapshot::from_bytes(body)?)),
        }
    }

    async fn apply(self, node: &ClusterNode) -> Result<Value, RaftError> {
        match self {
            ConfigWrite::Put(key, value) => {
                let previous = node.update_config(|snap| snap.put(&key, value)).await;
                Ok(json!({ "status": "ok", "key": key, "created": previous.is_none() }))
            }
            ConfigWrite::Delete(key) => match node.update_config(|snap| snap.remove(&key)).await {
                Some(_) => Ok(json!({ "status": "ok", "key": key })),
                None => Err(RaftError::KeyNotFound(key)),
            },
            ConfigWrite::Replace(snapshot) => {
                let entries = snapshot.len();
                node.update_config(|snap| *snap = snapshot).await;
                Ok(json!({ "status": "ok", "entries": entries }))
            }
        }
    }
}

pub(crate) async fn handle(
    req: Request<Body>,
    gateway: Arc<Gateway>,
) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let key = path
        .strip_prefix("/config/")
        .filter(|key| !key.is_empty())
        .map(str::to_string);

    let response = match (&method, path.as_str()) {
        (&Method::GET, "/health") => build_health(&gateway.node).await,
        (&Method::GET, "/metrics") => respond(
            StatusCode::OK,
            "text/plain; version=0.0.4",
            build_metrics(&gateway.node).await,
        ),
        (&Method::GET, "/cluster") => build_cluster(&gateway.node).await,
        (&Method::GET, "/config") => match serde_json::to_value(gateway.node.snapshot().await) {
            Ok(value) => json_response(StatusCode::OK, value),
            Err(e) => error_response(&e.into()),
        },
        (&Method::GET, _) if key.is_some() => {
            let key = key.unwrap_or_default();
            match gateway.node.snapshot().await.get(&key) {
                Some(value) => json_response(StatusCode::OK, value.clone()),
                None => error_response(&RaftError::KeyNotFound(key)),
            }
        }
        (&Method::PUT, _) | (&Method::DELETE, _) if key.is_some() => {
            write(req, gateway, key).await
        }
        (&Method::POST, "/config") => write(req, gateway, None).await,
        _ => json_error(StatusCode::NOT_FOUND, "no such route"),
    };

    Ok(response)
}

async fn write(req: Request<Body>, gateway: Arc<Gateway>, key: Option<String>) -> Response<Body> {
    let forwarded_by = req
        .headers()
        .get(FORWARDED_BY)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let method = req.method().clone();
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let content_type = req.headers().get(CONTENT_TYPE).cloned();

    let body = match read_body_limited(req.into_body(), MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(ReadBodyLimitedError::TooLarge) => {
            return json_error(StatusCode::PAYLOAD_TOO_LARGE, "payload too large")
        }
        Err(ReadBodyLimitedError::Hyper(e)) => {
            return json_error(
                StatusCode::BAD_REQUEST,
                &format!("failed to read request body: {e}"),
            )
        }
    };

    let op = match ConfigWrite::parse(&method, key.as_deref(), &body) {
        Ok(op) => op,
        Err(e) => return error_response(&e),
    };
    debug!("Config write {op:?}");

    let node = gateway.node.clone();
    let forwarder = gateway.forwarder.clone();
    let forwarded = ForwardedRequest {
        method,
        path_and_query,
        content_type,
        body: body.into(),
    };

    let result = gateway
        .node
        .route_write(
            || async move { op.apply(&node).await.map(|v| json_response(StatusCode::OK, v)) },
            |leader| async move {
                // One hop only: a forwarded write that missed the leader stops here.
                if let Some(sender) = forwarded_by {
                    warn!(
                        "Write forwarded by {sender} reached a non-leader, believed leader is {}",
                        leader.id
                    );
                    return Err(RaftError::NotLeader);
                }
                forwarder.forward(&leader, forwarded).await
            },
        )
        .await;

    result.unwrap_or_else(|e| error_response(&e))
}

async fn build_health(node: &ClusterNode) -> Response<Body> {
    let status = node.status().await;
    json_response(
        StatusCode::OK,
        json!({
            "status": "ok",
            "id": status.id,
            "role": status.role.tag(),
            "term": status.term,
        }),
    )
}

async fn build_cluster(node: &ClusterNode) -> Response<Body> {
    let status = node.status().await;
    let members = node.members().await;
    let leader = node.leader_external_endpoint().await;
    json_response(
        StatusCode::OK,
        json!({
            "node": status,
            "leader_endpoint": leader,
            "members": members,
        }),
    )
}

async fn build_metrics(node: &ClusterNode) -> String {
    let counters = metrics::snapshot();
    let status = node.status().await;
    let role_value = match status.role {
        NodeRole::Follower => 0,
        NodeRole::Candidate => 1,
        NodeRole::Leader => 2,
    };

    format!(
        concat!(
            "# TYPE fabgate_writes_total counter\n",
            "fabgate_writes_total{{path=\"local\"}} {}\n",
            "fabgate_writes_total{{path=\"forwarded\"}} {}\n",
            "# TYPE fabgate_heartbeats_sent_total counter\n",
            "fabgate_heartbeats_sent_total {}\n",
            "# TYPE fabgate_elections_started_total counter\n",
            "fabgate_elections_started_total {}\n",
            "# TYPE fabgate_raft_term gauge\n",
            "fabgate_raft_term {}\n",
            "# TYPE fabgate_raft_role gauge\n",
            "fabgate_raft_role {}\n",
            "# TYPE fabgate_config_version gauge\n",
            "fabgate_config_version {}\n",
            "# TYPE fabgate_cluster_size gauge\n",
            "fabgate_cluster_size {}\n",
        ),
        counters.local_writes,
        counters.forwarded_writes,
        counters.heartbeats_sent,
        counters.elections_started,
        status.term,
        role_value,
        status.version,
        status.cluster_size,
    )
}
