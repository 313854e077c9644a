use std::time::Duration;

use hyper::body::Bytes;
use hyper::client::HttpConnector;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Client, Method, Request, Response};
use log::{debug, warn};

use crate::raft::{Node, RaftError};

// Header set on requests re-issued to the leader, carrying the sender's id.
pub const FORWARDED_BY: &str = "x-fabgate-forwarded-by";

#[derive(Debug, Clone)]
pub struct ForwardedRequest {
    pub method: Method,
    pub path_and_query: String,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

#[derive(Clone)]
pub struct Forwarder {
    client: Client<HttpConnector>,
    self_id: String,
    timeout: Duration,
}

impl Forwarder {
    pub fn new(self_id: &str, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            self_id: self_id.to_string(),
            timeout,
        }
    }

    pub async fn forward(
        &self,
        leader: &Node,
        request: ForwardedRequest,
    ) -> Result<Response<Body>, RaftError> {
        let uri = format!("{}{}", leader.http_endpoint(), request.path_and_query);
        debug!("Forwarding {} {uri} to leader {}", request.method, leader.id);

        let mut builder = Request::builder()
            .method(request.method)
            .uri(uri.as_str())
            .header(FORWARDED_BY, self.self_id.as_str());
        if let Some(content_type) = request.content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        let outbound = builder
            .body(Body::from(request.body))
            .map_err(|e| RaftError::LeaderUnreachable(format!("{}: {e}", leader.id)))?;

        match tokio::time::timeout(self.timeout, self.client.request(outbound)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                warn!("Forward to leader {} at {uri} failed: {e}", leader.id);
                Err(RaftError::LeaderUnreachable(leader.id.clone()))
            }
            Err(_) => {
                warn!("Forward to leader {} at {uri} timed out", leader.id);
                Err(RaftError::LeaderUnreachable(leader.id.clone()))
            }
        }
    }
}
