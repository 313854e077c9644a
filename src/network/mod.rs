mod convert;
pub mod client;
pub mod error;
pub mod forward;
pub mod http_gateway;
pub mod metrics;
pub mod server;

pub mod proto {
    tonic::include_proto!("cluster");
}

pub use client::{ClusterClient, GrpcTransport};
pub use error::NetworkError;
pub use forward::{ForwardedRequest, Forwarder, FORWARDED_BY};
pub use http_gateway::{run_http_gateway, serve_http_gateway, Gateway};
pub use server::{run_cluster_server, ClusterServer};
