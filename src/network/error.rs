use thiserror::Error;
use tonic::{Code, Status};

use crate::raft::RaftError;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("gRPC error: {0}")]
    GrpcError(#[from] Status),

    #[error("Transport error: {0}")]
    TransportError(#[from] tonic::transport::Error),

    #[error("Connection error: {0}")]
    ConnectionError(String),
}

impl From<NetworkError> for RaftError {
    fn from(err: NetworkError) -> Self {
        match err {
            NetworkError::GrpcError(status) if status.code() == Code::DeadlineExceeded => {
                RaftError::Timeout
            }
            other => RaftError::NetworkError(other.to_string()),
        }
    }
}
