use thiserror::Error;

#[derive(Error, Debug)]
pub enum XdsError {
    #[error("invalid bootstrap document: {0}")]
    InvalidBootstrap(String),

    #[error("failed to parse bootstrap json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cluster not found: {0}")]
    ClusterNotFound(String),

    #[error("unsupported api type: {0} (only GRPC is supported)")]
    UnsupportedApiType(String),

    #[error("no available ads endpoint")]
    NoEndpoint,

    #[error("invalid endpoint address: {0}")]
    InvalidEndpoint(String),

    #[error("failed to connect to control plane: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("grpc call failed: {0}")]
    Status(#[source] Box<tonic::Status>),

    #[error("stream closed")]
    StreamClosed,
}

impl From<tonic::Status> for XdsError {
    fn from(status: tonic::Status) -> Self {
        XdsError::Status(Box::new(status))
    }
}
