//! Discovery stream engine.
//!
//! Owns one aggregated discovery stream for one simulated client:
//! Disconnected -> Connected -> Streaming -> Closed. Connects to the first
//! usable endpoint, sends the bootstrap cds request, then acknowledges every
//! push the control plane sends. Endpoint, listener and route types are
//! never requested proactively; they are acked reactively as pushed.
//!
//! There is deliberately no idle timeout on receive: a control plane that
//! never pushes parks the worker in Streaming state for as long as it runs.
//! Connect/retry orchestration lives with the caller, not here.

mod state;
pub use state::{
    CLUSTER_TYPE_URL, ENDPOINT_TYPE_URL, HandleError, LISTENER_TYPE_URL, ProtocolState,
    ROUTE_TYPE_URL, ResourceType, TypeState,
};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::Streaming;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info, warn};

use crate::aggregated_discovery_service_client::AggregatedDiscoveryServiceClient;
use crate::bootstrap::{AdsConfig, EndpointAddress};
use crate::errors::XdsError;
use crate::{DiscoveryRequest, DiscoveryResponse, ErrorDetail, Node};

const REQUEST_QUEUE_DEPTH: usize = 16;

/// Narrow seam over one open discovery stream, with exactly the operations
/// the run loop needs. One concrete protocol implementation exists; the
/// trait is the test seam.
#[async_trait]
pub trait StreamClient: Send {
    async fn send(&mut self, req: DiscoveryRequest) -> Result<(), XdsError>;
    async fn recv(&mut self) -> Result<Option<DiscoveryResponse>, XdsError>;
    /// Dispatch one inbound push: update per-type state and ack or nack it.
    /// Pushes with an unrecognized type url are dropped without an ack.
    async fn handle_push(&mut self, resp: DiscoveryResponse);
    /// Tear the stream down. Safe to call at most once; the run loop owns it.
    async fn stop(&mut self);
}

/// Drives a stream client until cancellation or a transport failure.
///
/// Acks are emitted in push order; receive handling always completes before
/// the corresponding ack is queued.
pub async fn run_stream<C: StreamClient>(
    mut client: C,
    token: CancellationToken,
) -> Result<(), XdsError> {
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                client.stop().await;
                return Ok(());
            }
            msg = client.recv() => match msg {
                Ok(Some(resp)) => client.handle_push(resp).await,
                Ok(None) => {
                    client.stop().await;
                    return Err(XdsError::StreamClosed);
                }
                Err(e) => {
                    client.stop().await;
                    return Err(e);
                }
            },
        }
    }
}

/// First request on a fresh stream: cluster type, no version, no nonce.
pub fn initial_request(node: Node) -> DiscoveryRequest {
    DiscoveryRequest {
        version_info: String::new(),
        node: Some(node),
        resource_names: Vec::new(),
        type_url: CLUSTER_TYPE_URL.to_string(),
        response_nonce: String::new(),
        error_detail: None,
    }
}

/// Acknowledgment for one push: echoes the push's version and nonce
/// unchanged; a populated `error_detail` turns it into a rejection.
pub fn build_ack(
    resp: &DiscoveryResponse,
    rtype: ResourceType,
    tracked: &[String],
    node: Node,
    rejection: Option<HandleError>,
) -> DiscoveryRequest {
    DiscoveryRequest {
        version_info: resp.version_info.clone(),
        node: Some(node),
        resource_names: tracked.to_vec(),
        type_url: rtype.type_url().to_string(),
        response_nonce: resp.nonce.clone(),
        error_detail: rejection.map(|e| ErrorDetail {
            // grpc INVALID_ARGUMENT
            code: 3,
            message: e.to_string(),
        }),
    }
}

/// The one concrete stream client, backed by a tonic channel.
pub struct AdsStreamClient {
    requests: Option<mpsc::Sender<DiscoveryRequest>>,
    responses: Option<Streaming<DiscoveryResponse>>,
    state: ProtocolState,
    node: Node,
}

impl AdsStreamClient {
    /// Dials the configured discovery service and opens the stream.
    ///
    /// Selects the first service whose cluster yields an address, opens a
    /// plaintext channel with the decode limit raised to the maximum (the
    /// control plane may push payloads far beyond the grpc default), then
    /// sends the initial cluster request. Any failure aborts the attempt;
    /// retry policy belongs to the fleet controller.
    pub async fn connect(config: &AdsConfig) -> Result<Self, XdsError> {
        let (address, connect_timeout) = config.select_endpoint().ok_or(XdsError::NoEndpoint)?;

        let channel = dial(&address, connect_timeout).await?;
        info!(endpoint = %address, "established grpc connection to control plane");

        let mut grpc = AggregatedDiscoveryServiceClient::new(channel)
            .max_decoding_message_size(usize::MAX);

        let (tx, rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let responses = grpc
            .stream_aggregated_resources(ReceiverStream::new(rx))
            .await?
            .into_inner();

        let mut client = Self {
            requests: Some(tx),
            responses: Some(responses),
            state: ProtocolState::default(),
            node: config.node(),
        };
        client.send(initial_request(client.node.clone())).await?;
        Ok(client)
    }
}

#[async_trait]
impl StreamClient for AdsStreamClient {
    async fn send(&mut self, req: DiscoveryRequest) -> Result<(), XdsError> {
        match &self.requests {
            Some(tx) => tx.send(req).await.map_err(|_| XdsError::StreamClosed),
            None => Err(XdsError::StreamClosed),
        }
    }

    async fn recv(&mut self) -> Result<Option<DiscoveryResponse>, XdsError> {
        match &mut self.responses {
            Some(stream) => stream.message().await.map_err(Into::into),
            None => Ok(None),
        }
    }

    async fn handle_push(&mut self, resp: DiscoveryResponse) {
        let Some(rtype) = ResourceType::from_type_url(&resp.type_url) else {
            warn!(type_url = %resp.type_url, "dropping push with unsupported resource type");
            return;
        };
        debug!(
            rtype = rtype.short(),
            version = %resp.version_info,
            nonce = %resp.nonce,
            resources = resp.resources.len(),
            "push received"
        );

        let rejection = self.state.apply(rtype, &resp).err();
        if let Some(e) = &rejection {
            warn!(rtype = rtype.short(), error = %e, "push failed validation, rejecting version");
        }

        let ack = build_ack(
            &resp,
            rtype,
            self.state.tracked_names(rtype),
            self.node.clone(),
            rejection,
        );
        // a failed ack is not fatal; the next push retries the cycle
        if let Err(e) = self.send(ack).await {
            warn!(rtype = rtype.short(), error = %e, "ack send failed");
        }
    }

    async fn stop(&mut self) {
        // dropping the sender half-closes the stream, dropping the receiver
        // tears the call down with the channel
        self.requests.take();
        self.responses.take();
        debug!("discovery stream closed");
    }
}

async fn dial(address: &EndpointAddress, connect_timeout: std::time::Duration) -> Result<Channel, XdsError> {
    match address {
        EndpointAddress::Socket(hostport) => {
            let endpoint = Endpoint::from_shared(format!("http://{hostport}"))
                .map_err(|e| XdsError::InvalidEndpoint(e.to_string()))?
                .connect_timeout(connect_timeout);
            Ok(endpoint.connect().await?)
        }
        #[cfg(unix)]
        EndpointAddress::Pipe(path) => {
            let path = path.clone();
            // the uri is required but unused, the connector dials the socket
            let endpoint = Endpoint::from_static("http://pipe.localhost")
                .connect_timeout(connect_timeout);
            Ok(endpoint
                .connect_with_connector(tower::service_fn(move |_: tonic::transport::Uri| {
                    let path = path.clone();
                    async move {
                        Ok::<_, std::io::Error>(hyper_util::rt::TokioIo::new(
                            tokio::net::UnixStream::connect(path).await?,
                        ))
                    }
                }))
                .await?)
        }
        #[cfg(not(unix))]
        EndpointAddress::Pipe(path) => Err(XdsError::InvalidEndpoint(format!(
            "local sockets are not supported on this platform: {path}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[test]
    fn initial_request_is_cds_with_empty_version_and_nonce() {
        let node = Node {
            id: "sidecar~1.2.3.4~pod.app~app".to_string(),
            cluster: "test".to_string(),
            metadata: Default::default(),
        };
        let req = initial_request(node.clone());
        assert_eq!(req.type_url, CLUSTER_TYPE_URL);
        assert!(req.version_info.is_empty());
        assert!(req.response_nonce.is_empty());
        assert!(req.resource_names.is_empty());
        assert!(req.error_detail.is_none());
        assert_eq!(req.node.unwrap().id, node.id);
    }

    fn sample_node() -> Node {
        Node {
            id: "sidecar~1.2.3.4~pod.app~app".to_string(),
            cluster: "test".to_string(),
            metadata: Default::default(),
        }
    }

    fn sample_push(version: &str, nonce: &str) -> DiscoveryResponse {
        DiscoveryResponse {
            version_info: version.to_string(),
            resources: Vec::new(),
            type_url: CLUSTER_TYPE_URL.to_string(),
            nonce: nonce.to_string(),
        }
    }

    #[test]
    fn ack_echoes_version_and_nonce_on_success() {
        let resp = sample_push("v42", "nonce-9");
        let ack = build_ack(&resp, ResourceType::Cluster, &[], sample_node(), None);
        assert_eq!(ack.version_info, "v42");
        assert_eq!(ack.response_nonce, "nonce-9");
        assert_eq!(ack.type_url, CLUSTER_TYPE_URL);
        assert!(ack.error_detail.is_none());
    }

    #[test]
    fn ack_echoes_version_and_nonce_on_rejection() {
        let resp = sample_push("v42", "nonce-9");
        let rejection = HandleError::TypeUrlMismatch {
            declared: CLUSTER_TYPE_URL.to_string(),
            found: LISTENER_TYPE_URL.to_string(),
        };
        let ack = build_ack(&resp, ResourceType::Cluster, &[], sample_node(), Some(rejection));
        assert_eq!(ack.version_info, "v42");
        assert_eq!(ack.response_nonce, "nonce-9");
        let detail = ack.error_detail.expect("rejection carries a detail");
        assert_eq!(detail.code, 3);
        assert!(detail.message.contains("mismatch"));
    }

    struct ScriptedClient {
        pushes: VecDeque<Result<Option<DiscoveryResponse>, XdsError>>,
        handled: usize,
        stopped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl StreamClient for ScriptedClient {
        async fn send(&mut self, _req: DiscoveryRequest) -> Result<(), XdsError> {
            Ok(())
        }

        async fn recv(&mut self) -> Result<Option<DiscoveryResponse>, XdsError> {
            match self.pushes.pop_front() {
                Some(result) => result,
                None => std::future::pending().await,
            }
        }

        async fn handle_push(&mut self, _resp: DiscoveryResponse) {
            self.handled += 1;
        }

        async fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn run_stream_stops_cleanly_on_cancellation() {
        let stopped = Arc::new(AtomicBool::new(false));
        let client = ScriptedClient {
            pushes: VecDeque::new(),
            handled: 0,
            stopped: stopped.clone(),
        };
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_stream(client, token.clone()));

        token.cancel();
        let result = handle.await.unwrap();
        assert!(result.is_ok());
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn run_stream_surfaces_transport_failure() {
        let stopped = Arc::new(AtomicBool::new(false));
        let client = ScriptedClient {
            pushes: VecDeque::from([
                Ok(Some(sample_push("v1", "n1"))),
                Err(XdsError::StreamClosed),
            ]),
            handled: 0,
            stopped: stopped.clone(),
        };
        let token = CancellationToken::new();
        let result = run_stream(client, token).await;
        assert!(matches!(result, Err(XdsError::StreamClosed)));
        assert!(stopped.load(Ordering::SeqCst));
    }
}
