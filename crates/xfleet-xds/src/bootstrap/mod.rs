//! Bootstrap translation.
//!
//! Turns the raw bootstrap document into the typed configuration the stream
//! engine consumes: resolved clusters, the ads service list, and the
//! per-instance identity.

mod raw;
pub use raw::{BootstrapDocument, parse_duration};

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::Node;
use crate::errors::XdsError;
use crate::identity::Identity;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_REFRESH_DELAY: Duration = Duration::from_secs(10);

/// Built-in bootstrap document, used when the caller supplies none.
/// The ads endpoint can be overridden by providing a full document instead.
pub const DEFAULT_BOOTSTRAP: &str = r#"{
    "dynamic_resources": {
        "lds_config": { "ads": {} },
        "cds_config": { "ads": {} },
        "ads_config": {
            "api_type": "GRPC",
            "set_node_on_first_message_only": true,
            "transport_api_version": "V3",
            "grpc_services": [
                { "envoy_grpc": { "cluster_name": "xds-grpc" } }
            ]
        }
    },
    "static_resources": {
        "clusters": [
            {
                "name": "xds-grpc",
                "type": "STATIC",
                "connect_timeout": "1s",
                "lb_policy": "ROUND_ROBIN",
                "load_assignment": {
                    "cluster_name": "xds-grpc",
                    "endpoints": [{
                        "lb_endpoints": [{
                            "endpoint": {
                                "address": {
                                    "socket_address": {
                                        "address": "127.0.0.1",
                                        "port_value": 15010
                                    }
                                }
                            }
                        }]
                    }]
                },
                "http2_protocol_options": {}
            }
        ]
    }
}"#;

/// One resolved upstream address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EndpointAddress {
    /// `host:port` socket address.
    Socket(String),
    /// Absolute local-socket path.
    Pipe(String),
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointAddress::Socket(addr) => write!(f, "{addr}"),
            EndpointAddress::Pipe(path) => write!(f, "unix://{path}"),
        }
    }
}

/// Only random pick is supported; anything else is downgraded at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LbPolicy {
    #[default]
    Random,
}

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub name: String,
    pub lb_policy: LbPolicy,
    pub addresses: Vec<EndpointAddress>,
    pub connect_timeout: Duration,
    /// Opaque transport-security reference; carried, never interpreted.
    pub transport_socket: Option<serde_json::Value>,
}

impl ClusterConfig {
    /// Uniform random pick among the cluster's addresses; `None` when the
    /// cluster resolved to zero usable addresses.
    pub fn endpoint(&self) -> Option<&EndpointAddress> {
        if self.addresses.is_empty() {
            return None;
        }
        let idx = rand::rng().random_range(0..self.addresses.len());
        Some(&self.addresses[idx])
    }
}

/// One ads service reference, resolved against the cluster set.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub cluster: String,
    pub request_timeout: Duration,
}

/// Fully translated configuration for one simulated client.
#[derive(Debug, Clone)]
pub struct AdsConfig {
    pub services: Vec<ServiceConfig>,
    pub clusters: HashMap<String, ClusterConfig>,
    pub refresh_delay: Duration,
    pub identity: Identity,
}

impl AdsConfig {
    pub fn node(&self) -> Node {
        self.identity.node()
    }

    /// First service whose cluster yields an address, with that cluster's
    /// connect timeout. `None` when no configured service is usable.
    pub fn select_endpoint(&self) -> Option<(EndpointAddress, Duration)> {
        for service in &self.services {
            let Some(cluster) = self.clusters.get(&service.cluster) else {
                continue;
            };
            if let Some(address) = cluster.endpoint() {
                return Some((address.clone(), cluster.connect_timeout));
            }
        }
        None
    }
}

/// Parses a raw bootstrap JSON document and translates it.
pub fn parse_and_translate(document: &str, identity: Identity) -> Result<AdsConfig, XdsError> {
    let doc: BootstrapDocument = serde_json::from_str(document)?;
    translate(&doc, identity)
}

/// Translates the built-in default document.
pub fn translate_default(identity: Identity) -> Result<AdsConfig, XdsError> {
    parse_and_translate(DEFAULT_BOOTSTRAP, identity)
}

/// Translates a parsed bootstrap document into an [`AdsConfig`].
pub fn translate(doc: &BootstrapDocument, identity: Identity) -> Result<AdsConfig, XdsError> {
    let statics = doc
        .static_resources
        .as_ref()
        .ok_or_else(|| XdsError::InvalidBootstrap("static_resources missing".to_string()))?;
    let clusters = load_clusters(statics);

    let dynamics = doc
        .dynamic_resources
        .as_ref()
        .ok_or_else(|| XdsError::InvalidBootstrap("dynamic_resources missing".to_string()))?;
    let ads = dynamics
        .ads_config
        .as_ref()
        .ok_or_else(|| XdsError::InvalidBootstrap("ads_config missing".to_string()))?;

    if !ads.api_type.eq_ignore_ascii_case("GRPC") {
        return Err(XdsError::UnsupportedApiType(ads.api_type.clone()));
    }

    let refresh_delay = raw::duration_or(ads.refresh_delay.as_deref(), DEFAULT_REFRESH_DELAY);

    let mut services = Vec::with_capacity(ads.grpc_services.len());
    for service in &ads.grpc_services {
        // only envoy_grpc cluster references are recognized
        let Some(target) = &service.envoy_grpc else {
            continue;
        };
        if !clusters.contains_key(&target.cluster_name) {
            return Err(XdsError::ClusterNotFound(target.cluster_name.clone()));
        }
        services.push(ServiceConfig {
            cluster: target.cluster_name.clone(),
            request_timeout: raw::duration_or(service.timeout.as_deref(), DEFAULT_REQUEST_TIMEOUT),
        });
    }

    Ok(AdsConfig {
        services,
        clusters,
        refresh_delay,
        identity,
    })
}

fn load_clusters(statics: &raw::StaticResources) -> HashMap<String, ClusterConfig> {
    let mut clusters = HashMap::with_capacity(statics.clusters.len());
    for cluster in &statics.clusters {
        let addresses = resolve_addresses(cluster);
        if addresses.is_empty() {
            warn!(cluster = %cluster.name, "cluster resolved to zero addresses");
        }
        if let Some(policy) = cluster.lb_policy.as_deref()
            && !policy.eq_ignore_ascii_case("RANDOM")
        {
            warn!(cluster = %cluster.name, policy, "only RANDOM lb_policy is supported, downgrading");
        }
        clusters.insert(
            cluster.name.clone(),
            ClusterConfig {
                name: cluster.name.clone(),
                lb_policy: LbPolicy::Random,
                addresses,
                connect_timeout: raw::duration_or(
                    cluster.connect_timeout.as_deref(),
                    DEFAULT_CONNECT_TIMEOUT,
                ),
                transport_socket: cluster.transport_socket.clone(),
            },
        );
    }
    clusters
}

fn resolve_addresses(cluster: &raw::RawCluster) -> Vec<EndpointAddress> {
    let Some(assignment) = &cluster.load_assignment else {
        return Vec::new();
    };
    let mut addresses = Vec::new();
    for group in &assignment.endpoints {
        for lb in &group.lb_endpoints {
            let Some(address) = lb.endpoint.as_ref().and_then(|e| e.address.as_ref()) else {
                continue;
            };
            // a local socket is preferred over any socket address and ends
            // the scan, matching istio-agent style bootstraps
            if let Some(pipe) = &address.pipe {
                return vec![EndpointAddress::Pipe(absolute_path(&pipe.path))];
            }
            match &address.socket_address {
                Some(socket) => match socket.port_value {
                    Some(port) => {
                        addresses.push(EndpointAddress::Socket(format!(
                            "{}:{}",
                            socket.address, port
                        )));
                    }
                    None => {
                        warn!(cluster = %cluster.name, address = %socket.address,
                            "only numeric port_value is supported, skipping endpoint");
                    }
                },
                None => {
                    warn!(cluster = %cluster.name, "endpoint has neither pipe nor socket_address");
                }
            }
        }
    }
    addresses
}

fn absolute_path(path: &str) -> String {
    std::path::absolute(path)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| path.to_string())
}
