//! Per-connection protocol state.
//!
//! One [`TypeState`] per resource type seen on the stream, created lazily on
//! the first push of that type and discarded with the connection. Mutated
//! only on the receive path.

use std::collections::HashMap;

use thiserror::Error;

use crate::DiscoveryResponse;

pub const CLUSTER_TYPE_URL: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
pub const ENDPOINT_TYPE_URL: &str =
    "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment";
pub const LISTENER_TYPE_URL: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";
pub const ROUTE_TYPE_URL: &str = "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";

/// The closed set of resource types the protocol multiplexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Cluster,
    Endpoint,
    Listener,
    Route,
}

impl ResourceType {
    pub fn from_type_url(url: &str) -> Option<Self> {
        match url {
            CLUSTER_TYPE_URL => Some(ResourceType::Cluster),
            ENDPOINT_TYPE_URL => Some(ResourceType::Endpoint),
            LISTENER_TYPE_URL => Some(ResourceType::Listener),
            ROUTE_TYPE_URL => Some(ResourceType::Route),
            _ => None,
        }
    }

    pub fn type_url(self) -> &'static str {
        match self {
            ResourceType::Cluster => CLUSTER_TYPE_URL,
            ResourceType::Endpoint => ENDPOINT_TYPE_URL,
            ResourceType::Listener => LISTENER_TYPE_URL,
            ResourceType::Route => ROUTE_TYPE_URL,
        }
    }

    /// Short name for logging.
    pub fn short(self) -> &'static str {
        match self {
            ResourceType::Cluster => "cds",
            ResourceType::Endpoint => "eds",
            ResourceType::Listener => "lds",
            ResourceType::Route => "rds",
        }
    }
}

/// A push failed type-specific validation; the ack becomes a rejection.
#[derive(Debug, Error)]
pub enum HandleError {
    #[error("resource type url mismatch: response declared {declared}, payload carries {found}")]
    TypeUrlMismatch { declared: String, found: String },
}

/// Last acknowledged version, last seen nonce, and the tracked resource
/// names for one resource type.
#[derive(Debug, Clone, Default)]
pub struct TypeState {
    pub version: String,
    pub nonce: String,
    /// Empty means wildcard interest; this engine never narrows it.
    pub resource_names: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ProtocolState {
    types: HashMap<ResourceType, TypeState>,
}

impl ProtocolState {
    /// Applies one push to the state of its declared type.
    ///
    /// Payloads stay opaque; the only validation is that each resource's
    /// inner type url matches the declared one. On failure the type's state
    /// is left untouched and the caller is expected to nack.
    pub fn apply(
        &mut self,
        rtype: ResourceType,
        resp: &DiscoveryResponse,
    ) -> Result<(), HandleError> {
        for resource in &resp.resources {
            if !resource.type_url.is_empty() && resource.type_url != rtype.type_url() {
                return Err(HandleError::TypeUrlMismatch {
                    declared: rtype.type_url().to_string(),
                    found: resource.type_url.clone(),
                });
            }
        }
        let entry = self.types.entry(rtype).or_default();
        entry.version = resp.version_info.clone();
        entry.nonce = resp.nonce.clone();
        Ok(())
    }

    pub fn get(&self, rtype: ResourceType) -> Option<&TypeState> {
        self.types.get(&rtype)
    }

    /// Resource names currently tracked for a type; empty when none.
    pub fn tracked_names(&self, rtype: ResourceType) -> &[String] {
        self.types
            .get(&rtype)
            .map(|s| s.resource_names.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(rtype: ResourceType, version: &str, nonce: &str) -> DiscoveryResponse {
        DiscoveryResponse {
            version_info: version.to_string(),
            resources: Vec::new(),
            type_url: rtype.type_url().to_string(),
            nonce: nonce.to_string(),
        }
    }

    #[test]
    fn type_url_round_trip() {
        for rtype in [
            ResourceType::Cluster,
            ResourceType::Endpoint,
            ResourceType::Listener,
            ResourceType::Route,
        ] {
            assert_eq!(ResourceType::from_type_url(rtype.type_url()), Some(rtype));
        }
        assert_eq!(ResourceType::from_type_url("type.googleapis.com/foo"), None);
    }

    #[test]
    fn apply_records_version_and_nonce() {
        let mut state = ProtocolState::default();
        state
            .apply(ResourceType::Cluster, &push(ResourceType::Cluster, "v7", "n3"))
            .unwrap();

        let cds = state.get(ResourceType::Cluster).unwrap();
        assert_eq!(cds.version, "v7");
        assert_eq!(cds.nonce, "n3");
        assert!(cds.resource_names.is_empty());
    }

    #[test]
    fn apply_is_isolated_per_type() {
        let mut state = ProtocolState::default();
        state
            .apply(ResourceType::Cluster, &push(ResourceType::Cluster, "v1", "a"))
            .unwrap();
        state
            .apply(ResourceType::Listener, &push(ResourceType::Listener, "v9", "b"))
            .unwrap();

        assert_eq!(state.get(ResourceType::Cluster).unwrap().version, "v1");
        assert_eq!(state.get(ResourceType::Listener).unwrap().version, "v9");
        assert!(state.get(ResourceType::Route).is_none());
        assert!(state.tracked_names(ResourceType::Route).is_empty());
    }

    #[test]
    fn mismatched_payload_type_is_rejected_without_mutation() {
        let mut state = ProtocolState::default();
        state
            .apply(ResourceType::Cluster, &push(ResourceType::Cluster, "v1", "n1"))
            .unwrap();

        let mut bad = push(ResourceType::Cluster, "v2", "n2");
        bad.resources.push(prost_types::Any {
            type_url: LISTENER_TYPE_URL.to_string(),
            value: Vec::new(),
        });
        assert!(state.apply(ResourceType::Cluster, &bad).is_err());

        // the failed push must not have advanced cds state
        let cds = state.get(ResourceType::Cluster).unwrap();
        assert_eq!(cds.version, "v1");
        assert_eq!(cds.nonce, "n1");
    }
}
