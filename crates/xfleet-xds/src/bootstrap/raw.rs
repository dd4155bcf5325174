//! Raw serde shapes for the bootstrap document.
//!
//! Mirrors the envoy bootstrap JSON layout this client consumes:
//! `dynamic_resources` with an `ads_config` block, `static_resources` with a
//! cluster list, and an opaque `node` section. Unknown fields are ignored.

use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapDocument {
    #[serde(default)]
    pub dynamic_resources: Option<DynamicResources>,
    #[serde(default)]
    pub static_resources: Option<StaticResources>,
    /// Carried through opaque; the synthesized identity takes precedence.
    #[serde(default)]
    pub node: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DynamicResources {
    #[serde(default)]
    pub ads_config: Option<AdsConfigSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdsConfigSection {
    #[serde(default)]
    pub api_type: String,
    #[serde(default)]
    pub refresh_delay: Option<String>,
    #[serde(default)]
    pub set_node_on_first_message_only: bool,
    #[serde(default)]
    pub grpc_services: Vec<GrpcServiceRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GrpcServiceRef {
    #[serde(default)]
    pub envoy_grpc: Option<EnvoyGrpcRef>,
    #[serde(default)]
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnvoyGrpcRef {
    pub cluster_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StaticResources {
    #[serde(default)]
    pub clusters: Vec<RawCluster>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCluster {
    pub name: String,
    #[serde(default)]
    pub lb_policy: Option<String>,
    #[serde(default)]
    pub connect_timeout: Option<String>,
    #[serde(default)]
    pub load_assignment: Option<LoadAssignment>,
    /// Opaque transport-security reference; carried, never interpreted.
    #[serde(default)]
    pub transport_socket: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoadAssignment {
    #[serde(default)]
    pub endpoints: Vec<EndpointGroup>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointGroup {
    #[serde(default)]
    pub lb_endpoints: Vec<LbEndpoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LbEndpoint {
    #[serde(default)]
    pub endpoint: Option<EndpointEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointEntry {
    #[serde(default)]
    pub address: Option<Address>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub socket_address: Option<SocketAddress>,
    #[serde(default)]
    pub pipe: Option<Pipe>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SocketAddress {
    pub address: String,
    /// Only an explicit numeric port is supported; named ports are rejected.
    #[serde(default)]
    pub port_value: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pipe {
    pub path: String,
}

/// Parses a protobuf-JSON duration string such as `"10s"` or `"0.25s"`.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let seconds: f64 = value.trim().strip_suffix('s')?.parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(seconds))
}

/// Effective duration: the parsed positive value, or `default` when the
/// field is absent, unparsable, zero, or negative.
pub fn duration_or(value: Option<&str>, default: Duration) -> Duration {
    match value.and_then(parse_duration) {
        Some(d) if d > Duration::ZERO => d,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_whole_and_fractional_seconds() {
        assert_eq!(parse_duration("10s"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("0.25s"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration(" 1s "), Some(Duration::from_secs(1)));
    }

    #[test]
    fn rejects_malformed_durations() {
        assert_eq!(parse_duration("10"), None);
        assert_eq!(parse_duration("-1s"), None);
        assert_eq!(parse_duration("abc"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn duration_or_falls_back_on_non_positive() {
        let default = Duration::from_secs(10);
        assert_eq!(duration_or(None, default), default);
        assert_eq!(duration_or(Some("0s"), default), default);
        assert_eq!(duration_or(Some("junk"), default), default);
        assert_eq!(duration_or(Some("3s"), default), Duration::from_secs(3));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let doc: BootstrapDocument = serde_json::from_str(
            r#"{
                "dynamic_resources": {
                    "lds_config": {"ads": {}},
                    "ads_config": {"api_type": "GRPC", "transport_api_version": "V3"}
                },
                "static_resources": {"clusters": []},
                "node": {"id": "ignored"}
            }"#,
        )
        .unwrap();
        assert_eq!(
            doc.dynamic_resources.unwrap().ads_config.unwrap().api_type,
            "GRPC"
        );
    }
}
