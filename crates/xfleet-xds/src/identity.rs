//! Synthetic workload identities.
//!
//! Every simulated sidecar presents a freshly generated node id so the
//! control plane sees a fleet of distinct workloads. Randomness here is for
//! diversity only, never for security.

use std::collections::HashMap;

use rand::Rng;

use crate::Node;

/// Ten disjoint public IPv4 ranges the generated addresses are drawn from.
const IP_RANGES: [(u32, u32); 10] = [
    (607_649_792, 608_174_079),     // 36.56.0.0   - 36.63.255.255
    (1_038_614_528, 1_039_007_743), // 61.232.0.0  - 61.237.255.255
    (1_783_627_776, 1_784_676_351), // 106.80.0.0  - 106.95.255.255
    (2_035_023_872, 2_035_154_943), // 121.76.0.0  - 121.77.255.255
    (2_078_801_920, 2_079_064_063), // 123.232.0.0 - 123.235.255.255
    (2_344_878_080, 2_346_188_799), // 139.196.0.0 - 139.215.255.255
    (2_869_428_224, 2_869_952_511), // 171.8.0.0   - 171.15.255.255
    (3_058_696_192, 3_059_548_159), // 182.80.0.0  - 182.92.255.255
    (3_524_853_760, 3_526_361_087), // 210.25.0.0  - 210.47.255.255
    (3_725_590_528, 3_730_833_407), // 222.16.0.0  - 222.95.255.255
];

const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn random_ip_u32() -> u32 {
    let mut rng = rand::rng();
    let (lo, hi) = IP_RANGES[rng.random_range(0..IP_RANGES.len())];
    rng.random_range(lo..=hi)
}

fn random_str(alphabet: &[u8], len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| alphabet[rng.random_range(0..alphabet.len())] as char)
        .collect()
}

/// Random plausible public IPv4 address, e.g. `222.16.123.95`.
pub fn random_ip() -> String {
    let n = random_ip_u32();
    format!(
        "{}.{}.{}.{}",
        (n >> 24) & 0xff,
        (n >> 16) & 0xff,
        (n >> 8) & 0xff,
        n & 0xff
    )
}

/// Same as [`random_ip`] with the last two octets hidden, e.g. `222.16.*.*`.
pub fn random_masked_ip() -> String {
    let n = random_ip_u32();
    format!("{}.{}.*.*", (n >> 24) & 0xff, (n >> 16) & 0xff)
}

fn mask_ip(ip: &str) -> String {
    let mut octets = ip.splitn(3, '.');
    match (octets.next(), octets.next()) {
        (Some(a), Some(b)) => format!("{a}.{b}.*.*"),
        _ => ip.to_string(),
    }
}

/// Random application name: two lowercase segments joined by a hyphen.
pub fn random_app_name() -> String {
    format!("{}-{}", random_str(LOWER, 4), random_str(LOWER, 4))
}

/// Random pod name shaped like a Deployment-generated one.
pub fn random_pod_name(app_name: &str) -> String {
    format!(
        "{}{}-{}",
        app_name,
        random_str(BASE36, 9),
        random_str(BASE36, 5)
    )
}

/// Which control-plane flavour the synthesized node id targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlPlaneVariant {
    #[default]
    Generic,
    TenancyAware,
}

impl ControlPlaneVariant {
    /// Parses the `ISTIO_TYPE` style flag; unrecognized values fall back to
    /// the generic variant.
    pub fn from_flag(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "sofa" | "tenant" => ControlPlaneVariant::TenancyAware,
            _ => ControlPlaneVariant::Generic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ControlPlaneVariant::Generic => "istio",
            ControlPlaneVariant::TenancyAware => "sofa",
        }
    }
}

/// Whether the fleet mimics one service with many pods or many services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceTopology {
    SingleService,
    #[default]
    MultiService,
}

impl ServiceTopology {
    /// Parses the `SERVICE_TYPE` style flag; unrecognized values fall back
    /// to many distinct services.
    pub fn from_flag(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "single" | "single_service" => ServiceTopology::SingleService,
            _ => ServiceTopology::MultiService,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceTopology::SingleService => "single",
            ServiceTopology::MultiService => "multi",
        }
    }
}

/// Immutable identity of one simulated client.
///
/// Built once per attempt and owned by that attempt's stream engine; never
/// shared between workers.
#[derive(Debug, Clone)]
pub struct Identity {
    pub service_cluster: String,
    pub service_node: String,
    pub metadata: HashMap<String, String>,
}

impl Identity {
    pub fn synthesize(
        service_cluster: &str,
        variant: ControlPlaneVariant,
        topology: ServiceTopology,
    ) -> Self {
        let app = match topology {
            ServiceTopology::SingleService => "demo-app".to_string(),
            ServiceTopology::MultiService => random_app_name(),
        };
        let pod = format!("{}.{}", random_pod_name(&app), app);
        let node = format!("sidecar~{}~{}~{}", random_ip(), pod, app);

        let service_node = match variant {
            ControlPlaneVariant::Generic => node,
            ControlPlaneVariant::TenancyAware => format!(
                "{node}||multitenancy.workspace=middleware~multitenancy.cluster={service_cluster}"
            ),
        };

        let mut metadata = HashMap::new();
        metadata.insert("ISTIO_TYPE".to_string(), variant.as_str().to_string());
        metadata.insert("SERVICE_TYPE".to_string(), topology.as_str().to_string());

        Self {
            service_cluster: service_cluster.to_string(),
            service_node,
            metadata,
        }
    }

    /// This identity's address with the low octets hidden, for log lines
    /// that should not carry the full synthetic IP.
    pub fn masked_address(&self) -> String {
        self.service_node
            .split('~')
            .nth(1)
            .map(mask_ip)
            .unwrap_or_default()
    }

    /// Node descriptor attached to every outbound request.
    pub fn node(&self) -> Node {
        Node {
            id: self.service_node.clone(),
            cluster: self.service_cluster.clone(),
            metadata: self.metadata.clone(),
        }
    }
}
