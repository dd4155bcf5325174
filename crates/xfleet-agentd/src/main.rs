//! Mock xDS client fleet daemon.
//!
//! Starts N simulated sidecars against a discovery control plane and runs
//! them until interrupted. Options come from the environment, overridable
//! by flags:
//!
//! ```text
//! xfleet-agentd --service-cluster demo --worker-count 100
//! ```

use anyhow::{Context, bail};
use tokio_util::sync::CancellationToken;
use tracing::info;

use xfleet_core::{Fleet, FleetConfig};
use xfleet_observe::{LoggerConfig, init_logger};
use xfleet_xds::identity::{ControlPlaneVariant, ServiceTopology};

#[derive(Debug)]
struct Options {
    service_cluster: String,
    worker_count: usize,
    variant: ControlPlaneVariant,
    topology: ServiceTopology,
    log_level: String,
    log_format: String,
}

impl Options {
    fn parse(args: impl Iterator<Item = String>) -> anyhow::Result<Self> {
        Self::parse_with(args, |key| std::env::var(key).ok())
    }

    /// Environment access goes through `env` so tests can supply their own.
    fn parse_with(
        args: impl Iterator<Item = String>,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let env_or =
            |key: &str, default: &str| env(key).unwrap_or_else(|| default.to_string());
        let mut opts = Self {
            service_cluster: env_or("SERVICE_CLUSTER", "mock-xds-client"),
            worker_count: env_or("WORKER_COUNT", "1")
                .parse()
                .context("WORKER_COUNT must be a number")?,
            variant: ControlPlaneVariant::from_flag(&env_or("ISTIO_TYPE", "istio")),
            topology: ServiceTopology::from_flag(&env_or("SERVICE_TYPE", "multi")),
            log_level: env_or("LOG_LEVEL", "info"),
            log_format: env_or("LOG_FORMAT", "text"),
        };

        let mut args = args;
        while let Some(flag) = args.next() {
            let mut value = |name: &str| {
                args.next()
                    .with_context(|| format!("missing value for {name}"))
            };
            match flag.as_str() {
                "--service-cluster" | "-c" => opts.service_cluster = value(&flag)?,
                "--worker-count" | "-w" => {
                    opts.worker_count = value(&flag)?
                        .parse()
                        .context("--worker-count must be a number")?;
                }
                other => bail!("unknown flag: {other}"),
            }
        }
        Ok(opts)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Options::parse(std::env::args().skip(1))?;

    init_logger(&LoggerConfig {
        level: opts.log_level.clone(),
        format: opts.log_format.parse()?,
        ..Default::default()
    })?;
    info!(
        service_cluster = %opts.service_cluster,
        worker_count = opts.worker_count,
        variant = ?opts.variant,
        topology = ?opts.topology,
        "starting mock xds client fleet"
    );

    let fleet = Fleet::new(FleetConfig {
        service_cluster: opts.service_cluster,
        worker_count: opts.worker_count,
        variant: opts.variant,
        topology: opts.topology,
        bootstrap: None,
    })?;

    let token = CancellationToken::new();
    let stopper = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("stop signal received");
            stopper.cancel();
        }
    });

    fleet.run(token).await;
    info!("mock xds clients shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn args(list: &[&str]) -> std::vec::IntoIter<String> {
        list.iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .into_iter()
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_env_or_flags() {
        let opts = Options::parse_with(args(&[]), env(&[])).unwrap();
        assert_eq!(opts.service_cluster, "mock-xds-client");
        assert_eq!(opts.worker_count, 1);
        assert_eq!(opts.variant, ControlPlaneVariant::Generic);
        assert_eq!(opts.topology, ServiceTopology::MultiService);
    }

    #[test]
    fn env_overrides_defaults() {
        let opts = Options::parse_with(
            args(&[]),
            env(&[
                ("SERVICE_CLUSTER", "staging"),
                ("WORKER_COUNT", "42"),
                ("ISTIO_TYPE", "sofa"),
                ("SERVICE_TYPE", "single"),
            ]),
        )
        .unwrap();
        assert_eq!(opts.service_cluster, "staging");
        assert_eq!(opts.worker_count, 42);
        assert_eq!(opts.variant, ControlPlaneVariant::TenancyAware);
        assert_eq!(opts.topology, ServiceTopology::SingleService);
    }

    #[test]
    fn flags_override_env() {
        let opts = Options::parse_with(
            args(&["--service-cluster", "demo", "--worker-count", "7"]),
            env(&[("SERVICE_CLUSTER", "staging"), ("WORKER_COUNT", "42")]),
        )
        .unwrap();
        assert_eq!(opts.service_cluster, "demo");
        assert_eq!(opts.worker_count, 7);
    }

    #[test]
    fn unknown_flag_is_rejected() {
        assert!(Options::parse_with(args(&["--bogus"]), env(&[])).is_err());
    }

    #[test]
    fn worker_count_must_be_numeric() {
        assert!(Options::parse_with(args(&["--worker-count", "many"]), env(&[])).is_err());
        assert!(Options::parse_with(args(&[]), env(&[("WORKER_COUNT", "many")])).is_err());
    }
}
