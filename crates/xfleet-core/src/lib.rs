//! Fleet controller.
//!
//! Keeps exactly N simulated clients alive until the shared stop signal
//! fires. Admission is a bounded channel holding N slot tokens: every
//! attempt owns one token for its whole life, and returning the token is
//! what readmits a replacement. Each attempt gets a freshly synthesized
//! identity, so the control plane sees a new workload on every retry.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use xfleet_xds::XdsError;
use xfleet_xds::bootstrap;
use xfleet_xds::engine::{self, AdsStreamClient};
use xfleet_xds::identity::{ControlPlaneVariant, Identity, ServiceTopology};

const BACKOFF_FIRST: Duration = Duration::from_millis(100);
const BACKOFF_MAX: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("worker count must be at least 1, got {0}")]
    InvalidWorkerCount(usize),
}

#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Operator-supplied service cluster stamped into every identity.
    pub service_cluster: String,
    /// Number of simulated clients kept alive concurrently.
    pub worker_count: usize,
    pub variant: ControlPlaneVariant,
    pub topology: ServiceTopology,
    /// Raw bootstrap JSON overriding the built-in document.
    pub bootstrap: Option<String>,
}

/// One admission token. The failure streak travels with the slot through
/// its whole replacement chain, so a persistently failing slot keeps its
/// grown delay no matter how the rest of the fleet is doing.
#[derive(Debug)]
struct Slot {
    id: usize,
    failures: u32,
}

pub struct Fleet {
    config: Arc<FleetConfig>,
}

impl Fleet {
    pub fn new(config: FleetConfig) -> Result<Self, FleetError> {
        if config.worker_count == 0 {
            return Err(FleetError::InvalidWorkerCount(config.worker_count));
        }
        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// Runs the fleet until `token` is cancelled, then waits for every
    /// attempt to tear down before returning.
    pub async fn run(&self, token: CancellationToken) {
        let config = Arc::clone(&self.config);
        self.run_with(token, move |_slot, tok| {
            let config = Arc::clone(&config);
            async move { run_instance(&config, tok).await }
        })
        .await;
    }

    /// Supervision loop, generic over the attempt body so tests can inject
    /// one without a network.
    async fn run_with<F, Fut, E>(&self, token: CancellationToken, attempt: F)
    where
        F: Fn(usize, CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let worker_count = self.config.worker_count;
        // N tokens circulate between this queue and the running attempts,
        // so a send back into the queue can never block
        let (slots_tx, mut slots_rx) = mpsc::channel::<Slot>(worker_count);
        for id in 0..worker_count {
            slots_tx
                .try_send(Slot { id, failures: 0 })
                .expect("slot queue sized to worker count");
        }
        let mut attempts: JoinSet<()> = JoinSet::new();

        info!(worker_count, "fleet starting");
        loop {
            let mut slot = tokio::select! {
                _ = token.cancelled() => break,
                slot = slots_rx.recv() => match slot {
                    Some(slot) => slot,
                    None => break,
                },
                // reap finished attempts as they come back
                Some(_) = attempts.join_next(), if !attempts.is_empty() => continue,
            };

            let run = attempt(slot.id, token.clone());
            let token = token.clone();
            let slots_tx = slots_tx.clone();
            attempts.spawn(async move {
                match run.await {
                    Ok(()) => {
                        slot.failures = 0;
                    }
                    Err(e) => {
                        let delay = backoff_delay(slot.failures);
                        slot.failures = slot.failures.saturating_add(1);
                        warn!(
                            slot = slot.id,
                            error = %e,
                            ?delay,
                            "simulated client failed, backing off before replacement"
                        );
                        tokio::select! {
                            _ = token.cancelled() => {}
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
                // returning the token is the readmission signal
                let _ = slots_tx.send(slot).await;
            });
        }

        debug!("stop observed, draining attempts");
        while attempts.join_next().await.is_some() {}
        info!("fleet shut down");
    }
}

/// One simulated-client attempt: fresh identity, fresh configuration, one
/// stream run to completion.
async fn run_instance(config: &FleetConfig, token: CancellationToken) -> Result<(), XdsError> {
    let identity = Identity::synthesize(&config.service_cluster, config.variant, config.topology);
    info!(
        node = %identity.service_node,
        address = %identity.masked_address(),
        "starting simulated client"
    );

    let ads = match &config.bootstrap {
        Some(document) => bootstrap::parse_and_translate(document, identity)?,
        None => bootstrap::translate_default(identity)?,
    };
    debug!(
        refresh_delay = ?ads.refresh_delay,
        services = ads.services.len(),
        "bootstrap translated"
    );

    let client = AdsStreamClient::connect(&ads).await?;
    engine::run_stream(client, token).await
}

/// Capped exponential backoff between consecutive failing attempts.
fn backoff_delay(streak: u32) -> Duration {
    let factor = 2u32.saturating_pow(streak.min(16));
    BACKOFF_FIRST.saturating_mul(factor).min(BACKOFF_MAX)
}
