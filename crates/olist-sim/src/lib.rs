//! olist-sim: seeded multi-client simulation of the olist sync engine.
//!
//! Several clients, each with a private set of item texts, edit one shared
//! list through links that add latency and transient faults. After the
//! edit rounds the links heal, every client drains its queue, and the
//! [`oracle::ConvergenceOracle`] checks that nothing was lost.
//!
//! # Conventions
//!
//! - **Errors**: Use `anyhow::Result` for return types.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod campaign;
pub mod client;
pub mod network;
pub mod oracle;
pub mod rng;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Result, bail};
use olist_core::item::decode_lines;
use olist_core::store::BlobStore;
use olist_core::{LockConfig, MemoryBlobStore, PassReport, RemoteStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::client::{ClientId, Edit, SimulatedClient};
use crate::network::{LinkConfig, SimulatedLink};
use crate::oracle::{ClientOutcome, FinalState};
use crate::rng::DeterministicRng;

/// Name of the list every simulated client shares.
pub const SIM_LIST: &str = "sim";

/// Parameters of one simulation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    pub clients: usize,
    pub texts_per_client: usize,
    pub rounds: u64,
    /// Each client makes up to this many edits per round.
    pub max_edits_per_round: u64,
    pub link: LinkConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            clients: 3,
            texts_per_client: 4,
            rounds: 6,
            max_edits_per_round: 3,
            link: LinkConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceEventKind {
    Edit(Edit),
    Pass { client: ClientId, report: String },
    Heal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub round: u64,
    pub kind: TraceEventKind,
}

#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub seed: u64,
    pub trace: Vec<TraceEvent>,
    pub passes: usize,
    pub failed_passes: usize,
    pub faults_injected: usize,
    pub final_state: FinalState,
}

impl SimulationResult {
    /// Whether the run exercised a recovery path.
    #[must_use]
    pub const fn interesting_state_reached(&self) -> bool {
        self.failed_passes > 0
    }
}

/// Lock timings for simulated clients: stale only long after any pass.
fn sim_lock_config() -> LockConfig {
    LockConfig {
        stale_after: Duration::from_secs(5),
        retry_interval: Duration::from_millis(2),
        acquire_timeout: None,
    }
}

pub struct Simulator {
    config: SimulationConfig,
    shared: Arc<MemoryBlobStore>,
    clients: Vec<SimulatedClient>,
    trace: Vec<TraceEvent>,
    passes: usize,
    failed_passes: usize,
}

impl Simulator {
    /// # Errors
    ///
    /// Returns an error when the configuration has no clients or no texts.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        if config.clients == 0 {
            bail!("clients must be > 0");
        }
        if config.texts_per_client == 0 {
            bail!("texts_per_client must be > 0");
        }

        let shared = Arc::new(MemoryBlobStore::new());
        let mut rng = DeterministicRng::new(config.seed);
        let clients = (0..config.clients)
            .map(|id| {
                let salt = u64::try_from(id).unwrap_or(u64::MAX);
                let link = Arc::new(SimulatedLink::new(
                    Arc::clone(&shared) as Arc<dyn BlobStore>,
                    config.link,
                    rng.fork(salt),
                ));
                let remote = Arc::new(RemoteStore::with_client_id(
                    Arc::clone(&link) as Arc<dyn BlobStore>,
                    format!("{id:016x}"),
                    sim_lock_config(),
                ));
                let texts = (0..config.texts_per_client)
                    .map(|n| format!("c{id}-item{n}"))
                    .collect();
                SimulatedClient::new(id, texts, rng.fork(!salt), link, remote, SIM_LIST)
            })
            .collect();

        Ok(Self {
            config,
            shared,
            clients,
            trace: Vec::new(),
            passes: 0,
            failed_passes: 0,
        })
    }

    /// Run all rounds, heal, settle, and snapshot the final state.
    ///
    /// # Errors
    ///
    /// Returns an error if the shared store cannot be read at the end.
    pub fn run(&mut self) -> Result<SimulationResult> {
        info!(seed = self.config.seed, clients = self.clients.len(), "simulation started");

        for round in 0..self.config.rounds {
            for client in &mut self.clients {
                let edits = client_edits(client, self.config.max_edits_per_round);
                self.trace.extend(edits.into_iter().map(|edit| TraceEvent {
                    round,
                    kind: TraceEventKind::Edit(edit),
                }));
            }
            self.sync_all(round, true);
        }

        let settle = self.config.rounds;
        for client in &self.clients {
            client.link().heal();
        }
        self.trace.push(TraceEvent {
            round: settle,
            kind: TraceEventKind::Heal,
        });
        // One pass drains each queue, a second lets everyone see the
        // other clients' final commits.
        self.sync_all(settle, false);
        self.sync_all(settle + 1, false);

        let final_state = self.final_state()?;
        let faults_injected = self.clients.iter().map(|c| c.link().faults_injected()).sum();
        info!(
            seed = self.config.seed,
            passes = self.passes,
            failed = self.failed_passes,
            faults_injected,
            "simulation finished"
        );

        Ok(SimulationResult {
            seed: self.config.seed,
            trace: self.trace.clone(),
            passes: self.passes,
            failed_passes: self.failed_passes,
            faults_injected,
            final_state,
        })
    }

    /// Run one pass per client, concurrently or one after another.
    fn sync_all(&mut self, round: u64, concurrent: bool) {
        let reports: Vec<(ClientId, PassReport)> = if concurrent {
            thread::scope(|scope| {
                let handles: Vec<_> = self
                    .clients
                    .iter()
                    .map(|client| scope.spawn(move || (client.id(), client.sync())))
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| {
                        handle
                            .join()
                            .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
                    })
                    .collect()
            })
        } else {
            self.clients.iter().map(|c| (c.id(), c.sync())).collect()
        };

        for (client, report) in reports {
            debug!(round, client, ?report, "pass finished");
            self.passes += 1;
            if matches!(report, PassReport::Failed { .. }) {
                self.failed_passes += 1;
            }
            self.trace.push(TraceEvent {
                round,
                kind: TraceEventKind::Pass {
                    client,
                    report: format!("{report:?}"),
                },
            });
        }
    }

    fn final_state(&self) -> Result<FinalState> {
        let observer = RemoteStore::with_client_id(
            Arc::clone(&self.shared) as Arc<dyn BlobStore>,
            "observer",
            sim_lock_config(),
        );
        let remote = decode_lines(observer.download(SIM_LIST)?);

        let mut expected = BTreeMap::new();
        for client in &self.clients {
            expected.extend(client.expected().iter().map(|(t, c)| (t.clone(), *c)));
        }

        let clients = self
            .clients
            .iter()
            .map(|client| ClientOutcome {
                id: client.id(),
                view: client.syncer().get_local(),
                pending: client.syncer().pending().len(),
            })
            .collect();

        let lock_records = self
            .shared
            .paths()
            .into_iter()
            .filter(|path| path.starts_with('.'))
            .collect();

        Ok(FinalState {
            remote,
            expected,
            clients,
            lock_records,
        })
    }
}

fn client_edits(client: &mut SimulatedClient, max_edits: u64) -> Vec<Edit> {
    let count = client.next_edit_count(max_edits);
    (0..count).filter_map(|_| client.edit()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::ConvergenceOracle;

    fn quick(seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            rounds: 3,
            link: LinkConfig {
                max_latency_ms: 1,
                fault_percent: 20,
            },
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn rejects_empty_configurations() {
        let no_clients = SimulationConfig {
            clients: 0,
            ..SimulationConfig::default()
        };
        assert!(Simulator::new(no_clients).is_err());
    }

    #[test]
    fn run_converges() -> Result<()> {
        let result = Simulator::new(quick(11))?.run()?;
        let oracle = ConvergenceOracle::check_all(&result.final_state);
        assert!(oracle.passed, "{:?}", oracle.violations);
        assert!(result.passes >= quick(11).clients * 5);
        Ok(())
    }

    #[test]
    fn edits_are_reproducible_per_seed() -> Result<()> {
        let edits = |result: &SimulationResult| -> Vec<TraceEventKind> {
            result
                .trace
                .iter()
                .filter(|event| matches!(event.kind, TraceEventKind::Edit(_)))
                .map(|event| event.kind.clone())
                .collect()
        };
        let first = Simulator::new(quick(5))?.run()?;
        let second = Simulator::new(quick(5))?.run()?;
        assert_eq!(edits(&first), edits(&second));
        Ok(())
    }
}
