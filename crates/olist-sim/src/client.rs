use std::collections::BTreeMap;
use std::sync::Arc;

use olist_core::{CheckItem, Operation, PassReport, RemoteStore, Syncer};
use serde::{Deserialize, Serialize};

use crate::network::SimulatedLink;
use crate::rng::DeterministicRng;

/// Stable identifier for a simulated client.
pub type ClientId = usize;

/// A local edit a client made, for the trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edit {
    pub client: ClientId,
    pub op: String,
    /// Whether the engine accepted it. A refused edit means the local view
    /// disagreed with what the user saw.
    pub applied: bool,
}

/// One client: its own sync engine, its own link, and a private set of
/// item texts nobody else edits.
#[derive(Debug)]
pub struct SimulatedClient {
    id: ClientId,
    texts: Vec<String>,
    rng: DeterministicRng,
    link: Arc<SimulatedLink>,
    syncer: Syncer,
    /// What the user believes their texts look like, independent of sync.
    model: BTreeMap<String, bool>,
}

impl SimulatedClient {
    #[must_use]
    pub fn new(
        id: ClientId,
        texts: Vec<String>,
        rng: DeterministicRng,
        link: Arc<SimulatedLink>,
        remote: Arc<RemoteStore>,
        list: &str,
    ) -> Self {
        Self {
            id,
            texts,
            rng,
            link,
            syncer: Syncer::new(Arc::new(remote.list(list))),
            model: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> ClientId {
        self.id
    }

    #[must_use]
    pub const fn syncer(&self) -> &Syncer {
        &self.syncer
    }

    #[must_use]
    pub fn link(&self) -> &SimulatedLink {
        &self.link
    }

    /// Make one random edit to one of this client's texts, the way a user
    /// would: add it when absent, otherwise toggle or remove it.
    pub fn edit(&mut self) -> Option<Edit> {
        let text = self.texts.get(self.rng.pick(self.texts.len()))?.clone();
        let op = match self.model.get(&text) {
            None => Operation::Add(CheckItem::new(text.clone(), self.rng.hit_rate_percent(30))),
            Some(&checked) if self.rng.hit_rate_percent(70) => {
                Operation::Toggle(CheckItem::new(text.clone(), checked))
            }
            Some(&checked) => Operation::Remove(CheckItem::new(text.clone(), checked)),
        };

        let applied = match &op {
            Operation::Add(item) => {
                self.model.insert(text, item.is_checked());
                self.syncer.add(item)
            }
            Operation::Remove(item) => {
                self.model.remove(&text);
                self.syncer.remove(item)
            }
            Operation::Toggle(item) => {
                self.model.insert(text, !item.is_checked());
                self.syncer.toggle(item)
            }
            Operation::Noop(_) => false,
        };
        Some(Edit {
            client: self.id,
            op: op.to_string(),
            applied,
        })
    }

    /// How many edits to make this round, up to `max`.
    pub fn next_edit_count(&mut self, max: u64) -> u64 {
        self.rng.next_bounded(max.saturating_add(1))
    }

    pub fn sync(&self) -> PassReport {
        self.syncer.run_once()
    }

    /// What the remote must hold for this client's texts once everything
    /// is committed.
    #[must_use]
    pub const fn expected(&self) -> &BTreeMap<String, bool> {
        &self.model
    }
}
