//! Everything a command needs to reach one list: resolved config, output
//! mode, and a remote store rooted at the watchpath.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use olist_core::config::{CliOverrides, EffectiveConfig, resolve_config};
use olist_core::{BlobStore, FsBlobStore, ListRepository, RemoteList, RemoteStore, SyncError, Syncer};
use tracing::debug;

use crate::output::{CliError, OutputMode, render_error};

pub struct Session {
    pub config: EffectiveConfig,
    pub output: OutputMode,
    pub remote: Arc<RemoteStore>,
}

impl Session {
    /// Resolve configuration under `project_root` and connect.
    ///
    /// # Errors
    ///
    /// Returns an error when a config file cannot be read or parsed, or the
    /// list name is invalid.
    pub fn open(project_root: &Path, cli: &CliOverrides) -> Result<Self> {
        let config = resolve_config(project_root, cli)?;
        let output = OutputMode::from_resolved(&config.resolved_output);
        let store: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(config.watchpath.clone()));
        let remote = Arc::new(RemoteStore::new(store, config.project.lock.to_lock_config()));
        debug!(
            watchpath = %config.watchpath.display(),
            list = %config.list,
            client = remote.client_id(),
            "session opened"
        );
        Ok(Self {
            config,
            output,
            remote,
        })
    }

    pub fn list_name(&self) -> &str {
        &self.config.list
    }

    pub fn list(&self) -> RemoteList {
        self.remote.list(self.config.list.clone())
    }

    /// A syncer whose local view starts at the current remote content.
    ///
    /// # Errors
    ///
    /// Returns the rendered transport error when the list cannot be read.
    pub fn syncer(&self) -> Result<Syncer> {
        let list = self.list();
        let snapshot = list.get_content().map_err(|err| self.fail(&err))?;
        Ok(Syncer::with_local(snapshot, Arc::new(list)))
    }

    /// Render `err` in the session's output mode and turn it into the
    /// command's error.
    pub fn fail(&self, err: &SyncError) -> anyhow::Error {
        self.fail_with(CliError::from(err))
    }

    pub fn fail_with(&self, err: CliError) -> anyhow::Error {
        if let Err(render) = render_error(self.output, &err) {
            return render;
        }
        anyhow::anyhow!("{}", err.message)
    }
}

/// Keeps the last error a pass reported, for one-shot commands.
#[derive(Clone, Default)]
pub struct LastError(Arc<Mutex<Option<CliError>>>);

impl LastError {
    pub fn attach(&self, syncer: &Syncer) {
        let slot = Arc::clone(&self.0);
        syncer.register_error_handler(move |err| {
            *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(CliError::from(err));
        });
    }

    pub fn take(&self) -> Option<CliError> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}
