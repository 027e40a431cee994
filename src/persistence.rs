//! Persistence coordinator
//!
//! Executes saves either on the caller's thread or on background workers.
//!
//! A background save stages its snapshot under a fresh [`SaveToken`], waits
//! (up to the entity's save timeout) for older saves of the same entity that
//! were still running when it started, cancels whatever is left, and then
//! commits. Commits are not strictly ordered: an older save that is slow to
//! reach its commit after the wait can still land last. Callers that need
//! strict recency must serialize their saves.

use crate::error::{CacheError, Result};
use crate::hooks::{Cleaner, SaveHooks, SaveToken};
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

/// Bookkeeping for one background save
struct InFlightSave {
    token: SaveToken,
    abort: AbortHandle,
    cancelled: Arc<AtomicBool>,
    cleaner: Option<Cleaner>,

    /// Never written to; closes when the worker task ends or is aborted
    finished: watch::Receiver<()>,
}

impl InFlightSave {
    fn is_finished(&self) -> bool {
        self.finished.has_changed().is_err()
    }

    async fn wait(&self) {
        let mut finished = self.finished.clone();
        let _ = finished.changed().await;
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.abort.abort();
    }
}

fn discard_artifact(cleaner: Option<&Cleaner>, name: &str, token: &SaveToken) {
    if let Some(cleaner) = cleaner {
        if let Err(e) = cleaner(name, token) {
            debug!("Ignoring cleanup failure for '{}' ({}): {}", name, token, e);
        }
    }
}

/// Runs saves and tracks background save workers per entity name
pub struct PersistenceCoordinator {
    runtime: Option<Handle>,
    in_flight: Mutex<HashMap<String, Vec<Arc<InFlightSave>>>>,
}

impl PersistenceCoordinator {
    /// Use the ambient tokio runtime for background saves, if there is one
    pub fn new() -> Self {
        Self {
            runtime: Handle::try_current().ok(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_runtime(runtime: Handle) -> Self {
        Self {
            runtime: Some(runtime),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Coordinator that always saves on the caller's thread
    pub fn detached() -> Self {
        Self {
            runtime: None,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn has_runtime(&self) -> bool {
        self.runtime.is_some()
    }

    /// Save and return once the backing store is updated
    ///
    /// Prefers the plain saver; falls back to stage + commit under a fresh
    /// token, discarding the staged artifact if either step fails.
    pub fn save_sync(&self, name: &str, contents: &Value, hooks: &SaveHooks) -> Result<()> {
        if let Some(saver) = &hooks.saver {
            return saver(name, contents);
        }

        if let Some((pre_saver, committer)) = hooks.staged() {
            let token = SaveToken::new();
            let result = pre_saver(name, contents, &token)
                .and_then(|_| committer(name, contents, &token));
            if result.is_err() {
                discard_artifact(hooks.cleaner.as_ref(), name, &token);
            }
            return result;
        }

        debug!("No saver configured for '{}', nothing persisted", name);
        Ok(())
    }

    /// Hand the save to a background worker and return immediately
    ///
    /// Without a runtime the save runs synchronously instead.
    pub fn save_async(
        &self,
        name: &str,
        contents: Value,
        hooks: SaveHooks,
        timeout: Duration,
    ) -> Result<()> {
        let Some(runtime) = &self.runtime else {
            warn!("Saving '{}' synchronously: no async runtime available", name);
            return self.save_sync(name, &contents, &hooks);
        };

        let mut in_flight = self.in_flight.lock();
        let tracked = in_flight.entry(name.to_string()).or_default();
        Self::reap(name, tracked);

        let token = SaveToken::new();
        let cancelled = Arc::new(AtomicBool::new(false));
        let (done, finished) = watch::channel(());
        let cleaner = hooks.cleaner.clone();

        let worker = SaveWorker {
            name: name.to_string(),
            contents: Arc::new(contents),
            hooks,
            token: token.clone(),
            cancelled: cancelled.clone(),
            timeout,
            older: tracked.clone(),
        };

        debug!(
            "Spawning background save for '{}' ({}), {} older save(s) in flight",
            name,
            token,
            worker.older.len()
        );

        let task = runtime.spawn(async move {
            let _done = done;
            worker.run().await;
        });

        tracked.push(Arc::new(InFlightSave {
            token,
            abort: task.abort_handle(),
            cancelled,
            cleaner,
            finished,
        }));

        Ok(())
    }

    /// Background saves for `name` that have not finished yet
    pub fn in_flight(&self, name: &str) -> usize {
        self.in_flight
            .lock()
            .get(name)
            .map(|tracked| tracked.iter().filter(|save| !save.is_finished()).count())
            .unwrap_or(0)
    }

    /// Wait until every background save has finished, then drop their bookkeeping
    pub async fn wait_idle(&self) {
        loop {
            let pending: Vec<Arc<InFlightSave>> = self
                .in_flight
                .lock()
                .values()
                .flatten()
                .filter(|save| !save.is_finished())
                .cloned()
                .collect();

            if pending.is_empty() {
                break;
            }
            join_all(pending.iter().map(|save| save.wait())).await;
        }

        let mut in_flight = self.in_flight.lock();
        for (name, tracked) in in_flight.iter_mut() {
            Self::reap(name, tracked);
        }
        in_flight.retain(|_, tracked| !tracked.is_empty());
    }

    /// Drop finished workers and discard whatever artifacts they left behind
    fn reap(name: &str, tracked: &mut Vec<Arc<InFlightSave>>) {
        tracked.retain(|save| {
            if save.is_finished() {
                discard_artifact(save.cleaner.as_ref(), name, &save.token);
                false
            } else {
                true
            }
        });
    }
}

impl Default for PersistenceCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PersistenceCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tracked: usize = self.in_flight.lock().values().map(Vec::len).sum();
        f.debug_struct("PersistenceCoordinator")
            .field("has_runtime", &self.runtime.is_some())
            .field("tracked_saves", &tracked)
            .finish()
    }
}

/// State carried by one background save
#[derive(Clone)]
struct SaveWorker {
    name: String,
    contents: Arc<Value>,
    hooks: SaveHooks,
    token: SaveToken,
    cancelled: Arc<AtomicBool>,
    timeout: Duration,
    older: Vec<Arc<InFlightSave>>,
}

impl SaveWorker {
    async fn run(self) {
        match self.execute().await {
            Ok(()) => debug!("Background save for '{}' committed ({})", self.name, self.token),
            Err(CacheError::SaveSuperseded { .. }) => {
                debug!("Background save for '{}' superseded ({})", self.name, self.token)
            }
            Err(e) => {
                warn!("Ignored error in '{}' background save: {}", self.name, e);
                self.discard();
            }
        }
    }

    async fn execute(&self) -> Result<()> {
        let worker = self.clone();
        run_blocking(move || worker.stage()).await?;

        self.supersede_older().await;

        let worker = self.clone();
        run_blocking(move || worker.commit()).await
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn superseded(&self) -> CacheError {
        self.discard();
        CacheError::SaveSuperseded {
            name: self.name.clone(),
        }
    }

    fn discard(&self) {
        discard_artifact(self.hooks.cleaner.as_ref(), &self.name, &self.token);
    }

    fn stage(&self) -> Result<()> {
        let result = match self.hooks.staged() {
            Some((pre_saver, _)) => pre_saver(&self.name, &self.contents, &self.token),
            // A plain saver writes everything at commit time
            None => Ok(()),
        };

        if self.is_cancelled() {
            return Err(self.superseded());
        }
        result
    }

    fn commit(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(self.superseded());
        }

        match (self.hooks.staged(), &self.hooks.saver) {
            (Some((_, committer)), _) => committer(&self.name, &self.contents, &self.token),
            (None, Some(saver)) => saver(&self.name, &self.contents),
            (None, None) => Ok(()),
        }
    }

    /// Give older saves `timeout` to finish, then cancel the stragglers
    async fn supersede_older(&self) {
        if self.older.is_empty() {
            return;
        }

        let waits = join_all(self.older.iter().map(|save| save.wait()));
        if tokio::time::timeout(self.timeout, waits).await.is_ok() {
            return;
        }

        for save in self.older.iter().filter(|save| !save.is_finished()) {
            warn!(
                "Killing previous save for '{}' cache ({}) after {:?}",
                self.name, save.token, self.timeout
            );
            save.cancel();
            discard_artifact(save.cleaner.as_ref(), &self.name, &save.token);
        }
    }
}

async fn run_blocking<F>(f: F) -> Result<()>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CacheError::Other(format!("save worker failed: {}", e)))?
}
