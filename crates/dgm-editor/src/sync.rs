//! Dual-state sync engine: local working copy ↔ persisted diagram.
//!
//! Each open diagram has a local `Diagram` that the UI reads and mutates
//! synchronously. Changes reach the store afterwards:
//!
//! - **Commands** apply locally, enter the undo history, then persist their
//!   operations in order before `execute` returns. A store failure surfaces
//!   as `EditorError::Persistence`; the local change and its history entry
//!   stay, and the unsent operations wait in the diagram's outbox. Later
//!   commands queue behind them; `retry_pending_ops` resends them.
//!
//! - **Continuous edits** (drag, resize, typing) go through
//!   `update_local_shape` / `update_local_connector`. They apply at once and
//!   persist after a quiet period via the debounce scheduler. They are not
//!   undo steps; wrap the gesture's final state in a command for that.
//!
//! The local copy is seeded from the store once. Only `refresh` replaces it.

use crate::cascade::{BlastRadius, blast_radius};
use crate::commands::{Command, ConnectorPatch, PersistOp, ShapePatch};
use crate::config::EditorConfig;
use crate::debounce::{DebounceScheduler, PendingKey};
use crate::error::{CommandError, EditorError, StoreError};
use crate::history::CommandManager;
use crate::store::DiagramStore;
use dgm_core::id::{ConnectorId, DiagramId, ShapeId};
use dgm_core::model::Diagram;
use dgm_core::routing::{Route, route_all};
use log::{debug, warn};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// One open diagram.
#[derive(Debug)]
struct Session {
    local: Diagram,
    pending: DebounceScheduler,
    /// Command operations not yet accepted by the store, oldest first.
    outbox: VecDeque<PersistOp>,
}

impl Session {
    fn new(local: Diagram, delay: Duration) -> Self {
        Self {
            local,
            pending: DebounceScheduler::new(delay),
            outbox: VecDeque::new(),
        }
    }
}

pub struct SyncEngine<S: DiagramStore> {
    store: S,
    config: EditorConfig,
    sessions: HashMap<DiagramId, Session>,
    history: CommandManager,
}

impl<S: DiagramStore> SyncEngine<S> {
    pub fn new(store: S, config: EditorConfig) -> Self {
        Self {
            store,
            history: CommandManager::new(config.history_depth),
            config,
            sessions: HashMap::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn history(&self) -> &CommandManager {
        &self.history
    }

    /// The local working copy, if the diagram is open.
    pub fn local(&self, diagram: DiagramId) -> Option<&Diagram> {
        self.sessions.get(&diagram).map(|s| &s.local)
    }

    pub fn is_open(&self, diagram: DiagramId) -> bool {
        self.sessions.contains_key(&diagram)
    }

    // ─── Session lifecycle ───────────────────────────────────────────────

    /// Seed the local copy from the store. An already open diagram keeps its
    /// local copy untouched.
    pub async fn open(&mut self, diagram: DiagramId) -> Result<&Diagram, EditorError> {
        if !self.sessions.contains_key(&diagram) {
            let remote = self
                .store
                .get_diagram(diagram)
                .await
                .map_err(|err| persistence(diagram, "get_diagram", err))?;
            debug!("{diagram}: opened with {} shapes", remote.shape_count());
            self.sessions
                .insert(diagram, Session::new(remote, self.config.debounce()));
        }
        self.local(diagram)
            .ok_or(EditorError::UnknownDiagram(diagram))
    }

    /// Replace the local copy with the stored one. Pending debounced edits
    /// and unsent command operations are dropped, and the diagram's history
    /// is cleared.
    pub async fn refresh(&mut self, diagram: DiagramId) -> Result<&Diagram, EditorError> {
        let remote = self
            .store
            .get_diagram(diagram)
            .await
            .map_err(|err| persistence(diagram, "get_diagram", err))?;
        let delay = self.config.debounce();
        let session = self
            .sessions
            .entry(diagram)
            .or_insert_with(|| Session::new(remote.clone(), delay));
        let dropped = session.pending.cancel_all();
        let unsent = session.outbox.len();
        session.outbox.clear();
        session.local = remote;
        self.history.clear(diagram);
        debug!("{diagram}: refreshed, dropped {dropped} pending edits and {unsent} unsent ops");
        self.local(diagram)
            .ok_or(EditorError::UnknownDiagram(diagram))
    }

    /// Forget a diagram: local copy, pending edits and history.
    pub fn close(&mut self, diagram: DiagramId) -> bool {
        self.history.clear(diagram);
        self.sessions.remove(&diagram).is_some()
    }

    // ─── Commands ────────────────────────────────────────────────────────

    /// Apply `command` locally, record it, then persist its operations.
    pub async fn execute(
        &mut self,
        diagram: DiagramId,
        command: Box<dyn Command>,
    ) -> Result<String, EditorError> {
        let session = self
            .sessions
            .get_mut(&diagram)
            .ok_or(EditorError::UnknownDiagram(diagram))?;
        let applied = self.history.execute(&mut session.local, command)?;
        session.outbox.extend(applied.ops);
        drain_outbox(&self.store, diagram, &mut session.outbox).await?;
        Ok(applied.description)
    }

    /// Undo the last step and persist the reversal. `Ok(None)` when the
    /// history is empty.
    pub async fn undo(&mut self, diagram: DiagramId) -> Result<Option<String>, EditorError> {
        let session = self
            .sessions
            .get_mut(&diagram)
            .ok_or(EditorError::UnknownDiagram(diagram))?;
        let Some(applied) = self.history.undo(&mut session.local)? else {
            return Ok(None);
        };
        session.outbox.extend(applied.ops);
        drain_outbox(&self.store, diagram, &mut session.outbox).await?;
        Ok(Some(applied.description))
    }

    pub async fn redo(&mut self, diagram: DiagramId) -> Result<Option<String>, EditorError> {
        let session = self
            .sessions
            .get_mut(&diagram)
            .ok_or(EditorError::UnknownDiagram(diagram))?;
        let Some(applied) = self.history.redo(&mut session.local)? else {
            return Ok(None);
        };
        session.outbox.extend(applied.ops);
        drain_outbox(&self.store, diagram, &mut session.outbox).await?;
        Ok(Some(applied.description))
    }

    /// Resend command operations left over from an earlier store failure.
    /// Returns how many were accepted; on failure the rest stay queued.
    pub async fn retry_pending_ops(&mut self, diagram: DiagramId) -> Result<usize, EditorError> {
        let session = self
            .sessions
            .get_mut(&diagram)
            .ok_or(EditorError::UnknownDiagram(diagram))?;
        drain_outbox(&self.store, diagram, &mut session.outbox).await
    }

    /// Command operations still waiting for the store.
    pub fn unsent_ops(&self, diagram: DiagramId) -> usize {
        self.sessions.get(&diagram).map_or(0, |s| s.outbox.len())
    }

    pub fn begin_batch(&mut self, diagram: DiagramId) -> Result<(), EditorError> {
        self.require_open(diagram)?;
        self.history.begin_batch(diagram);
        Ok(())
    }

    /// Members of a batch were persisted as they ran; closing it only
    /// shapes the undo history.
    pub fn end_batch(&mut self, diagram: DiagramId) -> Result<bool, EditorError> {
        self.require_open(diagram)?;
        Ok(self.history.end_batch(diagram))
    }

    // ─── Continuous local edits ──────────────────────────────────────────

    /// Patch a shape in the local copy and schedule its persistence.
    /// Returns false when the shape does not exist.
    pub fn update_local_shape(
        &mut self,
        diagram: DiagramId,
        shape: ShapeId,
        patch: &ShapePatch,
        now: Instant,
    ) -> Result<bool, EditorError> {
        let session = self
            .sessions
            .get_mut(&diagram)
            .ok_or(EditorError::UnknownDiagram(diagram))?;
        let Some(current) = session.local.shape(shape) else {
            return Ok(false);
        };
        let next = patch.apply(current)?;
        session
            .local
            .replace_shape(next)
            .map_err(CommandError::from)?;
        session.pending.schedule(PendingKey::Shape(shape), now);
        Ok(true)
    }

    /// Patch a connector in the local copy and schedule its persistence.
    /// Returns false when the connector does not exist.
    pub fn update_local_connector(
        &mut self,
        diagram: DiagramId,
        connector: ConnectorId,
        patch: &ConnectorPatch,
        now: Instant,
    ) -> Result<bool, EditorError> {
        let session = self
            .sessions
            .get_mut(&diagram)
            .ok_or(EditorError::UnknownDiagram(diagram))?;
        let Some(current) = session.local.connector(connector) else {
            return Ok(false);
        };
        let next = patch.apply(current);
        session
            .local
            .replace_connector(next)
            .map_err(CommandError::from)?;
        session
            .pending
            .schedule(PendingKey::Connector(connector), now);
        Ok(true)
    }

    /// Persist every pending edit whose deadline has passed, across all open
    /// diagrams. Returns how many entities were written.
    ///
    /// Entries that could not be written are rescheduled; the first failure
    /// is returned after the remaining diagrams have been tried.
    pub async fn flush_due(&mut self, now: Instant) -> Result<usize, EditorError> {
        let mut due: Vec<(DiagramId, Vec<PendingKey>)> = self
            .sessions
            .iter_mut()
            .map(|(id, session)| (*id, session.pending.take_due(now)))
            .filter(|(_, keys)| !keys.is_empty())
            .collect();
        due.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));

        let mut flushed = 0;
        let mut first_error = None;
        for (diagram, keys) in due {
            match self.persist_pending(diagram, keys, now).await {
                Ok(count) => flushed += count,
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(flushed),
        }
    }

    /// Persist all of a diagram's pending edits now.
    pub async fn flush(&mut self, diagram: DiagramId) -> Result<usize, EditorError> {
        let keys = self
            .sessions
            .get_mut(&diagram)
            .ok_or(EditorError::UnknownDiagram(diagram))?
            .pending
            .take_all();
        self.persist_pending(diagram, keys, Instant::now()).await
    }

    /// Drop a diagram's pending edits without persisting them.
    pub fn cancel_pending(&mut self, diagram: DiagramId) -> usize {
        self.sessions
            .get_mut(&diagram)
            .map_or(0, |s| s.pending.cancel_all())
    }

    pub fn pending_count(&self, diagram: DiagramId) -> usize {
        self.sessions.get(&diagram).map_or(0, |s| s.pending.len())
    }

    /// Earliest deadline across all open diagrams.
    pub fn next_flush_deadline(&self) -> Option<Instant> {
        self.sessions
            .values()
            .filter_map(|s| s.pending.next_deadline())
            .min()
    }

    // ─── Derived views ───────────────────────────────────────────────────

    /// Exported notation of the local copy, regenerated only when stale.
    pub fn notation(&mut self, diagram: DiagramId) -> Result<&str, EditorError> {
        let session = self
            .sessions
            .get_mut(&diagram)
            .ok_or(EditorError::UnknownDiagram(diagram))?;
        Ok(session.local.exported_notation())
    }

    /// Connector routes for the local copy, recomputed on every call.
    pub fn routes(&self, diagram: DiagramId) -> Result<Vec<(ConnectorId, Route)>, EditorError> {
        let local = self
            .local(diagram)
            .ok_or(EditorError::UnknownDiagram(diagram))?;
        Ok(route_all(local, &self.config.router))
    }

    /// What deleting `shape` would take with it, without deleting anything.
    pub fn blast_radius(
        &self,
        diagram: DiagramId,
        shape: ShapeId,
    ) -> Result<Option<BlastRadius>, EditorError> {
        let local = self
            .local(diagram)
            .ok_or(EditorError::UnknownDiagram(diagram))?;
        Ok(blast_radius(local, shape))
    }

    // ─── Internals ───────────────────────────────────────────────────────

    fn require_open(&self, diagram: DiagramId) -> Result<(), EditorError> {
        if self.sessions.contains_key(&diagram) {
            Ok(())
        } else {
            Err(EditorError::UnknownDiagram(diagram))
        }
    }

    /// Write the entities behind `keys`. Unsent command operations go first,
    /// so a debounced value never overtakes an earlier command.
    async fn persist_pending(
        &mut self,
        diagram: DiagramId,
        keys: Vec<PendingKey>,
        now: Instant,
    ) -> Result<usize, EditorError> {
        if let Some(session) = self.sessions.get_mut(&diagram) {
            if let Err(err) = drain_outbox(&self.store, diagram, &mut session.outbox).await {
                for key in &keys {
                    session.pending.schedule(*key, now);
                }
                return Err(err);
            }
        }
        let mut flushed = 0;
        for (i, key) in keys.iter().enumerate() {
            // Entities deleted since the edit have nothing left to write.
            let Some(op) = self
                .sessions
                .get(&diagram)
                .and_then(|s| pending_op(&s.local, *key))
            else {
                continue;
            };
            let name = op.name();
            if let Err(err) = issue(&self.store, diagram, op).await {
                if let Some(session) = self.sessions.get_mut(&diagram) {
                    for key in &keys[i..] {
                        session.pending.schedule(*key, now);
                    }
                }
                return Err(persistence(diagram, name, err));
            }
            flushed += 1;
        }
        Ok(flushed)
    }
}

/// Issue queued operations front to back. An operation leaves the queue only
/// once the store accepted it.
async fn drain_outbox<S: DiagramStore + ?Sized>(
    store: &S,
    diagram: DiagramId,
    outbox: &mut VecDeque<PersistOp>,
) -> Result<usize, EditorError> {
    let mut sent = 0;
    while let Some(op) = outbox.front() {
        let name = op.name();
        if let Err(err) = issue(store, diagram, op.clone()).await {
            debug!("{diagram}: {} ops left unsent", outbox.len());
            return Err(persistence(diagram, name, err));
        }
        outbox.pop_front();
        sent += 1;
    }
    Ok(sent)
}

fn persistence(diagram: DiagramId, op: &str, err: StoreError) -> EditorError {
    warn!("{diagram}: {op} failed: {err}");
    EditorError::Persistence(err)
}

fn pending_op(local: &Diagram, key: PendingKey) -> Option<PersistOp> {
    match key {
        PendingKey::Shape(id) => local
            .shape(id)
            .map(|s| PersistOp::UpdateShapes(vec![s.clone()])),
        PendingKey::Connector(id) => local.connector(id).cloned().map(PersistOp::UpdateConnector),
    }
}

/// Send one operation to the store, using the single-entity call for
/// one-element batches.
async fn issue<S: DiagramStore + ?Sized>(
    store: &S,
    diagram: DiagramId,
    op: PersistOp,
) -> Result<Diagram, StoreError> {
    match op {
        PersistOp::AddShape { shape, position } => store.add_shape(diagram, shape, position).await,
        PersistOp::UpdateShapes(mut shapes) if shapes.len() == 1 => match shapes.pop() {
            Some(shape) => store.update_shape(diagram, shape).await,
            None => store.get_diagram(diagram).await,
        },
        PersistOp::UpdateShapes(shapes) => store.update_shapes(diagram, shapes).await,
        PersistOp::DeleteShapes(mut ids) if ids.len() == 1 => match ids.pop() {
            Some(id) => store.delete_shape(diagram, id).await,
            None => store.get_diagram(diagram).await,
        },
        PersistOp::DeleteShapes(ids) => store.delete_shapes(diagram, ids).await,
        PersistOp::RestoreShapes(mut records) if records.len() == 1 => match records.pop() {
            Some(record) => store.restore_shape(diagram, record).await,
            None => store.get_diagram(diagram).await,
        },
        PersistOp::RestoreShapes(records) => store.restore_shapes(diagram, records).await,
        PersistOp::AddConnector {
            connector,
            position,
        } => store.add_connector(diagram, connector, position).await,
        PersistOp::UpdateConnector(connector) => store.update_connector(diagram, connector).await,
        PersistOp::DeleteConnectors(mut ids) if ids.len() == 1 => match ids.pop() {
            Some(id) => store.delete_connector(diagram, id).await,
            None => store.get_diagram(diagram).await,
        },
        PersistOp::DeleteConnectors(ids) => store.delete_connectors(diagram, ids).await,
        PersistOp::RestoreConnectors(mut records) if records.len() == 1 => match records.pop() {
            Some(record) => store.restore_connector(diagram, record).await,
            None => store.get_diagram(diagram).await,
        },
        PersistOp::RestoreConnectors(records) => store.restore_connectors(diagram, records).await,
    }
}
