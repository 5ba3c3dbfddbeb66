//! Persistence contract and the in-memory reference backend.
//!
//! The editor only talks to storage through `DiagramStore`. Batch methods
//! have default implementations that loop over the single-entity calls, so
//! a backend without batch primitives only implements the basic set.

use crate::error::StoreError;
use async_trait::async_trait;
use dgm_core::id::{ConnectorId, DiagramId, ShapeId};
use dgm_core::model::{Connector, Diagram, Removed, Shape};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Async storage for diagrams. Every write returns the stored diagram as it
/// is after the write.
#[async_trait]
pub trait DiagramStore: Send + Sync {
    async fn get_diagram(&self, diagram: DiagramId) -> Result<Diagram, StoreError>;

    async fn get_shape(&self, diagram: DiagramId, shape: ShapeId) -> Result<Shape, StoreError>;

    async fn add_shape(
        &self,
        diagram: DiagramId,
        shape: Shape,
        position: Option<usize>,
    ) -> Result<Diagram, StoreError>;

    async fn update_shape(&self, diagram: DiagramId, shape: Shape) -> Result<Diagram, StoreError>;

    async fn delete_shape(&self, diagram: DiagramId, shape: ShapeId) -> Result<Diagram, StoreError>;

    async fn restore_shape(
        &self,
        diagram: DiagramId,
        record: Removed<Shape>,
    ) -> Result<Diagram, StoreError>;

    async fn add_connector(
        &self,
        diagram: DiagramId,
        connector: Connector,
        position: Option<usize>,
    ) -> Result<Diagram, StoreError>;

    async fn update_connector(
        &self,
        diagram: DiagramId,
        connector: Connector,
    ) -> Result<Diagram, StoreError>;

    async fn delete_connector(
        &self,
        diagram: DiagramId,
        connector: ConnectorId,
    ) -> Result<Diagram, StoreError>;

    async fn restore_connector(
        &self,
        diagram: DiagramId,
        record: Removed<Connector>,
    ) -> Result<Diagram, StoreError>;

    // ─── Batch primitives (per-entity fallbacks) ─────────────────────────

    async fn update_shapes(
        &self,
        diagram: DiagramId,
        shapes: Vec<Shape>,
    ) -> Result<Diagram, StoreError> {
        let mut latest = None;
        for shape in shapes {
            latest = Some(self.update_shape(diagram, shape).await?);
        }
        self.latest_or_fetch(diagram, latest).await
    }

    /// Children come after their containers in a cascade, so the fallback
    /// deletes back to front.
    async fn delete_shapes(
        &self,
        diagram: DiagramId,
        shapes: Vec<ShapeId>,
    ) -> Result<Diagram, StoreError> {
        let mut latest = None;
        for shape in shapes.into_iter().rev() {
            latest = Some(self.delete_shape(diagram, shape).await?);
        }
        self.latest_or_fetch(diagram, latest).await
    }

    /// Records must be in ascending position order, as removal returns them.
    async fn restore_shapes(
        &self,
        diagram: DiagramId,
        records: Vec<Removed<Shape>>,
    ) -> Result<Diagram, StoreError> {
        let mut latest = None;
        for record in records {
            latest = Some(self.restore_shape(diagram, record).await?);
        }
        self.latest_or_fetch(diagram, latest).await
    }

    async fn delete_connectors(
        &self,
        diagram: DiagramId,
        connectors: Vec<ConnectorId>,
    ) -> Result<Diagram, StoreError> {
        let mut latest = None;
        for connector in connectors {
            latest = Some(self.delete_connector(diagram, connector).await?);
        }
        self.latest_or_fetch(diagram, latest).await
    }

    async fn restore_connectors(
        &self,
        diagram: DiagramId,
        records: Vec<Removed<Connector>>,
    ) -> Result<Diagram, StoreError> {
        let mut latest = None;
        for record in records {
            latest = Some(self.restore_connector(diagram, record).await?);
        }
        self.latest_or_fetch(diagram, latest).await
    }

    #[doc(hidden)]
    async fn latest_or_fetch(
        &self,
        diagram: DiagramId,
        latest: Option<Diagram>,
    ) -> Result<Diagram, StoreError> {
        match latest {
            Some(d) => Ok(d),
            None => self.get_diagram(diagram).await,
        }
    }
}

// ─── In-memory store ─────────────────────────────────────────────────────

/// Reference backend: each diagram is kept as a MessagePack blob.
///
/// Records every call by method name and can be switched to fail all calls
/// with `StoreError::Unavailable`, which makes it the test double for the
/// sync engine as well.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    blobs: Mutex<HashMap<DiagramId, Vec<u8>>>,
    unavailable: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or overwrite a diagram directly, bypassing the call log.
    pub fn put_diagram(&self, diagram: &Diagram) -> Result<(), StoreError> {
        self.save(diagram)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Method names of every call so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    fn begin(&self, method: &str) -> Result<(), StoreError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(method.to_string());
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("{method}: backend offline")));
        }
        Ok(())
    }

    fn load(&self, id: DiagramId) -> Result<Diagram, StoreError> {
        let blobs = self.blobs.lock().map_err(|_| poisoned())?;
        let blob = blobs
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("diagram {id}")))?;
        Ok(rmp_serde::from_slice(blob)?)
    }

    fn save(&self, diagram: &Diagram) -> Result<(), StoreError> {
        let blob = rmp_serde::to_vec_named(diagram)?;
        self.blobs
            .lock()
            .map_err(|_| poisoned())?
            .insert(diagram.id, blob);
        Ok(())
    }

    /// Load, mutate and write back one diagram.
    fn modify<F>(&self, method: &str, id: DiagramId, f: F) -> Result<Diagram, StoreError>
    where
        F: FnOnce(&mut Diagram) -> Result<(), StoreError>,
    {
        self.begin(method)?;
        let mut diagram = self.load(id)?;
        f(&mut diagram)?;
        self.save(&diagram)?;
        Ok(diagram)
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("store lock poisoned".to_string())
}

#[async_trait]
impl DiagramStore for InMemoryStore {
    async fn get_diagram(&self, diagram: DiagramId) -> Result<Diagram, StoreError> {
        self.begin("get_diagram")?;
        self.load(diagram)
    }

    async fn get_shape(&self, diagram: DiagramId, shape: ShapeId) -> Result<Shape, StoreError> {
        self.begin("get_shape")?;
        self.load(diagram)?
            .shape(shape)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("shape {shape}")))
    }

    async fn add_shape(
        &self,
        diagram: DiagramId,
        shape: Shape,
        position: Option<usize>,
    ) -> Result<Diagram, StoreError> {
        self.modify("add_shape", diagram, |d| Ok(d.insert_shape(shape, position)?))
    }

    async fn update_shape(&self, diagram: DiagramId, shape: Shape) -> Result<Diagram, StoreError> {
        self.modify("update_shape", diagram, |d| {
            d.replace_shape(shape)?;
            Ok(())
        })
    }

    async fn delete_shape(&self, diagram: DiagramId, shape: ShapeId) -> Result<Diagram, StoreError> {
        self.modify("delete_shape", diagram, |d| {
            if !d.contains_shape(shape) {
                return Err(StoreError::NotFound(format!("shape {shape}")));
            }
            d.remove_shapes(&[shape])?;
            Ok(())
        })
    }

    async fn restore_shape(
        &self,
        diagram: DiagramId,
        record: Removed<Shape>,
    ) -> Result<Diagram, StoreError> {
        self.modify("restore_shape", diagram, |d| {
            Ok(d.restore_shapes(std::slice::from_ref(&record))?)
        })
    }

    async fn add_connector(
        &self,
        diagram: DiagramId,
        connector: Connector,
        position: Option<usize>,
    ) -> Result<Diagram, StoreError> {
        self.modify("add_connector", diagram, |d| {
            Ok(d.insert_connector(connector, position)?)
        })
    }

    async fn update_connector(
        &self,
        diagram: DiagramId,
        connector: Connector,
    ) -> Result<Diagram, StoreError> {
        self.modify("update_connector", diagram, |d| {
            d.replace_connector(connector)?;
            Ok(())
        })
    }

    async fn delete_connector(
        &self,
        diagram: DiagramId,
        connector: ConnectorId,
    ) -> Result<Diagram, StoreError> {
        self.modify("delete_connector", diagram, |d| {
            if d.remove_connectors(&[connector]).is_empty() {
                return Err(StoreError::NotFound(format!("connector {connector}")));
            }
            Ok(())
        })
    }

    async fn restore_connector(
        &self,
        diagram: DiagramId,
        record: Removed<Connector>,
    ) -> Result<Diagram, StoreError> {
        self.modify("restore_connector", diagram, |d| {
            Ok(d.restore_connectors(std::slice::from_ref(&record))?)
        })
    }

    // Native batches: one load/save per call, all or nothing.

    async fn update_shapes(
        &self,
        diagram: DiagramId,
        shapes: Vec<Shape>,
    ) -> Result<Diagram, StoreError> {
        self.modify("update_shapes", diagram, |d| {
            for shape in shapes {
                d.replace_shape(shape)?;
            }
            Ok(())
        })
    }

    async fn delete_shapes(
        &self,
        diagram: DiagramId,
        shapes: Vec<ShapeId>,
    ) -> Result<Diagram, StoreError> {
        self.modify("delete_shapes", diagram, |d| {
            d.remove_shapes(&shapes)?;
            Ok(())
        })
    }

    async fn restore_shapes(
        &self,
        diagram: DiagramId,
        records: Vec<Removed<Shape>>,
    ) -> Result<Diagram, StoreError> {
        self.modify("restore_shapes", diagram, |d| Ok(d.restore_shapes(&records)?))
    }

    async fn delete_connectors(
        &self,
        diagram: DiagramId,
        connectors: Vec<ConnectorId>,
    ) -> Result<Diagram, StoreError> {
        self.modify("delete_connectors", diagram, |d| {
            d.remove_connectors(&connectors);
            Ok(())
        })
    }

    async fn restore_connectors(
        &self,
        diagram: DiagramId,
        records: Vec<Removed<Connector>>,
    ) -> Result<Diagram, StoreError> {
        self.modify("restore_connectors", diagram, |d| {
            Ok(d.restore_connectors(&records)?)
        })
    }
}
