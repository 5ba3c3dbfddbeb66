//! Reversible diagram commands.
//!
//! Every user mutation is a `Command`: `execute` validates, applies the change
//! to the local diagram and captures whatever `undo` needs. Both directions
//! return the `PersistOp`s the sync engine forwards to the store, in order.
//! A command whose target no longer exists is a no-op, not an error.

use crate::error::CommandError;
use dgm_core::geometry::Rect;
use dgm_core::id::{ConnectorId, ShapeId};
use dgm_core::model::*;
use std::fmt;

// ─── Persistence operations ──────────────────────────────────────────────

/// A store call produced by executing or undoing a command.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistOp {
    AddShape {
        shape: Shape,
        position: Option<usize>,
    },
    UpdateShapes(Vec<Shape>),
    DeleteShapes(Vec<ShapeId>),
    RestoreShapes(Vec<Removed<Shape>>),
    AddConnector {
        connector: Connector,
        position: Option<usize>,
    },
    UpdateConnector(Connector),
    DeleteConnectors(Vec<ConnectorId>),
    RestoreConnectors(Vec<Removed<Connector>>),
}

impl PersistOp {
    /// Store method this op maps to; single-entity batches use the plain call.
    pub fn name(&self) -> &'static str {
        match self {
            PersistOp::AddShape { .. } => "add_shape",
            PersistOp::UpdateShapes(v) if v.len() == 1 => "update_shape",
            PersistOp::UpdateShapes(_) => "update_shapes",
            PersistOp::DeleteShapes(v) if v.len() == 1 => "delete_shape",
            PersistOp::DeleteShapes(_) => "delete_shapes",
            PersistOp::RestoreShapes(v) if v.len() == 1 => "restore_shape",
            PersistOp::RestoreShapes(_) => "restore_shapes",
            PersistOp::AddConnector { .. } => "add_connector",
            PersistOp::UpdateConnector(_) => "update_connector",
            PersistOp::DeleteConnectors(v) if v.len() == 1 => "delete_connector",
            PersistOp::DeleteConnectors(_) => "delete_connectors",
            PersistOp::RestoreConnectors(v) if v.len() == 1 => "restore_connector",
            PersistOp::RestoreConnectors(_) => "restore_connectors",
        }
    }
}

// ─── Command trait ───────────────────────────────────────────────────────

/// A reversible mutation of one diagram.
///
/// `execute` must reject bad input before touching the diagram. It returns
/// no operations exactly when it changed nothing; the history drops such
/// commands. After an `undo`, calling `execute` again redoes the command.
pub trait Command: Send + fmt::Debug {
    fn execute(&mut self, diagram: &mut Diagram) -> Result<Vec<PersistOp>, CommandError>;
    fn undo(&mut self, diagram: &mut Diagram) -> Result<Vec<PersistOp>, CommandError>;
    fn description(&self) -> String;
}

// ─── Patches ─────────────────────────────────────────────────────────────

/// Field-level changes to a shape. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShapePatch {
    pub label: Option<String>,
    pub bounds: Option<Rect>,
    pub z_order: Option<i32>,
    pub locked: Option<bool>,
    pub subtype: Option<String>,
    pub payload: Option<ShapePayload>,
    /// `Some(None)` detaches the shape from its container.
    pub parent: Option<Option<ShapeId>>,
}

impl ShapePatch {
    pub fn bounds(bounds: Rect) -> Self {
        Self {
            bounds: Some(bounds),
            ..Self::default()
        }
    }

    pub fn label(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// The patched copy of `shape`. Locked shapes refuse geometry and
    /// containment changes unless the same patch unlocks them.
    pub fn apply(&self, shape: &Shape) -> Result<Shape, CommandError> {
        let repositions = self.bounds.is_some() || self.parent.is_some();
        if shape.locked && repositions && self.locked != Some(false) {
            return Err(CommandError::Validation(format!(
                "shape {} is locked",
                shape.id
            )));
        }
        let mut next = shape.clone();
        if let Some(label) = &self.label {
            next.label = label.clone();
        }
        if let Some(bounds) = self.bounds {
            next.bounds = bounds;
        }
        if let Some(z) = self.z_order {
            next.z_order = z;
        }
        if let Some(locked) = self.locked {
            next.locked = locked;
        }
        if let Some(subtype) = &self.subtype {
            next.subtype = subtype.clone();
        }
        if let Some(payload) = &self.payload {
            next.payload = payload.clone();
        }
        if let Some(parent) = self.parent {
            next.parent = parent;
        }
        Ok(next)
    }
}

/// Field-level changes to a connector. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectorPatch {
    pub source: Option<Endpoint>,
    pub target: Option<Endpoint>,
    pub routing: Option<RoutingStyle>,
    pub start_marker: Option<Marker>,
    pub end_marker: Option<Marker>,
    pub line_style: Option<LineStyle>,
    /// `Some(None)` clears the label.
    pub label: Option<Option<String>>,
    pub z_order: Option<i32>,
}

impl ConnectorPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, connector: &Connector) -> Connector {
        let mut next = connector.clone();
        if let Some(source) = self.source {
            next.source = source;
        }
        if let Some(target) = self.target {
            next.target = target;
        }
        if let Some(routing) = self.routing {
            next.routing = routing;
        }
        if let Some(marker) = self.start_marker {
            next.start_marker = marker;
        }
        if let Some(marker) = self.end_marker {
            next.end_marker = marker;
        }
        if let Some(style) = self.line_style {
            next.line_style = style;
        }
        if let Some(label) = &self.label {
            next.label = label.clone();
        }
        if let Some(z) = self.z_order {
            next.z_order = z;
        }
        next
    }
}

// ─── Shape commands ──────────────────────────────────────────────────────

#[derive(Debug)]
pub struct AddShapeCommand {
    shape: Shape,
    position: Option<usize>,
    applied: bool,
}

impl AddShapeCommand {
    pub fn new(shape: Shape) -> Self {
        Self {
            shape,
            position: None,
            applied: false,
        }
    }

    /// Insert at `position` in document order instead of appending.
    pub fn at(shape: Shape, position: usize) -> Self {
        Self {
            shape,
            position: Some(position),
            applied: false,
        }
    }
}

impl Command for AddShapeCommand {
    fn execute(&mut self, diagram: &mut Diagram) -> Result<Vec<PersistOp>, CommandError> {
        diagram.insert_shape(self.shape.clone(), self.position)?;
        // Pin the slot so a redo lands where the first execute did.
        self.position = diagram.shape_position(self.shape.id);
        self.applied = true;
        Ok(vec![PersistOp::AddShape {
            shape: self.shape.clone(),
            position: self.position,
        }])
    }

    fn undo(&mut self, diagram: &mut Diagram) -> Result<Vec<PersistOp>, CommandError> {
        if !self.applied {
            return Ok(Vec::new());
        }
        let removed = diagram.remove_shapes(&[self.shape.id])?;
        self.applied = false;
        Ok(removed
            .into_iter()
            .map(|r| PersistOp::DeleteShapes(vec![r.item.id]))
            .collect())
    }

    fn description(&self) -> String {
        format!("add {} {}", self.shape.shape_type, self.shape.id)
    }
}

#[derive(Debug)]
pub struct UpdateShapeCommand {
    id: ShapeId,
    patch: ShapePatch,
    previous: Option<Shape>,
}

impl UpdateShapeCommand {
    pub fn new(id: ShapeId, patch: ShapePatch) -> Self {
        Self {
            id,
            patch,
            previous: None,
        }
    }
}

impl Command for UpdateShapeCommand {
    fn execute(&mut self, diagram: &mut Diagram) -> Result<Vec<PersistOp>, CommandError> {
        let Some(current) = diagram.shape(self.id) else {
            return Ok(Vec::new());
        };
        let next = self.patch.apply(current)?;
        self.previous = Some(diagram.replace_shape(next.clone())?);
        Ok(vec![PersistOp::UpdateShapes(vec![next])])
    }

    fn undo(&mut self, diagram: &mut Diagram) -> Result<Vec<PersistOp>, CommandError> {
        let Some(previous) = self.previous.take() else {
            return Ok(Vec::new());
        };
        diagram.replace_shape(previous.clone())?;
        Ok(vec![PersistOp::UpdateShapes(vec![previous])])
    }

    fn description(&self) -> String {
        format!("update {}", self.id)
    }
}

/// Translate a shape together with everything it contains.
#[derive(Debug)]
pub struct MoveShapeCommand {
    id: ShapeId,
    dx: f64,
    dy: f64,
    previous: Vec<Shape>,
}

impl MoveShapeCommand {
    pub fn new(id: ShapeId, dx: f64, dy: f64) -> Self {
        Self {
            id,
            dx,
            dy,
            previous: Vec::new(),
        }
    }
}

impl Command for MoveShapeCommand {
    fn execute(&mut self, diagram: &mut Diagram) -> Result<Vec<PersistOp>, CommandError> {
        if !self.dx.is_finite() || !self.dy.is_finite() {
            return Err(CommandError::Validation(format!(
                "move offset ({}, {}) is not finite",
                self.dx, self.dy
            )));
        }
        if !diagram.contains_shape(self.id) {
            return Ok(Vec::new());
        }

        let mut ids = vec![self.id];
        ids.extend(diagram.descendants(self.id));
        let mut before = Vec::with_capacity(ids.len());
        let mut after = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(shape) = diagram.shape(id) else {
                continue;
            };
            if shape.locked {
                return Err(CommandError::Validation(format!("shape {id} is locked")));
            }
            let mut moved = shape.clone();
            moved.bounds = shape.bounds.translate(self.dx, self.dy);
            moved.validate(diagram.kind)?;
            before.push(shape.clone());
            after.push(moved);
        }

        for shape in &after {
            diagram.replace_shape(shape.clone())?;
        }
        self.previous = before;
        Ok(vec![PersistOp::UpdateShapes(after)])
    }

    fn undo(&mut self, diagram: &mut Diagram) -> Result<Vec<PersistOp>, CommandError> {
        if self.previous.is_empty() {
            return Ok(Vec::new());
        }
        let previous = std::mem::take(&mut self.previous);
        for shape in &previous {
            diagram.replace_shape(shape.clone())?;
        }
        Ok(vec![PersistOp::UpdateShapes(previous)])
    }

    fn description(&self) -> String {
        format!("move {} by ({}, {})", self.id, self.dx, self.dy)
    }
}

/// Switch a shape's type. Subtype and payload reset to the new type's defaults.
#[derive(Debug)]
pub struct ChangeShapeTypeCommand {
    id: ShapeId,
    shape_type: ShapeType,
    previous: Option<Shape>,
}

impl ChangeShapeTypeCommand {
    pub fn new(id: ShapeId, shape_type: ShapeType) -> Self {
        Self {
            id,
            shape_type,
            previous: None,
        }
    }
}

impl Command for ChangeShapeTypeCommand {
    fn execute(&mut self, diagram: &mut Diagram) -> Result<Vec<PersistOp>, CommandError> {
        let Some(current) = diagram.shape(self.id) else {
            return Ok(Vec::new());
        };
        let mut next = current.clone();
        next.shape_type = self.shape_type;
        next.subtype = self.shape_type.default_subtype().to_string();
        next.payload = ShapePayload::default_for(self.shape_type);
        self.previous = Some(diagram.replace_shape(next.clone())?);
        Ok(vec![PersistOp::UpdateShapes(vec![next])])
    }

    fn undo(&mut self, diagram: &mut Diagram) -> Result<Vec<PersistOp>, CommandError> {
        let Some(previous) = self.previous.take() else {
            return Ok(Vec::new());
        };
        diagram.replace_shape(previous.clone())?;
        Ok(vec![PersistOp::UpdateShapes(vec![previous])])
    }

    fn description(&self) -> String {
        format!("change {} to {}", self.id, self.shape_type)
    }
}

// ─── Connector commands ──────────────────────────────────────────────────

#[derive(Debug)]
pub struct AddConnectorCommand {
    connector: Connector,
    position: Option<usize>,
    applied: bool,
}

impl AddConnectorCommand {
    pub fn new(connector: Connector) -> Self {
        Self {
            connector,
            position: None,
            applied: false,
        }
    }
}

impl Command for AddConnectorCommand {
    fn execute(&mut self, diagram: &mut Diagram) -> Result<Vec<PersistOp>, CommandError> {
        diagram.insert_connector(self.connector.clone(), self.position)?;
        let id = self.connector.id;
        self.position = diagram.connectors().iter().position(|c| c.id == id);
        self.applied = true;
        Ok(vec![PersistOp::AddConnector {
            connector: self.connector.clone(),
            position: self.position,
        }])
    }

    fn undo(&mut self, diagram: &mut Diagram) -> Result<Vec<PersistOp>, CommandError> {
        if !self.applied {
            return Ok(Vec::new());
        }
        let removed = diagram.remove_connectors(&[self.connector.id]);
        self.applied = false;
        if removed.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![PersistOp::DeleteConnectors(vec![self.connector.id])])
    }

    fn description(&self) -> String {
        format!("connect {} -> {}", self.connector.source.shape, self.connector.target.shape)
    }
}

#[derive(Debug)]
pub struct DeleteConnectorCommand {
    id: ConnectorId,
    removed: Vec<Removed<Connector>>,
}

impl DeleteConnectorCommand {
    pub fn new(id: ConnectorId) -> Self {
        Self {
            id,
            removed: Vec::new(),
        }
    }
}

impl Command for DeleteConnectorCommand {
    fn execute(&mut self, diagram: &mut Diagram) -> Result<Vec<PersistOp>, CommandError> {
        self.removed = diagram.remove_connectors(&[self.id]);
        if self.removed.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![PersistOp::DeleteConnectors(vec![self.id])])
    }

    fn undo(&mut self, diagram: &mut Diagram) -> Result<Vec<PersistOp>, CommandError> {
        if self.removed.is_empty() {
            return Ok(Vec::new());
        }
        diagram.restore_connectors(&self.removed)?;
        Ok(vec![PersistOp::RestoreConnectors(std::mem::take(
            &mut self.removed,
        ))])
    }

    fn description(&self) -> String {
        format!("delete connector {}", self.id)
    }
}

#[derive(Debug)]
pub struct UpdateConnectorCommand {
    id: ConnectorId,
    patch: ConnectorPatch,
    previous: Option<Connector>,
}

impl UpdateConnectorCommand {
    pub fn new(id: ConnectorId, patch: ConnectorPatch) -> Self {
        Self {
            id,
            patch,
            previous: None,
        }
    }
}

impl Command for UpdateConnectorCommand {
    fn execute(&mut self, diagram: &mut Diagram) -> Result<Vec<PersistOp>, CommandError> {
        let Some(current) = diagram.connector(self.id) else {
            return Ok(Vec::new());
        };
        let next = self.patch.apply(current);
        self.previous = Some(diagram.replace_connector(next.clone())?);
        Ok(vec![PersistOp::UpdateConnector(next)])
    }

    fn undo(&mut self, diagram: &mut Diagram) -> Result<Vec<PersistOp>, CommandError> {
        let Some(previous) = self.previous.take() else {
            return Ok(Vec::new());
        };
        diagram.replace_connector(previous.clone())?;
        Ok(vec![PersistOp::UpdateConnector(previous)])
    }

    fn description(&self) -> String {
        format!("update connector {}", self.id)
    }
}

/// Switch a connector's relation kind, re-applying that kind's styling preset.
#[derive(Debug)]
pub struct ChangeConnectorTypeCommand {
    id: ConnectorId,
    kind: ConnectorKind,
    previous: Option<Connector>,
}

impl ChangeConnectorTypeCommand {
    pub fn new(id: ConnectorId, kind: ConnectorKind) -> Self {
        Self {
            id,
            kind,
            previous: None,
        }
    }
}

impl Command for ChangeConnectorTypeCommand {
    fn execute(&mut self, diagram: &mut Diagram) -> Result<Vec<PersistOp>, CommandError> {
        let Some(current) = diagram.connector(self.id) else {
            return Ok(Vec::new());
        };
        let mut next = current.clone();
        let (start, end, line) = self.kind.preset();
        next.kind = self.kind;
        next.start_marker = start;
        next.end_marker = end;
        next.line_style = line;
        self.previous = Some(diagram.replace_connector(next.clone())?);
        Ok(vec![PersistOp::UpdateConnector(next)])
    }

    fn undo(&mut self, diagram: &mut Diagram) -> Result<Vec<PersistOp>, CommandError> {
        let Some(previous) = self.previous.take() else {
            return Ok(Vec::new());
        };
        diagram.replace_connector(previous.clone())?;
        Ok(vec![PersistOp::UpdateConnector(previous)])
    }

    fn description(&self) -> String {
        format!("change connector {} to {}", self.id, self.kind.as_str())
    }
}

// ─── Batch ───────────────────────────────────────────────────────────────

/// Several commands applied as one undo step, all or nothing.
#[derive(Debug)]
pub struct BatchCommand {
    description: String,
    commands: Vec<Box<dyn Command>>,
}

impl BatchCommand {
    pub fn new(description: impl Into<String>, commands: Vec<Box<dyn Command>>) -> Self {
        Self {
            description: description.into(),
            commands,
        }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl Command for BatchCommand {
    fn execute(&mut self, diagram: &mut Diagram) -> Result<Vec<PersistOp>, CommandError> {
        let mut ops = Vec::new();
        for i in 0..self.commands.len() {
            match self.commands[i].execute(diagram) {
                Ok(more) => ops.extend(more),
                Err(err) => {
                    for done in self.commands[..i].iter_mut().rev() {
                        if let Err(undo_err) = done.undo(diagram) {
                            log::warn!("batch rollback of `{}` failed: {undo_err}", done.description());
                        }
                    }
                    return Err(err);
                }
            }
        }
        Ok(ops)
    }

    fn undo(&mut self, diagram: &mut Diagram) -> Result<Vec<PersistOp>, CommandError> {
        let mut ops = Vec::new();
        let count = self.commands.len();
        for i in (0..count).rev() {
            match self.commands[i].undo(diagram) {
                Ok(more) => ops.extend(more),
                Err(err) => {
                    for undone in self.commands[i + 1..].iter_mut() {
                        if let Err(redo_err) = undone.execute(diagram) {
                            log::warn!("batch re-apply of `{}` failed: {redo_err}", undone.description());
                        }
                    }
                    return Err(err);
                }
            }
        }
        Ok(ops)
    }

    fn description(&self) -> String {
        self.description.clone()
    }
}
