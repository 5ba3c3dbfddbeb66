//! Cascading shape deletion.
//!
//! Deleting a shape takes everything that depends on it along:
//!
//! 1. for a group, its member shapes and the connectors around them;
//! 2. for a container, its descendant closure and the connectors touching it;
//! 3. connectors attached directly to the shape;
//! 4. the shape itself.
//!
//! `blast_radius` computes that set without changing anything, and
//! `DeleteShapeCommand` removes it in exactly that order, recording every
//! removal with its document position so undo can put it all back.

use crate::commands::{Command, PersistOp};
use crate::error::CommandError;
use dgm_core::id::{ConnectorId, ShapeId};
use dgm_core::model::*;
use std::collections::HashSet;

// ─── Blast radius ────────────────────────────────────────────────────────

/// Everything a deletion of `target` would remove, grouped by cascade step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlastRadius {
    pub target: ShapeId,
    pub member_shapes: Vec<ShapeId>,
    pub member_connectors: Vec<ConnectorId>,
    pub descendant_shapes: Vec<ShapeId>,
    pub descendant_connectors: Vec<ConnectorId>,
    pub direct_connectors: Vec<ConnectorId>,
}

impl BlastRadius {
    /// True when deleting the target takes nothing else with it.
    pub fn is_empty(&self) -> bool {
        self.member_shapes.is_empty()
            && self.member_connectors.is_empty()
            && self.descendant_shapes.is_empty()
            && self.descendant_connectors.is_empty()
            && self.direct_connectors.is_empty()
    }

    /// Shapes removed, the target included.
    pub fn shape_count(&self) -> usize {
        1 + self.member_shapes.len() + self.descendant_shapes.len()
    }

    pub fn connector_count(&self) -> usize {
        self.member_connectors.len() + self.descendant_connectors.len() + self.direct_connectors.len()
    }
}

/// Preview what deleting `target` removes. `None` when the shape is absent.
///
/// A group member that is itself a container brings its own descendants
/// into the member set, since they cannot outlive it.
pub fn blast_radius(diagram: &Diagram, target: ShapeId) -> Option<BlastRadius> {
    let shape = diagram.shape(target)?;
    let mut shapes_taken: HashSet<ShapeId> = HashSet::from([target]);
    let mut connectors_taken: HashSet<ConnectorId> = HashSet::new();

    let mut member_shapes = Vec::new();
    let mut member_connectors = Vec::new();
    if let ShapePayload::Group {
        members,
        member_connectors: declared,
    } = &shape.payload
    {
        let ancestors: HashSet<ShapeId> = diagram.ancestors(target).into_iter().collect();
        for &member in members {
            if !diagram.contains_shape(member)
                || ancestors.contains(&member)
                || shapes_taken.contains(&member)
            {
                continue;
            }
            shapes_taken.insert(member);
            member_shapes.push(member);
            for nested in diagram.descendants(member) {
                if shapes_taken.insert(nested) {
                    member_shapes.push(nested);
                }
            }
        }

        let members_set: HashSet<ShapeId> = member_shapes.iter().copied().collect();
        let declared: HashSet<ConnectorId> = declared.iter().copied().collect();
        for c in diagram.connectors() {
            let touches_member =
                members_set.contains(&c.source.shape) || members_set.contains(&c.target.shape);
            if (declared.contains(&c.id) || touches_member) && connectors_taken.insert(c.id) {
                member_connectors.push(c.id);
            }
        }
    }

    let descendant_shapes: Vec<ShapeId> = diagram
        .descendants(target)
        .into_iter()
        .filter(|id| !shapes_taken.contains(id))
        .collect();
    shapes_taken.extend(descendant_shapes.iter().copied());

    let closure: HashSet<ShapeId> = descendant_shapes.iter().copied().collect();
    let mut descendant_connectors = Vec::new();
    for c in diagram.connectors() {
        let touches = closure.contains(&c.source.shape) || closure.contains(&c.target.shape);
        if touches && connectors_taken.insert(c.id) {
            descendant_connectors.push(c.id);
        }
    }

    let direct_connectors: Vec<ConnectorId> = diagram
        .connectors_touching(target)
        .into_iter()
        .filter(|id| connectors_taken.insert(*id))
        .collect();

    Some(BlastRadius {
        target,
        member_shapes,
        member_connectors,
        descendant_shapes,
        descendant_connectors,
        direct_connectors,
    })
}

// ─── Delete command ──────────────────────────────────────────────────────

/// Removal records of one cascade, in the order they were taken.
#[derive(Debug, Clone, Default)]
struct Captured {
    member_connectors: Vec<Removed<Connector>>,
    member_shapes: Vec<Removed<Shape>>,
    descendant_connectors: Vec<Removed<Connector>>,
    descendant_shapes: Vec<Removed<Shape>>,
    direct_connectors: Vec<Removed<Connector>>,
    target: Vec<Removed<Shape>>,
}

impl Captured {
    /// Put everything back, last removal first.
    fn restore(&self, diagram: &mut Diagram) -> Result<(), CommandError> {
        diagram.restore_shapes(&self.target)?;
        diagram.restore_connectors(&self.direct_connectors)?;
        diagram.restore_shapes(&self.descendant_shapes)?;
        diagram.restore_connectors(&self.descendant_connectors)?;
        diagram.restore_shapes(&self.member_shapes)?;
        diagram.restore_connectors(&self.member_connectors)?;
        Ok(())
    }

    fn delete_ops(&self) -> Vec<PersistOp> {
        fn shape_ids(records: &[Removed<Shape>]) -> Vec<ShapeId> {
            records.iter().map(|r| r.item.id).collect()
        }
        fn connector_ids(records: &[Removed<Connector>]) -> Vec<ConnectorId> {
            records.iter().map(|r| r.item.id).collect()
        }
        [
            (!self.member_connectors.is_empty())
                .then(|| PersistOp::DeleteConnectors(connector_ids(&self.member_connectors))),
            (!self.member_shapes.is_empty())
                .then(|| PersistOp::DeleteShapes(shape_ids(&self.member_shapes))),
            (!self.descendant_connectors.is_empty())
                .then(|| PersistOp::DeleteConnectors(connector_ids(&self.descendant_connectors))),
            (!self.descendant_shapes.is_empty())
                .then(|| PersistOp::DeleteShapes(shape_ids(&self.descendant_shapes))),
            (!self.direct_connectors.is_empty())
                .then(|| PersistOp::DeleteConnectors(connector_ids(&self.direct_connectors))),
            (!self.target.is_empty()).then(|| PersistOp::DeleteShapes(shape_ids(&self.target))),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    fn restore_ops(&self) -> Vec<PersistOp> {
        [
            (!self.target.is_empty()).then(|| PersistOp::RestoreShapes(self.target.clone())),
            (!self.direct_connectors.is_empty())
                .then(|| PersistOp::RestoreConnectors(self.direct_connectors.clone())),
            (!self.descendant_shapes.is_empty())
                .then(|| PersistOp::RestoreShapes(self.descendant_shapes.clone())),
            (!self.descendant_connectors.is_empty())
                .then(|| PersistOp::RestoreConnectors(self.descendant_connectors.clone())),
            (!self.member_shapes.is_empty())
                .then(|| PersistOp::RestoreShapes(self.member_shapes.clone())),
            (!self.member_connectors.is_empty())
                .then(|| PersistOp::RestoreConnectors(self.member_connectors.clone())),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Delete a shape and everything that depends on it. Deleting an absent
/// shape is a no-op.
#[derive(Debug)]
pub struct DeleteShapeCommand {
    id: ShapeId,
    captured: Option<Captured>,
}

impl DeleteShapeCommand {
    pub fn new(id: ShapeId) -> Self {
        Self { id, captured: None }
    }

    fn cascade(diagram: &mut Diagram, radius: &BlastRadius, captured: &mut Captured) -> Result<(), CommandError> {
        captured.member_connectors = diagram.remove_connectors(&radius.member_connectors);
        captured.member_shapes = diagram.remove_shapes(&radius.member_shapes)?;
        captured.descendant_connectors = diagram.remove_connectors(&radius.descendant_connectors);
        captured.descendant_shapes = diagram.remove_shapes(&radius.descendant_shapes)?;
        captured.direct_connectors = diagram.remove_connectors(&radius.direct_connectors);
        captured.target = diagram.remove_shapes(&[radius.target])?;
        Ok(())
    }
}

impl Command for DeleteShapeCommand {
    fn execute(&mut self, diagram: &mut Diagram) -> Result<Vec<PersistOp>, CommandError> {
        let Some(radius) = blast_radius(diagram, self.id) else {
            self.captured = None;
            return Ok(Vec::new());
        };

        let mut captured = Captured::default();
        if let Err(err) = Self::cascade(diagram, &radius, &mut captured) {
            if let Err(restore_err) = captured.restore(diagram) {
                log::warn!("rolling back delete of {} failed: {restore_err}", self.id);
            }
            return Err(err);
        }

        log::debug!(
            "deleted {} with {} shapes and {} connectors",
            self.id,
            radius.shape_count(),
            radius.connector_count()
        );
        let ops = captured.delete_ops();
        self.captured = Some(captured);
        Ok(ops)
    }

    fn undo(&mut self, diagram: &mut Diagram) -> Result<Vec<PersistOp>, CommandError> {
        let Some(captured) = self.captured.take() else {
            return Ok(Vec::new());
        };
        if let Err(err) = captured.restore(diagram) {
            self.captured = Some(captured);
            return Err(err);
        }
        Ok(captured.restore_ops())
    }

    fn description(&self) -> String {
        format!("delete {}", self.id)
    }
}
