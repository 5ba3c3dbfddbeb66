//! Per-diagram undo/redo history.
//!
//! Every diagram id gets its own pair of stacks; nothing is shared between
//! diagrams. Commands executed between `begin_batch` and `end_batch` are
//! applied live and collapse into a single `BatchCommand` undo step when the
//! outermost batch closes.

use crate::commands::{BatchCommand, Command, PersistOp};
use crate::error::CommandError;
use dgm_core::id::DiagramId;
use dgm_core::model::Diagram;
use log::debug;
use std::collections::HashMap;

/// Outcome of an execute, undo or redo: what happened and what to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub description: String,
    pub ops: Vec<PersistOp>,
}

#[derive(Debug, Default)]
struct History {
    undo_stack: Vec<Box<dyn Command>>,
    redo_stack: Vec<Box<dyn Command>>,
    /// Batch nesting depth (0 = not batching).
    batch_depth: usize,
    batch: Vec<Box<dyn Command>>,
}

impl History {
    fn push_undo(&mut self, command: Box<dyn Command>, max_depth: usize) {
        self.undo_stack.push(command);
        if self.undo_stack.len() > max_depth {
            self.undo_stack.remove(0);
        }
    }

    /// Close every open batch level, pushing the collected commands as one step.
    fn close_batch(&mut self, max_depth: usize) -> bool {
        self.batch_depth = 0;
        if self.batch.is_empty() {
            return false;
        }
        let commands = std::mem::take(&mut self.batch);
        let description = commands
            .iter()
            .map(|c| c.description())
            .collect::<Vec<_>>()
            .join(", ");
        self.push_undo(Box::new(BatchCommand::new(description, commands)), max_depth);
        true
    }
}

/// Undo/redo stacks for every diagram in a session.
#[derive(Debug)]
pub struct CommandManager {
    histories: HashMap<DiagramId, History>,
    /// Maximum undo depth per diagram.
    max_depth: usize,
}

impl Default for CommandManager {
    fn default() -> Self {
        Self::new(100)
    }
}

impl CommandManager {
    pub fn new(max_depth: usize) -> Self {
        Self {
            histories: HashMap::new(),
            max_depth: max_depth.max(1),
        }
    }

    /// Run `command` against `diagram` and record it in that diagram's history.
    ///
    /// A failed command is not recorded, and neither is a no-op (one that
    /// produced no operations). Anything else clears the redo stack.
    pub fn execute(
        &mut self,
        diagram: &mut Diagram,
        mut command: Box<dyn Command>,
    ) -> Result<Applied, CommandError> {
        let ops = command.execute(diagram)?;
        let description = command.description();
        if ops.is_empty() {
            debug!("{}: `{description}` changed nothing", diagram.id);
            return Ok(Applied { description, ops });
        }
        debug!("{}: execute `{description}` ({} ops)", diagram.id, ops.len());

        let max_depth = self.max_depth;
        let history = self.histories.entry(diagram.id).or_default();
        history.redo_stack.clear();
        if history.batch_depth > 0 {
            history.batch.push(command);
        } else {
            history.push_undo(command, max_depth);
        }
        Ok(Applied { description, ops })
    }

    /// Undo the most recent step. `Ok(None)` when there is nothing to undo.
    ///
    /// An open batch is closed first, so its commands undo together.
    pub fn undo(&mut self, diagram: &mut Diagram) -> Result<Option<Applied>, CommandError> {
        let max_depth = self.max_depth;
        let Some(history) = self.histories.get_mut(&diagram.id) else {
            return Ok(None);
        };
        if history.batch_depth > 0 {
            history.close_batch(max_depth);
        }
        let Some(mut command) = history.undo_stack.pop() else {
            return Ok(None);
        };
        match command.undo(diagram) {
            Ok(ops) => {
                let description = command.description();
                debug!("{}: undo `{description}`", diagram.id);
                history.redo_stack.push(command);
                Ok(Some(Applied { description, ops }))
            }
            Err(err) => {
                history.undo_stack.push(command);
                Err(err)
            }
        }
    }

    /// Re-apply the most recently undone step.
    pub fn redo(&mut self, diagram: &mut Diagram) -> Result<Option<Applied>, CommandError> {
        let max_depth = self.max_depth;
        let Some(history) = self.histories.get_mut(&diagram.id) else {
            return Ok(None);
        };
        if history.batch_depth > 0 {
            history.close_batch(max_depth);
        }
        let Some(mut command) = history.redo_stack.pop() else {
            return Ok(None);
        };
        match command.execute(diagram) {
            Ok(ops) => {
                let description = command.description();
                debug!("{}: redo `{description}`", diagram.id);
                history.push_undo(command, max_depth);
                Ok(Some(Applied { description, ops }))
            }
            Err(err) => {
                history.redo_stack.push(command);
                Err(err)
            }
        }
    }

    /// Start collecting commands into one undo step. Nests.
    pub fn begin_batch(&mut self, diagram: DiagramId) {
        self.histories.entry(diagram).or_default().batch_depth += 1;
    }

    /// Close one batch level. Returns true when the outermost level closed
    /// and pushed a step; an empty batch pushes nothing.
    pub fn end_batch(&mut self, diagram: DiagramId) -> bool {
        let max_depth = self.max_depth;
        let Some(history) = self.histories.get_mut(&diagram) else {
            return false;
        };
        match history.batch_depth {
            0 => false,
            1 => history.close_batch(max_depth),
            _ => {
                history.batch_depth -= 1;
                false
            }
        }
    }

    pub fn is_batching(&self, diagram: DiagramId) -> bool {
        self.histories
            .get(&diagram)
            .is_some_and(|h| h.batch_depth > 0)
    }

    pub fn can_undo(&self, diagram: DiagramId) -> bool {
        self.histories
            .get(&diagram)
            .is_some_and(|h| !h.undo_stack.is_empty() || !h.batch.is_empty())
    }

    pub fn can_redo(&self, diagram: DiagramId) -> bool {
        self.histories
            .get(&diagram)
            .is_some_and(|h| !h.redo_stack.is_empty())
    }

    pub fn undo_description(&self, diagram: DiagramId) -> Option<String> {
        self.histories
            .get(&diagram)?
            .undo_stack
            .last()
            .map(|c| c.description())
    }

    pub fn redo_description(&self, diagram: DiagramId) -> Option<String> {
        self.histories
            .get(&diagram)?
            .redo_stack
            .last()
            .map(|c| c.description())
    }

    pub fn undo_depth(&self, diagram: DiagramId) -> usize {
        self.histories
            .get(&diagram)
            .map_or(0, |h| h.undo_stack.len())
    }

    /// Forget a diagram's history, open batches included.
    pub fn clear(&mut self, diagram: DiagramId) {
        self.histories.remove(&diagram);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{AddShapeCommand, ShapePatch, UpdateShapeCommand};
    use dgm_core::geometry::Rect;
    use dgm_core::id::ShapeId;
    use dgm_core::model::{DiagramKind, Shape, ShapeType};

    fn note(id: &str) -> Box<dyn Command> {
        Box::new(AddShapeCommand::new(Shape::new(
            ShapeId::intern(id),
            ShapeType::Note,
            Rect::new(0.0, 0.0, 10.0, 10.0),
        )))
    }

    fn relabel(id: &str, label: &str) -> Box<dyn Command> {
        Box::new(UpdateShapeCommand::new(ShapeId::intern(id), ShapePatch::label(label)))
    }

    #[test]
    fn depth_is_bounded() {
        let mut d = Diagram::new(DiagramId::intern("hist_depth"), DiagramKind::Class);
        let mut manager = CommandManager::new(3);
        for i in 0..5 {
            manager.execute(&mut d, note(&format!("n{i}"))).unwrap();
        }
        assert_eq!(manager.undo_depth(d.id), 3);
        for _ in 0..3 {
            assert!(manager.undo(&mut d).unwrap().is_some());
        }
        assert!(manager.undo(&mut d).unwrap().is_none());
        assert_eq!(d.shape_count(), 2);
    }

    #[test]
    fn new_command_clears_redo() {
        let mut d = Diagram::new(DiagramId::intern("hist_redo"), DiagramKind::Class);
        let mut manager = CommandManager::new(10);
        manager.execute(&mut d, note("a")).unwrap();
        manager.undo(&mut d).unwrap();
        assert!(manager.can_redo(d.id));
        manager.execute(&mut d, note("b")).unwrap();
        assert!(!manager.can_redo(d.id));
    }

    #[test]
    fn noop_keeps_redo_and_pushes_nothing() {
        let mut d = Diagram::new(DiagramId::intern("hist_noop"), DiagramKind::Class);
        let mut manager = CommandManager::new(10);
        manager.execute(&mut d, note("a")).unwrap();
        manager.undo(&mut d).unwrap();

        let applied = manager.execute(&mut d, relabel("ghost", "x")).unwrap();
        assert!(applied.ops.is_empty());
        assert!(manager.can_redo(d.id));
        assert_eq!(manager.undo_depth(d.id), 0);
        assert_eq!(manager.redo_description(d.id).as_deref(), Some("add note a"));
    }

    #[test]
    fn failed_command_is_not_recorded() {
        let mut d = Diagram::new(DiagramId::intern("hist_fail"), DiagramKind::Class);
        let mut manager = CommandManager::new(10);
        manager.execute(&mut d, note("a")).unwrap();
        assert!(manager.execute(&mut d, note("a")).is_err());
        assert_eq!(manager.undo_depth(d.id), 1);
    }

    #[test]
    fn nested_batches_collapse_into_one_step() {
        let mut d = Diagram::new(DiagramId::intern("hist_batch"), DiagramKind::Class);
        let mut manager = CommandManager::new(10);
        manager.begin_batch(d.id);
        manager.execute(&mut d, note("a")).unwrap();
        manager.begin_batch(d.id);
        manager.execute(&mut d, relabel("a", "first")).unwrap();
        assert!(!manager.end_batch(d.id));
        manager.execute(&mut d, relabel("a", "second")).unwrap();
        assert!(manager.end_batch(d.id));

        assert_eq!(manager.undo_depth(d.id), 1);
        assert_eq!(
            manager.undo_description(d.id).as_deref(),
            Some("add note a, update a, update a")
        );
        manager.undo(&mut d).unwrap();
        assert_eq!(d.shape_count(), 0);
        manager.redo(&mut d).unwrap();
        assert_eq!(d.shape(ShapeId::intern("a")).unwrap().label, "second");
    }

    #[test]
    fn empty_batch_pushes_nothing() {
        let mut d = Diagram::new(DiagramId::intern("hist_empty"), DiagramKind::Class);
        let mut manager = CommandManager::new(10);
        manager.begin_batch(d.id);
        assert!(!manager.end_batch(d.id));
        assert!(!manager.can_undo(d.id));
        assert!(!manager.end_batch(d.id));
    }

    #[test]
    fn undo_inside_open_batch_closes_it() {
        let mut d = Diagram::new(DiagramId::intern("hist_open"), DiagramKind::Class);
        let mut manager = CommandManager::new(10);
        manager.begin_batch(d.id);
        manager.execute(&mut d, note("a")).unwrap();
        manager.execute(&mut d, note("b")).unwrap();
        manager.undo(&mut d).unwrap();
        assert_eq!(d.shape_count(), 0);
        assert!(!manager.is_batching(d.id));
    }
}
