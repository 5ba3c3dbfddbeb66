pub mod cascade;
pub mod commands;
pub mod config;
pub mod debounce;
pub mod error;
pub mod history;
pub mod store;
pub mod sync;

pub use cascade::{BlastRadius, DeleteShapeCommand, blast_radius};
pub use commands::{
    AddConnectorCommand, AddShapeCommand, BatchCommand, ChangeConnectorTypeCommand,
    ChangeShapeTypeCommand, Command, ConnectorPatch, DeleteConnectorCommand, MoveShapeCommand,
    PersistOp, ShapePatch, UpdateConnectorCommand, UpdateShapeCommand,
};
pub use config::EditorConfig;
pub use debounce::{DebounceScheduler, PendingKey};
pub use error::{CommandError, EditorError, StoreError};
pub use history::{Applied, CommandManager};
pub use store::{DiagramStore, InMemoryStore};
pub use sync::SyncEngine;
