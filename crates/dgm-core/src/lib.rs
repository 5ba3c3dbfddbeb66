pub mod emitter;
pub mod geometry;
pub mod id;
pub mod model;
pub mod parser;
pub mod routing;

pub use emitter::emit_diagram;
pub use geometry::{Direction, NodeKey, Point, Rect};
pub use id::{ConnectorId, DiagramId, ShapeId};
pub use model::*;
pub use parser::{NotationError, parse_diagram};
pub use routing::{Route, RouterConfig, plan_route, route_all, route_connector};

// Re-export petgraph types so downstream crates don't need a direct dependency
pub use petgraph::graph::NodeIndex;
