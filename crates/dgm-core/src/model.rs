//! Core diagram data model.
//!
//! A `Diagram` is an arena of shapes plus an ordered list of connectors.
//! Shapes live in a `StableDiGraph` whose edges encode parent → child
//! containment; `id_index` maps ids to arena slots and `order` holds the
//! document order. Children only keep a weak `parent` id, so deleting and
//! restoring a shape means adding/removing ids; there are no pointer
//! cycles to repair.

use crate::emitter::emit_diagram;
use crate::geometry::{Direction, Point, Rect, directions_toward};
use crate::id::{ConnectorId, DiagramId, ShapeId};
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use thiserror::Error;

// ─── Errors ──────────────────────────────────────────────────────────────

/// Structural violations rejected before the graph is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("shape {0} already exists")]
    DuplicateShape(ShapeId),
    #[error("connector {0} already exists")]
    DuplicateConnector(ConnectorId),
    #[error("shape {0} does not exist")]
    UnknownShape(ShapeId),
    #[error("connector {0} does not exist")]
    UnknownConnector(ConnectorId),
    #[error("parent {parent} of shape {shape} does not exist")]
    UnknownParent { shape: ShapeId, parent: ShapeId },
    #[error("shape {parent} cannot contain other shapes")]
    NotAContainer { parent: ShapeId },
    #[error("moving {shape} under {parent} would create a containment cycle")]
    ContainmentCycle { shape: ShapeId, parent: ShapeId },
    #[error("shape {0} still has children")]
    HasChildren(ShapeId),
    #[error("connector {connector} still references shape {shape}")]
    DanglingConnector {
        connector: ConnectorId,
        shape: ShapeId,
    },
    #[error("connector {connector} endpoint {shape} does not exist")]
    UnknownEndpoint {
        connector: ConnectorId,
        shape: ShapeId,
    },
    #[error("{shape_type} shapes are not allowed in {kind} diagrams")]
    TypeNotAllowed { shape_type: ShapeType, kind: DiagramKind },
    #[error("{kind:?} connectors are not allowed in {diagram} diagrams")]
    ConnectorKindNotAllowed {
        kind: ConnectorKind,
        diagram: DiagramKind,
    },
    #[error("unknown subtype `{subtype}` for {shape_type}")]
    UnknownSubtype {
        shape_type: ShapeType,
        subtype: String,
    },
    #[error("payload does not match shape type {0}")]
    PayloadMismatch(ShapeType),
    #[error("invalid geometry for shape {0}")]
    InvalidGeometry(ShapeId),
}

// ─── Diagram kinds & shape taxonomy ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagramKind {
    Process,
    Class,
    Sequence,
    EntityRelationship,
}

impl DiagramKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagramKind::Process => "process",
            DiagramKind::Class => "class",
            DiagramKind::Sequence => "sequence",
            DiagramKind::EntityRelationship => "er",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "process" => Some(DiagramKind::Process),
            "class" => Some(DiagramKind::Class),
            "sequence" => Some(DiagramKind::Sequence),
            "er" | "entity_relationship" => Some(DiagramKind::EntityRelationship),
            _ => None,
        }
    }

    /// Whether shapes of `shape_type` may appear in this kind of diagram.
    pub fn allows(self, shape_type: ShapeType) -> bool {
        use ShapeType::*;
        match shape_type {
            Note | Group => true,
            Task | Event | Gateway | Pool | Lane => self == DiagramKind::Process,
            Class | Interface | Package => self == DiagramKind::Class,
            Lifeline | Activation | Fragment => self == DiagramKind::Sequence,
            Entity | Relationship => self == DiagramKind::EntityRelationship,
        }
    }

    pub fn allows_connector(self, kind: ConnectorKind) -> bool {
        use ConnectorKind::*;
        match kind {
            Association => true,
            Flow => self == DiagramKind::Process,
            Inheritance | Realization | Dependency | Aggregation | Composition => {
                self == DiagramKind::Class
            }
            Message | Reply => self == DiagramKind::Sequence,
            Relation => self == DiagramKind::EntityRelationship,
        }
    }
}

impl fmt::Display for DiagramKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of shape types across all diagram kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShapeType {
    // Process
    Task,
    Event,
    Gateway,
    Pool,
    Lane,
    // Class
    Class,
    Interface,
    Package,
    // Sequence
    Lifeline,
    Activation,
    Fragment,
    // Entity-relationship
    Entity,
    Relationship,
    // Shared
    Note,
    /// Grouped/preview container: owns a member list rather than children.
    Group,
}

impl ShapeType {
    pub const ALL: [ShapeType; 15] = [
        ShapeType::Task,
        ShapeType::Event,
        ShapeType::Gateway,
        ShapeType::Pool,
        ShapeType::Lane,
        ShapeType::Class,
        ShapeType::Interface,
        ShapeType::Package,
        ShapeType::Lifeline,
        ShapeType::Activation,
        ShapeType::Fragment,
        ShapeType::Entity,
        ShapeType::Relationship,
        ShapeType::Note,
        ShapeType::Group,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ShapeType::Task => "task",
            ShapeType::Event => "event",
            ShapeType::Gateway => "gateway",
            ShapeType::Pool => "pool",
            ShapeType::Lane => "lane",
            ShapeType::Class => "class",
            ShapeType::Interface => "interface",
            ShapeType::Package => "package",
            ShapeType::Lifeline => "lifeline",
            ShapeType::Activation => "activation",
            ShapeType::Fragment => "fragment",
            ShapeType::Entity => "entity",
            ShapeType::Relationship => "relationship",
            ShapeType::Note => "note",
            ShapeType::Group => "group",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// Can this shape hold containment children?
    pub fn is_container(self) -> bool {
        matches!(
            self,
            ShapeType::Pool
                | ShapeType::Lane
                | ShapeType::Package
                | ShapeType::Fragment
                | ShapeType::Group
        )
    }

    /// Allowed subtypes; the first entry is the default.
    pub fn subtypes(self) -> &'static [&'static str] {
        match self {
            ShapeType::Task => &["task", "user", "service", "manual", "script"],
            ShapeType::Event => &["start", "end", "intermediate", "timer", "message"],
            ShapeType::Gateway => &["exclusive", "parallel", "inclusive", "event"],
            ShapeType::Pool => &["pool"],
            ShapeType::Lane => &["lane"],
            ShapeType::Class => &["class", "abstract", "enum"],
            ShapeType::Interface => &["interface"],
            ShapeType::Package => &["package"],
            ShapeType::Lifeline => &[
                "participant",
                "actor",
                "boundary",
                "control",
                "entity",
                "database",
            ],
            ShapeType::Activation => &["activation"],
            ShapeType::Fragment => &["alt", "opt", "loop", "par", "critical"],
            ShapeType::Entity => &["strong", "weak"],
            ShapeType::Relationship => &["identifying", "non_identifying"],
            ShapeType::Note => &["note"],
            ShapeType::Group => &["group", "preview"],
        }
    }

    pub fn default_subtype(self) -> &'static str {
        self.subtypes()[0]
    }

    pub fn has_subtype(self, subtype: &str) -> bool {
        self.subtypes().contains(&subtype)
    }
}

impl fmt::Display for ShapeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Payloads ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Visibility {
    #[default]
    Public,
    Private,
    Protected,
    Package,
}

impl Visibility {
    pub fn symbol(self) -> char {
        match self {
            Visibility::Public => '+',
            Visibility::Private => '-',
            Visibility::Protected => '#',
            Visibility::Package => '~',
        }
    }

    pub fn from_symbol(c: char) -> Option<Self> {
        match c {
            '+' => Some(Visibility::Public),
            '-' => Some(Visibility::Private),
            '#' => Some(Visibility::Protected),
            '~' => Some(Visibility::Package),
            _ => None,
        }
    }
}

/// A class attribute or operation, e.g. `+ total: Money`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub visibility: Visibility,
    pub name: String,
    pub type_name: Option<String>,
}

/// A column of an ER entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub data_type: String,
    pub primary_key: bool,
    pub foreign_key: bool,
    pub nullable: bool,
}

/// Type-specific data carried by a shape. One variant per `ShapeType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ShapePayload {
    Task {
        assignee: Option<String>,
    },
    Event,
    Gateway {
        condition: Option<String>,
    },
    Pool,
    Lane,
    Class {
        stereotype: Option<String>,
        attributes: Vec<Member>,
        operations: Vec<Member>,
    },
    Interface {
        operations: Vec<Member>,
    },
    Package,
    Lifeline,
    Activation,
    Fragment {
        guard: Option<String>,
    },
    Entity {
        attributes: Vec<Attribute>,
    },
    Relationship,
    Note {
        text: String,
    },
    Group {
        members: Vec<ShapeId>,
        member_connectors: Vec<ConnectorId>,
    },
}

impl ShapePayload {
    /// Empty payload for a freshly created shape of `shape_type`.
    pub fn default_for(shape_type: ShapeType) -> Self {
        match shape_type {
            ShapeType::Task => ShapePayload::Task { assignee: None },
            ShapeType::Event => ShapePayload::Event,
            ShapeType::Gateway => ShapePayload::Gateway { condition: None },
            ShapeType::Pool => ShapePayload::Pool,
            ShapeType::Lane => ShapePayload::Lane,
            ShapeType::Class => ShapePayload::Class {
                stereotype: None,
                attributes: Vec::new(),
                operations: Vec::new(),
            },
            ShapeType::Interface => ShapePayload::Interface {
                operations: Vec::new(),
            },
            ShapeType::Package => ShapePayload::Package,
            ShapeType::Lifeline => ShapePayload::Lifeline,
            ShapeType::Activation => ShapePayload::Activation,
            ShapeType::Fragment => ShapePayload::Fragment { guard: None },
            ShapeType::Entity => ShapePayload::Entity {
                attributes: Vec::new(),
            },
            ShapeType::Relationship => ShapePayload::Relationship,
            ShapeType::Note => ShapePayload::Note {
                text: String::new(),
            },
            ShapeType::Group => ShapePayload::Group {
                members: Vec::new(),
                member_connectors: Vec::new(),
            },
        }
    }

    pub fn shape_type(&self) -> ShapeType {
        match self {
            ShapePayload::Task { .. } => ShapeType::Task,
            ShapePayload::Event => ShapeType::Event,
            ShapePayload::Gateway { .. } => ShapeType::Gateway,
            ShapePayload::Pool => ShapeType::Pool,
            ShapePayload::Lane => ShapeType::Lane,
            ShapePayload::Class { .. } => ShapeType::Class,
            ShapePayload::Interface { .. } => ShapeType::Interface,
            ShapePayload::Package => ShapeType::Package,
            ShapePayload::Lifeline => ShapeType::Lifeline,
            ShapePayload::Activation => ShapeType::Activation,
            ShapePayload::Fragment { .. } => ShapeType::Fragment,
            ShapePayload::Entity { .. } => ShapeType::Entity,
            ShapePayload::Relationship => ShapeType::Relationship,
            ShapePayload::Note { .. } => ShapeType::Note,
            ShapePayload::Group { .. } => ShapeType::Group,
        }
    }
}

// ─── Shape ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    pub id: ShapeId,
    pub shape_type: ShapeType,
    pub subtype: String,
    pub bounds: Rect,
    pub label: String,
    pub z_order: i32,
    pub locked: bool,
    /// Containing shape, lookup only.
    pub parent: Option<ShapeId>,
    pub payload: ShapePayload,
}

impl Shape {
    pub fn new(id: ShapeId, shape_type: ShapeType, bounds: Rect) -> Self {
        Self {
            id,
            shape_type,
            subtype: shape_type.default_subtype().to_string(),
            bounds,
            label: String::new(),
            z_order: 0,
            locked: false,
            parent: None,
            payload: ShapePayload::default_for(shape_type),
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    #[must_use]
    pub fn with_parent(mut self, parent: ShapeId) -> Self {
        self.parent = Some(parent);
        self
    }

    #[must_use]
    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = subtype.into();
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: ShapePayload) -> Self {
        self.payload = payload;
        self
    }

    /// Check the shape's own fields against the diagram kind.
    pub fn validate(&self, kind: DiagramKind) -> Result<(), ModelError> {
        if !kind.allows(self.shape_type) {
            return Err(ModelError::TypeNotAllowed {
                shape_type: self.shape_type,
                kind,
            });
        }
        if !self.shape_type.has_subtype(&self.subtype) {
            return Err(ModelError::UnknownSubtype {
                shape_type: self.shape_type,
                subtype: self.subtype.clone(),
            });
        }
        if self.payload.shape_type() != self.shape_type {
            return Err(ModelError::PayloadMismatch(self.shape_type));
        }
        if !self.bounds.is_valid() {
            return Err(ModelError::InvalidGeometry(self.id));
        }
        Ok(())
    }
}

// ─── Connectors ──────────────────────────────────────────────────────────

/// An indexed slot on a side, for spreading dense connectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub index: u8,
    pub count: u8,
}

/// Named anchor on a shape's perimeter.
///
/// `side: None` is the center anchor: it resolves to the side facing the
/// other endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectionPoint {
    pub side: Option<Direction>,
    pub slot: Option<Slot>,
}

impl ConnectionPoint {
    pub const CENTER: ConnectionPoint = ConnectionPoint {
        side: None,
        slot: None,
    };

    pub const fn side(dir: Direction) -> Self {
        Self {
            side: Some(dir),
            slot: None,
        }
    }

    pub const fn slotted(dir: Direction, index: u8, count: u8) -> Self {
        Self {
            side: Some(dir),
            slot: Some(Slot { index, count }),
        }
    }

    /// Absolute coordinates and outward heading on `rect`.
    pub fn resolve(&self, rect: &Rect, toward: Point) -> (Point, Direction) {
        let side = self.side.unwrap_or_else(|| facing_side(rect, toward));
        let t = match self.slot {
            Some(Slot { index, count }) if count > 0 => {
                (f64::from(index.min(count - 1)) + 1.0) / (f64::from(count) + 1.0)
            }
            _ => 0.5,
        };
        (rect.side_point(side, t), side)
    }

    /// Parse `east`, `north:1/3`, or `center`.
    pub fn parse(s: &str) -> Option<Self> {
        if s == "center" || s == "auto" {
            return Some(Self::CENTER);
        }
        let (side, slot) = match s.split_once(':') {
            Some((side, slot)) => (side, Some(slot)),
            None => (s, None),
        };
        let side = Direction::parse(side)?;
        let slot = match slot {
            Some(text) => {
                let (index, count) = text.split_once('/')?;
                let index: u8 = index.parse().ok()?;
                let count: u8 = count.parse().ok()?;
                if count == 0 || index >= count {
                    return None;
                }
                Some(Slot { index, count })
            }
            None => None,
        };
        Some(Self {
            side: Some(side),
            slot,
        })
    }
}

impl fmt::Display for ConnectionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.side, self.slot) {
            (None, _) => f.write_str("center"),
            (Some(side), None) => f.write_str(side.as_str()),
            (Some(side), Some(slot)) => {
                write!(f, "{}:{}/{}", side.as_str(), slot.index, slot.count)
            }
        }
    }
}

/// The side of `rect` whose outward heading best points at `toward`.
fn facing_side(rect: &Rect, toward: Point) -> Direction {
    let c = rect.center();
    let horizontal = (toward.x - c.x).abs() >= (toward.y - c.y).abs();
    directions_toward(c, toward)
        .into_iter()
        .find(|d| d.is_horizontal() == horizontal)
        .unwrap_or(Direction::East)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub shape: ShapeId,
    pub point: ConnectionPoint,
}

impl Endpoint {
    pub fn new(shape: ShapeId, point: ConnectionPoint) -> Self {
        Self { shape, point }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RoutingStyle {
    #[default]
    Orthogonal,
    Straight,
    Curved,
}

impl RoutingStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            RoutingStyle::Orthogonal => "orthogonal",
            RoutingStyle::Straight => "straight",
            RoutingStyle::Curved => "curved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "orthogonal" => Some(RoutingStyle::Orthogonal),
            "straight" => Some(RoutingStyle::Straight),
            "curved" => Some(RoutingStyle::Curved),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Marker {
    #[default]
    None,
    Arrow,
    OpenArrow,
    Triangle,
    Diamond,
    FilledDiamond,
    Circle,
    CrowsFoot,
}

impl Marker {
    pub fn as_str(self) -> &'static str {
        match self {
            Marker::None => "none",
            Marker::Arrow => "arrow",
            Marker::OpenArrow => "open_arrow",
            Marker::Triangle => "triangle",
            Marker::Diamond => "diamond",
            Marker::FilledDiamond => "filled_diamond",
            Marker::Circle => "circle",
            Marker::CrowsFoot => "crows_foot",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Marker::None),
            "arrow" => Some(Marker::Arrow),
            "open_arrow" => Some(Marker::OpenArrow),
            "triangle" => Some(Marker::Triangle),
            "diamond" => Some(Marker::Diamond),
            "filled_diamond" => Some(Marker::FilledDiamond),
            "circle" => Some(Marker::Circle),
            "crows_foot" => Some(Marker::CrowsFoot),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LineStyle {
    #[default]
    Solid,
    Dashed,
    Dotted,
}

impl LineStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            LineStyle::Solid => "solid",
            LineStyle::Dashed => "dashed",
            LineStyle::Dotted => "dotted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "solid" => Some(LineStyle::Solid),
            "dashed" => Some(LineStyle::Dashed),
            "dotted" => Some(LineStyle::Dotted),
            _ => None,
        }
    }
}

/// Semantic relation a connector expresses. Each kind carries a visual preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectorKind {
    Flow,
    Association,
    Inheritance,
    Realization,
    Dependency,
    Aggregation,
    Composition,
    Message,
    Reply,
    Relation,
}

impl ConnectorKind {
    pub const ALL: [ConnectorKind; 10] = [
        ConnectorKind::Flow,
        ConnectorKind::Association,
        ConnectorKind::Inheritance,
        ConnectorKind::Realization,
        ConnectorKind::Dependency,
        ConnectorKind::Aggregation,
        ConnectorKind::Composition,
        ConnectorKind::Message,
        ConnectorKind::Reply,
        ConnectorKind::Relation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectorKind::Flow => "flow",
            ConnectorKind::Association => "association",
            ConnectorKind::Inheritance => "inheritance",
            ConnectorKind::Realization => "realization",
            ConnectorKind::Dependency => "dependency",
            ConnectorKind::Aggregation => "aggregation",
            ConnectorKind::Composition => "composition",
            ConnectorKind::Message => "message",
            ConnectorKind::Reply => "reply",
            ConnectorKind::Relation => "relation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// Default `(start marker, end marker, line style)` for this relation.
    pub fn preset(self) -> (Marker, Marker, LineStyle) {
        match self {
            ConnectorKind::Flow => (Marker::None, Marker::Arrow, LineStyle::Solid),
            ConnectorKind::Association => (Marker::None, Marker::None, LineStyle::Solid),
            ConnectorKind::Inheritance => (Marker::None, Marker::Triangle, LineStyle::Solid),
            ConnectorKind::Realization => (Marker::None, Marker::Triangle, LineStyle::Dashed),
            ConnectorKind::Dependency => (Marker::None, Marker::OpenArrow, LineStyle::Dashed),
            ConnectorKind::Aggregation => (Marker::Diamond, Marker::None, LineStyle::Solid),
            ConnectorKind::Composition => (Marker::FilledDiamond, Marker::None, LineStyle::Solid),
            ConnectorKind::Message => (Marker::None, Marker::Arrow, LineStyle::Solid),
            ConnectorKind::Reply => (Marker::None, Marker::OpenArrow, LineStyle::Dashed),
            ConnectorKind::Relation => (Marker::CrowsFoot, Marker::CrowsFoot, LineStyle::Solid),
        }
    }
}

/// A routed link between two shapes' connection points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connector {
    pub id: ConnectorId,
    pub source: Endpoint,
    pub target: Endpoint,
    pub kind: ConnectorKind,
    pub routing: RoutingStyle,
    pub start_marker: Marker,
    pub end_marker: Marker,
    pub line_style: LineStyle,
    pub label: Option<String>,
    pub z_order: i32,
}

impl Connector {
    /// Create a connector with the markers and line style of `kind`.
    pub fn new(id: ConnectorId, kind: ConnectorKind, source: Endpoint, target: Endpoint) -> Self {
        let (start_marker, end_marker, line_style) = kind.preset();
        Self {
            id,
            source,
            target,
            kind,
            routing: RoutingStyle::default(),
            start_marker,
            end_marker,
            line_style,
            label: None,
            z_order: 0,
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Does either endpoint reference `shape`?
    pub fn touches(&self, shape: ShapeId) -> bool {
        self.source.shape == shape || self.target.shape == shape
    }
}

// ─── Removal records ─────────────────────────────────────────────────────

/// An entity taken out of the diagram together with its document position.
#[derive(Debug, Clone, PartialEq)]
pub struct Removed<T> {
    pub index: usize,
    pub item: T,
}

// ─── Diagram ─────────────────────────────────────────────────────────────

/// A diagram: shapes, connectors and the exported-notation cache.
///
/// The mutating primitives (`insert_shape`, `remove_shapes`, ...) validate
/// everything before touching the graph, so a rejected call never leaves a
/// partial change behind. They are the building blocks commands use; calling
/// them directly bypasses undo history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "DiagramRecord", from = "DiagramRecord")]
pub struct Diagram {
    pub id: DiagramId,
    pub kind: DiagramKind,
    graph: StableDiGraph<Shape, ()>,
    id_index: HashMap<ShapeId, NodeIndex>,
    order: Vec<ShapeId>,
    connectors: Vec<Connector>,
    notation_cache: Option<String>,
}

/// Plain serialized form of a `Diagram`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagramRecord {
    pub id: DiagramId,
    pub kind: DiagramKind,
    pub shapes: Vec<Shape>,
    pub connectors: Vec<Connector>,
}

/// Comparable view of a diagram's content in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagramSnapshot {
    pub shapes: Vec<Shape>,
    pub connectors: Vec<Connector>,
}

impl Diagram {
    pub fn new(id: DiagramId, kind: DiagramKind) -> Self {
        Self {
            id,
            kind,
            graph: StableDiGraph::new(),
            id_index: HashMap::new(),
            order: Vec::new(),
            connectors: Vec::new(),
            notation_cache: None,
        }
    }

    // ─── Queries ─────────────────────────────────────────────────────────

    pub fn shape(&self, id: ShapeId) -> Option<&Shape> {
        self.id_index.get(&id).map(|idx| &self.graph[*idx])
    }

    pub fn contains_shape(&self, id: ShapeId) -> bool {
        self.id_index.contains_key(&id)
    }

    /// Shapes in document order.
    pub fn shapes(&self) -> impl Iterator<Item = &Shape> + '_ {
        self.order.iter().filter_map(|id| self.shape(*id))
    }

    pub fn shape_ids(&self) -> &[ShapeId] {
        &self.order
    }

    pub fn shape_count(&self) -> usize {
        self.order.len()
    }

    /// Position of a shape in document order.
    pub fn shape_position(&self, id: ShapeId) -> Option<usize> {
        self.order.iter().position(|s| *s == id)
    }

    pub fn connector(&self, id: ConnectorId) -> Option<&Connector> {
        self.connectors.iter().find(|c| c.id == id)
    }

    pub fn contains_connector(&self, id: ConnectorId) -> bool {
        self.connector(id).is_some()
    }

    pub fn connectors(&self) -> &[Connector] {
        &self.connectors
    }

    pub fn connector_count(&self) -> usize {
        self.connectors.len()
    }

    /// Arena slot of a shape in the containment graph.
    pub fn index_of(&self, id: ShapeId) -> Option<NodeIndex> {
        self.id_index.get(&id).copied()
    }

    /// The containment graph (parent → child edges).
    pub fn containment(&self) -> &StableDiGraph<Shape, ()> {
        &self.graph
    }

    /// Direct children in document order.
    pub fn children(&self, id: ShapeId) -> Vec<ShapeId> {
        let Some(idx) = self.index_of(id) else {
            return Vec::new();
        };
        let mut children: Vec<ShapeId> = self
            .graph
            .neighbors_directed(idx, petgraph::Direction::Outgoing)
            .map(|c| self.graph[c].id)
            .collect();
        children.sort_by_key(|c| self.shape_position(*c));
        children
    }

    /// Transitive containment closure below `id`, breadth-first, excluding `id`.
    pub fn descendants(&self, id: ShapeId) -> Vec<ShapeId> {
        if !self.contains_shape(id) {
            return Vec::new();
        }
        // Children are visited in document order so the closure is deterministic.
        let mut out = Vec::new();
        let mut queue = VecDeque::from([id]);
        while let Some(parent) = queue.pop_front() {
            for child in self.children(parent) {
                out.push(child);
                queue.push_back(child);
            }
        }
        out
    }

    /// Containing shapes from the direct parent up to the top level.
    pub fn ancestors(&self, id: ShapeId) -> Vec<ShapeId> {
        let mut out = Vec::new();
        let mut current = self.index_of(id);
        while let Some(idx) = current {
            current = self
                .graph
                .neighbors_directed(idx, petgraph::Direction::Incoming)
                .next();
            if let Some(parent) = current {
                out.push(self.graph[parent].id);
            }
        }
        out
    }

    pub fn is_ancestor_of(&self, ancestor: ShapeId, descendant: ShapeId) -> bool {
        ancestor != descendant && self.ancestors(descendant).contains(&ancestor)
    }

    /// Ids of connectors whose source or target is `shape`, in connector order.
    pub fn connectors_touching(&self, shape: ShapeId) -> Vec<ConnectorId> {
        self.connectors
            .iter()
            .filter(|c| c.touches(shape))
            .map(|c| c.id)
            .collect()
    }

    /// Content in document order, for equality checks.
    pub fn snapshot(&self) -> DiagramSnapshot {
        DiagramSnapshot {
            shapes: self.shapes().cloned().collect(),
            connectors: self.connectors.clone(),
        }
    }

    // ─── Validation ──────────────────────────────────────────────────────

    /// Validate a new shape against this diagram without inserting it.
    pub fn check_new_shape(&self, shape: &Shape) -> Result<(), ModelError> {
        if self.contains_shape(shape.id) {
            return Err(ModelError::DuplicateShape(shape.id));
        }
        shape.validate(self.kind)?;
        if let Some(parent) = shape.parent {
            self.check_parent(shape.id, parent)?;
        }
        Ok(())
    }

    fn check_parent(&self, shape: ShapeId, parent: ShapeId) -> Result<(), ModelError> {
        let Some(p) = self.shape(parent) else {
            return Err(ModelError::UnknownParent { shape, parent });
        };
        if !p.shape_type.is_container() {
            return Err(ModelError::NotAContainer { parent });
        }
        if parent == shape || self.is_ancestor_of(shape, parent) {
            return Err(ModelError::ContainmentCycle { shape, parent });
        }
        Ok(())
    }

    /// Validate a new connector without inserting it.
    pub fn check_new_connector(&self, connector: &Connector) -> Result<(), ModelError> {
        if self.contains_connector(connector.id) {
            return Err(ModelError::DuplicateConnector(connector.id));
        }
        self.check_connector(connector)
    }

    fn check_connector(&self, connector: &Connector) -> Result<(), ModelError> {
        if !self.kind.allows_connector(connector.kind) {
            return Err(ModelError::ConnectorKindNotAllowed {
                kind: connector.kind,
                diagram: self.kind,
            });
        }
        for end in [connector.source.shape, connector.target.shape] {
            if !self.contains_shape(end) {
                return Err(ModelError::UnknownEndpoint {
                    connector: connector.id,
                    shape: end,
                });
            }
        }
        Ok(())
    }

    // ─── Mutating primitives ─────────────────────────────────────────────

    /// Insert a shape at `position` in document order (end when `None`).
    pub fn insert_shape(&mut self, shape: Shape, position: Option<usize>) -> Result<(), ModelError> {
        self.check_new_shape(&shape)?;
        let id = shape.id;
        let at = position.unwrap_or(self.order.len()).min(self.order.len());
        let idx = self.graph.add_node(shape);
        self.id_index.insert(id, idx);
        self.order.insert(at, id);
        self.link_containment(id);
        self.touch();
        Ok(())
    }

    /// Remove a batch of shapes, all or nothing.
    ///
    /// Rejected when a connector still references one of them or when a
    /// remaining shape is still contained by one of them. Ids not present
    /// are ignored. The records come back in ascending position order.
    pub fn remove_shapes(&mut self, ids: &[ShapeId]) -> Result<Vec<Removed<Shape>>, ModelError> {
        let doomed: HashSet<ShapeId> = ids
            .iter()
            .copied()
            .filter(|id| self.contains_shape(*id))
            .collect();
        if doomed.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(c) = self
            .connectors
            .iter()
            .find(|c| doomed.contains(&c.source.shape) || doomed.contains(&c.target.shape))
        {
            let shape = if doomed.contains(&c.source.shape) {
                c.source.shape
            } else {
                c.target.shape
            };
            return Err(ModelError::DanglingConnector {
                connector: c.id,
                shape,
            });
        }
        for id in &doomed {
            if self.children(*id).iter().any(|c| !doomed.contains(c)) {
                return Err(ModelError::HasChildren(*id));
            }
        }

        let mut positions: Vec<usize> = self
            .order
            .iter()
            .enumerate()
            .filter(|(_, id)| doomed.contains(id))
            .map(|(i, _)| i)
            .collect();
        positions.sort_unstable();

        let mut removed = Vec::with_capacity(positions.len());
        for &pos in positions.iter().rev() {
            let id = self.order.remove(pos);
            let shape = self
                .id_index
                .remove(&id)
                .and_then(|idx| self.graph.remove_node(idx));
            if let Some(shape) = shape {
                removed.push(Removed {
                    index: pos,
                    item: shape,
                });
            }
        }
        removed.reverse();
        self.touch();
        Ok(removed)
    }

    /// Put previously removed shapes back at their recorded positions.
    pub fn restore_shapes(&mut self, records: &[Removed<Shape>]) -> Result<(), ModelError> {
        let incoming: HashSet<ShapeId> = records.iter().map(|r| r.item.id).collect();
        for r in records {
            if self.contains_shape(r.item.id) {
                return Err(ModelError::DuplicateShape(r.item.id));
            }
            r.item.validate(self.kind)?;
            let missing_parent = r
                .item
                .parent
                .filter(|p| !incoming.contains(p) && !self.contains_shape(*p));
            if let Some(parent) = missing_parent {
                return Err(ModelError::UnknownParent {
                    shape: r.item.id,
                    parent,
                });
            }
        }

        let mut sorted: Vec<&Removed<Shape>> = records.iter().collect();
        sorted.sort_by_key(|r| r.index);
        for r in &sorted {
            let id = r.item.id;
            let at = r.index.min(self.order.len());
            let idx = self.graph.add_node(r.item.clone());
            self.id_index.insert(id, idx);
            self.order.insert(at, id);
        }
        for r in &sorted {
            self.link_containment(r.item.id);
        }
        self.touch();
        Ok(())
    }

    /// Replace a shape's fields, returning the previous value.
    pub fn replace_shape(&mut self, shape: Shape) -> Result<Shape, ModelError> {
        let Some(idx) = self.index_of(shape.id) else {
            return Err(ModelError::UnknownShape(shape.id));
        };
        shape.validate(self.kind)?;
        let old_parent = self.graph[idx].parent;
        if let Some(parent) = shape.parent.filter(|p| old_parent != Some(*p)) {
            self.check_parent(shape.id, parent)?;
        }
        if !shape.shape_type.is_container() && !self.children(shape.id).is_empty() {
            return Err(ModelError::HasChildren(shape.id));
        }

        let id = shape.id;
        let new_parent = shape.parent;
        let previous = std::mem::replace(&mut self.graph[idx], shape);
        if old_parent != new_parent {
            if let Some(edge) = self
                .graph
                .edges_directed(idx, petgraph::Direction::Incoming)
                .next()
                .map(|e| e.id())
            {
                self.graph.remove_edge(edge);
            }
            self.link_containment(id);
        }
        self.touch();
        Ok(previous)
    }

    /// Insert a connector at `position` in connector order (end when `None`).
    pub fn insert_connector(
        &mut self,
        connector: Connector,
        position: Option<usize>,
    ) -> Result<(), ModelError> {
        self.check_new_connector(&connector)?;
        let at = position
            .unwrap_or(self.connectors.len())
            .min(self.connectors.len());
        self.connectors.insert(at, connector);
        self.touch();
        Ok(())
    }

    /// Remove a batch of connectors; ids not present are ignored.
    pub fn remove_connectors(&mut self, ids: &[ConnectorId]) -> Vec<Removed<Connector>> {
        let doomed: HashSet<ConnectorId> = ids.iter().copied().collect();
        let mut removed = Vec::new();
        let mut index = 0usize;
        let mut kept = Vec::with_capacity(self.connectors.len());
        for c in self.connectors.drain(..) {
            if doomed.contains(&c.id) {
                removed.push(Removed { index, item: c });
            } else {
                kept.push(c);
            }
            index += 1;
        }
        self.connectors = kept;
        if !removed.is_empty() {
            self.touch();
        }
        removed
    }

    /// Put previously removed connectors back at their recorded positions.
    pub fn restore_connectors(&mut self, records: &[Removed<Connector>]) -> Result<(), ModelError> {
        for r in records {
            self.check_new_connector(&r.item)?;
        }
        let mut sorted: Vec<&Removed<Connector>> = records.iter().collect();
        sorted.sort_by_key(|r| r.index);
        for r in sorted {
            let at = r.index.min(self.connectors.len());
            self.connectors.insert(at, r.item.clone());
        }
        self.touch();
        Ok(())
    }

    /// Replace a connector's fields, returning the previous value.
    pub fn replace_connector(&mut self, connector: Connector) -> Result<Connector, ModelError> {
        let Some(pos) = self.connectors.iter().position(|c| c.id == connector.id) else {
            return Err(ModelError::UnknownConnector(connector.id));
        };
        self.check_connector(&connector)?;
        let previous = std::mem::replace(&mut self.connectors[pos], connector);
        self.touch();
        Ok(previous)
    }

    /// Add the missing containment edges around `id`: from its parent, and
    /// to any present shape naming `id` as parent.
    fn link_containment(&mut self, id: ShapeId) {
        let Some(idx) = self.index_of(id) else {
            return;
        };
        let parent = self.graph[idx].parent.and_then(|p| self.index_of(p));
        if let Some(pidx) = parent {
            if self.graph.find_edge(pidx, idx).is_none() {
                self.graph.add_edge(pidx, idx, ());
            }
        }
        let orphans: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|n| self.graph[*n].parent == Some(id))
            .filter(|n| self.graph.find_edge(idx, *n).is_none())
            .collect();
        for child in orphans {
            self.graph.add_edge(idx, child, ());
        }
    }

    // ─── Exported notation cache ─────────────────────────────────────────

    fn touch(&mut self) {
        self.notation_cache = None;
    }

    /// Cached notation, `None` when stale.
    pub fn cached_notation(&self) -> Option<&str> {
        self.notation_cache.as_deref()
    }

    /// The diagram in textual notation, regenerated when stale.
    pub fn exported_notation(&mut self) -> &str {
        if self.notation_cache.is_none() {
            self.notation_cache = Some(emit_diagram(self));
        }
        self.notation_cache.as_deref().unwrap_or_default()
    }

    /// Build a diagram from its plain record, inserting in record order.
    ///
    /// Shapes whose parent is missing are attached at top level and
    /// connectors with a missing endpoint are dropped, each with a warning.
    pub fn from_record(record: DiagramRecord) -> Self {
        let mut diagram = Diagram::new(record.id, record.kind);
        let ids: HashSet<ShapeId> = record.shapes.iter().map(|s| s.id).collect();
        for mut shape in record.shapes {
            if let Some(parent) = shape.parent.filter(|p| !ids.contains(p)) {
                log::warn!("shape {} has unknown parent {parent}; detaching", shape.id);
                shape.parent = None;
            }
            let id = shape.id;
            let idx = diagram.graph.add_node(shape);
            diagram.id_index.insert(id, idx);
            diagram.order.push(id);
        }
        for id in diagram.order.clone() {
            diagram.link_containment(id);
        }
        for c in record.connectors {
            if diagram.contains_shape(c.source.shape) && diagram.contains_shape(c.target.shape) {
                diagram.connectors.push(c);
            } else {
                log::warn!("connector {} references a missing shape; dropping", c.id);
            }
        }
        diagram
    }

    pub fn to_record(&self) -> DiagramRecord {
        DiagramRecord {
            id: self.id,
            kind: self.kind,
            shapes: self.shapes().cloned().collect(),
            connectors: self.connectors.clone(),
        }
    }
}

impl From<DiagramRecord> for Diagram {
    fn from(record: DiagramRecord) -> Self {
        Diagram::from_record(record)
    }
}

impl From<Diagram> for DiagramRecord {
    fn from(diagram: Diagram) -> Self {
        diagram.to_record()
    }
}

impl PartialEq for Diagram {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.kind == other.kind && self.snapshot() == other.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process() -> Diagram {
        Diagram::new(DiagramId::intern("model_test"), DiagramKind::Process)
    }

    fn task(id: &str, x: f64) -> Shape {
        Shape::new(
            ShapeId::intern(id),
            ShapeType::Task,
            Rect::new(x, 0.0, 100.0, 50.0),
        )
    }

    #[test]
    fn insert_and_lookup() {
        let mut d = process();
        d.insert_shape(task("a", 0.0), None).unwrap();
        d.insert_shape(task("b", 200.0), None).unwrap();
        assert_eq!(d.shape_count(), 2);
        assert_eq!(d.shape_position(ShapeId::intern("b")), Some(1));
        assert!(matches!(
            d.insert_shape(task("a", 0.0), None),
            Err(ModelError::DuplicateShape(_))
        ));
    }

    #[test]
    fn type_must_fit_diagram_kind() {
        let mut d = process();
        let class = Shape::new(
            ShapeId::intern("k"),
            ShapeType::Class,
            Rect::new(0.0, 0.0, 10.0, 10.0),
        );
        assert!(matches!(
            d.insert_shape(class, None),
            Err(ModelError::TypeNotAllowed { .. })
        ));
        assert_eq!(d.shape_count(), 0);
    }

    #[test]
    fn containment_children_and_ancestors() {
        let mut d = process();
        let pool = Shape::new(
            ShapeId::intern("pool"),
            ShapeType::Pool,
            Rect::new(0.0, 0.0, 500.0, 300.0),
        );
        let lane = Shape::new(
            ShapeId::intern("lane"),
            ShapeType::Lane,
            Rect::new(0.0, 0.0, 500.0, 150.0),
        )
        .with_parent(ShapeId::intern("pool"));
        d.insert_shape(pool, None).unwrap();
        d.insert_shape(lane, None).unwrap();
        d.insert_shape(task("t", 10.0).with_parent(ShapeId::intern("lane")), None)
            .unwrap();

        assert_eq!(
            d.descendants(ShapeId::intern("pool")),
            vec![ShapeId::intern("lane"), ShapeId::intern("t")]
        );
        assert_eq!(
            d.ancestors(ShapeId::intern("t")),
            vec![ShapeId::intern("lane"), ShapeId::intern("pool")]
        );
        assert!(d.is_ancestor_of(ShapeId::intern("pool"), ShapeId::intern("t")));
    }

    #[test]
    fn non_container_parent_rejected() {
        let mut d = process();
        d.insert_shape(task("a", 0.0), None).unwrap();
        let child = task("b", 0.0).with_parent(ShapeId::intern("a"));
        assert!(matches!(
            d.insert_shape(child, None),
            Err(ModelError::NotAContainer { .. })
        ));
    }

    #[test]
    fn remove_refuses_dangling_connectors() {
        let mut d = process();
        d.insert_shape(task("a", 0.0), None).unwrap();
        d.insert_shape(task("b", 200.0), None).unwrap();
        let c = Connector::new(
            ConnectorId::intern("ab"),
            ConnectorKind::Flow,
            Endpoint::new(ShapeId::intern("a"), ConnectionPoint::side(Direction::East)),
            Endpoint::new(ShapeId::intern("b"), ConnectionPoint::side(Direction::West)),
        );
        d.insert_connector(c, None).unwrap();
        let before = d.snapshot();
        assert!(matches!(
            d.remove_shapes(&[ShapeId::intern("a")]),
            Err(ModelError::DanglingConnector { .. })
        ));
        assert_eq!(d.snapshot(), before);
    }

    #[test]
    fn remove_restore_preserves_order() {
        let mut d = process();
        for (i, id) in ["a", "b", "c", "d"].iter().enumerate() {
            d.insert_shape(task(id, i as f64 * 150.0), None).unwrap();
        }
        let before = d.snapshot();
        let removed = d
            .remove_shapes(&[ShapeId::intern("d"), ShapeId::intern("b")])
            .unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(removed[0].index, 1);
        assert_eq!(removed[1].index, 3);
        d.restore_shapes(&removed).unwrap();
        assert_eq!(d.snapshot(), before);
    }

    #[test]
    fn connection_point_parse_and_resolve() {
        let p = ConnectionPoint::parse("south:0/2").unwrap();
        let rect = Rect::new(0.0, 0.0, 90.0, 30.0);
        let (pt, dir) = p.resolve(&rect, Point::new(0.0, 100.0));
        assert_eq!(dir, Direction::South);
        assert_eq!(pt, Point::new(30.0, 30.0));
        assert_eq!(p.to_string(), "south:0/2");

        let (pt, dir) = ConnectionPoint::CENTER.resolve(&rect, Point::new(500.0, 10.0));
        assert_eq!(dir, Direction::East);
        assert_eq!(pt, Point::new(90.0, 15.0));
        assert!(ConnectionPoint::parse("east:3/3").is_none());
    }

    #[test]
    fn record_roundtrip_keeps_containment() {
        let mut d = process();
        d.insert_shape(
            Shape::new(
                ShapeId::intern("p"),
                ShapeType::Pool,
                Rect::new(0.0, 0.0, 300.0, 200.0),
            ),
            None,
        )
        .unwrap();
        d.insert_shape(task("inner", 10.0).with_parent(ShapeId::intern("p")), None)
            .unwrap();
        let rebuilt = Diagram::from_record(d.to_record());
        assert_eq!(rebuilt, d);
        assert_eq!(
            rebuilt.children(ShapeId::intern("p")),
            vec![ShapeId::intern("inner")]
        );
    }
}
