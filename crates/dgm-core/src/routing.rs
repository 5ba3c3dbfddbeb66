//! Orthogonal connector routing.
//!
//! Builds a sparse visibility grid from obstacle rulers and runs A* over
//! `(node, heading)` states so the cost can charge for every bend. Straight
//! and single-bend routes short-circuit before the search. The search is
//! budgeted; when it gives up the planner still returns a (flagged) route.

use crate::geometry::{
    Direction, NodeKey, Point, Rect, bend_count, segment_direction, segment_intersects_rect,
    simplify_path,
};
use crate::id::{ConnectorId, ShapeId};
use crate::model::{Diagram, RoutingStyle, ShapeType};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Lengths are compared as integers after scaling.
const COST_SCALE: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Clearance kept around obstacles and stub length out of each endpoint.
    pub margin: f64,
    /// Extra cost per direction change, in length units.
    pub bend_penalty: f64,
    /// Upper bound on A* state expansions before falling back.
    pub max_expansions: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            margin: 10.0,
            bend_penalty: 40.0,
            max_expansions: 20_000,
        }
    }
}

/// Planned waypoints, endpoints included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub points: Vec<Point>,
    /// Set when no clear path was found within budget; the path may touch
    /// obstacles.
    pub fallback: bool,
}

impl Route {
    pub fn bends(&self) -> usize {
        bend_count(&self.points)
    }

    pub fn length(&self) -> f64 {
        self.points.windows(2).map(|w| w[0].manhattan(w[1])).sum()
    }
}

// ─── Planner ─────────────────────────────────────────────────────────────

/// Plan an orthogonal route from `source` (leaving along `source_dir`) to
/// `target` (whose side faces `target_dir`).
///
/// Both directions are outward headings of the sides the endpoints sit on.
/// Obstacles may include the endpoint shapes themselves: the first and
/// last `margin` units of the path are never checked.
pub fn plan_route(
    source: Point,
    source_dir: Direction,
    target: Point,
    target_dir: Direction,
    obstacles: &[Rect],
    config: &RouterConfig,
) -> Route {
    let margin = config.margin.max(0.0);
    let start = source.step(source_dir, margin);
    let goal = target.step(target_dir, margin);
    let arrival = target_dir.reverse();

    if let Some(points) = straight_route(source, source_dir, target, arrival, margin, obstacles) {
        return Route {
            points,
            fallback: false,
        };
    }
    if let Some(points) = elbow_route(source, source_dir, target, arrival, margin, obstacles) {
        return Route {
            points,
            fallback: false,
        };
    }

    let grid = Grid::build(start, goal, obstacles, margin);
    match grid.search(start, source_dir, goal, arrival, config) {
        Some(mut middle) => {
            let mut points = Vec::with_capacity(middle.len() + 2);
            points.push(source);
            points.append(&mut middle);
            points.push(target);
            Route {
                points: simplify_path(&points),
                fallback: false,
            }
        }
        None => {
            log::debug!(
                "routing fell back to midpoint path from ({}, {}) to ({}, {})",
                source.x,
                source.y,
                target.x,
                target.y
            );
            Route {
                points: midpoint_route(source, source_dir, target),
                fallback: true,
            }
        }
    }
}

/// Aligned endpoints facing each other with nothing in between.
fn straight_route(
    source: Point,
    source_dir: Direction,
    target: Point,
    arrival: Direction,
    margin: f64,
    obstacles: &[Rect],
) -> Option<Vec<Point>> {
    let heading = segment_direction(source, target)?;
    if heading != source_dir || heading != arrival || source.manhattan(target) <= margin * 2.0 {
        return None;
    }
    let inner_a = source.step(heading, margin);
    let inner_b = target.step(heading.reverse(), margin);
    is_clear(inner_a, inner_b, obstacles).then(|| vec![source, target])
}

/// A single bend at one of the two corners of the endpoints' bounding box.
fn elbow_route(
    source: Point,
    source_dir: Direction,
    target: Point,
    arrival: Direction,
    margin: f64,
    obstacles: &[Rect],
) -> Option<Vec<Point>> {
    let corners = [
        Point::new(target.x, source.y),
        Point::new(source.x, target.y),
    ];
    corners.into_iter().find_map(|corner| {
        let first = segment_direction(source, corner)?;
        let second = segment_direction(corner, target)?;
        if first != source_dir || second != arrival {
            return None;
        }
        if source.manhattan(corner) <= margin || corner.manhattan(target) <= margin {
            return None;
        }
        let a = source.step(first, margin);
        let b = target.step(second.reverse(), margin);
        (is_clear(a, corner, obstacles) && is_clear(corner, b, obstacles))
            .then(|| vec![source, corner, target])
    })
}

/// Best-effort path through the midpoint; may cross obstacles.
fn midpoint_route(source: Point, source_dir: Direction, target: Point) -> Vec<Point> {
    let points = if source_dir.is_horizontal() {
        let mid_x = (source.x + target.x) / 2.0;
        vec![
            source,
            Point::new(mid_x, source.y),
            Point::new(mid_x, target.y),
            target,
        ]
    } else {
        let mid_y = (source.y + target.y) / 2.0;
        vec![
            source,
            Point::new(source.x, mid_y),
            Point::new(target.x, mid_y),
            target,
        ]
    };
    simplify_path(&points)
}

fn is_clear(a: Point, b: Point, obstacles: &[Rect]) -> bool {
    !obstacles.iter().any(|r| segment_intersects_rect(a, b, r))
}

// ─── Visibility grid ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct GridPos {
    xi: usize,
    yi: usize,
}

struct Grid<'a> {
    xs: Vec<f64>,
    ys: Vec<f64>,
    nodes: HashMap<NodeKey, GridPos>,
    obstacles: &'a [Rect],
}

impl<'a> Grid<'a> {
    fn build(start: Point, goal: Point, obstacles: &'a [Rect], margin: f64) -> Self {
        let mut xs = vec![start.x, goal.x];
        let mut ys = vec![start.y, goal.y];
        for r in obstacles {
            let inflated = r.inflate(margin);
            xs.push(inflated.x);
            xs.push(inflated.right());
            ys.push(inflated.y);
            ys.push(inflated.bottom());
        }
        let xs = with_midpoints(rulers(xs));
        let ys = with_midpoints(rulers(ys));

        let mut nodes = HashMap::new();
        for (yi, &y) in ys.iter().enumerate() {
            for (xi, &x) in xs.iter().enumerate() {
                let p = Point::new(x, y);
                if obstacles.iter().any(|r| r.contains_inclusive(p)) {
                    continue;
                }
                nodes.insert(NodeKey::from_point(p), GridPos { xi, yi });
            }
        }
        log::trace!(
            "routing grid {}x{} with {} open nodes",
            xs.len(),
            ys.len(),
            nodes.len()
        );
        Self {
            xs,
            ys,
            nodes,
            obstacles,
        }
    }

    fn point(&self, pos: GridPos) -> Point {
        Point::new(self.xs[pos.xi], self.ys[pos.yi])
    }

    /// The adjacent open node along `dir`, if the link is clear.
    fn neighbour(&self, pos: GridPos, dir: Direction) -> Option<(GridPos, NodeKey)> {
        let next = match dir {
            Direction::North => GridPos {
                xi: pos.xi,
                yi: pos.yi.checked_sub(1)?,
            },
            Direction::South => GridPos {
                xi: pos.xi,
                yi: (pos.yi + 1 < self.ys.len()).then_some(pos.yi + 1)?,
            },
            Direction::West => GridPos {
                xi: pos.xi.checked_sub(1)?,
                yi: pos.yi,
            },
            Direction::East => GridPos {
                xi: (pos.xi + 1 < self.xs.len()).then_some(pos.xi + 1)?,
                yi: pos.yi,
            },
        };
        let from = self.point(pos);
        let to = self.point(next);
        let key = NodeKey::from_point(to);
        if !self.nodes.contains_key(&key) || !is_clear(from, to, self.obstacles) {
            return None;
        }
        Some((next, key))
    }

    /// A* from `start` (entered heading `heading`) to `goal`, which must be
    /// left along `arrival`. Returns the waypoints from `start` to `goal`.
    fn search(
        &self,
        start: Point,
        heading: Direction,
        goal: Point,
        arrival: Direction,
        config: &RouterConfig,
    ) -> Option<Vec<Point>> {
        let start_key = NodeKey::from_point(start);
        let goal_key = NodeKey::from_point(goal);
        let start_pos = *self.nodes.get(&start_key)?;
        self.nodes.get(&goal_key)?;

        let bend = (config.bend_penalty.max(0.0) * COST_SCALE).round() as u64;
        let heuristic = |p: Point| (p.manhattan(goal) * COST_SCALE).round() as u64;

        let initial = State {
            key: start_key,
            dir: heading,
        };
        let mut best: HashMap<State, u64> = HashMap::from([(initial, 0)]);
        let mut came_from: HashMap<State, State> = HashMap::new();
        let mut closed: HashSet<State> = HashSet::new();
        let mut heap = BinaryHeap::new();
        heap.push(Entry {
            est: heuristic(start),
            cost: 0,
            state: initial,
            pos: start_pos,
        });

        let mut expansions = 0usize;
        let mut finish: Option<(State, u64)> = None;
        while let Some(Entry {
            est,
            cost,
            state,
            pos,
        }) = heap.pop()
        {
            if finish.is_some_and(|(_, done)| done <= est) {
                break;
            }
            if !closed.insert(state) {
                continue;
            }
            expansions += 1;
            if expansions > config.max_expansions {
                log::trace!("routing search exhausted after {expansions} expansions");
                return None;
            }

            if state.key == goal_key && state.dir != arrival.reverse() {
                let total = if state.dir == arrival { cost } else { cost + bend };
                if finish.is_none_or(|(_, c)| total < c) {
                    finish = Some((state, total));
                }
                continue;
            }

            for dir in Direction::ALL {
                if dir == state.dir.reverse() {
                    continue;
                }
                let Some((next_pos, next_key)) = self.neighbour(pos, dir) else {
                    continue;
                };
                let from = self.point(pos);
                let to = self.point(next_pos);
                let step = (from.manhattan(to) * COST_SCALE).round() as u64;
                let turn = if dir == state.dir { 0 } else { bend };
                let next_cost = cost + step + turn;
                let next_state = State {
                    key: next_key,
                    dir,
                };
                if best.get(&next_state).is_some_and(|&c| c <= next_cost) {
                    continue;
                }
                best.insert(next_state, next_cost);
                came_from.insert(next_state, state);
                heap.push(Entry {
                    est: next_cost + heuristic(to),
                    cost: next_cost,
                    state: next_state,
                    pos: next_pos,
                });
            }
        }

        let (end, total) = finish?;
        log::trace!("routing search finished: {expansions} expansions, cost {total}");
        let mut keys = vec![end.key];
        let mut cursor = end;
        while let Some(prev) = came_from.get(&cursor) {
            keys.push(prev.key);
            cursor = *prev;
        }
        keys.reverse();
        Some(keys.into_iter().map(NodeKey::to_point).collect())
    }
}

/// Sorted, de-duplicated ruler coordinates.
fn rulers(values: Vec<f64>) -> Vec<f64> {
    let mut keys: Vec<i64> = values
        .into_iter()
        .filter(|v| v.is_finite())
        .map(|v| NodeKey::from_point(Point::new(v, 0.0)).x)
        .collect();
    keys.sort_unstable();
    keys.dedup();
    keys.into_iter()
        .map(|k| NodeKey { x: k, y: 0 }.to_point().x)
        .collect()
}

fn with_midpoints(rulers_in: Vec<f64>) -> Vec<f64> {
    let mids: Vec<f64> = rulers_in.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect();
    let mut all = rulers_in;
    all.extend(mids);
    rulers(all)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct State {
    key: NodeKey,
    /// Heading of the segment that entered `key`.
    dir: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    est: u64,
    cost: u64,
    state: State,
    pos: GridPos,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on estimate, then cost, then position and heading.
        other
            .est
            .cmp(&self.est)
            .then_with(|| other.cost.cmp(&self.cost))
            .then_with(|| other.state.key.y.cmp(&self.state.key.y))
            .then_with(|| other.state.key.x.cmp(&self.state.key.x))
            .then_with(|| other.state.dir.cmp(&self.state.dir))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ─── Diagram helpers ─────────────────────────────────────────────────────

/// Route one connector of `diagram` from its current geometry.
///
/// Obstacles are every shape except Group containers and the containers
/// enclosing either endpoint; the endpoint shapes themselves are included.
/// Returns `None` for an unknown connector.
pub fn route_connector(
    diagram: &Diagram,
    connector_id: ConnectorId,
    config: &RouterConfig,
) -> Option<Route> {
    let connector = diagram.connector(connector_id)?;
    let src_rect = diagram.shape(connector.source.shape)?.bounds;
    let dst_rect = diagram.shape(connector.target.shape)?.bounds;
    let (source, source_dir) = connector
        .source
        .point
        .resolve(&src_rect, dst_rect.center());
    let (target, target_dir) = connector
        .target
        .point
        .resolve(&dst_rect, src_rect.center());

    if connector.routing == RoutingStyle::Straight {
        return Some(Route {
            points: vec![source, target],
            fallback: false,
        });
    }

    let mut excluded: HashSet<ShapeId> = HashSet::new();
    excluded.extend(diagram.ancestors(connector.source.shape));
    excluded.extend(diagram.ancestors(connector.target.shape));
    let obstacles: Vec<Rect> = diagram
        .shapes()
        .filter(|s| s.shape_type != ShapeType::Group && !excluded.contains(&s.id))
        .map(|s| s.bounds)
        .collect();

    Some(plan_route(
        source, source_dir, target, target_dir, &obstacles, config,
    ))
}

/// Routes for every connector, in connector order.
pub fn route_all(diagram: &Diagram, config: &RouterConfig) -> Vec<(ConnectorId, Route)> {
    diagram
        .connectors()
        .iter()
        .filter_map(|c| route_connector(diagram, c.id, config).map(|r| (c.id, r)))
        .collect()
}
