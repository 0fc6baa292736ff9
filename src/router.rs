//! Multi-net router: options, routes, the A* path finder and the façade.

use std::cell::Cell;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::geom::{diagonal, manhattan, DistanceFn, Point, Rect};
use crate::grid::{Grid, NO_PARENT};
use crate::groups::assign_groups;
use crate::heap::MinHeap;

/// Default bound on node expansions per net.
///
/// Exhausting the whole grid on a pathological configuration is routing
/// time wasted on a wire nobody can see; past this many expansions the
/// search stops and the wire is laid along the best chain found so far.
pub const DEFAULT_STEP_LIMIT: usize = 1_000_000;

/// Group label shared by routes connected through coincident endpoints.
pub type GroupId = u32;

/// Stable handle for a registered route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteId(u32);

/// Live coordinate source for a route endpoint.
///
/// Coordinates are re-read on every routing pass, so a route follows its
/// endpoints when they move. Implemented for fixed [`Point`]s and shared
/// [`Cell<Point>`]s; wrap a closure in [`AnchorFn`] to derive the position
/// from an external model.
pub trait Anchor {
    fn x(&self) -> f64;
    fn y(&self) -> f64;
}

impl Anchor for Point {
    fn x(&self) -> f64 {
        self.x
    }

    fn y(&self) -> f64 {
        self.y
    }
}

impl Anchor for Cell<Point> {
    fn x(&self) -> f64 {
        self.get().x
    }

    fn y(&self) -> f64 {
        self.get().y
    }
}

/// Adapter turning a position closure into an [`Anchor`].
pub struct AnchorFn<F>(pub F);

impl<F: Fn() -> Point> Anchor for AnchorFn<F> {
    fn x(&self) -> f64 {
        (self.0)().x
    }

    fn y(&self) -> f64 {
        (self.0)().y
    }
}

/// Snapshot handed to a route's change callback after each pass.
#[derive(Debug)]
pub struct Routed<'a> {
    pub route: RouteId,
    pub group: GroupId,
    pub path: &'a [Point],
    pub stats: RouteStats,
}

pub type OnChange = Box<dyn FnMut(Routed<'_>)>;

/// Failures surfaced by the router's fallible operations.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum RouterError {
    /// An option failed validation at construction.
    #[error("invalid option {name}: {value}")]
    InvalidOption { name: &'static str, value: f64 },

    /// A rectangle with inverted or non-finite bounds.
    #[error("malformed rectangle ({left}, {top}, {right}, {bottom})")]
    MalformedRect { left: f64, top: f64, right: f64, bottom: f64 },
}

/// Tunable routing costs and grid parameters, in the units of the caller's
/// coordinate system.
///
/// [`RouterOptions::with_grid_step`] derives the cost defaults from the
/// lattice spacing; construct through it and override fields as needed.
#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// Lattice spacing of the grid.
    pub grid_step: f64,
    /// Permit diagonal moves.
    pub diagonal: bool,
    /// Reward same-group overlaps instead of leaving them neutral.
    pub bus: bool,
    /// Heuristic distance; `None` selects Manhattan, or the diagonal
    /// distance when `diagonal` is set.
    pub distance: Option<DistanceFn>,
    /// Buffer kept between registered geometry and the exploration edge.
    pub margin: f64,
    /// Penalty for introducing a corner.
    pub turn_cost: f64,
    /// Reward for extending along a same-group trail in bus mode.
    pub bus_gain: f64,
    /// Penalty per foreign group at a crossed cell.
    pub cross_cost: f64,
    /// Penalty per occupied or obstacle cell adjacent to a candidate.
    pub proximity_cost: f64,
    /// Bound on node expansions per net.
    pub step_limit: usize,
}

impl RouterOptions {
    /// Defaults derived from the lattice spacing.
    pub fn with_grid_step(grid_step: f64) -> Self {
        Self {
            grid_step,
            diagonal: false,
            bus: false,
            distance: None,
            margin: 2.0 * grid_step,
            turn_cost: 1.5 * grid_step,
            bus_gain: 0.5 * grid_step,
            cross_cost: 3.0 * grid_step,
            proximity_cost: 2.0 * grid_step,
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }

    /// Distance function in effect.
    pub(crate) fn metric(&self) -> DistanceFn {
        match self.distance {
            Some(f) => f,
            None if self.diagonal => diagonal,
            None => manhattan,
        }
    }

    fn validate(&self) -> Result<(), RouterError> {
        let finite = [
            ("grid_step", self.grid_step),
            ("margin", self.margin),
            ("turn_cost", self.turn_cost),
            ("bus_gain", self.bus_gain),
            ("cross_cost", self.cross_cost),
            ("proximity_cost", self.proximity_cost),
        ];
        for (name, value) in finite {
            if !value.is_finite() {
                return Err(RouterError::InvalidOption { name, value });
            }
        }
        if self.grid_step <= 0.0 {
            return Err(RouterError::InvalidOption { name: "grid_step", value: self.grid_step });
        }
        if self.margin < 0.0 {
            return Err(RouterError::InvalidOption { name: "margin", value: self.margin });
        }
        if self.step_limit == 0 {
            return Err(RouterError::InvalidOption { name: "step_limit", value: 0.0 });
        }
        Ok(())
    }
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self::with_grid_step(10.0)
    }
}

/// Search statistics for one routed net.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RouteStats {
    pub cells_expanded: usize,
    pub cells_pushed: usize,
    pub cells_rescored: usize,
    pub path_points: usize,
    pub path_cost: f64,
}

/// Aggregate statistics for one [`Router::route`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PassStats {
    pub routes_routed: usize,
    pub grid_columns: u32,
    pub grid_rows: u32,
    pub reallocated: bool,
    pub cells_expanded: usize,
    pub cells_pushed: usize,
}

struct Route {
    id: RouteId,
    start: Rc<dyn Anchor>,
    goal: Rc<dyn Anchor>,
    on_change: OnChange,
    group: Option<GroupId>,
    /// Endpoint distance cached for the pass sort.
    length: f64,
    /// Grid nodes the endpoints resolved to on the last pass.
    start_node: usize,
    goal_node: usize,
}

impl Route {
    fn start_point(&self) -> Point {
        Point::new(self.start.x(), self.start.y())
    }

    fn goal_point(&self) -> Point {
        Point::new(self.goal.x(), self.goal.y())
    }
}

/// Reusable per-search buffers.
#[derive(Default)]
struct SearchScratch {
    heap: MinHeap<usize>,
    neighbours: Vec<usize>,
    ring: Vec<usize>,
    chain: Vec<usize>,
}

/// Multi-net router over a uniform grid.
///
/// Register obstacle rectangles and routes, then call [`Router::route`]:
/// the exploration area is stretched over the live geometry, the grid is
/// rebuilt, and every net is searched in ascending endpoint distance so
/// short wires are not detoured around long ones. Nets routed earlier leave
/// their group occupancy on the grid, which is how crossing avoidance and
/// bus sharing between nets emerge.
pub struct Router {
    options: RouterOptions,
    limits: Option<Rect>,
    obstacles: Vec<Rect>,
    routes: Vec<Route>,
    obstacle_cost: f64,
    grid: Grid,
    allocate: bool,
    next_route_id: u32,
    scratch: SearchScratch,
}

impl Router {
    pub fn new(options: RouterOptions) -> Result<Self, RouterError> {
        options.validate()?;
        Ok(Self {
            options,
            limits: None,
            obstacles: Vec::new(),
            routes: Vec::new(),
            obstacle_cost: 0.0,
            grid: Grid::new(),
            allocate: false,
            next_route_id: 0,
            scratch: SearchScratch::default(),
        })
    }

    pub fn options(&self) -> &RouterOptions {
        &self.options
    }

    /// Switch the heuristic between passes. `None` restores the default
    /// selection driven by the diagonal flag.
    pub fn set_distance(&mut self, distance: Option<DistanceFn>) {
        self.options.distance = distance;
    }

    /// Permit or forbid diagonal moves on subsequent passes.
    pub fn set_diagonal(&mut self, diagonal: bool) {
        self.options.diagonal = diagonal;
    }

    /// Enable or disable bus sharing on subsequent passes.
    pub fn set_bus(&mut self, bus: bool) {
        self.options.bus = bus;
    }

    /// Current exploration area, if any geometry has been registered.
    pub fn limits(&self) -> Option<Rect> {
        self.limits
    }

    /// Group id of a route, once a pass has assigned one.
    pub fn group_of(&self, id: RouteId) -> Option<GroupId> {
        self.routes.iter().find(|r| r.id == id).and_then(|r| r.group)
    }

    /// Register an obstacle rectangle.
    ///
    /// The exploration limits stretch to keep the configured margin around
    /// it, and the obstacle traversal cost is rescaled so that crossing an
    /// obstacle is always dearer than any obstacle-free detour within the
    /// current limits.
    pub fn add_obstacle(&mut self, rect: Rect) -> Result<(), RouterError> {
        if !rect.is_well_formed() {
            return Err(RouterError::MalformedRect {
                left: rect.left,
                top: rect.top,
                right: rect.right,
                bottom: rect.bottom,
            });
        }
        self.obstacles.push(rect);
        self.grow_limits(rect);
        if let Some(limits) = self.limits {
            self.obstacle_cost = limits.width() * limits.height() / self.options.grid_step
                + limits.width()
                + limits.height();
        }
        Ok(())
    }

    /// Register a route between two live endpoints.
    ///
    /// `on_change` receives the routed polyline after every pass; it must
    /// not call back into the router.
    pub fn add_route(
        &mut self,
        start: Rc<dyn Anchor>,
        goal: Rc<dyn Anchor>,
        on_change: impl FnMut(Routed<'_>) + 'static,
    ) -> RouteId {
        let id = RouteId(self.next_route_id);
        self.next_route_id += 1;
        self.grow_limits(Rect::from_point(Point::new(start.x(), start.y())));
        self.grow_limits(Rect::from_point(Point::new(goal.x(), goal.y())));
        self.routes.push(Route {
            id,
            start,
            goal,
            on_change: Box::new(on_change),
            group: None,
            length: 0.0,
            start_node: 0,
            goal_node: 0,
        });
        id
    }

    /// Drop a route. Group ids of the remaining routes are untouched.
    pub fn remove_route(&mut self, id: RouteId) -> bool {
        let before = self.routes.len();
        self.routes.retain(|r| r.id != id);
        self.routes.len() != before
    }

    /// Stretch the exploration area over `rect`, keeping the configured
    /// margin. A rectangle already well inside the limits is a no-op.
    pub fn extend_limits(&mut self, rect: Rect) -> Result<(), RouterError> {
        if !rect.is_well_formed() {
            return Err(RouterError::MalformedRect {
                left: rect.left,
                top: rect.top,
                right: rect.right,
                bottom: rect.bottom,
            });
        }
        self.grow_limits(rect);
        Ok(())
    }

    /// Grow (never shrink) the limits so `rect` keeps a margin of headroom,
    /// and flag the grid for reallocation when an edge moved.
    fn grow_limits(&mut self, rect: Rect) {
        let margin = self.options.margin;
        let step = self.options.grid_step;
        let Some(limits) = self.limits.as_mut() else {
            self.limits = Some(Rect::new(
                rect.left - step,
                rect.top - margin,
                rect.right + margin,
                rect.bottom + margin,
            ));
            self.allocate = true;
            return;
        };
        let mut grew = false;
        if rect.left - margin < limits.left {
            let left = (rect.left - step).min(limits.left);
            if left < limits.left {
                limits.left = left;
                grew = true;
            }
        }
        if rect.top - margin < limits.top {
            let top = rect.top - margin;
            if top < limits.top {
                limits.top = top;
                grew = true;
            }
        }
        if rect.right + margin > limits.right {
            let right = rect.right + margin;
            if right > limits.right {
                limits.right = right;
                grew = true;
            }
        }
        if rect.bottom + margin > limits.bottom {
            let bottom = rect.bottom + margin;
            if bottom > limits.bottom {
                limits.bottom = bottom;
                grew = true;
            }
        }
        if grew {
            self.allocate = true;
        }
    }

    /// Perform a full reroute pass.
    ///
    /// Every registered route is searched against the current grid state
    /// and its `on_change` callback fires exactly once, in ascending
    /// endpoint-distance order.
    pub fn route(&mut self) -> PassStats {
        let mut stats = PassStats::default();
        if self.routes.is_empty() {
            debug!("routing pass with no routes");
            return stats;
        }

        // Endpoints are live: pull the exploration area over their current
        // positions before rebuilding the grid.
        for i in 0..self.routes.len() {
            let start = self.routes[i].start_point();
            let goal = self.routes[i].goal_point();
            self.grow_limits(Rect::from_point(start));
            self.grow_limits(Rect::from_point(goal));
        }
        let Some(limits) = self.limits else {
            return stats;
        };

        let reallocated =
            self.grid.init(&limits, self.options.grid_step, &self.obstacles, self.allocate);
        self.allocate = false;
        stats.reallocated = reallocated;
        stats.grid_columns = self.grid.cols;
        stats.grid_rows = self.grid.rows;

        // Short routes first so they are not detoured around long ones.
        // The sort is stable, so equal lengths keep registration order.
        let metric = self.options.metric();
        for route in &mut self.routes {
            route.length = metric(route.start_point(), route.goal_point());
        }
        self.routes.sort_by(|a, b| a.length.total_cmp(&b.length));

        // Label any routes that joined since the previous pass.
        let endpoints: Vec<(Point, Point)> =
            self.routes.iter().map(|r| (r.start_point(), r.goal_point())).collect();
        let existing: Vec<Option<GroupId>> = self.routes.iter().map(|r| r.group).collect();
        let groups = assign_groups(&endpoints, &existing);
        for (route, &id) in self.routes.iter_mut().zip(&groups) {
            route.group = Some(id);
        }

        debug!(
            routes = self.routes.len(),
            cols = stats.grid_columns,
            rows = stats.grid_rows,
            reallocated,
            "routing pass"
        );

        for i in 0..self.routes.len() {
            let group = groups[i];
            let (path, route_stats) = self.find_path(i, limits, group);
            stats.routes_routed += 1;
            stats.cells_expanded += route_stats.cells_expanded;
            stats.cells_pushed += route_stats.cells_pushed;
            let route = &mut self.routes[i];
            let route_id = route.id;
            trace!(
                route = route_id.0,
                group,
                points = route_stats.path_points,
                cost = route_stats.path_cost,
                expanded = route_stats.cells_expanded,
                "net routed"
            );
            (route.on_change)(Routed { route: route_id, group, path: &path, stats: route_stats });
        }

        stats
    }

    /// A* over the grid for the route at `idx` (in pass order).
    ///
    /// Obstacle cells are traversable at a cost exceeding any obstacle-free
    /// detour, so a wire pinned against an obstacle still gets a path. If
    /// the open heap drains or the step limit trips before the goal is
    /// popped, the chain of the last popped node is used instead.
    fn find_path(&mut self, idx: usize, limits: Rect, group: GroupId) -> (Vec<Point>, RouteStats) {
        let metric = self.options.metric();
        let step = self.options.grid_step;
        let diagonal_moves = self.options.diagonal;
        let bus = self.options.bus;
        let turn_cost = self.options.turn_cost;
        let bus_gain = self.options.bus_gain;
        let cross_cost = self.options.cross_cost;
        let proximity_cost = self.options.proximity_cost;
        let step_limit = self.options.step_limit;
        let obstacle_cost = self.obstacle_cost;

        let mut stats = RouteStats::default();
        let start = self.routes[idx].start_point();
        let goal = self.routes[idx].goal_point();

        let Self { grid, scratch, routes, .. } = self;

        grid.reset_search();

        routes[idx].start_node = grid.nearest(&limits, step, start);
        routes[idx].goal_node = grid.nearest(&limits, step, goal);
        let start_idx = routes[idx].start_node;
        let goal_idx = routes[idx].goal_node;
        let goal_point = grid.node(goal_idx).point();

        scratch.heap.clear();
        {
            let node = grid.node_mut(start_idx);
            node.visited = true;
            node.g = 0.0;
            node.f = metric(node.point(), goal_point);
            scratch.heap.push(start_idx, node.f);
        }
        stats.cells_pushed += 1;

        let mut current = start_idx;
        let mut expanded = 0usize;

        while let Some(popped) = scratch.heap.pop() {
            current = popped;
            if current == goal_idx {
                break;
            }
            if expanded >= step_limit {
                break;
            }
            expanded += 1;
            stats.cells_expanded += 1;
            grid.node_mut(current).closed = true;

            let (cur_point, cur_g, cur_col, cur_row, cur_parent) = {
                let node = grid.node(current);
                (node.point(), node.g, node.col as i64, node.row as i64, node.parent)
            };
            let parent_col_row = (cur_parent != NO_PARENT).then(|| {
                let parent = grid.node(cur_parent as usize);
                (parent.col as i64, parent.row as i64)
            });

            grid.neighbours(current, diagonal_moves, &mut scratch.neighbours);
            for &n in &scratch.neighbours {
                let (n_point, n_col, n_row, n_obstacle, n_in_group, n_group_count) = {
                    let node = grid.node(n);
                    (
                        node.point(),
                        node.col as i64,
                        node.row as i64,
                        node.obstacle,
                        node.groups.contains(&group),
                        node.group_count(),
                    )
                };

                let mut g = cur_g + metric(cur_point, n_point);

                // A corner costs extra: the incoming and outgoing lattice
                // vectors must stay collinear (2D cross product) to avoid it.
                if let Some((p_col, p_row)) = parent_col_row {
                    let cross = (cur_col - p_col) * (n_row - cur_row)
                        - (cur_row - p_row) * (n_col - cur_col);
                    if cross != 0 {
                        g += turn_cost;
                    }
                }

                if n_obstacle {
                    g += obstacle_cost;
                }

                // Hugging foreign trails or obstacle faces is discouraged
                // for every cell around the candidate.
                grid.ring(n, &mut scratch.ring);
                for &m in &scratch.ring {
                    let around = grid.node(m);
                    if !bus || !around.groups.contains(&group) {
                        g += proximity_cost * around.group_count() as f64;
                    }
                    if around.obstacle {
                        g += proximity_cost;
                    }
                }

                // Rejoining our own bus is rewarded; crossing foreign nets
                // costs per group already through the cell.
                if bus && n_in_group {
                    g -= bus_gain;
                } else {
                    g += cross_cost * n_group_count as f64;
                }

                let node = grid.node_mut(n);
                if !node.visited || g < node.g {
                    let requeue = node.visited;
                    node.parent = current as i32;
                    node.g = g;
                    node.f = g + metric(n_point, goal_point);
                    node.visited = true;
                    let f = node.f;
                    if requeue {
                        scratch.heap.rescore(n, f);
                        stats.cells_rescored += 1;
                    } else {
                        scratch.heap.push(n, f);
                        stats.cells_pushed += 1;
                    }
                }
            }
        }

        // Walk the predecessor chain (goal back towards start), stamping
        // this route's group onto every cell it occupies.
        scratch.chain.clear();
        let mut cursor = current as i32;
        while cursor != NO_PARENT {
            scratch.chain.push(cursor as usize);
            cursor = grid.node(cursor as usize).parent;
        }

        stats.path_cost = grid.node(current).g;

        let mut path = Vec::with_capacity(scratch.chain.len());
        for &node_idx in scratch.chain.iter().rev() {
            let node = grid.node_mut(node_idx);
            node.groups.insert(group);
            path.push(node.point());
        }

        post_process(&mut path, start, goal);
        stats.path_points = path.len();
        (path, stats)
    }
}

/// Turn a chain of grid-aligned points into the polyline handed to the
/// caller: drop collinear interior points, slide the vertices next to the
/// ends onto the live endpoint axes, and anchor the ends exactly.
fn post_process(path: &mut Vec<Point>, start: Point, goal: Point) {
    simplify(path);
    if path.len() == 1 {
        // Both endpoints rounded to the same grid cell; the single node
        // cannot carry both live coordinates.
        path[0] = start;
        if goal != start {
            path.push(goal);
        }
        return;
    }
    if path.len() >= 2 {
        let (p0, p1) = (path[0], path[1]);
        if p1.x == p0.x {
            path[1].x = start.x;
        } else if p1.y == p0.y {
            path[1].y = start.y;
        }
        let last = path.len() - 1;
        let (q0, q1) = (path[last], path[last - 1]);
        if q1.x == q0.x {
            path[last - 1].x = goal.x;
        } else if q1.y == q0.y {
            path[last - 1].y = goal.y;
        }
    }
    if let Some(first) = path.first_mut() {
        *first = start;
    }
    if let Some(last) = path.last_mut() {
        *last = goal;
    }
}

/// Remove every interior point collinear with its neighbours.
fn simplify(path: &mut Vec<Point>) {
    let mut i = 1;
    while i + 1 < path.len() {
        let (a, b, c) = (path[i - 1], path[i], path[i + 1]);
        if (b.x - a.x) * (c.y - b.y) == (b.y - a.y) * (c.x - b.x) {
            path.remove(i);
        } else {
            i += 1;
        }
    }
}
