//! Cost-weighted A* wire router for 2D diagrams.
//!
//! Component rectangles are obstacles, connector endpoints are live anchor
//! points, and every [`Router::route`] pass lays a polyline for each net
//! over a uniform grid. The search composes several costs on top of plain
//! distance: corners, obstacle traversal, skimming along foreign nets or
//! obstacle faces, and crossing foreign nets. Nets that share an endpoint
//! form a group; in bus mode their wires are rewarded for running on top of
//! each other instead of merely tolerated.
//!
//! Routes are searched shortest first, each against the footprint the
//! previous nets left on the grid, and the resulting polyline is delivered
//! through the route's callback with its first and last points anchored on
//! the exact endpoint coordinates.
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use wire_router::{Point, Rect, Router, RouterOptions};
//!
//! let mut router = Router::new(RouterOptions::default()).expect("valid options");
//! router.add_obstacle(Rect::new(20.0, -20.0, 40.0, 20.0)).expect("well-formed rectangle");
//!
//! let goal = Rc::new(Cell::new(Point::new(60.0, 0.0)));
//! router.add_route(Rc::new(Point::new(0.0, 0.0)), goal.clone(), |update| {
//!     assert_eq!(update.path.first(), Some(&Point::new(0.0, 0.0)));
//! });
//! router.route();
//!
//! // Endpoints are live: move one and reroute.
//! goal.set(Point::new(60.0, 40.0));
//! router.route();
//! ```

mod geom;
mod grid;
mod groups;
mod heap;
mod router;

pub use geom::{diagonal, manhattan, DistanceFn, Point, Rect};
pub use heap::MinHeap;
pub use router::{
    Anchor, AnchorFn, GroupId, OnChange, PassStats, RouteId, RouteStats, Routed, Router,
    RouterError, RouterOptions, DEFAULT_STEP_LIMIT,
};
