//! Group discovery over routes that share endpoint coordinates.

use crate::geom::Point;
use crate::router::GroupId;

/// Assign a group id to every route that does not have one yet.
///
/// `endpoints` holds the live `(start, goal)` coordinates per route, in the
/// order the routes will be searched; `existing` carries ids assigned on
/// earlier passes, which are never changed. A route without an id becomes
/// the representative of a new group labelled with its own position, and
/// the id spreads depth-first through every later unlabelled route reachable
/// over exactly coinciding endpoints. Earlier routes already carry an id,
/// so the closure only ever needs to look forward.
pub(crate) fn assign_groups(
    endpoints: &[(Point, Point)],
    existing: &[Option<GroupId>],
) -> Vec<GroupId> {
    let mut assigned: Vec<Option<GroupId>> = existing.to_vec();
    let mut stack = Vec::new();

    for i in 0..endpoints.len() {
        if assigned[i].is_some() {
            continue;
        }
        let id = i as GroupId;
        assigned[i] = Some(id);
        stack.clear();
        stack.push(i);
        while let Some(k) = stack.pop() {
            for j in (i + 1)..endpoints.len() {
                if assigned[j].is_none() && shares_endpoint(endpoints[k], endpoints[j]) {
                    assigned[j] = Some(id);
                    stack.push(j);
                }
            }
        }
    }

    // Every slot was either carried over or labelled above.
    assigned
        .into_iter()
        .enumerate()
        .map(|(i, id)| id.unwrap_or(i as GroupId))
        .collect()
}

/// Exact coordinate equality on either endpoint.
fn shares_endpoint(a: (Point, Point), b: (Point, Point)) -> bool {
    a.0 == b.0 || a.0 == b.1 || a.1 == b.0 || a.1 == b.1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(sx: f64, sy: f64, gx: f64, gy: f64) -> (Point, Point) {
        (Point::new(sx, sy), Point::new(gx, gy))
    }

    #[test]
    fn disconnected_routes_get_distinct_ids() {
        let endpoints = [pair(0.0, 0.0, 10.0, 0.0), pair(0.0, 50.0, 10.0, 50.0)];
        let groups = assign_groups(&endpoints, &[None, None]);
        assert_eq!(groups, vec![0, 1]);
    }

    #[test]
    fn shared_endpoint_joins_a_group() {
        let endpoints = [pair(0.0, 0.0, 100.0, 0.0), pair(0.0, 0.0, 100.0, 50.0)];
        let groups = assign_groups(&endpoints, &[None, None]);
        assert_eq!(groups, vec![0, 0]);
    }

    #[test]
    fn connectivity_is_transitive() {
        // 0 touches 1 at (10,0); 1 touches 2 at (20,0); 3 is apart.
        let endpoints = [
            pair(0.0, 0.0, 10.0, 0.0),
            pair(10.0, 0.0, 20.0, 0.0),
            pair(20.0, 0.0, 30.0, 0.0),
            pair(90.0, 90.0, 99.0, 99.0),
        ];
        let groups = assign_groups(&endpoints, &[None, None, None, None]);
        assert_eq!(groups, vec![0, 0, 0, 3]);
    }

    #[test]
    fn closure_reaches_routes_out_of_index_order() {
        // 0 connects to 2 directly, and 2 connects back to 1.
        let endpoints = [
            pair(0.0, 0.0, 10.0, 0.0),
            pair(20.0, 0.0, 30.0, 0.0),
            pair(10.0, 0.0, 20.0, 0.0),
        ];
        let groups = assign_groups(&endpoints, &[None, None, None]);
        assert_eq!(groups, vec![0, 0, 0]);
    }

    #[test]
    fn existing_ids_are_sticky() {
        // Both routes were grouped on an earlier pass; the coordinates no
        // longer coincide but the labels survive.
        let endpoints = [pair(0.0, 0.0, 10.0, 0.0), pair(50.0, 50.0, 60.0, 50.0)];
        let groups = assign_groups(&endpoints, &[Some(0), Some(0)]);
        assert_eq!(groups, vec![0, 0]);
    }

    #[test]
    fn new_route_next_to_a_sticky_group_starts_its_own() {
        // Route 1 already has an id, so the unlabelled route 0 cannot pull
        // it into a fresh group and labels only itself.
        let endpoints = [pair(0.0, 0.0, 10.0, 0.0), pair(10.0, 0.0, 20.0, 0.0)];
        let groups = assign_groups(&endpoints, &[None, Some(1)]);
        assert_eq!(groups, vec![0, 1]);
    }

    #[test]
    fn float_equality_is_exact() {
        let endpoints = [
            pair(0.1 + 0.2, 0.0, 10.0, 0.0),
            pair(0.3, 0.0, 20.0, 0.0),
        ];
        // 0.1 + 0.2 != 0.3 in f64, so the endpoints do not coincide.
        let groups = assign_groups(&endpoints, &[None, None]);
        assert_eq!(groups, vec![0, 1]);
    }
}
