//! Grid-based pathfinding using A* algorithm.
//!
//! The search is policy-free: callers pass a passability predicate that
//! already folds in terrain fields, buildings and resource nodes. All
//! costs are fixed-point and ties break on cell coordinates, so the same
//! query always yields the same path.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

use crate::math::{CellCoord, Fixed};

/// Upper bound on expanded nodes per query.
pub const DEFAULT_SEARCH_BUDGET: usize = 16_384;

/// A node in the A* open set priority queue.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct AStarNode {
    cell: CellCoord,
    f_score: Fixed,
    /// Tie-breaker for determinism: lower coordinates first.
    tie_breaker: u64,
}

impl Ord for AStarNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse for min-heap behavior.
        match other.f_score.cmp(&self.f_score) {
            Ordering::Equal => other.tie_breaker.cmp(&self.tie_breaker),
            ord => ord,
        }
    }
}

impl PartialOrd for AStarNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Direction offsets for 8-directional movement.
pub const DIRECTIONS: [(i32, i32); 8] = [
    (1, 0),   // East
    (1, 1),   // Southeast
    (0, 1),   // South
    (-1, 1),  // Southwest
    (-1, 0),  // West
    (-1, -1), // Northwest
    (0, -1),  // North
    (1, -1),  // Northeast
];

/// sqrt(2) rounded to fixed-point; straight lines beat zigzags.
fn diagonal_cost() -> Fixed {
    Fixed::from_bits(6_074_001_000)
}

/// Octile distance: admissible and consistent with [`diagonal_cost`].
fn octile_heuristic(a: CellCoord, b: CellCoord) -> Fixed {
    let dx = a.0.abs_diff(b.0);
    let dy = a.1.abs_diff(b.1);
    let (long, short) = if dx > dy { (dx, dy) } else { (dy, dx) };
    Fixed::from_num(long - short) + diagonal_cost() * Fixed::from_num(short)
}

fn tie_breaker((x, y): CellCoord) -> u64 {
    (u64::from(y as u32) << 32) | u64::from(x as u32)
}

/// A diagonal step may not cut the corner of an impassable cell.
fn step_allowed<P>(passable: &P, from: CellCoord, dx: i32, dy: i32) -> bool
where
    P: Fn(CellCoord) -> bool,
{
    dx == 0 || dy == 0 || (passable((from.0 + dx, from.1)) && passable((from.0, from.1 + dy)))
}

/// Find a cell path from `start` to `goal`.
///
/// `passable` must return `false` for off-map cells. The start cell is
/// never tested; the goal cell is. Returns the full cell sequence
/// including both ends, or `None` if no path exists within `budget`
/// expansions.
pub fn find_path<P>(start: CellCoord, goal: CellCoord, passable: &P, budget: usize) -> Option<Vec<CellCoord>>
where
    P: Fn(CellCoord) -> bool,
{
    if start == goal {
        return Some(vec![start]);
    }
    if !passable(goal) {
        return None;
    }

    let mut open_set = BinaryHeap::new();
    let mut came_from: BTreeMap<CellCoord, CellCoord> = BTreeMap::new();
    let mut g_score: BTreeMap<CellCoord, Fixed> = BTreeMap::new();

    g_score.insert(start, Fixed::ZERO);
    open_set.push(AStarNode {
        cell: start,
        f_score: octile_heuristic(start, goal),
        tie_breaker: tie_breaker(start),
    });

    let mut expanded = 0usize;
    while let Some(current) = open_set.pop() {
        if current.cell == goal {
            return Some(reconstruct_path(&came_from, goal));
        }

        expanded += 1;
        if expanded > budget {
            return None;
        }

        let current_g = g_score.get(&current.cell).copied().unwrap_or(Fixed::MAX);
        // Stale heap entry.
        if current.f_score > current_g + octile_heuristic(current.cell, goal) {
            continue;
        }

        for &(dx, dy) in &DIRECTIONS {
            let next = (current.cell.0 + dx, current.cell.1 + dy);
            if !passable(next) || !step_allowed(passable, current.cell, dx, dy) {
                continue;
            }

            let move_cost = if dx != 0 && dy != 0 {
                diagonal_cost()
            } else {
                Fixed::ONE
            };
            let tentative_g = current_g + move_cost;
            let known_g = g_score.get(&next).copied().unwrap_or(Fixed::MAX);

            if tentative_g < known_g {
                came_from.insert(next, current.cell);
                g_score.insert(next, tentative_g);
                open_set.push(AStarNode {
                    cell: next,
                    f_score: tentative_g + octile_heuristic(next, goal),
                    tie_breaker: tie_breaker(next),
                });
            }
        }
    }

    None
}

fn reconstruct_path(came_from: &BTreeMap<CellCoord, CellCoord>, goal: CellCoord) -> Vec<CellCoord> {
    let mut path = vec![goal];
    let mut current = goal;
    while let Some(&prev) = came_from.get(&current) {
        path.push(prev);
        current = prev;
    }
    path.reverse();
    path
}

/// Smooth a path by removing unnecessary waypoints.
///
/// Uses line-of-sight checks to skip intermediate cells while ensuring the
/// path doesn't cut through obstacles.
#[must_use]
pub fn smooth_path<P>(path: Vec<CellCoord>, passable: &P) -> Vec<CellCoord>
where
    P: Fn(CellCoord) -> bool,
{
    if path.len() <= 2 {
        return path;
    }

    let mut smoothed = Vec::with_capacity(path.len());
    smoothed.push(path[0]);

    let mut current_idx = 0;
    while current_idx < path.len() - 1 {
        let mut furthest_visible = current_idx + 1;
        for check_idx in (current_idx + 2)..path.len() {
            if has_line_of_sight(path[current_idx], path[check_idx], passable) {
                furthest_visible = check_idx;
            }
        }
        smoothed.push(path[furthest_visible]);
        current_idx = furthest_visible;
    }

    smoothed
}

/// Clear straight line between two cells (Bresenham, no corner cutting).
pub fn has_line_of_sight<P>(start: CellCoord, end: CellCoord, passable: &P) -> bool
where
    P: Fn(CellCoord) -> bool,
{
    let (x1, y1) = end;
    let dx = (x1 - start.0).abs();
    let dy = (y1 - start.1).abs();
    let sx = if start.0 < x1 { 1 } else { -1 };
    let sy = if start.1 < y1 { 1 } else { -1 };
    let mut err = dx - dy;
    let (mut x, mut y) = start;

    loop {
        if (x, y) != start && !passable((x, y)) {
            return false;
        }
        if x == x1 && y == y1 {
            return true;
        }

        let e2 = 2 * err;
        if e2 > -dy && e2 < dx && (!passable((x + sx, y)) || !passable((x, y + sy))) {
            return false;
        }
        if e2 > -dy {
            err -= dy;
            x += sx;
        }
        if e2 < dx {
            err += dx;
            y += sy;
        }
    }
}
