//! Grid A* run inside the path worker
//!
//! Operates on the static tile grid shipped over the worker channel at
//! init time.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use shared::Cell;

/// Static walkability map. Serialized to the worker once at init and
/// never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TileGrid {
    width: i32,
    height: i32,
    blocked: Vec<bool>,
}

impl TileGrid {
    pub fn new(width: i32, height: i32) -> Self {
        let tiles = (width.max(0) as usize) * (height.max(0) as usize);
        TileGrid {
            width,
            height,
            blocked: vec![false; tiles],
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn contains(&self, cell: Cell) -> bool {
        cell.x >= 0 && cell.x < self.width && cell.y >= 0 && cell.y < self.height
    }

    pub fn set_blocked(&mut self, cell: Cell, blocked: bool) {
        if let Some(i) = self.index(cell) {
            self.blocked[i] = blocked;
        }
    }

    /// Anything outside the grid counts as blocked.
    pub fn is_blocked(&self, cell: Cell) -> bool {
        match self.index(cell) {
            Some(i) => self.blocked[i],
            None => true,
        }
    }

    fn index(&self, cell: Cell) -> Option<usize> {
        if self.contains(cell) {
            Some((cell.y as usize) * (self.width as usize) + cell.x as usize)
        } else {
            None
        }
    }

    fn neighbors(&self, cell: Cell) -> [Cell; 4] {
        [
            Cell::new(cell.x + 1, cell.y),
            Cell::new(cell.x - 1, cell.y),
            Cell::new(cell.x, cell.y + 1),
            Cell::new(cell.x, cell.y - 1),
        ]
    }
}

/// Node in the A* open set
#[derive(Debug, Clone)]
struct PathNode {
    cell: Cell,
    f_cost: u32, // g_cost + heuristic
}

impl PartialEq for PathNode {
    fn eq(&self, other: &Self) -> bool {
        self.cell == other.cell
    }
}

impl Eq for PathNode {}

impl Ord for PathNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap
        other.f_cost.cmp(&self.f_cost)
    }
}

impl PartialOrd for PathNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn manhattan(a: Cell, b: Cell) -> u32 {
    a.x.abs_diff(b.x) + a.y.abs_diff(b.y)
}

/// Finds a path over the four-connected grid.
///
/// Returns None when the target is unreachable or an endpoint is
/// blocked. Endpoints outside the grid read as blocked; the worker
/// rejects those before the search runs.
pub fn find_path(grid: &TileGrid, start: Cell, goal: Cell) -> Option<Vec<Cell>> {
    if grid.is_blocked(start) || grid.is_blocked(goal) {
        return None;
    }
    if start == goal {
        return Some(vec![start]);
    }

    let mut open_set = BinaryHeap::new();
    let mut came_from: HashMap<Cell, Cell> = HashMap::new();
    let mut g_scores: HashMap<Cell, u32> = HashMap::new();

    g_scores.insert(start, 0);
    open_set.push(PathNode {
        cell: start,
        f_cost: manhattan(start, goal),
    });

    while let Some(current) = open_set.pop() {
        if current.cell == goal {
            return Some(reconstruct(&came_from, current.cell));
        }

        let current_g = *g_scores.get(&current.cell).unwrap_or(&u32::MAX);

        for neighbor in grid.neighbors(current.cell) {
            if grid.is_blocked(neighbor) {
                continue;
            }

            let tentative_g = current_g.saturating_add(1);
            let neighbor_g = *g_scores.get(&neighbor).unwrap_or(&u32::MAX);

            if tentative_g < neighbor_g {
                came_from.insert(neighbor, current.cell);
                g_scores.insert(neighbor, tentative_g);
                open_set.push(PathNode {
                    cell: neighbor,
                    f_cost: tentative_g + manhattan(neighbor, goal),
                });
            }
        }
    }

    None // No path found
}

/// Reconstruct the cell sequence from the came_from links
fn reconstruct(came_from: &HashMap<Cell, Cell>, mut current: Cell) -> Vec<Cell> {
    let mut path = vec![current];
    while let Some(&prev) = came_from.get(&current) {
        path.push(prev);
        current = prev;
    }
    path.reverse();
    path
}
