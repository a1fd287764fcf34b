//! Process-grid fitting and target-load computation.

use crate::topology::id::Rank;

/// A 2D grid of destination cells embedded in the machine's rank space.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProcessGrid {
    pub x: usize,
    pub y: usize,
    /// Rank distance between grid rows (equals `x` for a dense embedding).
    pub row_stride: usize,
}

impl ProcessGrid {
    pub fn cells(&self) -> usize {
        self.x * self.y
    }

    /// Absolute rank of an array-grid cell index.
    pub fn cell_to_rank(&self, cell: usize) -> Rank {
        let cy = cell / self.x;
        let cx = cell % self.x;
        cy * self.row_stride + cx
    }
}

/// Fit a near-square `(x, y)` grid with `x*y <= procs` cells, wanting at
/// least `ceil(total_elements / elements_per_proc)` cells. Grows whichever
/// dimension is currently smaller, so the grid stays as square as the rank
/// count allows.
pub fn fit_process_grid(procs: usize, total_elements: u64, elements_per_proc: u64) -> ProcessGrid {
    let procs = procs.max(1);
    let per = elements_per_proc.max(1);
    let wanted = total_elements.div_ceil(per).max(1);
    let target = (wanted.min(procs as u64)) as usize;

    let (mut x, mut y) = (1usize, 1usize);
    while x * y < target {
        let (grow_x, keep) = if x <= y { (true, y) } else { (false, x) };
        let grown = if grow_x { (x + 1) * keep } else { keep * (y + 1) };
        if grown <= procs {
            if grow_x {
                x += 1;
            } else {
                y += 1;
            }
        } else if grow_x && x * (y + 1) <= procs {
            y += 1;
        } else if !grow_x && (x + 1) * y <= procs {
            x += 1;
        } else {
            break;
        }
    }
    ProcessGrid {
        x,
        y,
        row_stride: x,
    }
}

/// Exact integer water-filling: how many of `incoming` elements each cell
/// should receive so that every cell's load approaches the common final
/// level and no cell overshoots it. Cells already at or above that level
/// receive 0. Leftover units (integer remainder) go to the lowest-loaded
/// cells first, ties broken by cell index, so the result is deterministic.
///
/// Guarantees: every goal is non-negative and the goals sum to `incoming`.
pub fn compute_goal(loads: &[u64], incoming: u64) -> Vec<u64> {
    let n = loads.len();
    let mut goals = vec![0u64; n];
    if n == 0 || incoming == 0 {
        return goals;
    }

    // cells ordered by current load (stable: ties keep index order)
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by_key(|&i| loads[i]);

    let mut remaining = incoming;
    let mut level = loads[order[0]];
    let mut k = 0usize; // cells filled up to `level`
    while k < n {
        let next = if k + 1 < n {
            loads[order[k + 1]]
        } else {
            u64::MAX
        };
        k += 1;
        let headroom = (next - level).saturating_mul(k as u64);
        if remaining <= headroom || k == n {
            let per = remaining / k as u64;
            let extra = (remaining % k as u64) as usize;
            let final_level = level + per;
            for (pos, &i) in order[..k].iter().enumerate() {
                let target = final_level + u64::from(pos < extra);
                goals[i] = target - loads[i];
            }
            return goals;
        }
        remaining -= headroom;
        level = next;
    }
    goals
}
