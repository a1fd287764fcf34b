//! Coordinator-side partitioning of the concentrated cluster graph.
//!
//! Clusters are processed in level batches, deepest span first: every
//! maximal run of clusters sharing the same `[minlevel, minlevel + depth]`
//! span gets its own target-load computation and strategy invocation, so
//! deep (expensive) subtrees are spread before the shallow filler is placed.

use crate::balance::cluster::ClusterRecord;
use crate::balance::goal::{compute_goal, fit_process_grid};
use crate::balance::BalanceError;
use crate::topology::id::Rank;
use hashbrown::HashMap;
use itertools::{Itertools, MinMaxResult};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::slice::ParallelSliceMut;
use std::cmp::Reverse;

/// Graph-partitioning strategy for one level batch.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum PartitionStrategy {
    /// Fill cells in cluster-id order.
    Linear,
    /// Deal clusters round-robin across cells with remaining goal.
    Scattered,
    /// Shuffle with a seeded generator, then fill.
    Random,
    /// Order along the dominant centroid axis (coordinate bisection), then
    /// fill; keeps spatially close clusters on the same cell.
    #[default]
    Inertial,
}

/// Assign every cluster a destination rank. Runs on the coordinator only.
pub fn assign_destinations(
    records: &[ClusterRecord],
    procs: usize,
    elements_per_proc: u64,
    strategy: PartitionStrategy,
    kl_refine: bool,
    rng_seed: u64,
) -> Result<Vec<(u64, Rank)>, BalanceError> {
    if records.is_empty() {
        return Err(BalanceError::NothingToBalance);
    }
    let total: u64 = records.iter().map(|r| r.size).sum();
    let grid = fit_process_grid(procs, total, elements_per_proc);
    log::debug!(
        "partitioning {} clusters ({total} elements) onto a {}x{} grid",
        records.len(),
        grid.x,
        grid.y
    );

    // deepest span first; the sort is the coordinator's single hot spot
    let mut order: Vec<usize> = (0..records.len()).collect();
    order.par_sort_unstable_by_key(|&i| {
        let r = &records[i];
        (Reverse(r.minlevel + r.depth), r.minlevel, r.gid)
    });

    let mut loads = vec![0u64; grid.cells()];
    let mut out: Vec<(u64, Rank)> = Vec::with_capacity(records.len());
    let mut cell_of: HashMap<u64, usize> = HashMap::with_capacity(records.len());

    let mut batch_start = 0;
    while batch_start < order.len() {
        let span = |i: usize| {
            let r = &records[order[i]];
            (r.minlevel, r.depth)
        };
        let mut batch_end = batch_start + 1;
        while batch_end < order.len() && span(batch_end) == span(batch_start) {
            batch_end += 1;
        }
        let batch: Vec<&ClusterRecord> =
            order[batch_start..batch_end].iter().map(|&i| &records[i]).collect();

        let incoming: u64 = batch.iter().map(|r| r.size).sum();
        let goals = compute_goal(&loads, incoming);
        let mut assign = strategy_assign(strategy, &batch, &goals, rng_seed);
        if kl_refine {
            refine_by_swaps(&batch, &mut assign, &cell_of);
        }
        for (r, &cell) in batch.iter().zip(&assign) {
            loads[cell] += r.size;
            cell_of.insert(r.gid, cell);
            out.push((r.gid, grid.cell_to_rank(cell)));
        }
        batch_start = batch_end;
    }
    debug_assert_eq!(out.len(), records.len());
    Ok(out)
}

/// Order the batch per the strategy, then fill cells against their goals.
fn strategy_assign(
    strategy: PartitionStrategy,
    batch: &[&ClusterRecord],
    goals: &[u64],
    rng_seed: u64,
) -> Vec<usize> {
    let n = batch.len();
    let cells = goals.len();
    let mut order: Vec<usize> = (0..n).collect();
    match strategy {
        PartitionStrategy::Linear | PartitionStrategy::Scattered => {}
        PartitionStrategy::Random => {
            let mut rng = SmallRng::seed_from_u64(rng_seed);
            order.shuffle(&mut rng);
        }
        PartitionStrategy::Inertial => {
            let axis = dominant_axis(batch);
            order.sort_by(|&a, &b| {
                batch[a].centroid[axis]
                    .partial_cmp(&batch[b].centroid[axis])
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(batch[a].gid.cmp(&batch[b].gid))
            });
        }
    }

    let mut remaining = goals.to_vec();
    let mut assign = vec![0usize; n];
    match strategy {
        PartitionStrategy::Scattered => {
            let mut cursor = 0usize;
            for &i in &order {
                let mut tried = 0;
                while remaining[cursor] == 0 && tried < cells {
                    cursor = (cursor + 1) % cells;
                    tried += 1;
                }
                assign[i] = cursor;
                remaining[cursor] = remaining[cursor].saturating_sub(batch[i].size);
                cursor = (cursor + 1) % cells;
            }
        }
        _ => {
            let mut cursor = 0usize;
            for &i in &order {
                while remaining[cursor] == 0 && cursor + 1 < cells {
                    cursor += 1;
                }
                assign[i] = cursor;
                remaining[cursor] = remaining[cursor].saturating_sub(batch[i].size);
            }
        }
    }
    assign
}

/// Axis with the largest centroid spread.
fn dominant_axis(batch: &[&ClusterRecord]) -> usize {
    (0..3)
        .map(|axis| {
            let spread = match batch
                .iter()
                .map(|r| r.centroid[axis])
                .minmax_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            {
                MinMaxResult::MinMax(lo, hi) => hi - lo,
                _ => 0.0,
            };
            (axis, spread)
        })
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map_or(0, |(axis, _)| axis)
}

/// Local Kernighan–Lin style improvement: swap cluster pairs between cells
/// while the cut over the cluster-adjacency graph strictly decreases. Loads
/// stay balanced because a swap exchanges the two clusters' cells and the
/// pair's sizes travel with them symmetrically.
fn refine_by_swaps(
    batch: &[&ClusterRecord],
    assign: &mut [usize],
    placed: &HashMap<u64, usize>,
) {
    let n = batch.len();
    if n < 2 {
        return;
    }
    let cut_of = |i: usize, cell: usize, assign: &[usize], local: &HashMap<u64, usize>| -> usize {
        batch[i]
            .neighbors
            .iter()
            .filter(|&&g| {
                local
                    .get(&g)
                    .map(|&j| assign[j] != cell)
                    .or_else(|| placed.get(&g).map(|&c| c != cell))
                    .unwrap_or(false)
            })
            .count()
    };
    let local: HashMap<u64, usize> = batch.iter().enumerate().map(|(i, r)| (r.gid, i)).collect();

    for _pass in 0..2 {
        let mut improved = false;
        for i in 0..n {
            for j in (i + 1)..n {
                if assign[i] == assign[j] || batch[i].size != batch[j].size {
                    continue;
                }
                let before = cut_of(i, assign[i], assign, &local)
                    + cut_of(j, assign[j], assign, &local);
                let (ci, cj) = (assign[i], assign[j]);
                assign[i] = cj;
                assign[j] = ci;
                let after = cut_of(i, assign[i], assign, &local)
                    + cut_of(j, assign[j], assign, &local);
                if after < before {
                    improved = true;
                } else {
                    assign[i] = ci;
                    assign[j] = cj;
                }
            }
        }
        if !improved {
            break;
        }
    }
}
