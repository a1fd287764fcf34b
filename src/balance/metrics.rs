//! Assignment quality metrics, for tests and debugging.

use crate::balance::cluster::ClusterRecord;
use crate::topology::id::Rank;
use hashbrown::HashMap;

/// Number of cluster-adjacency edges crossing between destinations.
/// Each undirected edge is counted once.
pub fn edge_cut(records: &[ClusterRecord], dest: &HashMap<u64, Rank>) -> usize {
    let mut cut = 0;
    for r in records {
        let Some(&mine) = dest.get(&r.gid) else {
            continue;
        };
        for &g in &r.neighbors {
            if g > r.gid {
                continue; // count each pair once
            }
            if dest.get(&g).is_some_and(|&other| other != mine) {
                cut += 1;
            }
        }
    }
    cut
}

/// Ratio of the heaviest destination's element load to the average load.
/// 1.0 is perfect balance; 0.0 when nothing is assigned.
pub fn load_imbalance(records: &[ClusterRecord], dest: &HashMap<u64, Rank>) -> f64 {
    let mut loads: HashMap<Rank, u64> = HashMap::new();
    for r in records {
        if let Some(&rank) = dest.get(&r.gid) {
            *loads.entry(rank).or_default() += r.size;
        }
    }
    if loads.is_empty() {
        return 0.0;
    }
    let max = *loads.values().max().unwrap() as f64;
    let avg = loads.values().sum::<u64>() as f64 / loads.len() as f64;
    max / avg
}
