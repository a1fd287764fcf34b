//! Global cluster numbering and the cluster-adjacency graph.
//!
//! Numbering is a distributed prefix sum: cluster counts reduce up the
//! process tree, then contiguous id ranges scatter back down in fixed child
//! order, so every cluster gets a globally unique id with no per-cluster
//! coordination and the id layout is reproducible. Adjacency comes from the
//! root elements' neighbors; cross-rank adjacencies ride the pairwise
//! interface exchange.

use crate::arena::Arena;
use crate::balance::cluster::{Cluster, ClusterRecord};
use crate::balance::BalanceError;
use crate::comm::tree::{GatherToken, TreeComm};
use crate::comm::{exchange, Communicator, Interface};
use crate::topology::forest::ElementForest;
use crate::topology::id::ElementId;

/// Per-rank contribution to the counting reduction: cluster count plus the
/// worst local error code seen so far (0 = healthy).
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct CountReport {
    pub clusters: u64,
    pub code: u32,
}

/// Reduce cluster counts up the tree and scatter contiguous start ids back
/// down. Every local cluster then stores its global id at `edges[0]`.
/// Returns the rank's start id and the gather token of the *count* phase is
/// consumed here; the caller gets the id-phase token for the next gather.
pub fn assign_global_ids<C: Communicator>(
    tc: &TreeComm<'_, C>,
    arena: &mut Arena<Cluster>,
    local_code: u32,
    tag_count: u16,
    tag_ids: u16,
) -> Result<u64, BalanceError> {
    let local = CountReport {
        clusters: arena.len() as u64,
        code: local_code,
    };
    let (_subtree, child_reports, token) = tc
        .reduce_up(tag_count, local, |acc: CountReport, child: &CountReport| {
            CountReport {
                clusters: acc.clusters + child.clusters,
                code: acc.code.max(child.code),
            }
        })
        .map_err(BalanceError::from)?;

    // ids: my clusters first, then each child subtree's contiguous range
    let my_count = local.clusters;
    let start = tc
        .scatter_down(tag_ids, token, tc.tree.is_root().then_some(1u64), |start| {
            let mut next = start + my_count;
            let mut forwards = Vec::with_capacity(child_reports.len());
            for report in &child_reports {
                forwards.push(next);
                next += report.clusters;
            }
            (start, forwards)
        })
        .map_err(BalanceError::from)?;

    for (idx, cluster) in arena.iter_mut().enumerate() {
        let gid = start + idx as u64;
        if cluster.edges.is_empty() {
            cluster.edges.push(gid);
        } else {
            cluster.edges[0] = gid;
        }
    }
    Ok(start)
}

/// Record exchanged per interface link: the global id of the cluster rooted
/// at the boundary element, when that element is a cluster root.
type RootIdRecord = Option<u64>;

/// Fill every cluster's adjacency: local edges from root-element neighbors,
/// cross-rank edges via the interface exchange. A cluster collecting more
/// neighbors than its root's side count allows is a consistency failure.
pub fn compute_graph_info<C: Communicator>(
    comm: &C,
    interfaces: &[Interface],
    forest: &ElementForest,
    arena: &mut Arena<Cluster>,
    tag_interface: u16,
) -> Result<(), BalanceError> {
    // local adjacency
    let mut new_edges: Vec<(usize, u64)> = Vec::new();
    for (ci, cluster) in arena.iter().enumerate() {
        let root = forest.element(cluster.root_element)?;
        for nb in root.neighbors.iter().copied().flatten() {
            let n = forest.element(nb)?;
            let Some(other) = n.transient_cluster else {
                continue;
            };
            if other.index() == ci {
                continue;
            }
            let Some(other_cluster) = arena.get(other.index()) else {
                continue;
            };
            if other_cluster.root_element == nb {
                new_edges.push((ci, other_cluster.global_id()));
            }
        }
    }

    // cross-rank adjacency: gather root ids, scatter into the local cluster
    // of the paired boundary element (when that element is a root itself)
    let cluster_root_gid = |e: ElementId| -> RootIdRecord {
        let elem = forest.element(e).ok()?;
        let cid = elem.transient_cluster?;
        let cluster = arena.get(cid.index())?;
        (cluster.root_element == e).then(|| cluster.global_id())
    };
    let mut remote_edges: Vec<(usize, u64)> = Vec::new();
    exchange(
        comm,
        interfaces,
        tag_interface,
        |local| cluster_root_gid(local),
        |local, remote: RootIdRecord| {
            if let (Some(gid), Ok(elem)) = (remote, forest.element(local)) {
                if let Some(cid) = elem.transient_cluster {
                    if let Some(cluster) = arena.get(cid.index()) {
                        if cluster.root_element == local {
                            remote_edges.push((cid.index(), gid));
                        }
                    }
                }
            }
            Ok(())
        },
    )
    .map_err(BalanceError::from)?;

    for (ci, gid) in new_edges.into_iter().chain(remote_edges) {
        let (max_neighbors, root) = {
            let cluster = arena.get(ci).ok_or(BalanceError::OutOfMemory)?;
            let root = forest.element(cluster.root_element)?;
            (root.tag.side_count(), cluster.root_element)
        };
        let cluster = arena.get_mut(ci).ok_or(BalanceError::OutOfMemory)?;
        if cluster.edges.iter().any(|&g| g == gid) {
            continue;
        }
        // self id occupies index 0, so capacity is side count + 1
        if cluster.edges.len() >= max_neighbors + 1 {
            return Err(BalanceError::TooManyClusterNeighbors {
                cluster: cluster.global_id(),
                root: root.get(),
                max: max_neighbors,
            });
        }
        cluster.edges.push(gid);
    }
    Ok(())
}

/// Wire records for the concentration phase, in local (= gid) order.
pub fn make_records(arena: &Arena<Cluster>) -> Vec<ClusterRecord> {
    arena
        .iter()
        .map(|c| ClusterRecord {
            gid: c.global_id(),
            source: c.source,
            minlevel: c.minlevel,
            depth: c.depth as u32,
            size: c.size,
            neighbors: c.edges.iter().skip(1).copied().collect(),
            centroid: c.centroid,
        })
        .collect()
}

/// Gather every rank's records (and worst error code) to the coordinator.
/// Concatenation follows the tree order used for id assignment, so the
/// coordinator sees records sorted by gid.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct RankReport {
    pub code: u32,
    pub records: Vec<ClusterRecord>,
}

pub fn concentrate_clusters<C: Communicator>(
    tc: &TreeComm<'_, C>,
    report: RankReport,
    tag_records: u16,
) -> Result<(RankReport, GatherToken), BalanceError> {
    let (merged, _children, token) = tc
        .reduce_up(tag_records, report, |mut acc: RankReport, child: &RankReport| {
            acc.code = acc.code.max(child.code);
            acc.records.extend(child.records.iter().cloned());
            acc
        })
        .map_err(BalanceError::from)?;
    Ok((merged, token))
}
