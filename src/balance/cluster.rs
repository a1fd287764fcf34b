//! Bottom-up clustering of the local refinement forest.
//!
//! A cluster is a root element plus a bounded-depth, bounded-size connected
//! subtree, used as the atomic unit of load redistribution. Clustering uses
//! only local information: one pass per level, each element visited exactly
//! once as itself and once as a child. Sizes are *future* sizes — an element
//! marked for refinement but not yet refined contributes the children its
//! rule would create.

use crate::arena::Arena;
use crate::balance::BalanceError;
use crate::refine::pattern::EdgePattern;
use crate::refine::rules;
use crate::topology::element::{Element, ElementClass, ElementMark};
use crate::topology::forest::ElementForest;
use crate::topology::id::{ClusterId, ElementId, Rank};

/// Fixed bound on the levels a single cluster may span.
pub const MAX_CLUSTER_DEPTH: usize = 32;

/// A transient unit of work for load balancing. Lives in the pass arena.
#[derive(Clone, Debug)]
pub struct Cluster {
    pub root_element: ElementId,
    pub source: Rank,
    /// Assigned by the partitioner; `None` until the verdict commits.
    pub destination: Option<Rank>,
    pub minlevel: u32,
    /// The cluster spans levels `[minlevel, minlevel + depth]`.
    pub depth: usize,
    /// Element count per relative level (future sizes included).
    pub level_size: [u32; MAX_CLUSTER_DEPTH],
    /// Total element count, including projected future children.
    pub size: u64,
    /// Global ids: own id at index 0 after numbering, then neighbors.
    pub edges: Vec<u64>,
    pub centroid: [f64; 3],
}

impl Cluster {
    fn new(root_element: ElementId, source: Rank, minlevel: u32, centroid: [f64; 3]) -> Self {
        Self {
            root_element,
            source,
            destination: None,
            minlevel,
            depth: 0,
            level_size: [0; MAX_CLUSTER_DEPTH],
            size: 0,
            edges: Vec::new(),
            centroid,
        }
    }

    /// Global id, valid after numbering.
    pub fn global_id(&self) -> u64 {
        self.edges.first().copied().unwrap_or(0)
    }
}

/// Wire form of a cluster, gathered to the coordinator.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ClusterRecord {
    pub gid: u64,
    pub source: Rank,
    pub minlevel: u32,
    pub depth: u32,
    pub size: u64,
    /// Global ids of adjacent clusters (self excluded).
    pub neighbors: Vec<u64>,
    pub centroid: [f64; 3],
}

/// Children the pending mark would create on a still-unrefined element.
pub fn pending_sons(elem: &Element) -> u32 {
    if elem.is_refined() {
        return 0;
    }
    let ElementMark::Refine(pattern) = elem.mark else {
        return 0;
    };
    match rules::rule_for_pattern(elem.tag, pattern) {
        Ok(rule) => rule.nsons as u32,
        // unmatched patterns refine with the substituted full rule
        Err(_) => rules::rule_for_pattern(elem.tag, EdgePattern::full(elem.tag))
            .map(|r| r.nsons as u32)
            .unwrap_or(0),
    }
}

/// Fill `transient_descendants` for every master element: own weight (1 plus
/// pending sons) accumulated bottom-up through existing children.
pub fn compute_descendant_counts(forest: &mut ElementForest, my_rank: Rank) {
    let ids: Vec<ElementId> = forest.element_ids().collect();
    for &id in &ids {
        let Ok(e) = forest.element(id) else { continue };
        if e.partition != my_rank {
            continue;
        }
        let own = 1 + pending_sons(e);
        if let Ok(e) = forest.element_mut(id) {
            e.transient_descendants = Some(own);
        }
    }
    let max_level = forest.max_level();
    for level in (1..=max_level).rev() {
        let at_level: Vec<ElementId> = forest.elements_at_level(level).collect();
        for id in at_level {
            let (parent, count) = {
                let Ok(e) = forest.element(id) else { continue };
                if e.partition != my_rank {
                    continue;
                }
                (e.parent, e.transient_descendants.unwrap_or(0))
            };
            if let Some(pid) = parent {
                if let Ok(p) = forest.element_mut(pid) {
                    if let Some(total) = p.transient_descendants.as_mut() {
                        *total += count;
                    }
                }
            }
        }
    }
}

/// Grow `cluster` by one element (plus its projected future children),
/// checking the depth bound at every site that touches a level bucket.
fn add_to_cluster(
    cluster: &mut Cluster,
    elem: &Element,
) -> Result<(), BalanceError> {
    let rel = (elem.level - cluster.minlevel) as usize;
    if rel >= MAX_CLUSTER_DEPTH {
        return Err(BalanceError::DepthOverflow {
            max: MAX_CLUSTER_DEPTH,
        });
    }
    cluster.depth = cluster.depth.max(rel);
    cluster.level_size[rel] += 1;
    cluster.size += 1;

    let pending = pending_sons(elem);
    if pending > 0 {
        if rel + 1 >= MAX_CLUSTER_DEPTH {
            return Err(BalanceError::DepthOverflow {
                max: MAX_CLUSTER_DEPTH,
            });
        }
        cluster.depth = cluster.depth.max(rel + 1);
        cluster.level_size[rel + 1] += pending;
        cluster.size += u64::from(pending);
    }
    Ok(())
}

/// Partition the local forest at levels `>= minlevel` into clusters.
///
/// Walks levels upward from `minlevel`; any master element without a cluster
/// roots a new one. Children are kept with their parent when they *must*
/// stay (Yellow/Green closure children and leaves — checked first, always
/// wins), when the relative depth is within `cluster_depth`, or when their
/// descendant count is below `size_threshold`; otherwise they root their own
/// cluster when their level is visited.
pub fn build_clusters(
    forest: &mut ElementForest,
    arena: &mut Arena<Cluster>,
    my_rank: Rank,
    minlevel: u32,
    cluster_depth: u32,
    size_threshold: u32,
) -> Result<usize, BalanceError> {
    let base = arena.len();
    let max_level = forest.max_level();
    for level in minlevel..=max_level {
        let at_level: Vec<ElementId> = forest.elements_at_level(level).collect();
        for id in at_level {
            let (partition, assigned) = {
                let e = forest.element(id)?;
                (e.partition, e.transient_cluster)
            };
            if partition != my_rank {
                continue;
            }
            let cid = match assigned {
                Some(cid) => cid,
                None => {
                    let centroid = forest.centroid(id)?;
                    let idx = arena
                        .alloc(Cluster::new(id, my_rank, level, centroid))
                        .map_err(|_| BalanceError::OutOfMemory)?;
                    let cid = ClusterId::from_index(idx);
                    forest.element_mut(id)?.transient_cluster = Some(cid);
                    log::trace!("cluster {cid} rooted at element {id} (level {level})");
                    cid
                }
            };

            let elem = forest.element(id)?.clone();
            {
                let cluster = arena
                    .get_mut(cid.index())
                    .ok_or(BalanceError::OutOfMemory)?;
                add_to_cluster(cluster, &elem)?;
            }

            let cluster_minlevel = arena.get(cid.index()).map(|c| c.minlevel).unwrap_or(level);
            for &child_id in &elem.children {
                let child = forest.element(child_id)?;
                if child.partition != my_rank || child.transient_cluster.is_some() {
                    continue;
                }
                let must_stay = matches!(
                    child.eclass,
                    ElementClass::Yellow | ElementClass::Green
                ) || child.is_leaf();
                let within_depth =
                    u64::from(child.level - cluster_minlevel) <= u64::from(cluster_depth);
                let too_small =
                    child.transient_descendants.unwrap_or(1) < size_threshold;
                if must_stay || within_depth || too_small {
                    forest.element_mut(child_id)?.transient_cluster = Some(cid);
                }
            }
        }
    }
    Ok(arena.len() - base)
}
