//! Ownership rewrite: apply the committed cluster→destination mapping back
//! onto the live element tree and emit the migration plan.

use crate::arena::Arena;
use crate::balance::cluster::Cluster;
use crate::balance::BalanceError;
use crate::topology::forest::ElementForest;
use crate::topology::id::{ElementId, Rank};

/// One element that changes owner.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MigrationRecord {
    pub element: ElementId,
    pub old_owner: Rank,
    pub new_owner: Rank,
}

/// Ordered migration output, cluster-contiguous so the transfer layer can
/// move one cluster at a time.
#[derive(Clone, Debug, Default)]
pub struct MigrationPlan {
    pub moves: Vec<MigrationRecord>,
    /// `moves[cluster_bounds[i]..cluster_bounds[i+1]]` belongs to cluster `i`.
    pub cluster_bounds: Vec<usize>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    /// Moves of one cluster, by local cluster index.
    pub fn cluster_moves(&self, i: usize) -> &[MigrationRecord] {
        &self.moves[self.cluster_bounds[i]..self.cluster_bounds[i + 1]]
    }
}

/// Stamp every element of every local cluster with its destination, clear
/// the transient cluster back-references, and collect the migration list.
///
/// An element is visited through the cluster whose back-reference it holds,
/// so a second traversal over shared subtrees cannot reprocess it.
pub fn rewrite_ownership(
    forest: &mut ElementForest,
    arena: &Arena<Cluster>,
) -> Result<MigrationPlan, BalanceError> {
    let mut plan = MigrationPlan::default();
    for (ci, cluster) in arena.iter().enumerate() {
        plan.cluster_bounds.push(plan.moves.len());
        let dest = cluster.destination.ok_or_else(|| {
            BalanceError::CollectiveDesync(format!(
                "cluster {} reached the rewrite step without a destination",
                cluster.global_id()
            ))
        })?;
        let mut stack: Vec<ElementId> = vec![cluster.root_element];
        while let Some(id) = stack.pop() {
            let elem = forest.element_mut(id)?;
            if elem.transient_cluster.map(|c| c.index()) != Some(ci) {
                continue;
            }
            elem.transient_cluster = None;
            elem.destination = dest;
            if elem.partition != dest {
                plan.moves.push(MigrationRecord {
                    element: id,
                    old_owner: elem.partition,
                    new_owner: dest,
                });
            }
            let children = elem.children.clone();
            stack.extend(children.into_iter().rev());
        }
    }
    plan.cluster_bounds.push(plan.moves.len());
    Ok(plan)
}
