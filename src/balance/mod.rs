//! Cluster-based parallel load balancing.
//!
//! One `balance()` call is one SPMD pass over all ranks:
//!
//! 1. local clustering of the refinement forest (no communication),
//! 2. cluster counts reduce up the process tree, start ids scatter down
//!    (distributed prefix sum),
//! 3. cluster adjacency from root-element neighbors plus the interface
//!    exchange,
//! 4. every cluster record concentrates at the coordinator, which fits a
//!    process grid, partitions level batch by level batch, and
//! 5. broadcasts a single verdict — destinations, or an abort code that
//!    every rank observes identically.
//!
//! Destinations touch the element tree only after the commit verdict, and
//! the cluster arena is released at pass end, so a failed pass leaves the
//! forest exactly as it was.

pub mod cluster;
pub mod goal;
pub mod graph;
pub mod metrics;
pub mod partition;
pub mod rewrite;

use crate::arena::Arena;
use crate::comm::{exchange, CommError, Communicator, Interface, TreeComm};
use crate::error::MeshForgeError;
use crate::topology::forest::ElementForest;
use crate::topology::id::Rank;
use hashbrown::HashMap;
use thiserror::Error;

pub use cluster::{
    build_clusters, compute_descendant_counts, Cluster, ClusterRecord, MAX_CLUSTER_DEPTH,
};
pub use goal::{compute_goal, fit_process_grid, ProcessGrid};
pub use partition::{assign_destinations, PartitionStrategy};
pub use rewrite::{rewrite_ownership, MigrationPlan, MigrationRecord};

/// Failure classes of a balancing pass. `code()` is the stable integer
/// surface (0 is reserved for success); the enum keeps the kinds
/// inspectable for callers and tests.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BalanceError {
    /// No clusters anywhere: nothing to redistribute.
    #[error("nothing to rebalance")]
    NothingToBalance,
    /// A cluster would span more than the fixed maximum tracked depth.
    #[error("cluster depth exceeds the fixed bound of {max} levels")]
    DepthOverflow { max: usize },
    /// Geometry/clustering inconsistency: more neighbor clusters than the
    /// root element has sides.
    #[error("cluster {cluster} (root element {root}) has more than {max} neighbors")]
    TooManyClusterNeighbors { cluster: u64, root: u32, max: usize },
    /// Arena or scratch allocation failed; the pass aborts with the tree
    /// unchanged.
    #[error("out of memory during balancing")]
    OutOfMemory,
    /// A participant observed a failure it cannot attribute; all ranks abort.
    #[error("collective desync: {0}")]
    CollectiveDesync(String),
    /// Transport/codec failure in a collective.
    #[error(transparent)]
    Comm(#[from] CommError),
    /// Topology-layer failure surfaced during the pass.
    #[error(transparent)]
    Mesh(#[from] MeshForgeError),
    /// An error kind reconstructed from a wire code whose parameters were
    /// not transported.
    #[error("internal balancing error (code {0})")]
    Internal(u32),
}

impl BalanceError {
    /// Stable integer code (always nonzero).
    pub fn code(&self) -> u32 {
        match self {
            BalanceError::NothingToBalance => 1,
            BalanceError::DepthOverflow { .. } => 2,
            BalanceError::TooManyClusterNeighbors { .. } => 3,
            BalanceError::OutOfMemory | BalanceError::Mesh(MeshForgeError::OutOfMemory) => 4,
            BalanceError::CollectiveDesync(_) => 5,
            BalanceError::Comm(_) => 6,
            BalanceError::Mesh(_) => 7,
            BalanceError::Internal(c) => *c,
        }
    }

    /// Reconstruct the error kind carried by an abort verdict. Parameters
    /// are not transported, so reconstructed variants carry zeroed fields.
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => BalanceError::NothingToBalance,
            2 => BalanceError::DepthOverflow {
                max: MAX_CLUSTER_DEPTH,
            },
            3 => BalanceError::TooManyClusterNeighbors {
                cluster: 0,
                root: 0,
                max: 0,
            },
            4 => BalanceError::OutOfMemory,
            5 => BalanceError::CollectiveDesync("reported by a peer".into()),
            6 => BalanceError::Comm(CommError::Codec("reported by a peer".into())),
            c => BalanceError::Internal(c),
        }
    }
}

/// Tunables of one balancing pass.
#[derive(Clone, Debug)]
pub struct BalanceConfig {
    /// Coarsest level considered for clustering.
    pub minlevel: u32,
    /// Levels a cluster may span below its root before children split off.
    pub cluster_depth: u32,
    /// Subtrees smaller than this stay with their parent's cluster.
    pub size_threshold: u32,
    /// Minimum elements per processor when fitting the process grid.
    pub elements_per_proc: u64,
    pub strategy: PartitionStrategy,
    /// Refine each level batch with local Kernighan–Lin swaps.
    pub kl_refine: bool,
    /// Seed for the Random strategy; fixed so runs are reproducible.
    pub rng_seed: u64,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            minlevel: 0,
            cluster_depth: 2,
            size_threshold: 20,
            elements_per_proc: 50,
            strategy: PartitionStrategy::default(),
            kl_refine: true,
            rng_seed: 42,
        }
    }
}

/// Per-rank pass state: the communicator, the registered interfaces, and
/// the pass-scoped cluster arena. One context per rank; a pass is
/// single-threaded and non-reentrant within its rank, and nothing here is
/// shared across ranks, so independent passes cannot cross-talk.
pub struct BalancerContext<C: Communicator> {
    pub comm: C,
    pub interfaces: Vec<Interface>,
    clusters: Arena<Cluster>,
}

impl<C: Communicator> BalancerContext<C> {
    pub fn new(comm: C, interfaces: Vec<Interface>) -> Self {
        Self {
            comm,
            interfaces,
            clusters: Arena::new(),
        }
    }

    /// Context whose cluster arena refuses to grow past `capacity` entries.
    /// Used to inject deterministic out-of-memory in tests.
    pub fn with_cluster_capacity(comm: C, interfaces: Vec<Interface>, capacity: usize) -> Self {
        Self {
            comm,
            interfaces,
            clusters: Arena::with_capacity_limit(capacity),
        }
    }
}

/// The verdict every rank receives: either the full cluster→destination
/// assignment, or an abort code. Failure rides the same broadcast as
/// legitimate data, so no second failure protocol exists and every rank
/// decides identically.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
enum Verdict {
    Commit(Vec<(u64, Rank)>),
    Abort(u32),
}

const TAG_COUNT: u16 = 0x21;
const TAG_IDS: u16 = 0x22;
const TAG_INTERFACE: u16 = 0x23;
const TAG_RECORDS: u16 = 0x24;
const TAG_VERDICT: u16 = 0x25;

/// Rebalance the forest across all ranks. On success returns this rank's
/// migration plan; on failure the forest's ownership fields are exactly as
/// they were before the call.
pub fn balance<C: Communicator>(
    forest: &mut ElementForest,
    cfg: &BalanceConfig,
    ctx: &mut BalancerContext<C>,
) -> Result<MigrationPlan, BalanceError> {
    let my_rank = ctx.comm.rank();
    forest.reset_transients();
    let pass = ctx.clusters.mark();

    // local phase; a failure is recorded, not returned: the collectives
    // below must still run so every rank reaches the same verdict
    let mut local_code = 0u32;
    compute_descendant_counts(forest, my_rank);
    if let Err(e) = build_clusters(
        forest,
        &mut ctx.clusters,
        my_rank,
        cfg.minlevel,
        cfg.cluster_depth,
        cfg.size_threshold,
    ) {
        log::warn!("rank {my_rank}: local clustering failed: {e}");
        local_code = e.code();
    }

    let result = balance_inner(
        forest,
        cfg,
        &ctx.comm,
        &ctx.interfaces,
        &mut ctx.clusters,
        local_code,
    );
    ctx.clusters.release(pass);
    forest.reset_transients();
    if result.is_ok() {
        log::debug!("rank {my_rank}: balancing pass committed");
    }
    result
}

fn balance_inner<C: Communicator>(
    forest: &mut ElementForest,
    cfg: &BalanceConfig,
    comm: &C,
    interfaces: &[Interface],
    clusters: &mut Arena<Cluster>,
    mut local_code: u32,
) -> Result<MigrationPlan, BalanceError> {
    let tc = TreeComm::new(comm);

    // gather counts, scatter contiguous id ranges (prefix sum down the tree)
    graph::assign_global_ids(&tc, clusters, local_code, TAG_COUNT, TAG_IDS)?;

    // adjacency; an unhealthy rank still serves the interface exchange so
    // its peers never block
    if local_code == 0 {
        if let Err(e) =
            graph::compute_graph_info(comm, interfaces, forest, clusters, TAG_INTERFACE)
        {
            log::warn!("cluster graph construction failed: {e}");
            local_code = e.code();
        }
    } else {
        exchange(
            comm,
            interfaces,
            TAG_INTERFACE,
            |_| None::<u64>,
            |_, _: Option<u64>| Ok(()),
        )?;
    }

    // concentrate all records (and the worst code) at the coordinator
    let records = if local_code == 0 {
        graph::make_records(clusters)
    } else {
        Vec::new()
    };
    let report = graph::RankReport {
        code: local_code,
        records,
    };
    let (merged, token) = graph::concentrate_clusters(&tc, report, TAG_RECORDS)?;

    let root_verdict = tc.tree.is_root().then(|| {
        if merged.code != 0 {
            Verdict::Abort(merged.code)
        } else if merged.records.is_empty() {
            Verdict::Abort(BalanceError::NothingToBalance.code())
        } else {
            match assign_destinations(
                &merged.records,
                comm.size(),
                cfg.elements_per_proc,
                cfg.strategy,
                cfg.kl_refine,
                cfg.rng_seed,
            ) {
                Ok(assignments) => Verdict::Commit(assignments),
                Err(e) => Verdict::Abort(e.code()),
            }
        }
    });
    let verdict = tc.broadcast(TAG_VERDICT, token, root_verdict)?;

    match verdict {
        Verdict::Abort(code) => Err(BalanceError::from_code(code)),
        Verdict::Commit(assignments) => {
            let map: HashMap<u64, Rank> = assignments.into_iter().collect();
            for cluster in clusters.iter_mut() {
                let gid = cluster.global_id();
                let dest = map.get(&gid).ok_or_else(|| {
                    BalanceError::CollectiveDesync(format!("no destination for cluster {gid}"))
                })?;
                cluster.destination = Some(*dest);
            }
            rewrite_ownership(forest, clusters)
        }
    }
}
