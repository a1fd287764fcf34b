//! # mesh-forge
//!
//! mesh-forge is a library for rule-based adaptive hierarchical mesh
//! refinement with cluster-based parallel load balancing, aimed at
//! multigrid/finite-element PDE codes. It keeps a persistent element forest
//! (parent/child refinement trees with per-side neighbor links), refines it
//! through precomputed per-shape rule tables with conforming closure, and
//! periodically redistributes the forest across ranks by clustering subtrees,
//! numbering and partitioning the cluster-adjacency graph, and rewriting
//! per-element ownership.
//!
//! ## Subsystems
//! - [`topology`]: element ids, shapes, the arena-backed forest, and
//!   coarse-grid seeding from importer-style arrays
//! - [`refine`]: edge patterns, the per-tag rule tables with O(1)
//!   pattern→rule lookup, and the refinement state machine
//! - [`balance`]: clustering, tree collectives for global numbering and
//!   concentration, the partitioner, and the ownership rewriter
//! - [`comm`]: the message-passing façade (serial and in-process backends),
//!   the process tree, and the pairwise interface exchange
//! - [`arena`]: scoped mark/alloc/release storage backing elements and
//!   clusters
//!
//! ## Determinism
//!
//! Collectives walk the process tree in fixed child order and every
//! randomized strategy draws from a `SmallRng` seeded through
//! [`balance::BalanceConfig`], so a pass is reproducible for a given rank
//! count and seed.
//!
//! ## Failure model
//!
//! Refinement and topology operations return [`error::MeshForgeError`];
//! balancing returns [`balance::BalanceError`], whose `code()` is the small
//! stable integer surface (0 = success) exposed to outer drivers. A failed
//! balancing pass leaves the forest's ownership untouched: destinations are
//! written only after the commit verdict has been broadcast to every rank.

pub mod arena;
pub mod balance;
pub mod comm;
pub mod error;
pub mod refine;
pub mod topology;

/// A convenient prelude to import the most-used types and entry points.
pub mod prelude {
    pub use crate::arena::Arena;
    pub use crate::balance::{
        balance, BalanceConfig, BalanceError, BalancerContext, MigrationPlan, PartitionStrategy,
    };
    pub use crate::comm::{Communicator, Interface, LocalComm, LocalUniverse, NoComm};
    pub use crate::error::MeshForgeError;
    pub use crate::refine::{
        apply_refinement, mark_full_refinement, mark_refinement, rule_for_pattern, unrefine,
        EdgePattern,
    };
    pub use crate::topology::{
        CoarseGridBuilder, Element, ElementClass, ElementForest, ElementId, ElementMark,
        ElementTag, Rank, VertexId,
    };
}
