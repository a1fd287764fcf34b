//! MeshForgeError: unified error type for the refinement and topology APIs.
//!
//! Every public operation on the element forest and the rule engine reports
//! failure through this type; nothing in the library panics on malformed
//! input. Balancing has its own error enum ([`crate::balance::BalanceError`])
//! because its failure classes map onto a stable integer code surface.

use crate::refine::pattern::EdgePattern;
use crate::topology::element::ElementTag;
use thiserror::Error;

/// Unified error type for mesh-forge refinement/topology operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MeshForgeError {
    /// Attempted to construct an id with a zero value (0 is the reserved sentinel).
    #[error("id must be non-zero (0 is reserved as invalid/sentinel)")]
    InvalidId,
    /// An element id did not resolve to a live element.
    #[error("element {0} is not live in this forest")]
    DeadElement(u32),
    /// No refinement rule is registered for this (tag, pattern) combination.
    ///
    /// Recoverable: the refiner substitutes the tag's full pattern and retries.
    #[error("no refinement rule for {tag:?} with pattern {pattern}")]
    NoRuleForPattern { tag: ElementTag, pattern: EdgePattern },
    /// The tag has no rule table at all (pyramids, prisms, hexahedra).
    #[error("no rule table for element tag {0:?}")]
    NoRuleTable(ElementTag),
    /// `apply_refinement` was called on an element that already has children.
    #[error("element {0} is already refined")]
    AlreadyRefined(u32),
    /// A refined interior side found no matching son on the opposite family.
    #[error("non-conforming side: element {element} side {side} has no matching neighbor son")]
    NonConformingSide { element: u32, side: usize },
    /// Coarsening would orphan references or remove a non-leaf child.
    #[error("cannot unrefine element {0}: a child is still referenced or refined")]
    CoarsenBlocked(u32),
    /// The arena could not satisfy an allocation.
    #[error("out of memory: arena capacity exhausted")]
    OutOfMemory,
    /// A corner index in a rule or element was outside the tag's range.
    #[error("corner index {index} out of range for {tag:?}")]
    CornerOutOfRange { tag: ElementTag, index: usize },
    /// A forest invariant does not hold (validation walk).
    #[error("forest invariant violated: {0}")]
    BrokenInvariant(String),
}
