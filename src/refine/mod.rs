//! The refinement rule engine: patterns, rule tables, and the refiner.

pub mod pattern;
pub mod refiner;
pub mod rules;

pub use pattern::{EdgePattern, PatternIndex};
pub use refiner::{
    apply_coarsening, apply_refinement, mark_coarsening, mark_full_refinement, mark_refinement,
    unrefine, RefinementSummary,
};
pub use rules::{
    classify_edge, mark_for_pattern, rule_for_pattern, rule_table, EdgeData, EdgeKind, RefRule,
    RuleTable, SonData, SonNeighbor, FATHER_SIDE_OFFSET,
};
