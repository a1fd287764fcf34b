//! Refinement patterns and the pattern→rule index.
//!
//! A pattern is a bitmask over the canonical edges of a tag: bit `i` set
//! means "edge `i` is marked for subdivision". The index is a dense table of
//! `1 << edge_count` entries, filled once from every registered rule's packed
//! pattern, so `rule_for_pattern` is a single array load.

use crate::topology::element::ElementTag;
use std::fmt;

/// Bitmask of marked edges on one element.
#[derive(
    Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd,
    serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct EdgePattern(u16);

impl EdgePattern {
    pub const EMPTY: EdgePattern = EdgePattern(0);

    #[inline]
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Pattern with the given edge indices marked.
    pub fn from_edges(edges: &[usize]) -> Self {
        let mut bits = 0u16;
        for &e in edges {
            bits |= 1 << e;
        }
        Self(bits)
    }

    /// Pattern marking every edge of `tag` (the regular/full request).
    pub fn full(tag: ElementTag) -> Self {
        Self((1u16 << tag.edge_count()) - 1)
    }

    #[inline]
    pub const fn bits(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn has_edge(self, edge: usize) -> bool {
        self.0 & (1 << edge) != 0
    }

    #[inline]
    pub const fn with_edge(self, edge: usize) -> Self {
        Self(self.0 | (1 << edge))
    }

    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Number of marked edges.
    #[inline]
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Indices of marked edges, ascending.
    pub fn edges(self) -> impl Iterator<Item = usize> {
        let bits = self.0;
        (0..16).filter(move |i| bits & (1 << i) != 0)
    }

    /// Restriction of this pattern to the edges listed in `subset`,
    /// re-expressed as a mask over `subset` positions.
    pub fn restrict(self, subset: &[usize]) -> Self {
        let mut bits = 0u16;
        for (pos, &e) in subset.iter().enumerate() {
            if self.has_edge(e) {
                bits |= 1 << pos;
            }
        }
        Self(bits)
    }
}

impl fmt::Debug for EdgePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EdgePattern({:#06b})", self.0)
    }
}

impl fmt::Display for EdgePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#b}", self.0)
    }
}

/// Dense pattern→rule lookup for one tag.
#[derive(Debug, Clone)]
pub struct PatternIndex {
    entries: Vec<Option<usize>>,
}

impl PatternIndex {
    /// Empty index sized for a tag with `edge_count` edges.
    pub fn new(edge_count: usize) -> Self {
        Self {
            entries: vec![None; 1usize << edge_count],
        }
    }

    /// Register `rule` as the match for `pattern`. Double registration of a
    /// pattern is a table-construction bug.
    pub fn register(&mut self, pattern: EdgePattern, rule: usize) {
        let slot = &mut self.entries[pattern.bits() as usize];
        debug_assert!(slot.is_none(), "pattern {pattern} registered twice");
        *slot = Some(rule);
    }

    /// Rule index for `pattern`, or `None` if no rule covers it.
    #[inline]
    pub fn lookup(&self, pattern: EdgePattern) -> Option<usize> {
        self.entries
            .get(pattern.bits() as usize)
            .copied()
            .flatten()
    }

    /// Number of registered patterns.
    pub fn registered(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_edge_ops() {
        let p = EdgePattern::from_edges(&[0, 2]);
        assert!(p.has_edge(0) && !p.has_edge(1) && p.has_edge(2));
        assert_eq!(p.count(), 2);
        assert_eq!(p.edges().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(p.with_edge(1), EdgePattern::from_bits(0b111));
    }

    #[test]
    fn full_pattern_matches_edge_count() {
        assert_eq!(EdgePattern::full(ElementTag::Triangle).bits(), 0b111);
        assert_eq!(EdgePattern::full(ElementTag::Tetrahedron).bits(), 0b111111);
    }

    #[test]
    fn restrict_renumbers_to_subset_positions() {
        // tet side 2 carries edges {1, 5, 4}; a pattern marking edges 1 and 4
        // restricted to that side sets positions 0 and 2
        let p = EdgePattern::from_edges(&[1, 4]);
        let r = p.restrict(&[1, 5, 4]);
        assert_eq!(r.bits(), 0b101);
    }

    #[test]
    fn index_lookup_and_miss() {
        let mut idx = PatternIndex::new(3);
        idx.register(EdgePattern::EMPTY, 0);
        idx.register(EdgePattern::from_bits(0b111), 7);
        assert_eq!(idx.lookup(EdgePattern::EMPTY), Some(0));
        assert_eq!(idx.lookup(EdgePattern::from_bits(0b111)), Some(7));
        assert_eq!(idx.lookup(EdgePattern::from_bits(0b010)), None);
        assert_eq!(idx.registered(), 2);
    }
}
