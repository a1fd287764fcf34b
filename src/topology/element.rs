//! Element shapes, classes, marks, and the per-element record.
//!
//! [`ElementTag`] is the closed set of shapes the forest can hold, with the
//! canonical per-tag corner numbering of edges and sides as static tables.
//! Rule tables exist for triangles, quadrilaterals, and tetrahedra; the other
//! tags are representable in a coarse grid but cannot be refined.

use crate::refine::pattern::EdgePattern;
use crate::topology::id::{ClusterId, ElementId, Rank, VertexId};

/// Maximum number of sides any supported tag has (hexahedron).
pub const MAX_SIDES: usize = 6;

/// Element shapes.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ElementTag {
    /// 2D simplex.
    Triangle,
    /// 2D tensor-product cell.
    Quadrilateral,
    /// 3D simplex.
    Tetrahedron,
    /// 3D pyramid (quad base + apex).
    Pyramid,
    /// 3D wedge/prism.
    Prism,
    /// 3D tensor-product cell.
    Hexahedron,
}

impl ElementTag {
    /// Topological dimension of the shape.
    pub fn dimension(self) -> u8 {
        match self {
            ElementTag::Triangle | ElementTag::Quadrilateral => 2,
            _ => 3,
        }
    }

    pub fn corner_count(self) -> usize {
        match self {
            ElementTag::Triangle => 3,
            ElementTag::Quadrilateral => 4,
            ElementTag::Tetrahedron => 4,
            ElementTag::Pyramid => 5,
            ElementTag::Prism => 6,
            ElementTag::Hexahedron => 8,
        }
    }

    pub fn edge_count(self) -> usize {
        self.edges().len()
    }

    pub fn side_count(self) -> usize {
        self.sides().len()
    }

    /// Corner pairs of each edge, in the canonical ordering the rule tables
    /// and refinement patterns index into.
    pub fn edges(self) -> &'static [[usize; 2]] {
        match self {
            ElementTag::Triangle => &[[0, 1], [1, 2], [2, 0]],
            ElementTag::Quadrilateral => &[[0, 1], [1, 2], [2, 3], [3, 0]],
            ElementTag::Tetrahedron => &[[0, 1], [1, 2], [2, 0], [0, 3], [1, 3], [2, 3]],
            ElementTag::Pyramid => &[
                [0, 1],
                [1, 2],
                [2, 3],
                [3, 0],
                [0, 4],
                [1, 4],
                [2, 4],
                [3, 4],
            ],
            ElementTag::Prism => &[
                [0, 1],
                [1, 2],
                [2, 0],
                [3, 4],
                [4, 5],
                [5, 3],
                [0, 3],
                [1, 4],
                [2, 5],
            ],
            ElementTag::Hexahedron => &[
                [0, 1],
                [1, 2],
                [2, 3],
                [3, 0],
                [4, 5],
                [5, 6],
                [6, 7],
                [7, 4],
                [0, 4],
                [1, 5],
                [2, 6],
                [3, 7],
            ],
        }
    }

    /// Corner lists of each side. In 2D a side *is* an edge, so the two
    /// tables coincide; in 3D sides are triangular or quadrilateral faces.
    pub fn sides(self) -> &'static [&'static [usize]] {
        match self {
            ElementTag::Triangle => &[&[0, 1], &[1, 2], &[2, 0]],
            ElementTag::Quadrilateral => &[&[0, 1], &[1, 2], &[2, 3], &[3, 0]],
            ElementTag::Tetrahedron => &[&[0, 1, 2], &[0, 1, 3], &[1, 2, 3], &[2, 0, 3]],
            ElementTag::Pyramid => &[
                &[0, 1, 2, 3],
                &[0, 1, 4],
                &[1, 2, 4],
                &[2, 3, 4],
                &[3, 0, 4],
            ],
            ElementTag::Prism => &[
                &[0, 1, 2],
                &[3, 4, 5],
                &[0, 1, 4, 3],
                &[1, 2, 5, 4],
                &[2, 0, 3, 5],
            ],
            ElementTag::Hexahedron => &[
                &[0, 1, 2, 3],
                &[4, 5, 6, 7],
                &[0, 1, 5, 4],
                &[1, 2, 6, 5],
                &[2, 3, 7, 6],
                &[3, 0, 4, 7],
            ],
        }
    }

    /// Whether a rule table is registered for this tag.
    pub fn refinable(self) -> bool {
        matches!(
            self,
            ElementTag::Triangle | ElementTag::Quadrilateral | ElementTag::Tetrahedron
        )
    }
}

/// Classification of how regular an element's creation was.
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, PartialEq, serde::Serialize, serde::Deserialize,
)]
pub enum ElementClass {
    /// Unclassified (coarse-grid elements).
    #[default]
    NoClass,
    /// Copy of its parent, retained for level conformity.
    Yellow,
    /// Irregular closure element.
    Green,
    /// Regular, fully refined.
    Red,
}

/// Requested refinement action on an element.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ElementMark {
    /// No refinement requested.
    #[default]
    None,
    /// Refine with the rule matching this edge pattern.
    Refine(EdgePattern),
    /// Request removal of this element's children.
    Coarsen,
}

/// One node of the refinement forest.
///
/// `neighbors` has one slot per side; `None` covers boundary sides and sides
/// whose neighbor exists only at a coarser level (the reverse pointer then
/// lives in a parent-level slot). The two `transient_*` fields are valid only
/// inside a balancing pass and are reset when a pass starts.
#[derive(Clone, Debug)]
pub struct Element {
    pub tag: ElementTag,
    pub corners: Vec<VertexId>,
    pub neighbors: Vec<Option<ElementId>>,
    pub parent: Option<ElementId>,
    pub children: Vec<ElementId>,
    pub mark: ElementMark,
    pub eclass: ElementClass,
    pub level: u32,
    /// Current owning rank.
    pub partition: Rank,
    /// Rank assigned by the last committed balancing pass.
    pub destination: Rank,
    pub transient_descendants: Option<u32>,
    pub transient_cluster: Option<ClusterId>,
}

impl Element {
    /// Fresh element with all slots empty and no classification.
    pub fn new(tag: ElementTag, corners: Vec<VertexId>, level: u32, partition: Rank) -> Self {
        debug_assert_eq!(corners.len(), tag.corner_count());
        Self {
            tag,
            corners,
            neighbors: vec![None; tag.side_count()],
            parent: None,
            children: Vec::new(),
            mark: ElementMark::None,
            eclass: ElementClass::NoClass,
            level,
            partition,
            destination: partition,
            transient_descendants: None,
            transient_cluster: None,
        }
    }

    pub fn is_refined(&self) -> bool {
        !self.children.is_empty()
    }

    /// Leaf in the refinement forest (no children materialized).
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_counts_are_consistent() {
        for tag in [
            ElementTag::Triangle,
            ElementTag::Quadrilateral,
            ElementTag::Tetrahedron,
            ElementTag::Pyramid,
            ElementTag::Prism,
            ElementTag::Hexahedron,
        ] {
            assert!(tag.side_count() <= MAX_SIDES);
            // every edge endpoint and side corner is a valid corner index
            for [a, b] in tag.edges() {
                assert!(*a < tag.corner_count() && *b < tag.corner_count());
            }
            for side in tag.sides() {
                for &c in *side {
                    assert!(c < tag.corner_count());
                }
            }
        }
    }

    #[test]
    fn two_dimensional_sides_are_edges() {
        for tag in [ElementTag::Triangle, ElementTag::Quadrilateral] {
            let edges = tag.edges();
            let sides = tag.sides();
            assert_eq!(edges.len(), sides.len());
            for (e, s) in edges.iter().zip(sides.iter()) {
                assert_eq!(&e[..], *s);
            }
        }
    }

    #[test]
    fn tet_sides_cover_all_edges() {
        let tag = ElementTag::Tetrahedron;
        // each tet edge lies on exactly two sides
        for [a, b] in tag.edges() {
            let on = tag
                .sides()
                .iter()
                .filter(|s| s.contains(a) && s.contains(b))
                .count();
            assert_eq!(on, 2, "edge ({a},{b})");
        }
    }
}
