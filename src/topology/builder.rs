//! Coarse-grid seeding.
//!
//! The importer hands over plain arrays (vertex coordinates, per-cell corner
//! lists and tags); this builder turns them into a level-0 forest and wires
//! side neighbors automatically: two elements become neighbors exactly when
//! they present the same sorted vertex set on one of their sides.

use crate::error::MeshForgeError;
use crate::topology::element::{Element, ElementTag};
use crate::topology::forest::ElementForest;
use crate::topology::id::{ElementId, Rank, VertexId};
use hashbrown::HashMap;

/// Incremental builder for a level-0 grid.
#[derive(Debug, Default)]
pub struct CoarseGridBuilder {
    forest: ElementForest,
    cells: Vec<ElementId>,
}

impl CoarseGridBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vertex(&mut self, coords: [f64; 3]) -> VertexId {
        self.forest.add_vertex(coords)
    }

    pub fn add_element(
        &mut self,
        tag: ElementTag,
        corners: &[VertexId],
        partition: Rank,
    ) -> Result<ElementId, MeshForgeError> {
        if corners.len() != tag.corner_count() {
            return Err(MeshForgeError::CornerOutOfRange {
                tag,
                index: corners.len(),
            });
        }
        let id = self
            .forest
            .alloc_element(Element::new(tag, corners.to_vec(), 0, partition))?;
        self.cells.push(id);
        Ok(id)
    }

    /// Wire side neighbors by shared sorted vertex sets. A side presented by
    /// more than two elements breaks the manifold assumption.
    pub fn wire_neighbors(&mut self) -> Result<(), MeshForgeError> {
        let mut seen: HashMap<Vec<VertexId>, (ElementId, usize)> = HashMap::new();
        for &id in &self.cells {
            let nsides = self.forest.element(id)?.tag.side_count();
            for side in 0..nsides {
                let mut key = self.forest.side_vertices(id, side)?;
                key.sort_unstable();
                match seen.remove(&key) {
                    None => {
                        seen.insert(key, (id, side));
                    }
                    Some((other, other_side)) => {
                        if self.forest.element(other)?.neighbors[other_side].is_some() {
                            return Err(MeshForgeError::BrokenInvariant(format!(
                                "side of element {other} shared by more than two elements"
                            )));
                        }
                        self.forest.element_mut(id)?.neighbors[side] = Some(other);
                        self.forest.element_mut(other)?.neighbors[other_side] = Some(id);
                    }
                }
            }
        }
        Ok(())
    }

    /// Finish: wire neighbors and hand back the forest.
    pub fn build(mut self) -> Result<ElementForest, MeshForgeError> {
        self.wire_neighbors()?;
        Ok(self.forest)
    }

    /// Seed directly from importer-style arrays. `cells` index into `coords`.
    pub fn from_arrays(
        coords: &[[f64; 3]],
        cells: &[(ElementTag, Vec<usize>)],
        partition: Rank,
    ) -> Result<ElementForest, MeshForgeError> {
        let mut builder = Self::new();
        let vertices: Vec<VertexId> = coords.iter().map(|&c| builder.add_vertex(c)).collect();
        for (tag, corner_idx) in cells {
            let mut corners = Vec::with_capacity(corner_idx.len());
            for &i in corner_idx {
                let v = vertices.get(i).copied().ok_or(MeshForgeError::CornerOutOfRange {
                    tag: *tag,
                    index: i,
                })?;
                corners.push(v);
            }
            builder.add_element(*tag, &corners, partition)?;
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_triangles_share_the_diagonal() {
        // unit square split along (1,2)
        let forest = CoarseGridBuilder::from_arrays(
            &[
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [1.0, 1.0, 0.0],
            ],
            &[
                (ElementTag::Triangle, vec![0, 1, 2]),
                (ElementTag::Triangle, vec![1, 3, 2]),
            ],
            0,
        )
        .unwrap();
        let ids: Vec<_> = forest.element_ids().collect();
        let a = forest.element(ids[0]).unwrap();
        let b = forest.element(ids[1]).unwrap();
        // triangle 0 side 1 is (1,2); triangle 1 side 2 is (2,1)
        assert_eq!(a.neighbors[1], Some(ids[1]));
        assert_eq!(b.neighbors[2], Some(ids[0]));
        assert_eq!(a.neighbors[0], None);
        assert!(forest.validate().is_ok());
    }

    #[test]
    fn bad_corner_index_is_reported() {
        let err = CoarseGridBuilder::from_arrays(
            &[[0.0; 3]],
            &[(ElementTag::Triangle, vec![0, 1, 2])],
            0,
        );
        assert!(matches!(
            err,
            Err(MeshForgeError::CornerOutOfRange { .. })
        ));
    }

    #[test]
    fn two_tets_share_a_face() {
        let forest = CoarseGridBuilder::from_arrays(
            &[
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 0.0, 1.0],
                [1.0, 1.0, 1.0],
            ],
            &[
                (ElementTag::Tetrahedron, vec![0, 1, 2, 3]),
                (ElementTag::Tetrahedron, vec![1, 2, 3, 4]),
            ],
            0,
        )
        .unwrap();
        let ids: Vec<_> = forest.element_ids().collect();
        let a = forest.element(ids[0]).unwrap();
        // tet 0 side 2 is {1,2,3}, the shared face
        assert_eq!(a.neighbors[2], Some(ids[1]));
        assert!(forest.validate().is_ok());
    }
}
