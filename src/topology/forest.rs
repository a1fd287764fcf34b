//! The element forest: arena-backed storage for the refinement hierarchy.
//!
//! Parent/child links are index-based ownership (a parent exclusively owns
//! its children; children hold a back-reference), neighbor links are plain
//! same-level indices (weak: relation plus lookup, never ownership), so
//! neighbor updates never imply allocation. Midpoint vertices are
//! deduplicated through a forest-wide map keyed by the sorted endpoint pair,
//! which is what lets adjacent families agree on shared new vertices without
//! any communication.

use crate::arena::Arena;
use crate::error::MeshForgeError;
use crate::topology::element::{Element, ElementClass, ElementMark, ElementTag};
use crate::topology::id::{ElementId, Rank, VertexId};
use hashbrown::HashMap;

/// A geometric vertex. Coordinates are 3D; 2D meshes leave z at 0.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Vertex {
    pub coords: [f64; 3],
}

/// Persistent element hierarchy for one rank.
#[derive(Debug, Default)]
pub struct ElementForest {
    elements: Arena<Element>,
    live: Vec<bool>,
    free: Vec<usize>,
    vertices: Vec<Vertex>,
    midpoints: HashMap<(VertexId, VertexId), VertexId>,
}

impl ElementForest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forest whose element storage refuses to grow past `capacity` slots.
    /// Used to inject deterministic out-of-memory in tests.
    pub fn with_element_capacity(capacity: usize) -> Self {
        Self {
            elements: Arena::with_capacity_limit(capacity),
            ..Self::default()
        }
    }

    // -- vertices ----------------------------------------------------------

    pub fn add_vertex(&mut self, coords: [f64; 3]) -> VertexId {
        self.vertices.push(Vertex { coords });
        VertexId::from_index(self.vertices.len() - 1)
    }

    pub fn vertex(&self, id: VertexId) -> &Vertex {
        &self.vertices[id.index()]
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Vertex at the midpoint of `(a, b)`, created on first request and
    /// shared by every later request for the same pair in either order.
    pub fn midpoint_vertex(&mut self, a: VertexId, b: VertexId) -> VertexId {
        let key = if a < b { (a, b) } else { (b, a) };
        if let Some(&m) = self.midpoints.get(&key) {
            return m;
        }
        let pa = self.vertices[a.index()].coords;
        let pb = self.vertices[b.index()].coords;
        let mid = [
            (pa[0] + pb[0]) * 0.5,
            (pa[1] + pb[1]) * 0.5,
            (pa[2] + pb[2]) * 0.5,
        ];
        let m = self.add_vertex(mid);
        self.midpoints.insert(key, m);
        m
    }

    /// Vertex at the average of `corners` (quad centers), not deduplicated:
    /// a cell center belongs to exactly one parent.
    pub fn center_vertex(&mut self, corners: &[VertexId]) -> VertexId {
        let mut acc = [0.0f64; 3];
        for &c in corners {
            let p = self.vertices[c.index()].coords;
            for (axis, value) in acc.iter_mut().enumerate() {
                *value += p[axis];
            }
        }
        let n = corners.len() as f64;
        self.add_vertex([acc[0] / n, acc[1] / n, acc[2] / n])
    }

    // -- elements ----------------------------------------------------------

    /// Allocate an element, reusing a freed slot when one exists.
    pub fn alloc_element(&mut self, element: Element) -> Result<ElementId, MeshForgeError> {
        if let Some(slot) = self.free.pop() {
            *self
                .elements
                .get_mut(slot)
                .ok_or(MeshForgeError::DeadElement(slot as u32 + 1))? = element;
            self.live[slot] = true;
            return Ok(ElementId::from_index(slot));
        }
        let slot = self.elements.alloc(element)?;
        self.live.push(true);
        debug_assert_eq!(self.live.len(), self.elements.len());
        Ok(ElementId::from_index(slot))
    }

    /// Return a child slot to the free list. The caller has already detached
    /// it from its parent and neighbors.
    pub(crate) fn retire_element(&mut self, id: ElementId) {
        let slot = id.index();
        if self.live.get(slot).copied().unwrap_or(false) {
            self.live[slot] = false;
            self.free.push(slot);
        }
    }

    pub fn is_live(&self, id: ElementId) -> bool {
        self.live.get(id.index()).copied().unwrap_or(false)
    }

    pub fn element(&self, id: ElementId) -> Result<&Element, MeshForgeError> {
        if !self.is_live(id) {
            return Err(MeshForgeError::DeadElement(id.get()));
        }
        self.elements
            .get(id.index())
            .ok_or(MeshForgeError::DeadElement(id.get()))
    }

    pub fn element_mut(&mut self, id: ElementId) -> Result<&mut Element, MeshForgeError> {
        if !self.is_live(id) {
            return Err(MeshForgeError::DeadElement(id.get()));
        }
        self.elements
            .get_mut(id.index())
            .ok_or(MeshForgeError::DeadElement(id.get()))
    }

    /// All live element ids, in storage order.
    pub fn element_ids(&self) -> impl Iterator<Item = ElementId> + '_ {
        self.live
            .iter()
            .enumerate()
            .filter(|&(_, &l)| l)
            .map(|(i, _)| ElementId::from_index(i))
    }

    pub fn element_count(&self) -> usize {
        self.live.iter().filter(|&&l| l).count()
    }

    pub fn max_level(&self) -> u32 {
        self.element_ids()
            .filter_map(|id| self.element(id).ok())
            .map(|e| e.level)
            .max()
            .unwrap_or(0)
    }

    pub fn elements_at_level(&self, level: u32) -> impl Iterator<Item = ElementId> + '_ {
        self.element_ids()
            .filter(move |&id| self.element(id).map(|e| e.level == level).unwrap_or(false))
    }

    // -- geometry ----------------------------------------------------------

    /// Geometric center of an element.
    pub fn centroid(&self, id: ElementId) -> Result<[f64; 3], MeshForgeError> {
        let e = self.element(id)?;
        let mut acc = [0.0f64; 3];
        for &c in &e.corners {
            let p = self.vertices[c.index()].coords;
            for (axis, value) in acc.iter_mut().enumerate() {
                *value += p[axis];
            }
        }
        let n = e.corners.len() as f64;
        Ok([acc[0] / n, acc[1] / n, acc[2] / n])
    }

    /// Vertices of one side of an element, in the tag's canonical side order.
    pub fn side_vertices(&self, id: ElementId, side: usize) -> Result<Vec<VertexId>, MeshForgeError> {
        let e = self.element(id)?;
        Ok(e.tag.sides()[side].iter().map(|&c| e.corners[c]).collect())
    }

    // -- marks and transient state ----------------------------------------

    pub fn set_mark(&mut self, id: ElementId, mark: ElementMark) -> Result<(), MeshForgeError> {
        self.element_mut(id)?.mark = mark;
        Ok(())
    }

    /// Clear the balancing-pass scratch fields on every live element.
    pub fn reset_transients(&mut self) {
        for (slot, live) in self.live.iter().enumerate() {
            if *live {
                if let Some(e) = self.elements.get_mut(slot) {
                    e.transient_descendants = None;
                    e.transient_cluster = None;
                }
            }
        }
    }

    /// Snapshot of `(partition, destination)` per live slot, for rollback
    /// verification in tests.
    pub fn ownership_snapshot(&self) -> Vec<(ElementId, Rank, Rank)> {
        self.element_ids()
            .filter_map(|id| {
                self.element(id)
                    .ok()
                    .map(|e| (id, e.partition, e.destination))
            })
            .collect()
    }

    // -- invariants --------------------------------------------------------

    /// Walk the forest and verify its structural invariants. Returns the
    /// first hard violation; logs (and tolerates) suspect-but-legal findings.
    pub fn validate(&self) -> Result<(), MeshForgeError> {
        for id in self.element_ids() {
            let e = self.element(id)?;

            if let Some(pid) = e.parent {
                let p = self.element(pid)?;
                let links = p.children.iter().filter(|&&c| c == id).count();
                if links != 1 {
                    return Err(MeshForgeError::BrokenInvariant(format!(
                        "element {id}: parent {pid} links it {links} times"
                    )));
                }
                if e.level != p.level + 1 {
                    return Err(MeshForgeError::BrokenInvariant(format!(
                        "element {id}: level {} but parent level {}",
                        e.level, p.level
                    )));
                }
                if e.eclass == ElementClass::NoClass {
                    log::warn!("element {id} has a parent but no class");
                }
            }

            for child in &e.children {
                let c = self.element(*child)?;
                if c.parent != Some(id) {
                    return Err(MeshForgeError::BrokenInvariant(format!(
                        "element {child}: not back-linked to parent {id}"
                    )));
                }
            }

            // stored neighbor links are same-level and symmetric; a side with
            // a neighbor only at a coarser level holds None here and the
            // relation lives in a parent-level slot
            for (side, nb) in e.neighbors.iter().enumerate() {
                if let Some(nid) = *nb {
                    let n = self.element(nid)?;
                    if n.level != e.level {
                        return Err(MeshForgeError::BrokenInvariant(format!(
                            "element {id} side {side}: neighbor {nid} is on level {} not {}",
                            n.level, e.level
                        )));
                    }
                    if !n.neighbors.contains(&Some(id)) {
                        return Err(MeshForgeError::BrokenInvariant(format!(
                            "element {id} side {side}: neighbor {nid} has no back link"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Convenience used by tests and the builder: a fresh coarse-grid element.
pub fn coarse_element(tag: ElementTag, corners: Vec<VertexId>, partition: Rank) -> Element {
    Element::new(tag, corners, 0, partition)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tri_forest() -> (ElementForest, ElementId) {
        let mut f = ElementForest::new();
        let a = f.add_vertex([0.0, 0.0, 0.0]);
        let b = f.add_vertex([1.0, 0.0, 0.0]);
        let c = f.add_vertex([0.0, 1.0, 0.0]);
        let id = f
            .alloc_element(coarse_element(ElementTag::Triangle, vec![a, b, c], 0))
            .unwrap();
        (f, id)
    }

    #[test]
    fn midpoints_are_shared_between_requests() {
        let (mut f, id) = tri_forest();
        let e = f.element(id).unwrap();
        let (a, b) = (e.corners[0], e.corners[1]);
        let m1 = f.midpoint_vertex(a, b);
        let m2 = f.midpoint_vertex(b, a);
        assert_eq!(m1, m2);
        assert_eq!(f.vertex(m1).coords, [0.5, 0.0, 0.0]);
    }

    #[test]
    fn retire_and_reuse_slots() {
        let (mut f, id) = tri_forest();
        let e = f.element(id).unwrap().clone();
        let extra = f.alloc_element(e.clone()).unwrap();
        assert_eq!(f.element_count(), 2);
        f.retire_element(extra);
        assert_eq!(f.element_count(), 1);
        assert!(f.element(extra).is_err());
        let reused = f.alloc_element(e).unwrap();
        assert_eq!(reused, extra);
    }

    #[test]
    fn validate_accepts_fresh_coarse_grid() {
        let (f, _) = tri_forest();
        assert!(f.validate().is_ok());
    }

    #[test]
    fn validate_rejects_asymmetric_neighbors() {
        let (mut f, id) = tri_forest();
        let e = f.element(id).unwrap().clone();
        let other = f.alloc_element(e).unwrap();
        f.element_mut(id).unwrap().neighbors[0] = Some(other);
        assert!(matches!(
            f.validate(),
            Err(MeshForgeError::BrokenInvariant(_))
        ));
    }

    #[test]
    fn centroid_averages_corners() {
        let (f, id) = tri_forest();
        let c = f.centroid(id).unwrap();
        assert!((c[0] - 1.0 / 3.0).abs() < 1e-12);
        assert!((c[1] - 1.0 / 3.0).abs() < 1e-12);
    }
}
