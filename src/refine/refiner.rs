//! The refinement state machine.
//!
//! An element moves Unrefined → MarkedForRefinement → Refined; coarsening
//! moves it back. [`apply_refinement`] materializes children first and only
//! then resolves cross-parent sides, so the mutual closure recursion between
//! neighbors terminates: when a neighbor's closure recursion crosses back
//! over the shared side it finds this element already refined and simply
//! wires against it.
//!
//! Conforming closure policy:
//! - before a rule is resolved, the requested pattern *absorbs* every edge
//!   split already materialized by refined neighbors, so a family is never
//!   coarser along a side than the families it touches;
//! - a non-copy refinement forces each unrefined neighbor to refine — with
//!   the synthesized green pattern when shared edges are split, with the
//!   yellow copy rule otherwise; copy refinements never trigger closure,
//!   which bounds the propagation to the one-ring plus green chains;
//! - a refined neighbor whose non-Red children are coarser than the new
//!   family is rebuilt (unrefined and re-applied with the merged pattern);
//!   Red children are never rebuilt implicitly.

use crate::error::MeshForgeError;
use crate::refine::pattern::EdgePattern;
use crate::refine::rules::{self, RefRule, SonNeighbor};
use crate::topology::element::{Element, ElementClass, ElementMark, ElementTag};
use crate::topology::forest::ElementForest;
use crate::topology::id::{ElementId, VertexId};
use hashbrown::HashMap;

/// Outcome of one `apply_refinement` call on one element.
#[derive(Clone, Debug)]
pub struct RefinementSummary {
    pub element: ElementId,
    /// Index of the applied rule in its tag's table.
    pub rule_mark: usize,
    pub sons: Vec<ElementId>,
    /// Class stamped on the sons.
    pub class: ElementClass,
    /// The requested pattern had no rule and the full pattern was substituted.
    pub fell_back_to_full: bool,
}

/// Request a refinement pattern on an unrefined element.
pub fn mark_refinement(
    forest: &mut ElementForest,
    id: ElementId,
    pattern: EdgePattern,
) -> Result<(), MeshForgeError> {
    if forest.element(id)?.is_refined() {
        return Err(MeshForgeError::AlreadyRefined(id.get()));
    }
    forest.set_mark(id, ElementMark::Refine(pattern))
}

/// Request the full/regular rule on an unrefined element.
pub fn mark_full_refinement(
    forest: &mut ElementForest,
    id: ElementId,
) -> Result<(), MeshForgeError> {
    let tag = forest.element(id)?.tag;
    mark_refinement(forest, id, EdgePattern::full(tag))
}

/// Apply the stored mark (or the copy rule when unmarked), materializing
/// children and keeping the mesh conforming across parent boundaries.
pub fn apply_refinement(
    forest: &mut ElementForest,
    id: ElementId,
) -> Result<RefinementSummary, MeshForgeError> {
    let pattern = match forest.element(id)?.mark {
        ElementMark::Refine(p) => p,
        _ => EdgePattern::EMPTY,
    };
    apply_with_pattern(forest, id, pattern)
}

/// Request removal of a refined element's children.
pub fn mark_coarsening(forest: &mut ElementForest, id: ElementId) -> Result<(), MeshForgeError> {
    if !forest.element(id)?.is_refined() {
        return Err(MeshForgeError::CoarsenBlocked(id.get()));
    }
    forest.set_mark(id, ElementMark::Coarsen)
}

/// Apply every pending coarsening mark, deepest parents first so families
/// dissolve bottom-up. Elements whose coarsening is currently blocked keep
/// their mark for a later sweep; other failures propagate. Returns how many
/// families were dissolved.
pub fn apply_coarsening(forest: &mut ElementForest) -> Result<usize, MeshForgeError> {
    let mut removed = 0;
    for level in (0..=forest.max_level()).rev() {
        let marked: Vec<ElementId> = forest
            .elements_at_level(level)
            .filter(|&id| {
                forest
                    .element(id)
                    .map(|e| e.mark == ElementMark::Coarsen)
                    .unwrap_or(false)
            })
            .collect();
        for id in marked {
            match unrefine(forest, id) {
                Ok(()) => removed += 1,
                Err(MeshForgeError::CoarsenBlocked(_)) => {}
                Err(e) => return Err(e),
            }
        }
    }
    Ok(removed)
}

/// Remove an element's children, restoring it to the unrefined state.
///
/// Blocked when a child is itself refined, or when a Red child is still
/// referenced as a neighbor from outside the family. Non-Red children may be
/// dissolved; outside back-pointers to them are cleared symmetrically (those
/// sides fall back to the coarser-level relation through the parent).
pub fn unrefine(forest: &mut ElementForest, id: ElementId) -> Result<(), MeshForgeError> {
    let children = forest.element(id)?.children.clone();
    if children.is_empty() {
        return Ok(());
    }
    for &c in &children {
        let child = forest.element(c)?;
        if child.is_refined() {
            return Err(MeshForgeError::CoarsenBlocked(id.get()));
        }
        if child.eclass == ElementClass::Red {
            let outside = child
                .neighbors
                .iter()
                .flatten()
                .any(|n| !children.contains(n));
            if outside {
                return Err(MeshForgeError::CoarsenBlocked(id.get()));
            }
        }
    }
    for &c in &children {
        let slots: Vec<Option<ElementId>> = forest.element(c)?.neighbors.clone();
        for nb in slots.into_iter().flatten() {
            if !children.contains(&nb) {
                for slot in forest.element_mut(nb)?.neighbors.iter_mut() {
                    if *slot == Some(c) {
                        *slot = None;
                    }
                }
            }
        }
        forest.retire_element(c);
    }
    let elem = forest.element_mut(id)?;
    elem.children.clear();
    elem.mark = ElementMark::None;
    Ok(())
}

// ---------------------------------------------------------------------------
// internals
// ---------------------------------------------------------------------------

/// The element's edge index for the edge with these endpoint vertices.
fn edge_index_of(elem: &Element, va: VertexId, vb: VertexId) -> Option<usize> {
    elem.tag.edges().iter().position(|&[a, b]| {
        let (x, y) = (elem.corners[a], elem.corners[b]);
        (x == va && y == vb) || (x == vb && y == va)
    })
}

/// Edge indices of `tag` whose endpoints both lie on `side`.
fn edges_on_side(tag: ElementTag, side: usize) -> Vec<usize> {
    let corners = tag.sides()[side];
    tag.edges()
        .iter()
        .enumerate()
        .filter(|(_, [a, b])| corners.contains(a) && corners.contains(b))
        .map(|(e, _)| e)
        .collect()
}

/// Pattern on `other` induced by the edges of `me` on `side` marked in
/// `my_pattern`, translated through shared vertex pairs.
fn synthesize_pattern(
    me: &Element,
    my_pattern: EdgePattern,
    side: usize,
    other: &Element,
) -> EdgePattern {
    let mut p = EdgePattern::EMPTY;
    for e in edges_on_side(me.tag, side) {
        if my_pattern.has_edge(e) {
            let [a, b] = me.tag.edges()[e];
            if let Some(oe) = edge_index_of(other, me.corners[a], me.corners[b]) {
                p = p.with_edge(oe);
            }
        }
    }
    p
}

/// The pattern an element's mark has materialized (empty when unmarked).
fn applied_pattern(elem: &Element) -> EdgePattern {
    match elem.mark {
        ElementMark::Refine(p) => p,
        _ => EdgePattern::EMPTY,
    }
}

/// Extend `pattern` with every shared-edge split the neighbors have already
/// materialized or still hold as a pending mark. This is the pattern-closure
/// step: a family is never built coarser along a side than what the families
/// around it carry, which keeps the later face matching exact.
fn absorb_neighbor_splits(
    forest: &ElementForest,
    id: ElementId,
    mut pattern: EdgePattern,
) -> Result<EdgePattern, MeshForgeError> {
    let elem = forest.element(id)?;
    for nid in elem.neighbors.iter().copied().flatten() {
        let n = forest.element(nid)?;
        let theirs = applied_pattern(n);
        if theirs.is_empty() {
            continue;
        }
        pattern = pattern.union(synthesize_pattern(n, theirs, nbr_side(n, id)?, elem));
    }
    Ok(pattern)
}

/// The side of `n` facing `me`.
fn nbr_side(n: &Element, me: ElementId) -> Result<usize, MeshForgeError> {
    n.neighbors
        .iter()
        .position(|&s| s == Some(me))
        .ok_or_else(|| MeshForgeError::BrokenInvariant(format!(
            "neighbor of {me} has no back link"
        )))
}

fn apply_with_pattern(
    forest: &mut ElementForest,
    id: ElementId,
    requested: EdgePattern,
) -> Result<RefinementSummary, MeshForgeError> {
    if forest.element(id)?.is_refined() {
        return Err(MeshForgeError::AlreadyRefined(id.get()));
    }

    // never end up coarser along a side than an already-refined neighbor
    let pattern = absorb_neighbor_splits(forest, id, requested)?;

    let tag = forest.element(id)?.tag;
    let (rule, fell_back) = match rules::rule_for_pattern(tag, pattern) {
        Ok(rule) => (rule, false),
        Err(MeshForgeError::NoRuleForPattern { .. }) => {
            log::debug!(
                "no rule for {tag:?} pattern {pattern}; substituting the full pattern"
            );
            (rules::rule_for_pattern(tag, EdgePattern::full(tag))?, true)
        }
        Err(e) => return Err(e),
    };
    let pattern = rule.pat;

    let sons = materialize_sons(forest, id, rule)?;
    {
        let elem = forest.element_mut(id)?;
        elem.children = sons.clone();
        elem.mark = ElementMark::Refine(pattern);
    }

    // cross-parent resolution, one father side at a time
    let side_count = tag.side_count();
    for s in 0..side_count {
        let Some(nid) = forest.element(id)?.neighbors[s] else {
            continue;
        };
        if !forest.element(nid)?.is_refined() {
            if rule.class != ElementClass::Yellow {
                // copies never force closure
                let synthesized = {
                    let me = forest.element(id)?;
                    let n = forest.element(nid)?;
                    synthesize_pattern(me, pattern, s, n).union(applied_pattern(n))
                };
                forest.set_mark(nid, ElementMark::Refine(synthesized))?;
                // the neighbor's own resolution wires both directions
                apply_with_pattern(forest, nid, synthesized)?;
            }
        } else {
            wire_father_side(forest, id, rule, &sons, s, nid)?;
        }
        // a deeper closure step may have rebuilt THIS family with a finer
        // pattern (tearing down `sons`); the rebuild finished all wiring
        if forest.element(id)?.children != sons {
            return summary_of_current_state(forest, id, fell_back);
        }
    }

    Ok(RefinementSummary {
        element: id,
        rule_mark: rule.mark,
        sons,
        class: rule.class,
        fell_back_to_full: fell_back,
    })
}

/// Summary re-read from the forest after a mid-apply rebuild replaced the
/// family this frame created.
fn summary_of_current_state(
    forest: &ElementForest,
    id: ElementId,
    fell_back: bool,
) -> Result<RefinementSummary, MeshForgeError> {
    let elem = forest.element(id)?;
    let rule = rules::rule_for_pattern(elem.tag, applied_pattern(elem))?;
    Ok(RefinementSummary {
        element: id,
        rule_mark: rule.mark,
        sons: elem.children.clone(),
        class: rule.class,
        fell_back_to_full: fell_back,
    })
}

/// Allocate the rule's sons, assign corners/class, wire sibling links.
/// On allocation failure every partially-created son is retired again.
fn materialize_sons(
    forest: &mut ElementForest,
    id: ElementId,
    rule: &RefRule,
) -> Result<Vec<ElementId>, MeshForgeError> {
    let (tag, corners, level, partition) = {
        let e = forest.element(id)?;
        (e.tag, e.corners.clone(), e.level, e.partition)
    };

    // unified position → vertex
    let nc = tag.corner_count();
    let npos = RefRule::new_corner_positions(tag);
    let mut position_vertex: Vec<Option<VertexId>> = vec![None; nc + npos];
    for (c, &v) in corners.iter().enumerate() {
        position_vertex[c] = Some(v);
    }
    for e in 0..tag.edge_count() {
        if rule.pattern[e] {
            let [a, b] = tag.edges()[e];
            let m = forest.midpoint_vertex(corners[a], corners[b]);
            position_vertex[RefRule::midpoint_position(tag, e)] = Some(m);
        }
    }
    if tag == ElementTag::Quadrilateral && rule.pattern[tag.edge_count()] {
        position_vertex[RefRule::center_position(tag)] = Some(forest.center_vertex(&corners));
    }

    let mut sons = Vec::with_capacity(rule.nsons);
    for son in &rule.sons {
        let son_corners: Vec<VertexId> = son
            .corners
            .iter()
            .map(|&p| position_vertex[p].expect("rule references only active positions"))
            .collect();
        let mut child = Element::new(son.tag, son_corners, level + 1, partition);
        child.parent = Some(id);
        child.eclass = rule.class;
        match forest.alloc_element(child) {
            Ok(cid) => sons.push(cid),
            Err(e) => {
                for cid in sons {
                    forest.retire_element(cid);
                }
                return Err(e);
            }
        }
    }

    for (i, son) in rule.sons.iter().enumerate() {
        for (side, nb) in son.nb.iter().enumerate() {
            if let SonNeighbor::Sibling(j) = *nb {
                forest.element_mut(sons[i])?.neighbors[side] = Some(sons[j]);
            }
        }
    }
    Ok(sons)
}

/// Wire this family's sons against the refined neighbor across father side
/// `s`, rebuilding the neighbor when its non-Red family is too coarse.
fn wire_father_side(
    forest: &mut ElementForest,
    id: ElementId,
    rule: &RefRule,
    sons: &[ElementId],
    s: usize,
    nid: ElementId,
) -> Result<(), MeshForgeError> {
    // sorted vertex set → (child of nid, side) for still-open faces
    let mut candidates: HashMap<Vec<VertexId>, (ElementId, usize)> = HashMap::new();
    let n_children = forest.element(nid)?.children.clone();
    for &c in &n_children {
        let child = forest.element(c)?;
        for side in 0..child.tag.side_count() {
            if child.neighbors[side].is_none() {
                let mut key = forest.side_vertices(c, side)?;
                key.sort_unstable();
                candidates.insert(key, (c, side));
            }
        }
    }

    let mut unmatched = false;
    let mut wired: Vec<(ElementId, usize, ElementId, usize)> = Vec::new();
    for (i, son) in rule.sons.iter().enumerate() {
        for (side, nb) in son.nb.iter().enumerate() {
            if *nb != SonNeighbor::FatherSide(s) {
                continue;
            }
            let mut key = forest.side_vertices(sons[i], side)?;
            key.sort_unstable();
            match candidates.remove(&key) {
                Some((c, cs)) => wired.push((sons[i], side, c, cs)),
                None => unmatched = true,
            }
        }
    }

    if unmatched {
        // the neighbor's family is coarser than ours: rebuild it with the
        // merged pattern (only ever legal for non-Red families)
        let n_class_rebuildable = n_children.iter().all(|&c| {
            forest
                .element(c)
                .map(|e| e.eclass != ElementClass::Red && e.is_leaf())
                .unwrap_or(false)
        });
        let merged = {
            let me = forest.element(id)?;
            let n = forest.element(nid)?;
            synthesize_pattern(me, rule.pat, s, n).union(applied_pattern(n))
        };
        let old = applied_pattern(forest.element(nid)?);
        if !n_class_rebuildable || merged == old {
            return Err(MeshForgeError::NonConformingSide {
                element: id.get(),
                side: s,
            });
        }
        unrefine(forest, nid)?;
        forest.set_mark(nid, ElementMark::Refine(merged))?;
        apply_with_pattern(forest, nid, merged)?;
        return Ok(());
    }

    for (a, sa, b, sb) in wired {
        forest.element_mut(a)?.neighbors[sa] = Some(b);
        forest.element_mut(b)?.neighbors[sb] = Some(a);
    }
    Ok(())
}
