//! Conforming closure across parent boundaries: green chains, yellow
//! copies, neighbor symmetry, and the rebuild of too-coarse families.

use mesh_forge::prelude::*;
use mesh_forge::topology::element::ElementTag;

/// Three triangles in a strip: T0 | T1 | T2.
fn triangle_strip() -> (ElementForest, Vec<ElementId>) {
    let forest = CoarseGridBuilder::from_arrays(
        &[
            [0.0, 0.0, 0.0], // a
            [1.0, 0.0, 0.0], // b
            [0.0, 1.0, 0.0], // c
            [1.0, 1.0, 0.0], // d
            [2.0, 0.0, 0.0], // e
        ],
        &[
            (ElementTag::Triangle, vec![0, 1, 2]), // T0 = a b c
            (ElementTag::Triangle, vec![1, 3, 2]), // T1 = b d c
            (ElementTag::Triangle, vec![1, 4, 3]), // T2 = b e d
        ],
        0,
    )
    .unwrap();
    let ids: Vec<ElementId> = forest.element_ids().collect();
    (forest, ids)
}

/// Every stored neighbor pointer has a mirror (sides with a coarser-level
/// neighbor hold `None` and defer to a parent-level slot, so they are
/// exempt by construction).
fn assert_symmetric(forest: &ElementForest) {
    for id in forest.element_ids() {
        let e = forest.element(id).unwrap();
        for nb in e.neighbors.iter().copied().flatten() {
            let n = forest.element(nb).unwrap();
            assert!(
                n.neighbors.contains(&Some(id)),
                "element {nb} does not point back at {id}"
            );
        }
    }
}

#[test]
fn red_refinement_builds_a_green_and_yellow_ring() {
    let (mut forest, ids) = triangle_strip();
    mark_full_refinement(&mut forest, ids[0]).unwrap();
    apply_refinement(&mut forest, ids[0]).unwrap();

    // T0: four red sons
    let t0 = forest.element(ids[0]).unwrap();
    assert_eq!(t0.children.len(), 4);

    // T1 shares the split edge: two green closure sons
    let t1 = forest.element(ids[1]).unwrap();
    assert_eq!(t1.children.len(), 2);
    for &c in &t1.children {
        assert_eq!(forest.element(c).unwrap().eclass, ElementClass::Green);
    }

    // T2 touches only an unsplit side of T1: one yellow copy son
    let t2 = forest.element(ids[2]).unwrap();
    assert_eq!(t2.children.len(), 1);
    let copy = forest.element(t2.children[0]).unwrap();
    assert_eq!(copy.eclass, ElementClass::Yellow);
    assert_eq!(copy.corners, t2.corners);

    assert_symmetric(&forest);
    forest.validate().unwrap();
}

#[test]
fn yellow_copy_defers_unrefined_sides_to_the_parent_level() {
    let (mut forest, ids) = triangle_strip();
    mark_full_refinement(&mut forest, ids[0]).unwrap();
    apply_refinement(&mut forest, ids[0]).unwrap();

    let t2 = forest.element(ids[2]).unwrap();
    let copy = forest.element(t2.children[0]).unwrap();
    // exactly one side of the copy has a same-level partner (toward T1's
    // green family); the rest defer to T2's own coarse-level links
    let wired = copy.neighbors.iter().flatten().count();
    assert_eq!(wired, 1);
}

#[test]
fn rebuilding_a_yellow_family_into_green() {
    let (mut forest, ids) = triangle_strip();

    // T0 bisects a boundary edge: T1 is only copy-closed (yellow)
    mark_refinement(&mut forest, ids[0], EdgePattern::from_edges(&[0])).unwrap();
    apply_refinement(&mut forest, ids[0]).unwrap();
    let t1_children = forest.element(ids[1]).unwrap().children.clone();
    assert_eq!(t1_children.len(), 1);
    assert_eq!(
        forest.element(t1_children[0]).unwrap().eclass,
        ElementClass::Yellow
    );

    // now T2 red-refines and splits the T1/T2 edge: the yellow family is
    // too coarse and must be rebuilt as a green bisection
    mark_full_refinement(&mut forest, ids[2]).unwrap();
    apply_refinement(&mut forest, ids[2]).unwrap();

    let t1 = forest.element(ids[1]).unwrap();
    assert_eq!(t1.children.len(), 2);
    for &c in &t1.children {
        assert_eq!(forest.element(c).unwrap().eclass, ElementClass::Green);
    }
    // the old yellow son is gone
    assert!(forest.element(t1_children[0]).is_err());

    assert_symmetric(&forest);
    forest.validate().unwrap();
}

#[test]
fn cross_family_wiring_matches_shared_midpoints() {
    let (mut forest, ids) = triangle_strip();
    mark_full_refinement(&mut forest, ids[0]).unwrap();
    apply_refinement(&mut forest, ids[0]).unwrap();

    // the two green sons of T1 each found exactly one red son of T0 across
    // the old shared edge
    let t1 = forest.element(ids[1]).unwrap();
    let mut crossings = 0;
    for &c in &t1.children {
        let child = forest.element(c).unwrap();
        for nb in child.neighbors.iter().copied().flatten() {
            if forest.element(nb).unwrap().parent == Some(ids[0]) {
                crossings += 1;
            }
        }
    }
    assert_eq!(crossings, 2);
}

#[test]
fn level_counts_after_one_pass() {
    let (mut forest, ids) = triangle_strip();
    mark_full_refinement(&mut forest, ids[0]).unwrap();
    apply_refinement(&mut forest, ids[0]).unwrap();

    assert_eq!(forest.elements_at_level(0).count(), 3);
    // 4 red + 2 green + 1 yellow
    assert_eq!(forest.elements_at_level(1).count(), 7);
    assert_eq!(forest.max_level(), 1);
}
