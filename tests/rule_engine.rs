//! Rule-table and refiner scenarios exercised through the public surface.

use mesh_forge::prelude::*;
use mesh_forge::refine::{classify_edge, rule_for_pattern, rule_table, EdgeKind};
use mesh_forge::topology::element::ElementTag;

const TABLED: [ElementTag; 3] = [
    ElementTag::Triangle,
    ElementTag::Quadrilateral,
    ElementTag::Tetrahedron,
];

#[test]
fn every_tag_has_the_copy_rule() {
    for tag in TABLED {
        let rule = rule_for_pattern(tag, EdgePattern::EMPTY).unwrap();
        assert_eq!(rule.nsons, 1, "{tag:?}");
        assert_eq!(rule.class, ElementClass::Yellow, "{tag:?}");
    }
}

#[test]
fn rule_conservation_through_sonandnode() {
    // the union of son corners, mapped back through sonandnode, covers the
    // parent corners plus exactly the active new positions
    for tag in TABLED {
        let table = rule_table(tag).unwrap();
        for rule in &table.rules {
            let nc = tag.corner_count();
            for (i, owner) in rule.sonandnode.iter().enumerate() {
                match owner {
                    Some((si, ci)) => {
                        assert!(rule.pattern[i]);
                        assert_eq!(rule.sons[*si].corners[*ci], nc + i);
                    }
                    None => assert!(!rule.pattern[i]),
                }
            }
        }
    }
}

fn single_triangle() -> (ElementForest, ElementId) {
    let forest = CoarseGridBuilder::from_arrays(
        &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        &[(ElementTag::Triangle, vec![0, 1, 2])],
        0,
    )
    .unwrap();
    let id = forest.element_ids().next().unwrap();
    (forest, id)
}

#[test]
fn bisect_scenario_two_green_children_inner_edge() {
    let (mut forest, id) = single_triangle();
    mark_refinement(&mut forest, id, EdgePattern::from_edges(&[0])).unwrap();
    let summary = apply_refinement(&mut forest, id).unwrap();

    assert_eq!(summary.sons.len(), 2);
    for &s in &summary.sons {
        let e = forest.element(s).unwrap();
        assert_eq!(e.tag, ElementTag::Triangle);
        assert_eq!(e.eclass, ElementClass::Green);
    }
    // the edge the two children share is interior to the parent
    let rule = rule_for_pattern(ElementTag::Triangle, EdgePattern::from_edges(&[0])).unwrap();
    let inner: Vec<_> = rule
        .edges
        .iter()
        .filter(|e| e.kind == EdgeKind::Inner)
        .collect();
    assert_eq!(inner.len(), 1);
}

#[test]
fn red_scenario_four_red_children_with_half_father_pairs() {
    let (mut forest, id) = single_triangle();
    mark_full_refinement(&mut forest, id).unwrap();
    let summary = apply_refinement(&mut forest, id).unwrap();

    assert_eq!(summary.sons.len(), 4);
    for &s in &summary.sons {
        assert_eq!(forest.element(s).unwrap().eclass, ElementClass::Red);
    }

    let rule = rule_for_pattern(
        ElementTag::Triangle,
        EdgePattern::full(ElementTag::Triangle),
    )
    .unwrap();
    // each corner child shares exactly one edge with the central child and
    // carries exactly one pair of half-father edges
    let central = &rule.sons[3];
    for corner_son in &rule.sons[..3] {
        let shared: Vec<usize> = corner_son
            .corners
            .iter()
            .copied()
            .filter(|c| central.corners.contains(c))
            .collect();
        assert_eq!(shared.len(), 2); // one shared edge = two shared corners
        let shared_kind = classify_edge(ElementTag::Triangle, shared[0], shared[1]).kind;
        assert_eq!(shared_kind, EdgeKind::Inner);

        let halves = corner_son
            .tag
            .edges()
            .iter()
            .filter(|&&[a, b]| {
                classify_edge(
                    ElementTag::Triangle,
                    corner_son.corners[a],
                    corner_son.corners[b],
                )
                .kind
                    == EdgeKind::HalfFatherEdge
            })
            .count();
        assert_eq!(halves, 2);
    }
}

#[test]
fn pattern_misses_surface_as_typed_errors() {
    assert!(matches!(
        rule_for_pattern(ElementTag::Tetrahedron, EdgePattern::from_bits(0b000011)),
        Err(MeshForgeError::NoRuleForPattern { .. })
    ));
    assert!(matches!(
        rule_for_pattern(ElementTag::Prism, EdgePattern::EMPTY),
        Err(MeshForgeError::NoRuleTable(_))
    ));
}

#[test]
fn mark_for_pattern_integer_surface() {
    use mesh_forge::refine::mark_for_pattern;
    assert_eq!(mark_for_pattern(ElementTag::Triangle, EdgePattern::EMPTY), 0);
    assert_eq!(
        mark_for_pattern(ElementTag::Triangle, EdgePattern::full(ElementTag::Triangle)),
        7
    );
    assert_eq!(
        mark_for_pattern(ElementTag::Quadrilateral, EdgePattern::from_bits(0b0101)),
        -1
    );
}
