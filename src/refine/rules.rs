//! Refinement rule tables.
//!
//! A [`RefRule`] is a precomputed decomposition of one parent shape, for one
//! edge pattern, into child elements. The static tables carry only the packed
//! pattern, the class, and the son corner lists; everything else — the
//! sibling/father-side neighbor wiring, the classification of every new edge,
//! and the owner map for new corners — is derived and validated once at
//! library initialization inside `Lazy` table statics. Corner numbering is
//! unified per tag: parent corners come first, then one midpoint position per
//! canonical edge, then (quadrilaterals only) the center position.
//!
//! Rule coverage:
//! - Triangle: all 8 edge patterns (copy, three 1-edge and three 2-edge green
//!   rules, full red 1→4).
//! - Quadrilateral: copy and full red 1→4 only; any other pattern misses and
//!   the refiner falls back to the full rule.
//! - Tetrahedron: copy, six 1-edge green bisections, full red 1→8 with the
//!   interior diagonal through the (0,1)- and (2,3)-edge midpoints.

use crate::error::MeshForgeError;
use crate::refine::pattern::{EdgePattern, PatternIndex};
use crate::topology::element::{ElementClass, ElementTag};
use once_cell::sync::Lazy;

/// Packed-table convention: a son-neighbor value at or above this offset
/// means "father side (value − offset)" instead of "sibling son".
pub const FATHER_SIDE_OFFSET: usize = 20;

/// Classification of an edge introduced by a rule, relative to the parent.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub enum EdgeKind {
    /// Interior to the parent (not on any parent side).
    Inner,
    /// Interior to one parent side (3D only).
    SideEdge,
    /// One half of a subdivided parent edge.
    HalfFatherEdge,
    /// Coincides with a whole parent edge (pre-existing, never listed as new).
    FatherEdge,
}

/// One new edge introduced by a rule, endpoints in unified corner numbering.
///
/// `locus` is the parent side index for [`EdgeKind::SideEdge`], the parent
/// edge index for [`EdgeKind::HalfFatherEdge`], and `None` for inner edges.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EdgeData {
    pub kind: EdgeKind,
    pub from: usize,
    pub to: usize,
    pub locus: Option<usize>,
}

/// Where one side of a son element connects.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SonNeighbor {
    /// Another son of the same rule.
    Sibling(usize),
    /// The corresponding side of the parent; the real neighbor is resolved
    /// through the parent's neighbor on that side.
    FatherSide(usize),
}

impl SonNeighbor {
    /// Packed-table integer form (`FATHER_SIDE_OFFSET` convention).
    pub fn packed(self) -> usize {
        match self {
            SonNeighbor::Sibling(s) => s,
            SonNeighbor::FatherSide(s) => FATHER_SIDE_OFFSET + s,
        }
    }
}

/// One child of a rule: shape, corner positions, per-side neighbor wiring.
#[derive(Clone, Debug)]
pub struct SonData {
    pub tag: ElementTag,
    pub corners: Vec<usize>,
    pub nb: Vec<SonNeighbor>,
}

/// A complete refinement rule for one (tag, pattern).
#[derive(Clone, Debug)]
pub struct RefRule {
    pub tag: ElementTag,
    /// This rule's own index in its tag's table.
    pub mark: usize,
    /// Class stamped on every son this rule creates.
    pub class: ElementClass,
    pub nsons: usize,
    /// Activity flag per new-corner position (midpoints, then center).
    pub pattern: Vec<bool>,
    /// Packed edge bitmask, the key for O(1) lookup.
    pub pat: EdgePattern,
    /// For each new-corner position: owning son and its local corner index,
    /// `None` for inactive positions. Used to avoid duplicate vertex creation.
    pub sonandnode: Vec<Option<(usize, usize)>>,
    /// Every new edge this rule introduces, sorted by endpoints.
    pub edges: Vec<EdgeData>,
    pub sons: Vec<SonData>,
}

impl RefRule {
    /// Total new-corner positions for the tag (midpoints + quad center).
    pub fn new_corner_positions(tag: ElementTag) -> usize {
        tag.edge_count() + usize::from(tag == ElementTag::Quadrilateral)
    }

    /// Unified position of the midpoint of parent edge `e`.
    pub fn midpoint_position(tag: ElementTag, e: usize) -> usize {
        tag.corner_count() + e
    }

    /// Unified position of the quad center.
    pub fn center_position(tag: ElementTag) -> usize {
        tag.corner_count() + tag.edge_count()
    }
}

/// Rule array plus pattern index for one tag.
#[derive(Debug)]
pub struct RuleTable {
    pub tag: ElementTag,
    pub rules: Vec<RefRule>,
    pub index: PatternIndex,
}

// ---------------------------------------------------------------------------
// Static decomposition data
// ---------------------------------------------------------------------------

type RawRule = (u16, ElementClass, &'static [&'static [usize]]);

// Triangle: corners 0-2, midpoints 3 (edge 0,1), 4 (edge 1,2), 5 (edge 2,0).
const TRIANGLE_RAW: &[RawRule] = &[
    (0b000, ElementClass::Yellow, &[&[0, 1, 2]]),
    (0b001, ElementClass::Green, &[&[0, 3, 2], &[3, 1, 2]]),
    (0b010, ElementClass::Green, &[&[1, 4, 0], &[4, 2, 0]]),
    (0b100, ElementClass::Green, &[&[2, 5, 1], &[5, 0, 1]]),
    (0b011, ElementClass::Green, &[&[0, 3, 2], &[3, 1, 4], &[3, 4, 2]]),
    (0b110, ElementClass::Green, &[&[1, 4, 0], &[4, 2, 5], &[4, 5, 0]]),
    (0b101, ElementClass::Green, &[&[2, 5, 1], &[5, 0, 3], &[5, 3, 1]]),
    (
        0b111,
        ElementClass::Red,
        &[&[0, 3, 5], &[3, 1, 4], &[5, 4, 2], &[3, 4, 5]],
    ),
];

// Quadrilateral: corners 0-3, midpoints 4-7, center 8.
const QUAD_RAW: &[RawRule] = &[
    (0b0000, ElementClass::Yellow, &[&[0, 1, 2, 3]]),
    (
        0b1111,
        ElementClass::Red,
        &[&[0, 4, 8, 7], &[4, 1, 5, 8], &[8, 5, 2, 6], &[7, 8, 6, 3]],
    ),
];

// Tetrahedron: corners 0-3, midpoints 4-9 in canonical edge order
// (0,1) (1,2) (2,0) (0,3) (1,3) (2,3).
const TET_RAW: &[RawRule] = &[
    (0b000000, ElementClass::Yellow, &[&[0, 1, 2, 3]]),
    (1 << 0, ElementClass::Green, &[&[0, 4, 2, 3], &[4, 1, 2, 3]]),
    (1 << 1, ElementClass::Green, &[&[0, 1, 5, 3], &[0, 5, 2, 3]]),
    (1 << 2, ElementClass::Green, &[&[0, 1, 6, 3], &[6, 1, 2, 3]]),
    (1 << 3, ElementClass::Green, &[&[0, 1, 2, 7], &[7, 1, 2, 3]]),
    (1 << 4, ElementClass::Green, &[&[0, 1, 2, 8], &[0, 8, 2, 3]]),
    (1 << 5, ElementClass::Green, &[&[0, 1, 2, 9], &[0, 1, 9, 3]]),
    (
        0b111111,
        ElementClass::Red,
        &[
            &[0, 4, 6, 7],
            &[1, 5, 4, 8],
            &[2, 6, 5, 9],
            &[3, 7, 8, 9],
            &[4, 5, 8, 9],
            &[4, 8, 7, 9],
            &[4, 7, 6, 9],
            &[4, 6, 5, 9],
        ],
    ),
];

// ---------------------------------------------------------------------------
// Derivation
// ---------------------------------------------------------------------------

/// Parent sides a unified corner position lies on.
fn position_sides(tag: ElementTag, pos: usize) -> Vec<usize> {
    let nc = tag.corner_count();
    let sides = tag.sides();
    if pos < nc {
        (0..sides.len()).filter(|&s| sides[s].contains(&pos)).collect()
    } else if pos < nc + tag.edge_count() {
        let [a, b] = tag.edges()[pos - nc];
        (0..sides.len())
            .filter(|&s| sides[s].contains(&a) && sides[s].contains(&b))
            .collect()
    } else {
        Vec::new() // cell center
    }
}

/// Classify the edge between two unified positions relative to the parent.
pub fn classify_edge(tag: ElementTag, p: usize, q: usize) -> EdgeData {
    let (from, to) = if p < q { (p, q) } else { (q, p) };
    let nc = tag.corner_count();

    // whole father edge?
    if to < nc {
        if let Some(e) = tag
            .edges()
            .iter()
            .position(|&[a, b]| (a == from && b == to) || (a == to && b == from))
        {
            return EdgeData {
                kind: EdgeKind::FatherEdge,
                from,
                to,
                locus: Some(e),
            };
        }
    }

    // half of a subdivided father edge: one endpoint is the midpoint of an
    // edge whose other endpoint is the remaining position
    for (pos, other) in [(from, to), (to, from)] {
        if pos >= nc && pos < nc + tag.edge_count() {
            let e = pos - nc;
            let [a, b] = tag.edges()[e];
            if other == a || other == b {
                return EdgeData {
                    kind: EdgeKind::HalfFatherEdge,
                    from,
                    to,
                    locus: Some(e),
                };
            }
        }
    }

    let common: Vec<usize> = position_sides(tag, from)
        .into_iter()
        .filter(|s| position_sides(tag, to).contains(s))
        .collect();
    if tag.dimension() == 3 && !common.is_empty() {
        return EdgeData {
            kind: EdgeKind::SideEdge,
            from,
            to,
            locus: Some(common[0]),
        };
    }
    EdgeData {
        kind: EdgeKind::Inner,
        from,
        to,
        locus: None,
    }
}

/// Build one rule from its raw table entry. Panics (via `expect`) only on
/// inconsistent static data; the tables are fixed at compile time.
fn derive_rule(tag: ElementTag, mark: usize, raw: &RawRule) -> RefRule {
    let (pat_bits, class, son_corners) = *raw;
    let pat = EdgePattern::from_bits(pat_bits);
    let nc = tag.corner_count();
    let npos = RefRule::new_corner_positions(tag);

    // which unified positions the sons use
    let mut used = vec![false; nc + npos];
    for corners in son_corners {
        for &c in *corners {
            assert!(c < nc + npos, "{tag:?} rule {mark}: corner {c} out of range");
            used[c] = true;
        }
    }
    for c in 0..nc {
        assert!(used[c], "{tag:?} rule {mark}: parent corner {c} dropped");
    }
    // midpoint activity must match the packed pattern exactly
    for e in 0..tag.edge_count() {
        assert_eq!(
            used[RefRule::midpoint_position(tag, e)],
            pat.has_edge(e),
            "{tag:?} rule {mark}: midpoint of edge {e} disagrees with pattern"
        );
    }
    let pattern: Vec<bool> = (0..npos).map(|i| used[nc + i]).collect();

    // sonandnode: first son owning each active new corner
    let mut sonandnode = vec![None; npos];
    for (si, corners) in son_corners.iter().enumerate() {
        for (ci, &c) in corners.iter().enumerate() {
            if c >= nc && sonandnode[c - nc].is_none() {
                sonandnode[c - nc] = Some((si, ci));
            }
        }
    }

    // neighbor wiring: map each son side either to a father side (all side
    // positions lie on it) or to the unique sibling sharing the same
    // position set
    let side_key = |corners: &[usize], side: &[usize]| -> Vec<usize> {
        let mut key: Vec<usize> = side.iter().map(|&l| corners[l]).collect();
        key.sort_unstable();
        key
    };
    let mut sons: Vec<SonData> = Vec::with_capacity(son_corners.len());
    for (si, corners) in son_corners.iter().enumerate() {
        let mut nb = Vec::with_capacity(tag.side_count());
        for side in tag.sides() {
            let key = side_key(corners, side);
            let father: Vec<usize> = (0..tag.side_count())
                .filter(|&fs| {
                    key.iter().all(|&p| position_sides(tag, p).contains(&fs))
                })
                .collect();
            if let Some(&fs) = father.first() {
                assert_eq!(father.len(), 1, "{tag:?} rule {mark}: ambiguous father side");
                nb.push(SonNeighbor::FatherSide(fs));
                continue;
            }
            let partners: Vec<usize> = son_corners
                .iter()
                .enumerate()
                .filter(|&(sj, other)| {
                    sj != si && tag.sides().iter().any(|os| side_key(other, os) == key)
                })
                .map(|(sj, _)| sj)
                .collect();
            assert_eq!(
                partners.len(),
                1,
                "{tag:?} rule {mark}: interior side of son {si} has {} partners",
                partners.len()
            );
            nb.push(SonNeighbor::Sibling(partners[0]));
        }
        sons.push(SonData {
            tag,
            corners: corners.to_vec(),
            nb,
        });
    }

    // sibling wiring must be symmetric
    for (si, son) in sons.iter().enumerate() {
        for n in &son.nb {
            if let SonNeighbor::Sibling(sj) = *n {
                assert!(
                    sons[sj]
                        .nb
                        .iter()
                        .any(|m| matches!(m, SonNeighbor::Sibling(b) if *b == si)),
                    "{tag:?} rule {mark}: asymmetric sibling wiring {si}↔{sj}"
                );
            }
        }
    }

    // new edges: every distinct son edge that does not coincide with a whole
    // father edge
    let mut edges: Vec<EdgeData> = Vec::new();
    for son in &sons {
        for &[la, lb] in son.tag.edges() {
            let data = classify_edge(tag, son.corners[la], son.corners[lb]);
            if data.kind != EdgeKind::FatherEdge
                && !edges.iter().any(|e| e.from == data.from && e.to == data.to)
            {
                edges.push(data);
            }
        }
    }
    edges.sort_by_key(|e| (e.from, e.to));

    RefRule {
        tag,
        mark,
        class,
        nsons: sons.len(),
        pattern,
        pat,
        sonandnode,
        edges,
        sons,
    }
}

fn build_table(tag: ElementTag, raw: &[RawRule]) -> RuleTable {
    let mut rules = Vec::with_capacity(raw.len());
    let mut index = PatternIndex::new(tag.edge_count());
    for (mark, entry) in raw.iter().enumerate() {
        let rule = derive_rule(tag, mark, entry);
        index.register(rule.pat, mark);
        rules.push(rule);
    }
    RuleTable { tag, rules, index }
}

static TRIANGLE_TABLE: Lazy<RuleTable> =
    Lazy::new(|| build_table(ElementTag::Triangle, TRIANGLE_RAW));
static QUAD_TABLE: Lazy<RuleTable> =
    Lazy::new(|| build_table(ElementTag::Quadrilateral, QUAD_RAW));
static TET_TABLE: Lazy<RuleTable> = Lazy::new(|| build_table(ElementTag::Tetrahedron, TET_RAW));

/// The rule table for a tag, if one is registered.
pub fn rule_table(tag: ElementTag) -> Option<&'static RuleTable> {
    match tag {
        ElementTag::Triangle => Some(&TRIANGLE_TABLE),
        ElementTag::Quadrilateral => Some(&QUAD_TABLE),
        ElementTag::Tetrahedron => Some(&TET_TABLE),
        _ => None,
    }
}

/// O(1) rule lookup. `NoRuleTable` for untabled tags, `NoRuleForPattern`
/// when the tag's table has no entry for this pattern (the caller then
/// usually substitutes the full pattern).
pub fn rule_for_pattern(
    tag: ElementTag,
    pattern: EdgePattern,
) -> Result<&'static RefRule, MeshForgeError> {
    let table = rule_table(tag).ok_or(MeshForgeError::NoRuleTable(tag))?;
    table
        .index
        .lookup(pattern)
        .map(|mark| &table.rules[mark])
        .ok_or(MeshForgeError::NoRuleForPattern { tag, pattern })
}

/// Rule index for a pattern, −1 when none is registered.
pub fn mark_for_pattern(tag: ElementTag, pattern: EdgePattern) -> i32 {
    rule_for_pattern(tag, pattern).map_or(-1, |r| r.mark as i32)
}
