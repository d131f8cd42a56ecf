//! Mesh refinement (h-refinement and coarsening)
//!
//! Quadrilaterals split isotropically into 4 children or anisotropically into
//! 2; triangles split isotropically into 4. Bisected edges register their
//! midpoint in a mesh-wide table, which is also what the hanging-node
//! analysis walks.

use super::types::{ElementType, Mesh, Point};
use crate::error::{AdaptError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Edge represented by sorted node indices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Edge(pub usize, pub usize);

impl Edge {
    pub fn new(a: usize, b: usize) -> Self {
        if a < b { Edge(a, b) } else { Edge(b, a) }
    }
}

/// Geometric split applied to an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SplitKind {
    /// No geometric change
    None,
    /// Four children (triangles and quadrilaterals)
    Isotropic,
    /// Two children stacked bottom/top, cut parallel to the first edge (quads only)
    AnisoHorizontal,
    /// Two children side by side, cut parallel to the second edge (quads only)
    AnisoVertical,
}

impl SplitKind {
    /// Number of elements the split produces
    pub fn num_children(&self) -> usize {
        match self {
            SplitKind::None => 1,
            SplitKind::Isotropic => 4,
            SplitKind::AnisoHorizontal | SplitKind::AnisoVertical => 2,
        }
    }

    pub fn is_split(&self) -> bool {
        *self != SplitKind::None
    }

    pub fn is_anisotropic(&self) -> bool {
        matches!(self, SplitKind::AnisoHorizontal | SplitKind::AnisoVertical)
    }

    /// Splits available for a shape
    pub fn available(shape: ElementType, iso_only: bool) -> &'static [SplitKind] {
        match (shape, iso_only) {
            (ElementType::Quadrilateral, false) => &[
                SplitKind::Isotropic,
                SplitKind::AnisoHorizontal,
                SplitKind::AnisoVertical,
            ],
            _ => &[SplitKind::Isotropic],
        }
    }
}

// Local node numbering used by the split patterns:
//   quad:     0..=3 vertices, 4 = m01, 5 = m12, 6 = m23, 7 = m30, 8 = centre
//   triangle: 0..=2 vertices, 3 = m01, 4 = m12, 5 = m20
const QUAD_NONE: &[&[usize]] = &[&[0, 1, 2, 3]];
const QUAD_ISO: &[&[usize]] = &[&[0, 4, 8, 7], &[4, 1, 5, 8], &[8, 5, 2, 6], &[7, 8, 6, 3]];
const QUAD_HORIZONTAL: &[&[usize]] = &[&[0, 1, 5, 7], &[7, 5, 2, 3]];
const QUAD_VERTICAL: &[&[usize]] = &[&[0, 4, 6, 3], &[4, 1, 2, 6]];
const TRI_NONE: &[&[usize]] = &[&[0, 1, 2]];
const TRI_ISO: &[&[usize]] = &[&[0, 3, 5], &[3, 1, 4], &[5, 4, 2], &[3, 4, 5]];

/// Children of a split as lists of local node numbers
pub fn split_pattern(shape: ElementType, kind: SplitKind) -> Result<&'static [&'static [usize]]> {
    match (shape, kind) {
        (ElementType::Quadrilateral, SplitKind::None) => Ok(QUAD_NONE),
        (ElementType::Quadrilateral, SplitKind::Isotropic) => Ok(QUAD_ISO),
        (ElementType::Quadrilateral, SplitKind::AnisoHorizontal) => Ok(QUAD_HORIZONTAL),
        (ElementType::Quadrilateral, SplitKind::AnisoVertical) => Ok(QUAD_VERTICAL),
        (ElementType::Triangle, SplitKind::None) => Ok(TRI_NONE),
        (ElementType::Triangle, SplitKind::Isotropic) => Ok(TRI_ISO),
        (ElementType::Triangle, _) => Err(AdaptError::InvalidConfig(format!(
            "{kind:?} split is only defined for quadrilaterals"
        ))),
        (shape, _) => Err(AdaptError::UnsupportedElementShape { shape }),
    }
}

/// Local node coordinates (vertices, edge midpoints, centre) of an element
fn local_points(shape: ElementType, v: &[Point]) -> Vec<Point> {
    match shape {
        ElementType::Triangle => vec![
            v[0],
            v[1],
            v[2],
            v[0].midpoint(&v[1]),
            v[1].midpoint(&v[2]),
            v[2].midpoint(&v[0]),
        ],
        _ => {
            let centre = Point::new_2d(
                0.25 * (v[0].x + v[1].x + v[2].x + v[3].x),
                0.25 * (v[0].y + v[1].y + v[2].y + v[3].y),
            );
            vec![
                v[0],
                v[1],
                v[2],
                v[3],
                v[0].midpoint(&v[1]),
                v[1].midpoint(&v[2]),
                v[2].midpoint(&v[3]),
                v[3].midpoint(&v[0]),
                centre,
            ]
        }
    }
}

/// Vertex coordinates of the children a split would produce, without touching a mesh
pub fn child_points(shape: ElementType, vertices: &[Point], kind: SplitKind) -> Result<Vec<Vec<Point>>> {
    let pattern = split_pattern(shape, kind)?;
    let local = local_points(shape, vertices);
    Ok(pattern
        .iter()
        .map(|child| child.iter().map(|&l| local[l]).collect())
        .collect())
}

/// Hanging-node structure of the active mesh
#[derive(Debug, Clone, Default)]
pub struct MeshTopology {
    /// Active elements owning each edge
    pub edge_owners: HashMap<Edge, Vec<usize>>,
    /// Vertices lying in the interior of an active element's edge
    pub hanging_vertices: HashSet<usize>,
    /// Edges lying inside a longer edge of another active element
    pub constrained_edges: HashSet<Edge>,
    /// Deepest hanging level found along each element's own edges
    pub coarse_levels: HashMap<usize, usize>,
    /// Level at which each element's edges hang inside a coarser neighbour's edge
    pub fine_levels: HashMap<usize, usize>,
}

impl MeshTopology {
    /// Largest hanging-node level in the mesh (0 for a conforming mesh)
    pub fn max_hanging_level(&self) -> usize {
        self.coarse_levels.values().copied().max().unwrap_or(0)
    }

    /// Level at which the element's edges hang on a coarser neighbour
    pub fn hanging_level(&self, element: usize) -> usize {
        self.fine_levels.get(&element).copied().unwrap_or(0)
    }

    /// Elements whose edges carry hanging nodes deeper than `bound`
    pub fn violations(&self, bound: usize) -> Vec<usize> {
        let mut ids: Vec<usize> = self
            .coarse_levels
            .iter()
            .filter(|&(_, &level)| level > bound)
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

impl Mesh {
    /// Get or create the midpoint node of edge (a, b)
    pub(crate) fn midpoint_node(&mut self, a: usize, b: usize) -> usize {
        let edge = Edge::new(a, b);
        if let Some(&mid) = self.midpoints.get(&edge) {
            return mid;
        }
        let mid = self.nodes[a].midpoint(&self.nodes[b]);
        let idx = self.add_node(mid);
        self.midpoints.insert(edge, idx);
        idx
    }

    /// Split an active element and return the ids of its children.
    ///
    /// `SplitKind::None` leaves the mesh untouched and returns the element itself.
    pub fn split_element(&mut self, id: usize, kind: SplitKind) -> Result<Vec<usize>> {
        let elem = self.active_element(id)?.clone();
        let pattern = split_pattern(elem.element_type, kind)?;
        if !kind.is_split() {
            return Ok(vec![id]);
        }

        let v = elem.vertices().to_vec();
        let needs = |l: usize| pattern.iter().any(|c| c.contains(&l));
        let mut local: Vec<Option<usize>> = v.iter().map(|&n| Some(n)).collect();
        match elem.element_type {
            ElementType::Triangle => {
                local.push(Some(self.midpoint_node(v[0], v[1])));
                local.push(Some(self.midpoint_node(v[1], v[2])));
                local.push(Some(self.midpoint_node(v[2], v[0])));
            }
            _ => {
                for (slot, (a, b)) in [(4, (0, 1)), (5, (1, 2)), (6, (2, 3)), (7, (3, 0))] {
                    local.push(needs(slot).then(|| self.midpoint_node(v[a], v[b])));
                }
                let centre = if needs(8) {
                    let pts: Vec<Point> = v.iter().map(|&n| self.nodes[n]).collect();
                    Some(self.add_node(local_points(ElementType::Quadrilateral, &pts)[8]))
                } else {
                    None
                };
                local.push(centre);
            }
        }

        let mut children = Vec::with_capacity(pattern.len());
        for child in pattern {
            let nodes: Vec<usize> = child.iter().filter_map(|&l| local[l]).collect();
            let child_id = self.add_element(elem.element_type, nodes);
            let c = &mut self.elements[child_id];
            c.parent_id = Some(id);
            c.level = elem.level + 1;
            children.push(child_id);
        }

        let parent = &mut self.elements[id];
        parent.active = false;
        parent.children = children.clone();
        parent.split = Some(kind);
        Ok(children)
    }

    /// Split every active element isotropically; returns the split parents
    pub fn uniform_refine(&mut self) -> Result<Vec<usize>> {
        let parents = self.active_elements();
        for &id in &parents {
            self.split_element(id, SplitKind::Isotropic)?;
        }
        Ok(parents)
    }

    /// Whether an element is an inactive parent whose children are all active leaves
    pub fn is_coarsenable(&self, id: usize) -> bool {
        match self.elements.get(id) {
            Some(e) if !e.active && !e.children.is_empty() => {
                e.children.iter().all(|&c| self.elements[c].active)
            }
            _ => false,
        }
    }

    /// Replace the children of an element by the element itself
    pub fn coarsen_element(&mut self, id: usize) -> Result<Vec<usize>> {
        if !self.is_coarsenable(id) {
            return Err(AdaptError::UnknownElement { element: id });
        }
        let children = std::mem::take(&mut self.elements[id].children);
        for &c in &children {
            self.elements[c].active = false;
        }
        let parent = &mut self.elements[id];
        parent.active = true;
        parent.split = None;
        Ok(children)
    }

    /// Undo `coarsen_element`
    pub(crate) fn restore_children(&mut self, id: usize, children: Vec<usize>, kind: SplitKind) {
        for &c in &children {
            self.elements[c].active = true;
        }
        let parent = &mut self.elements[id];
        parent.active = false;
        parent.children = children;
        parent.split = Some(kind);
    }

    /// Analyse hanging nodes of the active mesh
    pub fn topology(&self) -> MeshTopology {
        let mut topo = MeshTopology::default();
        let active = self.active_elements();

        for &id in &active {
            for (a, b) in self.elements[id].edges() {
                topo.edge_owners.entry(Edge::new(a, b)).or_default().push(id);
            }
        }

        for &id in &active {
            for (a, b) in self.elements[id].edges() {
                let mut stack = vec![(a, b, 0usize)];
                while let Some((p, q, depth)) = stack.pop() {
                    let Some(&m) = self.midpoints.get(&Edge::new(p, q)) else {
                        continue;
                    };
                    for (s, t) in [(p, m), (m, q)] {
                        let sub = Edge::new(s, t);
                        if let Some(owners) = topo.edge_owners.get(&sub) {
                            let level = depth + 1;
                            topo.constrained_edges.insert(sub);
                            for &end in &[s, t] {
                                if end != a && end != b {
                                    topo.hanging_vertices.insert(end);
                                }
                            }
                            let coarse = topo.coarse_levels.entry(id).or_insert(0);
                            *coarse = (*coarse).max(level);
                            for &owner in owners {
                                let fine = topo.fine_levels.entry(owner).or_insert(0);
                                *fine = (*fine).max(level);
                            }
                        }
                        stack.push((s, t, depth + 1));
                    }
                }
            }
        }

        topo
    }

    /// Refine coarse elements until no hanging node is deeper than `bound`.
    ///
    /// Returns the ids of the elements that had to be split, in split order.
    pub fn regularize(&mut self, bound: usize) -> Result<Vec<usize>> {
        if bound == 0 {
            return Err(AdaptError::InvalidConfig(
                "mesh regularity bound must be at least 1".to_string(),
            ));
        }

        const MAX_ROUNDS: usize = 64;
        let mut split = Vec::new();
        for _ in 0..MAX_ROUNDS {
            let violations = self.topology().violations(bound);
            if violations.is_empty() {
                return Ok(split);
            }
            for id in violations {
                if self.elements[id].active {
                    self.split_element(id, SplitKind::Isotropic)?;
                    split.push(id);
                }
            }
        }
        Err(AdaptError::InvalidConfig(format!(
            "mesh regularization to level {bound} did not converge"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::generators::{unit_square_quads, unit_square_triangles};

    #[test]
    fn test_triangle_refinement() {
        let mut mesh = unit_square_triangles(1);
        assert_eq!(mesh.num_active_elements(), 2);

        let parents = mesh.uniform_refine().unwrap();

        assert_eq!(parents.len(), 2);
        assert_eq!(mesh.num_active_elements(), 8);
        // Shared diagonal midpoint is created once
        assert_eq!(mesh.num_nodes(), 9);
        assert!((mesh.total_area() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_anisotropic_split_preserves_area() {
        let mut mesh = unit_square_quads(1);
        let children = mesh.split_element(0, SplitKind::AnisoHorizontal).unwrap();
        assert_eq!(children.len(), 2);
        for &c in &children {
            assert!((mesh.element_measure(c) - 0.5).abs() < 1e-12);
            assert_eq!(mesh.elements[c].level, 1);
        }
        assert!(!mesh.elements[0].active);
        assert_eq!(mesh.elements[0].split, Some(SplitKind::AnisoHorizontal));
    }

    #[test]
    fn test_anisotropic_triangle_split_rejected() {
        let mut mesh = unit_square_triangles(1);
        assert!(mesh.split_element(0, SplitKind::AnisoVertical).is_err());
        assert!(mesh.elements[0].active);
    }

    #[test]
    fn test_child_points_match_mesh_split() {
        let mut mesh = unit_square_quads(1);
        let points = mesh.element_points(0).unwrap();
        let expected = child_points(ElementType::Quadrilateral, &points, SplitKind::Isotropic).unwrap();
        let children = mesh.split_element(0, SplitKind::Isotropic).unwrap();
        for (child, pts) in children.iter().zip(&expected) {
            let actual = mesh.element_points(*child).unwrap();
            for (a, e) in actual.iter().zip(pts) {
                assert!(a.distance(e) < 1e-14);
            }
        }
    }

    #[test]
    fn test_hanging_levels() {
        let mut mesh = unit_square_quads(2);
        assert_eq!(mesh.topology().max_hanging_level(), 0);

        let children = mesh.split_element(0, SplitKind::Isotropic).unwrap();
        let topo = mesh.topology();
        assert_eq!(topo.max_hanging_level(), 1);
        assert_eq!(topo.hanging_vertices.len(), 2);
        assert_eq!(topo.coarse_levels.get(&1), Some(&1));

        // Splitting a corner child next to the coarse neighbour creates level 2
        mesh.split_element(children[1], SplitKind::Isotropic).unwrap();
        assert_eq!(mesh.topology().max_hanging_level(), 2);
    }

    #[test]
    fn test_regularize_limits_hanging_level() {
        let mut mesh = unit_square_quads(2);
        let children = mesh.split_element(0, SplitKind::Isotropic).unwrap();
        let grandchildren = mesh.split_element(children[1], SplitKind::Isotropic).unwrap();
        mesh.split_element(grandchildren[1], SplitKind::Isotropic).unwrap();
        assert_eq!(mesh.topology().max_hanging_level(), 3);

        let split = mesh.regularize(1).unwrap();
        assert!(!split.is_empty());
        assert!(mesh.topology().max_hanging_level() <= 1);
        assert!((mesh.total_area() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_coarsen_restores_parent() {
        let mut mesh = unit_square_quads(1);
        mesh.split_element(0, SplitKind::Isotropic).unwrap();
        assert!(mesh.is_coarsenable(0));

        let removed = mesh.coarsen_element(0).unwrap();
        assert_eq!(removed.len(), 4);
        assert_eq!(mesh.active_elements(), vec![0]);
        assert_eq!(mesh.topology().max_hanging_level(), 0);
    }
}
