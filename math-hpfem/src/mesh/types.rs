//! Mesh types for 2D hp-adaptive finite element analysis
//!
//! Elements live in a refinement forest: splitting an element deactivates it
//! and appends its children, so element ids are stable for the lifetime of
//! the mesh and equal the element's index in [`Mesh::elements`].

use crate::error::{AdaptError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::refinement::{Edge, SplitKind};

/// A point in 2D or 3D space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point {
    /// Create a 2D point (z = 0)
    pub fn new_2d(x: f64, y: f64) -> Self {
        Self { x, y, z: 0.0 }
    }

    /// Create a 3D point
    pub fn new_3d(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to another point
    pub fn distance(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Midpoint between two points
    pub fn midpoint(&self, other: &Point) -> Point {
        Point {
            x: 0.5 * (self.x + other.x),
            y: 0.5 * (self.y + other.y),
            z: 0.5 * (self.z + other.z),
        }
    }
}

impl From<(f64, f64)> for Point {
    fn from(p: (f64, f64)) -> Self {
        Point::new_2d(p.0, p.1)
    }
}

/// Element type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ElementType {
    /// 2D triangle
    Triangle,
    /// 2D quadrilateral
    Quadrilateral,
    /// 3D tetrahedron (not handled by the adaptivity core)
    Tetrahedron,
    /// 3D hexahedron (not handled by the adaptivity core)
    Hexahedron,
}

impl ElementType {
    /// Number of vertices (corners) for this element type
    pub fn num_vertices(&self) -> usize {
        match self {
            ElementType::Triangle => 3,
            ElementType::Quadrilateral => 4,
            ElementType::Tetrahedron => 4,
            ElementType::Hexahedron => 8,
        }
    }

    /// Spatial dimension of this element
    pub fn dimension(&self) -> usize {
        match self {
            ElementType::Triangle | ElementType::Quadrilateral => 2,
            ElementType::Tetrahedron | ElementType::Hexahedron => 3,
        }
    }

    /// Number of edges for this element type
    pub fn num_edges(&self) -> usize {
        match self {
            ElementType::Triangle => 3,
            ElementType::Quadrilateral => 4,
            ElementType::Tetrahedron => 6,
            ElementType::Hexahedron => 12,
        }
    }

    /// Fail with `UnsupportedElementShape` unless this is a 2D shape.
    pub fn ensure_planar(&self) -> Result<()> {
        if self.dimension() == 2 {
            Ok(())
        } else {
            Err(AdaptError::UnsupportedElementShape { shape: *self })
        }
    }
}

/// A finite element in the refinement forest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Element {
    /// Element type
    pub element_type: ElementType,
    /// Vertex node indices, counter-clockwise
    pub nodes: Vec<usize>,
    /// Element id (index into `Mesh::elements`)
    pub id: usize,
    /// Parent element id (for refined elements)
    pub parent_id: Option<usize>,
    /// Children ids, empty for leaves
    pub children: Vec<usize>,
    /// How this element was split, if it has children
    pub split: Option<SplitKind>,
    /// Refinement level (0 for base elements)
    pub level: usize,
    /// Whether the element is a leaf of the current mesh
    pub active: bool,
}

impl Element {
    /// Create a new active root element
    pub fn new(element_type: ElementType, nodes: Vec<usize>, id: usize) -> Self {
        Self {
            element_type,
            nodes,
            id,
            parent_id: None,
            children: Vec::new(),
            split: None,
            level: 0,
            active: true,
        }
    }

    /// Get vertex nodes
    pub fn vertices(&self) -> &[usize] {
        &self.nodes[..self.element_type.num_vertices()]
    }

    /// Edges as (start, end) node pairs following the vertex orientation
    pub fn edges(&self) -> Vec<(usize, usize)> {
        let verts = self.vertices();
        let n = verts.len();
        (0..n).map(|i| (verts[i], verts[(i + 1) % n])).collect()
    }

    pub fn is_triangle(&self) -> bool {
        self.element_type == ElementType::Triangle
    }
}

/// A 2D finite element mesh with a refinement forest
#[derive(Debug, Clone)]
pub struct Mesh {
    /// Node coordinates
    pub nodes: Vec<Point>,
    /// All elements ever created (active leaves and inactive parents)
    pub elements: Vec<Element>,
    /// Midpoint node of every edge that has been bisected
    pub(crate) midpoints: HashMap<Edge, usize>,
}

impl Default for Mesh {
    fn default() -> Self {
        Self::new()
    }
}

impl Mesh {
    /// Create a new empty mesh
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            elements: Vec::new(),
            midpoints: HashMap::new(),
        }
    }

    /// Add a node and return its index
    pub fn add_node(&mut self, point: Point) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(point);
        idx
    }

    /// Add a root element and return its id
    pub fn add_element(&mut self, element_type: ElementType, nodes: Vec<usize>) -> usize {
        let id = self.elements.len();
        self.elements.push(Element::new(element_type, nodes, id));
        id
    }

    /// Number of nodes
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of elements, active and inactive
    pub fn num_elements(&self) -> usize {
        self.elements.len()
    }

    /// Number of active (leaf) elements
    pub fn num_active_elements(&self) -> usize {
        self.elements.iter().filter(|e| e.active).count()
    }

    /// Ids of the active elements in ascending order
    pub fn active_elements(&self) -> Vec<usize> {
        self.elements
            .iter()
            .filter(|e| e.active)
            .map(|e| e.id)
            .collect()
    }

    /// Root elements of the refinement forest
    pub fn root_elements(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter().filter(|e| e.parent_id.is_none())
    }

    /// Get node coordinates
    pub fn node(&self, idx: usize) -> &Point {
        &self.nodes[idx]
    }

    /// Get an element by id
    pub fn element(&self, id: usize) -> Result<&Element> {
        self.elements
            .get(id)
            .ok_or(AdaptError::UnknownElement { element: id })
    }

    /// Get an element by id, failing if it is not active
    pub fn active_element(&self, id: usize) -> Result<&Element> {
        match self.elements.get(id) {
            Some(e) if e.active => Ok(e),
            _ => Err(AdaptError::UnknownElement { element: id }),
        }
    }

    /// Vertex coordinates of an element
    pub fn element_points(&self, id: usize) -> Result<Vec<Point>> {
        let elem = self.element(id)?;
        Ok(elem.vertices().iter().map(|&v| self.nodes[v]).collect())
    }

    /// Compute element centroid
    pub fn element_centroid(&self, id: usize) -> Point {
        let verts = self.elements[id].vertices();
        let n = verts.len() as f64;
        let (cx, cy) = verts.iter().fold((0.0, 0.0), |(cx, cy), &v| {
            (cx + self.nodes[v].x, cy + self.nodes[v].y)
        });
        Point::new_2d(cx / n, cy / n)
    }

    /// Compute element area
    pub fn element_measure(&self, id: usize) -> f64 {
        let verts: Vec<&Point> = self.elements[id]
            .vertices()
            .iter()
            .map(|&i| &self.nodes[i])
            .collect();

        // Shoelace formula, valid for triangles and simple quadrilaterals
        let n = verts.len();
        let twice_area: f64 = (0..n)
            .map(|i| {
                let a = verts[i];
                let b = verts[(i + 1) % n];
                a.x * b.y - b.x * a.y
            })
            .sum();
        0.5 * twice_area.abs()
    }

    /// Active leaves below (and including) an element
    pub fn active_descendants(&self, id: usize) -> Vec<usize> {
        let mut leaves = Vec::new();
        let mut stack = vec![id];
        while let Some(e) = stack.pop() {
            let elem = &self.elements[e];
            if elem.active {
                leaves.push(e);
            } else {
                stack.extend(elem.children.iter().copied());
            }
        }
        leaves.sort_unstable();
        leaves
    }

    /// Sum of areas of active elements
    pub fn total_area(&self) -> f64 {
        self.active_elements()
            .iter()
            .map(|&id| self.element_measure(id))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_distance() {
        let p1 = Point::new_2d(0.0, 0.0);
        let p2 = Point::new_2d(3.0, 4.0);
        assert!((p1.distance(&p2) - 5.0).abs() < 1e-10);
    }

    #[test]
    fn test_point_midpoint() {
        let p1 = Point::new_2d(0.0, 0.0);
        let p2 = Point::new_2d(2.0, 4.0);
        let mid = p1.midpoint(&p2);
        assert!((mid.x - 1.0).abs() < 1e-10);
        assert!((mid.y - 2.0).abs() < 1e-10);
    }

    #[test]
    fn test_element_type_properties() {
        assert_eq!(ElementType::Triangle.num_vertices(), 3);
        assert_eq!(ElementType::Quadrilateral.num_edges(), 4);
        assert!(ElementType::Quadrilateral.ensure_planar().is_ok());
        assert!(matches!(
            ElementType::Tetrahedron.ensure_planar(),
            Err(AdaptError::UnsupportedElementShape { .. })
        ));
    }

    #[test]
    fn test_mesh_areas() {
        let mut mesh = Mesh::new();
        let a = mesh.add_node(Point::new_2d(0.0, 0.0));
        let b = mesh.add_node(Point::new_2d(1.0, 0.0));
        let c = mesh.add_node(Point::new_2d(1.0, 1.0));
        let d = mesh.add_node(Point::new_2d(0.0, 1.0));
        let tri = mesh.add_element(ElementType::Triangle, vec![a, b, d]);
        let quad = mesh.add_element(ElementType::Quadrilateral, vec![a, b, c, d]);

        assert!((mesh.element_measure(tri) - 0.5).abs() < 1e-12);
        assert!((mesh.element_measure(quad) - 1.0).abs() < 1e-12);
        assert_eq!(mesh.num_active_elements(), 2);
        assert_eq!(mesh.element(quad).unwrap().edges().len(), 4);
    }

    #[test]
    fn test_unknown_element() {
        let mesh = Mesh::new();
        assert!(matches!(
            mesh.element(3),
            Err(AdaptError::UnknownElement { element: 3 })
        ));
    }
}
