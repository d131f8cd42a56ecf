//! Polynomial spaces over refinement-forest meshes
//!
//! A [`Space`] assigns a polynomial order to every element of one mesh and
//! counts degrees of freedom. A [`Discretization`] groups the meshes and
//! spaces of all solution components: one shared mesh, or one mesh per
//! component (multimesh).

use crate::error::{AdaptError, Result};
use crate::mesh::{Edge, ElementType, Mesh, MeshTopology, SplitKind};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

/// Continuity class of a space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpaceKind {
    /// Continuous, DOFs on vertices, edges and interiors
    H1,
    /// Discontinuous, all DOFs element-local
    L2,
}

/// Fingerprint of a space's active elements and orders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpaceSignature(pub u64);

/// Per-element polynomial orders of one solution component
#[derive(Debug, Clone)]
pub struct Space {
    kind: SpaceKind,
    orders: Vec<usize>,
    reference_of: Option<SpaceSignature>,
}

/// Interior (bubble) functions of an H1 element
fn bubble_dofs(shape: ElementType, p: usize) -> usize {
    match shape {
        ElementType::Triangle if p >= 3 => (p - 1) * (p - 2) / 2,
        ElementType::Triangle => 0,
        _ => p.saturating_sub(1).pow(2),
    }
}

/// DOFs of a single isolated element
pub fn element_dofs(shape: ElementType, p: usize) -> usize {
    match shape {
        ElementType::Triangle => (p + 1) * (p + 2) / 2,
        _ => (p + 1) * (p + 1),
    }
}

/// DOFs of the patch an element becomes under a split with the given child orders.
///
/// H1 patches count shared vertices and edges once; an interior edge between
/// two children carries the smaller of their orders.
pub fn patch_dofs(kind: SpaceKind, shape: ElementType, split: SplitKind, orders: &[usize]) -> usize {
    if kind == SpaceKind::L2 || split == SplitKind::None {
        return orders.iter().map(|&p| element_dofs(shape, p)).sum();
    }

    let edge = |p: usize| p.saturating_sub(1);
    let interior = |a: usize, b: usize| edge(a.min(b));
    let bubbles: usize = orders.iter().map(|&p| bubble_dofs(shape, p)).sum();

    match (shape, split) {
        (ElementType::Triangle, _) => {
            // Corner children 0..3 own two exterior half-edges each; child 3 is the middle one
            let exterior: usize = orders[..3].iter().map(|&p| 2 * edge(p)).sum();
            let inner: usize = orders[..3].iter().map(|&p| interior(p, orders[3])).sum();
            6 + exterior + inner + bubbles
        }
        (_, SplitKind::Isotropic) => {
            let exterior: usize = orders.iter().map(|&p| 2 * edge(p)).sum();
            let inner: usize = (0..4).map(|k| interior(orders[k], orders[(k + 1) % 4])).sum();
            9 + exterior + inner + bubbles
        }
        _ => {
            let exterior: usize = orders.iter().map(|&p| 3 * edge(p)).sum();
            6 + exterior + interior(orders[0], orders[1]) + bubbles
        }
    }
}

/// Nodes on the closure of an element: its vertices and every registered
/// midpoint below its edges, at any depth
fn closure_nodes(mesh: &Mesh, id: usize) -> HashSet<usize> {
    let elem = &mesh.elements[id];
    let mut nodes: HashSet<usize> = elem.vertices().iter().copied().collect();
    let mut stack = elem.edges();
    while let Some((a, b)) = stack.pop() {
        if let Some(&m) = mesh.midpoints.get(&Edge::new(a, b)) {
            if nodes.insert(m) {
                stack.push((a, m));
                stack.push((m, b));
            }
        }
    }
    nodes
}

/// H1 vertex and edge DOF carriers lying on an element's closure
#[derive(Debug, Clone, Default)]
struct ClosureEntities {
    /// Non-hanging active vertices
    vertices: usize,
    /// Owners of each unconstrained edge
    edges: Vec<Vec<usize>>,
}

impl ClosureEntities {
    fn collect(topo: &MeshTopology, closure: &HashSet<usize>) -> Self {
        let mut vertices = HashSet::new();
        let mut edges = Vec::new();
        for (edge, owners) in &topo.edge_owners {
            let ends = [edge.0, edge.1];
            for &v in &ends {
                if closure.contains(&v) && !topo.hanging_vertices.contains(&v) {
                    vertices.insert(v);
                }
            }
            if ends.iter().all(|v| closure.contains(v)) && !topo.constrained_edges.contains(edge) {
                edges.push(owners.clone());
            }
        }
        Self {
            vertices: vertices.len(),
            edges,
        }
    }

    fn dofs(&self, order: impl Fn(usize) -> usize) -> usize {
        let edges: usize = self
            .edges
            .iter()
            .map(|owners| {
                let p = owners.iter().map(|&o| order(o)).min().unwrap_or(0);
                p.saturating_sub(1)
            })
            .sum();
        self.vertices + edges
    }
}

/// Change of the global DOF count under candidate refinements of one element.
///
/// A refinement only changes DOFs on the closure of the element, so each
/// split is tried once on a copy of the mesh and every candidate is then
/// counted there against the orders of the real neighbours. Unlike
/// [`patch_dofs`], an edge shared with a neighbour keeps the minimum rule.
#[derive(Debug, Clone)]
pub struct RefinementDofs {
    kind: SpaceKind,
    shape: ElementType,
    element: usize,
    order: usize,
    before: ClosureEntities,
    /// Split kind, children in the trial mesh, closure after the split
    splits: Vec<(SplitKind, Vec<usize>, ClosureEntities)>,
    orders: HashMap<usize, usize>,
}

impl RefinementDofs {
    /// Prepare the candidate counts of an active element for the given splits
    pub fn new(
        mesh: &Mesh,
        topo: &MeshTopology,
        space: &Space,
        element: usize,
        splits: &[SplitKind],
    ) -> Result<Self> {
        let shape = mesh.active_element(element)?.element_type;
        let mut dofs = Self {
            kind: space.kind(),
            shape,
            element,
            order: space.order(element),
            before: ClosureEntities::default(),
            splits: Vec::new(),
            orders: HashMap::new(),
        };
        if space.kind() == SpaceKind::L2 {
            return Ok(dofs);
        }

        dofs.before = ClosureEntities::collect(topo, &closure_nodes(mesh, element));
        for &split in splits.iter().filter(|s| s.is_split()) {
            let mut trial = mesh.clone();
            let first_new = trial.num_nodes();
            let children = trial.split_element(element, split)?;
            let mut closure = closure_nodes(&trial, element);
            closure.extend(first_new..trial.num_nodes());
            let entities = ClosureEntities::collect(&trial.topology(), &closure);
            dofs.splits.push((split, children, entities));
        }

        let owners: Vec<usize> = dofs
            .before
            .edges
            .iter()
            .chain(dofs.splits.iter().flat_map(|(_, _, e)| e.edges.iter()))
            .flatten()
            .copied()
            .collect();
        for o in owners {
            dofs.orders.entry(o).or_insert_with(|| space.order(o));
        }
        Ok(dofs)
    }

    fn order_of(&self, id: usize) -> usize {
        self.orders.get(&id).copied().unwrap_or(0)
    }

    /// Global DOFs added by refining with `split` and child `orders`;
    /// `None` for a split that was not prepared
    pub fn delta(&self, split: SplitKind, orders: &[usize]) -> Option<isize> {
        let bubbles = |orders: &[usize]| -> usize {
            orders.iter().map(|&p| bubble_dofs(self.shape, p)).sum()
        };
        if self.kind == SpaceKind::L2 {
            let after: usize = orders.iter().map(|&p| element_dofs(self.shape, p)).sum();
            return Some(after as isize - element_dofs(self.shape, self.order) as isize);
        }

        let before = self.before.dofs(|o| self.order_of(o)) + bubble_dofs(self.shape, self.order);
        let after = if split.is_split() {
            let (_, children, entities) = self.splits.iter().find(|(s, _, _)| *s == split)?;
            let order = |o: usize| match children.iter().position(|&c| c == o) {
                Some(k) => orders.get(k).copied().unwrap_or(0),
                None => self.order_of(o),
            };
            entities.dofs(order) + bubbles(orders)
        } else {
            let p = orders.first().copied()?;
            let order = |o: usize| if o == self.element { p } else { self.order_of(o) };
            self.before.dofs(order) + bubble_dofs(self.shape, p)
        };
        Some(after as isize - before as isize)
    }
}

impl Space {
    /// Space of uniform `order` on every element of the mesh
    pub fn new(mesh: &Mesh, kind: SpaceKind, order: usize) -> Self {
        let order = match kind {
            SpaceKind::H1 => order.max(1),
            SpaceKind::L2 => order,
        };
        Self {
            kind,
            orders: vec![order; mesh.num_elements()],
            reference_of: None,
        }
    }

    pub fn kind(&self) -> SpaceKind {
        self.kind
    }

    /// Order of an element (0 for ids the space has never seen)
    pub fn order(&self, id: usize) -> usize {
        self.orders.get(id).copied().unwrap_or(0)
    }

    pub fn set_order(&mut self, id: usize, order: usize) {
        if id >= self.orders.len() {
            self.orders.resize(id + 1, 0);
        }
        self.orders[id] = order;
    }

    /// Give the children of a split element the element's order
    pub fn inherit_children(&mut self, mesh: &Mesh, parent: usize) {
        let order = self.order(parent);
        for &child in &mesh.elements[parent].children {
            self.set_order(child, order);
        }
    }

    /// Signature of the coarse space this space is the reference of
    pub fn reference_of(&self) -> Option<SpaceSignature> {
        self.reference_of
    }

    /// Largest order over the active elements
    pub fn max_order(&self, mesh: &Mesh) -> usize {
        mesh.active_elements()
            .iter()
            .map(|&id| self.order(id))
            .max()
            .unwrap_or(0)
    }

    /// Number of degrees of freedom on the active mesh
    pub fn num_dofs(&self, mesh: &Mesh) -> usize {
        let active = mesh.active_elements();
        if self.kind == SpaceKind::L2 {
            return active
                .iter()
                .map(|&id| element_dofs(mesh.elements[id].element_type, self.order(id)))
                .sum();
        }

        let topo = mesh.topology();
        let vertices: HashSet<usize> = active
            .iter()
            .flat_map(|&id| mesh.elements[id].vertices().iter().copied())
            .filter(|v| !topo.hanging_vertices.contains(v))
            .collect();

        let edges: usize = topo
            .edge_owners
            .iter()
            .filter(|(edge, _)| !topo.constrained_edges.contains(edge))
            .map(|(_, owners)| {
                let p = owners.iter().map(|&o| self.order(o)).min().unwrap_or(0);
                p.saturating_sub(1)
            })
            .sum();

        let bubbles: usize = active
            .iter()
            .map(|&id| bubble_dofs(mesh.elements[id].element_type, self.order(id)))
            .sum();

        vertices.len() + edges + bubbles
    }

    /// Fingerprint of the active elements, their geometry and orders
    pub fn signature(&self, mesh: &Mesh) -> SpaceSignature {
        let mut hasher = DefaultHasher::new();
        self.kind.hash(&mut hasher);
        mesh.num_nodes().hash(&mut hasher);
        for id in mesh.active_elements() {
            id.hash(&mut hasher);
            self.order(id).hash(&mut hasher);
            mesh.elements[id].nodes.hash(&mut hasher);
        }
        SpaceSignature(hasher.finish())
    }
}

/// Meshes and spaces of all solution components
#[derive(Debug, Clone)]
pub struct Discretization {
    pub(crate) meshes: Vec<Mesh>,
    pub(crate) mesh_of: Vec<usize>,
    pub(crate) spaces: Vec<Space>,
}

impl Discretization {
    /// `components` spaces of uniform order sharing one mesh
    pub fn single_mesh(mesh: Mesh, components: usize, kind: SpaceKind, order: usize) -> Self {
        let spaces = (0..components)
            .map(|_| Space::new(&mesh, kind, order))
            .collect();
        Self {
            meshes: vec![mesh],
            mesh_of: vec![0; components],
            spaces,
        }
    }

    /// One independent copy of `master` per component
    pub fn multimesh(master: &Mesh, components: usize, kind: SpaceKind, order: usize) -> Self {
        Self {
            meshes: vec![master.clone(); components],
            mesh_of: (0..components).collect(),
            spaces: (0..components)
                .map(|_| Space::new(master, kind, order))
                .collect(),
        }
    }

    /// Assemble from explicit parts; `mesh_of[i]` is the mesh of component `i`
    pub fn from_parts(meshes: Vec<Mesh>, mesh_of: Vec<usize>, spaces: Vec<Space>) -> Result<Self> {
        if mesh_of.len() != spaces.len() {
            return Err(AdaptError::ComponentCountMismatch {
                expected: spaces.len(),
                got: mesh_of.len(),
            });
        }
        if let Some(&m) = mesh_of.iter().find(|&&m| m >= meshes.len()) {
            return Err(AdaptError::InvalidConfig(format!(
                "component mapped to mesh {m}, only {} meshes given",
                meshes.len()
            )));
        }
        for mesh in &meshes {
            for elem in &mesh.elements {
                elem.element_type.ensure_planar()?;
            }
        }
        Ok(Self {
            meshes,
            mesh_of,
            spaces,
        })
    }

    pub fn num_components(&self) -> usize {
        self.spaces.len()
    }

    pub fn num_meshes(&self) -> usize {
        self.meshes.len()
    }

    /// Index of the mesh carrying a component
    pub fn mesh_index(&self, component: usize) -> usize {
        self.mesh_of[component]
    }

    pub fn mesh(&self, component: usize) -> &Mesh {
        &self.meshes[self.mesh_of[component]]
    }

    pub fn space(&self, component: usize) -> &Space {
        &self.spaces[component]
    }

    pub fn space_mut(&mut self, component: usize) -> &mut Space {
        &mut self.spaces[component]
    }

    /// Components whose space lives on mesh `m`
    pub fn components_on_mesh(&self, m: usize) -> Vec<usize> {
        (0..self.spaces.len())
            .filter(|&c| self.mesh_of[c] == m)
            .collect()
    }

    /// Total DOFs over all components
    pub fn num_dofs(&self) -> usize {
        (0..self.spaces.len())
            .map(|c| self.spaces[c].num_dofs(self.mesh(c)))
            .sum()
    }

    pub fn signature(&self, component: usize) -> SpaceSignature {
        self.spaces[component].signature(self.mesh(component))
    }

    /// Reference discretization: every mesh split isotropically once and every
    /// order raised by `order_increase`.
    pub fn reference(&self, order_increase: usize) -> Result<Discretization> {
        let mut fine = self.clone();
        for (m, mesh) in fine.meshes.iter_mut().enumerate() {
            let parents = mesh.uniform_refine()?;
            for c in self.components_on_mesh(m) {
                let space = &mut fine.spaces[c];
                for &parent in &parents {
                    let order = self.spaces[c].order(parent) + order_increase;
                    for &child in &mesh.elements[parent].children {
                        space.set_order(child, order);
                    }
                }
                space.reference_of = Some(self.signature(c));
            }
        }
        Ok(fine)
    }
}
