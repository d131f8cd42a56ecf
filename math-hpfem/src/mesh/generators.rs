//! Mesh generators for common 2D domains
//!
//! Provides structured meshes of rectangles and an L-shaped domain, the
//! classical corner-singularity benchmark for hp-adaptivity.

use super::types::{ElementType, Mesh, Point};

/// Generate a rectangular mesh with triangular elements
pub fn rectangular_mesh_triangles(
    x_min: f64,
    x_max: f64,
    y_min: f64,
    y_max: f64,
    nx: usize,
    ny: usize,
) -> Mesh {
    let mut mesh = Mesh::new();
    add_grid_nodes(&mut mesh, x_min, x_max, y_min, y_max, nx, ny);

    // Two counter-clockwise triangles per cell
    for j in 0..ny {
        for i in 0..nx {
            let n00 = j * (nx + 1) + i;
            let n10 = n00 + 1;
            let n01 = n00 + (nx + 1);
            let n11 = n01 + 1;

            mesh.add_element(ElementType::Triangle, vec![n00, n10, n11]);
            mesh.add_element(ElementType::Triangle, vec![n00, n11, n01]);
        }
    }

    mesh
}

/// Generate a rectangular mesh with quadrilateral elements
pub fn rectangular_mesh_quads(
    x_min: f64,
    x_max: f64,
    y_min: f64,
    y_max: f64,
    nx: usize,
    ny: usize,
) -> Mesh {
    let mut mesh = Mesh::new();
    add_grid_nodes(&mut mesh, x_min, x_max, y_min, y_max, nx, ny);

    for j in 0..ny {
        for i in 0..nx {
            let n00 = j * (nx + 1) + i;
            let n10 = n00 + 1;
            let n01 = n00 + (nx + 1);
            let n11 = n01 + 1;

            mesh.add_element(ElementType::Quadrilateral, vec![n00, n10, n11, n01]);
        }
    }

    mesh
}

fn add_grid_nodes(
    mesh: &mut Mesh,
    x_min: f64,
    x_max: f64,
    y_min: f64,
    y_max: f64,
    nx: usize,
    ny: usize,
) {
    let dx = (x_max - x_min) / nx as f64;
    let dy = (y_max - y_min) / ny as f64;

    for j in 0..=ny {
        for i in 0..=nx {
            let x = x_min + i as f64 * dx;
            let y = y_min + j as f64 * dy;
            mesh.add_node(Point::new_2d(x, y));
        }
    }
}

/// L-shaped domain (-1,1)² minus the quadrant (0,1)x(-1,0), made of quads.
///
/// Each of the three unit squares is divided into `n x n` quads; the re-entrant
/// corner sits at the origin.
pub fn l_shape_quads(n: usize) -> Mesh {
    let n = n.max(1);
    let mut mesh = rectangular_mesh_quads(-1.0, 1.0, -1.0, 1.0, 2 * n, 2 * n);

    // Drop the cells of the removed quadrant and renumber
    let mut pruned = Mesh::new();
    let mut node_map = vec![usize::MAX; mesh.num_nodes()];
    let elements = std::mem::take(&mut mesh.elements);
    for elem in elements {
        let c = {
            let pts: Vec<&Point> = elem.nodes.iter().map(|&v| &mesh.nodes[v]).collect();
            Point::new_2d(
                pts.iter().map(|p| p.x).sum::<f64>() / 4.0,
                pts.iter().map(|p| p.y).sum::<f64>() / 4.0,
            )
        };
        if c.x > 0.0 && c.y < 0.0 {
            continue;
        }
        let nodes = elem
            .nodes
            .iter()
            .map(|&v| {
                if node_map[v] == usize::MAX {
                    node_map[v] = pruned.add_node(mesh.nodes[v]);
                }
                node_map[v]
            })
            .collect();
        pruned.add_element(ElementType::Quadrilateral, nodes);
    }

    pruned
}

/// Generate a unit square mesh with triangles
pub fn unit_square_triangles(n: usize) -> Mesh {
    rectangular_mesh_triangles(0.0, 1.0, 0.0, 1.0, n, n)
}

/// Generate a unit square mesh with quadrilaterals
pub fn unit_square_quads(n: usize) -> Mesh {
    rectangular_mesh_quads(0.0, 1.0, 0.0, 1.0, n, n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rectangular_mesh_triangles() {
        let mesh = rectangular_mesh_triangles(0.0, 1.0, 0.0, 1.0, 2, 2);

        // 3x3 = 9 nodes
        assert_eq!(mesh.num_nodes(), 9);
        // 2x2 cells x 2 triangles = 8 triangles
        assert_eq!(mesh.num_elements(), 8);
        assert!((mesh.total_area() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rectangular_mesh_quads() {
        let mesh = rectangular_mesh_quads(0.0, 1.0, 0.0, 1.0, 3, 3);

        assert_eq!(mesh.num_nodes(), 16);
        assert_eq!(mesh.num_elements(), 9);
    }

    #[test]
    fn test_l_shape() {
        let mesh = l_shape_quads(1);

        assert_eq!(mesh.num_elements(), 3);
        assert_eq!(mesh.num_nodes(), 8);
        assert!((mesh.total_area() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_unit_square() {
        let mesh = unit_square_triangles(4);
        assert_eq!(mesh.num_nodes(), 25);
        assert_eq!(mesh.num_elements(), 32);
    }
}
