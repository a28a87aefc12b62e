//! Element connectivity and the naive (pre-optimisation) global node
//! numbering (spec §4.2), analogous to semtex's `Mesh::buildMap`.
//!
//! The naive numbering simply walks every element in order and gives
//! each node the next unused global id, except where a union-find merge
//! records that it coincides with a node already visited on a
//! neighbouring element's shared edge. [`crate::assembly::AssemblyMap`]
//! takes this naive numbering and does the mask partition / RCM
//! reordering; `Mesh` itself stays agnostic to solve order, the same
//! separation of concerns the teacher keeps between basis construction
//! (`Chebyshev`) and the solver that consumes it (`FdmaTensor`).

use crate::element::{Element, Side};
use crate::error::{alert, Result, Severity};

/// How one side of one element connects to the rest of the mesh.
#[derive(Debug, Clone, Copy)]
pub enum EdgeLink {
    /// Glued to `neighbor`'s `neighbor_side`. `reversed` is true when the
    /// two sides are traversed in opposite CCW order (always true for a
    /// consistent CCW mesh, kept explicit for non-conforming cases).
    Interior {
        neighbor: usize,
        neighbor_side: Side,
        reversed: bool,
    },
    /// On the domain boundary, tagged with a boundary-condition group id
    /// (resolved against [`crate::boundary::BoundarySys`]).
    Boundary { group: usize },
}

pub struct Mesh {
    pub elements: Vec<Element>,
    /// `connectivity[e][side as usize]` describes that side of element `e`.
    pub connectivity: Vec<[EdgeLink; 4]>,
    /// Naive global id for node `(i, j)` of element `e`:
    /// `naive_btog[e][[i, j]]`.
    pub naive_btog: Vec<ndarray::Array2<usize>>,
    pub n_naive: usize,
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        UnionFind {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

impl Mesh {
    pub fn new(elements: Vec<Element>, connectivity: Vec<[EdgeLink; 4]>) -> Result<Self> {
        let routine = "Mesh::new";
        if elements.len() != connectivity.len() {
            alert(
                routine,
                "connectivity table length must match element count",
                Severity::Error,
            )?;
        }
        let n_el = elements.len();
        let n_p = if n_el > 0 { elements[0].n_p } else { 0 };
        for el in &elements {
            if el.n_p != n_p {
                alert(routine, "all elements must share one polynomial order", Severity::Error)?;
            }
        }

        let ids_per_element = n_p * n_p;
        let total = n_el * ids_per_element;
        let mut uf = UnionFind::new(total);
        let gid = |e: usize, i: usize, j: usize| e * ids_per_element + i * n_p + j;

        for (e, sides) in connectivity.iter().enumerate() {
            for (side_idx, link) in sides.iter().enumerate() {
                let side = Side::ALL[side_idx];
                if let EdgeLink::Interior {
                    neighbor,
                    neighbor_side,
                    reversed,
                } = *link
                {
                    if neighbor < e {
                        // merge once, from the higher-indexed element's pass
                        continue;
                    }
                    let my_idx = elements[e].side_indices(side);
                    let mut other_idx = elements[neighbor].side_indices(neighbor_side);
                    if !reversed {
                        other_idx.reverse();
                    }
                    if my_idx.len() != other_idx.len() {
                        alert(routine, "mismatched side lengths across a shared edge", Severity::Error)?;
                    }
                    for (&(i0, j0), &(i1, j1)) in my_idx.iter().zip(other_idx.iter()) {
                        uf.union(gid(e, i0, j0), gid(neighbor, i1, j1));
                    }
                }
            }
        }

        let mut compress = vec![usize::MAX; total];
        let mut next = 0usize;
        let mut naive_btog = Vec::with_capacity(n_el);
        for e in 0..n_el {
            let mut arr = ndarray::Array2::<usize>::zeros((n_p, n_p));
            for i in 0..n_p {
                for j in 0..n_p {
                    let root = uf.find(gid(e, i, j));
                    let id = match compress[root] {
                        usize::MAX => {
                            let id = next;
                            compress[root] = id;
                            next += 1;
                            id
                        }
                        id => id,
                    };
                    arr[[i, j]] = id;
                }
            }
            naive_btog.push(arr);
        }

        Ok(Mesh {
            elements,
            connectivity,
            naive_btog,
            n_naive: next,
        })
    }

    pub fn n_el(&self) -> usize {
        self.elements.len()
    }

    pub fn n_p(&self) -> usize {
        self.elements.first().map(|e| e.n_p).unwrap_or(0)
    }

    /// True when node `(i, j)` of element `e` lies on a `Boundary` edge
    /// carrying an essential condition group (the caller resolves the
    /// group id against the boundary system; this only reports adjacency).
    pub fn boundary_groups_at(&self, e: usize, side: Side) -> Option<usize> {
        match self.connectivity[e][side as usize] {
            EdgeLink::Boundary { group } => Some(group),
            EdgeLink::Interior { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementGeometry;
    use ndarray::Array2;

    fn square_element(n_p: usize, x0: f64, y0: f64) -> Element {
        let rule = crate::operators::gll_rule(n_p);
        let mut x = Array2::zeros((n_p, n_p));
        let mut y = Array2::zeros((n_p, n_p));
        for i in 0..n_p {
            for j in 0..n_p {
                x[[i, j]] = x0 + rule.z[i];
                y[[i, j]] = y0 + rule.z[j];
            }
        }
        let jac = Array2::from_elem((n_p, n_p), 1.0);
        let rx = Array2::from_elem((n_p, n_p), 1.0);
        let ry = Array2::from_elem((n_p, n_p), 0.0);
        let sx = Array2::from_elem((n_p, n_p), 0.0);
        let sy = Array2::from_elem((n_p, n_p), 1.0);
        Element::new(n_p, false, ElementGeometry { x, y, jac, rx, ry, sx, sy })
    }

    #[test]
    fn two_elements_share_one_edge() {
        let n_p = 4;
        let e0 = square_element(n_p, -1.0, 0.0);
        let e1 = square_element(n_p, 1.0, 0.0);
        let connectivity = vec![
            [
                EdgeLink::Boundary { group: 0 },
                EdgeLink::Interior {
                    neighbor: 1,
                    neighbor_side: Side::Left,
                    reversed: true,
                },
                EdgeLink::Boundary { group: 0 },
                EdgeLink::Boundary { group: 0 },
            ],
            [
                EdgeLink::Boundary { group: 0 },
                EdgeLink::Boundary { group: 0 },
                EdgeLink::Boundary { group: 0 },
                EdgeLink::Interior {
                    neighbor: 0,
                    neighbor_side: Side::Right,
                    reversed: true,
                },
            ],
        ];
        let mesh = Mesh::new(vec![e0, e1], connectivity).unwrap();
        // Shared edge has n_p nodes merged, so total ids = 2*n_p*n_p - n_p.
        assert_eq!(mesh.n_naive, 2 * n_p * n_p - n_p);
    }

    #[test]
    fn rejects_length_mismatch() {
        let e0 = square_element(4, 0.0, 0.0);
        let res = Mesh::new(vec![e0], vec![]);
        assert!(res.is_err());
    }
}
