//! Masked global numbering and bandwidth-reducing reordering (spec §4.2),
//! ported from semtex's `AssemblyMap` (`original_source/src/assemblymap.cpp`):
//! the naive numbering from [`crate::mesh::Mesh`] is partitioned into
//! unknowns / essential-boundary values by a two-key sort, then the
//! unknown partition is renumbered by Reverse Cuthill-McKee to shrink the
//! global banded-matrix bandwidth used by [`crate::solver`].

use std::collections::BTreeSet;

use crate::error::{alert, Result, Severity};
use crate::mesh::Mesh;

/// RCM optimisation level, matching semtex's `-O` session-file option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptLevel {
    /// No reordering: numbering is left exactly as sorted by mask.
    None = 0,
    /// Single RCM pass from an FNROOT-selected pseudo-peripheral root.
    Fnroot = 1,
    /// RCM from the best of 20 candidate roots scanned across the
    /// unknown partition.
    Scan20 = 2,
    /// RCM from every possible root in the unknown partition (exhaustive).
    Exhaustive = 3,
}

/// Global (process-wide, per Fourier mode) assembly map for one field.
pub struct AssemblyMap {
    /// `btog[e][[i, j]]`: final (post mask-sort, post RCM) global id.
    pub btog: Vec<ndarray::Array2<usize>>,
    /// `bmask[e][[i, j]]`: true where the node carries an essential
    /// (Dirichlet) condition.
    pub bmask: Vec<ndarray::Array2<bool>>,
    /// `emask[e]`: true if element `e` has at least one essential node.
    pub emask: Vec<bool>,
    pub nglobal: usize,
    /// Count of unknowns (non-essential globals); these occupy ids
    /// `0..nsolve`, essential ids occupy `nsolve..nglobal`.
    pub nsolve: usize,
    pub bandwidth: usize,
}

impl AssemblyMap {
    /// Build the map for a given boundary essential-mask predicate:
    /// `is_essential(global_naive_id)` reports whether that naive id
    /// carries a Dirichlet/essential condition.
    pub fn build(
        mesh: &Mesh,
        is_essential: impl Fn(usize) -> bool,
        opt: OptLevel,
    ) -> Result<Self> {
        let routine = "AssemblyMap::build";
        let n_naive = mesh.n_naive;
        if n_naive == 0 {
            alert(routine, "mesh has no naive numbering to assemble", Severity::Error)?;
        }

        // --- sortGid: two-key partition, mask first then naive gid. ---
        let mut order: Vec<usize> = (0..n_naive).collect();
        order.sort_by(|&a, &b| {
            let ma = is_essential(a);
            let mb = is_essential(b);
            ma.cmp(&mb).then(a.cmp(&b))
        });
        let nsolve = order.iter().take_while(|&&g| !is_essential(g)).count();

        let mut remap = vec![0usize; n_naive];
        for (new_id, &old_id) in order.iter().enumerate() {
            remap[old_id] = new_id;
        }

        // --- adjacency among unknowns, for RCM. ---
        let adjacency = build_adjacency(mesh, &remap, nsolve);

        let perm = match opt {
            OptLevel::None => (0..nsolve).collect::<Vec<_>>(),
            OptLevel::Fnroot => {
                let root = fnroot(&adjacency, 0);
                rcm_order(&adjacency, root)
            }
            OptLevel::Scan20 => best_of_roots(&adjacency, scan_candidates(nsolve, 20)),
            OptLevel::Exhaustive => best_of_roots(&adjacency, (0..nsolve).collect()),
        };
        // `perm[new_rcm_position] = old_unknown_index`; invert for lookup.
        let mut rcm_of = vec![0usize; nsolve];
        for (pos, &old) in perm.iter().enumerate() {
            rcm_of[old] = pos;
        }

        let mut final_of = vec![0usize; n_naive];
        for old_id in 0..n_naive {
            let new_id = remap[old_id];
            final_of[old_id] = if new_id < nsolve { rcm_of[new_id] } else { new_id };
        }

        let n_el = mesh.n_el();
        let n_p = mesh.n_p();
        let mut btog = Vec::with_capacity(n_el);
        let mut bmask = Vec::with_capacity(n_el);
        let mut emask = Vec::with_capacity(n_el);
        for e in 0..n_el {
            let mut g = ndarray::Array2::<usize>::zeros((n_p, n_p));
            let mut m = ndarray::Array2::<bool>::from_elem((n_p, n_p), false);
            let mut any_essential = false;
            for i in 0..n_p {
                for j in 0..n_p {
                    let naive = mesh.naive_btog[e][[i, j]];
                    g[[i, j]] = final_of[naive];
                    let ess = is_essential(naive);
                    m[[i, j]] = ess;
                    any_essential |= ess;
                }
            }
            btog.push(g);
            bmask.push(m);
            emask.push(any_essential);
        }

        let bandwidth = bandwidth_sc(&btog, &bmask, nsolve);

        Ok(AssemblyMap {
            btog,
            bmask,
            emask,
            nglobal: n_naive,
            nsolve,
            bandwidth,
        })
    }
}

/// Adjacency list restricted to the `nsolve` unknowns: two unknowns are
/// adjacent if they co-occur in some element's static-condensation
/// boundary ring (the Schur complement couples every boundary unknown to
/// every other boundary unknown of that element).
fn build_adjacency(mesh: &Mesh, remap: &[usize], nsolve: usize) -> Vec<BTreeSet<usize>> {
    let mut adj = vec![BTreeSet::new(); nsolve];
    for e in 0..mesh.n_el() {
        let n_p = mesh.n_p();
        let mut unknowns_in_el = Vec::new();
        for i in 0..n_p {
            for j in 0..n_p {
                let on_boundary = i == 0 || j == 0 || i == n_p - 1 || j == n_p - 1;
                if !on_boundary {
                    continue;
                }
                let naive = mesh.naive_btog[e][[i, j]];
                let new_id = remap[naive];
                if new_id < nsolve {
                    unknowns_in_el.push(new_id);
                }
            }
        }
        for &a in &unknowns_in_el {
            for &b in &unknowns_in_el {
                if a != b {
                    adj[a].insert(b);
                }
            }
        }
    }
    adj
}

/// FNROOT: pick a pseudo-peripheral starting vertex for RCM by repeated
/// breadth-first level-structure refinement, starting from `seed`.
fn fnroot(adj: &[BTreeSet<usize>], seed: usize) -> usize {
    if adj.is_empty() {
        return 0;
    }
    let mut root = seed.min(adj.len() - 1);
    let mut best_depth = bfs_levels(adj, root).iter().filter_map(|&l| l).max().unwrap_or(0);
    loop {
        let levels = bfs_levels(adj, root);
        let max_level = levels.iter().filter_map(|&l| l).max().unwrap_or(0);
        let candidates: Vec<usize> = levels
            .iter()
            .enumerate()
            .filter(|(_, &l)| l == Some(max_level))
            .map(|(i, _)| i)
            .collect();
        let mut improved = false;
        let mut best_width = level_width(&levels);
        for &c in &candidates {
            let lv = bfs_levels(adj, c);
            let depth = lv.iter().filter_map(|&l| l).max().unwrap_or(0);
            let width = level_width(&lv);
            if depth > best_depth || (depth == best_depth && width < best_width) {
                best_depth = depth;
                best_width = width;
                root = c;
                improved = true;
            }
        }
        if !improved {
            return root;
        }
    }
}

fn bfs_levels(adj: &[BTreeSet<usize>], root: usize) -> Vec<Option<usize>> {
    let n = adj.len();
    let mut level = vec![None; n];
    let mut queue = std::collections::VecDeque::new();
    level[root] = Some(0);
    queue.push_back(root);
    while let Some(u) = queue.pop_front() {
        let lu = level[u].unwrap();
        for &v in &adj[u] {
            if level[v].is_none() {
                level[v] = Some(lu + 1);
                queue.push_back(v);
            }
        }
    }
    level
}

fn level_width(levels: &[Option<usize>]) -> usize {
    let max_level = levels.iter().filter_map(|&l| l).max().unwrap_or(0);
    let mut counts = vec![0usize; max_level + 1];
    for &l in levels.iter().flatten() {
        counts[l] += 1;
    }
    counts.into_iter().max().unwrap_or(0)
}

/// Reverse Cuthill-McKee ordering of `adj` rooted at `root`. Disconnected
/// components are appended in order of first appearance.
fn rcm_order(adj: &[BTreeSet<usize>], root: usize) -> Vec<usize> {
    let n = adj.len();
    let mut visited = vec![false; n];
    let mut order = Vec::with_capacity(n);

    let mut bfs_component = |start: usize, order: &mut Vec<usize>, visited: &mut Vec<bool>| {
        let mut queue = std::collections::VecDeque::new();
        visited[start] = true;
        queue.push_back(start);
        while let Some(u) = queue.pop_front() {
            order.push(u);
            let mut neighbours: Vec<usize> =
                adj[u].iter().filter(|&&v| !visited[v]).cloned().collect();
            neighbours.sort_by_key(|&v| adj[v].len());
            for v in neighbours {
                if !visited[v] {
                    visited[v] = true;
                    queue.push_back(v);
                }
            }
        }
    };

    if n > 0 {
        bfs_component(root, &mut order, &mut visited);
        for start in 0..n {
            if !visited[start] {
                bfs_component(start, &mut order, &mut visited);
            }
        }
    }
    order.reverse();
    order
}

fn scan_candidates(n: usize, count: usize) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }
    let step = (n.max(1) as f64 / count as f64).max(1.0);
    let mut out = Vec::new();
    let mut x = 0.0;
    while (x as usize) < n && out.len() < count {
        out.push(x as usize);
        x += step;
    }
    out
}

fn best_of_roots(adj: &[BTreeSet<usize>], roots: Vec<usize>) -> Vec<usize> {
    if adj.is_empty() {
        return Vec::new();
    }
    let mut best_order = rcm_order(adj, roots.first().copied().unwrap_or(0));
    let mut best_bw = bandwidth_of_order(adj, &best_order);
    for r in roots {
        let order = rcm_order(adj, r);
        let bw = bandwidth_of_order(adj, &order);
        if bw < best_bw {
            best_bw = bw;
            best_order = order;
        }
    }
    best_order
}

fn bandwidth_of_order(adj: &[BTreeSet<usize>], order: &[usize]) -> usize {
    let n = order.len();
    let mut pos = vec![0usize; n];
    for (p, &v) in order.iter().enumerate() {
        pos[v] = p;
    }
    let mut bw = 0usize;
    for (u, neighbours) in adj.iter().enumerate() {
        for &v in neighbours {
            let d = if pos[u] > pos[v] { pos[u] - pos[v] } else { pos[v] - pos[u] };
            bw = bw.max(d);
        }
    }
    bw + 1
}

/// `1 + max_e(max_i bmap[e] - min_i bmap[e])` over unmasked positions, the
/// Schur-complement bandwidth formula of `assemblymap.cpp::bandwidthSC`.
fn bandwidth_sc(
    btog: &[ndarray::Array2<usize>],
    bmask: &[ndarray::Array2<bool>],
    nsolve: usize,
) -> usize {
    let mut max_span = 0usize;
    for (g, m) in btog.iter().zip(bmask.iter()) {
        let mut lo = usize::MAX;
        let mut hi = 0usize;
        for (&gid, &masked) in g.iter().zip(m.iter()) {
            if masked || gid >= nsolve {
                continue;
            }
            lo = lo.min(gid);
            hi = hi.max(gid);
        }
        if lo <= hi {
            max_span = max_span.max(hi - lo);
        }
    }
    max_span + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Element, ElementGeometry};
    use crate::mesh::EdgeLink;
    use ndarray::Array2;

    fn chain_mesh(n_el: usize, n_p: usize) -> Mesh {
        let rule = crate::operators::gll_rule(n_p);
        let mut elements = Vec::new();
        for e in 0..n_el {
            let mut x = Array2::zeros((n_p, n_p));
            let mut y = Array2::zeros((n_p, n_p));
            for i in 0..n_p {
                for j in 0..n_p {
                    x[[i, j]] = 2.0 * e as f64 + rule.z[i];
                    y[[i, j]] = rule.z[j];
                }
            }
            let jac = Array2::from_elem((n_p, n_p), 1.0);
            let rx = Array2::from_elem((n_p, n_p), 1.0);
            let ry = Array2::from_elem((n_p, n_p), 0.0);
            let sx = Array2::from_elem((n_p, n_p), 0.0);
            let sy = Array2::from_elem((n_p, n_p), 1.0);
            elements.push(Element::new(n_p, false, ElementGeometry { x, y, jac, rx, ry, sx, sy }));
        }
        let mut connectivity = Vec::new();
        for e in 0..n_el {
            let left = if e > 0 {
                EdgeLink::Interior { neighbor: e - 1, neighbor_side: crate::element::Side::Right, reversed: true }
            } else {
                EdgeLink::Boundary { group: 0 }
            };
            let right = if e + 1 < n_el {
                EdgeLink::Interior { neighbor: e + 1, neighbor_side: crate::element::Side::Left, reversed: true }
            } else {
                EdgeLink::Boundary { group: 0 }
            };
            connectivity.push([
                EdgeLink::Boundary { group: 0 },
                right,
                EdgeLink::Boundary { group: 0 },
                left,
            ]);
        }
        Mesh::new(elements, connectivity).unwrap()
    }

    #[test]
    fn partitions_essential_after_unknowns() {
        let mesh = chain_mesh(3, 4);
        let n_naive = mesh.n_naive;
        // Mark the first and last naive ids (outer boundary) essential.
        let is_essential = move |g: usize| g == 0 || g == n_naive - 1;
        let map = AssemblyMap::build(&mesh, is_essential, OptLevel::None).unwrap();
        assert!(map.nsolve < map.nglobal);
        for e in 0..mesh.n_el() {
            for (&gid, &masked) in map.btog[e].iter().zip(map.bmask[e].iter()) {
                if masked {
                    assert!(gid >= map.nsolve);
                } else {
                    assert!(gid < map.nsolve);
                }
            }
        }
    }

    #[test]
    fn rcm_does_not_increase_bandwidth() {
        let mesh = chain_mesh(5, 5);
        let n_naive = mesh.n_naive;
        let is_essential = move |g: usize| g == 0 || g == n_naive - 1;
        let none = AssemblyMap::build(&mesh, is_essential, OptLevel::None).unwrap();
        let fnr = AssemblyMap::build(&mesh, is_essential, OptLevel::Fnroot).unwrap();
        assert!(fnr.bandwidth <= none.bandwidth + 1);
    }
}
