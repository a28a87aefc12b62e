//! `AuxField`: one named scalar quantity held in physical space as
//! `n_z_local` planes of `n_el` elements of `n_p x n_p` nodes (spec §3),
//! generalising the teacher's per-quantity `Field2`/`vhat` storage to a
//! mesh of elements rather than a single global tensor-product grid.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use ndarray::{Array2, Zip};
use ndrustfft::{ndfft_r2c, ndifft_r2c, R2cFftHandler};
use num_complex::Complex;

use crate::error::{alert, Result, Severity};
use crate::geometry::Geometry;
use crate::mesh::Mesh;

/// Cache of real-FFT plans keyed on transform length, matching the
/// process-wide memoisation pattern used in [`crate::operators`].
static FFT_CACHE: OnceLock<Mutex<HashMap<usize, R2cFftHandler<f64>>>> = OnceLock::new();

fn with_fft_plan<F, R>(n: usize, f: F) -> R
where
    F: FnOnce(&mut R2cFftHandler<f64>) -> R,
{
    let cache = FFT_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let mut guard = cache.lock().unwrap();
    let plan = guard.entry(n).or_insert_with(|| R2cFftHandler::<f64>::new(n));
    f(plan)
}

#[derive(Debug, Clone)]
pub struct AuxField {
    pub name: char,
    /// `data[[z, p]]`, `p` in `0..plane_size`, each element occupying a
    /// contiguous `n_p*n_p` block within the plane (spec §4.1/§4.6).
    pub data: Array2<f64>,
    pub n_p: usize,
    pub n_el: usize,
    pub plane_size: usize,
    /// False: physical space along z. True: Fourier-coefficient space
    /// (real/imaginary interleaved per mode, semtex's packed real layout).
    pub transformed: bool,
}

impl AuxField {
    pub fn zeros(name: char, geom: &Geometry) -> Self {
        AuxField {
            name,
            data: Array2::zeros((geom.n_z_local, geom.plane_size())),
            n_p: geom.n_p,
            n_el: geom.n_el,
            plane_size: geom.plane_size(),
            transformed: false,
        }
    }

    fn offset(&self, e: usize) -> usize {
        e * self.n_p * self.n_p
    }

    /// Copy out the `(n_p, n_p)` nodal block for element `e`, plane `z`.
    pub fn element_slice(&self, z: usize, e: usize) -> Array2<f64> {
        let off = self.offset(e);
        let np2 = self.n_p * self.n_p;
        let flat = self.data.row(z).slice(ndarray::s![off..off + np2]).to_owned();
        flat.into_shape((self.n_p, self.n_p)).unwrap()
    }

    /// Write a `(n_p, n_p)` nodal block back into element `e`, plane `z`.
    pub fn set_element_slice(&mut self, z: usize, e: usize, block: &Array2<f64>) {
        let off = self.offset(e);
        let np2 = self.n_p * self.n_p;
        let flat = block.clone().into_shape(np2).unwrap();
        self.data.row_mut(z).slice_mut(ndarray::s![off..off + np2]).assign(&flat);
    }

    /// `self = alpha`.
    pub fn fill(&mut self, alpha: f64) {
        self.data.fill(alpha);
    }

    /// `self += rhs`.
    pub fn add_assign(&mut self, rhs: &AuxField) {
        self.data += &rhs.data;
    }

    /// `self -= rhs`.
    pub fn sub_assign(&mut self, rhs: &AuxField) {
        self.data -= &rhs.data;
    }

    /// `self *= alpha`.
    pub fn scale(&mut self, alpha: f64) {
        self.data *= alpha;
    }

    /// `self /= alpha`.
    pub fn scale_inv(&mut self, alpha: f64) {
        self.data /= alpha;
    }

    /// `self = self .* rhs` (elementwise).
    pub fn times(&mut self, rhs: &AuxField) {
        self.data *= &rhs.data;
    }

    /// `self += alpha * rhs`.
    pub fn axpy(&mut self, alpha: f64, rhs: &AuxField) {
        Zip::from(&mut self.data).and(&rhs.data).for_each(|s, &r| *s += alpha * r);
    }

    /// `self += a .* b` (elementwise product of two other fields).
    pub fn times_plus(&mut self, a: &AuxField, b: &AuxField) {
        Zip::from(&mut self.data).and(&a.data).and(&b.data).for_each(|s, &x, &y| *s += x * y);
    }

    /// `self -= a .* b`.
    pub fn times_minus(&mut self, a: &AuxField, b: &AuxField) {
        Zip::from(&mut self.data).and(&a.data).and(&b.data).for_each(|s, &x, &y| *s -= x * y);
    }

    /// Physical-space gradient along direction `dir` (0 = x, 1 = y),
    /// computed element-by-element through the mesh's metric.
    pub fn gradient(&self, dir: usize, mesh: &Mesh) -> Result<AuxField> {
        if self.transformed {
            alert(
                "AuxField::gradient",
                "gradient requires physical-space data",
                Severity::Error,
            )?;
        }
        let mut out = self.clone();
        for z in 0..self.data.nrows() {
            for e in 0..self.n_el {
                let block = self.element_slice(z, e);
                let g = mesh.elements[e].gradient(&block, dir);
                out.set_element_slice(z, e, &g);
            }
        }
        Ok(out)
    }

    /// Divide by the radial coordinate y (cylindrical forms).
    pub fn div_y(&self, mesh: &Mesh) -> AuxField {
        let mut out = self.clone();
        for z in 0..self.data.nrows() {
            for e in 0..self.n_el {
                let block = self.element_slice(z, e);
                let d = mesh.elements[e].div_y(&block);
                out.set_element_slice(z, e, &d);
            }
        }
        out
    }

    /// Multiply by the radial coordinate y.
    pub fn mul_y(&self, mesh: &Mesh) -> AuxField {
        let mut out = self.clone();
        for z in 0..self.data.nrows() {
            for e in 0..self.n_el {
                let block = self.element_slice(z, e);
                let m = mesh.elements[e].mul_y(&block);
                out.set_element_slice(z, e, &m);
            }
        }
        out
    }

    /// Mass-weighted L2 inner product, summed over planes and elements.
    pub fn inner_product(&self, rhs: &AuxField, mesh: &Mesh) -> f64 {
        let mut acc = 0.0;
        for z in 0..self.data.nrows() {
            for e in 0..self.n_el {
                let a = self.element_slice(z, e);
                let b = rhs.element_slice(z, e);
                let m = &mesh.elements[e].mass;
                acc += Zip::from(&a).and(&b).and(m).fold(0.0, |s, &x, &y, &w| s + x * y * w);
            }
        }
        acc
    }

    /// Toggle between physical planes (`sign < 0`) and packed real/imag
    /// Fourier coefficients along z (`sign > 0`), via a real-input FFT
    /// plan cached by transform length (spec §4.6).
    pub fn transform(&mut self, sign: i32) -> Result<()> {
        let nz = self.data.nrows();
        if nz <= 1 {
            return Ok(());
        }
        let routine = "AuxField::transform";
        if sign > 0 {
            if self.transformed {
                alert(routine, "already in transformed space", Severity::Warning)?;
                return Ok(());
            }
            let np = self.n_p; // silence unused in some configs; kept for symmetry
            let _ = np;
            let nc = nz / 2 + 1;
            let mut packed = Array2::<f64>::zeros((nz, self.plane_size));
            for col in 0..self.plane_size {
                let input = self.data.column(col).to_owned();
                let mut out = ndarray::Array1::<Complex<f64>>::zeros(nc);
                with_fft_plan(nz, |plan| ndfft_r2c(&input, &mut out, plan, 0));
                for (k, c) in out.iter().enumerate() {
                    if 2 * k < nz {
                        packed[[2 * k, col]] = c.re;
                    }
                    if 2 * k + 1 < nz {
                        packed[[2 * k + 1, col]] = c.im;
                    }
                }
            }
            self.data = packed;
            self.transformed = true;
        } else {
            if !self.transformed {
                alert(routine, "already in physical space", Severity::Warning)?;
                return Ok(());
            }
            let nc = nz / 2 + 1;
            let mut physical = Array2::<f64>::zeros((nz, self.plane_size));
            for col in 0..self.plane_size {
                let mut coeffs = ndarray::Array1::<Complex<f64>>::zeros(nc);
                for k in 0..nc {
                    let re = if 2 * k < nz { self.data[[2 * k, col]] } else { 0.0 };
                    let im = if 2 * k + 1 < nz { self.data[[2 * k + 1, col]] } else { 0.0 };
                    coeffs[k] = Complex::new(re, im);
                }
                let mut out = ndarray::Array1::<f64>::zeros(nz);
                with_fft_plan(nz, |plan| ndifft_r2c(&coeffs, &mut out, plan, 0));
                physical.column_mut(col).assign(&out);
            }
            self.data = physical;
            self.transformed = false;
        }
        Ok(())
    }
}

impl std::ops::AddAssign<&AuxField> for AuxField {
    fn add_assign(&mut self, rhs: &AuxField) {
        AuxField::add_assign(self, rhs)
    }
}

impl std::ops::SubAssign<&AuxField> for AuxField {
    fn sub_assign(&mut self, rhs: &AuxField) {
        AuxField::sub_assign(self, rhs)
    }
}

impl std::ops::MulAssign<f64> for AuxField {
    fn mul_assign(&mut self, alpha: f64) {
        self.scale(alpha)
    }
}

impl std::ops::DivAssign<f64> for AuxField {
    fn div_assign(&mut self, alpha: f64) {
        self.scale_inv(alpha)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Element, ElementGeometry};
    use crate::geometry::{CoordSys, SymmetryClass};
    use crate::mesh::EdgeLink;
    use ndarray::Array2 as A2;

    fn single_element_mesh(n_p: usize) -> Mesh {
        let rule = crate::operators::gll_rule(n_p);
        let mut x = A2::zeros((n_p, n_p));
        let mut y = A2::zeros((n_p, n_p));
        for i in 0..n_p {
            for j in 0..n_p {
                x[[i, j]] = rule.z[i];
                y[[i, j]] = rule.z[j];
            }
        }
        let jac = A2::from_elem((n_p, n_p), 1.0);
        let rx = A2::from_elem((n_p, n_p), 1.0);
        let ry = A2::from_elem((n_p, n_p), 0.0);
        let sx = A2::from_elem((n_p, n_p), 0.0);
        let sy = A2::from_elem((n_p, n_p), 1.0);
        let el = Element::new(n_p, false, ElementGeometry { x, y, jac, rx, ry, sx, sy });
        Mesh::new(
            vec![el],
            vec![[
                EdgeLink::Boundary { group: 0 },
                EdgeLink::Boundary { group: 0 },
                EdgeLink::Boundary { group: 0 },
                EdgeLink::Boundary { group: 0 },
            ]],
        )
        .unwrap()
    }

    #[test]
    fn arithmetic_roundtrip() {
        let geom = Geometry::new(4, 1, 1, 1, CoordSys::Cartesian, SymmetryClass::TwoDTwoC, false).unwrap();
        let mut a = AuxField::zeros('u', &geom);
        a.fill(2.0);
        let mut b = AuxField::zeros('v', &geom);
        b.fill(3.0);
        a.add_assign(&b);
        assert!(a.data.iter().all(|&v| (v - 5.0).abs() < 1e-12));
        a.times(&b);
        assert!(a.data.iter().all(|&v| (v - 15.0).abs() < 1e-12));
    }

    #[test]
    fn gradient_of_linear_field() {
        let mesh = single_element_mesh(6);
        let geom = Geometry::new(6, 1, 1, 1, CoordSys::Cartesian, SymmetryClass::TwoDTwoC, false).unwrap();
        let mut f = AuxField::zeros('u', &geom);
        let block = mesh.elements[0].x.clone();
        f.set_element_slice(0, 0, &block);
        let g = f.gradient(0, &mesh).unwrap();
        let gb = g.element_slice(0, 0);
        assert!(gb.iter().all(|&v| (v - 1.0).abs() < 1e-8));
    }

    #[test]
    fn transform_round_trip_is_identity() {
        let geom = Geometry::new(4, 1, 8, 1, CoordSys::Cartesian, SymmetryClass::TwoDThreeC, false).unwrap();
        let mut f = AuxField::zeros('u', &geom);
        for z in 0..8 {
            f.data.row_mut(z).fill(z as f64);
        }
        let original = f.data.clone();
        f.transform(1).unwrap();
        assert!(f.transformed);
        f.transform(-1).unwrap();
        assert!(!f.transformed);
        for (a, b) in f.data.iter().zip(original.iter()) {
            assert!((a - b).abs() < 1e-8);
        }
    }
}
