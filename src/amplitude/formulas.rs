//! Closed-form determinant ratios and inverse corrections.
//!
//! `B` always denotes the current inverse `A⁻¹`. Every function here is pure
//! apart from the explicitly `&mut` inverse of the two Sherman–Morrison
//! corrections.

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

pub(crate) type CMatrix = DMatrix<Complex64>;
pub(crate) type CVector = DVector<Complex64>;

const ONE: Complex64 = Complex64::new(1.0, 0.0);
const ZERO: Complex64 = Complex64::new(0.0, 0.0);

/// Which single-rank step of a combined row + column hop is taken first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateOrder {
    RowFirst,
    ColumnFirst,
}

/// `det(A')/det(A) = e_kᵀ B u` for column `k` replaced by `u`.
pub(crate) fn column_ratio(inverse: &CMatrix, k: usize, u: &CVector) -> Complex64 {
    inverse.row(k).iter().zip(u.iter()).map(|(b, x)| b * x).sum()
}

/// `det(A')/det(A) = vᵀ B e_r` for row `r` replaced by `vᵀ`.
pub(crate) fn row_ratio(inverse: &CMatrix, r: usize, v: &CVector) -> Complex64 {
    inverse.column(r).iter().zip(v.iter()).map(|(b, x)| b * x).sum()
}

/// `vᵀ B u`
fn bilinear(inverse: &CMatrix, v: &CVector, u: &CVector) -> Complex64 {
    (inverse * u).iter().zip(v.iter()).map(|(bu, x)| bu * x).sum()
}

/// `B ← B − (B u − e_k)(e_kᵀ B) / ratio`
pub(crate) fn apply_column_update(inverse: &mut CMatrix, k: usize, u: &CVector, ratio: Complex64) {
    let mut w = &*inverse * u;
    w[k] -= ONE;
    let pivot_row = inverse.row(k).clone_owned();
    let n = inverse.nrows();
    for i in 0..n {
        let factor = w[i] / ratio;
        if factor == ZERO {
            continue;
        }
        for j in 0..n {
            inverse[(i, j)] -= factor * pivot_row[j];
        }
    }
}

/// `B ← B − (B e_r)(vᵀ B − e_rᵀ) / ratio`
pub(crate) fn apply_row_update(inverse: &mut CMatrix, r: usize, v: &CVector, ratio: Complex64) {
    let mut z = inverse.transpose() * v;
    z[r] -= ONE;
    let pivot_col = inverse.column(r).clone_owned();
    let n = inverse.nrows();
    for j in 0..n {
        let factor = z[j] / ratio;
        if factor == ZERO {
            continue;
        }
        for i in 0..n {
            inverse[(i, j)] -= pivot_col[i] * factor;
        }
    }
}

/// Ratio of a row `r` hop followed by a column `k` hop, as the 2×2 determinant
///
/// ```text
/// | e_kᵀBu              B_kr  |
/// | vᵀBu − u_r          vᵀBe_r |
/// ```
///
/// `v` is the new row under the old orbitals, `u` the new column under the
/// new sites, so `u[r]` is the element at the crossing. No division by the
/// intermediate ratio `vᵀBe_r` takes place.
pub(crate) fn row_then_column_ratio(
    inverse: &CMatrix,
    r: usize,
    k: usize,
    v: &CVector,
    u: &CVector,
) -> Complex64 {
    let first = row_ratio(inverse, r, v);
    let second = column_ratio(inverse, k, u);
    first * second - inverse[(k, r)] * (bilinear(inverse, v, u) - u[r])
}

/// Ratio of a column `k` hop followed by a row `r` hop, as the 2×2 determinant
///
/// ```text
/// | e_kᵀBu              B_kr  |
/// | vᵀBu − v_k          vᵀBe_r |
/// ```
///
/// `u` is the new column under the old sites, `v` the new row under the new
/// orbitals, so `v[k]` is the element at the crossing.
pub(crate) fn column_then_row_ratio(
    inverse: &CMatrix,
    r: usize,
    k: usize,
    u: &CVector,
    v: &CVector,
) -> Complex64 {
    let first = column_ratio(inverse, k, u);
    let second = row_ratio(inverse, r, v);
    first * second - inverse[(k, r)] * (bilinear(inverse, v, u) - v[k])
}

/// Simultaneous replacement of several rows and columns.
///
/// The final matrix is written `A + U Vᵀ` with `U = [E_R, Y]` and
/// `Vᵀ = [X; E_Kᵀ]`, where `Y` holds the full column differences and `X` the
/// row differences outside the replaced columns. Then
/// `det(A + U Vᵀ)/det(A) = det(M)`, `M = I + Vᵀ B U`, and the new inverse is
/// `B − B U M⁻¹ Vᵀ B`.
#[derive(Clone, Debug)]
pub(crate) struct BlockUpdate {
    rows: Vec<usize>,
    cols: Vec<usize>,
    new_rows: CMatrix,
    new_cols: CMatrix,
    x: CMatrix,
    y: CMatrix,
}

/// `M` together with the products it was assembled from.
struct Capacitance {
    m: CMatrix,
    xb: CMatrix,
    by: CMatrix,
}

impl BlockUpdate {
    /// `new_rows` is `p × N` (final rows `rows`), `new_cols` is `N × q`
    /// (final columns `cols`); they must agree where they cross.
    pub(crate) fn new(
        matrix: &CMatrix,
        rows: Vec<usize>,
        new_rows: CMatrix,
        cols: Vec<usize>,
        new_cols: CMatrix,
    ) -> Self {
        let n = matrix.ncols();
        let x = CMatrix::from_fn(rows.len(), n, |a, j| {
            if cols.contains(&j) {
                ZERO
            } else {
                new_rows[(a, j)] - matrix[(rows[a], j)]
            }
        });
        let y = CMatrix::from_fn(n, cols.len(), |i, b| new_cols[(i, b)] - matrix[(i, cols[b])]);
        Self { rows, cols, new_rows, new_cols, x, y }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.cols.is_empty()
    }

    fn capacitance(&self, inverse: &CMatrix) -> Capacitance {
        let (p, q) = (self.rows.len(), self.cols.len());
        let xb = &self.x * inverse;
        let by = inverse * &self.y;
        let xby = &self.x * &by;
        let m = CMatrix::from_fn(p + q, p + q, |a, c| {
            let delta = if a == c { ONE } else { ZERO };
            match (a < p, c < p) {
                (true, true) => delta + xb[(a, self.rows[c])],
                (true, false) => xby[(a, c - p)],
                (false, true) => inverse[(self.cols[a - p], self.rows[c])],
                (false, false) => delta + by[(self.cols[a - p], c - p)],
            }
        });
        Capacitance { m, xb, by }
    }

    /// `det(A_new)/det(A)`.
    pub(crate) fn ratio(&self, inverse: &CMatrix) -> Complex64 {
        if self.is_empty() {
            return ONE;
        }
        self.capacitance(inverse).m.determinant()
    }

    /// Woodbury inverse of the updated matrix, `None` if `M` is not invertible.
    pub(crate) fn updated_inverse(&self, inverse: &CMatrix) -> Option<CMatrix> {
        if self.is_empty() {
            return Some(inverse.clone());
        }
        let p = self.rows.len();
        let n = inverse.nrows();
        let Capacitance { m, xb, by } = self.capacitance(inverse);
        let m_inv = m.try_inverse()?;
        let bu = CMatrix::from_fn(n, m_inv.nrows(), |i, c| {
            if c < p {
                inverse[(i, self.rows[c])]
            } else {
                by[(i, c - p)]
            }
        });
        let vb = CMatrix::from_fn(m_inv.nrows(), n, |a, j| {
            if a < p {
                xb[(a, j)]
            } else {
                inverse[(self.cols[a - p], j)]
            }
        });
        Some(inverse - bu * m_inv * vb)
    }

    /// Writes the replaced rows and columns into `matrix`.
    pub(crate) fn apply_to(&self, matrix: &mut CMatrix) {
        for (a, &r) in self.rows.iter().enumerate() {
            matrix.set_row(r, &self.new_rows.row(a));
        }
        for (b, &k) in self.cols.iter().enumerate() {
            matrix.set_column(k, &self.new_cols.column(b));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    fn sample_matrix() -> CMatrix {
        CMatrix::from_fn(4, 4, |i, j| {
            let (fi, fj) = (i as f64, j as f64);
            c((1.3 * fi + 0.7 * fj).sin() + if i == j { 2.0 } else { 0.0 }, (0.4 * fi * fj).cos() - 0.5)
        })
    }

    fn max_abs(m: &CMatrix) -> f64 {
        m.iter().map(|z| z.norm()).fold(0.0, f64::max)
    }

    fn assert_close(a: Complex64, b: Complex64) {
        assert_relative_eq!(a.re, b.re, epsilon = 1e-10);
        assert_relative_eq!(a.im, b.im, epsilon = 1e-10);
    }

    #[test]
    fn test_sherman_morrison_column() {
        let a = sample_matrix();
        let mut inverse = a.clone().try_inverse().unwrap();
        let u = CVector::from_fn(4, |i, _| c(0.3 * i as f64 - 0.2, 0.1 + i as f64));
        let ratio = column_ratio(&inverse, 2, &u);

        let mut updated = a.clone();
        updated.set_column(2, &u);
        assert_close(ratio, updated.determinant() / a.determinant());

        apply_column_update(&mut inverse, 2, &u, ratio);
        let residual = max_abs(&(&updated * &inverse - CMatrix::identity(4, 4)));
        assert!(residual < 1e-10, "residual {residual}");
    }

    #[test]
    fn test_sherman_morrison_row() {
        let a = sample_matrix();
        let mut inverse = a.clone().try_inverse().unwrap();
        let v = CVector::from_fn(4, |j, _| c(1.0 - 0.25 * j as f64, -0.3 * j as f64));
        let ratio = row_ratio(&inverse, 1, &v);

        let mut updated = a.clone();
        updated.set_row(1, &v.transpose());
        assert_close(ratio, updated.determinant() / a.determinant());

        apply_row_update(&mut inverse, 1, &v, ratio);
        let residual = max_abs(&(&updated * &inverse - CMatrix::identity(4, 4)));
        assert!(residual < 1e-10, "residual {residual}");
    }

    #[test]
    fn test_block_update_matches_direct_inverse() {
        let a = sample_matrix();
        let inverse = a.clone().try_inverse().unwrap();
        let new_rows = CMatrix::from_fn(2, 4, |r, j| c(0.5 * r as f64 + 0.1 * j as f64, 0.2 - j as f64));
        let mut new_cols = CMatrix::from_fn(4, 1, |i, _| c(1.0 + 0.1 * i as f64, 0.3 * i as f64));
        // crossing elements must agree
        new_cols[(0, 0)] = new_rows[(0, 3)];
        new_cols[(2, 0)] = new_rows[(1, 3)];
        let block = BlockUpdate::new(&a, vec![0, 2], new_rows, vec![3], new_cols);

        let mut updated = a.clone();
        block.apply_to(&mut updated);
        assert_close(block.ratio(&inverse), updated.determinant() / a.determinant());

        let direct = updated.clone().try_inverse().unwrap();
        let woodbury = block.updated_inverse(&inverse).unwrap();
        assert!(max_abs(&(direct - woodbury)) < 1e-9);
    }
}
