//! Compressed-row sparse matrices and a Jacobi-preconditioned conjugate
//! gradient solver, sized for the symmetric Laplacian systems of Poisson
//! blending.

/// Square matrix in compressed sparse row layout.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    n: usize,
    row_ptr: Vec<usize>,
    cols: Vec<usize>,
    values: Vec<f64>,
}

impl CsrMatrix {
    /// Empty `n x n` matrix ready to receive rows in order.
    pub fn with_capacity(n: usize, nnz: usize) -> Self {
        let mut row_ptr = Vec::with_capacity(n + 1);
        row_ptr.push(0);
        Self {
            n,
            row_ptr,
            cols: Vec::with_capacity(nnz),
            values: Vec::with_capacity(nnz),
        }
    }

    /// Append the next row. Rows must be pushed in index order.
    pub fn push_row(&mut self, entries: &[(usize, f64)]) {
        for &(col, value) in entries {
            self.cols.push(col);
            self.values.push(value);
        }
        self.row_ptr.push(self.cols.len());
    }

    /// Number of rows pushed so far.
    pub fn rows(&self) -> usize {
        self.row_ptr.len() - 1
    }

    pub fn dim(&self) -> usize {
        self.n
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// `out = A * x`.
    pub fn mul_vec(&self, x: &[f64], out: &mut [f64]) {
        for (row, slot) in out.iter_mut().enumerate().take(self.rows()) {
            let (start, end) = (self.row_ptr[row], self.row_ptr[row + 1]);
            *slot = self.cols[start..end]
                .iter()
                .zip(&self.values[start..end])
                .map(|(&c, &v)| v * x[c])
                .sum();
        }
    }

    /// Main diagonal; missing entries are zero.
    pub fn diagonal(&self) -> Vec<f64> {
        let mut diag = vec![0.0; self.n];
        for (row, d) in diag.iter_mut().enumerate().take(self.rows()) {
            for k in self.row_ptr[row]..self.row_ptr[row + 1] {
                if self.cols[k] == row {
                    *d += self.values[k];
                }
            }
        }
        diag
    }
}

/// Result of a conjugate gradient run.
#[derive(Debug, Clone)]
pub struct CgOutcome {
    pub solution: Vec<f64>,
    pub iterations: usize,
    /// Final residual norm relative to `|b|`.
    pub relative_residual: f64,
    pub converged: bool,
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Solve `A x = b` for symmetric positive (semi-)definite `A`, starting from
/// `x0`, until `|r| <= tolerance * |b|` or `max_iterations` is reached.
pub fn conjugate_gradient(a: &CsrMatrix, b: &[f64], x0: Vec<f64>, max_iterations: usize, tolerance: f64) -> CgOutcome {
    let n = b.len();
    let mut x = x0;
    x.resize(n, 0.0);

    let b_norm = dot(b, b).sqrt().max(f64::MIN_POSITIVE);
    let inv_diag: Vec<f64> = a
        .diagonal()
        .into_iter()
        .map(|d| if d.abs() > f64::EPSILON { 1.0 / d } else { 1.0 })
        .collect();

    let mut ax = vec![0.0; n];
    a.mul_vec(&x, &mut ax);
    let mut r: Vec<f64> = b.iter().zip(&ax).map(|(bi, ai)| bi - ai).collect();
    let mut z: Vec<f64> = r.iter().zip(&inv_diag).map(|(ri, di)| ri * di).collect();
    let mut p = z.clone();
    let mut rz = dot(&r, &z);
    let mut ap = vec![0.0; n];

    let mut residual = dot(&r, &r).sqrt() / b_norm;
    let mut iterations = 0;

    while residual > tolerance && iterations < max_iterations {
        a.mul_vec(&p, &mut ap);
        let pap = dot(&p, &ap);
        if pap.abs() <= f64::MIN_POSITIVE {
            break;
        }
        let alpha = rz / pap;
        for i in 0..n {
            x[i] += alpha * p[i];
            r[i] -= alpha * ap[i];
        }
        iterations += 1;
        residual = dot(&r, &r).sqrt() / b_norm;
        if residual <= tolerance {
            break;
        }

        for i in 0..n {
            z[i] = r[i] * inv_diag[i];
        }
        let rz_next = dot(&r, &z);
        let beta = rz_next / rz;
        rz = rz_next;
        for i in 0..n {
            p[i] = z[i] + beta * p[i];
        }
    }

    CgOutcome {
        solution: x,
        iterations,
        relative_residual: residual,
        converged: residual <= tolerance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 1-D Laplacian with Dirichlet ends: tridiagonal (-1, 2, -1).
    fn laplacian_1d(n: usize) -> CsrMatrix {
        let mut m = CsrMatrix::with_capacity(n, 3 * n);
        for i in 0..n {
            let mut row = Vec::new();
            if i > 0 {
                row.push((i - 1, -1.0));
            }
            row.push((i, 2.0));
            if i + 1 < n {
                row.push((i + 1, -1.0));
            }
            m.push_row(&row);
        }
        m
    }

    #[test]
    fn test_mul_vec_and_diagonal() {
        let m = laplacian_1d(4);
        assert_eq!(m.dim(), 4);
        assert_eq!(m.nnz(), 10);
        assert_eq!(m.diagonal(), vec![2.0; 4]);
        let mut out = vec![0.0; 4];
        m.mul_vec(&[1.0, 1.0, 1.0, 1.0], &mut out);
        assert_eq!(out, vec![1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_cg_solves_tridiagonal_system() {
        let n = 50;
        let m = laplacian_1d(n);
        let expected: Vec<f64> = (0..n).map(|i| (i as f64 * 0.3).sin() * 10.0).collect();
        let mut b = vec![0.0; n];
        m.mul_vec(&expected, &mut b);

        let out = conjugate_gradient(&m, &b, vec![0.0; n], 500, 1e-10);
        assert!(out.converged, "residual {}", out.relative_residual);
        for (got, want) in out.solution.iter().zip(&expected) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[test]
    fn test_cg_exact_start_needs_no_iterations() {
        let m = laplacian_1d(5);
        let x: Vec<f64> = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let mut b = vec![0.0; 5];
        m.mul_vec(&x, &mut b);
        let out = conjugate_gradient(&m, &b, x.clone(), 100, 1e-9);
        assert!(out.converged);
        assert_eq!(out.iterations, 0);
        assert_eq!(out.solution, x);
    }

    #[test]
    fn test_cg_iteration_cap() {
        let n = 200;
        let m = laplacian_1d(n);
        let b = vec![1.0; n];
        let out = conjugate_gradient(&m, &b, vec![0.0; n], 3, 1e-12);
        assert!(!out.converged);
        assert_eq!(out.iterations, 3);
    }
}
