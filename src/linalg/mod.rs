//! Dense linear solvers for the damped normal equations.
//!
//! Two backends: a plain dense Cholesky factorization, and a dense Schur
//! complement that eliminates the 3-dimensional landmark blocks first — the
//! standard reduction for structure-from-motion problems, where the
//! landmark-landmark part of the Hessian is block diagonal.

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

/// Linear solver used inside the Levenberg-Marquardt iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinearSolverType {
    /// Dense Cholesky factorization of the full system.
    #[default]
    DenseCholesky,
    /// Dense Schur complement over the trailing landmark columns.
    DenseSchur,
}

/// Solve `H·x = rhs` for a symmetric positive definite `H`.
///
/// Returns `None` when the factorization fails (indefinite or singular
/// system), which the optimizer treats as a rejected step.
pub fn solve_dense_cholesky(h: &DMatrix<f64>, rhs: &DVector<f64>) -> Option<DVector<f64>> {
    h.clone().cholesky().map(|chol| chol.solve(rhs))
}

/// Solve `H·x = rhs` by eliminating the landmark columns.
///
/// `camera_cols` is the number of leading columns belonging to poses and
/// intrinsics; every remaining column belongs to a 3-dimensional landmark
/// block, and no residual couples two landmarks, so the landmark-landmark
/// part `C` is block diagonal. The reduced camera system
/// `S = A − B·C⁻¹·Bᵀ` is solved by dense Cholesky and the landmark updates
/// are recovered by back-substitution.
pub fn solve_dense_schur(
    h: &DMatrix<f64>,
    rhs: &DVector<f64>,
    camera_cols: usize,
) -> Option<DVector<f64>> {
    let n = h.nrows();
    let p = camera_cols;
    let m = n - p;
    if m == 0 {
        return solve_dense_cholesky(h, rhs);
    }
    debug_assert_eq!(m % 3, 0, "landmark columns must come in 3-blocks");
    let num_landmarks = m / 3;

    // invert each 3×3 diagonal block of C
    let mut c_inv = Vec::with_capacity(num_landmarks);
    for k in 0..num_landmarks {
        let block: Matrix3<f64> = h.fixed_view::<3, 3>(p + 3 * k, p + 3 * k).into_owned();
        c_inv.push(block.try_inverse()?);
    }

    // landmark-only problem: the block-diagonal inverse is the whole solve
    if p == 0 {
        let mut x = DVector::zeros(n);
        for k in 0..num_landmarks {
            let r: Vector3<f64> = rhs.fixed_rows::<3>(3 * k).into_owned();
            x.rows_mut(3 * k, 3).copy_from(&(c_inv[k] * r));
        }
        return Some(x);
    }

    let a = h.view((0, 0), (p, p));
    let b = h.view((0, p), (p, m));
    let rhs_a = rhs.rows(0, p);
    let rhs_p = rhs.rows(p, m);

    // B·C⁻¹ assembled block column by block column
    let mut b_c_inv = DMatrix::zeros(p, m);
    for k in 0..num_landmarks {
        let b_block = b.view((0, 3 * k), (p, 3));
        b_c_inv
            .view_mut((0, 3 * k), (p, 3))
            .copy_from(&(b_block * c_inv[k]));
    }

    let s = a - &b_c_inv * b.transpose();
    let reduced_rhs = rhs_a - &b_c_inv * rhs_p;
    let x_cam = s.cholesky()?.solve(&reduced_rhs);

    // back-substitute the landmark blocks: x_p = C⁻¹(rhs_p − Bᵀ·x_cam)
    let mut x = DVector::zeros(n);
    x.rows_mut(0, p).copy_from(&x_cam);
    let bt_x = b.transpose() * &x_cam;
    for k in 0..num_landmarks {
        let r: Vector3<f64> = rhs_p.fixed_rows::<3>(3 * k) - bt_x.fixed_rows::<3>(3 * k);
        x.rows_mut(p + 3 * k, 3).copy_from(&(c_inv[k] * r));
    }
    Some(x)
}

/// Dispatch on the configured backend.
pub fn solve(
    solver: LinearSolverType,
    h: &DMatrix<f64>,
    rhs: &DVector<f64>,
    camera_cols: usize,
) -> Option<DVector<f64>> {
    match solver {
        LinearSolverType::DenseCholesky => solve_dense_cholesky(h, rhs),
        LinearSolverType::DenseSchur => solve_dense_schur(h, rhs, camera_cols),
    }
}
