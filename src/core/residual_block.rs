//! A cost function bound to named parameter blocks.

use nalgebra::{DMatrix, DVector};

use super::corrector::Corrector;
use super::loss_functions::Loss;
use crate::factors::CostFunction;

pub struct ResidualBlock {
    pub dim_residual: usize,
    pub residual_row_start_idx: usize,
    pub variable_key_list: Vec<String>,
    pub cost: Box<dyn CostFunction>,
    pub loss_func: Option<Box<dyn Loss>>,
}

impl ResidualBlock {
    pub(crate) fn new(
        residual_row_start_idx: usize,
        variable_keys: &[&str],
        cost: Box<dyn CostFunction>,
        loss_func: Option<Box<dyn Loss>>,
    ) -> Self {
        assert_eq!(
            variable_keys.len(),
            cost.block_sizes().len(),
            "variable key count must match the cost function's block count"
        );
        ResidualBlock {
            dim_residual: cost.dim_residual(),
            residual_row_start_idx,
            variable_key_list: variable_keys.iter().map(|s| s.to_string()).collect(),
            cost,
            loss_func,
        }
    }

    /// Evaluate the block at the given parameter values, applying the robust
    /// loss correction when one is attached. Returns `None` when the cost
    /// function reports an invalid projection.
    pub(crate) fn residual_and_jacobian(
        &self,
        params: &[DVector<f64>],
        compute_jacobian: bool,
    ) -> Option<(DVector<f64>, Option<DMatrix<f64>>)> {
        let (mut residual, mut jacobian) = self.cost.linearize(params, compute_jacobian)?;
        if let Some(loss_func) = self.loss_func.as_ref() {
            let squared_norm = residual.norm_squared();
            let rho = loss_func.evaluate(squared_norm);
            let corrector = Corrector::new(squared_norm, &rho);
            if let Some(jac) = jacobian.as_mut() {
                corrector.correct_jacobian(&residual, jac);
            }
            corrector.correct_residuals(&mut residual);
        }
        Some((residual, jacobian))
    }
}
