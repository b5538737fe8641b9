//! Levenberg-Marquardt algorithm over dense normal equations.
//!
//! The implementation interpolates between Gauss-Newton and gradient descent
//! through an adaptive damping parameter scaled by the clamped Hessian
//! diagonal. Step acceptance follows the usual gain-ratio test: the actual
//! cost reduction is compared against the reduction predicted by the local
//! quadratic model, damping shrinks after good steps and doubles after
//! rejected ones.

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use super::{OptimizationStatus, OptimizerConfig, SolverResult};
use crate::core::problem::{ColumnLayout, Problem};
use crate::error::{Error, Result};
use crate::linalg;

/// Levenberg-Marquardt solver for nonlinear least squares.
pub struct LevenbergMarquardt {
    config: OptimizerConfig,
    damping: f64,
    damping_min: f64,
    damping_max: f64,
    min_diagonal: f64,
    max_diagonal: f64,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self::new()
    }
}

impl LevenbergMarquardt {
    /// Create a solver with the default configuration.
    pub fn new() -> Self {
        Self::with_config(OptimizerConfig::default())
    }

    /// Create a solver with the given configuration.
    pub fn with_config(config: OptimizerConfig) -> Self {
        LevenbergMarquardt {
            config,
            damping: 1e-4,
            damping_min: 1e-12,
            damping_max: 1e12,
            min_diagonal: 1e-6,
            max_diagonal: 1e32,
        }
    }

    /// Set the initial damping parameter.
    pub fn with_damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }

    fn cost_of(residual: &DVector<f64>) -> f64 {
        0.5 * residual.norm_squared()
    }

    fn apply_step(
        variables: &HashMap<String, DVector<f64>>,
        step: &DVector<f64>,
        layout: &ColumnLayout,
    ) -> HashMap<String, DVector<f64>> {
        let mut updated = variables.clone();
        for (name, &size) in layout.order.iter().zip(&layout.sizes) {
            let offset = layout.offsets[name];
            let value = updated.get_mut(name).expect("laid-out block exists");
            for i in 0..size {
                value[i] += step[offset + i];
            }
        }
        updated
    }

    /// Minimize the problem starting from `initial`.
    ///
    /// Returns [`Error::SolverFailed`] when the initial point does not
    /// evaluate to a finite cost, when the linear solver cannot make progress
    /// at maximum damping, or when an accepted step leads to a non-finite
    /// state. Constant blocks are passed through untouched.
    pub fn solve(
        &mut self,
        problem: &Problem,
        initial: &HashMap<String, DVector<f64>>,
    ) -> Result<SolverResult> {
        let layout = problem.column_layout(initial)?;
        if layout.total_cols == 0 {
            return Err(Error::InvalidInput(
                "problem has no free parameter blocks".to_string(),
            ));
        }

        let mut variables = initial.clone();
        let (mut residual, mut jacobian) =
            problem.compute_residual_and_jacobian(&variables, &layout)?;
        let mut cost = Self::cost_of(&residual);
        if !cost.is_finite() {
            return Err(Error::SolverFailed("initial cost is not finite".to_string()));
        }
        let initial_cost = cost;

        let mut status = OptimizationStatus::MaxIterationsReached;
        let mut iteration = 0;

        while iteration < self.config.max_iterations {
            iteration += 1;

            let gradient = jacobian.transpose() * &residual;
            let gradient_norm = gradient.norm();
            if gradient_norm < self.config.gradient_tolerance {
                status = OptimizationStatus::GradientToleranceReached;
                break;
            }

            let hessian = jacobian.transpose() * &jacobian;
            let mut damped = hessian.clone();
            for i in 0..layout.total_cols {
                let d = hessian[(i, i)].clamp(self.min_diagonal, self.max_diagonal);
                damped[(i, i)] += self.damping * d;
            }

            let step = linalg::solve(
                self.config.linear_solver,
                &damped,
                &(-&gradient),
                layout.camera_cols,
            );
            let Some(step) = step else {
                if !self.increase_damping() {
                    return Err(Error::SolverFailed(
                        "linear solver failed at maximum damping".to_string(),
                    ));
                }
                continue;
            };

            let trial = Self::apply_step(&variables, &step, &layout);
            let trial_cost = match problem.compute_residuals(&trial) {
                Ok(trial_residual) => Self::cost_of(&trial_residual),
                // a step that walks out of the valid projection domain is
                // treated like any uphill step
                Err(Error::ProjectionInvalid) => f64::INFINITY,
                Err(e) => return Err(e),
            };

            let predicted = self.predicted_reduction(&step, &gradient, &hessian);
            let rho = self.step_quality(cost, trial_cost, predicted);

            if self.config.verbose {
                debug!(
                    iteration,
                    cost,
                    trial_cost,
                    damping = self.damping,
                    gradient_norm,
                    rho,
                    "LM iteration"
                );
            }

            if rho > 0.0 && trial_cost.is_finite() {
                let cost_change = cost - trial_cost;
                let step_norm = step.norm();
                variables = trial;
                cost = trial_cost;

                // shrink damping by the gain-ratio polynomial
                let tmp = 2.0 * rho - 1.0;
                self.damping *= (1.0_f64 / 3.0).max(1.0 - tmp * tmp * tmp);
                self.damping = self.damping.max(self.damping_min);

                let (new_residual, new_jacobian) =
                    problem.compute_residual_and_jacobian(&variables, &layout)?;
                residual = new_residual;
                jacobian = new_jacobian;

                if cost_change.abs() < self.config.cost_tolerance * (1.0 + cost) {
                    status = OptimizationStatus::CostToleranceReached;
                    break;
                }
                if step_norm < self.config.parameter_tolerance {
                    status = OptimizationStatus::ParameterToleranceReached;
                    break;
                }
            } else if !self.increase_damping() {
                return Err(Error::SolverFailed(
                    "no acceptable step at maximum damping".to_string(),
                ));
            }
        }

        if !cost.is_finite() {
            return Err(Error::SolverFailed("final cost is not finite".to_string()));
        }

        Ok(SolverResult {
            variables,
            status,
            initial_cost,
            final_cost: cost,
            iterations: iteration,
        })
    }

    /// Double the damping; false once the maximum is exceeded.
    fn increase_damping(&mut self) -> bool {
        if self.damping >= self.damping_max {
            return false;
        }
        self.damping = (self.damping * 2.0).min(self.damping_max);
        true
    }

    fn predicted_reduction(
        &self,
        step: &DVector<f64>,
        gradient: &DVector<f64>,
        hessian: &DMatrix<f64>,
    ) -> f64 {
        let linear = step.dot(gradient);
        let quadratic = step.dot(&(hessian * step));
        -linear - 0.5 * quadratic
    }

    fn step_quality(&self, cost: f64, trial_cost: f64, predicted: f64) -> f64 {
        let actual = cost - trial_cost;
        if predicted.abs() < 1e-15 {
            if actual > 0.0 { 1.0 } else { 0.0 }
        } else {
            actual / predicted
        }
    }
}
