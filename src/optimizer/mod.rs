//! Optimization of nonlinear least-squares problems.
//!
//! The single solver is [`LevenbergMarquardt`], a damped Gauss-Newton
//! iteration over the dense normal equations with adaptive damping and the
//! linear backends of [`crate::linalg`].

use std::collections::HashMap;
use std::fmt;

use nalgebra::DVector;

pub mod levenberg_marquardt;

pub use crate::linalg::LinearSolverType;
pub use levenberg_marquardt::LevenbergMarquardt;

/// Configuration of a solve.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Maximum number of outer iterations.
    pub max_iterations: usize,
    /// Relative cost-change threshold for convergence.
    pub cost_tolerance: f64,
    /// Step-norm threshold for convergence.
    pub parameter_tolerance: f64,
    /// Gradient-norm threshold for convergence.
    pub gradient_tolerance: f64,
    /// Linear solver for the damped normal equations.
    pub linear_solver: LinearSolverType,
    /// Log per-iteration diagnostics at debug level.
    pub verbose: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            max_iterations: 50,
            cost_tolerance: 1e-10,
            parameter_tolerance: 1e-12,
            gradient_tolerance: 1e-10,
            linear_solver: LinearSolverType::DenseCholesky,
            verbose: false,
        }
    }
}

impl OptimizerConfig {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_linear_solver(mut self, linear_solver: LinearSolverType) -> Self {
        self.linear_solver = linear_solver;
        self
    }
}

/// Why the iteration stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimizationStatus {
    /// Maximum number of iterations reached
    MaxIterationsReached,
    /// Cost change dropped below the tolerance
    CostToleranceReached,
    /// Step norm dropped below the tolerance
    ParameterToleranceReached,
    /// Gradient norm dropped below the tolerance
    GradientToleranceReached,
}

impl OptimizationStatus {
    /// Whether the status indicates convergence rather than a budget stop.
    pub fn converged(&self) -> bool {
        !matches!(self, OptimizationStatus::MaxIterationsReached)
    }
}

impl fmt::Display for OptimizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationStatus::MaxIterationsReached => write!(f, "maximum iterations reached"),
            OptimizationStatus::CostToleranceReached => write!(f, "cost tolerance reached"),
            OptimizationStatus::ParameterToleranceReached => {
                write!(f, "parameter tolerance reached")
            }
            OptimizationStatus::GradientToleranceReached => {
                write!(f, "gradient tolerance reached")
            }
        }
    }
}

/// Result of a solve: the final parameter values plus statistics.
///
/// Constant blocks are returned bit-identical to their input values.
#[derive(Debug, Clone)]
pub struct SolverResult {
    pub variables: HashMap<String, DVector<f64>>,
    pub status: OptimizationStatus,
    pub initial_cost: f64,
    pub final_cost: f64,
    pub iterations: usize,
}

impl fmt::Display for SolverResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} after {} iterations, cost {:.6e} -> {:.6e}",
            self.status, self.iterations, self.initial_cost, self.final_cost
        )
    }
}
