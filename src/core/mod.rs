//! Nonlinear least-squares problem construction.
//!
//! A [`Problem`](problem::Problem) is a set of residual blocks, each pairing
//! a [`CostFunction`](crate::factors::CostFunction) with the names of the
//! parameter blocks it touches and an optional robust
//! [`Loss`](loss_functions::Loss). Parameter values live in a map owned by
//! the caller for the duration of a solve; blocks can be marked constant, and
//! blocks named `pt_*` of size 3 are treated as landmarks by the dense Schur
//! solver.

pub mod corrector;
pub mod loss_functions;
pub mod problem;
pub mod residual_block;

pub use loss_functions::{CauchyLoss, HuberLoss, Loss};
pub use problem::{ColumnLayout, Problem};
