//! Least-squares problem over named parameter blocks.

use std::collections::{HashMap, HashSet};

use nalgebra::{DMatrix, DVector};

use super::loss_functions::Loss;
use super::residual_block::ResidualBlock;
use crate::error::{Error, Result};
use crate::factors::CostFunction;

/// Prefix marking 3-vector parameter blocks as landmarks, eligible for
/// elimination by the dense Schur solver.
pub const LANDMARK_PREFIX: &str = "pt_";

/// Column ordering of the free parameter blocks for one solve.
///
/// Non-landmark blocks come first, landmark (`pt_*`, size 3) blocks last, so
/// the Schur solver can partition the normal equations by column index alone.
#[derive(Debug)]
pub struct ColumnLayout {
    /// Free blocks in column order.
    pub order: Vec<String>,
    /// First column of each free block.
    pub offsets: HashMap<String, usize>,
    /// Size of each free block, parallel to `order`.
    pub sizes: Vec<usize>,
    /// Total number of columns.
    pub total_cols: usize,
    /// Columns occupied by non-landmark blocks.
    pub camera_cols: usize,
}

impl ColumnLayout {
    /// Number of eliminable landmark blocks.
    pub fn num_landmarks(&self) -> usize {
        (self.total_cols - self.camera_cols) / 3
    }
}

fn is_landmark(name: &str, size: usize) -> bool {
    name.starts_with(LANDMARK_PREFIX) && size == 3
}

/// A nonlinear least-squares problem.
///
/// Parameter values are passed to the solver as a `HashMap<String, DVector>`;
/// the problem itself only records which blocks each residual touches and
/// which blocks are held constant.
#[derive(Default)]
pub struct Problem {
    pub(crate) residual_blocks: Vec<ResidualBlock>,
    constant_blocks: HashSet<String>,
    total_residual_dimension: usize,
}

impl Problem {
    pub fn new() -> Self {
        Problem::default()
    }

    /// Append a residual block binding `cost` to the named parameter blocks.
    pub fn add_residual_block(
        &mut self,
        variable_keys: &[&str],
        cost: Box<dyn CostFunction>,
        loss_func: Option<Box<dyn Loss>>,
    ) {
        let block = ResidualBlock::new(self.total_residual_dimension, variable_keys, cost, loss_func);
        self.total_residual_dimension += block.dim_residual;
        self.residual_blocks.push(block);
    }

    /// Hold a parameter block fixed during optimization.
    pub fn set_block_constant(&mut self, name: &str) {
        self.constant_blocks.insert(name.to_string());
    }

    pub fn is_block_constant(&self, name: &str) -> bool {
        self.constant_blocks.contains(name)
    }

    pub fn num_residuals(&self) -> usize {
        self.total_residual_dimension
    }

    pub fn num_residual_blocks(&self) -> usize {
        self.residual_blocks.len()
    }

    /// Compute the free-block column layout for the given parameter values.
    ///
    /// Fails when a residual references a missing block or a block whose size
    /// does not match the cost function's declaration.
    pub fn column_layout(&self, variables: &HashMap<String, DVector<f64>>) -> Result<ColumnLayout> {
        let mut free: HashMap<&str, usize> = HashMap::new();
        for block in &self.residual_blocks {
            for (key, &size) in block.variable_key_list.iter().zip(block.cost.block_sizes()) {
                let value = variables.get(key).ok_or_else(|| {
                    Error::InvalidInput(format!("missing parameter block '{key}'"))
                })?;
                if value.len() != size {
                    return Err(Error::InvalidInput(format!(
                        "parameter block '{key}' has size {} but the cost expects {size}",
                        value.len()
                    )));
                }
                if !self.constant_blocks.contains(key) {
                    free.insert(key, size);
                }
            }
        }

        let mut cameras: Vec<(&str, usize)> = Vec::new();
        let mut landmarks: Vec<(&str, usize)> = Vec::new();
        for (name, size) in free {
            if is_landmark(name, size) {
                landmarks.push((name, size));
            } else {
                cameras.push((name, size));
            }
        }
        cameras.sort();
        landmarks.sort();

        let mut order = Vec::with_capacity(cameras.len() + landmarks.len());
        let mut offsets = HashMap::new();
        let mut sizes = Vec::new();
        let mut col = 0;
        let mut camera_cols = 0;
        for (name, size) in cameras {
            offsets.insert(name.to_string(), col);
            order.push(name.to_string());
            sizes.push(size);
            col += size;
            camera_cols = col;
        }
        for (name, size) in landmarks {
            offsets.insert(name.to_string(), col);
            order.push(name.to_string());
            sizes.push(size);
            col += size;
        }

        Ok(ColumnLayout {
            order,
            offsets,
            sizes,
            total_cols: col,
            camera_cols,
        })
    }

    fn gather_params(
        &self,
        block: &ResidualBlock,
        variables: &HashMap<String, DVector<f64>>,
    ) -> Vec<DVector<f64>> {
        block
            .variable_key_list
            .iter()
            .map(|key| variables[key].clone())
            .collect()
    }

    /// Evaluate the full (loss-corrected) residual vector.
    pub fn compute_residuals(
        &self,
        variables: &HashMap<String, DVector<f64>>,
    ) -> Result<DVector<f64>> {
        let mut total = DVector::zeros(self.total_residual_dimension);
        for block in &self.residual_blocks {
            let params = self.gather_params(block, variables);
            let (res, _) = block
                .residual_and_jacobian(&params, false)
                .ok_or(Error::ProjectionInvalid)?;
            total
                .rows_mut(block.residual_row_start_idx, block.dim_residual)
                .copy_from(&res);
        }
        Ok(total)
    }

    /// Evaluate the full residual vector and dense Jacobian in the column
    /// order defined by `layout`. Constant blocks contribute no columns.
    pub fn compute_residual_and_jacobian(
        &self,
        variables: &HashMap<String, DVector<f64>>,
        layout: &ColumnLayout,
    ) -> Result<(DVector<f64>, DMatrix<f64>)> {
        let mut total_residual = DVector::zeros(self.total_residual_dimension);
        let mut total_jacobian =
            DMatrix::zeros(self.total_residual_dimension, layout.total_cols);

        for block in &self.residual_blocks {
            let params = self.gather_params(block, variables);
            let (res, jac) = block
                .residual_and_jacobian(&params, true)
                .ok_or(Error::ProjectionInvalid)?;
            let jac = jac.expect("jacobian requested from residual block");

            total_residual
                .rows_mut(block.residual_row_start_idx, block.dim_residual)
                .copy_from(&res);

            let mut local_col = 0;
            for (key, &size) in block.variable_key_list.iter().zip(block.cost.block_sizes()) {
                if let Some(&col) = layout.offsets.get(key) {
                    total_jacobian
                        .view_mut(
                            (block.residual_row_start_idx, col),
                            (block.dim_residual, size),
                        )
                        .copy_from(&jac.view((0, local_col), (block.dim_residual, size)));
                }
                local_col += size;
            }
        }
        Ok((total_residual, total_jacobian))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct LinearCost {
        sizes: [usize; 2],
    }

    impl CostFunction for LinearCost {
        fn dim_residual(&self) -> usize {
            2
        }
        fn block_sizes(&self) -> &[usize] {
            &self.sizes
        }
        fn linearize(
            &self,
            params: &[DVector<f64>],
            compute_jacobian: bool,
        ) -> Option<(DVector<f64>, Option<DMatrix<f64>>)> {
            // r = [a0 + b0, a1 − b0]
            let residual = DVector::from_vec(vec![
                params[0][0] + params[1][0],
                params[0][1] - params[1][0],
            ]);
            let jacobian = compute_jacobian.then(|| {
                DMatrix::from_row_slice(2, 3, &[1.0, 0.0, 1.0, 0.0, 1.0, -1.0])
            });
            Some((residual, jacobian))
        }
    }

    fn sample_variables() -> HashMap<String, DVector<f64>> {
        let mut variables = HashMap::new();
        variables.insert("a".to_string(), DVector::from_vec(vec![1.0, 2.0]));
        variables.insert("b".to_string(), DVector::from_vec(vec![3.0]));
        variables
    }

    #[test]
    fn test_layout_skips_constant_blocks() {
        let mut problem = Problem::new();
        problem.add_residual_block(&["a", "b"], Box::new(LinearCost { sizes: [2, 1] }), None);
        problem.set_block_constant("b");
        let layout = problem.column_layout(&sample_variables()).unwrap();
        assert_eq!(layout.order, vec!["a".to_string()]);
        assert_eq!(layout.total_cols, 2);
        assert_eq!(layout.camera_cols, 2);
    }

    #[test]
    fn test_landmark_blocks_are_ordered_last() {
        struct PointCost;
        impl CostFunction for PointCost {
            fn dim_residual(&self) -> usize {
                3
            }
            fn block_sizes(&self) -> &[usize] {
                &[3]
            }
            fn linearize(
                &self,
                params: &[DVector<f64>],
                compute_jacobian: bool,
            ) -> Option<(DVector<f64>, Option<DMatrix<f64>>)> {
                Some((
                    params[0].clone(),
                    compute_jacobian.then(|| DMatrix::identity(3, 3)),
                ))
            }
        }
        let mut problem = Problem::new();
        problem.add_residual_block(&["pt_0"], Box::new(PointCost), None);
        problem.add_residual_block(&["zz_pose"], Box::new(PointCost), None);
        let mut variables = HashMap::new();
        variables.insert("pt_0".to_string(), DVector::zeros(3));
        variables.insert("zz_pose".to_string(), DVector::zeros(3));
        let layout = problem.column_layout(&variables).unwrap();
        assert_eq!(layout.order, vec!["zz_pose".to_string(), "pt_0".to_string()]);
        assert_eq!(layout.camera_cols, 3);
        assert_eq!(layout.num_landmarks(), 1);
    }

    #[test]
    fn test_residual_and_jacobian_assembly() {
        let mut problem = Problem::new();
        problem.add_residual_block(&["a", "b"], Box::new(LinearCost { sizes: [2, 1] }), None);
        let variables = sample_variables();
        let layout = problem.column_layout(&variables).unwrap();
        let (residual, jacobian) = problem
            .compute_residual_and_jacobian(&variables, &layout)
            .unwrap();
        assert_eq!(residual.len(), 2);
        assert_eq!(residual[0], 4.0);
        assert_eq!(residual[1], -1.0);
        assert_eq!(jacobian.nrows(), 2);
        assert_eq!(jacobian.ncols(), 3);
        // column of "a" then "b" (sorted)
        let col_a = layout.offsets["a"];
        let col_b = layout.offsets["b"];
        assert_eq!(jacobian[(0, col_a)], 1.0);
        assert_eq!(jacobian[(0, col_b)], 1.0);
        assert_eq!(jacobian[(1, col_b)], -1.0);
    }

    #[test]
    fn test_missing_block_is_reported() {
        let mut problem = Problem::new();
        problem.add_residual_block(&["a", "missing"], Box::new(LinearCost { sizes: [2, 1] }), None);
        let err = problem.column_layout(&sample_variables()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
