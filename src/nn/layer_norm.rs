//! Layer normalization over the feature axis of a `[batch, features]` array.
//!
//! ```text
//! y = (x - mean(x)) / sqrt(var(x) + ε) * scale + shift
//! ```
//!
//! `var` is the population variance of each row. `scale` (init 1) and `shift`
//! (init 0) are learned, stored as `<scope>/layer_norm/{scale,shift}`.

use ndarray::{Array2, ArrayD, Axis, Ix2};

use crate::config::LAYER_NORM_EPSILON;
use crate::error::{GlimpseError, Result};
use crate::params::{Initializer, ParamStore, Scope};

/// Layer-normalize each row of `x`.
pub fn layer_norm(x: &Array2<f32>, params: &mut ParamStore, scope: &Scope) -> Result<Array2<f32>> {
    let features = x.ncols();
    let scope = scope.child("layer_norm");

    let mean = x
        .mean_axis(Axis(1))
        .ok_or_else(|| GlimpseError::shape("layer norm over zero features"))?
        .insert_axis(Axis(1));
    let centered = x - &mean;
    let var = centered.mapv(|v| v * v).mean_axis(Axis(1)).unwrap_or_default();
    let denom = var.mapv(|v| (v + LAYER_NORM_EPSILON).sqrt()).insert_axis(Axis(1));
    let normed = centered / &denom;

    let scale = params.vector(&scope.var("scale"), features, Initializer::Constant(1.0))?;
    let shift = params.vector(&scope.var("shift"), features, Initializer::Zeros)?;

    Ok(normed * &scale + &shift)
}

/// Rank-checked entry point for dynamically shaped inputs.
pub fn layer_norm_dyn(x: &ArrayD<f32>, params: &mut ParamStore, scope: &Scope) -> Result<Array2<f32>> {
    let x = x.view().into_dimensionality::<Ix2>().map_err(|_| {
        GlimpseError::shape(format!(
            "layer norm expects a rank-2 [batch, features] input, got shape {:?}",
            x.shape()
        ))
    })?;
    layer_norm(&x.to_owned(), params, scope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, IxDyn};

    #[test]
    fn test_constant_row_normalizes_to_zero() {
        let mut params = ParamStore::default();
        let x = array![[1.0f32, 1.0, 1.0, 1.0]];
        let y = layer_norm(&x, &mut params, &Scope::new("ln")).unwrap();
        for &v in y.iter() {
            assert!(v.abs() < 1e-3, "expected ~0, got {}", v);
        }
    }

    #[test]
    fn test_zero_mean_unit_variance() {
        let mut params = ParamStore::default();
        let x = array![[1.0f32, 2.0, 3.0, 4.0], [-5.0, 0.0, 5.0, 10.0]];
        let y = layer_norm(&x, &mut params, &Scope::new("ln")).unwrap();
        for row in y.rows() {
            let mean = row.sum() / 4.0;
            let var = row.mapv(|v| (v - mean) * (v - mean)).sum() / 4.0;
            assert!(mean.abs() < 1e-5);
            assert!((var - 1.0).abs() < 1e-3, "variance {}", var);
        }
    }

    #[test]
    fn test_registers_scale_and_shift() {
        let mut params = ParamStore::default();
        let x = array![[0.5f32, -0.5, 2.0]];
        layer_norm(&x, &mut params, &Scope::new("i")).unwrap();
        assert_eq!(params.get("i/layer_norm/scale").unwrap().shape(), &[3]);
        assert_eq!(params.get("i/layer_norm/shift").unwrap().shape(), &[3]);
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_affine_applied() {
        let mut params = ParamStore::default();
        params
            .set("ln/layer_norm/scale", ArrayD::from_elem(IxDyn(&[2]), 2.0))
            .unwrap();
        params
            .set("ln/layer_norm/shift", ArrayD::from_elem(IxDyn(&[2]), 0.5))
            .unwrap();
        let y = layer_norm(&array![[0.0f32, 2.0]], &mut params, &Scope::new("ln")).unwrap();
        // normalized row is ~[-1, 1]
        assert!((y[[0, 0]] - (-1.5)).abs() < 1e-4);
        assert!((y[[0, 1]] - 2.5).abs() < 1e-4);
    }

    #[test]
    fn test_rejects_non_rank2() {
        let mut params = ParamStore::default();
        let x = ArrayD::<f32>::zeros(IxDyn(&[2, 3, 4]));
        let err = layer_norm_dyn(&x, &mut params, &Scope::new("ln")).unwrap_err();
        assert!(matches!(err, GlimpseError::Shape(_)));

        let ok = ArrayD::<f32>::ones(IxDyn(&[2, 3]));
        assert_eq!(
            layer_norm_dyn(&ok, &mut params, &Scope::new("ln")).unwrap().dim(),
            (2, 3)
        );
    }
}
