//! Shared helpers for parameter extraction and array shaping

use deconbench_engine::{EngineError, ParamMap, ParamValue, Result};
use ndarray::Array3;

/// Interpret a scalar or 2/3-vector as a per-axis (z, y, x) size
///
/// A scalar applies to all axes; a 2-vector is (z, lateral) with the
/// lateral value shared by y and x.
pub fn convert_size(value: &ParamValue, name: &str) -> Result<[f64; 3]> {
    let values = value
        .as_f64_vec()
        .ok_or_else(|| EngineError::failed(format!("'{}' must be numeric", name)))?;
    match values.as_slice() {
        [v] => Ok([*v, *v, *v]),
        [z, lateral] => Ok([*z, *lateral, *lateral]),
        [z, y, x] => Ok([*z, *y, *x]),
        other => Err(EngineError::failed(format!(
            "'{}' must have 1, 2 or 3 components, got {}",
            name,
            other.len()
        ))),
    }
}

/// Zero-pad both stacks to their elementwise maximum shape
pub fn unify_shape(a: &Array3<f32>, b: &Array3<f32>) -> (Array3<f32>, Array3<f32>) {
    let (da, db) = (a.dim(), b.dim());
    let shape = (da.0.max(db.0), da.1.max(db.1), da.2.max(db.2));
    (pad_to(a, shape), pad_to(b, shape))
}

fn pad_to(img: &Array3<f32>, shape: (usize, usize, usize)) -> Array3<f32> {
    if img.dim() == shape {
        return img.clone();
    }
    let mut out = Array3::zeros(shape);
    let dim = img.dim();
    out.slice_mut(ndarray::s![..dim.0, ..dim.1, ..dim.2])
        .assign(img);
    out
}

/// Positional upstream input by index
pub fn input(inputs: &[deconbench_engine::ArtifactValue], index: usize) -> Result<&deconbench_engine::ArtifactValue> {
    inputs
        .get(index)
        .ok_or_else(|| EngineError::failed(format!("missing positional input {}", index)))
}

pub fn require_f64(params: &ParamMap, name: &str) -> Result<f64> {
    params
        .get(name)
        .and_then(ParamValue::as_f64)
        .ok_or_else(|| EngineError::failed(format!("parameter '{}' is not numeric", name)))
}

pub fn require_usize(params: &ParamMap, name: &str) -> Result<usize> {
    let value = params
        .get(name)
        .and_then(ParamValue::as_i64)
        .ok_or_else(|| EngineError::failed(format!("parameter '{}' is not an integer", name)))?;
    usize::try_from(value)
        .map_err(|_| EngineError::failed(format!("parameter '{}' must be non-negative", name)))
}

pub fn require_str<'a>(params: &'a ParamMap, name: &str) -> Result<&'a str> {
    params
        .get(name)
        .and_then(ParamValue::as_str)
        .ok_or_else(|| EngineError::failed(format!("parameter '{}' is not a string", name)))
}
