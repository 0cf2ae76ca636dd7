//! Restoration-model training

use deconbench_engine::{
    ArtifactValue, Category, DataBundle, EngineError, MethodDescriptor, ParamMap, ParamSpec,
    ParamType, Result,
};
use serde_json::json;

use crate::util::input;

/// Fit a per-intensity affine model `target = gain * source + offset`
///
/// Least squares over every voxel of every patch pair in the bundle. The
/// model is stored as a small JSON payload consumed by
/// [`restoration::apply_model`](crate::restoration::apply_model).
pub fn fit_affine(data: &DataBundle) -> Result<serde_json::Value> {
    if data.is_empty() {
        return Err(EngineError::failed("training data bundle is empty"));
    }
    let (mut n, mut sx, mut sy, mut sxx, mut sxy) = (0.0f64, 0.0f64, 0.0f64, 0.0f64, 0.0f64);
    for (source, target) in data.sources.iter().zip(data.targets.iter()) {
        for (&x, &y) in source.iter().zip(target.iter()) {
            let (x, y) = (x as f64, y as f64);
            n += 1.0;
            sx += x;
            sy += y;
            sxx += x * x;
            sxy += x * y;
        }
    }
    let det = n * sxx - sx * sx;
    let (gain, offset) = if det.abs() < 1e-12 {
        // constant source; all information is in the offset
        (1.0, (sy - sx) / n)
    } else {
        let gain = (n * sxy - sx * sy) / det;
        (gain, (sy - gain * sx) / n)
    };
    Ok(json!({
        "model": "affine",
        "gain": gain,
        "offset": offset,
        "n_patches": data.len(),
    }))
}

fn fit_affine_params() -> Vec<ParamSpec> {
    vec![ParamSpec::required("data", &[ParamType::Str])]
}

fn fit_affine_run(inputs: &[ArtifactValue], _params: &ParamMap) -> Result<ArtifactValue> {
    let data = input(inputs, 0)?.as_data()?;
    Ok(ArtifactValue::Model(fit_affine(data)?))
}

inventory::submit! {
    MethodDescriptor {
        category: Category::Training,
        name: "fit_affine",
        params: fit_affine_params,
        run: fit_affine_run,
    }
}
