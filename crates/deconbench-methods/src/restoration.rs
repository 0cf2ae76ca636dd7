//! Applying a trained restoration model

use deconbench_engine::{
    ArtifactValue, Category, EngineError, MethodDescriptor, ParamMap, ParamSpec, ParamType, Result,
};
use ndarray::Array3;

use crate::util::input;

/// Restore an image with a trained affine model
pub fn apply_model(img: &Array3<f32>, model: &serde_json::Value) -> Result<Array3<f32>> {
    let kind = model["model"].as_str().unwrap_or("");
    if kind != "affine" {
        return Err(EngineError::failed(format!(
            "unsupported model kind '{}'",
            kind
        )));
    }
    let gain = model["gain"]
        .as_f64()
        .ok_or_else(|| EngineError::failed("model is missing 'gain'"))?;
    let offset = model["offset"]
        .as_f64()
        .ok_or_else(|| EngineError::failed("model is missing 'offset'"))?;
    Ok(img.mapv(|v| (v as f64 * gain + offset) as f32))
}

fn apply_model_params() -> Vec<ParamSpec> {
    vec![
        ParamSpec::required("img", &[ParamType::Str]),
        ParamSpec::required("model", &[ParamType::Str]),
    ]
}

fn apply_model_run(inputs: &[ArtifactValue], _params: &ParamMap) -> Result<ArtifactValue> {
    let img = input(inputs, 0)?.as_image()?;
    let model = input(inputs, 1)?.as_model()?;
    Ok(ArtifactValue::Image(apply_model(img, model)?))
}

inventory::submit! {
    MethodDescriptor {
        category: Category::Restoration,
        name: "apply_model",
        params: apply_model_params,
        run: apply_model_run,
    }
}
