//! Folder layout for training-set preparation
//!
//! Training expects aligned pairs as two parallel subfolders holding files
//! with identical names. Because many items write into the same folder,
//! this step is always re-runnable and its output is not globally unique.

use std::fs;
use std::path::Path;

use deconbench_engine::{
    io, ArtifactValue, Category, EngineError, MethodDescriptor, ParamMap, ParamSpec, ParamType,
    PortType, Result,
};
use ndarray::Array3;

use crate::util::{input, require_str};

/// Copy an aligned (clean, degraded) pair into the training folder layout
pub fn pair_for_training(
    high: &Array3<f32>,
    low: &Array3<f32>,
    fn_output: &Path,
    name_high: &str,
    name_low: &str,
    img_name: &str,
) -> Result<()> {
    if img_name.is_empty() {
        return Err(EngineError::failed("img_name must not be empty"));
    }
    let dir_high = fn_output.join(name_high);
    let dir_low = fn_output.join(name_low);
    fs::create_dir_all(&dir_high)?;
    fs::create_dir_all(&dir_low)?;
    io::write(
        dir_high.join(img_name),
        &ArtifactValue::Image(high.clone()),
        PortType::Image,
    )?;
    io::write(
        dir_low.join(img_name),
        &ArtifactValue::Image(low.clone()),
        PortType::Image,
    )
}

fn pair_params() -> Vec<ParamSpec> {
    vec![
        ParamSpec::required("high", &[ParamType::Str]),
        ParamSpec::required("low", &[ParamType::Str]),
        ParamSpec::optional("name_high", &[ParamType::Str], "high"),
        ParamSpec::optional("name_low", &[ParamType::Str], "low"),
        ParamSpec::optional("fn_output", &[ParamType::Str], ""),
        ParamSpec::optional("img_name", &[ParamType::Str], ""),
    ]
}

fn pair_run(inputs: &[ArtifactValue], params: &ParamMap) -> Result<ArtifactValue> {
    let high = input(inputs, 0)?.as_image()?;
    let low = input(inputs, 1)?.as_image()?;
    let fn_output = require_str(params, "fn_output")?;
    if fn_output.is_empty() {
        return Err(EngineError::failed("fn_output must not be empty"));
    }
    pair_for_training(
        high,
        low,
        Path::new(fn_output),
        require_str(params, "name_high")?,
        require_str(params, "name_low")?,
        require_str(params, "img_name")?,
    )?;
    Ok(ArtifactValue::Unit)
}

inventory::submit! {
    MethodDescriptor {
        category: Category::Organize,
        name: "pair_for_training",
        params: pair_params,
        run: pair_run,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_layout() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("Noise0000");
        let high = Array3::from_elem((3, 3, 3), 255.0);
        let low = Array3::from_elem((3, 3, 3), 200.0);
        pair_for_training(&high, &low, &folder, "high", "low", "GT0000.img").unwrap();

        let back = io::read(folder.join("high/GT0000.img"), PortType::Image).unwrap();
        assert_eq!(back.as_image().unwrap(), &high);
        assert!(folder.join("low/GT0000.img").exists());
    }

    #[test]
    fn test_rerun_overwrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("pairs");
        let a = Array3::from_elem((2, 2, 2), 1.0);
        pair_for_training(&a, &a, &folder, "high", "low", "x.img").unwrap();
        let b = Array3::from_elem((2, 2, 2), 2.0);
        pair_for_training(&b, &b, &folder, "high", "low", "x.img").unwrap();
        let back = io::read(folder.join("high/x.img"), PortType::Image).unwrap();
        assert_eq!(back.as_image().unwrap(), &b);
    }

    #[test]
    fn test_missing_img_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let a = Array3::zeros((2, 2, 2));
        assert!(pair_for_training(&a, &a, dir.path(), "high", "low", "").is_err());
    }
}
