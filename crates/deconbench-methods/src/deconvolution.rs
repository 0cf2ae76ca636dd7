//! Deconvolution algorithms

use deconbench_engine::{
    ArtifactValue, Category, EngineError, MethodDescriptor, ParamMap, ParamSpec, ParamType, Result,
};
use ndarray::Array3;

use crate::fft::convolve_same;
use crate::util::{input, require_usize};

const EPS: f32 = 1e-12;

/// Richardson-Lucy iterative deconvolution
///
/// Multiplicative update `est *= (img / (est ⊛ psf)) ⊛ psf_flipped`,
/// starting from the observed image. The kernel is normalized to unit sum
/// internally.
pub fn richardson_lucy(img: &Array3<f32>, psf: &Array3<f32>, iterations: usize) -> Result<Array3<f32>> {
    let psf_sum: f32 = psf.sum();
    if psf_sum <= 0.0 {
        return Err(EngineError::failed("psf must have positive total mass"));
    }
    let psf = psf.mapv(|v| v / psf_sum);
    let mut flipped = psf.clone();
    flipped.invert_axis(ndarray::Axis(0));
    flipped.invert_axis(ndarray::Axis(1));
    flipped.invert_axis(ndarray::Axis(2));

    let observed = img.mapv(|v| v.max(0.0));
    let mut estimate = observed.clone();
    for _ in 0..iterations {
        let blurred = convolve_same(&estimate, &psf);
        let ratio = ndarray::Zip::from(&observed)
            .and(&blurred)
            .map_collect(|&o, &b| o / (b + EPS));
        let correction = convolve_same(&ratio, &flipped);
        estimate = ndarray::Zip::from(&estimate)
            .and(&correction)
            .map_collect(|&e, &c| (e * c).max(0.0));
    }
    Ok(estimate)
}

fn richardson_lucy_params() -> Vec<ParamSpec> {
    vec![
        ParamSpec::required("img", &[ParamType::Str]),
        ParamSpec::required("psf", &[ParamType::Str]),
        ParamSpec::optional("iterations", &[ParamType::Int], 10i64),
    ]
}

fn richardson_lucy_run(inputs: &[ArtifactValue], params: &ParamMap) -> Result<ArtifactValue> {
    let img = input(inputs, 0)?.as_image()?;
    let psf = input(inputs, 1)?.as_image()?;
    let iterations = require_usize(params, "iterations")?;
    Ok(ArtifactValue::Image(richardson_lucy(img, psf, iterations)?))
}

inventory::submit! {
    MethodDescriptor {
        category: Category::Deconvolution,
        name: "richardson_lucy",
        params: richardson_lucy_params,
        run: richardson_lucy_run,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::rmse;
    use crate::fft::convolve_same;
    use crate::psf::gaussian;

    #[test]
    fn test_deconvolution_sharpens_a_blurred_image() {
        let mut truth = Array3::<f32>::zeros((13, 13, 13));
        truth
            .slice_mut(ndarray::s![5..8, 5..8, 5..8])
            .fill(255.0);
        let kernel = gaussian(0.6, 1.0, &[1.0, 1.0, 1.0]).unwrap();
        let norm: f32 = kernel.sum();
        let kernel = kernel.mapv(|v| v / norm);
        let blurred = convolve_same(&truth, &kernel);

        let restored = richardson_lucy(&blurred, &kernel, 25).unwrap();
        assert!(rmse(&truth, &restored) < rmse(&truth, &blurred));
    }

    #[test]
    fn test_nonnegative_output() {
        let img = Array3::from_elem((6, 6, 6), 10.0);
        let kernel = gaussian(0.5, 1.0, &[1.0, 1.0, 1.0]).unwrap();
        let restored = richardson_lucy(&img, &kernel, 5).unwrap();
        assert!(restored.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn test_empty_psf_rejected() {
        let img = Array3::from_elem((4, 4, 4), 1.0);
        let psf = Array3::zeros((3, 3, 3));
        assert!(richardson_lucy(&img, &psf, 3).is_err());
    }
}
