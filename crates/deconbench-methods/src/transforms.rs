//! Intensity transforms degrading a clean image

use deconbench_engine::{
    ArtifactValue, Category, EngineError, MethodDescriptor, ParamMap, ParamSpec, ParamType, Result,
};
use ndarray::Array3;
use rand::rngs::ThreadRng;
use rand::Rng;

use crate::util::{input, require_f64};

/// Above this mean the Poisson draw switches to a normal approximation
const KNUTH_LAMBDA_LIMIT: f64 = 30.0;

/// Apply photon (Poisson) noise at a target signal-to-noise ratio
///
/// The image is rescaled so its maximum equals `snr²` expected photons,
/// each voxel is Poisson-sampled, and the result is scaled back to the
/// original intensity range.
pub fn poisson_noise(img: &Array3<f32>, snr: f64) -> Result<Array3<f32>> {
    if snr <= 0.0 {
        return Err(EngineError::failed("snr must be positive"));
    }
    let max = img.iter().cloned().fold(f32::MIN, f32::max) as f64;
    if max <= 0.0 {
        return Ok(img.clone());
    }
    let factor = snr * snr / max;
    let mut rng = rand::thread_rng();
    let noisy = img.mapv(|v| {
        let lambda = (v as f64 * factor).max(0.0);
        (sample_poisson(&mut rng, lambda) / factor) as f32
    });
    Ok(noisy)
}

fn sample_poisson(rng: &mut ThreadRng, lambda: f64) -> f64 {
    if lambda <= 0.0 {
        return 0.0;
    }
    if lambda <= KNUTH_LAMBDA_LIMIT {
        // Knuth's product method
        let threshold = (-lambda).exp();
        let mut count = 0u64;
        let mut product: f64 = 1.0;
        loop {
            product *= rng.gen::<f64>();
            if product <= threshold {
                return count as f64;
            }
            count += 1;
        }
    }
    // normal approximation for large means, Box-Muller sampled
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen::<f64>();
    let gauss = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    (lambda + lambda.sqrt() * gauss).round().max(0.0)
}

fn poisson_noise_params() -> Vec<ParamSpec> {
    vec![
        ParamSpec::required("img", &[ParamType::Str]),
        ParamSpec::required("snr", &[ParamType::Float, ParamType::Int]),
    ]
}

fn poisson_noise_run(inputs: &[ArtifactValue], params: &ParamMap) -> Result<ArtifactValue> {
    let img = input(inputs, 0)?.as_image()?;
    let snr = require_f64(params, "snr")?;
    Ok(ArtifactValue::Image(poisson_noise(img, snr)?))
}

inventory::submit! {
    MethodDescriptor {
        category: Category::Transform,
        name: "poisson_noise",
        params: poisson_noise_params,
        run: poisson_noise_run,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_high_snr_stays_close_to_input() {
        let img = Array3::from_elem((6, 6, 6), 100.0);
        let noisy = poisson_noise(&img, 50.0).unwrap();
        let mean: f32 = noisy.mean().unwrap_or(0.0);
        assert!((mean - 100.0).abs() / 100.0 < 0.05);
    }

    #[test]
    fn test_low_snr_degrades_more_than_high_snr() {
        let img = Array3::from_elem((8, 8, 8), 100.0);
        let spread = |snr: f64| {
            let noisy = poisson_noise(&img, snr).unwrap();
            let mean = noisy.mean().unwrap_or(0.0);
            noisy.mapv(|v| (v - mean).powi(2)).mean().unwrap_or(0.0)
        };
        assert!(spread(2.0) > spread(20.0));
    }

    #[test]
    fn test_zero_stays_zero() {
        let img = Array3::zeros((4, 4, 4));
        let noisy = poisson_noise(&img, 5.0).unwrap();
        assert!(noisy.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_invalid_snr() {
        assert!(poisson_noise(&Array3::zeros((2, 2, 2)), 0.0).is_err());
    }

    #[test]
    fn test_large_lambda_branch_is_sane() {
        let mut rng = rand::thread_rng();
        let mean: f64 =
            (0..2000).map(|_| sample_poisson(&mut rng, 400.0)).sum::<f64>() / 2000.0;
        assert!((mean - 400.0).abs() < 5.0);
    }
}
