//! Image-similarity metrics
//!
//! Every metric takes (ground truth, candidate) and returns a scalar.
//! Shape-mismatched inputs are zero-padded to a common shape first.

use deconbench_engine::{
    ArtifactValue, Category, MethodDescriptor, ParamMap, ParamSpec, ParamType, Result,
};
use ndarray::Array3;

use crate::util::{input, unify_shape};

/// Root mean squared error
pub fn rmse(gt: &Array3<f32>, img: &Array3<f32>) -> f64 {
    let (gt, img) = unify_shape(gt, img);
    let n = gt.len() as f64;
    let sum: f64 = gt
        .iter()
        .zip(img.iter())
        .map(|(&a, &b)| ((a - b) as f64).powi(2))
        .sum();
    (sum / n).sqrt()
}

/// RMSE normalized by the ground truth's Euclidean mean intensity
pub fn nrmse(gt: &Array3<f32>, img: &Array3<f32>) -> f64 {
    let (gt, img) = unify_shape(gt, img);
    let n = gt.len() as f64;
    let denom = (gt.iter().map(|&v| (v as f64).powi(2)).sum::<f64>() / n).sqrt();
    let error = rmse(&gt, &img);
    if denom == 0.0 {
        error
    } else {
        error / denom
    }
}

/// Peak signal-to-noise ratio over the ground truth's data range, in dB
pub fn psnr(gt: &Array3<f32>, img: &Array3<f32>) -> f64 {
    let (gt, img) = unify_shape(gt, img);
    let range = data_range(&gt);
    let error = rmse(&gt, &img);
    if error == 0.0 {
        f64::INFINITY
    } else {
        20.0 * (range / error).log10()
    }
}

const SSIM_WINDOW: usize = 7;
const SSIM_K1: f64 = 0.01;
const SSIM_K2: f64 = 0.03;

/// Mean structural similarity over a sliding uniform window
pub fn ssim(gt: &Array3<f32>, img: &Array3<f32>) -> f64 {
    let (gt, img) = unify_shape(gt, img);
    let dim = gt.dim();
    let win = SSIM_WINDOW
        .min(dim.0)
        .min(dim.1)
        .min(dim.2)
        .max(1);

    let range = data_range(&gt).max(1e-12);
    let c1 = (SSIM_K1 * range).powi(2);
    let c2 = (SSIM_K2 * range).powi(2);
    let n = (win * win * win) as f64;

    let mut total = 0.0;
    let mut windows = 0usize;
    for z in 0..=dim.0 - win {
        for y in 0..=dim.1 - win {
            for x in 0..=dim.2 - win {
                let a = gt.slice(ndarray::s![z..z + win, y..y + win, x..x + win]);
                let b = img.slice(ndarray::s![z..z + win, y..y + win, x..x + win]);
                let (mut ma, mut mb) = (0.0f64, 0.0f64);
                for (&u, &v) in a.iter().zip(b.iter()) {
                    ma += u as f64;
                    mb += v as f64;
                }
                ma /= n;
                mb /= n;
                let (mut va, mut vb, mut cov) = (0.0f64, 0.0f64, 0.0f64);
                for (&u, &v) in a.iter().zip(b.iter()) {
                    let (du, dv) = (u as f64 - ma, v as f64 - mb);
                    va += du * du;
                    vb += dv * dv;
                    cov += du * dv;
                }
                va /= n;
                vb /= n;
                cov /= n;
                let score = ((2.0 * ma * mb + c1) * (2.0 * cov + c2))
                    / ((ma * ma + mb * mb + c1) * (va + vb + c2));
                total += score;
                windows += 1;
            }
        }
    }
    if windows == 0 {
        1.0
    } else {
        total / windows as f64
    }
}

fn data_range(img: &Array3<f32>) -> f64 {
    let max = img.iter().cloned().fold(f32::MIN, f32::max) as f64;
    let min = img.iter().cloned().fold(f32::MAX, f32::min) as f64;
    max - min
}

fn metric_params() -> Vec<ParamSpec> {
    vec![
        ParamSpec::required("gt", &[ParamType::Str]),
        ParamSpec::required("img", &[ParamType::Str]),
    ]
}

macro_rules! register_metric {
    ($name:literal, $run:ident, $metric:ident) => {
        fn $run(inputs: &[ArtifactValue], _params: &ParamMap) -> Result<ArtifactValue> {
            let gt = input(inputs, 0)?.as_image()?;
            let img = input(inputs, 1)?.as_image()?;
            Ok(ArtifactValue::Scalar($metric(gt, img)))
        }

        inventory::submit! {
            MethodDescriptor {
                category: Category::Evaluation,
                name: $name,
                params: metric_params,
                run: $run,
            }
        }
    };
}

register_metric!("rmse", rmse_run, rmse);
register_metric!("nrmse", nrmse_run, nrmse);
register_metric!("psnr", psnr_run, psnr);
register_metric!("ssim", ssim_run, ssim);

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(shape: (usize, usize, usize)) -> Array3<f32> {
        Array3::from_shape_fn(shape, |(z, y, x)| (z * 7 + y * 3 + x) as f32)
    }

    #[test]
    fn test_rmse_identity_is_zero() {
        let img = ramp((10, 10, 10));
        assert_eq!(rmse(&img, &img), 0.0);
    }

    #[test]
    fn test_rmse_ones_vs_zeros_is_one() {
        let ones = Array3::from_elem((10, 10, 10), 1.0);
        let zeros = Array3::zeros((10, 10, 10));
        assert!((rmse(&ones, &zeros) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_shape_mismatch_pads_instead_of_failing() {
        let a = Array3::from_elem((4, 4, 4), 1.0);
        let b = Array3::from_elem((4, 4, 6), 1.0);
        // the padded region of `a` disagrees with `b`, so the error is nonzero
        let error = rmse(&a, &b);
        assert!(error > 0.0);
        let expected = (32.0 / 96.0f64).sqrt();
        assert!((error - expected).abs() < 1e-9);
    }

    #[test]
    fn test_nrmse_scales_with_intensity() {
        let gt = Array3::from_elem((5, 5, 5), 10.0);
        let off = Array3::from_elem((5, 5, 5), 9.0);
        assert!((nrmse(&gt, &off) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_psnr_identity_is_infinite() {
        let img = ramp((8, 8, 8));
        assert!(psnr(&img, &img).is_infinite());
        let noisy = img.mapv(|v| v + 1.0);
        assert!(psnr(&img, &noisy).is_finite());
    }

    #[test]
    fn test_ssim_identity_is_one() {
        let img = ramp((10, 10, 10));
        assert!((ssim(&img, &img) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_ssim_penalizes_noise() {
        let img = ramp((10, 10, 10));
        let corrupted = Array3::from_shape_fn((10, 10, 10), |(z, y, x)| {
            if (z + y + x) % 2 == 0 {
                img[[z, y, x]] + 20.0
            } else {
                img[[z, y, x]]
            }
        });
        assert!(ssim(&img, &corrupted) < 0.9);
    }

    #[test]
    fn test_ssim_window_shrinks_for_small_images() {
        let img = Array3::from_elem((3, 3, 3), 5.0);
        assert!((ssim(&img, &img) - 1.0).abs() < 1e-6);
    }
}
