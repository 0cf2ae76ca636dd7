//! Point-spread function synthesis

use deconbench_engine::{
    ArtifactValue, Category, EngineError, MethodDescriptor, ParamMap, ParamSpec, ParamType, Result,
};
use ndarray::Array3;

use crate::util::convert_size;

/// Kernel support reaches this many sigmas from the center
const SUPPORT_SIGMAS: f64 = 8.0;

/// 3D Gaussian kernel, peak-normalized to 1.0
///
/// `sigma` is the lateral standard deviation in micrometers; the axial
/// sigma is `aspect * sigma`. Support per axis is `2 * 8 * sigma + 1`
/// voxels, so the kernel always has an odd, centered shape.
pub fn gaussian(sigma: f64, aspect: f64, voxel_size: &[f64; 3]) -> Result<Array3<f32>> {
    if sigma <= 0.0 || aspect <= 0.0 {
        return Err(EngineError::failed("sigma and aspect must be positive"));
    }
    // per-axis sigma in voxels, (z, y, x)
    let sigmas = [
        sigma * aspect / voxel_size[0],
        sigma / voxel_size[1],
        sigma / voxel_size[2],
    ];
    let half: Vec<isize> = sigmas
        .iter()
        .map(|s| (SUPPORT_SIGMAS * s).ceil().max(1.0) as isize)
        .collect();
    let dims = (
        (2 * half[0] + 1) as usize,
        (2 * half[1] + 1) as usize,
        (2 * half[2] + 1) as usize,
    );

    let mut kernel = Array3::zeros(dims);
    for ((z, y, x), value) in kernel.indexed_iter_mut() {
        let d = [
            z as isize - half[0],
            y as isize - half[1],
            x as isize - half[2],
        ];
        let exponent: f64 = (0..3)
            .map(|i| (d[i] as f64 / sigmas[i]).powi(2))
            .sum::<f64>()
            * -0.5;
        *value = exponent.exp() as f32;
    }
    Ok(kernel)
}

fn gaussian_params() -> Vec<ParamSpec> {
    vec![
        ParamSpec::required("sigma", &[ParamType::Float, ParamType::Int]),
        ParamSpec::optional("aspect", &[ParamType::Float, ParamType::Int], 1.0),
        ParamSpec::optional(
            "voxel_size",
            &[ParamType::Float, ParamType::Int, ParamType::List],
            1.0,
        ),
    ]
}

fn gaussian_run(_inputs: &[ArtifactValue], params: &ParamMap) -> Result<ArtifactValue> {
    let sigma = crate::util::require_f64(params, "sigma")?;
    let aspect = crate::util::require_f64(params, "aspect")?;
    let voxel_size = convert_size(
        params
            .get("voxel_size")
            .ok_or_else(|| EngineError::MissingMandatoryParameter("voxel_size".to_string()))?,
        "voxel_size",
    )?;
    Ok(ArtifactValue::Image(gaussian(sigma, aspect, &voxel_size)?))
}

inventory::submit! {
    MethodDescriptor {
        category: Category::Psf,
        name: "gaussian",
        params: gaussian_params,
        run: gaussian_run,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_is_one_at_center() {
        let kernel = gaussian(1.0, 1.0, &[1.0, 1.0, 1.0]).unwrap();
        let (dz, dy, dx) = kernel.dim();
        assert_eq!((dz, dy, dx), (17, 17, 17));
        assert_eq!(kernel[[dz / 2, dy / 2, dx / 2]], 1.0);
        assert!(kernel.iter().all(|&v| v <= 1.0 && v >= 0.0));
    }

    #[test]
    fn test_aspect_stretches_axial_support() {
        let kernel = gaussian(1.0, 3.0, &[1.0, 1.0, 1.0]).unwrap();
        let (dz, dy, dx) = kernel.dim();
        assert_eq!(dz, 49);
        assert_eq!((dy, dx), (17, 17));
    }

    #[test]
    fn test_symmetry() {
        let kernel = gaussian(0.8, 2.0, &[1.0, 1.0, 1.0]).unwrap();
        let (dz, dy, dx) = kernel.dim();
        for ((z, y, x), &v) in kernel.indexed_iter() {
            let mirrored = kernel[[dz - 1 - z, dy - 1 - y, dx - 1 - x]];
            assert!((v - mirrored).abs() < 1e-6);
        }
    }

    #[test]
    fn test_invalid_sigma() {
        assert!(gaussian(0.0, 1.0, &[1.0, 1.0, 1.0]).is_err());
    }
}
