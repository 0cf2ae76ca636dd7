//! Synthetic ground-truth shapes

use deconbench_engine::{
    ArtifactValue, Category, EngineError, MethodDescriptor, ParamMap, ParamSpec, ParamType, Result,
};
use ndarray::Array3;

use crate::util::convert_size;

/// Foreground intensity of generated binary shapes
pub const FILL_VALUE: f32 = 255.0;

/// Empty voxels kept around the shape on every side
const MARGIN: usize = 3;

/// Voxelize a rotated 3D ellipsoid
///
/// `size` gives the full axis lengths in micrometers (scalar or 2/3-vector,
/// z first); `voxel_size` scales them to voxels. `theta` (polar) and `phi`
/// (azimuthal) rotate the ellipsoid's principal axis, in radians.
pub fn ellipsoid(
    size: &[f64; 3],
    voxel_size: &[f64; 3],
    theta: f64,
    phi: f64,
) -> Result<Array3<f32>> {
    if size.iter().any(|&s| s <= 0.0) || voxel_size.iter().any(|&v| v <= 0.0) {
        return Err(EngineError::failed(
            "ellipsoid sizes and voxel sizes must be positive",
        ));
    }
    // half axis lengths in micrometers, (z, y, x)
    let half = [size[0] / 2.0, size[1] / 2.0, size[2] / 2.0];
    let rot = rotation(theta, phi);

    // exact bounding half-extent of the rotated ellipsoid per axis
    let mut extent = [0.0f64; 3];
    for (i, e) in extent.iter_mut().enumerate() {
        *e = (0..3).map(|j| (rot[i][j] * half[j]).powi(2)).sum::<f64>().sqrt();
    }

    let dims: Vec<usize> = (0..3)
        .map(|i| (2.0 * extent[i] / voxel_size[i]).ceil() as usize + 2 * MARGIN)
        .collect();
    let center: Vec<f64> = dims.iter().map(|&d| (d as f64 - 1.0) / 2.0).collect();

    let mut img = Array3::zeros((dims[0], dims[1], dims[2]));
    for ((z, y, x), voxel) in img.indexed_iter_mut() {
        // voxel position in micrometers, relative to the center
        let p = [
            (z as f64 - center[0]) * voxel_size[0],
            (y as f64 - center[1]) * voxel_size[1],
            (x as f64 - center[2]) * voxel_size[2],
        ];
        // rotate back into the ellipsoid's own frame
        let mut q = [0.0f64; 3];
        for (i, qi) in q.iter_mut().enumerate() {
            *qi = (0..3).map(|j| rot[j][i] * p[j]).sum();
        }
        let r: f64 = (0..3).map(|i| (q[i] / half[i]).powi(2)).sum();
        if r <= 1.0 {
            *voxel = FILL_VALUE;
        }
    }
    Ok(img)
}

/// Rotation of the z axis by polar angle theta, then azimuth phi, in
/// (z, y, x) index order
fn rotation(theta: f64, phi: f64) -> [[f64; 3]; 3] {
    let (st, ct) = theta.sin_cos();
    let (sp, cp) = phi.sin_cos();
    // R = Rz(phi) * Ry(theta) expressed on (z, y, x) coordinates
    [
        [ct, 0.0, -st],
        [st * sp, cp, ct * sp],
        [st * cp, -sp, ct * cp],
    ]
}

fn ellipsoid_params() -> Vec<ParamSpec> {
    vec![
        ParamSpec::required("size", &[ParamType::Float, ParamType::Int, ParamType::List]),
        ParamSpec::optional(
            "voxel_size",
            &[ParamType::Float, ParamType::Int, ParamType::List],
            1.0,
        ),
        ParamSpec::optional("theta", &[ParamType::Float, ParamType::Int], 0.0),
        ParamSpec::optional("phi", &[ParamType::Float, ParamType::Int], 0.0),
    ]
}

fn ellipsoid_run(_inputs: &[ArtifactValue], params: &ParamMap) -> Result<ArtifactValue> {
    let size = convert_size(
        params
            .get("size")
            .ok_or_else(|| EngineError::MissingMandatoryParameter("size".to_string()))?,
        "size",
    )?;
    let voxel_size = convert_size(
        params
            .get("voxel_size")
            .ok_or_else(|| EngineError::MissingMandatoryParameter("voxel_size".to_string()))?,
        "voxel_size",
    )?;
    let theta = crate::util::require_f64(params, "theta")?;
    let phi = crate::util::require_f64(params, "phi")?;
    Ok(ArtifactValue::Image(ellipsoid(
        &size,
        &voxel_size,
        theta,
        phi,
    )?))
}

inventory::submit! {
    MethodDescriptor {
        category: Category::GroundTruth,
        name: "ellipsoid",
        params: ellipsoid_params,
        run: ellipsoid_run,
    }
}
