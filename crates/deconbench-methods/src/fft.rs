//! FFT-based 3D convolution
//!
//! The workhorse behind convolution and Richardson-Lucy deconvolution.
//! Transforms run separably along each axis with `rustfft`.

use ndarray::{Array3, Axis};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

/// Full-mode convolution: output shape is `img + kernel - 1` per axis
pub fn convolve_full(img: &Array3<f32>, kernel: &Array3<f32>) -> Array3<f32> {
    let (ni, ki) = (img.dim(), kernel.dim());
    let shape = (ni.0 + ki.0 - 1, ni.1 + ki.1 - 1, ni.2 + ki.2 - 1);

    let mut a = embed(img, shape);
    let mut b = embed(kernel, shape);
    fft3(&mut a, false);
    fft3(&mut b, false);
    for (x, y) in a.iter_mut().zip(b.iter()) {
        *x *= *y;
    }
    fft3(&mut a, true);

    let n = (shape.0 * shape.1 * shape.2) as f32;
    a.mapv(|c| c.re / n)
}

/// Same-mode convolution: output keeps the image's shape
///
/// The full result is cropped around the kernel's center, matching the
/// usual "same" semantics for odd-sized kernels.
pub fn convolve_same(img: &Array3<f32>, kernel: &Array3<f32>) -> Array3<f32> {
    let full = convolve_full(img, kernel);
    let (ni, ki) = (img.dim(), kernel.dim());
    let start = ((ki.0 - 1) / 2, (ki.1 - 1) / 2, (ki.2 - 1) / 2);
    full.slice(ndarray::s![
        start.0..start.0 + ni.0,
        start.1..start.1 + ni.1,
        start.2..start.2 + ni.2
    ])
    .to_owned()
}

fn embed(img: &Array3<f32>, shape: (usize, usize, usize)) -> Array3<Complex<f32>> {
    let mut out = Array3::from_elem(shape, Complex::new(0.0, 0.0));
    let dim = img.dim();
    out.slice_mut(ndarray::s![..dim.0, ..dim.1, ..dim.2])
        .zip_mut_with(img, |o, &v| *o = Complex::new(v, 0.0));
    out
}

/// In-place 3D FFT, one axis at a time
fn fft3(data: &mut Array3<Complex<f32>>, inverse: bool) {
    let mut planner = FftPlanner::new();
    for axis in 0..3 {
        let len = data.shape()[axis];
        let fft = if inverse {
            planner.plan_fft_inverse(len)
        } else {
            planner.plan_fft_forward(len)
        };
        let mut buf = vec![Complex::new(0.0, 0.0); len];
        for mut lane in data.lanes_mut(Axis(axis)) {
            for (slot, value) in buf.iter_mut().zip(lane.iter()) {
                *slot = *value;
            }
            fft.process(&mut buf);
            for (value, slot) in lane.iter_mut().zip(buf.iter()) {
                *value = *slot;
            }
        }
    }
}
