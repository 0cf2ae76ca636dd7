//! Image formation: convolution with a point-spread function

use deconbench_engine::{
    ArtifactValue, Category, MethodDescriptor, ParamMap, ParamSpec, ParamType, Result,
};

use crate::fft::convolve_full;
use crate::util::input;

fn convolve_params() -> Vec<ParamSpec> {
    vec![
        ParamSpec::required("img", &[ParamType::Str]),
        ParamSpec::required("psf", &[ParamType::Str]),
    ]
}

fn convolve_run(inputs: &[ArtifactValue], _params: &ParamMap) -> Result<ArtifactValue> {
    let img = input(inputs, 0)?.as_image()?;
    let psf = input(inputs, 1)?.as_image()?;
    Ok(ArtifactValue::Image(convolve_full(img, psf)))
}

inventory::submit! {
    MethodDescriptor {
        category: Category::Convolution,
        name: "convolve",
        params: convolve_params,
        run: convolve_run,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_convolve_run_grows_output() {
        let img = ArtifactValue::Image(Array3::from_elem((4, 4, 4), 1.0));
        let psf = ArtifactValue::Image(Array3::from_elem((3, 3, 3), 1.0 / 27.0));
        let out = convolve_run(&[img, psf], &ParamMap::new()).unwrap();
        assert_eq!(out.as_image().unwrap().dim(), (6, 6, 6));
    }

    #[test]
    fn test_non_image_input_rejected() {
        let img = ArtifactValue::Image(Array3::zeros((2, 2, 2)));
        let bad = ArtifactValue::Scalar(1.0);
        assert!(convolve_run(&[img, bad], &ParamMap::new()).is_err());
    }
}
