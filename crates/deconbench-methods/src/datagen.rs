//! Patch extraction from an organized training folder

use std::fs;
use std::path::Path;
use std::time::Duration;

use deconbench_engine::{
    io, ArtifactValue, Category, DataBundle, EngineError, MethodDescriptor, ParamMap, ParamSpec,
    ParamType, PortType, Result,
};
use ndarray::Array3;
use rand::Rng;

use crate::util::{input, require_str, require_usize};

const READINESS_POLL: Duration = Duration::from_millis(500);

/// Sample aligned patch pairs from `<folder>/<name_high|name_low>`
///
/// When `min_inputs > 0` the call first waits until both subfolders hold
/// at least that many files; upstream items may still be writing when
/// this step starts. Patches are cubes of `patch_size` voxels (clamped to
/// the image), sampled at matching positions in both stacks.
pub fn extract_patches(
    folder: &Path,
    n_patches_per_image: usize,
    patch_size: usize,
    name_high: &str,
    name_low: &str,
    min_inputs: usize,
) -> Result<DataBundle> {
    let dir_high = folder.join(name_high);
    let dir_low = folder.join(name_low);
    wait_for_inputs(&dir_high, &dir_low, min_inputs);

    let mut names = list_images(&dir_high)?;
    names.retain(|name| dir_low.join(name).exists());
    names.sort();
    if names.is_empty() {
        return Err(EngineError::failed(format!(
            "no aligned image pairs under {}",
            folder.display()
        )));
    }

    let mut rng = rand::thread_rng();
    let mut bundle = DataBundle::default();
    for name in &names {
        let high = io::read(dir_high.join(name), PortType::Image)?;
        let low = io::read(dir_low.join(name), PortType::Image)?;
        let (high, low) = crate::util::unify_shape(high.as_image()?, low.as_image()?);
        let dim = high.dim();
        let size = (
            patch_size.min(dim.0).max(1),
            patch_size.min(dim.1).max(1),
            patch_size.min(dim.2).max(1),
        );
        for _ in 0..n_patches_per_image {
            let z = rng.gen_range(0..=dim.0 - size.0);
            let y = rng.gen_range(0..=dim.1 - size.1);
            let x = rng.gen_range(0..=dim.2 - size.2);
            let view = ndarray::s![z..z + size.0, y..y + size.1, x..x + size.2];
            bundle.targets.push(high.slice(view).to_owned());
            bundle.sources.push(low.slice(view).to_owned());
        }
    }
    Ok(bundle)
}

/// Block until both subfolders reach the expected pair count
fn wait_for_inputs(dir_high: &Path, dir_low: &Path, min_inputs: usize) {
    if min_inputs == 0 {
        return;
    }
    loop {
        let high = list_images(dir_high).map(|n| n.len()).unwrap_or(0);
        let low = list_images(dir_low).map(|n| n.len()).unwrap_or(0);
        if high >= min_inputs && low >= min_inputs {
            return;
        }
        log::debug!(
            "waiting for {} training pairs ({}/{} ready)",
            min_inputs,
            high.min(low),
            min_inputs
        );
        std::thread::sleep(READINESS_POLL);
    }
}

fn list_images(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        // skip in-flight temporaries
        if !name.starts_with('.') && entry.path().is_file() {
            names.push(name);
        }
    }
    Ok(names)
}

fn extract_patches_params() -> Vec<ParamSpec> {
    vec![
        ParamSpec::required("folder", &[ParamType::Str]),
        ParamSpec::required("n_patches_per_image", &[ParamType::Int]),
        ParamSpec::optional("patch_size", &[ParamType::Int], 10i64),
        ParamSpec::optional("name_high", &[ParamType::Str], "high"),
        ParamSpec::optional("name_low", &[ParamType::Str], "low"),
        ParamSpec::optional("min_inputs", &[ParamType::Int], 0i64),
    ]
}

fn extract_patches_run(inputs: &[ArtifactValue], params: &ParamMap) -> Result<ArtifactValue> {
    let folder = input(inputs, 0)?.as_path()?;
    let bundle = extract_patches(
        folder,
        require_usize(params, "n_patches_per_image")?,
        require_usize(params, "patch_size")?,
        require_str(params, "name_high")?,
        require_str(params, "name_low")?,
        require_usize(params, "min_inputs")?,
    )?;
    Ok(ArtifactValue::Data(bundle))
}

inventory::submit! {
    MethodDescriptor {
        category: Category::DataGen,
        name: "extract_patches",
        params: extract_patches_params,
        run: extract_patches_run,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_pair(folder: &Path, name: &str, value: f32) {
        for sub in ["high", "low"] {
            let path = folder.join(sub).join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            io::write(
                &path,
                &ArtifactValue::Image(Array3::from_elem((6, 6, 6), value)),
                PortType::Image,
            )
            .unwrap();
        }
    }

    #[test]
    fn test_patches_are_aligned_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        write_pair(dir.path(), "a.img", 3.0);
        write_pair(dir.path(), "b.img", 7.0);

        let bundle = extract_patches(dir.path(), 4, 4, "high", "low", 0).unwrap();
        assert_eq!(bundle.len(), 8);
        for (source, target) in bundle.sources.iter().zip(bundle.targets.iter()) {
            assert_eq!(source.dim(), (4, 4, 4));
            assert_eq!(source, target);
        }
    }

    #[test]
    fn test_patch_size_clamps_to_image() {
        let dir = tempfile::tempdir().unwrap();
        write_pair(dir.path(), "a.img", 1.0);
        let bundle = extract_patches(dir.path(), 1, 32, "high", "low", 0).unwrap();
        assert_eq!(bundle.sources[0].dim(), (6, 6, 6));
    }

    #[test]
    fn test_unpaired_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_pair(dir.path(), "a.img", 1.0);
        let lone = dir.path().join("high/b.img");
        io::write(
            &lone,
            &ArtifactValue::Image(Array3::zeros((3, 3, 3))),
            PortType::Image,
        )
        .unwrap();
        let bundle = extract_patches(dir.path(), 2, 3, "high", "low", 0).unwrap();
        assert_eq!(bundle.len(), 2);
    }

    #[test]
    fn test_empty_folder_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("high")).unwrap();
        fs::create_dir_all(dir.path().join("low")).unwrap();
        assert!(extract_patches(dir.path(), 1, 4, "high", "low", 0).is_err());
    }
}
