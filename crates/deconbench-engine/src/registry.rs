//! Method registry with link-time descriptor collection
//!
//! Capability methods register a [`MethodDescriptor`] via
//! [`inventory::submit!`]; dropping a new method file into the methods
//! crate is all that is needed to make it available to steps — no manual
//! registration call. The global registry is built once on first use.
//!
//! # Usage
//!
//! ```ignore
//! inventory::submit! {
//!     MethodDescriptor {
//!         category: Category::Psf,
//!         name: "gaussian",
//!         params: gaussian_params,
//!         run: gaussian_run,
//!     }
//! }
//! ```

use std::collections::BTreeMap;

use once_cell::sync::Lazy;

use crate::error::{EngineError, Result};
use crate::io::ArtifactValue;
use crate::params::{ParamSpec, ParamValue};
use crate::step::Category;

/// Resolved keyword parameters passed to a method invocation
pub type ParamMap = BTreeMap<String, ParamValue>;

/// Signature contract for a capability method: positional artifact inputs
/// plus named, validated parameters, returning one artifact value.
pub type MethodFn = fn(&[ArtifactValue], &ParamMap) -> Result<ArtifactValue>;

/// A registered capability method
#[derive(Debug)]
pub struct MethodDescriptor {
    /// Capability category the method belongs to
    pub category: Category,
    /// Method name, unique within its category
    pub name: &'static str,
    /// Formal parameter specification
    pub params: fn() -> Vec<ParamSpec>,
    /// The method itself
    pub run: MethodFn,
}

inventory::collect!(MethodDescriptor);

/// Registry of capability methods grouped by category
pub struct MethodRegistry {
    methods: BTreeMap<Category, BTreeMap<&'static str, &'static MethodDescriptor>>,
}

static GLOBAL: Lazy<MethodRegistry> = Lazy::new(MethodRegistry::discover);

impl MethodRegistry {
    /// Collect every linked descriptor into a fresh registry
    pub fn discover() -> Self {
        let mut methods: BTreeMap<Category, BTreeMap<&'static str, &'static MethodDescriptor>> =
            BTreeMap::new();
        for descriptor in inventory::iter::<MethodDescriptor> {
            methods
                .entry(descriptor.category)
                .or_default()
                .insert(descriptor.name, descriptor);
        }
        Self { methods }
    }

    /// The process-wide registry, discovered once on first use
    pub fn global() -> &'static MethodRegistry {
        &GLOBAL
    }

    /// Resolve a method by category and name
    pub fn resolve(&self, category: Category, name: &str) -> Result<&'static MethodDescriptor> {
        self.methods
            .get(&category)
            .and_then(|m| m.get(name))
            .copied()
            .ok_or_else(|| EngineError::UnknownMethod {
                name: name.to_string(),
                category: category.name(),
                available: self.method_names(category),
            })
    }

    /// Names of all methods registered for a category
    ///
    /// An unknown or empty category yields an empty list, not an error.
    pub fn method_names(&self, category: Category) -> Vec<&'static str> {
        self.methods
            .get(&category)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Whether a method is registered
    pub fn has_method(&self, category: Category, name: &str) -> bool {
        self.methods
            .get(&category)
            .map(|m| m.contains_key(name))
            .unwrap_or(false)
    }
}

#[cfg(test)]
pub(crate) mod test_methods {
    //! Stub methods registered only into the engine's own test binary.

    use super::*;
    use crate::params::ParamType;

    fn gaussian_params() -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("sigma", &[ParamType::Float, ParamType::Int]),
            ParamSpec::optional("aspect", &[ParamType::Float, ParamType::Int], 1.0),
        ]
    }

    fn gaussian_run(_inputs: &[ArtifactValue], params: &ParamMap) -> Result<ArtifactValue> {
        let sigma = params
            .get("sigma")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| EngineError::MissingMandatoryParameter("sigma".to_string()))?;
        Ok(ArtifactValue::Scalar(sigma))
    }

    inventory::submit! {
        MethodDescriptor {
            category: Category::Psf,
            name: "gaussian",
            params: gaussian_params,
            run: gaussian_run,
        }
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

    fn ellipsoid_run(_inputs: &[ArtifactValue], _params: &ParamMap) -> Result<ArtifactValue> {
        Ok(ArtifactValue::Image(ndarray::Array3::zeros((2, 2, 2))))
    }

    inventory::submit! {
        MethodDescriptor {
            category: Category::GroundTruth,
            name: "ellipsoid",
            params: ellipsoid_params,
            run: ellipsoid_run,
        }
    }

    fn noise_params() -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("img", &[ParamType::Str]),
            ParamSpec::required("snr", &[ParamType::Float, ParamType::Int]),
        ]
    }

    fn noise_run(inputs: &[ArtifactValue], _params: &ParamMap) -> Result<ArtifactValue> {
        Ok(inputs[0].clone())
    }

    inventory::submit! {
        MethodDescriptor {
            category: Category::Transform,
            name: "poisson_noise",
            params: noise_params,
            run: noise_run,
        }
    }

    fn failing_params() -> Vec<ParamSpec> {
        vec![ParamSpec::required("img", &[ParamType::Str])]
    }

    fn failing_run(_inputs: &[ArtifactValue], _params: &ParamMap) -> Result<ArtifactValue> {
        Err(EngineError::failed("synthetic failure"))
    }

    inventory::submit! {
        MethodDescriptor {
            category: Category::Transform,
            name: "always_fails",
            params: failing_params,
            run: failing_run,
        }
    }

    fn pair_params() -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("high", &[ParamType::Str]),
            ParamSpec::required("low", &[ParamType::Str]),
        ]
    }

    fn pair_run(_inputs: &[ArtifactValue], _params: &ParamMap) -> Result<ArtifactValue> {
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

    fn patches_params() -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("folder", &[ParamType::Str]),
            ParamSpec::required("n_patches_per_image", &[ParamType::Int]),
            ParamSpec::optional("min_inputs", &[ParamType::Int], 0i64),
        ]
    }

    fn patches_run(_inputs: &[ArtifactValue], _params: &ParamMap) -> Result<ArtifactValue> {
        Ok(ArtifactValue::Data(crate::io::DataBundle::default()))
    }

    inventory::submit! {
        MethodDescriptor {
            category: Category::DataGen,
            name: "extract_patches",
            params: patches_params,
            run: patches_run,
        }
    }

    fn metric_params() -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("gt", &[ParamType::Str]),
            ParamSpec::required("img", &[ParamType::Str]),
        ]
    }

    fn rmse_run(_inputs: &[ArtifactValue], _params: &ParamMap) -> Result<ArtifactValue> {
        Ok(ArtifactValue::Scalar(0.0))
    }

    inventory::submit! {
        MethodDescriptor {
            category: Category::Evaluation,
            name: "rmse",
            params: metric_params,
            run: rmse_run,
        }
    }

    fn nrmse_run(_inputs: &[ArtifactValue], _params: &ParamMap) -> Result<ArtifactValue> {
        Ok(ArtifactValue::Scalar(0.0))
    }

    inventory::submit! {
        MethodDescriptor {
            category: Category::Evaluation,
            name: "nrmse",
            params: metric_params,
            run: nrmse_run,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_registered_method() {
        let registry = MethodRegistry::global();
        let descriptor = registry.resolve(Category::Psf, "gaussian").unwrap();
        assert_eq!(descriptor.name, "gaussian");
        assert_eq!((descriptor.params)().len(), 2);
    }

    #[test]
    fn test_unknown_method_lists_alternatives() {
        let registry = MethodRegistry::global();
        let err = registry.resolve(Category::Psf, "airy").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("airy"));
        assert!(msg.contains("gaussian"));
    }

    #[test]
    fn test_unknown_category_is_empty_not_error() {
        let registry = MethodRegistry::global();
        assert!(registry.method_names(Category::Training).is_empty());
        assert!(!registry.has_method(Category::Training, "fit_affine"));
    }
}
