//! Module invocation: one resolved method plus validated parameter binding
//!
//! A [`Module`] wraps a registered method descriptor. Parameter binding is
//! computed per invocation by [`Module::bind_parameters`] and passed into
//! the call; a module carries no mutable parameter state.

use crate::error::{EngineError, Result};
use crate::io::ArtifactValue;
use crate::registry::{MethodDescriptor, MethodRegistry, ParamMap};
use crate::step::{Category, StepConfig};

/// A step category's method, resolved and ready to invoke
#[derive(Clone, Copy)]
pub struct Module {
    kind: Category,
    descriptor: &'static MethodDescriptor,
}

impl Module {
    /// Resolve a method within a capability category
    pub fn new(kind: Category, method: &str) -> Result<Self> {
        let descriptor = MethodRegistry::global().resolve(kind, method)?;
        Ok(Self { kind, descriptor })
    }

    pub fn kind(&self) -> Category {
        self.kind
    }

    pub fn method_name(&self) -> &'static str {
        self.descriptor.name
    }

    pub fn config(&self) -> &'static StepConfig {
        self.kind.config()
    }

    /// Bind declared parameters to overrides and defaults
    ///
    /// A mandatory parameter with no override is *deferred*: it will be
    /// satisfied by a positional upstream input. The number of deferred
    /// parameters must equal `n_inputs`; zero available inputs turns the
    /// first deferred parameter into a [`EngineError::MissingMandatoryParameter`].
    /// Override names the method does not declare are dropped with a warning.
    pub fn bind_parameters(
        &self,
        overrides: &[(String, crate::params::ParamValue)],
        n_inputs: usize,
    ) -> Result<ParamMap> {
        let specs = (self.descriptor.params)();
        for (name, _) in overrides {
            if !specs.iter().any(|s| s.name == *name) {
                log::warn!(
                    "parameter '{}' is not declared by method '{}'; ignoring it",
                    name,
                    self.descriptor.name
                );
            }
        }

        let mut bound = ParamMap::new();
        let mut deferred: Vec<&str> = Vec::new();
        for spec in &specs {
            match overrides.iter().find(|(name, _)| *name == spec.name) {
                Some((_, value)) => {
                    spec.validate(value)?;
                    bound.insert(spec.name.clone(), value.clone());
                }
                None => match &spec.default {
                    Some(default) => {
                        bound.insert(spec.name.clone(), default.clone());
                    }
                    None => deferred.push(&spec.name),
                },
            }
        }

        if !deferred.is_empty() {
            if n_inputs == 0 {
                return Err(EngineError::MissingMandatoryParameter(
                    deferred[0].to_string(),
                ));
            }
            if deferred.len() != n_inputs {
                return Err(EngineError::ArityMismatch {
                    method: self.descriptor.name.to_string(),
                    expected: deferred.len(),
                    provided: n_inputs,
                });
            }
        }
        Ok(bound)
    }

    /// Bind parameters and invoke the method
    pub fn run(
        &self,
        inputs: &[ArtifactValue],
        overrides: &[(String, crate::params::ParamValue)],
    ) -> Result<ArtifactValue> {
        let bound = self.bind_parameters(overrides, inputs.len())?;
        (self.descriptor.run)(inputs, &bound)
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("kind", &self.kind)
            .field("method", &self.descriptor.name)
            .finish()
    }
}
