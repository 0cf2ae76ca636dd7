//! Pipeline steps and the parameter-expansion algebra
//!
//! A [`Step`] names a capability [`Category`], the method(s) chosen from
//! that category and a table of concrete parameter combinations produced
//! by [`Step::specify_parameters`]. Per-category wiring (arity, port
//! types, join strategy and runner flags) lives in a static [`StepConfig`]
//! table rather than in per-step code.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::io::PortType;
use crate::params::{ParamSetting, ParamSpec, ParamValue};
use crate::registry::MethodRegistry;
use crate::table::{flatten_lists, ParameterTable};

/// Capability categories a step can be bound to
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Category {
    GroundTruth,
    #[serde(rename = "PSF")]
    Psf,
    Convolution,
    Transform,
    Organize,
    DataGen,
    Training,
    Restoration,
    Deconvolution,
    Evaluation,
}

/// Per-category wiring: arity, port types and runner flags
#[derive(Debug, Clone, Copy)]
pub struct StepConfig {
    /// Number of upstream steps feeding this one
    pub n_inputs: usize,
    /// Number of artifacts produced per item (always 1 today)
    pub n_outputs: usize,
    /// Port type of each positional input, in order
    pub input_ports: &'static [PortType],
    /// Port type of the produced artifact
    pub output_port: PortType,
    /// Join upstream items pairwise by shared ancestor instead of by product
    pub align: bool,
    /// Whether the step's own ID contributes to downstream `outputID`s
    pub add_id: bool,
    /// Record the limiting upstream row count as a `min_inputs` readiness gate
    pub wait_complete: bool,
    /// Claim work without the startup jitter delay
    pub run_early: bool,
    /// Recompute even when the output artifact already exists
    pub rerun_always: bool,
}

const fn config(
    n_inputs: usize,
    input_ports: &'static [PortType],
    output_port: PortType,
) -> StepConfig {
    StepConfig {
        n_inputs,
        n_outputs: 1,
        input_ports,
        output_port,
        align: false,
        add_id: true,
        wait_complete: false,
        run_early: false,
        rerun_always: false,
    }
}

static GROUND_TRUTH: StepConfig = config(0, &[], PortType::Image);
static PSF: StepConfig = config(0, &[], PortType::Image);
static CONVOLUTION: StepConfig = config(2, &[PortType::Image, PortType::Image], PortType::Image);
static TRANSFORM: StepConfig = config(1, &[PortType::Image], PortType::Image);
static ORGANIZE: StepConfig = StepConfig {
    align: true,
    add_id: false,
    run_early: true,
    rerun_always: true,
    ..config(2, &[PortType::Image, PortType::Image], PortType::Folder)
};
static DATA_GEN: StepConfig = StepConfig {
    add_id: false,
    wait_complete: true,
    ..config(1, &[PortType::Folder], PortType::Data)
};
static TRAINING: StepConfig = config(1, &[PortType::Data], PortType::Model);
static RESTORATION: StepConfig = config(2, &[PortType::Image, PortType::Model], PortType::Image);
static DECONVOLUTION: StepConfig = config(2, &[PortType::Image, PortType::Image], PortType::Image);
static EVALUATION: StepConfig = StepConfig {
    align: true,
    ..config(2, &[PortType::Image, PortType::Image], PortType::Stat)
};

impl Category {
    pub const ALL: [Category; 10] = [
        Category::GroundTruth,
        Category::Psf,
        Category::Convolution,
        Category::Transform,
        Category::Organize,
        Category::DataGen,
        Category::Training,
        Category::Restoration,
        Category::Deconvolution,
        Category::Evaluation,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Category::GroundTruth => "GroundTruth",
            Category::Psf => "PSF",
            Category::Convolution => "Convolution",
            Category::Transform => "Transform",
            Category::Organize => "Organize",
            Category::DataGen => "DataGen",
            Category::Training => "Training",
            Category::Restoration => "Restoration",
            Category::Deconvolution => "Deconvolution",
            Category::Evaluation => "Evaluation",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.name() == name)
            .ok_or_else(|| EngineError::UnknownStep {
                name: name.to_string(),
                valid: Category::ALL.iter().map(|c| c.name()).collect(),
            })
    }

    pub fn config(self) -> &'static StepConfig {
        match self {
            Category::GroundTruth => &GROUND_TRUTH,
            Category::Psf => &PSF,
            Category::Convolution => &CONVOLUTION,
            Category::Transform => &TRANSFORM,
            Category::Organize => &ORGANIZE,
            Category::DataGen => &DATA_GEN,
            Category::Training => &TRAINING,
            Category::Restoration => &RESTORATION,
            Category::Deconvolution => &DECONVOLUTION,
            Category::Evaluation => &EVALUATION,
        }
    }
}

/// How expansion axes combine into parameter rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpandMode {
    /// Cartesian product of all axes
    #[default]
    Permute,
    /// Positional pairing; all axes must have equal length
    Align,
}

impl FromStr for ExpandMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "permute" => Ok(ExpandMode::Permute),
            "align" => Ok(ExpandMode::Align),
            other => Err(EngineError::InvalidMode(other.to_string())),
        }
    }
}

/// Settings for one [`Step::specify_parameters`] call
#[derive(Debug, Clone)]
pub struct ExpandOptions {
    pub mode: ExpandMode,
    /// Replace the existing table instead of appending to it
    pub overwrite: bool,
    /// Base of generated row IDs; defaults to the step name
    pub base_name: Option<String>,
    /// Separator between the base name and the row index
    pub separator: String,
    /// Zero-padded width of the row index
    pub id_digits: usize,
}

impl Default for ExpandOptions {
    fn default() -> Self {
        Self {
            mode: ExpandMode::Permute,
            overwrite: true,
            base_name: None,
            separator: String::new(),
            id_digits: 4,
        }
    }
}

impl ExpandOptions {
    pub fn aligned() -> Self {
        Self {
            mode: ExpandMode::Align,
            ..Self::default()
        }
    }
}

/// One pipeline stage of a workflow
#[derive(Debug, Clone)]
pub struct Step {
    kind: Category,
    methods: Vec<String>,
    parameters: ParameterTable,
    /// Explicit upstream step indices; `None` means "infer when added"
    pub input_steps: Option<Vec<usize>>,
}

impl Step {
    pub fn new(kind: Category) -> Self {
        Self {
            kind,
            methods: Vec::new(),
            parameters: ParameterTable::new(),
            input_steps: None,
        }
    }

    /// Choose the method(s) this step runs; every name must be registered
    pub fn with_methods<S: Into<String>>(
        mut self,
        methods: impl IntoIterator<Item = S>,
    ) -> Result<Self> {
        let registry = MethodRegistry::global();
        let methods: Vec<String> = methods.into_iter().map(Into::into).collect();
        for name in &methods {
            registry.resolve(self.kind, name)?;
        }
        self.methods = methods;
        Ok(self)
    }

    pub fn with_method(self, method: impl Into<String>) -> Result<Self> {
        self.with_methods([method.into()])
    }

    pub fn kind(&self) -> Category {
        self.kind
    }

    pub fn config(&self) -> &'static StepConfig {
        self.kind.config()
    }

    pub fn methods(&self) -> &[String] {
        &self.methods
    }

    /// First chosen method, if any
    pub fn method(&self) -> Option<&str> {
        self.methods.first().map(String::as_str)
    }

    pub fn parameters(&self) -> &ParameterTable {
        &self.parameters
    }

    pub(crate) fn parameters_mut(&mut self) -> &mut ParameterTable {
        &mut self.parameters
    }

    /// Formal parameters of all chosen methods, deduplicated by name
    fn formal_parameters(&self) -> Result<Vec<ParamSpec>> {
        let registry = MethodRegistry::global();
        let mut specs: Vec<ParamSpec> = Vec::new();
        for method in &self.methods {
            let descriptor = registry.resolve(self.kind, method)?;
            for spec in (descriptor.params)() {
                if !specs.iter().any(|s| s.name == spec.name) {
                    specs.push(spec);
                }
            }
        }
        Ok(specs)
    }

    /// Expand parameter settings into a table of concrete combinations
    ///
    /// Lists of two or more values form expansion axes; single values (and
    /// one-element lists) broadcast onto every row. Under
    /// [`ExpandMode::Permute`] the rows are the Cartesian product of the
    /// axes; under [`ExpandMode::Align`] all axes must have equal length
    /// and row *i* pairs the *i*-th value of each axis. Parameters declared
    /// [`ParamSetting::FromPipeline`] are bound to upstream artifacts at
    /// run time and get no column. Each row receives an
    /// `ID = {base}{separator}{zero-padded index}`.
    ///
    /// With `overwrite = false` new rows are appended as-is; IDs are not
    /// deduplicated across calls, so appending with the same base name is
    /// the caller's responsibility to keep unique.
    pub fn specify_parameters(
        &mut self,
        settings: &[(&str, ParamSetting)],
        options: &ExpandOptions,
    ) -> Result<()> {
        let specs = self.formal_parameters()?;
        for (name, _) in settings {
            if !specs.iter().any(|s| s.name == *name) {
                log::warn!(
                    "parameter '{}' is not a valid parameter of {:?}; ignoring it",
                    name,
                    self.methods
                );
            }
        }

        // spec-ordered singletons and expansion axes
        let mut singles: Vec<(String, ParamValue)> = Vec::new();
        let mut axes: Vec<(String, Vec<ParamValue>)> = Vec::new();
        for spec in &specs {
            let setting = settings
                .iter()
                .find(|(name, _)| *name == spec.name)
                .map(|(_, s)| s);
            match setting {
                Some(ParamSetting::FromPipeline) => {}
                Some(ParamSetting::Value(value)) => {
                    spec.validate(value)?;
                    singles.push((spec.name.clone(), value.clone()));
                }
                Some(ParamSetting::Values(values)) => {
                    for value in values {
                        spec.validate(value)?;
                    }
                    if values.len() == 1 {
                        singles.push((spec.name.clone(), values[0].clone()));
                    } else {
                        axes.push((spec.name.clone(), values.clone()));
                    }
                }
                None => match &spec.default {
                    Some(default) => singles.push((spec.name.clone(), default.clone())),
                    None => {
                        return Err(EngineError::MissingMandatoryParameter(spec.name.clone()))
                    }
                },
            }
        }

        let combinations = expand_axes(&axes, options.mode)?;

        let base = options
            .base_name
            .clone()
            .unwrap_or_else(|| self.kind.name().to_string());
        let mut table = ParameterTable::new();
        for (i, combo) in combinations.iter().enumerate() {
            // merge axis values and singletons back into declaration order
            let mut entries: Vec<(String, ParamValue)> = Vec::new();
            for spec in &specs {
                if let Some((_, value)) = combo.iter().find(|(n, _)| *n == spec.name) {
                    entries.push((spec.name.clone(), value.clone()));
                } else if let Some((_, value)) =
                    singles.iter().find(|(n, _)| *n == spec.name)
                {
                    entries.push((spec.name.clone(), value.clone()));
                }
            }
            let mut entries = flatten_lists(entries);
            entries.push((
                "ID".to_string(),
                ParamValue::Str(format!(
                    "{}{}{:0width$}",
                    base,
                    options.separator,
                    i,
                    width = options.id_digits
                )),
            ));

            if table.columns().is_empty() {
                let columns = entries.iter().map(|(n, _)| n.clone()).collect();
                table = ParameterTable::with_columns(columns);
            }
            table.push_row(entries.into_iter().map(|(_, v)| v).collect())?;
        }

        if options.overwrite {
            self.parameters = table;
        } else {
            self.parameters.concat(&table);
        }
        Ok(())
    }

    /// Persist the parameter table as CSV
    pub fn save_parameters(&self, path: impl AsRef<Path>) -> Result<()> {
        self.parameters.save(path)
    }

    /// Replace the parameter table with one loaded from CSV
    pub fn load_parameters(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.parameters = ParameterTable::load(path)?;
        Ok(())
    }
}

/// Combine expansion axes into rows of named values
fn expand_axes(
    axes: &[(String, Vec<ParamValue>)],
    mode: ExpandMode,
) -> Result<Vec<Vec<(String, ParamValue)>>> {
    match mode {
        ExpandMode::Permute => {
            let mut rows: Vec<Vec<(String, ParamValue)>> = vec![Vec::new()];
            for (name, values) in axes {
                let mut next = Vec::with_capacity(rows.len() * values.len());
                for row in &rows {
                    for value in values {
                        let mut row = row.clone();
                        row.push((name.clone(), value.clone()));
                        next.push(row);
                    }
                }
                rows = next;
            }
            Ok(rows)
        }
        ExpandMode::Align => {
            let length = axes.first().map(|(_, v)| v.len()).unwrap_or(0);
            for (_, values) in axes {
                if values.len() != length {
                    return Err(EngineError::AlignmentLengthMismatch {
                        expected: length,
                        actual: values.len(),
                    });
                }
            }
            if axes.is_empty() {
                return Ok(vec![Vec::new()]);
            }
            let mut rows = Vec::with_capacity(length);
            for i in 0..length {
                rows.push(
                    axes.iter()
                        .map(|(name, values)| (name.clone(), values[i].clone()))
                        .collect(),
                );
            }
            Ok(rows)
        }
    }
}
