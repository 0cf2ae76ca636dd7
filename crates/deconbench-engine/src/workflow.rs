//! Workflow assembly and graph construction
//!
//! A [`Workflow`] is an ordered list of parameterized [`Step`]s with
//! explicit or inferred data-dependency edges. [`Workflow::build_graph`]
//! turns the list into a flat set of executable [`Item`]s by combining
//! adjacent steps' item lists block by block, left to right: a permute
//! join takes the Cartesian product of the upstream blocks, an align join
//! keeps only combinations whose chains descend from the same root
//! artifact.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::graph::{Item, ModuleInvocation, WorkflowGraph};
use crate::io::atomic_write;
use crate::params::ParamValue;
use crate::step::{Category, Step};

/// An ordered, wired list of steps plus its materialized graph
#[derive(Debug, Clone)]
pub struct Workflow {
    name: String,
    output_path: PathBuf,
    steps: Vec<Step>,
    graph: Option<WorkflowGraph>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            output_path: output_path.into(),
            steps: Vec::new(),
            graph: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn graph(&self) -> Option<&WorkflowGraph> {
        self.graph.as_ref()
    }

    /// Append a step, wiring its inputs to upstream steps
    ///
    /// With `input_steps = None` the step reads from the most recently
    /// added N steps, where N is its declared input arity. A step flagged
    /// `wait_complete` additionally records the row count of the limiting
    /// producer (the first input of the step's own first input) as a
    /// `min_inputs` readiness gate, overwriting the method's declared
    /// default; the gate is consulted by the method at run time. Returns
    /// the new step's index.
    pub fn add_step(&mut self, mut step: Step, input_steps: Option<Vec<usize>>) -> Result<usize> {
        if step.method().is_none() {
            return Err(EngineError::Malformed {
                what: "step",
                detail: format!("no method chosen for step {}", step.kind().name()),
            });
        }
        let config = step.config();
        if config.n_inputs > self.steps.len() {
            return Err(EngineError::NotEnoughUpstreamSteps {
                step: step.kind().name(),
                required: config.n_inputs,
                available: self.steps.len(),
            });
        }
        let resolved = match input_steps {
            Some(indices) => {
                if indices.len() != config.n_inputs {
                    return Err(EngineError::InvalidInputStepReference {
                        step: step.kind().name(),
                        reason: format!(
                            "{} input steps declared, {} expected",
                            indices.len(),
                            config.n_inputs
                        ),
                    });
                }
                if let Some(&bad) = indices.iter().find(|&&i| i >= self.steps.len()) {
                    return Err(EngineError::InvalidInputStepReference {
                        step: step.kind().name(),
                        reason: format!(
                            "step index {} out of range ({} steps added)",
                            bad,
                            self.steps.len()
                        ),
                    });
                }
                indices
            }
            None => (self.steps.len() - config.n_inputs..self.steps.len()).collect(),
        };
        step.input_steps = Some(resolved);

        if config.wait_complete {
            let limiting = step
                .input_steps
                .as_ref()
                .and_then(|inputs| inputs.first())
                .and_then(|&i| self.steps[i].input_steps.as_ref())
                .and_then(|inputs| inputs.first())
                .map(|&i| self.steps[i].parameters().len())
                .unwrap_or(0);
            step.parameters_mut()
                .set_broadcast_column("min_inputs", ParamValue::Int(limiting as i64));
        }

        self.steps.push(step);
        self.graph = None;
        Ok(self.steps.len() - 1)
    }

    /// Build (or rebuild) the execution graph from the current steps
    ///
    /// The same steps and wiring always produce the same graph, byte for
    /// byte; artifact identities are derived purely from parameter-row IDs.
    pub fn build_graph(&mut self) -> Result<&WorkflowGraph> {
        let mut blocks: Vec<Vec<Item>> = Vec::new();
        for step in &self.steps {
            let own_items = items_for_step(step)?;
            let config = step.config();
            let block = if config.n_inputs == 0 {
                own_items
            } else {
                let input_indices = step.input_steps.as_deref().unwrap_or(&[]);
                let inputs: Vec<&[Item]> = input_indices
                    .iter()
                    .map(|&i| blocks[i].as_slice())
                    .collect();
                if config.align && inputs.len() == 2 {
                    align_join(step, &inputs, &own_items)
                } else {
                    permute_join(step, &inputs, &own_items)
                }
            };
            blocks.push(block);
        }
        let items = blocks.pop().unwrap_or_default();
        let graph = self.graph.insert(WorkflowGraph {
            name: self.name.clone(),
            items,
        });
        Ok(graph)
    }

    /// Build the graph if it has not been built since the last mutation
    pub fn ensure_graph(&mut self) -> Result<&WorkflowGraph> {
        if self.graph.is_none() {
            self.build_graph()?;
        }
        Ok(self
            .graph
            .get_or_insert_with(|| WorkflowGraph::new(self.name.clone())))
    }

    /// Persist the descriptor, every parameter table and the graph
    pub fn save(&mut self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir.join("parameters"))?;
        let mut step_descriptors = Vec::with_capacity(self.steps.len());
        for (i, step) in self.steps.iter().enumerate() {
            let parameter_path = format!("parameters/{:02}_{}.csv", i, step.kind().name());
            step.save_parameters(dir.join(&parameter_path))?;
            step_descriptors.push(StepDescriptor {
                name: step.kind().name().to_string(),
                methods: step.methods().to_vec(),
                parameter_path,
                n_parameters: step.parameters().len(),
                n_inputs: step.config().n_inputs,
                n_outputs: step.config().n_outputs,
                input_steps: step.input_steps.clone().unwrap_or_default(),
            });
        }
        let descriptor = WorkflowDescriptor {
            name: self.name.clone(),
            path: self.output_path.clone(),
            steps: step_descriptors,
        };
        atomic_write(
            &dir.join(format!("{}.json", self.name)),
            serde_json::to_string_pretty(&descriptor)?.as_bytes(),
        )?;
        self.ensure_graph()?;
        if let Some(graph) = &self.graph {
            graph.save(dir.join(format!("{}_graph.json", self.name)))?;
        }
        Ok(())
    }

    /// Reconstruct a workflow from a saved descriptor
    pub fn load(dir: impl AsRef<Path>, name: &str) -> Result<Self> {
        let dir = dir.as_ref();
        let text = fs::read_to_string(dir.join(format!("{}.json", name)))?;
        let descriptor: WorkflowDescriptor = serde_json::from_str(&text)?;
        let mut workflow = Workflow::new(descriptor.name, descriptor.path);
        for step_desc in descriptor.steps {
            let kind = Category::from_name(&step_desc.name)?;
            let mut step = Step::new(kind).with_methods(step_desc.methods)?;
            step.load_parameters(dir.join(&step_desc.parameter_path))?;
            step.input_steps = Some(step_desc.input_steps);
            workflow.steps.push(step);
        }
        Ok(workflow)
    }
}

/// Persisted workflow summary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkflowDescriptor {
    name: String,
    path: PathBuf,
    steps: Vec<StepDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepDescriptor {
    name: String,
    methods: Vec<String>,
    parameter_path: String,
    n_parameters: usize,
    n_inputs: usize,
    n_outputs: usize,
    input_steps: Vec<usize>,
}

/// Materialize a step's parameter rows as single-module items
///
/// A step with no parameter rows still yields one item with a synthetic
/// zero-index ID, so it participates in joins.
fn items_for_step(step: &Step) -> Result<Vec<Item>> {
    let config = step.config();
    let table = step.parameters();
    if table.is_empty() {
        let mut module = ModuleInvocation {
            name: step.kind(),
            methods: step.methods().to_vec(),
            params: BTreeMap::new(),
            output_id: format!("{}0000", step.kind().name()),
            input_ids: None,
            type_input: config.input_ports.to_vec(),
            type_output: config.output_port,
            module_id: String::new(),
        };
        module.assign_module_id();
        return Ok(vec![Item {
            name: module.output_id.clone(),
            modules: vec![module],
        }]);
    }

    let mut items = Vec::with_capacity(table.len());
    for i in 0..table.len() {
        let mut params = BTreeMap::new();
        let mut output_id = None;
        for (name, value) in table.row_entries(i) {
            if name == "ID" {
                output_id = value.as_str().map(str::to_string);
            } else if value != ParamValue::Str(String::new()) {
                params.insert(name, value);
            }
        }
        let output_id = output_id.ok_or_else(|| EngineError::Malformed {
            what: "parameter table row",
            detail: format!("row {} of step {} has no ID", i, step.kind().name()),
        })?;
        let mut module = ModuleInvocation {
            name: step.kind(),
            methods: step.methods().to_vec(),
            params,
            output_id,
            input_ids: None,
            type_input: config.input_ports.to_vec(),
            type_output: config.output_port,
            module_id: String::new(),
        };
        module.assign_module_id();
        items.push(Item {
            name: module.output_id.clone(),
            modules: vec![module],
        });
    }
    Ok(items)
}

/// Chain one upstream combination with one of the step's own modules
fn compose(step: &Step, upstreams: &[&Item], own: &ModuleInvocation) -> Item {
    let config = step.config();
    let mut modules: Vec<ModuleInvocation> = Vec::new();
    for upstream in upstreams {
        modules.extend(upstream.modules.iter().cloned());
    }

    let contributed: Vec<String> = upstreams
        .iter()
        .filter_map(|u| u.last_module().map(|m| m.output_id.clone()))
        .collect();
    let input_ids: Vec<String> = contributed.iter().take(config.n_inputs).cloned().collect();

    // aligned pairs share a root, so only the second chain names the output
    let mut parts: Vec<String> = if config.align && contributed.len() == 2 {
        vec![contributed[1].clone()]
    } else {
        contributed
    };
    if config.add_id {
        parts.push(own.output_id.clone());
    }
    let mut output_id = parts.join("_");
    if step.kind() == Category::Organize {
        // the shared folder is named after everything but the reference input
        if let Some(first) = input_ids.first() {
            output_id = output_id.replace(first.as_str(), "");
        }
    }
    let output_id = output_id.trim_matches('_').to_string();

    let mut last = own.clone();
    last.output_id = output_id.clone();
    last.input_ids = Some(input_ids);
    last.assign_module_id();
    modules.push(last);

    let mut item = Item {
        name: output_id,
        modules,
    };
    item.dedup_modules();
    item
}

/// Cartesian product of every upstream block and the step's own items
fn permute_join(step: &Step, inputs: &[&[Item]], own_items: &[Item]) -> Vec<Item> {
    let mut combos: Vec<Vec<&Item>> = vec![Vec::new()];
    for block in inputs {
        let mut next = Vec::with_capacity(combos.len() * block.len());
        for combo in &combos {
            for item in *block {
                let mut combo = combo.clone();
                combo.push(item);
                next.push(combo);
            }
        }
        combos = next;
    }

    let mut items = Vec::with_capacity(combos.len() * own_items.len());
    for combo in &combos {
        for local in own_items {
            if let Some(own) = local.last_module() {
                items.push(compose(step, combo, own));
            }
        }
    }
    items
}

/// Pairwise join keeping only combinations that share a root artifact
fn align_join(step: &Step, inputs: &[&[Item]], own_items: &[Item]) -> Vec<Item> {
    let mut items = Vec::new();
    for first in inputs[0] {
        for second in inputs[1] {
            let matched = match (first.modules.first(), second.modules.first()) {
                (Some(a), Some(b)) => a.output_id == b.output_id,
                _ => false,
            };
            if !matched {
                continue;
            }
            for local in own_items {
                if let Some(own) = local.last_module() {
                    items.push(compose(step, &[first, second], own));
                }
            }
        }
    }
    items
}
