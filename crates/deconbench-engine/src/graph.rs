//! Materialized workflow graph
//!
//! The graph is the persistable product of [`Workflow::build_graph`]: a
//! flat list of [`Item`]s, each an ordered chain of [`ModuleInvocation`]s
//! ending in the artifact the item exists to produce. Parameters are kept
//! in ordered maps so the serialized JSON is byte-stable across builds.
//!
//! [`Workflow::build_graph`]: crate::workflow::Workflow::build_graph

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::io::{atomic_write, PortType};
use crate::params::ParamValue;
use crate::step::Category;

/// One module invocation inside an item's chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleInvocation {
    /// Step category the invocation belongs to
    pub name: Category,
    /// Chosen method names (more than one for multi-metric evaluation)
    pub methods: Vec<String>,
    /// Concrete parameter values for this combination (flattened columns)
    pub params: BTreeMap<String, ParamValue>,
    /// Identity of the produced artifact
    #[serde(rename = "outputID")]
    pub output_id: String,
    /// Identities of the artifacts read as positional inputs
    #[serde(rename = "inputIDs", skip_serializing_if = "Option::is_none")]
    pub input_ids: Option<Vec<String>>,
    /// Port type of each positional input
    pub type_input: Vec<PortType>,
    /// Port type of the produced artifact
    pub type_output: PortType,
    /// Unique key for lock files and chain deduplication
    #[serde(default)]
    pub module_id: String,
}

impl ModuleInvocation {
    /// Compute the invocation's unique identity from its artifact wiring
    pub fn compute_module_id(&self) -> String {
        let mut id = format!("{}_{}", self.name.name(), self.output_id);
        if let Some(input_ids) = &self.input_ids {
            for input in input_ids {
                id.push('_');
                id.push_str(input);
            }
        }
        id
    }

    /// Refresh `module_id` after the wiring fields change
    pub fn assign_module_id(&mut self) {
        self.module_id = self.compute_module_id();
    }
}

/// One end-to-end combination: an ordered module chain with one final output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    #[serde(rename = "item_steps")]
    pub modules: Vec<ModuleInvocation>,
}

impl Item {
    /// Drop later repetitions of a module that fan-in brought in twice
    ///
    /// A chain must never list the same logical artifact twice; the first
    /// occurrence (the most upstream) is kept.
    pub fn dedup_modules(&mut self) {
        let mut seen: Vec<String> = Vec::new();
        self.modules.retain(|module| {
            if seen.iter().any(|id| *id == module.module_id) {
                false
            } else {
                seen.push(module.module_id.clone());
                true
            }
        });
    }

    /// The chain's final invocation, whose artifact the item produces
    pub fn last_module(&self) -> Option<&ModuleInvocation> {
        self.modules.last()
    }
}

/// The complete execution graph of a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub name: String,
    pub items: Vec<Item>,
}

impl WorkflowGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Vec::new(),
        }
    }

    pub fn to_json_string(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> crate::error::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        atomic_write(path, self.to_json_string()?.as_bytes())
    }

    pub fn load(path: impl AsRef<Path>) -> crate::error::Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(output_id: &str, input_ids: Option<Vec<&str>>) -> ModuleInvocation {
        let mut params = BTreeMap::new();
        params.insert("sigma".to_string(), ParamValue::Float(2.0));
        let mut module = ModuleInvocation {
            name: Category::Psf,
            methods: vec!["gaussian".to_string()],
            params,
            output_id: output_id.to_string(),
            input_ids: input_ids
                .map(|ids| ids.into_iter().map(str::to_string).collect()),
            type_input: vec![],
            type_output: PortType::Image,
            module_id: String::new(),
        };
        module.assign_module_id();
        module
    }

    #[test]
    fn test_module_id_includes_inputs() {
        let module = invocation("GT0000_PSF0001", Some(vec!["GT0000", "PSF0001"]));
        assert_eq!(
            module.module_id,
            "PSF_GT0000_PSF0001_GT0000_PSF0001"
        );
        let source = invocation("PSF0001", None);
        assert_eq!(source.module_id, "PSF_PSF0001");
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let mut item = Item {
            name: "x".to_string(),
            modules: vec![
                invocation("GT0000", None),
                invocation("PSF0000", None),
                invocation("GT0000", None),
            ],
        };
        item.dedup_modules();
        assert_eq!(item.modules.len(), 2);
        assert_eq!(item.modules[0].output_id, "GT0000");
        assert_eq!(item.modules[1].output_id, "PSF0000");
    }

    #[test]
    fn test_json_round_trip_and_determinism() {
        let graph = WorkflowGraph {
            name: "bench".to_string(),
            items: vec![Item {
                name: "GT0000".to_string(),
                modules: vec![invocation("GT0000", None)],
            }],
        };
        let first = graph.to_json_string().unwrap();
        let second = graph.to_json_string().unwrap();
        assert_eq!(first, second);
        let back: WorkflowGraph = serde_json::from_str(&first).unwrap();
        assert_eq!(back, graph);
        assert!(first.contains("outputID"));
        assert!(first.contains("item_steps"));
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.json");
        let graph = WorkflowGraph {
            name: "bench".to_string(),
            items: vec![],
        };
        graph.save(&path).unwrap();
        let back = WorkflowGraph::load(&path).unwrap();
        assert_eq!(back, graph);
    }
}
