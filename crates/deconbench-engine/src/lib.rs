//! Workflow execution engine for deconvolution benchmarking
//!
//! The engine turns a declarative list of pipeline steps into a concrete
//! graph of work items and executes them in parallel against a shared
//! output directory:
//!
//! - [`registry`] — link-time collection of capability methods
//! - [`params`] / [`table`] — parameter model and tabular storage
//! - [`step`] — step categories and the permute/align expansion algebra
//! - [`module`] — validated parameter binding and method invocation
//! - [`workflow`] / [`graph`] — graph construction from wired steps
//! - [`runner`] — lock-coordinated, resumable parallel execution
//! - [`io`] — port-typed artifact codecs with atomic writes
//!
//! # Example
//!
//! ```ignore
//! let mut gt = Step::new(Category::GroundTruth).with_method("ellipsoid")?;
//! gt.specify_parameters(
//!     &[("size", ParamSetting::values([10.0, 12.0]))],
//!     &ExpandOptions::default(),
//! )?;
//!
//! let mut workflow = Workflow::new("bench", "data/bench/out");
//! workflow.add_step(gt, None)?;
//! workflow.build_graph()?;
//! let results = workflow.run(&RunOptions::default()).await?;
//! ```

pub mod error;
pub mod graph;
pub mod io;
pub mod module;
pub mod params;
pub mod registry;
pub mod runner;
pub mod step;
pub mod table;
pub mod workflow;

pub use error::{EngineError, Result};
pub use graph::{Item, ModuleInvocation, WorkflowGraph};
pub use io::{ArtifactValue, DataBundle, PortType};
pub use module::Module;
pub use params::{ParamSetting, ParamSpec, ParamType, ParamValue};
pub use registry::{MethodDescriptor, MethodFn, MethodRegistry, ParamMap};
pub use runner::RunOptions;
pub use step::{Category, ExpandMode, ExpandOptions, Step, StepConfig};
pub use table::ParameterTable;
pub use workflow::Workflow;

// re-exported so method crates can register descriptors with one import
pub use inventory;
