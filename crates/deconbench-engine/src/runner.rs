//! Concurrent execution of a workflow graph
//!
//! Items run in parallel under a bounded worker pool; within one item the
//! module chain executes in dependency order. Coordination between workers
//! (including workers of other processes sharing the output directory) is
//! file-based: a module claims its artifact by atomically creating
//! `{module_id}.lock`, computes and writes the artifact, and releases the
//! lock. The lock is held by an RAII guard, so it is removed on every exit
//! path; a lock older than the staleness timeout is assumed to belong to a
//! crashed worker and is broken with a warning.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use rand::Rng;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::sleep;

use crate::error::{EngineError, Result};
use crate::graph::{Item, ModuleInvocation};
use crate::io::{self, ArtifactValue, PortType};
use crate::module::Module;
use crate::params::ParamValue;
use crate::step::Category;
use crate::table::{collapse_lists, ParameterTable};
use crate::workflow::Workflow;

/// Settings for one [`Workflow::run`] call
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Maximum number of items executing concurrently
    pub max_parallelism: usize,
    /// Log per-module progress at info level instead of debug
    pub verbose: bool,
    /// Execute only the first N modules of each chain (staged testing)
    pub max_steps: Option<usize>,
    /// Age after which another worker's lock is treated as abandoned
    pub lock_timeout: Duration,
    /// Sleep between checks while waiting on another worker's lock
    pub poll_interval: Duration,
    /// Upper bound of the random delay before the first lock check
    pub startup_jitter: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_parallelism: 8,
            verbose: true,
            max_steps: None,
            lock_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
            startup_jitter: Duration::from_secs(1),
        }
    }
}

struct RunContext {
    output_dir: PathBuf,
    options: RunOptions,
}

impl Workflow {
    /// Execute every item of the graph and aggregate the stat artifacts
    ///
    /// Builds the graph if it has not been built yet. Returns the combined
    /// results table, also written next to the output directory as
    /// `{workflow name}.csv`. The first item failure is returned after all
    /// in-flight items have finished; completed sibling artifacts remain
    /// on disk.
    pub async fn run(&mut self, options: &RunOptions) -> Result<ParameterTable> {
        let graph = self.ensure_graph()?.clone();
        fs::create_dir_all(self.output_path())?;
        log::info!(
            "running workflow '{}': {} items into {}",
            graph.name,
            graph.items.len(),
            self.output_path().display()
        );

        let ctx = Arc::new(RunContext {
            output_dir: self.output_path().to_path_buf(),
            options: options.clone(),
        });
        let pool = Arc::new(Semaphore::new(options.max_parallelism.max(1)));

        let mut tasks = JoinSet::new();
        for item in graph.items {
            let ctx = Arc::clone(&ctx);
            let pool = Arc::clone(&pool);
            tasks.spawn(async move {
                let _permit = pool
                    .acquire_owned()
                    .await
                    .map_err(|_| EngineError::failed("worker pool closed"))?;
                run_item(&ctx, &item).await
            });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    log::error!("item failed: {}", err);
                    first_error.get_or_insert(err);
                }
                Err(err) => {
                    first_error
                        .get_or_insert(EngineError::failed(format!("worker panicked: {}", err)));
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }
        self.aggregate_results()
    }

    /// Concatenate every stat artifact into one table named after the workflow
    pub fn aggregate_results(&self) -> Result<ParameterTable> {
        let mut paths: Vec<PathBuf> = fs::read_dir(self.output_path())?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map(|e| e == "csv").unwrap_or(false))
            .collect();
        paths.sort();

        let mut combined = ParameterTable::new();
        for path in &paths {
            combined.concat(&ParameterTable::load(path)?);
        }
        let parent = self
            .output_path()
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| self.output_path());
        combined.save(parent.join(format!("{}.csv", self.name())))?;
        Ok(combined)
    }
}

async fn run_item(ctx: &Arc<RunContext>, item: &Item) -> Result<()> {
    let limit = ctx.options.max_steps.unwrap_or(item.modules.len());
    for module in item.modules.iter().take(limit) {
        run_module(ctx, module).await?;
    }
    Ok(())
}

async fn run_module(ctx: &Arc<RunContext>, module: &ModuleInvocation) -> Result<()> {
    let output_path = ctx.output_dir.join(format!(
        "{}{}",
        module.output_id,
        module.type_output.extension()
    ));
    let config = module.name.config();

    if !config.run_early && !ctx.options.startup_jitter.is_zero() {
        // desynchronize the initial claim race when many workers start at once
        let jitter = Duration::from_millis(
            rand::thread_rng().gen_range(0..=ctx.options.startup_jitter.as_millis() as u64),
        );
        sleep(jitter).await;
    }

    let guard = match claim(ctx, module, &output_path).await? {
        Some(guard) => guard,
        None => {
            if ctx.options.verbose {
                log::info!("{}: already computed, skipping", module.module_id);
            }
            return Ok(());
        }
    };

    if ctx.options.verbose {
        log::info!("{}: computing {}", module.module_id, output_path.display());
    } else {
        log::debug!("{}: computing {}", module.module_id, output_path.display());
    }

    let ctx_blocking = Arc::clone(ctx);
    let module_blocking = module.clone();
    let result = tokio::task::spawn_blocking(move || {
        execute_module(&ctx_blocking, &module_blocking, &output_path)
    })
    .await
    .map_err(|err| EngineError::failed(format!("worker panicked: {}", err)))?;
    drop(guard);
    result
}

/// Read inputs, invoke the method(s) and write the artifact
fn execute_module(
    ctx: &RunContext,
    module: &ModuleInvocation,
    output_path: &Path,
) -> Result<()> {
    let mut inputs: Vec<ArtifactValue> = Vec::new();
    if let Some(input_ids) = &module.input_ids {
        for (i, input_id) in input_ids.iter().enumerate() {
            let port = module.type_input.get(i).copied().unwrap_or(PortType::Image);
            let path = ctx
                .output_dir
                .join(format!("{}{}", input_id, port.extension()));
            inputs.push(io::read(path, port)?);
        }
    }

    let mut overrides: Vec<(String, ParamValue)> = collapse_lists(
        module
            .params
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect(),
    );
    if module.type_output.is_pathlike() {
        // no returned value to serialize; the method manages the path itself
        overrides.push((
            "fn_output".to_string(),
            ParamValue::Str(output_path.display().to_string()),
        ));
    }
    if module.name == Category::Organize {
        if let (Some(input_ids), Some(port)) = (&module.input_ids, module.type_input.first()) {
            if let Some(first) = input_ids.first() {
                overrides.push((
                    "img_name".to_string(),
                    ParamValue::Str(format!("{}{}", first, port.extension())),
                ));
            }
        }
    }

    let method = module.methods.first().ok_or_else(|| EngineError::Malformed {
        what: "graph module",
        detail: format!("{} has no method", module.module_id),
    })?;
    let value = match module.name {
        // a single metric still produces a one-row stat table
        Category::Evaluation => evaluate_metrics(module, &inputs, &overrides)?,
        _ => Module::new(module.name, method)?.run(&inputs, &overrides)?,
    };
    io::write(output_path, &value, module.type_output)
}

/// One combined row keyed by `OutputID`, one column per metric
fn evaluate_metrics(
    module: &ModuleInvocation,
    inputs: &[ArtifactValue],
    overrides: &[(String, ParamValue)],
) -> Result<ArtifactValue> {
    let mut columns = vec!["OutputID".to_string()];
    let mut row = vec![ParamValue::Str(module.output_id.clone())];
    for method in &module.methods {
        let score = Module::new(module.name, method)?
            .run(inputs, overrides)?
            .as_scalar()?;
        columns.push(method.clone());
        row.push(ParamValue::Float(score));
    }
    let mut table = ParameterTable::with_columns(columns);
    table.push_row(row)?;
    Ok(ArtifactValue::Table(table))
}

/// Removes the lock file when dropped, on success and failure alike
struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != ErrorKind::NotFound {
                log::warn!("failed to release lock {}: {}", self.path.display(), err);
            }
        }
    }
}

/// Claim the right to compute an artifact, or report it as already done
///
/// Returns `None` when the artifact exists (and the step is not flagged
/// always-rerun) once any in-flight writer has released its lock.
async fn claim(
    ctx: &RunContext,
    module: &ModuleInvocation,
    output_path: &Path,
) -> Result<Option<LockGuard>> {
    let lock_path = ctx.output_dir.join(format!("{}.lock", module.module_id));
    let rerun_always = module.name.config().rerun_always;
    loop {
        if output_path.exists() && !rerun_always {
            while lock_path.exists() {
                sleep(ctx.options.poll_interval).await;
            }
            return Ok(None);
        }
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(_) => {
                return Ok(Some(LockGuard {
                    path: lock_path,
                }))
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                if lock_is_stale(&lock_path, ctx.options.lock_timeout) {
                    log::warn!(
                        "breaking stale lock {} (older than {:?})",
                        lock_path.display(),
                        ctx.options.lock_timeout
                    );
                    if let Err(err) = fs::remove_file(&lock_path) {
                        if err.kind() != ErrorKind::NotFound {
                            return Err(err.into());
                        }
                    }
                    continue;
                }
                sleep(ctx.options.poll_interval).await;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn lock_is_stale(path: &Path, timeout: Duration) -> bool {
    match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => SystemTime::now()
            .duration_since(modified)
            .map(|age| age >= timeout)
            .unwrap_or(false),
        // released (or unreadable) between checks; let the claim loop decide
        Err(_) => false,
    }
}
