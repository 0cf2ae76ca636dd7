//! Command-line host for deconvolution benchmark runs
//!
//! Assembles the canonical six-step benchmark (ground truth, PSF,
//! convolution, noise, deconvolution, evaluation) from command-line
//! options, persists the workflow descriptor next to the output folder
//! and executes it.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use deconbench_engine::{
    Category, ExpandOptions, ParamSetting, ParamValue, RunOptions, Step, Workflow,
};

// pull in the method registrations
use deconbench_methods as _;

#[derive(Debug, Parser)]
#[command(name = "deconbench", version, about = "Benchmark deconvolution methods on synthetic microscopy data")]
struct Args {
    /// Directory receiving all intermediate and final artifacts
    #[arg(short, long, default_value = "deconbench-out")]
    output: PathBuf,

    /// Workflow name, used for the descriptor and result files
    #[arg(long, default_value = "benchmark")]
    name: String,

    /// Maximum number of items executed in parallel
    #[arg(short = 'j', long, default_value_t = 8)]
    workers: usize,

    /// Ellipsoid sizes in um (each value becomes one ground truth)
    #[arg(long, value_delimiter = ',', default_value = "6,8")]
    sizes: Vec<f64>,

    /// Gaussian PSF sigmas in um (each value becomes one PSF)
    #[arg(long, value_delimiter = ',', default_value = "0.5,1.0")]
    sigmas: Vec<f64>,

    /// Elongation of the PSF along the axial direction
    #[arg(long, default_value_t = 3.0)]
    aspect: f64,

    /// Signal-to-noise ratios for the Poisson noise step
    #[arg(long, value_delimiter = ',', default_value = "2,5,10")]
    snr: Vec<f64>,

    /// Richardson-Lucy iteration counts to benchmark
    #[arg(long, value_delimiter = ',', default_value = "10")]
    iterations: Vec<i64>,

    /// Quality metrics computed against the ground truth
    #[arg(long, value_delimiter = ',', default_value = "rmse,nrmse,psnr,ssim")]
    metrics: Vec<String>,

    /// Seconds after which another run's lock is considered stale
    #[arg(long, default_value_t = 60)]
    lock_timeout: u64,

    /// Only build and save the workflow, do not execute it
    #[arg(long)]
    dry_run: bool,
}

fn expand(base: &str) -> ExpandOptions {
    ExpandOptions {
        base_name: Some(base.to_string()),
        ..ExpandOptions::default()
    }
}

fn floats(values: &[f64]) -> ParamSetting {
    ParamSetting::Values(values.iter().map(|&v| ParamValue::Float(v)).collect())
}

fn ints(values: &[i64]) -> ParamSetting {
    ParamSetting::Values(values.iter().map(|&v| ParamValue::Int(v)).collect())
}

fn build_workflow(args: &Args) -> deconbench_engine::Result<Workflow> {
    let mut workflow = Workflow::new(&args.name, &args.output);

    let mut gt = Step::new(Category::GroundTruth).with_method("ellipsoid")?;
    gt.specify_parameters(&[("size", floats(&args.sizes))], &expand("GT"))?;
    let gt_idx = workflow.add_step(gt, None)?;

    let mut psf = Step::new(Category::Psf).with_method("gaussian")?;
    psf.specify_parameters(
        &[
            ("sigma", floats(&args.sigmas)),
            ("aspect", ParamSetting::value(args.aspect)),
        ],
        &expand("PSF"),
    )?;
    let psf_idx = workflow.add_step(psf, None)?;

    let mut conv = Step::new(Category::Convolution).with_method("convolve")?;
    conv.specify_parameters(
        &[
            ("img", ParamSetting::pipeline()),
            ("psf", ParamSetting::pipeline()),
        ],
        &expand("Conv"),
    )?;
    workflow.add_step(conv, Some(vec![gt_idx, psf_idx]))?;

    let mut noise = Step::new(Category::Transform).with_method("poisson_noise")?;
    noise.specify_parameters(
        &[
            ("img", ParamSetting::pipeline()),
            ("snr", floats(&args.snr)),
        ],
        &expand("Noise"),
    )?;
    let noise_idx = workflow.add_step(noise, None)?;

    let mut deconv = Step::new(Category::Deconvolution).with_method("richardson_lucy")?;
    deconv.specify_parameters(
        &[
            ("img", ParamSetting::pipeline()),
            ("psf", ParamSetting::pipeline()),
            ("iterations", ints(&args.iterations)),
        ],
        &expand("RL"),
    )?;
    let deconv_idx = workflow.add_step(deconv, Some(vec![noise_idx, psf_idx]))?;

    let mut eval = Step::new(Category::Evaluation).with_methods(&args.metrics)?;
    eval.specify_parameters(
        &[
            ("gt", ParamSetting::pipeline()),
            ("img", ParamSetting::pipeline()),
        ],
        &expand("Ev"),
    )?;
    workflow.add_step(eval, Some(vec![gt_idx, deconv_idx]))?;

    Ok(workflow)
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if let Err(err) = run(&args).await {
        log::error!("{}", err);
        std::process::exit(1);
    }
}

async fn run(args: &Args) -> deconbench_engine::Result<()> {
    let mut workflow = build_workflow(args)?;
    let n_items = workflow.build_graph()?.items.len();
    log::info!(
        "workflow '{}': {} steps, {} items",
        workflow.name(),
        workflow.steps().len(),
        n_items
    );

    let save_dir = args
        .output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| args.output.clone());
    workflow.save(&save_dir)?;
    log::info!("workflow descriptor saved to {}", save_dir.display());
    if args.dry_run {
        return Ok(());
    }

    let options = RunOptions {
        max_parallelism: args.workers.max(1),
        lock_timeout: Duration::from_secs(args.lock_timeout),
        ..RunOptions::default()
    };
    let results = workflow.run(&options).await?;
    log::info!(
        "benchmark finished: {} evaluated items in {}.csv",
        results.len(),
        save_dir.join(workflow.name()).display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::parse_from(std::iter::once("deconbench").chain(argv.iter().copied()))
    }

    #[test]
    fn test_default_workflow_shape() {
        let args = parse(&[]);
        let mut workflow = build_workflow(&args).unwrap();
        let n_items = workflow.build_graph().unwrap().items.len();
        // 2 sizes x 2 sigmas x 3 SNRs, deconvolved against both PSFs
        assert_eq!(n_items, 24);
        assert_eq!(workflow.steps().len(), 6);
    }

    #[test]
    fn test_value_lists_are_comma_separated() {
        let args = parse(&["--snr", "1,2,3,4", "--metrics", "rmse"]);
        assert_eq!(args.snr, vec![1.0, 2.0, 3.0, 4.0]);
        let mut workflow = build_workflow(&args).unwrap();
        let n_items = workflow.build_graph().unwrap().items.len();
        assert_eq!(n_items, 32);
    }

    #[test]
    fn test_unknown_metric_is_rejected() {
        let args = parse(&["--metrics", "rmse,wibble"]);
        assert!(build_workflow(&args).is_err());
    }
}
