use anyhow::Result;
use clap::Parser;
use intphys_eval_utils::{
    get_cluster, get_dataset_paths, get_time_masks, slurm_account_partition_and_qos,
};
use tracing::{level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug, Clone)]
struct Args {
    #[arg(long, default_value = "IntPhys2-debug,IntPhys2-main,IntPhys2-heldout")]
    datasets: String,

    /// Resolve the `_val` splits instead
    #[arg(long, default_value_t = false)]
    val: bool,

    /// Print sbatch arguments for relaunching this slurm job
    #[arg(long, default_value_t = false)]
    relaunch: bool,

    #[arg(long, default_value_t = false)]
    low_pri: bool,

    /// Context length in frames, prints the patch split for it
    #[arg(long)]
    context_frames: Option<i64>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?,
        )
        .init();

    let args = Args::parse();
    println!("cluster: {}", get_cluster());

    let datasets: Vec<&str> = args.datasets.split(',').map(str::trim).collect();
    let paths = get_dataset_paths(datasets.as_slice(), !args.val)?;
    for (dataset, path) in datasets.iter().zip(paths) {
        println!("  - {dataset}: {path}");
    }

    if args.relaunch {
        match slurm_account_partition_and_qos(args.low_pri) {
            Ok(vars) => println!("sbatch {vars}"),
            Err(err) => warn!("{err}"),
        }
    }

    if let Some(context_frames) = args.context_frames {
        let masks = get_time_masks(context_frames, false)?;
        println!(
            "patches: {} context, {} predicted, {} total",
            masks.enc.size()[0],
            masks.pred.size()[0],
            masks.full.size()[0]
        );
    }
    Ok(())
}
