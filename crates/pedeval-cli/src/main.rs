use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use pedeval_rs::params::{IgnoreMode, IouType};
use pedeval_rs::{
    accumulate, evaluate, evaluate_ji, summarize_default, GroundTruthSet, Params,
};

#[derive(Parser)]
#[command(name = "pedeval")]
#[command(
    about = "Pedestrian detection evaluation: log-average miss rate, AP/AR and the crowd Jaccard Index"
)]
struct Cli {
    /// Path to ground truth annotations JSON file
    #[arg(long)]
    gt: PathBuf,

    /// Path to detection results JSON file
    #[arg(long)]
    dt: PathBuf,

    /// JSON file with evaluation parameters; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// IoU type (only bbox is evaluable)
    #[arg(long)]
    iou_type: Option<IouType>,

    /// IoU thresholds (comma-separated, ascending)
    #[arg(long, value_delimiter = ',')]
    iou_thrs: Option<Vec<f64>>,

    /// Max detections per image (comma-separated, e.g., "100,1000")
    #[arg(long, value_delimiter = ',')]
    max_dets: Option<Vec<usize>>,

    /// Filter to specific image IDs (comma-separated)
    #[arg(long, value_delimiter = ',')]
    img_ids: Option<Vec<u64>>,

    /// Filter to specific category IDs (comma-separated)
    #[arg(long, value_delimiter = ',')]
    cat_ids: Option<Vec<u64>>,

    /// Pool all categories into a single evaluation
    #[arg(long)]
    no_cats: bool,

    /// Which ground-truth flag marks a box as ignored: crowd, flag or either
    #[arg(long)]
    ignore_mode: Option<IgnoreMode>,

    /// Also compute the crowd Jaccard Index
    #[arg(long)]
    ji: bool,

    /// IoU floor for Jaccard Index matching
    #[arg(long)]
    bm_thr: Option<f64>,

    /// Worker threads for the Jaccard Index
    #[arg(long)]
    workers: Option<usize>,

    /// Also write the report to this file
    #[arg(long)]
    out: Option<PathBuf>,
}

impl Cli {
    fn params(&self) -> Result<Params> {
        let mut params = match &self.config {
            Some(path) => Params::from_file(path)
                .with_context(|| format!("failed to load config {:?}", path))?,
            None => Params::default(),
        };
        if let Some(iou_type) = self.iou_type {
            params.iou_type = iou_type;
        }
        if let Some(iou_thrs) = &self.iou_thrs {
            params.iou_thrs = iou_thrs.clone();
        }
        if let Some(max_dets) = &self.max_dets {
            params.max_dets = max_dets.clone();
        }
        if let Some(img_ids) = &self.img_ids {
            params.img_ids = img_ids.clone();
        }
        if let Some(cat_ids) = &self.cat_ids {
            params.cat_ids = cat_ids.clone();
        }
        if self.no_cats {
            params.use_cats = false;
        }
        if let Some(mode) = self.ignore_mode {
            params.ignore_mode = mode;
        }
        if let Some(bm_thr) = self.bm_thr {
            params.bm_thr = bm_thr;
        }
        if let Some(workers) = self.workers {
            params.workers = workers;
        }
        params.validate().context("invalid evaluation parameters")?;
        Ok(params)
    }
}

fn main() -> Result<()> {
    pretty_env_logger::init();
    let cli = Cli::parse();
    let params = cli.params()?;

    info!("Loading ground truth from {:?}", cli.gt);
    let gt = GroundTruthSet::new(&cli.gt)
        .with_context(|| format!("failed to load ground truth {:?}", cli.gt))?;

    info!("Loading detections from {:?}", cli.dt);
    let dt = gt
        .load_res(&cli.dt)
        .with_context(|| format!("failed to load detections {:?}", cli.dt))?;

    let evaluation = evaluate(&gt, &dt, &params)?;
    let acc = accumulate(&evaluation);
    let summary = summarize_default(&acc)?;

    let mut report = summary.to_string();
    if cli.ji {
        let ji = evaluate_ji(&gt, &dt, &params)?;
        writeln!(report, "{}", ji)?;
    }
    print!("{}", report);

    // Machine-readable stats line
    let stats: Vec<String> = summary.stats().iter().map(|v| format!("{:.15}", v)).collect();
    println!("stats: [{}]", stats.join(", "));

    if let Some(out) = &cli.out {
        if out.is_dir() {
            bail!("--out {:?} is a directory", out);
        }
        std::fs::write(out, &report).with_context(|| format!("failed to write {:?}", out))?;
    }

    Ok(())
}
