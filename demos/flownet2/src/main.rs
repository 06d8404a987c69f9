//! Train and run the FlowNet family on directory datasets.
//!
//! A dataset directory holds triples sharing a stem:
//! `<stem>-a.png`, `<stem>-b.png`, and `<stem>.flo`. Training cycles
//! through the triples until the schedule's `max_iter` is reached.

use anyhow::{Context, bail, ensure};
use burn::backend::{Autodiff, NdArray};
use burn::module::{AutodiffModule, Module};
use burn::prelude::Backend;
use burn::record::CompactRecorder;
use burnflow::flowio::codec::read_flow_file;
use burnflow::flowio::image::{field_to_tensor, load_image_tensor};
use burnflow::models::flownet::compose::{FlowNet2Config, FlowNetCSConfig, FlowNetCSSConfig};
use burnflow::models::flownet::estimator::{FlowEstimator, FlowInput};
use burnflow::models::flownet::flownet_c::FlowNetCConfig;
use burnflow::models::flownet::flownet_s::FlowNetSConfig;
use burnflow::runner::inference::{InferenceConfig, infer_files};
use burnflow::runner::schedule::TrainingSchedule;
use burnflow::runner::trainer::{FlowBatch, TrainerConfig, train};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

type Ndarray = NdArray<f32>;
type Ad = Autodiff<Ndarray>;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a variant on a dataset directory.
    Train(TrainArgs),

    /// Estimate flow between two images.
    Infer(InferArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Variant {
    C,
    S,
    Cs,
    Css,
    Flownet2,
}

#[derive(clap::Args, Debug)]
struct TrainArgs {
    /// Network variant.
    #[arg(long, value_enum, default_value_t = Variant::C)]
    variant: Variant,

    /// Dataset directory of `<stem>-a.png` / `<stem>-b.png` / `<stem>.flo` triples.
    #[arg(long)]
    data_dir: PathBuf,

    /// Directory for checkpoints and snapshots.
    #[arg(long, default_value = "artifacts")]
    artifact_dir: String,

    /// Use the fine-tuning schedule instead of the from-scratch one.
    #[arg(long, default_value_t = false)]
    fine: bool,

    /// Override the schedule's total step count.
    #[arg(long)]
    max_iter: Option<usize>,

    /// Restore the full model from a checkpoint before training.
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Restore the frozen upstream stage(s) from a checkpoint of the
    /// next-smaller variant (e.g. a FlowNetC checkpoint for `cs`).
    #[arg(long)]
    upstream_checkpoint: Option<PathBuf>,

    /// Run one verbose step and exit.
    #[arg(long, default_value_t = false)]
    debug: bool,
}

#[derive(clap::Args, Debug)]
struct InferArgs {
    /// Network variant.
    #[arg(long, value_enum, default_value_t = Variant::C)]
    variant: Variant,

    /// Restore the model from a checkpoint.
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// First image.
    image_a: PathBuf,

    /// Second image.
    image_b: PathBuf,

    /// Directory for output artifacts.
    #[arg(long, default_value = "out")]
    out_dir: String,

    /// Also write the raw flow as a `.flo` file.
    #[arg(long, default_value_t = false)]
    flo: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    match args.command {
        Command::Train(args) => train_command(args),
        Command::Infer(args) => infer_command(args),
    }
}

fn train_command(args: TrainArgs) -> anyhow::Result<()> {
    let device = Default::default();
    let samples = scan_samples(&args.data_dir)?;
    println!(
        "training {:?} on {} samples from {}",
        args.variant,
        samples.len(),
        args.data_dir.display(),
    );

    let mut schedule = if args.fine {
        TrainingSchedule::fine_schedule()
    } else {
        TrainingSchedule::long_schedule()
    };
    if let Some(max_iter) = args.max_iter {
        schedule.max_iter = max_iter;
    }

    let trainer = TrainerConfig::new(args.artifact_dir.clone()).with_debug(args.debug);
    let recorder = CompactRecorder::new();

    match args.variant {
        Variant::C => {
            ensure!(
                args.upstream_checkpoint.is_none(),
                "flownet-c has no upstream stage",
            );
            let model = FlowNetCConfig::new().init::<Ad>(&device);
            let model = restore(model, args.checkpoint.as_deref(), &device)?;
            run_train(model, &samples, &schedule, &trainer, &device)
        }
        Variant::S => {
            ensure!(
                args.upstream_checkpoint.is_none(),
                "flownet-s has no upstream stage",
            );
            let model = FlowNetSConfig::new().init::<Ad>(&device);
            let model = restore(model, args.checkpoint.as_deref(), &device)?;
            run_train(model, &samples, &schedule, &trainer, &device)
        }
        Variant::Cs => {
            let mut model = FlowNetCSConfig::new().init::<Ad>(&device);
            if let Some(path) = &args.upstream_checkpoint {
                model = model.load_net_c_file(path, &recorder, &device)?;
            }
            let model = restore(model, args.checkpoint.as_deref(), &device)?;
            run_train(model, &samples, &schedule, &trainer, &device)
        }
        Variant::Css => {
            let mut model = FlowNetCSSConfig::new().init::<Ad>(&device);
            if let Some(path) = &args.upstream_checkpoint {
                model = model.load_net_cs_file(path, &recorder, &device)?;
            }
            let model = restore(model, args.checkpoint.as_deref(), &device)?;
            run_train(model, &samples, &schedule, &trainer, &device)
        }
        Variant::Flownet2 => {
            let mut model = FlowNet2Config::new().init::<Ad>(&device);
            if let Some(path) = &args.upstream_checkpoint {
                model = model.load_net_css_file(path, &recorder, &device)?;
            }
            let model = restore(model, args.checkpoint.as_deref(), &device)?;
            run_train(model, &samples, &schedule, &trainer, &device)
        }
    }
}

fn infer_command(args: InferArgs) -> anyhow::Result<()> {
    let device = Default::default();
    let config = InferenceConfig::new(args.out_dir.clone()).with_save_flo(args.flo);

    let artifacts = match args.variant {
        Variant::C => {
            let model = FlowNetCConfig::new().init::<Ndarray>(&device);
            let model = restore(model, args.checkpoint.as_deref(), &device)?;
            infer_files(&model, &args.image_a, &args.image_b, &device, &config)?
        }
        Variant::S => {
            let model = FlowNetSConfig::new().init::<Ndarray>(&device);
            let model = restore(model, args.checkpoint.as_deref(), &device)?;
            infer_files(&model, &args.image_a, &args.image_b, &device, &config)?
        }
        Variant::Cs => {
            let model = FlowNetCSConfig::new().init::<Ndarray>(&device);
            let model = restore(model, args.checkpoint.as_deref(), &device)?;
            infer_files(&model, &args.image_a, &args.image_b, &device, &config)?
        }
        Variant::Css => {
            let model = FlowNetCSSConfig::new().init::<Ndarray>(&device);
            let model = restore(model, args.checkpoint.as_deref(), &device)?;
            infer_files(&model, &args.image_a, &args.image_b, &device, &config)?
        }
        Variant::Flownet2 => {
            let model = FlowNet2Config::new().init::<Ndarray>(&device);
            let model = restore(model, args.checkpoint.as_deref(), &device)?;
            infer_files(&model, &args.image_a, &args.image_b, &device, &config)?
        }
    };

    println!("mean flow magnitude: {}", artifacts.mean_magnitude);
    if let Some(path) = &artifacts.image_path {
        println!("wrote {}", path.display());
    }
    if let Some(path) = &artifacts.flo_path {
        println!("wrote {}", path.display());
    }
    Ok(())
}

fn restore<B: Backend, M: Module<B>>(
    model: M,
    checkpoint: Option<&Path>,
    device: &B::Device,
) -> anyhow::Result<M> {
    match checkpoint {
        Some(path) => model
            .load_file(path, &CompactRecorder::new(), device)
            .with_context(|| format!("failed to restore {}", path.display())),
        None => Ok(model),
    }
}

fn run_train<M>(
    model: M,
    samples: &[SamplePaths],
    schedule: &TrainingSchedule,
    trainer: &TrainerConfig,
    device: &<Ad as Backend>::Device,
) -> anyhow::Result<()>
where
    M: FlowEstimator<Ad> + AutodiffModule<Ad>,
{
    let batches = samples
        .iter()
        .cycle()
        .map(|sample| load_batch(sample, device));
    train(model, batches, schedule, trainer)?;
    Ok(())
}

/// One dataset triple.
#[derive(Debug, Clone)]
struct SamplePaths {
    image_a: PathBuf,
    image_b: PathBuf,
    flow: PathBuf,
}

fn scan_samples(dir: &Path) -> anyhow::Result<Vec<SamplePaths>> {
    let mut samples = Vec::new();
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?
    {
        let flow = entry?.path();
        if !flow.extension().is_some_and(|ext| ext == "flo") {
            continue;
        }
        let stem = flow
            .file_stem()
            .and_then(|stem| stem.to_str())
            .with_context(|| format!("bad file name {}", flow.display()))?;

        let image_a = dir.join(format!("{stem}-a.png"));
        let image_b = dir.join(format!("{stem}-b.png"));
        ensure!(
            image_a.exists() && image_b.exists(),
            "{} is missing its image pair ({stem}-a.png / {stem}-b.png)",
            flow.display(),
        );
        samples.push(SamplePaths {
            image_a,
            image_b,
            flow,
        });
    }
    if samples.is_empty() {
        bail!("no .flo samples found in {}", dir.display());
    }
    samples.sort_by(|a, b| a.flow.cmp(&b.flow));
    Ok(samples)
}

fn load_batch(
    sample: &SamplePaths,
    device: &<Ad as Backend>::Device,
) -> anyhow::Result<FlowBatch<Ad>> {
    let input = FlowInput::new(
        load_image_tensor(&sample.image_a, device)?,
        load_image_tensor(&sample.image_b, device)?,
    );
    let field = read_flow_file(&sample.flow)
        .with_context(|| format!("failed to read {}", sample.flow.display()))?;
    let target = field_to_tensor(&field, device);
    Ok(FlowBatch::new(input, target))
}
