use std::collections::HashMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use upload_ingest::PipelineResult;
use upload_ingest::execution::{BatchRunner, TracingBatchObserver};
use upload_ingest::ingestion::{
    CompositeObserver, FileObserver, Ingestor, JsonLinesSink, PipelineOptions, TracingObserver,
};
use upload_ingest::registry::{FormatRegistry, Registry};
use upload_ingest::types::OutputTarget;

/// Ingest uploaded datasets described by a JSON-lines parameter file.
#[derive(Debug, Parser)]
#[command(name = "upload-ingest", version)]
struct Cli {
    /// One upload request per line.
    param_file: PathBuf,

    /// Output locations as `dataset_id:files_path:path` (`None` for no files directory).
    #[arg(required = true)]
    outputs: Vec<String>,

    /// JSON registry configuration; the built-in registry is used when omitted.
    #[arg(long)]
    registry: Option<PathBuf>,

    /// Where result records are written.
    #[arg(long, default_value = "galaxy.json")]
    results: PathBuf,

    /// Scratch directory for fetched and converted files.
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Append per-upload outcomes to this file.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("upload_ingest=info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run(cli: Cli) -> PipelineResult<()> {
    let registry: Arc<dyn FormatRegistry> = match &cli.registry {
        Some(path) => Arc::new(Registry::from_path(path)?),
        None => Arc::new(Registry::builtin()),
    };

    let mut options = PipelineOptions::default();
    if let Some(dir) = cli.work_dir {
        options.work_dir = dir;
    }
    let mut observer = CompositeObserver::new().with(Arc::new(TracingObserver));
    if let Some(path) = cli.log_file {
        observer = observer.with(Arc::new(FileObserver::open(path)?));
    }
    options.observer = Some(Arc::new(observer));

    let outputs = cli
        .outputs
        .iter()
        .map(|spec| OutputTarget::parse_spec(spec))
        .collect::<PipelineResult<HashMap<_, _>>>()?;

    let runner = BatchRunner::new(Ingestor::new(options).with_registry(registry), outputs)
        .with_observer(Arc::new(TracingBatchObserver));
    let mut sink = JsonLinesSink::new(BufWriter::new(File::create(&cli.results)?));
    runner.run_path(&cli.param_file, &mut sink)?;
    Ok(())
}

fn main() -> ExitCode {
    init_logging();
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "upload batch aborted");
            ExitCode::FAILURE
        }
    }
}
