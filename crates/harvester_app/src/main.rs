mod job;
mod run;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, ValueHint};
use engine_logging::{engine_error, LogDestination};
use harvester_engine::AtomicFileWriter;
use log::LevelFilter;

use crate::job::HarvestJob;
use crate::run::{run_job, RunSettings};

#[derive(Parser)]
#[command(
    name = "harvester_app",
    version,
    about = "Incrementally harvest photo streams into a WARC archive"
)]
struct Cli {
    #[arg(help = "Job file (RON)", value_hint = ValueHint::FilePath)]
    job: PathBuf,
    #[arg(
        long,
        help = "Directory holding state.json (default: the collection path)",
        value_hint = ValueHint::DirPath
    )]
    state_dir: Option<PathBuf>,
    #[arg(long, help = "Do not write a WARC file")]
    no_archive: bool,
    #[arg(long, help = "Also log to this file", value_hint = ValueHint::FilePath)]
    log_file: Option<PathBuf>,
    #[arg(
        long,
        help = "Write the JSON report here instead of stdout",
        value_hint = ValueHint::FilePath
    )]
    report: Option<PathBuf>,
    #[arg(short, long, help = "Log at debug level")]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let destination = match &cli.log_file {
        Some(path) => LogDestination::Both(path.clone()),
        None => LogDestination::Terminal,
    };
    engine_logging::initialize(destination, level);

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            engine_error!("{:#}", err);
            ExitCode::from(2)
        }
    }
}

/// Returns the outcome's success flag.
fn run(cli: &Cli) -> anyhow::Result<bool> {
    let job = HarvestJob::load(&cli.job)?;
    let settings = RunSettings {
        state_dir: cli.state_dir.clone(),
        no_archive: cli.no_archive,
    };
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting runtime")?;
    let report = runtime.block_on(run_job(&job, &settings))?;

    let json = serde_json::to_string_pretty(&report).context("serializing report")?;
    match &cli.report {
        Some(path) => write_report(path, &json)?,
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{json}").context("writing report")?;
        }
    }
    Ok(report.outcome.success)
}

fn write_report(path: &Path, json: &str) -> anyhow::Result<()> {
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("report path {path:?} has no file name"))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    AtomicFileWriter::new(dir)
        .write(filename, json)
        .with_context(|| format!("writing report to {path:?}"))?;
    Ok(())
}
