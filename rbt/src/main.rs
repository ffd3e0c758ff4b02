//! rbt - main entry point
//!
//! `rbt backup` runs the jobs of one or more job files, `rbt status` reports
//! on every backup target below a root directory.

use anyhow::Result;
use chrono::Local;
use clap::{ArgAction, Args, Parser, Subcommand};
use rbt::executor::BackupExecutor;
use rbt::fs::walker::WalkOptions;
use rbt::job::loader::{load_job_file, resolve_job_file};
use rbt::job::Job;
use rbt::process::ShutdownCoordinator;
use rbt::report::{self, mail};
use rbt::status::{self, Classifier};
use rbt::{utils, Settings};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Runtime settings file (default: /etc/rbt/rbt.toml when present)
    #[arg(long, value_name = "FILE", global = true)]
    settings: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run backup jobs
    Backup(BackupArgs),
    /// Report the state of backup targets
    Status(StatusArgs),
}

#[derive(Args, Debug)]
struct BackupArgs {
    /// Job file; `.yaml` is appended when missing
    #[arg(short, long = "config", value_name = "NAME", required = true)]
    configs: Vec<String>,

    /// Only run the job with this name
    #[arg(short, long)]
    server: Option<String>,

    /// Directory searched for job files given by name
    #[arg(short, long, value_name = "DIR")]
    prefix: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct StatusArgs {
    /// Directory to scan (default: report.root from the settings)
    root: Option<PathBuf>,

    /// Include targets marked with .rbt-ignore
    #[arg(short, long)]
    all: bool,

    /// Only report targets whose path contains this text
    #[arg(short, long)]
    filter: Option<String>,

    /// How many levels below the root targets are searched for
    #[arg(short, long)]
    depth: Option<usize>,

    /// Print the HTML report instead of the console table
    #[arg(long, conflicts_with = "json")]
    html: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Mail the HTML report (`--mail=ADDR`, repeatable); bare `--mail` uses
    /// the configured recipients
    #[arg(
        short,
        long,
        value_name = "ADDR",
        num_args = 0..=1,
        require_equals = true,
        action = ArgAction::Append
    )]
    mail: Option<Vec<String>>,

    /// Disable coloured output
    #[arg(long)]
    no_color: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load(cli.settings.as_deref())?;
    utils::logger::init(utils::logger::effective_level(
        cli.verbose,
        &settings.log.level,
    ))?;

    tracing::debug!("rbt v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Backup(args) => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(run_backup(&settings, args));
        }
        Command::Status(args) => run_status(&settings, args),
    }

    Ok(())
}

fn load_jobs(settings: &Settings, args: &BackupArgs) -> Vec<Job> {
    let prefix = args.prefix.as_deref().unwrap_or(&settings.jobs.prefix);
    let mut jobs = Vec::new();

    for name in &args.configs {
        let Some(path) = resolve_job_file(name, prefix) else {
            tracing::error!("Job file {} not found (prefix {})", name, prefix.display());
            continue;
        };

        match load_job_file(&path) {
            Ok(file) => {
                for rejected in &file.rejected {
                    tracing::error!("{}: {}", file.path.display(), rejected);
                }
                jobs.extend(file.jobs);
            }
            Err(e) => tracing::error!("Failed to load {}: {}", path.display(), e),
        }
    }

    jobs
}

async fn run_backup(settings: &Settings, args: BackupArgs) {
    let jobs = load_jobs(settings, &args);
    if jobs.is_empty() {
        tracing::warn!("No backup jobs to run");
        return;
    }

    let shutdown = ShutdownCoordinator::new();
    let listener = shutdown.listen();

    let executor =
        BackupExecutor::with_cancel(settings.sync.rsync.clone(), shutdown.token());
    let summary = executor.run_all(&jobs, args.server.as_deref()).await;
    listener.abort();

    if let Some(server) = &args.server {
        if summary.completed.is_empty()
            && summary.locked.is_empty()
            && summary.failed.is_empty()
        {
            tracing::warn!("No enabled job named {}", server);
        }
    }

    tracing::info!(
        "{} completed, {} locked, {} failed",
        summary.completed.len(),
        summary.locked.len(),
        summary.failed.len()
    );
}

fn run_status(settings: &Settings, args: StatusArgs) {
    let root = args.root.unwrap_or_else(|| settings.report.root.clone());
    if !root.is_dir() {
        tracing::error!("Report root {} is not a directory", root.display());
        return;
    }

    let options = WalkOptions {
        max_depth: args.depth.unwrap_or(settings.report.depth),
        filter: args.filter,
    };
    let classifier = Classifier::new(Local::now()).include_all(args.all);
    let report = status::collect(
        &root,
        &options,
        &classifier,
        status::parent_section(&root),
    );

    if args.html {
        print!("{}", report::render_html(&report));
    } else if args.json {
        match report::render_json(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => tracing::error!("Failed to encode report: {}", e),
        }
    } else {
        print!("{}", report::render_console(&report, !args.no_color));
    }

    let recipients = match args.mail {
        Some(to) if to.is_empty() => settings.mail.to.clone(),
        Some(to) => to,
        None => return,
    };

    let message = mail::Message {
        from: settings.mail.from.clone(),
        to: recipients,
        subject: report::subject(&report),
        html: report::render_html(&report),
    };
    if let Err(e) = mail::send(&settings.mail.sendmail, &message) {
        tracing::error!("Failed to mail report: {}", e);
    }
}
