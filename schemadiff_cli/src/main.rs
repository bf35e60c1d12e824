//! Main entry point for the schemadiff cli tool

mod cli;

use crate::cli::{CliError, Command, DiffArgs, LatestArgs};
use clap::Parser;
use cli::Cli;
use comfy_table::{Cell, CellAlignment, Table};
use console::Style;
use indicatif::{HumanDuration, ProgressBar, ProgressStyle};
use schemadiff::{
    find_artifact_files, normalize_sql, Config, DiffArtifact, DiffGenerator, DiffOutcome,
    DiffReplayer, MysqlConnector, MysqlDbCompare, SchemaDiffError,
};
use std::future::Future;
use std::io::Read;
use std::path::Path;
use std::time::{Duration, Instant};
use time::macros::format_description;
use time::PrimitiveDateTime;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

fn main() {
    human_panic::setup_panic!(human_panic::Metadata::new(
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    ));

    if let Err(e) = crate::inner_main() {
        report_error(&e);
        std::process::exit(1)
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .init();
}

fn inner_main() -> Result<(), CliError> {
    let cli = Cli::parse();
    init_logging();

    match &cli.command {
        Command::Normalize(args) => normalize(args.file.as_deref()),
        Command::List(args) => list(&load_config(&cli)?, &args.connection),
        Command::Diff(args) => diff(&load_config(&cli)?, args),
        Command::DiffLatest(args) => diff_latest(&load_config(&cli)?, args),
        Command::Snapshot(args) => snapshot(&load_config(&cli)?, args),
    }
}

fn report_error(e: &CliError) {
    let message = e.to_string();
    eprintln!("{:>12} {message}", Style::new().red().bold().apply_to("Error"));
    let mut source = std::error::Error::source(e);
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !message.contains(&cause_text) {
            eprintln!("{:>12} {cause_text}", "caused by");
        }
        source = std::error::Error::source(cause);
    }
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    let mut config = Config::load(&cli.config)?;
    if let Some(diffs_dir) = &cli.diffs_dir {
        config.diffs_dir = diffs_dir.clone();
    }
    tracing::debug!(
        path = %cli.config.display(),
        diffs_dir = %config.diffs_dir.display(),
        "configuration loaded"
    );
    Ok(config)
}

fn generator(config: &Config) -> DiffGenerator<MysqlDbCompare> {
    DiffGenerator::new(
        MysqlDbCompare::new(config.comparator.clone()),
        config.diffs_dir.clone(),
    )
}

/// Drive `task` to completion on a fresh runtime behind a spinner.
fn run_with_spinner<F>(message: String, task: F) -> Result<DiffOutcome, CliError>
where
    F: Future<Output = Result<DiffOutcome, SchemaDiffError>>,
{
    let runtime = tokio::runtime::Runtime::new()?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:>12.cyan.bold} {spinner} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix("Running");
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(120));

    let result = runtime.block_on(task);
    pb.finish_and_clear();
    Ok(result?)
}

fn show_outcome(outcome: DiffOutcome, start: &Instant) {
    let green_bold = Style::new().green().bold();
    let yellow_bold = Style::new().yellow().bold();
    match outcome {
        DiffOutcome::NoChanges => {
            println!(
                "{:>12} No changes, nothing written.",
                green_bold.apply_to("Finished")
            );
        }
        DiffOutcome::Written { path, artifact } => {
            println!(
                "{:>12} {} ({} statement(s), checksum {}) in {}",
                green_bold.apply_to("Finished"),
                path.display(),
                artifact.up_statements().len(),
                artifact.checksum32(),
                HumanDuration(start.elapsed())
            );
        }
        DiffOutcome::DryRun { path, text } => {
            println!(
                "{:>12} {} was not kept",
                yellow_bold.apply_to("Dry run"),
                path.display()
            );
            print!("{text}");
            if !text.ends_with('\n') {
                println!();
            }
        }
    }
}

fn diff(config: &Config, args: &DiffArgs) -> Result<(), CliError> {
    let start = Instant::now();
    let before = config.endpoint(&args.before)?;
    let after = config.endpoint(&args.after)?;
    let generator = generator(config);

    let outcome = run_with_spinner(
        format!("Comparing {before} with {after}"),
        generator.diff(&args.name, &before, &after, args.dry_run),
    )?;
    show_outcome(outcome, &start);
    Ok(())
}

fn diff_latest(config: &Config, args: &LatestArgs) -> Result<(), CliError> {
    let start = Instant::now();
    let live = config.endpoint(&args.connection)?;
    let replayer = DiffReplayer::new(MysqlConnector, &live, &config.diffs_dir)
        .with_scratch_prefix(config.scratch_prefix.as_str())?;
    let generator = generator(config);

    let outcome = run_with_spinner(
        format!(
            "Replaying {} and comparing with {live}",
            replayer.namespace_dir().display()
        ),
        generator.diff_latest(&args.name, &replayer, args.dry_run),
    )?;
    show_outcome(outcome, &start);
    Ok(())
}

fn snapshot(config: &Config, args: &LatestArgs) -> Result<(), CliError> {
    let start = Instant::now();
    let endpoint = config.endpoint(&args.connection)?;
    let generator = generator(config);

    let outcome = run_with_spinner(
        format!("Dumping schema of {endpoint}"),
        generator.snapshot(&args.name, &endpoint, args.dry_run),
    )?;
    show_outcome(outcome, &start);
    Ok(())
}

/// `20240201112301` as `2024-02-01 11:23:01`, other timestamps verbatim.
fn display_timestamp(timestamp: &str) -> String {
    PrimitiveDateTime::parse(
        timestamp,
        format_description!("[year][month][day][hour][minute][second]"),
    )
    .ok()
    .and_then(|at| {
        at.format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
        .ok()
    })
    .unwrap_or_else(|| timestamp.to_string())
}

fn list(config: &Config, connection: &str) -> Result<(), CliError> {
    let namespace_dir = config.namespace_dir(connection);
    let files = find_artifact_files(&namespace_dir)?;

    let mut table = Table::new();
    table
        .load_preset(comfy_table::presets::UTF8_FULL_CONDENSED)
        .apply_modifier(comfy_table::modifiers::UTF8_ROUND_CORNERS)
        .set_header(vec![
            "#",
            "Timestamp",
            "Name",
            "Statements",
            "Down",
            "Checksum",
        ]);
    if files.is_empty() {
        table.add_row(vec![
            Cell::new(""),
            Cell::new(""),
            Cell::new("No artifacts.").fg(comfy_table::Color::Cyan),
        ]);
    }
    for (index, file) in files.iter().enumerate() {
        let artifact = DiffArtifact::from_file(file.path())?;
        table.add_row(vec![
            Cell::new(index + 1).set_alignment(CellAlignment::Right),
            Cell::new(display_timestamp(file.timestamp())),
            Cell::new(file.name()),
            Cell::new(artifact.up_statements().len()).set_alignment(CellAlignment::Right),
            match artifact.down_sql() {
                Some(_) => Cell::new("yes").fg(comfy_table::Color::Green),
                None => Cell::new("no").fg(comfy_table::Color::Yellow),
            },
            Cell::new(artifact.checksum32()),
        ]);
    }
    println!("Artifacts in {}:\n{table}", namespace_dir.display());
    Ok(())
}

fn normalize(file: Option<&Path>) -> Result<(), CliError> {
    let raw = match file {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut raw = String::new();
            std::io::stdin().read_to_string(&mut raw)?;
            raw
        }
    };
    print!("{}", normalize_sql(&raw));
    Ok(())
}
