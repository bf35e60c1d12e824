//! Defines the CLI application

use schemadiff::{ArtifactError, ConfigError, SchemaDiffError};
use std::path::PathBuf;
use thiserror::Error;

#[derive(clap::Parser, Debug)]
#[command(version, about)]
pub struct Cli {
    /// Configuration file path
    #[arg(
        short = 'c',
        long,
        env = "SCHEMADIFF_CONFIG",
        default_value = "schemadiff.toml",
        global = true
    )]
    pub config: PathBuf,

    /// Artifact root directory (overrides `diffs_dir` of the configuration)
    #[arg(long, global = true)]
    pub diffs_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug)]
pub enum Command {
    /// Store the changes turning the `before` schema into the `after` schema
    Diff(DiffArgs),

    /// Store the changes of a live schema since the last recorded artifact
    ///
    /// All artifacts of the connection are replayed into a scratch database,
    /// which is diffed against the live schema and dropped afterwards.
    DiffLatest(LatestArgs),

    /// Store the full schema of a connection as a single artifact
    Snapshot(LatestArgs),

    /// Display the recorded artifacts of a connection in replay order
    List(ListArgs),

    /// Clean raw comparator output read from a file or stdin
    Normalize(NormalizeArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct DiffArgs {
    /// Artifact name (letters, digits and `_`)
    pub name: String,

    /// Connection holding the old schema
    pub before: String,

    /// Connection holding the new schema, also the artifact namespace
    pub after: String,

    /// Display the artifact without keeping it on disk
    #[arg(short = 'd', long, default_value = "false")]
    pub dry_run: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct LatestArgs {
    /// Artifact name (letters, digits and `_`)
    pub name: String,

    /// Connection of the live schema
    #[arg(default_value = "default")]
    pub connection: String,

    /// Display the artifact without keeping it on disk
    #[arg(short = 'd', long, default_value = "false")]
    pub dry_run: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ListArgs {
    /// Connection whose artifacts are listed
    #[arg(default_value = "default")]
    pub connection: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct NormalizeArgs {
    /// Raw comparator output (stdin if not defined)
    pub file: Option<PathBuf>,
}

/// An Error occurred while running a command
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    IoError(std::io::Error),

    #[error(transparent)]
    SchemaDiffError(SchemaDiffError),
}

impl From<SchemaDiffError> for CliError {
    fn from(err: SchemaDiffError) -> CliError {
        CliError::SchemaDiffError(err)
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> CliError {
        CliError::SchemaDiffError(SchemaDiffError::Configuration(err))
    }
}

impl From<ArtifactError> for CliError {
    fn from(err: ArtifactError) -> CliError {
        CliError::SchemaDiffError(SchemaDiffError::Artifact(err))
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> CliError {
        CliError::IoError(err)
    }
}
