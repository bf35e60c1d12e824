use crate::comparator::ComparatorError;
use crate::config::ConfigError;
use crate::drivers::DriverError;
use schemadiff_core::ArtifactError;
use std::path::PathBuf;
use thiserror::Error;

/// An error that aborted a diff, snapshot or replay operation
#[derive(Debug, Error)]
pub enum SchemaDiffError {
    #[error(transparent)]
    Configuration(ConfigError),

    #[error(transparent)]
    ExternalTool(ComparatorError),

    #[error(transparent)]
    Artifact(ArtifactError),

    #[error("cannot write artifact `{path}`")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("artifact `{path}` would be replayed before the existing `{latest}`")]
    OutOfOrder { path: PathBuf, latest: PathBuf },

    #[error("cannot create scratch database `{database}`")]
    ScratchSetup {
        database: String,
        source: DriverError,
    },

    #[error("SQL error in {file}\n{source}\n{statement}")]
    Replay {
        file: PathBuf,
        statement: String,
        source: DriverError,
    },

    #[error("cannot drop scratch database `{database}`")]
    Cleanup {
        database: String,
        source: DriverError,
    },
}

impl From<ConfigError> for SchemaDiffError {
    fn from(err: ConfigError) -> SchemaDiffError {
        SchemaDiffError::Configuration(err)
    }
}

impl From<ComparatorError> for SchemaDiffError {
    fn from(err: ComparatorError) -> SchemaDiffError {
        SchemaDiffError::ExternalTool(err)
    }
}

impl From<ArtifactError> for SchemaDiffError {
    fn from(err: ArtifactError) -> SchemaDiffError {
        SchemaDiffError::Artifact(err)
    }
}
