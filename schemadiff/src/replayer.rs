use crate::config::{ConfigError, Endpoint};
use crate::drivers::{AsyncClient, AsyncConnector, DriverError};
use crate::error::SchemaDiffError;
use log::{debug, error, info, warn};
use schemadiff_core::{
    find_artifact_files, format_timestamp, is_valid_name, split_statements, up_section,
};
use std::future::Future;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

pub(crate) const CREATE_DATABASE_QUERY: &str = "CREATE DATABASE `%DATABASE%`;";

pub(crate) const DROP_DATABASE_QUERY: &str = "DROP DATABASE `%DATABASE%`;";

pub(crate) const DEFAULT_SCRATCH_PREFIX: &str = "schemadiff_scratch_";

/// A temporary database holding a replayed schema.
///
/// Obtained from [`DiffReplayer::replay`] and given back with
/// [`DiffReplayer::release`], which drops the database.
#[must_use = "scratch databases must be released"]
#[derive(Debug)]
pub struct ScratchDatabase {
    endpoint: Endpoint,
    released: bool,
}

impl ScratchDatabase {
    pub fn name(&self) -> &str {
        self.endpoint.database.as_deref().unwrap_or_default()
    }

    /// Endpoint to diff against, sharing server and credentials with the
    /// live connection.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl Drop for ScratchDatabase {
    fn drop(&mut self) {
        if !self.released {
            warn!("scratch database `{}` was not dropped", self.name());
        }
    }
}

/// Rebuilds the schema recorded by the artifacts of one namespace inside a
/// scratch database.
pub struct DiffReplayer<C> {
    connector: C,
    live: Endpoint,
    namespace_dir: PathBuf,
    scratch_prefix: String,
    clock: fn() -> OffsetDateTime,
}

impl<C: AsyncConnector> DiffReplayer<C> {
    /// Replays the artifacts stored for `live` below `diffs_dir`. Scratch
    /// databases are created on the server of `live`.
    pub fn new(connector: C, live: &Endpoint, diffs_dir: impl AsRef<Path>) -> Self {
        DiffReplayer {
            connector,
            live: live.clone(),
            namespace_dir: diffs_dir.as_ref().join(&live.label),
            scratch_prefix: DEFAULT_SCRATCH_PREFIX.to_string(),
            clock: OffsetDateTime::now_utc,
        }
    }

    pub fn with_scratch_prefix(mut self, prefix: impl Into<String>) -> Result<Self, ConfigError> {
        let prefix = prefix.into();
        if !is_valid_name(&prefix) {
            return Err(ConfigError::InvalidScratchPrefix(prefix));
        }
        self.scratch_prefix = prefix;
        Ok(self)
    }

    pub fn with_clock(mut self, clock: fn() -> OffsetDateTime) -> Self {
        self.clock = clock;
        self
    }

    pub fn live(&self) -> &Endpoint {
        &self.live
    }

    pub fn namespace(&self) -> &str {
        &self.live.label
    }

    pub fn namespace_dir(&self) -> &Path {
        &self.namespace_dir
    }

    fn scratch_name(&self) -> Result<String, SchemaDiffError> {
        Ok(format!(
            "{}{}",
            self.scratch_prefix,
            format_timestamp((self.clock)())?
        ))
    }

    /// Create an empty scratch database.
    pub async fn create_scratch(&self) -> Result<ScratchDatabase, SchemaDiffError> {
        let database = self.scratch_name()?;
        let setup_error = |source: DriverError| SchemaDiffError::ScratchSetup {
            database: database.clone(),
            source,
        };

        info!("Creating temporary database {database}");
        let mut admin = self
            .connector
            .connect(&self.live.without_database())
            .await
            .map_err(setup_error)?;
        admin
            .execute(&CREATE_DATABASE_QUERY.replace("%DATABASE%", &database))
            .await
            .map_err(setup_error)?;

        Ok(ScratchDatabase {
            endpoint: self.live.with_database(database.as_str()),
            released: false,
        })
    }

    /// Execute the UP section of every artifact of the namespace, in file name
    /// order. Returns the number of applied artifacts.
    pub async fn apply_artifacts(
        &self,
        scratch: &ScratchDatabase,
    ) -> Result<usize, SchemaDiffError> {
        let files = find_artifact_files(&self.namespace_dir)?;
        if files.is_empty() {
            info!(
                "No diffs recorded in {}, database {} stays empty",
                self.namespace_dir.display(),
                scratch.name()
            );
            return Ok(0);
        }

        info!("Populating schema in database {}", scratch.name());
        let mut client = self
            .connector
            .connect(scratch.endpoint())
            .await
            .map_err(|source| SchemaDiffError::ScratchSetup {
                database: scratch.name().to_string(),
                source,
            })?;

        for file in files.iter() {
            info!("Applying diff from {file}");
            let text = file.read()?;
            for statement in split_statements(up_section(&text)) {
                debug!("{statement}");
                client
                    .execute(statement)
                    .await
                    .map_err(|source| SchemaDiffError::Replay {
                        file: file.path().to_path_buf(),
                        statement: statement.to_string(),
                        source,
                    })?;
            }
        }
        Ok(files.len())
    }

    /// Create a scratch database and replay all artifacts into it.
    ///
    /// When replay fails the scratch database is dropped before the error is
    /// returned. On success the caller owns it and must [`release`] it.
    ///
    /// [`release`]: DiffReplayer::release
    pub async fn replay(&self) -> Result<ScratchDatabase, SchemaDiffError> {
        let scratch = self.create_scratch().await?;
        match self.apply_artifacts(&scratch).await {
            Ok(count) => {
                info!("Replayed {count} diff(s) into {}", scratch.name());
                Ok(scratch)
            }
            Err(e) => {
                let cleanup = self.release(scratch).await;
                settle(Err(e), cleanup)
            }
        }
    }

    /// Drop the scratch database. It is never dropped twice, even when this
    /// fails.
    pub async fn release(&self, mut scratch: ScratchDatabase) -> Result<(), SchemaDiffError> {
        scratch.released = true;
        let database = scratch.name().to_string();
        let cleanup_error = |source: DriverError| SchemaDiffError::Cleanup {
            database: database.clone(),
            source,
        };

        info!("Dropping temporary database {database}");
        let mut admin = self
            .connector
            .connect(&self.live.without_database())
            .await
            .map_err(cleanup_error)?;
        admin
            .execute(&DROP_DATABASE_QUERY.replace("%DATABASE%", &database))
            .await
            .map_err(cleanup_error)?;
        Ok(())
    }

    /// Replay into a scratch database, run `body` with its endpoint and drop
    /// the scratch database on every exit path.
    pub async fn scoped<T, F, Fut>(&self, body: F) -> Result<T, SchemaDiffError>
    where
        F: FnOnce(Endpoint) -> Fut,
        Fut: Future<Output = Result<T, SchemaDiffError>>,
    {
        let scratch = self.replay().await?;
        let result = body(scratch.endpoint().clone()).await;
        let cleanup = self.release(scratch).await;
        settle(result, cleanup)
    }
}

/// A cleanup failure never hides the primary error.
fn settle<T>(
    result: Result<T, SchemaDiffError>,
    cleanup: Result<(), SchemaDiffError>,
) -> Result<T, SchemaDiffError> {
    match (result, cleanup) {
        (result, Ok(())) => result,
        (Ok(_), Err(cleanup)) => Err(cleanup),
        (Err(primary), Err(cleanup)) => {
            error!("{}", with_sources(&cleanup));
            Err(primary)
        }
    }
}

/// `err` followed by each of its sources, separated by `: `.
fn with_sources(err: &dyn std::error::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}
