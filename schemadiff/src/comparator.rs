use crate::config::{ComparatorConfig, ConfigError, Endpoint};
use async_trait::async_trait;
use log::debug;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Failure of the external schema comparator
#[derive(Debug, Error)]
pub enum ComparatorError {
    #[error("cannot start `{program}`")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("`{program}` failed ({status}): {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("`{program}` did not finish within {}s", .timeout.as_secs())]
    Timeout { program: String, timeout: Duration },

    #[error("`{program}` produced output that is not UTF-8")]
    InvalidOutput {
        program: String,
        source: std::string::FromUtf8Error,
    },

    #[error(transparent)]
    Config(ConfigError),
}

impl From<ConfigError> for ComparatorError {
    fn from(err: ConfigError) -> ComparatorError {
        ComparatorError::Config(err)
    }
}

/// The schema comparison capability.
#[async_trait]
pub trait Comparator: Send + Sync {
    /// SQL lines turning the `source` schema into the `target` schema.
    /// Identical schemas give no statement lines.
    async fn compare(
        &self,
        source: &Endpoint,
        target: &Endpoint,
    ) -> Result<Vec<String>, ComparatorError>;

    /// SQL lines recreating the schema of one endpoint.
    async fn dump(&self, endpoint: &Endpoint) -> Result<Vec<String>, ComparatorError>;
}

/// `mysqldbcompare` for differences and `mysqldump` for snapshots, run as
/// subprocesses.
#[derive(Clone, Debug, Default)]
pub struct MysqlDbCompare {
    config: ComparatorConfig,
}

impl MysqlDbCompare {
    pub fn new(config: ComparatorConfig) -> Self {
        MysqlDbCompare { config }
    }

    pub fn config(&self) -> &ComparatorConfig {
        &self.config
    }

    /// `mysqldbcompare` reports the changes for `server2` needed to match
    /// `server1`, so the target goes first.
    ///
    /// Unlike `mysqldump`, `mysqldbcompare` ignores `MYSQL_PWD` and only takes
    /// credentials inside the `--server` logins, so the passwords are part of
    /// these two arguments. Neither logs nor errors ever print the arguments.
    pub fn compare_args(
        &self,
        source: &Endpoint,
        target: &Endpoint,
    ) -> Result<Vec<String>, ComparatorError> {
        let mut args = vec![
            format!("--server1={}", target.login()),
            format!("--server2={}", source.login()),
            "--run-all-tests".to_string(),
            "--skip-row-count".to_string(),
            "--skip-data-check".to_string(),
            "--difftype=sql".to_string(),
            "--changes-for=server2".to_string(),
        ];
        args.extend(self.config.extra_args.iter().cloned());
        args.push(format!("{}:{}", target.database()?, source.database()?));
        Ok(args)
    }

    /// Password is passed through `MYSQL_PWD`, not the command line.
    pub fn dump_args(&self, endpoint: &Endpoint) -> Result<Vec<String>, ComparatorError> {
        let mut args = vec![
            format!("--host={}", endpoint.host),
            format!("--port={}", endpoint.port),
            format!("--user={}", endpoint.username),
            "--no-data".to_string(),
            "--compact".to_string(),
        ];
        args.extend(self.config.extra_args.iter().cloned());
        args.push(endpoint.database()?.to_string());
        Ok(args)
    }

    async fn run(
        &self,
        program: &str,
        mut command: Command,
        differences_exit: bool,
    ) -> Result<Vec<String>, ComparatorError> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match self.config.timeout() {
            Some(timeout) => tokio::time::timeout(timeout, command.output())
                .await
                .map_err(|_| ComparatorError::Timeout {
                    program: program.to_string(),
                    timeout,
                })?,
            None => command.output().await,
        }
        .map_err(|source| ComparatorError::Spawn {
            program: program.to_string(),
            source,
        })?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        // mysqldbcompare exits with 1 when the schemas differ.
        let accepted = output.status.success()
            || (differences_exit && output.status.code() == Some(1) && stderr.is_empty());
        if !accepted {
            return Err(ComparatorError::Failed {
                program: program.to_string(),
                status: output.status,
                stderr,
            });
        }

        let stdout =
            String::from_utf8(output.stdout).map_err(|source| ComparatorError::InvalidOutput {
                program: program.to_string(),
                source,
            })?;
        Ok(stdout.lines().map(str::to_string).collect())
    }
}

#[async_trait]
impl Comparator for MysqlDbCompare {
    async fn compare(
        &self,
        source: &Endpoint,
        target: &Endpoint,
    ) -> Result<Vec<String>, ComparatorError> {
        let program = &self.config.compare_program;
        debug!("running {program} for {source} -> {target}");
        let mut command = Command::new(program);
        command.args(self.compare_args(source, target)?);
        self.run(program, command, true).await
    }

    async fn dump(&self, endpoint: &Endpoint) -> Result<Vec<String>, ComparatorError> {
        let program = &self.config.dump_program;
        debug!("running {program} for {endpoint}");
        let mut command = Command::new(program);
        command.args(self.dump_args(endpoint)?);
        if !endpoint.password.is_empty() {
            command.env("MYSQL_PWD", &endpoint.password);
        }
        self.run(program, command, false).await
    }
}
