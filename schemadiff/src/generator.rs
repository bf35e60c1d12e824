use crate::comparator::Comparator;
use crate::config::Endpoint;
use crate::drivers::AsyncConnector;
use crate::error::SchemaDiffError;
use crate::replayer::DiffReplayer;
use log::info;
use schemadiff_core::{
    format_timestamp, is_valid_name, latest_artifact_file, normalize_sql_lines,
    strip_schema_qualifiers, ArtifactError, DiffArtifact,
};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

/// Result of a diff or snapshot operation.
#[derive(Clone, Debug, PartialEq)]
pub enum DiffOutcome {
    /// The schemas are identical, nothing was written.
    NoChanges,

    /// The artifact was stored at `path`.
    Written { path: PathBuf, artifact: DiffArtifact },

    /// The artifact was rendered at `path`, read back and removed again.
    DryRun { path: PathBuf, text: String },
}

/// Produces artifacts from two endpoints and stores them by namespace.
pub struct DiffGenerator<C> {
    comparator: C,
    diffs_dir: PathBuf,
    clock: fn() -> OffsetDateTime,
    remove_file: fn(&Path) -> io::Result<()>,
}

impl<C: Comparator> DiffGenerator<C> {
    pub fn new(comparator: C, diffs_dir: impl Into<PathBuf>) -> Self {
        DiffGenerator {
            comparator,
            diffs_dir: diffs_dir.into(),
            clock: OffsetDateTime::now_utc,
            remove_file: |path: &Path| fs::remove_file(path),
        }
    }

    pub fn with_clock(mut self, clock: fn() -> OffsetDateTime) -> Self {
        self.clock = clock;
        self
    }

    pub fn comparator(&self) -> &C {
        &self.comparator
    }

    pub fn diffs_dir(&self) -> &Path {
        &self.diffs_dir
    }

    fn check_name(name: &str) -> Result<(), SchemaDiffError> {
        if !is_valid_name(name) {
            return Err(ArtifactError::InvalidName {
                name: name.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Compute the artifact turning `before` into `after`, stored in the
    /// namespace of `after`. `None` when the schemas do not differ.
    pub async fn generate(
        &self,
        name: &str,
        before: &Endpoint,
        after: &Endpoint,
    ) -> Result<Option<DiffArtifact>, SchemaDiffError> {
        Self::check_name(name)?;

        let databases = [before.database()?, after.database()?];
        let up_sql = normalize_sql_lines(&self.comparator.compare(before, after).await?);
        if up_sql.is_empty() {
            info!("No differences between {before} and {after}");
            return Ok(None);
        }
        let up_sql = strip_schema_qualifiers(&up_sql, &databases);
        let down_sql = normalize_sql_lines(&self.comparator.compare(after, before).await?);
        let down_sql = strip_schema_qualifiers(&down_sql, &databases);

        let timestamp = format_timestamp((self.clock)())?;
        let artifact = DiffArtifact::new(name, &after.label, timestamp, up_sql, Some(down_sql))?;
        Ok(Some(artifact))
    }

    /// Compute an artifact recreating the whole schema of `endpoint`. It has
    /// no DOWN section. `None` when the schema is empty.
    pub async fn generate_snapshot(
        &self,
        name: &str,
        endpoint: &Endpoint,
    ) -> Result<Option<DiffArtifact>, SchemaDiffError> {
        Self::check_name(name)?;

        let up_sql = normalize_sql_lines(&self.comparator.dump(endpoint).await?);
        if up_sql.is_empty() {
            info!("Schema of {endpoint} is empty");
            return Ok(None);
        }
        let up_sql = strip_schema_qualifiers(&up_sql, &[endpoint.database()?]);

        let timestamp = format_timestamp((self.clock)())?;
        let artifact = DiffArtifact::new(name, &endpoint.label, timestamp, up_sql, None)?;
        Ok(Some(artifact))
    }

    /// Write the artifact to `{diffs_dir}/{namespace}/{timestamp}_{name}.sql`.
    ///
    /// With `dry_run` the file is read back and deleted again. A file that
    /// cannot be deleted fails the operation.
    pub fn persist(
        &self,
        artifact: &DiffArtifact,
        dry_run: bool,
    ) -> Result<DiffOutcome, SchemaDiffError> {
        let namespace_dir = self.diffs_dir.join(artifact.namespace());
        let path = namespace_dir.join(artifact.file_name());

        fs::create_dir_all(&namespace_dir).map_err(|source| SchemaDiffError::Write {
            path: namespace_dir.clone(),
            source,
        })?;
        if let Some(latest) = latest_artifact_file(&namespace_dir)? {
            if latest.file_name() >= artifact.file_name().as_str() {
                return Err(SchemaDiffError::OutOfOrder {
                    path,
                    latest: latest.path().to_path_buf(),
                });
            }
        }
        fs::write(&path, artifact.to_text()).map_err(|source| SchemaDiffError::Write {
            path: path.clone(),
            source,
        })?;

        if !dry_run {
            info!("Artifact saved as {}", path.display());
            return Ok(DiffOutcome::Written {
                path,
                artifact: artifact.clone(),
            });
        }

        let text = fs::read_to_string(&path);
        (self.remove_file)(&path).map_err(|source| SchemaDiffError::Write {
            path: path.clone(),
            source,
        })?;
        info!("Dry run, removed {}", path.display());
        let text = text.map_err(|source| SchemaDiffError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(DiffOutcome::DryRun { path, text })
    }

    /// Diff two endpoints and store the result.
    pub async fn diff(
        &self,
        name: &str,
        before: &Endpoint,
        after: &Endpoint,
        dry_run: bool,
    ) -> Result<DiffOutcome, SchemaDiffError> {
        match self.generate(name, before, after).await? {
            Some(artifact) => self.persist(&artifact, dry_run),
            None => Ok(DiffOutcome::NoChanges),
        }
    }

    /// Snapshot one endpoint and store the result.
    pub async fn snapshot(
        &self,
        name: &str,
        endpoint: &Endpoint,
        dry_run: bool,
    ) -> Result<DiffOutcome, SchemaDiffError> {
        match self.generate_snapshot(name, endpoint).await? {
            Some(artifact) => self.persist(&artifact, dry_run),
            None => Ok(DiffOutcome::NoChanges),
        }
    }

    /// Diff the schema rebuilt from all stored artifacts of the live
    /// endpoint against the live endpoint itself.
    pub async fn diff_latest<K: AsyncConnector>(
        &self,
        name: &str,
        replayer: &DiffReplayer<K>,
        dry_run: bool,
    ) -> Result<DiffOutcome, SchemaDiffError> {
        Self::check_name(name)?;
        let live = replayer.live();
        replayer
            .scoped(|scratch| async move { self.diff(name, &scratch, live, dry_run).await })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::ComparatorError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use time::macros::datetime;

    /// Returns canned output and counts calls.
    #[derive(Default)]
    struct CannedComparator {
        up: Vec<String>,
        down: Vec<String>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl CannedComparator {
        fn new(up: &str, down: &str) -> Self {
            CannedComparator {
                up: up.lines().map(str::to_string).collect(),
                down: down.lines().map(str::to_string).collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Comparator for CannedComparator {
        async fn compare(
            &self,
            source: &Endpoint,
            target: &Endpoint,
        ) -> Result<Vec<String>, ComparatorError> {
            let mut calls = self.calls.lock().unwrap();
            calls.push((source.label.clone(), target.label.clone()));
            Ok(if calls.len() == 1 {
                self.up.clone()
            } else {
                self.down.clone()
            })
        }

        async fn dump(&self, _endpoint: &Endpoint) -> Result<Vec<String>, ComparatorError> {
            Ok(self.up.clone())
        }
    }

    fn endpoint(label: &str) -> Endpoint {
        Endpoint::new(label, "localhost", 3306, "root", "dev", Some(label.to_string()))
    }

    fn fixed_clock() -> OffsetDateTime {
        datetime!(2024-02-01 11:23:01 UTC)
    }

    #[tokio::test]
    async fn diff_writes_up_and_down_sections() {
        let tmp_dir = TempDir::new().unwrap();
        let comparator = CannedComparator::new(
            "# header\nALTER TABLE `shop`.`users` ADD COLUMN `email` text;\n",
            "ALTER TABLE `shop`.`users` DROP COLUMN `email`;\n",
        );
        let generator = DiffGenerator::new(comparator, tmp_dir.path()).with_clock(fixed_clock);

        let outcome = generator
            .diff("add_email", &endpoint("before"), &endpoint("after"), false)
            .await
            .unwrap();
        let DiffOutcome::Written { path, artifact } = outcome else {
            panic!("expected a written artifact");
        };
        assert_eq!(path, tmp_dir.path().join("after/20240201112301_add_email.sql"));
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            concat!(
                "#---------- UP ----------\n",
                "ALTER TABLE `shop`.`users` ADD COLUMN `email` text;\n\n",
                "#---------- DOWN ----------\n",
                "ALTER TABLE `shop`.`users` DROP COLUMN `email`;\n",
            )
        );
        assert_eq!(artifact.namespace(), "after");
        assert_eq!(
            *generator.comparator().calls.lock().unwrap(),
            vec![
                ("before".to_string(), "after".to_string()),
                ("after".to_string(), "before".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn identical_schemas_write_nothing() {
        let tmp_dir = TempDir::new().unwrap();
        let comparator = CannedComparator::new(
            "# server1 on localhost: ... connected.\n\n# Comparing `shop` to `shop`\n",
            "",
        );
        let generator = DiffGenerator::new(comparator, tmp_dir.path()).with_clock(fixed_clock);

        let outcome = generator
            .diff("noop", &endpoint("before"), &endpoint("after"), false)
            .await
            .unwrap();
        assert_eq!(outcome, DiffOutcome::NoChanges);
        assert!(!tmp_dir.path().join("after").exists());
        assert_eq!(generator.comparator().calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dry_run_leaves_no_file() {
        let tmp_dir = TempDir::new().unwrap();
        let comparator =
            CannedComparator::new("DROP TABLE `t`;\n", "CREATE TABLE `t` (`id` int);\n");
        let generator = DiffGenerator::new(comparator, tmp_dir.path()).with_clock(fixed_clock);

        let outcome = generator
            .diff("drop_t", &endpoint("before"), &endpoint("after"), true)
            .await
            .unwrap();
        let DiffOutcome::DryRun { path, text } = outcome else {
            panic!("expected a dry run");
        };
        assert!(!path.exists());
        assert!(text.starts_with("#---------- UP ----------\nDROP TABLE `t`;\n"));
        assert!(text.contains("#---------- DOWN ----------\nCREATE TABLE `t` (`id` int);\n"));
    }

    #[tokio::test]
    async fn database_qualifiers_are_removed() {
        let tmp_dir = TempDir::new().unwrap();
        let comparator = CannedComparator::new(
            "ALTER TABLE `before`.`users` ADD COLUMN `email` text;\n",
            "ALTER TABLE `after`.`users` DROP COLUMN `email`;\n",
        );
        let generator = DiffGenerator::new(comparator, tmp_dir.path()).with_clock(fixed_clock);

        let artifact = generator
            .generate("add_email", &endpoint("before"), &endpoint("after"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(artifact.up_sql(), "ALTER TABLE `users` ADD COLUMN `email` text;\n");
        assert_eq!(
            artifact.down_sql(),
            Some("ALTER TABLE `users` DROP COLUMN `email`;\n")
        );
    }

    #[tokio::test]
    async fn snapshot_has_no_down_section() {
        let tmp_dir = TempDir::new().unwrap();
        let comparator = CannedComparator::new("CREATE TABLE `default`.`t` (`id` int);\n", "");
        let generator = DiffGenerator::new(comparator, tmp_dir.path()).with_clock(fixed_clock);

        let outcome = generator
            .snapshot("initial", &endpoint("default"), false)
            .await
            .unwrap();
        let DiffOutcome::Written { path, artifact } = outcome else {
            panic!("expected a written artifact");
        };
        assert_eq!(artifact.down_sql(), None);
        assert_eq!(
            fs::read_to_string(path).unwrap(),
            "#---------- UP ----------\nCREATE TABLE `t` (`id` int);\n"
        );
    }

    #[tokio::test]
    async fn invalid_name_is_rejected_before_comparing() {
        let tmp_dir = TempDir::new().unwrap();
        let generator = DiffGenerator::new(CannedComparator::default(), tmp_dir.path());
        let err = generator
            .diff("../escape", &endpoint("before"), &endpoint("after"), false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SchemaDiffError::Artifact(ArtifactError::InvalidName { .. })
        ));
        assert!(generator.comparator().calls.lock().unwrap().is_empty());
    }

    fn artifact(name: &str, timestamp: &str) -> DiffArtifact {
        DiffArtifact::new(name, "default", timestamp, "SELECT 1;\n", None).unwrap()
    }

    #[test]
    fn persist_refuses_out_of_order_artifact() {
        let tmp_dir = TempDir::new().unwrap();
        let generator = DiffGenerator::new(CannedComparator::default(), tmp_dir.path());
        let newer = artifact("b", "20240102000000");
        let older = artifact("a", "20240101000000");

        generator.persist(&newer, false).unwrap();
        let err = generator.persist(&older, false).unwrap_err();
        assert!(matches!(err, SchemaDiffError::OutOfOrder { .. }));
        let err = generator.persist(&newer, false).unwrap_err();
        assert!(matches!(err, SchemaDiffError::OutOfOrder { .. }));
    }

    #[test]
    fn persist_reports_unwritable_directory() {
        let tmp_dir = TempDir::new().unwrap();
        let blocker = tmp_dir.path().join("default");
        fs::write(&blocker, "not a directory").unwrap();
        let generator = DiffGenerator::new(CannedComparator::default(), tmp_dir.path());

        let err = generator
            .persist(&artifact("a", "20240101000000"), false)
            .unwrap_err();
        assert!(matches!(err, SchemaDiffError::Write { path, .. } if path == blocker));
    }

    #[test]
    fn dry_run_fails_when_file_cannot_be_removed() {
        let tmp_dir = TempDir::new().unwrap();
        let mut generator = DiffGenerator::new(CannedComparator::default(), tmp_dir.path());
        generator.remove_file =
            |_| Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"));

        let err = generator
            .persist(&artifact("a", "20240101000000"), true)
            .unwrap_err();
        let expected = tmp_dir.path().join("default/20240101000000_a.sql");
        assert!(matches!(err, SchemaDiffError::Write { path, .. } if path == expected));
        assert!(expected.exists());
    }
}
