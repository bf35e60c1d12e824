use regex::Regex;
use sha2::{Digest, Sha256};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;
use time::macros::format_description;
use time::OffsetDateTime;
use walkdir::WalkDir;

/// An error occurred while building, reading or locating a diff artifact
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("invalid artifact name `{name}` (only letters, digits and `_` are allowed)")]
    InvalidName { name: String },

    #[error("invalid artifact path `{path}`")]
    InvalidArtifactPath {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid artifact file `{path}`")]
    InvalidArtifactFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("wrong filename format of artifact `{file_name}`")]
    InvalidFilename { file_name: String },

    #[error("cannot format artifact timestamp")]
    Timestamp(#[source] time::error::Format),
}

/// Marker line opening the forward section of an artifact.
pub const UP_MARKER: &str = "#---------- UP ----------";

/// Marker line opening the backward section of an artifact.
pub const DOWN_MARKER: &str = "#---------- DOWN ----------";

/// Regex pattern for the `{timestamp}_{name}.sql` artifact naming convention.
///
/// The timestamp part is all digits, for example `20240201112301`, so that a
/// lexical sort of file names is also a chronological one.
/// The name part is alphanumeric with optional underscores.
pub static ARTIFACT_FILENAME_PATTERN: &str = r"^([0-9]+)_([[:alnum:]_]+)\.sql$";

static ARTIFACT_FILENAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(ARTIFACT_FILENAME_PATTERN).unwrap());

static ARTIFACT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[[:alnum:]_]+$").unwrap());

static STATEMENT_TERMINATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r";[ \t]*\r?\n").unwrap());

/// Check a user supplied artifact or scratch database name.
pub fn is_valid_name(name: &str) -> bool {
    ARTIFACT_NAME.is_match(name)
}

/// Render a generation time the way it is encoded in artifact file names.
pub fn format_timestamp(at: OffsetDateTime) -> Result<String, ArtifactError> {
    at.format(format_description!("[year][month][day][hour][minute][second]"))
        .map_err(ArtifactError::Timestamp)
}

/// A named, timestamped schema change.
#[derive(Clone, Debug, PartialEq)]
pub struct DiffArtifact {
    name: String,
    namespace: String,
    timestamp: String,
    up_sql: String,
    down_sql: Option<String>,
}

impl DiffArtifact {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        timestamp: impl Into<String>,
        up_sql: impl Into<String>,
        down_sql: Option<String>,
    ) -> Result<Self, ArtifactError> {
        let name = name.into();
        if !is_valid_name(&name) {
            return Err(ArtifactError::InvalidName { name });
        }
        Ok(DiffArtifact {
            name,
            namespace: namespace.into(),
            timestamp: timestamp.into(),
            up_sql: up_sql.into(),
            down_sql,
        })
    }

    /// Read an artifact back from disk. The namespace is the name of the
    /// directory holding the file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ArtifactError> {
        let path = path.as_ref();
        let file = ArtifactFile::from_path(path.to_path_buf())?;
        let text = file.read()?;
        let (up, down) = split_sections(&text);
        let up = match down {
            // `to_text` puts one newline between the sections.
            Some(_) => up.strip_suffix('\n').unwrap_or(up),
            None => up,
        };
        let namespace = path
            .parent()
            .and_then(Path::file_name)
            .and_then(OsStr::to_str)
            .unwrap_or_default();
        DiffArtifact::new(
            file.name,
            namespace,
            file.timestamp,
            up,
            down.map(str::to_string),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn up_sql(&self) -> &str {
        &self.up_sql
    }

    pub fn down_sql(&self) -> Option<&str> {
        self.down_sql.as_deref()
    }

    pub fn file_name(&self) -> String {
        format!("{}_{}.sql", self.timestamp, self.name)
    }

    /// Location below the artifact root: `{namespace}/{timestamp}_{name}.sql`.
    pub fn relative_path(&self) -> PathBuf {
        Path::new(&self.namespace).join(self.file_name())
    }

    /// Serialized form as written to disk.
    pub fn to_text(&self) -> String {
        match &self.down_sql {
            Some(down_sql) => format!(
                "{UP_MARKER}\n{}\n{DOWN_MARKER}\n{}",
                self.up_sql, down_sql
            ),
            None => format!("{UP_MARKER}\n{}", self.up_sql),
        }
    }

    pub fn up_statements(&self) -> Vec<&str> {
        split_statements(&self.up_sql)
    }

    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.to_text().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn checksum32(&self) -> String {
        self.checksum()[0..8].to_string()
    }
}

impl std::fmt::Display for DiffArtifact {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            fmt,
            "{}/{} {} ({})",
            self.namespace,
            self.timestamp,
            self.name,
            self.checksum32()
        )
    }
}

/// Split artifact text into its UP section and optional DOWN section.
///
/// A leading UP marker line is skipped. Text without a DOWN marker is entirely
/// UP section.
pub fn split_sections(text: &str) -> (&str, Option<&str>) {
    let body = match find_marker_line(text, UP_MARKER) {
        Some((before, after)) if before.trim().is_empty() => after,
        _ => text,
    };
    match find_marker_line(body, DOWN_MARKER) {
        Some((up, down)) => (up, Some(down)),
        None => (body, None),
    }
}

/// Extract the forward section of artifact text.
pub fn up_section(text: &str) -> &str {
    split_sections(text).0
}

/// Split a section into statements on `;` at end of line.
///
/// Terminators are not part of the returned statements and blank fragments
/// are skipped.
pub fn split_statements(sql: &str) -> Vec<&str> {
    STATEMENT_TERMINATOR
        .split(sql)
        .map(str::trim)
        .map(|statement| statement.strip_suffix(';').unwrap_or(statement).trim_end())
        .filter(|statement| !statement.is_empty())
        .collect()
}

fn find_marker_line<'a>(text: &'a str, marker: &str) -> Option<(&'a str, &'a str)> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.trim_end() == marker {
            return Some((&text[..offset], &text[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}

/// An artifact file found on disk, identified by its file name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactFile {
    path: PathBuf,
    file_name: String,
    timestamp: String,
    name: String,
}

impl ArtifactFile {
    /// Parse `{timestamp}_{name}.sql` out of a path.
    pub fn from_path(path: PathBuf) -> Result<Self, ArtifactError> {
        let file_name = match path.file_name().and_then(OsStr::to_str) {
            Some(file_name) => file_name.to_string(),
            None => {
                return Err(ArtifactError::InvalidArtifactPath {
                    path,
                    source: std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "Invalid file name",
                    ),
                })
            }
        };
        let captures =
            ARTIFACT_FILENAME
                .captures(&file_name)
                .ok_or_else(|| ArtifactError::InvalidFilename {
                    file_name: file_name.clone(),
                })?;
        let timestamp = captures[1].to_string();
        let name = captures[2].to_string();
        Ok(ArtifactFile {
            path,
            file_name,
            timestamp,
            name,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn read(&self) -> Result<String, ArtifactError> {
        std::fs::read_to_string(&self.path).map_err(|e| {
            let path = self.path.clone();
            match e.kind() {
                std::io::ErrorKind::NotFound => {
                    ArtifactError::InvalidArtifactPath { path, source: e }
                }
                _ => ArtifactError::InvalidArtifactFile { path, source: e },
            }
        })
    }
}

impl std::fmt::Display for ArtifactFile {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(fmt, "{}", self.path.display())
    }
}

/// Find the artifacts of one namespace directory, in replay order.
///
/// Files not following the `{timestamp}_{name}.sql` convention are skipped and
/// a missing directory holds no artifacts. Subdirectories are not searched.
/// An artifact that cannot be inspected, or an unreadable directory, is an
/// error rather than a missing artifact.
pub fn find_artifact_files(
    namespace_dir: impl AsRef<Path>,
) -> Result<Vec<ArtifactFile>, ArtifactError> {
    let namespace_dir = namespace_dir.as_ref();
    if !namespace_dir.exists() {
        return Ok(Vec::new());
    }
    if !namespace_dir.is_dir() {
        return Err(ArtifactError::InvalidArtifactPath {
            path: namespace_dir.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "Not a directory"),
        });
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(namespace_dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().unwrap_or(namespace_dir).to_path_buf();
                // unreadable entries that are not artifacts are skipped like any other file
                if path != namespace_dir && ArtifactFile::from_path(path.clone()).is_err() {
                    continue;
                }
                return Err(ArtifactError::InvalidArtifactPath {
                    path,
                    source: err.into(),
                });
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(file) = ArtifactFile::from_path(entry.into_path()) {
            files.push(file);
        }
    }
    files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(files)
}

/// Artifact of a namespace directory that is replayed last, if any.
pub fn latest_artifact_file(
    namespace_dir: impl AsRef<Path>,
) -> Result<Option<ArtifactFile>, ArtifactError> {
    Ok(find_artifact_files(namespace_dir)?.pop())
}
