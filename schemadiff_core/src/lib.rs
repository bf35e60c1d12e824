//! Database independent parts of `schemadiff`: cleanup of comparator output
//! and the on-disk artifact format.

pub mod artifact;
pub mod normalizer;

pub use artifact::{
    find_artifact_files, format_timestamp, is_valid_name, latest_artifact_file, split_sections,
    split_statements, up_section, ArtifactError, ArtifactFile, DiffArtifact,
    ARTIFACT_FILENAME_PATTERN, DOWN_MARKER, UP_MARKER,
};
pub use normalizer::{normalize_sql, normalize_sql_lines, strip_schema_qualifiers, COMMENT_MARKER};
