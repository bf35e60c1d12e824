/*!
Text-based SQL schema diffs for MySQL.

`schemadiff` records schema changes as named, timestamped SQL artifacts instead
of hand-written migrations. An artifact is the normalized output of a schema
comparator run in both directions between two databases:

```text
#---------- UP ----------
ALTER TABLE `shop`.`users` ADD COLUMN `email` varchar(255) NULL;
#---------- DOWN ----------
ALTER TABLE `shop`.`users` DROP COLUMN `email`;
```

## Usage

- Artifacts are stored as `{diffs_dir}/{connection}/{timestamp}_{name}.sql`, the
  connection being the "after" side of the diff.
- [`DiffGenerator`] runs the comparator and stores artifacts.
- [`DiffReplayer`] rebuilds the schema recorded by all artifacts of a
  connection inside a scratch database, so the live database can be diffed
  against it with [`DiffGenerator::diff_latest`].

### Example
```rust,ignore
use schemadiff::{Config, DiffGenerator, DiffOutcome, DiffReplayer, MysqlConnector, MysqlDbCompare};

let config = Config::load("schemadiff.toml")?;
let live = config.endpoint("default")?;
let comparator = MysqlDbCompare::new(config.comparator.clone());
let generator = DiffGenerator::new(comparator, &config.diffs_dir);
let replayer = DiffReplayer::new(MysqlConnector, &live, &config.diffs_dir)
    .with_scratch_prefix(&config.scratch_prefix)?;

match generator.diff_latest("add_email", &replayer, false).await? {
    DiffOutcome::Written { path, .. } => println!("{}", path.display()),
    DiffOutcome::NoChanges => println!("no changes"),
    DiffOutcome::DryRun { text, .. } => println!("{text}"),
}
```
*/

mod comparator;
mod config;
mod drivers;
mod error;
mod generator;
mod replayer;

pub use comparator::{Comparator, ComparatorError, MysqlDbCompare};
pub use config::{ComparatorConfig, Config, ConfigError, Endpoint};
#[cfg(feature = "mysql_async")]
pub use drivers::MysqlConnector;
pub use drivers::{AsyncClient, AsyncConnector, DriverError};
pub use error::SchemaDiffError;
pub use generator::{DiffGenerator, DiffOutcome};
pub use replayer::{DiffReplayer, ScratchDatabase};

pub use schemadiff_core::{
    find_artifact_files, latest_artifact_file, normalize_sql, normalize_sql_lines, split_sections,
    split_statements, strip_schema_qualifiers, up_section, ArtifactError, ArtifactFile,
    DiffArtifact, ARTIFACT_FILENAME_PATTERN, DOWN_MARKER, UP_MARKER,
};

#[doc(hidden)]
pub use schemadiff_core as __core;
