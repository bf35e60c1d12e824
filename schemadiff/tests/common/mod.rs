#![allow(dead_code)]

use async_trait::async_trait;
use schemadiff::{
    AsyncClient, AsyncConnector, Comparator, ComparatorError, DriverError, Endpoint,
};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use time::macros::datetime;
use time::OffsetDateTime;

pub fn fixed_clock() -> OffsetDateTime {
    datetime!(2024-02-01 11:23:01 UTC)
}

pub fn live_endpoint() -> Endpoint {
    Endpoint::new("default", "localhost", 3306, "root", "dev", Some("shop".into()))
}

pub fn write_artifact(dir: &Path, file_name: &str, text: &str) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join(file_name), text).unwrap();
}

#[derive(Debug, Default)]
pub struct ServerState {
    pub databases: BTreeSet<String>,
    /// Every statement run, with the database of the connection.
    pub executed: Vec<(Option<String>, String)>,
    pub fail_on: Option<String>,
    pub fail_create: bool,
    pub fail_drop: bool,
}

/// In-memory MySQL server: tracks databases and records statements.
#[derive(Clone, Debug, Default)]
pub struct FakeServer {
    state: Arc<Mutex<ServerState>>,
}

impl FakeServer {
    pub fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }

    pub fn fail_on(&self, fragment: &str) {
        self.state().fail_on = Some(fragment.to_string());
    }

    /// Statements run inside a database, excluding server level ones.
    pub fn statements_in(&self, database: &str) -> Vec<String> {
        self.state()
            .executed
            .iter()
            .filter(|(db, _)| db.as_deref() == Some(database))
            .map(|(_, sql)| sql.clone())
            .collect()
    }

    pub fn server_statements(&self) -> Vec<String> {
        self.state()
            .executed
            .iter()
            .filter(|(db, _)| db.is_none())
            .map(|(_, sql)| sql.clone())
            .collect()
    }
}

/// Databases named in `` `db`.`table` `` references.
fn qualifiers(sql: &str) -> Vec<String> {
    let parts: Vec<&str> = sql.split('`').collect();
    parts
        .iter()
        .enumerate()
        .skip(1)
        .step_by(2)
        .filter(|(i, _)| parts.get(i + 1).is_some_and(|next| next.starts_with('.')))
        .map(|(_, name)| name.to_string())
        .collect()
}

fn quoted_name(sql: &str) -> Option<String> {
    let start = sql.find('`')? + 1;
    let end = start + sql[start..].find('`')?;
    Some(sql[start..end].to_string())
}

pub struct FakeClient {
    database: Option<String>,
    state: Arc<Mutex<ServerState>>,
}

#[async_trait]
impl AsyncClient for FakeClient {
    async fn execute(&mut self, sql: &str) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap();
        state.executed.push((self.database.clone(), sql.to_string()));

        if let Some(fragment) = &state.fail_on {
            if sql.contains(fragment.as_str()) {
                return Err(DriverError::Message(format!(
                    "You have an error in your SQL syntax near '{fragment}'"
                )));
            }
        }
        if let Some(name) = qualifiers(sql)
            .into_iter()
            .find(|name| !state.databases.contains(name))
        {
            return Err(DriverError::Message(format!("Unknown database '{name}'")));
        }
        if sql.starts_with("CREATE DATABASE") {
            let name = quoted_name(sql).unwrap_or_default();
            if state.fail_create || !state.databases.insert(name.clone()) {
                return Err(DriverError::Message(format!(
                    "Can't create database '{name}'; database exists"
                )));
            }
        } else if sql.starts_with("DROP DATABASE") {
            let name = quoted_name(sql).unwrap_or_default();
            if state.fail_drop || !state.databases.remove(&name) {
                return Err(DriverError::Message(format!(
                    "Can't drop database '{name}'; database doesn't exist"
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AsyncConnector for FakeServer {
    type Client = FakeClient;

    async fn connect(&self, endpoint: &Endpoint) -> Result<FakeClient, DriverError> {
        if let Some(database) = &endpoint.database {
            if !self.state().databases.contains(database) {
                return Err(DriverError::Message(format!(
                    "Unknown database '{database}'"
                )));
            }
        }
        Ok(FakeClient {
            database: endpoint.database.clone(),
            state: self.state.clone(),
        })
    }
}

/// Comparator returning canned output keyed by the target database.
#[derive(Debug, Default)]
pub struct FakeComparator {
    pub by_target: HashMap<String, String>,
    pub dump: String,
    pub fail: bool,
    /// `(source database, target database)` of every compare call.
    pub calls: Mutex<Vec<(String, String)>>,
}

impl FakeComparator {
    pub fn with_target(mut self, database: &str, output: &str) -> Self {
        self.by_target.insert(database.to_string(), output.to_string());
        self
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

fn lines(text: &str) -> Vec<String> {
    text.lines().map(str::to_string).collect()
}

#[async_trait]
impl Comparator for FakeComparator {
    async fn compare(
        &self,
        source: &Endpoint,
        target: &Endpoint,
    ) -> Result<Vec<String>, ComparatorError> {
        let source_db = source.database()?.to_string();
        let target_db = target.database()?.to_string();
        self.calls
            .lock()
            .unwrap()
            .push((source_db, target_db.clone()));
        if self.fail {
            return Err(ComparatorError::Spawn {
                program: "mysqldbcompare".into(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not installed"),
            });
        }
        Ok(self
            .by_target
            .get(&target_db)
            .map(|output| lines(output))
            .unwrap_or_default())
    }

    async fn dump(&self, _endpoint: &Endpoint) -> Result<Vec<String>, ComparatorError> {
        Ok(lines(&self.dump))
    }
}
