cfg_if::cfg_if! {
    if #[cfg(feature = "mysql_async")] {
        mod mysql_async;
        pub use self::mysql_async::MysqlConnector;
    }
}

use crate::config::Endpoint;
use async_trait::async_trait;
use thiserror::Error;

/// Failure reported by the database execution capability
#[derive(Debug, Error)]
pub enum DriverError {
    #[cfg(feature = "mysql_async")]
    #[error(transparent)]
    Mysql(::mysql_async::Error),

    #[error("{0}")]
    Message(String),
}

/// One open database connection able to run SQL statements.
#[async_trait]
pub trait AsyncClient: Send {
    async fn execute(&mut self, sql: &str) -> Result<(), DriverError>;
}

/// Opens connections to endpoints.
///
/// An endpoint without a database gives a server level connection, used to
/// create and drop scratch databases.
#[async_trait]
pub trait AsyncConnector: Send + Sync {
    type Client: AsyncClient;

    async fn connect(&self, endpoint: &Endpoint) -> Result<Self::Client, DriverError>;
}
