use super::{AsyncClient, AsyncConnector, DriverError};
use crate::config::Endpoint;
use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Opts};

impl From<mysql_async::Error> for DriverError {
    fn from(err: mysql_async::Error) -> DriverError {
        DriverError::Mysql(err)
    }
}

/// Connects to MySQL servers with `mysql_async`.
#[derive(Clone, Copy, Debug, Default)]
pub struct MysqlConnector;

#[async_trait]
impl AsyncConnector for MysqlConnector {
    type Client = Conn;

    async fn connect(&self, endpoint: &Endpoint) -> Result<Conn, DriverError> {
        let url = endpoint
            .url()
            .map_err(|e| DriverError::Message(e.to_string()))?;
        let opts = Opts::from_url(url.as_str()).map_err(mysql_async::Error::from)?;
        let conn = Conn::new(opts).await?;
        Ok(conn)
    }
}

#[async_trait]
impl AsyncClient for Conn {
    async fn execute(&mut self, sql: &str) -> Result<(), DriverError> {
        self.query_drop(sql).await?;
        Ok(())
    }
}
