//! MySQL connection factory

use std::sync::Arc;

use async_trait::async_trait;
use keel_core::{Connection, DatabaseConfig, Result};
use keel_connection::ConnectionFactory;
use mysql_async::{Conn, Opts, OptsBuilder};

use crate::connection::{MySqlConnection, classify_mysql_error};

/// Creates MySQL sessions for the connection pool
pub struct MySqlConnectionFactory {
    opts: Opts,
    host: String,
    database: String,
}

impl MySqlConnectionFactory {
    /// Build a factory from the database configuration
    pub fn new(config: &DatabaseConfig) -> Self {
        let opts: Opts = OptsBuilder::default()
            .ip_or_hostname(config.host.clone())
            .tcp_port(config.port)
            .user(Some(config.user.clone()))
            .pass(Some(config.password.clone()))
            .db_name(Some(config.database.clone()))
            .tcp_keepalive(Some(config.keep_alive_initial_delay_ms as u32))
            .into();
        Self {
            opts,
            host: config.host.clone(),
            database: config.database.clone(),
        }
    }
}

#[async_trait]
impl ConnectionFactory for MySqlConnectionFactory {
    #[tracing::instrument(skip(self), fields(host = %self.host, database = %self.database))]
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        let conn = Conn::new(self.opts.clone())
            .await
            .map_err(|e| classify_mysql_error("failed to connect to MySQL", e))?;
        tracing::debug!("MySQL session established");
        Ok(Arc::new(MySqlConnection::new(conn)))
    }
}
