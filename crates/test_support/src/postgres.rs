use anyhow::{Context, Result};
use sqlx::{Connection, Executor, PgConnection, PgPool, postgres::PgPoolOptions};
use testcontainers::{
    ContainerAsync, GenericImage, ImageExt,
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
};
use tokio::time::{Duration, sleep};

use crate::unique_name;

const POSTGRES_PORT: u16 = 5432;

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    tag: String,
    user: String,
    password: String,
    db_name: String,
}

impl PostgresConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tag: "17".to_string(),
            user: "vidtube".to_string(),
            password: "vidtube".to_string(),
            db_name: "vidtube".to_string(),
        }
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// A throwaway Postgres server; the container stops when this is dropped.
#[derive(Debug)]
pub struct PostgresContainer {
    container: ContainerAsync<GenericImage>,
    host_port: u16,
    config: PostgresConfig,
}

impl PostgresContainer {
    /// Start a Postgres container with the default config.
    ///
    /// # Errors
    /// Returns an error if the container fails to start or the port cannot be resolved.
    pub async fn start() -> Result<Self> {
        Self::start_with_config(PostgresConfig::new()).await
    }

    /// Start a Postgres container with a custom config.
    ///
    /// # Errors
    /// Returns an error if the container fails to start or the port cannot be resolved.
    pub async fn start_with_config(config: PostgresConfig) -> Result<Self> {
        crate::runtime::ensure_container_runtime()?;
        let container = GenericImage::new("postgres", &config.tag)
            .with_exposed_port(POSTGRES_PORT.tcp())
            .with_wait_for(WaitFor::message_on_stdout(
                "database system is ready to accept connections",
            ))
            .with_env_var("POSTGRES_USER", &config.user)
            .with_env_var("POSTGRES_PASSWORD", &config.password)
            .with_env_var("POSTGRES_DB", &config.db_name)
            .with_container_name(unique_name("vidtube-postgres"))
            .start()
            .await
            .context("Failed to start Postgres container")?;
        let host_port = container
            .get_host_port_ipv4(POSTGRES_PORT.tcp())
            .await
            .context("Failed to resolve Postgres host port")?;

        Ok(Self {
            container,
            host_port,
            config,
        })
    }

    #[must_use]
    pub fn dsn(&self) -> String {
        format!(
            "postgres://{}:{}@127.0.0.1:{}/{}?sslmode=disable",
            self.config.user, self.config.password, self.host_port, self.config.db_name
        )
    }

    #[must_use]
    pub fn id(&self) -> &str {
        self.container.id()
    }

    /// Wait until Postgres accepts connections.
    ///
    /// The image restarts the server once after init, so the log line alone
    /// is not enough.
    ///
    /// # Errors
    /// Returns an error if Postgres does not become ready after retries.
    pub async fn wait_until_ready(&self) -> Result<()> {
        let dsn = self.dsn();
        let mut attempts = 0;

        loop {
            match PgConnection::connect(&dsn).await {
                Ok(connection) => {
                    connection.close().await.ok();
                    return Ok(());
                }
                Err(err) => {
                    attempts += 1;
                    if attempts >= 20 {
                        return Err(err).context("Postgres did not become ready");
                    }
                    sleep(Duration::from_millis(250)).await;
                }
            }
        }
    }

    /// Connect a pool and apply `schema_sql`, which must be idempotent.
    ///
    /// # Errors
    /// Returns an error if the pool cannot connect or the schema fails.
    pub async fn pool_with_schema(&self, schema_sql: &str) -> Result<PgPool> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&self.dsn())
            .await
            .context("Failed to connect to Postgres container")?;

        pool.execute(schema_sql)
            .await
            .context("Failed to execute schema SQL")?;

        Ok(pool)
    }
}
