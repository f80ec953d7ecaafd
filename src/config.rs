use crate::backend::{BackendOptions, DriverNames, Flavor};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub flavor: Flavor,
    pub driver_names: DriverNames,
    pub database_url: String,
    pub sqlite_dir: PathBuf,
    pub max_connections: u32,
    pub host: String,
    pub port: u16,
    pub request_timeout: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup, environment-style.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let flavor = var("STORAGE_DRIVER", "sqlite")
            .parse::<Flavor>()
            .map_err(|e: String| anyhow::anyhow!(e))?;

        let mut driver_names = DriverNames::default();
        if let Some(name) = lookup("SQL_DRIVER_POSTGRES") {
            driver_names.set(Flavor::PostgreSql, name);
        }
        if let Some(name) = lookup("SQL_DRIVER_SQLITE") {
            driver_names.set(Flavor::Sqlite, name);
        }

        // Build database_url from individual fields or use DATABASE_URL if provided
        let database_url = match lookup("DATABASE_URL") {
            Some(url) => url,
            None => {
                let db_host = var("DB_HOST", "localhost");
                let db_port = var("DB_PORT", "5432");
                let db_name = var("DB_NAME", "ledger");
                let db_user = var("DB_USER", "ledger");
                let db_password = var("DB_PASSWORD", "ledger");

                // URL-encode password to handle special characters
                let encoded_password = urlencoding::encode(&db_password);

                format!(
                    "postgres://{}:{}@{}:{}/{}",
                    db_user, encoded_password, db_host, db_port, db_name
                )
            }
        };

        let sqlite_dir = PathBuf::from(var("SQLITE_DIR", "./data"));

        let max_connections = var("MAX_CONNECTIONS", "10").parse().unwrap_or(10);

        let host = var("LEDGER_HOST", "127.0.0.1");
        let port = var("LEDGER_PORT", "3068").parse().unwrap_or(3068);

        let request_timeout_secs: u64 = var("REQUEST_TIMEOUT_SECS", "30").parse().unwrap_or(30);

        Ok(Config {
            flavor,
            driver_names,
            database_url,
            sqlite_dir,
            max_connections,
            host,
            port,
            request_timeout: Duration::from_secs(request_timeout_secs),
        })
    }

    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse()
            .map_err(|e| anyhow::anyhow!("Invalid socket address: {}", e))
    }

    pub fn backend_options(&self) -> BackendOptions {
        BackendOptions {
            database_url: self.database_url.clone(),
            sqlite_dir: self.sqlite_dir.clone(),
            max_connections: self.max_connections,
        }
    }

    /// Driver name the configured flavor resolves to.
    pub fn driver_name(&self) -> Option<&str> {
        self.driver_names.get(self.flavor)
    }
}
