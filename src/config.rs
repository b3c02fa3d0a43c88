use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub audit_dir: String,
    pub database_url: String,
    pub token_secret: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Governed object-storage gateway")]
pub struct Args {
    /// Host to bind to (overrides GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where payloads are stored (overrides GATEWAY_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Directory for append-only audit logs (overrides GATEWAY_AUDIT_DIR)
    #[arg(long)]
    pub audit_dir: Option<String>,

    /// Metadata database URL (overrides GATEWAY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Secret for signed-access tokens (overrides GATEWAY_TOKEN_SECRET)
    #[arg(long)]
    pub token_secret: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();

        let env_host = env::var("GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("GATEWAY_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing GATEWAY_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading GATEWAY_PORT"),
        };
        let env_storage =
            env::var("GATEWAY_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_audit = env::var("GATEWAY_AUDIT_DIR").unwrap_or_else(|_| "./data/audit".into());
        let env_db = env::var("GATEWAY_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/gateway.db".into());
        let env_secret = env::var("GATEWAY_TOKEN_SECRET").ok();

        let token_secret = match args.token_secret.or(env_secret) {
            Some(secret) if !secret.is_empty() => secret,
            _ => bail!("GATEWAY_TOKEN_SECRET (or --token-secret) is required"),
        };

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            audit_dir: args.audit_dir.unwrap_or(env_audit),
            database_url: args.database_url.unwrap_or(env_db),
            token_secret,
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The policy manifest: validation limits, retention, compliance flags,
/// and operational budgets. Built once at startup and immutable for the
/// process lifetime; every component receives it explicitly.
#[derive(Debug, Clone)]
pub struct Policy {
    /// Maximum accepted payload size in bytes.
    pub max_size_bytes: usize,
    /// Global MIME allow-list, used directly for the `other` category.
    pub allowed_mime_types: Vec<&'static str>,
    /// Retention window applied at creation (financial default: ~7 years).
    pub retention: chrono::Duration,
    /// Whether payloads are encrypted at rest by the backing store.
    pub encrypt_at_rest: bool,
    /// Default lifetime for signed-access tokens.
    pub token_ttl: Duration,
    /// Per-call budget for blob store operations.
    pub operation_timeout: Duration,
    /// Retry budget for transient backend failures.
    pub max_retries: u32,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            max_size_bytes: 50 * 1024 * 1024,
            allowed_mime_types: vec![
                "application/pdf",
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
                "application/vnd.ms-excel",
                "text/csv",
                "image/png",
                "image/jpeg",
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            ],
            retention: chrono::Duration::days(2555),
            encrypt_at_rest: true,
            token_ttl: Duration::from_secs(3600),
            operation_timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}
