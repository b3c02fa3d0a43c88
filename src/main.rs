use anyhow::Result;
use axum::Router;
use sqlx::sqlite::SqlitePoolOptions;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use storage_gateway::{
    blobstore::DiskBlobStore,
    config::{AppConfig, Policy},
    routes,
    services::{
        audit::AuditRecorder, gateway::StorageGateway, metadata::MetadataStore,
        tokens::TokenIssuer,
    },
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let (cfg, migrate_only) = AppConfig::from_env_and_args()?;

    tracing::info!(
        host = %cfg.host,
        port = cfg.port,
        storage_dir = %cfg.storage_dir,
        audit_dir = %cfg.audit_dir,
        "starting storage gateway"
    );

    for dir in [&cfg.storage_dir, &cfg.audit_dir] {
        if !Path::new(dir).exists() {
            fs::create_dir_all(dir)?;
            tracing::info!("created directory {}", dir);
        }
    }

    // SQLite wants the database file's parent to exist before connecting.
    let db_path = cfg
        .database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("created missing directory {:?}", parent);
        }
    }
    if db_path != ":memory:" && !Path::new(db_path).exists() {
        fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(db_path)?;
    }

    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&cfg.database_url)
            .await?,
    );

    let metadata = MetadataStore::new(db);
    metadata.migrate().await?;
    if migrate_only {
        tracing::info!("database migration complete");
        return Ok(());
    }

    let policy = Arc::new(Policy::default());
    let gateway = StorageGateway::new(
        DiskBlobStore::new(&cfg.storage_dir),
        metadata,
        AuditRecorder::new(&cfg.audit_dir),
        TokenIssuer::new(cfg.token_secret.as_bytes().to_vec()),
        Arc::clone(&policy),
    );

    let app: Router = routes::routes::routes(&policy).with_state(gateway);

    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
