use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub blob_dir: String,
    pub database_url: String,
    /// Storage limit given to owners on first use, in MiB.
    pub default_quota_mb: i64,
    /// Request body limit for uploads, in MiB.
    pub max_upload_mb: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-tenant object lifecycle service")]
pub struct Args {
    /// Host to bind to (overrides LIFECYCLE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides LIFECYCLE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where record payloads are stored (overrides LIFECYCLE_BLOB_DIR)
    #[arg(long)]
    pub blob_dir: Option<String>,

    /// Database URL (overrides LIFECYCLE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Default per-owner quota in MiB (overrides LIFECYCLE_DEFAULT_QUOTA_MB)
    #[arg(long)]
    pub default_quota_mb: Option<i64>,

    /// Maximum upload request size in MiB (overrides LIFECYCLE_MAX_UPLOAD_MB)
    #[arg(long)]
    pub max_upload_mb: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("LIFECYCLE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_number("LIFECYCLE_PORT", 3000u16)?;
        let env_blob_dir = env::var("LIFECYCLE_BLOB_DIR").unwrap_or_else(|_| "./data/blobs".into());
        let env_db = env::var("LIFECYCLE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/lifecycle.db".into());
        let env_quota = env_number("LIFECYCLE_DEFAULT_QUOTA_MB", 1024i64)?;
        let env_upload = env_number("LIFECYCLE_MAX_UPLOAD_MB", 100usize)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            blob_dir: args.blob_dir.unwrap_or(env_blob_dir),
            database_url: args.database_url.unwrap_or(env_db),
            default_quota_mb: args.default_quota_mb.unwrap_or(env_quota),
            max_upload_mb: args.max_upload_mb.unwrap_or(env_upload),
        };

        if cfg.default_quota_mb < 0 {
            anyhow::bail!("default quota must not be negative");
        }

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

/// Read a numeric environment variable, falling back to `default` when unset.
fn env_number<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
