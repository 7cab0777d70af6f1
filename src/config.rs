//! Worker configuration, loaded once from the environment at process start
//! (optionally via a `.env` file in development, via `dotenvy`). These are
//! unattended service processes with no human owner to prompt for
//! credentials, so config is environment-only — no keyring integration.

use crate::blob_store::BlobStoreConfig;

/// Shared configuration for both the unpack and GPU workers.
#[derive(Clone, Debug)]
pub struct Config {
    pub blob_store: BlobStoreConfig,
    pub redis_url: String,
    pub database_url: String,
    pub scratch_root: std::path::PathBuf,
    pub opus_bitrate: String,
    pub transcode_parallelism: usize,
    pub gpu_micro_batch: usize,
    pub audio_extensions: Vec<String>,
    pub delete_source_archive_on_finalize: bool,
    pub transcribe_endpoint: String,
    pub classify_endpoint: String,
}

impl Config {
    /// Load configuration, loading a `.env` file first if one is present
    /// (development convenience only; absence is not an error).
    pub fn load() -> Self {
        if dotenvy::dotenv().is_ok() {
            tracing::info!("config: loaded .env file");
        } else {
            tracing::debug!("config: no .env file found, using process environment");
        }

        Self::from_env()
    }

    fn from_env() -> Self {
        let blob_store = BlobStoreConfig {
            bucket_name: env_required("BLOB_BUCKET"),
            region: std::env::var("BLOB_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            access_key_id: env_required("BLOB_ACCESS_KEY"),
            secret_access_key: env_required("BLOB_SECRET_KEY"),
            endpoint_url: std::env::var("BLOB_ENDPOINT").ok(),
        };

        let redis_host = std::env::var("QUEUE_HOST").unwrap_or_else(|_| "localhost".to_string());
        let redis_port = std::env::var("QUEUE_PORT").unwrap_or_else(|_| "6379".to_string());
        let redis_url = format!("redis://{}:{}", redis_host, redis_port);

        let db_host = std::env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string());
        let db_port = std::env::var("DB_PORT").unwrap_or_else(|_| "5432".to_string());
        let db_name = std::env::var("DB_NAME").unwrap_or_else(|_| "clipmod".to_string());
        let db_user = env_required("DB_USER");
        let db_password = env_required("DB_PASSWORD");
        let database_url = format!(
            "postgres://{}:{}@{}:{}/{}",
            db_user, db_password, db_host, db_port, db_name
        );

        let scratch_root = std::env::var("SCRATCH_ROOT")
            .unwrap_or_else(|_| "/data/scratch".to_string())
            .into();

        let opus_bitrate = std::env::var("OPUS_BITRATE").unwrap_or_else(|_| "32k".to_string());

        let transcode_parallelism = std::env::var("TRANSCODE_PARALLELISM")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(4);

        let gpu_micro_batch = std::env::var("GPU_MICRO_BATCH")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(32);

        let audio_extensions = std::env::var("AUDIO_EXTENSIONS")
            .unwrap_or_else(|_| ".mp3".to_string())
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        let delete_source_archive_on_finalize = std::env::var("DELETE_SOURCE_ARCHIVE_ON_FINALIZE")
            .ok()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let transcribe_endpoint = std::env::var("TRANSCRIBE_ENDPOINT")
            .unwrap_or_else(|_| "http://localhost:8081/transcribe".to_string());
        let classify_endpoint = std::env::var("CLASSIFY_ENDPOINT")
            .unwrap_or_else(|_| "http://localhost:8082/classify".to_string());

        Self {
            blob_store,
            redis_url,
            database_url,
            scratch_root,
            opus_bitrate,
            transcode_parallelism,
            gpu_micro_batch,
            audio_extensions,
            delete_source_archive_on_finalize,
            transcribe_endpoint,
            classify_endpoint,
        }
    }
}

fn env_required(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| panic!("{} must be set", key))
}
