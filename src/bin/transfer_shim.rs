//! Minimal CLI satisfying the Transfer boundary: takes a local tar file,
//! uploads it to the blob store as `archives/{batch_id}.tar`, and pushes a
//! conforming `UnpackJob`. Does not perform secure-copy acquisition itself;
//! exists so the rest of the pipeline has a runnable producer for manual and
//! integration testing.

use std::path::PathBuf;

use chrono::Utc;
use clipmod_pipeline::blob_store::{archive_key, BlobStore, S3BlobStore};
use clipmod_pipeline::config::Config;
use clipmod_pipeline::model::{new_batch_id, UnpackJob};
use clipmod_pipeline::queue::{QueueClient, RedisQueueClient};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .parse_lossy("clipmod_pipeline=info"),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let local_path = match args.next() {
        Some(path) => PathBuf::from(path),
        None => {
            eprintln!("usage: transfer-shim <path-to-local-tar-file>");
            std::process::exit(2);
        }
    };

    let original_filename = local_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "archive.tar".to_string());

    let config = Config::load();

    let blob = S3BlobStore::new(config.blob_store.clone())
        .await
        .expect("failed to initialize blob store");
    let queue = RedisQueueClient::connect(&config.redis_url)
        .await
        .expect("failed to connect to queue service");

    let batch_id = new_batch_id(Utc::now());
    let s3_key = archive_key(&batch_id);

    blob.put(&s3_key, &local_path)
        .await
        .expect("failed to upload archive to blob store");
    tracing::info!(batch_id = %batch_id, s3_key = %s3_key, "uploaded archive");

    let job = UnpackJob {
        batch_id: batch_id.clone(),
        s3_key: s3_key.clone(),
        original_filename,
        transferred_at: Utc::now(),
    };
    let payload = serde_json::to_vec(&job).expect("serializable");
    queue
        .push("unpack", &payload)
        .await
        .expect("failed to push unpack job");

    tracing::info!(batch_id = %batch_id, "pushed unpack job");
    println!("{}", batch_id);
}
