use std::sync::Arc;

use clipmod_pipeline::blob_store::{BlobStore, S3BlobStore};
use clipmod_pipeline::classify::{Classifier, HttpClassifier};
use clipmod_pipeline::config::Config;
use clipmod_pipeline::gpu_worker::GpuWorker;
use clipmod_pipeline::queue::{QueueClient, RedisQueueClient};
use clipmod_pipeline::store::Store;
use clipmod_pipeline::transcribe::{HttpTranscriber, Transcriber};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .parse_lossy("clipmod_pipeline=info,sqlx=warn,aws_config=warn,aws_smithy=warn,aws_sdk_s3=warn"),
        )
        .init();

    tracing::info!("gpu worker: loading configuration");
    let config = Config::load();

    let blob: Arc<dyn BlobStore> = Arc::new(
        S3BlobStore::new(config.blob_store.clone())
            .await
            .expect("failed to initialize blob store"),
    );

    let queue: Arc<dyn QueueClient> = Arc::new(
        RedisQueueClient::connect(&config.redis_url)
            .await
            .expect("failed to connect to queue service"),
    );

    let store = Arc::new(
        Store::connect(&config.database_url)
            .await
            .expect("failed to connect to relational store"),
    );

    // Model initialization happens here, before the pop loop, and may take
    // several minutes.
    tracing::info!("gpu worker: initializing inference clients");
    let transcriber: Arc<dyn Transcriber> =
        Arc::new(HttpTranscriber::new(config.transcribe_endpoint.clone()));
    let classifier: Arc<dyn Classifier> =
        Arc::new(HttpClassifier::new(config.classify_endpoint.clone()));

    tracing::info!("gpu worker: ready, entering pop loop");
    let worker = GpuWorker::new(
        queue,
        blob,
        store,
        transcriber,
        classifier,
        config.gpu_micro_batch,
        config.scratch_root.clone(),
        config.delete_source_archive_on_finalize,
    );

    if let Err(e) = worker.run().await {
        tracing::error!(error = %e, "gpu worker exiting on fatal error");
        std::process::exit(1);
    }
}
