use std::sync::Arc;

use clipmod_pipeline::blob_store::{BlobStore, S3BlobStore};
use clipmod_pipeline::config::Config;
use clipmod_pipeline::queue::{QueueClient, RedisQueueClient};
use clipmod_pipeline::transcode::CodecPool;
use clipmod_pipeline::unpack_worker::UnpackWorker;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .parse_lossy("clipmod_pipeline=info,sqlx=warn,aws_config=warn,aws_smithy=warn,aws_sdk_s3=warn"),
        )
        .init();

    tracing::info!("unpack worker: loading configuration");
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

    let codec_pool = CodecPool::new(config.transcode_parallelism, config.opus_bitrate.clone());

    tracing::info!("unpack worker: ready, entering pop loop");
    let worker = UnpackWorker::new(
        queue,
        blob,
        codec_pool,
        config.scratch_root.clone(),
        config.audio_extensions.clone(),
    );

    if let Err(e) = worker.run().await {
        tracing::error!(error = %e, "unpack worker exiting on fatal error");
        std::process::exit(1);
    }
}
