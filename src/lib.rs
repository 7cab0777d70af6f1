// Library exports for worker binaries and integration tests

pub mod archive;
pub mod blob_store;
pub mod classify;
pub mod config;
pub mod ledger;
pub mod model;
pub mod queue;
pub mod retry;
pub mod store;
pub mod transcode;
pub mod transcribe;

pub mod gpu_worker;
pub mod unpack_worker;
