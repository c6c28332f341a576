//! Prometheus metrics for the upload backend.

pub mod server;

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, Counter, CounterVec, Histogram,
};

lazy_static! {
    /// Chunks the stream splitter finished spilling to disk, before the
    /// small-tail policy decides whether to upload or discard them.
    pub static ref CHUNKS_FINISHED: Counter = register_counter!(
        "tus_s3_chunks_finished_total",
        "Chunks finished by the stream splitter"
    ).unwrap();

    /// Chunks discarded by the small-tail policy instead of being uploaded.
    pub static ref CHUNKS_DISCARDED: Counter = register_counter!(
        "tus_s3_chunks_discarded_total",
        "Chunks discarded for being under the minimum part size"
    ).unwrap();

    pub static ref PARTS_UPLOADED: CounterVec = register_counter_vec!(
        "tus_s3_parts_uploaded_total",
        "S3 parts uploaded",
        &["status"]
    ).unwrap();

    pub static ref UPLOAD_BYTES_TOTAL: Counter = register_counter!(
        "tus_s3_upload_bytes_total",
        "Total bytes accepted across all uploads"
    ).unwrap();

    pub static ref WRITE_DURATION: Histogram = register_histogram!(
        "tus_s3_write_duration_seconds",
        "Duration of one PATCH body write",
        vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]
    ).unwrap();

    pub static ref MULTIPART_COMPLETIONS: CounterVec = register_counter_vec!(
        "tus_s3_multipart_completions_total",
        "Multipart uploads completed or aborted",
        &["outcome"]
    ).unwrap();

    pub static ref PARTS_PER_UPLOAD: Histogram = register_histogram!(
        "tus_s3_parts_per_upload",
        "Number of parts in a completed multipart upload",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0]
    ).unwrap();

    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "tus_s3_errors_total",
        "Total errors by kind",
        &["kind"]
    ).unwrap();
}

pub fn record_chunk_finished() {
    CHUNKS_FINISHED.inc();
}

pub fn record_chunk_discarded() {
    CHUNKS_DISCARDED.inc();
}

pub fn record_part_uploaded(success: bool) {
    let status = if success { "success" } else { "failure" };
    PARTS_UPLOADED.with_label_values(&[status]).inc();
}

pub fn record_bytes_accepted(bytes: u64) {
    UPLOAD_BYTES_TOTAL.inc_by(bytes as f64);
}

pub fn record_write_duration(duration_secs: f64) {
    WRITE_DURATION.observe(duration_secs);
}

pub fn record_multipart_completed(parts_count: usize) {
    MULTIPART_COMPLETIONS.with_label_values(&["completed"]).inc();
    PARTS_PER_UPLOAD.observe(parts_count as f64);
}

pub fn record_multipart_aborted() {
    MULTIPART_COMPLETIONS.with_label_values(&["aborted"]).inc();
}

pub fn record_error(kind: &str) {
    ERRORS_TOTAL.with_label_values(&[kind]).inc();
}
