// Crawl Worker - job queue consumer and crawler supervisor
//
// Claims queued crawl jobs from PostgreSQL one at a time, runs the crawler
// as a subprocess with its output captured to a per-job log, and records
// the final status. Rows are produced elsewhere; this crate never inserts.

pub mod config;
pub mod kernel;

pub use config::*;
