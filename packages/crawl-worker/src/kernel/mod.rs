// Kernel - worker infrastructure (job store, crawler supervision, service hosting)

pub mod jobs;
pub mod service_host;

pub use service_host::{Service, ServiceHost};
