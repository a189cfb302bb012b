pub mod http_admin;
pub mod metrics;
pub mod mongo;

pub use http_admin::{run_http_admin, AdminState};
pub use metrics::ScrapeStats;
