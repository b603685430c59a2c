//! Shared application context.
//!
//! [`AppContext`] is handed to every route handler via Axum state. It is
//! cheap to clone: everything inside is behind an `Arc`.

use std::sync::Arc;

use dr_core::config::Config;

use crate::service::JobService;

#[derive(Clone)]
pub struct AppContext {
    pub service: Arc<JobService>,
    pub config: Arc<Config>,
}

impl AppContext {
    pub fn new(service: Arc<JobService>) -> Self {
        let config = Arc::new(service.config().clone());
        Self { service, config }
    }
}
