//! Service info and health endpoints.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::context::AppContext;
use crate::service::LoadLevel;

/// GET / response.
#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub service: &'static str,
    pub version: &'static str,
    pub status: &'static str,
    pub available_engines: Vec<String>,
    pub max_workers: usize,
    pub active_jobs: usize,
    pub worker_utilization: String,
}

/// GET /health response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub engines_available: usize,
    pub engines: Vec<EngineHealth>,
    pub active_jobs: usize,
    pub max_workers: usize,
    pub busy_workers: usize,
    pub worker_utilization: String,
    pub load: LoadLevel,
    pub cpu_cores: usize,
}

#[derive(Debug, Serialize)]
pub struct EngineHealth {
    pub name: String,
    pub available: bool,
}

fn utilization(active: usize, workers: usize) -> String {
    if workers == 0 {
        return "0%".into();
    }
    format!("{:.1}%", active as f64 / workers as f64 * 100.0)
}

/// GET /
pub async fn root(State(ctx): State<AppContext>) -> Json<ServiceInfo> {
    let snapshot = ctx.service.queue_snapshot();
    Json(ServiceInfo {
        service: "docrelay",
        version: env!("CARGO_PKG_VERSION"),
        status: "running",
        available_engines: snapshot.available_engines,
        max_workers: snapshot.workers,
        active_jobs: snapshot.queue_size,
        worker_utilization: utilization(snapshot.queue_size, snapshot.workers),
    })
}

/// GET /health
pub async fn health_check(State(ctx): State<AppContext>) -> Json<HealthResponse> {
    let snapshot = ctx.service.queue_snapshot();
    let engines: Vec<EngineHealth> = ctx
        .service
        .engine_availability()
        .into_iter()
        .map(|(name, available)| EngineHealth { name, available })
        .collect();

    Json(HealthResponse {
        status: "healthy",
        service: "docrelay",
        engines_available: snapshot.available_engines.len(),
        engines,
        active_jobs: snapshot.queue_size,
        max_workers: snapshot.workers,
        busy_workers: snapshot.busy_workers,
        worker_utilization: utilization(snapshot.queue_size, snapshot.workers),
        load: snapshot.load,
        cpu_cores: num_cpus::get(),
    })
}
