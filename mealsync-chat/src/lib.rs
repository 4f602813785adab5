//! MealSync product chat: customer/owner rooms, a durable message log and a
//! realtime relay for persisted messages.

use metrics_exporter_prometheus::PrometheusHandle;

pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod models;
pub mod protocol;
pub mod routes;
pub mod schema;
pub mod service;
pub mod socket;
pub mod store;
pub mod uploads;

use config::AppConfig;
use service::ChatService;

pub const SERVICE_NAME: &str = "mealsync-chat";

pub struct AppState {
    pub config: AppConfig,
    pub service: ChatService,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: AppConfig, service: ChatService, metrics: Option<PrometheusHandle>) -> Self {
        Self { config, service, metrics }
    }
}
