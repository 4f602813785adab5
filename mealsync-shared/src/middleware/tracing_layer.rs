use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable selecting the log format (`production` -> JSON lines).
pub const ENV_VAR: &str = "MEALSYNC_ENV";

pub fn init_tracing(service_name: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let crate_target = service_name.replace('-', "_");
        EnvFilter::new(format!("info,{crate_target}=debug,socketioxide=info,tower_http=debug"))
    });

    let is_production = std::env::var(ENV_VAR)
        .map(|v| v == "production")
        .unwrap_or(false);

    // try_init: tests and embedded callers may have installed a subscriber already
    let result = if is_production {
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer)
            .try_init()
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
    };

    match result {
        Ok(()) => tracing::info!(service = service_name, "tracing initialized"),
        Err(e) => tracing::debug!(error = %e, "tracing subscriber already installed"),
    }
}
