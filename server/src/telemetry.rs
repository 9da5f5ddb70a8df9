//! Structured logging setup
//!
//! Wires tracing-subscriber with an env-driven filter and a fmt layer.
//! `RUST_LOG` overrides everything; otherwise the default level follows
//! `APP_ENV` (production logs at info, everything else at debug).

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init_telemetry() {
    let default_directives = if std::env::var("APP_ENV").as_deref() == Ok("production") {
        "info,actix_web=info,actix_server=info"
    } else {
        "debug,actix_web=info,actix_server=info"
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directives.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        env = %std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        "Structured logging initialized"
    );
}
