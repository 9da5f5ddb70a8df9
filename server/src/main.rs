use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use tracing::info;

use dealreg_server::config::AppConfig;
use dealreg_server::db::create_pool;
use dealreg_server::handlers::{auth, end_clients, health, partners, requests};
use dealreg_server::middleware::{LimitByIp, LimitByPath, RateLimiter, RequireAuth, RequireRole};
use dealreg_server::models::user::Role;
use dealreg_server::services::revocation::RevocationStore;
use dealreg_server::services::tokens::TokenMint;
use dealreg_server::telemetry;

/// Block duration for the global per-IP limiter.
const GLOBAL_BLOCK: Duration = Duration::from_secs(15 * 60);
/// Stricter budget for login attempts.
const LOGIN_BLOCK: Duration = Duration::from_secs(30 * 60);
/// Budget for the end-client ID search.
const SEARCH_BLOCK: Duration = Duration::from_secs(10 * 60);
const SEARCH_PER_MIN: usize = 120;

#[actix_web::main]
async fn main() -> Result<()> {
    // A local .env is a development convenience only; production reads
    // its environment from the deployment.
    if std::env::var("APP_ENV").as_deref() != Ok("production") {
        dotenvy::dotenv().ok();
    }

    telemetry::init_telemetry();

    let config = AppConfig::from_env().context("failed to load configuration")?;

    info!("Connecting to the database...");
    let pool = create_pool(&config.database_url)?;

    let token_mint = web::Data::new(TokenMint::new(
        &config.jwt_secret,
        config.access_ttl,
        config.refresh_ttl,
    ));
    let revocations = web::Data::new(RevocationStore::new(pool.clone()));
    let pool_data = web::Data::new(pool);
    let config_data = web::Data::new(config.clone());

    let global_limiter = Arc::new(RateLimiter::new(
        config.rate_window,
        config.rate_max_requests,
        GLOBAL_BLOCK,
    ));
    let login_limiter = Arc::new(RateLimiter::new(
        Duration::from_secs(60),
        config.login_per_min,
        LOGIN_BLOCK,
    ));
    let search_limiter = Arc::new(RateLimiter::new(
        Duration::from_secs(60),
        SEARCH_PER_MIN,
        SEARCH_BLOCK,
    ));

    let login_limit = config.login_per_min;
    let port = config.server_port;

    info!(port, "Starting server");

    // Middleware runs outermost-last-registered: the global IP limiter
    // sees every request first, then the path limiters, then routing.
    HttpServer::new(move || {
        App::new()
            .app_data(pool_data.clone())
            .app_data(token_mint.clone())
            .app_data(revocations.clone())
            .app_data(config_data.clone())
            .wrap(LimitByPath::new(
                login_limiter.clone(),
                vec!["/api/login".to_string()],
                login_limit,
            ))
            .wrap(LimitByPath::new(
                search_limiter.clone(),
                vec!["/api/end-clients/search".to_string()],
                SEARCH_PER_MIN,
            ))
            .wrap(LimitByIp::new(global_limiter.clone()))
            .service(
                web::scope("/api")
                    // Public surface.
                    .service(health::health)
                    .service(auth::register)
                    .service(auth::login)
                    .service(auth::logout)
                    // Everything below requires a valid access cookie,
                    // and unsafe methods additionally need X-CSRF-Token.
                    .service(
                        web::scope("")
                            .wrap(RequireAuth)
                            .service(auth::me)
                            .service(auth::refresh)
                            .service(partners::list_partners)
                            .service(end_clients::search_by_inn)
                            .service(
                                web::scope("/requests")
                                    .wrap(RequireRole::new(&[Role::User]))
                                    .route(
                                        "/files/{id}",
                                        web::get().to(requests::files::download_file),
                                    )
                                    .service(requests::user::list_my_requests)
                                    .service(requests::user::my_request_details)
                                    .service(requests::user::create_request),
                            )
                            .service(
                                web::scope("/manager/requests")
                                    .wrap(RequireRole::new(&[Role::Manager]))
                                    .route(
                                        "/files/{id}",
                                        web::get().to(requests::files::download_file),
                                    )
                                    .service(requests::manager::update_request_status)
                                    .service(requests::manager::list_request_files)
                                    .service(requests::manager::manager_request_details)
                                    .service(requests::manager::delete_request)
                                    .service(requests::manager::list_manager_requests),
                            ),
                    ),
            )
    })
    .bind(("0.0.0.0", port))
    .with_context(|| format!("failed to bind port {port}"))?
    // On SIGINT the server stops accepting connections and drains
    // in-flight requests for up to five seconds.
    .shutdown_timeout(5)
    .run()
    .await
    .context("server error")?;

    info!("Server stopped cleanly");
    Ok(())
}
