//! Integration tests for the request perimeter: auth gate, CSRF defense,
//! role gating and token revocation.
//!
//! These run without a database. The pool is constructed lazily against
//! an unreachable host, which also exercises the revocation store's
//! in-memory fallback path.

use std::time::Duration;

use actix_web::cookie::Cookie;
use actix_web::dev::{Service, ServiceResponse};
use actix_web::http::StatusCode;
use actix_web::{test, web, App, HttpResponse};
use chrono::Utc;
use diesel::r2d2::ConnectionManager;
use diesel::PgConnection;

use dealreg_server::db::DbPool;
use dealreg_server::middleware::{RequireAuth, RequireRole};
use dealreg_server::models::user::Role;
use dealreg_server::services::revocation::RevocationStore;
use dealreg_server::services::tokens::TokenMint;

/// The middleware chain under test rejects requests by propagating a
/// service `Error` rather than an `Ok(response)`; in production the HTTP
/// dispatcher converts that into a response, but `test::call_service`
/// panics on `Err`. Resolve either outcome down to a status code.
async fn call_and_get_status<S, R, B>(app: &S, req: R) -> StatusCode
where
    S: Service<R, Response = ServiceResponse<B>, Error = actix_web::Error>,
{
    match test::try_call_service(app, req).await {
        Ok(resp) => resp.status(),
        Err(err) => err.as_response_error().status_code(),
    }
}

fn lazy_pool() -> DbPool {
    let manager = ConnectionManager::<PgConnection>::new("postgres://unreachable.invalid:1/none");
    diesel::r2d2::Pool::builder()
        .max_size(1)
        .connection_timeout(Duration::from_millis(50))
        .build_unchecked(manager)
}

fn test_mint() -> TokenMint {
    TokenMint::new(
        "integration-test-secret",
        Duration::from_secs(3600),
        Duration::from_secs(86400),
    )
}

async fn ok_handler() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

macro_rules! perimeter_app {
    ($mint:expr, $revocations:expr) => {
        test::init_service(
            App::new()
                .app_data($mint.clone())
                .app_data($revocations.clone())
                .service(
                    web::scope("/api").service(
                        web::scope("")
                            .wrap(RequireAuth)
                            .route("/ping", web::get().to(ok_handler))
                            .route("/things/{id}", web::delete().to(ok_handler))
                            .service(
                                web::scope("/manager")
                                    .wrap(RequireRole::new(&[Role::Manager]))
                                    .route("/ping", web::get().to(ok_handler)),
                            ),
                    ),
                ),
        )
    };
}

#[actix_web::test]
async fn missing_cookie_is_unauthorized() {
    let mint = web::Data::new(test_mint());
    let revocations = web::Data::new(RevocationStore::new(lazy_pool()));
    let app = perimeter_app!(mint, revocations).await;

    let req = test::TestRequest::get().uri("/api/ping").to_request();
    let status = call_and_get_status(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn obviously_short_token_is_rejected() {
    let mint = web::Data::new(test_mint());
    let revocations = web::Data::new(RevocationStore::new(lazy_pool()));
    let app = perimeter_app!(mint, revocations).await;

    let req = test::TestRequest::get()
        .uri("/api/ping")
        .cookie(Cookie::new("token", "tooshort"))
        .to_request();
    let status = call_and_get_status(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn valid_access_cookie_passes() {
    let mint = web::Data::new(test_mint());
    let revocations = web::Data::new(RevocationStore::new(lazy_pool()));
    let app = perimeter_app!(mint, revocations).await;

    let issued = mint.issue_access(1, "alice", "USER").unwrap();
    let req = test::TestRequest::get()
        .uri("/api/ping")
        .cookie(Cookie::new("token", issued.token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[actix_web::test]
async fn refresh_token_cannot_act_as_access_token() {
    let mint = web::Data::new(test_mint());
    let revocations = web::Data::new(RevocationStore::new(lazy_pool()));
    let app = perimeter_app!(mint, revocations).await;

    let refresh = mint.issue_refresh(1).unwrap();
    let req = test::TestRequest::get()
        .uri("/api/ping")
        .cookie(Cookie::new("token", refresh.token))
        .to_request();
    let status = call_and_get_status(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn unsafe_method_without_csrf_header_is_forbidden() {
    let mint = web::Data::new(test_mint());
    let revocations = web::Data::new(RevocationStore::new(lazy_pool()));
    let app = perimeter_app!(mint, revocations).await;

    let issued = mint.issue_access(1, "alice", "USER").unwrap();
    let req = test::TestRequest::delete()
        .uri("/api/things/42")
        .cookie(Cookie::new("token", issued.token))
        .to_request();
    let status = call_and_get_status(&app, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[actix_web::test]
async fn unsafe_method_with_csrf_header_passes() {
    let mint = web::Data::new(test_mint());
    let revocations = web::Data::new(RevocationStore::new(lazy_pool()));
    let app = perimeter_app!(mint, revocations).await;

    let issued = mint.issue_access(1, "alice", "USER").unwrap();
    let req = test::TestRequest::delete()
        .uri("/api/things/42")
        .cookie(Cookie::new("token", issued.token))
        .insert_header(("X-CSRF-Token", "any-non-empty-value"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[actix_web::test]
async fn revoked_token_is_rejected() {
    let mint = web::Data::new(test_mint());
    let revocations = web::Data::new(RevocationStore::new(lazy_pool()));
    let app = perimeter_app!(mint, revocations).await;

    let issued = mint.issue_access(1, "alice", "USER").unwrap();

    // The database is unreachable, so this lands in the in-memory
    // fallback set; the gate must still honor it.
    revocations.revoke(&issued.jti, Utc::now() + chrono::Duration::hours(1));

    let req = test::TestRequest::get()
        .uri("/api/ping")
        .cookie(Cookie::new("token", issued.token))
        .to_request();
    let status = call_and_get_status(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn role_gate_blocks_users_from_manager_routes() {
    let mint = web::Data::new(test_mint());
    let revocations = web::Data::new(RevocationStore::new(lazy_pool()));
    let app = perimeter_app!(mint, revocations).await;

    let user_token = mint.issue_access(1, "alice", "USER").unwrap();
    let req = test::TestRequest::get()
        .uri("/api/manager/ping")
        .cookie(Cookie::new("token", user_token.token))
        .to_request();
    let status = call_and_get_status(&app, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let manager_token = mint.issue_access(2, "boris", "MANAGER").unwrap();
    let req = test::TestRequest::get()
        .uri("/api/manager/ping")
        .cookie(Cookie::new("token", manager_token.token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[actix_web::test]
async fn unknown_role_in_token_is_rejected() {
    let mint = web::Data::new(test_mint());
    let revocations = web::Data::new(RevocationStore::new(lazy_pool()));
    let app = perimeter_app!(mint, revocations).await;

    let issued = mint.issue_access(1, "eve", "SUPERUSER").unwrap();
    let req = test::TestRequest::get()
        .uri("/api/ping")
        .cookie(Cookie::new("token", issued.token))
        .to_request();
    let status = call_and_get_status(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
