//! Manager-side request handlers
//!
//! Everything here is reachable only through the MANAGER role guard, and
//! every operation still verifies the partner assignment: a manager only
//! sees requests whose partner is assigned to them.

use actix_web::{delete, get, put, web, HttpResponse};
use serde::Deserialize;
use tracing::{info, warn};

use crate::db::DbPool;
use crate::error::ApiError;
use crate::handlers::requests::load_detail;
use crate::middleware::AuthContext;
use crate::models::common::{normalize_page_limit, PaginatedResponse};
use crate::models::file::FileMeta;
use crate::models::request::{ManagerListFilter, Request, RequestStatus, SortField};
use crate::services::access;

#[derive(Debug, Deserialize)]
pub struct ManagerListQuery {
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub partner_name: Option<String>,
    #[serde(default)]
    pub client: Option<String>,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub order: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
    #[serde(default)]
    pub manager_comment: Option<String>,
}

async fn ensure_manager_access(
    pool: &web::Data<DbPool>,
    ctx: &AuthContext,
    request_id: i32,
) -> Result<(), ApiError> {
    let user_id = ctx.user_id;
    let role = ctx.role;
    let mut conn = pool.get()?;
    let allowed =
        web::block(move || access::can_view_request(&mut conn, user_id, role, request_id))
            .await?
            .map_err(|err| {
                warn!(manager_id = user_id, request_id, error = %err, "Access check failed");
                ApiError::Internal("Failed to check access rights".to_string())
            })?;
    if !allowed {
        return Err(ApiError::Forbidden(
            "Manager is not assigned to this request's partner".to_string(),
        ));
    }
    Ok(())
}

#[get("")]
pub async fn list_manager_requests(
    ctx: AuthContext,
    pool: web::Data<DbPool>,
    query: web::Query<ManagerListQuery>,
) -> Result<HttpResponse, ApiError> {
    let (page, limit) = normalize_page_limit(query.page, query.limit);

    let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => match RequestStatus::from_str(raw) {
            Some(status) => status.as_str().to_string(),
            None => return Err(ApiError::BadRequest("Invalid status filter".to_string())),
        },
        None => String::new(),
    };

    let filter = ManagerListFilter {
        status,
        partner_name: query.partner_name.clone().unwrap_or_default(),
        client_text: query.client.clone().unwrap_or_default(),
        sort_by: query.sort_by.as_deref().and_then(SortField::from_str),
        descending: !query
            .order
            .as_deref()
            .map(|o| o.eq_ignore_ascii_case("ASC"))
            .unwrap_or(false),
    };

    let manager_id = ctx.user_id;
    let mut conn = pool.get()?;
    let (items, total) = web::block(move || {
        Request::list_for_manager(&mut conn, manager_id, page, limit, &filter)
    })
    .await??;

    Ok(HttpResponse::Ok().json(PaginatedResponse {
        items,
        total,
        page,
        limit,
    }))
}

#[get("/{id}")]
pub async fn manager_request_details(
    ctx: AuthContext,
    pool: web::Data<DbPool>,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let request_id = path.into_inner();
    if request_id <= 0 {
        return Err(ApiError::BadRequest("Invalid request ID".to_string()));
    }

    ensure_manager_access(&pool, &ctx, request_id).await?;

    let mut conn = pool.get()?;
    let detail = web::block(move || load_detail(&mut conn, request_id))
        .await?
        .map_err(|err| match err {
            diesel::result::Error::NotFound => {
                ApiError::NotFound("Request not found".to_string())
            }
            other => ApiError::internal(other),
        })?;

    Ok(HttpResponse::Ok().json(detail))
}

#[put("/{id}/status")]
pub async fn update_request_status(
    ctx: AuthContext,
    pool: web::Data<DbPool>,
    path: web::Path<i32>,
    body: web::Json<UpdateStatusRequest>,
) -> Result<HttpResponse, ApiError> {
    let request_id = path.into_inner();
    if request_id <= 0 {
        return Err(ApiError::BadRequest("Invalid request ID".to_string()));
    }

    let new_status = RequestStatus::from_str(&body.status)
        .ok_or_else(|| ApiError::BadRequest(format!("Unknown status '{}'", body.status)))?;

    ensure_manager_access(&pool, &ctx, request_id).await?;

    let mut conn = pool.get()?;
    let current = web::block(move || Request::find_by_id(&mut conn, request_id))
        .await?
        .map_err(|err| match err {
            diesel::result::Error::NotFound => {
                ApiError::NotFound("Request not found".to_string())
            }
            other => ApiError::internal(other),
        })?;

    let current_status = RequestStatus::from_str(&current.status).ok_or_else(|| {
        ApiError::Internal(format!(
            "request {request_id} carries unknown status '{}'",
            current.status
        ))
    })?;

    if !current_status.can_transition_to(new_status) {
        return Err(ApiError::BadRequest(format!(
            "Invalid status transition from {} to {}",
            current_status.as_str(),
            new_status.as_str()
        )));
    }

    let manager_comment = body.manager_comment.clone();
    let mut conn = pool.get()?;
    let updated = web::block(move || {
        Request::update_status(&mut conn, request_id, new_status, manager_comment.as_deref())
    })
    .await??;

    info!(
        request_id,
        manager_id = ctx.user_id,
        from = current_status.as_str(),
        to = new_status.as_str(),
        "Request status updated"
    );

    Ok(HttpResponse::Ok().json(updated))
}

#[delete("/{id}")]
pub async fn delete_request(
    ctx: AuthContext,
    pool: web::Data<DbPool>,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let request_id = path.into_inner();
    if request_id <= 0 {
        return Err(ApiError::BadRequest("Invalid request ID".to_string()));
    }

    ensure_manager_access(&pool, &ctx, request_id).await?;

    let mut conn = pool.get()?;
    let deleted = web::block(move || Request::delete_with_links(&mut conn, request_id)).await??;
    if deleted == 0 {
        return Err(ApiError::NotFound("Request not found".to_string()));
    }

    info!(request_id, manager_id = ctx.user_id, "Request deleted");
    Ok(HttpResponse::NoContent().finish())
}

#[get("/{id}/files")]
pub async fn list_request_files(
    ctx: AuthContext,
    pool: web::Data<DbPool>,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let request_id = path.into_inner();
    if request_id <= 0 {
        return Err(ApiError::BadRequest("Invalid request ID format".to_string()));
    }

    ensure_manager_access(&pool, &ctx, request_id).await?;

    let mut conn = pool.get()?;
    let files = web::block(move || FileMeta::list_for_request(&mut conn, request_id)).await??;

    Ok(HttpResponse::Ok().json(files))
}
