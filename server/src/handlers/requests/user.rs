//! Partner-side request handlers: multipart ingestion and own-request reads

use actix_multipart::Multipart;
use actix_web::{get, post, web, HttpMessage, HttpRequest, HttpResponse};
use chrono::NaiveDate;
use futures_util::TryStreamExt;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, warn};

use crate::db::DbPool;
use crate::error::{ApiError, FieldError};
use crate::handlers::requests::load_detail;
use crate::middleware::AuthContext;
use crate::models::common::{normalize_page_limit, PaginatedResponse};
use crate::models::end_client::{EndClient, NewEndClient};
use crate::models::file::{insert_file, NewFile, MAX_FILE_SIZE};
use crate::models::request::{NewRequest, Request, RequestStatus};
use crate::models::user::User;
use crate::services::access;
use crate::utils::sanitize_filename;
use crate::validation::is_valid_inn;

/// Whole-body ceiling for the multipart upload (matches the per-file cap).
const MAX_BODY_SIZE: usize = 15 * 1024 * 1024;

/// JSON payload carried in the `request_data` multipart field.
#[derive(Debug, Deserialize)]
pub struct CreateRequestDto {
    #[serde(default)]
    pub distributor_id: Option<i32>,
    #[serde(default)]
    pub end_client_id: Option<i32>,
    #[serde(default)]
    pub end_client_inn: Option<String>,
    #[serde(default)]
    pub end_client_name: Option<String>,
    #[serde(default)]
    pub end_client_city: Option<String>,
    #[serde(default)]
    pub end_client_full_address: Option<String>,
    #[serde(default)]
    pub end_client_contact_details: Option<String>,
    #[serde(default)]
    pub end_client_details_override: Option<String>,
    #[serde(default)]
    pub partner_contact_override: Option<String>,
    #[serde(default)]
    pub fz_law_type: Option<String>,
    #[serde(default)]
    pub mpt_registry_type: Option<String>,
    #[serde(default)]
    pub partner_activities: Option<String>,
    #[serde(default)]
    pub deal_state_description: Option<String>,
    #[serde(default)]
    pub estimated_close_date: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub quantity: Option<i32>,
    #[serde(default)]
    pub unit_price: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

fn none_if_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[post("")]
pub async fn create_request(
    ctx: AuthContext,
    pool: web::Data<DbPool>,
    req: HttpRequest,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let content_type = req.content_type();
    if !content_type.starts_with("multipart/form-data") {
        return Err(ApiError::UnsupportedMediaType(format!(
            "Unsupported Content-Type: {content_type}"
        )));
    }

    // The creator must belong to a partner organization; the request is
    // always registered against that partner.
    let user_id = ctx.user_id;
    let mut conn = pool.get()?;
    let creator = web::block(move || User::find_by_id(&mut conn, user_id))
        .await?
        .map_err(|err| match err {
            diesel::result::Error::NotFound => {
                ApiError::Unauthorized("Invalid session".to_string())
            }
            other => ApiError::internal(other),
        })?;

    let partner_id = creator.partner_id.ok_or_else(|| {
        warn!(user_id, "Request creation without partner reference");
        ApiError::BadRequest("User is not linked to a partner organization".to_string())
    })?;

    // Walk the multipart body: one JSON field plus any number of file
    // parts. Blobs are inserted as they stream in; only the request row
    // and its links are transactional.
    let mut request_data: Option<String> = None;
    let mut file_ids: Vec<i32> = Vec::new();
    let mut body_bytes: usize = 0;

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|err| ApiError::BadRequest(format!("Failed to parse multipart form: {err}")))?
    {
        let field_name = field.name().to_string();
        match field_name.as_str() {
            "request_data" => {
                let mut data = Vec::new();
                while let Some(chunk) = field
                    .try_next()
                    .await
                    .map_err(|err| ApiError::BadRequest(format!("Failed to read form field: {err}")))?
                {
                    body_bytes += chunk.len();
                    if body_bytes > MAX_BODY_SIZE {
                        return Err(ApiError::PayloadTooLarge(
                            "Request body exceeds 15 MB".to_string(),
                        ));
                    }
                    data.extend_from_slice(&chunk);
                }
                request_data = Some(String::from_utf8(data).map_err(|_| {
                    ApiError::BadRequest("request_data must be valid UTF-8".to_string())
                })?);
            }
            "overall_tz_files[]" => {
                let file_name = field
                    .content_disposition()
                    .get_filename()
                    .map(sanitize_filename)
                    .unwrap_or_else(|| "file".to_string());
                let mime_type = field
                    .content_type()
                    .map(|mime| mime.to_string())
                    .unwrap_or_else(|| "application/octet-stream".to_string());

                let mut data = Vec::new();
                while let Some(chunk) = field.try_next().await.map_err(|err| {
                    ApiError::BadRequest(format!("Failed to read uploaded file: {err}"))
                })? {
                    body_bytes += chunk.len();
                    if body_bytes > MAX_BODY_SIZE {
                        return Err(ApiError::PayloadTooLarge(
                            "Request body exceeds 15 MB".to_string(),
                        ));
                    }
                    if data.len() + chunk.len() > MAX_FILE_SIZE {
                        return Err(ApiError::PayloadTooLarge(format!(
                            "File '{file_name}' exceeds the {} MB limit",
                            MAX_FILE_SIZE / 1024 / 1024
                        )));
                    }
                    data.extend_from_slice(&chunk);
                }

                if data.is_empty() {
                    continue;
                }

                let new_file = NewFile {
                    file_name,
                    mime_type,
                    file_size: data.len() as i64,
                    file_data: data,
                };
                let mut conn = pool.get()?;
                let file_id = web::block(move || insert_file(&mut conn, new_file)).await??;
                file_ids.push(file_id);
            }
            _ => {
                // Drain unknown fields so the stream stays consumable.
                while field
                    .try_next()
                    .await
                    .map_err(|err| ApiError::BadRequest(format!("Failed to read form field: {err}")))?
                    .is_some()
                {}
            }
        }
    }

    let request_data = request_data
        .ok_or_else(|| ApiError::BadRequest("Missing request_data field".to_string()))?;

    let parsed: serde_json::Value = serde_json::from_str(&request_data)
        .map_err(|err| ApiError::BadRequest(format!("Invalid JSON data: {err}")))?;
    if !parsed.is_object() {
        return Err(ApiError::BadRequest(
            "Request payload must be a JSON object".to_string(),
        ));
    }
    let dto: CreateRequestDto = serde_json::from_value(parsed)
        .map_err(|err| ApiError::BadRequest(format!("Invalid JSON data: {err}")))?;

    if let Some(quantity) = dto.quantity {
        if quantity < 1 {
            return Err(ApiError::Validation(vec![FieldError {
                field: "quantity".to_string(),
                message: "Quantity must be at least 1".to_string(),
            }]));
        }
    }

    let estimated_close_date = match none_if_empty(dto.estimated_close_date.clone()) {
        Some(raw) => Some(NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|_| {
            ApiError::BadRequest("Estimated close date must be formatted YYYY-MM-DD".to_string())
        })?),
        None => None,
    };

    let unit_price = match none_if_empty(dto.unit_price.clone()) {
        Some(raw) => Some(raw.parse::<Decimal>().map_err(|_| {
            ApiError::BadRequest("Invalid unit_price format".to_string())
        })?),
        None => None,
    };
    let total_price = match (dto.quantity, unit_price) {
        (Some(quantity), Some(price)) => Some(Decimal::from(quantity) * price),
        _ => None,
    };

    // End-client resolution: explicit reference wins, then lookup or
    // create by tax number, otherwise a free-text override is required.
    let override_text = none_if_empty(dto.end_client_details_override.clone());
    let mut end_client_id = dto.end_client_id;

    if end_client_id.is_none() {
        if let Some(inn) = none_if_empty(dto.end_client_inn.clone()) {
            if !is_valid_inn(&inn) {
                return Err(ApiError::Validation(vec![FieldError {
                    field: "end_client_inn".to_string(),
                    message: "Tax number must be 10 or 12 digits".to_string(),
                }]));
            }

            let lookup_inn = inn.clone();
            let mut conn = pool.get()?;
            let existing =
                web::block(move || EndClient::find_by_inn(&mut conn, &lookup_inn)).await??;

            end_client_id = match existing {
                Some(client) => Some(client.id),
                None => {
                    let name = none_if_empty(dto.end_client_name.clone()).ok_or_else(|| {
                        ApiError::Validation(vec![FieldError {
                            field: "end_client_name".to_string(),
                            message: "End client name is required to create a new end client"
                                .to_string(),
                        }])
                    })?;
                    let new_client = NewEndClient {
                        name,
                        city: none_if_empty(dto.end_client_city.clone()),
                        inn: Some(inn),
                        full_address: none_if_empty(dto.end_client_full_address.clone()),
                        contact_person_details: none_if_empty(
                            dto.end_client_contact_details.clone(),
                        ),
                    };
                    let mut conn = pool.get()?;
                    let created =
                        web::block(move || EndClient::create(&mut conn, new_client)).await??;
                    Some(created.id)
                }
            };
        }
    }

    match (end_client_id, &override_text) {
        (None, None) => {
            return Err(ApiError::BadRequest(
                "Either an end client reference or an end client description is required"
                    .to_string(),
            ));
        }
        (Some(_), Some(_)) => {
            return Err(ApiError::BadRequest(
                "End client reference and free-text description are mutually exclusive"
                    .to_string(),
            ));
        }
        _ => {}
    }

    let new_request = NewRequest {
        partner_user_id: creator.id,
        partner_id,
        end_client_id,
        end_client_details_override: override_text,
        distributor_id: dto.distributor_id,
        partner_contact_override: none_if_empty(dto.partner_contact_override.clone()),
        fz_law_type: none_if_empty(dto.fz_law_type.clone()),
        mpt_registry_type: none_if_empty(dto.mpt_registry_type.clone()),
        partner_activities: none_if_empty(dto.partner_activities.clone()),
        deal_state_description: none_if_empty(dto.deal_state_description.clone()),
        estimated_close_date,
        project_name: none_if_empty(dto.project_name.clone()),
        quantity: dto.quantity,
        unit_price,
        total_price,
        status: RequestStatus::Pending.as_str().to_string(),
    };

    let mut conn = pool.get()?;
    let detail = web::block(move || {
        let request = Request::create_with_files(&mut conn, new_request, &file_ids)?;
        load_detail(&mut conn, request.id)
    })
    .await??;

    info!(
        request_id = detail.request.id,
        user_id = creator.id,
        partner_id,
        files = detail.files.len(),
        "Request created"
    );

    Ok(HttpResponse::Created().json(detail))
}

#[get("/my")]
pub async fn list_my_requests(
    ctx: AuthContext,
    pool: web::Data<DbPool>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    let (page, limit) = normalize_page_limit(query.page, query.limit);

    let user_id = ctx.user_id;
    let mut conn = pool.get()?;
    let (items, total) =
        web::block(move || Request::list_for_user(&mut conn, user_id, page, limit)).await??;

    Ok(HttpResponse::Ok().json(PaginatedResponse {
        items,
        total,
        page,
        limit,
    }))
}

#[get("/my/{id}")]
pub async fn my_request_details(
    ctx: AuthContext,
    pool: web::Data<DbPool>,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let request_id = path.into_inner();
    if request_id <= 0 {
        return Err(ApiError::BadRequest("Invalid request ID".to_string()));
    }

    let user_id = ctx.user_id;
    let role = ctx.role;
    let mut conn = pool.get()?;
    let allowed = web::block(move || access::can_view_request(&mut conn, user_id, role, request_id))
        .await?
        .map_err(ApiError::internal)?;
    if !allowed {
        // Scoped to "my": a request that is not yours does not exist here.
        return Err(ApiError::NotFound("Request not found".to_string()));
    }

    let mut conn = pool.get()?;
    let detail = web::block(move || load_detail(&mut conn, request_id)).await??;

    Ok(HttpResponse::Ok().json(detail))
}
