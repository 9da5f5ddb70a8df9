//! End-client lookup by tax number

use actix_web::{get, web, HttpResponse};
use serde::Deserialize;
use tracing::error;

use crate::db::DbPool;
use crate::error::ApiError;
use crate::models::end_client::EndClient;
use crate::validation::is_valid_inn;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub inn: String,
}

#[get("/end-clients/search")]
pub async fn search_by_inn(
    pool: web::Data<DbPool>,
    query: web::Query<SearchQuery>,
) -> Result<HttpResponse, ApiError> {
    if query.inn.is_empty() {
        return Err(ApiError::BadRequest("Query parameter 'inn' is required".to_string()));
    }
    if !is_valid_inn(&query.inn) {
        return Err(ApiError::BadRequest(
            "Tax number must be 10 or 12 digits".to_string(),
        ));
    }

    let inn = query.inn.clone();
    let mut conn = pool.get()?;
    let client = web::block(move || EndClient::find_by_inn(&mut conn, &inn))
        .await?
        .map_err(|err| {
            error!(inn = %query.inn, error = %err, "End client search failed");
            ApiError::internal(err)
        })?;

    match client {
        Some(client) => Ok(HttpResponse::Ok().json(client)),
        None => Err(ApiError::NotFound(
            "End client with this tax number not found".to_string(),
        )),
    }
}
