//! Partner reference list

use actix_web::{get, web, HttpResponse};
use tracing::error;

use crate::db::DbPool;
use crate::error::ApiError;
use crate::models::partner::Partner;

#[get("/partners")]
pub async fn list_partners(pool: web::Data<DbPool>) -> Result<HttpResponse, ApiError> {
    let mut conn = pool.get()?;
    let partners = web::block(move || Partner::list_all(&mut conn))
        .await?
        .map_err(|err| {
            error!(error = %err, "Failed to list partners");
            ApiError::internal(err)
        })?;

    Ok(HttpResponse::Ok().json(partners))
}
