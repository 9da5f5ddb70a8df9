//! Request handlers: partner-side intake and manager-side review
//!
//! Detail responses embed summaries of the related records. They are
//! looked up by id on demand; nothing holds a back-reference.

use diesel::prelude::*;
use serde::Serialize;

use crate::models::end_client::EndClient;
use crate::models::file::FileMeta;
use crate::models::partner::Partner;
use crate::models::request::Request;

pub mod files;
pub mod manager;
pub mod user;

/// Full request body returned by the detail and create endpoints.
#[derive(Debug, Serialize)]
pub struct RequestDetailResponse {
    #[serde(flatten)]
    pub request: Request,
    pub partner: Option<Partner>,
    pub end_client: Option<EndClient>,
    pub distributor: Option<Partner>,
    pub files: Vec<FileMeta>,
}

/// Load a request with its related records. Related lookups that fail
/// with NotFound leave the slot empty instead of failing the response.
pub(crate) fn load_detail(
    conn: &mut PgConnection,
    request_id: i32,
) -> QueryResult<RequestDetailResponse> {
    let request = Request::find_by_id(conn, request_id)?;

    let partner = Partner::find_by_id(conn, request.partner_id).optional()?;
    let end_client = match request.end_client_id {
        Some(id) => EndClient::find_by_id(conn, id).optional()?,
        None => None,
    };
    let distributor = match request.distributor_id {
        Some(id) => Partner::find_by_id(conn, id).optional()?,
        None => None,
    };
    let files = FileMeta::list_for_request(conn, request.id)?;

    Ok(RequestDetailResponse {
        request,
        partner,
        end_client,
        distributor,
        files,
    })
}
