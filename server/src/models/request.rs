//! Deal-registration request model
//!
//! The request row is the hub of the entity tree: it points at its
//! creator, partner, optional end client and optional distributor by id.
//! Related records are looked up on demand instead of being embedded, so
//! there is no bidirectional ownership anywhere.
//!
//! Requests are created together with their file links inside a single
//! transaction; a failed insert leaves no partial state behind.

use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use diesel::sql_query;
use diesel::sql_types::{BigInt, Date, Integer, Nullable, Text, Timestamptz};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::schema::{request_files, requests};

/// Closed set of request statuses with an explicit transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RequestStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "IN_PROGRESS")]
    InProgress,
    #[serde(rename = "CLARIFY")]
    Clarify,
    #[serde(rename = "APPROVED")]
    Approved,
    #[serde(rename = "REJECTED")]
    Rejected,
    #[serde(rename = "COMPLETED")]
    Completed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::InProgress => "IN_PROGRESS",
            RequestStatus::Clarify => "CLARIFY",
            RequestStatus::Approved => "APPROVED",
            RequestStatus::Rejected => "REJECTED",
            RequestStatus::Completed => "COMPLETED",
        }
    }

    pub fn from_str(value: &str) -> Option<RequestStatus> {
        match value {
            "PENDING" => Some(RequestStatus::Pending),
            "IN_PROGRESS" => Some(RequestStatus::InProgress),
            "CLARIFY" => Some(RequestStatus::Clarify),
            "APPROVED" => Some(RequestStatus::Approved),
            "REJECTED" => Some(RequestStatus::Rejected),
            "COMPLETED" => Some(RequestStatus::Completed),
            _ => None,
        }
    }

    /// Statuses a manager may move a request into from `self`.
    pub fn allowed_transitions(&self) -> &'static [RequestStatus] {
        use RequestStatus::*;
        match self {
            Pending => &[InProgress, Clarify, Rejected, Approved],
            InProgress => &[Clarify, Rejected, Approved, Completed],
            Clarify => &[InProgress, Rejected],
            Approved => &[Completed],
            Rejected | Completed => &[],
        }
    }

    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Queryable, Identifiable)]
#[diesel(table_name = requests)]
pub struct Request {
    pub id: i32,
    pub partner_user_id: i32,
    pub partner_id: i32,
    pub end_client_id: Option<i32>,
    pub end_client_details_override: Option<String>,
    pub distributor_id: Option<i32>,
    pub partner_contact_override: Option<String>,
    pub fz_law_type: Option<String>,
    pub mpt_registry_type: Option<String>,
    pub partner_activities: Option<String>,
    pub deal_state_description: Option<String>,
    pub estimated_close_date: Option<NaiveDate>,
    pub project_name: Option<String>,
    pub quantity: Option<i32>,
    pub unit_price: Option<Decimal>,
    pub total_price: Option<Decimal>,
    pub status: String,
    pub manager_comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = requests)]
pub struct NewRequest {
    pub partner_user_id: i32,
    pub partner_id: i32,
    pub end_client_id: Option<i32>,
    pub end_client_details_override: Option<String>,
    pub distributor_id: Option<i32>,
    pub partner_contact_override: Option<String>,
    pub fz_law_type: Option<String>,
    pub mpt_registry_type: Option<String>,
    pub partner_activities: Option<String>,
    pub deal_state_description: Option<String>,
    pub estimated_close_date: Option<NaiveDate>,
    pub project_name: Option<String>,
    pub quantity: Option<i32>,
    pub unit_price: Option<Decimal>,
    pub total_price: Option<Decimal>,
    pub status: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = request_files)]
struct NewRequestFile {
    request_id: i32,
    file_id: i32,
}

/// One row of a user's paginated request list.
#[derive(Debug, Serialize, QueryableByName)]
pub struct UserRequestRow {
    #[diesel(sql_type = Integer)]
    pub id: i32,
    #[diesel(sql_type = Text)]
    pub status: String,
    #[diesel(sql_type = Timestamptz)]
    pub created_at: DateTime<Utc>,
    #[diesel(sql_type = Nullable<Text>)]
    pub project_name: Option<String>,
    #[diesel(sql_type = Text)]
    pub client_identifier: String,
}

/// One row of a manager's paginated request list.
#[derive(Debug, Serialize, QueryableByName)]
pub struct ManagerRequestRow {
    #[diesel(sql_type = Integer)]
    pub id: i32,
    #[diesel(sql_type = Text)]
    pub status: String,
    #[diesel(sql_type = Timestamptz)]
    pub created_at: DateTime<Utc>,
    #[diesel(sql_type = Nullable<Date>)]
    pub estimated_close_date: Option<NaiveDate>,
    #[diesel(sql_type = Nullable<Text>)]
    pub project_name: Option<String>,
    #[diesel(sql_type = Integer)]
    pub partner_id: i32,
    #[diesel(sql_type = Text)]
    pub partner_name: String,
    #[diesel(sql_type = Text)]
    pub client_identifier: String,
    #[diesel(sql_type = Nullable<Text>)]
    pub client_inn: Option<String>,
}

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    total: i64,
}

/// Filters and ordering for the manager list. Text filters are
/// case-insensitive substring matches; empty strings disable a filter.
#[derive(Debug, Default, Clone)]
pub struct ManagerListFilter {
    pub status: String,
    pub partner_name: String,
    pub client_text: String,
    pub sort_by: Option<SortField>,
    pub descending: bool,
}

/// Whitelisted sort fields. User input is mapped onto these server-side;
/// raw strings never reach the SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    CreatedAt,
    Status,
    Partner,
    Client,
    Project,
}

impl SortField {
    pub fn from_str(value: &str) -> Option<SortField> {
        match value {
            "created_at" => Some(SortField::CreatedAt),
            "status" => Some(SortField::Status),
            "partner" => Some(SortField::Partner),
            "client" => Some(SortField::Client),
            "project" => Some(SortField::Project),
            _ => None,
        }
    }

    fn sql_expr(&self) -> &'static str {
        match self {
            SortField::CreatedAt => "r.created_at",
            SortField::Status => "r.status",
            SortField::Partner => "p.name",
            SortField::Client => "client_identifier",
            SortField::Project => "r.project_name",
        }
    }
}

const MANAGER_LIST_FROM: &str = "\
FROM requests r \
JOIN partners p ON r.partner_id = p.id \
LEFT JOIN end_clients ec ON r.end_client_id = ec.id \
WHERE p.assigned_manager_id = $1 \
  AND ($2 = '' OR r.status = $2) \
  AND ($3 = '' OR p.name ILIKE '%' || $3 || '%') \
  AND ($4 = '' OR COALESCE(ec.name, r.end_client_details_override, '') ILIKE '%' || $4 || '%')";

impl Request {
    /// Insert the request row and its file links atomically.
    pub fn create_with_files(
        conn: &mut PgConnection,
        new_request: NewRequest,
        file_ids: &[i32],
    ) -> QueryResult<Request> {
        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            let request: Request = diesel::insert_into(requests::table)
                .values(&new_request)
                .get_result(conn)?;

            if !file_ids.is_empty() {
                let links: Vec<NewRequestFile> = file_ids
                    .iter()
                    .map(|&file_id| NewRequestFile {
                        request_id: request.id,
                        file_id,
                    })
                    .collect();
                diesel::insert_into(request_files::table)
                    .values(&links)
                    .execute(conn)?;
            }

            Ok(request)
        })
    }

    pub fn find_by_id(conn: &mut PgConnection, request_id: i32) -> QueryResult<Request> {
        requests::table.find(request_id).first(conn)
    }

    /// Update status and manager comment. Transition legality is checked
    /// by the caller against the current row.
    pub fn update_status(
        conn: &mut PgConnection,
        request_id: i32,
        new_status: RequestStatus,
        manager_comment: Option<&str>,
    ) -> QueryResult<Request> {
        diesel::update(requests::table.find(request_id))
            .set((
                requests::status.eq(new_status.as_str()),
                requests::manager_comment.eq(manager_comment),
                requests::updated_at.eq(diesel::dsl::now),
            ))
            .get_result(conn)
    }

    /// Delete a request and its file links. Blobs are left in place;
    /// links have no standalone lifecycle.
    pub fn delete_with_links(conn: &mut PgConnection, request_id: i32) -> QueryResult<usize> {
        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            diesel::delete(
                request_files::table.filter(request_files::request_id.eq(request_id)),
            )
            .execute(conn)?;
            diesel::delete(requests::table.find(request_id)).execute(conn)
        })
    }

    /// Requests created by `user_id`, newest first. Count and slice come
    /// from the same transaction so `total` matches `items`.
    pub fn list_for_user(
        conn: &mut PgConnection,
        user_id: i32,
        page: i64,
        limit: i64,
    ) -> QueryResult<(Vec<UserRequestRow>, i64)> {
        let offset = (page - 1) * limit;
        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            let total = sql_query(
                "SELECT COUNT(*) AS total FROM requests WHERE partner_user_id = $1",
            )
            .bind::<Integer, _>(user_id)
            .get_result::<CountRow>(conn)?
            .total;

            if total == 0 {
                return Ok((Vec::new(), 0));
            }

            let rows = sql_query(
                "SELECT r.id, r.status, r.created_at, r.project_name, \
                 COALESCE(ec.name, r.end_client_details_override, '') AS client_identifier \
                 FROM requests r \
                 LEFT JOIN end_clients ec ON r.end_client_id = ec.id \
                 WHERE r.partner_user_id = $1 \
                 ORDER BY r.created_at DESC \
                 LIMIT $2 OFFSET $3",
            )
            .bind::<Integer, _>(user_id)
            .bind::<BigInt, _>(limit)
            .bind::<BigInt, _>(offset)
            .load::<UserRequestRow>(conn)?;

            Ok((rows, total))
        })
    }

    /// Requests whose partner is assigned to `manager_id`, filtered and
    /// sorted per `filter`.
    pub fn list_for_manager(
        conn: &mut PgConnection,
        manager_id: i32,
        page: i64,
        limit: i64,
        filter: &ManagerListFilter,
    ) -> QueryResult<(Vec<ManagerRequestRow>, i64)> {
        let offset = (page - 1) * limit;

        let order_expr = filter
            .sort_by
            .unwrap_or(SortField::CreatedAt)
            .sql_expr();
        let order_dir = if filter.descending { "DESC" } else { "ASC" };

        let count_sql = format!("SELECT COUNT(*) AS total {MANAGER_LIST_FROM}");
        let select_sql = format!(
            "SELECT r.id, r.status, r.created_at, r.estimated_close_date, r.project_name, \
             p.id AS partner_id, p.name AS partner_name, \
             COALESCE(ec.name, r.end_client_details_override, '') AS client_identifier, \
             ec.inn AS client_inn \
             {MANAGER_LIST_FROM} \
             ORDER BY {order_expr} {order_dir} NULLS LAST \
             LIMIT $5 OFFSET $6"
        );

        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            let total = sql_query(&count_sql)
                .bind::<Integer, _>(manager_id)
                .bind::<Text, _>(&filter.status)
                .bind::<Text, _>(&filter.partner_name)
                .bind::<Text, _>(&filter.client_text)
                .get_result::<CountRow>(conn)?
                .total;

            if total == 0 {
                return Ok((Vec::new(), 0));
            }

            let rows = sql_query(&select_sql)
                .bind::<Integer, _>(manager_id)
                .bind::<Text, _>(&filter.status)
                .bind::<Text, _>(&filter.partner_name)
                .bind::<Text, _>(&filter.client_text)
                .bind::<BigInt, _>(limit)
                .bind::<BigInt, _>(offset)
                .load::<ManagerRequestRow>(conn)?;

            Ok((rows, total))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            RequestStatus::Pending,
            RequestStatus::InProgress,
            RequestStatus::Clarify,
            RequestStatus::Approved,
            RequestStatus::Rejected,
            RequestStatus::Completed,
        ] {
            assert_eq!(RequestStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(RequestStatus::from_str("SHIPPED"), None);
    }

    #[test]
    fn pending_fans_out() {
        let from = RequestStatus::Pending;
        assert!(from.can_transition_to(RequestStatus::InProgress));
        assert!(from.can_transition_to(RequestStatus::Clarify));
        assert!(from.can_transition_to(RequestStatus::Rejected));
        assert!(from.can_transition_to(RequestStatus::Approved));
        assert!(!from.can_transition_to(RequestStatus::Completed));
        assert!(!from.can_transition_to(RequestStatus::Pending));
    }

    #[test]
    fn clarify_only_returns_or_rejects() {
        let from = RequestStatus::Clarify;
        assert!(from.can_transition_to(RequestStatus::InProgress));
        assert!(from.can_transition_to(RequestStatus::Rejected));
        assert!(!from.can_transition_to(RequestStatus::Approved));
        assert!(!from.can_transition_to(RequestStatus::Completed));
    }

    #[test]
    fn approved_only_completes() {
        assert_eq!(
            RequestStatus::Approved.allowed_transitions(),
            &[RequestStatus::Completed]
        );
    }

    #[test]
    fn terminal_states_allow_nothing() {
        assert!(RequestStatus::Rejected.is_terminal());
        assert!(RequestStatus::Completed.is_terminal());
        assert!(!RequestStatus::Rejected.can_transition_to(RequestStatus::Pending));
        assert!(!RequestStatus::Completed.can_transition_to(RequestStatus::InProgress));
    }

    #[test]
    fn sort_field_whitelist() {
        assert_eq!(SortField::from_str("created_at"), Some(SortField::CreatedAt));
        assert_eq!(SortField::from_str("partner"), Some(SortField::Partner));
        assert_eq!(SortField::from_str("client"), Some(SortField::Client));
        assert_eq!(SortField::from_str("project"), Some(SortField::Project));
        assert_eq!(SortField::from_str("id; DROP TABLE requests"), None);
    }
}
