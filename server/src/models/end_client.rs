//! End-customer organization model
//!
//! End clients are created on demand during request ingestion when the
//! payload carries a tax number that is not yet on record.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;

use crate::schema::end_clients;

#[derive(Debug, Clone, Serialize, Queryable, Identifiable)]
#[diesel(table_name = end_clients)]
pub struct EndClient {
    pub id: i32,
    pub name: String,
    pub city: Option<String>,
    pub inn: Option<String>,
    pub full_address: Option<String>,
    pub contact_person_details: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = end_clients)]
pub struct NewEndClient {
    pub name: String,
    pub city: Option<String>,
    pub inn: Option<String>,
    pub full_address: Option<String>,
    pub contact_person_details: Option<String>,
}

impl EndClient {
    pub fn create(conn: &mut PgConnection, new_client: NewEndClient) -> QueryResult<EndClient> {
        diesel::insert_into(end_clients::table)
            .values(&new_client)
            .get_result(conn)
    }

    pub fn find_by_id(conn: &mut PgConnection, client_id: i32) -> QueryResult<EndClient> {
        end_clients::table.find(client_id).first(conn)
    }

    /// Lookup by tax number. `Ok(None)` is a miss, not an error.
    pub fn find_by_inn(conn: &mut PgConnection, inn: &str) -> QueryResult<Option<EndClient>> {
        if inn.is_empty() {
            return Ok(None);
        }
        end_clients::table
            .filter(end_clients::inn.eq(inn))
            .first(conn)
            .optional()
    }
}
