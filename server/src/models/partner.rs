//! Partner organization model
//!
//! A partner doubles as a distributor when referenced from a request's
//! `distributor_id` column.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;

use crate::schema::partners;

#[derive(Debug, Clone, Serialize, Queryable, Identifiable)]
#[diesel(table_name = partners)]
pub struct Partner {
    pub id: i32,
    pub name: String,
    pub address: Option<String>,
    pub inn: Option<String>,
    pub partner_status: Option<String>,
    pub assigned_manager_id: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Partner {
    pub fn find_by_id(conn: &mut PgConnection, partner_id: i32) -> QueryResult<Partner> {
        partners::table.find(partner_id).first(conn)
    }

    pub fn list_all(conn: &mut PgConnection) -> QueryResult<Vec<Partner>> {
        partners::table.order(partners::name.asc()).load(conn)
    }
}
