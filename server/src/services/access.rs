//! Authorization decisions over the request/file tree
//!
//! Both checks are pure reads. A USER owns what they created; a MANAGER
//! reaches a request only through the partner they are assigned to, and a
//! file only through some request linking it. Callers must treat a query
//! error as a denial (fail closed).

use diesel::dsl::exists;
use diesel::prelude::*;

use crate::models::user::Role;
use crate::schema::{partners, request_files, requests};

/// May `principal` see (and, for managers, act on) this request?
pub fn can_view_request(
    conn: &mut PgConnection,
    principal_id: i32,
    role: Role,
    request_id: i32,
) -> QueryResult<bool> {
    match role {
        Role::User => diesel::select(exists(
            requests::table
                .filter(requests::id.eq(request_id))
                .filter(requests::partner_user_id.eq(principal_id)),
        ))
        .get_result(conn),
        Role::Manager => diesel::select(exists(
            requests::table
                .inner_join(partners::table)
                .filter(requests::id.eq(request_id))
                .filter(partners::assigned_manager_id.eq(principal_id)),
        ))
        .get_result(conn),
    }
}

/// May `principal` read this file? Reached transitively through the
/// requests that link it.
pub fn can_read_file(
    conn: &mut PgConnection,
    principal_id: i32,
    role: Role,
    file_id: i32,
) -> QueryResult<bool> {
    match role {
        Role::User => diesel::select(exists(
            request_files::table
                .inner_join(requests::table)
                .filter(request_files::file_id.eq(file_id))
                .filter(requests::partner_user_id.eq(principal_id)),
        ))
        .get_result(conn),
        Role::Manager => diesel::select(exists(
            request_files::table
                .inner_join(requests::table.inner_join(partners::table))
                .filter(request_files::file_id.eq(file_id))
                .filter(partners::assigned_manager_id.eq(principal_id)),
        ))
        .get_result(conn),
    }
}
