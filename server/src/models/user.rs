//! Principal model and role handling

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::users;

/// Closed set of principal roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "USER")]
    User,
    #[serde(rename = "MANAGER")]
    Manager,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Manager => "MANAGER",
        }
    }

    pub fn from_str(value: &str) -> Option<Role> {
        match value {
            "USER" => Some(Role::User),
            "MANAGER" => Some(Role::Manager),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: i32,
    pub login: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub partner_id: Option<i32>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub login: String,
    pub password_hash: String,
    pub role: String,
    pub partner_id: Option<i32>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl User {
    pub fn create(conn: &mut PgConnection, new_user: NewUser) -> QueryResult<User> {
        diesel::insert_into(users::table)
            .values(&new_user)
            .get_result(conn)
    }

    pub fn find_by_id(conn: &mut PgConnection, user_id: i32) -> QueryResult<User> {
        users::table.find(user_id).first(conn)
    }

    pub fn find_by_login(conn: &mut PgConnection, login: &str) -> QueryResult<User> {
        users::table.filter(users::login.eq(login)).first(conn)
    }

    pub fn update_password_hash(
        conn: &mut PgConnection,
        user_id: i32,
        new_hash: &str,
    ) -> QueryResult<usize> {
        diesel::update(users::table.find(user_id))
            .set(users::password_hash.eq(new_hash))
            .execute(conn)
    }

    pub fn role(&self) -> Option<Role> {
        Role::from_str(&self.role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_str() {
        assert_eq!(Role::from_str(Role::User.as_str()), Some(Role::User));
        assert_eq!(Role::from_str(Role::Manager.as_str()), Some(Role::Manager));
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert_eq!(Role::from_str("ADMIN"), None);
        assert_eq!(Role::from_str("user"), None);
    }
}
