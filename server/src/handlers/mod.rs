pub mod auth;
pub mod end_clients;
pub mod health;
pub mod partners;
pub mod requests;
