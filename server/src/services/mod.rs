pub mod access;
pub mod revocation;
pub mod tokens;
