//! Database connection pool
//!
//! Diesel + r2d2 over PostgreSQL. Startup retries the first connection a
//! few times with a linear backoff so the server survives the database
//! coming up after it in a compose stack.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::PgConnection;
use tracing::{info, warn};

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

const MAX_CONNECT_ATTEMPTS: u32 = 10;

pub fn create_pool(database_url: &str) -> Result<DbPool> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let manager = ConnectionManager::<PgConnection>::new(database_url);
        let result = Pool::builder()
            .max_size(20)
            .connection_timeout(Duration::from_secs(30))
            .build(manager);

        match result {
            Ok(pool) => {
                // A pool can be constructed lazily; prove the database is
                // actually reachable before declaring success.
                match pool.get() {
                    Ok(_) => {
                        info!(attempt, "Database connection pool created");
                        return Ok(pool);
                    }
                    Err(err) if attempt < MAX_CONNECT_ATTEMPTS => {
                        warn!(attempt, error = %err, "Database not ready, retrying");
                    }
                    Err(err) => {
                        return Err(err).with_context(|| {
                            format!("database unreachable after {MAX_CONNECT_ATTEMPTS} attempts")
                        });
                    }
                }
            }
            Err(err) if attempt < MAX_CONNECT_ATTEMPTS => {
                warn!(attempt, error = %err, "Failed to build pool, retrying");
            }
            Err(err) => {
                return Err(err).context("failed to create database connection pool");
            }
        }

        thread::sleep(Duration::from_secs(attempt as u64));
    }
}
