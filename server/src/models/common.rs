//! Shared API response shapes

use serde::Serialize;

pub const DEFAULT_PAGE_LIMIT: i64 = 10;
pub const MAX_PAGE_LIMIT: i64 = 100;

/// Envelope for every paginated list endpoint.
#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T: Serialize> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

/// Coerce raw query parameters into a valid (page, limit) pair.
/// Out-of-range values fall back to defaults rather than erroring.
pub fn normalize_page_limit(page: Option<i64>, limit: Option<i64>) -> (i64, i64) {
    let page = match page {
        Some(p) if p >= 1 => p,
        _ => 1,
    };
    let limit = match limit {
        Some(l) if (1..=MAX_PAGE_LIMIT).contains(&l) => l,
        _ => DEFAULT_PAGE_LIMIT,
    };
    (page, limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_absent() {
        assert_eq!(normalize_page_limit(None, None), (1, 10));
    }

    #[test]
    fn coerces_out_of_range_values() {
        assert_eq!(normalize_page_limit(Some(0), Some(0)), (1, 10));
        assert_eq!(normalize_page_limit(Some(-3), Some(101)), (1, 10));
    }

    #[test]
    fn keeps_valid_values() {
        assert_eq!(normalize_page_limit(Some(4), Some(100)), (4, 100));
        assert_eq!(normalize_page_limit(Some(1), Some(1)), (1, 1));
    }
}
