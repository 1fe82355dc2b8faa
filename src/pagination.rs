//! Pagination helper shared by every listing endpoint, mirroring the
//! original's `router_utils.paginate`: fills `page`, `total`, and
//! `num_of_pages` on the response envelope from a `page`/`page_size`
//! request and a total row count.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PaginationRequest {
    #[serde(default)]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page_size() -> i64 {
    25
}

impl Default for PaginationRequest {
    fn default() -> Self {
        PaginationRequest {
            page: 0,
            page_size: default_page_size(),
        }
    }
}

impl PaginationRequest {
    pub fn limit(&self) -> i64 {
        self.page_size.max(1)
    }

    pub fn offset(&self) -> i64 {
        self.page.max(0) * self.limit()
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Page {
    pub page: i64,
    pub total: i64,
    pub num_of_pages: i64,
}

/// Computes the page metadata the way `router_utils.paginate` does:
/// `num_of_pages = total // page_size + 1`, even when `total` is zero.
pub fn page_of(request: &PaginationRequest, total: i64) -> Page {
    Page {
        page: request.page,
        total,
        num_of_pages: total / request.limit() + 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_and_offset_from_page() {
        let req = PaginationRequest { page: 2, page_size: 10 };
        assert_eq!(req.limit(), 10);
        assert_eq!(req.offset(), 20);
    }

    #[test]
    fn num_of_pages_matches_original_formula() {
        let req = PaginationRequest { page: 0, page_size: 25 };
        assert_eq!(page_of(&req, 0).num_of_pages, 1);
        assert_eq!(page_of(&req, 25).num_of_pages, 2);
        assert_eq!(page_of(&req, 26).num_of_pages, 2);
        assert_eq!(page_of(&req, 50).num_of_pages, 3);
    }
}
