//! # Custom Extractors & Pagination
//!
//! JSON body extraction with the error mapping used across the API, and the
//! `{items, total, limit, offset}` page returned by every list endpoint.

use axum::extract::rejection::JsonRejection;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::state::Document;

/// Default page size.
pub const DEFAULT_LIMIT: usize = 100;
/// Largest page size a caller may request.
pub const MAX_LIMIT: usize = 1000;

/// Extract a JSON body.
///
/// Syntax errors and a wrong content type map to 400; a well-formed body
/// with the wrong shape (unknown enum value, missing field) maps to 422.
pub fn extract_json<T>(result: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    result.map(|Json(v)| v).map_err(|err| match err {
        JsonRejection::JsonDataError(e) => AppError::Validation(e.body_text()),
        other => AppError::BadRequest(other.body_text()),
    })
}

/// `limit` / `offset` query parameters.
///
/// Extracted as its own `Query<PageParams>` next to each module's filter
/// query so filters never need `#[serde(flatten)]`.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageParams {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl PageParams {
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    pub fn offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }
}

/// One page of a filtered list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Number of records matching the filters, before paging.
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

impl<T> Page<T> {
    /// Convert every item, keeping the paging metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            limit: self.limit,
            offset: self.offset,
        }
    }
}

/// Sort newest first and cut the requested page.
pub fn paginate<T: Document>(mut items: Vec<T>, params: &PageParams) -> Page<T> {
    items.sort_by(|a, b| {
        b.created_at()
            .cmp(&a.created_at())
            .then_with(|| b.id().cmp(&a.id()))
    });
    page_of(items, params)
}

/// Cut the requested page out of already ordered `items`.
pub fn page_of<T>(items: Vec<T>, params: &PageParams) -> Page<T> {
    let total = items.len();
    let (limit, offset) = (params.limit(), params.offset());
    Page {
        items: items.into_iter().skip(offset).take(limit).collect(),
        total,
        limit,
        offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Tax;
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn tax(code: &str, minutes_ago: i64) -> Tax {
        let at = Utc::now() - Duration::minutes(minutes_ago);
        Tax {
            id: Uuid::new_v4(),
            code: code.to_string(),
            name: code.to_string(),
            description: None,
            rate: Decimal::ONE,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn limit_defaults_and_caps() {
        assert_eq!(PageParams::default().limit(), DEFAULT_LIMIT);
        let huge = PageParams {
            limit: Some(50_000),
            offset: None,
        };
        assert_eq!(huge.limit(), MAX_LIMIT);
        let zero = PageParams {
            limit: Some(0),
            offset: None,
        };
        assert_eq!(zero.limit(), 1);
    }

    #[test]
    fn paginate_sorts_newest_first() {
        let items = vec![tax("OLD", 30), tax("NEW", 1), tax("MID", 10)];
        let page = paginate(items, &PageParams::default());
        let codes: Vec<_> = page.items.iter().map(|t| t.code.as_str()).collect();
        assert_eq!(codes, vec!["NEW", "MID", "OLD"]);
        assert_eq!(page.total, 3);
    }

    #[test]
    fn paginate_applies_offset_and_limit() {
        let items = (0..5).map(|i| tax(&format!("T{i}"), i)).collect();
        let page = paginate(
            items,
            &PageParams {
                limit: Some(2),
                offset: Some(1),
            },
        );
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].code, "T1");
        assert_eq!(page.offset, 1);
    }

    #[test]
    fn page_map_keeps_metadata() {
        let page = paginate(vec![tax("A", 0)], &PageParams::default()).map(|t| t.code);
        assert_eq!(page.items, vec!["A".to_string()]);
        assert_eq!(page.total, 1);
    }
}
