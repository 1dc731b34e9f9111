//! Standard response envelopes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;

#[derive(Serialize)]
pub struct Data<T> {
    pub data: T,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: u64,
    pub last_page: u64,
    pub per_page: u32,
    pub current_page: u32,
    /// 1-based index of the first item on the page, 0 when empty.
    pub from: u64,
    pub to: u64,
}

impl Pagination {
    pub fn new(total: u64, page: u32, per_page: u32, returned: usize) -> Self {
        let offset = u64::from(page.saturating_sub(1)) * u64::from(per_page);
        let last_page = total.div_ceil(u64::from(per_page.max(1))).max(1);
        let (from, to) = if returned == 0 {
            (0, 0)
        } else {
            (offset + 1, offset + returned as u64)
        };
        Pagination {
            total,
            last_page,
            per_page,
            current_page: page,
            from,
            to,
        }
    }
}

#[derive(Serialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

pub fn ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(Data { data })).into_response()
}

pub fn created<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(Data { data })).into_response()
}

pub fn paginated(data: Vec<Value>, pagination: Pagination) -> Response {
    (StatusCode::OK, Json(Paginated { data, pagination })).into_response()
}

pub fn no_content() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_bounds() {
        let p = Pagination::new(25, 3, 10, 5);
        assert_eq!(p.last_page, 3);
        assert_eq!((p.from, p.to), (21, 25));

        let empty = Pagination::new(0, 1, 10, 0);
        assert_eq!(empty.last_page, 1);
        assert_eq!((empty.from, empty.to), (0, 0));
    }

    #[test]
    fn pagination_serializes_camel_case() {
        let value = serde_json::to_value(Pagination::new(11, 1, 10, 10)).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"total": 11, "lastPage": 2, "perPage": 10, "currentPage": 1, "from": 1, "to": 10})
        );
    }
}
