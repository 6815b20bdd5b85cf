//! List endpoints: filtering, search, sorting and pagination.
//!
//! Filters work on the JSON rows the endpoints return, so every list shares
//! one implementation.

use std::cmp::Ordering;

use serde::Deserialize;
use serde_json::Value;

use crate::app::errors::ApiError;

pub const DEFAULT_PER_PAGE: usize = 15;
pub const MAX_PER_PAGE: usize = 100;

#[derive(Debug, Default, Clone, Deserialize)]
pub struct ListQuery {
    pub state: Option<String>,
    pub partner_id: Option<String>,
    pub product_id: Option<String>,
    pub location_id: Option<String>,
    pub search: Option<String>,
    /// `field` ascending, `-field` descending.
    pub sort: Option<String>,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

/// What a resource allows to search and sort on.
#[derive(Debug, Clone, Copy)]
pub struct Listing {
    pub searchable: &'static [&'static str],
    pub sortable: &'static [&'static str],
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub data: Vec<Value>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
}

impl ListQuery {
    pub fn apply(&self, rows: Vec<Value>, listing: Listing) -> Result<Page, ApiError> {
        let page = self.page.unwrap_or(1);
        if page == 0 {
            return Err(ApiError::validation("page", "page must be at least 1"));
        }
        let per_page = self.per_page.unwrap_or(DEFAULT_PER_PAGE);
        if per_page == 0 {
            return Err(ApiError::validation("per_page", "per_page must be at least 1"));
        }
        let per_page = per_page.min(MAX_PER_PAGE);

        let mut rows: Vec<Value> = rows.into_iter().filter(|row| self.matches(row, listing)).collect();

        if let Some(sort) = self.sort.as_deref().filter(|s| !s.is_empty()) {
            let (field, descending) = match sort.strip_prefix('-') {
                Some(field) => (field, true),
                None => (sort, false),
            };
            if !listing.sortable.contains(&field) {
                return Err(ApiError::validation(
                    "sort",
                    format!("cannot sort by '{field}'; allowed: {}", listing.sortable.join(", ")),
                ));
            }
            rows.sort_by(|a, b| {
                let ord = compare(&a[field], &b[field]);
                if descending { ord.reverse() } else { ord }
            });
        }

        let total = rows.len();
        // An offset past `usize::MAX` is past the last row anyway.
        let offset = (page - 1).checked_mul(per_page).unwrap_or(usize::MAX);
        let data = rows.into_iter().skip(offset).take(per_page).collect();
        Ok(Page {
            data,
            total,
            page,
            per_page,
        })
    }

    fn matches(&self, row: &Value, listing: Listing) -> bool {
        if let Some(state) = &self.state {
            if row["state"].as_str() != Some(state.as_str()) {
                return false;
            }
        }
        if let Some(partner_id) = &self.partner_id {
            if !is(&row["partner_id"], partner_id) {
                return false;
            }
        }
        if let Some(product_id) = &self.product_id {
            let nested = ["lines", "moves"].iter().any(|key| {
                row[*key]
                    .as_array()
                    .is_some_and(|items| items.iter().any(|item| is(&item["product_id"], product_id)))
            });
            if !nested && !is(&row["product_id"], product_id) {
                return false;
            }
        }
        if let Some(location_id) = &self.location_id {
            let hit = ["location_id", "source_location_id", "destination_location_id"]
                .iter()
                .any(|key| is(&row[*key], location_id));
            if !hit {
                return false;
            }
        }
        if let Some(search) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let needle = search.to_lowercase();
            let hit = listing
                .searchable
                .iter()
                .filter_map(|key| row[*key].as_str())
                .any(|text| text.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        true
    }
}

fn is(value: &Value, id: &str) -> bool {
    value.as_str().is_some_and(|v| v.eq_ignore_ascii_case(id))
}

/// Nulls first, then numbers, strings and booleans by value.
fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const ORDERS: Listing = Listing {
        searchable: &["reference"],
        sortable: &["reference", "amount_total"],
    };

    fn rows() -> Vec<Value> {
        vec![
            json!({"reference": "S00001", "state": "draft", "partner_id": "a", "amount_total": 300,
                   "lines": [{"product_id": "p1"}]}),
            json!({"reference": "S00002", "state": "sale", "partner_id": "b", "amount_total": 100,
                   "lines": [{"product_id": "p2"}]}),
            json!({"reference": "S00003", "state": "sale", "partner_id": "a", "amount_total": 200,
                   "lines": [{"product_id": "p1"}, {"product_id": "p2"}]}),
        ]
    }

    fn refs(page: &Page) -> Vec<&str> {
        page.data.iter().map(|r| r["reference"].as_str().unwrap()).collect()
    }

    #[test]
    fn filters_combine() {
        let query = ListQuery {
            state: Some("sale".into()),
            product_id: Some("p1".into()),
            ..Default::default()
        };
        let page = query.apply(rows(), ORDERS).unwrap();
        assert_eq!(refs(&page), vec!["S00003"]);
        assert_eq!(page.total, 1);
    }

    #[test]
    fn sorts_descending_and_paginates() {
        let query = ListQuery {
            sort: Some("-amount_total".into()),
            page: Some(2),
            per_page: Some(2),
            ..Default::default()
        };
        let page = query.apply(rows(), ORDERS).unwrap();
        assert_eq!(refs(&page), vec!["S00002"]);
        assert_eq!((page.total, page.page, page.per_page), (3, 2, 2));
    }

    #[test]
    fn search_is_case_insensitive() {
        let query = ListQuery {
            search: Some("s00002".into()),
            ..Default::default()
        };
        assert_eq!(refs(&query.apply(rows(), ORDERS).unwrap()), vec!["S00002"]);
    }

    #[test]
    fn per_page_is_capped_and_unknown_sort_rejected() {
        let query = ListQuery {
            per_page: Some(1_000),
            ..Default::default()
        };
        assert_eq!(query.apply(rows(), ORDERS).unwrap().per_page, MAX_PER_PAGE);

        let query = ListQuery {
            sort: Some("secret".into()),
            ..Default::default()
        };
        assert!(matches!(
            query.apply(rows(), ORDERS),
            Err(ApiError::Validation { field, .. }) if field == "sort"
        ));
    }

    #[test]
    fn pages_past_the_end_are_empty() {
        let query = ListQuery {
            page: Some(usize::MAX),
            per_page: Some(50),
            ..Default::default()
        };
        let page = query.apply(rows(), ORDERS).unwrap();
        assert!(page.data.is_empty());
        assert_eq!((page.total, page.page), (3, usize::MAX));
    }
}
