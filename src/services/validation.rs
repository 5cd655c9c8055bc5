use garde::Validate;
use std::collections::HashSet;

use crate::error::FittingError;
use crate::models::fitting::{FittingRequest, HistoryQuery};
use crate::models::job::Category;

/// Most garments composited in one job (one per category).
pub const MAX_ITEMS: usize = 3;

/// Check a creation request and return its items in order.
pub fn validate_fitting_request(
    request: &FittingRequest,
) -> Result<Vec<(i64, Category)>, FittingError> {
    if request.items.is_empty() {
        return Err(FittingError::InsufficientItems);
    }
    if request.items.len() > MAX_ITEMS {
        return Err(FittingError::TooManyItems { max: MAX_ITEMS });
    }

    let mut seen = HashSet::new();
    let mut items = Vec::with_capacity(request.items.len());
    for item in &request.items {
        let category: Category = item
            .category
            .parse()
            .map_err(|_| FittingError::InvalidCategory(item.category.clone()))?;
        if !seen.insert(category) {
            return Err(FittingError::DuplicateCategory(category.to_string()));
        }
        items.push((item.item_id, category));
    }

    request
        .validate()
        .map_err(|e| FittingError::Validation(e.to_string()))?;

    Ok(items)
}

/// Validate a history query and return the row offset of its page.
pub fn validate_history_query(query: &HistoryQuery) -> Result<i64, FittingError> {
    query
        .validate()
        .map_err(|e| FittingError::Validation(e.to_string()))?;

    (query.page - 1)
        .checked_mul(query.limit)
        .ok_or_else(|| FittingError::Validation(format!("page {} is out of range", query.page)))
}
