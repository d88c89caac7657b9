//! Per-column category encoder

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Code assigned to a category not seen at fit time
pub const UNSEEN_CATEGORY: f64 = -1.0;

/// Maps the distinct training values of a text column to dense integer codes.
///
/// Codes follow the sorted order of the categories, so refitting on the
/// same values always yields the same encoding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryEncoder {
    categories: Vec<String>,
}

impl CategoryEncoder {
    /// Fit on the non-missing values of a column
    pub fn fit<'a>(values: impl IntoIterator<Item = &'a Option<String>>) -> Self {
        let distinct: BTreeSet<&str> = values.into_iter().filter_map(|v| v.as_deref()).collect();
        Self { categories: distinct.into_iter().map(str::to_string).collect() }
    }

    /// Code for one value. Missing values are NaN so they are imputed later.
    pub fn encode(&self, value: Option<&str>) -> f64 {
        match value {
            None => f64::NAN,
            Some(v) => match self.categories.binary_search_by(|c| c.as_str().cmp(v)) {
                Ok(code) => code as f64,
                Err(_) => UNSEEN_CATEGORY,
            },
        }
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_codes_and_unseen() {
        let values = vec![Some("udp".to_string()), Some("tcp".to_string()), None, Some("icmp".to_string())];
        let enc = CategoryEncoder::fit(&values);
        assert_eq!(enc.categories(), &["icmp", "tcp", "udp"]);
        assert_eq!(enc.encode(Some("tcp")), 1.0);
        assert_eq!(enc.encode(Some("gre")), UNSEEN_CATEGORY);
        assert!(enc.encode(None).is_nan());
    }
}
