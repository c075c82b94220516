//! Read-side filters for balances and documents.
//!
//! Every field is optional; an empty (`None`) criterion matches everything and
//! a present list matches any of its values.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use stockroom_core::{ClientId, ResourceId, UnitId};
use stockroom_inventory::{Balance, DocumentLine};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceFilter {
    pub resource_ids: Option<Vec<ResourceId>>,
    pub unit_ids: Option<Vec<UnitId>>,
}

impl BalanceFilter {
    pub fn matches(&self, balance: &Balance) -> bool {
        let key = balance.key();
        matches_any(&self.resource_ids, &key.resource_id)
            && matches_any(&self.unit_ids, &key.unit_id)
    }
}

/// Filter for receipt and shipment listings.
///
/// `client_ids` only applies to shipments. Resource and unit criteria match a
/// document if any of its lines matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFilter {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub numbers: Option<Vec<String>>,
    pub resource_ids: Option<Vec<ResourceId>>,
    pub unit_ids: Option<Vec<UnitId>>,
    pub client_ids: Option<Vec<ClientId>>,
}

impl DocumentFilter {
    pub fn matches_header(&self, number: &str, date: NaiveDate) -> bool {
        if self.date_from.is_some_and(|from| date < from) {
            return false;
        }
        if self.date_to.is_some_and(|to| date > to) {
            return false;
        }
        match &self.numbers {
            Some(numbers) => numbers.iter().any(|n| n == number),
            None => true,
        }
    }

    pub fn matches_lines(&self, lines: &[DocumentLine]) -> bool {
        if self.resource_ids.is_none() && self.unit_ids.is_none() {
            return true;
        }
        lines.iter().any(|l| {
            matches_any(&self.resource_ids, &l.resource_id)
                && matches_any(&self.unit_ids, &l.unit_id)
        })
    }

    pub fn matches_client(&self, client_id: &ClientId) -> bool {
        matches_any(&self.client_ids, client_id)
    }
}

fn matches_any<T: PartialEq>(criterion: &Option<Vec<T>>, value: &T) -> bool {
    criterion.as_ref().is_none_or(|values| values.contains(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockroom_core::Quantity;

    #[test]
    fn empty_filter_matches_everything() {
        let filter = DocumentFilter::default();
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert!(filter.matches_header("R-1", date));
        assert!(filter.matches_lines(&[]));
        assert!(filter.matches_client(&ClientId::new()));
    }

    #[test]
    fn date_range_is_inclusive() {
        let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        let filter = DocumentFilter {
            date_from: Some(d(5)),
            date_to: Some(d(10)),
            ..Default::default()
        };
        assert!(!filter.matches_header("x", d(4)));
        assert!(filter.matches_header("x", d(5)));
        assert!(filter.matches_header("x", d(10)));
        assert!(!filter.matches_header("x", d(11)));
    }

    #[test]
    fn line_criteria_match_any_line() {
        let (r1, r2, u) = (ResourceId::new(), ResourceId::new(), UnitId::new());
        let lines = vec![
            DocumentLine::new(r1, u, Quantity::units(1).unwrap()),
            DocumentLine::new(r2, u, Quantity::units(1).unwrap()),
        ];
        let filter = DocumentFilter {
            resource_ids: Some(vec![r2]),
            ..Default::default()
        };
        assert!(filter.matches_lines(&lines));

        let filter = DocumentFilter {
            resource_ids: Some(vec![ResourceId::new()]),
            ..Default::default()
        };
        assert!(!filter.matches_lines(&lines));
        // A line-based filter never matches a document without lines.
        assert!(!filter.matches_lines(&[]));
    }
}
