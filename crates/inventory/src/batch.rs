use std::collections::BTreeMap;

use rust_decimal::Decimal;

use stockroom_core::{DomainResult, Quantity};

use crate::balance::{Balance, BalanceDelta, BalanceKey};

/// A set of balance deltas netted per key.
///
/// Deltas for the same key are summed, keys whose net is zero are dropped, and
/// iteration is always in `BalanceKey` order so callers can lock rows
/// deterministically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaBatch {
    net: BTreeMap<BalanceKey, Decimal>,
}

/// A key whose available quantity does not cover a requested decrease.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Shortfall {
    pub key: BalanceKey,
    pub requested: Decimal,
    pub available: Decimal,
}

impl DeltaBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_deltas(deltas: impl IntoIterator<Item = BalanceDelta>) -> Self {
        let mut batch = Self::new();
        for delta in deltas {
            batch.push(delta);
        }
        batch
    }

    /// One positive delta per line.
    pub fn from_lines(lines: impl IntoIterator<Item = (BalanceKey, Quantity)>) -> Self {
        Self::from_deltas(lines.into_iter().map(|(k, q)| BalanceDelta::increase(k, q)))
    }

    /// Per-key `new - old`, treating a key missing on either side as zero.
    ///
    /// Removed lines become a delta down to zero, added lines a delta up from
    /// zero, unchanged keys disappear.
    pub fn between(
        old: impl IntoIterator<Item = (BalanceKey, Quantity)>,
        new: impl IntoIterator<Item = (BalanceKey, Quantity)>,
    ) -> Self {
        let mut batch = Self::new();
        for (key, q) in old {
            batch.push(BalanceDelta::decrease(key, q));
        }
        for (key, q) in new {
            batch.push(BalanceDelta::increase(key, q));
        }
        batch
    }

    pub fn push(&mut self, delta: BalanceDelta) {
        if delta.is_zero() {
            return;
        }
        let entry = self.net.entry(delta.key).or_insert(Decimal::ZERO);
        *entry += delta.quantity;
        if entry.is_zero() {
            self.net.remove(&delta.key);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.net.is_empty()
    }

    pub fn len(&self) -> usize {
        self.net.len()
    }

    /// Touched keys in lock order.
    pub fn keys(&self) -> Vec<BalanceKey> {
        self.net.keys().copied().collect()
    }

    pub fn get(&self, key: &BalanceKey) -> Option<Decimal> {
        self.net.get(key).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = BalanceDelta> + '_ {
        self.net.iter().map(|(k, q)| BalanceDelta::new(*k, *q))
    }

    pub fn negated(&self) -> Self {
        Self {
            net: self.net.iter().map(|(k, q)| (*k, -*q)).collect(),
        }
    }

    /// Only the keys whose net delta is negative.
    pub fn decreases(&self) -> Self {
        Self {
            net: self
                .net
                .iter()
                .filter(|(_, q)| q.is_sign_negative())
                .map(|(k, q)| (*k, *q))
                .collect(),
        }
    }

    /// True if every net delta is positive.
    pub fn is_increase_only(&self) -> bool {
        self.net.values().all(|q| q.is_sign_positive())
    }

    /// Every negative delta the snapshot cannot cover, in key order.
    ///
    /// Keys absent from the snapshot have zero available.
    pub fn shortfalls(&self, snapshot: &BTreeMap<BalanceKey, Balance>) -> Vec<Shortfall> {
        self.net
            .iter()
            .filter(|(_, q)| q.is_sign_negative())
            .filter_map(|(key, q)| {
                let requested = -*q;
                let available = snapshot
                    .get(key)
                    .map(Balance::quantity)
                    .unwrap_or(Decimal::ZERO);
                (available < requested).then_some(Shortfall {
                    key: *key,
                    requested,
                    available,
                })
            })
            .collect()
    }

    pub fn first_shortfall(&self, snapshot: &BTreeMap<BalanceKey, Balance>) -> Option<Shortfall> {
        self.shortfalls(snapshot).into_iter().next()
    }

    /// Apply every delta to a copy of the snapshot and return the touched rows.
    ///
    /// Missing rows start at zero. Callers validate with [`first_shortfall`]
    /// first; a delta that would still go negative fails without producing
    /// any rows.
    ///
    /// [`first_shortfall`]: DeltaBatch::first_shortfall
    pub fn apply_to(&self, snapshot: &BTreeMap<BalanceKey, Balance>) -> DomainResult<Vec<Balance>> {
        let mut updated = Vec::with_capacity(self.net.len());
        for (key, delta) in &self.net {
            let mut balance = snapshot
                .get(key)
                .cloned()
                .unwrap_or_else(|| Balance::zero(*key));
            balance.apply(*delta)?;
            updated.push(balance);
        }
        Ok(updated)
    }
}

impl FromIterator<BalanceDelta> for DeltaBatch {
    fn from_iter<T: IntoIterator<Item = BalanceDelta>>(iter: T) -> Self {
        Self::from_deltas(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use stockroom_core::{ResourceId, UnitId};

    fn key(n: u128) -> BalanceKey {
        BalanceKey::new(
            ResourceId::from_uuid(uuid::Uuid::from_u128(n)),
            UnitId::from_uuid(uuid::Uuid::from_u128(1)),
        )
    }

    fn qty(n: i64) -> Decimal {
        Decimal::new(n, 0)
    }

    fn q(n: u32) -> Quantity {
        Quantity::units(n).unwrap()
    }

    fn snapshot(rows: &[(BalanceKey, i64)]) -> BTreeMap<BalanceKey, Balance> {
        rows.iter()
            .map(|(k, n)| (*k, Balance::from_parts(*k, qty(*n)).unwrap()))
            .collect()
    }

    #[test]
    fn same_key_deltas_are_summed_and_zero_nets_dropped() {
        let batch = DeltaBatch::from_deltas([
            BalanceDelta::new(key(1), qty(5)),
            BalanceDelta::new(key(1), qty(-2)),
            BalanceDelta::new(key(2), qty(3)),
            BalanceDelta::new(key(2), qty(-3)),
            BalanceDelta::new(key(3), Decimal::ZERO),
        ]);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.get(&key(1)), Some(qty(3)));
    }

    #[test]
    fn keys_come_out_sorted_regardless_of_insertion_order() {
        let batch = DeltaBatch::from_deltas([
            BalanceDelta::new(key(3), qty(1)),
            BalanceDelta::new(key(1), qty(1)),
            BalanceDelta::new(key(2), qty(1)),
        ]);
        assert_eq!(batch.keys(), vec![key(1), key(2), key(3)]);
    }

    #[test]
    fn between_covers_added_removed_and_changed_lines() {
        let old = [(key(1), q(10)), (key(2), q(4))];
        let new = [(key(1), q(15)), (key(3), q(7))];
        let batch = DeltaBatch::between(old, new);

        assert_eq!(batch.get(&key(1)), Some(qty(5)));
        assert_eq!(batch.get(&key(2)), Some(qty(-4)));
        assert_eq!(batch.get(&key(3)), Some(qty(7)));
    }

    #[test]
    fn between_identical_line_sets_is_empty() {
        let lines = [(key(1), q(10)), (key(2), q(4))];
        assert!(DeltaBatch::between(lines, lines).is_empty());
    }

    #[test]
    fn shortfall_reports_requested_and_available() {
        let snap = snapshot(&[(key(1), 50)]);
        let batch = DeltaBatch::from_deltas([BalanceDelta::new(key(1), qty(-100))]);
        assert_eq!(
            batch.first_shortfall(&snap),
            Some(Shortfall {
                key: key(1),
                requested: qty(100),
                available: qty(50),
            })
        );
    }

    #[test]
    fn missing_row_counts_as_zero_available() {
        let batch = DeltaBatch::from_deltas([BalanceDelta::new(key(9), qty(-1))]);
        let shortfall = batch.first_shortfall(&BTreeMap::new()).unwrap();
        assert_eq!(shortfall.available, Decimal::ZERO);
    }

    #[test]
    fn apply_to_creates_missing_rows_for_increases() {
        let batch = DeltaBatch::from_deltas([BalanceDelta::new(key(1), qty(7))]);
        let rows = batch.apply_to(&BTreeMap::new()).unwrap();
        assert_eq!(rows, vec![Balance::from_parts(key(1), qty(7)).unwrap()]);
    }

    #[test]
    fn decreases_keeps_only_negative_keys() {
        let batch = DeltaBatch::from_deltas([
            BalanceDelta::new(key(1), qty(7)),
            BalanceDelta::new(key(2), qty(-3)),
        ]);
        assert_eq!(batch.decreases().keys(), vec![key(2)]);
        assert!(!batch.is_increase_only());
        assert!(batch.negated().decreases().keys() == vec![key(1)]);
    }

    proptest! {
        #[test]
        fn planned_balances_are_never_negative(
            start in proptest::collection::vec(0i64..500, 4),
            deltas in proptest::collection::vec((0u128..4, -600i64..600), 0..12),
        ) {
            let snap = snapshot(
                &start.iter().enumerate().map(|(i, n)| (key(i as u128), *n)).collect::<Vec<_>>(),
            );
            let batch: DeltaBatch = deltas
                .iter()
                .map(|(k, n)| BalanceDelta::new(key(*k), qty(*n)))
                .collect();

            if batch.first_shortfall(&snap).is_none() {
                let rows = batch.apply_to(&snap).unwrap();
                prop_assert!(rows.iter().all(|b| b.quantity() >= Decimal::ZERO));
            } else {
                prop_assert!(batch.apply_to(&snap).is_err());
            }
        }

        #[test]
        fn a_failing_batch_reports_a_key_that_really_is_short(
            start in proptest::collection::vec(0i64..100, 3),
            deltas in proptest::collection::vec((0u128..3, -200i64..50), 1..8),
        ) {
            let snap = snapshot(
                &start.iter().enumerate().map(|(i, n)| (key(i as u128), *n)).collect::<Vec<_>>(),
            );
            let batch: DeltaBatch = deltas
                .iter()
                .map(|(k, n)| BalanceDelta::new(key(*k), qty(*n)))
                .collect();

            for s in batch.shortfalls(&snap) {
                let available = snap[&s.key].quantity();
                prop_assert_eq!(s.available, available);
                prop_assert!(available + batch.get(&s.key).unwrap() < Decimal::ZERO);
            }
        }

        #[test]
        fn netting_is_order_independent(
            deltas in proptest::collection::vec((0u128..5, -50i64..50), 0..16),
        ) {
            let forward: DeltaBatch = deltas
                .iter()
                .map(|(k, n)| BalanceDelta::new(key(*k), qty(*n)))
                .collect();
            let backward: DeltaBatch = deltas
                .iter()
                .rev()
                .map(|(k, n)| BalanceDelta::new(key(*k), qty(*n)))
                .collect();
            prop_assert_eq!(forward, backward);
        }
    }
}
