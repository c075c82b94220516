use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};

use async_trait::async_trait;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock as AsyncRwLock};

use stockroom_core::{ClientId, Entity, ReceiptId, ResourceId, ShipmentId, UnitId};
use stockroom_inventory::{Balance, BalanceKey, DocumentLine};
use stockroom_receipts::ReceiptDocument;
use stockroom_reference::{Client, ReferenceEntity, Resource, UnitOfMeasure};
use stockroom_shipments::ShipmentDocument;

use super::query::{BalanceFilter, DocumentFilter};
use super::r#trait::{
    BalanceRepository, ReceiptRepository, ReferenceRepository, ShipmentRepository, Store,
    StoreError, StoreTransaction,
};

/// Row locks, ordered so that documents sort before reference rows and
/// reference rows before balances.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum LockKey {
    Receipt(ReceiptId),
    Shipment(ShipmentId),
    Client(ClientId),
    Resource(ResourceId),
    Unit(UnitId),
    Balance(BalanceKey),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum LockMode {
    Shared,
    Exclusive,
}

/// A row lock held until the transaction ends.
// Guards are only kept for their drop.
#[allow(dead_code)]
enum HeldLock {
    Shared(OwnedRwLockReadGuard<()>),
    Exclusive(OwnedRwLockWriteGuard<()>),
}

#[derive(Debug, Default)]
struct State {
    balances: BTreeMap<BalanceKey, Balance>,
    receipts: BTreeMap<ReceiptId, ReceiptDocument>,
    shipments: BTreeMap<ShipmentId, ShipmentDocument>,
    resources: BTreeMap<ResourceId, Resource>,
    units: BTreeMap<UnitId, UnitOfMeasure>,
    clients: BTreeMap<ClientId, Client>,
}

/// Writes staged by one transaction. `None` marks a delete.
#[derive(Debug, Default)]
struct Pending {
    balances: BTreeMap<BalanceKey, Balance>,
    receipts: BTreeMap<ReceiptId, Option<ReceiptDocument>>,
    shipments: BTreeMap<ShipmentId, Option<ShipmentDocument>>,
    resources: BTreeMap<ResourceId, Option<Resource>>,
    units: BTreeMap<UnitId, Option<UnitOfMeasure>>,
    clients: BTreeMap<ClientId, Option<Client>>,
}

#[derive(Debug, Default)]
struct Shared {
    state: RwLock<State>,
    locks: Mutex<HashMap<LockKey, Arc<AsyncRwLock<()>>>>,
}

/// In-memory transactional store.
///
/// Intended for tests/dev. Mirrors the Postgres locking behaviour: a locked
/// read holds a per-row async lock (shared for `find_for_share`, exclusive
/// otherwise) until the transaction commits or rolls back, and writes stay
/// invisible to other transactions until commit.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(InMemoryTransaction {
            shared: Arc::clone(&self.shared),
            held: BTreeMap::new(),
            pending: Pending::default(),
        })
    }
}

/// Transaction over [`InMemoryStore`]. Dropping it releases its locks and
/// discards staged writes.
pub struct InMemoryTransaction {
    shared: Arc<Shared>,
    held: BTreeMap<LockKey, HeldLock>,
    pending: Pending,
}

impl InMemoryTransaction {
    /// Lock every key not already held, in `LockKey` order.
    ///
    /// A key already held in either mode is not locked again.
    async fn acquire(
        &mut self,
        keys: impl IntoIterator<Item = LockKey>,
        mode: LockMode,
    ) -> Result<(), StoreError> {
        let mut wanted: Vec<LockKey> = keys
            .into_iter()
            .filter(|k| !self.held.contains_key(k))
            .collect();
        wanted.sort();
        wanted.dedup();

        for key in wanted {
            let mutex = {
                let mut locks = self.shared.locks.lock().map_err(|_| StoreError::Poisoned)?;
                Arc::clone(locks.entry(key).or_default())
            };
            let held = match mode {
                LockMode::Shared => HeldLock::Shared(mutex.read_owned().await),
                LockMode::Exclusive => HeldLock::Exclusive(mutex.write_owned().await),
            };
            self.held.insert(key, held);
        }
        Ok(())
    }

    fn state(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.shared.state.read().map_err(|_| StoreError::Poisoned)
    }

    fn balances_view(&self, state: &State, keys: &[BalanceKey]) -> BTreeMap<BalanceKey, Balance> {
        keys.iter()
            .map(|key| {
                let balance = self
                    .pending
                    .balances
                    .get(key)
                    .or_else(|| state.balances.get(key))
                    .cloned()
                    .unwrap_or_else(|| Balance::zero(*key));
                (*key, balance)
            })
            .collect()
    }

    fn all_balances(&self, state: &State) -> Vec<Balance> {
        let mut merged = state.balances.clone();
        for (key, balance) in &self.pending.balances {
            merged.insert(*key, balance.clone());
        }
        merged.into_values().collect()
    }

    fn all_receipts(&self, state: &State) -> Vec<ReceiptDocument> {
        overlay_values(&self.pending.receipts, &state.receipts)
    }

    fn all_shipments(&self, state: &State) -> Vec<ShipmentDocument> {
        overlay_values(&self.pending.shipments, &state.shipments)
    }

    fn any_line(&self, state: &State, pred: impl Fn(&DocumentLine) -> bool) -> bool {
        self.all_receipts(state)
            .iter()
            .any(|r| r.lines().iter().any(&pred))
            || self
                .all_shipments(state)
                .iter()
                .any(|s| s.lines().iter().any(&pred))
    }
}

fn overlay_get<K: Ord, V: Clone>(
    staged: &BTreeMap<K, Option<V>>,
    committed: &BTreeMap<K, V>,
    key: &K,
) -> Option<V> {
    match staged.get(key) {
        Some(entry) => entry.clone(),
        None => committed.get(key).cloned(),
    }
}

fn overlay_values<K: Ord + Copy, V: Clone>(
    staged: &BTreeMap<K, Option<V>>,
    committed: &BTreeMap<K, V>,
) -> Vec<V> {
    let mut merged = committed.clone();
    for (key, entry) in staged {
        match entry {
            Some(value) => {
                merged.insert(*key, value.clone());
            }
            None => {
                merged.remove(key);
            }
        }
    }
    merged.into_values().collect()
}

fn publish<K: Ord, V>(staged: BTreeMap<K, Option<V>>, committed: &mut BTreeMap<K, V>) {
    for (key, entry) in staged {
        match entry {
            Some(value) => {
                committed.insert(key, value);
            }
            None => {
                committed.remove(&key);
            }
        }
    }
}

/// Reject staged rows whose unique field clashes with another live row.
fn ensure_unique<K: Ord, V>(
    staged: &BTreeMap<K, Option<V>>,
    committed: &BTreeMap<K, V>,
    field: impl Fn(&V) -> &str,
    constraint: &str,
) -> Result<(), StoreError> {
    for (id, value) in staged.iter().filter_map(|(k, v)| v.as_ref().map(|v| (k, v))) {
        let wanted = field(value);
        let clashes_committed = committed
            .iter()
            .filter(|(other, _)| *other != id && !staged.contains_key(*other))
            .any(|(_, other)| field(other) == wanted);
        let clashes_staged = staged
            .iter()
            .filter(|(other, _)| *other != id)
            .any(|(_, other)| other.as_ref().is_some_and(|o| field(o) == wanted));
        if clashes_committed || clashes_staged {
            return Err(StoreError::UniqueViolation {
                constraint: constraint.to_string(),
            });
        }
    }
    Ok(())
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn commit(mut self) -> Result<(), StoreError> {
        let pending = std::mem::take(&mut self.pending);
        {
            let mut state = self.shared.state.write().map_err(|_| StoreError::Poisoned)?;

            ensure_unique(
                &pending.receipts,
                &state.receipts,
                ReceiptDocument::number,
                "receipts_number_key",
            )?;
            ensure_unique(
                &pending.shipments,
                &state.shipments,
                ShipmentDocument::number,
                "shipments_number_key",
            )?;
            ensure_unique(&pending.resources, &state.resources, Resource::name, "resources_name_key")?;
            ensure_unique(&pending.units, &state.units, UnitOfMeasure::name, "units_name_key")?;
            ensure_unique(&pending.clients, &state.clients, Client::name, "clients_name_key")?;

            let state = &mut *state;
            state.balances.extend(pending.balances);
            publish(pending.receipts, &mut state.receipts);
            publish(pending.shipments, &mut state.shipments);
            publish(pending.resources, &mut state.resources);
            publish(pending.units, &mut state.units);
            publish(pending.clients, &mut state.clients);
        }
        // Locks are released only once the writes are visible.
        drop(self);
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        drop(self);
        Ok(())
    }
}

#[async_trait]
impl BalanceRepository for InMemoryTransaction {
    async fn locked_read(
        &mut self,
        keys: &[BalanceKey],
    ) -> Result<BTreeMap<BalanceKey, Balance>, StoreError> {
        self.acquire(keys.iter().copied().map(LockKey::Balance), LockMode::Exclusive)
            .await?;
        let state = self.state()?;
        Ok(self.balances_view(&state, keys))
    }

    async fn read_balances(
        &mut self,
        keys: &[BalanceKey],
    ) -> Result<BTreeMap<BalanceKey, Balance>, StoreError> {
        let state = self.state()?;
        Ok(self.balances_view(&state, keys))
    }

    async fn upsert_balances(&mut self, balances: &[Balance]) -> Result<(), StoreError> {
        for balance in balances {
            if !self.held.contains_key(&LockKey::Balance(balance.key())) {
                return Err(StoreError::Unavailable(format!(
                    "balance {} written without a locked read",
                    balance.key()
                )));
            }
            self.pending.balances.insert(balance.key(), balance.clone());
        }
        Ok(())
    }

    async fn list_balances(&mut self, filter: &BalanceFilter) -> Result<Vec<Balance>, StoreError> {
        let state = self.state()?;
        Ok(self
            .all_balances(&state)
            .into_iter()
            .filter(|b| filter.matches(b))
            .collect())
    }
}

#[async_trait]
impl ReceiptRepository for InMemoryTransaction {
    async fn receipt_number_exists(
        &mut self,
        number: &str,
        exclude: Option<ReceiptId>,
    ) -> Result<bool, StoreError> {
        let state = self.state()?;
        Ok(self
            .all_receipts(&state)
            .iter()
            .any(|r| r.number() == number && Some(r.id_typed()) != exclude))
    }

    async fn load_receipt_for_update(
        &mut self,
        id: ReceiptId,
    ) -> Result<Option<ReceiptDocument>, StoreError> {
        self.acquire([LockKey::Receipt(id)], LockMode::Exclusive).await?;
        self.get_receipt(id).await
    }

    async fn get_receipt(&mut self, id: ReceiptId) -> Result<Option<ReceiptDocument>, StoreError> {
        let state = self.state()?;
        Ok(overlay_get(&self.pending.receipts, &state.receipts, &id))
    }

    async fn insert_receipt(&mut self, receipt: &ReceiptDocument) -> Result<(), StoreError> {
        self.pending
            .receipts
            .insert(receipt.id_typed(), Some(receipt.clone()));
        Ok(())
    }

    async fn update_receipt(&mut self, receipt: &ReceiptDocument) -> Result<(), StoreError> {
        self.insert_receipt(receipt).await
    }

    async fn delete_receipt(&mut self, id: ReceiptId) -> Result<(), StoreError> {
        self.pending.receipts.insert(id, None);
        Ok(())
    }

    async fn list_receipts(
        &mut self,
        filter: &DocumentFilter,
    ) -> Result<Vec<ReceiptDocument>, StoreError> {
        let state = self.state()?;
        let mut receipts: Vec<_> = self
            .all_receipts(&state)
            .into_iter()
            .filter(|r| filter.matches_header(r.number(), r.date()) && filter.matches_lines(r.lines()))
            .collect();
        receipts.sort_by(|a, b| (a.date(), a.number()).cmp(&(b.date(), b.number())));
        Ok(receipts)
    }
}

#[async_trait]
impl ShipmentRepository for InMemoryTransaction {
    async fn shipment_number_exists(
        &mut self,
        number: &str,
        exclude: Option<ShipmentId>,
    ) -> Result<bool, StoreError> {
        let state = self.state()?;
        Ok(self
            .all_shipments(&state)
            .iter()
            .any(|s| s.number() == number && Some(s.id_typed()) != exclude))
    }

    async fn load_shipment_for_update(
        &mut self,
        id: ShipmentId,
    ) -> Result<Option<ShipmentDocument>, StoreError> {
        self.acquire([LockKey::Shipment(id)], LockMode::Exclusive).await?;
        self.get_shipment(id).await
    }

    async fn get_shipment(
        &mut self,
        id: ShipmentId,
    ) -> Result<Option<ShipmentDocument>, StoreError> {
        let state = self.state()?;
        Ok(overlay_get(&self.pending.shipments, &state.shipments, &id))
    }

    async fn insert_shipment(&mut self, shipment: &ShipmentDocument) -> Result<(), StoreError> {
        self.pending
            .shipments
            .insert(shipment.id_typed(), Some(shipment.clone()));
        Ok(())
    }

    async fn update_shipment(&mut self, shipment: &ShipmentDocument) -> Result<(), StoreError> {
        self.insert_shipment(shipment).await
    }

    async fn delete_shipment(&mut self, id: ShipmentId) -> Result<(), StoreError> {
        self.pending.shipments.insert(id, None);
        Ok(())
    }

    async fn list_shipments(
        &mut self,
        filter: &DocumentFilter,
    ) -> Result<Vec<ShipmentDocument>, StoreError> {
        let state = self.state()?;
        let mut shipments: Vec<_> = self
            .all_shipments(&state)
            .into_iter()
            .filter(|s| {
                filter.matches_header(s.number(), s.date())
                    && filter.matches_client(&s.client_id())
                    && filter.matches_lines(s.lines())
            })
            .collect();
        shipments.sort_by(|a, b| (a.date(), a.number()).cmp(&(b.date(), b.number())));
        Ok(shipments)
    }
}

/// Where each reference entity lives in the state and what may point at it.
trait ReferenceTable: ReferenceEntity {
    fn lock_key(id: Self::Id) -> LockKey;

    fn committed(state: &State) -> &BTreeMap<Self::Id, Self>;

    fn staged(pending: &Pending) -> &BTreeMap<Self::Id, Option<Self>>;

    fn staged_mut(pending: &mut Pending) -> &mut BTreeMap<Self::Id, Option<Self>>;

    fn is_used(tx: &InMemoryTransaction, state: &State, id: Self::Id) -> bool;
}

impl ReferenceTable for Resource {
    fn lock_key(id: ResourceId) -> LockKey {
        LockKey::Resource(id)
    }

    fn committed(state: &State) -> &BTreeMap<ResourceId, Self> {
        &state.resources
    }

    fn staged(pending: &Pending) -> &BTreeMap<ResourceId, Option<Self>> {
        &pending.resources
    }

    fn staged_mut(pending: &mut Pending) -> &mut BTreeMap<ResourceId, Option<Self>> {
        &mut pending.resources
    }

    fn is_used(tx: &InMemoryTransaction, state: &State, id: ResourceId) -> bool {
        tx.all_balances(state).iter().any(|b| b.key().resource_id == id)
            || tx.any_line(state, |l| l.resource_id == id)
    }
}

impl ReferenceTable for UnitOfMeasure {
    fn lock_key(id: UnitId) -> LockKey {
        LockKey::Unit(id)
    }

    fn committed(state: &State) -> &BTreeMap<UnitId, Self> {
        &state.units
    }

    fn staged(pending: &Pending) -> &BTreeMap<UnitId, Option<Self>> {
        &pending.units
    }

    fn staged_mut(pending: &mut Pending) -> &mut BTreeMap<UnitId, Option<Self>> {
        &mut pending.units
    }

    fn is_used(tx: &InMemoryTransaction, state: &State, id: UnitId) -> bool {
        tx.all_balances(state).iter().any(|b| b.key().unit_id == id)
            || tx.any_line(state, |l| l.unit_id == id)
    }
}

impl ReferenceTable for Client {
    fn lock_key(id: ClientId) -> LockKey {
        LockKey::Client(id)
    }

    fn committed(state: &State) -> &BTreeMap<ClientId, Self> {
        &state.clients
    }

    fn staged(pending: &Pending) -> &BTreeMap<ClientId, Option<Self>> {
        &pending.clients
    }

    fn staged_mut(pending: &mut Pending) -> &mut BTreeMap<ClientId, Option<Self>> {
        &mut pending.clients
    }

    fn is_used(tx: &InMemoryTransaction, state: &State, id: ClientId) -> bool {
        tx.all_shipments(state).iter().any(|s| s.client_id() == id)
    }
}

fn find_reference<E: ReferenceTable>(
    tx: &InMemoryTransaction,
    id: E::Id,
) -> Result<Option<E>, StoreError> {
    let state = tx.state()?;
    Ok(overlay_get(E::staged(&tx.pending), E::committed(&state), &id))
}

fn all_references<E: ReferenceTable>(tx: &InMemoryTransaction) -> Result<Vec<E>, StoreError> {
    let state = tx.state()?;
    Ok(overlay_values(E::staged(&tx.pending), E::committed(&state)))
}

fn reference_in_use<E: ReferenceTable>(
    tx: &InMemoryTransaction,
    id: E::Id,
) -> Result<bool, StoreError> {
    let state = tx.state()?;
    Ok(E::is_used(tx, &state, id))
}

macro_rules! impl_reference_repository {
    ($entity:ty, $id:ty) => {
        #[async_trait]
        impl ReferenceRepository<$entity> for InMemoryTransaction {
            async fn find(
                &mut self,
                id: $id,
            ) -> Result<Option<$entity>, StoreError> {
                find_reference::<$entity>(self, id)
            }

            async fn find_for_share(
                &mut self,
                id: $id,
            ) -> Result<Option<$entity>, StoreError> {
                self.acquire([<$entity as ReferenceTable>::lock_key(id)], LockMode::Shared)
                    .await?;
                find_reference::<$entity>(self, id)
            }

            async fn find_for_update(
                &mut self,
                id: $id,
            ) -> Result<Option<$entity>, StoreError> {
                self.acquire([<$entity as ReferenceTable>::lock_key(id)], LockMode::Exclusive)
                    .await?;
                find_reference::<$entity>(self, id)
            }

            async fn find_by_name(&mut self, name: &str) -> Result<Option<$entity>, StoreError> {
                Ok(all_references::<$entity>(self)?
                    .into_iter()
                    .find(|e| e.name() == name))
            }

            async fn insert(&mut self, entity: &$entity) -> Result<(), StoreError> {
                <$entity as ReferenceTable>::staged_mut(&mut self.pending)
                    .insert(*Entity::id(entity), Some(entity.clone()));
                Ok(())
            }

            async fn update(&mut self, entity: &$entity) -> Result<(), StoreError> {
                ReferenceRepository::<$entity>::insert(self, entity).await
            }

            async fn delete(
                &mut self,
                id: $id,
            ) -> Result<(), StoreError> {
                <$entity as ReferenceTable>::staged_mut(&mut self.pending).insert(id, None);
                Ok(())
            }

            async fn list(&mut self, include_archived: bool) -> Result<Vec<$entity>, StoreError> {
                let mut entities: Vec<$entity> = all_references::<$entity>(self)?
                    .into_iter()
                    .filter(|e| include_archived || e.is_active())
                    .collect();
                entities.sort_by(|a, b| a.name().cmp(b.name()));
                Ok(entities)
            }

            async fn is_referenced(
                &mut self,
                id: $id,
            ) -> Result<bool, StoreError> {
                reference_in_use::<$entity>(self, id)
            }
        }
    };
}

impl_reference_repository!(Resource, ResourceId);
impl_reference_repository!(UnitOfMeasure, UnitId);
impl_reference_repository!(Client, ClientId);
