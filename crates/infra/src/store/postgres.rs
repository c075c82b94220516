//! Postgres-backed store implementation (sqlx).
//!
//! ## Locking
//!
//! `locked_read` is one `INSERT ... ON CONFLICT DO UPDATE ... RETURNING`
//! statement over the sorted key set. The no-op update takes a row lock on
//! every existing key, the insert creates (and locks) missing keys, and rows
//! are visited in key order, so overlapping batches cannot deadlock on each
//! other. Documents are locked with `SELECT ... FOR UPDATE` before any balance.
//! Reference rows a document uses are read `FOR SHARE`; deleting or editing a
//! reference reads it `FOR UPDATE` first, so the two serialize.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `UniqueViolation { constraint }` |
//! | Database (foreign key violation) | `23503` | `ForeignKeyViolation` |
//! | Database (check constraint violation) | `23514` | `Corrupt` |
//! | Database (other) | Any other | `Unavailable` |
//! | ColumnDecode / Decode / ColumnNotFound | N/A | `Corrupt` |
//! | PoolClosed / PoolTimedOut / Io / other | N/A | `Unavailable` |

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use stockroom_core::{
    AggregateRoot, ClientId, LineId, Quantity, ReceiptId, ResourceId, ShipmentId, UnitId,
};
use stockroom_inventory::{Balance, BalanceKey, DocumentLine};
use stockroom_receipts::ReceiptDocument;
use stockroom_reference::{Client, ReferenceEntity, ReferenceStatus, Resource, UnitOfMeasure};
use stockroom_shipments::ShipmentDocument;

use super::query::{BalanceFilter, DocumentFilter};
use super::r#trait::{
    BalanceRepository, ReceiptRepository, ReferenceRepository, ShipmentRepository, Store,
    StoreError, StoreTransaction,
};

const SCHEMA: &str = include_str!("../../migrations/0001_warehouse.sql");

/// Postgres-backed transactional store.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the warehouse tables if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn apply_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("apply_schema", e))?;
        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    type Tx = PostgresTransaction;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;
        Ok(PostgresTransaction { tx })
    }
}

/// One database transaction. Dropping it without commit rolls back.
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PostgresTransaction {
    fn conn(&mut self) -> &mut PgConnection {
        &mut self.tx
    }
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

fn key_columns(keys: &[BalanceKey]) -> (Vec<Uuid>, Vec<Uuid>) {
    keys.iter()
        .map(|k| (*k.resource_id.as_uuid(), *k.unit_id.as_uuid()))
        .unzip()
}

fn decode_balance(row: &PgRow) -> Result<Balance, StoreError> {
    let key = BalanceKey::new(
        ResourceId::from_uuid(get(row, "resource_id")?),
        UnitId::from_uuid(get(row, "unit_id")?),
    );
    Balance::from_parts(key, get(row, "quantity")?).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn balances_for(
    keys: &[BalanceKey],
    rows: Vec<PgRow>,
) -> Result<BTreeMap<BalanceKey, Balance>, StoreError> {
    let mut snapshot: BTreeMap<BalanceKey, Balance> =
        keys.iter().map(|k| (*k, Balance::zero(*k))).collect();
    for row in &rows {
        let balance = decode_balance(row)?;
        snapshot.insert(balance.key(), balance);
    }
    Ok(snapshot)
}

#[async_trait]
impl BalanceRepository for PostgresTransaction {
    #[instrument(skip(self, keys), fields(key_count = keys.len()), err)]
    async fn locked_read(
        &mut self,
        keys: &[BalanceKey],
    ) -> Result<BTreeMap<BalanceKey, Balance>, StoreError> {
        if keys.is_empty() {
            return Ok(BTreeMap::new());
        }
        let (resource_ids, unit_ids) = key_columns(keys);

        let rows = sqlx::query(
            r#"
            INSERT INTO balances (resource_id, unit_id, quantity)
            SELECT k.resource_id, k.unit_id, 0
            FROM UNNEST($1::uuid[], $2::uuid[]) AS k(resource_id, unit_id)
            ORDER BY k.resource_id, k.unit_id
            ON CONFLICT (resource_id, unit_id) DO UPDATE SET quantity = balances.quantity
            RETURNING resource_id, unit_id, quantity
            "#,
        )
        .bind(&resource_ids)
        .bind(&unit_ids)
        .fetch_all(self.conn())
        .await
        .map_err(|e| map_sqlx_error("locked_read", e))?;

        balances_for(keys, rows)
    }

    async fn read_balances(
        &mut self,
        keys: &[BalanceKey],
    ) -> Result<BTreeMap<BalanceKey, Balance>, StoreError> {
        if keys.is_empty() {
            return Ok(BTreeMap::new());
        }
        let (resource_ids, unit_ids) = key_columns(keys);

        let rows = sqlx::query(
            r#"
            SELECT b.resource_id, b.unit_id, b.quantity
            FROM balances b
            JOIN UNNEST($1::uuid[], $2::uuid[]) AS k(resource_id, unit_id)
              ON b.resource_id = k.resource_id AND b.unit_id = k.unit_id
            "#,
        )
        .bind(&resource_ids)
        .bind(&unit_ids)
        .fetch_all(self.conn())
        .await
        .map_err(|e| map_sqlx_error("read_balances", e))?;

        balances_for(keys, rows)
    }

    async fn upsert_balances(&mut self, balances: &[Balance]) -> Result<(), StoreError> {
        if balances.is_empty() {
            return Ok(());
        }
        let keys: Vec<BalanceKey> = balances.iter().map(Balance::key).collect();
        let (resource_ids, unit_ids) = key_columns(&keys);
        let quantities: Vec<Decimal> = balances.iter().map(Balance::quantity).collect();

        sqlx::query(
            r#"
            INSERT INTO balances (resource_id, unit_id, quantity)
            SELECT * FROM UNNEST($1::uuid[], $2::uuid[], $3::numeric[])
            ON CONFLICT (resource_id, unit_id) DO UPDATE SET quantity = EXCLUDED.quantity
            "#,
        )
        .bind(&resource_ids)
        .bind(&unit_ids)
        .bind(&quantities)
        .execute(self.conn())
        .await
        .map_err(|e| map_sqlx_error("upsert_balances", e))?;
        Ok(())
    }

    async fn list_balances(&mut self, filter: &BalanceFilter) -> Result<Vec<Balance>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT resource_id, unit_id, quantity
            FROM balances
            WHERE ($1::uuid[] IS NULL OR resource_id = ANY($1))
              AND ($2::uuid[] IS NULL OR unit_id = ANY($2))
            ORDER BY resource_id, unit_id
            "#,
        )
        .bind(uuids(&filter.resource_ids, |id| *id.as_uuid()))
        .bind(uuids(&filter.unit_ids, |id| *id.as_uuid()))
        .fetch_all(self.conn())
        .await
        .map_err(|e| map_sqlx_error("list_balances", e))?;

        rows.iter().map(decode_balance).collect()
    }
}

fn uuids<T>(ids: &Option<Vec<T>>, f: impl Fn(&T) -> Uuid) -> Option<Vec<Uuid>> {
    ids.as_ref().map(|ids| ids.iter().map(f).collect())
}

/// Table names for one document kind.
struct DocumentTables {
    header: &'static str,
    lines: &'static str,
    parent: &'static str,
}

const RECEIPTS: DocumentTables = DocumentTables {
    header: "receipts",
    lines: "receipt_lines",
    parent: "receipt_id",
};

const SHIPMENTS: DocumentTables = DocumentTables {
    header: "shipments",
    lines: "shipment_lines",
    parent: "shipment_id",
};

async fn number_exists(
    conn: &mut PgConnection,
    tables: &DocumentTables,
    number: &str,
    exclude: Option<Uuid>,
) -> Result<bool, StoreError> {
    let sql = format!(
        "SELECT EXISTS (SELECT 1 FROM {} WHERE number = $1 AND ($2::uuid IS NULL OR id <> $2))",
        tables.header
    );
    sqlx::query_scalar::<_, bool>(&sql)
        .bind(number)
        .bind(exclude)
        .fetch_one(conn)
        .await
        .map_err(|e| map_sqlx_error("number_exists", e))
}

async fn insert_lines(
    conn: &mut PgConnection,
    tables: &DocumentTables,
    parent_id: Uuid,
    lines: &[DocumentLine],
) -> Result<(), StoreError> {
    if lines.is_empty() {
        return Ok(());
    }
    let positions = (0..lines.len())
        .map(i32::try_from)
        .collect::<Result<Vec<i32>, _>>()
        .map_err(|_| StoreError::Corrupt("too many document lines".to_string()))?;
    let ids: Vec<Uuid> = lines.iter().map(|l| *l.line_id.as_uuid()).collect();
    let resource_ids: Vec<Uuid> = lines.iter().map(|l| *l.resource_id.as_uuid()).collect();
    let unit_ids: Vec<Uuid> = lines.iter().map(|l| *l.unit_id.as_uuid()).collect();
    let quantities: Vec<Decimal> = lines.iter().map(|l| l.quantity.value()).collect();

    let sql = format!(
        "INSERT INTO {lines} (id, {parent}, position, resource_id, unit_id, quantity) \
         SELECT l.id, $1, l.position, l.resource_id, l.unit_id, l.quantity \
         FROM UNNEST($2::uuid[], $3::int4[], $4::uuid[], $5::uuid[], $6::numeric[]) \
           AS l(id, position, resource_id, unit_id, quantity)",
        lines = tables.lines,
        parent = tables.parent,
    );
    sqlx::query(&sql)
        .bind(parent_id)
        .bind(&ids)
        .bind(&positions)
        .bind(&resource_ids)
        .bind(&unit_ids)
        .bind(&quantities)
        .execute(conn)
        .await
        .map_err(|e| map_sqlx_error("insert_lines", e))?;
    Ok(())
}

async fn delete_lines(
    conn: &mut PgConnection,
    tables: &DocumentTables,
    parent_id: Uuid,
) -> Result<(), StoreError> {
    let sql = format!("DELETE FROM {} WHERE {} = $1", tables.lines, tables.parent);
    sqlx::query(&sql)
        .bind(parent_id)
        .execute(conn)
        .await
        .map_err(|e| map_sqlx_error("delete_lines", e))?;
    Ok(())
}

/// Lines of every listed parent, in position order.
async fn load_lines(
    conn: &mut PgConnection,
    tables: &DocumentTables,
    parent_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<DocumentLine>>, StoreError> {
    let sql = format!(
        "SELECT {parent} AS parent_id, id, resource_id, unit_id, quantity FROM {lines} \
         WHERE {parent} = ANY($1) ORDER BY {parent}, position",
        lines = tables.lines,
        parent = tables.parent,
    );
    let rows = sqlx::query(&sql)
        .bind(parent_ids)
        .fetch_all(conn)
        .await
        .map_err(|e| map_sqlx_error("load_lines", e))?;

    let mut grouped: HashMap<Uuid, Vec<DocumentLine>> = HashMap::new();
    for row in &rows {
        let quantity = Quantity::new(get(row, "quantity")?)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        grouped
            .entry(get(row, "parent_id")?)
            .or_default()
            .push(DocumentLine {
                line_id: LineId::from_uuid(get(row, "id")?),
                resource_id: ResourceId::from_uuid(get(row, "resource_id")?),
                unit_id: UnitId::from_uuid(get(row, "unit_id")?),
                quantity,
            });
    }
    Ok(grouped)
}

fn to_db_version(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version).map_err(|_| StoreError::Corrupt(format!("version {version} out of range")))
}

fn from_db_version(version: i64) -> Result<u64, StoreError> {
    u64::try_from(version).map_err(|_| StoreError::Corrupt(format!("negative version {version}")))
}

fn decode_receipt(row: &PgRow, lines: Vec<DocumentLine>) -> Result<ReceiptDocument, StoreError> {
    Ok(ReceiptDocument::restore(
        ReceiptId::from_uuid(get(row, "id")?),
        get(row, "number")?,
        get(row, "date")?,
        lines,
        from_db_version(get(row, "version")?)?,
    ))
}

fn decode_shipment(row: &PgRow, lines: Vec<DocumentLine>) -> Result<ShipmentDocument, StoreError> {
    Ok(ShipmentDocument::restore(
        ShipmentId::from_uuid(get(row, "id")?),
        get(row, "number")?,
        ClientId::from_uuid(get(row, "client_id")?),
        get(row, "date")?,
        get(row, "is_signed")?,
        lines,
        from_db_version(get(row, "version")?)?,
    ))
}

impl PostgresTransaction {
    async fn fetch_receipt(
        &mut self,
        id: ReceiptId,
        for_update: bool,
    ) -> Result<Option<ReceiptDocument>, StoreError> {
        let sql = format!(
            "SELECT id, number, date, version FROM receipts WHERE id = $1{}",
            if for_update { " FOR UPDATE" } else { "" }
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(self.conn())
            .await
            .map_err(|e| map_sqlx_error("fetch_receipt", e))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut lines = load_lines(self.conn(), &RECEIPTS, &[*id.as_uuid()]).await?;
        decode_receipt(&row, lines.remove(id.as_uuid()).unwrap_or_default()).map(Some)
    }

    async fn fetch_shipment(
        &mut self,
        id: ShipmentId,
        for_update: bool,
    ) -> Result<Option<ShipmentDocument>, StoreError> {
        let sql = format!(
            "SELECT id, number, client_id, date, is_signed, version FROM shipments WHERE id = $1{}",
            if for_update { " FOR UPDATE" } else { "" }
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(self.conn())
            .await
            .map_err(|e| map_sqlx_error("fetch_shipment", e))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut lines = load_lines(self.conn(), &SHIPMENTS, &[*id.as_uuid()]).await?;
        decode_shipment(&row, lines.remove(id.as_uuid()).unwrap_or_default()).map(Some)
    }
}

#[async_trait]
impl ReceiptRepository for PostgresTransaction {
    async fn receipt_number_exists(
        &mut self,
        number: &str,
        exclude: Option<ReceiptId>,
    ) -> Result<bool, StoreError> {
        number_exists(self.conn(), &RECEIPTS, number, exclude.map(|id| *id.as_uuid())).await
    }

    #[instrument(skip(self), err)]
    async fn load_receipt_for_update(
        &mut self,
        id: ReceiptId,
    ) -> Result<Option<ReceiptDocument>, StoreError> {
        self.fetch_receipt(id, true).await
    }

    async fn get_receipt(&mut self, id: ReceiptId) -> Result<Option<ReceiptDocument>, StoreError> {
        self.fetch_receipt(id, false).await
    }

    async fn insert_receipt(&mut self, receipt: &ReceiptDocument) -> Result<(), StoreError> {
        let id = *receipt.id_typed().as_uuid();
        sqlx::query("INSERT INTO receipts (id, number, date, version) VALUES ($1, $2, $3, $4)")
            .bind(id)
            .bind(receipt.number())
            .bind(receipt.date())
            .bind(to_db_version(receipt.version())?)
            .execute(self.conn())
            .await
            .map_err(|e| map_sqlx_error("insert_receipt", e))?;
        insert_lines(self.conn(), &RECEIPTS, id, receipt.lines()).await
    }

    async fn update_receipt(&mut self, receipt: &ReceiptDocument) -> Result<(), StoreError> {
        let id = *receipt.id_typed().as_uuid();
        sqlx::query("UPDATE receipts SET number = $2, date = $3, version = $4 WHERE id = $1")
            .bind(id)
            .bind(receipt.number())
            .bind(receipt.date())
            .bind(to_db_version(receipt.version())?)
            .execute(self.conn())
            .await
            .map_err(|e| map_sqlx_error("update_receipt", e))?;
        delete_lines(self.conn(), &RECEIPTS, id).await?;
        insert_lines(self.conn(), &RECEIPTS, id, receipt.lines()).await
    }

    async fn delete_receipt(&mut self, id: ReceiptId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM receipts WHERE id = $1")
            .bind(id.as_uuid())
            .execute(self.conn())
            .await
            .map_err(|e| map_sqlx_error("delete_receipt", e))?;
        Ok(())
    }

    async fn list_receipts(
        &mut self,
        filter: &DocumentFilter,
    ) -> Result<Vec<ReceiptDocument>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT r.id, r.number, r.date, r.version
            FROM receipts r
            WHERE ($1::date IS NULL OR r.date >= $1)
              AND ($2::date IS NULL OR r.date <= $2)
              AND ($3::text[] IS NULL OR r.number = ANY($3))
              AND (($4::uuid[] IS NULL AND $5::uuid[] IS NULL) OR EXISTS (
                    SELECT 1 FROM receipt_lines l
                    WHERE l.receipt_id = r.id
                      AND ($4::uuid[] IS NULL OR l.resource_id = ANY($4))
                      AND ($5::uuid[] IS NULL OR l.unit_id = ANY($5))))
            ORDER BY r.date, r.number
            "#,
        )
        .bind(filter.date_from)
        .bind(filter.date_to)
        .bind(&filter.numbers)
        .bind(uuids(&filter.resource_ids, |id| *id.as_uuid()))
        .bind(uuids(&filter.unit_ids, |id| *id.as_uuid()))
        .fetch_all(self.conn())
        .await
        .map_err(|e| map_sqlx_error("list_receipts", e))?;

        let ids = rows
            .iter()
            .map(|row| get::<Uuid>(row, "id"))
            .collect::<Result<Vec<_>, _>>()?;
        let mut lines = load_lines(self.conn(), &RECEIPTS, &ids).await?;

        rows.iter()
            .zip(&ids)
            .map(|(row, id)| decode_receipt(row, lines.remove(id).unwrap_or_default()))
            .collect()
    }
}

#[async_trait]
impl ShipmentRepository for PostgresTransaction {
    async fn shipment_number_exists(
        &mut self,
        number: &str,
        exclude: Option<ShipmentId>,
    ) -> Result<bool, StoreError> {
        number_exists(self.conn(), &SHIPMENTS, number, exclude.map(|id| *id.as_uuid())).await
    }

    #[instrument(skip(self), err)]
    async fn load_shipment_for_update(
        &mut self,
        id: ShipmentId,
    ) -> Result<Option<ShipmentDocument>, StoreError> {
        self.fetch_shipment(id, true).await
    }

    async fn get_shipment(
        &mut self,
        id: ShipmentId,
    ) -> Result<Option<ShipmentDocument>, StoreError> {
        self.fetch_shipment(id, false).await
    }

    async fn insert_shipment(&mut self, shipment: &ShipmentDocument) -> Result<(), StoreError> {
        let id = *shipment.id_typed().as_uuid();
        sqlx::query(
            "INSERT INTO shipments (id, number, client_id, date, is_signed, version) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(id)
        .bind(shipment.number())
        .bind(*shipment.client_id().as_uuid())
        .bind(shipment.date())
        .bind(shipment.is_signed())
        .bind(to_db_version(shipment.version())?)
        .execute(self.conn())
        .await
        .map_err(|e| map_sqlx_error("insert_shipment", e))?;
        insert_lines(self.conn(), &SHIPMENTS, id, shipment.lines()).await
    }

    async fn update_shipment(&mut self, shipment: &ShipmentDocument) -> Result<(), StoreError> {
        let id = *shipment.id_typed().as_uuid();
        sqlx::query(
            "UPDATE shipments SET number = $2, client_id = $3, date = $4, is_signed = $5, \
             version = $6 WHERE id = $1",
        )
        .bind(id)
        .bind(shipment.number())
        .bind(*shipment.client_id().as_uuid())
        .bind(shipment.date())
        .bind(shipment.is_signed())
        .bind(to_db_version(shipment.version())?)
        .execute(self.conn())
        .await
        .map_err(|e| map_sqlx_error("update_shipment", e))?;
        delete_lines(self.conn(), &SHIPMENTS, id).await?;
        insert_lines(self.conn(), &SHIPMENTS, id, shipment.lines()).await
    }

    async fn delete_shipment(&mut self, id: ShipmentId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM shipments WHERE id = $1")
            .bind(id.as_uuid())
            .execute(self.conn())
            .await
            .map_err(|e| map_sqlx_error("delete_shipment", e))?;
        Ok(())
    }

    async fn list_shipments(
        &mut self,
        filter: &DocumentFilter,
    ) -> Result<Vec<ShipmentDocument>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.number, s.client_id, s.date, s.is_signed, s.version
            FROM shipments s
            WHERE ($1::date IS NULL OR s.date >= $1)
              AND ($2::date IS NULL OR s.date <= $2)
              AND ($3::text[] IS NULL OR s.number = ANY($3))
              AND ($4::uuid[] IS NULL OR s.client_id = ANY($4))
              AND (($5::uuid[] IS NULL AND $6::uuid[] IS NULL) OR EXISTS (
                    SELECT 1 FROM shipment_lines l
                    WHERE l.shipment_id = s.id
                      AND ($5::uuid[] IS NULL OR l.resource_id = ANY($5))
                      AND ($6::uuid[] IS NULL OR l.unit_id = ANY($6))))
            ORDER BY s.date, s.number
            "#,
        )
        .bind(filter.date_from)
        .bind(filter.date_to)
        .bind(&filter.numbers)
        .bind(uuids(&filter.client_ids, |id| *id.as_uuid()))
        .bind(uuids(&filter.resource_ids, |id| *id.as_uuid()))
        .bind(uuids(&filter.unit_ids, |id| *id.as_uuid()))
        .fetch_all(self.conn())
        .await
        .map_err(|e| map_sqlx_error("list_shipments", e))?;

        let ids = rows
            .iter()
            .map(|row| get::<Uuid>(row, "id"))
            .collect::<Result<Vec<_>, _>>()?;
        let mut lines = load_lines(self.conn(), &SHIPMENTS, &ids).await?;

        rows.iter()
            .zip(&ids)
            .map(|(row, id)| decode_shipment(row, lines.remove(id).unwrap_or_default()))
            .collect()
    }
}

/// Table layout of one reference entity.
trait PgReference: ReferenceEntity {
    const TABLE: &'static str;
    /// Column list, `archived` last.
    const COLUMNS: &'static str;
    /// `SELECT EXISTS (...)` over `$1`.
    const USAGE_SQL: &'static str;

    fn uuid_of(id: Self::Id) -> Uuid;

    fn decode(row: &PgRow) -> Result<Self, StoreError>;

    /// Values of the columns between `name` and `archived`.
    fn extra_values(&self) -> Vec<String> {
        Vec::new()
    }
}

fn status_of(row: &PgRow) -> Result<ReferenceStatus, StoreError> {
    Ok(if get::<bool>(row, "archived")? {
        ReferenceStatus::Archived
    } else {
        ReferenceStatus::Active
    })
}

impl PgReference for Resource {
    const TABLE: &'static str = "resources";
    const COLUMNS: &'static str = "id, name, archived";
    const USAGE_SQL: &'static str = "SELECT EXISTS (SELECT 1 FROM balances WHERE resource_id = $1) \
         OR EXISTS (SELECT 1 FROM receipt_lines WHERE resource_id = $1) \
         OR EXISTS (SELECT 1 FROM shipment_lines WHERE resource_id = $1)";

    fn uuid_of(id: ResourceId) -> Uuid {
        *id.as_uuid()
    }

    fn decode(row: &PgRow) -> Result<Self, StoreError> {
        Ok(Resource::from_parts(
            ResourceId::from_uuid(get(row, "id")?),
            get(row, "name")?,
            status_of(row)?,
        ))
    }
}

impl PgReference for UnitOfMeasure {
    const TABLE: &'static str = "units";
    const COLUMNS: &'static str = "id, name, archived";
    const USAGE_SQL: &'static str = "SELECT EXISTS (SELECT 1 FROM balances WHERE unit_id = $1) \
         OR EXISTS (SELECT 1 FROM receipt_lines WHERE unit_id = $1) \
         OR EXISTS (SELECT 1 FROM shipment_lines WHERE unit_id = $1)";

    fn uuid_of(id: UnitId) -> Uuid {
        *id.as_uuid()
    }

    fn decode(row: &PgRow) -> Result<Self, StoreError> {
        Ok(UnitOfMeasure::from_parts(
            UnitId::from_uuid(get(row, "id")?),
            get(row, "name")?,
            status_of(row)?,
        ))
    }
}

impl PgReference for Client {
    const TABLE: &'static str = "clients";
    const COLUMNS: &'static str = "id, name, address, archived";
    const USAGE_SQL: &'static str = "SELECT EXISTS (SELECT 1 FROM shipments WHERE client_id = $1)";

    fn uuid_of(id: ClientId) -> Uuid {
        *id.as_uuid()
    }

    fn decode(row: &PgRow) -> Result<Self, StoreError> {
        Ok(Client::from_parts(
            ClientId::from_uuid(get(row, "id")?),
            get(row, "name")?,
            get(row, "address")?,
            status_of(row)?,
        ))
    }

    fn extra_values(&self) -> Vec<String> {
        vec![self.address().to_string()]
    }
}

/// Row lock clause appended to a reference lookup.
#[derive(Debug, Copy, Clone)]
enum RowLock {
    None,
    Share,
    Update,
}

impl RowLock {
    fn clause(self) -> &'static str {
        match self {
            RowLock::None => "",
            RowLock::Share => " FOR SHARE",
            RowLock::Update => " FOR UPDATE",
        }
    }
}

async fn fetch_reference<E: PgReference>(
    conn: &mut PgConnection,
    column: &str,
    value: impl for<'q> sqlx::Encode<'q, Postgres> + sqlx::Type<Postgres> + Send + 'static,
    lock: RowLock,
) -> Result<Option<E>, StoreError> {
    let sql = format!(
        "SELECT {} FROM {} WHERE {column} = $1{}",
        E::COLUMNS,
        E::TABLE,
        lock.clause()
    );
    let row = sqlx::query(&sql)
        .bind(value)
        .fetch_optional(conn)
        .await
        .map_err(|e| map_sqlx_error("fetch_reference", e))?;
    row.as_ref().map(E::decode).transpose()
}

/// Insert or overwrite every column of the entity.
async fn write_reference<E: PgReference>(conn: &mut PgConnection, entity: &E) -> Result<(), StoreError> {
    let extra = entity.extra_values();
    let placeholders = (1..=extra.len() + 3)
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let updates = E::COLUMNS
        .split(", ")
        .skip(1)
        .map(|c| format!("{c} = EXCLUDED.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO {table} ({columns}) VALUES ({placeholders}) \
         ON CONFLICT (id) DO UPDATE SET {updates}",
        table = E::TABLE,
        columns = E::COLUMNS,
    );

    let mut query = sqlx::query(&sql)
        .bind(E::uuid_of(*entity.id()))
        .bind(entity.name());
    for value in extra {
        query = query.bind(value);
    }
    query
        .bind(!entity.is_active())
        .execute(conn)
        .await
        .map_err(|e| map_sqlx_error("write_reference", e))?;
    Ok(())
}

macro_rules! impl_pg_reference_repository {
    ($entity:ty, $id:ty) => {
        #[async_trait]
        impl ReferenceRepository<$entity> for PostgresTransaction {
            async fn find(&mut self, id: $id) -> Result<Option<$entity>, StoreError> {
                fetch_reference::<$entity>(self.conn(), "id", *id.as_uuid(), RowLock::None).await
            }

            async fn find_for_share(&mut self, id: $id) -> Result<Option<$entity>, StoreError> {
                fetch_reference::<$entity>(self.conn(), "id", *id.as_uuid(), RowLock::Share).await
            }

            async fn find_for_update(&mut self, id: $id) -> Result<Option<$entity>, StoreError> {
                fetch_reference::<$entity>(self.conn(), "id", *id.as_uuid(), RowLock::Update).await
            }

            async fn find_by_name(&mut self, name: &str) -> Result<Option<$entity>, StoreError> {
                fetch_reference::<$entity>(self.conn(), "name", name.to_string(), RowLock::None).await
            }

            async fn insert(&mut self, entity: &$entity) -> Result<(), StoreError> {
                write_reference(self.conn(), entity).await
            }

            async fn update(&mut self, entity: &$entity) -> Result<(), StoreError> {
                write_reference(self.conn(), entity).await
            }

            async fn delete(&mut self, id: $id) -> Result<(), StoreError> {
                let sql = format!("DELETE FROM {} WHERE id = $1", <$entity as PgReference>::TABLE);
                sqlx::query(&sql)
                    .bind(id.as_uuid())
                    .execute(self.conn())
                    .await
                    .map_err(|e| map_sqlx_error("delete_reference", e))?;
                Ok(())
            }

            async fn list(&mut self, include_archived: bool) -> Result<Vec<$entity>, StoreError> {
                let sql = format!(
                    "SELECT {} FROM {} WHERE ($1 OR NOT archived) ORDER BY name",
                    <$entity as PgReference>::COLUMNS,
                    <$entity as PgReference>::TABLE,
                );
                let rows = sqlx::query(&sql)
                    .bind(include_archived)
                    .fetch_all(self.conn())
                    .await
                    .map_err(|e| map_sqlx_error("list_references", e))?;
                rows.iter().map(<$entity as PgReference>::decode).collect()
            }

            async fn is_referenced(&mut self, id: $id) -> Result<bool, StoreError> {
                sqlx::query_scalar::<_, bool>(<$entity as PgReference>::USAGE_SQL)
                    .bind(id.as_uuid())
                    .fetch_one(self.conn())
                    .await
                    .map_err(|e| map_sqlx_error("is_referenced", e))
            }
        }
    };
}

impl_pg_reference_repository!(Resource, ResourceId);
impl_pg_reference_repository!(UnitOfMeasure, UnitId);
impl_pg_reference_repository!(Client, ClientId);

fn get<T>(row: &PgRow, column: &str) -> Result<T, StoreError>
where
    T: for<'r> sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column).map_err(|e| map_sqlx_error(column, e))
}

/// Map SQLx errors to `StoreError`, keeping the violated constraint name.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::UniqueViolation {
                    constraint: db_err.constraint().unwrap_or_default().to_string(),
                },
                Some("23503") => StoreError::ForeignKeyViolation(msg),
                Some("23514") => StoreError::Corrupt(msg),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_) => {
            StoreError::Corrupt(format!("failed to decode row in {operation}: {err}"))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {operation}: {err}")),
    }
}
