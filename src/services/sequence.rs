//! Optimistic identifier allocation for the legacy ledger tables.
//!
//! The legacy schema has no generators; the next identifier for a partition
//! is `MAX(id) + 1`. That read is advisory only — the table's primary key is
//! the real arbiter, and callers must treat a uniqueness rejection on insert
//! as a signal to reallocate and retry.

use async_trait::async_trait;
use sea_orm::DatabaseTransaction;
use sea_orm::ConnectionTrait;

use crate::db::raw_stmt;
use crate::errors::LedgerError;
use crate::schema;

/// Logical sequences the engine allocates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sequence {
    InventoryHeader,
    MovementLine,
}

impl Sequence {
    pub fn table(self) -> &'static str {
        match self {
            Self::InventoryHeader => schema::INVENTORY_TABLE,
            Self::MovementLine => schema::MOVEMENT_TABLE,
        }
    }

    pub fn id_column(self) -> &'static str {
        match self {
            Self::InventoryHeader => schema::INVENTORY_ID_COL,
            Self::MovementLine => schema::MOVEMENT_ID_COL,
        }
    }
}

/// Hands out candidate identifiers scoped to a company partition.
#[async_trait]
pub trait SequenceAllocator: Send + Sync {
    /// Smallest positive integer not yet used in the sequence's identifier
    /// column within the partition. Advisory; re-validated by the caller's
    /// insert.
    async fn allocate_next(
        &self,
        txn: &DatabaseTransaction,
        seq: Sequence,
        company: i64,
    ) -> Result<i64, LedgerError>;
}

/// The production allocator: `COALESCE(MAX(id), 0) + 1` per partition.
#[derive(Debug, Default, Clone, Copy)]
pub struct MaxPlusOne;

// Lowercase alias: Postgres folds unquoted identifiers, and the read below
// looks the column up by exact name.
fn next_id_sql(seq: Sequence) -> String {
    format!(
        "SELECT CAST(COALESCE(MAX({id}), 0) + 1 AS BIGINT) AS next_id FROM {table} WHERE {company} = ?",
        id = seq.id_column(),
        table = seq.table(),
        company = schema::COMPANY_COL,
    )
}

#[async_trait]
impl SequenceAllocator for MaxPlusOne {
    async fn allocate_next(
        &self,
        txn: &DatabaseTransaction,
        seq: Sequence,
        company: i64,
    ) -> Result<i64, LedgerError> {
        let stmt = raw_stmt(
            txn.get_database_backend(),
            &next_id_sql(seq),
            [company.into()],
        );

        let row = txn
            .query_one(stmt)
            .await
            .map_err(LedgerError::Connectivity)?;

        match row {
            Some(row) => row
                .try_get::<i64>("", "next_id")
                .map_err(LedgerError::Connectivity),
            None => Ok(1),
        }
    }
}
