//! The movement ledger transaction engine.
//!
//! Each adjustment (single or batched) runs inside one database transaction:
//! create an inventory header, allocate movement-line identifiers, insert
//! movement rows, read back the materialized balance, commit. Identifier
//! allocation is optimistic (`MAX+1` per company partition), so uniqueness
//! rejections from concurrent writers are expected and retried with linear
//! backoff, as are lock/timeout conflicts. Everything else is fatal for the
//! call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, histogram};
use rust_decimal::Decimal;
use sea_orm::{ConnectionTrait, DatabaseTransaction, DbErr, TransactionTrait};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::db::{raw_stmt, DbPool};
use crate::errors::{is_lock_conflict, is_unique_violation, LedgerError};
use crate::events::{Event, EventSender};
use crate::schema;
use crate::services::catalog::{product_description, read_balance};
use crate::services::directory;
use crate::services::header::{AdaptiveHeaderInserter, HeaderSpec};
use crate::services::sequence::{MaxPlusOne, Sequence, SequenceAllocator};

/// Retry and policy knobs, normally sourced from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct LedgerPolicy {
    /// Outer attempts per call for transient conflicts
    pub max_retries: u32,
    /// Backoff between attempts is `base_delay * attempt`
    pub base_delay: Duration,
    /// Reject adjustments that would drive the balance negative
    pub block_negative: bool,
    /// Warehouse stamped on headers and lines when the request names none
    pub primary_warehouse: i64,
    /// Bound on missing-column synthesis rounds for one header insert
    pub schema_adaptation_attempts: u32,
    /// Probe NOT-NULL columns up front instead of parsing rejections
    pub schema_introspection: bool,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(50),
            block_negative: false,
            primary_warehouse: 1,
            schema_adaptation_attempts: 8,
            schema_introspection: true,
        }
    }
}

impl From<&AppConfig> for LedgerPolicy {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base_delay: cfg.retry_base_delay(),
            block_negative: cfg.block_negative,
            primary_warehouse: cfg.primary_warehouse,
            schema_adaptation_attempts: cfg.schema_adaptation_attempts,
            schema_introspection: cfg.schema_introspection,
        }
    }
}

/// One stock adjustment for one product.
#[derive(Debug, Clone)]
pub struct AdjustmentRequest {
    pub company: i64,
    pub product: i64,
    pub warehouse: Option<i64>,
    pub delta: Decimal,
    pub acting_user_id: Option<i64>,
    pub acting_user_label: Option<String>,
    pub reason: Option<String>,
    /// Caller-supplied deadline; the retry loop aborts early with
    /// [`LedgerError::Cancelled`] instead of exhausting attempts.
    pub deadline: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct AdjustmentOutcome {
    pub product: i64,
    pub inventory_id: i64,
    pub movement_id: i64,
    pub new_balance: Decimal,
}

#[derive(Debug, Clone)]
pub struct BatchItem {
    pub product: i64,
    pub delta: Decimal,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BatchAdjustmentRequest {
    pub company: i64,
    pub warehouse: Option<i64>,
    pub items: Vec<BatchItem>,
    pub acting_user_id: Option<i64>,
    pub acting_user_label: Option<String>,
    pub reason: Option<String>,
    pub deadline: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub inventory_id: i64,
    pub results: Vec<AdjustmentOutcome>,
}

/// Header-only creation (no movement lines).
#[derive(Debug, Clone)]
pub struct HeaderRequest {
    pub company: i64,
    pub warehouse: Option<i64>,
    pub acting_user_id: Option<i64>,
    pub acting_user_label: Option<String>,
    pub reason: Option<String>,
}

#[derive(Clone)]
pub struct StockLedgerService {
    db: Arc<DbPool>,
    allocator: Arc<dyn SequenceAllocator>,
    inserter: Arc<AdaptiveHeaderInserter>,
    policy: LedgerPolicy,
    events: EventSender,
}

impl StockLedgerService {
    pub fn new(db: Arc<DbPool>, events: EventSender, policy: LedgerPolicy) -> Self {
        let inserter = Arc::new(AdaptiveHeaderInserter::new(
            policy.schema_adaptation_attempts,
            policy.schema_introspection,
        ));
        Self {
            db,
            allocator: Arc::new(MaxPlusOne),
            inserter,
            policy,
            events,
        }
    }

    /// Swap the identifier allocator. Tests use this to force collisions
    /// deterministically.
    pub fn with_allocator(mut self, allocator: Arc<dyn SequenceAllocator>) -> Self {
        self.allocator = allocator;
        self
    }

    /// Apply one signed quantity change to one product and return the
    /// post-adjustment balance.
    pub async fn apply_adjustment(
        &self,
        req: AdjustmentRequest,
    ) -> Result<AdjustmentOutcome, LedgerError> {
        let warehouse = req.warehouse.unwrap_or(self.policy.primary_warehouse);
        let started = Instant::now();
        let mut last_transient: Option<LedgerError> = None;

        for attempt in 1..=self.policy.max_retries {
            check_deadline(req.deadline, attempt)?;

            match self.adjustment_attempt(&req, warehouse).await {
                Ok(outcome) => {
                    histogram!(
                        "estoque_ledger.adjustment.duration_seconds",
                        started.elapsed().as_secs_f64()
                    );
                    counter!("estoque_ledger.adjustments", 1);
                    info!(
                        company = req.company,
                        product = req.product,
                        inventory_id = outcome.inventory_id,
                        movement_id = outcome.movement_id,
                        delta = %req.delta,
                        balance = %outcome.new_balance,
                        attempt,
                        "stock adjusted"
                    );
                    self.emit(Event::StockAdjusted {
                        company: req.company,
                        product: req.product,
                        inventory_id: outcome.inventory_id,
                        movement_id: outcome.movement_id,
                        delta: req.delta,
                        new_balance: outcome.new_balance,
                        timestamp: Utc::now(),
                    })
                    .await;
                    return Ok(outcome);
                }
                Err(err) if err.is_transient() => {
                    warn!(
                        company = req.company,
                        product = req.product,
                        attempt,
                        error = %err,
                        "transient conflict, retrying adjustment"
                    );
                    counter!("estoque_ledger.retries", 1);
                    last_transient = Some(err);
                    backoff(self.policy.base_delay, attempt, req.deadline).await?;
                }
                Err(err) => return Err(err),
            }
        }

        Err(exhausted(self.policy.max_retries, last_transient))
    }

    /// Apply N adjustments under a single inventory header and a single
    /// transaction. Any conflict rolls back the entire batch; the outer
    /// retry loop resubmits it as a unit.
    pub async fn apply_adjustment_batch(
        &self,
        req: BatchAdjustmentRequest,
    ) -> Result<BatchOutcome, LedgerError> {
        if req.items.is_empty() {
            return Err(LedgerError::Adjustment(
                "batch requires at least one item".into(),
            ));
        }
        let warehouse = req.warehouse.unwrap_or(self.policy.primary_warehouse);
        let mut last_transient: Option<LedgerError> = None;

        for attempt in 1..=self.policy.max_retries {
            check_deadline(req.deadline, attempt)?;

            match self.batch_attempt(&req, warehouse).await {
                Ok(outcome) => {
                    counter!("estoque_ledger.batch_adjustments", 1);
                    info!(
                        company = req.company,
                        inventory_id = outcome.inventory_id,
                        lines = outcome.results.len(),
                        attempt,
                        "stock batch adjusted"
                    );
                    self.emit(Event::StockBatchAdjusted {
                        company: req.company,
                        inventory_id: outcome.inventory_id,
                        lines: outcome.results.len(),
                        timestamp: Utc::now(),
                    })
                    .await;
                    return Ok(outcome);
                }
                Err(err) if err.is_transient() => {
                    warn!(
                        company = req.company,
                        attempt,
                        error = %err,
                        "transient conflict, retrying batch"
                    );
                    counter!("estoque_ledger.retries", 1);
                    last_transient = Some(err);
                    backoff(self.policy.base_delay, attempt, req.deadline).await?;
                }
                Err(err) => return Err(err),
            }
        }

        Err(exhausted(self.policy.max_retries, last_transient))
    }

    /// Create an inventory header with no movement lines.
    pub async fn create_header(&self, req: HeaderRequest) -> Result<i64, LedgerError> {
        let warehouse = req.warehouse.unwrap_or(self.policy.primary_warehouse);
        let mut last_transient: Option<LedgerError> = None;

        for attempt in 1..=self.policy.max_retries {
            match self.header_attempt(&req, warehouse).await {
                Ok(inventory_id) => {
                    self.emit(Event::InventoryHeaderCreated {
                        company: req.company,
                        inventory_id,
                        timestamp: Utc::now(),
                    })
                    .await;
                    return Ok(inventory_id);
                }
                Err(err) if err.is_transient() => {
                    warn!(company = req.company, attempt, error = %err, "retrying header creation");
                    last_transient = Some(err);
                    backoff(self.policy.base_delay, attempt, None).await?;
                }
                Err(err) => return Err(err),
            }
        }

        Err(exhausted(self.policy.max_retries, last_transient))
    }

    async fn emit(&self, event: Event) {
        if let Err(err) = self.events.send(event).await {
            warn!("event delivery failed: {}", err);
        }
    }

    async fn adjustment_attempt(
        &self,
        req: &AdjustmentRequest,
        warehouse: i64,
    ) -> Result<AdjustmentOutcome, LedgerError> {
        let txn = self.db.begin().await.map_err(LedgerError::Connectivity)?;
        match self.adjustment_in_txn(&txn, req, warehouse).await {
            Ok(outcome) => {
                commit(txn).await?;
                Ok(outcome)
            }
            Err(err) => {
                rollback(txn).await;
                Err(err)
            }
        }
    }

    async fn adjustment_in_txn(
        &self,
        txn: &DatabaseTransaction,
        req: &AdjustmentRequest,
        warehouse: i64,
    ) -> Result<AdjustmentOutcome, LedgerError> {
        let spec = self
            .resolve_header_spec(
                txn,
                req.company,
                warehouse,
                req.acting_user_id,
                req.acting_user_label.clone(),
                req.reason.clone(),
            )
            .await;

        if self.policy.block_negative {
            let balance = read_balance(txn, req.company, req.product)
                .await
                .map_err(classify_fatal)?
                .ok_or(LedgerError::BalanceNotFound {
                    company: req.company,
                    product: req.product,
                })?;
            if balance + req.delta < Decimal::ZERO {
                return Err(LedgerError::NegativeStockRejected {
                    balance,
                    delta: req.delta,
                });
            }
        }

        let inventory_id = self
            .allocator
            .allocate_next(txn, Sequence::InventoryHeader, req.company)
            .await?;
        self.inserter.insert_header(txn, &spec, inventory_id).await?;

        let movement_id = self
            .allocator
            .allocate_next(txn, Sequence::MovementLine, req.company)
            .await?;
        let description = movement_description(req.reason.as_deref());
        insert_movement_line(
            txn,
            &MovementLine {
                company: req.company,
                movement_id,
                product: req.product,
                warehouse,
                inventory_id,
                delta: req.delta,
                description,
            },
        )
        .await?;

        let new_balance = read_balance(txn, req.company, req.product)
            .await
            .map_err(classify_fatal)?
            .ok_or(LedgerError::BalanceNotFound {
                company: req.company,
                product: req.product,
            })?;

        Ok(AdjustmentOutcome {
            product: req.product,
            inventory_id,
            movement_id,
            new_balance,
        })
    }

    async fn batch_attempt(
        &self,
        req: &BatchAdjustmentRequest,
        warehouse: i64,
    ) -> Result<BatchOutcome, LedgerError> {
        let txn = self.db.begin().await.map_err(LedgerError::Connectivity)?;
        match self.batch_in_txn(&txn, req, warehouse).await {
            Ok(outcome) => {
                commit(txn).await?;
                Ok(outcome)
            }
            Err(err) => {
                rollback(txn).await;
                Err(err)
            }
        }
    }

    async fn batch_in_txn(
        &self,
        txn: &DatabaseTransaction,
        req: &BatchAdjustmentRequest,
        warehouse: i64,
    ) -> Result<BatchOutcome, LedgerError> {
        let spec = self
            .resolve_header_spec(
                txn,
                req.company,
                warehouse,
                req.acting_user_id,
                req.acting_user_label.clone(),
                req.reason.clone(),
            )
            .await;

        let inventory_id = self
            .allocator
            .allocate_next(txn, Sequence::InventoryHeader, req.company)
            .await?;
        self.inserter.insert_header(txn, &spec, inventory_id).await?;

        // One seed read; later lines advance a local counter instead of
        // re-querying MAX per item.
        let mut movement_id = self
            .allocator
            .allocate_next(txn, Sequence::MovementLine, req.company)
            .await?;

        let mut results = Vec::with_capacity(req.items.len());
        for item in &req.items {
            let description = match &item.reason {
                Some(reason) => movement_description(Some(reason)),
                None => product_description(txn, item.product)
                    .await
                    .map_err(classify_fatal)?
                    .map(|d| movement_description(Some(d.as_str())))
                    .unwrap_or_else(|| movement_description(req.reason.as_deref())),
            };

            let line = MovementLine {
                company: req.company,
                movement_id,
                product: item.product,
                warehouse,
                inventory_id,
                delta: item.delta,
                description,
            };
            match insert_movement_line(txn, &line).await {
                Ok(()) => {}
                // A duplicate movement id anywhere aborts the whole batch;
                // the caller resubmits it as a unit.
                Err(LedgerError::IdentifierCollision { id, .. }) => {
                    return Err(LedgerError::BatchConflict(format!(
                        "movement id {} already taken for company {}",
                        id, req.company
                    )));
                }
                Err(err) => return Err(err),
            }

            // Read back immediately so a product repeated within the batch
            // sees the earlier lines applied.
            let balance = read_balance(txn, req.company, item.product)
                .await
                .map_err(classify_fatal)?
                .ok_or(LedgerError::BalanceNotFound {
                    company: req.company,
                    product: item.product,
                })?;

            results.push(AdjustmentOutcome {
                product: item.product,
                inventory_id,
                movement_id,
                new_balance: balance,
            });
            movement_id += 1;
        }

        Ok(BatchOutcome {
            inventory_id,
            results,
        })
    }

    async fn header_attempt(
        &self,
        req: &HeaderRequest,
        warehouse: i64,
    ) -> Result<i64, LedgerError> {
        let txn = self.db.begin().await.map_err(LedgerError::Connectivity)?;
        let result = async {
            let spec = self
                .resolve_header_spec(
                    &txn,
                    req.company,
                    warehouse,
                    req.acting_user_id,
                    req.acting_user_label.clone(),
                    req.reason.clone(),
                )
                .await;
            let inventory_id = self
                .allocator
                .allocate_next(&txn, Sequence::InventoryHeader, req.company)
                .await?;
            self.inserter.insert_header(&txn, &spec, inventory_id).await?;
            Ok(inventory_id)
        }
        .await;

        match result {
            Ok(inventory_id) => {
                commit(txn).await?;
                Ok(inventory_id)
            }
            Err(err) => {
                rollback(txn).await;
                Err(err)
            }
        }
    }

    /// Fill in the acting-user label when only a numeric id was supplied.
    /// Lookup failures are tolerated; the inserter falls back to the id's
    /// string form or "API".
    async fn resolve_header_spec(
        &self,
        txn: &DatabaseTransaction,
        company: i64,
        warehouse: i64,
        acting_user_id: Option<i64>,
        acting_user_label: Option<String>,
        reason: Option<String>,
    ) -> HeaderSpec {
        let mut spec = HeaderSpec {
            company,
            warehouse,
            acting_user_id,
            acting_user_label,
            reason,
        };
        if spec.acting_user_label.is_none() {
            if let Some(user_id) = spec.acting_user_id {
                spec.acting_user_label = directory::lookup_label(txn, user_id).await;
            }
        }
        spec
    }
}

/// One movement row, ready to insert. The signed delta is written to both
/// QTDE and ESTDISPONIVEL, as the adjustment movement type requires.
struct MovementLine {
    company: i64,
    movement_id: i64,
    product: i64,
    warehouse: i64,
    inventory_id: i64,
    delta: Decimal,
    description: String,
}

async fn insert_movement_line(
    txn: &DatabaseTransaction,
    line: &MovementLine,
) -> Result<(), LedgerError> {
    let sql = format!(
        "INSERT INTO {table} \
         ({company}, {movement_id}, IDTIPOMOVIMENTO, IDPRODUTO, {product_key}, \
          IDALMOX, {inventory_id}, QTDE, {qty}, QTDEEMBALAGEM, MOVIMENTAESTOQUE, DESCRICAO) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        table = schema::MOVEMENT_TABLE,
        company = schema::COMPANY_COL,
        movement_id = schema::MOVEMENT_ID_COL,
        product_key = schema::PRODUCT_KEY_COL,
        inventory_id = schema::INVENTORY_ID_COL,
        qty = schema::QTY_COL,
    );
    let stmt = raw_stmt(
        txn.get_database_backend(),
        &sql,
        [
            line.company.into(),
            line.movement_id.into(),
            schema::MOVEMENT_TYPE_ADJUSTMENT.into(),
            line.product.into(),
            line.product.into(),
            line.warehouse.into(),
            line.inventory_id.into(),
            line.delta.into(),
            line.delta.into(),
            Decimal::ONE.into(),
            "1".into(),
            line.description.clone().into(),
        ],
    );

    match txn.execute(stmt).await {
        Ok(_) => Ok(()),
        Err(err) if is_unique_violation(&err) => {
            debug!(
                movement_id = line.movement_id,
                "movement id already taken by a concurrent writer"
            );
            Err(LedgerError::IdentifierCollision {
                table: schema::MOVEMENT_TABLE,
                id: line.movement_id,
            })
        }
        Err(err) => Err(classify_fatal(err)),
    }
}

/// Movement-line label, bounded by the legacy DESCRICAO width.
fn movement_description(reason: Option<&str>) -> String {
    reason
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or("AJUSTE")
        .chars()
        .take(250)
        .collect()
}

fn classify_fatal(err: DbErr) -> LedgerError {
    if is_lock_conflict(&err) {
        LedgerError::LockConflict(err.to_string())
    } else {
        LedgerError::Adjustment(err.to_string())
    }
}

async fn commit(txn: DatabaseTransaction) -> Result<(), LedgerError> {
    counter!("estoque_db.transaction.committed", 1);
    txn.commit().await.map_err(classify_fatal)
}

async fn rollback(txn: DatabaseTransaction) {
    counter!("estoque_db.transaction.rolled_back", 1);
    if let Err(err) = txn.rollback().await {
        warn!("rollback failed: {}", err);
    }
}

fn check_deadline(deadline: Option<Instant>, attempt: u32) -> Result<(), LedgerError> {
    match deadline {
        Some(d) if Instant::now() >= d => Err(LedgerError::Cancelled {
            attempts: attempt - 1,
        }),
        _ => Ok(()),
    }
}

/// Sleep `base * attempt`, aborting instead when the deadline would pass
/// before the next attempt could run.
async fn backoff(
    base: Duration,
    attempt: u32,
    deadline: Option<Instant>,
) -> Result<(), LedgerError> {
    let delay = base * attempt;
    if let Some(d) = deadline {
        if Instant::now() + delay >= d {
            return Err(LedgerError::Cancelled { attempts: attempt });
        }
    }
    tokio::time::sleep(delay).await;
    Ok(())
}

fn exhausted(attempts: u32, last: Option<LedgerError>) -> LedgerError {
    match last {
        Some(err) => LedgerError::Adjustment(format!(
            "retries exhausted after {} attempts: {}",
            attempts, err
        )),
        None => LedgerError::Adjustment(format!("retries exhausted after {} attempts", attempts)),
    }
}
