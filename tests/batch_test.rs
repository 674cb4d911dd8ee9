mod common;

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use rust_decimal_macros::dec;
use sea_orm::{ConnectionTrait, DatabaseTransaction};

use common::{balance_of, header_count, movement_count, seed_balance, seed_product, TestApp};
use estoque_api::errors::LedgerError;
use estoque_api::services::ledger::{BatchAdjustmentRequest, BatchItem};
use estoque_api::services::sequence::{MaxPlusOne, Sequence, SequenceAllocator};

fn batch(items: Vec<BatchItem>) -> BatchAdjustmentRequest {
    BatchAdjustmentRequest {
        company: 1,
        warehouse: None,
        items,
        acting_user_id: None,
        acting_user_label: Some("TESTER".into()),
        reason: Some("balanço mensal".into()),
        deadline: None,
    }
}

fn item(product: i64, delta: rust_decimal::Decimal) -> BatchItem {
    BatchItem {
        product,
        delta,
        reason: None,
    }
}

#[tokio::test]
async fn batch_shares_one_header_and_consecutive_movement_ids() {
    let app = TestApp::new().await;
    for (id, qty) in [(1, 10.0), (2, 20.0), (3, 30.0)] {
        seed_product(&app.db, id, &format!("PRODUTO {id}"), "", 1.0).await;
        seed_balance(&app.db, 1, id, qty).await;
    }

    let outcome = app
        .state
        .ledger
        .apply_adjustment_batch(batch(vec![
            item(1, dec!(5)),
            item(2, dec!(-4)),
            item(3, dec!(1)),
        ]))
        .await
        .expect("batch");

    assert_eq!(header_count(&app.db, 1).await, 1);
    assert_eq!(movement_count(&app.db, 1).await, 3);
    assert!(outcome
        .results
        .iter()
        .all(|r| r.inventory_id == outcome.inventory_id));
    let ids: Vec<i64> = outcome.results.iter().map(|r| r.movement_id).collect();
    assert_eq!(ids, vec![ids[0], ids[0] + 1, ids[0] + 2]);

    assert_eq!(balance_of(&app.db, 1, 1).await, dec!(15));
    assert_eq!(balance_of(&app.db, 1, 2).await, dec!(16));
    assert_eq!(balance_of(&app.db, 1, 3).await, dec!(31));
}

#[tokio::test]
async fn repeated_product_sees_earlier_lines_in_its_read_back() {
    let app = TestApp::new().await;
    seed_product(&app.db, 1, "CANETA", "", 1.0).await;
    seed_balance(&app.db, 1, 1, 10.0).await;

    let outcome = app
        .state
        .ledger
        .apply_adjustment_batch(batch(vec![item(1, dec!(5)), item(1, dec!(-2))]))
        .await
        .expect("batch with repeated product");

    assert_eq!(outcome.results[0].new_balance, dec!(15));
    assert_eq!(outcome.results[1].new_balance, dec!(13));
    assert_eq!(balance_of(&app.db, 1, 1).await, dec!(13));
}

#[tokio::test]
async fn one_bad_item_rolls_back_the_whole_batch() {
    let app = TestApp::new().await;
    seed_product(&app.db, 1, "LAPIS", "", 0.5).await;
    seed_balance(&app.db, 1, 1, 10.0).await;
    // Product 99 has no balance row, so its read-back fails.
    seed_product(&app.db, 99, "FANTASMA", "", 0.0).await;

    let err = app
        .state
        .ledger
        .apply_adjustment_batch(batch(vec![item(1, dec!(5)), item(99, dec!(1))]))
        .await
        .expect_err("second item has no balance");
    assert!(matches!(err, LedgerError::BalanceNotFound { product: 99, .. }));

    // Nothing from the batch survives, including the first, valid item.
    assert_eq!(header_count(&app.db, 1).await, 0);
    assert_eq!(movement_count(&app.db, 1).await, 0);
    assert_eq!(balance_of(&app.db, 1, 1).await, dec!(10));
}

#[tokio::test]
async fn empty_batch_is_rejected() {
    let app = TestApp::new().await;
    let err = app
        .state
        .ledger
        .apply_adjustment_batch(batch(vec![]))
        .await
        .expect_err("empty batch");
    assert!(matches!(err, LedgerError::Adjustment(_)));
}

/// Hands out a taken movement-line seed on the first batch attempt only, so
/// the batch collides mid-way, rolls back and succeeds on resubmission.
struct StaleSeedOnce {
    stale_id: i64,
    calls: AtomicU32,
}

#[async_trait]
impl SequenceAllocator for StaleSeedOnce {
    async fn allocate_next(
        &self,
        txn: &DatabaseTransaction,
        seq: Sequence,
        company: i64,
    ) -> Result<i64, LedgerError> {
        if seq == Sequence::MovementLine && self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Ok(self.stale_id);
        }
        MaxPlusOne.allocate_next(txn, seq, company).await
    }
}

#[tokio::test]
async fn batch_conflict_retries_the_batch_as_a_unit() {
    let app = TestApp::new().await;
    seed_product(&app.db, 1, "GRAMPO", "", 0.2).await;
    seed_product(&app.db, 2, "CLIPE", "", 0.1).await;
    seed_balance(&app.db, 1, 1, 10.0).await;
    seed_balance(&app.db, 1, 2, 10.0).await;

    // Occupy movement id 1 so the stale seed collides immediately.
    app.state
        .ledger
        .apply_adjustment(estoque_api::services::ledger::AdjustmentRequest {
            company: 1,
            product: 1,
            warehouse: None,
            delta: dec!(1),
            acting_user_id: None,
            acting_user_label: None,
            reason: None,
            deadline: None,
        })
        .await
        .expect("occupy movement id 1");

    let ledger = app.state.ledger.clone().with_allocator(std::sync::Arc::new(
        StaleSeedOnce {
            stale_id: 1,
            calls: AtomicU32::new(0),
        },
    ));

    let outcome = ledger
        .apply_adjustment_batch(batch(vec![item(1, dec!(2)), item(2, dec!(3))]))
        .await
        .expect("batch retried as a unit");

    assert_eq!(outcome.results.len(), 2);
    assert_eq!(balance_of(&app.db, 1, 1).await, dec!(13));
    assert_eq!(balance_of(&app.db, 1, 2).await, dec!(13));
    // One header from the single adjustment, one from the committed batch.
    assert_eq!(header_count(&app.db, 1).await, 2);
    assert_eq!(movement_count(&app.db, 1).await, 3);
}

#[tokio::test]
async fn item_without_reason_uses_the_product_description() {
    let app = TestApp::new().await;
    seed_product(&app.db, 1, "MARTELO DE BORRACHA", "", 25.0).await;
    seed_balance(&app.db, 1, 1, 4.0).await;

    let mut req = batch(vec![item(1, dec!(1))]);
    req.reason = None;
    app.state
        .ledger
        .apply_adjustment_batch(req)
        .await
        .expect("batch");

    let row = app
        .db
        .query_one(sea_orm::Statement::from_string(
            sea_orm::DatabaseBackend::Sqlite,
            "SELECT DESCRICAO FROM TESTPRODUTOMOVIMENTO".to_owned(),
        ))
        .await
        .expect("movement query")
        .expect("movement row");
    let description = row.try_get::<String>("", "DESCRICAO").unwrap();
    assert_eq!(description, "MARTELO DE BORRACHA");
}
