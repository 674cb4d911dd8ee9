mod common;

use rust_decimal_macros::dec;
use sea_orm::ConnectionTrait;

use common::{header_count, seed_balance, seed_product, TestApp};
use estoque_api::errors::LedgerError;
use estoque_api::services::ledger::AdjustmentRequest;

/// Header table variant carrying mandatory columns the engine does not know
/// about: an FK-looking one and a date-looking one.
const STRICT_INVENTORY_DDL: &str = "CREATE TABLE TESTINVENTARIO (
        EMPRESA INTEGER NOT NULL,
        IDINVENTARIO INTEGER NOT NULL,
        IDALMOX INTEGER,
        TIPO TEXT,
        SITUACAO TEXT,
        USUARIO TEXT,
        OBS TEXT,
        IDUSUARIO INTEGER,
        IDSETOR INTEGER NOT NULL,
        REGISTRODATA TEXT NOT NULL,
        PRIMARY KEY (EMPRESA, IDINVENTARIO)
    )";

/// A mandatory column whose synthesized default can never satisfy the
/// table's own validation.
const IMPOSSIBLE_INVENTORY_DDL: &str = "CREATE TABLE TESTINVENTARIO (
        EMPRESA INTEGER NOT NULL,
        IDINVENTARIO INTEGER NOT NULL,
        IDALMOX INTEGER,
        TIPO TEXT,
        SITUACAO TEXT,
        USUARIO TEXT,
        OBS TEXT,
        LOTE INTEGER NOT NULL,
        PRIMARY KEY (EMPRESA, IDINVENTARIO),
        CONSTRAINT LOTE CHECK (LOTE > 0)
    )";

fn request(product: i64) -> AdjustmentRequest {
    AdjustmentRequest {
        company: 1,
        product,
        warehouse: None,
        delta: dec!(2),
        acting_user_id: None,
        acting_user_label: Some("OPERADOR".into()),
        reason: None,
        deadline: None,
    }
}

async fn header_extras(app: &TestApp) -> (i64, String) {
    let row = app
        .db
        .query_one(sea_orm::Statement::from_string(
            sea_orm::DatabaseBackend::Sqlite,
            "SELECT CAST(IDSETOR AS BIGINT) AS setor, REGISTRODATA AS data FROM TESTINVENTARIO"
                .to_owned(),
        ))
        .await
        .expect("header query")
        .expect("header row");
    (
        row.try_get::<i64>("", "setor").unwrap(),
        row.try_get::<String>("", "data").unwrap(),
    )
}

#[tokio::test]
async fn mandatory_columns_are_discovered_by_the_metadata_probe() {
    let app = TestApp::builder()
        .inventory_ddl(STRICT_INVENTORY_DDL)
        .build()
        .await;
    seed_product(&app.db, 1, "ETIQUETA", "", 0.3).await;
    seed_balance(&app.db, 1, 1, 6.0).await;

    let outcome = app
        .state
        .ledger
        .apply_adjustment(request(1))
        .await
        .expect("adjustment against strict header table");
    assert_eq!(outcome.new_balance, dec!(8));

    // Identifier-like column got 1, the date-like text column got ''.
    let (setor, data) = header_extras(&app).await;
    assert_eq!(setor, 1);
    assert_eq!(data, "");
}

#[tokio::test]
async fn mandatory_columns_are_learned_from_rejections_without_the_probe() {
    let app = TestApp::builder()
        .inventory_ddl(STRICT_INVENTORY_DDL)
        .configure(|cfg| cfg.schema_introspection = false)
        .build()
        .await;
    seed_product(&app.db, 1, "ETIQUETA", "", 0.3).await;
    seed_balance(&app.db, 1, 1, 6.0).await;

    let outcome = app
        .state
        .ledger
        .apply_adjustment(request(1))
        .await
        .expect("adjustment learning columns one rejection at a time");
    assert_eq!(outcome.new_balance, dec!(8));

    let (setor, data) = header_extras(&app).await;
    assert_eq!(setor, 1);
    assert_eq!(data, "");
}

#[tokio::test]
async fn unsatisfiable_column_exhausts_the_adaptation_budget() {
    let app = TestApp::builder()
        .inventory_ddl(IMPOSSIBLE_INVENTORY_DDL)
        .build()
        .await;
    seed_product(&app.db, 1, "BOBINA", "", 9.9).await;
    seed_balance(&app.db, 1, 1, 3.0).await;

    let err = app
        .state
        .ledger
        .apply_adjustment(request(1))
        .await
        .expect_err("LOTE can never be satisfied with a synthesized default");

    match err {
        LedgerError::SchemaAdaptationExhausted {
            attempts,
            last_column,
        } => {
            assert_eq!(attempts, 8);
            assert_eq!(last_column.as_deref(), Some("LOTE"));
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }

    // The failed attempts left nothing behind.
    assert_eq!(header_count(&app.db, 1).await, 0);
}

#[tokio::test]
async fn adaptation_budget_is_configurable() {
    let app = TestApp::builder()
        .inventory_ddl(IMPOSSIBLE_INVENTORY_DDL)
        .configure(|cfg| cfg.schema_adaptation_attempts = 3)
        .build()
        .await;
    seed_product(&app.db, 1, "BOBINA", "", 9.9).await;
    seed_balance(&app.db, 1, 1, 3.0).await;

    let err = app
        .state
        .ledger
        .apply_adjustment(request(1))
        .await
        .expect_err("exhaustion under a smaller budget");
    assert!(matches!(
        err,
        LedgerError::SchemaAdaptationExhausted { attempts: 3, .. }
    ));
}
