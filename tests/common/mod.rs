//! Test harness: an application state backed by in-memory SQLite carrying
//! the legacy schema, with a trigger standing in for the database-side
//! balance materialization.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use sea_orm::{ConnectionTrait, DatabaseBackend, Statement};
use tokio::sync::mpsc;

use estoque_api::config::AppConfig;
use estoque_api::db::{self, DbConfig, DbPool};
use estoque_api::events::{self, EventSender};
use estoque_api::AppState;

const DEFAULT_INVENTORY_DDL: &str = "CREATE TABLE TESTINVENTARIO (
        EMPRESA INTEGER NOT NULL,
        IDINVENTARIO INTEGER NOT NULL,
        IDALMOX INTEGER,
        TIPO TEXT,
        SITUACAO TEXT,
        USUARIO TEXT,
        OBS TEXT,
        IDUSUARIO INTEGER,
        PRIMARY KEY (EMPRESA, IDINVENTARIO)
    )";

pub struct TestApp {
    pub state: Arc<AppState>,
    pub db: Arc<DbPool>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Fresh application state over an in-memory database with the standard
    /// legacy schema.
    pub async fn new() -> Self {
        Self::builder().build().await
    }

    pub fn builder() -> TestAppBuilder {
        TestAppBuilder {
            inventory_ddl: DEFAULT_INVENTORY_DDL.to_string(),
            configure: None,
        }
    }
}

pub struct TestAppBuilder {
    inventory_ddl: String,
    configure: Option<Box<dyn FnOnce(&mut AppConfig) + Send>>,
}

impl TestAppBuilder {
    /// Replace the inventory-header table definition, e.g. to add mandatory
    /// columns the engine must discover at runtime.
    pub fn inventory_ddl(mut self, ddl: &str) -> Self {
        self.inventory_ddl = ddl.to_string();
        self
    }

    pub fn configure(mut self, f: impl FnOnce(&mut AppConfig) + Send + 'static) -> Self {
        self.configure = Some(Box::new(f));
        self
    }

    pub async fn build(self) -> TestApp {
        let mut cfg = AppConfig::new("sqlite::memory:", "127.0.0.1", 0);
        // Shorten backoffs so conflict tests stay fast.
        cfg.retry_base_delay_ms = 5;
        if let Some(configure) = self.configure {
            configure(&mut cfg);
        }

        // A single connection so every session sees the same in-memory
        // database.
        let db_cfg = DbConfig {
            url: cfg.database_url.clone(),
            max_connections: 1,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(5),
        };
        let pool = db::establish_connection_with_config(&db_cfg)
            .await
            .expect("failed to create test database");
        let db = Arc::new(pool);

        create_schema(db.as_ref(), &self.inventory_ddl).await;

        let (event_tx, event_rx) = mpsc::channel(64);
        let event_task = tokio::spawn(events::process_events(event_rx));
        let state = Arc::new(AppState::new(
            db.clone(),
            Arc::new(cfg),
            EventSender::new(event_tx),
        ));

        TestApp {
            state,
            db,
            _event_task: event_task,
        }
    }
}

async fn create_schema(db: &DbPool, inventory_ddl: &str) {
    let statements = [
        "CREATE TABLE TESTPRODUTO (
            IDPRODUTO INTEGER PRIMARY KEY,
            DESCRICAO TEXT NOT NULL,
            CODBARRAS TEXT,
            PRECOVENDA NUMERIC
        )",
        "CREATE TABLE TESTPRODUTOESTOQUE (
            EMPRESA INTEGER NOT NULL,
            IDPRODUTOPRINCIPAL INTEGER NOT NULL,
            ESTDISPONIVEL NUMERIC NOT NULL DEFAULT 0,
            PRIMARY KEY (EMPRESA, IDPRODUTOPRINCIPAL)
        )",
        "CREATE TABLE TESTPRODUTOMOVIMENTO (
            EMPRESA INTEGER NOT NULL,
            IDMOVIMENTO INTEGER NOT NULL,
            IDTIPOMOVIMENTO INTEGER NOT NULL,
            IDPRODUTO INTEGER NOT NULL,
            IDPRODUTOPRINCIPAL INTEGER NOT NULL,
            IDALMOX INTEGER,
            IDINVENTARIO INTEGER,
            QTDE NUMERIC NOT NULL,
            ESTDISPONIVEL NUMERIC NOT NULL,
            QTDEEMBALAGEM NUMERIC,
            MOVIMENTAESTOQUE TEXT,
            DESCRICAO TEXT,
            PRIMARY KEY (EMPRESA, IDMOVIMENTO)
        )",
        "CREATE TABLE TGERUSUARIO (
            IDUSUARIO INTEGER PRIMARY KEY,
            USUARIO TEXT,
            NOME TEXT,
            ATIVO TEXT,
            SENHA TEXT
        )",
        // Stands in for the database-side materialization of the stock
        // balance as movement lines land.
        "CREATE TRIGGER TRG_MOV_BALANCE AFTER INSERT ON TESTPRODUTOMOVIMENTO
         BEGIN
            UPDATE TESTPRODUTOESTOQUE
               SET ESTDISPONIVEL = ESTDISPONIVEL + NEW.QTDE
             WHERE EMPRESA = NEW.EMPRESA
               AND IDPRODUTOPRINCIPAL = NEW.IDPRODUTOPRINCIPAL;
         END",
    ];

    exec(db, inventory_ddl).await;
    for sql in statements {
        exec(db, sql).await;
    }
}

pub async fn exec(db: &DbPool, sql: &str) {
    db.execute(Statement::from_string(DatabaseBackend::Sqlite, sql.to_owned()))
        .await
        .unwrap_or_else(|e| panic!("statement failed: {e}\n{sql}"));
}

pub async fn seed_product(db: &DbPool, id: i64, description: &str, barcode: &str, price: f64) {
    db.execute(Statement::from_sql_and_values(
        DatabaseBackend::Sqlite,
        "INSERT INTO TESTPRODUTO (IDPRODUTO, DESCRICAO, CODBARRAS, PRECOVENDA) VALUES (?, ?, ?, ?)",
        [id.into(), description.into(), barcode.into(), price.into()],
    ))
    .await
    .expect("seed product");
}

pub async fn seed_balance(db: &DbPool, company: i64, product: i64, qty: f64) {
    db.execute(Statement::from_sql_and_values(
        DatabaseBackend::Sqlite,
        "INSERT INTO TESTPRODUTOESTOQUE (EMPRESA, IDPRODUTOPRINCIPAL, ESTDISPONIVEL) VALUES (?, ?, ?)",
        [company.into(), product.into(), qty.into()],
    ))
    .await
    .expect("seed balance");
}

pub async fn seed_user(
    db: &DbPool,
    id: i64,
    username: &str,
    name: &str,
    active: &str,
    secret: &str,
) {
    db.execute(Statement::from_sql_and_values(
        DatabaseBackend::Sqlite,
        "INSERT INTO TGERUSUARIO (IDUSUARIO, USUARIO, NOME, ATIVO, SENHA) VALUES (?, ?, ?, ?, ?)",
        [
            id.into(),
            username.into(),
            name.into(),
            active.into(),
            secret.into(),
        ],
    ))
    .await
    .expect("seed user");
}

pub async fn count(db: &DbPool, sql: &str) -> i64 {
    let row = db
        .query_one(Statement::from_string(DatabaseBackend::Sqlite, sql.to_owned()))
        .await
        .expect("count query")
        .expect("count row");
    row.try_get::<i64>("", "n").expect("count value")
}

pub async fn header_count(db: &DbPool, company: i64) -> i64 {
    count(
        db,
        &format!("SELECT CAST(COUNT(*) AS BIGINT) AS n FROM TESTINVENTARIO WHERE EMPRESA = {company}"),
    )
    .await
}

pub async fn movement_count(db: &DbPool, company: i64) -> i64 {
    count(
        db,
        &format!(
            "SELECT CAST(COUNT(*) AS BIGINT) AS n FROM TESTPRODUTOMOVIMENTO WHERE EMPRESA = {company}"
        ),
    )
    .await
}

pub async fn balance_of(db: &DbPool, company: i64, product: i64) -> Decimal {
    let row = db
        .query_one(Statement::from_sql_and_values(
            DatabaseBackend::Sqlite,
            "SELECT ESTDISPONIVEL AS balance FROM TESTPRODUTOESTOQUE \
             WHERE EMPRESA = ? AND IDPRODUTOPRINCIPAL = ?",
            [company.into(), product.into()],
        ))
        .await
        .expect("balance query")
        .expect("balance row");
    row.try_get::<Decimal>("", "balance").expect("balance value")
}
