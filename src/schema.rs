//! Fixed legacy schema the engine mutates, plus the two mechanisms for
//! coping with mandatory columns it does not control: a metadata probe that
//! lists NOT-NULL columns up front, and a last-resort parser that extracts a
//! column name from a driver rejection message.

use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::{ConnectionTrait, DbBackend, DbErr, Statement, Value};

/// Product master, read-only.
pub const PRODUCT_TABLE: &str = "TESTPRODUTO";
/// Per-(company, product) balance, materialized by the database itself.
pub const STOCK_BALANCE_TABLE: &str = "TESTPRODUTOESTOQUE";
/// Movement ledger lines.
pub const MOVEMENT_TABLE: &str = "TESTPRODUTOMOVIMENTO";
/// Inventory headers grouping movement lines.
pub const INVENTORY_TABLE: &str = "TESTINVENTARIO";
/// Legacy user directory.
pub const USER_TABLE: &str = "TGERUSUARIO";

/// Partition key column present on every table.
pub const COMPANY_COL: &str = "EMPRESA";
/// Identifier column of [`INVENTORY_TABLE`].
pub const INVENTORY_ID_COL: &str = "IDINVENTARIO";
/// Identifier column of [`MOVEMENT_TABLE`].
pub const MOVEMENT_ID_COL: &str = "IDMOVIMENTO";
/// Available-quantity column of [`STOCK_BALANCE_TABLE`].
pub const QTY_COL: &str = "ESTDISPONIVEL";
/// Product key column of [`STOCK_BALANCE_TABLE`] and [`MOVEMENT_TABLE`].
pub const PRODUCT_KEY_COL: &str = "IDPRODUTOPRINCIPAL";

/// Movement-type code classifying a line as an inventory adjustment.
pub const MOVEMENT_TYPE_ADJUSTMENT: i64 = 6;

/// Text/status columns whose synthesized default is a string rather than a
/// number. USUARIO is special-cased to the acting-user label.
const TEXTUAL_COLUMNS: &[&str] = &[
    "TIPO",
    "SITUACAO",
    "USUARIO",
    "OBS",
    "REGISTROHORA",
    "REGISTRODATA",
];

/// Deterministic default for a mandatory column the caller did not supply.
///
/// Identifier-like names get `1` (a plausible FK), known text columns get an
/// empty string (the user column gets the acting-user label), everything
/// else gets `0`.
pub fn synthesize_default(column: &str, acting_user: &str) -> Value {
    let cu = column.to_uppercase();
    if cu.starts_with("ID") || cu.ends_with("ID") {
        Value::BigInt(Some(1))
    } else if TEXTUAL_COLUMNS.contains(&cu.as_str()) {
        if cu == "USUARIO" {
            Value::String(Some(Box::new(acting_user.to_string())))
        } else {
            Value::String(Some(Box::new(String::new())))
        }
    } else {
        Value::BigInt(Some(0))
    }
}

/// Patterns tried in order against a driver rejection message. The first
/// three are the structured shapes Firebird, SQLite and Postgres produce for
/// NOT-NULL/validation failures; the quoted-identifier fallback is kept for
/// drivers that only quote the offending column.
static COLUMN_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r#"(?i)column\s+"[^"]+"\."(?P<col>\w+)""#).unwrap(),
        Regex::new(r"(?i)(?:NOT NULL|CHECK) constraint failed:\s*(?:\w+\.)?(?P<col>\w+)").unwrap(),
        Regex::new(r#"(?i)null value in column "(?P<col>\w+)""#).unwrap(),
        Regex::new(r#""(?P<col>[A-Z][A-Z0-9_]*)""#).unwrap(),
    ]
});

/// Extract the column a rejected insert complains about, if the message
/// names one. This is the compatibility path; the metadata probe below is
/// the primary mechanism.
pub fn parse_missing_column(message: &str) -> Option<String> {
    COLUMN_PATTERNS
        .iter()
        .find_map(|re| re.captures(message))
        .map(|caps| caps["col"].to_uppercase())
}

/// List the table's NOT-NULL columns that carry no default, so the inserter
/// can satisfy them before the first attempt instead of learning them from
/// rejections one at a time.
pub async fn required_columns<C: ConnectionTrait>(
    conn: &C,
    table: &str,
) -> Result<Vec<String>, DbErr> {
    let backend = conn.get_database_backend();
    let stmt = match backend {
        DbBackend::Sqlite => Statement::from_sql_and_values(
            backend,
            r#"SELECT name AS column_name FROM pragma_table_info(?) WHERE "notnull" = 1 AND dflt_value IS NULL AND pk = 0"#,
            [table.into()],
        ),
        DbBackend::Postgres => Statement::from_sql_and_values(
            backend,
            "SELECT column_name FROM information_schema.columns \
             WHERE UPPER(table_name) = UPPER($1) AND is_nullable = 'NO' AND column_default IS NULL",
            [table.into()],
        ),
        DbBackend::MySql => Statement::from_sql_and_values(
            backend,
            "SELECT column_name FROM information_schema.columns \
             WHERE UPPER(table_name) = UPPER(?) AND is_nullable = 'NO' AND column_default IS NULL",
            [table.into()],
        ),
    };

    let rows = conn.query_all(stmt).await?;
    rows.iter()
        .map(|row| {
            row.try_get::<String>("", "column_name")
                .map(|name| name.to_uppercase())
        })
        .collect()
}

/// List every column of a table, uppercased. Used to locate legacy columns
/// whose exact names vary between deployments (e.g. the user table's secret
/// column).
pub async fn table_columns<C: ConnectionTrait>(
    conn: &C,
    table: &str,
) -> Result<Vec<String>, DbErr> {
    let backend = conn.get_database_backend();
    let stmt = match backend {
        DbBackend::Sqlite => Statement::from_sql_and_values(
            backend,
            "SELECT name AS column_name FROM pragma_table_info(?)",
            [table.into()],
        ),
        DbBackend::Postgres => Statement::from_sql_and_values(
            backend,
            "SELECT column_name FROM information_schema.columns WHERE UPPER(table_name) = UPPER($1)",
            [table.into()],
        ),
        DbBackend::MySql => Statement::from_sql_and_values(
            backend,
            "SELECT column_name FROM information_schema.columns WHERE UPPER(table_name) = UPPER(?)",
            [table.into()],
        ),
    };

    let rows = conn.query_all(stmt).await?;
    rows.iter()
        .map(|row| {
            row.try_get::<String>("", "column_name")
                .map(|name| name.to_uppercase())
        })
        .collect()
}
