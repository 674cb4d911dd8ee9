//! Inventory header creation against a table whose full mandatory-column
//! set is not statically known.
//!
//! Primary path: probe the table's NOT-NULL columns once and pre-fill
//! synthesized defaults before the first insert. Compatibility path: when a
//! rejection still names a column (probe disabled, or a constraint the probe
//! cannot see), synthesize a default for it and retry, bounded.

use sea_orm::{ConnectionTrait, DatabaseTransaction, Value};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::db::raw_stmt;
use crate::errors::{is_lock_conflict, is_unique_violation, LedgerError};
use crate::schema;

/// Caller-supplied facts about the header being created.
#[derive(Debug, Clone, Default)]
pub struct HeaderSpec {
    pub company: i64,
    pub warehouse: i64,
    pub acting_user_id: Option<i64>,
    pub acting_user_label: Option<String>,
    pub reason: Option<String>,
}

const DEFAULT_REASON: &str = "Inventário gerado automaticamente para ajuste";

impl HeaderSpec {
    /// Display label written into the USUARIO column: explicit label, else
    /// the numeric id's string form, else "API".
    pub fn user_label(&self) -> String {
        self.acting_user_label
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| self.acting_user_id.map(|id| id.to_string()))
            .unwrap_or_else(|| "API".to_string())
    }

    /// Base column set for the insert. Never dropped, only extended.
    fn base_columns(&self, inventory_id: i64) -> Vec<(String, Value)> {
        let mut cols: Vec<(String, Value)> = vec![
            (schema::COMPANY_COL.into(), self.company.into()),
            (schema::INVENTORY_ID_COL.into(), inventory_id.into()),
            ("IDALMOX".into(), self.warehouse.into()),
            ("TIPO".into(), "AJU".into()),
            ("SITUACAO".into(), "ABERTO".into()),
            ("USUARIO".into(), self.user_label().into()),
            (
                "OBS".into(),
                self.reason
                    .clone()
                    .unwrap_or_else(|| DEFAULT_REASON.to_string())
                    .into(),
            ),
        ];
        if let Some(user_id) = self.acting_user_id {
            cols.push(("IDUSUARIO".into(), user_id.into()));
        }
        cols
    }
}

/// Inserts TESTINVENTARIO rows, adapting to mandatory columns discovered at
/// runtime. One instance is shared per service so the metadata probe runs at
/// most once per process.
#[derive(Debug)]
pub struct AdaptiveHeaderInserter {
    max_attempts: u32,
    introspect: bool,
    required: OnceCell<Vec<String>>,
}

impl AdaptiveHeaderInserter {
    pub fn new(max_attempts: u32, introspect: bool) -> Self {
        Self {
            max_attempts,
            introspect,
            required: OnceCell::new(),
        }
    }

    /// Insert one header row with the given identifier.
    ///
    /// A uniqueness rejection is an identifier collision for the caller's
    /// retry loop, never adaptation input.
    pub async fn insert_header(
        &self,
        txn: &DatabaseTransaction,
        spec: &HeaderSpec,
        inventory_id: i64,
    ) -> Result<(), LedgerError> {
        let label = spec.user_label();
        let mut columns = spec.base_columns(inventory_id);

        if self.introspect {
            let required = self
                .required
                .get_or_init(|| async {
                    match schema::required_columns(txn, schema::INVENTORY_TABLE).await {
                        Ok(cols) => cols,
                        Err(err) => {
                            warn!(
                                "metadata probe on {} failed, falling back to rejection parsing: {}",
                                schema::INVENTORY_TABLE,
                                err
                            );
                            Vec::new()
                        }
                    }
                })
                .await;

            for col in required {
                if !columns.iter().any(|(name, _)| name.eq_ignore_ascii_case(col)) {
                    columns.push((col.clone(), schema::synthesize_default(col, &label)));
                }
            }
        }

        let mut last_column: Option<String> = None;

        for attempt in 1..=self.max_attempts {
            let names: Vec<&str> = columns.iter().map(|(name, _)| name.as_str()).collect();
            let placeholders = vec!["?"; columns.len()].join(", ");
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                schema::INVENTORY_TABLE,
                names.join(", "),
                placeholders
            );
            let values = columns.iter().map(|(_, value)| value.clone());
            let stmt = raw_stmt(txn.get_database_backend(), &sql, values);

            match txn.execute(stmt).await {
                Ok(_) => return Ok(()),
                Err(err) if is_unique_violation(&err) => {
                    return Err(LedgerError::IdentifierCollision {
                        table: schema::INVENTORY_TABLE,
                        id: inventory_id,
                    });
                }
                Err(err) => {
                    let message = err.to_string();
                    let Some(col) = schema::parse_missing_column(&message) else {
                        if is_lock_conflict(&err) {
                            return Err(LedgerError::LockConflict(message));
                        }
                        return Err(LedgerError::Adjustment(message));
                    };

                    debug!(
                        attempt,
                        column = %col,
                        "header insert rejected; synthesizing default"
                    );
                    let default = schema::synthesize_default(&col, &label);
                    match columns
                        .iter_mut()
                        .find(|(name, _)| name.eq_ignore_ascii_case(&col))
                    {
                        // The same column keeps failing; keep the bounded
                        // loop going so exhaustion is reported, not a hang.
                        Some((_, value)) => *value = default,
                        None => columns.push((col.clone(), default)),
                    }
                    last_column = Some(col);
                }
            }
        }

        Err(LedgerError::SchemaAdaptationExhausted {
            attempts: self.max_attempts,
            last_column,
        })
    }
}
