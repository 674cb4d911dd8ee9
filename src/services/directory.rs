//! Legacy user directory: active-user listing, acting-user label
//! resolution, and the credential-verification heuristic carried over from
//! the system this API fronts. Deployments of the legacy schema store the
//! secret under varying column names and encodings, so verification probes
//! the table and tries a fixed set of comparison strategies.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use sea_orm::{ConnectionTrait, FromQueryResult};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;
use utoipa::ToSchema;

use crate::db::{raw_stmt, DbPool};
use crate::errors::ApiError;
use crate::schema;

#[derive(Debug, Clone, Serialize, FromQueryResult, ToSchema)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    pub name: String,
    pub active: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AuthenticatedUser {
    pub id: i64,
    pub username: String,
    pub name: String,
}

/// Outcome of a credential check. Everything except `Accepted` maps to 401
/// at the HTTP layer; the variants exist so the reason can be logged.
#[derive(Debug)]
pub enum CredentialOutcome {
    Accepted(AuthenticatedUser),
    NotFound,
    NoSecretColumn,
    Rejected,
}

/// Column names commonly holding the secret in legacy deployments, in
/// preference order.
const SECRET_COLUMN_CANDIDATES: &[&str] = &[
    "SENHA",
    "PASSWORD",
    "PWD",
    "PASSWD",
    "PASS",
    "SENHA_HASH",
    "HASH",
    "SENHA_MD5",
    "PASSWORD_HASH",
];

#[derive(Debug, Clone)]
pub struct UserDirectory {
    db: Arc<DbPool>,
}

impl UserDirectory {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Active users, ordered by display name.
    pub async fn list_active_users(&self) -> Result<Vec<UserSummary>, ApiError> {
        let stmt = raw_stmt(
            self.db.get_database_backend(),
            &format!(
                "SELECT CAST(IDUSUARIO AS BIGINT) AS id, \
                 TRIM(COALESCE(USUARIO, '')) AS username, \
                 TRIM(COALESCE(NOME, '')) AS name, \
                 COALESCE(UPPER(ATIVO), 'N') AS active \
                 FROM {} WHERE COALESCE(UPPER(ATIVO), 'N') = 'S' ORDER BY NOME",
                schema::USER_TABLE
            ),
            [],
        );

        let rows = self.db.query_all(stmt).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(UserSummary::from_query_result(row, "")?);
        }
        Ok(out)
    }

    /// Resolve a display label outside any transaction: an explicit label
    /// wins, else the directory is consulted, else `None` and the caller
    /// applies its own fallback.
    pub async fn resolve_label(
        &self,
        acting_user_id: Option<i64>,
        acting_user_label: Option<&str>,
    ) -> Option<String> {
        if let Some(label) = acting_user_label.map(str::trim).filter(|l| !l.is_empty()) {
            return Some(label.to_string());
        }
        let user_id = acting_user_id?;
        lookup_label(self.db.as_ref(), user_id).await
    }

    /// Verify a login (username or numeric id) against the stored secret.
    pub async fn verify_credentials(
        &self,
        login: &str,
        password: &str,
    ) -> Result<CredentialOutcome, ApiError> {
        let login = login.trim();
        if login.is_empty() || password.is_empty() {
            return Ok(CredentialOutcome::Rejected);
        }

        let columns = schema::table_columns(self.db.as_ref(), schema::USER_TABLE).await?;
        let secret_col = SECRET_COLUMN_CANDIDATES
            .iter()
            .find(|cand| columns.iter().any(|c| c == *cand))
            .map(|c| c.to_string())
            .or_else(|| {
                columns
                    .iter()
                    .find(|c| c.contains("SENH") || c.contains("PASS"))
                    .cloned()
            });
        let Some(secret_col) = secret_col else {
            return Ok(CredentialOutcome::NoSecretColumn);
        };

        let stmt = raw_stmt(
            self.db.get_database_backend(),
            &format!(
                "SELECT CAST(IDUSUARIO AS BIGINT) AS id, \
                 TRIM(COALESCE(USUARIO, '')) AS username, \
                 TRIM(COALESCE(NOME, '')) AS name, \
                 {secret_col} AS secret \
                 FROM {} WHERE (USUARIO = ? OR CAST(IDUSUARIO AS VARCHAR(50)) = ?) \
                 AND COALESCE(UPPER(ATIVO), 'N') = 'S'",
                schema::USER_TABLE
            ),
            [login.into(), login.into()],
        );

        let Some(row) = self.db.query_one(stmt).await? else {
            return Ok(CredentialOutcome::NotFound);
        };

        let stored = row
            .try_get::<Option<String>>("", "secret")?
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let Some(stored) = stored else {
            return Ok(CredentialOutcome::NoSecretColumn);
        };

        if secret_matches(&stored, password) {
            let user = AuthenticatedUser {
                id: row.try_get("", "id")?,
                username: row.try_get("", "username")?,
                name: row.try_get("", "name")?,
            };
            debug!(user = %user.username, "credentials accepted");
            Ok(CredentialOutcome::Accepted(user))
        } else {
            Ok(CredentialOutcome::Rejected)
        }
    }
}

/// Tolerant in-transaction label lookup used by the adjustment orchestrator:
/// failures resolve to `None`, never abort the adjustment.
pub(crate) async fn lookup_label<C: ConnectionTrait>(conn: &C, user_id: i64) -> Option<String> {
    let stmt = raw_stmt(
        conn.get_database_backend(),
        &format!(
            "SELECT COALESCE(NOME, USUARIO) AS label FROM {} WHERE IDUSUARIO = ?",
            schema::USER_TABLE
        ),
        [user_id.into()],
    );
    let row = conn.query_one(stmt).await.ok().flatten()?;
    row.try_get::<Option<String>>("", "label")
        .ok()
        .flatten()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
}

/// Comparison strategies tried in order against the stored secret.
fn secret_matches(stored: &str, password: &str) -> bool {
    if password == stored {
        return true;
    }

    let digest = hex::encode(Sha256::digest(password.as_bytes()));
    if digest.eq_ignore_ascii_case(stored) {
        return true;
    }

    let b64 = base64::engine::general_purpose::STANDARD.encode(password.as_bytes());
    if b64 == stored {
        return true;
    }
    let b64url = base64::engine::general_purpose::URL_SAFE.encode(password.as_bytes());
    if b64url == stored {
        return true;
    }

    if password.chars().rev().collect::<String>() == stored {
        return true;
    }

    segment_mapping(stored, password).is_some()
}

/// Check whether `stored` decomposes into one contiguous segment per
/// character of `plain` under a consistent, injective char-to-segment map
/// (legacy schemes encode each password character as a fixed substring).
/// Returns the mapping when one exists.
pub fn segment_mapping(stored: &str, plain: &str) -> Option<HashMap<char, String>> {
    let stored: Vec<char> = stored.chars().collect();
    let plain: Vec<char> = plain.chars().collect();
    if plain.is_empty() || stored.is_empty() || plain.len() > stored.len() {
        return None;
    }

    let mut mapping: HashMap<char, String> = HashMap::new();
    let mut reverse: HashMap<String, char> = HashMap::new();
    if assign(&stored, 0, &plain, 0, &mut mapping, &mut reverse) {
        Some(mapping)
    } else {
        None
    }
}

/// Depth-first segment assignment with consistency pruning: each plain
/// character must always map to the same segment and no two characters may
/// share one.
fn assign(
    stored: &[char],
    pos: usize,
    plain: &[char],
    idx: usize,
    mapping: &mut HashMap<char, String>,
    reverse: &mut HashMap<String, char>,
) -> bool {
    if idx == plain.len() {
        return pos == stored.len();
    }
    let remaining_chars = plain.len() - idx;
    let remaining_budget = stored.len() - pos;
    if remaining_budget < remaining_chars {
        return false;
    }

    let ch = plain[idx];
    // Each later character needs at least one stored character.
    let max_len = remaining_budget - (remaining_chars - 1);

    if let Some(expected) = mapping.get(&ch).cloned() {
        let len = expected.chars().count();
        if len > max_len || stored[pos..pos + len].iter().collect::<String>() != expected {
            return false;
        }
        return assign(stored, pos + len, plain, idx + 1, mapping, reverse);
    }

    for len in 1..=max_len {
        let segment: String = stored[pos..pos + len].iter().collect();
        if reverse.contains_key(&segment) {
            continue;
        }
        mapping.insert(ch, segment.clone());
        reverse.insert(segment.clone(), ch);
        if assign(stored, pos + len, plain, idx + 1, mapping, reverse) {
            return true;
        }
        mapping.remove(&ch);
        reverse.remove(&segment);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_and_reversed_match() {
        assert!(secret_matches("1425", "1425"));
        assert!(secret_matches("5241", "1425"));
    }

    #[test]
    fn sha256_hex_matches() {
        let stored = hex::encode(Sha256::digest(b"senha123"));
        assert!(secret_matches(&stored, "senha123"));
        assert!(secret_matches(&stored.to_uppercase(), "senha123"));
    }

    #[test]
    fn base64_matches() {
        assert!(secret_matches("c2VuaGExMjM=", "senha123"));
    }

    #[test]
    fn url_safe_base64_matches() {
        // ">>>???" encodes with '+'/'/' in the standard alphabet and
        // '-'/'_' in the url-safe one; only the url-safe branch accepts it.
        let plain = ">>>???";
        let stored = base64::engine::general_purpose::URL_SAFE.encode(plain.as_bytes());
        assert_eq!(stored, "Pj4-Pz8_");
        assert_ne!(
            stored,
            base64::engine::general_purpose::STANDARD.encode(plain.as_bytes())
        );
        assert!(secret_matches(&stored, plain));
    }

    #[test]
    fn segment_mapping_uniform_segments() {
        // Each character maps to a distinct 3-char segment.
        let mapping = segment_mapping("X05E03C01", "142").expect("mapping");
        assert_eq!(mapping[&'1'], "X05");
        assert_eq!(mapping[&'4'], "E03");
        assert_eq!(mapping[&'2'], "C01");
    }

    #[test]
    fn segment_mapping_repeated_char_must_reuse_segment() {
        // '1' appears twice and must map to the same segment both times.
        assert!(segment_mapping("ABAB", "11").is_some());
        assert!(segment_mapping("ABCD", "11").is_none());
    }

    #[test]
    fn segment_mapping_rejects_non_injective() {
        // Two different characters may not share a segment.
        assert!(segment_mapping("AA", "12").is_none());
    }

    #[test]
    fn segment_mapping_trivial_one_to_one() {
        assert!(segment_mapping("WXYZ", "1425").is_some());
    }

    #[test]
    fn segment_mapping_rejects_impossible_shapes() {
        assert!(segment_mapping("", "12").is_none());
        assert!(segment_mapping("A", "12").is_none());
        assert!(segment_mapping("ABC", "").is_none());
    }
}
