//! Read-only access to the product master and the materialized stock
//! balance. The balance is never written here; the database recomputes it as
//! movement lines land.

use std::sync::Arc;

use rust_decimal::Decimal;
use sea_orm::{ConnectionTrait, DbErr, FromQueryResult};
use serde::Serialize;
use utoipa::ToSchema;

use crate::db::{raw_stmt, DbPool};
use crate::errors::ApiError;
use crate::schema;

#[derive(Debug, Clone, Serialize, FromQueryResult, ToSchema)]
pub struct ProductSummary {
    pub id: i64,
    pub description: String,
    pub barcode: String,
    #[schema(value_type = f64)]
    pub sale_price: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProductDetail {
    pub id: i64,
    pub description: String,
    pub barcode: String,
    #[schema(value_type = f64)]
    pub sale_price: Decimal,
    pub company: i64,
    #[schema(value_type = f64)]
    pub available: Decimal,
}

const PRODUCT_PROJECTION: &str = "CAST(P.IDPRODUTO AS BIGINT) AS id, \
     TRIM(P.DESCRICAO) AS description, \
     TRIM(COALESCE(P.CODBARRAS, '')) AS barcode, \
     COALESCE(P.PRECOVENDA, 0) AS sale_price";

/// Product catalog reads. This engine never writes TESTPRODUTO.
#[derive(Debug, Clone)]
pub struct ProductCatalog {
    db: Arc<DbPool>,
}

impl ProductCatalog {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// LIKE search on the uppercased description, or an exact barcode match.
    pub async fn search(
        &self,
        query: Option<&str>,
        limit: u64,
    ) -> Result<Vec<ProductSummary>, ApiError> {
        let backend = self.db.get_database_backend();
        let q = query.map(str::trim).filter(|q| !q.is_empty());

        let stmt = match q {
            Some(q) => raw_stmt(
                backend,
                &format!(
                    "SELECT {PRODUCT_PROJECTION} FROM {} P \
                     WHERE (UPPER(P.DESCRICAO) LIKE ? OR COALESCE(P.CODBARRAS, '') = ?) \
                     ORDER BY P.IDPRODUTO LIMIT ?",
                    schema::PRODUCT_TABLE
                ),
                [
                    format!("%{}%", q.to_uppercase()).into(),
                    q.into(),
                    (limit as i64).into(),
                ],
            ),
            None => raw_stmt(
                backend,
                &format!(
                    "SELECT {PRODUCT_PROJECTION} FROM {} P ORDER BY P.IDPRODUTO LIMIT ?",
                    schema::PRODUCT_TABLE
                ),
                [(limit as i64).into()],
            ),
        };

        let rows = self.db.query_all(stmt).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(ProductSummary::from_query_result(row, "")?);
        }
        Ok(out)
    }

    /// Product master row joined with its available balance for the company.
    /// Missing balance row reads as zero here; only the adjustment path
    /// treats it as fatal.
    pub async fn get_with_stock(
        &self,
        company: i64,
        product: i64,
    ) -> Result<Option<ProductDetail>, ApiError> {
        let backend = self.db.get_database_backend();
        let stmt = raw_stmt(
            backend,
            &format!(
                "SELECT {PRODUCT_PROJECTION} FROM {} P WHERE P.IDPRODUTO = ?",
                schema::PRODUCT_TABLE
            ),
            [product.into()],
        );

        let Some(row) = self.db.query_one(stmt).await? else {
            return Ok(None);
        };
        let summary = ProductSummary::from_query_result(&row, "")?;

        let available = read_balance(self.db.as_ref(), company, product)
            .await?
            .unwrap_or(Decimal::ZERO);

        Ok(Some(ProductDetail {
            id: summary.id,
            description: summary.description,
            barcode: summary.barcode,
            sale_price: summary.sale_price,
            company,
            available,
        }))
    }
}

/// Balance Reader: keyed lookup against the materialized stock balance.
/// `None` means the (company, product) key was never initialized.
pub async fn read_balance<C: ConnectionTrait>(
    conn: &C,
    company: i64,
    product: i64,
) -> Result<Option<Decimal>, DbErr> {
    let stmt = raw_stmt(
        conn.get_database_backend(),
        &format!(
            "SELECT COALESCE({qty}, 0) AS balance FROM {table} WHERE {company} = ? AND {product} = ?",
            qty = schema::QTY_COL,
            table = schema::STOCK_BALANCE_TABLE,
            company = schema::COMPANY_COL,
            product = schema::PRODUCT_KEY_COL,
        ),
        [company.into(), product.into()],
    );

    match conn.query_one(stmt).await? {
        Some(row) => Ok(Some(row.try_get::<Decimal>("", "balance")?)),
        None => Ok(None),
    }
}

/// Trimmed product description, used as the fallback movement-line label in
/// batches.
pub async fn product_description<C: ConnectionTrait>(
    conn: &C,
    product: i64,
) -> Result<Option<String>, DbErr> {
    let stmt = raw_stmt(
        conn.get_database_backend(),
        &format!(
            "SELECT TRIM(DESCRICAO) AS description FROM {} WHERE IDPRODUTO = ?",
            schema::PRODUCT_TABLE
        ),
        [product.into()],
    );

    match conn.query_one(stmt).await? {
        Some(row) => Ok(Some(row.try_get::<String>("", "description")?)),
        None => Ok(None),
    }
}
