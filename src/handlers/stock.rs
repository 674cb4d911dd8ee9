//! Stock adjustment endpoints: single adjustment, batch adjustment,
//! header-only inventory creation, and product/balance reads.

use axum::{
    extract::{Json, Path, Query, State},
    routing::{get, post},
    Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::errors::{ApiError, ErrorResponse};
use crate::handlers::AppState;
use crate::services::catalog::{ProductDetail, ProductSummary};
use crate::services::ledger::{
    AdjustmentOutcome, AdjustmentRequest, BatchAdjustmentRequest, BatchItem, HeaderRequest,
};

const DEFAULT_SEARCH_LIMIT: u64 = 50;
const MAX_SEARCH_LIMIT: u64 = 500;
const MAX_BATCH_ITEMS: usize = 200;

pub fn stock_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/adjust", post(adjust_stock))
        .route("/adjust/batch", post(adjust_stock_batch))
        .route("/inventories", post(create_inventory))
        .route("/products", get(list_products))
        .route("/products/:id", get(get_product))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AdjustStockRequest {
    /// Company partition; the configured default applies when omitted
    pub company: Option<i64>,
    pub product: i64,
    /// Signed quantity change; zero is rejected
    #[schema(value_type = f64)]
    pub delta: Decimal,
    pub warehouse: Option<i64>,
    #[validate(length(max = 250))]
    pub reason: Option<String>,
    /// Numeric id of the user performing the adjustment
    pub acting_user: Option<i64>,
    /// Display label overriding the directory lookup
    #[validate(length(max = 100))]
    pub acting_user_label: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdjustStockResponse {
    pub product: i64,
    pub inventory_id: i64,
    pub movement_id: i64,
    #[schema(value_type = f64)]
    pub balance: Decimal,
}

impl From<AdjustmentOutcome> for AdjustStockResponse {
    fn from(outcome: AdjustmentOutcome) -> Self {
        Self {
            product: outcome.product,
            inventory_id: outcome.inventory_id,
            movement_id: outcome.movement_id,
            balance: outcome.new_balance,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BatchItemRequest {
    pub product: i64,
    #[schema(value_type = f64)]
    pub delta: Decimal,
    #[validate(length(max = 250))]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AdjustStockBatchRequest {
    pub company: Option<i64>,
    pub warehouse: Option<i64>,
    #[validate(length(max = 250))]
    pub reason: Option<String>,
    pub acting_user: Option<i64>,
    #[validate(length(max = 100))]
    pub acting_user_label: Option<String>,
    #[validate]
    pub items: Vec<BatchItemRequest>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdjustStockBatchResponse {
    pub inventory_id: i64,
    pub results: Vec<AdjustStockResponse>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateInventoryRequest {
    pub company: Option<i64>,
    pub warehouse: Option<i64>,
    #[validate(length(max = 250))]
    pub reason: Option<String>,
    pub acting_user: Option<i64>,
    #[validate(length(max = 100))]
    pub acting_user_label: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateInventoryResponse {
    pub inventory_id: i64,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ProductSearchParams {
    /// Description fragment or exact barcode
    #[serde(alias = "q")]
    pub query: Option<String>,
    pub limit: Option<u64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProductListResponse {
    pub count: usize,
    pub results: Vec<ProductSummary>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ProductDetailParams {
    pub company: Option<i64>,
}

/// Apply one signed stock adjustment and return the resulting balance.
#[utoipa::path(
    post,
    path = "/api/v1/stock/adjust",
    request_body = AdjustStockRequest,
    responses(
        (status = 200, description = "Adjustment applied", body = AdjustStockResponse),
        (status = 400, description = "Invalid payload", body = ErrorResponse),
        (status = 404, description = "No balance row for the product", body = ErrorResponse),
        (status = 409, description = "Concurrency conflict after retries", body = ErrorResponse),
        (status = 422, description = "Adjustment would drive stock negative", body = ErrorResponse),
    ),
    tag = "stock"
)]
pub async fn adjust_stock(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AdjustStockRequest>,
) -> Result<Json<AdjustStockResponse>, ApiError> {
    payload.validate()?;
    if payload.delta.is_zero() {
        return Err(ApiError::Validation("delta must be non-zero".into()));
    }

    let outcome = state
        .ledger
        .apply_adjustment(AdjustmentRequest {
            company: payload.company.unwrap_or(state.config.default_company),
            product: payload.product,
            warehouse: payload.warehouse,
            delta: payload.delta,
            acting_user_id: payload.acting_user,
            acting_user_label: payload.acting_user_label,
            reason: payload.reason,
            deadline: None,
        })
        .await?;

    Ok(Json(outcome.into()))
}

/// Apply several adjustments under one inventory header, atomically.
#[utoipa::path(
    post,
    path = "/api/v1/stock/adjust/batch",
    request_body = AdjustStockBatchRequest,
    responses(
        (status = 200, description = "Batch applied", body = AdjustStockBatchResponse),
        (status = 400, description = "Invalid payload", body = ErrorResponse),
        (status = 404, description = "No balance row for a product in the batch", body = ErrorResponse),
        (status = 409, description = "Concurrency conflict after retries", body = ErrorResponse),
    ),
    tag = "stock"
)]
pub async fn adjust_stock_batch(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AdjustStockBatchRequest>,
) -> Result<Json<AdjustStockBatchResponse>, ApiError> {
    payload.validate()?;
    if payload.items.is_empty() {
        return Err(ApiError::Validation("items must not be empty".into()));
    }
    if payload.items.len() > MAX_BATCH_ITEMS {
        return Err(ApiError::Validation(format!(
            "batch exceeds {} items",
            MAX_BATCH_ITEMS
        )));
    }
    if payload.items.iter().any(|item| item.delta.is_zero()) {
        return Err(ApiError::Validation("delta must be non-zero".into()));
    }

    let outcome = state
        .ledger
        .apply_adjustment_batch(BatchAdjustmentRequest {
            company: payload.company.unwrap_or(state.config.default_company),
            warehouse: payload.warehouse,
            items: payload
                .items
                .into_iter()
                .map(|item| BatchItem {
                    product: item.product,
                    delta: item.delta,
                    reason: item.reason,
                })
                .collect(),
            acting_user_id: payload.acting_user,
            acting_user_label: payload.acting_user_label,
            reason: payload.reason,
            deadline: None,
        })
        .await?;

    Ok(Json(AdjustStockBatchResponse {
        inventory_id: outcome.inventory_id,
        results: outcome.results.into_iter().map(Into::into).collect(),
    }))
}

/// Create an inventory header with no movement lines.
#[utoipa::path(
    post,
    path = "/api/v1/stock/inventories",
    request_body = CreateInventoryRequest,
    responses(
        (status = 201, description = "Header created", body = CreateInventoryResponse),
        (status = 409, description = "Concurrency conflict after retries", body = ErrorResponse),
    ),
    tag = "stock"
)]
pub async fn create_inventory(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateInventoryRequest>,
) -> Result<(axum::http::StatusCode, Json<CreateInventoryResponse>), ApiError> {
    payload.validate()?;

    let inventory_id = state
        .ledger
        .create_header(HeaderRequest {
            company: payload.company.unwrap_or(state.config.default_company),
            warehouse: payload.warehouse,
            acting_user_id: payload.acting_user,
            acting_user_label: payload.acting_user_label,
            reason: payload.reason,
        })
        .await?;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(CreateInventoryResponse { inventory_id }),
    ))
}

/// Search the product master by description fragment or exact barcode.
#[utoipa::path(
    get,
    path = "/api/v1/stock/products",
    params(ProductSearchParams),
    responses(
        (status = 200, description = "Matching products", body = ProductListResponse),
    ),
    tag = "stock"
)]
pub async fn list_products(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ProductSearchParams>,
) -> Result<Json<ProductListResponse>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
        .min(MAX_SEARCH_LIMIT);
    let results = state.catalog.search(params.query.as_deref(), limit).await?;
    Ok(Json(ProductListResponse {
        count: results.len(),
        results,
    }))
}

/// Product master row with its available balance for the company.
#[utoipa::path(
    get,
    path = "/api/v1/stock/products/{id}",
    params(
        ("id" = i64, Path, description = "Product id"),
        ProductDetailParams
    ),
    responses(
        (status = 200, description = "Product with balance", body = ProductDetail),
        (status = 404, description = "Unknown product", body = ErrorResponse),
    ),
    tag = "stock"
)]
pub async fn get_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(params): Query<ProductDetailParams>,
) -> Result<Json<ProductDetail>, ApiError> {
    let company = params.company.unwrap_or(state.config.default_company);
    state
        .catalog
        .get_with_stock(company, id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("product {} not found", id)))
}
