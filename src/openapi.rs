//! OpenAPI document and Swagger UI wiring.

use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::errors::ErrorResponse;
use crate::handlers::health::{ComponentHealth, ComponentStatus, HealthResponse};
use crate::handlers::stock::{
    AdjustStockBatchRequest, AdjustStockBatchResponse, AdjustStockRequest, AdjustStockResponse,
    BatchItemRequest, CreateInventoryRequest, CreateInventoryResponse, ProductListResponse,
};
use crate::handlers::users::{AuthRequest, AuthResponse};
use crate::services::catalog::{ProductDetail, ProductSummary};
use crate::services::directory::{AuthenticatedUser, UserSummary};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Estoque API",
        version = "0.1.0",
        description = "Stock adjustment service over a legacy inventory schema. \
            Adjustments are recorded as inventory headers plus movement lines; \
            the database materializes the running balance."
    ),
    paths(
        crate::handlers::stock::adjust_stock,
        crate::handlers::stock::adjust_stock_batch,
        crate::handlers::stock::create_inventory,
        crate::handlers::stock::list_products,
        crate::handlers::stock::get_product,
        crate::handlers::users::list_users,
        crate::handlers::users::authenticate,
        crate::handlers::health::health_check,
    ),
    components(schemas(
        AdjustStockRequest,
        AdjustStockResponse,
        AdjustStockBatchRequest,
        AdjustStockBatchResponse,
        BatchItemRequest,
        CreateInventoryRequest,
        CreateInventoryResponse,
        AuthRequest,
        AuthResponse,
        AuthenticatedUser,
        UserSummary,
        ProductSummary,
        ProductDetail,
        ProductListResponse,
        HealthResponse,
        ComponentHealth,
        ComponentStatus,
        ErrorResponse,
    )),
    tags(
        (name = "stock", description = "Stock adjustments and product reads"),
        (name = "users", description = "Legacy user directory"),
        (name = "health", description = "Service health"),
    )
)]
pub struct ApiDoc;

/// Swagger UI at `/docs`, document at `/api-docs/openapi.json`.
pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi())
}
