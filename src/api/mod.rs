//! HTTP routes.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::auth::Actor;
use crate::config::Config;
use crate::domain::aggregates::{Notification, Order, Product, Refund, Supplier, SupplierOrder};
use crate::error::{EcommerceError, Result};
use crate::services::catalog::{CreateProductRequest, CreateSupplierRequest, UpdateProductRequest};
use crate::services::dropship::{ShipRequest, UpdateSupplierOrderRequest};
use crate::services::notifications::list_notifications;
use crate::services::orders::{OrderView, PlaceOrderRequest};
use crate::services::payments::StartedPayment;
use crate::services::refunds::{ManualRefundRequest, ProcessRefundRequest};
use crate::services::Services;
use crate::store::{Page, Store};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub services: Services,
    pub config: Arc<Config>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "dropship-commerce"})) }))
        .route("/api/v1/products", get(list_products).post(create_product))
        .route("/api/v1/products/:id", get(get_product).put(update_product))
        .route("/api/v1/suppliers", get(list_suppliers).post(create_supplier))
        .route("/api/v1/suppliers/:id", get(get_supplier))
        .route("/api/v1/orders", get(list_orders).post(place_order))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/orders/:id/cancel", post(cancel_order))
        .route("/api/v1/orders/:id/payments", post(start_payment))
        .route("/api/v1/orders/:id/refunds", get(list_refunds).post(process_refund))
        .route("/api/v1/orders/:id/refunds/manual", post(record_manual_refund))
        .route("/api/v1/orders/:id/supplier-orders", get(order_supplier_orders))
        .route("/api/v1/orders/:id/ship", post(ship_in_house))
        .route("/api/v1/supplier-orders", get(list_supplier_orders))
        .route("/api/v1/supplier-orders/:id", put(update_supplier_order))
        .route("/api/v1/notifications", get(notifications))
        .route("/webhooks/stripe", post(stripe_webhook))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> { pub data: Vec<T>, pub total: i64, pub page: u32 }

impl<T> PaginatedResponse<T> {
    fn new((data, total): (Vec<T>, i64), page: Page) -> Json<Self> { Json(Self { data, total, page: page.number() }) }
}

#[derive(Debug, Deserialize)] pub struct SupplierOrderParams { pub page: Option<u32>, pub per_page: Option<u32>, pub supplier_id: Option<Uuid> }
#[derive(Debug, Deserialize)] pub struct NotificationParams { pub page: Option<u32>, pub per_page: Option<u32>, pub recipient: Option<String> }

async fn list_products(State(s): State<AppState>, Query(p): Query<Page>) -> Result<Json<PaginatedResponse<Product>>> {
    Ok(PaginatedResponse::new(s.services.catalog.list_products(p).await?, p))
}

async fn get_product(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Product>> {
    s.services.catalog.get_product(id).await.map(Json)
}

async fn create_product(State(s): State<AppState>, actor: Actor, Json(r): Json<CreateProductRequest>) -> Result<(StatusCode, Json<Product>)> {
    Ok((StatusCode::CREATED, Json(s.services.catalog.create_product(&actor, r).await?)))
}

async fn update_product(State(s): State<AppState>, actor: Actor, Path(id): Path<Uuid>, Json(r): Json<UpdateProductRequest>) -> Result<Json<Product>> {
    s.services.catalog.update_product(&actor, id, r).await.map(Json)
}

async fn list_suppliers(State(s): State<AppState>, actor: Actor) -> Result<Json<Vec<Supplier>>> {
    s.services.catalog.list_suppliers(&actor).await.map(Json)
}

async fn get_supplier(State(s): State<AppState>, actor: Actor, Path(id): Path<Uuid>) -> Result<Json<Supplier>> {
    s.services.catalog.get_supplier(&actor, id).await.map(Json)
}

async fn create_supplier(State(s): State<AppState>, actor: Actor, Json(r): Json<CreateSupplierRequest>) -> Result<(StatusCode, Json<Supplier>)> {
    Ok((StatusCode::CREATED, Json(s.services.catalog.create_supplier(&actor, r).await?)))
}

async fn list_orders(State(s): State<AppState>, actor: Actor, Query(p): Query<Page>) -> Result<Json<PaginatedResponse<Order>>> {
    Ok(PaginatedResponse::new(s.services.orders.list_orders(&actor, p).await?, p))
}

async fn get_order(State(s): State<AppState>, actor: Actor, Path(id): Path<Uuid>) -> Result<Json<OrderView>> {
    s.services.orders.get_order(&actor, id).await.map(Json)
}

async fn place_order(State(s): State<AppState>, actor: Actor, Json(r): Json<PlaceOrderRequest>) -> Result<(StatusCode, Json<Order>)> {
    Ok((StatusCode::CREATED, Json(s.services.orders.place_order(&actor, r).await?)))
}

async fn cancel_order(State(s): State<AppState>, actor: Actor, Path(id): Path<Uuid>) -> Result<Json<Order>> {
    s.services.orders.cancel_order(&actor, id).await.map(Json)
}

async fn start_payment(State(s): State<AppState>, actor: Actor, Path(id): Path<Uuid>) -> Result<(StatusCode, Json<StartedPayment>)> {
    Ok((StatusCode::CREATED, Json(s.services.payments.start_payment(&actor, id).await?)))
}

async fn list_refunds(State(s): State<AppState>, actor: Actor, Path(id): Path<Uuid>) -> Result<Json<Vec<Refund>>> {
    s.services.refunds.list_refunds(&actor, id).await.map(Json)
}

async fn process_refund(State(s): State<AppState>, actor: Actor, Path(id): Path<Uuid>, Json(r): Json<ProcessRefundRequest>) -> Result<(StatusCode, Json<Refund>)> {
    Ok((StatusCode::CREATED, Json(s.services.refunds.process_refund(&actor, id, r).await?)))
}

async fn record_manual_refund(State(s): State<AppState>, actor: Actor, Path(id): Path<Uuid>, Json(r): Json<ManualRefundRequest>) -> Result<(StatusCode, Json<Refund>)> {
    Ok((StatusCode::CREATED, Json(s.services.refunds.record_manual_refund(&actor, id, r).await?)))
}

async fn order_supplier_orders(State(s): State<AppState>, actor: Actor, Path(id): Path<Uuid>) -> Result<Json<Vec<SupplierOrder>>> {
    s.services.dropship.list_for_order(&actor, id).await.map(Json)
}

async fn ship_in_house(State(s): State<AppState>, actor: Actor, Path(id): Path<Uuid>, Json(r): Json<ShipRequest>) -> Result<Json<Order>> {
    s.services.dropship.mark_in_house_shipped(&actor, id, r).await.map(Json)
}

async fn list_supplier_orders(State(s): State<AppState>, actor: Actor, Query(p): Query<SupplierOrderParams>) -> Result<Json<PaginatedResponse<SupplierOrder>>> {
    let page = Page { page: p.page, per_page: p.per_page };
    Ok(PaginatedResponse::new(s.services.dropship.list_for_supplier(&actor, p.supplier_id, page).await?, page))
}

async fn update_supplier_order(State(s): State<AppState>, actor: Actor, Path(id): Path<Uuid>, Json(r): Json<UpdateSupplierOrderRequest>) -> Result<Json<SupplierOrder>> {
    s.services.dropship.update_supplier_order(&actor, id, r).await.map(Json)
}

async fn notifications(State(s): State<AppState>, actor: Actor, Query(p): Query<NotificationParams>) -> Result<Json<PaginatedResponse<Notification>>> {
    let page = Page { page: p.page, per_page: p.per_page };
    Ok(PaginatedResponse::new(list_notifications(s.store.as_ref(), &actor, p.recipient.as_deref(), page).await?, page))
}

/// Unauthenticated: the signature over the raw body is the credential.
async fn stripe_webhook(State(s): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Json<serde_json::Value>> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(EcommerceError::WebhookSignature)?;
    s.services.payments.handle_webhook(&body, signature).await?;
    Ok(Json(serde_json::json!({"received": true})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{fixture, Fixture};
    use axum::body::Body;
    use axum::http::{header, Request, Response};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app(f: &Fixture) -> Router {
        router(AppState { store: f.store.clone(), services: f.services.clone(), config: Arc::new(f.config.clone()) })
    }

    fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        match body {
            Some(b) => builder.header(header::CONTENT_TYPE, "application/json").body(Body::from(b.to_string())).unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(response: Response<Body>) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let f = fixture().await;
        let response = app(&f).oneshot(request("GET", "/health", None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_last_possible_page_is_empty() {
        let f = fixture().await;
        let response = app(&f).oneshot(request("GET", "/api/v1/products?page=4294967295", None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["data"].as_array().map(Vec::len), Some(0));
        assert_eq!(body["page"], 4294967295u64);
    }

    #[tokio::test]
    async fn test_authentication_and_permissions() {
        let f = fixture().await;
        let response = app(&f).oneshot(request("GET", "/api/v1/orders", None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = app(&f).oneshot(request("GET", "/api/v1/orders", Some("bogus"), None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let product = json!({"sku": "HAT-1", "name": "Hat", "price": "15.00"});
        let response = app(&f).oneshot(request("POST", "/api/v1/products", Some("customer-token"), Some(product.clone()))).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let response = app(&f).oneshot(request("POST", "/api/v1/products", Some("staff-token"), Some(product))).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_place_and_read_order() {
        let f = fixture().await;
        let body = json!({"items": [{"product_id": f.shirt.id, "quantity": 1}, {"product_id": f.mug.id, "quantity": 1}]});
        let response = app(&f).oneshot(request("POST", "/api/v1/orders", Some("customer-token"), Some(body))).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let order = json_body(response).await;
        assert_eq!(order["status"], "pending");
        assert_eq!(order["total"]["amount"], "65.00");

        let uri = format!("/api/v1/orders/{}", order["id"].as_str().unwrap());
        let response = app(&f).oneshot(request("GET", &uri, Some("customer-token"), None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let view = json_body(response).await;
        assert_eq!(view["order_number"], order["order_number"]);
        assert!(view["payments"].as_array().unwrap().is_empty());

        let response = app(&f).oneshot(request("GET", "/api/v1/orders?per_page=5", Some("customer-token"), None)).await.unwrap();
        let list = json_body(response).await;
        assert_eq!(list["total"], 1);
        assert_eq!(list["page"], 1);
    }

    #[tokio::test]
    async fn test_empty_order_is_unprocessable() {
        let f = fixture().await;
        let response = app(&f).oneshot(request("POST", "/api/v1/orders", Some("customer-token"), Some(json!({"items": []})))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(json_body(response).await["error"].as_str().unwrap().contains("validation"));
    }

    #[tokio::test]
    async fn test_webhook_signature_is_checked() {
        let f = fixture().await;
        let payload = json!({"type": "customer.created", "data": {"object": {}}}).to_string();
        let unsigned = Request::builder().method("POST").uri("/webhooks/stripe").body(Body::from(payload.clone())).unwrap();
        assert_eq!(app(&f).oneshot(unsigned).await.unwrap().status(), StatusCode::BAD_REQUEST);

        let signed = Request::builder()
            .method("POST")
            .uri("/webhooks/stripe")
            .header("Stripe-Signature", f.signed(&payload))
            .body(Body::from(payload))
            .unwrap();
        let response = app(&f).oneshot(signed).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["received"], true);
    }

    #[tokio::test]
    async fn test_refund_over_http() {
        let f = fixture().await;
        let order = f.pay(&f.place_order().await).await;
        let uri = format!("/api/v1/orders/{}/refunds", order.id);

        let body = json!({"amount": "10.00", "reason": "late delivery"});
        let response = app(&f).oneshot(request("POST", &uri, Some("staff-token"), Some(body.clone()))).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let response = app(&f).oneshot(request("POST", &uri, Some("admin-token"), Some(body))).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(json_body(response).await["status"], "succeeded");

        let response = app(&f).oneshot(request("GET", &uri, Some("customer-token"), None)).await.unwrap();
        assert_eq!(json_body(response).await.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_supplier_flow_over_http() {
        let f = fixture().await;
        let order = f.pay(&f.place_order().await).await;
        let response = app(&f).oneshot(request("GET", "/api/v1/supplier-orders", Some("supplier-token"), None)).await.unwrap();
        let list = json_body(response).await;
        assert_eq!(list["total"], 1);
        let id = list["data"][0]["id"].as_str().unwrap().to_string();

        let body = json!({"status": "shipped", "tracking_number": "1Z42", "carrier": "UPS"});
        let response = app(&f).oneshot(request("PUT", &format!("/api/v1/supplier-orders/{id}"), Some("supplier-token"), Some(body))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "shipped");
        assert_eq!(f.order(order.id).await.fulfillment_status.as_str(), "partial");

        let response = app(&f).oneshot(request("GET", "/api/v1/notifications", Some("supplier-token"), None)).await.unwrap();
        assert_eq!(json_body(response).await["data"][0]["kind"], "supplier_order_created");
    }
}
