//! Coin exchange endpoints
//!
//! - `POST /api/v1/payments/orders` - open a purchase order
//! - `POST /api/v1/payments/verify` - confirm a signed payment, credit coins
//! - `POST /api/v1/sales` - sell coins back (debited immediately)
//! - `POST /api/v1/admin/sales/{id}/paid` - admin marks a sale paid out

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Deserialize;

use crate::routes::{json_response, parse_json};
use crate::server::AppState;
use crate::types::Result;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateOrderRequest {
    coin_amount: i64,
    fiat_amount: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyPaymentRequest {
    order_ref: String,
    payment_ref: String,
    signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSaleRequest {
    coin_amount: i64,
}

pub async fn create_order(
    state: &AppState,
    actor: &str,
    body: &Bytes,
) -> Result<Response<Full<Bytes>>> {
    let request: CreateOrderRequest = parse_json(body)?;
    let order = state
        .exchange
        .initiate_purchase(actor, request.coin_amount, request.fiat_amount)
        .await?;
    Ok(json_response(StatusCode::CREATED, &order))
}

pub async fn verify_payment(
    state: &AppState,
    actor: &str,
    body: &Bytes,
) -> Result<Response<Full<Bytes>>> {
    let request: VerifyPaymentRequest = parse_json(body)?;
    let confirmation = state
        .exchange
        .confirm_purchase(
            actor,
            &request.order_ref,
            &request.payment_ref,
            &request.signature,
        )
        .await?;
    Ok(json_response(StatusCode::OK, &confirmation))
}

pub async fn create_sale(
    state: &AppState,
    actor: &str,
    body: &Bytes,
) -> Result<Response<Full<Bytes>>> {
    let request: CreateSaleRequest = parse_json(body)?;
    let receipt = state.exchange.initiate_sale(actor, request.coin_amount).await?;
    Ok(json_response(StatusCode::CREATED, &receipt))
}

pub async fn mark_sale_paid(
    state: &AppState,
    actor: &str,
    sale_id: &str,
) -> Result<Response<Full<Bytes>>> {
    let sale = state.exchange.mark_sale_paid(sale_id, actor).await?;
    Ok(json_response(StatusCode::OK, &sale))
}
