use crate::{
    error::PaymentError,
    middleware::UserId,
    models::{
        ConfirmPaymentRequest, ConfirmPaymentResponse, InitiatePaymentRequest,
        InitiatePaymentResponse, PaymentRecord, PaymentStatusResponse,
    },
    services::PaymentService,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use std::sync::Arc;
use uuid::Uuid;

pub async fn initiate_payment(
    State(payments): State<Arc<PaymentService>>,
    Extension(UserId(user_id)): Extension<UserId>,
    Json(request): Json<InitiatePaymentRequest>,
) -> Result<(StatusCode, Json<InitiatePaymentResponse>), PaymentError> {
    let response = payments.initiate(user_id, request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn payment_status(
    State(payments): State<Arc<PaymentService>>,
    Extension(UserId(user_id)): Extension<UserId>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<PaymentStatusResponse>, PaymentError> {
    Ok(Json(payments.get_status(user_id, payment_id).await?))
}

pub async fn confirm_payment(
    State(payments): State<Arc<PaymentService>>,
    Extension(UserId(user_id)): Extension<UserId>,
    Path(payment_id): Path<Uuid>,
    Json(request): Json<ConfirmPaymentRequest>,
) -> Result<Json<ConfirmPaymentResponse>, PaymentError> {
    Ok(Json(payments.confirm(user_id, payment_id, request).await?))
}

pub async fn list_payments(
    State(payments): State<Arc<PaymentService>>,
    Extension(UserId(user_id)): Extension<UserId>,
) -> Result<Json<Vec<PaymentRecord>>, PaymentError> {
    Ok(Json(payments.list_for_user(user_id).await?))
}

pub async fn invoice_payments(
    State(payments): State<Arc<PaymentService>>,
    Extension(UserId(user_id)): Extension<UserId>,
    Path(invoice_id): Path<String>,
) -> Result<Json<Vec<PaymentRecord>>, PaymentError> {
    Ok(Json(payments.list_for_invoice(user_id, &invoice_id).await?))
}
