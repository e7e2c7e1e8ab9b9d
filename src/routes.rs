use crate::{
    handlers::*,
    middleware::require_user,
    services::{PaymentService, RatesService},
};
use axum::{
    extract::FromRef,
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub payments: Arc<PaymentService>,
    pub rates: Arc<RatesService>,
    pub health: HealthState,
}

pub fn router(state: AppState) -> Router {
    // Caller-scoped endpoints
    let payments = Router::new()
        .route("/payments", get(list_payments))
        .route("/payments/initiate", post(initiate_payment))
        .route("/payments/:id/status", get(payment_status))
        .route("/payments/:id/confirm", post(confirm_payment))
        .route("/payments/invoice/:invoice_id", get(invoice_payments))
        .route_layer(axum_middleware::from_fn(require_user));

    Router::new()
        .route("/health", get(health_check))
        .route("/payments/rates", get(get_rates))
        .merge(payments)
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::default().include_headers(true)),
                )
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
