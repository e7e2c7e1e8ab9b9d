use crate::{models::RatesResponse, services::RatesService};
use axum::{extract::State, Json};
use std::sync::Arc;

pub async fn get_rates(State(rates): State<Arc<RatesService>>) -> Json<RatesResponse> {
    Json(rates.get_rates().await)
}
