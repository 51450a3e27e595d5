//! The read-only HTTP status surface: a banner and a JSON stats snapshot.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::node::NodeLike;
use crate::core::state::ArbitratorState;

const BANNER: &str = "quorumd\n\nendpoints:\n  GET /       this banner\n  GET /stats  loop and membership status\n";

pub fn router<N>(state: Arc<ArbitratorState<N>>, started_at: DateTime<Utc>) -> Router
where
    N: NodeLike + Serialize + Send + Sync + 'static,
{
    let started = StartedAt(started_at);
    Router::new()
        .route("/", get(banner))
        .route("/stats", get(stats::<N>))
        .with_state(AppState { arbitrator: state, started })
}

#[derive(Clone, Copy)]
struct StartedAt(DateTime<Utc>);

struct AppState<N: NodeLike> {
    arbitrator: Arc<ArbitratorState<N>>,
    started: StartedAt,
}

impl<N: NodeLike> Clone for AppState<N> {
    fn clone(&self) -> Self {
        Self {
            arbitrator: self.arbitrator.clone(),
            started: self.started.clone(),
        }
    }
}

async fn banner() -> &'static str {
    BANNER
}

#[derive(Serialize)]
struct Stats<N: Serialize> {
    #[serde(rename = "Started")]
    started: String,
    #[serde(flatten)]
    snapshot: crate::core::state::StatsSnapshot<N>,
}

async fn stats<N>(State(state): State<AppState<N>>) -> impl IntoResponse
where
    N: NodeLike + Serialize,
{
    let snapshot = state.arbitrator.snapshot();
    let body = Stats {
        started: state.started.0.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        snapshot,
    };
    Json(body)
}
