use axum::Router;

use crate::state::AppState;

pub mod blocks;
pub mod links;
pub mod programs;
pub mod usages;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(programs::router())
        .merge(links::router())
        .merge(usages::router())
        .merge(blocks::router())
}
