use std::{net::IpAddr, sync::Arc};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::store::{PeerEntry, Store};

#[derive(Debug, Deserialize)]
pub struct NodeBody {
    public_ip: IpAddr,
    public_port: u16,
}

#[derive(Debug, Deserialize)]
pub struct NodeQuery {
    public_ip: IpAddr,
    public_port: u16,
}

/// `GET /nodes` — every registered peer.
async fn list_nodes(State(store): State<Arc<Store>>) -> Json<Vec<PeerEntry>> {
    Json(store.list())
}

/// `POST /nodes` — insert, `201` on success.
async fn insert_node(
    State(store): State<Arc<Store>>,
    Json(body): Json<NodeBody>,
) -> impl IntoResponse {
    match store.upsert(PeerEntry {
        public_ip: body.public_ip,
        public_port: body.public_port,
    }) {
        Ok(()) => {
            log::info!("registry: inserted {}:{}", body.public_ip, body.public_port);
            StatusCode::CREATED
        }
        Err(e) => {
            log::warn!("registry: insert failed: {e}");
            StatusCode::BAD_REQUEST
        }
    }
}

/// `PUT /nodes` — upsert by `(public_ip, public_port)`.
async fn update_node(
    State(store): State<Arc<Store>>,
    Json(body): Json<NodeBody>,
) -> impl IntoResponse {
    match store.upsert(PeerEntry {
        public_ip: body.public_ip,
        public_port: body.public_port,
    }) {
        Ok(()) => {
            log::info!("registry: updated {}:{}", body.public_ip, body.public_port);
            StatusCode::OK
        }
        Err(e) => {
            log::warn!("registry: update failed: {e}");
            StatusCode::BAD_REQUEST
        }
    }
}

/// `DELETE /nodes?public_ip=&public_port=` — `204` regardless of whether the
/// entry existed; only a malformed query is a `400`.
async fn delete_node(
    State(store): State<Arc<Store>>,
    Query(q): Query<NodeQuery>,
) -> impl IntoResponse {
    match store.delete(q.public_ip, q.public_port) {
        Ok(()) => {
            log::info!("registry: deleted {}:{}", q.public_ip, q.public_port);
            StatusCode::NO_CONTENT
        }
        Err(e) => {
            log::warn!("registry: delete failed: {e}");
            StatusCode::BAD_REQUEST
        }
    }
}

pub fn router(store: Arc<Store>) -> Router {
    Router::new()
        .route(
            "/nodes",
            get(list_nodes)
                .post(insert_node)
                .put(update_node)
                .delete(delete_node),
        )
        .with_state(store)
}
