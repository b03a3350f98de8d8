//! Row event webhook.
//!
//! One route, `POST /hooks/rows`, authenticated with a keyed blake3 MAC
//! over the raw request body. Handlers answer 202 immediately and run
//! the sync detached.

use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
};
use serde::Deserialize;

use crate::PicsyncService;

/// Header carrying the hex MAC of the request body.
pub const SIGNATURE_HEADER: &str = "x-picsync-signature";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowEvent {
    #[serde(rename = "type")]
    pub kind: RowEventKind,
    pub table: String,
    #[serde(deserialize_with = "crate::rows::de_row_id")]
    pub row_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum RowEventKind {
    #[serde(rename = "row.created")]
    Created,
    #[serde(rename = "row.updated")]
    Updated,
    #[serde(rename = "row.deleted")]
    Deleted,
}

/// MAC for a webhook body: keyed blake3 over the raw bytes, hex encoded.
/// The MAC key is the blake3 hash of the shared secret.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let key = blake3::hash(secret.as_bytes());
    blake3::keyed_hash(key.as_bytes(), body).to_hex().to_string()
}

fn verify_signature(secret: &str, body: &[u8], provided: &str) -> bool {
    let key = blake3::hash(secret.as_bytes());
    let expected = blake3::keyed_hash(key.as_bytes(), body);
    // blake3::Hash equality compares in constant time.
    match provided.parse::<blake3::Hash>() {
        Ok(provided) => provided == expected,
        Err(_) => false,
    }
}

pub fn router(service: Arc<PicsyncService>) -> Router {
    Router::new()
        .route("/hooks/rows", post(handle_row_event))
        .with_state(service)
}

async fn handle_row_event(
    State(service): State<Arc<PicsyncService>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Some(secret) = &service.config().server.webhook_secret {
        let provided = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if !verify_signature(secret, &body, provided) {
            tracing::warn!("rejected webhook with bad signature");
            return StatusCode::UNAUTHORIZED;
        }
    }

    let event: RowEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!("rejected unparseable webhook body: {e}");
            return StatusCode::BAD_REQUEST;
        }
    };

    tokio::spawn(async move {
        let result = match event.kind {
            RowEventKind::Created | RowEventKind::Updated => {
                service.sync_row_by_id(&event.table, &event.row_id).await
            }
            RowEventKind::Deleted => service
                .evict_row(&event.table, &event.row_id)
                .await
                .map(|_| ()),
        };
        if let Err(e) = result {
            tracing::warn!(
                table = %event.table,
                row = %event.row_id,
                "webhook-triggered sync failed: {e:#}"
            );
        }
    });

    StatusCode::ACCEPTED
}

/// Binds the listener and serves the webhook router until aborted.
pub async fn serve(service: Arc<PicsyncService>) -> anyhow::Result<()> {
    let addr = service.config().server.listen_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("webhook listener on {addr}");
    axum::serve(listener, router(service)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_roundtrip() {
        let body = br#"{ "type": "row.updated", "table": "products", "rowId": 7 }"#;
        let sig = sign("secret", body);

        assert!(verify_signature("secret", body, &sig));
        assert!(!verify_signature("other", body, &sig));
        assert!(!verify_signature("secret", b"tampered", &sig));
        assert!(!verify_signature("secret", body, "not-hex"));
    }

    #[test]
    fn parses_events() {
        let event: RowEvent = serde_json::from_str(
            r#"{ "type": "row.deleted", "table": "products", "rowId": 7 }"#,
        )
        .unwrap();
        assert_eq!(event.kind, RowEventKind::Deleted);
        assert_eq!(event.table, "products");
        assert_eq!(event.row_id, "7");

        let event: RowEvent = serde_json::from_str(
            r#"{ "type": "row.created", "table": "vendors", "rowId": "row-3" }"#,
        )
        .unwrap();
        assert_eq!(event.kind, RowEventKind::Created);
        assert_eq!(event.row_id, "row-3");
    }

    #[test]
    fn rejects_unknown_event_kinds() {
        let parsed = serde_json::from_str::<RowEvent>(
            r#"{ "type": "table.updated", "table": "products", "rowId": 7 }"#,
        );
        assert!(parsed.is_err());
    }
}
