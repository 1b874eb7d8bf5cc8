// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit middleware.
//!
//! Installed as the outermost route layer. For every state-changing request
//! it buffers the request body, runs the inner stack, buffers the final
//! response body and persists one redacted [`AuditRecord`] before handing
//! back a response identical to what the inner stack produced.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, MatchedPath, Query, RawPathParams, Request, State},
    http::{request::Parts, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures_util::{stream, StreamExt};
use tracing::{debug, error};

use super::metadata::ClientMeta;
use crate::auth::Identity;
use crate::error::ApiError;
use crate::state::AppState;
use crate::storage::AuditRecord;

/// Largest body captured. Larger requests are rejected with 413; larger
/// responses pass through and are recorded without a body.
pub const MAX_CAPTURE_BYTES: usize = 2 * 1024 * 1024;

/// GET, HEAD and OPTIONS are never audited.
pub fn is_audited(method: &Method) -> bool {
    !(method == Method::GET || method == Method::HEAD || method == Method::OPTIONS)
}

/// Route template up to, not including, its first path parameter.
///
/// `/v1/roles/{role_id}` and `/v1/roles` both give `/v1/roles`.
pub fn base_route(template: &str) -> &str {
    let base = match template.find('{') {
        Some(idx) => template[..idx].trim_end_matches('/'),
        None => template,
    };
    if base.is_empty() {
        "/"
    } else {
        base
    }
}

/// `"<Verb> <base route>"`, e.g. `Deleting /v1/roles`.
pub fn activity_label(method: &Method, route: &str) -> String {
    let verb = if method == Method::POST {
        "Adding"
    } else if method == Method::PUT || method == Method::PATCH {
        "Updating"
    } else if method == Method::DELETE {
        "Deleting"
    } else {
        method.as_str()
    };
    format!("{verb} {}", base_route(route))
}

/// Request facts collected before the inner stack runs.
struct Captured {
    method: Method,
    url: String,
    route: String,
    params: BTreeMap<String, String>,
    query: BTreeMap<String, String>,
    meta: ClientMeta,
}

impl Captured {
    async fn from_parts(parts: &mut Parts, state: &AppState) -> Self {
        use axum::extract::FromRequestParts;

        let route = parts
            .extensions
            .get::<MatchedPath>()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string());
        let params = RawPathParams::from_request_parts(parts, state)
            .await
            .map(|raw| raw.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
            .unwrap_or_default();
        let query = Query::<BTreeMap<String, String>>::try_from_uri(&parts.uri)
            .map(|Query(q)| q)
            .unwrap_or_default();
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        Self {
            method: parts.method.clone(),
            url: parts
                .uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| parts.uri.path().to_string()),
            route,
            params,
            query,
            meta: ClientMeta::from_headers(&parts.headers, peer, state.geo.as_ref()),
        }
    }
}

/// Outcome of buffering a body for the audit record.
enum Capture {
    Complete(Bytes),
    /// Longer than the capture limit. The body replays every chunk.
    Oversized(Body),
    /// The stream failed. The body replays what was read, then the error.
    Failed(Body),
}

/// Read `body` fully unless it exceeds `limit`.
///
/// Chunks already consumed are replayed in front of whatever remains, so a
/// body that is not captured reaches the caller as produced.
async fn capture(body: Body, limit: usize) -> Capture {
    let mut data = body.into_data_stream();
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut len = 0usize;

    while let Some(next) = data.next().await {
        match next {
            Ok(chunk) => {
                len = len.saturating_add(chunk.len());
                chunks.push(chunk);
                if len > limit {
                    let replay = stream::iter(chunks.into_iter().map(Ok)).chain(data);
                    return Capture::Oversized(Body::from_stream(replay));
                }
            }
            Err(e) => {
                debug!(error = %e, read = len, "Body stream failed while buffering");
                let replay = chunks.into_iter().map(Ok).chain(std::iter::once(Err(e)));
                return Capture::Failed(Body::from_stream(stream::iter(replay)));
            }
        }
    }

    match chunks.len() {
        0 => Capture::Complete(Bytes::new()),
        1 => Capture::Complete(chunks.swap_remove(0)),
        _ => Capture::Complete(Bytes::from(chunks.concat())),
    }
}

/// Audit middleware. Never changes status or body of the response.
pub async fn audit_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if !is_audited(request.method()) {
        return next.run(request).await;
    }

    let (mut parts, body) = request.into_parts();
    let captured = Captured::from_parts(&mut parts, &state).await;

    let (payload, response) = match capture(body, MAX_CAPTURE_BYTES).await {
        Capture::Complete(bytes) => {
            let payload = state.redactor.redact_body(&bytes);
            let response = next.run(Request::from_parts(parts, Body::from(bytes))).await;
            (payload, response)
        }
        Capture::Oversized(_) => (
            None,
            ApiError::payload_too_large(format!("Request body exceeds {MAX_CAPTURE_BYTES} bytes")).into_response(),
        ),
        Capture::Failed(_) => (None, ApiError::bad_request("Request body could not be read").into_response()),
    };

    let (parts, body) = response.into_parts();
    let (response_json, body) = match capture(body, MAX_CAPTURE_BYTES).await {
        Capture::Complete(bytes) => (state.redactor.redact_body(&bytes), Body::from(bytes)),
        Capture::Oversized(body) => (None, body),
        Capture::Failed(body) => {
            error!(method = %captured.method, url = %captured.url, "Response body failed, audit record skipped");
            return Response::from_parts(parts, body);
        }
    };

    let identity = parts.extensions.get::<Identity>();
    let record = AuditRecord {
        id: uuid::Uuid::new_v4().to_string(),
        activity: activity_label(&captured.method, &captured.route),
        method: captured.method.as_str().to_string(),
        url: captured.url,
        params: captured.params,
        query: captured.query,
        payload,
        response: response_json,
        status: parts.status.as_u16(),
        actor_id: identity.map(|i| i.user_id.clone()),
        actor_email: identity.map(|i| i.email.clone()),
        ip: captured.meta.ip,
        location: captured.meta.location,
        device: captured.meta.device,
        created_at: state.clock.now(),
    };
    persist(&state, record).await;

    Response::from_parts(parts, body)
}

/// Write the record on the blocking pool and wait for it. Failures are
/// logged and swallowed.
async fn persist(state: &AppState, record: AuditRecord) {
    let sink = state.audit_sink.clone();
    let result = tokio::task::spawn_blocking(move || {
        let id = record.id.clone();
        sink.append(&record).map(|()| id)
    })
    .await;

    match result {
        Ok(Ok(id)) => debug!(record_id = %id, "Audit record stored"),
        Ok(Err(e)) => error!(error = %e, "Failed to persist audit record"),
        Err(e) => error!(error = %e, "Audit persistence task failed"),
    }
}
