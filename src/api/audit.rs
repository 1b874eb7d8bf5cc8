// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit trail queries. Admin only; the trail itself is written by the
//! audit middleware and is read-only here.

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    Json,
};

use crate::{
    error::ApiError,
    models::{AuditListParams, AuditListResponse, MAX_AUDIT_PAGE_SIZE},
    state::AppState,
    storage::{AuditQuery, AuditRecord, AuditRepository},
};

impl AuditListParams {
    /// Storage query with defaults applied and bounds checked.
    pub fn to_query(&self) -> Result<AuditQuery, ApiError> {
        let defaults = AuditQuery::default();
        let page = self.page.unwrap_or(defaults.page);
        let limit = self.limit.unwrap_or(defaults.limit);

        if page == 0 {
            return Err(ApiError::bad_request("page starts at 1"));
        }
        if limit == 0 || limit > MAX_AUDIT_PAGE_SIZE {
            return Err(ApiError::bad_request(format!(
                "limit must be between 1 and {MAX_AUDIT_PAGE_SIZE}"
            )));
        }
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                return Err(ApiError::bad_request("from must not be after to"));
            }
        }

        Ok(AuditQuery {
            actor: self.actor.clone(),
            activity: self.activity.clone(),
            method: self.method.clone(),
            from: self.from,
            to: self.to,
            page,
            limit,
        })
    }
}

/// Filtered, paginated audit records, newest first.
#[utoipa::path(
    get,
    path = "/v1/audit",
    tag = "Audit",
    security(("bearer_auth" = [])),
    params(AuditListParams),
    responses(
        (status = 200, description = "Audit records", body = AuditListResponse),
        (status = 400, description = "Invalid filter"),
        (status = 403, description = "Not authorized (admin required)")
    )
)]
pub async fn list_audit_records(
    State(state): State<AppState>,
    params: Result<Query<AuditListParams>, QueryRejection>,
) -> Result<Json<AuditListResponse>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let query = params.to_query()?;

    let (records, total) = AuditRepository::new(&state.store).query(&query)?;
    let records: Vec<AuditRecord> = if params.include_bodies {
        records
    } else {
        records.into_iter().map(AuditRecord::without_bodies).collect()
    };

    Ok(Json(AuditListResponse {
        has_more: query.page.saturating_mul(query.limit) < total,
        records,
        total,
        page: query.page,
        limit: query.limit,
    }))
}

/// One audit record with its redacted bodies.
#[utoipa::path(
    get,
    path = "/v1/audit/{record_id}",
    tag = "Audit",
    security(("bearer_auth" = [])),
    params(("record_id" = String, Path, description = "Audit record ID")),
    responses(
        (status = 200, description = "Audit record", body = AuditRecord),
        (status = 404, description = "Record not found")
    )
)]
pub async fn get_audit_record(
    State(state): State<AppState>,
    Path(record_id): Path<String>,
) -> Result<Json<AuditRecord>, ApiError> {
    Ok(Json(AuditRepository::new(&state.store).get(&record_id)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn params_default_and_bounds() {
        let query = AuditListParams::default().to_query().unwrap();
        assert_eq!((query.page, query.limit), (1, 20));

        let too_big = AuditListParams {
            limit: Some(101),
            ..Default::default()
        };
        assert!(too_big.to_query().is_err());

        let zero_page = AuditListParams {
            page: Some(0),
            ..Default::default()
        };
        assert!(zero_page.to_query().is_err());

        let now = Utc::now();
        let inverted = AuditListParams {
            from: Some(now),
            to: Some(now - Duration::minutes(1)),
            ..Default::default()
        };
        assert!(inverted.to_query().is_err());
    }
}
