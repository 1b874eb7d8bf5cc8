// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit trail of state-changing requests.
//!
//! Records are append-only: there is no update or delete. Keys sort newest
//! first (`!unix_millis` and `!sequence`, both big-endian, followed by the
//! record id), so listing is a forward scan that can stop as soon as it
//! passes the `from` bound. The sequence orders records written within the
//! same millisecond.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use redb::{ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{from_json, to_json, Store, StoreError, StoreResult, AUDIT_IDS, AUDIT_LOG, AUDIT_SEQ};

const SEQUENCE_KEY: &str = "audit_log";

/// One audited request/response pair, stored with secrets already redacted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct AuditRecord {
    pub id: String,
    pub method: String,
    /// Path and query string as received.
    pub url: String,
    /// Human-readable action, e.g. `Adding /v1/roles`.
    pub activity: String,
    /// Path parameters captured by the matched route.
    pub params: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    /// Redacted request body, `null` when absent or not JSON.
    #[schema(value_type = Option<Object>)]
    pub payload: Option<serde_json::Value>,
    /// Redacted response body, `null` when absent or not JSON.
    #[schema(value_type = Option<Object>)]
    pub response: Option<serde_json::Value>,
    pub status: u16,
    /// Authenticated user, if the request carried a valid identity.
    pub actor_id: Option<String>,
    pub actor_email: Option<String>,
    pub ip: String,
    pub location: String,
    pub device: String,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Copy without request and response bodies, for list views.
    pub fn without_bodies(mut self) -> Self {
        self.payload = None;
        self.response = None;
        self
    }
}

/// Filters for [`AuditRepository::query`]. All filters are conjunctive.
#[derive(Debug, Clone)]
pub struct AuditQuery {
    pub actor: Option<String>,
    /// Case-insensitive substring of the activity label.
    pub activity: Option<String>,
    pub method: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// 1-based.
    pub page: usize,
    pub limit: usize,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            actor: None,
            activity: None,
            method: None,
            from: None,
            to: None,
            page: 1,
            limit: 20,
        }
    }
}

impl AuditQuery {
    fn matches(&self, record: &AuditRecord) -> bool {
        if let Some(actor) = &self.actor {
            if record.actor_id.as_deref() != Some(actor.as_str()) {
                return false;
            }
        }
        if let Some(method) = &self.method {
            if !record.method.eq_ignore_ascii_case(method) {
                return false;
            }
        }
        if let Some(activity) = &self.activity {
            if !record
                .activity
                .to_lowercase()
                .contains(&activity.to_lowercase())
            {
                return false;
            }
        }
        true
    }
}

fn time_prefix(at: DateTime<Utc>) -> [u8; 8] {
    let millis = at.timestamp_millis().max(0) as u64;
    (!millis).to_be_bytes()
}

fn record_key(record: &AuditRecord, sequence: u64) -> Vec<u8> {
    let mut key = time_prefix(record.created_at).to_vec();
    key.extend_from_slice(&(!sequence).to_be_bytes());
    key.extend_from_slice(record.id.as_bytes());
    key
}

/// Destination of audit records written by the audit middleware.
pub trait AuditSink: Send + Sync {
    fn append(&self, record: &AuditRecord) -> StoreResult<()>;
}

impl AuditSink for Store {
    fn append(&self, record: &AuditRecord) -> StoreResult<()> {
        AuditRepository::new(self).insert(record)
    }
}

pub struct AuditRepository<'a> {
    store: &'a Store,
}

impl<'a> AuditRepository<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn insert(&self, record: &AuditRecord) -> StoreResult<()> {
        let write_txn = self.store.db().begin_write()?;
        {
            let sequence = {
                let mut counters = write_txn.open_table(AUDIT_SEQ)?;
                let next = counters.get(SEQUENCE_KEY)?.map(|v| v.value()).unwrap_or(0) + 1;
                counters.insert(SEQUENCE_KEY, next)?;
                next
            };
            let key = record_key(record, sequence);

            let mut ids = write_txn.open_table(AUDIT_IDS)?;
            if ids.get(record.id.as_str())?.is_some() {
                return Err(StoreError::AlreadyExists(format!("Audit record {}", record.id)));
            }
            ids.insert(record.id.as_str(), key.as_slice())?;

            let mut log = write_txn.open_table(AUDIT_LOG)?;
            log.insert(key.as_slice(), to_json(record)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, record_id: &str) -> StoreResult<AuditRecord> {
        let read_txn = self.store.db().begin_read()?;
        let ids = read_txn.open_table(AUDIT_IDS)?;
        let Some(key) = ids.get(record_id)?.map(|v| v.value().to_vec()) else {
            return Err(StoreError::NotFound("Audit record".to_string()));
        };
        let log = read_txn.open_table(AUDIT_LOG)?;
        match log.get(key.as_slice())? {
            Some(value) => from_json(value.value()),
            None => Err(StoreError::NotFound("Audit record".to_string())),
        }
    }

    /// Newest-first page of matching records and the total match count.
    pub fn query(&self, query: &AuditQuery) -> StoreResult<(Vec<AuditRecord>, usize)> {
        let read_txn = self.store.db().begin_read()?;
        let log = read_txn.open_table(AUDIT_LOG)?;

        let start = query.to.map(time_prefix).unwrap_or([0u8; 8]);
        let skip = query.page.saturating_sub(1).saturating_mul(query.limit);

        let mut total = 0usize;
        let mut page = Vec::new();
        for entry in log.range(start.as_slice()..)? {
            let (_, value) = entry?;
            let record: AuditRecord = from_json(value.value())?;
            if let Some(from) = query.from {
                if record.created_at < from {
                    break;
                }
            }
            if let Some(to) = query.to {
                if record.created_at > to {
                    continue;
                }
            }
            if !query.matches(&record) {
                continue;
            }
            if total >= skip && page.len() < query.limit {
                page.push(record);
            }
            total += 1;
        }
        Ok((page, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::temp_store;
    use chrono::Duration;

    fn record(method: &str, activity: &str, actor: Option<&str>, at: DateTime<Utc>) -> AuditRecord {
        AuditRecord {
            id: uuid::Uuid::new_v4().to_string(),
            method: method.to_string(),
            url: "/v1/roles".to_string(),
            activity: activity.to_string(),
            params: BTreeMap::new(),
            query: BTreeMap::new(),
            payload: Some(serde_json::json!({ "name": "editor" })),
            response: None,
            status: 201,
            actor_id: actor.map(str::to_string),
            actor_email: None,
            ip: "127.0.0.1".to_string(),
            location: "Local".to_string(),
            device: "unknown".to_string(),
            created_at: at,
        }
    }

    #[test]
    fn get_returns_inserted_record() {
        let (store, _dir) = temp_store();
        let repo = AuditRepository::new(&store);
        let rec = record("POST", "Adding /v1/roles", Some("u1"), Utc::now());
        repo.insert(&rec).unwrap();

        assert_eq!(repo.get(&rec.id).unwrap(), rec);
        assert!(matches!(repo.get("missing"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn query_is_newest_first_and_paginates() {
        let (store, _dir) = temp_store();
        let repo = AuditRepository::new(&store);
        let base = Utc::now();
        let ids: Vec<String> = (0..5)
            .map(|i| {
                let rec = record("POST", "Adding /v1/roles", None, base + Duration::seconds(i));
                repo.insert(&rec).unwrap();
                rec.id
            })
            .collect();

        let (page, total) = repo
            .query(&AuditQuery {
                page: 1,
                limit: 2,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(total, 5);
        assert_eq!(page[0].id, ids[4]);
        assert_eq!(page[1].id, ids[3]);

        let (last, _) = repo
            .query(&AuditQuery {
                page: 3,
                limit: 2,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].id, ids[0]);
    }

    #[test]
    fn same_millisecond_records_keep_insertion_order() {
        let (store, _dir) = temp_store();
        let repo = AuditRepository::new(&store);
        let at = Utc::now();
        let ids: Vec<String> = (0..4)
            .map(|_| {
                let rec = record("POST", "Adding /v1/roles", None, at);
                repo.insert(&rec).unwrap();
                rec.id
            })
            .collect();

        let (page, _) = repo.query(&AuditQuery::default()).unwrap();
        let listed: Vec<String> = page.into_iter().map(|r| r.id).collect();
        let expected: Vec<String> = ids.into_iter().rev().collect();
        assert_eq!(listed, expected);
    }

    #[test]
    fn store_appends_as_audit_sink() {
        let (store, _dir) = temp_store();
        let rec = record("DELETE", "Deleting /v1/roles", Some("u1"), Utc::now());
        let sink: &dyn AuditSink = &store;
        sink.append(&rec).unwrap();
        assert_eq!(AuditRepository::new(&store).get(&rec.id).unwrap(), rec);
    }

    #[test]
    fn query_filters_combine() {
        let (store, _dir) = temp_store();
        let repo = AuditRepository::new(&store);
        let now = Utc::now();
        repo.insert(&record("POST", "Adding /v1/roles", Some("u1"), now - Duration::hours(3)))
            .unwrap();
        repo.insert(&record("DELETE", "Deleting /v1/roles", Some("u1"), now - Duration::hours(2)))
            .unwrap();
        repo.insert(&record("POST", "Adding /v1/users", Some("u2"), now - Duration::hours(1)))
            .unwrap();

        let by_actor = AuditQuery {
            actor: Some("u1".into()),
            ..Default::default()
        };
        assert_eq!(repo.query(&by_actor).unwrap().1, 2);

        let by_activity = AuditQuery {
            activity: Some("ROLES".into()),
            method: Some("post".into()),
            ..Default::default()
        };
        let (hits, total) = repo.query(&by_activity).unwrap();
        assert_eq!(total, 1);
        assert_eq!(hits[0].activity, "Adding /v1/roles");

        let window = AuditQuery {
            from: Some(now - Duration::minutes(150)),
            to: Some(now - Duration::minutes(30)),
            ..Default::default()
        };
        let (hits, total) = repo.query(&window).unwrap();
        assert_eq!(total, 2);
        assert_eq!(hits[0].activity, "Adding /v1/users");
        assert_eq!(hits[1].activity, "Deleting /v1/roles");
    }

    #[test]
    fn without_bodies_drops_payloads() {
        let rec = record("POST", "Adding /v1/roles", None, Utc::now()).without_bodies();
        assert!(rec.payload.is_none());
        assert!(rec.response.is_none());
    }
}
