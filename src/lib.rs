// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Portal Auth - Authentication, Session and Audit Service
//!
//! Issues and revokes bearer tokens across devices, gates every request by
//! role and records each state-changing request with secrets redacted.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `audit` - Audit middleware, redaction and client metadata
//! - `auth` - Tokens, sessions, login throttle and request gates
//! - `storage` - Embedded ACID storage (redb)

pub mod api;
pub mod audit;
pub mod auth;
pub mod bootstrap;
pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod state;
pub mod storage;
