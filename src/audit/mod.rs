// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Audit Trail
//!
//! Every POST, PUT, PATCH and DELETE leaves one immutable record: route,
//! params, redacted request and response bodies, status, actor and client
//! metadata. Reads are never recorded.

pub mod interceptor;
pub mod metadata;
pub mod redact;

pub use interceptor::audit_requests;
pub use metadata::{ClientMeta, GeoLocator};
pub use redact::Redactor;
