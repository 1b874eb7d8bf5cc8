// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Client metadata attached to sessions and audit records: IP address,
//! coarse location and a device description.
//!
//! Every lookup degrades to [`UNKNOWN`] instead of failing.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap},
};
use serde::Deserialize;

use crate::state::AppState;

pub const UNKNOWN: &str = "unknown";

/// Who sent a request, as far as can be told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMeta {
    pub ip: String,
    pub location: String,
    pub device: String,
}

impl ClientMeta {
    pub fn from_headers(headers: &HeaderMap, peer: Option<SocketAddr>, locator: &dyn GeoLocator) -> Self {
        let ip = client_ip(headers, peer);
        let location = ip
            .parse::<IpAddr>()
            .ok()
            .and_then(|addr| locator.locate(addr))
            .unwrap_or_else(|| UNKNOWN.to_string());
        let device = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(describe_device)
            .unwrap_or_else(|| UNKNOWN.to_string());
        Self { ip, location, device }
    }
}

impl FromRequestParts<AppState> for ClientMeta {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(ClientMeta::from_headers(&parts.headers, peer, state.geo.as_ref()))
    }
}

/// Client IP: first `X-Forwarded-For` hop, then `X-Real-IP`, then the peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    forwarded
        .or_else(real_ip)
        .map(str::to_string)
        .or_else(|| peer.map(|p| p.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// Short `"<browser> on <os>"` description of a `User-Agent` string.
pub fn describe_device(user_agent: &str) -> String {
    const BROWSERS: [(&str, &str); 9] = [
        ("Edg/", "Edge"),
        ("OPR/", "Opera"),
        ("Firefox/", "Firefox"),
        ("FxiOS/", "Firefox"),
        ("CriOS/", "Chrome"),
        ("Chrome/", "Chrome"),
        ("Safari/", "Safari"),
        ("PostmanRuntime/", "Postman"),
        ("curl/", "curl"),
    ];
    const SYSTEMS: [(&str, &str); 7] = [
        ("Windows", "Windows"),
        ("Android", "Android"),
        ("iPhone", "iOS"),
        ("iPad", "iOS"),
        ("Macintosh", "macOS"),
        ("CrOS", "ChromeOS"),
        ("Linux", "Linux"),
    ];

    let find = |table: &[(&str, &'static str)]| {
        table
            .iter()
            .find(|(needle, _)| user_agent.contains(needle))
            .map(|(_, name)| *name)
    };

    match (find(&BROWSERS), find(&SYSTEMS)) {
        (Some(browser), Some(os)) => format!("{browser} on {os}"),
        (Some(browser), None) => browser.to_string(),
        (None, Some(os)) => os.to_string(),
        (None, None) => UNKNOWN.to_string(),
    }
}

/// Maps an IP address to a coarse, human-readable location.
pub trait GeoLocator: Send + Sync {
    fn locate(&self, ip: IpAddr) -> Option<String>;
}

/// Names loopback and private ranges; everything else is unresolved.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReservedRangeLocator;

impl GeoLocator for ReservedRangeLocator {
    fn locate(&self, ip: IpAddr) -> Option<String> {
        let label = match ip {
            IpAddr::V4(v4) if v4.is_loopback() => "Local",
            IpAddr::V4(v4) if v4.is_private() => "Private network",
            IpAddr::V4(v4) if v4.is_link_local() => "Link-local",
            IpAddr::V6(v6) if v6.is_loopback() => "Local",
            // fc00::/7
            IpAddr::V6(v6) if (v6.segments()[0] & 0xfe00) == 0xfc00 => "Private network",
            // fe80::/10
            IpAddr::V6(v6) if (v6.segments()[0] & 0xffc0) == 0xfe80 => "Link-local",
            _ => return None,
        };
        Some(label.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GeoTableError {
    #[error("failed to read geo table: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse geo table: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid CIDR block: {0}")]
    InvalidCidr(String),
}

#[derive(Debug, Deserialize)]
struct GeoTableEntry {
    cidr: String,
    location: String,
}

#[derive(Debug, Clone)]
struct CidrBlock {
    network: IpAddr,
    prefix: u8,
}

impl CidrBlock {
    fn parse(raw: &str) -> Option<Self> {
        let (addr, prefix) = raw.trim().split_once('/')?;
        let network: IpAddr = addr.parse().ok()?;
        let prefix: u8 = prefix.parse().ok()?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        (prefix <= max).then_some(Self { network, prefix })
    }

    fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = u32::MAX.checked_shl(32 - self.prefix as u32).unwrap_or(0);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = u128::MAX.checked_shl(128 - self.prefix as u32).unwrap_or(0);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

/// Operator-supplied CIDR to location table, with reserved ranges as fallback.
///
/// File format: `[{"cidr": "203.0.113.0/24", "location": "Lima, PE"}, ...]`.
/// The most specific matching block wins.
#[derive(Debug, Clone, Default)]
pub struct CidrTableLocator {
    blocks: Vec<(CidrBlock, String)>,
}

impl CidrTableLocator {
    pub fn from_file(path: &Path) -> Result<Self, GeoTableError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, GeoTableError> {
        let entries: Vec<GeoTableEntry> = serde_json::from_str(raw)?;
        let mut blocks = entries
            .into_iter()
            .map(|e| {
                CidrBlock::parse(&e.cidr)
                    .map(|block| (block, e.location))
                    .ok_or(GeoTableError::InvalidCidr(e.cidr))
            })
            .collect::<Result<Vec<_>, _>>()?;
        blocks.sort_by(|a, b| b.0.prefix.cmp(&a.0.prefix));
        Ok(Self { blocks })
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl GeoLocator for CidrTableLocator {
    fn locate(&self, ip: IpAddr) -> Option<String> {
        self.blocks
            .iter()
            .find(|(block, _)| block.contains(ip))
            .map(|(_, location)| location.clone())
            .or_else(|| ReservedRangeLocator.locate(ip))
    }
}
