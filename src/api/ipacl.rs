use anyhow::{Context, Result};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use ipnetwork::IpNetwork;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::AppState;

/// CIDR allow-list. Empty allows every peer.
#[derive(Debug, Clone, Default)]
pub struct IpAcl {
    networks: Vec<IpNetwork>,
}

impl IpAcl {
    pub fn parse(entries: &[String]) -> Result<Self> {
        let networks = entries
            .iter()
            .map(|e| {
                e.trim()
                    .parse::<IpNetwork>()
                    .with_context(|| format!("invalid ipacl entry '{e}'"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { networks })
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    pub fn allows(&self, ip: IpAddr) -> bool {
        if self.networks.is_empty() {
            return true;
        }
        let ip = match ip {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
            v4 => v4,
        };
        self.networks.iter().any(|n| n.contains(ip))
    }
}

pub async fn check(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    if state.ipacl.is_empty() {
        return next.run(req).await;
    }
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    match peer {
        Some(ip) if state.ipacl.allows(ip) => next.run(req).await,
        _ => {
            tracing::warn!("Rejected request from {:?} by ipacl", peer);
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows() {
        let acl = IpAcl::parse(&["192.168.1.0/24".to_string(), "10.0.0.5".to_string()]).unwrap();
        assert!(acl.allows("192.168.1.77".parse().unwrap()));
        assert!(acl.allows("10.0.0.5".parse().unwrap()));
        assert!(acl.allows("::ffff:192.168.1.2".parse().unwrap()));
        assert!(!acl.allows("10.0.0.6".parse().unwrap()));
        assert!(!acl.allows("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn test_empty_allows_all() {
        let acl = IpAcl::parse(&[]).unwrap();
        assert!(acl.allows("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn test_invalid_entry() {
        assert!(IpAcl::parse(&["not-a-net".to_string()]).is_err());
    }
}
