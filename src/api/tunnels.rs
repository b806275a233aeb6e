//! Tunnel directory.
//!
//! ## Protocol aliasing
//!
//! The `k2v5` front-door detunnels ECH-wrapped ClientHellos and forwards
//! plain traffic to the legacy back-ends, so queries for `k2`, `k2v4`, or
//! `k2wss` also match tunnels stored as `k2v5`. `k2v5` and `k2oc` queries
//! are exact, and `k2oc` never appears in the legacy (no-parameter) listing.
//!
//! ## Legacy renaming
//!
//! The legacy route reports every item's protocol as the literal `k2wss`
//! regardless of the stored value; old clients only speak that tag. The
//! parameterized route reports true values. `server_url` passes through for
//! `k2v5` rows on both routes.

use std::collections::{HashMap, HashSet};

use axum::{
    extract::{Path, Query, State},
    Json,
};
use base64ct::{Base64, Encoding};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::auth::Auth;
use crate::error::{ok, ApiError, Envelope};
use crate::models::{now_ts, CloudInstance, SlaveNode, SlaveTunnel, TunnelProtocol};
use crate::state::AppState;

/// Billing window used for `timeRatio` when only an end date is known.
const BILLING_WINDOW_SECS: i64 = 30 * 86_400;

#[derive(Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct TunnelFilter {
    /// `true|false|1|0`
    pub has_relay: Option<String>,
    /// `true|false|1|0`; tunnels with no value count as `true`.
    pub has_tunnel: Option<String>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TunnelItem {
    pub id: u64,
    pub name: String,
    pub domain: String,
    pub protocol: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hop_port_min: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hop_port_max: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    pub region: String,
    pub country: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<DataTunnelInstance>,
}

/// Billing decoration pulled from the node's cloud-instance row.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataTunnelInstance {
    pub traffic_total_bytes: i64,
    /// Used fraction of the traffic quota, clamped to [0, 1].
    pub traffic_ratio: f64,
    pub billing_cycle_end_at: i64,
    /// Elapsed fraction of a 30-day window ending at the billing cycle end,
    /// clamped to [0, 1].
    pub time_ratio: f64,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TunnelList {
    pub tunnels: Vec<TunnelItem>,
    /// Base64 ECHConfigList of the active key; omitted when unavailable.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ech_config_list: String,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RelayItem {
    pub id: String,
    pub name: String,
    pub ipv4: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hop_port_min: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hop_port_max: Option<u16>,
    pub region: String,
}

#[utoipa::path(
    get,
    path = "/tunnels",
    params(TunnelFilter),
    tag = "Tunnels",
    responses((status = 200, description = "Legacy tunnel list", body = TunnelList))
)]
pub async fn list_legacy(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Query(filter): Query<TunnelFilter>,
) -> Result<Json<Envelope<TunnelList>>, ApiError> {
    let list = build_list(&state, ctx.user.is_admin, &filter, None)?;
    Ok(ok(list))
}

#[utoipa::path(
    get,
    path = "/tunnels/{protocol}",
    params(
        ("protocol" = String, Path, description = "Tunnel protocol tag"),
        TunnelFilter
    ),
    tag = "Tunnels",
    responses(
        (status = 200, description = "Protocol-specific tunnel list", body = TunnelList),
        (status = 422, description = "Unknown protocol tag")
    )
)]
pub async fn list_protocol(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Path(protocol): Path<String>,
    Query(filter): Query<TunnelFilter>,
) -> Result<Json<Envelope<TunnelList>>, ApiError> {
    let protocol = TunnelProtocol::parse(&protocol)
        .ok_or_else(|| ApiError::invalid_argument(format!("unknown protocol {protocol}")))?;
    let list = build_list(&state, ctx.user.is_admin, &filter, Some(protocol))?;
    Ok(ok(list))
}

#[utoipa::path(
    get,
    path = "/k2/relays",
    params(TunnelFilter),
    tag = "Tunnels",
    responses((status = 200, description = "Relay-capable tunnels", body = [RelayItem]))
)]
pub async fn relays(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Query(filter): Query<TunnelFilter>,
) -> Result<Json<Envelope<Vec<RelayItem>>>, ApiError> {
    let has_tunnel = parse_flag(filter.has_tunnel.as_deref())?;

    let tunnels: Vec<SlaveTunnel> = state
        .store
        .tunnels()?
        .into_iter()
        .filter(|t| t.has_relay)
        .filter(|t| visible(t, ctx.user.is_admin))
        .filter(|t| has_tunnel.is_none_or(|want| t.has_tunnel.unwrap_or(true) == want))
        .collect();

    let node_ids: Vec<u64> = dedup(tunnels.iter().map(|t| t.node_id));
    let nodes = state.store.nodes_by_ids(&node_ids)?;

    let items = tunnels
        .into_iter()
        .filter_map(|t| {
            let node = nodes.get(&t.node_id)?;
            Some(RelayItem {
                id: format!("relay-{}-{}", node.region, t.id),
                name: t.name,
                ipv4: node.ipv4.clone(),
                ipv6: node.ipv6.clone(),
                hop_port_min: t.udp_port_min,
                hop_port_max: t.udp_port_max,
                region: node.region.clone(),
            })
        })
        .collect();
    Ok(ok(items))
}

fn build_list(
    state: &AppState,
    is_admin: bool,
    filter: &TunnelFilter,
    protocol: Option<TunnelProtocol>,
) -> Result<TunnelList, ApiError> {
    let has_relay = parse_flag(filter.has_relay.as_deref())?;
    let has_tunnel = parse_flag(filter.has_tunnel.as_deref())?;

    let wanted: HashSet<TunnelProtocol> = match protocol {
        Some(p) => p.query_protocols().into_iter().collect(),
        None => TunnelProtocol::legacy_protocols().into_iter().collect(),
    };

    let tunnels: Vec<SlaveTunnel> = state
        .store
        .tunnels()?
        .into_iter()
        .filter(|t| wanted.contains(&t.protocol))
        .filter(|t| visible(t, is_admin))
        .filter(|t| has_relay.is_none_or(|want| t.has_relay == want))
        .filter(|t| has_tunnel.is_none_or(|want| t.has_tunnel.unwrap_or(true) == want))
        .collect();

    // Two batched lookups instead of one pair of queries per tunnel.
    let node_ids: Vec<u64> = dedup(tunnels.iter().map(|t| t.node_id));
    let nodes = state.store.nodes_by_ids(&node_ids)?;
    let ips: Vec<String> = dedup(nodes.values().map(|n| n.ipv4.clone()));
    let instances = state.store.cloud_instances_by_ips(&ips)?;

    let legacy = protocol.is_none();
    let now = now_ts();
    let items = tunnels
        .into_iter()
        .map(|t| shape(t, legacy, &nodes, &instances, now))
        .collect();

    Ok(TunnelList {
        tunnels: items,
        ech_config_list: active_ech_list(state),
    })
}

fn shape(
    tunnel: SlaveTunnel,
    legacy: bool,
    nodes: &HashMap<u64, SlaveNode>,
    instances: &HashMap<String, CloudInstance>,
    now: i64,
) -> TunnelItem {
    let node = nodes.get(&tunnel.node_id);
    let instance = node
        .and_then(|n| instances.get(&n.ipv4))
        .map(|i| decorate(i, now));

    let protocol = if legacy {
        TunnelProtocol::K2wss.as_str().to_string()
    } else {
        tunnel.protocol.as_str().to_string()
    };
    // server_url is only meaningful for k2v5 and always passes through.
    let server_url = match tunnel.protocol {
        TunnelProtocol::K2v5 => tunnel.server_url,
        _ => None,
    };

    TunnelItem {
        id: tunnel.id,
        name: tunnel.name,
        domain: tunnel.domain,
        protocol,
        port: tunnel.port,
        hop_port_min: tunnel.udp_port_min,
        hop_port_max: tunnel.udp_port_max,
        server_url,
        region: node.map(|n| n.region.clone()).unwrap_or_default(),
        country: node.map(|n| n.country.clone()).unwrap_or_default(),
        load_percent: node.and_then(|n| n.load_percent),
        instance,
    }
}

fn decorate(instance: &CloudInstance, now: i64) -> DataTunnelInstance {
    let traffic_ratio = if instance.traffic_total_bytes > 0 {
        (instance.traffic_used_bytes as f64 / instance.traffic_total_bytes as f64).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let cycle_end = instance.traffic_reset_at.or(instance.expires_at);
    let (billing_cycle_end_at, time_ratio) = match cycle_end {
        Some(end) => {
            let start = end - BILLING_WINDOW_SECS;
            let ratio = (now - start) as f64 / BILLING_WINDOW_SECS as f64;
            (end, ratio.clamp(0.0, 1.0))
        }
        None => (0, 0.0),
    };
    DataTunnelInstance {
        traffic_total_bytes: instance.traffic_total_bytes,
        traffic_ratio,
        billing_cycle_end_at,
        time_ratio,
    }
}

fn visible(tunnel: &SlaveTunnel, is_admin: bool) -> bool {
    is_admin || !tunnel.is_test
}

/// Base64 ECHConfigList of the active key; empty when none is available.
fn active_ech_list(state: &AppState) -> String {
    match state.keystore.active_config_list() {
        Ok(Some((list, _))) => Base64::encode_string(&list),
        Ok(None) => String::new(),
        Err(err) => {
            tracing::error!(error = %err, "ECH config list unavailable for tunnel listing");
            String::new()
        }
    }
}

fn parse_flag(raw: Option<&str>) -> Result<Option<bool>, ApiError> {
    match raw {
        None => Ok(None),
        Some("true") | Some("1") => Ok(Some(true)),
        Some("false") | Some("0") => Ok(Some(false)),
        Some(other) => Err(ApiError::invalid_argument(format!(
            "expected true|false|1|0, got {other}"
        ))),
    }
}

fn dedup<T: std::hash::Hash + Eq + Clone>(values: impl Iterator<Item = T>) -> Vec<T> {
    let mut seen = HashSet::new();
    values.filter(|v| seen.insert(v.clone())).collect()
}
