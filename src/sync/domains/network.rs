use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::geo::{Enricher, GeoLocation, GeoMap};
use crate::rpc::{RpcClient, RpcRequest};
use crate::sync::poller::{Fetched, PollDomain};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Peer {
    pub addr: String,
    pub ip: Option<IpAddr>,
    pub port: Option<u16>,
    pub last_send: u64,
    pub last_recv: u64,
    pub connected_at: u64,
    pub sub_version: String,
    pub inbound: bool,
    pub starting_height: i64,
    pub geo: Option<GeoLocation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Endpoint {
    pub addr: String,
    pub ip: Option<IpAddr>,
    pub port: Option<u16>,
    pub geo: Option<GeoLocation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkSnapshot {
    pub tcp_connections: u64,
    pub udp_connections: u64,
    pub peers: Vec<Peer>,
    pub endpoints: Vec<Endpoint>,
}

impl NetworkSnapshot {
    fn addresses(&self) -> impl Iterator<Item = IpAddr> + '_ {
        self.peers
            .iter()
            .filter_map(|p| p.ip)
            .chain(self.endpoints.iter().filter_map(|e| e.ip))
    }

    fn annotate(&mut self, geo: &GeoMap) {
        let locate = |ip: Option<IpAddr>| ip.and_then(|ip| geo.get(&ip)).map(|e| e.location.clone());
        for peer in &mut self.peers {
            peer.geo = locate(peer.ip);
        }
        for endpoint in &mut self.endpoints {
            endpoint.geo = locate(endpoint.ip);
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ProtocolInfo {
    #[serde(default)]
    connections: u64,
    #[serde(default)]
    endpoints: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NetworkInfo {
    #[serde(default)]
    tcp: ProtocolInfo,
    #[serde(default)]
    udp: ProtocolInfo,
}

#[derive(Debug, Deserialize)]
struct RawPeer {
    addr: String,
    #[serde(default)]
    lastsend: u64,
    #[serde(default)]
    lastrecv: u64,
    #[serde(default)]
    conntime: u64,
    #[serde(default)]
    subver: String,
    #[serde(default)]
    inbound: bool,
    #[serde(default)]
    startingheight: i64,
}

/// Splits `host:port`, `[v6]:port` or a bare address.
fn split_address(addr: &str) -> (Option<IpAddr>, Option<u16>) {
    if let Ok(socket) = addr.parse::<SocketAddr>() {
        return (Some(socket.ip()), Some(socket.port()));
    }
    match addr.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
        Ok(ip) => (Some(ip), None),
        Err(_) => (None, None),
    }
}

impl From<RawPeer> for Peer {
    fn from(raw: RawPeer) -> Self {
        let (ip, port) = split_address(&raw.addr);
        Self {
            addr: raw.addr,
            ip,
            port,
            last_send: raw.lastsend,
            last_recv: raw.lastrecv,
            connected_at: raw.conntime,
            sub_version: raw.subver,
            inbound: raw.inbound,
            starting_height: raw.startingheight,
            geo: None,
        }
    }
}

fn endpoint(addr: String) -> Endpoint {
    let (ip, port) = split_address(&addr);
    Endpoint {
        addr,
        ip,
        port,
        geo: None,
    }
}

fn decode(network: Value, peers: Value) -> Result<NetworkSnapshot, serde_json::Error> {
    let network: NetworkInfo = serde_json::from_value(network)?;
    let peers: Vec<RawPeer> = serde_json::from_value(peers)?;

    Ok(NetworkSnapshot {
        tcp_connections: network.tcp.connections,
        udp_connections: network.udp.connections,
        // A peer that has never been sent anything is a dropped connection.
        peers: peers
            .into_iter()
            .filter(|p| p.lastsend != 0)
            .map(Peer::from)
            .collect(),
        endpoints: network.udp.endpoints.into_iter().map(endpoint).collect(),
    })
}

/// Network status from `getnetworkinfo` and `getpeerinfo`, fetched as one batch.
///
/// With an [`Enricher`] attached, every tick waits for geolocation of unseen
/// addresses before the snapshot is produced. Peer sets change constantly, so
/// every successful tick is published.
#[derive(Default)]
pub struct NetworkDomain {
    enricher: Option<Arc<Enricher>>,
}

impl NetworkDomain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enricher(enricher: Arc<Enricher>) -> Self {
        Self {
            enricher: Some(enricher),
        }
    }
}

#[async_trait]
impl PollDomain for NetworkDomain {
    type Snapshot = NetworkSnapshot;

    fn name(&self) -> &'static str {
        "network"
    }

    async fn fetch(&self, client: &RpcClient) -> Fetched<NetworkSnapshot> {
        let requests = vec![
            RpcRequest::without_params("getnetworkinfo"),
            RpcRequest::without_params("getpeerinfo"),
        ];
        let Some(results) = client.call_batch(requests).await else {
            return Fetched::NoResponse;
        };

        let mut results = results.into_iter();
        let (network, peers) = match (results.next(), results.next()) {
            (Some(Ok(network)), Some(Ok(peers))) => (network, peers),
            (Some(Err(e)), _) | (_, Some(Err(e))) => return Fetched::Ignored(e),
            _ => return Fetched::NoResponse,
        };

        let mut snapshot = match decode(network, peers) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error:% = e; "Could not parse network info");
                return Fetched::NoResponse;
            },
        };

        if let Some(enricher) = &self.enricher {
            let geo = enricher.enrich(snapshot.addresses().collect::<Vec<_>>()).await;
            snapshot.annotate(&geo);
        }

        debug!(
            peers = snapshot.peers.len(),
            endpoints = snapshot.endpoints.len();
            "Network info fetched"
        );
        Fetched::Snapshot(snapshot)
    }

    fn has_changed(&self, _previous: Option<&NetworkSnapshot>, _next: &NetworkSnapshot) -> bool {
        true
    }
}
