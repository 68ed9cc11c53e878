use async_trait::async_trait;
use log::warn;
use serde_json::{Value, json};

use crate::rpc::RpcClient;
use crate::sync::poller::{Fetched, PollDomain};
use crate::sync::policy::{FieldSnapshot, fields_differ};

const WALLET_INFO_FIELDS: &[&str] = &[
    "version",
    "protocolVersion",
    "walletVersion",
    "balance",
    "newMint",
    "stake",
    "blocks",
    "moneySupply",
    "connections",
    "ip",
    "port",
    "difficulty",
    "keypoolSize",
    "payTxFee",
];

const INCENTIVE_FIELDS: &[&str] = &[
    "walletAddress",
    "collateralRequired",
    "collateralBalance",
    "networkStatus",
    "voteCandidates",
];

const CHAIN_BLENDER_FIELDS: &[&str] = &[
    "blendState",
    "balance",
    "denominatedBalance",
    "nonDenominatedBalance",
    "blendedBalance",
    "blendedPercentage",
];

/// A domain whose snapshot is a flat set of tracked daemon fields.
///
/// Used for wallet info (`getinfo`), incentive info (`getincentiveinfo`) and
/// chain blender status (`chainblender info`).
pub struct FieldDomain {
    name: &'static str,
    method: &'static str,
    params: Vec<Value>,
    tracked: &'static [&'static str],
}

impl FieldDomain {
    pub fn wallet_info() -> Self {
        Self {
            name: "wallet_info",
            method: "getinfo",
            params: Vec::new(),
            tracked: WALLET_INFO_FIELDS,
        }
    }

    pub fn incentive_info() -> Self {
        Self {
            name: "incentive",
            method: "getincentiveinfo",
            params: Vec::new(),
            tracked: INCENTIVE_FIELDS,
        }
    }

    pub fn chain_blender() -> Self {
        Self {
            name: "chain_blender",
            method: "chainblender",
            params: vec![json!("info")],
            tracked: CHAIN_BLENDER_FIELDS,
        }
    }
}

#[async_trait]
impl PollDomain for FieldDomain {
    type Snapshot = FieldSnapshot;

    fn name(&self) -> &'static str {
        self.name
    }

    async fn fetch(&self, client: &RpcClient) -> Fetched<FieldSnapshot> {
        match client.call(self.method, self.params.clone()).await {
            Some(Ok(Value::Object(raw))) => Fetched::Snapshot(FieldSnapshot::from_raw(self.tracked, &raw)),
            Some(Ok(other)) => {
                warn!(domain = self.name, result:% = other; "Unexpected result shape");
                Fetched::NoResponse
            },
            Some(Err(e)) => Fetched::Ignored(e),
            None => Fetched::NoResponse,
        }
    }

    fn has_changed(&self, previous: Option<&FieldSnapshot>, next: &FieldSnapshot) -> bool {
        fields_differ(previous, next)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::rpc::HealthTracker;
    use crate::rpc::testing::FakeTransport;
    use crate::sync::poller::{PollIntervals, Poller, TickOutcome};

    fn getinfo(balance: f64, blocks: u64, timeoffset: i64) -> Value {
        json!({
            "version": "v0.6.0.3",
            "protocolversion": 60039,
            "walletversion": 60000,
            "balance": balance,
            "newmint": 0.0,
            "stake": 0.0,
            "blocks": blocks,
            "moneysupply": 19000000.0,
            "connections": 8,
            "ip": "0.0.0.0",
            "port": 32809,
            "difficulty": 1.5,
            "keypoolsize": 100,
            "paytxfee": 0.0001,
            "timeoffset": timeoffset
        })
    }

    fn poller(transport: Arc<FakeTransport>, domain: FieldDomain) -> Poller<FieldDomain> {
        Poller::new(
            domain,
            RpcClient::new(transport, HealthTracker::new()),
            PollIntervals::from_millis(10_000, 5_000).unwrap(),
        )
    }

    #[tokio::test]
    async fn wallet_info_republishes_only_on_tracked_change() {
        let transport = FakeTransport::new();
        transport.respond("getinfo", Ok(getinfo(10.0, 100, 0)));
        let poller = poller(transport.clone(), FieldDomain::wallet_info());

        assert_eq!(poller.tick().await, TickOutcome::Accepted);
        let snapshot = poller.latest().unwrap();
        assert_eq!(snapshot.get_f64("balance"), Some(10.0));
        assert_eq!(snapshot.get_u64("protocolVersion"), Some(60039));

        // `timeoffset` is not tracked.
        transport.respond("getinfo", Ok(getinfo(10.0, 100, -3)));
        assert_eq!(poller.tick().await, TickOutcome::Unchanged);

        transport.respond("getinfo", Ok(getinfo(10.0, 101, 0)));
        assert_eq!(poller.tick().await, TickOutcome::Accepted);
    }

    #[tokio::test]
    async fn chain_blender_sends_info_param() {
        let transport = FakeTransport::new();
        transport.respond(
            "chainblender",
            Ok(json!({"blendstate": "active", "balance": 5.0, "denominatedbalance": 4.0})),
        );
        let poller = poller(transport.clone(), FieldDomain::chain_blender());

        assert_eq!(poller.tick().await, TickOutcome::Accepted);
        assert_eq!(transport.last_params("chainblender"), Some(vec![json!("info")]));
        assert_eq!(poller.latest().unwrap().get_str("blendState"), Some("active"));
    }

    #[tokio::test]
    async fn incentive_error_is_ignored() {
        let transport = FakeTransport::new();
        transport.respond("getincentiveinfo", Err(crate::rpc::RpcError::new(-1, "not supported")));
        let poller = poller(transport, FieldDomain::incentive_info());

        assert_eq!(poller.tick().await, TickOutcome::Unchanged);
        assert!(poller.latest().is_none());
    }
}
