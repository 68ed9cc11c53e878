use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::rpc::RpcClient;
use crate::sync::poller::{Fetched, PollDomain};
use crate::sync::policy::transactions_differ;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: String,
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub fee: Option<f64>,
    #[serde(default)]
    pub confirmations: i64,
    #[serde(default)]
    pub blockhash: Option<String>,
    #[serde(default)]
    pub blocktime: Option<u64>,
    #[serde(default)]
    pub time: u64,
}

impl Transaction {
    pub fn is_confirmed(&self) -> bool {
        self.confirmations > 0
    }
}

#[derive(Debug, Deserialize)]
struct ListSinceBlock {
    #[serde(default)]
    transactions: Vec<Transaction>,
    #[serde(default)]
    lastblock: Option<String>,
}

/// Transactions reported by one `listsinceblock` call.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionsSnapshot {
    /// Cursor the call was made with; `None` for a full-history listing.
    pub since: Option<String>,
    pub last_block: Option<String>,
    pub transactions: Vec<Transaction>,
}

impl TransactionsSnapshot {
    pub fn has_confirmed(&self) -> bool {
        self.transactions.iter().any(Transaction::is_confirmed)
    }

    pub fn unconfirmed_txids(&self) -> impl Iterator<Item = &str> {
        self.transactions
            .iter()
            .filter(|tx| !tx.is_confirmed())
            .map(|tx| tx.txid.as_str())
    }
}

/// Last block hash a `listsinceblock` listing covered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionCursor {
    last_block: Option<String>,
}

impl TransactionCursor {
    pub fn last_block(&self) -> Option<&str> {
        self.last_block.as_deref()
    }

    fn params(&self) -> Vec<Value> {
        self.last_block.iter().map(|hash| json!(hash)).collect()
    }

    fn advance(&mut self, last_block: Option<&str>) {
        if let Some(hash) = last_block.filter(|h| !h.is_empty()) {
            self.last_block = Some(hash.to_string());
        }
    }
}

/// Incremental transaction listing driven by a block-hash cursor.
#[derive(Default)]
pub struct TransactionsDomain {
    cursor: Mutex<TransactionCursor>,
}

impl TransactionsDomain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self) -> TransactionCursor {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl PollDomain for TransactionsDomain {
    type Snapshot = TransactionsSnapshot;

    fn name(&self) -> &'static str {
        "transactions"
    }

    async fn fetch(&self, client: &RpcClient) -> Fetched<TransactionsSnapshot> {
        let cursor = self.cursor();

        let listing = match client.call("listsinceblock", cursor.params()).await {
            Some(Ok(raw)) => match serde_json::from_value::<ListSinceBlock>(raw) {
                Ok(listing) => listing,
                Err(e) => {
                    warn!(error:% = e; "Could not parse listsinceblock result");
                    return Fetched::NoResponse;
                },
            },
            Some(Err(e)) => return Fetched::Ignored(e),
            None => return Fetched::NoResponse,
        };

        self.cursor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .advance(listing.lastblock.as_deref());
        debug!(
            count = listing.transactions.len(),
            since = cursor.last_block().unwrap_or("genesis");
            "Transactions listed"
        );

        Fetched::Snapshot(TransactionsSnapshot {
            since: cursor.last_block,
            last_block: listing.lastblock,
            transactions: listing.transactions,
        })
    }

    fn has_changed(&self, previous: Option<&TransactionsSnapshot>, next: &TransactionsSnapshot) -> bool {
        transactions_differ(
            next.has_confirmed(),
            previous.map(TransactionsSnapshot::unconfirmed_txids),
            next.unconfirmed_txids(),
        )
    }
}
