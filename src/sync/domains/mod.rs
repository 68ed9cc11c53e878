mod fields;
mod network;
mod transactions;

pub use fields::FieldDomain;
pub use network::{Endpoint, NetworkDomain, NetworkSnapshot, Peer};
pub use transactions::{Transaction, TransactionCursor, TransactionsDomain, TransactionsSnapshot};
