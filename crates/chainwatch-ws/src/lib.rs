//! Direct WebSocket (Blockbook-family) upstream adapter family (§4.2.a):
//! one pooled connection per ~100 subscribed addresses, plus a dedicated
//! block-notification connection used to resolve new confirmations.

mod adapter;
mod connection;
mod pool;
mod watchlist;

pub use adapter::DirectWsAdapter;
pub use connection::{DataConnId, DataConnection};
pub use pool::ConnectionPool;
pub use watchlist::Watchlist;
