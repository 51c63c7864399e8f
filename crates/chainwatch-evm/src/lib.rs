//! Block-polling EVM-RPC upstream family (§4.2.b): tx from/to matching,
//! ERC-20 transfer log scanning, optional internal-transfer tracing, and
//! multi-backend historical scan aggregation.

mod adapter;
mod rpc;
mod scan;

pub use adapter::BlockPollerAdapter;
pub use rpc::{parse_hex_u64, FallbackRpcClient};
pub use scan::MultiScanBackend;
