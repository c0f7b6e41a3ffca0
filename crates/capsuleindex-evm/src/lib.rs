//! capsuleindex-evm — JSON-RPC log source and builder for EVM capsule contracts.

pub mod abi;
pub mod builder;
pub mod fetcher;
pub mod rpc;

pub use builder::IndexerBuilder;
pub use fetcher::{EvmLogSource, RawLog};
pub use rpc::{EvmRpcClient, HttpRpcClient, RpcError};
