pub mod filter;
pub mod sync;

pub use filter::Xor8Filter;
pub use sync::{GossipSync, INITIAL_EXCHANGE_DELAY};
