//! Communication backends and the exchange helpers built on them.

pub mod communicator;
pub mod exchange;
pub mod wire;

pub use communicator::{CommTag, Communicator, LocalComm, NoComm, RemapCommTags, Wait};
pub use exchange::{exchange_counts, exchange_gid_lists};
