//! TCP transport for the outbound PCM stream

pub mod listener;

pub use listener::{discover_ipv4, StreamListener};
