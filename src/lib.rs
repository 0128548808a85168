//! # LAN Mic Streamer
//!
//! Streams the microphone as raw 16-bit mono PCM over a single TCP
//! connection to one receiver on the LAN.
//!
//! ```text
//! ┌───────────────────────────── SENDER ─────────────────────────────┐
//! │                                                                  │
//! │  Microphone ──▶ capture loop ──▶ TCP socket (single client)      │
//! │    (cpal)      audio::capture      network::listener             │
//! │                        ▲                                         │
//! │                        │ lifecycle, state machine, cleanup       │
//! │               service::StreamService                             │
//! └──────────────────────────────────┬───────────────────────────────┘
//!                                    │ raw PCM over TCP
//!                                    ▼
//!        receiver, e.g. `nc <host> 58585 | aplay -f S16_LE -r 48000 -c 1`
//! ```
//!
//! The wire format carries no framing, handshake, or checksum: the receiver
//! must know the layout (48 kHz, mono, 16-bit PCM) out of band.

pub mod audio;
pub mod config;
pub mod error;
pub mod network;
pub mod observer;
pub mod service;

pub use error::{Error, Result};
pub use service::{ServiceState, StreamService};

/// Application-wide constants
pub mod constants {
    /// Default TCP port for the stream
    pub const DEFAULT_PORT: u16 = 58585;

    /// Capture sample rate (the PipeWire/WASAPI default)
    pub const SAMPLE_RATE: u32 = 48_000;

    /// Mono capture
    pub const CHANNELS: u16 = 1;

    /// Bytes per 16-bit PCM sample
    pub const BYTES_PER_SAMPLE: usize = 2;

    /// Lower bound for the capture buffer size in bytes
    pub const MIN_CAPTURE_BUFFER_BYTES: usize = 4096;
}
