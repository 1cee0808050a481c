//! Wavegate Core - shared library for the Wavegate SDR gateway.
//!
//! This crate provides the core functionality for Wavegate, a multi-user
//! WebSocket gateway in front of a wideband SDR: one multicast RTP I/Q
//! feed in, one independently tuned, demodulated and encoded stream out
//! per client, plus waterfall spectra, DX-cluster spots and pluggable
//! audio-domain decoders.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`ingest`]: RTP/status multicast ingest from the SDR daemon
//! - [`bus`]: single-producer fan-out of I/Q frames to sessions
//! - [`dsp`]: per-session tuning, demodulation and filtering
//! - [`spectrum`]: waterfall frames per client zoom
//! - [`encoder`]: wire framing (pcm-be, pcm-zstd, opus)
//! - [`session`]: session registry, statistics, outbound queueing
//! - [`admission`]: connect policy and session caps
//! - [`dxcluster`]: DX spider client, spot parsing, CTY lookup
//! - [`extension`]: audio-domain decoder host
//! - [`api`]: HTTP/WebSocket surface
//! - [`error`]: centralized error types
//!
//! The server binary composes these through [`bootstrap`] and
//! [`start_server`]; decoder crates plug in through
//! [`ExtensionRegistry`].

#![warn(clippy::all)]

pub mod admission;
pub mod api;
pub mod bus;
pub mod dsp;
pub mod dxcluster;
pub mod encoder;
pub mod error;
pub mod extension;
pub mod frame;
pub mod ingest;
pub mod protocol_constants;
pub mod session;
pub mod spectrum;
pub mod state;
pub mod tuning;

// Re-export commonly used types at the crate root
pub use admission::{AdmissionControl, AdmissionDecision, ConnectRequest};
pub use api::{bootstrap, start_server, AppState, ServerError};
pub use bus::{FanoutBus, FanoutConsumer, WidebandParams};
pub use dxcluster::spot::Spot;
pub use dxcluster::DxCluster;
pub use encoder::{decode_pcm_packet, payload_to_samples, DecodedPcm, Encoder, WireFormat};
pub use error::{WavegateError, WavegateResult};
pub use extension::{AudioExtension, AudioParams, ExtensionFactory, ExtensionRegistry, UserParams};
pub use frame::{IqFrame, PcmFrame};
pub use session::SessionRegistry;
pub use state::{AdmissionConfig, Config, DxClusterConfig, IngestConfig, StreamingConfig};
pub use tuning::{Mode, Tuning};
