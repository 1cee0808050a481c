//! Wavegate Record - IQ recorder client with GPS-aligned start.
//!
//! Connects to a wavegate server, streams raw I/Q over the WebSocket and
//! writes canonical 2-channel WAV files plus a companion JSON carrying
//! the receiver description. With `--align` the recording starts exactly
//! on the next GPS minute boundary, so recordings from multiple
//! receivers line up sample-accurately for TDOA work.

mod client;
mod wav;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use wavegate_core::payload_to_samples;

use crate::client::{ServerTarget, StreamEvent, StreamSocket};
use crate::wav::{recording_filename, IqWavWriter};

/// Wavegate Record - GPS-aligned IQ recorder.
#[derive(Parser, Debug)]
#[command(name = "wavegate-record")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server hostname.
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Server port.
    #[arg(long, default_value_t = 8073)]
    port: u16,

    /// Use TLS (wss/https).
    #[arg(long, default_value_t = false)]
    ssl: bool,

    /// Center frequency to record (Hz).
    #[arg(long)]
    frequency: i64,

    /// IQ mode to request.
    #[arg(long, default_value = "iq48")]
    mode: String,

    /// Recording length in seconds; omit to record until interrupted.
    #[arg(long)]
    duration: Option<u64>,

    /// Directory for output files.
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Start on the next GPS minute boundary (multi-receiver sync).
    #[arg(long, default_value_t = false)]
    align: bool,

    /// Server password, if required.
    #[arg(long, env = "WAVEGATE_PASSWORD")]
    password: Option<String>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "WAVEGATE_LOG_LEVEL")]
    log_level: log::LevelFilter,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    let target = ServerTarget {
        host: args.host.clone(),
        port: args.port,
        ssl: args.ssl,
    };
    let user_session_id = uuid::Uuid::new_v4().to_string();

    // Admission first: a refusal must exit non-zero before any file is
    // touched.
    client::check_admission(&target, &user_session_id, args.password.as_deref()).await?;
    log::info!("Admission granted");

    let description = client::fetch_description(&target).await?;
    let instance = description
        .get("instance")
        .or_else(|| description.get("name"))
        .and_then(|v| v.as_str())
        .unwrap_or("wavegate")
        .to_string();

    let mut socket =
        StreamSocket::connect(&target, args.frequency, &args.mode, &user_session_id).await?;

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Cannot create {}", args.output_dir.display()))?;

    let mut recorder = Recorder {
        args: &args,
        instance,
        description,
        rate: 0,
        channels: 0,
        align_boundary_ns: None,
        writer: None,
    };

    let result = record_loop(&mut socket, &mut recorder).await;

    if let Some(writer) = recorder.writer.take() {
        let path = writer.path().to_path_buf();
        writer.finalize()?;
        log::info!("Wrote {}", path.display());
    }
    result
}

struct Recorder<'a> {
    args: &'a Args,
    instance: String,
    description: serde_json::Value,
    rate: u32,
    channels: u8,
    align_boundary_ns: Option<u64>,
    writer: Option<IqWavWriter>,
}

async fn record_loop(socket: &mut StreamSocket, recorder: &mut Recorder<'_>) -> Result<()> {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted, finishing up");
                return Ok(());
            }
            event = socket.next_event() => {
                match event? {
                    StreamEvent::Closed => {
                        if recorder.writer.is_some() {
                            log::warn!("Server closed the stream");
                            return Ok(());
                        }
                        bail!("Server closed the stream before any data");
                    }
                    StreamEvent::Pcm(packet) => {
                        if recorder.ingest(&packet)? {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

impl Recorder<'_> {
    /// Handles one stream packet. Returns `true` when the requested
    /// duration is complete.
    fn ingest(&mut self, packet: &wavegate_core::DecodedPcm) -> Result<bool> {
        if let (Some(rate), Some(channels)) = (packet.sample_rate_hz, packet.channels) {
            if self.rate != 0 && rate != self.rate {
                // Wideband reconfiguration mid-recording would desync the
                // file; stop cleanly at the generation boundary.
                log::warn!("Stream rate changed {} -> {}, stopping", self.rate, rate);
                return Ok(true);
            }
            self.rate = rate;
            self.channels = channels;
        }
        if self.rate == 0 {
            // Minimal header before any full header; cannot interpret yet.
            return Ok(false);
        }
        if self.channels != 2 {
            bail!(
                "Expected 2-channel I/Q, server sent {} channel(s); is mode '{}' an IQ mode?",
                self.channels,
                self.args.mode
            );
        }

        let mut samples = payload_to_samples(&packet.payload);
        let mut gps_ts_ns = packet.gps_ts_ns;

        if self.args.align && self.writer.is_none() {
            let boundary = *self
                .align_boundary_ns
                .get_or_insert_with(|| next_minute_ns(packet.gps_ts_ns));
            let packet_ns =
                (samples.len() as u64 / 2) * 1_000_000_000 / self.rate as u64;
            if gps_ts_ns + packet_ns <= boundary {
                return Ok(false);
            }
            // Trim to the exact boundary sample.
            let skip_frames =
                ((boundary.saturating_sub(gps_ts_ns)) as u128 * self.rate as u128
                    / 1_000_000_000) as usize;
            let skip = (skip_frames * 2).min(samples.len());
            samples.drain(..skip);
            gps_ts_ns = boundary;
            log::info!("Aligned start at GPS {}", boundary);
        }

        if self.writer.is_none() {
            let started = gps_to_datetime(gps_ts_ns);
            let filename = recording_filename(&self.instance, self.args.frequency, started);
            let path = self.args.output_dir.join(&filename);
            log::info!("Recording to {}", path.display());

            // Companion JSON carries the receiver description verbatim.
            let json_path = path.with_extension("json");
            std::fs::write(
                &json_path,
                serde_json::to_vec_pretty(&self.description)?,
            )
            .with_context(|| format!("Cannot write {}", json_path.display()))?;

            self.writer = Some(IqWavWriter::create(&path, self.rate)?);
        }

        let writer = self.writer.as_mut().expect("created above");
        writer.write_interleaved(&samples)?;

        if let Some(duration) = self.args.duration {
            if writer.seconds_written() >= duration as f64 {
                log::info!("Recorded {} s, done", duration);
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Next whole GPS minute at or after `gps_ts_ns`.
fn next_minute_ns(gps_ts_ns: u64) -> u64 {
    const MINUTE_NS: u64 = 60 * 1_000_000_000;
    gps_ts_ns.div_ceil(MINUTE_NS) * MINUTE_NS
}

fn gps_to_datetime(gps_ts_ns: u64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(
        (gps_ts_ns / 1_000_000_000) as i64,
        (gps_ts_ns % 1_000_000_000) as u32,
    )
    .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minute_alignment() {
        const M: u64 = 60_000_000_000;
        assert_eq!(next_minute_ns(0), 0);
        assert_eq!(next_minute_ns(1), M);
        assert_eq!(next_minute_ns(M), M);
        assert_eq!(next_minute_ns(M + 1), 2 * M);
        assert_eq!(next_minute_ns(3 * M - 1), 3 * M);
    }
}
