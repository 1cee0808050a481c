//! WebSocket handlers: the per-session streaming socket and the
//! DX-cluster side channel.
//!
//! `/ws` admission happens before the upgrade; an admitted socket gets a
//! registered session, one DSP task and a prioritized outbound queue. The
//! socket loop multiplexes encoded audio/spectrum/extension frames,
//! control messages with their acks, heartbeats and deadline handling.
//!
//! `/ws/dxcluster` is a read-mostly side channel: spot history, live
//! spots as JSON text, and the bound session's audio-extension binary
//! frames.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures::sink::SinkExt;
use futures::stream::{SplitSink, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::admission::{AdmissionDecision, AdmissionPermit, ConnectRequest};
use crate::api::AppState;
use crate::bus::FanoutConsumer;
use crate::dsp::agc::AgcProfile;
use crate::dsp::biquad::NotchSpec;
use crate::dsp::nr::NrSettings;
use crate::dsp::{Pipeline, PipelineCommand};
use crate::encoder::{
    encode_extension, encode_heartbeat, encode_spectrum, encode_state, Encoder, WireFormat,
};
use crate::error::WavegateError;
use crate::extension::{AudioParams, ExtensionBinding};
use crate::frame::PcmFrame;
use crate::protocol_constants::{
    CLOSE_CODE_OVERLOAD, CLOSE_CODE_SESSION_EXPIRED, DEFAULT_AUDIO_RATE, HEARTBEAT_INTERVAL_SECS,
};
use crate::session::control::{
    parse_control, validate_notches, ControlMessage, ControlReply, StateSnapshot,
};
use crate::session::{
    OutboundQueue, PacketKind, SessionEntry, SessionStats, ENCODER_ERROR_LIMIT,
    OVERLOAD_AUDIO_DROPS,
};
use crate::spectrum::SpectrumEngine;
use crate::tuning::{Mode, Tuning};

/// Query parameters of the `/ws` upgrade.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub frequency: Option<i64>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub user_session_id: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
}

/// Commands from the socket loop to the session's DSP task, applied at
/// block boundaries.
enum SessionCommand {
    Pipeline(PipelineCommand),
    Zoom { center_hz: i64, span_hz: u32 },
    Attach(ExtensionBinding),
    Detach,
}

/// `/ws` upgrade handler. Admission runs here, before the upgrade, so a
/// refused client never gets a DSP pipeline.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    let mode = match query.mode.as_deref().map(Mode::parse) {
        None => Mode::Usb,
        Some(Ok(mode)) => mode,
        Some(Err(e)) => return e.into_response(),
    };
    let format = match query.format.as_deref() {
        None => WireFormat::PcmBe,
        Some(s) => match WireFormat::parse(s) {
            Some(format) => format,
            None => {
                return WavegateError::InvalidRequest(format!("unknown format '{s}'"))
                    .into_response()
            }
        },
    };
    if format == WireFormat::Opus && mode.is_iq() {
        return WavegateError::InvalidRequest("opus is mono only; IQ modes need a PCM format".into())
            .into_response();
    }

    let permit = match state.admission.admit(&ConnectRequest {
        ip: addr.ip(),
        password: query.password.as_deref(),
        mode: Some(mode),
    }) {
        Ok(permit) => permit,
        Err(decision) => {
            log::info!(
                "[WS] Upgrade refused for {}: {}",
                decision.client_ip,
                decision.reason
            );
            return (StatusCode::FORBIDDEN, Json(decision)).into_response();
        }
    };

    let frequency = query.frequency.unwrap_or_else(|| {
        let params = state.bus.params();
        if params.sample_rate_hz > 0 {
            params.center_hz
        } else {
            state.config.ingest.default_center_hz
        }
    });
    let tuning = Tuning::new(frequency, mode);
    let user_session_id = query
        .user_session_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    ws.on_upgrade(move |socket| {
        handle_session(socket, state, permit, tuning, format, user_session_id)
    })
}

/// Authoritative per-session control state, owned by the socket loop.
struct SessionControl {
    state: AppState,
    entry: Arc<SessionEntry>,
    decision: AdmissionDecision,
    tuning: Tuning,
    format: WireFormat,
    zoom: (i64, u32),
    agc: AgcProfile,
    notches: Vec<NotchSpec>,
    nr: NrSettings,
    extension_name: Option<String>,
    cmd_tx: mpsc::Sender<SessionCommand>,
    outbound: Arc<OutboundQueue>,
}

impl SessionControl {
    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            session_id: self.entry.id.to_string(),
            frequency: self.tuning.center_hz,
            mode: self.tuning.mode.as_str(),
            passband_low: self.tuning.passband_low_hz,
            passband_high: self.tuning.passband_high_hz,
            format: self.format.as_str(),
            sample_rate: if self.tuning.mode.is_iq() {
                self.tuning.mode.working_rate()
            } else {
                DEFAULT_AUDIO_RATE
            },
            channels: self.tuning.mode.channels(),
            agc: self.agc,
            notches: self.notches.clone(),
            nr: self.nr,
            spectrum_center_hz: self.zoom.0,
            spectrum_span_hz: self.zoom.1,
            extension: self.extension_name.clone(),
            stats: self.entry.stats.snapshot(),
        }
    }

    async fn send_command(&self, command: SessionCommand) {
        // The DSP task drains this channel every block; a full channel
        // only means it has commands pending already.
        if self.cmd_tx.send(command).await.is_err() {
            log::debug!("[WS] Session {} DSP task gone", self.entry.id);
        }
    }

    /// Applies one control message, returning the reply to send.
    async fn handle(&mut self, text: &str) -> ControlReply {
        let message = match parse_control(text) {
            Ok(message) => message,
            Err(e) => return ControlReply::from_error(&e),
        };
        match self.apply(message).await {
            Ok(reply) => reply,
            Err(e) => ControlReply::from_error(&e),
        }
    }

    async fn apply(&mut self, message: ControlMessage) -> Result<ControlReply, WavegateError> {
        match message {
            ControlMessage::SetFrequency { hz } => {
                if hz <= 0 {
                    return Err(WavegateError::InvalidRequest(format!(
                        "frequency {hz} out of range"
                    )));
                }
                self.tuning.center_hz = hz;
                self.send_command(SessionCommand::Pipeline(PipelineCommand::SetFrequency(hz)))
                    .await;
            }
            ControlMessage::SetMode { mode } => {
                let mode = Mode::parse(&mode)?;
                if mode.is_iq()
                    && !self
                        .decision
                        .allowed_iq_modes
                        .iter()
                        .any(|m| m == mode.as_str())
                {
                    return Err(WavegateError::Admission(format!(
                        "mode {} is not allowed for this session",
                        mode.as_str()
                    )));
                }
                if mode.is_iq() && self.format == WireFormat::Opus {
                    return Err(WavegateError::InvalidRequest(
                        "opus is mono only; IQ modes need a PCM format".into(),
                    ));
                }
                self.tuning = self.tuning.with_mode(mode);
                self.send_command(SessionCommand::Pipeline(PipelineCommand::SetMode(mode)))
                    .await;
            }
            ControlMessage::SetBandwidth { low, high } => {
                self.tuning.with_passband(low, high).validate()?;
                self.tuning = self.tuning.with_passband(low, high);
                self.send_command(SessionCommand::Pipeline(PipelineCommand::SetBandwidth {
                    low,
                    high,
                }))
                .await;
            }
            ControlMessage::SetFilters { notches, nr, agc } => {
                validate_notches(&notches, &self.tuning)?;
                self.notches = notches.clone();
                self.send_command(SessionCommand::Pipeline(PipelineCommand::SetNotches(
                    notches,
                )))
                .await;
                if let Some(nr) = nr {
                    self.nr = nr;
                    self.send_command(SessionCommand::Pipeline(PipelineCommand::SetNr(nr)))
                        .await;
                }
                if let Some(agc) = agc {
                    self.agc = agc;
                    self.send_command(SessionCommand::Pipeline(PipelineCommand::SetAgc(agc)))
                        .await;
                }
            }
            ControlMessage::SpectrumZoom { center_hz, span_hz } => {
                if span_hz == 0 {
                    return Err(WavegateError::InvalidRequest("span must be positive".into()));
                }
                self.zoom = (center_hz, span_hz);
                self.send_command(SessionCommand::Zoom { center_hz, span_hz })
                    .await;
            }
            ControlMessage::AudioExtensionAttach {
                extension_name,
                params,
            } => {
                self.attach_extension(&extension_name, &params).await?;
            }
            ControlMessage::AudioExtensionDetach => {
                if self.extension_name.take().is_none() {
                    return Err(WavegateError::InvalidRequest(
                        "no audio extension attached".into(),
                    ));
                }
                self.send_command(SessionCommand::Detach).await;
            }
            ControlMessage::Ping => return Ok(ControlReply::Pong),
        }
        Ok(ControlReply::State {
            snapshot: self.snapshot(),
        })
    }

    async fn attach_extension(
        &mut self,
        name: &str,
        params: &HashMap<String, serde_json::Value>,
    ) -> Result<(), WavegateError> {
        if self.extension_name.is_some() {
            return Err(WavegateError::InvalidRequest(
                "an audio extension is already attached".into(),
            ));
        }
        if self.tuning.mode.is_iq() {
            return Err(WavegateError::InvalidRequest(
                "audio extensions require an audio mode".into(),
            ));
        }
        let (binding, mut bin_rx) = self
            .state
            .extensions
            .attach(name, AudioParams::mono(DEFAULT_AUDIO_RATE), params)
            .await?;

        // Forward the decoder's opaque frames to this socket (0x05) and to
        // any bound side-channel sockets. Ends when the decoder stops.
        let outbound = Arc::clone(&self.outbound);
        let ext_tx = self.entry.ext_tx.clone();
        tokio::spawn(async move {
            while let Some(payload) = bin_rx.recv().await {
                let packet = encode_extension(&payload);
                outbound.push(PacketKind::Extension, packet.clone());
                let _ = ext_tx.send(packet);
            }
        });

        self.extension_name = Some(name.to_string());
        self.send_command(SessionCommand::Attach(binding)).await;
        Ok(())
    }
}

/// Main streaming-session handler; runs from upgrade to close.
async fn handle_session(
    socket: WebSocket,
    state: AppState,
    permit: AdmissionPermit,
    tuning: Tuning,
    format: WireFormat,
    user_session_id: String,
) {
    let decision = permit.decision().clone();
    let (guard, entry) =
        state
            .sessions
            .register(permit.ip(), user_session_id, &state.shutdown);
    let stats = Arc::clone(&entry.stats);
    let outbound = Arc::new(OutboundQueue::new(
        state.config.streaming.outbound_queue_packets,
        Arc::clone(&stats),
    ));
    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (close_tx, mut close_rx) = mpsc::channel::<u16>(1);

    let consumer = state.bus.subscribe();
    let wideband = state.bus.params();
    tokio::spawn(dsp_task(DspTask {
        consumer,
        cmd_rx,
        outbound: Arc::clone(&outbound),
        stats: Arc::clone(&stats),
        close_tx,
        entry: Arc::clone(&entry),
        tuning,
        format,
        streaming: state.config.streaming.clone(),
        wideband,
    }));

    let mut control = SessionControl {
        state: state.clone(),
        entry: Arc::clone(&entry),
        decision: decision.clone(),
        tuning,
        format,
        zoom: (
            if wideband.sample_rate_hz > 0 {
                wideband.center_hz
            } else {
                state.config.ingest.default_center_hz
            },
            wideband.sample_rate_hz.max(48_000),
        ),
        agc: AgcProfile::default(),
        notches: Vec::new(),
        nr: NrSettings::default(),
        extension_name: None,
        cmd_tx,
        outbound: Arc::clone(&outbound),
    };

    let (mut sender, mut receiver) = socket.split();

    // Session state snapshot (0x04) straight away, so clients can render
    // before the first control round trip.
    if send_snapshot(&mut sender, &control).await.is_err() {
        log::warn!("[WS] {} closed before initial state", entry.id);
        return;
    }

    let idle_timeout = Duration::from_secs(decision.session_timeout.max(1));
    let max_deadline =
        tokio::time::Instant::now() + Duration::from_secs(decision.max_session_time.max(1));
    let max_sleep = tokio::time::sleep_until(max_deadline);
    tokio::pin!(max_sleep);

    let mut idle_check = tokio::time::interval(Duration::from_secs(5));
    idle_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut heartbeat = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut last_activity = Instant::now();
    let mut last_egress = Instant::now();

    loop {
        tokio::select! {
            _ = entry.cancel.cancelled() => {
                log::info!("[WS] {} force-closed", entry.id);
                break;
            }
            Some(code) = close_rx.recv() => {
                let reason = match code {
                    CLOSE_CODE_OVERLOAD => "overloaded",
                    CLOSE_CODE_SESSION_EXPIRED => "session expired",
                    _ => "closing",
                };
                let _ = sender
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })))
                    .await;
                break;
            }
            (kind, packet) = outbound.pop() => {
                if sender.send(Message::Binary(packet)).await.is_err() {
                    break;
                }
                if kind == PacketKind::Audio {
                    stats.audio_frames_sent.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    last_egress = Instant::now();
                    last_activity = last_egress;
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_activity = Instant::now();
                        let reply = control.handle(&text).await;
                        if sender.send(Message::Text(reply.to_json().into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
            _ = idle_check.tick() => {
                if last_activity.elapsed() > idle_timeout {
                    log::info!(
                        "[WS] {} idle for {:?}, closing",
                        entry.id,
                        last_activity.elapsed()
                    );
                    break;
                }
            }
            _ = &mut max_sleep => {
                log::info!("[WS] {} reached max session time", entry.id);
                let _ = sender
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_CODE_SESSION_EXPIRED,
                        reason: "session expired".into(),
                    })))
                    .await;
                break;
            }
            _ = heartbeat.tick() => {
                // Keep proxies from idling out a quiet session.
                if last_egress.elapsed() >= Duration::from_secs(HEARTBEAT_INTERVAL_SECS)
                    && sender.send(Message::Binary(encode_heartbeat())).await.is_err()
                {
                    break;
                }
            }
        }
    }

    // Graceful stop: the guard cancels the session token, which ends the
    // DSP task (detaching any extension) and unsubscribes from the bus.
    drop(guard);
    drop(permit);
}

async fn send_snapshot(
    sender: &mut SplitSink<WebSocket, Message>,
    control: &SessionControl,
) -> Result<(), axum::Error> {
    let snapshot = control.snapshot();
    let json = serde_json::to_vec(&snapshot).unwrap_or_default();
    sender.send(Message::Binary(encode_state(&json))).await
}

/// Everything the per-session DSP task owns.
struct DspTask {
    consumer: FanoutConsumer,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    outbound: Arc<OutboundQueue>,
    stats: Arc<SessionStats>,
    close_tx: mpsc::Sender<u16>,
    entry: Arc<SessionEntry>,
    tuning: Tuning,
    format: WireFormat,
    streaming: crate::state::StreamingConfig,
    wideband: crate::bus::WidebandParams,
}

/// Per-session DSP loop: one fan-out consumer in, wire packets out.
async fn dsp_task(mut task: DspTask) {
    let mut pipeline = Pipeline::new(task.tuning, DEFAULT_AUDIO_RATE, task.wideband);
    let mut spectrum = SpectrumEngine::new(&task.streaming, task.wideband);
    let mut encoder = Encoder::new(task.format);
    let mut extension: Option<ExtensionBinding> = None;
    let mut pcm_frames: Vec<PcmFrame> = Vec::new();
    let mut packets: Vec<Bytes> = Vec::new();
    let cancel = task.entry.cancel.clone();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            command = task.cmd_rx.recv() => {
                match command {
                    Some(command) => {
                        apply_command(command, &mut pipeline, &mut spectrum, &mut extension).await;
                    }
                    None => break,
                }
            }
            frame = task.consumer.recv() => {
                let Some(frame) = frame else { break };

                // Drain pending control changes at the block boundary.
                while let Ok(command) = task.cmd_rx.try_recv() {
                    apply_command(command, &mut pipeline, &mut spectrum, &mut extension).await;
                }

                pipeline.process(&frame, &mut pcm_frames);
                for pcm in &pcm_frames {
                    if let Some(ext) = &extension {
                        if pcm.channels == 1 {
                            ext.push_pcm(pcm.clone());
                        }
                        task.stats.extension_dropped.store(
                            ext.dropped(),
                            std::sync::atomic::Ordering::Relaxed,
                        );
                    }
                    packets.clear();
                    if let Err(e) = encoder.encode(pcm, &mut packets) {
                        log::warn!("[WS] {} encoder error: {}", task.entry.id, e);
                    }
                    for packet in packets.drain(..) {
                        task.outbound.push(PacketKind::Audio, packet);
                    }
                }
                task.stats.encoder_errors.store(
                    encoder.error_count(),
                    std::sync::atomic::Ordering::Relaxed,
                );
                if encoder.error_count() > ENCODER_ERROR_LIMIT {
                    log::warn!("[WS] {} closing after repeated encoder errors", task.entry.id);
                    let _ = task.close_tx.try_send(1011);
                    break;
                }

                if let Some(spectrum_frame) = spectrum.process(&frame) {
                    task.outbound
                        .push(PacketKind::Spectrum, encode_spectrum(&spectrum_frame));
                }

                task.stats.fanout_drops.store(
                    task.consumer.drops(),
                    std::sync::atomic::Ordering::Relaxed,
                );
                let audio_dropped = task
                    .stats
                    .audio_dropped
                    .load(std::sync::atomic::Ordering::Relaxed);
                if task.consumer.is_unhealthy() || audio_dropped >= OVERLOAD_AUDIO_DROPS {
                    log::warn!(
                        "[WS] {} overloaded (fanout drops {}, audio drops {})",
                        task.entry.id,
                        task.consumer.drops(),
                        audio_dropped
                    );
                    let _ = task.close_tx.try_send(CLOSE_CODE_OVERLOAD);
                    break;
                }
            }
        }
    }

    if let Some(ext) = extension.take() {
        ext.detach().await;
    }
}

async fn apply_command(
    command: SessionCommand,
    pipeline: &mut Pipeline,
    spectrum: &mut SpectrumEngine,
    extension: &mut Option<ExtensionBinding>,
) {
    match command {
        SessionCommand::Pipeline(command) => pipeline.apply(command),
        SessionCommand::Zoom { center_hz, span_hz } => spectrum.set_zoom(center_hz, span_hz),
        SessionCommand::Attach(binding) => {
            if let Some(previous) = extension.replace(binding) {
                previous.detach().await;
            }
        }
        SessionCommand::Detach => {
            if let Some(binding) = extension.take() {
                binding.detach().await;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DX-cluster side channel
// ─────────────────────────────────────────────────────────────────────────────

/// Query parameters of the `/ws/dxcluster` upgrade.
#[derive(Debug, Deserialize)]
pub struct DxClusterQuery {
    /// Binds the side channel to a streaming session so its
    /// audio-extension frames are mirrored here.
    #[serde(default)]
    pub user_session_id: Option<String>,
}

/// `/ws/dxcluster` upgrade handler.
pub async fn dxcluster_ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<DxClusterQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_dxcluster(socket, state, query.user_session_id))
}

async fn handle_dxcluster(socket: WebSocket, state: AppState, user_session_id: Option<String>) {
    let (mut sender, mut receiver) = socket.split();

    // History first, so a just-connected client has spots immediately.
    if let Some(cluster) = &state.dx_cluster {
        for spot in cluster.recent_spots() {
            let json = match serde_json::to_string(&serde_json::json!({
                "type": "spot",
                "spot": spot,
            })) {
                Ok(json) => json,
                Err(_) => continue,
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                return;
            }
        }
    }

    let mut spot_rx = state.dx_cluster.as_ref().map(|c| c.subscribe_spots());
    let mut ext_rx = user_session_id
        .as_deref()
        .and_then(|id| state.sessions.find_by_user_session_id(id))
        .map(|entry| entry.ext_tx.subscribe());

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            result = async { spot_rx.as_mut().expect("guarded").recv().await }, if spot_rx.is_some() => {
                match result {
                    Ok(spot) => {
                        let json = serde_json::json!({ "type": "spot", "spot": spot }).to_string();
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        log::debug!("[DX] Side channel lagged by {} spots", missed);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        spot_rx = None;
                    }
                }
            }
            result = async { ext_rx.as_mut().expect("guarded").recv().await }, if ext_rx.is_some() => {
                match result {
                    Ok(packet) => {
                        if sender.send(Message::Binary(packet)).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        ext_rx = None;
                    }
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}
