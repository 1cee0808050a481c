//! Wavegate server client: admission pre-check, receiver description and
//! the streaming WebSocket.

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;
use wavegate_core::{decode_pcm_packet, DecodedPcm};

/// `/connection` response subset the recorder cares about.
#[derive(Debug, Deserialize)]
pub struct ConnectionDecision {
    pub allowed: bool,
    pub reason: String,
    #[allow(dead_code)]
    pub max_session_time: u64,
}

/// Connection parameters for one recording run.
pub struct ServerTarget {
    pub host: String,
    pub port: u16,
    pub ssl: bool,
}

impl ServerTarget {
    fn http_base(&self) -> String {
        let scheme = if self.ssl { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    fn ws_url(&self, frequency: i64, mode: &str, user_session_id: &str) -> String {
        let scheme = if self.ssl { "wss" } else { "ws" };
        format!(
            "{}://{}:{}/ws?frequency={}&mode={}&user_session_id={}&format=pcm-be",
            scheme, self.host, self.port, frequency, mode, user_session_id
        )
    }
}

/// Runs the admission pre-check; refusal is fatal for a recorder.
pub async fn check_admission(
    target: &ServerTarget,
    user_session_id: &str,
    password: Option<&str>,
) -> Result<ConnectionDecision> {
    let client = reqwest::Client::new();
    let decision: ConnectionDecision = client
        .post(format!("{}/connection", target.http_base()))
        .json(&json!({
            "user_session_id": user_session_id,
            "password": password,
        }))
        .send()
        .await
        .context("Admission pre-check request failed")?
        .json()
        .await
        .context("Admission pre-check returned malformed JSON")?;
    if !decision.allowed {
        bail!("Admission refused: {}", decision.reason);
    }
    Ok(decision)
}

/// Fetches the opaque receiver description for the companion JSON.
pub async fn fetch_description(target: &ServerTarget) -> Result<serde_json::Value> {
    reqwest::get(format!("{}/api/description", target.http_base()))
        .await
        .context("Description request failed")?
        .json()
        .await
        .context("Description was not valid JSON")
}

/// One decoded stream packet delivered to the recording loop.
pub enum StreamEvent {
    Pcm(DecodedPcm),
    Closed,
}

/// Open streaming socket.
pub struct StreamSocket {
    inner: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
}

impl StreamSocket {
    /// Connects and negotiates the stream.
    pub async fn connect(
        target: &ServerTarget,
        frequency: i64,
        mode: &str,
        user_session_id: &str,
    ) -> Result<Self> {
        let url = target.ws_url(frequency, mode, user_session_id);
        log::info!("Connecting to {}", url);
        let (inner, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .context("WebSocket connect failed (admission or network)")?;
        Ok(Self { inner })
    }

    /// Waits for the next audio/IQ packet, skipping control traffic.
    pub async fn next_event(&mut self) -> Result<StreamEvent> {
        loop {
            let message = match self.inner.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(e).context("WebSocket read failed"),
                None => return Ok(StreamEvent::Closed),
            };
            match message {
                Message::Binary(payload) => {
                    if let Some(decoded) = decode_pcm_packet(payload) {
                        return Ok(StreamEvent::Pcm(decoded));
                    }
                    // Spectrum, state and heartbeat frames are irrelevant
                    // to a recorder.
                }
                Message::Close(_) => return Ok(StreamEvent::Closed),
                _ => {}
            }
        }
    }
}
