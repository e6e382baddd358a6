use crate::config::BrokerLinkConfig;
use crate::credentials::CredentialProvider;
use crate::mqtt::heartbeat::{heartbeat_payload, HeartbeatCycle};
use crate::mqtt::topic::{heartbeat_topic, topics_for_vehicle, vin_from_topic};
use crate::sigv4::{sign_websocket_url, BrokerSigningRequest};
use async_trait::async_trait;
use common::{DomainError, DomainResult, LinkControl, TelemetrySink};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, Transport};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use voltra_payload::{decode_envelope, normalize_batch, AliasLookup};

/// Reconnect delay ceiling.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Cap on the backoff exponent; beyond this the ceiling applies anyway.
const MAX_BACKOFF_EXPONENT: u32 = 5;

/// Observable connection state of the broker link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Exponential reconnect delay: `base × 2^(attempt−1)`, capped at 60 s.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
    base.saturating_mul(1u32 << exponent).min(MAX_BACKOFF)
}

enum SessionCommand {
    SetActiveVin(String),
}

enum SessionEnd {
    Shutdown,
    Superseded,
}

struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
}

struct LinkShared {
    active_vin: Option<String>,
    /// Vehicles whose topics we want subscribed; survives reconnects.
    desired_vins: HashSet<String>,
    /// Topics confirmed on the current physical connection; cleared on every
    /// reconnect because broker sessions are clean.
    confirmed_topics: HashSet<String>,
    endpoint_index: usize,
    session: Option<SessionHandle>,
}

struct LinkInner {
    config: BrokerLinkConfig,
    credentials: Arc<CredentialProvider>,
    sink: Arc<dyn TelemetrySink>,
    aliases: AliasLookup,
    /// Generation counter; every connect/reconnect attempt and teardown
    /// mints a new value, and stale continuations compare against it.
    generation: AtomicU64,
    shared: Mutex<LinkShared>,
    status_tx: watch::Sender<LinkStatus>,
    shutdown: CancellationToken,
}

/// Driver for the single physical broker connection.
///
/// One link serves the whole account: the active vehicle scopes inbound
/// message handling and the heartbeat, while background vehicles keep their
/// subscriptions alive on the same connection.
#[derive(Clone)]
pub struct BrokerLink {
    inner: Arc<LinkInner>,
}

impl BrokerLink {
    pub fn new(
        config: BrokerLinkConfig,
        credentials: Arc<CredentialProvider>,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        let (status_tx, _) = watch::channel(LinkStatus::Disconnected);
        Self {
            inner: Arc::new(LinkInner {
                config,
                credentials,
                sink,
                aliases: AliasLookup::from_static_table(),
                generation: AtomicU64::new(0),
                shared: Mutex::new(LinkShared {
                    active_vin: None,
                    desired_vins: HashSet::new(),
                    confirmed_topics: HashSet::new(),
                    endpoint_index: 0,
                    session: None,
                }),
                status_tx,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Watch the link status for dashboard display.
    pub fn status(&self) -> watch::Receiver<LinkStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Connect the link for a vehicle, or retarget a live connection.
    ///
    /// Connected to the same vehicle: no-op. Connected to another vehicle:
    /// the subscription scope changes on the same physical connection.
    /// Otherwise a supervisor task is spawned that owns the connect/backoff
    /// cycle until shutdown or supersession.
    pub async fn connect(&self, vin: &str) -> DomainResult<()> {
        if vin.is_empty() {
            return Ok(());
        }
        if self.inner.shutdown.is_cancelled() {
            warn!(vin = %vin, "ignoring connect on a shut-down broker link");
            return Ok(());
        }

        let mut shared = self.inner.shared.lock().await;
        shared.desired_vins.insert(vin.to_string());

        let session_alive = shared
            .session
            .as_ref()
            .map(|s| !s.commands.is_closed())
            .unwrap_or(false);
        if session_alive {
            if shared.active_vin.as_deref() == Some(vin) {
                return Ok(());
            }
            shared.active_vin = Some(vin.to_string());
            if let Some(session) = &shared.session {
                let _ = session
                    .commands
                    .send(SessionCommand::SetActiveVin(vin.to_string()));
            }
            debug!(vin = %vin, "retargeted live broker session");
            return Ok(());
        }

        shared.active_vin = Some(vin.to_string());
        shared.endpoint_index = 0;
        drop(shared);

        let token = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            run_supervisor(inner, token).await;
        });
        Ok(())
    }

    /// Tear the link down. Terminal: pending continuations are invalidated
    /// via the generation counter and both subscription sets are cleared.
    pub async fn shutdown(&self) {
        info!("shutting down broker link");
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.shutdown.cancel();

        let mut shared = self.inner.shared.lock().await;
        shared.session = None;
        shared.desired_vins.clear();
        shared.confirmed_topics.clear();
        shared.active_vin = None;
        shared.endpoint_index = 0;
        self.inner.status_tx.send_replace(LinkStatus::Disconnected);
    }
}

#[async_trait]
impl LinkControl for BrokerLink {
    async fn switch_vehicle(&self, vin: &str) -> DomainResult<()> {
        self.connect(vin).await
    }
}

/// Owns the connect → session → backoff → reconnect cycle for one
/// generation token.
async fn run_supervisor(inner: Arc<LinkInner>, token: u64) {
    let mut attempts: u32 = 0;
    loop {
        if inner.shutdown.is_cancelled() || inner.generation.load(Ordering::SeqCst) != token {
            break;
        }
        inner.status_tx.send_replace(LinkStatus::Connecting);

        match run_session(&inner, token, &mut attempts).await {
            Ok(SessionEnd::Shutdown) => {
                inner.status_tx.send_replace(LinkStatus::Disconnected);
                break;
            }
            Ok(SessionEnd::Superseded) => break,
            Err(e) => {
                inner.status_tx.send_replace(LinkStatus::Error);
                attempts += 1;
                let delay = backoff_delay(inner.config.reconnect_base_delay, attempts);
                warn!(
                    error = %e,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    "broker session ended, scheduling reconnect"
                );
                tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

/// Run a single physical connection from signed URL to terminal event.
///
/// Every attempt re-derives credentials and a fresh signed URL; the broker
/// does not preserve sessions, so subscriptions are restored exhaustively
/// on connect before the heartbeat starts.
async fn run_session(
    inner: &Arc<LinkInner>,
    token: u64,
    attempts: &mut u32,
) -> DomainResult<SessionEnd> {
    let credentials = inner.credentials.ensure_credentials().await?;

    let (host, active_vin) = {
        let mut shared = inner.shared.lock().await;
        let hosts = inner.config.hosts();
        let host = hosts[shared.endpoint_index % hosts.len()].to_string();
        shared.endpoint_index = (shared.endpoint_index + 1) % hosts.len();
        let vin = shared.active_vin.clone().ok_or_else(|| {
            DomainError::Transport("no active vehicle for broker session".to_string())
        })?;
        (host, vin)
    };

    let url = sign_websocket_url(&BrokerSigningRequest {
        endpoint: &host,
        region: &inner.config.region,
        credentials: &credentials,
        now: chrono::Utc::now(),
    });

    let client_id: String = active_vin.chars().take(20).collect();
    let mut options = MqttOptions::new(client_id, url, 443);
    options.set_transport(Transport::wss_with_default_config());
    options.set_keep_alive(inner.config.keep_alive);
    options.set_clean_session(true);

    let (client, mut eventloop) = AsyncClient::new(options, inner.config.channel_capacity);
    let (command_tx, mut command_rx) = mpsc::unbounded_channel();
    {
        let mut shared = inner.shared.lock().await;
        if inner.generation.load(Ordering::SeqCst) != token {
            return Ok(SessionEnd::Superseded);
        }
        shared.session = Some(SessionHandle {
            commands: command_tx,
        });
        shared.confirmed_topics.clear();
    }

    info!(host = %host, vin = %active_vin, "opening broker session");

    // Deadline-based heartbeat scheduling: the arm below owns its Instant,
    // so handlers are free to reschedule it.
    let mut next_beat: Option<tokio::time::Instant> = None;
    let mut heartbeat_cycle = HeartbeatCycle::new();
    let heartbeat_period = inner.config.heartbeat_interval;

    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => {
                let _ = client.disconnect().await;
                return Ok(SessionEnd::Shutdown);
            }
            Some(command) = command_rx.recv() => {
                if inner.generation.load(Ordering::SeqCst) != token {
                    let _ = client.disconnect().await;
                    return Ok(SessionEnd::Superseded);
                }
                match command {
                    SessionCommand::SetActiveVin(vin) => {
                        inner.subscribe_vehicle(&client, &vin, false).await;
                        heartbeat_cycle = HeartbeatCycle::new();
                        publish_heartbeat(&client, &vin, heartbeat_cycle.next_state()).await?;
                        next_beat = Some(tokio::time::Instant::now() + heartbeat_period);
                    }
                }
            }
            _ = tokio::time::sleep_until(heartbeat_deadline(next_beat)), if next_beat.is_some() => {
                if inner.generation.load(Ordering::SeqCst) != token {
                    let _ = client.disconnect().await;
                    return Ok(SessionEnd::Superseded);
                }
                if let Some(vin) = inner.active_vin().await {
                    let state = heartbeat_cycle.next_state();
                    publish_heartbeat(&client, &vin, state).await?;
                }
                next_beat = Some(tokio::time::Instant::now() + heartbeat_period);
            }
            event = eventloop.poll() => {
                if inner.generation.load(Ordering::SeqCst) != token {
                    let _ = client.disconnect().await;
                    return Ok(SessionEnd::Superseded);
                }
                match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!(host = %host, "connected to telemetry broker");
                        *attempts = 0;
                        inner.status_tx.send_replace(LinkStatus::Connected);
                        // The heartbeat starts only after the full desired
                        // subscription set is restored.
                        inner.restore_subscriptions(&client).await;
                        if let Some(vin) = inner.active_vin().await {
                            heartbeat_cycle = HeartbeatCycle::new();
                            publish_heartbeat(&client, &vin, heartbeat_cycle.next_state()).await?;
                            next_beat = Some(tokio::time::Instant::now() + heartbeat_period);
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        inner.handle_message(&publish.topic, &publish.payload).await;
                    }
                    Ok(Event::Incoming(Packet::SubAck(_))) => {
                        debug!("subscription acknowledged");
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        inner.status_tx.send_replace(LinkStatus::Disconnected);
                        return Err(DomainError::Transport(
                            "broker sent disconnect".to_string(),
                        ));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        inner.status_tx.send_replace(LinkStatus::Disconnected);
                        return Err(DomainError::Transport(e.to_string()));
                    }
                }
            }
        }
    }
}

/// Deadline for the heartbeat arm; the guard keeps an unset deadline from
/// ever firing, so the fallback only parks the timer.
fn heartbeat_deadline(next_beat: Option<tokio::time::Instant>) -> tokio::time::Instant {
    next_beat.unwrap_or_else(|| tokio::time::Instant::now() + Duration::from_secs(3600))
}

async fn publish_heartbeat(client: &AsyncClient, vin: &str, state: u8) -> DomainResult<()> {
    let payload = heartbeat_payload(state, chrono::Utc::now().timestamp_millis());
    client
        .publish(heartbeat_topic(vin), QoS::AtMostOnce, false, payload)
        .await
        .map_err(|e| DomainError::Transport(format!("heartbeat publish failed: {}", e)))
}

impl LinkInner {
    async fn active_vin(&self) -> Option<String> {
        self.shared.lock().await.active_vin.clone()
    }

    /// Subscribe one vehicle's topics, skipping already-confirmed ones
    /// unless forced. Subscribe failures are logged and do not abort the
    /// remaining topics.
    async fn subscribe_vehicle(&self, client: &AsyncClient, vin: &str, force: bool) {
        for topic in topics_for_vehicle(vin) {
            if !force {
                let shared = self.shared.lock().await;
                if shared.confirmed_topics.contains(&topic) {
                    continue;
                }
            }
            match client.subscribe(&topic, QoS::AtLeastOnce).await {
                Ok(()) => {
                    debug!(topic = %topic, "subscribed to broker topic");
                    self.shared.lock().await.confirmed_topics.insert(topic);
                }
                Err(e) => {
                    error!(topic = %topic, error = %e, "broker subscribe failed");
                }
            }
        }
    }

    /// Re-subscribe every desired vehicle's topics after a reconnect.
    async fn restore_subscriptions(&self, client: &AsyncClient) {
        let vins: Vec<String> = {
            let mut shared = self.shared.lock().await;
            shared.confirmed_topics.clear();
            if shared.desired_vins.is_empty() {
                if let Some(vin) = shared.active_vin.clone() {
                    shared.desired_vins.insert(vin);
                }
            }
            shared.desired_vins.iter().cloned().collect()
        };
        for vin in vins {
            self.subscribe_vehicle(client, &vin, true).await;
        }
    }

    /// Handle an inbound broker message.
    ///
    /// Each message gets its own root span rather than nesting under the
    /// long-lived session span.
    async fn handle_message(&self, topic: &str, payload: &[u8]) {
        let span = info_span!(
            parent: Span::none(),
            "broker_message",
            topic = %topic,
            payload_size = payload.len(),
            vin = tracing::field::Empty,
        );

        async {
            let Some(active_vin) = self.active_vin().await else {
                return;
            };
            Span::current().record("vin", active_vin.as_str());

            if let Some(topic_vin) = vin_from_topic(topic) {
                if topic_vin != active_vin {
                    debug!(topic_vin = %topic_vin, "dropping message for inactive vehicle");
                    return;
                }
            }

            let elements = match decode_envelope(payload) {
                Ok(elements) => elements,
                Err(e) => {
                    warn!(error = %e, "dropping undecodable broker message");
                    return;
                }
            };

            let signals = normalize_batch(&elements, &self.aliases);
            if signals.is_empty() {
                return;
            }

            debug!(signal_count = signals.len(), "broker telemetry received");
            if let Err(e) = self.sink.ingest(&active_vin, signals).await {
                error!(error = %e, "telemetry sink rejected broker update");
            }
        }
        .instrument(span)
        .await
    }
}
