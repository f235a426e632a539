use crate::game::ClientSession;
use crate::input::BotInput;
use crate::stats::NetworkStats;
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::protocol::{decode, encode, Envelope, Packet, MAX_DATAGRAM_SIZE, PROTOCOL_VERSION};
use shared::transport::{ReliableEndpoint, Target};
use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep, MissedTickBehavior};

/// Link conditions applied on top of the real network
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkSimulation {
    /// Added round-trip latency, split evenly between both directions
    pub fake_ping_ms: u64,
    /// Probability in `[0, 1]` that a datagram is dropped, per direction
    pub packet_loss: f64,
}

impl LinkSimulation {
    fn one_way(&self) -> Duration {
        Duration::from_millis(self.fake_ping_ms / 2)
    }
}

pub struct Client {
    socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    endpoint: ReliableEndpoint,

    session: ClientSession,
    bot: BotInput,
    stats: NetworkStats,

    link: LinkSimulation,
    link_rng: StdRng,
    inbound: VecDeque<(Instant, Envelope)>,

    frame_duration: Duration,
    next_ping_nonce: u64,
    pings_in_flight: BTreeMap<u64, Instant>,
    was_connected: bool,
}

impl Client {
    pub async fn new(
        server_addr: &str,
        link: LinkSimulation,
        frame_rate: u32,
        seed: u64,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);
        let server_addr = server_addr.parse()?;

        Ok(Client {
            socket,
            server_addr,
            endpoint: ReliableEndpoint::default(),
            session: ClientSession::new(seed),
            bot: BotInput::new(seed.wrapping_add(1)),
            stats: NetworkStats::new(),
            link: LinkSimulation {
                packet_loss: link.packet_loss.clamp(0.0, 1.0),
                ..link
            },
            link_rng: StdRng::seed_from_u64(seed.wrapping_add(2)),
            inbound: VecDeque::new(),
            frame_duration: Duration::from_secs_f32(1.0 / frame_rate.max(1) as f32),
            next_ping_nonce: 0,
            pings_in_flight: BTreeMap::new(),
            was_connected: false,
        })
    }

    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    fn dropped_by_link(&mut self) -> bool {
        self.link.packet_loss > 0.0 && self.link_rng.gen_bool(self.link.packet_loss)
    }

    async fn send_envelope(&mut self, envelope: &Envelope) {
        if self.dropped_by_link() {
            debug!("Link dropped outgoing {:?}", envelope.packet);
            return;
        }
        let bytes = match encode(envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to encode packet: {}", e);
                return;
            }
        };

        let delay = self.link.one_way();
        if delay.is_zero() {
            if let Err(e) = self.socket.send_to(&bytes, self.server_addr).await {
                error!("Error sending packet: {}", e);
            }
            return;
        }

        let socket = Arc::clone(&self.socket);
        let server_addr = self.server_addr;
        tokio::spawn(async move {
            sleep(delay).await;
            if let Err(e) = socket.send_to(&bytes, server_addr).await {
                error!("Error sending packet: {}", e);
            }
        });
    }

    async fn send_packet(&mut self, packet: Packet) {
        let envelope = self.endpoint.wrap(packet, Instant::now());
        self.send_envelope(&envelope).await;
    }

    async fn connect(&mut self) {
        info!("Connecting to server at {}...", self.server_addr);
        self.send_packet(Packet::Connect {
            client_version: PROTOCOL_VERSION,
        })
        .await;
    }

    async fn ping(&mut self) {
        let nonce = self.next_ping_nonce;
        self.next_ping_nonce += 1;
        self.pings_in_flight.insert(nonce, Instant::now());
        // Unanswered pings older than a few seconds are never coming back.
        self.pings_in_flight.retain(|_, sent| sent.elapsed() < Duration::from_secs(5));
        self.send_packet(Packet::Ping { nonce }).await;
    }

    fn receive_datagram(&mut self, bytes: &[u8]) {
        if self.dropped_by_link() {
            return;
        }
        match decode(bytes) {
            Ok(envelope) => {
                let deliver_at = Instant::now() + self.link.one_way();
                self.inbound.push_back((deliver_at, envelope));
            }
            Err(e) => warn!("Dropping malformed datagram: {}", e),
        }
    }

    /// Hands every datagram whose simulated latency has passed to the session.
    fn deliver_inbound(&mut self, now: Instant) {
        while self
            .inbound
            .front()
            .is_some_and(|(deliver_at, _)| *deliver_at <= now)
        {
            let Some((_, envelope)) = self.inbound.pop_front() else {
                break;
            };
            let Some(packet) = self.endpoint.receive(envelope) else {
                continue;
            };

            if let Packet::Pong { nonce } = packet {
                if let Some(sent) = self.pings_in_flight.remove(&nonce) {
                    let rtt = now.duration_since(sent).as_secs_f32();
                    self.session.set_rtt(rtt);
                    self.stats.record_ping(rtt * 1000.0);
                }
            }
            self.session.handle_packet(packet);
        }
    }

    async fn flush(&mut self, now: Instant) {
        for outgoing in self.session.outbox_mut().drain() {
            if outgoing.target != Target::Authority {
                warn!("Client cannot address {:?}", outgoing.target);
                continue;
            }
            self.send_packet(outgoing.packet).await;
        }

        let mut envelopes = self.endpoint.resends(now);
        envelopes.extend(self.endpoint.flush_acks());
        for envelope in envelopes {
            self.send_envelope(&envelope).await;
        }
    }

    async fn frame(&mut self, frame_delta: f32) {
        let now = Instant::now();
        self.deliver_inbound(now);

        self.bot.update(frame_delta);
        let report = self.session.frame(&mut self.bot, frame_delta);
        for reconciliation in &report.reconciliations {
            self.stats.record_correction(reconciliation.correction);
        }
        if report.fired {
            debug!("Fired at tick {}", self.session.clock().current_tick());
        }

        self.flush(now).await;
        self.stats.sample(now);
    }

    fn log_status(&self) {
        let summary = self.stats.summary();
        let Some(predictor) = self.session.local_predictor() else {
            info!("Waiting for server...");
            return;
        };
        info!(
            "Tick {} | pos {:.2?} | ping {:.0}ms (max {:.0}) | correction avg {:.3}m max {:.3}m | unacked {} | remotes {} | projectiles {}",
            self.session.clock().current_tick(),
            predictor.state().position,
            summary.average_ping_ms,
            summary.max_ping_ms,
            summary.average_correction,
            summary.max_correction,
            predictor.unacknowledged_batches(),
            self.session.remote_ids().len(),
            self.session.projectiles().len(),
        );
    }

    /// Runs until disconnected, or until `run_for` elapses when given.
    pub async fn run(&mut self, run_for: Option<Duration>) -> Result<(), Box<dyn std::error::Error>> {
        self.connect().await;

        let mut frame_interval = interval(self.frame_duration);
        frame_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ping_interval = interval(Duration::from_millis(500));
        let mut status_interval = interval(Duration::from_secs(1));

        let started = Instant::now();
        let mut last_frame = Instant::now();
        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];

        loop {
            if run_for.is_some_and(|limit| started.elapsed() >= limit) {
                break;
            }

            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => self.receive_datagram(&buffer[..len]),
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                _ = frame_interval.tick() => {
                    let now = Instant::now();
                    let frame_delta = now.duration_since(last_frame).as_secs_f32();
                    last_frame = now;
                    self.frame(frame_delta).await;

                    if self.session.is_connected() {
                        self.was_connected = true;
                    } else if self.was_connected {
                        break;
                    }
                },

                _ = ping_interval.tick() => {
                    if self.session.is_connected() {
                        self.ping().await;
                    }
                },

                _ = status_interval.tick() => self.log_status(),
            }
        }

        if self.session.is_connected() {
            self.send_packet(Packet::Disconnect).await;
        }

        Ok(())
    }
}
