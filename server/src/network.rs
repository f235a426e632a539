//! Server network layer handling UDP communications and game loop coordination

use crate::client_manager::ClientManager;
use crate::game::{GameConfig, GameState};
use log::{debug, error, info, warn};
use shared::protocol::{decode, encode, Envelope, Packet, PROTOCOL_VERSION};
use shared::transport::Target;
use shared::OwnerId;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, MissedTickBehavior};

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    DatagramReceived {
        envelope: Envelope,
        addr: SocketAddr,
    },
    ClientTimeout {
        client_id: OwnerId,
    },
}

/// Messages sent from game loop to network tasks
#[derive(Debug)]
pub enum GameMessage {
    SendDatagram { bytes: Vec<u8>, addr: SocketAddr },
}

/// Main server coordinating networking and game simulation
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    game_state: GameState,
    tick_duration: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: Option<mpsc::UnboundedReceiver<GameMessage>>,
}

impl Server {
    pub async fn new(
        addr: &str,
        config: GameConfig,
        max_clients: usize,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();
        let tick_duration = Duration::from_secs_f32(1.0 / config.tick_rate.max(1) as f32);

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(max_clients))),
            game_state: GameState::new(config),
            tick_duration,
            server_tx,
            server_rx,
            game_tx,
            game_rx: Some(game_rx),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Box<dyn std::error::Error>> {
        Ok(self.socket.local_addr()?)
    }

    /// Spawns task that continuously listens for incoming datagrams
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match decode(&buffer[..len]) {
                        Ok(envelope) => {
                            if let Err(e) =
                                server_tx.send(ServerMessage::DatagramReceived { envelope, addr })
                            {
                                error!("Failed to send datagram to main loop: {}", e);
                                break;
                            }
                        }
                        Err(e) => warn!("Dropping datagram from {}: {}", addr, e),
                    },
                    Err(e) => {
                        error!("Error receiving datagram: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that drains the outgoing datagram queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let Some(mut game_rx) = self.game_rx.take() else {
            warn!("Network sender already running");
            return;
        };

        tokio::spawn(async move {
            while let Some(GameMessage::SendDatagram { bytes, addr }) = game_rx.recv().await {
                if let Err(e) = socket.send_to(&bytes, addr).await {
                    error!("Failed to send datagram to {}: {}", addr, e);
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts()
                };

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    fn queue_datagram(&self, bytes: Vec<u8>, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendDatagram { bytes, addr }) {
            error!("Failed to queue datagram for sending: {}", e);
        }
    }

    /// Sends a one-off unsequenced packet to an address with no connection.
    fn reject(&self, addr: SocketAddr, reason: &str) {
        let envelope = Envelope {
            sequence: None,
            acks: Vec::new(),
            packet: Some(Packet::Disconnected {
                reason: reason.to_string(),
            }),
        };
        match encode(&envelope) {
            Ok(bytes) => self.queue_datagram(bytes, addr),
            Err(e) => error!("Failed to encode rejection for {}: {}", addr, e),
        }
    }

    async fn handle_datagram(&mut self, envelope: Envelope, addr: SocketAddr) {
        let known = {
            let clients = self.clients.read().await;
            clients.find_client_by_addr(addr)
        };

        match known {
            Some(client_id) => {
                let sequence = envelope.sequence;
                let packet = {
                    let mut clients = self.clients.write().await;
                    let Some(client) = clients.get_mut(client_id) else {
                        return;
                    };
                    client.touch();
                    client.endpoint.receive(envelope)
                };
                match packet {
                    Some(Packet::Connect { client_version }) => {
                        self.reconnect(client_id, addr, sequence, client_version).await;
                    }
                    Some(packet) => self.handle_packet(client_id, packet).await,
                    None => {}
                }
            }
            None => match &envelope.packet {
                Some(Packet::Connect { client_version }) => {
                    info!("Client connecting from {} (version: {})", addr, client_version);
                    let client_version = *client_version;
                    self.accept(envelope, addr, client_version).await;
                }
                _ => debug!("Ignoring datagram from unknown address {}", addr),
            },
        }
    }

    async fn accept(&mut self, envelope: Envelope, addr: SocketAddr, client_version: u32) {
        if client_version != PROTOCOL_VERSION {
            warn!("Rejecting {}: protocol {} != {}", addr, client_version, PROTOCOL_VERSION);
            self.reject(addr, "Protocol version mismatch");
            return;
        }

        let client_id = {
            let mut clients = self.clients.write().await;
            let client_id = clients.add_client(addr);
            if let Some(client) = client_id.and_then(|id| clients.get_mut(id)) {
                client.endpoint.receive(envelope);
            }
            client_id
        };

        match client_id {
            Some(client_id) => {
                self.game_state.add_player(client_id);
            }
            None => self.reject(addr, "Server full"),
        }
    }

    async fn drop_client(&mut self, client_id: OwnerId) {
        {
            let mut clients = self.clients.write().await;
            clients.remove_client(&client_id);
        }
        self.game_state.remove_player(client_id);
    }

    /// A fresh Connect from a known address replaces the old session.
    async fn reconnect(
        &mut self,
        client_id: OwnerId,
        addr: SocketAddr,
        sequence: Option<u32>,
        client_version: u32,
    ) {
        info!("Client {} reconnecting from {}", client_id, addr);
        self.drop_client(client_id).await;
        // Keep the sequence so the new endpoint acks it and ignores resends.
        let envelope = Envelope {
            sequence,
            acks: Vec::new(),
            packet: Some(Packet::Connect { client_version }),
        };
        self.accept(envelope, addr, client_version).await;
    }

    /// Routes a packet from a connected client
    async fn handle_packet(&mut self, client_id: OwnerId, packet: Packet) {
        match packet {
            Packet::Disconnect => {
                self.drop_client(client_id).await;
            }
            packet => self.game_state.handle_packet(client_id, packet),
        }
    }

    /// Encodes everything the game queued this tick, plus resends and acks.
    async fn flush_outbox(&mut self) {
        let outgoing = self.game_state.outbox_mut().drain();
        let now = Instant::now();

        let datagrams = {
            let mut clients = self.clients.write().await;
            let connected = clients.client_ids();
            let mut datagrams = Vec::new();

            for message in outgoing {
                if message.target == Target::Authority {
                    warn!("Server tried to send {:?} to itself", message.packet);
                    continue;
                }
                for client_id in message.target.recipients(&connected) {
                    let Some(client) = clients.get_mut(client_id) else {
                        continue;
                    };
                    match client.encode(message.packet.clone(), now) {
                        Ok(bytes) => datagrams.push((bytes, client.addr)),
                        Err(e) => error!("Failed to encode packet for client {}: {}", client_id, e),
                    }
                }
            }

            for client in clients.clients_mut() {
                for envelope in client.maintenance(now) {
                    match encode(&envelope) {
                        Ok(bytes) => datagrams.push((bytes, client.addr)),
                        Err(e) => error!("Failed to encode resend for client {}: {}", client.id, e),
                    }
                }
            }
            datagrams
        };

        for (bytes, addr) in datagrams {
            self.queue_datagram(bytes, addr);
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_tick = Instant::now();

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::DatagramReceived { envelope, addr }) => {
                            self.handle_datagram(envelope, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { client_id }) => {
                            info!("Client {} timed out", client_id);
                            self.game_state.remove_player(client_id);
                        },
                        None => {
                            info!("Network tasks stopped, server shutting down");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_tick).as_secs_f32();
                    last_tick = now;

                    let ticks = self.game_state.advance(dt);
                    self.flush_outbox().await;

                    let tick = self.game_state.tick();
                    if ticks > 0 && tick % 250 == 0 {
                        debug!(
                            "Tick {}: {} players, {} projectiles",
                            tick,
                            self.game_state.player_count(),
                            self.game_state.projectiles().len()
                        );
                    }
                },
            }
        }

        Ok(())
    }
}
