//! Connection tracking for the authoritative server
//!
//! This module handles the server-side view of connected clients:
//! - Connection lifecycle (connect, disconnect, timeout)
//! - Capacity limits and address lookup
//! - Per-connection reliable delivery state
//!
//! Movement input is not buffered here; each player's batches queue inside
//! their authoritative replica in the game state.

use log::info;
use shared::protocol::{encode, Envelope, Packet};
use shared::transport::ReliableEndpoint;
use shared::{OwnerId, ProtocolError};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A connected client and its delivery state
#[derive(Debug)]
pub struct Client {
    /// Server-assigned id, also the owner id of the client's player
    pub id: OwnerId,
    pub addr: SocketAddr,
    /// Last time any datagram arrived from this client
    pub last_seen: Instant,
    pub endpoint: ReliableEndpoint,
}

impl Client {
    pub fn new(id: OwnerId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            endpoint: ReliableEndpoint::default(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// True if nothing has been heard from the client within `timeout`.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    /// Wraps and encodes a packet for this client.
    pub fn encode(&mut self, packet: Packet, now: Instant) -> Result<Vec<u8>, ProtocolError> {
        encode(&self.endpoint.wrap(packet, now))
    }

    /// Overdue resends plus a bare ack if one is owed.
    pub fn maintenance(&mut self, now: Instant) -> Vec<Envelope> {
        let mut envelopes = self.endpoint.resends(now);
        envelopes.extend(self.endpoint.flush_acks());
        envelopes
    }
}

/// All connected clients, keyed by id
///
/// Ids start at 1 and are never reused while the server runs, so a late
/// packet for a departed player can never be mistaken for a newcomer's.
pub struct ClientManager {
    clients: BTreeMap<OwnerId, Client>,
    next_client_id: OwnerId,
    max_clients: usize,
    timeout: Duration,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: BTreeMap::new(),
            next_client_id: 1,
            max_clients,
            timeout: CLIENT_TIMEOUT,
        }
    }

    /// Registers a connection. Returns `None` when the server is full.
    pub fn add_client(&mut self, addr: SocketAddr) -> Option<OwnerId> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients.insert(client_id, Client::new(client_id, addr));
        Some(client_id)
    }

    pub fn remove_client(&mut self, client_id: &OwnerId) -> bool {
        if let Some(client) = self.clients.remove(client_id) {
            info!("Client {} disconnected", client.id);
            true
        } else {
            false
        }
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<OwnerId> {
        self.clients
            .values()
            .find(|client| client.addr == addr)
            .map(|client| client.id)
    }

    pub fn get_mut(&mut self, client_id: OwnerId) -> Option<&mut Client> {
        self.clients.get_mut(&client_id)
    }

    pub fn clients_mut(&mut self) -> impl Iterator<Item = &mut Client> {
        self.clients.values_mut()
    }

    /// Connected ids in ascending order.
    pub fn client_ids(&self) -> Vec<OwnerId> {
        self.clients.keys().copied().collect()
    }

    /// Removes every client that went quiet and returns their ids.
    pub fn check_timeouts(&mut self) -> Vec<OwnerId> {
        let timeout = self.timeout;
        let timed_out: Vec<OwnerId> = self
            .clients
            .values()
            .filter(|client| client.is_timed_out(timeout))
            .map(|client| client.id)
            .collect();

        for client_id in &timed_out {
            self.remove_client(client_id);
        }

        timed_out
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::protocol::decode;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    #[test]
    fn test_client_timeout() {
        let mut client = Client::new(1, test_addr());
        assert!(!client.is_timed_out(Duration::from_secs(1)));

        client.last_seen = Instant::now() - Duration::from_secs(2);
        assert!(client.is_timed_out(Duration::from_secs(1)));

        client.touch();
        assert!(!client.is_timed_out(Duration::from_secs(1)));
    }

    #[test]
    fn test_add_multiple_clients() {
        let mut manager = ClientManager::new(3);
        assert!(manager.is_empty());

        assert_eq!(manager.add_client(test_addr()), Some(1));
        assert_eq!(manager.add_client(test_addr2()), Some(2));
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.client_ids(), vec![1, 2]);
    }

    #[test]
    fn test_add_client_max_capacity() {
        let mut manager = ClientManager::new(1);
        assert!(manager.add_client(test_addr()).is_some());
        assert!(manager.add_client(test_addr2()).is_none());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_ids_not_reused() {
        let mut manager = ClientManager::new(2);
        let first = manager.add_client(test_addr()).unwrap();
        assert!(manager.remove_client(&first));
        assert!(!manager.remove_client(&first));
        assert_eq!(manager.add_client(test_addr()), Some(first + 1));
    }

    #[test]
    fn test_find_client_by_addr() {
        let mut manager = ClientManager::new(2);
        let client_id1 = manager.add_client(test_addr()).unwrap();
        manager.add_client(test_addr2()).unwrap();

        assert_eq!(manager.find_client_by_addr(test_addr()), Some(client_id1));
        let unknown: SocketAddr = "192.168.1.1:9999".parse().unwrap();
        assert_eq!(manager.find_client_by_addr(unknown), None);
    }

    #[test]
    fn test_check_timeouts_removes_quiet_clients() {
        let mut manager = ClientManager::new(4);
        let quiet = manager.add_client(test_addr()).unwrap();
        let active = manager.add_client(test_addr2()).unwrap();
        manager.get_mut(quiet).unwrap().last_seen = Instant::now() - Duration::from_secs(10);

        assert_eq!(manager.check_timeouts(), vec![quiet]);
        assert_eq!(manager.client_ids(), vec![active]);
    }

    #[test]
    fn test_reliable_packets_tracked_per_client() {
        let mut client = Client::new(1, test_addr());
        let now = Instant::now();

        let bytes = client.encode(Packet::PlayerDied { owner: 2 }, now).unwrap();
        let envelope = decode(&bytes).unwrap();
        assert_eq!(envelope.sequence, Some(0));
        assert_eq!(client.endpoint.in_flight(), 1);

        assert!(client.maintenance(now).is_empty());
        assert_eq!(client.maintenance(now + Duration::from_secs(1)).len(), 1);
    }
}
