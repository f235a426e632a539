//! Message routing and reliable delivery over an unreliable datagram link.
//!
//! Game code never touches sockets. It pushes packets into an [`Outbox`]
//! through the [`Transport`] trait, and the network layer drains the outbox
//! once per tick, resolves each [`Target`] to connections, and hands every
//! packet to the peer's [`ReliableEndpoint`] for sequencing and resends.

use crate::protocol::{Channel, Envelope, Packet};
use crate::OwnerId;
use log::{debug, warn};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

pub const DEFAULT_RESEND_AFTER: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;
/// Received reliable sequences remembered for duplicate suppression.
const DEDUP_WINDOW: usize = 1024;
/// Acks piggybacked on a single envelope.
const MAX_ACKS_PER_ENVELOPE: usize = 32;

/// Send primitives the simulation uses.
pub trait Transport {
    fn send_to_authority(&mut self, packet: Packet);
    /// Everyone connected, optionally skipping the entity's owner. The
    /// authority runs no player of its own, so `exclude_authority` only
    /// matters to transports that loop packets back into the sender.
    fn send_to_observers(&mut self, packet: Packet, exclude_owner: Option<OwnerId>, exclude_authority: bool);
    fn send_to_client(&mut self, client: OwnerId, packet: Packet);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Authority,
    Client(OwnerId),
    Observers { exclude_owner: Option<OwnerId> },
}

impl Target {
    /// Connected clients this target reaches.
    pub fn recipients(&self, connected: &[OwnerId]) -> Vec<OwnerId> {
        match *self {
            Target::Authority => Vec::new(),
            Target::Client(client) => connected
                .iter()
                .copied()
                .filter(|&id| id == client)
                .collect(),
            Target::Observers { exclude_owner } => connected
                .iter()
                .copied()
                .filter(|&id| Some(id) != exclude_owner)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub target: Target,
    pub packet: Packet,
}

/// Per-tick queue of outbound packets.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: Vec<Outgoing>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn drain(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.queue)
    }

    fn push(&mut self, target: Target, packet: Packet) {
        self.queue.push(Outgoing { target, packet });
    }
}

impl Transport for Outbox {
    fn send_to_authority(&mut self, packet: Packet) {
        self.push(Target::Authority, packet);
    }

    fn send_to_observers(&mut self, packet: Packet, exclude_owner: Option<OwnerId>, _exclude_authority: bool) {
        // Packets from the outbox always leave the process; none reach the authority itself.
        self.push(Target::Observers { exclude_owner }, packet);
    }

    fn send_to_client(&mut self, client: OwnerId, packet: Packet) {
        self.push(Target::Client(client), packet);
    }
}

#[derive(Debug, Clone)]
struct InFlight {
    packet: Packet,
    sent_at: Instant,
    attempts: u32,
}

/// One side of a connection: sequences reliable packets, resends them until
/// acked, and drops duplicates on receive.
#[derive(Debug)]
pub struct ReliableEndpoint {
    next_sequence: u32,
    in_flight: BTreeMap<u32, InFlight>,
    seen: HashSet<u32>,
    seen_order: VecDeque<u32>,
    pending_acks: Vec<u32>,
    resend_after: Duration,
    max_attempts: u32,
}

impl ReliableEndpoint {
    pub fn new(resend_after: Duration, max_attempts: u32) -> Self {
        Self {
            next_sequence: 0,
            in_flight: BTreeMap::new(),
            seen: HashSet::new(),
            seen_order: VecDeque::new(),
            pending_acks: Vec::new(),
            resend_after,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn take_acks(&mut self) -> Vec<u32> {
        let count = self.pending_acks.len().min(MAX_ACKS_PER_ENVELOPE);
        self.pending_acks.drain(..count).collect()
    }

    /// Wraps an outbound packet, registering it for resends if its channel is reliable.
    pub fn wrap(&mut self, packet: Packet, now: Instant) -> Envelope {
        let sequence = match packet.channel() {
            Channel::ReliableUnordered => {
                let sequence = self.next_sequence;
                self.next_sequence = self.next_sequence.wrapping_add(1);
                self.in_flight.insert(
                    sequence,
                    InFlight {
                        packet: packet.clone(),
                        sent_at: now,
                        attempts: 1,
                    },
                );
                Some(sequence)
            }
            Channel::UnreliableUnordered => None,
        };

        Envelope {
            sequence,
            acks: self.take_acks(),
            packet: Some(packet),
        }
    }

    /// Processes acks and returns the packet unless it is a duplicate.
    pub fn receive(&mut self, envelope: Envelope) -> Option<Packet> {
        for ack in &envelope.acks {
            self.in_flight.remove(ack);
        }

        if let Some(sequence) = envelope.sequence {
            self.pending_acks.push(sequence);
            if !self.seen.insert(sequence) {
                debug!("Dropping duplicate reliable packet {}", sequence);
                return None;
            }
            self.seen_order.push_back(sequence);
            if self.seen_order.len() > DEDUP_WINDOW {
                if let Some(oldest) = self.seen_order.pop_front() {
                    self.seen.remove(&oldest);
                }
            }
        }

        envelope.packet
    }

    /// Reliable packets whose ack is overdue, re-wrapped for sending.
    pub fn resends(&mut self, now: Instant) -> Vec<Envelope> {
        let mut due = Vec::new();
        let mut abandoned = Vec::new();

        for (&sequence, entry) in self.in_flight.iter_mut() {
            if now.duration_since(entry.sent_at) < self.resend_after {
                continue;
            }
            if entry.attempts >= self.max_attempts {
                abandoned.push(sequence);
                continue;
            }
            entry.attempts += 1;
            entry.sent_at = now;
            due.push((sequence, entry.packet.clone()));
        }

        for sequence in abandoned {
            warn!("Giving up on reliable packet {} after {} attempts", sequence, self.max_attempts);
            self.in_flight.remove(&sequence);
        }

        due.into_iter()
            .map(|(sequence, packet)| Envelope {
                sequence: Some(sequence),
                acks: self.take_acks(),
                packet: Some(packet),
            })
            .collect()
    }

    /// Bare ack envelope when acks are owed but nothing else is going out.
    pub fn flush_acks(&mut self) -> Option<Envelope> {
        if self.pending_acks.is_empty() {
            return None;
        }
        Some(Envelope {
            sequence: None,
            acks: self.take_acks(),
            packet: None,
        })
    }
}

impl Default for ReliableEndpoint {
    fn default() -> Self {
        Self::new(DEFAULT_RESEND_AFTER, DEFAULT_MAX_ATTEMPTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbox_queues_in_order() {
        let mut outbox = Outbox::new();
        outbox.send_to_authority(Packet::Disconnect);
        outbox.send_to_client(4, Packet::PlayerDied { owner: 4 });
        outbox.send_to_observers(Packet::PlayerLeft { owner: 2 }, Some(2), true);

        let drained = outbox.drain();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0].target, Target::Authority);
        assert_eq!(drained[1].target, Target::Client(4));
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_observer_exclusions() {
        let connected = [1, 2, 3];
        let everyone = Target::Observers { exclude_owner: None };
        assert_eq!(everyone.recipients(&connected), vec![1, 2, 3]);

        let not_owner = Target::Observers {
            exclude_owner: Some(2),
        };
        assert_eq!(not_owner.recipients(&connected), vec![1, 3]);
        assert_eq!(Target::Client(9).recipients(&connected), Vec::<OwnerId>::new());
        assert!(Target::Authority.recipients(&connected).is_empty());
    }

    #[test]
    fn test_excluding_authority_still_reaches_every_client() {
        let mut outbox = Outbox::new();
        outbox.send_to_observers(Packet::PlayerLeft { owner: 2 }, Some(2), true);
        outbox.send_to_observers(Packet::PlayerLeft { owner: 2 }, Some(2), false);

        for outgoing in outbox.drain() {
            assert_eq!(outgoing.target.recipients(&[1, 2, 3]), vec![1, 3]);
        }
    }

    #[test]
    fn test_unreliable_is_not_tracked() {
        let mut endpoint = ReliableEndpoint::default();
        let envelope = endpoint.wrap(Packet::Ping { nonce: 1 }, Instant::now());
        assert!(envelope.sequence.is_none());
        assert_eq!(endpoint.in_flight(), 0);
    }

    #[test]
    fn test_reliable_round_trip_with_ack() {
        let now = Instant::now();
        let mut server = ReliableEndpoint::default();
        let mut client = ReliableEndpoint::default();

        let envelope = server.wrap(Packet::PlayerDied { owner: 3 }, now);
        assert_eq!(server.in_flight(), 1);

        assert_eq!(
            client.receive(envelope.clone()),
            Some(Packet::PlayerDied { owner: 3 })
        );
        assert_eq!(client.receive(envelope), None);

        let ack = client.flush_acks().unwrap();
        assert!(server.receive(ack).is_none());
        assert_eq!(server.in_flight(), 0);
        assert!(client.flush_acks().is_none());
    }

    #[test]
    fn test_resend_until_acked() {
        let start = Instant::now();
        let mut endpoint = ReliableEndpoint::new(Duration::from_millis(100), 3);
        endpoint.wrap(Packet::PlayerLeft { owner: 1 }, start);

        assert!(endpoint.resends(start + Duration::from_millis(50)).is_empty());
        let resent = endpoint.resends(start + Duration::from_millis(150));
        assert_eq!(resent.len(), 1);
        assert_eq!(resent[0].sequence, Some(0));

        endpoint.resends(start + Duration::from_millis(300));
        assert!(endpoint.resends(start + Duration::from_millis(450)).is_empty());
        assert_eq!(endpoint.in_flight(), 0);
    }
}
