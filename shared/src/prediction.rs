//! Client-side prediction, authoritative replay and server reconciliation.
//!
//! Three replica roles share one [`MovementSimulator`]:
//!
//! - [`OwnerPredictor`] runs on the owning client. Every render frame it steps
//!   the simulator immediately and buffers the input. At each tick boundary it
//!   drains the buffer into one [`InputBatch`] for the authority and, if a
//!   [`ReconcileSnapshot`] arrived since the last tick, overwrites its state
//!   with it and replays every input the snapshot has not seen yet.
//! - [`AuthorityReplica`] runs on the server. Once per tick it replays the
//!   next queued batch in capture order. A missing batch is treated as empty
//!   and never waited for.
//! - [`ObserverReplica`] runs on every other client and only mirrors
//!   authoritative outcomes.
//!
//! Snapshots are tagged with the tick of the last batch the authority
//! replayed, so the owner knows exactly which buffered batches to discard.

use crate::clock::Tick;
use crate::collision::{CollisionWorld, StaticWorld};
use crate::error::InputError;
use crate::input::Orientation;
use crate::movement::{MoveInput, MovementSimulator, SimulationState};
use glam::Vec3;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Unacknowledged batches kept by the owner before the oldest is dropped.
pub const DEFAULT_MAX_UNACKNOWLEDGED: usize = 128;
/// Batches the authority lets pile up before replaying the excess at once.
pub const DEFAULT_MAX_QUEUED_BATCHES: usize = 3;
pub const DEFAULT_MAX_INPUTS_PER_BATCH: usize = 64;

/// Corrections smaller than this are not worth a log line.
const CORRECTION_LOG_THRESHOLD: f32 = 1e-3;

/// Inputs captured between two ticks, in capture order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InputBatch {
    pub tick: Tick,
    pub inputs: Vec<MoveInput>,
}

impl InputBatch {
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// Authoritative state after replaying every batch up to and including `tick`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReconcileSnapshot {
    pub tick: Tick,
    pub position: Vec3,
    pub horizontal_velocity: Vec3,
    pub vertical_velocity: f32,
}

impl ReconcileSnapshot {
    pub fn capture(tick: Tick, state: &SimulationState) -> Self {
        Self {
            tick,
            position: state.position,
            horizontal_velocity: state.horizontal_velocity,
            vertical_velocity: state.vertical_velocity,
        }
    }

    /// Overwrites the replicated fields and keeps the local orientation.
    pub fn apply_to(&self, state: &SimulationState) -> SimulationState {
        SimulationState {
            position: self.position,
            horizontal_velocity: self.horizontal_velocity,
            vertical_velocity: self.vertical_velocity,
            orientation_yaw: state.orientation_yaw,
        }
    }
}

/// Result of applying a snapshot on the owner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reconciliation {
    pub tick: Tick,
    /// Inputs replayed on top of the snapshot.
    pub replayed: usize,
    /// Distance between the predicted and the reconciled position.
    pub correction: f32,
}

/// What the owner produces at a tick boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnerTick {
    pub batch: InputBatch,
    pub reconciliation: Option<Reconciliation>,
}

pub struct OwnerPredictor<W = StaticWorld> {
    simulator: MovementSimulator<W>,
    state: SimulationState,
    pending: Vec<MoveInput>,
    unacknowledged: VecDeque<InputBatch>,
    incoming: Option<ReconcileSnapshot>,
    last_reconciled: Option<Tick>,
    reconciled_this_tick: bool,
    position_locked: bool,
    max_unacknowledged: usize,
}

impl<W: CollisionWorld> OwnerPredictor<W> {
    pub fn new(simulator: MovementSimulator<W>, state: SimulationState) -> Self {
        Self {
            simulator,
            state,
            pending: Vec::new(),
            unacknowledged: VecDeque::new(),
            incoming: None,
            last_reconciled: None,
            reconciled_this_tick: false,
            position_locked: false,
            max_unacknowledged: DEFAULT_MAX_UNACKNOWLEDGED,
        }
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn current_velocity(&self) -> Vec3 {
        self.state.velocity()
    }

    pub fn pending_inputs(&self) -> usize {
        self.pending.len()
    }

    pub fn unacknowledged_batches(&self) -> usize {
        self.unacknowledged.len()
    }

    pub fn last_reconciled_tick(&self) -> Option<Tick> {
        self.last_reconciled
    }

    pub fn reconciled_this_tick(&self) -> bool {
        self.reconciled_this_tick
    }

    pub fn is_locked(&self) -> bool {
        self.position_locked
    }

    /// Applies one frame of input immediately and buffers it for the next batch.
    pub fn predict_frame(&mut self, input: MoveInput) {
        if self.position_locked {
            return;
        }
        self.state = self.simulator.step(&self.state, &input, input.frame_delta);
        self.pending.push(input);
    }

    /// Queues a snapshot for the next tick. Returns false for stale or duplicate ticks.
    pub fn receive_snapshot(&mut self, snapshot: ReconcileSnapshot) -> bool {
        if self.last_reconciled.is_some_and(|last| snapshot.tick <= last) {
            debug!(
                "Dropping stale snapshot for tick {} (last applied {:?})",
                snapshot.tick, self.last_reconciled
            );
            return false;
        }
        if self
            .incoming
            .is_some_and(|queued| snapshot.tick <= queued.tick)
        {
            debug!("Dropping out-of-order snapshot for tick {}", snapshot.tick);
            return false;
        }
        self.incoming = Some(snapshot);
        true
    }

    /// Tick boundary: reconcile if a snapshot is waiting, then emit this tick's batch.
    pub fn on_tick(&mut self, tick: Tick) -> OwnerTick {
        self.reconciled_this_tick = false;
        let reconciliation = self.incoming.take().map(|snapshot| self.reconcile(snapshot));

        let batch = InputBatch {
            tick,
            inputs: std::mem::take(&mut self.pending),
        };

        self.unacknowledged.push_back(batch.clone());
        if self.unacknowledged.len() > self.max_unacknowledged {
            if let Some(dropped) = self.unacknowledged.pop_front() {
                warn!(
                    "No acknowledgement for {} ticks, forgetting batch {}",
                    self.max_unacknowledged, dropped.tick
                );
            }
        }

        OwnerTick {
            batch,
            reconciliation,
        }
    }

    fn reconcile(&mut self, snapshot: ReconcileSnapshot) -> Reconciliation {
        let predicted = self.state.position;

        self.unacknowledged.retain(|batch| batch.tick > snapshot.tick);
        self.state = snapshot.apply_to(&self.state);

        let mut replayed = 0;
        for input in self
            .unacknowledged
            .iter()
            .flat_map(|batch| batch.inputs.iter())
            .chain(self.pending.iter())
        {
            self.state = self.simulator.step(&self.state, input, input.frame_delta);
            replayed += 1;
        }

        self.last_reconciled = Some(snapshot.tick);
        self.reconciled_this_tick = true;

        let correction = (self.state.position - predicted).length();
        if correction > CORRECTION_LOG_THRESHOLD {
            debug!(
                "Reconciled tick {}: corrected {:.3}m after replaying {} inputs",
                snapshot.tick, correction, replayed
            );
        }

        Reconciliation {
            tick: snapshot.tick,
            replayed,
            correction,
        }
    }

    pub fn lock_position(&mut self) {
        self.position_locked = true;
        self.pending.clear();
    }

    pub fn unlock_position(&mut self) {
        self.position_locked = false;
    }
}

/// Outcome of one authoritative tick for one owner.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AuthorityTick {
    pub processed: Vec<Tick>,
    pub rejected: Vec<(Tick, InputError)>,
    /// No batch was available; the owner was treated as idle.
    pub starved: bool,
}

pub struct AuthorityReplica<W = StaticWorld> {
    simulator: MovementSimulator<W>,
    state: SimulationState,
    queue: VecDeque<InputBatch>,
    last_processed: Option<Tick>,
    position_locked: bool,
    max_queued_batches: usize,
    max_inputs_per_batch: usize,
}

impl<W: CollisionWorld> AuthorityReplica<W> {
    pub fn new(simulator: MovementSimulator<W>, state: SimulationState) -> Self {
        Self {
            simulator,
            state,
            queue: VecDeque::new(),
            last_processed: None,
            position_locked: false,
            max_queued_batches: DEFAULT_MAX_QUEUED_BATCHES,
            max_inputs_per_batch: DEFAULT_MAX_INPUTS_PER_BATCH,
        }
    }

    pub fn with_max_queued_batches(mut self, max: usize) -> Self {
        self.max_queued_batches = max;
        self
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn current_velocity(&self) -> Vec3 {
        self.state.velocity()
    }

    pub fn queued_batches(&self) -> usize {
        self.queue.len()
    }

    pub fn last_processed_tick(&self) -> Option<Tick> {
        self.last_processed
    }

    /// Queues a batch in tick order. Old or duplicate ticks are dropped.
    pub fn receive(&mut self, batch: InputBatch) -> bool {
        if self.last_processed.is_some_and(|last| batch.tick <= last) {
            debug!("Dropping late batch {} (processed up to {:?})", batch.tick, self.last_processed);
            return false;
        }

        match self.queue.binary_search_by_key(&batch.tick, |queued| queued.tick) {
            Ok(_) => {
                debug!("Dropping duplicate batch {}", batch.tick);
                false
            }
            Err(index) => {
                self.queue.insert(index, batch);
                true
            }
        }
    }

    /// Replays the next batch, or nothing if none arrived.
    pub fn tick(&mut self) -> AuthorityTick {
        let mut report = AuthorityTick::default();

        if self.queue.is_empty() {
            report.starved = true;
            return report;
        }

        let backlog = self.queue.len().saturating_sub(self.max_queued_batches);
        let to_process = backlog.max(1);
        if backlog > 1 {
            debug!("Draining {} backlogged batches", backlog);
        }

        for _ in 0..to_process {
            let Some(batch) = self.queue.pop_front() else {
                break;
            };
            match self.replay(&batch) {
                Ok(()) => report.processed.push(batch.tick),
                Err(error) => {
                    warn!("Rejecting batch {}: {}", batch.tick, error);
                    report.rejected.push((batch.tick, error));
                }
            }
            self.last_processed = Some(batch.tick);
        }

        report
    }

    fn replay(&mut self, batch: &InputBatch) -> Result<(), InputError> {
        if batch.inputs.len() > self.max_inputs_per_batch {
            return Err(InputError::BatchTooLarge {
                len: batch.inputs.len(),
                max: self.max_inputs_per_batch,
            });
        }

        let max_frame_delta = self.simulator.config().max_frame_delta;
        for input in &batch.inputs {
            input.validate(max_frame_delta)?;
        }

        if self.position_locked {
            return Ok(());
        }

        for input in &batch.inputs {
            self.state = self.simulator.step(&self.state, input, input.frame_delta);
        }
        Ok(())
    }

    /// Post-tick snapshot, once at least one batch has been replayed.
    pub fn snapshot(&self) -> Option<ReconcileSnapshot> {
        self.last_processed
            .map(|tick| ReconcileSnapshot::capture(tick, &self.state))
    }

    pub fn apply_orientation(&mut self, orientation: Orientation) {
        if orientation.yaw.is_finite() {
            self.state.orientation_yaw = orientation.yaw;
        }
    }

    pub fn lock_position(&mut self) {
        self.position_locked = true;
    }

    pub fn unlock_position(&mut self) {
        self.position_locked = false;
    }
}

/// Non-owning mirror of another player's authoritative state.
#[derive(Debug, Clone, Default)]
pub struct ObserverReplica {
    previous: Option<SimulationState>,
    current: Option<SimulationState>,
    last_tick: Option<Tick>,
    orientation: Orientation,
}

impl ObserverReplica {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Option<&SimulationState> {
        self.current.as_ref()
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn current_velocity(&self) -> Vec3 {
        self.current
            .map(|state| state.velocity())
            .unwrap_or(Vec3::ZERO)
    }

    /// Returns false when the snapshot is older than what is already shown.
    pub fn apply(&mut self, snapshot: &ReconcileSnapshot) -> bool {
        if self.last_tick.is_some_and(|last| snapshot.tick <= last) {
            return false;
        }
        let base = self.current.unwrap_or_default();
        self.previous = self.current.or(Some(snapshot.apply_to(&base)));
        self.current = Some(SimulationState {
            orientation_yaw: self.orientation.yaw,
            ..snapshot.apply_to(&base)
        });
        self.last_tick = Some(snapshot.tick);
        true
    }

    pub fn apply_orientation(&mut self, orientation: Orientation) {
        self.orientation = orientation;
        if let Some(state) = self.current.as_mut() {
            state.orientation_yaw = orientation.yaw;
        }
    }

    /// Position blended between the last two snapshots, `alpha` in ticks.
    pub fn render_position(&self, alpha: f32) -> Option<Vec3> {
        let current = self.current?;
        let previous = self.previous.unwrap_or(current);
        Some(previous.position.lerp(current.position, alpha.clamp(0.0, 1.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movement::MovementConfig;
    use assert_approx_eq::assert_approx_eq;
    use std::sync::Arc;

    fn simulator() -> MovementSimulator {
        MovementSimulator::new(
            MovementConfig::default(),
            Arc::new(StaticWorld::new(Some(0.0), Vec::new())),
        )
    }

    fn forward(dt: f32) -> MoveInput {
        MoveInput {
            vertical_axis: 1.0,
            facing_yaw: 20.0,
            frame_delta: dt,
            ..Default::default()
        }
    }

    fn pair() -> (OwnerPredictor, AuthorityReplica) {
        let start = SimulationState::default();
        (
            OwnerPredictor::new(simulator(), start),
            AuthorityReplica::new(simulator(), start),
        )
    }

    #[test]
    fn test_prediction_applies_immediately() {
        let (mut owner, _) = pair();
        owner.predict_frame(forward(0.016));
        assert!(owner.state().position.z > 0.0);
        assert_eq!(owner.pending_inputs(), 1);
    }

    #[test]
    fn test_one_batch_per_tick_in_capture_order() {
        let (mut owner, _) = pair();
        let inputs: Vec<MoveInput> = [0.010, 0.007, 0.003]
            .into_iter()
            .map(forward)
            .collect();
        for input in &inputs {
            owner.predict_frame(*input);
        }

        let first = owner.on_tick(1);
        assert_eq!(first.batch.tick, 1);
        assert_eq!(first.batch.inputs, inputs);
        assert_eq!(owner.pending_inputs(), 0);

        let second = owner.on_tick(2);
        assert!(second.batch.is_empty());
        assert_eq!(owner.unacknowledged_batches(), 2);
    }

    #[test]
    fn test_render_hitch_is_accepted_by_authority() {
        struct Forward;

        impl crate::input::InputSource for Forward {
            fn movement_axis(&mut self) -> glam::Vec2 {
                glam::Vec2::Y
            }

            fn look_delta(&mut self) -> glam::Vec2 {
                glam::Vec2::ZERO
            }

            fn consume_jump(&mut self) -> bool {
                false
            }

            fn consume_fire(&mut self) -> bool {
                false
            }
        }

        let (mut owner, mut authority) = pair();
        let mut sampler = crate::input::InputSampler::default();

        owner.predict_frame(sampler.sample(&mut Forward, 0.3).input);
        assert!(authority.receive(owner.on_tick(1).batch));

        let report = authority.tick();
        assert!(report.rejected.is_empty(), "{:?}", report.rejected);
        assert!(authority.state().position.z > 0.0);

        assert!(owner.receive_snapshot(authority.snapshot().unwrap()));
        let reconciliation = owner.on_tick(2).reconciliation.unwrap();
        assert!(reconciliation.correction < 1e-5);
    }

    #[test]
    fn test_reconciliation_is_noop_when_authority_agrees() {
        let (mut owner, mut authority) = pair();

        for _ in 0..3 {
            owner.predict_frame(forward(0.007));
        }
        let sent = owner.on_tick(1).batch;
        for _ in 0..2 {
            owner.predict_frame(forward(0.009));
        }

        assert!(authority.receive(sent));
        authority.tick();
        let snapshot = authority.snapshot().unwrap();
        assert_eq!(snapshot.tick, 1);

        let predicted = *owner.state();
        assert!(owner.receive_snapshot(snapshot));
        let reconciliation = owner.on_tick(2).reconciliation.unwrap();

        assert_eq!(reconciliation.replayed, 2);
        assert_eq!(reconciliation.correction, 0.0);
        assert_eq!(owner.state().position, predicted.position);
        assert_eq!(owner.state().horizontal_velocity, predicted.horizontal_velocity);
        assert!(owner.reconciled_this_tick());
        assert_eq!(owner.unacknowledged_batches(), 1);
    }

    #[test]
    fn test_reconciliation_converges_on_disagreement() {
        let (mut owner, _) = pair();
        owner.predict_frame(forward(0.01));
        owner.on_tick(1);
        owner.predict_frame(forward(0.01));

        let shifted = SimulationState::at(Vec3::new(3.0, 0.0, 0.0));
        owner.receive_snapshot(ReconcileSnapshot::capture(1, &shifted));
        let reconciliation = owner.on_tick(2).reconciliation.unwrap();

        let expected = simulator().step(&shifted, &forward(0.01), 0.01);
        assert_eq!(owner.state().position, expected.position);
        assert!(reconciliation.correction > 2.0);
    }

    #[test]
    fn test_no_snapshot_means_no_tick_side_effects() {
        let (mut owner, _) = pair();
        owner.predict_frame(forward(0.02));
        let before = *owner.state();

        let tick = owner.on_tick(1);
        assert!(tick.reconciliation.is_none());
        assert!(!owner.reconciled_this_tick());
        assert_eq!(*owner.state(), before);
    }

    #[test]
    fn test_stale_snapshots_ignored() {
        let (mut owner, _) = pair();
        owner.on_tick(1);
        owner.on_tick(2);

        let state = SimulationState::default();
        assert!(owner.receive_snapshot(ReconcileSnapshot::capture(2, &state)));
        assert!(!owner.receive_snapshot(ReconcileSnapshot::capture(1, &state)));
        owner.on_tick(3);

        assert!(!owner.receive_snapshot(ReconcileSnapshot::capture(2, &state)));
        assert!(!owner.receive_snapshot(ReconcileSnapshot::capture(1, &state)));
        assert_eq!(owner.last_reconciled_tick(), Some(2));
    }

    #[test]
    fn test_authority_never_stalls_on_missing_batch() {
        let (mut owner, mut authority) = pair();

        owner.predict_frame(forward(0.02));
        let _lost = owner.on_tick(1).batch;
        owner.predict_frame(forward(0.02));
        let delivered = owner.on_tick(2).batch;

        let idle = authority.tick();
        assert!(idle.starved);
        assert_eq!(*authority.state(), SimulationState::default());
        assert!(authority.snapshot().is_none());

        authority.receive(delivered);
        let report = authority.tick();
        assert_eq!(report.processed, vec![2]);
        assert!(authority.state().position.z > 0.0);
        assert_eq!(authority.snapshot().unwrap().tick, 2);
    }

    #[test]
    fn test_late_batch_still_applied() {
        let (mut owner, mut authority) = pair();
        owner.predict_frame(forward(0.02));
        let late = owner.on_tick(1).batch;

        assert!(authority.tick().starved);
        assert!(authority.tick().starved);
        authority.receive(late);
        assert_eq!(authority.tick().processed, vec![1]);
    }

    #[test]
    fn test_authority_drops_duplicates_and_old_batches() {
        let (_, mut authority) = pair();
        let batch = InputBatch {
            tick: 5,
            inputs: vec![forward(0.02)],
        };

        assert!(authority.receive(batch.clone()));
        assert!(!authority.receive(batch.clone()));
        authority.tick();
        assert!(!authority.receive(batch));
        assert!(!authority.receive(InputBatch {
            tick: 4,
            inputs: Vec::new()
        }));
    }

    #[test]
    fn test_authority_orders_batches() {
        let (_, mut authority) = pair();
        authority.receive(InputBatch { tick: 7, inputs: Vec::new() });
        authority.receive(InputBatch { tick: 6, inputs: Vec::new() });

        assert_eq!(authority.tick().processed, vec![6]);
        assert_eq!(authority.tick().processed, vec![7]);
    }

    #[test]
    fn test_authority_drains_backlog() {
        let mut authority = AuthorityReplica::new(simulator(), SimulationState::default())
            .with_max_queued_batches(2);
        for tick in 1..=6 {
            authority.receive(InputBatch { tick, inputs: Vec::new() });
        }

        let report = authority.tick();
        assert_eq!(report.processed, vec![1, 2, 3, 4]);
        assert_eq!(authority.queued_batches(), 2);
    }

    #[test]
    fn test_authority_rejects_nan_and_holds_state() {
        let (_, mut authority) = pair();
        authority.receive(InputBatch {
            tick: 1,
            inputs: vec![forward(0.02)],
        });
        authority.tick();
        let held = *authority.state();

        let poisoned = MoveInput {
            horizontal_axis: f32::NAN,
            ..forward(0.02)
        };
        authority.receive(InputBatch {
            tick: 2,
            inputs: vec![forward(0.02), poisoned],
        });
        let report = authority.tick();

        assert!(report.processed.is_empty());
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(*authority.state(), held);
        assert!(authority.state().position.is_finite());
        assert_eq!(authority.snapshot().unwrap().tick, 2);
    }

    #[test]
    fn test_authority_rejects_oversized_batch() {
        let (_, mut authority) = pair();
        authority.receive(InputBatch {
            tick: 1,
            inputs: vec![forward(0.001); DEFAULT_MAX_INPUTS_PER_BATCH + 1],
        });
        let report = authority.tick();
        assert!(matches!(
            report.rejected[0].1,
            InputError::BatchTooLarge { .. }
        ));
    }

    #[test]
    fn test_locked_position_ignores_movement() {
        let (mut owner, mut authority) = pair();
        owner.lock_position();
        owner.predict_frame(forward(0.02));
        assert_eq!(*owner.state(), SimulationState::default());

        authority.lock_position();
        authority.receive(InputBatch {
            tick: 1,
            inputs: vec![forward(0.02)],
        });
        authority.tick();
        assert_eq!(*authority.state(), SimulationState::default());
    }

    #[test]
    fn test_observer_applies_only_newer_snapshots() {
        let mut observer = ObserverReplica::new();
        assert!(observer.render_position(0.5).is_none());

        let a = SimulationState::at(Vec3::new(0.0, 0.0, 0.0));
        let b = SimulationState::at(Vec3::new(2.0, 0.0, 0.0));
        assert!(observer.apply(&ReconcileSnapshot::capture(1, &a)));
        assert!(observer.apply(&ReconcileSnapshot::capture(2, &b)));
        assert!(!observer.apply(&ReconcileSnapshot::capture(1, &a)));

        assert_approx_eq!(observer.render_position(0.5).unwrap().x, 1.0, 1e-6);
        assert_eq!(observer.render_position(4.0).unwrap().x, 2.0);
    }

    #[test]
    fn test_observer_orientation() {
        let mut observer = ObserverReplica::new();
        observer.apply_orientation(Orientation { yaw: 90.0, pitch: 10.0 });
        let state = SimulationState::at(Vec3::ONE);
        observer.apply(&ReconcileSnapshot::capture(1, &state));
        assert_eq!(observer.state().unwrap().orientation_yaw, 90.0);
    }
}
