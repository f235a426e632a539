//! Fixed-rate simulation clock.
//!
//! The render loop feeds variable frame deltas into [`FixedClock::advance`],
//! which turns them into whole simulation ticks. Entities that react to ticks
//! register in the clock's subscription set and must unsubscribe when they are
//! destroyed so no handler ever runs for a dead entity.

use log::warn;
use std::collections::BTreeSet;
use std::ops::Range;

pub type Tick = u32;

/// Highest tick the clock reaches; it holds there instead of wrapping.
pub const LAST_TICK: Tick = Tick::MAX - 1;

/// Upper bound on ticks produced by one `advance` call, so a long stall
/// cannot trigger an unbounded catch-up burst.
pub const DEFAULT_MAX_TICKS_PER_ADVANCE: u32 = 5;

#[derive(Debug, Clone)]
pub struct FixedClock {
    tick: Tick,
    tick_duration: f32,
    accumulator: f32,
    max_ticks_per_advance: u32,
    subscribers: BTreeSet<u32>,
}

impl FixedClock {
    pub fn new(tick_rate: u32) -> Self {
        Self::with_tick_duration(1.0 / tick_rate.max(1) as f32)
    }

    pub fn with_tick_duration(tick_duration: f32) -> Self {
        Self {
            tick: 0,
            tick_duration,
            accumulator: 0.0,
            max_ticks_per_advance: DEFAULT_MAX_TICKS_PER_ADVANCE,
            subscribers: BTreeSet::new(),
        }
    }

    pub fn with_max_ticks_per_advance(mut self, max: u32) -> Self {
        self.max_ticks_per_advance = max.max(1);
        self
    }

    pub fn current_tick(&self) -> Tick {
        self.tick
    }

    pub fn tick_duration(&self) -> f32 {
        self.tick_duration
    }

    pub fn tick_rate(&self) -> u32 {
        (1.0 / self.tick_duration).round() as u32
    }

    /// Seconds accumulated since the most recent tick fired.
    pub fn time_since_tick(&self) -> f32 {
        self.accumulator
    }

    /// Seconds elapsed since `tick` began. Ticks in the future count as zero.
    pub fn time_since(&self, tick: Tick) -> f32 {
        if tick > self.tick {
            return 0.0;
        }
        (self.tick - tick) as f32 * self.tick_duration + self.accumulator
    }

    /// Feeds a frame delta and returns the ticks that elapsed, oldest first.
    /// The counter stops at [`LAST_TICK`].
    pub fn advance(&mut self, frame_delta: f32) -> Range<Tick> {
        let first = self.tick + 1;
        if !frame_delta.is_finite() || frame_delta <= 0.0 {
            return first..first;
        }

        self.accumulator += frame_delta;
        let mut elapsed = 0;
        while self.accumulator >= self.tick_duration {
            if elapsed == self.max_ticks_per_advance {
                let dropped = (self.accumulator / self.tick_duration) as u32;
                warn!(
                    "Clock fell behind by {} ticks, dropping them (frame delta {:.3}s)",
                    dropped, frame_delta
                );
                self.accumulator %= self.tick_duration;
                break;
            }
            self.accumulator -= self.tick_duration;
            elapsed += 1;
        }

        self.tick = self.tick.saturating_add(elapsed).min(LAST_TICK);
        first..self.tick + 1
    }

    /// Jumps the tick counter forward to match the authority. Never rewinds.
    pub fn align_to(&mut self, remote_tick: Tick) -> bool {
        let remote_tick = remote_tick.min(LAST_TICK);
        if remote_tick > self.tick {
            self.tick = remote_tick;
            true
        } else {
            false
        }
    }

    pub fn subscribe(&mut self, entity: u32) -> bool {
        self.subscribers.insert(entity)
    }

    pub fn unsubscribe(&mut self, entity: u32) -> bool {
        self.subscribers.remove(&entity)
    }

    pub fn is_subscribed(&self, entity: u32) -> bool {
        self.subscribers.contains(&entity)
    }

    /// Subscribed entities in ascending id order.
    pub fn subscribers(&self) -> Vec<u32> {
        self.subscribers.iter().copied().collect()
    }
}
