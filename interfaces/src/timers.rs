//! Timer Service
//!
//! Millisecond countdown timers owned by RLC entities. Expiry never calls into
//! the owner directly: it posts a [`TimerEvent`] on an unbounded channel, and
//! the owner consumes it on its own serialized path. Every start or stop bumps
//! the timer's generation, so an event that was already in flight when the
//! timer was re-armed or cancelled no longer matches and is ignored.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::trace;

/// Timers an RLC entity can own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerKind {
    /// t-Reordering (UM and AM receive)
    Reordering,
    /// t-StatusProhibit (AM receive)
    StatusProhibit,
    /// t-PollRetransmit (AM transmit)
    PollRetransmit,
}

/// Expiry notification posted by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEvent {
    /// Bearer that owns the timer
    pub bearer_id: u64,
    /// Which timer expired
    pub kind: TimerKind,
    /// Service-wide timer identifier
    pub timer_id: u32,
    /// Generation the timer was armed with
    pub generation: u64,
}

#[derive(Debug)]
struct TimerSlot {
    bearer_id: u64,
    kind: TimerKind,
    duration_ms: u32,
    remaining_ms: u32,
    running: bool,
    generation: u64,
}

#[derive(Debug, Default)]
struct TimerWheel {
    slots: HashMap<u32, TimerSlot>,
    next_id: u32,
    now_ms: u64,
}

/// Shared timer service
#[derive(Clone)]
pub struct TimerService {
    wheel: Arc<Mutex<TimerWheel>>,
    events: mpsc::UnboundedSender<TimerEvent>,
}

impl TimerService {
    /// Create a service and the receiver its expiries are posted to
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let service = Self {
            wheel: Arc::new(Mutex::new(TimerWheel::default())),
            events,
        };
        (service, rx)
    }

    /// Register a stopped timer with zero duration
    pub fn create_timer(&self, bearer_id: u64, kind: TimerKind) -> Timer {
        let mut wheel = self.wheel.lock();
        let id = wheel.next_id;
        wheel.next_id = wheel.next_id.wrapping_add(1);
        wheel.slots.insert(
            id,
            TimerSlot {
                bearer_id,
                kind,
                duration_ms: 0,
                remaining_ms: 0,
                running: false,
                generation: 0,
            },
        );
        Timer {
            id,
            wheel: Arc::clone(&self.wheel),
        }
    }

    /// Advance time by `elapsed_ms`, posting an event for every timer that
    /// reaches zero. Returns the number of expiries.
    pub fn tick(&self, elapsed_ms: u32) -> usize {
        let mut wheel = self.wheel.lock();
        wheel.now_ms += u64::from(elapsed_ms);

        let mut fired = 0;
        for (&timer_id, slot) in wheel.slots.iter_mut() {
            if !slot.running {
                continue;
            }
            slot.remaining_ms = slot.remaining_ms.saturating_sub(elapsed_ms);
            if slot.remaining_ms > 0 {
                continue;
            }
            slot.running = false;
            fired += 1;
            trace!(
                "Timer {} ({:?}) of bearer {} expired",
                timer_id,
                slot.kind,
                slot.bearer_id
            );
            let _ = self.events.send(TimerEvent {
                bearer_id: slot.bearer_id,
                kind: slot.kind,
                timer_id,
                generation: slot.generation,
            });
        }
        fired
    }

    /// Milliseconds elapsed since the service was created
    pub fn now_ms(&self) -> u64 {
        self.wheel.lock().now_ms
    }

    /// Number of timers currently running
    pub fn running_timers(&self) -> usize {
        self.wheel.lock().slots.values().filter(|s| s.running).count()
    }

    /// Drive the service from a tokio interval until the event receiver is dropped
    pub fn spawn_ticker(&self, period: Duration) -> tokio::task::JoinHandle<()> {
        let service = self.clone();
        let step_ms = u32::try_from(period.as_millis()).unwrap_or(u32::MAX).max(1);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if service.events.is_closed() {
                    break;
                }
                service.tick(step_ms);
            }
        })
    }
}

/// Handle to one registered timer. Dropping it unregisters the timer.
#[derive(Debug)]
pub struct Timer {
    id: u32,
    wheel: Arc<Mutex<TimerWheel>>,
}

impl Timer {
    /// Service-wide identifier
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Set the countdown used by subsequent starts
    pub fn set_duration(&self, duration_ms: u32) {
        if let Some(slot) = self.wheel.lock().slots.get_mut(&self.id) {
            slot.duration_ms = duration_ms;
        }
    }

    /// Configured countdown
    pub fn duration_ms(&self) -> u32 {
        self.wheel
            .lock()
            .slots
            .get(&self.id)
            .map_or(0, |slot| slot.duration_ms)
    }

    /// A timer with zero duration never runs
    pub fn is_valid(&self) -> bool {
        self.duration_ms() > 0
    }

    /// (Re)start the countdown from its full duration
    pub fn start(&self) {
        if let Some(slot) = self.wheel.lock().slots.get_mut(&self.id) {
            if slot.duration_ms == 0 {
                return;
            }
            slot.generation += 1;
            slot.remaining_ms = slot.duration_ms;
            slot.running = true;
        }
    }

    /// Cancel the countdown and invalidate any expiry already posted
    pub fn stop(&self) {
        if let Some(slot) = self.wheel.lock().slots.get_mut(&self.id) {
            slot.generation += 1;
            slot.running = false;
        }
    }

    /// Whether the countdown is active
    pub fn is_running(&self) -> bool {
        self.wheel
            .lock()
            .slots
            .get(&self.id)
            .is_some_and(|slot| slot.running)
    }

    /// Whether `event` is the live expiry of this timer
    pub fn is_current_expiry(&self, event: &TimerEvent) -> bool {
        if event.timer_id != self.id {
            return false;
        }
        self.wheel
            .lock()
            .slots
            .get(&self.id)
            .is_some_and(|slot| !slot.running && slot.generation == event.generation)
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.wheel.lock().slots.remove(&self.id);
    }
}
