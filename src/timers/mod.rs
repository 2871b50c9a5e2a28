//! Countdown timer and alarm engine
//!
//! A fixed table of three concurrent slots driven by a one-second tick.
//! Remaining time is tracked in whole seconds. Warning beeps fire at
//! 30-second boundaries inside the final two minutes, and expiry fires
//! exactly once per timer, recycling the slot immediately. All audio and
//! event side effects run after the table lock is released.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::audio::{Tone, ToneGenerator};
use crate::error::Error;
use crate::events::StateEvent;
use crate::orchestrator::{Command, CommandSender};

/// Maximum concurrently running timers
pub const MAX_TIMERS: usize = 3;

/// `stop()` argument that cancels every running timer
pub const STOP_ALL: u8 = 0;

const WARNING_WINDOW_SECS: u32 = 120;
const WARNING_INTERVAL_SECS: u32 = 30;

/// Distinguishes the notification played at expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    /// Three-beep countdown notification
    Countdown,
    /// Insistent ten-beep alarm notification
    Alarm,
}

#[derive(Debug, Clone)]
struct Slot {
    id: u8,
    kind: TimerKind,
    label: String,
    remaining_secs: u32,
}

struct Table {
    slots: [Option<Slot>; MAX_TIMERS],
    next_id: u8,
}

impl Table {
    fn new() -> Self {
        Self {
            slots: [None, None, None],
            next_id: 1,
        }
    }

    /// Allocate the next id, skipping zero (the stop-all sentinel) and
    /// any id still held by a running slot.
    fn allocate_id(&mut self) -> u8 {
        loop {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            if id == STOP_ALL {
                continue;
            }
            if self.find(id).is_none() {
                return id;
            }
        }
    }

    fn find(&self, id: u8) -> Option<&Slot> {
        self.slots
            .iter()
            .flatten()
            .find(|slot| slot.id == id)
    }
}

/// A running timer as seen from outside the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerSnapshot {
    pub id: u8,
    pub kind: TimerKind,
    pub label: String,
    pub remaining: Duration,
}

/// Fixed-capacity countdown engine
pub struct TimerEngine {
    table: Arc<Mutex<Table>>,
    cmd_tx: CommandSender,
    tones: Arc<dyn ToneGenerator>,
    event_tx: broadcast::Sender<StateEvent>,
}

impl TimerEngine {
    pub fn new(
        cmd_tx: CommandSender,
        tones: Arc<dyn ToneGenerator>,
        event_tx: broadcast::Sender<StateEvent>,
    ) -> Self {
        Self {
            table: Arc::new(Mutex::new(Table::new())),
            cmd_tx,
            tones,
            event_tx,
        }
    }

    /// Start a countdown, returning its id
    pub fn start(&self, duration: Duration, label: &str, kind: TimerKind) -> Result<u8, Error> {
        let secs = duration.as_secs();
        if secs == 0 {
            return Err(Error::InvalidArgument("timer duration must be nonzero".into()));
        }
        let secs = u32::try_from(secs)
            .map_err(|_| Error::InvalidArgument("timer duration too long".into()))?;

        let mut table = self.lock();
        let free = table
            .slots
            .iter()
            .position(|slot| slot.is_none())
            .ok_or_else(|| {
                Error::ResourceExhausted(format!("all {MAX_TIMERS} timer slots in use"))
            })?;

        let id = table.allocate_id();
        table.slots[free] = Some(Slot {
            id,
            kind,
            label: label.to_string(),
            remaining_secs: secs,
        });
        drop(table);

        info!(id, label, seconds = secs, ?kind, "timer started");
        Ok(id)
    }

    /// Cancel a timer by id; [`STOP_ALL`] cancels every running timer
    pub fn stop(&self, id: u8) -> Result<(), Error> {
        let mut table = self.lock();

        if id == STOP_ALL {
            let stopped = table.slots.iter_mut().filter_map(Option::take).count();
            drop(table);
            info!(stopped, "all timers stopped");
            return Ok(());
        }

        let slot = table
            .slots
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|s| s.id == id))
            .ok_or_else(|| Error::NotFound(format!("no timer with id {id}")))?;
        let stopped = slot.take();
        drop(table);

        if let Some(stopped) = stopped {
            info!(id, label = %stopped.label, "timer stopped");
        }
        Ok(())
    }

    /// Time left on a running timer
    pub fn remaining(&self, id: u8) -> Result<Duration, Error> {
        self.lock()
            .find(id)
            .map(|slot| Duration::from_secs(u64::from(slot.remaining_secs)))
            .ok_or_else(|| Error::NotFound(format!("no timer with id {id}")))
    }

    pub fn is_active(&self, id: u8) -> bool {
        self.lock().find(id).is_some()
    }

    pub fn active_count(&self) -> usize {
        self.lock().slots.iter().flatten().count()
    }

    /// The running timer closest to expiry, if any
    pub fn next_expiring(&self) -> Option<TimerSnapshot> {
        self.lock()
            .slots
            .iter()
            .flatten()
            .min_by_key(|slot| slot.remaining_secs)
            .map(|slot| TimerSnapshot {
                id: slot.id,
                kind: slot.kind,
                label: slot.label.clone(),
                remaining: Duration::from_secs(u64::from(slot.remaining_secs)),
            })
    }

    /// Drive the one-second countdown until the process shuts down
    pub async fn run(&self) {
        let mut ticker = interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first interval tick completes immediately
        ticker.tick().await;

        info!("timer engine started");
        loop {
            ticker.tick().await;
            self.tick();
        }
    }

    /// Advance every running timer by one second
    fn tick(&self) {
        let mut warnings = Vec::new();
        let mut expired = Vec::new();

        let mut table = self.lock();
        for slot in table.slots.iter_mut() {
            let Some(timer) = slot else { continue };
            timer.remaining_secs -= 1;

            if timer.remaining_secs == 0 {
                // Edge-triggered: the slot is recycled before any side
                // effect runs, so expiry can never fire twice
                if let Some(timer) = slot.take() {
                    expired.push(timer);
                }
            } else if timer.remaining_secs <= WARNING_WINDOW_SECS
                && timer.remaining_secs % WARNING_INTERVAL_SECS == 0
            {
                warnings.push((timer.id, timer.remaining_secs));
            }
        }
        drop(table);

        for (id, remaining_seconds) in warnings {
            info!(id, remaining_seconds, "timer warning");
            if let Err(err) = self.tones.play(Tone::TIMER_WARNING) {
                warn!(error = %err, "warning tone failed");
            }
            let _ = self.event_tx.send(StateEvent::TimerWarning {
                id,
                remaining_seconds,
            });
        }

        for timer in expired {
            info!(id = timer.id, label = %timer.label, "timer expired");
            let command = match timer.kind {
                TimerKind::Countdown => Command::TimerBeep,
                TimerKind::Alarm => Command::AlarmBeep,
            };
            self.cmd_tx.post(command);
            let _ = self.event_tx.send(StateEvent::TimerExpired {
                id: timer.id,
                label: timer.label,
            });
        }
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().expect("timer table poisoned")
    }
}

/// Render a duration the way it is spoken: "1h 5m", "3m 20s", "45s"
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::command_channel;
    use crate::sim::SimToneGenerator;
    use tokio::sync::mpsc;

    struct Fixture {
        engine: TimerEngine,
        cmd_rx: mpsc::Receiver<Command>,
        tones: Arc<SimToneGenerator>,
        events: broadcast::Receiver<StateEvent>,
    }

    fn fixture() -> Fixture {
        let (cmd_tx, cmd_rx) = command_channel(8);
        let tones = Arc::new(SimToneGenerator::new());
        let (event_tx, events) = broadcast::channel(64);
        let engine = TimerEngine::new(cmd_tx, tones.clone(), event_tx);
        Fixture {
            engine,
            cmd_rx,
            tones,
            events,
        }
    }

    #[tokio::test]
    async fn test_start_stop_and_queries() {
        let f = fixture();

        let id = f.engine.start(Duration::from_secs(90), "Tea", TimerKind::Countdown).unwrap();
        assert!(f.engine.is_active(id));
        assert_eq!(f.engine.active_count(), 1);
        assert_eq!(f.engine.remaining(id).unwrap(), Duration::from_secs(90));

        f.engine.stop(id).unwrap();
        assert!(!f.engine.is_active(id));
        assert!(matches!(f.engine.remaining(id), Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let f = fixture();

        for _ in 0..MAX_TIMERS {
            f.engine.start(Duration::from_secs(60), "", TimerKind::Countdown).unwrap();
        }
        let overflow = f.engine.start(Duration::from_secs(60), "", TimerKind::Countdown);
        assert!(matches!(overflow, Err(Error::ResourceExhausted(_))));
    }

    #[tokio::test]
    async fn test_zero_duration_rejected() {
        let f = fixture();
        let result = f.engine.start(Duration::ZERO, "", TimerKind::Countdown);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_ids_are_not_reused() {
        let f = fixture();

        let first = f.engine.start(Duration::from_secs(10), "", TimerKind::Countdown).unwrap();
        f.engine.stop(first).unwrap();
        let second = f.engine.start(Duration::from_secs(10), "", TimerKind::Countdown).unwrap();

        assert_ne!(first, second);
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_id_allocation_skips_zero_and_live_ids() {
        let f = fixture();
        f.engine.lock().next_id = 255;

        let a = f.engine.start(Duration::from_secs(10), "", TimerKind::Countdown).unwrap();
        let b = f.engine.start(Duration::from_secs(10), "", TimerKind::Countdown).unwrap();

        assert_eq!(a, 255);
        // Wraparound skips the stop-all sentinel
        assert_eq!(b, 1);
    }

    #[tokio::test]
    async fn test_expiry_fires_once_and_recycles_slot() {
        let mut f = fixture();
        let id = f.engine.start(Duration::from_secs(2), "Pasta", TimerKind::Countdown).unwrap();

        f.engine.tick();
        assert!(f.cmd_rx.try_recv().is_err());
        assert_eq!(f.engine.remaining(id).unwrap(), Duration::from_secs(1));

        f.engine.tick();
        assert_eq!(f.cmd_rx.try_recv().unwrap(), Command::TimerBeep);
        assert!(!f.engine.is_active(id));
        assert_eq!(f.engine.active_count(), 0);

        let event = f.events.try_recv().unwrap();
        assert!(matches!(event, StateEvent::TimerExpired { id: e, .. } if e == id));

        // Nothing fires after the slot is recycled
        f.engine.tick();
        assert!(f.cmd_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_alarm_expiry_posts_alarm_beep() {
        let mut f = fixture();
        f.engine.start(Duration::from_secs(1), "Wake up", TimerKind::Alarm).unwrap();

        f.engine.tick();
        assert_eq!(f.cmd_rx.try_recv().unwrap(), Command::AlarmBeep);
    }

    #[tokio::test]
    async fn test_warning_cadence_in_final_two_minutes() {
        let mut f = fixture();
        let id = f.engine.start(Duration::from_secs(121), "", TimerKind::Countdown).unwrap();

        let mut boundaries = Vec::new();
        for _ in 0..121 {
            f.engine.tick();
            while let Ok(event) = f.events.try_recv() {
                if let StateEvent::TimerWarning {
                    remaining_seconds, ..
                } = event
                {
                    boundaries.push(remaining_seconds);
                }
            }
        }

        assert_eq!(boundaries, vec![120, 90, 60, 30]);
        assert_eq!(f.tones.played(), vec![Tone::TIMER_WARNING; 4]);
        assert!(!f.engine.is_active(id));
    }

    #[tokio::test]
    async fn test_no_warnings_above_window() {
        let f = fixture();
        f.engine.start(Duration::from_secs(300), "", TimerKind::Countdown).unwrap();

        // 150s remaining is a 30s boundary but outside the warning window
        for _ in 0..160 {
            f.engine.tick();
        }
        assert!(f.tones.played().is_empty());
    }

    #[tokio::test]
    async fn test_stop_all_sentinel() {
        let f = fixture();
        f.engine.start(Duration::from_secs(60), "a", TimerKind::Countdown).unwrap();
        f.engine.start(Duration::from_secs(60), "b", TimerKind::Alarm).unwrap();

        f.engine.stop(STOP_ALL).unwrap();
        assert_eq!(f.engine.active_count(), 0);

        // Stop-all succeeds even with nothing running
        f.engine.stop(STOP_ALL).unwrap();
    }

    #[tokio::test]
    async fn test_stop_unknown_id() {
        let f = fixture();
        assert!(matches!(f.engine.stop(42), Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_next_expiring_picks_soonest() {
        let f = fixture();
        f.engine.start(Duration::from_secs(300), "long", TimerKind::Countdown).unwrap();
        let soon = f.engine.start(Duration::from_secs(30), "short", TimerKind::Countdown).unwrap();

        let next = f.engine.next_expiring().unwrap();
        assert_eq!(next.id, soon);
        assert_eq!(next.label, "short");
        assert_eq!(next.remaining, Duration::from_secs(30));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
        assert_eq!(format_duration(Duration::from_secs(200)), "3m 20s");
        assert_eq!(format_duration(Duration::from_secs(3900)), "1h 5m");
    }
}
