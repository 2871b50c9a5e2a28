//! Connection resilience manager
//!
//! Tracks the health of the always-on backend connections and drives
//! reconnection with exponential backoff. Owners report transport state via
//! [`ConnectionManager::update_state`]; a periodic monitor task retries any
//! connection marked pending once its backoff delay has elapsed. Reconnect
//! hooks are always invoked with the table lock released.

pub mod backoff;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::events::StateEvent;

use backoff::BackoffPolicy;

/// The fixed set of managed external connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    /// Conversation / control-plane socket
    ControlPlane,
    /// Message-broker session
    MessageBroker,
}

pub const CONNECTION_KIND_COUNT: usize = 2;

impl ConnectionKind {
    fn index(self) -> usize {
        match self {
            ConnectionKind::ControlPlane => 0,
            ConnectionKind::MessageBroker => 1,
        }
    }

    fn from_index(index: usize) -> Self {
        match index {
            0 => ConnectionKind::ControlPlane,
            _ => ConnectionKind::MessageBroker,
        }
    }
}

impl std::fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionKind::ControlPlane => write!(f, "control-plane"),
            ConnectionKind::MessageBroker => write!(f, "message-broker"),
        }
    }
}

/// Health state of one managed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
    Disabled,
}

/// Boxed future returned by a reconnect hook
pub type ReconnectFuture = Pin<Box<dyn Future<Output = Result<(), Error>> + Send>>;

/// Reconnection entry point supplied by the connection owner
pub type ReconnectHook = Arc<dyn Fn() -> ReconnectFuture + Send + Sync>;

/// Tuning for the monitor loop and the backoff sequence.
/// Immutable once the manager is constructed.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionManagerConfig {
    /// How often the monitor scans for pending reconnections
    pub health_check_interval: Duration,
    pub initial_retry_delay: Duration,
    pub max_retry_delay: Duration,
    /// Retries before giving up with `Error`; 0 means retry forever
    pub max_retry_count: u32,
    pub backoff_multiplier: f32,
}

impl Default for ConnectionManagerConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(30),
            initial_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(60),
            max_retry_count: 0,
            backoff_multiplier: 2.0,
        }
    }
}

struct Entry {
    registered: bool,
    name: String,
    state: ConnectionState,
    hook: Option<ReconnectHook>,
    retry_count: u32,
    next_retry_delay: Duration,
    last_attempt: Option<Instant>,
    reconnect_pending: bool,
}

impl Entry {
    fn unregistered(initial_delay: Duration) -> Self {
        Self {
            registered: false,
            name: String::new(),
            state: ConnectionState::Disconnected,
            hook: None,
            retry_count: 0,
            next_retry_delay: initial_delay,
            last_attempt: None,
            reconnect_pending: false,
        }
    }

    fn reset_retry_state(&mut self, initial_delay: Duration) {
        self.retry_count = 0;
        self.next_retry_delay = initial_delay;
        self.reconnect_pending = false;
    }
}

/// Manages health state and reconnection for the registered connections
pub struct ConnectionManager {
    config: ConnectionManagerConfig,
    policy: BackoffPolicy,
    entries: Arc<Mutex<Vec<Entry>>>,
    /// Set once the monitor task starts; registration is rejected afterwards
    started: Arc<AtomicBool>,
    event_tx: broadcast::Sender<StateEvent>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionManagerConfig, event_tx: broadcast::Sender<StateEvent>) -> Self {
        let policy = BackoffPolicy::new(
            config.initial_retry_delay,
            config.max_retry_delay,
            config.backoff_multiplier,
        );
        let entries = (0..CONNECTION_KIND_COUNT)
            .map(|_| Entry::unregistered(policy.first()))
            .collect();

        info!(
            interval_ms = config.health_check_interval.as_millis() as u64,
            initial_delay_ms = config.initial_retry_delay.as_millis() as u64,
            max_delay_ms = config.max_retry_delay.as_millis() as u64,
            multiplier = config.backoff_multiplier,
            "connection manager initialized"
        );

        Self {
            config,
            policy,
            entries: Arc::new(Mutex::new(entries)),
            started: Arc::new(AtomicBool::new(false)),
            event_tx,
        }
    }

    /// Register a connection for monitoring. Idempotent per kind; the last
    /// registration wins. Fails once the monitor loop has started.
    pub fn register(
        &self,
        kind: ConnectionKind,
        name: &str,
        hook: ReconnectHook,
    ) -> Result<(), Error> {
        if self.started.load(Ordering::SeqCst) {
            return Err(Error::InvalidState(
                "cannot register connections after the monitor has started".into(),
            ));
        }

        let mut entries = self.entries.lock().expect("connection table poisoned");
        let entry = &mut entries[kind.index()];
        entry.registered = true;
        entry.name = name.to_string();
        entry.hook = Some(hook);
        entry.state = ConnectionState::Disconnected;
        entry.reset_retry_state(self.policy.first());
        drop(entries);

        info!(connection = name, "registered connection");
        Ok(())
    }

    /// Report a transport state change observed by the connection owner.
    /// A report that matches the current state is a no-op.
    pub fn update_state(&self, kind: ConnectionKind, state: ConnectionState) {
        let event = {
            let mut entries = self.entries.lock().expect("connection table poisoned");
            let entry = &mut entries[kind.index()];

            if entry.state == state {
                return;
            }
            let old_state = entry.state;
            entry.state = state;

            match state {
                ConnectionState::Connected => {
                    entry.reset_retry_state(self.policy.first());
                }
                ConnectionState::Disconnected | ConnectionState::Error => {
                    if entry.registered && entry.hook.is_some() {
                        entry.reconnect_pending = true;
                    }
                }
                _ => {}
            }

            info!(
                connection = %entry.name,
                from = ?old_state,
                to = ?state,
                "connection state changed"
            );

            StateEvent::ConnectionChanged {
                kind,
                state,
                retry_count: entry.retry_count,
            }
        };

        let _ = self.event_tx.send(event);
    }

    /// Force a reconnection attempt on the next monitor pass, bypassing the
    /// current backoff delay.
    pub fn request_reconnect(&self, kind: ConnectionKind) -> Result<(), Error> {
        let mut entries = self.entries.lock().expect("connection table poisoned");
        let entry = &mut entries[kind.index()];

        if !entry.registered || entry.hook.is_none() {
            return Err(Error::InvalidState(format!(
                "connection {kind} has no reconnect hook registered"
            )));
        }

        entry.reconnect_pending = true;
        entry.retry_count = 0;
        entry.next_retry_delay = self.policy.first();
        entry.last_attempt = None;
        let name = entry.name.clone();
        drop(entries);

        info!(connection = %name, "reconnection requested");
        Ok(())
    }

    pub fn state(&self, kind: ConnectionKind) -> ConnectionState {
        let entries = self.entries.lock().expect("connection table poisoned");
        entries[kind.index()].state
    }

    pub fn retry_count(&self, kind: ConnectionKind) -> u32 {
        let entries = self.entries.lock().expect("connection table poisoned");
        entries[kind.index()].retry_count
    }

    /// True only if every registered connection is Connected or Disabled
    pub fn all_connected(&self) -> bool {
        let entries = self.entries.lock().expect("connection table poisoned");
        entries.iter().all(|entry| {
            !entry.registered
                || matches!(
                    entry.state,
                    ConnectionState::Connected | ConnectionState::Disabled
                )
        })
    }

    /// Run the monitor loop until the process shuts down
    pub async fn run(&self) {
        self.started.store(true, Ordering::SeqCst);
        info!("connection monitor started");

        let mut interval = tokio::time::interval(self.config.health_check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    /// One monitor pass: attempt every pending connection whose backoff
    /// delay has elapsed.
    async fn tick(&self) {
        let now = Instant::now();
        let mut due: Vec<(ConnectionKind, ReconnectHook)> = Vec::new();
        let mut events: Vec<StateEvent> = Vec::new();

        {
            let mut entries = self.entries.lock().expect("connection table poisoned");
            for (index, entry) in entries.iter_mut().enumerate() {
                if !entry.registered || !entry.reconnect_pending {
                    continue;
                }
                let kind = ConnectionKind::from_index(index);

                if let Some(last) = entry.last_attempt {
                    if now.duration_since(last) < entry.next_retry_delay {
                        continue;
                    }
                }

                if self.config.max_retry_count > 0
                    && entry.retry_count >= self.config.max_retry_count
                {
                    warn!(
                        connection = %entry.name,
                        max_retries = self.config.max_retry_count,
                        "max retries reached, giving up"
                    );
                    entry.reconnect_pending = false;
                    entry.state = ConnectionState::Error;
                    events.push(StateEvent::ConnectionChanged {
                        kind,
                        state: ConnectionState::Error,
                        retry_count: entry.retry_count,
                    });
                    continue;
                }

                info!(
                    connection = %entry.name,
                    attempt = entry.retry_count + 1,
                    delay_ms = entry.next_retry_delay.as_millis() as u64,
                    "attempting reconnection"
                );
                entry.state = ConnectionState::Connecting;
                entry.last_attempt = Some(now);
                events.push(StateEvent::ConnectionChanged {
                    kind,
                    state: ConnectionState::Connecting,
                    retry_count: entry.retry_count,
                });

                let hook = entry.hook.as_ref().expect("pending entry has hook").clone();
                due.push((kind, hook));
            }
        }

        for event in events.drain(..) {
            let _ = self.event_tx.send(event);
        }

        // Hooks run with the table unlocked so they may call back in
        for (kind, hook) in due {
            let result = hook().await;
            let event = self.apply_attempt_result(kind, result);
            let _ = self.event_tx.send(event);
        }
    }

    fn apply_attempt_result(
        &self,
        kind: ConnectionKind,
        result: Result<(), Error>,
    ) -> StateEvent {
        let mut entries = self.entries.lock().expect("connection table poisoned");
        let entry = &mut entries[kind.index()];

        match result {
            Ok(()) => {
                info!(connection = %entry.name, "reconnection successful");
                entry.state = ConnectionState::Connected;
                entry.reset_retry_state(self.policy.first());
                StateEvent::ConnectionChanged {
                    kind,
                    state: ConnectionState::Connected,
                    retry_count: 0,
                }
            }
            Err(err) => {
                warn!(connection = %entry.name, error = %err, "reconnection failed");
                entry.state = ConnectionState::Disconnected;
                entry.retry_count += 1;
                entry.next_retry_delay = self.policy.next(entry.next_retry_delay);
                debug!(
                    connection = %entry.name,
                    next_delay_ms = entry.next_retry_delay.as_millis() as u64,
                    "backoff applied"
                );
                StateEvent::ConnectionChanged {
                    kind,
                    state: ConnectionState::Disconnected,
                    retry_count: entry.retry_count,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn test_config() -> ConnectionManagerConfig {
        ConnectionManagerConfig {
            health_check_interval: Duration::from_secs(5),
            initial_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(60),
            max_retry_count: 0,
            backoff_multiplier: 2.0,
        }
    }

    fn manager(config: ConnectionManagerConfig) -> ConnectionManager {
        let (event_tx, _) = broadcast::channel(64);
        ConnectionManager::new(config, event_tx)
    }

    fn failing_hook(calls: Arc<AtomicUsize>) -> ReconnectHook {
        Arc::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err(Error::Transient("refused".into())) })
        })
    }

    fn succeeding_hook(calls: Arc<AtomicUsize>) -> ReconnectHook {
        Arc::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        })
    }

    #[test]
    fn test_register_after_start_rejected() {
        let mgr = manager(test_config());
        mgr.started.store(true, Ordering::SeqCst);
        let calls = Arc::new(AtomicUsize::new(0));
        let result = mgr.register(ConnectionKind::ControlPlane, "HA", failing_hook(calls));
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_update_state_arms_reconnect() {
        let mgr = manager(test_config());
        let calls = Arc::new(AtomicUsize::new(0));
        mgr.register(ConnectionKind::MessageBroker, "MQTT", failing_hook(calls))
            .unwrap();

        mgr.update_state(ConnectionKind::MessageBroker, ConnectionState::Connected);
        assert_eq!(mgr.state(ConnectionKind::MessageBroker), ConnectionState::Connected);

        mgr.update_state(ConnectionKind::MessageBroker, ConnectionState::Disconnected);
        let entries = mgr.entries.lock().unwrap();
        assert!(entries[ConnectionKind::MessageBroker.index()].reconnect_pending);
    }

    #[test]
    fn test_update_state_unchanged_is_noop() {
        let (event_tx, mut event_rx) = broadcast::channel(16);
        let mgr = ConnectionManager::new(test_config(), event_tx);
        let calls = Arc::new(AtomicUsize::new(0));
        mgr.register(ConnectionKind::ControlPlane, "HA", succeeding_hook(calls))
            .unwrap();

        mgr.update_state(ConnectionKind::ControlPlane, ConnectionState::Connected);
        assert!(event_rx.try_recv().is_ok());

        // Duplicate report fires no second notification
        mgr.update_state(ConnectionKind::ControlPlane, ConnectionState::Connected);
        assert!(event_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sequence_and_cap() {
        let mgr = manager(test_config());
        let calls = Arc::new(AtomicUsize::new(0));
        mgr.register(ConnectionKind::ControlPlane, "HA", failing_hook(calls.clone()))
            .unwrap();
        mgr.update_state(ConnectionKind::ControlPlane, ConnectionState::Connected);
        mgr.update_state(ConnectionKind::ControlPlane, ConnectionState::Disconnected);

        let mut delays = Vec::new();
        for _ in 0..8 {
            // Move past the current backoff delay, then run a monitor pass
            let wait = {
                let entries = mgr.entries.lock().unwrap();
                entries[0].next_retry_delay
            };
            tokio::time::advance(wait).await;
            mgr.tick().await;
            let entries = mgr.entries.lock().unwrap();
            delays.push(entries[0].next_retry_delay.as_secs());
        }

        assert_eq!(delays, vec![2, 4, 8, 16, 32, 60, 60, 60]);
        assert_eq!(calls.load(Ordering::SeqCst), 8);
        assert_eq!(mgr.state(ConnectionKind::ControlPlane), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_sequence() {
        let mgr = manager(test_config());
        let fail = Arc::new(AtomicBool::new(true));
        let fail_flag = fail.clone();
        let hook: ReconnectHook = Arc::new(move || {
            let should_fail = fail_flag.load(Ordering::SeqCst);
            Box::pin(async move {
                if should_fail {
                    Err(Error::Transient("refused".into()))
                } else {
                    Ok(())
                }
            })
        });
        mgr.register(ConnectionKind::ControlPlane, "HA", hook).unwrap();
        mgr.update_state(ConnectionKind::ControlPlane, ConnectionState::Connected);
        mgr.update_state(ConnectionKind::ControlPlane, ConnectionState::Disconnected);

        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(60)).await;
            mgr.tick().await;
        }
        assert_eq!(mgr.retry_count(ConnectionKind::ControlPlane), 3);

        fail.store(false, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(60)).await;
        mgr.tick().await;

        assert_eq!(mgr.state(ConnectionKind::ControlPlane), ConnectionState::Connected);
        assert_eq!(mgr.retry_count(ConnectionKind::ControlPlane), 0);
        let entries = mgr.entries.lock().unwrap();
        assert_eq!(entries[0].next_retry_delay, Duration::from_secs(1));
        assert!(!entries[0].reconnect_pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion() {
        let mut config = test_config();
        config.max_retry_count = 3;
        let mgr = manager(config);
        let calls = Arc::new(AtomicUsize::new(0));
        mgr.register(ConnectionKind::MessageBroker, "MQTT", failing_hook(calls.clone()))
            .unwrap();
        mgr.update_state(ConnectionKind::MessageBroker, ConnectionState::Connected);
        mgr.update_state(ConnectionKind::MessageBroker, ConnectionState::Disconnected);

        for _ in 0..4 {
            tokio::time::advance(Duration::from_secs(60)).await;
            mgr.tick().await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(mgr.state(ConnectionKind::MessageBroker), ConnectionState::Error);

        // No further attempts happen on their own
        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(60)).await;
            mgr.tick().await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // A forced reconnect resets the retry budget and attempts immediately
        mgr.request_reconnect(ConnectionKind::MessageBroker).unwrap();
        mgr.tick().await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_reconnect_bypasses_backoff() {
        let mgr = manager(test_config());
        let calls = Arc::new(AtomicUsize::new(0));
        mgr.register(ConnectionKind::ControlPlane, "HA", failing_hook(calls.clone()))
            .unwrap();
        mgr.update_state(ConnectionKind::ControlPlane, ConnectionState::Connected);
        mgr.update_state(ConnectionKind::ControlPlane, ConnectionState::Disconnected);

        tokio::time::advance(Duration::from_secs(1)).await;
        mgr.tick().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Backoff is now 2s; without a forced request the next tick is too early
        mgr.tick().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        mgr.request_reconnect(ConnectionKind::ControlPlane).unwrap();
        mgr.tick().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_all_connected() {
        let mgr = manager(test_config());
        let calls = Arc::new(AtomicUsize::new(0));
        mgr.register(ConnectionKind::ControlPlane, "HA", succeeding_hook(calls.clone()))
            .unwrap();
        mgr.register(ConnectionKind::MessageBroker, "MQTT", succeeding_hook(calls))
            .unwrap();

        assert!(!mgr.all_connected());

        mgr.update_state(ConnectionKind::ControlPlane, ConnectionState::Connected);
        assert!(!mgr.all_connected());

        mgr.update_state(ConnectionKind::MessageBroker, ConnectionState::Disabled);
        assert!(mgr.all_connected());
    }

    #[test]
    fn test_request_reconnect_unregistered() {
        let mgr = manager(test_config());
        let result = mgr.request_reconnect(ConnectionKind::ControlPlane);
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }
}
