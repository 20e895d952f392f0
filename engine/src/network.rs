//! Network availability tracking.
//!
//! The host reports connectivity through [`NetworkMonitor::set_online`] (for
//! example from an OS event or the optional TCP probe). The user can also
//! force the queue offline. Dispatch only happens while the effective state,
//! `reported && !forced_offline`, is online.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
struct Flags {
    reported: bool,
    forced_offline: bool,
}

impl Flags {
    fn online(self) -> bool {
        self.reported && !self.forced_offline
    }
}

#[derive(Debug)]
struct Inner {
    flags: Mutex<Flags>,
    tx: watch::Sender<bool>,
}

/// Cloneable handle to the shared online/offline state.
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    inner: Arc<Inner>,
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkMonitor {
    #[must_use]
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self {
            inner: Arc::new(Inner {
                flags: Mutex::new(Flags {
                    reported: online,
                    forced_offline: false,
                }),
                tx,
            }),
        }
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.inner.tx.borrow()
    }

    #[must_use]
    pub fn is_forced_offline(&self) -> bool {
        self.with_flags(|flags| flags.forced_offline)
    }

    /// Connectivity as reported by the platform or probe.
    pub fn set_online(&self, online: bool) {
        self.update(|flags| flags.reported = online);
    }

    /// User override: hold the queue offline regardless of connectivity.
    pub fn set_forced_offline(&self, forced: bool) {
        self.update(|flags| flags.forced_offline = forced);
    }

    /// Flip the user override. Returns the new override value.
    pub fn toggle_forced_offline(&self) -> bool {
        let mut forced = false;
        self.update(|flags| {
            flags.forced_offline = !flags.forced_offline;
            forced = flags.forced_offline;
        });
        forced
    }

    /// Listen for effective online/offline changes.
    ///
    /// The listener is removed when the returned [`Subscription`] is dropped.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.inner.tx.subscribe(),
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.tx.receiver_count()
    }

    /// Periodically probe `target` over TCP and report the result.
    ///
    /// The probe runs until the returned guard is dropped.
    #[must_use]
    pub fn spawn_probe(&self, target: ProbeTarget, interval: Duration) -> ProbeGuard {
        let monitor = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let reachable = target.is_reachable().await;
                debug!(host = %target.host, port = target.port, reachable, "Network probe");
                monitor.set_online(reachable);
            }
        });
        ProbeGuard { handle }
    }

    fn with_flags<R>(&self, f: impl FnOnce(&Flags) -> R) -> R {
        let flags = self.inner.flags.lock().unwrap_or_else(PoisonError::into_inner);
        f(&flags)
    }

    fn update(&self, f: impl FnOnce(&mut Flags)) {
        let mut flags = self.inner.flags.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut flags);
        let online = flags.online();
        drop(flags);

        let changed = self.inner.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "Network state changed");
        }
    }
}

/// Live listener on a [`NetworkMonitor`]. Dropping it deregisters.
#[derive(Debug)]
pub struct Subscription {
    rx: watch::Receiver<bool>,
}

impl Subscription {
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the next change and return the new state.
    ///
    /// Returns `None` once every monitor handle is gone.
    pub async fn changed(&mut self) -> Option<bool> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}

/// Aborts the probe task on drop.
#[derive(Debug)]
pub struct ProbeGuard {
    handle: JoinHandle<()>,
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Host and port the probe connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub host: String,
    pub port: u16,
}

impl ProbeTarget {
    /// Derive the target from a backend URL, using the scheme's default port.
    #[must_use]
    pub fn from_url(raw: &str) -> Option<Self> {
        let url = Url::parse(raw.trim()).ok()?;
        Some(Self {
            host: url.host_str()?.to_string(),
            port: url.port_or_known_default()?,
        })
    }

    async fn is_reachable(&self) -> bool {
        matches!(
            tokio::time::timeout(
                PROBE_CONNECT_TIMEOUT,
                TcpStream::connect((self.host.as_str(), self.port)),
            )
            .await,
            Ok(Ok(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{NetworkMonitor, ProbeTarget};

    #[test]
    fn forced_offline_overrides_reported_state() {
        let monitor = NetworkMonitor::new(true);
        assert!(monitor.is_online());

        monitor.set_forced_offline(true);
        assert!(!monitor.is_online());

        monitor.set_online(true);
        assert!(!monitor.is_online());

        assert!(!monitor.toggle_forced_offline());
        assert!(monitor.is_online());
    }

    #[test]
    fn dropping_subscription_deregisters() {
        let monitor = NetworkMonitor::new(true);
        assert_eq!(monitor.subscriber_count(), 0);

        let a = monitor.subscribe();
        let b = monitor.subscribe();
        assert_eq!(monitor.subscriber_count(), 2);

        drop(a);
        assert_eq!(monitor.subscriber_count(), 1);
        drop(b);
        assert_eq!(monitor.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn subscription_sees_transitions() {
        let monitor = NetworkMonitor::new(true);
        let mut sub = monitor.subscribe();

        monitor.set_online(false);
        assert_eq!(sub.changed().await, Some(false));

        monitor.set_online(true);
        assert_eq!(sub.changed().await, Some(true));
        assert!(sub.is_online());
    }

    #[tokio::test]
    async fn repeated_reports_do_not_notify() {
        let monitor = NetworkMonitor::new(true);
        let mut sub = monitor.subscribe();

        monitor.set_online(true);
        let waited = tokio::time::timeout(Duration::from_millis(20), sub.changed()).await;
        assert!(waited.is_err());
    }

    #[test]
    fn probe_target_from_url() {
        assert_eq!(
            ProbeTarget::from_url("https://helix.example.com/api"),
            Some(ProbeTarget {
                host: "helix.example.com".into(),
                port: 443,
            })
        );
        assert_eq!(
            ProbeTarget::from_url("http://localhost:8080"),
            Some(ProbeTarget {
                host: "localhost".into(),
                port: 8080,
            })
        );
        assert_eq!(ProbeTarget::from_url("not a url"), None);
    }

    #[tokio::test]
    async fn probe_reports_reachability() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let monitor = NetworkMonitor::new(false);

        let guard = monitor.spawn_probe(
            ProbeTarget {
                host: "127.0.0.1".into(),
                port,
            },
            Duration::from_millis(10),
        );

        let mut sub = monitor.subscribe();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !sub.is_online() {
                let _ = sub.changed().await;
            }
        })
        .await
        .expect("probe should report the listener as reachable");
        assert!(monitor.is_online());
        drop(guard);
    }
}
