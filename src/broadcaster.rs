//! Coalescing update notifications.
//!
//! Workers call [`UpdateBroadcaster::publish`] whenever shared state changed.
//! Observers hold a [`NotificationSink`] and block on
//! [`NotificationSink::wait_for_update`]. Delivery is last-wins per observer: if
//! several kinds are published between two waits, the observer only sees the
//! latest one. A notification carries no payload; observers re-read the
//! authoritative state (connectivity, session cache, snapshots) when woken.

use std::time::Duration;

use strum_macros::{AsRefStr, Display, EnumIter};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// What kind of state changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum UpdateKind {
    /// Initial value seen by observers before anything was published
    Connected,
    /// The peer tracker finished a tick
    PeersUpdate,
    /// A geolocation lookup finished
    GeoUpdate,
    /// Connectivity state or lookup mode changed
    Connectivity,
}

/// What an observer receives from a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// Something of this kind (or later kinds, coalesced) was published
    Update(UpdateKind),
    /// Nothing was published before the timeout expired
    Keepalive,
    /// The monitor is shutting down
    Closed,
}

impl Notification {
    /// Event name as sent to long-lived consumers (`keepalive`, `geo_update`, ...).
    pub fn as_str(&self) -> &str {
        match self {
            Notification::Update(kind) => kind.as_ref(),
            Notification::Keepalive => "keepalive",
            Notification::Closed => "closed",
        }
    }
}

/// Publishing side of the notification channel.
pub struct UpdateBroadcaster {
    tx: watch::Sender<UpdateKind>,
    cancel: CancellationToken,
}

impl UpdateBroadcaster {
    /// Creates a broadcaster whose sinks report [`Notification::Closed`] once
    /// `cancel` is raised.
    pub fn new(cancel: CancellationToken) -> Self {
        let (tx, _rx) = watch::channel(UpdateKind::Connected);
        UpdateBroadcaster { tx, cancel }
    }

    /// Marks that an update of `kind` occurred and wakes every waiting observer.
    pub fn publish(&self, kind: UpdateKind) {
        // send_replace succeeds with zero receivers and always bumps the version
        self.tx.send_replace(kind);
    }

    /// The most recently published kind.
    pub fn last_kind(&self) -> UpdateKind {
        *self.tx.borrow()
    }

    /// Registers a new observer. It only sees updates published after this call.
    pub fn subscribe(&self) -> NotificationSink {
        NotificationSink {
            rx: self.tx.subscribe(),
            cancel: self.cancel.clone(),
        }
    }

    /// Number of live observers.
    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Consuming side of the notification channel, one per observer.
pub struct NotificationSink {
    rx: watch::Receiver<UpdateKind>,
    cancel: CancellationToken,
}

impl NotificationSink {
    /// Waits up to `timeout` for an update.
    ///
    /// Returns the latest published kind, [`Notification::Keepalive`] when the
    /// timeout expired first, or [`Notification::Closed`] on shutdown.
    pub async fn wait_for_update(&mut self, timeout: Duration) -> Notification {
        if self.cancel.is_cancelled() {
            return Notification::Closed;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Notification::Closed,
            res = tokio::time::timeout(timeout, self.rx.changed()) => match res {
                Ok(Ok(())) => Notification::Update(*self.rx.borrow_and_update()),
                Ok(Err(_)) => Notification::Closed,
                Err(_) => Notification::Keepalive,
            },
        }
    }
}
