use dashmap::DashMap;
use log::debug;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use uuid::Uuid;

/// Named events understood by the browser client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    /// First event on a new stream; carries the connection id.
    Connected,
    /// Progress, reports and final error messages.
    OnComplete,
    /// Signed link to the produced output file.
    DownloadResult,
    /// Viewer-ready urn of the translated output.
    OnTranslation,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::Connected => "connected",
            NotificationKind::OnComplete => "onComplete",
            NotificationKind::DownloadResult => "downloadResult",
            NotificationKind::OnTranslation => "onTranslation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub payload: String,
}

/// Per-browser addressable push channels.
///
/// Delivery is fire-and-forget: there is no acknowledgement and no replay.
/// Pushing to a connection that is gone drops the event.
#[derive(Clone, Default)]
pub struct NotificationHub {
    clients: Arc<DashMap<String, UnboundedSender<Notification>>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection. Dropping the returned subscription
    /// unregisters it.
    pub fn connect(&self) -> Subscription {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = unbounded_channel();
        self.clients.insert(id.clone(), tx);
        debug!("Client {} connected", id);
        Subscription {
            id,
            rx,
            clients: self.clients.clone(),
        }
    }

    pub fn push(&self, connection_id: &str, kind: NotificationKind, payload: impl Into<String>) {
        let notification = Notification {
            kind,
            payload: payload.into(),
        };
        let delivered = match self.clients.get(connection_id) {
            Some(sender) => sender.send(notification).is_ok(),
            None => false,
        };
        if !delivered {
            debug!(
                "Dropped {} event for disconnected client {}",
                kind.as_str(),
                connection_id
            );
        }
    }

    pub fn is_connected(&self, connection_id: &str) -> bool {
        self.clients.contains_key(connection_id)
    }

    pub fn connection_count(&self) -> usize {
        self.clients.len()
    }
}

/// Receiving end of one browser connection.
pub struct Subscription {
    id: String,
    rx: UnboundedReceiver<Notification>,
    clients: Arc<DashMap<String, UnboundedSender<Notification>>>,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    /// Everything pushed so far, without waiting.
    pub fn drain(&mut self) -> Vec<Notification> {
        let mut notifications = Vec::new();
        while let Ok(notification) = self.rx.try_recv() {
            notifications.push(notification);
        }
        notifications
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.clients.remove(&self.id);
        debug!("Client {} disconnected", self.id);
    }
}
