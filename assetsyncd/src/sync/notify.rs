use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Error,
}

/// A user-facing message. Per-file failures never produce one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct Notifier {
    tx: Option<mpsc::UnboundedSender<Notification>>,
}

impl Notifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Drops every notification.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn error(&self, message: impl Into<String>) {
        self.send(NotificationLevel::Error, message.into());
    }

    pub fn info(&self, message: impl Into<String>) {
        self.send(NotificationLevel::Info, message.into());
    }

    fn send(&self, level: NotificationLevel, message: String) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Notification { level, message });
        }
    }
}

#[cfg(test)]
pub(crate) fn drain(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Vec<Notification> {
    let mut out = Vec::new();
    while let Ok(notification) = rx.try_recv() {
        out.push(notification);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_delivers_in_order() {
        let (notifier, mut rx) = Notifier::channel();
        notifier.info("uploaded 2 files");
        notifier.error("project missing");

        let got = drain(&mut rx);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].level, NotificationLevel::Info);
        assert_eq!(got[1].message, "project missing");
    }

    #[test]
    fn silent_notifier_does_not_panic() {
        Notifier::silent().error("ignored");
    }
}
