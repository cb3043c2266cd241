//! Transient user-facing messages raised by mutations.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
  Info,
  Success,
  Warning,
  Error,
}

impl fmt::Display for NotificationLevel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let label = match self {
      NotificationLevel::Info => "info",
      NotificationLevel::Success => "success",
      NotificationLevel::Warning => "warning",
      NotificationLevel::Error => "error",
    };
    f.write_str(label)
  }
}

#[derive(Debug, Clone)]
pub struct Notification {
  pub level: NotificationLevel,
  pub message: String,
  pub created_at: DateTime<Utc>,
}

impl Notification {
  pub fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
    Self {
      level,
      message: message.into(),
      created_at: Utc::now(),
    }
  }

  pub fn success(message: impl Into<String>) -> Self {
    Self::new(NotificationLevel::Success, message)
  }

  pub fn error(message: impl Into<String>) -> Self {
    Self::new(NotificationLevel::Error, message)
  }
}

/// Something that displays notifications.
pub trait NotificationSink: Send + Sync {
  fn notify(&self, notification: &Notification);
}

/// Forwards notifications into a channel, for an event loop to drain.
pub struct ChannelSink {
  tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelSink {
  pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { tx }, rx)
  }
}

impl NotificationSink for ChannelSink {
  fn notify(&self, notification: &Notification) {
    // Ignore send errors - receiver may have been dropped
    let _ = self.tx.send(notification.clone());
  }
}

/// Writes notifications to the log.
pub struct TracingSink;

impl NotificationSink for TracingSink {
  fn notify(&self, notification: &Notification) {
    match notification.level {
      NotificationLevel::Error => error!(message = %notification.message, "notification"),
      NotificationLevel::Warning => warn!(message = %notification.message, "notification"),
      _ => info!(level = %notification.level, message = %notification.message, "notification"),
    }
  }
}

/// Fan-out point between whoever raises notifications and whoever shows them.
///
/// Cloning shares the subscriber list.
#[derive(Clone, Default)]
pub struct Notifier {
  sinks: Arc<RwLock<Vec<Arc<dyn NotificationSink>>>>,
}

impl Notifier {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn subscribe(&self, sink: Arc<dyn NotificationSink>) {
    self
      .sinks
      .write()
      .unwrap_or_else(|e| e.into_inner())
      .push(sink);
  }

  pub fn notify(&self, notification: Notification) {
    let sinks = self.sinks.read().unwrap_or_else(|e| e.into_inner());
    for sink in sinks.iter() {
      sink.notify(&notification);
    }
  }

  pub fn success(&self, message: impl Into<String>) {
    self.notify(Notification::success(message));
  }

  pub fn error(&self, message: impl Into<String>) {
    self.notify(Notification::error(message));
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_fan_out_to_all_subscribers() {
    let notifier = Notifier::new();
    let (first, mut first_rx) = ChannelSink::new();
    let (second, mut second_rx) = ChannelSink::new();
    notifier.subscribe(Arc::new(first));
    notifier.subscribe(Arc::new(second));

    notifier.success("Uploaded label.pdf");

    let a = first_rx.try_recv().unwrap();
    let b = second_rx.try_recv().unwrap();
    assert_eq!(a.level, NotificationLevel::Success);
    assert_eq!(a.message, "Uploaded label.pdf");
    assert_eq!(b.message, "Uploaded label.pdf");
  }

  #[test]
  fn test_no_subscribers_is_fine() {
    Notifier::new().error("nobody is listening");
  }

  #[test]
  fn test_dropped_receiver_is_ignored() {
    let notifier = Notifier::new();
    let (sink, rx) = ChannelSink::new();
    notifier.subscribe(Arc::new(sink));
    drop(rx);
    notifier.success("still fine");
  }
}
