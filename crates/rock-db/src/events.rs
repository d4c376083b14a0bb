//! Connection lifecycle notifications

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Kind of a [`ConnectionEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEventKind {
	/// The native handle was created and initialized
	AfterOpen,
	/// Emitted right before a top-level BEGIN
	BeforeBeginTransaction,
	/// Emitted after a top-level COMMIT
	AfterCommit,
	/// Emitted after a top-level ROLLBACK
	AfterRollback,
}

/// Notification raised by a [`Connection`](crate::Connection)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
	pub kind: ConnectionEventKind,
	/// DSN of the connection with the password masked
	pub dsn: String,
	pub timestamp: DateTime<Utc>,
}

impl ConnectionEvent {
	pub(crate) fn new(kind: ConnectionEventKind, dsn: impl Into<String>) -> Self {
		Self {
			kind,
			dsn: dsn.into(),
			timestamp: Utc::now(),
		}
	}

	pub fn after_open(dsn: impl Into<String>) -> Self {
		Self::new(ConnectionEventKind::AfterOpen, dsn)
	}

	pub fn before_begin_transaction(dsn: impl Into<String>) -> Self {
		Self::new(ConnectionEventKind::BeforeBeginTransaction, dsn)
	}

	pub fn after_commit(dsn: impl Into<String>) -> Self {
		Self::new(ConnectionEventKind::AfterCommit, dsn)
	}

	pub fn after_rollback(dsn: impl Into<String>) -> Self {
		Self::new(ConnectionEventKind::AfterRollback, dsn)
	}
}

/// Receives connection notifications
///
/// Listeners run inline on the task that triggered the event, after the
/// triggering statement completed.
#[async_trait]
pub trait ConnectionEventListener: Send + Sync {
	async fn on_event(&self, event: ConnectionEvent);
}

#[cfg(test)]
mod tests {
	use super::*;
	use parking_lot::Mutex;
	use rstest::rstest;
	use std::sync::Arc;

	struct Recorder(Mutex<Vec<ConnectionEventKind>>);

	#[async_trait]
	impl ConnectionEventListener for Recorder {
		async fn on_event(&self, event: ConnectionEvent) {
			self.0.lock().push(event.kind);
		}
	}

	#[rstest]
	#[tokio::test]
	async fn test_listener_receives_events() {
		// Arrange
		let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
		let listener: Arc<dyn ConnectionEventListener> = recorder.clone();

		// Act
		listener.on_event(ConnectionEvent::after_open("sqlite::memory:")).await;
		listener.on_event(ConnectionEvent::after_commit("sqlite::memory:")).await;

		// Assert
		assert_eq!(
			*recorder.0.lock(),
			vec![ConnectionEventKind::AfterOpen, ConnectionEventKind::AfterCommit]
		);
	}
}
