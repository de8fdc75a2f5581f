//! Cancellable, deadline-bearing call context accepted by every blocking operation.
//!
//! A [`Context`] pairs a [`CancellationToken`] with an optional deadline. Derived contexts
//! ([`Context::child`], [`Context::with_timeout`]) are cancelled whenever their parent is, and
//! never outlive the parent's deadline, but cancelling a child leaves the parent untouched.
//! Per-attempt deadlines inside the token source are built this way.

// std
use std::time::Duration as StdDuration;
// crates.io
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
// self
use crate::_prelude::*;

/// Why a [`Context`] stopped accepting work.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interrupt {
	/// [`Context::cancel`] was called on this context or one of its ancestors.
	Canceled,
	/// The context deadline elapsed.
	DeadlineExceeded,
}
impl Interrupt {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Interrupt::Canceled => "canceled",
			Interrupt::DeadlineExceeded => "deadline_exceeded",
		}
	}
}
impl Display for Interrupt {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Call context carrying cancellation and an optional deadline.
#[derive(Clone, Debug, Default)]
pub struct Context {
	token: CancellationToken,
	deadline: Option<Instant>,
}
impl Context {
	/// Root context that is never cancelled and has no deadline.
	pub fn background() -> Self {
		Self::default()
	}

	/// Derives a context that is cancelled together with `self`.
	pub fn child(&self) -> Self {
		Self { token: self.token.child_token(), deadline: self.deadline }
	}

	/// Derives a context whose deadline is `timeout` from now, or the parent deadline when that
	/// is earlier.
	///
	/// A timeout too large to represent as an instant adds no deadline of its own.
	pub fn with_timeout(&self, timeout: StdDuration) -> Self {
		match Instant::now().checked_add(timeout) {
			Some(deadline) => self.with_deadline(deadline),
			None => self.child(),
		}
	}

	/// Derives a context with an absolute deadline, clamped to the parent deadline.
	pub fn with_deadline(&self, deadline: Instant) -> Self {
		let deadline = match self.deadline {
			Some(parent) if parent < deadline => parent,
			_ => deadline,
		};

		Self { token: self.token.child_token(), deadline: Some(deadline) }
	}

	/// Cancels this context and every context derived from it.
	pub fn cancel(&self) {
		self.token.cancel();
	}

	/// Deadline attached to the context, if any.
	pub fn deadline(&self) -> Option<Instant> {
		self.deadline
	}

	/// Returns the interrupt reason once the context is done.
	pub fn interrupted(&self) -> Option<Interrupt> {
		if self.token.is_cancelled() {
			return Some(Interrupt::Canceled);
		}
		if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
			return Some(Interrupt::DeadlineExceeded);
		}

		None
	}

	/// Returns `true` once the context has been cancelled or its deadline elapsed.
	pub fn is_done(&self) -> bool {
		self.interrupted().is_some()
	}

	/// Fails with [`Error::Canceled`] when the context is already done.
	pub fn ensure_active(&self, operation: &'static str) -> Result<()> {
		match self.interrupted() {
			Some(reason) => Err(Error::Canceled { operation, reason }),
			None => Ok(()),
		}
	}

	/// Resolves when the context is cancelled or its deadline elapses.
	pub async fn done(&self) -> Interrupt {
		match self.deadline {
			Some(deadline) => {
				tokio::select! {
					biased;
					_ = self.token.cancelled() => Interrupt::Canceled,
					_ = time::sleep_until(deadline) => Interrupt::DeadlineExceeded,
				}
			},
			None => {
				self.token.cancelled().await;

				Interrupt::Canceled
			},
		}
	}

	/// Sleeps for `duration` unless the context finishes first.
	pub async fn sleep(&self, operation: &'static str, duration: StdDuration) -> Result<()> {
		tokio::select! {
			biased;
			reason = self.done() => Err(Error::Canceled { operation, reason }),
			_ = time::sleep(duration) => Ok(()),
		}
	}
}
