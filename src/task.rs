//! Task chain completion tracking.
//!
//! Mutating control-plane operations start asynchronous backend jobs ("task chains") and hand
//! back an identifier. [`TaskChainTracker::wait_for_completion`] polls a [`TaskChainCheck`]
//! until the chain reaches a terminal state. Polls never overlap, a failing check is returned
//! immediately, and cancellation is observed only between polls so an in-flight check always
//! finishes. The caller's [`Context`] deadline is the only bound on the wait.

// std
use std::time::Duration as StdDuration;
// self
use crate::{
	_prelude::*,
	context::Context,
	error::ProtocolError,
	graphql::{self, RequestExecutor},
	id::TaskChainId,
	obs::{self, OperationKind, OperationOutcome, OperationSpan},
};

const OPERATION: &str = "wait_for_task_chain";
const STATUS_ENDPOINT: &str = "task chain status";

/// Boxed future returned by [`TaskChainCheck::check`].
pub type CheckFuture<'a> = Pin<Box<dyn Future<Output = Result<TaskChainStatus>> + 'a + Send>>;

/// Closed set of task chain states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskChainState {
	/// Queued or executing.
	Running,
	/// Finished successfully.
	Succeeded,
	/// Finished with an error.
	Failed,
	/// Cancelled on the backend.
	Canceled,
}
impl TaskChainState {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			TaskChainState::Running => "RUNNING",
			TaskChainState::Succeeded => "SUCCEEDED",
			TaskChainState::Failed => "FAILED",
			TaskChainState::Canceled => "CANCELED",
		}
	}

	/// Returns `true` for every state except [`TaskChainState::Running`].
	pub const fn is_terminal(self) -> bool {
		!matches!(self, TaskChainState::Running)
	}

	/// Maps a control-plane status string; queued and cancelling chains count as running.
	pub fn from_wire(value: &str) -> Option<Self> {
		match value {
			"READY" | "RUNNING" | "CANCELING" => Some(TaskChainState::Running),
			"SUCCEEDED" => Some(TaskChainState::Succeeded),
			"FAILED" => Some(TaskChainState::Failed),
			"CANCELED" => Some(TaskChainState::Canceled),
			_ => None,
		}
	}
}
impl Display for TaskChainState {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// One observation of a task chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskChainStatus {
	/// `true` once the chain stopped running.
	pub done: bool,
	/// Last observed state.
	pub state: TaskChainState,
}
impl TaskChainStatus {
	/// Builds a status whose `done` flag follows [`TaskChainState::is_terminal`].
	pub const fn observed(state: TaskChainState) -> Self {
		Self { done: state.is_terminal(), state }
	}
}

/// Status predicate polled by [`TaskChainTracker`].
pub trait TaskChainCheck
where
	Self: Send + Sync,
{
	/// Identifier of the chain being observed.
	fn task_chain_id(&self) -> &TaskChainId;

	/// Reads the current status once.
	fn check<'a>(&'a self, ctx: &'a Context) -> CheckFuture<'a>;
}

/// Polls task chains to completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskChainTracker {
	poll_interval: StdDuration,
}
impl TaskChainTracker {
	/// Default delay between polls (10 seconds).
	pub const DEFAULT_POLL_INTERVAL: StdDuration = StdDuration::from_secs(10);
	/// Lower bound applied by [`TaskChainTracker::with_poll_interval`].
	pub const MIN_POLL_INTERVAL: StdDuration = StdDuration::from_millis(100);

	/// Creates a tracker using [`Self::DEFAULT_POLL_INTERVAL`].
	pub fn new() -> Self {
		Self { poll_interval: Self::DEFAULT_POLL_INTERVAL }
	}

	/// Overrides the poll interval, clamped to [`Self::MIN_POLL_INTERVAL`].
	pub fn with_poll_interval(mut self, interval: StdDuration) -> Self {
		self.poll_interval = interval.max(Self::MIN_POLL_INTERVAL);

		self
	}

	/// Delay between polls.
	pub fn poll_interval(&self) -> StdDuration {
		self.poll_interval
	}

	/// Polls `check` until the chain finishes.
	///
	/// Returns [`TaskChainState::Succeeded`] on success. `Failed` and `Canceled` chains surface
	/// as [`Error::TaskChain`]; an interrupted `ctx` surfaces as [`Error::Canceled`].
	pub async fn wait_for_completion(
		&self,
		ctx: &Context,
		check: &dyn TaskChainCheck,
	) -> Result<TaskChainState> {
		const KIND: OperationKind = OperationKind::WaitForTaskChain;

		let span = OperationSpan::new(KIND, "wait_for_completion");

		obs::record_operation_outcome(KIND, OperationOutcome::Attempt);

		let result = span.instrument(self.poll(ctx, check)).await;

		obs::record_operation_outcome(KIND, OperationOutcome::of(&result));

		result
	}

	async fn poll(&self, ctx: &Context, check: &dyn TaskChainCheck) -> Result<TaskChainState> {
		let task_chain_id = check.task_chain_id();
		let mut polls = 0_u32;

		loop {
			ctx.ensure_active(OPERATION)?;

			polls += 1;

			let status = check.check(ctx).await?;

			if status.done {
				obs::event!(
					debug,
					task_chain_id = %task_chain_id,
					polls,
					state = %status.state,
					"Task chain finished."
				);

				return match status.state {
					TaskChainState::Succeeded => Ok(TaskChainState::Succeeded),
					state @ (TaskChainState::Failed | TaskChainState::Canceled) =>
						Err(Error::TaskChain { task_chain_id: task_chain_id.to_string(), state }),
					TaskChainState::Running => Err(ProtocolError::InvalidResponse {
						endpoint: STATUS_ENDPOINT,
						reason: format!("task chain `{task_chain_id}` reported done while running"),
					}
					.into()),
				};
			}

			obs::event!(
				trace,
				task_chain_id = %task_chain_id,
				polls,
				state = %status.state,
				"Task chain still running."
			);

			ctx.sleep(OPERATION, self.poll_interval).await?;
		}
	}
}
impl Default for TaskChainTracker {
	fn default() -> Self {
		Self::new()
	}
}

/// [`TaskChainCheck`] reading `getKorgTaskchainStatus` through a [`RequestExecutor`].
pub struct GraphqlTaskChainCheck<'e, E>
where
	E: ?Sized + RequestExecutor,
{
	executor: &'e E,
	task_chain_id: TaskChainId,
}
impl<'e, E> GraphqlTaskChainCheck<'e, E>
where
	E: ?Sized + RequestExecutor,
{
	/// Observes `task_chain_id` through `executor`.
	pub fn new(executor: &'e E, task_chain_id: TaskChainId) -> Self {
		Self { executor, task_chain_id }
	}
}
impl<E> TaskChainCheck for GraphqlTaskChainCheck<'_, E>
where
	E: ?Sized + RequestExecutor,
{
	fn task_chain_id(&self) -> &TaskChainId {
		&self.task_chain_id
	}

	fn check<'a>(&'a self, ctx: &'a Context) -> CheckFuture<'a> {
		#[derive(Deserialize)]
		struct StatusResult {
			taskchain: Taskchain,
		}
		#[derive(Deserialize)]
		struct Taskchain {
			state: String,
		}

		Box::pin(async move {
			let variables = serde_json::json!({ "taskchainId": self.task_chain_id.as_str() });
			let body =
				self.executor.request(ctx, graphql::TASK_CHAIN_STATUS_QUERY, variables).await?;
			let result: StatusResult = graphql::decode_data(STATUS_ENDPOINT, &body)?;
			let state = TaskChainState::from_wire(&result.taskchain.state).ok_or_else(|| {
				ProtocolError::InvalidResponse {
					endpoint: STATUS_ENDPOINT,
					reason: format!("unknown task chain state `{}`", result.taskchain.state),
				}
			})?;

			Ok(TaskChainStatus::observed(state))
		})
	}
}
impl<E> Debug for GraphqlTaskChainCheck<'_, E>
where
	E: ?Sized + RequestExecutor,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("GraphqlTaskChainCheck").field("task_chain_id", &self.task_chain_id).finish()
	}
}
