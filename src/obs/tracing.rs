// self
use crate::{_prelude::*, obs::OperationKind};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedOperation<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedOperation<F> = F;

/// A span builder used by client operations.
#[derive(Clone, Debug)]
pub struct OperationSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl OperationSpan {
	/// Creates a new span tagged with the provided operation kind + stage.
	pub fn new(kind: OperationKind, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!("polaris.op", op = kind.as_str(), stage);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (kind, stage);

			Self {}
		}
	}

	/// Enters the span for synchronous sections.
	pub fn entered(self) -> OperationSpanGuard {
		#[cfg(feature = "tracing")]
		{
			OperationSpanGuard { guard: self.span.entered() }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = self;

			OperationSpanGuard {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedOperation<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

/// RAII guard returned by [`OperationSpan::entered`].
pub struct OperationSpanGuard {
	#[cfg(feature = "tracing")]
	#[allow(dead_code)]
	guard: tracing::span::EnteredSpan,
}
impl Debug for OperationSpanGuard {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("OperationSpanGuard(..)")
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::obs::OperationOutcome;

	const KINDS: [OperationKind; 4] = [
		OperationKind::AcquireToken,
		OperationKind::Query,
		OperationKind::WaitForTaskChain,
		OperationKind::Reconcile,
	];

	#[cfg(feature = "tracing")]
	mod capture {
		// crates.io
		use tracing::{
			Event, Metadata, Subscriber,
			field::{Field, Visit},
			span::{Attributes, Id, Record},
		};
		// self
		use crate::_prelude::*;

		/// Name and string fields of one recorded span.
		pub(super) type CapturedSpan = (&'static str, BTreeMap<&'static str, String>);

		/// Subscriber recording every span opened while it is the default dispatcher.
		#[derive(Clone, Default)]
		pub(super) struct SpanCapture(pub(super) Arc<Mutex<Vec<CapturedSpan>>>);
		impl Subscriber for SpanCapture {
			fn enabled(&self, _: &Metadata<'_>) -> bool {
				true
			}

			fn new_span(&self, attrs: &Attributes<'_>) -> Id {
				let mut fields = FieldMap::default();

				attrs.record(&mut fields);

				let mut spans = self.0.lock();

				spans.push((attrs.metadata().name(), fields.0));

				Id::from_u64(spans.len() as u64)
			}

			fn record(&self, _: &Id, _: &Record<'_>) {}

			fn record_follows_from(&self, _: &Id, _: &Id) {}

			fn event(&self, _: &Event<'_>) {}

			fn enter(&self, _: &Id) {}

			fn exit(&self, _: &Id) {}
		}

		#[derive(Default)]
		struct FieldMap(BTreeMap<&'static str, String>);
		impl Visit for FieldMap {
			fn record_str(&mut self, field: &Field, value: &str) {
				self.0.insert(field.name(), value.to_owned());
			}

			fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
				self.0.insert(field.name(), format!("{value:?}"));
			}
		}
	}

	#[cfg(feature = "tracing")]
	#[test]
	fn spans_carry_operation_and_stage_fields() {
		let capture = capture::SpanCapture::default();

		tracing::subscriber::with_default(capture.clone(), || {
			for kind in KINDS {
				let _guard = OperationSpan::new(kind, "fetch").entered();
			}
		});

		let spans = capture.0.lock();

		assert_eq!(spans.len(), KINDS.len());

		for ((name, fields), kind) in spans.iter().zip(KINDS) {
			assert_eq!(*name, "polaris.op");
			assert_eq!(fields.get("op").map(String::as_str), Some(kind.as_str()));
			assert_eq!(fields.get("stage").map(String::as_str), Some("fetch"));
		}
	}

	#[tokio::test]
	async fn instrumented_operation_yields_inner_output() {
		let span = OperationSpan::new(OperationKind::Query, "request");
		let result: Result<Vec<u8>> = span.instrument(async { Ok(b"{}".to_vec()) }).await;

		assert_eq!(OperationOutcome::of(&result), OperationOutcome::Success);
		assert_eq!(result.expect("Instrumented future should succeed."), b"{}");
	}

	#[test]
	fn operation_labels_are_distinct() {
		let labels = KINDS.iter().map(|kind| kind.as_str()).collect::<BTreeSet<_>>();

		assert_eq!(labels.len(), KINDS.len());
		assert_eq!(OperationKind::WaitForTaskChain.to_string(), "wait_for_task_chain");
	}
}
