// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for token acquisitions.
#[derive(Debug, Default)]
pub struct TokenMetrics {
	acquisitions: AtomicU64,
	cache_hits: AtomicU64,
	network_attempts: AtomicU64,
	failures: AtomicU64,
}
impl TokenMetrics {
	/// Returns the total number of [`acquire`](crate::auth::TokenSource::acquire) calls.
	pub fn acquisitions(&self) -> u64 {
		self.acquisitions.load(Ordering::Relaxed)
	}

	/// Returns the number of acquisitions answered from the cache.
	pub fn cache_hits(&self) -> u64 {
		self.cache_hits.load(Ordering::Relaxed)
	}

	/// Returns the number of requests sent to the token endpoint.
	pub fn network_attempts(&self) -> u64 {
		self.network_attempts.load(Ordering::Relaxed)
	}

	/// Returns the number of acquisitions that ended in an error.
	pub fn failures(&self) -> u64 {
		self.failures.load(Ordering::Relaxed)
	}

	pub(crate) fn record_acquisition(&self) {
		self.acquisitions.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_cache_hit(&self) {
		self.cache_hits.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_network_attempt(&self) {
		self.network_attempts.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_failure(&self) {
		self.failures.fetch_add(1, Ordering::Relaxed);
	}
}
