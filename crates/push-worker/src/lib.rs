//! Push worker: dispatches offline-push candidates to device tokens via a
//! pluggable sink.

pub mod sink;
