//! Debounced teardown and reconnect in response to resize notifications.
//!
//! The negotiator only tracks time and the requested geometry. The backend performs
//! the work for each [`ResizeStep`] it hands out.

use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResizeRequest {
	pub width: u32,
	pub height: u32,
	pub framerate: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
	Idle,
	Pending { request: ResizeRequest, deadline: Instant },
	Settling { request: ResizeRequest, deadline: Instant },
}

/// Work the backend has to do now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeStep {
	/// Drop devices and listener, then disconnect.
	Teardown(ResizeRequest),
	/// Connect again with the request and apply the negotiated mode.
	Reconnect(ResizeRequest),
}

#[derive(Debug)]
pub struct ResizeNegotiator {
	phase: Phase,
	debounce: Duration,
	settle: Duration,
}

impl ResizeNegotiator {
	pub fn new(debounce: Duration, settle: Duration) -> Self {
		Self {
			phase: Phase::Idle,
			debounce,
			settle,
		}
	}

	/// Records a request, superseding one that is still pending.
	///
	/// Returns `false` when a resize is already settling; that one runs to completion.
	pub fn request(&mut self, request: ResizeRequest, now: Instant) -> bool {
		match self.phase {
			Phase::Settling { .. } => {
				tracing::debug!(?request, "resize already in progress, ignoring request");
				false
			}
			Phase::Idle | Phase::Pending { .. } => {
				if let Phase::Pending { request: previous, .. } = self.phase {
					tracing::debug!(?previous, ?request, "superseding pending resize");
				}
				self.phase = Phase::Pending {
					request,
					deadline: now + self.debounce,
				};
				true
			}
		}
	}

	pub fn deadline(&self) -> Option<Instant> {
		match self.phase {
			Phase::Idle => None,
			Phase::Pending { deadline, .. } | Phase::Settling { deadline, .. } => Some(deadline),
		}
	}

	pub fn is_idle(&self) -> bool {
		self.phase == Phase::Idle
	}

	/// Advances past an expired deadline.
	pub fn poll(&mut self, now: Instant) -> Option<ResizeStep> {
		match self.phase {
			Phase::Pending { request, deadline } if now >= deadline => {
				self.phase = Phase::Settling {
					request,
					deadline: now + self.settle,
				};
				Some(ResizeStep::Teardown(request))
			}
			Phase::Settling { request, deadline } if now >= deadline => {
				self.phase = Phase::Idle;
				Some(ResizeStep::Reconnect(request))
			}
			_ => None,
		}
	}
}
