//! Wire format of the termux-display event stream.
//!
//! The display server writes fixed 32-byte records on a single descriptor. Byte 0
//! selects the payload shape; every field is read at an explicit offset, never by
//! overlaying a struct on the received bytes.

pub mod event;
pub mod reader;

pub use event::{
	EventFrame, EventTag, KeyEvent, LorieEvent, MouseEvent, ScreenSizeEvent, TouchAction,
	TouchEvent, UnicodeEvent,
};
pub use reader::{EventReader, FrameRead};

use thiserror::Error;

/// Size in bytes of one record on the event stream.
pub const EVENT_FRAME_SIZE: usize = 32;

/// Largest trailing name blob accepted after a screen-size record.
pub const MAX_BLOB_SIZE: usize = 4096;

#[derive(Debug, Error)]
pub enum ProtocolError {
	#[error("unknown event tag {0}")]
	UnknownTag(u8),
	#[error("event frame is {0} bytes, expected {EVENT_FRAME_SIZE}")]
	ShortFrame(usize),
	#[error("field at offset {offset} with length {len} is outside the frame")]
	OutOfBounds { offset: usize, len: usize },
	#[error("trailing blob of {expected} bytes stopped after {consumed} bytes")]
	DrainIncomplete { expected: usize, consumed: usize },
	#[error("reading trailing blob failed after {consumed} of {expected} bytes: {source}")]
	DrainFailed {
		expected: usize,
		consumed: usize,
		#[source]
		source: nix::Error,
	},
	#[error("trailing blob of {0} bytes exceeds the {MAX_BLOB_SIZE} byte limit")]
	BlobTooLarge(usize),
	#[error("nix error: {0}")]
	Nix(#[from] nix::Error),
}

impl ProtocolError {
	/// Whether the stream position can no longer be trusted after this error.
	pub fn desynchronizes_stream(&self) -> bool {
		matches!(
			self,
			Self::DrainIncomplete { .. } | Self::DrainFailed { .. } | Self::BlobTooLarge(_)
		)
	}
}
