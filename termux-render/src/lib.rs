//! Client side of the termux-display shared renderer.
//!
//! A connection consists of one stream socket (handshake, then the input event
//! stream), a process-shared state region holding the mutex/condvar pair, and a
//! shared pixel buffer the display server scans out from.

mod buffer;
mod client;
mod copy;
mod handshake;
mod shm;
mod state;

pub use buffer::{BufferDesc, BufferGuard, FORMAT_ARGB8888, SharedBuffer};
pub use client::LorieClient;
pub use copy::{CopyStrategy, copy_frame};
pub use handshake::ScreenConfig;
pub use state::{ServerStateRaw, SharedState, StateGuard};

use std::os::fd::BorrowedFd;

use thiserror::Error;

/// Refresh rate requested when the caller passes 0.
pub const DEFAULT_REFRESH: u32 = 60;

#[derive(Debug, Error)]
pub enum RenderError {
	#[error("not connected to the display server")]
	NotConnected,
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
	#[error("nix error: {0}")]
	Nix(#[from] nix::Error),
	#[error("handshake failed: {0}")]
	Handshake(String),
	#[error("invalid shared buffer {width}x{height} with stride {stride}")]
	InvalidBuffer { width: u32, height: u32, stride: u32 },
	#[error("source stride {stride} is narrower than a {row_bytes} byte row")]
	StrideTooSmall { stride: usize, row_bytes: usize },
	#[error("source frame has {len} bytes, {needed} needed")]
	SourceTooSmall { len: usize, needed: usize },
	#[error("shared buffer has {len} bytes, {needed} needed")]
	DestinationTooSmall { len: usize, needed: usize },
	#[error("failed to lock {what}: {source}")]
	Lock {
		what: &'static str,
		source: std::io::Error,
	},
}

/// Operations the backend needs from a display server connection.
pub trait RenderClient {
	/// Connects and negotiates a buffer. A no-op while already connected.
	fn connect(&mut self, width: u32, height: u32, refresh: u32) -> Result<(), RenderError>;
	/// Drops the connection. A no-op while disconnected.
	fn disconnect(&mut self);
	/// Copies one frame into the shared buffer and asks the server to redraw.
	fn push_frame(&mut self, pixels: &[u8], stride: usize) -> Result<CopyStrategy, RenderError>;
	/// Dimensions of the negotiated shared buffer.
	fn size(&self) -> Option<(u32, u32)>;
	/// Descriptor carrying the input event stream.
	fn event_fd(&self) -> Option<BorrowedFd<'_>>;
	fn is_connected(&self) -> bool;
	/// Records that the server went away on its own.
	fn peer_closed(&mut self);
}
