use std::os::fd::{AsRawFd, BorrowedFd};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::unistd::read;

use crate::{EVENT_FRAME_SIZE, EventFrame, MAX_BLOB_SIZE, ProtocolError};

/// How long a drain waits for the rest of a trailing blob on each stall.
const DRAIN_WAIT_MS: u16 = 100;

/// Result of one read attempt on the event descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRead {
	/// A complete record is available.
	Frame(EventFrame),
	/// Some bytes arrived but the record is not complete yet.
	Partial { received: usize, missing: usize },
	/// The read returned zero bytes.
	Closed,
	WouldBlock,
}

/// Reads fixed-size records from a nonblocking stream descriptor.
///
/// A record split across reads is kept and completed by the following reads, so the
/// stream never loses alignment.
#[derive(Debug)]
pub struct EventReader {
	buffer: EventFrame,
	filled: usize,
}

impl Default for EventReader {
	fn default() -> Self {
		Self::new()
	}
}

impl EventReader {
	pub fn new() -> Self {
		Self {
			buffer: [0u8; EVENT_FRAME_SIZE],
			filled: 0,
		}
	}

	/// Bytes of an incomplete record currently held.
	pub fn pending(&self) -> usize {
		self.filled
	}

	/// Forgets any partially received record, used when the stream is replaced.
	pub fn reset(&mut self) {
		self.filled = 0;
	}

	/// Performs one read for the bytes still missing from the current record.
	pub fn read_frame(&mut self, fd: BorrowedFd<'_>) -> Result<FrameRead, ProtocolError> {
		loop {
			match read(fd.as_raw_fd(), &mut self.buffer[self.filled..]) {
				Err(Errno::EINTR) => continue,
				Err(err) if err == Errno::EAGAIN || err == Errno::EWOULDBLOCK => {
					return Ok(FrameRead::WouldBlock);
				}
				Err(err) => return Err(err.into()),
				Ok(0) => return Ok(FrameRead::Closed),
				Ok(received) => {
					self.filled += received;
					if self.filled < EVENT_FRAME_SIZE {
						return Ok(FrameRead::Partial {
							received,
							missing: EVENT_FRAME_SIZE - self.filled,
						});
					}
					self.filled = 0;
					return Ok(FrameRead::Frame(self.buffer));
				}
			}
		}
	}

	/// Consumes exactly `len` bytes that trail the last record.
	///
	/// Waits a bounded time when the bytes have not arrived yet. Failing to consume
	/// them all leaves the stream misaligned, which the error reports.
	pub fn drain(&mut self, fd: BorrowedFd<'_>, len: usize) -> Result<(), ProtocolError> {
		if len > MAX_BLOB_SIZE {
			return Err(ProtocolError::BlobTooLarge(len));
		}
		let mut scratch = [0u8; 256];
		let mut consumed = 0;
		let failed = |source, consumed| ProtocolError::DrainFailed {
			expected: len,
			consumed,
			source,
		};
		while consumed < len {
			let want = (len - consumed).min(scratch.len());
			match read(fd.as_raw_fd(), &mut scratch[..want]) {
				Err(Errno::EINTR) => continue,
				Err(err) if err == Errno::EAGAIN || err == Errno::EWOULDBLOCK => {
					let readable =
						wait_readable(fd, DRAIN_WAIT_MS).map_err(|source| failed(source, consumed))?;
					if !readable {
						return Err(ProtocolError::DrainIncomplete {
							expected: len,
							consumed,
						});
					}
				}
				Err(err) => return Err(failed(err, consumed)),
				Ok(0) => {
					return Err(ProtocolError::DrainIncomplete {
						expected: len,
						consumed,
					});
				}
				Ok(n) => consumed += n,
			}
		}
		tracing::trace!(bytes = len, "drained trailing blob");
		Ok(())
	}
}

fn wait_readable(fd: BorrowedFd<'_>, timeout_ms: u16) -> Result<bool, Errno> {
	let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
	loop {
		match poll(&mut fds, PollTimeout::from(timeout_ms)) {
			Ok(0) => return Ok(false),
			Ok(_) => {
				return Ok(fds[0]
					.revents()
					.is_some_and(|revents| revents.contains(PollFlags::POLLIN)));
			}
			Err(Errno::EINTR) => continue,
			Err(err) => return Err(err),
		}
	}
}
