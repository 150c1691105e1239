use std::io;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};

use crate::RenderError;
use crate::shm::SharedMapping;

/// `AR24` fourcc, 32 bits per pixel with byte order B, G, R, A.
pub const FORMAT_ARGB8888: u32 = u32::from_le_bytes(*b"AR24");

/// Geometry of the shared pixel buffer as sent by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
	pub width: u32,
	pub height: u32,
	/// Row pitch in pixels. Zero means rows are tightly packed.
	pub stride: u32,
	pub format: u32,
}

impl BufferDesc {
	pub const WIRE_SIZE: usize = 16;
	pub const BYTES_PER_PIXEL: usize = 4;

	pub fn stride_pixels(&self) -> u32 {
		if self.stride == 0 { self.width } else { self.stride }
	}

	/// Bytes between the start of two consecutive rows.
	pub fn row_bytes(&self) -> usize {
		self.stride_pixels() as usize * Self::BYTES_PER_PIXEL
	}

	/// Bytes actually covered by pixels in one row.
	pub fn visible_row_bytes(&self) -> usize {
		self.width as usize * Self::BYTES_PER_PIXEL
	}

	pub fn byte_len(&self) -> usize {
		self.row_bytes() * self.height as usize
	}

	pub fn validate(&self) -> Result<(), RenderError> {
		if self.width == 0 || self.height == 0 || self.stride_pixels() < self.width {
			return Err(RenderError::InvalidBuffer {
				width: self.width,
				height: self.height,
				stride: self.stride,
			});
		}
		Ok(())
	}

	pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
		let mut out = [0u8; Self::WIRE_SIZE];
		out[0..4].copy_from_slice(&self.width.to_le_bytes());
		out[4..8].copy_from_slice(&self.height.to_le_bytes());
		out[8..12].copy_from_slice(&self.stride.to_le_bytes());
		out[12..16].copy_from_slice(&self.format.to_le_bytes());
		out
	}

	pub fn decode(bytes: &[u8; Self::WIRE_SIZE]) -> Self {
		let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
		Self {
			width: word(0),
			height: word(4),
			stride: word(8),
			format: word(12),
		}
	}
}

/// The server's scanout buffer mapped into this process.
#[derive(Debug)]
pub struct SharedBuffer {
	fd: OwnedFd,
	map: SharedMapping,
	desc: BufferDesc,
}

impl SharedBuffer {
	pub fn map(fd: OwnedFd, desc: BufferDesc) -> Result<Self, RenderError> {
		desc.validate()?;
		let map = SharedMapping::map(fd.as_fd(), desc.byte_len())?;
		Ok(Self { fd, map, desc })
	}

	pub fn desc(&self) -> BufferDesc {
		self.desc
	}

	/// Takes an exclusive advisory lock so the server does not scan out a torn frame.
	pub fn lock(&mut self) -> Result<BufferGuard<'_>, RenderError> {
		loop {
			let rc = unsafe { libc::flock(self.fd.as_raw_fd(), libc::LOCK_EX) };
			if rc == 0 {
				break;
			}
			let err = io::Error::last_os_error();
			if err.kind() != io::ErrorKind::Interrupted {
				return Err(RenderError::Lock {
					what: "shared buffer",
					source: err,
				});
			}
		}
		Ok(BufferGuard { buffer: self })
	}
}

/// Exclusive access to the buffer pixels; unlocks on drop.
pub struct BufferGuard<'a> {
	buffer: &'a mut SharedBuffer,
}

impl BufferGuard<'_> {
	pub fn desc(&self) -> BufferDesc {
		self.buffer.desc
	}

	pub fn pixels_mut(&mut self) -> &mut [u8] {
		let map = &self.buffer.map;
		unsafe { std::slice::from_raw_parts_mut(map.as_ptr(), map.len()) }
	}
}

impl Drop for BufferGuard<'_> {
	fn drop(&mut self) {
		unsafe {
			libc::flock(self.buffer.fd.as_raw_fd(), libc::LOCK_UN);
		}
	}
}
