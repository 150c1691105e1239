use std::io;
use std::mem::MaybeUninit;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::ptr::NonNull;

use crate::RenderError;

/// A `MAP_SHARED` read/write mapping of a descriptor, unmapped on drop.
#[derive(Debug)]
pub(crate) struct SharedMapping {
	ptr: NonNull<u8>,
	len: usize,
}

impl SharedMapping {
	pub fn map(fd: BorrowedFd<'_>, len: usize) -> Result<Self, RenderError> {
		if len == 0 {
			return Err(RenderError::Handshake("refusing to map an empty region".into()));
		}
		let available = file_size(fd)?;
		if available < len {
			return Err(RenderError::Handshake(format!(
				"shared region holds {available} bytes, {len} needed"
			)));
		}
		let ptr = unsafe {
			libc::mmap(
				std::ptr::null_mut(),
				len,
				libc::PROT_READ | libc::PROT_WRITE,
				libc::MAP_SHARED,
				fd.as_raw_fd(),
				0,
			)
		};
		if ptr == libc::MAP_FAILED {
			return Err(io::Error::last_os_error().into());
		}
		let ptr = NonNull::new(ptr.cast::<u8>())
			.ok_or_else(|| RenderError::Handshake("mmap returned null".into()))?;
		Ok(Self { ptr, len })
	}

	pub fn as_ptr(&self) -> *mut u8 {
		self.ptr.as_ptr()
	}

	pub fn len(&self) -> usize {
		self.len
	}
}

impl Drop for SharedMapping {
	fn drop(&mut self) {
		unsafe {
			libc::munmap(self.ptr.as_ptr().cast(), self.len);
		}
	}
}

fn file_size(fd: BorrowedFd<'_>) -> Result<usize, RenderError> {
	let mut stat = MaybeUninit::<libc::stat>::uninit();
	let rc = unsafe { libc::fstat(fd.as_raw_fd(), stat.as_mut_ptr()) };
	if rc != 0 {
		return Err(io::Error::last_os_error().into());
	}
	let stat = unsafe { stat.assume_init() };
	Ok(usize::try_from(stat.st_size).unwrap_or(0))
}
