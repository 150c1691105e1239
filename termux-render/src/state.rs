use std::io;
use std::os::fd::AsFd;
use std::ptr::{addr_of, addr_of_mut};
use std::sync::atomic::{AtomicI32, Ordering};

use crate::RenderError;
use crate::shm::SharedMapping;

/// Layout of the state region shared with the display server.
///
/// The mutex and condvar are initialized process-shared by the server.
/// `draw_requested` and `wait_for_next_frame` are only written with `lock` held.
#[repr(C)]
pub struct ServerStateRaw {
	lock: libc::pthread_mutex_t,
	cond: libc::pthread_cond_t,
	locking_pid: AtomicI32,
	wait_for_next_frame: AtomicI32,
	draw_requested: AtomicI32,
}

/// Mapped server state region.
#[derive(Debug)]
pub struct SharedState {
	map: SharedMapping,
}

impl SharedState {
	pub const SIZE: usize = std::mem::size_of::<ServerStateRaw>();

	pub fn map(fd: impl AsFd) -> Result<Self, RenderError> {
		let map = SharedMapping::map(fd.as_fd(), Self::SIZE)?;
		Ok(Self { map })
	}

	fn raw(&self) -> *mut ServerStateRaw {
		self.map.as_ptr().cast()
	}

	fn locking_pid(&self) -> &AtomicI32 {
		unsafe { &*addr_of!((*self.raw()).locking_pid) }
	}

	fn wait_for_next_frame(&self) -> &AtomicI32 {
		unsafe { &*addr_of!((*self.raw()).wait_for_next_frame) }
	}

	fn draw_requested(&self) -> &AtomicI32 {
		unsafe { &*addr_of!((*self.raw()).draw_requested) }
	}

	/// Takes the cross-process lock, recording this process as the holder.
	pub fn lock(&self) -> Result<StateGuard<'_>, RenderError> {
		let raw = self.raw();
		let rc = unsafe { libc::pthread_mutex_lock(addr_of_mut!((*raw).lock)) };
		if rc != 0 {
			return Err(RenderError::Lock {
				what: "server state",
				source: io::Error::from_raw_os_error(rc),
			});
		}
		self.locking_pid()
			.store(std::process::id() as i32, Ordering::Release);
		Ok(StateGuard { state: self })
	}
}

/// Held server state lock; released on drop.
pub struct StateGuard<'a> {
	state: &'a SharedState,
}

impl StateGuard<'_> {
	/// Flags a new frame and wakes the server's render thread.
	pub fn request_draw(&self) {
		self.state.wait_for_next_frame().store(0, Ordering::Release);
		self.state.draw_requested().store(1, Ordering::Release);
		unsafe {
			libc::pthread_cond_signal(addr_of_mut!((*self.state.raw()).cond));
		}
	}

	pub fn draw_requested(&self) -> bool {
		self.state.draw_requested().load(Ordering::Acquire) != 0
	}

	pub fn waiting_for_next_frame(&self) -> bool {
		self.state.wait_for_next_frame().load(Ordering::Acquire) != 0
	}
}

impl Drop for StateGuard<'_> {
	fn drop(&mut self) {
		self.state.locking_pid().store(0, Ordering::Release);
		unsafe {
			libc::pthread_mutex_unlock(addr_of_mut!((*self.state.raw()).lock));
		}
	}
}

/// Server-side setup of a state region, for tests that play the display server.
#[cfg(test)]
pub(crate) fn create_server_state() -> std::os::fd::OwnedFd {
	use std::fs::File;

	let fd = crate::shm::tests::memfd(SharedState::SIZE);
	let file = File::from(fd);
	let state = SharedState::map(&file).unwrap();
	let raw = state.raw();
	unsafe {
		let mut mutex_attr = std::mem::zeroed::<libc::pthread_mutexattr_t>();
		libc::pthread_mutexattr_init(&mut mutex_attr);
		libc::pthread_mutexattr_setpshared(&mut mutex_attr, libc::PTHREAD_PROCESS_SHARED);
		libc::pthread_mutex_init(addr_of_mut!((*raw).lock), &mutex_attr);
		libc::pthread_mutexattr_destroy(&mut mutex_attr);

		let mut cond_attr = std::mem::zeroed::<libc::pthread_condattr_t>();
		libc::pthread_condattr_init(&mut cond_attr);
		libc::pthread_condattr_setpshared(&mut cond_attr, libc::PTHREAD_PROCESS_SHARED);
		libc::pthread_cond_init(addr_of_mut!((*raw).cond), &cond_attr);
		libc::pthread_condattr_destroy(&mut cond_attr);
	}
	state.wait_for_next_frame().store(1, Ordering::Release);
	file.into()
}
