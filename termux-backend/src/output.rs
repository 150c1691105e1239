use bitflags::bitflags;
use serde::Serialize;
use termux_render::{FORMAT_ARGB8888, RenderClient};

use crate::{BackendError, OutputId, PresentEvent};

pub const OUTPUT_NAME: &str = "TERMUX-1";
pub const OUTPUT_DESCRIPTION: &str = "Termux display client";

bitflags! {
	/// Fields set in an [`OutputState`].
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
	pub struct OutputStateFields: u32 {
		const BUFFER = 1 << 0;
		const ENABLED = 1 << 1;
		const MODE = 1 << 2;
		const SCALE = 1 << 3;
		const ADAPTIVE_SYNC = 1 << 4;
	}
}

impl OutputStateFields {
	pub const SUPPORTED: Self = Self::BUFFER.union(Self::ENABLED).union(Self::MODE);
}

bitflags! {
	/// Buffer access paths the presenter can read from.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
	pub struct BufferCaps: u32 {
		const DATA_PTR = 1 << 0;
		const SHM = 1 << 1;
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Mode {
	pub width: u32,
	pub height: u32,
	/// Refresh rate in mHz.
	pub refresh: u32,
}

impl Mode {
	pub fn from_hz(width: u32, height: u32, hz: u32) -> Self {
		let hz = if hz > 0 { hz } else { termux_render::DEFAULT_REFRESH };
		Self {
			width,
			height,
			refresh: hz.saturating_mul(1000),
		}
	}
}

/// Pixels readable through a direct pointer.
#[derive(Debug, Clone, Copy)]
pub struct DataPtrAccess<'a> {
	pub data: &'a [u8],
	pub format: u32,
	/// Row pitch in bytes.
	pub stride: usize,
}

/// Pixels living in a shared-memory pool.
#[derive(Debug, Clone, Copy)]
pub struct ShmAttributes<'a> {
	pub data: &'a [u8],
	pub format: u32,
	/// Row pitch in bytes; zero when the pool does not say.
	pub stride: usize,
	pub offset: usize,
}

/// A host buffer the presenter can copy from.
pub trait Buffer {
	fn width(&self) -> u32;
	fn height(&self) -> u32;
	fn data_ptr_access(&self) -> Option<DataPtrAccess<'_>> {
		None
	}
	fn shm(&self) -> Option<ShmAttributes<'_>> {
		None
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
	DataPtr,
	Shm,
}

/// CPU memory buffer in `ARGB8888`.
#[derive(Debug, Clone)]
pub struct MemoryBuffer {
	width: u32,
	height: u32,
	stride: usize,
	data: Vec<u8>,
	access: Access,
}

impl MemoryBuffer {
	pub fn new(width: u32, height: u32) -> Self {
		Self::with_stride(width, height, width as usize * 4)
	}

	/// Allocates rows of `stride` bytes, which must cover `width` pixels.
	pub fn with_stride(width: u32, height: u32, stride: usize) -> Self {
		let stride = stride.max(width as usize * 4);
		Self {
			width,
			height,
			stride,
			data: vec![0; stride * height as usize],
			access: Access::DataPtr,
		}
	}

	/// Exposes the pixels as shared memory instead of a data pointer.
	pub fn into_shm(mut self) -> Self {
		self.access = Access::Shm;
		self
	}

	pub fn stride(&self) -> usize {
		self.stride
	}

	pub fn pixels(&self) -> &[u8] {
		&self.data
	}

	pub fn pixels_mut(&mut self) -> &mut [u8] {
		&mut self.data
	}
}

impl Buffer for MemoryBuffer {
	fn width(&self) -> u32 {
		self.width
	}

	fn height(&self) -> u32 {
		self.height
	}

	fn data_ptr_access(&self) -> Option<DataPtrAccess<'_>> {
		(self.access == Access::DataPtr).then_some(DataPtrAccess {
			data: &self.data,
			format: FORMAT_ARGB8888,
			stride: self.stride,
		})
	}

	fn shm(&self) -> Option<ShmAttributes<'_>> {
		(self.access == Access::Shm).then_some(ShmAttributes {
			data: &self.data,
			format: FORMAT_ARGB8888,
			stride: self.stride,
			offset: 0,
		})
	}
}

/// Pending changes for one output commit.
#[derive(Clone, Copy, Default)]
pub struct OutputState<'a> {
	committed: OutputStateFields,
	buffer: Option<&'a dyn Buffer>,
	enabled: bool,
	mode: Option<Mode>,
	scale: f64,
	adaptive_sync: bool,
}

impl std::fmt::Debug for OutputState<'_> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("OutputState")
			.field("committed", &self.committed)
			.field("buffer", &self.buffer.map(|b| (b.width(), b.height())))
			.field("enabled", &self.enabled)
			.field("mode", &self.mode)
			.field("scale", &self.scale)
			.field("adaptive_sync", &self.adaptive_sync)
			.finish()
	}
}

impl<'a> OutputState<'a> {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set_buffer(&mut self, buffer: &'a dyn Buffer) -> &mut Self {
		self.buffer = Some(buffer);
		self.committed |= OutputStateFields::BUFFER;
		self
	}

	pub fn set_enabled(&mut self, enabled: bool) -> &mut Self {
		self.enabled = enabled;
		self.committed |= OutputStateFields::ENABLED;
		self
	}

	pub fn set_custom_mode(&mut self, width: u32, height: u32, refresh_mhz: u32) -> &mut Self {
		self.mode = Some(Mode {
			width,
			height,
			refresh: refresh_mhz,
		});
		self.committed |= OutputStateFields::MODE;
		self
	}

	pub fn set_scale(&mut self, scale: f64) -> &mut Self {
		self.scale = scale;
		self.committed |= OutputStateFields::SCALE;
		self
	}

	pub fn set_adaptive_sync(&mut self, enabled: bool) -> &mut Self {
		self.adaptive_sync = enabled;
		self.committed |= OutputStateFields::ADAPTIVE_SYNC;
		self
	}

	pub fn committed(&self) -> OutputStateFields {
		self.committed
	}
}

/// What a successful commit asks of the backend.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CommitOutcome {
	pub present: Option<PresentEvent>,
	pub schedule_frame: bool,
	pub mode_changed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Output {
	id: OutputId,
	name: String,
	description: String,
	mode: Mode,
	enabled: bool,
	commit_seq: u32,
}

impl Output {
	pub(crate) fn new(mode: Mode) -> Self {
		Self {
			id: OutputId::rand(),
			name: OUTPUT_NAME.into(),
			description: OUTPUT_DESCRIPTION.into(),
			mode,
			enabled: false,
			commit_seq: 0,
		}
	}

	pub fn id(&self) -> OutputId {
		self.id
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn description(&self) -> &str {
		&self.description
	}

	pub fn mode(&self) -> Mode {
		self.mode
	}

	pub fn width(&self) -> u32 {
		self.mode.width
	}

	pub fn height(&self) -> u32 {
		self.mode.height
	}

	pub fn is_enabled(&self) -> bool {
		self.enabled
	}

	pub fn commit_seq(&self) -> u32 {
		self.commit_seq
	}

	pub(crate) fn set_enabled(&mut self, enabled: bool) {
		self.enabled = enabled;
	}

	/// Checks that every field in `state` can be applied.
	pub fn test(state: &OutputState<'_>) -> Result<(), BackendError> {
		let unsupported = state.committed - OutputStateFields::SUPPORTED;
		if unsupported.is_empty() {
			Ok(())
		} else {
			Err(BackendError::UnsupportedState(unsupported))
		}
	}

	/// Presents the committed buffer and applies the state.
	#[tracing::instrument(level = "trace", skip_all, fields(output = %self.id, seq = self.commit_seq))]
	pub(crate) fn commit<C: RenderClient + ?Sized>(
		&mut self,
		state: &OutputState<'_>,
		client: &mut C,
	) -> Result<CommitOutcome, BackendError> {
		Self::test(state)?;
		let mut outcome = CommitOutcome::default();

		let pending_enabled = if state.committed.contains(OutputStateFields::ENABLED) {
			state.enabled
		} else {
			self.enabled
		};
		if pending_enabled {
			if state.committed.contains(OutputStateFields::BUFFER) {
				if let Some(buffer) = state.buffer {
					present_buffer(buffer, client);
				}
			}
			outcome.present = Some(PresentEvent {
				output: self.id,
				commit_seq: self.commit_seq.wrapping_add(1),
				presented: true,
			});
			outcome.schedule_frame = !self.enabled;
		}

		if state.committed.contains(OutputStateFields::ENABLED) {
			self.enabled = state.enabled;
		}
		if let Some(mode) = state.mode.filter(|_| state.committed.contains(OutputStateFields::MODE)) {
			outcome.mode_changed = mode != self.mode;
			self.mode = mode;
		}
		self.commit_seq = self.commit_seq.wrapping_add(1);
		Ok(outcome)
	}
}

/// Copies `buffer` to the display server. Failures are logged, never returned.
fn present_buffer<C: RenderClient + ?Sized>(buffer: &dyn Buffer, client: &mut C) {
	if !client.is_connected() {
		tracing::trace!("display server not connected, skipping frame");
		return;
	}
	let pushed = if let Some(access) = buffer.data_ptr_access() {
		client.push_frame(access.data, access.stride)
	} else if let Some(shm) = buffer.shm() {
		let stride = if shm.stride > 0 {
			shm.stride
		} else {
			buffer.width() as usize * 4
		};
		let data = shm.data.get(shm.offset..).unwrap_or_default();
		client.push_frame(data, stride)
	} else {
		tracing::debug!("buffer exposes neither a data pointer nor shm, cannot push frame");
		return;
	};
	if let Err(err) = pushed {
		tracing::debug!(
			%err,
			width = buffer.width(),
			height = buffer.height(),
			"could not push frame"
		);
	}
}
