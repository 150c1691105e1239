//! Stand-ins for the display server connection and the host compositor.

use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;

use termux_render::{CopyStrategy, RenderClient, RenderError};

use crate::{
	DeviceId, DeviceKind, Host, InputDevice, KeyEvent, Mode, Output, OutputId, PointerEvent,
	PresentEvent, TextEvent, TouchEvent,
};

#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
	NewOutput(OutputId),
	OutputMode(OutputId, Mode),
	OutputDestroyed(OutputId),
	ScheduleFrame(OutputId),
	Present(PresentEvent),
	NewInput(DeviceKind),
	InputRemoved(DeviceKind),
	Pointer(PointerEvent),
	Touch(TouchEvent),
	Key(KeyEvent),
	Text(TextEvent),
}

#[derive(Debug, Default)]
pub struct RecordingHost {
	events: Vec<HostEvent>,
}

impl RecordingHost {
	pub fn take(&mut self) -> Vec<HostEvent> {
		std::mem::take(&mut self.events)
	}
}

impl Host for RecordingHost {
	fn on_new_output(&mut self, output: &Output) {
		self.events.push(HostEvent::NewOutput(output.id()));
	}

	fn on_output_mode(&mut self, output: &Output) {
		self.events.push(HostEvent::OutputMode(output.id(), output.mode()));
	}

	fn on_output_destroyed(&mut self, output: OutputId) {
		self.events.push(HostEvent::OutputDestroyed(output));
	}

	fn on_schedule_frame(&mut self, output: OutputId) {
		self.events.push(HostEvent::ScheduleFrame(output));
	}

	fn on_present(&mut self, event: PresentEvent) {
		self.events.push(HostEvent::Present(event));
	}

	fn on_new_input(&mut self, device: &InputDevice) {
		self.events.push(HostEvent::NewInput(device.kind));
	}

	fn on_input_removed(&mut self, device: &InputDevice) {
		self.events.push(HostEvent::InputRemoved(device.kind));
	}

	fn on_pointer(&mut self, _device: DeviceId, event: PointerEvent) {
		self.events.push(HostEvent::Pointer(event));
	}

	fn on_touch(&mut self, _device: DeviceId, event: TouchEvent) {
		self.events.push(HostEvent::Touch(event));
	}

	fn on_key(&mut self, _device: DeviceId, event: KeyEvent) {
		self.events.push(HostEvent::Key(event));
	}

	fn on_text(&mut self, event: TextEvent) {
		self.events.push(HostEvent::Text(event));
	}
}

#[derive(Debug)]
struct FakeConnection {
	size: (u32, u32),
	events: UnixStream,
}

/// In-process renderer whose event stream is a socket pair.
#[derive(Debug, Default)]
pub struct FakeClient {
	connection: Option<FakeConnection>,
	negotiated_size: Option<(u32, u32)>,
	refuse_connect: bool,
	fail_pushes: bool,
	connects: Vec<(u32, u32, u32)>,
	frames: Vec<(Vec<u8>, usize)>,
	peers: Vec<UnixStream>,
}

impl FakeClient {
	pub fn connected(width: u32, height: u32) -> Self {
		let mut client = Self::default();
		client.connect(width, height, 60).unwrap();
		client.connects.clear();
		client
	}

	/// Makes every later connection report this buffer size.
	pub fn negotiate_size(&mut self, width: u32, height: u32) {
		self.negotiated_size = Some((width, height));
	}

	pub fn refuse_connect(&mut self, refuse: bool) {
		self.refuse_connect = refuse;
	}

	pub fn fail_pushes(&mut self, fail: bool) {
		self.fail_pushes = fail;
	}

	/// `(width, height, refresh)` of every successful connect.
	pub fn connects(&self) -> &[(u32, u32, u32)] {
		&self.connects
	}

	/// `(pixels, stride)` of every pushed frame.
	pub fn frames(&self) -> &[(Vec<u8>, usize)] {
		&self.frames
	}

	/// Server end of the most recent connection.
	pub fn peer(&mut self) -> &mut UnixStream {
		self.peers.last_mut().expect("no connection was made")
	}

	/// Closes the server end of the most recent connection.
	pub fn hang_up(&mut self) {
		self.peers.pop();
	}
}

impl RenderClient for FakeClient {
	fn connect(&mut self, width: u32, height: u32, refresh: u32) -> Result<(), RenderError> {
		if self.connection.is_some() {
			return Ok(());
		}
		if self.refuse_connect {
			return Err(RenderError::Handshake("refused".into()));
		}
		let (events, peer) = UnixStream::pair()?;
		events.set_nonblocking(true)?;
		self.connection = Some(FakeConnection {
			size: self.negotiated_size.unwrap_or((width, height)),
			events,
		});
		self.peers.push(peer);
		self.connects.push((width, height, refresh));
		Ok(())
	}

	fn disconnect(&mut self) {
		self.connection = None;
	}

	fn push_frame(&mut self, pixels: &[u8], stride: usize) -> Result<CopyStrategy, RenderError> {
		if self.connection.is_none() {
			return Err(RenderError::NotConnected);
		}
		if self.fail_pushes {
			return Err(RenderError::SourceTooSmall {
				len: pixels.len(),
				needed: usize::MAX,
			});
		}
		self.frames.push((pixels.to_vec(), stride));
		Ok(CopyStrategy::Bulk {
			bytes: pixels.len(),
		})
	}

	fn size(&self) -> Option<(u32, u32)> {
		self.connection.as_ref().map(|conn| conn.size)
	}

	fn event_fd(&self) -> Option<BorrowedFd<'_>> {
		self.connection.as_ref().map(|conn| conn.events.as_fd())
	}

	fn is_connected(&self) -> bool {
		self.connection.is_some()
	}

	fn peer_closed(&mut self) {
		self.disconnect();
	}
}
