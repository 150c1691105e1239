use std::collections::VecDeque;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::time::{Duration, Instant};

use termux_protocol::EventReader;
use termux_render::{DEFAULT_REFRESH, LorieClient, RenderClient};
use tracing::{debug, error, info, warn};

use crate::dispatch::{InputTarget, ReadOutcome, read_and_dispatch};
use crate::output::{CommitOutcome, OUTPUT_NAME};
use crate::resize::{ResizeNegotiator, ResizeStep};
use crate::{
	BackendError, Buffer, BufferCaps, Config, DeviceSet, Host, Mode, Output, OutputId, OutputState,
	PresentEvent, ResizeRequest,
};

/// Backend exposing a termux-display server as one output plus pointer, touch and keyboard.
///
/// Everything runs on the caller's thread. The host either calls [`TermuxBackend::dispatch`]
/// in its loop or polls [`TermuxBackend::event_fd`] itself and drives the individual
/// `dispatch_*` entry points.
pub struct TermuxBackend<C: RenderClient = LorieClient> {
	config: Config,
	client: C,
	outputs: Vec<Output>,
	devices: Option<DeviceSet>,
	/// Present while the event descriptor is being listened to.
	listener: Option<EventReader>,
	resize: ResizeNegotiator,
	presents: VecDeque<PresentEvent>,
	started: bool,
}

impl TermuxBackend<LorieClient> {
	pub fn new(config: Config) -> Self {
		let client = LorieClient::new(config.socket_path());
		Self::with_client(client, config)
	}
}

impl<C: RenderClient> TermuxBackend<C> {
	pub fn with_client(client: C, config: Config) -> Self {
		let resize = ResizeNegotiator::new(config.resize_debounce(), config.settle_delay());
		Self {
			config,
			client,
			outputs: Vec::new(),
			devices: None,
			listener: None,
			resize,
			presents: VecDeque::new(),
			started: false,
		}
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn client(&self) -> &C {
		&self.client
	}

	pub fn client_mut(&mut self) -> &mut C {
		&mut self.client
	}

	pub fn outputs(&self) -> &[Output] {
		&self.outputs
	}

	pub fn output(&self, id: OutputId) -> Option<&Output> {
		self.outputs.iter().find(|output| output.id() == id)
	}

	pub fn devices(&self) -> Option<&DeviceSet> {
		self.devices.as_ref()
	}

	pub fn is_started(&self) -> bool {
		self.started
	}

	/// Whether a resize is waiting out its debounce or settling.
	pub fn resize_in_progress(&self) -> bool {
		!self.resize.is_idle()
	}

	pub fn buffer_caps(&self) -> BufferCaps {
		BufferCaps::DATA_PTR | BufferCaps::SHM
	}

	/// Connects to the display server and creates the output for it.
	///
	/// The output takes the size of the buffer the server hands out, which may differ
	/// from the one requested.
	#[tracing::instrument(skip(self, host))]
	pub fn add_output<H: Host + ?Sized>(
		&mut self,
		host: &mut H,
		width: u32,
		height: u32,
		refresh_hz: u32,
	) -> Result<OutputId, BackendError> {
		self.client
			.connect(width, height, refresh_hz)
			.map_err(BackendError::Connect)?;
		let (width, height) = self.negotiated_size().unwrap_or((width, height));

		let mut output = Output::new(Mode::from_hz(width, height, refresh_hz));
		output.set_enabled(true);
		let id = output.id();
		info!(%id, width, height, "output added");
		self.outputs.push(output);
		if self.started {
			if let Some(output) = self.outputs.last() {
				host.on_new_output(output);
			}
		}
		host.on_schedule_frame(id);
		Ok(id)
	}

	#[tracing::instrument(skip_all)]
	pub fn start<H: Host + ?Sized>(&mut self, host: &mut H) {
		info!(outputs = self.outputs.len(), "starting termux backend");
		for output in &self.outputs {
			host.on_new_output(output);
		}
		self.create_devices(host);
		self.started = true;
	}

	pub fn test(&self, state: &OutputState<'_>) -> Result<(), BackendError> {
		Output::test(state)
	}

	/// Applies `state` to an output, copying its buffer to the display server.
	///
	/// The matching present event is delivered by the next dispatch, not from here.
	pub fn commit<H: Host + ?Sized>(
		&mut self,
		host: &mut H,
		id: OutputId,
		state: &OutputState<'_>,
	) -> Result<(), BackendError> {
		let index = self.output_index(id)?;
		let outcome = self.outputs[index].commit(state, &mut self.client)?;
		self.apply_commit(host, index, outcome);
		Ok(())
	}

	/// Hardware cursors are not supported; the host composites the cursor itself.
	pub fn set_cursor(&mut self, _id: OutputId, _buffer: Option<&dyn Buffer>, _hotspot: (i32, i32)) -> bool {
		true
	}

	pub fn move_cursor(&mut self, _id: OutputId, _x: i32, _y: i32) -> bool {
		true
	}

	/// Removes an output. The display server connection goes with it.
	pub fn destroy_output<H: Host + ?Sized>(
		&mut self,
		host: &mut H,
		id: OutputId,
	) -> Result<(), BackendError> {
		let index = self.output_index(id)?;
		let output = self.outputs.remove(index);
		self.presents.retain(|present| present.output != id);
		self.destroy_devices(host);
		self.client.disconnect();
		info!(id = %output.id(), "output destroyed");
		host.on_output_destroyed(output.id());
		Ok(())
	}

	#[tracing::instrument(skip_all)]
	pub fn destroy<H: Host + ?Sized>(mut self, host: &mut H) {
		self.destroy_devices(host);
		let ids: Vec<_> = self.outputs.iter().map(Output::id).collect();
		for id in ids {
			if let Err(err) = self.destroy_output(host, id) {
				warn!(%err, "destroying output failed");
			}
		}
		self.client.disconnect();
		info!("termux backend destroyed");
	}

	/// Descriptor to poll for readability, while input is being listened to.
	pub fn event_fd(&self) -> Option<BorrowedFd<'_>> {
		self.listener.as_ref()?;
		self.client.event_fd()
	}

	/// How long the host may sleep before calling [`TermuxBackend::dispatch_timers`].
	pub fn next_timeout(&self, now: Instant) -> Option<Duration> {
		if !self.presents.is_empty() {
			return Some(Duration::ZERO);
		}
		self.resize
			.deadline()
			.map(|deadline| deadline.saturating_duration_since(now))
	}

	/// Handles one readiness notification on the event descriptor.
	pub fn dispatch_readable<H: Host + ?Sized>(&mut self, host: &mut H) {
		let Some(reader) = self.listener.as_mut() else {
			return;
		};
		let Some(fd) = self.client.event_fd() else {
			return;
		};
		let target = InputTarget {
			devices: self.devices.as_ref(),
			output_size: self.outputs.first().map(|output| (output.width(), output.height())),
		};
		match read_and_dispatch(reader, fd, &target, host) {
			Ok(ReadOutcome::Resize(request)) => {
				self.request_resize(request, Instant::now());
			}
			Ok(ReadOutcome::Idle | ReadOutcome::Dispatched) => {}
			Err(err) if err.desynchronizes_stream() => {
				error!(%err, "event stream out of sync, dropping connection");
				self.handle_hangup(host);
			}
			Err(err) => warn!(%err, "reading event stream failed"),
		}
	}

	/// Queues a resize. Returns `false` when one is already settling.
	pub fn request_resize(&mut self, request: ResizeRequest, now: Instant) -> bool {
		debug!(?request, "resize requested");
		self.resize.request(request, now)
	}

	/// The display server went away: inputs are removed and pushes become no-ops.
	pub fn handle_hangup<H: Host + ?Sized>(&mut self, host: &mut H) {
		warn!("display server hung up");
		self.client.peer_closed();
		self.destroy_devices(host);
	}

	/// Runs resize steps whose deadline has passed.
	pub fn dispatch_timers<H: Host + ?Sized>(&mut self, host: &mut H, now: Instant) {
		while let Some(step) = self.resize.poll(now) {
			match step {
				ResizeStep::Teardown(request) => self.resize_teardown(host, request),
				ResizeStep::Reconnect(request) => self.resize_reconnect(host, request),
			}
		}
	}

	/// Delivers present events queued by earlier commits.
	pub fn flush_presents<H: Host + ?Sized>(&mut self, host: &mut H) {
		while let Some(present) = self.presents.pop_front() {
			host.on_present(present);
		}
	}

	/// Runs one loop iteration: waits up to `timeout` (or the next internal deadline) for
	/// input, then services timers and pending presents.
	pub fn dispatch<H: Host + ?Sized>(
		&mut self,
		host: &mut H,
		timeout: Option<Duration>,
	) -> Result<(), BackendError> {
		let timeout = match (timeout, self.next_timeout(Instant::now())) {
			(Some(requested), Some(internal)) => Some(requested.min(internal)),
			(requested, internal) => requested.or(internal),
		};
		let timeout_ms = timeout.map_or(-1, |timeout| {
			i32::try_from(timeout.as_micros().div_ceil(1000)).unwrap_or(i32::MAX)
		});

		let mut pollfd = libc::pollfd {
			fd: self.event_fd().map_or(-1, |fd| fd.as_raw_fd()),
			events: libc::POLLIN,
			revents: 0,
		};
		let rc = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
		if rc < 0 {
			let err = std::io::Error::last_os_error();
			if err.kind() == std::io::ErrorKind::Interrupted {
				return Ok(());
			}
			return Err(BackendError::Poll(err));
		}

		if pollfd.revents & libc::POLLIN != 0 {
			self.dispatch_readable(host);
		}
		if pollfd.revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0 {
			self.handle_hangup(host);
		}
		self.dispatch_timers(host, Instant::now());
		self.flush_presents(host);
		Ok(())
	}

	fn output_index(&self, id: OutputId) -> Result<usize, BackendError> {
		self.outputs
			.iter()
			.position(|output| output.id() == id)
			.ok_or(BackendError::UnknownOutput(id))
	}

	fn negotiated_size(&self) -> Option<(u32, u32)> {
		self.client.size().filter(|(w, h)| *w > 0 && *h > 0)
	}

	fn apply_commit<H: Host + ?Sized>(&mut self, host: &mut H, index: usize, outcome: CommitOutcome) {
		if let Some(present) = outcome.present {
			self.presents.push_back(present);
		}
		let output = &self.outputs[index];
		if outcome.mode_changed {
			host.on_output_mode(output);
		}
		if outcome.schedule_frame {
			host.on_schedule_frame(output.id());
		}
	}

	/// Creates the device set and starts listening, when there is an event descriptor.
	fn create_devices<H: Host + ?Sized>(&mut self, host: &mut H) {
		if self.devices.is_some() {
			return;
		}
		if self.client.event_fd().is_none() {
			debug!("no event descriptor, input devices not created");
			return;
		}
		let output_name = self.outputs.first().map_or(OUTPUT_NAME, Output::name);
		let devices = DeviceSet::create(
			host,
			output_name,
			self.config.keymap(),
			self.config.keyboard_repeat(),
		);
		self.devices = Some(devices);
		self.listener = Some(EventReader::new());
		info!("input devices and event listener added");
	}

	fn destroy_devices<H: Host + ?Sized>(&mut self, host: &mut H) {
		if self.listener.take().is_some() {
			debug!("event listener removed");
		}
		if let Some(devices) = self.devices.take() {
			devices.destroy(host);
		}
	}

	fn resize_teardown<H: Host + ?Sized>(&mut self, host: &mut H, request: ResizeRequest) {
		info!(
			width = request.width,
			height = request.height,
			framerate = request.framerate,
			"resize: disconnecting"
		);
		self.destroy_devices(host);
		self.client.disconnect();
	}

	fn resize_reconnect<H: Host + ?Sized>(&mut self, host: &mut H, request: ResizeRequest) {
		let refresh = if request.framerate > 0 {
			request.framerate
		} else {
			DEFAULT_REFRESH
		};
		if let Err(err) = self.client.connect(request.width, request.height, refresh) {
			error!(%err, ?request, "resize: reconnect failed");
			return;
		}
		let (width, height) = self.negotiated_size().unwrap_or((request.width, request.height));

		if !self.outputs.is_empty() {
			let mut state = OutputState::new();
			state.set_custom_mode(width, height, refresh.saturating_mul(1000));
			match self.outputs[0].commit(&state, &mut self.client) {
				Ok(outcome) => self.apply_commit(host, 0, outcome),
				Err(err) => error!(%err, "resize: applying mode failed"),
			}
		}
		self.create_devices(host);
		info!(width, height, refresh, "resize: reconnected");
	}
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use termux_protocol::{LorieEvent, MouseEvent, ScreenSizeEvent};

	use super::*;
	use crate::testing::{FakeClient, HostEvent, RecordingHost};
	use crate::{DeviceKind, MemoryBuffer, PointerEvent};

	fn backend(client: FakeClient) -> TermuxBackend<FakeClient> {
		TermuxBackend::with_client(client, Config::default())
	}

	fn started(width: u32, height: u32) -> (TermuxBackend<FakeClient>, RecordingHost, OutputId) {
		let mut host = RecordingHost::default();
		let mut backend = backend(FakeClient::default());
		let id = backend.add_output(&mut host, width, height, 60).unwrap();
		backend.start(&mut host);
		host.take();
		(backend, host, id)
	}

	fn send(backend: &mut TermuxBackend<FakeClient>, event: LorieEvent) {
		backend.client_mut().peer().write_all(&event.encode()).unwrap();
	}

	fn resize(width: u16, height: u16, name: &[u8]) -> Vec<u8> {
		let mut bytes = LorieEvent::ScreenSize(ScreenSizeEvent {
			width,
			height,
			framerate: 60,
			name_size: name.len(),
		})
		.encode()
		.to_vec();
		bytes.extend_from_slice(name);
		bytes
	}

	#[test]
	fn output_is_announced_on_start() {
		let mut host = RecordingHost::default();
		let mut client = FakeClient::default();
		client.negotiate_size(1024, 600);
		let mut backend = backend(client);

		let id = backend.add_output(&mut host, 1280, 720, 0).unwrap();
		assert_eq!(backend.client().connects(), &[(1280, 720, 0)]);
		assert_eq!(host.take(), vec![HostEvent::ScheduleFrame(id)]);
		let output = backend.output(id).unwrap();
		assert_eq!(output.mode(), Mode::from_hz(1024, 600, 60));
		assert_eq!(output.name(), "TERMUX-1");
		assert!(output.is_enabled());

		backend.start(&mut host);
		assert_eq!(
			host.take(),
			vec![
				HostEvent::NewOutput(id),
				HostEvent::NewInput(DeviceKind::Pointer),
				HostEvent::NewInput(DeviceKind::Touch),
				HostEvent::NewInput(DeviceKind::Keyboard),
			]
		);
		assert!(backend.event_fd().is_some());
		assert_eq!(backend.buffer_caps(), BufferCaps::DATA_PTR | BufferCaps::SHM);
	}

	#[test]
	fn connect_failure_fails_add_output() {
		let mut host = RecordingHost::default();
		let mut client = FakeClient::default();
		client.refuse_connect(true);
		let mut backend = backend(client);
		assert!(matches!(
			backend.add_output(&mut host, 800, 600, 60),
			Err(BackendError::Connect(_))
		));
		assert!(backend.outputs().is_empty());
		assert!(host.take().is_empty());
	}

	#[test]
	fn pointer_input_uses_the_output_size() {
		let (mut backend, mut host, _) = started(800, 600);
		send(
			&mut backend,
			LorieEvent::Mouse(MouseEvent {
				x: 400.0,
				y: 150.0,
				detail: 1,
				down: true,
				relative: false,
			}),
		);
		backend.dispatch_readable(&mut host);
		let events = host.take();
		assert!(matches!(
			events[0],
			HostEvent::Pointer(PointerEvent::MotionAbsolute { x, y, .. }) if x == 0.5 && y == 0.25
		));
		assert!(matches!(
			events[1],
			HostEvent::Pointer(PointerEvent::Button { button: 272, .. })
		));
		assert_eq!(events[2], HostEvent::Pointer(PointerEvent::Frame));
	}

	#[test]
	fn bursts_of_resizes_reconnect_once_with_the_last_size() {
		let (mut backend, mut host, id) = started(800, 600);
		let mut bytes = resize(800, 600, b"DP-1");
		bytes.extend(resize(1024, 768, b"DP-1"));
		backend.client_mut().peer().write_all(&bytes).unwrap();
		backend.dispatch_readable(&mut host);
		backend.dispatch_readable(&mut host);
		assert!(backend.resize_in_progress());
		assert!(backend.next_timeout(Instant::now()).unwrap() <= Duration::from_secs(1));

		let teardown = Instant::now() + Duration::from_millis(1100);
		backend.dispatch_timers(&mut host, teardown);
		assert_eq!(
			host.take(),
			vec![
				HostEvent::InputRemoved(DeviceKind::Pointer),
				HostEvent::InputRemoved(DeviceKind::Touch),
				HostEvent::InputRemoved(DeviceKind::Keyboard),
			]
		);
		assert!(!backend.client().is_connected());
		assert!(backend.event_fd().is_none());

		backend.dispatch_timers(&mut host, teardown + Duration::from_millis(100));
		assert!(host.take().is_empty());

		backend.dispatch_timers(&mut host, teardown + Duration::from_millis(600));
		assert_eq!(backend.client().connects()[1..], [(1024, 768, 60)]);
		assert_eq!(
			host.take(),
			vec![
				HostEvent::OutputMode(id, Mode::from_hz(1024, 768, 60)),
				HostEvent::NewInput(DeviceKind::Pointer),
				HostEvent::NewInput(DeviceKind::Touch),
				HostEvent::NewInput(DeviceKind::Keyboard),
			]
		);
		assert!(backend.event_fd().is_some());
		assert!(!backend.resize_in_progress());
	}

	#[test]
	fn failed_reconnect_keeps_the_old_mode() {
		let (mut backend, mut host, id) = started(800, 600);
		let now = Instant::now();
		backend.request_resize(
			ResizeRequest {
				width: 640,
				height: 480,
				framerate: 30,
			},
			now,
		);
		backend.dispatch_timers(&mut host, now + Duration::from_secs(1));
		backend.client_mut().refuse_connect(true);
		backend.dispatch_timers(&mut host, now + Duration::from_secs(2));
		assert!(!backend.client().is_connected());
		assert_eq!(backend.output(id).unwrap().mode(), Mode::from_hz(800, 600, 60));
		assert!(backend.devices().is_none());
		assert!(!backend.resize_in_progress());
	}

	#[test]
	fn truncated_resize_name_drops_the_connection() {
		let (mut backend, mut host, _) = started(800, 600);
		let bytes = resize(1024, 768, b"HDMI-A-1");
		backend.client_mut().peer().write_all(&bytes[..bytes.len() - 3]).unwrap();
		backend.dispatch_readable(&mut host);
		assert!(!backend.client().is_connected());
		assert!(backend.devices().is_none());
		assert!(!backend.resize_in_progress());
	}

	#[test]
	fn hangup_removes_inputs_and_pushes_become_no_ops() {
		let (mut backend, mut host, id) = started(4, 2);
		backend.client_mut().hang_up();
		backend.dispatch(&mut host, Some(Duration::ZERO)).unwrap();
		assert_eq!(
			host.take(),
			vec![
				HostEvent::InputRemoved(DeviceKind::Pointer),
				HostEvent::InputRemoved(DeviceKind::Touch),
				HostEvent::InputRemoved(DeviceKind::Keyboard),
			]
		);
		assert!(!backend.client().is_connected());

		let buffer = MemoryBuffer::new(4, 2);
		let mut state = OutputState::new();
		state.set_buffer(&buffer);
		backend.commit(&mut host, id, &state).unwrap();
		assert!(backend.client().frames().is_empty());
	}

	#[test]
	fn present_is_deferred_to_the_next_dispatch() {
		let (mut backend, mut host, id) = started(4, 2);
		let buffer = MemoryBuffer::new(4, 2);
		let mut state = OutputState::new();
		state.set_buffer(&buffer);
		backend.commit(&mut host, id, &state).unwrap();
		assert!(host.take().is_empty());
		assert_eq!(backend.client().frames().len(), 1);
		assert_eq!(backend.next_timeout(Instant::now()), Some(Duration::ZERO));

		backend.dispatch(&mut host, None).unwrap();
		assert_eq!(
			host.take(),
			vec![HostEvent::Present(PresentEvent {
				output: id,
				commit_seq: 1,
				presented: true,
			})]
		);
	}

	#[test]
	fn reenabling_schedules_a_frame() {
		let (mut backend, mut host, id) = started(4, 2);
		let mut state = OutputState::new();
		state.set_enabled(false);
		backend.commit(&mut host, id, &state).unwrap();
		assert!(host.take().is_empty());
		state.set_enabled(true);
		backend.commit(&mut host, id, &state).unwrap();
		assert_eq!(host.take(), vec![HostEvent::ScheduleFrame(id)]);
	}

	#[test]
	fn unsupported_state_is_rejected() {
		let (mut backend, mut host, id) = started(4, 2);
		let mut state = OutputState::new();
		state.set_adaptive_sync(true);
		assert!(backend.test(&state).is_err());
		assert!(matches!(
			backend.commit(&mut host, id, &state),
			Err(BackendError::UnsupportedState(_))
		));
		assert!(backend.set_cursor(id, None, (0, 0)));
		assert!(backend.move_cursor(id, 10, 10));
	}

	#[test]
	fn destroy_output_disconnects_and_repeats_safely() {
		let (mut backend, mut host, id) = started(4, 2);
		backend.destroy_output(&mut host, id).unwrap();
		assert!(!backend.client().is_connected());
		assert_eq!(host.take().last(), Some(&HostEvent::OutputDestroyed(id)));
		assert!(matches!(
			backend.destroy_output(&mut host, id),
			Err(BackendError::UnknownOutput(_))
		));
		backend.client_mut().disconnect();
		assert!(!backend.client().is_connected());
	}

	#[test]
	fn destroy_removes_everything() {
		let (backend, mut host, id) = started(4, 2);
		backend.destroy(&mut host);
		let events = host.take();
		assert_eq!(events.len(), 4);
		assert_eq!(events[3], HostEvent::OutputDestroyed(id));
	}
}
