use std::time::{Duration, Instant};

use termux_backend::{
	Buffer, Config, DeviceId, Host, InputDevice, KeyEvent, MemoryBuffer, Output, OutputId,
	OutputState, PointerEvent, PresentEvent, TermuxBackend, TextEvent, TouchEvent,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

const TARGET: &str = "termux_backend.example.headless";

/// Draws a scrolling gradient and prints every input event as a JSON line.
struct App {
	start: Instant,
	frame_due: Option<OutputId>,
	resized: Option<(u32, u32)>,
	frames: u64,
	last_log: Instant,
}

impl App {
	fn new() -> Self {
		Self {
			start: Instant::now(),
			frame_due: None,
			resized: None,
			frames: 0,
			last_log: Instant::now(),
		}
	}

	fn draw(&self, buffer: &mut MemoryBuffer) {
		let width = buffer.width() as usize;
		let stride = buffer.stride();
		let shift = (self.start.elapsed().as_millis() / 8) as usize;
		for (y, row) in buffer.pixels_mut().chunks_exact_mut(stride).enumerate() {
			for (x, pixel) in row[..width * 4].chunks_exact_mut(4).enumerate() {
				let v = ((x + y + shift) & 0xff) as u8;
				// BGRA in memory is ARGB8888 little endian.
				pixel.copy_from_slice(&[v, 255 - v, v / 2, 0xff]);
			}
		}
	}

	fn print<T: serde::Serialize>(&self, kind: &str, event: &T) {
		match serde_json::to_string(event) {
			Ok(json) => println!("{{\"{kind}\":{json}}}"),
			Err(err) => error!(target: TARGET, %err, "serializing event failed"),
		}
	}
}

impl Host for App {
	fn on_new_output(&mut self, output: &Output) {
		info!(target: TARGET, id = %output.id(), name = output.name(), "new output");
	}

	fn on_output_mode(&mut self, output: &Output) {
		info!(target: TARGET, width = output.width(), height = output.height(), "output mode changed");
		self.resized = Some((output.width(), output.height()));
		self.frame_due = Some(output.id());
	}

	fn on_schedule_frame(&mut self, output: OutputId) {
		self.frame_due = Some(output);
	}

	fn on_present(&mut self, event: PresentEvent) {
		self.frames = self.frames.saturating_add(1);
		if self.last_log.elapsed() >= Duration::from_secs(1) {
			info!(target: TARGET, fps = self.frames, "presented");
			self.frames = 0;
			self.last_log = Instant::now();
		}
		self.frame_due = Some(event.output);
	}

	fn on_new_input(&mut self, device: &InputDevice) {
		self.print("new_input", device);
	}

	fn on_input_removed(&mut self, device: &InputDevice) {
		self.print("input_removed", device);
	}

	fn on_pointer(&mut self, _device: DeviceId, event: PointerEvent) {
		self.print("pointer", &event);
	}

	fn on_touch(&mut self, _device: DeviceId, event: TouchEvent) {
		self.print("touch", &event);
	}

	fn on_key(&mut self, _device: DeviceId, event: KeyEvent) {
		self.print("key", &event);
	}

	fn on_text(&mut self, event: TextEvent) {
		self.print("text", &event);
	}
}

fn main() -> anyhow::Result<()> {
	let _ = fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| EnvFilter::new("info,termux_backend=debug")),
		)
		.with_writer(std::io::stderr)
		.try_init();
	if let Err(err) = run() {
		error!(target: TARGET, error = ?err, "example failed");
		return Err(err);
	}
	Ok(())
}

fn run() -> anyhow::Result<()> {
	let config = Config::from_env();
	let (width, height) = config.output_size();
	let refresh = config.refresh();
	let mut backend = TermuxBackend::new(config);
	let mut app = App::new();

	let id = backend.add_output(&mut app, width, height, refresh)?;
	let mut buffer = match backend.output(id) {
		Some(output) => MemoryBuffer::new(output.width(), output.height()),
		None => MemoryBuffer::new(width, height),
	};
	backend.start(&mut app);

	let interval = Duration::from_secs(1) / refresh.max(1);
	let mut last_commit: Option<Instant> = None;
	loop {
		let wait = match (app.frame_due, last_commit) {
			(Some(_), Some(at)) => interval.saturating_sub(at.elapsed()),
			(Some(_), None) => Duration::ZERO,
			(None, _) => Duration::from_millis(100),
		};
		backend.dispatch(&mut app, Some(wait))?;
		let Some(output) = app.frame_due else {
			continue;
		};
		if last_commit.is_some_and(|at| at.elapsed() < interval) {
			continue;
		}
		app.frame_due = None;
		if let Some((width, height)) = app.resized.take() {
			buffer = MemoryBuffer::new(width, height);
		}
		app.draw(&mut buffer);
		let mut state = OutputState::new();
		state.set_buffer(&buffer);
		backend.commit(&mut app, output, &state)?;
		last_commit = Some(Instant::now());
	}
}
