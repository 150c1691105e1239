//! Events raised towards the host compositor and the trait receiving them.

use serde::Serialize;

use crate::{DeviceId, InputDevice, Output, OutputId};

/// Linux `BTN_LEFT`.
pub const BTN_LEFT: u32 = 272;
/// Linux `BTN_RIGHT`.
pub const BTN_RIGHT: u32 = 273;
/// Linux `BTN_MIDDLE`.
pub const BTN_MIDDLE: u32 = 274;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonState {
	Pressed,
	Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyState {
	Pressed,
	Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PointerEvent {
	/// Relative motion. The deltas are not accelerated.
	Motion {
		time_msec: u32,
		delta_x: f64,
		delta_y: f64,
		unaccel_dx: f64,
		unaccel_dy: f64,
	},
	/// Absolute position normalized to `[0, 1]` over the output.
	MotionAbsolute { time_msec: u32, x: f64, y: f64 },
	Button {
		time_msec: u32,
		button: u32,
		state: ButtonState,
	},
	/// Ends a group of pointer events that belong together.
	Frame,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TouchEvent {
	Down {
		time_msec: u32,
		touch_id: i32,
		x: f64,
		y: f64,
	},
	Up { time_msec: u32, touch_id: i32 },
	Motion {
		time_msec: u32,
		touch_id: i32,
		x: f64,
		y: f64,
	},
	Frame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KeyEvent {
	pub time_msec: u32,
	/// Linux evdev keycode.
	pub keycode: u32,
	pub state: KeyState,
	/// Whether the host should feed the key into its own modifier state.
	pub update_state: bool,
}

/// Text typed on the remote side, delivered as one Unicode scalar value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TextEvent {
	pub time_msec: u32,
	pub codepoint: u32,
}

impl TextEvent {
	pub fn as_char(&self) -> Option<char> {
		char::from_u32(self.codepoint)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PresentEvent {
	pub output: OutputId,
	pub commit_seq: u32,
	pub presented: bool,
}

/// Receiver of everything the backend reports. Every method defaults to doing nothing.
pub trait Host {
	/// Called when an output becomes visible to the host.
	fn on_new_output(&mut self, _output: &Output) {}
	/// Called after a committed mode change.
	fn on_output_mode(&mut self, _output: &Output) {}
	fn on_output_destroyed(&mut self, _output: OutputId) {}
	/// Asks the host to render and commit a frame for `output`.
	fn on_schedule_frame(&mut self, _output: OutputId) {}
	/// Called for every commit that reached the display server.
	fn on_present(&mut self, _event: PresentEvent) {}
	fn on_new_input(&mut self, _device: &InputDevice) {}
	fn on_input_removed(&mut self, _device: &InputDevice) {}
	fn on_pointer(&mut self, _device: DeviceId, _event: PointerEvent) {}
	fn on_touch(&mut self, _device: DeviceId, _event: TouchEvent) {}
	fn on_key(&mut self, _device: DeviceId, _event: KeyEvent) {}
	fn on_text(&mut self, _event: TextEvent) {}
}
