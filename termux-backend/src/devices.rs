use serde::Serialize;

use crate::{DeviceId, Host, KeyboardRepeat, Keymap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
	Pointer,
	Touch,
	Keyboard,
}

/// Keyboard specifics: the layout handed to clients and the repeat parameters.
#[derive(Debug, Clone, Serialize)]
pub struct KeyboardInfo {
	pub keymap: Keymap,
	/// XKB text v1 keymap, present when built with `xkb`.
	#[serde(skip)]
	pub keymap_text: Option<String>,
	pub repeat_rate: i32,
	pub repeat_delay: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct InputDevice {
	pub id: DeviceId,
	pub kind: DeviceKind,
	pub name: &'static str,
	/// Output the device is mapped to; the keyboard has none.
	pub output_name: Option<String>,
	pub keyboard: Option<KeyboardInfo>,
}

impl InputDevice {
	fn new(kind: DeviceKind, name: &'static str, output_name: Option<&str>) -> Self {
		Self {
			id: DeviceId::rand(),
			kind,
			name,
			output_name: output_name.map(str::to_owned),
			keyboard: None,
		}
	}
}

/// Pointer, touch and keyboard, created and torn down together.
#[derive(Debug, Default)]
pub struct DeviceSet {
	pointer: Option<InputDevice>,
	touch: Option<InputDevice>,
	keyboard: Option<InputDevice>,
}

impl DeviceSet {
	/// Builds the devices and announces each one to the host.
	///
	/// A keymap that fails to compile leaves the set without a keyboard.
	pub(crate) fn create<H: Host + ?Sized>(
		host: &mut H,
		output_name: &str,
		keymap: &Keymap,
		repeat: KeyboardRepeat,
	) -> Self {
		let pointer = InputDevice::new(DeviceKind::Pointer, "termux-pointer", Some(output_name));
		let touch = InputDevice::new(DeviceKind::Touch, "termux-touch", Some(output_name));
		let keyboard = match keymap.compile() {
			Ok(keymap_text) => {
				let mut keyboard = InputDevice::new(DeviceKind::Keyboard, "termux-keyboard", None);
				keyboard.keyboard = Some(KeyboardInfo {
					keymap: keymap.clone(),
					keymap_text,
					repeat_rate: repeat.rate,
					repeat_delay: repeat.delay,
				});
				Some(keyboard)
			}
			Err(err) => {
				tracing::error!(%err, "keyboard unavailable");
				None
			}
		};

		let set = Self {
			pointer: Some(pointer),
			touch: Some(touch),
			keyboard,
		};
		for device in set.iter() {
			host.on_new_input(device);
		}
		tracing::info!(
			output = output_name,
			keyboard = set.keyboard.is_some(),
			"input devices added"
		);
		set
	}

	pub(crate) fn destroy<H: Host + ?Sized>(self, host: &mut H) {
		for device in self.iter() {
			host.on_input_removed(device);
		}
		tracing::debug!("input devices removed");
	}

	pub fn pointer(&self) -> Option<&InputDevice> {
		self.pointer.as_ref()
	}

	pub fn touch(&self) -> Option<&InputDevice> {
		self.touch.as_ref()
	}

	pub fn keyboard(&self) -> Option<&InputDevice> {
		self.keyboard.as_ref()
	}

	pub fn iter(&self) -> impl Iterator<Item = &InputDevice> {
		[&self.pointer, &self.touch, &self.keyboard]
			.into_iter()
			.flatten()
	}
}
