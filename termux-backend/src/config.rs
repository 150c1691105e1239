use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::Keymap;

const SOCKET_NAME: &str = ".termux-display-0";

/// Key repeat parameters advertised by the keyboard device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyboardRepeat {
	/// Repeats per second.
	pub rate: i32,
	/// Delay before the first repeat, in milliseconds.
	pub delay: i32,
}

impl Default for KeyboardRepeat {
	fn default() -> Self {
		Self { rate: 25, delay: 600 }
	}
}

/// Backend configuration.
#[derive(Debug, Clone)]
pub struct Config {
	socket_path: PathBuf,
	output_size: (u32, u32),
	refresh: u32,
	resize_debounce: Duration,
	settle_delay: Duration,
	keyboard_repeat: KeyboardRepeat,
	keymap: Keymap,
}

impl Default for Config {
	fn default() -> Self {
		Self::from_lookup(|_| None)
	}
}

impl Config {
	/// Creates a configuration from process environment.
	///
	/// Reads `TMPDIR`, `TERMUX_DISPLAY_SOCKET`, `TERMUX_DISPLAY_SIZE` (`WxH`),
	/// `TERMUX_DISPLAY_REFRESH` and `XKB_DEFAULT_LAYOUT`/`_VARIANT`/`_OPTIONS`.
	pub fn from_env() -> Self {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	/// Same as [`Config::from_env`] with an explicit variable source.
	pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
		let var = |key: &str| lookup(key).filter(|value| !value.is_empty());
		let tmpdir = var("TMPDIR").unwrap_or_else(|| "/tmp".into());
		let mut config = Self {
			socket_path: Path::new(&tmpdir).join(SOCKET_NAME),
			output_size: (1280, 720),
			refresh: termux_render::DEFAULT_REFRESH,
			resize_debounce: Duration::from_secs(1),
			settle_delay: Duration::from_millis(500),
			keyboard_repeat: KeyboardRepeat::default(),
			keymap: Keymap::default(),
		};

		if let Some(path) = var("TERMUX_DISPLAY_SOCKET") {
			config.socket_path = path.into();
		}
		if let Some(size) = var("TERMUX_DISPLAY_SIZE") {
			match parse_size(&size) {
				Some(size) => config.output_size = size,
				None => tracing::warn!(value = %size, "ignoring malformed TERMUX_DISPLAY_SIZE"),
			}
		}
		if let Some(refresh) = var("TERMUX_DISPLAY_REFRESH") {
			match refresh.trim().parse::<u32>() {
				Ok(hz) if hz > 0 => config.refresh = hz,
				_ => tracing::warn!(value = %refresh, "ignoring malformed TERMUX_DISPLAY_REFRESH"),
			}
		}
		if let Some(layout) = var("XKB_DEFAULT_LAYOUT") {
			config.keymap.layout = layout;
		}
		if let Some(variant) = var("XKB_DEFAULT_VARIANT") {
			config.keymap.variant = variant;
		}
		config.keymap.options = var("XKB_DEFAULT_OPTIONS");
		config
	}

	pub fn set_socket_path(&mut self, path: impl AsRef<Path>) -> &mut Self {
		self.socket_path = path.as_ref().to_path_buf();
		self
	}

	pub fn set_output_size(&mut self, width: u32, height: u32) -> &mut Self {
		self.output_size = (width, height);
		self
	}

	/// Sets the refresh rate in Hz; 0 selects the default.
	pub fn set_refresh(&mut self, hz: u32) -> &mut Self {
		self.refresh = if hz > 0 { hz } else { termux_render::DEFAULT_REFRESH };
		self
	}

	/// Quiet period a resize notification must survive before it is applied.
	pub fn set_resize_debounce(&mut self, debounce: Duration) -> &mut Self {
		self.resize_debounce = debounce;
		self
	}

	/// Pause between disconnecting and reconnecting during a resize.
	pub fn set_settle_delay(&mut self, delay: Duration) -> &mut Self {
		self.settle_delay = delay;
		self
	}

	pub fn set_keyboard_repeat(&mut self, repeat: KeyboardRepeat) -> &mut Self {
		self.keyboard_repeat = repeat;
		self
	}

	pub fn set_keymap(&mut self, keymap: Keymap) -> &mut Self {
		self.keymap = keymap;
		self
	}

	pub fn socket_path(&self) -> &Path {
		&self.socket_path
	}

	pub fn output_size(&self) -> (u32, u32) {
		self.output_size
	}

	pub fn refresh(&self) -> u32 {
		self.refresh
	}

	pub fn resize_debounce(&self) -> Duration {
		self.resize_debounce
	}

	pub fn settle_delay(&self) -> Duration {
		self.settle_delay
	}

	pub fn keyboard_repeat(&self) -> KeyboardRepeat {
		self.keyboard_repeat
	}

	pub fn keymap(&self) -> &Keymap {
		&self.keymap
	}
}

fn parse_size(value: &str) -> Option<(u32, u32)> {
	let (width, height) = value.trim().split_once(['x', 'X'])?;
	let width = width.parse::<u32>().ok().filter(|w| *w > 0)?;
	let height = height.parse::<u32>().ok().filter(|h| *h > 0)?;
	Some((width, height))
}
