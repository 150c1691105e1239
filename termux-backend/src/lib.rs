//! Compositor backend driven by a termux-display server.
//!
//! The backend connects through [`termux_render`], exposes the shared buffer as a single
//! output, and turns the server's event stream ([`termux_protocol`]) into pointer, touch,
//! keyboard and text events delivered to a [`Host`].

mod backend;
mod config;
mod devices;
mod dispatch;
mod error;
pub mod host;
mod ids;
mod keymap;
mod output;
mod resize;
#[cfg(test)]
mod testing;

pub use backend::TermuxBackend;
pub use config::{Config, KeyboardRepeat};
pub use devices::{DeviceKind, DeviceSet, InputDevice, KeyboardInfo};
pub use error::BackendError;
pub use host::{
	ButtonState, Host, KeyEvent, KeyState, PointerEvent, PresentEvent, TextEvent, TouchEvent,
};
pub use ids::{DeviceId, DeviceIdParseError, OutputId, OutputIdParseError};
pub use keymap::Keymap;
pub use output::{
	Buffer, BufferCaps, DataPtrAccess, MemoryBuffer, Mode, OUTPUT_DESCRIPTION, OUTPUT_NAME,
	Output, OutputState, OutputStateFields, ShmAttributes,
};
pub use resize::{ResizeNegotiator, ResizeRequest, ResizeStep};
pub use termux_render::{DEFAULT_REFRESH, LorieClient, RenderClient, RenderError};
