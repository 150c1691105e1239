use termux_render::RenderError;
use thiserror::Error;

use crate::{OutputId, OutputStateFields};

/// Top-level backend errors.
#[derive(Debug, Error)]
pub enum BackendError {
	#[error("failed to connect to the display server: {0}")]
	Connect(#[source] RenderError),
	#[error("poll failed: {0}")]
	Poll(std::io::Error),
	#[error("unknown output: {0}")]
	UnknownOutput(OutputId),
	#[error("unsupported output state: {0:?}")]
	UnsupportedState(OutputStateFields),
	#[error("keymap error: {0}")]
	Keymap(String),
}
