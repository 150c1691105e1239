//! Keyboard layout names and their compilation.

use serde::Serialize;

use crate::BackendError;

/// XKB rule names (RMLVO). Empty fields fall back to the libxkbcommon defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Keymap {
	pub rules: String,
	pub model: String,
	pub layout: String,
	pub variant: String,
	pub options: Option<String>,
}

impl Keymap {
	pub fn with_layout(layout: impl Into<String>) -> Self {
		Self {
			layout: layout.into(),
			..Self::default()
		}
	}

	/// Compiles the names into a keymap in the XKB text v1 format.
	#[cfg(feature = "xkb")]
	pub fn compile(&self) -> Result<Option<String>, BackendError> {
		use xkbcommon::xkb;

		let context = xkb::Context::new(xkb::CONTEXT_NO_FLAGS);
		let keymap = xkb::Keymap::new_from_names(
			&context,
			&self.rules,
			&self.model,
			&self.layout,
			&self.variant,
			self.options.clone(),
			xkb::KEYMAP_COMPILE_NO_FLAGS,
		)
		.ok_or_else(|| BackendError::Keymap(format!("failed to compile {self}")))?;
		Ok(Some(keymap.get_as_string(xkb::KEYMAP_FORMAT_TEXT_V1)))
	}

	/// Without xkb support the names are carried as is and nothing is compiled.
	#[cfg(not(feature = "xkb"))]
	pub fn compile(&self) -> Result<Option<String>, BackendError> {
		Ok(None)
	}
}

impl std::fmt::Display for Keymap {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(
			f,
			"rules={:?} model={:?} layout={:?} variant={:?} options={:?}",
			self.rules, self.model, self.layout, self.variant, self.options
		)
	}
}
