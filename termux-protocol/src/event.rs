use serde::{Deserialize, Serialize};

use crate::{EVENT_FRAME_SIZE, ProtocolError};

/// One complete record as read from the event descriptor.
pub type EventFrame = [u8; EVENT_FRAME_SIZE];

const SIZE_T: usize = std::mem::size_of::<usize>();

mod offset {
	pub const TAG: usize = 0;

	pub const SCREEN_WIDTH: usize = 2;
	pub const SCREEN_HEIGHT: usize = 4;
	pub const SCREEN_FRAMERATE: usize = 6;
	pub const SCREEN_NAME_SIZE: usize = 8;

	pub const TOUCH_TYPE: usize = 2;
	pub const TOUCH_ID: usize = 4;
	pub const TOUCH_X: usize = 6;
	pub const TOUCH_Y: usize = 8;

	pub const MOUSE_X: usize = 4;
	pub const MOUSE_Y: usize = 8;
	pub const MOUSE_DETAIL: usize = 12;
	pub const MOUSE_DOWN: usize = 13;
	pub const MOUSE_RELATIVE: usize = 14;

	pub const KEY_CODE: usize = 2;
	pub const KEY_STATE: usize = 4;

	pub const UNICODE_CODE: usize = 4;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventTag {
	ScreenSize = 4,
	Touch = 6,
	Mouse = 7,
	Key = 8,
	Unicode = 10,
}

impl TryFrom<u8> for EventTag {
	type Error = ProtocolError;

	fn try_from(value: u8) -> Result<Self, Self::Error> {
		match value {
			4 => Ok(Self::ScreenSize),
			6 => Ok(Self::Touch),
			7 => Ok(Self::Mouse),
			8 => Ok(Self::Key),
			10 => Ok(Self::Unicode),
			other => Err(ProtocolError::UnknownTag(other)),
		}
	}
}

/// Display size change requested by the server.
///
/// `name_size` bytes of output name follow the record on the stream and must be
/// consumed before the next record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSizeEvent {
	pub width: u16,
	pub height: u16,
	pub framerate: u16,
	pub name_size: usize,
}

/// Android `MotionEvent` action carried by touch records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TouchAction {
	Down,
	Up,
	Move,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TouchEvent {
	/// Raw action code: 0 down, 1 up, 2 move.
	pub action: u16,
	pub id: u16,
	pub x: u16,
	pub y: u16,
}

impl TouchEvent {
	pub fn action(&self) -> Option<TouchAction> {
		match self.action {
			0 => Some(TouchAction::Down),
			1 => Some(TouchAction::Up),
			2 => Some(TouchAction::Move),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MouseEvent {
	/// Absolute pixel position, or a delta when `relative` is set.
	pub x: f32,
	pub y: f32,
	/// Button: 0 none, 1 left, 2 right, 3 middle.
	pub detail: u8,
	pub down: bool,
	pub relative: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
	/// XKB keycode, i.e. the evdev code plus 8.
	pub key: u16,
	pub down: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnicodeEvent {
	pub code: u32,
}

impl UnicodeEvent {
	pub fn as_char(&self) -> Option<char> {
		char::from_u32(self.code)
	}
}

/// A decoded record from the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LorieEvent {
	ScreenSize(ScreenSizeEvent),
	Touch(TouchEvent),
	Mouse(MouseEvent),
	Key(KeyEvent),
	Unicode(UnicodeEvent),
}

impl LorieEvent {
	pub fn tag(&self) -> EventTag {
		match self {
			Self::ScreenSize(_) => EventTag::ScreenSize,
			Self::Touch(_) => EventTag::Touch,
			Self::Mouse(_) => EventTag::Mouse,
			Self::Key(_) => EventTag::Key,
			Self::Unicode(_) => EventTag::Unicode,
		}
	}

	/// Decodes one complete record.
	///
	/// Trailing bytes past the fields of the selected shape are ignored.
	pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
		if frame.len() != EVENT_FRAME_SIZE {
			return Err(ProtocolError::ShortFrame(frame.len()));
		}
		let fields = Fields(frame);
		let event = match EventTag::try_from(fields.u8(offset::TAG)?)? {
			EventTag::ScreenSize => Self::ScreenSize(ScreenSizeEvent {
				width: fields.u16(offset::SCREEN_WIDTH)?,
				height: fields.u16(offset::SCREEN_HEIGHT)?,
				framerate: fields.u16(offset::SCREEN_FRAMERATE)?,
				name_size: fields.size(offset::SCREEN_NAME_SIZE)?,
			}),
			EventTag::Touch => Self::Touch(TouchEvent {
				action: fields.u16(offset::TOUCH_TYPE)?,
				id: fields.u16(offset::TOUCH_ID)?,
				x: fields.u16(offset::TOUCH_X)?,
				y: fields.u16(offset::TOUCH_Y)?,
			}),
			EventTag::Mouse => Self::Mouse(MouseEvent {
				x: fields.f32(offset::MOUSE_X)?,
				y: fields.f32(offset::MOUSE_Y)?,
				detail: fields.u8(offset::MOUSE_DETAIL)?,
				down: fields.u8(offset::MOUSE_DOWN)? != 0,
				relative: fields.u8(offset::MOUSE_RELATIVE)? != 0,
			}),
			EventTag::Key => Self::Key(KeyEvent {
				key: fields.u16(offset::KEY_CODE)?,
				down: fields.u8(offset::KEY_STATE)? != 0,
			}),
			EventTag::Unicode => Self::Unicode(UnicodeEvent {
				code: fields.u32(offset::UNICODE_CODE)?,
			}),
		};
		Ok(event)
	}

	/// Encodes the record the way the display server writes it.
	pub fn encode(&self) -> EventFrame {
		let mut frame = [0u8; EVENT_FRAME_SIZE];
		frame[offset::TAG] = self.tag() as u8;
		match *self {
			Self::ScreenSize(ev) => {
				put(&mut frame, offset::SCREEN_WIDTH, &ev.width.to_le_bytes());
				put(&mut frame, offset::SCREEN_HEIGHT, &ev.height.to_le_bytes());
				put(&mut frame, offset::SCREEN_FRAMERATE, &ev.framerate.to_le_bytes());
				put(&mut frame, offset::SCREEN_NAME_SIZE, &ev.name_size.to_le_bytes());
			}
			Self::Touch(ev) => {
				put(&mut frame, offset::TOUCH_TYPE, &ev.action.to_le_bytes());
				put(&mut frame, offset::TOUCH_ID, &ev.id.to_le_bytes());
				put(&mut frame, offset::TOUCH_X, &ev.x.to_le_bytes());
				put(&mut frame, offset::TOUCH_Y, &ev.y.to_le_bytes());
			}
			Self::Mouse(ev) => {
				put(&mut frame, offset::MOUSE_X, &ev.x.to_le_bytes());
				put(&mut frame, offset::MOUSE_Y, &ev.y.to_le_bytes());
				frame[offset::MOUSE_DETAIL] = ev.detail;
				frame[offset::MOUSE_DOWN] = ev.down as u8;
				frame[offset::MOUSE_RELATIVE] = ev.relative as u8;
			}
			Self::Key(ev) => {
				put(&mut frame, offset::KEY_CODE, &ev.key.to_le_bytes());
				frame[offset::KEY_STATE] = ev.down as u8;
			}
			Self::Unicode(ev) => {
				put(&mut frame, offset::UNICODE_CODE, &ev.code.to_le_bytes());
			}
		}
		frame
	}
}

fn put(frame: &mut EventFrame, offset: usize, bytes: &[u8]) {
	frame[offset..offset + bytes.len()].copy_from_slice(bytes);
}

/// Bounds-checked little-endian field access over a received frame.
struct Fields<'a>(&'a [u8]);

impl Fields<'_> {
	fn bytes<const N: usize>(&self, offset: usize) -> Result<[u8; N], ProtocolError> {
		offset
			.checked_add(N)
			.and_then(|end| self.0.get(offset..end))
			.and_then(|slice| <[u8; N]>::try_from(slice).ok())
			.ok_or(ProtocolError::OutOfBounds { offset, len: N })
	}

	fn u8(&self, offset: usize) -> Result<u8, ProtocolError> {
		let [byte] = self.bytes::<1>(offset)?;
		Ok(byte)
	}

	fn u16(&self, offset: usize) -> Result<u16, ProtocolError> {
		self.bytes(offset).map(u16::from_le_bytes)
	}

	fn u32(&self, offset: usize) -> Result<u32, ProtocolError> {
		self.bytes(offset).map(u32::from_le_bytes)
	}

	fn f32(&self, offset: usize) -> Result<f32, ProtocolError> {
		self.bytes(offset).map(f32::from_le_bytes)
	}

	fn size(&self, offset: usize) -> Result<usize, ProtocolError> {
		self.bytes::<SIZE_T>(offset).map(usize::from_le_bytes)
	}
}
