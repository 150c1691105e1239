//! Turns records from the event stream into host input events.

use std::os::fd::BorrowedFd;

use termux_protocol::{self as wire, EventReader, FrameRead, LorieEvent, ProtocolError};

use crate::host::{BTN_LEFT, BTN_MIDDLE, BTN_RIGHT};
use crate::{
	ButtonState, DeviceSet, Host, KeyEvent, KeyState, PointerEvent, ResizeRequest, TextEvent,
	TouchEvent,
};

/// What the dispatcher needs to know about the backend.
pub(crate) struct InputTarget<'a> {
	pub devices: Option<&'a DeviceSet>,
	/// Mode size of the first output.
	pub output_size: Option<(u32, u32)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadOutcome {
	/// Nothing complete was read.
	Idle,
	Dispatched,
	/// A valid resize notification, for the negotiator.
	Resize(ResizeRequest),
}

/// Reads once from `fd` and dispatches the record if one completed.
///
/// A resize record's trailing name is always drained before the record is looked at.
pub(crate) fn read_and_dispatch<H: Host + ?Sized>(
	reader: &mut EventReader,
	fd: BorrowedFd<'_>,
	target: &InputTarget<'_>,
	host: &mut H,
) -> Result<ReadOutcome, ProtocolError> {
	let frame = match reader.read_frame(fd)? {
		FrameRead::Frame(frame) => frame,
		FrameRead::Partial { received, missing } => {
			tracing::debug!(received, missing, "short read on event stream");
			return Ok(ReadOutcome::Idle);
		}
		FrameRead::Closed => {
			tracing::debug!("event stream read returned no data");
			return Ok(ReadOutcome::Idle);
		}
		FrameRead::WouldBlock => return Ok(ReadOutcome::Idle),
	};
	let event = match LorieEvent::decode(&frame) {
		Ok(event) => event,
		Err(err) => {
			tracing::trace!(%err, tag = frame[0], "dropping event frame");
			return Ok(ReadOutcome::Idle);
		}
	};
	if let LorieEvent::ScreenSize(resize) = event {
		reader.drain(fd, resize.name_size)?;
	}
	Ok(dispatch_event(target, host, event, monotonic_msec()))
}

pub(crate) fn dispatch_event<H: Host + ?Sized>(
	target: &InputTarget<'_>,
	host: &mut H,
	event: LorieEvent,
	time_msec: u32,
) -> ReadOutcome {
	tracing::trace!(?event, "dispatching");
	match event {
		LorieEvent::Mouse(mouse) => return dispatch_mouse(target, host, &mouse, time_msec),
		LorieEvent::Touch(touch) => return dispatch_touch(target, host, &touch, time_msec),
		LorieEvent::Key(key) => {
			let Some(keyboard) = target.devices.and_then(DeviceSet::keyboard) else {
				return ReadOutcome::Idle;
			};
			host.on_key(
				keyboard.id,
				KeyEvent {
					time_msec,
					keycode: u32::from(key.key.saturating_sub(8)),
					state: if key.down {
						KeyState::Pressed
					} else {
						KeyState::Released
					},
					update_state: true,
				},
			);
		}
		LorieEvent::Unicode(text) => host.on_text(TextEvent {
			time_msec,
			codepoint: text.code,
		}),
		LorieEvent::ScreenSize(size) => {
			if size.width == 0 || size.height == 0 {
				tracing::debug!(width = size.width, height = size.height, "ignoring empty resize");
				return ReadOutcome::Dispatched;
			}
			return ReadOutcome::Resize(ResizeRequest {
				width: size.width.into(),
				height: size.height.into(),
				framerate: size.framerate.into(),
			});
		}
	}
	ReadOutcome::Dispatched
}

fn dispatch_mouse<H: Host + ?Sized>(
	target: &InputTarget<'_>,
	host: &mut H,
	mouse: &wire::MouseEvent,
	time_msec: u32,
) -> ReadOutcome {
	let Some(pointer) = target.devices.and_then(DeviceSet::pointer) else {
		return ReadOutcome::Idle;
	};
	let device = pointer.id;
	let (mouse_x, mouse_y) = (finite_or_zero(mouse.x), finite_or_zero(mouse.y));
	let event = if mouse.relative {
		PointerEvent::Motion {
			time_msec,
			delta_x: mouse_x,
			delta_y: mouse_y,
			unaccel_dx: mouse_x,
			unaccel_dy: mouse_y,
		}
	} else {
		let (x, y) = normalize(target.output_size, mouse_x, mouse_y).unwrap_or((0.5, 0.5));
		PointerEvent::MotionAbsolute { time_msec, x, y }
	};
	host.on_pointer(device, event);

	if mouse.detail != 0 {
		host.on_pointer(
			device,
			PointerEvent::Button {
				time_msec,
				button: linux_button(mouse.detail),
				state: if mouse.down {
					ButtonState::Pressed
				} else {
					ButtonState::Released
				},
			},
		);
	}
	host.on_pointer(device, PointerEvent::Frame);
	ReadOutcome::Dispatched
}

fn dispatch_touch<H: Host + ?Sized>(
	target: &InputTarget<'_>,
	host: &mut H,
	touch: &wire::TouchEvent,
	time_msec: u32,
) -> ReadOutcome {
	let Some(device) = target.devices.and_then(DeviceSet::touch) else {
		return ReadOutcome::Idle;
	};
	let device = device.id;
	let (x, y) = normalize(target.output_size, touch.x.into(), touch.y.into()).unwrap_or((0.0, 0.0));
	let touch_id = i32::from(touch.id);
	match touch.action() {
		Some(wire::TouchAction::Down) => host.on_touch(
			device,
			TouchEvent::Down {
				time_msec,
				touch_id,
				x,
				y,
			},
		),
		Some(wire::TouchAction::Up) => host.on_touch(device, TouchEvent::Up { time_msec, touch_id }),
		Some(wire::TouchAction::Move) => host.on_touch(
			device,
			TouchEvent::Motion {
				time_msec,
				touch_id,
				x,
				y,
			},
		),
		None => tracing::trace!(action = touch.action, "unknown touch action"),
	}
	host.on_touch(device, TouchEvent::Frame);
	ReadOutcome::Dispatched
}

/// Maps a position in output pixels to `[0, 1]`. `None` without a usable output.
fn normalize(output_size: Option<(u32, u32)>, x: f64, y: f64) -> Option<(f64, f64)> {
	let (width, height) = output_size.filter(|(w, h)| *w > 0 && *h > 0)?;
	Some((
		(x / f64::from(width)).clamp(0.0, 1.0),
		(y / f64::from(height)).clamp(0.0, 1.0),
	))
}

/// NaN and infinities from the stream become 0.
fn finite_or_zero(value: f32) -> f64 {
	if value.is_finite() { value.into() } else { 0.0 }
}

fn linux_button(detail: u8) -> u32 {
	match detail {
		1 => BTN_LEFT,
		2 => BTN_RIGHT,
		3 => BTN_MIDDLE,
		other => other.into(),
	}
}

/// Milliseconds on the monotonic clock, wrapping like input event timestamps do.
pub(crate) fn monotonic_msec() -> u32 {
	let now = unsafe {
		let mut now = std::mem::MaybeUninit::<libc::timespec>::zeroed();
		libc::clock_gettime(libc::CLOCK_MONOTONIC, now.as_mut_ptr());
		now.assume_init()
	};
	let msec = (now.tv_sec as u64)
		.wrapping_mul(1000)
		.wrapping_add(now.tv_nsec as u64 / 1_000_000);
	msec as u32
}

#[cfg(test)]
mod tests {
	use std::io::Write;
	use std::os::fd::AsFd;
	use std::os::unix::net::UnixStream;

	use termux_protocol::ScreenSizeEvent;

	use super::*;
	use crate::testing::{HostEvent, RecordingHost};
	use crate::{KeyboardRepeat, Keymap};

	fn devices(host: &mut RecordingHost) -> DeviceSet {
		let set = DeviceSet::create(host, "TERMUX-1", &Keymap::default(), KeyboardRepeat::default());
		host.take();
		set
	}

	fn mouse(x: f32, y: f32, detail: u8, down: bool, relative: bool) -> LorieEvent {
		LorieEvent::Mouse(wire::MouseEvent {
			x,
			y,
			detail,
			down,
			relative,
		})
	}

	fn touch(action: u16, id: u16, x: u16, y: u16) -> LorieEvent {
		LorieEvent::Touch(wire::TouchEvent { action, id, x, y })
	}

	#[test]
	fn absolute_mouse_is_normalized_and_clamped() {
		let mut host = RecordingHost::default();
		let set = devices(&mut host);
		let target = InputTarget {
			devices: Some(&set),
			output_size: Some((800, 600)),
		};
		dispatch_event(&target, &mut host, mouse(200.0, 150.0, 0, false, false), 7);
		dispatch_event(&target, &mut host, mouse(1600.0, -10.0, 0, false, false), 8);
		assert_eq!(
			host.take(),
			vec![
				HostEvent::Pointer(PointerEvent::MotionAbsolute {
					time_msec: 7,
					x: 0.25,
					y: 0.25,
				}),
				HostEvent::Pointer(PointerEvent::Frame),
				HostEvent::Pointer(PointerEvent::MotionAbsolute {
					time_msec: 8,
					x: 1.0,
					y: 0.0,
				}),
				HostEvent::Pointer(PointerEvent::Frame),
			]
		);
	}

	#[test]
	fn non_finite_mouse_coordinates_become_zero() {
		let mut host = RecordingHost::default();
		let set = devices(&mut host);
		let target = InputTarget {
			devices: Some(&set),
			output_size: Some((800, 600)),
		};
		dispatch_event(&target, &mut host, mouse(f32::NAN, 300.0, 0, false, false), 0);
		dispatch_event(&target, &mut host, mouse(f32::INFINITY, f32::NAN, 0, false, true), 1);
		assert_eq!(
			host.take(),
			vec![
				HostEvent::Pointer(PointerEvent::MotionAbsolute {
					time_msec: 0,
					x: 0.0,
					y: 0.5,
				}),
				HostEvent::Pointer(PointerEvent::Frame),
				HostEvent::Pointer(PointerEvent::Motion {
					time_msec: 1,
					delta_x: 0.0,
					delta_y: 0.0,
					unaccel_dx: 0.0,
					unaccel_dy: 0.0,
				}),
				HostEvent::Pointer(PointerEvent::Frame),
			]
		);
	}

	#[test]
	fn mouse_without_output_is_centred() {
		let mut host = RecordingHost::default();
		let set = devices(&mut host);
		let target = InputTarget {
			devices: Some(&set),
			output_size: None,
		};
		dispatch_event(&target, &mut host, mouse(200.0, 150.0, 0, false, false), 0);
		assert_eq!(
			host.take()[0],
			HostEvent::Pointer(PointerEvent::MotionAbsolute {
				time_msec: 0,
				x: 0.5,
				y: 0.5,
			})
		);
	}

	#[test]
	fn relative_mouse_carries_raw_deltas_and_buttons() {
		let mut host = RecordingHost::default();
		let set = devices(&mut host);
		let target = InputTarget {
			devices: Some(&set),
			output_size: Some((800, 600)),
		};
		dispatch_event(&target, &mut host, mouse(-3.5, 12.0, 2, true, true), 1);
		assert_eq!(
			host.take(),
			vec![
				HostEvent::Pointer(PointerEvent::Motion {
					time_msec: 1,
					delta_x: -3.5,
					delta_y: 12.0,
					unaccel_dx: -3.5,
					unaccel_dy: 12.0,
				}),
				HostEvent::Pointer(PointerEvent::Button {
					time_msec: 1,
					button: BTN_RIGHT,
					state: ButtonState::Pressed,
				}),
				HostEvent::Pointer(PointerEvent::Frame),
			]
		);
		assert_eq!(linux_button(3), BTN_MIDDLE);
		assert_eq!(linux_button(9), 9);
	}

	#[test]
	fn touch_down_is_followed_by_a_frame() {
		let mut host = RecordingHost::default();
		let set = devices(&mut host);
		let target = InputTarget {
			devices: Some(&set),
			output_size: Some((1000, 500)),
		};
		dispatch_event(&target, &mut host, touch(0, 4, 250, 250), 3);
		dispatch_event(&target, &mut host, touch(1, 4, 250, 250), 4);
		dispatch_event(&target, &mut host, touch(7, 4, 250, 250), 5);
		assert_eq!(
			host.take(),
			vec![
				HostEvent::Touch(TouchEvent::Down {
					time_msec: 3,
					touch_id: 4,
					x: 0.25,
					y: 0.5,
				}),
				HostEvent::Touch(TouchEvent::Frame),
				HostEvent::Touch(TouchEvent::Up {
					time_msec: 4,
					touch_id: 4,
				}),
				HostEvent::Touch(TouchEvent::Frame),
				HostEvent::Touch(TouchEvent::Frame),
			]
		);
	}

	#[test]
	fn key_is_shifted_to_evdev() {
		let mut host = RecordingHost::default();
		let set = devices(&mut host);
		let target = InputTarget {
			devices: Some(&set),
			output_size: None,
		};
		let key = LorieEvent::Key(wire::KeyEvent { key: 38, down: true });
		dispatch_event(&target, &mut host, key, 9);
		assert_eq!(
			host.take(),
			vec![HostEvent::Key(KeyEvent {
				time_msec: 9,
				keycode: 30,
				state: KeyState::Pressed,
				update_state: true,
			})]
		);
	}

	#[test]
	fn input_without_devices_is_dropped_but_text_is_not() {
		let mut host = RecordingHost::default();
		let target = InputTarget {
			devices: None,
			output_size: Some((800, 600)),
		};
		assert_eq!(
			dispatch_event(&target, &mut host, mouse(1.0, 1.0, 1, true, false), 0),
			ReadOutcome::Idle
		);
		assert_eq!(
			dispatch_event(&target, &mut host, touch(0, 1, 1, 1), 0),
			ReadOutcome::Idle
		);
		dispatch_event(
			&target,
			&mut host,
			LorieEvent::Unicode(wire::UnicodeEvent { code: 'ß' as u32 }),
			2,
		);
		assert_eq!(
			host.take(),
			vec![HostEvent::Text(TextEvent {
				time_msec: 2,
				codepoint: 'ß' as u32,
			})]
		);
	}

	#[test]
	fn resize_blob_is_drained_even_when_dimensions_are_invalid() {
		let (reader, mut writer) = UnixStream::pair().unwrap();
		reader.set_nonblocking(true).unwrap();
		let mut host = RecordingHost::default();
		let set = devices(&mut host);
		let target = InputTarget {
			devices: Some(&set),
			output_size: Some((800, 600)),
		};
		for (width, height) in [(0u16, 600u16), (1024, 768)] {
			let resize = LorieEvent::ScreenSize(ScreenSizeEvent {
				width,
				height,
				framerate: 60,
				name_size: 5,
			});
			writer.write_all(&resize.encode()).unwrap();
			writer.write_all(b"HDMI1").unwrap();
		}
		writer
			.write_all(&LorieEvent::Key(wire::KeyEvent { key: 9, down: false }).encode())
			.unwrap();

		let mut events = EventReader::new();
		let mut read = || read_and_dispatch(&mut events, reader.as_fd(), &target, &mut host).unwrap();
		assert_eq!(read(), ReadOutcome::Dispatched);
		assert_eq!(
			read(),
			ReadOutcome::Resize(ResizeRequest {
				width: 1024,
				height: 768,
				framerate: 60,
			})
		);
		assert_eq!(read(), ReadOutcome::Dispatched);
		assert_eq!(read(), ReadOutcome::Idle);
		assert!(matches!(
			host.take().as_slice(),
			[HostEvent::Key(KeyEvent { keycode: 1, state: KeyState::Released, .. })]
		));
	}

	#[test]
	fn unknown_frames_are_dropped() {
		let (reader, mut writer) = UnixStream::pair().unwrap();
		reader.set_nonblocking(true).unwrap();
		let mut frame = [0u8; termux_protocol::EVENT_FRAME_SIZE];
		frame[0] = 99;
		writer.write_all(&frame).unwrap();
		let mut host = RecordingHost::default();
		let target = InputTarget {
			devices: None,
			output_size: None,
		};
		let mut events = EventReader::new();
		assert_eq!(
			read_and_dispatch(&mut events, reader.as_fd(), &target, &mut host).unwrap(),
			ReadOutcome::Idle
		);
		assert!(host.take().is_empty());
	}
}
