use std::io::{IoSliceMut, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

use nix::errno::Errno;
use nix::sys::socket::{ControlMessageOwned, MsgFlags, recvmsg};

use crate::{BufferDesc, RenderError};

/// Screen geometry announced to the display server when connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenConfig {
	pub width: u16,
	pub height: u16,
	pub framerate: u16,
}

impl ScreenConfig {
	pub const WIRE_SIZE: usize = 8;

	pub fn new(width: u32, height: u32, framerate: u32) -> Result<Self, RenderError> {
		let narrow = |value: u32, what: &str| {
			u16::try_from(value)
				.map_err(|_| RenderError::Handshake(format!("{what} {value} does not fit the wire format")))
		};
		Ok(Self {
			width: narrow(width, "width")?,
			height: narrow(height, "height")?,
			framerate: narrow(framerate, "framerate")?,
		})
	}

	pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
		let mut out = [0u8; Self::WIRE_SIZE];
		out[0..2].copy_from_slice(&self.width.to_le_bytes());
		out[2..4].copy_from_slice(&self.height.to_le_bytes());
		out[4..6].copy_from_slice(&self.framerate.to_le_bytes());
		out
	}

	pub fn decode(bytes: &[u8; Self::WIRE_SIZE]) -> Self {
		Self {
			width: u16::from_le_bytes([bytes[0], bytes[1]]),
			height: u16::from_le_bytes([bytes[2], bytes[3]]),
			framerate: u16::from_le_bytes([bytes[4], bytes[5]]),
		}
	}
}

/// What the server hands back: buffer geometry plus the two shared regions.
#[derive(Debug)]
pub(crate) struct ServerReply {
	pub desc: BufferDesc,
	pub state_fd: OwnedFd,
	pub buffer_fd: OwnedFd,
}

pub(crate) fn send_config(mut stream: &UnixStream, config: &ScreenConfig) -> Result<(), RenderError> {
	stream.write_all(&config.encode())?;
	Ok(())
}

/// Reads the buffer description and its descriptors from a blocking stream.
pub(crate) fn recv_reply(stream: &UnixStream) -> Result<ServerReply, RenderError> {
	let mut bytes = [0u8; BufferDesc::WIRE_SIZE];
	let (received, fds) = recv_with_fds(stream, &mut bytes)?;
	if received == 0 {
		return Err(RenderError::Handshake("server closed the connection".into()));
	}
	if received < bytes.len() {
		let mut rest = stream;
		rest.read_exact(&mut bytes[received..])?;
	}
	let desc = BufferDesc::decode(&bytes);

	let mut fds = fds.into_iter();
	let (Some(state_fd), Some(buffer_fd), None) = (fds.next(), fds.next(), fds.next()) else {
		return Err(RenderError::Handshake(
			"expected exactly two descriptors (state, buffer)".into(),
		));
	};
	tracing::debug!(
		width = desc.width,
		height = desc.height,
		stride = desc.stride,
		format = desc.format,
		"received shared buffer description"
	);
	Ok(ServerReply {
		desc,
		state_fd,
		buffer_fd,
	})
}

fn recv_with_fds(stream: &UnixStream, buf: &mut [u8]) -> Result<(usize, Vec<OwnedFd>), RenderError> {
	let mut cmsg_space = nix::cmsg_space!([RawFd; 4]);
	let mut iov = [IoSliceMut::new(buf)];
	loop {
		match recvmsg::<()>(
			stream.as_raw_fd(),
			&mut iov,
			Some(&mut cmsg_space),
			MsgFlags::MSG_CMSG_CLOEXEC,
		) {
			Err(Errno::EINTR) => continue,
			Err(err) => return Err(err.into()),
			Ok(msg) => {
				let mut fds = Vec::new();
				for cmsg in msg.cmsgs()? {
					if let ControlMessageOwned::ScmRights(rights) = cmsg {
						fds.extend(rights.into_iter().map(|fd| unsafe { OwnedFd::from_raw_fd(fd) }));
					}
				}
				if msg.flags.contains(MsgFlags::MSG_CTRUNC) {
					return Err(RenderError::Handshake("descriptor list truncated".into()));
				}
				return Ok((msg.bytes, fds));
			}
		}
	}
}
