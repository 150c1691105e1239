use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::handshake::{self, ScreenConfig};
use crate::{
	BufferDesc, CopyStrategy, DEFAULT_REFRESH, RenderClient, RenderError, SharedBuffer, SharedState,
	copy_frame,
};

#[derive(Debug)]
struct Connection {
	stream: UnixStream,
	server: SharedState,
	buffer: SharedBuffer,
}

#[derive(Debug, Default)]
enum ConnectionState {
	#[default]
	Disconnected,
	Connected(Connection),
}

/// Connection to a termux-display (Lorie) server over its Unix stream socket.
#[derive(Debug)]
pub struct LorieClient {
	socket_path: PathBuf,
	state: ConnectionState,
}

impl LorieClient {
	const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

	pub fn new(socket_path: impl Into<PathBuf>) -> Self {
		Self {
			socket_path: socket_path.into(),
			state: ConnectionState::Disconnected,
		}
	}

	pub fn socket_path(&self) -> &Path {
		&self.socket_path
	}

	pub fn buffer_desc(&self) -> Option<BufferDesc> {
		match &self.state {
			ConnectionState::Connected(conn) => Some(conn.buffer.desc()),
			ConnectionState::Disconnected => None,
		}
	}

	fn open(&self, config: &ScreenConfig) -> Result<Connection, RenderError> {
		let stream = UnixStream::connect(&self.socket_path)?;
		stream.set_read_timeout(Some(Self::HANDSHAKE_TIMEOUT))?;
		handshake::send_config(&stream, config)?;
		let reply = handshake::recv_reply(&stream)?;
		let server = SharedState::map(&reply.state_fd)?;
		let buffer = SharedBuffer::map(reply.buffer_fd, reply.desc)?;
		stream.set_read_timeout(None)?;
		stream.set_nonblocking(true)?;
		Ok(Connection {
			stream,
			server,
			buffer,
		})
	}
}

impl RenderClient for LorieClient {
	#[tracing::instrument(skip(self), fields(socket = %self.socket_path.display()))]
	fn connect(&mut self, width: u32, height: u32, refresh: u32) -> Result<(), RenderError> {
		if self.is_connected() {
			return Ok(());
		}
		let refresh = if refresh > 0 { refresh } else { DEFAULT_REFRESH };
		let config = ScreenConfig::new(width, height, refresh)?;
		let conn = self.open(&config).inspect_err(|err| {
			tracing::error!(%err, "connecting to the display server failed");
		})?;
		let desc = conn.buffer.desc();
		tracing::info!(
			width = desc.width,
			height = desc.height,
			stride = desc.stride,
			"connected to the display server"
		);
		self.state = ConnectionState::Connected(conn);
		Ok(())
	}

	fn disconnect(&mut self) {
		if let ConnectionState::Connected(_) = std::mem::take(&mut self.state) {
			tracing::info!("disconnected from the display server");
		}
	}

	fn push_frame(&mut self, pixels: &[u8], stride: usize) -> Result<CopyStrategy, RenderError> {
		let ConnectionState::Connected(conn) = &mut self.state else {
			return Err(RenderError::NotConnected);
		};
		let desc = conn.buffer.desc();
		let stride = if stride > 0 { stride } else { desc.visible_row_bytes() };
		let server = conn.server.lock()?;
		let mut buffer = conn.buffer.lock()?;
		let strategy = copy_frame(pixels, stride, buffer.pixels_mut(), &desc)?;
		server.request_draw();
		drop(buffer);
		drop(server);
		tracing::trace!(?strategy, "pushed frame");
		Ok(strategy)
	}

	fn size(&self) -> Option<(u32, u32)> {
		self.buffer_desc().map(|desc| (desc.width, desc.height))
	}

	fn event_fd(&self) -> Option<BorrowedFd<'_>> {
		match &self.state {
			ConnectionState::Connected(conn) => Some(conn.stream.as_fd()),
			ConnectionState::Disconnected => None,
		}
	}

	fn is_connected(&self) -> bool {
		matches!(self.state, ConnectionState::Connected(_))
	}

	fn peer_closed(&mut self) {
		if self.is_connected() {
			tracing::warn!("display server closed the connection");
		}
		self.disconnect();
	}
}
