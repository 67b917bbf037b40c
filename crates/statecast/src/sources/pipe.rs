//! Duplex stream source
//!
//! Connects to an endpoint the producer is listening on: a named pipe on
//! Windows, a Unix-domain socket elsewhere. On Windows each pipe message is one
//! payload (at most `buffer_size` bytes); on Unix payloads are newline
//! delimited and capped at `max_frame` bytes.
//!
//! Frames are handed on as raw bytes; decoding happens in the parser.

use std::io;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use statecast_core::{ChannelError, ChannelSource, RawPayload};

/// Default upper bound for one newline-delimited frame (1 MiB)
pub const DEFAULT_MAX_FRAME: usize = 1024 * 1024;

#[cfg(unix)]
type Connection = tokio::io::BufReader<tokio::net::UnixStream>;

#[cfg(windows)]
type Connection = tokio::net::windows::named_pipe::NamedPipeClient;

/// Pipe source connecting to `endpoint`
pub struct PipeSource {
    endpoint: String,
    buffer_size: usize,
    max_frame: usize,
    conn: Option<Connection>,
}

impl PipeSource {
    pub fn new(endpoint: String, buffer_size: usize) -> Self {
        Self {
            endpoint,
            buffer_size,
            max_frame: DEFAULT_MAX_FRAME,
            conn: None,
        }
    }

    /// Set the largest accepted frame, terminator included
    pub fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }

    fn open_error(&self, e: io::Error) -> ChannelError {
        match e.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => ChannelError::NoPeer {
                endpoint: self.endpoint.clone(),
            },
            // ERROR_PIPE_BUSY: every server instance is taken
            _ if cfg!(windows) && e.raw_os_error() == Some(231) => ChannelError::NoPeer {
                endpoint: self.endpoint.clone(),
            },
            _ => ChannelError::Io(e),
        }
    }

    #[cfg(unix)]
    async fn connect(&self) -> io::Result<Connection> {
        let stream = tokio::net::UnixStream::connect(&self.endpoint).await?;
        Ok(tokio::io::BufReader::with_capacity(self.buffer_size, stream))
    }

    #[cfg(windows)]
    async fn connect(&self) -> io::Result<Connection> {
        tokio::net::windows::named_pipe::ClientOptions::new().open(&self.endpoint)
    }
}

/// Map a read failure to a transport error
fn read_error(e: io::Error) -> ChannelError {
    match e.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::UnexpectedEof => ChannelError::Disconnected,
        _ => ChannelError::Io(e),
    }
}

fn is_blank(frame: &[u8]) -> bool {
    frame.iter().all(u8::is_ascii_whitespace)
}

/// Read one newline-delimited frame of at most `max_frame` bytes
///
/// An oversized frame is skipped up to its newline and reported as
/// `FrameTooLarge`; the connection stays usable.
#[cfg(unix)]
async fn read_message(
    conn: &mut Connection,
    _buffer_size: usize,
    max_frame: usize,
) -> Result<RawPayload, ChannelError> {
    use tokio::io::AsyncBufReadExt;

    let mut frame = Vec::new();
    let mut oversized = false;
    loop {
        let (used, complete) = {
            let available = conn.fill_buf().await.map_err(read_error)?;
            if available.is_empty() {
                // EOF: deliver an unterminated final frame, then disconnect
                if oversized {
                    return Err(ChannelError::FrameTooLarge { limit: max_frame });
                }
                if is_blank(&frame) {
                    return Err(ChannelError::Disconnected);
                }
                return Ok(frame);
            }
            let (used, complete) = match available.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (available.len(), false),
            };
            if !oversized {
                if frame.len() + used > max_frame {
                    oversized = true;
                    frame = Vec::new();
                } else {
                    frame.extend_from_slice(&available[..used]);
                }
            }
            (used, complete)
        };
        conn.consume(used);

        if complete {
            if oversized {
                return Err(ChannelError::FrameTooLarge { limit: max_frame });
            }
            // blank keep-alive lines carry no state
            if !is_blank(&frame) {
                return Ok(frame);
            }
            frame.clear();
        }
    }
}

#[cfg(windows)]
async fn read_message(
    conn: &mut Connection,
    buffer_size: usize,
    _max_frame: usize,
) -> Result<RawPayload, ChannelError> {
    use tokio::io::AsyncReadExt;

    let mut buf = vec![0u8; buffer_size];
    let n = conn.read(&mut buf).await.map_err(read_error)?;
    if n == 0 {
        return Err(ChannelError::Disconnected);
    }
    buf.truncate(n);
    Ok(buf)
}

#[async_trait]
impl ChannelSource for PipeSource {
    fn name(&self) -> &str {
        "pipe"
    }

    async fn open(&mut self) -> Result<(), ChannelError> {
        let conn = self.connect().await.map_err(|e| self.open_error(e))?;
        self.conn = Some(conn);
        info!(endpoint = %self.endpoint, "pipe connected");
        Ok(())
    }

    async fn read(&mut self) -> Result<RawPayload, ChannelError> {
        let conn = self.conn.as_mut().ok_or(ChannelError::NotOpen)?;
        let result = read_message(conn, self.buffer_size, self.max_frame).await;
        match &result {
            Err(ChannelError::Disconnected) => {
                debug!(endpoint = %self.endpoint, "pipe closed by peer");
                self.conn = None;
            }
            Err(ChannelError::FrameTooLarge { limit }) => {
                warn!(endpoint = %self.endpoint, limit, "oversized frame dropped");
            }
            _ => {}
        }
        result
    }

    async fn close(&mut self) {
        if self.conn.take().is_some() {
            debug!(endpoint = %self.endpoint, "pipe handle closed");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;
    use tokio::net::UnixListener;

    fn socket_path(dir: &TempDir) -> String {
        dir.path().join("state.sock").to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn test_open_without_listener_is_no_peer() {
        let dir = TempDir::new().unwrap();
        let mut source = PipeSource::new(socket_path(&dir), 2048);

        match source.open().await {
            Err(ChannelError::NoPeer { endpoint }) => assert_eq!(endpoint, socket_path(&dir)),
            other => panic!("expected NoPeer, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_before_open() {
        let mut source = PipeSource::new("/tmp/unused.sock".to_string(), 2048);
        assert!(matches!(source.read().await, Err(ChannelError::NotOpen)));
    }

    #[tokio::test]
    async fn test_reads_newline_delimited_messages() {
        let dir = TempDir::new().unwrap();
        let path = socket_path(&dir);
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream
                .write_all(b"{\"id\":1,\"hp\":100}\n\n{\"id\":1,\"hp\":90}\n")
                .await
                .unwrap();
            // dropping the stream disconnects the client
        });

        let mut source = PipeSource::new(path, 2048);
        source.open().await.unwrap();

        assert_eq!(source.read().await.unwrap(), b"{\"id\":1,\"hp\":100}\n");
        assert_eq!(source.read().await.unwrap(), b"{\"id\":1,\"hp\":90}\n");
        server.await.unwrap();
        assert!(matches!(source.read().await, Err(ChannelError::Disconnected)));
        // handle was released; a further read needs a reopen
        assert!(matches!(source.read().await, Err(ChannelError::NotOpen)));
    }

    #[tokio::test]
    async fn test_final_message_without_newline() {
        let dir = TempDir::new().unwrap();
        let path = socket_path(&dir);
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"{\"id\":2}").await.unwrap();
        });

        let mut source = PipeSource::new(path, 16);
        source.open().await.unwrap();
        server.await.unwrap();

        assert_eq!(source.read().await.unwrap(), b"{\"id\":2}");
        assert!(matches!(source.read().await, Err(ChannelError::Disconnected)));
    }

    #[tokio::test]
    async fn test_reopen_after_disconnect() {
        let dir = TempDir::new().unwrap();
        let path = socket_path(&dir);
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            for n in 0..2 {
                let (mut stream, _) = listener.accept().await.unwrap();
                stream
                    .write_all(format!("{{\"id\":{n}}}\n").as_bytes())
                    .await
                    .unwrap();
            }
        });

        let mut source = PipeSource::new(path, 2048);
        for n in 0..2 {
            source.open().await.unwrap();
            assert_eq!(source.read().await.unwrap(), format!("{{\"id\":{n}}}\n").into_bytes());
            assert!(matches!(source.read().await, Err(ChannelError::Disconnected)));
            source.close().await;
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_frame_is_skipped() {
        let dir = TempDir::new().unwrap();
        let path = socket_path(&dir);
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let big = format!("{{\"id\":1,\"pad\":\"{}\"}}\n", "x".repeat(200));
            stream.write_all(big.as_bytes()).await.unwrap();
            stream.write_all(b"{\"id\":2}\n").await.unwrap();
        });

        // tiny read buffer so the oversized frame spans several fills
        let mut source = PipeSource::new(path, 8).with_max_frame(64);
        source.open().await.unwrap();
        server.await.unwrap();

        match source.read().await {
            Err(ChannelError::FrameTooLarge { limit }) => assert_eq!(limit, 64),
            other => panic!("expected FrameTooLarge, got {other:?}"),
        }
        // the connection survives and the next frame is intact
        assert_eq!(source.read().await.unwrap(), b"{\"id\":2}\n");
        assert!(matches!(source.read().await, Err(ChannelError::Disconnected)));
    }

    #[tokio::test]
    async fn test_unterminated_oversized_tail() {
        let dir = TempDir::new().unwrap();
        let path = socket_path(&dir);
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(&[b'7'; 100]).await.unwrap();
        });

        let mut source = PipeSource::new(path, 2048).with_max_frame(32);
        source.open().await.unwrap();
        server.await.unwrap();

        assert!(matches!(
            source.read().await,
            Err(ChannelError::FrameTooLarge { limit: 32 })
        ));
        assert!(matches!(source.read().await, Err(ChannelError::Disconnected)));
    }

    #[tokio::test]
    async fn test_invalid_utf8_passed_through_raw() {
        let dir = TempDir::new().unwrap();
        let path = socket_path(&dir);
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"{\"id\":1,\"name\":\"\xff\xfe\"}\n").await.unwrap();
        });

        let mut source = PipeSource::new(path, 2048);
        source.open().await.unwrap();
        server.await.unwrap();

        assert_eq!(
            source.read().await.unwrap(),
            b"{\"id\":1,\"name\":\"\xff\xfe\"}\n"
        );
    }
}
