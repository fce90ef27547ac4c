//! Frame sources: where a port reader gets raw Ethernet frames from.
//!
//! The production source is the monitoring socket a virtual switch exposes
//! for each port (`AF_UNIX`/`SOCK_SEQPACKET`, one frame per message). The
//! channel source feeds frames from inside the process.

use crate::error::{FibError, Result};
use async_trait::async_trait;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::socket::{self, AddressFamily, MsgFlags, SockFlag, SockType, UnixAddr};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tracing::debug;

/// A per-port stream of frames.
#[async_trait]
pub trait FrameSource: Send {
    /// Reads one frame into `buf` and returns its length.
    ///
    /// `Ok(0)` means the stream ended.
    async fn read_frame(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Releases the underlying transport. Further reads fail.
    async fn close(&mut self);
}

/// Creates a frame source for a port name.
#[async_trait]
pub trait FrameSourceFactory: Send + Sync {
    async fn attach(&self, port: &str) -> Result<Box<dyn FrameSource>>;
}

// ============================================================================
// Unix seqpacket monitoring socket
// ============================================================================

/// Client end of a port's `SOCK_SEQPACKET` monitoring socket.
#[derive(Debug)]
pub struct UnixPacketSource {
    path: PathBuf,
    fd: Option<AsyncFd<OwnedFd>>,
}

impl UnixPacketSource {
    /// Connects to the monitoring socket at `path`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn connect(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let fd = seqpacket_connect(path)?;
        Self::from_owned_fd(path, fd)
    }

    /// Wraps an already connected seqpacket socket.
    pub fn from_owned_fd(path: impl Into<PathBuf>, fd: OwnedFd) -> io::Result<Self> {
        set_nonblocking(&fd)?;
        Ok(Self {
            path: path.into(),
            fd: Some(AsyncFd::new(fd)?),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl FrameSource for UnixPacketSource {
    async fn read_frame(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let fd = self
            .fd
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "frame source closed"))?;

        loop {
            let mut guard = fd.readable().await?;
            match guard.try_io(|inner| {
                socket::recv(inner.as_raw_fd(), buf, MsgFlags::empty()).map_err(io::Error::from)
            }) {
                Ok(result) => return result,
                // Spurious readiness, wait again
                Err(_would_block) => continue,
            }
        }
    }

    async fn close(&mut self) {
        if self.fd.take().is_some() {
            debug!(path = %self.path.display(), "Closed monitoring socket");
        }
    }
}

fn seqpacket_connect(path: &Path) -> io::Result<OwnedFd> {
    // Fails with ENAMETOOLONG when the path does not fit in sun_path
    let addr = UnixAddr::new(path)?;
    let fd = socket::socket(
        AddressFamily::Unix,
        SockType::SeqPacket,
        SockFlag::SOCK_CLOEXEC,
        None,
    )?;
    socket::connect(fd.as_raw_fd(), &addr)?;
    Ok(fd)
}

fn set_nonblocking(fd: &OwnedFd) -> io::Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd.as_fd(), FcntlArg::F_GETFL)?);
    fcntl(fd.as_fd(), FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

/// Attaches ports to `<socket_dir>/<port>`.
#[derive(Debug, Clone)]
pub struct UnixSocketAttacher {
    socket_dir: PathBuf,
}

impl UnixSocketAttacher {
    pub fn new(socket_dir: impl Into<PathBuf>) -> Self {
        Self {
            socket_dir: socket_dir.into(),
        }
    }

    pub fn socket_path(&self, port: &str) -> PathBuf {
        self.socket_dir.join(port)
    }
}

#[async_trait]
impl FrameSourceFactory for UnixSocketAttacher {
    async fn attach(&self, port: &str) -> Result<Box<dyn FrameSource>> {
        let path = self.socket_path(port);
        let source = UnixPacketSource::connect(&path).map_err(|e| FibError::attach(port, e))?;
        debug!(port, path = %path.display(), "Attached monitoring socket");
        Ok(Box::new(source))
    }
}

// ============================================================================
// In-process channel feed
// ============================================================================

/// Creates a connected feeder/source pair holding up to `depth` frames.
pub fn channel(depth: usize) -> (FrameFeeder, ChannelSource) {
    let (tx, rx) = mpsc::channel(depth);
    (FrameFeeder { tx }, ChannelSource { rx: Some(rx) })
}

/// Sending half of an in-process frame stream. Dropping it ends the stream.
#[derive(Debug, Clone)]
pub struct FrameFeeder {
    tx: mpsc::Sender<io::Result<Vec<u8>>>,
}

impl FrameFeeder {
    /// Queues a frame; fails once the source has been closed.
    pub async fn send(&self, frame: Vec<u8>) -> Result<()> {
        self.tx
            .send(Ok(frame))
            .await
            .map_err(|_| FibError::Io(io::Error::from(io::ErrorKind::BrokenPipe)))
    }

    /// Makes the source's next read fail with `kind`.
    pub async fn fail(&self, kind: io::ErrorKind) -> Result<()> {
        self.tx
            .send(Err(io::Error::from(kind)))
            .await
            .map_err(|_| FibError::Io(io::Error::from(io::ErrorKind::BrokenPipe)))
    }
}

/// Receiving half of an in-process frame stream.
#[derive(Debug)]
pub struct ChannelSource {
    rx: Option<mpsc::Receiver<io::Result<Vec<u8>>>>,
}

#[async_trait]
impl FrameSource for ChannelSource {
    async fn read_frame(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let rx = self
            .rx
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "frame source closed"))?;

        match rx.recv().await {
            Some(Ok(frame)) => {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                Ok(n)
            }
            Some(Err(e)) => Err(e),
            None => Ok(0),
        }
    }

    async fn close(&mut self) {
        self.rx = None;
    }
}

/// Hands out pre-created channel sources by port name.
#[derive(Debug, Default)]
pub struct ChannelAttacher {
    pending: Mutex<HashMap<String, ChannelSource>>,
}

impl ChannelAttacher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepares a source for `port` and returns the feeder that drives it.
    ///
    /// Replaces any source for `port` not yet attached.
    pub fn feed(&self, port: impl Into<String>, depth: usize) -> FrameFeeder {
        let (feeder, source) = channel(depth);
        self.pending.lock().insert(port.into(), source);
        feeder
    }
}

#[async_trait]
impl FrameSourceFactory for ChannelAttacher {
    async fn attach(&self, port: &str) -> Result<Box<dyn FrameSource>> {
        let source = self.pending.lock().remove(port).ok_or_else(|| {
            FibError::attach(
                port,
                io::Error::new(io::ErrorKind::NotFound, "no frame feed prepared"),
            )
        })?;
        Ok(Box::new(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seqpacket_pair() -> (OwnedFd, OwnedFd) {
        socket::socketpair(
            AddressFamily::Unix,
            SockType::SeqPacket,
            None,
            SockFlag::empty(),
        )
        .unwrap()
    }

    fn send_packet(fd: &OwnedFd, payload: &[u8]) {
        let sent = socket::send(fd.as_raw_fd(), payload, MsgFlags::empty()).unwrap();
        assert_eq!(sent, payload.len());
    }

    #[tokio::test]
    async fn test_unix_source_reads_packets_then_eof() {
        let (ours, theirs) = seqpacket_pair();
        let mut source = UnixPacketSource::from_owned_fd("/test/p1", ours).unwrap();

        send_packet(&theirs, &[1u8; 60]);
        send_packet(&theirs, &[2u8; 20]);
        drop(theirs);

        let mut buf = [0u8; 2048];
        assert_eq!(source.read_frame(&mut buf).await.unwrap(), 60);
        assert_eq!(buf[0], 1);
        // Message boundaries are preserved
        assert_eq!(source.read_frame(&mut buf).await.unwrap(), 20);
        assert_eq!(buf[0], 2);
        assert_eq!(source.read_frame(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unix_source_closed_read_fails() {
        let (ours, _theirs) = seqpacket_pair();
        let mut source = UnixPacketSource::from_owned_fd("/test/p1", ours).unwrap();
        source.close().await;

        let mut buf = [0u8; 64];
        let err = source.read_frame(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn test_attach_missing_socket_fails() {
        let dir = tempfile::tempdir().unwrap();
        let attacher = UnixSocketAttacher::new(dir.path());
        assert_eq!(attacher.socket_path("p9"), dir.path().join("p9"));

        let err = attacher.attach("p9").await.err().unwrap();
        assert!(matches!(err, FibError::Attach { ref port, .. } if port == "p9"));
    }

    #[tokio::test]
    async fn test_attach_connects_to_listening_socket() {
        let dir = tempfile::tempdir().unwrap();
        let attacher = UnixSocketAttacher::new(dir.path());

        let listener = socket::socket(
            AddressFamily::Unix,
            SockType::SeqPacket,
            SockFlag::SOCK_CLOEXEC,
            None,
        )
        .unwrap();
        let addr = UnixAddr::new(&attacher.socket_path("p1")).unwrap();
        socket::bind(listener.as_raw_fd(), &addr).unwrap();
        socket::listen(&listener, socket::Backlog::new(4).unwrap()).unwrap();

        let mut source = attacher.attach("p1").await.unwrap();
        source.close().await;
        let mut buf = [0u8; 64];
        assert!(source.read_frame(&mut buf).await.is_err());
    }

    #[tokio::test]
    async fn test_attach_path_too_long_fails() {
        let attacher = UnixSocketAttacher::new("/tmp");
        let port = "p".repeat(200);

        let err = attacher.attach(&port).await.err().unwrap();
        assert!(matches!(err, FibError::Attach { .. }));
    }

    #[tokio::test]
    async fn test_channel_source() {
        let (feeder, mut source) = channel(4);
        feeder.send(vec![7u8; 30]).await.unwrap();
        feeder.fail(io::ErrorKind::ConnectionReset).await.unwrap();
        drop(feeder);

        let mut buf = [0u8; 16];
        // Truncated to the buffer
        assert_eq!(source.read_frame(&mut buf).await.unwrap(), 16);
        assert_eq!(
            source.read_frame(&mut buf).await.unwrap_err().kind(),
            io::ErrorKind::ConnectionReset
        );
        assert_eq!(source.read_frame(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_channel_attacher_hands_out_once() {
        let attacher = ChannelAttacher::new();
        let _feeder = attacher.feed("p1", 4);

        assert!(attacher.attach("p1").await.is_ok());
        assert!(matches!(
            attacher.attach("p1").await,
            Err(FibError::Attach { .. })
        ));
    }
}
