use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::error::{Result, TransportError};

/// A connected gateway byte stream: implements Read + Write.
///
/// Either a serial device node (an HGI80 or evofw3 stick, with its line
/// discipline already configured by the owner) or a TCP serial bridge such as
/// ser2net.
pub struct GatewayStream {
    inner: GatewayStreamInner,
}

enum GatewayStreamInner {
    Serial(File),
    Tcp(TcpStream),
}

impl GatewayStream {
    /// Open `target`: a `host:port` pair connects over TCP, anything else is
    /// opened as a device path.
    pub fn open(target: &str) -> Result<Self> {
        if is_tcp_target(target) {
            Self::connect_tcp(target)
        } else {
            Self::open_serial(target)
        }
    }

    /// Open a serial device node for reading and writing.
    pub fn open_serial(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| TransportError::Open {
                target: path.display().to_string(),
                source,
            })?;
        debug!(path = %path.display(), "opened serial gateway");
        Ok(Self {
            inner: GatewayStreamInner::Serial(file),
        })
    }

    /// Connect to a TCP serial bridge.
    pub fn connect_tcp(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).map_err(|source| TransportError::Open {
            target: addr.to_string(),
            source,
        })?;
        stream.set_nodelay(true)?;
        debug!(addr, "connected to tcp gateway bridge");
        Ok(Self {
            inner: GatewayStreamInner::Tcp(stream),
        })
    }

    /// Set read timeout on the underlying stream.
    ///
    /// Device nodes opened as files have no per-read timeout; the call is a
    /// no-op for them.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            GatewayStreamInner::Serial(_) => Ok(()),
            GatewayStreamInner::Tcp(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        let inner = match &self.inner {
            GatewayStreamInner::Serial(file) => GatewayStreamInner::Serial(file.try_clone()?),
            GatewayStreamInner::Tcp(stream) => GatewayStreamInner::Tcp(stream.try_clone()?),
        };
        Ok(Self { inner })
    }

    /// Whether this stream supports read timeouts.
    pub fn supports_timeouts(&self) -> bool {
        matches!(self.inner, GatewayStreamInner::Tcp(_))
    }
}

impl Read for GatewayStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            GatewayStreamInner::Serial(file) => file.read(buf),
            GatewayStreamInner::Tcp(stream) => stream.read(buf),
        }
    }
}

impl Write for GatewayStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            GatewayStreamInner::Serial(file) => file.write(buf),
            GatewayStreamInner::Tcp(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            GatewayStreamInner::Serial(file) => file.flush(),
            GatewayStreamInner::Tcp(stream) => stream.flush(),
        }
    }
}

impl std::fmt::Debug for GatewayStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.inner {
            GatewayStreamInner::Serial(_) => "serial",
            GatewayStreamInner::Tcp(_) => "tcp",
        };
        f.debug_struct("GatewayStream").field("type", &kind).finish()
    }
}

fn is_tcp_target(target: &str) -> bool {
    if target.starts_with('/') || target.starts_with('.') {
        return false;
    }
    match target.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use std::io::BufRead;
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    #[test]
    fn classifies_targets() {
        assert!(is_tcp_target("localhost:5001"));
        assert!(is_tcp_target("192.168.1.20:3333"));
        assert!(!is_tcp_target("/dev/ttyUSB0"));
        assert!(!is_tcp_target("./capture.log"));
        assert!(!is_tcp_target("COM3"));
        assert!(!is_tcp_target("host:notaport"));
    }

    #[test]
    fn open_missing_device_reports_target() {
        let err = GatewayStream::open("/nonexistent/ramses/ttyUSB9").unwrap_err();
        match err {
            TransportError::Open { target, .. } => assert!(target.contains("ttyUSB9")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn tcp_bridge_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = std::io::BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let mut stream = stream;
            stream.write_all(line.as_bytes()).unwrap();
        });

        let mut stream = GatewayStream::open(&addr).unwrap();
        assert!(stream.supports_timeouts());
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        stream.write_all(b"ping\r\n").unwrap();

        let mut buf = [0u8; 6];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping\r\n");
        server.join().unwrap();
    }
}
