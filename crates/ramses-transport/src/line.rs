use std::io::{ErrorKind, Read, Write};

use bytes::{Buf, BytesMut};
use tracing::warn;

use crate::error::{Result, TransportError};

/// Longest line accepted before the reader discards up to the next delimiter.
///
/// The longest RAMSES-II frame carries a 48-byte payload; with metadata and a
/// trailing comment a sane line is well under this.
pub const DEFAULT_MAX_LINE: usize = 512;

const INITIAL_BUFFER_CAPACITY: usize = 1024;
const READ_CHUNK_SIZE: usize = 512;

/// Something that yields one frame line at a time.
pub trait LineSource {
    /// Read the next line, without its terminator.
    fn read_line(&mut self) -> Result<String>;
}

/// Something that accepts one frame line at a time.
pub trait LineSink {
    /// Write a single line; the terminator is appended by the sink.
    fn write_line(&mut self, line: &str) -> Result<()>;
}

/// Reads `\n`-terminated lines from any `Read` stream.
///
/// Handles partial reads internally. Bytes read but not yet returned stay in
/// the internal buffer across timeouts and are handed back by
/// [`LineReader::into_parts`].
pub struct LineReader<T> {
    inner: T,
    buf: BytesMut,
    max_line: usize,
    discarding: bool,
}

impl<T: Read> LineReader<T> {
    /// Create a new line reader with the default maximum line length.
    pub fn new(inner: T) -> Self {
        Self::with_max_line(inner, DEFAULT_MAX_LINE)
    }

    /// Create a new line reader with an explicit maximum line length.
    pub fn with_max_line(inner: T, max_line: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_line,
            discarding: false,
        }
    }

    /// Read the next complete line (blocking).
    ///
    /// Returns `TransportError::Timeout` when the underlying stream has a read
    /// timeout and it elapses; the partial line is kept. At EOF a trailing
    /// unterminated line is returned once, then `TransportError::Disconnected`.
    pub fn read_line(&mut self) -> Result<String> {
        loop {
            if let Some(line) = self.take_line() {
                return Ok(line);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err)
                    if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    return Err(TransportError::Timeout)
                }
                Err(err) => return Err(TransportError::Io(err)),
            };

            if read == 0 {
                if self.buf.is_empty() || self.discarding {
                    self.buf.clear();
                    return Err(TransportError::Disconnected);
                }
                let rest = self.buf.split();
                return Ok(to_text(&rest));
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    fn take_line(&mut self) -> Option<String> {
        loop {
            match self.buf.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    let line = self.buf.split_to(pos + 1);
                    if self.discarding {
                        self.discarding = false;
                        continue;
                    }
                    if line.len() > self.max_line {
                        warn!(len = line.len(), max = self.max_line, "discarding overlong line");
                        continue;
                    }
                    return Some(to_text(&line));
                }
                None => {
                    if self.buf.len() > self.max_line {
                        if !self.discarding {
                            warn!(
                                buffered = self.buf.len(),
                                max = self.max_line,
                                "discarding overlong line"
                            );
                        }
                        self.discarding = true;
                        self.buf.advance(self.buf.len());
                    }
                    return None;
                }
            }
        }
    }

    /// Bytes read from the stream but not yet returned as a line.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    ///
    /// Any buffered partial line is dropped; use [`LineReader::into_parts`] to keep it.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Consume the reader and return the inner stream plus buffered bytes.
    pub fn into_parts(self) -> (T, BytesMut) {
        (self.inner, self.buf)
    }
}

impl<T: Read> LineSource for LineReader<T> {
    fn read_line(&mut self) -> Result<String> {
        LineReader::read_line(self)
    }
}

fn to_text(raw: &[u8]) -> String {
    let mut end = raw.len();
    while end > 0 && matches!(raw[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Writes `\r\n`-terminated lines to any `Write` stream.
pub struct LineWriter<T> {
    inner: T,
    buf: BytesMut,
}

impl<T: Write> LineWriter<T> {
    /// Create a new line writer.
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(128),
        }
    }

    /// Write one line and flush (blocking).
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        self.buf.clear();
        self.buf.extend_from_slice(line.trim_end_matches(['\r', '\n']).as_bytes());
        self.buf.extend_from_slice(b"\r\n");

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(TransportError::Disconnected),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Write> LineSink for LineWriter<T> {
    fn write_line(&mut self, line: &str) -> Result<()> {
        LineWriter::write_line(self, line)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    use super::*;

    const PKT: &str = "045  I --- 01:145038 --:------ 01:145038 3B00 002 FCC8";

    #[test]
    fn read_single_line() {
        let mut reader = LineReader::new(Cursor::new(format!("{PKT}\r\n").into_bytes()));
        assert_eq!(reader.read_line().unwrap(), PKT);
        assert!(matches!(
            reader.read_line().unwrap_err(),
            TransportError::Disconnected
        ));
    }

    #[test]
    fn read_multiple_lines_mixed_terminators() {
        let wire = "one\r\ntwo\nthree\r\n";
        let mut reader = LineReader::new(Cursor::new(wire.as_bytes().to_vec()));

        assert_eq!(reader.read_line().unwrap(), "one");
        assert_eq!(reader.read_line().unwrap(), "two");
        assert_eq!(reader.read_line().unwrap(), "three");
    }

    #[test]
    fn trailing_line_without_terminator_is_returned_once() {
        let mut reader = LineReader::new(Cursor::new(b"first\nlast".to_vec()));
        assert_eq!(reader.read_line().unwrap(), "first");
        assert_eq!(reader.read_line().unwrap(), "last");
        assert!(matches!(
            reader.read_line().unwrap_err(),
            TransportError::Disconnected
        ));
    }

    #[test]
    fn partial_read_handling() {
        let byte_reader = ByteByByteReader {
            bytes: format!("{PKT}\r\n").into_bytes(),
            pos: 0,
        };
        let mut reader = LineReader::new(byte_reader);
        assert_eq!(reader.read_line().unwrap(), PKT);
    }

    #[test]
    fn overlong_line_is_skipped_and_reader_resyncs() {
        let mut wire = vec![b'A'; 64];
        wire.extend_from_slice(b"\r\nshort\r\n");
        let mut reader = LineReader::with_max_line(Cursor::new(wire), 16);
        assert_eq!(reader.read_line().unwrap(), "short");
    }

    #[test]
    fn timeout_keeps_partial_line() {
        let reader = TimeoutThenData {
            steps: vec![
                Step::Data(b"045 RQ --- ".to_vec()),
                Step::Timeout,
                Step::Data(b"rest\r\n".to_vec()),
            ],
        };
        let mut reader = LineReader::new(reader);

        assert!(reader.read_line().unwrap_err().is_timeout());
        assert_eq!(reader.buffered(), b"045 RQ --- ");
        assert_eq!(reader.read_line().unwrap(), "045 RQ --- rest");
    }

    #[test]
    fn retries_on_interrupted_reads() {
        let reader = TimeoutThenData {
            steps: vec![Step::Interrupted, Step::Data(b"ok\n".to_vec())],
        };
        let mut reader = LineReader::new(reader);
        assert_eq!(reader.read_line().unwrap(), "ok");
    }

    #[test]
    fn into_parts_returns_unconsumed_bytes() {
        let mut reader = LineReader::new(Cursor::new(b"a\nb\npartial".to_vec()));
        assert_eq!(reader.read_line().unwrap(), "a");
        let (_, rest) = reader.into_parts();
        assert_eq!(&rest[..], b"b\npartial");
    }

    #[test]
    fn writer_appends_crlf_once() {
        let sink = SharedSink::default();
        let mut writer = LineWriter::new(sink.clone());
        writer.write_line("RQ --- 18:000730 01:145038 --:------ 30C9 001 00").unwrap();
        writer.write_line("already terminated\r\n").unwrap();

        let written = sink.0.lock().unwrap().clone();
        assert_eq!(
            String::from_utf8(written).unwrap(),
            "RQ --- 18:000730 01:145038 --:------ 30C9 001 00\r\nalready terminated\r\n"
        );
    }

    #[test]
    fn writer_reports_closed_sink() {
        let mut writer = LineWriter::new(ZeroWriter);
        assert!(matches!(
            writer.write_line("x").unwrap_err(),
            TransportError::Disconnected
        ));
    }

    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    enum Step {
        Data(Vec<u8>),
        Timeout,
        Interrupted,
    }

    struct TimeoutThenData {
        steps: Vec<Step>,
    }

    impl Read for TimeoutThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.steps.is_empty() {
                return Ok(0);
            }
            match self.steps.remove(0) {
                Step::Data(data) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Step::Timeout => Err(std::io::Error::new(ErrorKind::WouldBlock, "timeout")),
                Step::Interrupted => Err(std::io::Error::new(ErrorKind::Interrupted, "signal")),
            }
        }
    }

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
