use std::fs::File;
use std::io;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

pub const START_COMMAND: &str = "START_DUMP";

pub const COMPLETE_MARKER: &str = "DUMP_COMPLETE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinePoll {
    /// No complete line has arrived yet
    Pending,
    Line(String),
}

/// Destination for the dump. Every call blocks until the transport has accepted the data, so the
/// caller can reuse its buffers as soon as a call returns.
pub trait DumpTransport {
    type Err;

    /// Announce the cartridge name and the number of megabytes about to be sent.
    ///
    /// # Errors
    ///
    /// Will propagate any errors encountered while writing.
    fn send_cart_info(&mut self, name: &str, size_mb: u32) -> Result<(), Self::Err>;

    /// Check for a complete line from the host without waiting for one.
    ///
    /// # Errors
    ///
    /// Will propagate any errors encountered while reading.
    fn poll_line(&mut self) -> Result<LinePoll, Self::Err>;

    /// # Errors
    ///
    /// Will propagate any errors encountered while writing.
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), Self::Err>;

    /// # Errors
    ///
    /// Will propagate any errors encountered while writing.
    fn send_complete(&mut self) -> Result<(), Self::Err>;
}

/// Line-based handshake followed by raw, unframed ROM bytes.
#[derive(Debug)]
pub struct SerialTransport<R, W> {
    reader: R,
    writer: W,
    received: Vec<u8>,
}

impl<R: Read, W: Write> SerialTransport<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer, received: Vec::new() }
    }

    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }

    fn take_line(&mut self) -> Option<String> {
        let end = self.received.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.received.drain(..=end).collect();
        Some(String::from_utf8_lossy(&line).trim().into())
    }
}

impl<R: Read, W: Write> DumpTransport for SerialTransport<R, W> {
    type Err = io::Error;

    fn send_cart_info(&mut self, name: &str, size_mb: u32) -> Result<(), Self::Err> {
        writeln!(self.writer, "CART_INFO:{name},{size_mb}")?;
        self.writer.flush()
    }

    fn poll_line(&mut self) -> Result<LinePoll, Self::Err> {
        if let Some(line) = self.take_line() {
            return Ok(LinePoll::Line(line));
        }

        let mut buffer = [0; 64];
        let len = match self.reader.read(&mut buffer) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "host closed the link before sending a line",
                ));
            }
            Ok(len) => len,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(LinePoll::Pending),
            Err(err) => return Err(err),
        };
        self.received.extend_from_slice(&buffer[..len]);

        Ok(self.take_line().map_or(LinePoll::Pending, LinePoll::Line))
    }

    fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), Self::Err> {
        self.writer.write_all(chunk)?;
        self.writer.flush()
    }

    fn send_complete(&mut self) -> Result<(), Self::Err> {
        writeln!(self.writer, "{COMPLETE_MARKER}")?;
        self.writer.flush()
    }
}

/// Writes the ROM as a flat binary with no header or footer. The host handshake is skipped.
#[derive(Debug)]
pub struct FileSink<W> {
    writer: W,
    bytes_written: u64,
}

impl FileSink<BufWriter<File>> {
    /// # Errors
    ///
    /// Will propagate any errors encountered while creating the file.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> FileSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, bytes_written: 0 }
    }

    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> DumpTransport for FileSink<W> {
    type Err = io::Error;

    fn send_cart_info(&mut self, name: &str, size_mb: u32) -> Result<(), Self::Err> {
        log::info!("Writing {size_mb}MB dump of '{name}'");
        Ok(())
    }

    fn poll_line(&mut self) -> Result<LinePoll, Self::Err> {
        Ok(LinePoll::Line(START_COMMAND.into()))
    }

    fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), Self::Err> {
        self.writer.write_all(chunk)?;
        self.bytes_written += chunk.len() as u64;
        Ok(())
    }

    fn send_complete(&mut self) -> Result<(), Self::Err> {
        self.writer.flush()?;
        log::info!("Dump file complete, {} bytes", self.bytes_written);
        Ok(())
    }
}
