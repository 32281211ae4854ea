use std::{
    io::{BufReader, ErrorKind, Read, Write},
    time::Duration,
};

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, warn};

use crate::haier::layout::{FrameLayout, LENGTH_OFFSET, SYNC};

/// A link to the unit that moves whole frames.
pub trait Transport {
    /// Writes one frame. Frames go out in the order they are sent.
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Blocks until one synchronized frame has been read.
    fn recv(&mut self) -> Result<Bytes, TransportError>;

    /// Holds the link idle, used to let the unit settle between commands.
    fn pause(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("EOF")]
    Eof,
}

/// Frames a raw byte stream, typically a serial port at 9600 baud.
///
/// Incoming bytes are discarded until two consecutive `0xFF` sync bytes are seen.
/// The rest of the frame is then read according to the layout: a fixed size for
/// revision A, or the size declared by the length byte for revision B.
pub struct SerialLink<R: Read, W: Write> {
    layout: &'static FrameLayout,
    reader: BufReader<R>,
    writer: W,
}

impl<R: Read, W: Write> SerialLink<R, W> {
    pub fn new(layout: &'static FrameLayout, reader: R, writer: W) -> Self {
        Self {
            layout,
            reader: BufReader::new(reader),
            writer,
        }
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    fn read_byte(&mut self) -> Result<u8, TransportError> {
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte)?;
        Ok(byte[0])
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        match self.reader.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(TransportError::Eof),
            Err(e) => Err(e.into()),
        }
    }

    /// Consumes bytes up to and including the sync marker, returning the byte after it.
    fn sync(&mut self) -> Result<u8, TransportError> {
        let mut run = 0usize;
        let mut skipped = 0usize;

        loop {
            let byte = self.read_byte()?;
            if byte == SYNC[0] {
                run += 1;
                continue;
            }

            if run >= SYNC.len() {
                // Extra 0xFF before the marker are noise too
                skipped += run - SYNC.len();
                if skipped > 0 {
                    warn!(skipped, "discarded bytes before sync");
                }
                return Ok(byte);
            }

            skipped += run + 1;
            run = 0;
        }
    }
}

impl<R: Read, W: Write> Transport for SerialLink<R, W> {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.writer.write_all(frame)?;
        self.writer.flush()?;
        debug!(frame = %hex::encode(frame), "sent frame");
        Ok(())
    }

    fn recv(&mut self) -> Result<Bytes, TransportError> {
        let length = self.sync()?;

        let total = self.layout.frame_len(length).max(LENGTH_OFFSET + 1);
        let mut frame = vec![0u8; total];
        frame[..LENGTH_OFFSET].copy_from_slice(&SYNC);
        frame[LENGTH_OFFSET] = length;
        self.read_exact(&mut frame[LENGTH_OFFSET + 1..])?;

        debug!(frame = %hex::encode(&frame), "received frame");
        Ok(Bytes::from(frame))
    }
}
