//! Length-Prefixed Frame Encoding
//!
//! Provides reliable message boundaries over the pipes between the supervisor
//! and its worker processes.

use rkyv::ser::serializers::AllocSerializer;
use rkyv::validation::validators::DefaultValidator;
use rkyv::{AlignedVec, Archive, CheckBytes, Deserialize, Infallible, Serialize};
use std::io::{BufReader, BufWriter, Read, Write};
use thiserror::Error;

/// Largest payload a frame may carry (256 MiB).
///
/// Long partitions are split into `Run` commands of at most
/// [`RUN_CHUNK_TASKS`](crate::RUN_CHUNK_TASKS) tasks, which keeps both a
/// command and its reply far below this bound.
pub const MAX_FRAME_SIZE: usize = 256 * 1024 * 1024;

/// Errors that can occur during frame encoding/decoding
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Frame too large: {size} bytes (max {max} bytes)")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("End of stream")]
    EndOfStream,
}

/// Archive `message`, refusing payloads over `limit` bytes.
///
/// Shared by the frame writer and by on-disk sample blobs.
pub fn encode<T>(message: &T, limit: usize) -> Result<AlignedVec, FrameError>
where
    T: Serialize<AllocSerializer<1024>>,
{
    let bytes =
        rkyv::to_bytes::<_, 1024>(message).map_err(|e| FrameError::Serialization(e.to_string()))?;
    check_size(bytes.len(), limit)?;
    Ok(bytes)
}

/// Validate and deserialize an archived value from an aligned buffer.
pub fn decode<T>(bytes: &[u8]) -> Result<T, FrameError>
where
    T: Archive,
    T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
{
    let archived = rkyv::check_archived_root::<T>(bytes)
        .map_err(|e| FrameError::Deserialization(e.to_string()))?;

    archived
        .deserialize(&mut Infallible)
        .map_err(|e| FrameError::Deserialization(format!("{:?}", e)))
}

fn check_size(size: usize, max: usize) -> Result<(), FrameError> {
    if size > max {
        return Err(FrameError::FrameTooLarge { size, max });
    }
    Ok(())
}

/// Writes length-prefixed frames.
///
/// ```text
/// +----------------+------------------+
/// | length (4 LE)  | rkyv payload     |
/// +----------------+------------------+
/// ```
///
/// Every frame is flushed as soon as it is written, so the peer never waits
/// on a half-buffered message.
pub struct FrameWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> FrameWriter<W> {
    /// Create a new frame writer
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::with_capacity(64 * 1024, writer),
        }
    }

    /// Write one message as a frame
    pub fn write<T>(&mut self, message: &T) -> Result<(), FrameError>
    where
        T: Serialize<AllocSerializer<1024>>,
    {
        let bytes = encode(message, MAX_FRAME_SIZE)?;
        self.writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
        self.writer.write_all(&bytes)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Reads length-prefixed frames written by [`FrameWriter`]
pub struct FrameReader<R: Read> {
    reader: BufReader<R>,
}

impl<R: Read> FrameReader<R> {
    /// Create a new frame reader
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::with_capacity(64 * 1024, reader),
        }
    }

    /// Read one message; a stream closed between frames is `EndOfStream`
    pub fn read<T>(&mut self) -> Result<T, FrameError>
    where
        T: Archive,
        T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
    {
        let mut len_buf = [0u8; 4];
        match self.reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(FrameError::EndOfStream);
            }
            Err(e) => return Err(FrameError::Io(e)),
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        check_size(len, MAX_FRAME_SIZE)?;
        if len == 0 {
            return Err(FrameError::InvalidFrame("zero-length frame".to_string()));
        }

        // rkyv needs an aligned buffer
        let mut buf = AlignedVec::with_capacity(len);
        buf.resize(len, 0);
        self.reader.read_exact(&mut buf)?;

        decode(&buf)
    }

    /// Whether bytes of a frame are already buffered, so a poll on the
    /// underlying fd would not see them
    pub fn has_buffered_data(&self) -> bool {
        !self.reader.buffer().is_empty()
    }
}
