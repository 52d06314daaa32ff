use std::io::{self, Read, Write};

pub const MAGIC: [u8; 4] = [b't', b'x', b'l', b'g'];
pub const KIND_TX: u8 = 0xFF;
pub const KIND_FLUSH_CHUNK: u8 = 0x02;
pub const KIND_TRIES_ADDED: u8 = 0x03;

/// The kind of a log record, identified by the leading byte of its frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecordKind {
    /// A transaction envelope produced by the tx-op codec.
    Tx,
    /// A control message emitted by the flusher (see `txlog-indexer`).
    FlushChunk,
    /// Notifies readers that new tries were registered with the catalog.
    TriesAdded,
}

impl RecordKind {
    fn tag(self) -> u8 {
        match self {
            RecordKind::Tx => KIND_TX,
            RecordKind::FlushChunk => KIND_FLUSH_CHUNK,
            RecordKind::TriesAdded => KIND_TRIES_ADDED,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            KIND_TX => Some(RecordKind::Tx),
            KIND_FLUSH_CHUNK => Some(RecordKind::FlushChunk),
            KIND_TRIES_ADDED => Some(RecordKind::TriesAdded),
            _ => None,
        }
    }
}

/// One record read back from the log, with the dense offset assigned to it
/// at append time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub offset: u64,
    pub kind: RecordKind,
    pub payload: Vec<u8>,
}

/// Frame a record as `[kind:1][len:4 LE][payload][crc32c:4 LE]` and write it.
///
/// The checksum covers the kind byte, length, and payload, so truncation or
/// bit-rot in any of them is detected on the next open.
pub fn write_frame<W: Write>(mut out: W, kind: RecordKind, payload: &[u8]) -> io::Result<()> {
    let mut header = Vec::with_capacity(5 + payload.len());
    header.push(kind.tag());
    header.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    header.extend_from_slice(payload);
    let checksum = crc32c::crc32c(&header);
    out.write_all(&header)?;
    out.write_all(&checksum.to_le_bytes())?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("unexpected end of frame")]
    Eof,
    #[error("unknown record kind tag {0:#x}")]
    UnknownKind(u8),
    #[error("checksum mismatch: stored={stored:#010x} computed={computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Read one frame from `input`, assigning it `offset`.
///
/// Returns `Ok(None)` on a clean end-of-stream (zero bytes read for the
/// leading kind byte). Any other form of truncation is a [`FrameError`] the
/// caller can use to know where to truncate a corrupt tail.
pub fn read_frame<R: Read>(mut input: R, offset: u64) -> Result<Option<Record>, FrameError> {
    let mut kind_buf = [0u8; 1];
    match input.read(&mut kind_buf)? {
        0 => return Ok(None),
        _ => {}
    }
    let kind = RecordKind::from_tag(kind_buf[0]).ok_or(FrameError::UnknownKind(kind_buf[0]))?;

    let mut len_buf = [0u8; 4];
    input.read_exact(&mut len_buf).map_err(|_| FrameError::Eof)?;
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut payload = vec![0u8; len];
    input.read_exact(&mut payload).map_err(|_| FrameError::Eof)?;

    let mut crc_buf = [0u8; 4];
    input.read_exact(&mut crc_buf).map_err(|_| FrameError::Eof)?;
    let stored = u32::from_le_bytes(crc_buf);

    let mut header = Vec::with_capacity(5 + payload.len());
    header.push(kind_buf[0]);
    header.extend_from_slice(&len_buf);
    header.extend_from_slice(&payload);
    let computed = crc32c::crc32c(&header);
    if stored != computed {
        return Err(FrameError::ChecksumMismatch { stored, computed });
    }

    Ok(Some(Record { offset, kind, payload }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_a_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, RecordKind::Tx, b"hello").unwrap();
        let record = read_frame(&buf[..], 7).unwrap().unwrap();
        assert_eq!(record.offset, 7);
        assert_eq!(record.kind, RecordKind::Tx);
        assert_eq!(record.payload, b"hello");
    }

    #[test]
    fn empty_input_is_clean_eof() {
        assert!(read_frame(&[][..], 0).unwrap().is_none());
    }

    #[test]
    fn truncated_tail_is_an_error_not_a_panic() {
        let mut buf = Vec::new();
        write_frame(&mut buf, RecordKind::Tx, b"hello").unwrap();
        buf.truncate(buf.len() - 2);
        assert!(matches!(read_frame(&buf[..], 0), Err(FrameError::Eof)));
    }

    #[test]
    fn bit_rot_is_detected() {
        let mut buf = Vec::new();
        write_frame(&mut buf, RecordKind::Tx, b"hello").unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;
        assert!(matches!(read_frame(&buf[..], 0), Err(FrameError::ChecksumMismatch { .. })));
    }
}
