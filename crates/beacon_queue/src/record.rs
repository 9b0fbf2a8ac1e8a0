//! Queue log records and their framing.
//!
//! Every mutation of the queue is one framed record appended to the log:
//!
//! ```text
//! | magic (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! Integers are little-endian. The CRC (IEEE) covers the header and payload.

use crate::error::{QueueError, QueueResult};
use beacon_sync_protocol::{ActionKind, PendingAction, RemoteId};

/// Magic bytes opening every record.
pub const RECORD_MAGIC: [u8; 4] = *b"BQAL";

/// Framing version written by this build.
pub const RECORD_VERSION: u16 = 1;

/// Bytes before the payload.
pub const HEADER_SIZE: usize = 11;

/// Bytes after the payload.
pub const CRC_SIZE: usize = 4;

/// Record type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Log header.
    Header = 1,
    /// New pending action.
    Enqueue = 2,
    /// Replaced payload of a pending action.
    Update = 3,
    /// Pending action removed.
    Remove = 4,
    /// Next id to assign.
    Checkpoint = 5,
}

impl RecordType {
    /// Converts a byte to a record type.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Header),
            2 => Some(Self::Enqueue),
            3 => Some(Self::Update),
            4 => Some(Self::Remove),
            5 => Some(Self::Checkpoint),
            _ => None,
        }
    }
}

/// A decoded log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueRecord {
    /// First record of every log.
    Header {
        /// Store format version.
        format_version: u16,
    },
    /// A new pending action.
    Enqueue(PendingAction),
    /// New payload for a pending UPDATE action.
    Update {
        /// Action id.
        id: u64,
        /// Replacement payload.
        payload: Vec<u8>,
    },
    /// A pending action was removed.
    Remove {
        /// Action id.
        id: u64,
    },
    /// Floor for the next id, written on compaction.
    Checkpoint {
        /// Next id to assign.
        next_id: u64,
    },
}

impl QueueRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::Header { .. } => RecordType::Header,
            Self::Enqueue(_) => RecordType::Enqueue,
            Self::Update { .. } => RecordType::Update,
            Self::Remove { .. } => RecordType::Remove,
            Self::Checkpoint { .. } => RecordType::Checkpoint,
        }
    }

    fn encode_payload(&self) -> QueueResult<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            Self::Header { format_version } => {
                buf.extend_from_slice(&format_version.to_le_bytes());
            }
            Self::Enqueue(action) => {
                buf.extend_from_slice(&action.id.to_le_bytes());
                buf.push(action.kind.as_byte());
                buf.extend_from_slice(&action.enqueued_at.to_le_bytes());
                match &action.target_id {
                    Some(target) => {
                        let bytes = target.as_str().as_bytes();
                        let len = u16::try_from(bytes.len()).map_err(|_| {
                            QueueError::invalid_mutation(action.id, "target id longer than 65535 bytes")
                        })?;
                        buf.push(1);
                        buf.extend_from_slice(&len.to_le_bytes());
                        buf.extend_from_slice(bytes);
                    }
                    None => buf.push(0),
                }
                buf.extend_from_slice(&action.payload);
            }
            Self::Update { id, payload } => {
                buf.extend_from_slice(&id.to_le_bytes());
                buf.extend_from_slice(payload);
            }
            Self::Remove { id } => buf.extend_from_slice(&id.to_le_bytes()),
            Self::Checkpoint { next_id } => buf.extend_from_slice(&next_id.to_le_bytes()),
        }
        Ok(buf)
    }

    /// Encodes the record as a complete frame.
    ///
    /// # Errors
    ///
    /// Returns an error if a field does not fit the frame format.
    pub fn encode(&self) -> QueueResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| QueueError::invalid_mutation(0, "record payload exceeds 4 GiB"))?;

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        frame.extend_from_slice(&RECORD_MAGIC);
        frame.extend_from_slice(&RECORD_VERSION.to_le_bytes());
        frame.push(self.record_type() as u8);
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);
        let crc = compute_crc32(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }

    fn decode_payload(record_type: RecordType, payload: &[u8], offset: u64) -> QueueResult<Self> {
        let mut reader = Reader {
            buf: payload,
            pos: 0,
            offset,
        };
        let record = match record_type {
            RecordType::Header => Self::Header {
                format_version: u16::from_le_bytes(reader.array()?),
            },
            RecordType::Enqueue => {
                let id = reader.u64()?;
                let kind = ActionKind::from_byte(reader.array::<1>()?[0])
                    .map_err(|e| QueueError::corrupted(offset, e.to_string()))?;
                let enqueued_at = reader.u64()?;
                let target_id = match reader.array::<1>()?[0] {
                    0 => None,
                    1 => {
                        let len = u16::from_le_bytes(reader.array()?) as usize;
                        let raw = reader.take(len)?;
                        let text = std::str::from_utf8(raw)
                            .map_err(|_| QueueError::corrupted(offset, "target id is not UTF-8"))?;
                        Some(RemoteId::new(text))
                    }
                    flag => {
                        return Err(QueueError::corrupted(
                            offset,
                            format!("bad target flag {flag}"),
                        ))
                    }
                };
                Self::Enqueue(PendingAction {
                    id,
                    kind,
                    target_id,
                    payload: reader.rest().to_vec(),
                    enqueued_at,
                })
            }
            RecordType::Update => {
                let id = reader.u64()?;
                Self::Update {
                    id,
                    payload: reader.rest().to_vec(),
                }
            }
            RecordType::Remove => Self::Remove { id: reader.u64()? },
            RecordType::Checkpoint => Self::Checkpoint {
                next_id: reader.u64()?,
            },
        };
        reader.finish()?;
        Ok(record)
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    offset: u64,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> QueueResult<&'a [u8]> {
        let end = self.pos + len;
        if end > self.buf.len() {
            return Err(QueueError::corrupted(self.offset, "record payload too short"));
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> QueueResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u64(&mut self) -> QueueResult<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }

    fn finish(&self) -> QueueResult<()> {
        if self.pos != self.buf.len() {
            return Err(QueueError::corrupted(
                self.offset,
                format!("{} trailing bytes in record", self.buf.len() - self.pos),
            ));
        }
        Ok(())
    }
}

/// Decodes the frame starting at `offset` in `log`.
///
/// Returns `Ok(None)` when the remaining bytes hold only part of a frame,
/// which is what a crash in the middle of an append leaves behind. Bad magic,
/// an unknown type, a newer framing version or a CRC mismatch are errors.
/// So is a short frame followed by a complete one: a torn append is always
/// the last thing in the log, so the length field must be damaged.
///
/// On success returns the record and the frame length.
///
/// # Errors
///
/// Returns [`QueueError::Corrupted`] or [`QueueError::ChecksumMismatch`].
pub fn decode_frame(log: &[u8], offset: u64) -> QueueResult<Option<(QueueRecord, usize)>> {
    match decode_complete_frame(log, offset)? {
        Some(frame) => Ok(Some(frame)),
        None => match next_complete_frame(log, offset as usize + 1) {
            Some(found) => Err(QueueError::corrupted(
                offset,
                format!("short record followed by an intact record at offset {found}"),
            )),
            None => Ok(None),
        },
    }
}

/// Finds the first offset at or after `from` holding a frame that decodes.
fn next_complete_frame(log: &[u8], from: usize) -> Option<usize> {
    let mut pos = from;
    while pos + HEADER_SIZE + CRC_SIZE <= log.len() {
        let found = log[pos..]
            .windows(RECORD_MAGIC.len())
            .position(|w| w == RECORD_MAGIC)?;
        pos += found;
        if let Ok(Some(_)) = decode_complete_frame(log, pos as u64) {
            return Some(pos);
        }
        pos += 1;
    }
    None
}

fn decode_complete_frame(log: &[u8], offset: u64) -> QueueResult<Option<(QueueRecord, usize)>> {
    let start = offset as usize;
    let available = log.len().saturating_sub(start);
    if available < HEADER_SIZE {
        return Ok(None);
    }
    let header = &log[start..start + HEADER_SIZE];
    if header[0..4] != RECORD_MAGIC {
        return Err(QueueError::corrupted(offset, "invalid magic"));
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version > RECORD_VERSION {
        return Err(QueueError::corrupted(
            offset,
            format!("unsupported record version {version}"),
        ));
    }
    let record_type = RecordType::from_byte(header[6])
        .ok_or_else(|| QueueError::corrupted(offset, format!("unknown record type {}", header[6])))?;
    let len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;

    let frame_len = HEADER_SIZE + len + CRC_SIZE;
    if available < frame_len {
        return Ok(None);
    }
    let body_end = start + HEADER_SIZE + len;
    let stored = u32::from_le_bytes([
        log[body_end],
        log[body_end + 1],
        log[body_end + 2],
        log[body_end + 3],
    ]);
    let computed = compute_crc32(&log[start..body_end]);
    if stored != computed {
        return Err(QueueError::ChecksumMismatch {
            offset,
            expected: stored,
            actual: computed,
        });
    }

    let payload = &log[start + HEADER_SIZE..body_end];
    let record = QueueRecord::decode_payload(record_type, payload, offset)?;
    Ok(Some((record, frame_len)))
}

/// Computes the IEEE CRC32 of `data`.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut bit = 0;
            while bit < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                bit += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    !data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update_action() -> PendingAction {
        PendingAction {
            id: 17,
            kind: ActionKind::Update,
            target_id: Some(RemoteId::new("r-0042")),
            payload: vec![0xa1, 0x01, 0x02],
            enqueued_at: 1_700_000_000_000,
        }
    }

    #[test]
    fn enqueue_frame_decodes_to_same_action() {
        let record = QueueRecord::Enqueue(update_action());
        let frame = record.encode().unwrap();

        let (decoded, len) = decode_frame(&frame, 0).unwrap().unwrap();
        assert_eq!(decoded, record);
        assert_eq!(len, frame.len());
    }

    #[test]
    fn frames_decode_back_to_back() {
        let mut log = QueueRecord::Header { format_version: 2 }.encode().unwrap();
        let second_at = log.len() as u64;
        log.extend(QueueRecord::Remove { id: 3 }.encode().unwrap());

        let (first, len) = decode_frame(&log, 0).unwrap().unwrap();
        assert_eq!(first, QueueRecord::Header { format_version: 2 });
        assert_eq!(len as u64, second_at);
        let (second, _) = decode_frame(&log, second_at).unwrap().unwrap();
        assert_eq!(second, QueueRecord::Remove { id: 3 });
    }

    #[test]
    fn partial_frame_is_end_of_log() {
        let frame = QueueRecord::Enqueue(update_action()).encode().unwrap();
        for cut in [0, 5, HEADER_SIZE, frame.len() - 1] {
            assert!(decode_frame(&frame[..cut], 0).unwrap().is_none(), "cut {cut}");
        }
    }

    #[test]
    fn inflated_length_before_an_intact_frame_is_corruption() {
        let mut log = QueueRecord::Remove { id: 1 }.encode().unwrap();
        log.extend(QueueRecord::Remove { id: 2 }.encode().unwrap());
        // high byte of the first frame's length
        log[HEADER_SIZE - 1] = 0x7f;

        let err = decode_frame(&log, 0).unwrap_err();
        assert!(matches!(err, QueueError::Corrupted { offset: 0, .. }));
    }

    #[test]
    fn flipped_byte_fails_checksum() {
        let mut frame = QueueRecord::Checkpoint { next_id: 9 }.encode().unwrap();
        frame[HEADER_SIZE] ^= 0xff;
        assert!(matches!(
            decode_frame(&frame, 0),
            Err(QueueError::ChecksumMismatch { offset: 0, .. })
        ));
    }

    #[test]
    fn bad_magic_is_corruption() {
        let mut frame = QueueRecord::Remove { id: 1 }.encode().unwrap();
        frame[0] = b'X';
        let err = decode_frame(&frame, 0).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn unknown_kind_is_corruption() {
        let mut action = update_action();
        action.target_id = None;
        let mut frame = QueueRecord::Enqueue(action).encode().unwrap();
        // kind byte follows the 8-byte id
        frame[HEADER_SIZE + 8] = 77;
        let body_end = frame.len() - CRC_SIZE;
        let crc = compute_crc32(&frame[..body_end]);
        frame[body_end..].copy_from_slice(&crc.to_le_bytes());

        assert!(matches!(
            decode_frame(&frame, 0),
            Err(QueueError::Corrupted { .. })
        ));
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }
}
