// logtrail - segment/codec.rs
//
// Row encode/decode for the two on-disk segment formats: one binary layout
// (of several mutually incompatible ones historically produced by this kind
// of system) and a simpler line-delimited JSON layout. A conforming reader
// refuses anything else rather than guessing at layout.

use std::io::{self, Read, Write};

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fnv;
use crate::position::Position;
use crate::util::error::{ChecksumStage, CodecError};

/// Which on-disk layout a segment uses. Pinned per-file at creation time and
/// never mixed within one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentFormat {
    Binary,
    Json,
}

/// Exactly one of `Text`/`Bin` is ever meaningful; the header row of a
/// segment carries neither (`Text(String::new())` by convention).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Bin(Vec<u8>),
}

impl Payload {
    fn is_empty(&self) -> bool {
        matches!(self, Payload::Text(s) if s.is_empty())
    }
}

/// The unit persisted to a segment: a wall-clock time, a Position snapshot,
/// and a payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub time: DateTime<Utc>,
    pub position: Position,
    pub payload: Payload,
}

impl Row {
    /// A segment's first record: only `position` is meaningful.
    pub fn header(position: Position) -> Self {
        Self {
            time: epoch(),
            position,
            payload: Payload::Text(String::new()),
        }
    }

    pub fn is_header(&self) -> bool {
        self.time == epoch() && self.payload.is_empty()
    }
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(0, 0).unwrap()
}

fn to_nanos(t: DateTime<Utc>) -> i64 {
    t.timestamp_nanos_opt().unwrap_or(0)
}

fn from_nanos(nanos: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(
        nanos.div_euclid(1_000_000_000),
        (nanos.rem_euclid(1_000_000_000)) as u32,
    )
    .unwrap_or_else(epoch)
}

// ---------------------------------------------------------------------------
// Binary framing
// ---------------------------------------------------------------------------
//
// Little-endian throughout. Two checksums: the header checksum lets a
// reader reject a corrupted header before allocating any length-prefixed
// buffer; the trailer checksum catches payload corruption the header alone
// can't see.
//
//   row_time_ns            i64   8
//   pos_created_at_ns      i64   8
//   offset                 i64   8
//   bin_len                i32   4
//   text_len               i32   4
//   head_hash_len_u16      i16   2   (Position.head_hash_length, truncated)
//   head_hash_bytes_len    i16   2
//   name_len               i16   2
//   header_checksum        u32   4   FNV-32a of the 38 bytes above
//   bin_payload             -    bin_len
//   text_payload            -    text_len
//   head_hash_text           -   head_hash_bytes_len
//   source_name              -   name_len
//   trailer_checksum       u32   4   FNV-32a of header+payloads

const HEADER_FIELDS_LEN: usize = 8 + 8 + 8 + 4 + 4 + 2 + 2 + 2;
const HEADER_BLOCK_LEN: usize = HEADER_FIELDS_LEN + 4;

pub fn encode_binary(row: &Row) -> Vec<u8> {
    let (bin_payload, text_payload): (&[u8], &[u8]) = match &row.payload {
        Payload::Bin(b) => (b.as_slice(), &[]),
        Payload::Text(s) => (&[], s.as_bytes()),
    };
    let head_hash_text = row.position.head_hash.as_bytes();
    let source_name = row.position.source_name.as_bytes();

    let mut header_fields = Vec::with_capacity(HEADER_FIELDS_LEN);
    header_fields.extend_from_slice(&to_nanos(row.time).to_le_bytes());
    header_fields.extend_from_slice(&to_nanos(row.position.source_created_at).to_le_bytes());
    header_fields.extend_from_slice(&(row.position.offset as i64).to_le_bytes());
    header_fields.extend_from_slice(&(bin_payload.len() as i32).to_le_bytes());
    header_fields.extend_from_slice(&(text_payload.len() as i32).to_le_bytes());
    header_fields.extend_from_slice(&(row.position.head_hash_length as i16).to_le_bytes());
    header_fields.extend_from_slice(&(head_hash_text.len() as i16).to_le_bytes());
    header_fields.extend_from_slice(&(source_name.len() as i16).to_le_bytes());

    let header_checksum = fnv::fnv1a_32(&header_fields);

    let mut out = Vec::with_capacity(
        HEADER_BLOCK_LEN + bin_payload.len() + text_payload.len() + head_hash_text.len() + source_name.len() + 4,
    );
    out.extend_from_slice(&header_fields);
    out.extend_from_slice(&header_checksum.to_le_bytes());
    out.extend_from_slice(bin_payload);
    out.extend_from_slice(text_payload);
    out.extend_from_slice(head_hash_text);
    out.extend_from_slice(source_name);

    let trailer_checksum = fnv::fnv1a_32(&out);
    out.extend_from_slice(&trailer_checksum.to_le_bytes());
    out
}

pub fn write_binary_row<W: Write>(writer: &mut W, row: &Row) -> Result<(), CodecError> {
    writer.write_all(&encode_binary(row))?;
    Ok(())
}

/// Decode one framed row from `reader`. Returns `Ok(None)` on a clean
/// end-of-stream (no bytes at all before the next row); any other failure
/// partway through a row is genuine corruption.
pub fn read_binary_row<R: Read>(reader: &mut R) -> Result<Option<Row>, CodecError> {
    let mut header_block = [0u8; HEADER_BLOCK_LEN];
    if !read_exact_or_eof(reader, &mut header_block)? {
        return Ok(None);
    }

    let header_fields = &header_block[..HEADER_FIELDS_LEN];
    let stored_header_checksum = u32::from_le_bytes(header_block[HEADER_FIELDS_LEN..].try_into().unwrap());
    let actual_header_checksum = fnv::fnv1a_32(header_fields);
    if stored_header_checksum != actual_header_checksum {
        return Err(CodecError::ChecksumMismatch {
            stage: ChecksumStage::Header,
            expected: stored_header_checksum,
            actual: actual_header_checksum,
        });
    }

    let row_time_ns = i64::from_le_bytes(header_fields[0..8].try_into().unwrap());
    let pos_created_at_ns = i64::from_le_bytes(header_fields[8..16].try_into().unwrap());
    let offset = i64::from_le_bytes(header_fields[16..24].try_into().unwrap());
    let bin_len = i32::from_le_bytes(header_fields[24..28].try_into().unwrap()).max(0) as usize;
    let text_len = i32::from_le_bytes(header_fields[28..32].try_into().unwrap()).max(0) as usize;
    let head_hash_len_u16 = i16::from_le_bytes(header_fields[32..34].try_into().unwrap());
    let head_hash_bytes_len = i16::from_le_bytes(header_fields[34..36].try_into().unwrap()).max(0) as usize;
    let name_len = i16::from_le_bytes(header_fields[36..38].try_into().unwrap()).max(0) as usize;

    let payload_len = bin_len + text_len + head_hash_bytes_len + name_len;
    let mut payload = vec![0u8; payload_len];
    if !read_exact_or_eof(reader, &mut payload)? {
        return Err(CodecError::UnexpectedEof);
    }

    let mut trailer_buf = [0u8; 4];
    if !read_exact_or_eof(reader, &mut trailer_buf)? {
        return Err(CodecError::UnexpectedEof);
    }
    let stored_trailer_checksum = u32::from_le_bytes(trailer_buf);

    let mut full_row_so_far = Vec::with_capacity(HEADER_BLOCK_LEN + payload_len);
    full_row_so_far.extend_from_slice(&header_block);
    full_row_so_far.extend_from_slice(&payload);
    let actual_trailer_checksum = fnv::fnv1a_32(&full_row_so_far);
    if stored_trailer_checksum != actual_trailer_checksum {
        return Err(CodecError::ChecksumMismatch {
            stage: ChecksumStage::Trailer,
            expected: stored_trailer_checksum,
            actual: actual_trailer_checksum,
        });
    }

    let mut cursor = 0usize;
    let bin_payload = payload[cursor..cursor + bin_len].to_vec();
    cursor += bin_len;
    let text_payload = &payload[cursor..cursor + text_len];
    cursor += text_len;
    let head_hash_text = &payload[cursor..cursor + head_hash_bytes_len];
    cursor += head_hash_bytes_len;
    let source_name = &payload[cursor..cursor + name_len];

    if bin_len > 0 && text_len > 0 {
        return Err(CodecError::AmbiguousPayload);
    }

    let payload = if bin_len > 0 {
        Payload::Bin(bin_payload)
    } else {
        Payload::Text(String::from_utf8_lossy(text_payload).into_owned())
    };

    let position = Position {
        source_name: String::from_utf8_lossy(source_name).into_owned(),
        source_created_at: from_nanos(pos_created_at_ns),
        offset: offset.max(0) as u64,
        head_hash: String::from_utf8_lossy(head_hash_text).into_owned(),
        head_hash_length: head_hash_len_u16.max(0) as u64,
    };

    Ok(Some(Row {
        time: from_nanos(row_time_ns),
        position,
        payload,
    }))
}

fn read_exact_or_eof<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<bool, CodecError> {
    let mut total = 0usize;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => {
                return if total == 0 { Ok(false) } else { Err(CodecError::UnexpectedEof) };
            }
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CodecError::Io(e)),
        }
    }
    Ok(true)
}

// ---------------------------------------------------------------------------
// Line-delimited JSON
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct JsonRow {
    t: DateTime<Utc>,
    p: Position,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    b: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    s: Option<String>,
}

pub fn encode_json_line(row: &Row) -> Result<String, CodecError> {
    let (b, s) = match &row.payload {
        Payload::Bin(data) => (Some(base64::engine::general_purpose::STANDARD.encode(data)), None),
        Payload::Text(text) => (None, Some(text.clone())),
    };
    let wire = JsonRow {
        t: row.time,
        p: row.position.clone(),
        b,
        s,
    };
    let mut line = serde_json::to_string(&wire).map_err(|source| CodecError::Json { line: 0, source })?;
    line.push('\n');
    Ok(line)
}

pub fn decode_json_line(line: &str, line_no: u64) -> Result<Row, CodecError> {
    let wire: JsonRow =
        serde_json::from_str(line.trim_end_matches('\n')).map_err(|source| CodecError::Json { line: line_no, source })?;

    let payload = match (wire.b, wire.s) {
        (Some(b64), None) => {
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(b64)
                .map_err(|source| CodecError::Base64 { line: line_no, source })?;
            Payload::Bin(decoded)
        }
        (None, Some(text)) => Payload::Text(text),
        (None, None) => Payload::Text(String::new()),
        (Some(_), Some(_)) => return Err(CodecError::AmbiguousPayload),
    };

    Ok(Row {
        time: wire.t,
        position: wire.p,
        payload,
    })
}
