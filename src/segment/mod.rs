// logtrail - segment/mod.rs
//
// One active or sealed segment file: header (position), append, full-scan
// recovery, seal (rename suffix). Path layout and the create/open/seal/
// quarantine operations are grounded on original_source/core/db.go's
// makeFilePath/makeFileName and DB.Close(fix)/os.Rename dance, translated
// from BoltDB buckets to the framed row file this spec pins.

pub mod codec;
pub mod pool;

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::position::Position;
use crate::util::constants::{SEGMENT_ACTIVE_EXT, SEGMENT_BROKEN_EXT, SEGMENT_DATE_FORMAT, SEGMENT_SEALED_EXT, SEGMENT_TIME_FORMAT};
use crate::util::error::CoreError;

pub use codec::{Payload, Row, SegmentFormat};

/// `<base>/<name>/YYYYMMDD` — the per-day directory a bucket's segment lives
/// under.
pub fn segment_dir(base_path: &Path, name: &str, bucket: DateTime<Local>) -> PathBuf {
    base_path.join(name).join(bucket.format(SEGMENT_DATE_FORMAT).to_string())
}

/// `HHMMSS` — the bucket's file stem within its day directory.
pub fn segment_stem(bucket: DateTime<Local>) -> String {
    bucket.format(SEGMENT_TIME_FORMAT).to_string()
}

pub fn active_path(base_path: &Path, name: &str, bucket: DateTime<Local>) -> PathBuf {
    segment_dir(base_path, name, bucket).join(format!("{}.{SEGMENT_ACTIVE_EXT}", segment_stem(bucket)))
}

pub fn sealed_path(base_path: &Path, name: &str, bucket: DateTime<Local>) -> PathBuf {
    segment_dir(base_path, name, bucket).join(format!("{}.{SEGMENT_SEALED_EXT}", segment_stem(bucket)))
}

pub fn broken_path(base_path: &Path, name: &str, bucket: DateTime<Local>) -> PathBuf {
    segment_dir(base_path, name, bucket).join(format!("{}.{SEGMENT_BROKEN_EXT}", segment_stem(bucket)))
}

/// One open segment: an active `.rec` file plus the bucket it belongs to.
pub struct Segment {
    file: File,
    path: PathBuf,
    format: SegmentFormat,
    bucket: DateTime<Local>,
}

impl Segment {
    pub fn bucket(&self) -> DateTime<Local> {
        self.bucket
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> SegmentFormat {
        self.format
    }

    /// Create a brand new active segment for `bucket`, writing `header` as
    /// its opening Position.
    pub fn create(
        base_path: &Path,
        name: &str,
        bucket: DateTime<Local>,
        format: SegmentFormat,
        header: Position,
    ) -> Result<Self, CoreError> {
        let dir = segment_dir(base_path, name, bucket);
        fs::create_dir_all(&dir).map_err(|source| CoreError::Io {
            path: dir.clone(),
            operation: "create segment directory",
            source,
        })?;

        let path = active_path(base_path, name, bucket);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| CoreError::Io {
                path: path.clone(),
                operation: "create segment file",
                source,
            })?;

        write_row(&mut file, format, &Row::header(header)).map_err(|e| wrap_invalid(&path, 0, e))?;

        Ok(Self {
            file,
            path,
            format,
            bucket,
        })
    }

    /// Open an existing `.rec` or `.fixed` file, read its header, then
    /// stream-decode every remaining row to recover the last-written
    /// Position. Leaves the file positioned at EOF, ready for further
    /// appends if it's still active.
    pub fn open_existing(path: &Path, format: SegmentFormat, bucket: DateTime<Local>) -> Result<(Self, Position), CoreError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| CoreError::Io {
                path: path.to_path_buf(),
                operation: "open existing segment",
                source,
            })?;

        let mut record_index = 0u64;
        let mut position = read_row(&mut file, format, record_index)
            .map_err(|e| wrap_invalid(path, record_index, e))?
            .map(|row| row.position)
            .ok_or_else(|| {
                CoreError::InvalidSegment {
                    file: path.to_path_buf(),
                    record_index,
                    cause: Box::new(CoreError::Codec(crate::util::error::CodecError::UnexpectedEof)),
                }
            })?;

        loop {
            record_index += 1;
            match read_row(&mut file, format, record_index).map_err(|e| wrap_invalid(path, record_index, e))? {
                Some(row) => position = row.position,
                None => break,
            }
        }

        file.seek(SeekFrom::End(0)).map_err(|source| CoreError::Io {
            path: path.to_path_buf(),
            operation: "seek to end after recovery scan",
            source,
        })?;

        Ok((
            Self {
                file,
                path: path.to_path_buf(),
                format,
                bucket,
            },
            position,
        ))
    }

    /// Encode and append one row. Not fsynced; durability is crash-safe only
    /// to the last successfully returned row.
    pub fn append(&mut self, row: &Row) -> Result<(), CoreError> {
        write_row(&mut self.file, self.format, row).map_err(CoreError::Codec)
    }

    /// Close the handle and rename `.rec` -> `.fixed`.
    pub fn seal(self) -> Result<PathBuf, CoreError> {
        self.finish(SEGMENT_SEALED_EXT)
    }

    /// Close the handle and rename `.rec` -> `.broken`. Never deletes; the
    /// operator inspects quarantined segments by hand.
    pub fn quarantine(self) -> Result<PathBuf, CoreError> {
        self.finish(SEGMENT_BROKEN_EXT)
    }

    /// Close the handle without renaming; used on cooperative cancellation
    /// so the `.rec` file remains for the next start to discover and
    /// resume.
    pub fn close(self) -> Result<(), CoreError> {
        drop(self.file);
        Ok(())
    }

    fn finish(self, new_ext: &str) -> Result<PathBuf, CoreError> {
        let old_path = self.path.clone();
        drop(self.file);
        let new_path = old_path.with_extension(new_ext);
        fs::rename(&old_path, &new_path).map_err(|source| CoreError::Io {
            path: old_path,
            operation: "rename segment on close",
            source,
        })?;
        Ok(new_path)
    }
}

fn write_row<W: Write>(writer: &mut W, format: SegmentFormat, row: &Row) -> Result<(), crate::util::error::CodecError> {
    match format {
        SegmentFormat::Binary => codec::write_binary_row(writer, row),
        SegmentFormat::Json => {
            let line = codec::encode_json_line(row)?;
            writer.write_all(line.as_bytes())?;
            Ok(())
        }
    }
}

fn read_row<R: Read>(reader: &mut R, format: SegmentFormat, record_index: u64) -> Result<Option<Row>, crate::util::error::CodecError> {
    match format {
        SegmentFormat::Binary => codec::read_binary_row(reader),
        SegmentFormat::Json => {
            let mut line_bytes = Vec::new();
            let mut byte = [0u8; 1];
            loop {
                match reader.read(&mut byte) {
                    Ok(0) => {
                        return if line_bytes.is_empty() {
                            Ok(None)
                        } else {
                            Err(crate::util::error::CodecError::UnexpectedEof)
                        };
                    }
                    Ok(_) => {
                        if byte[0] == b'\n' {
                            break;
                        }
                        line_bytes.push(byte[0]);
                    }
                    Err(e) => return Err(crate::util::error::CodecError::Io(e)),
                }
            }
            let line = String::from_utf8_lossy(&line_bytes);
            codec::decode_json_line(&line, record_index).map(Some)
        }
    }
}

fn wrap_invalid(path: &Path, record_index: u64, cause: crate::util::error::CodecError) -> CoreError {
    CoreError::InvalidSegment {
        file: path.to_path_buf(),
        record_index,
        cause: Box::new(CoreError::Codec(cause)),
    }
}
