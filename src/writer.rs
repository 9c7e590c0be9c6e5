//! Write ECLIPSE array files one record at a time.
//!
//! An [`EclWriter`] only ever appends. Records are buffered, so call
//! [`EclWriter::close`] (or at least [`EclWriter::flush`]) when done and handle the
//! error it returns; dropping the writer flushes too, but silently discards any
//! error.
//!
//! ```no_run
//! use eclformat::arrays::EclArray;
//! use eclformat::codec::FileMode;
//! use eclformat::writer::EclWriter;
//!
//! let mut w = EclWriter::create("CASE.INIT", FileMode::Binary).unwrap();
//! w.write(&EclArray::new("PORO", vec![0.1_f32, 0.2, 0.3, 0.4]).unwrap()).unwrap();
//! w.write(&EclArray::new("FIPNUM", vec![1, 2, 3, 4]).unwrap()).unwrap();
//! w.close().unwrap();
//! ```
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, trace};

use crate::arrays::EclArray;
use crate::codec::{self, FileMode, FORMATTED_MARKER};
use crate::ecl_error::{EclError, EclResult};
use crate::restart::RestartSettings;

/// Sequential writer for one binary or formatted file
#[derive(Debug)]
pub struct EclWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    mode: FileMode,
    records: usize,
}

impl EclWriter {
    /// Create a new file, or truncate an existing one, and prepare to write records
    /// in the given mode. For formatted files, the marker line is written immediately.
    pub fn create<P: AsRef<Path>>(path: P, mode: FileMode) -> EclResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        let mut w = Self { writer: BufWriter::new(file), path, mode, records: 0 };
        if mode.is_formatted() {
            w.write_marker()?;
        }
        debug!("created {} for {mode:?} output", w.path.display());
        Ok(w)
    }

    /// Open an existing file, discard everything from byte `position` onward, and
    /// append new records from there.
    ///
    /// This is how a unified restart file is rewritten from a given report step; see
    /// [`RestartIndex::write_position`](crate::restart::RestartIndex::write_position)
    /// for how to find `position`. If data is kept, it must be in the same mode
    /// as `mode`, else an [`EclError::FileFormat`] is returned. A `position` past the
    /// end of the file is an I/O error with kind `InvalidInput`.
    pub fn open_at<P: AsRef<Path>>(path: P, mode: FileMode, position: u64) -> EclResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len();
        if position > len {
            return Err(EclError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("cannot write at byte {position} of {}, which is only {len} bytes long", path.display())
            )));
        }

        if position > 0 {
            let mut first = Vec::with_capacity(16);
            (&mut file).take(16).read_to_end(&mut first)?;
            let existing = FileMode::detect(&first)?;
            if existing != mode {
                return Err(EclError::FileFormat(format!(
                    "{} holds {existing:?} records, cannot append {mode:?} ones", path.display()
                )));
            }
        }

        file.set_len(position)?;
        file.seek(SeekFrom::End(0))?;

        let mut w = Self { writer: BufWriter::new(file), path, mode, records: 0 };
        if mode.is_formatted() && position == 0 {
            w.write_marker()?;
        }
        debug!("reopened {} at byte {position} for {mode:?} output", w.path.display());
        Ok(w)
    }

    fn write_marker(&mut self) -> EclResult<()> {
        writeln!(self.writer, "{FORMATTED_MARKER}")?;
        Ok(())
    }

    /// Encode `array` and append it to the file.
    ///
    /// On an [`EclError::Format`] nothing is written, so the file stays valid.
    pub fn write(&mut self, array: &EclArray) -> EclResult<()> {
        let bytes = codec::encode(array, self.mode)?;
        self.writer.write_all(&bytes)?;
        self.records += 1;
        trace!("wrote record {} ({}) to {}", self.records - 1, array.name(), self.path.display());
        Ok(())
    }

    /// Append a MESS record with the given name.
    pub fn message<N: AsRef<str>>(&mut self, name: N) -> EclResult<()> {
        self.write(&EclArray::message(name)?)
    }

    /// Start a new report step by writing its sentinel record, which holds the step number.
    pub fn begin_step(&mut self, settings: &RestartSettings, step: i32) -> EclResult<()> {
        self.write(&EclArray::new(settings.sentinel_name(), vec![step])?)
    }

    /// Number of records written since this writer was created or opened
    pub fn records_written(&self) -> usize {
        self.records
    }

    pub fn mode(&self) -> FileMode {
        self.mode
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write any buffered records to the file.
    pub fn flush(&mut self) -> EclResult<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush buffered records and sync the file to disk.
    pub fn close(mut self) -> EclResult<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        debug!("closed {} after {} records", self.path.display(), self.records);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_file_bytes() -> EclResult<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("CASE.INIT");
        let poro = EclArray::new("PORO", vec![0.1_f32, 0.2, 0.3, 0.4])?;
        let fipnum = EclArray::new("FIPNUM", vec![1, 2, 3, 4])?;

        let mut w = EclWriter::create(&path, FileMode::Binary)?;
        w.write(&poro)?;
        w.write(&fipnum)?;
        w.message("ENDSOL")?;
        assert_eq!(w.records_written(), 3);
        w.close()?;

        let mut expected = codec::encode(&poro, FileMode::Binary)?;
        expected.extend(codec::encode(&fipnum, FileMode::Binary)?);
        expected.extend(codec::encode(&EclArray::message("ENDSOL")?, FileMode::Binary)?);
        assert_eq!(std::fs::read(&path)?, expected);
        Ok(())
    }

    #[test]
    fn test_formatted_file_text() -> EclResult<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("CASE.FUNRST");
        let mut w = EclWriter::create(&path, FileMode::Formatted)?;
        w.begin_step(&RestartSettings::default(), 3)?;
        w.write(&EclArray::new("LOGIHEAD", vec![true, false])?)?;
        w.close()?;

        let text = std::fs::read_to_string(&path)?;
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec![
            "ECLFMT 1",
            " 'SEQNUM  ' 'INTE'           1",
            "           3",
            " 'LOGIHEAD' 'LOGI'           2",
            "  T  F",
        ]);
        Ok(())
    }

    #[test]
    fn test_unwritable_path() -> EclResult<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("no_such_dir").join("CASE.INIT");
        let e = EclWriter::create(&path, FileMode::Binary).unwrap_err();
        assert!(matches!(e, EclError::Io(_)), "Creating a file in a missing directory gave {e}");

        let e = EclWriter::open_at(&path, FileMode::Binary, 0).unwrap_err();
        assert!(matches!(e, EclError::Io(_)), "Reopening a missing file gave {e}");
        Ok(())
    }

    #[test]
    fn test_invalid_array_writes_nothing() -> EclResult<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("BAD.INIT");
        let mut w = EclWriter::create(&path, FileMode::Binary)?;
        let bad = EclArray::from_raw("NOT VALID".to_owned(), crate::arrays::EclData::Inte(vec![1]));
        assert!(w.write(&bad).unwrap_err().is_format());
        assert_eq!(w.records_written(), 0);
        w.close()?;
        assert_eq!(std::fs::metadata(&path)?.len(), 0);
        Ok(())
    }

    #[test]
    fn test_open_at_truncates() -> EclResult<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("CASE.UNRST");
        let first = EclArray::new("SEQNUM", vec![1])?;
        let second = EclArray::new("SEQNUM", vec![2])?;
        let replacement = EclArray::new("SEQNUM", vec![5])?;

        let mut w = EclWriter::create(&path, FileMode::Binary)?;
        w.write(&first)?;
        w.write(&second)?;
        w.close()?;

        let keep = codec::encode(&first, FileMode::Binary)?;
        let mut w = EclWriter::open_at(&path, FileMode::Binary, keep.len() as u64)?;
        w.write(&replacement)?;
        w.close()?;

        let mut expected = keep.clone();
        expected.extend(codec::encode(&replacement, FileMode::Binary)?);
        assert_eq!(std::fs::read(&path)?, expected);

        let e = EclWriter::open_at(&path, FileMode::Formatted, keep.len() as u64).unwrap_err();
        assert!(e.is_file_format(), "Appending formatted records to a binary file was allowed");

        let e = EclWriter::open_at(&path, FileMode::Binary, 10_000).unwrap_err();
        assert!(matches!(e, EclError::Io(_)), "Writing past the end of the file was allowed");
        Ok(())
    }

    #[test]
    fn test_open_at_start_of_formatted() -> EclResult<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("CASE.FUNRST");
        std::fs::write(&path, "ECLFMT 1\n 'SEQNUM  ' 'INTE'           1\n            1\n")?;

        let mut w = EclWriter::open_at(&path, FileMode::Formatted, 0)?;
        w.message("STARTSOL")?;
        w.close()?;
        assert_eq!(std::fs::read_to_string(&path)?, "ECLFMT 1\n 'STARTSOL' 'MESS'           0\n");
        Ok(())
    }
}
