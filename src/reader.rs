//! Random access to the records of an existing ECLIPSE array file.
//!
//! Opening a file with [`EclFile::open`] scans it once to build a directory of every
//! record's name, kind, element count and byte offset. Only headers are read during
//! the scan; record payloads are skipped over and decoded later, on demand, by
//! [`EclFile::get`] and friends:
//!
//! ```no_run
//! use eclformat::reader::EclFile;
//!
//! let f = EclFile::open("CASE.INIT").unwrap();
//! for entry in f.entries() {
//!     println!("{:<8} {} {}", entry.name, entry.kind, entry.count);
//! }
//! let poro = f.get_by_name("PORO").unwrap();
//! let poro = poro.as_real().unwrap();
//! ```
//!
//! If a record is damaged, only requests for that record fail (with
//! [`EclError::CorruptRecord`]); the directory and every other record stay usable.
//!
//! # Threads
//!
//! An [`EclFile`] can be shared between threads. Each read seeks and reads under a
//! lock on the file handle, so reads from different threads are serialized but never
//! interleave. Directory queries do not take the lock.
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, trace, warn};
use lru::LruCache;
use parking_lot::Mutex;

use crate::arrays::{EclArray, ElementKind};
use crate::codec::{self, FileMode, RecordHeader, BINARY_HEADER_SIZE};
use crate::ecl_error::{EclError, EclResult};

/// Settings for opening a file
///
/// To use, instantiate the default version with `ReaderSettings::default()` and
/// modify the desired settings with the public methods:
///
/// ```
/// # use eclformat::reader::ReaderSettings;
/// # use eclformat::codec::FileMode;
/// let settings = ReaderSettings::default()
///     .cache_capacity(16)
///     .mode(FileMode::Binary);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ReaderSettings {
    cache_capacity: Option<NonZeroUsize>,
    mode: Option<FileMode>,
}

impl ReaderSettings {
    /// Keep up to `n` decoded arrays in memory, evicting the least recently used.
    ///
    /// Default is 0, i.e. no caching: every request decodes the record again.
    pub fn cache_capacity(mut self, n: usize) -> Self {
        self.cache_capacity = NonZeroUsize::new(n);
        self
    }

    /// Treat the file as this mode rather than detecting it from the first bytes.
    pub fn mode(mut self, mode: FileMode) -> Self {
        self.mode = Some(mode);
        self
    }
}

/// Directory information for one record, available without decoding it
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DirectoryEntry {
    pub name: String,
    pub kind: ElementKind,
    pub count: usize,
    /// Byte offset of the start of the record's header
    pub offset: u64,
    /// Number of bytes the record occupies, header included. For a record cut
    /// short by the end of the file, this is the number of bytes actually present.
    pub span: u64,
    pub is_formatted: bool,
}

impl DirectoryEntry {
    fn new(header: RecordHeader, offset: u64, span: u64, is_formatted: bool) -> Self {
        let RecordHeader { name, kind, count } = header;
        Self { name, kind, count, offset, span, is_formatted }
    }
}

/// An open ECLIPSE array file with its record directory
#[derive(Debug)]
pub struct EclFile {
    path: PathBuf,
    mode: FileMode,
    file_size: u64,
    entries: Vec<DirectoryEntry>,
    names: HashMap<String, Vec<usize>>,
    file: Mutex<File>,
    cache: Option<Mutex<LruCache<usize, Arc<EclArray>>>>,
}

impl EclFile {
    /// Open a file and build its directory, detecting whether it is binary or formatted.
    ///
    /// Returns an [`EclError::FileFormat`] if the file does not start with a record
    /// header or formatted marker, or if a header partway through cannot be read.
    /// No partial directory is returned in that case.
    pub fn open<P: AsRef<Path>>(path: P) -> EclResult<Self> {
        Self::open_custom(path, ReaderSettings::default())
    }

    /// Open a file with customized settings; see [`ReaderSettings`].
    pub fn open_custom<P: AsRef<Path>>(path: P, settings: ReaderSettings) -> EclResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let file_size = file.metadata()?.len();

        let mode = match settings.mode {
            Some(m) => m,
            None => {
                let mut first = Vec::with_capacity(BINARY_HEADER_SIZE as usize);
                (&mut file).take(BINARY_HEADER_SIZE).read_to_end(&mut first)?;
                file.seek(SeekFrom::Start(0))?;
                FileMode::detect(&first)?
            }
        };

        let entries = match mode {
            FileMode::Binary => scan_binary(&mut file, file_size)?,
            FileMode::Formatted => scan_formatted(&mut file)?,
        };

        let mut names: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, entry) in entries.iter().enumerate() {
            names.entry(entry.name.clone()).or_default().push(i);
        }

        let cache = settings.cache_capacity.map(|n| Mutex::new(LruCache::new(n)));
        debug!("opened {} ({mode:?}, {file_size} bytes): {} records", path.display(), entries.len());
        Ok(Self { path, mode, file_size, entries, names, file: Mutex::new(file), cache })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> FileMode {
        self.mode
    }

    /// Size of the file in bytes when it was opened
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Number of records in the file
    pub fn record_count(&self) -> usize {
        self.entries.len()
    }

    /// All directory entries, in file order
    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> EclResult<&DirectoryEntry> {
        self.entries.get(index)
            .ok_or(EclError::IndexOutOfRange { index, len: self.entries.len() })
    }

    /// Name of the record at directory index `index`
    pub fn name_at(&self, index: usize) -> EclResult<&str> {
        self.entry(index).map(|e| e.name.as_str())
    }

    /// `true` if at least one record has this name
    pub fn has_key(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// Directory indices of every record with this name, in file order. Empty if there are none.
    pub fn indices_of(&self, name: &str) -> &[usize] {
        self.names.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Decode the record at directory index `index`.
    ///
    /// Returns an [`EclError::IndexOutOfRange`] for a bad index, and an
    /// [`EclError::CorruptRecord`] if the record's bytes are damaged or disagree
    /// with its directory entry.
    pub fn get(&self, index: usize) -> EclResult<Arc<EclArray>> {
        let entry = self.entry(index)?;

        if let Some(cache) = &self.cache {
            if let Some(arr) = cache.lock().get(&index) {
                trace!("record {index} ({}) served from cache", entry.name);
                return Ok(Arc::clone(arr));
            }
        }

        let arr = Arc::new(self.read_record(entry)?);
        if let Some(cache) = &self.cache {
            cache.lock().put(index, Arc::clone(&arr));
        }
        Ok(arr)
    }

    /// Decode the last record with this name, or return an [`EclError::KeyNotFound`].
    pub fn get_by_name(&self, name: &str) -> EclResult<Arc<EclArray>> {
        let index = self.indices_of(name).last()
            .ok_or_else(|| EclError::KeyNotFound(name.to_owned()))?;
        self.get(*index)
    }

    /// Decode the `occurrence`-th record (counting from 0) with this name.
    pub fn get_nth(&self, name: &str, occurrence: usize) -> EclResult<Arc<EclArray>> {
        let indices = self.indices_of(name);
        if indices.is_empty() {
            return Err(EclError::KeyNotFound(name.to_owned()));
        }
        let index = indices.get(occurrence)
            .ok_or(EclError::IndexOutOfRange { index: occurrence, len: indices.len() })?;
        self.get(*index)
    }

    /// Decode every record in the file, in order. Stops at the first record that fails.
    pub fn load_all(&self) -> EclResult<Vec<Arc<EclArray>>> {
        (0..self.entries.len()).map(|i| self.get(i)).collect()
    }

    fn read_record(&self, entry: &DirectoryEntry) -> EclResult<EclArray> {
        let arr = {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(entry.offset))?;
            let mut reader = BufReader::new((&mut *file).take(entry.span));
            codec::decode_from(&mut reader, self.mode)
        }.map_err(|e| match e {
            // The directory knows the name even when the header bytes are damaged
            EclError::CorruptRecord { name, reason } if name.is_empty() => EclError::corrupt(&entry.name, reason),
            other => other,
        })?;

        if arr.name() != entry.name || arr.kind() != entry.kind || arr.count() != entry.count {
            return Err(EclError::corrupt(&entry.name, format!(
                "decoded as {} {} x {}, but the directory lists {} x {}",
                arr.name(), arr.kind(), arr.count(), entry.kind, entry.count
            )));
        }

        trace!("read {} {} x {} from byte {}", entry.name, entry.kind, entry.count, entry.offset);
        Ok(arr)
    }
}

/// A header that cannot be read makes the whole file unusable; failures of the
/// file itself stay I/O errors
fn scan_error(index: usize, offset: u64, e: EclError) -> EclError {
    match e {
        EclError::Io(_) => e,
        other => EclError::FileFormat(format!("cannot read header of record {index} at byte {offset}: {other}")),
    }
}

/// Build the directory of a binary file from its headers alone
fn scan_binary(file: &mut File, file_size: u64) -> EclResult<Vec<DirectoryEntry>> {
    let mut reader = BufReader::new(file);
    let mut entries = vec![];
    let mut offset = 0;

    while offset < file_size {
        let index = entries.len();
        if file_size - offset < BINARY_HEADER_SIZE {
            return Err(scan_error(index, offset, EclError::corrupt("", format!(
                "only {} bytes remain, a header needs {BINARY_HEADER_SIZE}", file_size - offset
            ))));
        }

        let header = codec::read_binary_header(&mut reader).map_err(|e| scan_error(index, offset, e))?;
        let span = BINARY_HEADER_SIZE + header.kind.binary_payload_size(header.count);
        let available = file_size - offset;
        if span > available {
            warn!(
                "record {index} ({}) needs {span} bytes but only {available} remain in the file; stopping the scan there",
                header.name
            );
            entries.push(DirectoryEntry::new(header, offset, available, false));
            break;
        }

        entries.push(DirectoryEntry::new(header, offset, span, false));
        offset += span;
        reader.seek_relative((span - BINARY_HEADER_SIZE) as i64)?;
    }

    Ok(entries)
}

/// Build the directory of a formatted file by reading each header line and skipping
/// the number of data lines its count implies.
fn scan_formatted(file: &mut File) -> EclResult<Vec<DirectoryEntry>> {
    let mut reader = BufReader::new(file);
    let mut entries = vec![];
    let mut buf = vec![];

    let mut offset = reader.read_until(b'\n', &mut buf)? as u64;
    let first = buf.strip_suffix(b"\n").unwrap_or(&buf);
    let first = first.strip_suffix(b"\r").unwrap_or(first);
    if first != codec::FORMATTED_MARKER.as_bytes() {
        return Err(EclError::FileFormat(format!("first line is not '{}'", codec::FORMATTED_MARKER)));
    }

    loop {
        let index = entries.len();
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf)? as u64;
        if n == 0 {
            break;
        }
        if buf.iter().all(|b| b.is_ascii_whitespace()) {
            offset += n;
            continue;
        }

        let line = std::str::from_utf8(&buf)
            .map_err(|e| scan_error(index, offset, EclError::corrupt("", e.to_string())))?;
        let header = codec::parse_formatted_header(line).map_err(|e| scan_error(index, offset, e))?;

        let mut span = n;
        let lines = header.kind.formatted_line_count(header.count);
        let mut complete = true;
        for _ in 0..lines {
            buf.clear();
            let n = reader.read_until(b'\n', &mut buf)? as u64;
            if n == 0 {
                complete = false;
                break;
            }
            span += n;
        }

        if !complete {
            warn!("record {index} ({}) is cut short by the end of the file; stopping the scan there", header.name);
            entries.push(DirectoryEntry::new(header, offset, span, true));
            break;
        }

        entries.push(DirectoryEntry::new(header, offset, span, true));
        offset += span;
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::EclWriter;

    fn poro() -> EclArray {
        EclArray::new("PORO", vec![0.1_f32, 0.2, 0.3, 0.4]).unwrap()
    }

    fn fipnum() -> EclArray {
        EclArray::new("FIPNUM", vec![1, 2, 3, 4]).unwrap()
    }

    fn write_file(path: &Path, mode: FileMode, arrays: &[EclArray]) -> EclResult<()> {
        let mut w = EclWriter::create(path, mode)?;
        for arr in arrays {
            w.write(arr)?;
        }
        w.close()
    }

    #[test]
    fn test_poro_fipnum() -> EclResult<()> {
        let dir = tempfile::tempdir()?;
        for (file_name, mode) in [("CASE.INIT", FileMode::Binary), ("CASE.FINIT", FileMode::Formatted)] {
            let path = dir.path().join(file_name);
            write_file(&path, mode, &[poro(), fipnum()])?;

            let f = EclFile::open(&path)?;
            assert_eq!(f.mode(), mode);
            assert_eq!(f.record_count(), 2, "Wrong record count for {mode:?}");

            let p = f.get_by_name("PORO")?;
            assert_eq!(p.kind(), ElementKind::Real);
            assert_eq!(p.as_real(), Some(&[0.1_f32, 0.2, 0.3, 0.4][..]), "Wrong PORO values for {mode:?}");

            let n = f.get_by_name("FIPNUM")?;
            assert_eq!(n.kind(), ElementKind::Inte);
            assert_eq!(n.as_inte(), Some(&[1, 2, 3, 4][..]), "Wrong FIPNUM values for {mode:?}");
        }
        Ok(())
    }

    #[test]
    fn test_directory() -> EclResult<()> {
        let dir = tempfile::tempdir()?;
        let arrays = vec![
            EclArray::new("SEQNUM", vec![1])?,
            EclArray::new("PRESSURE", vec![250.0_f64; 9000])?,
            EclArray::message("STARTSOL")?,
            EclArray::new("ZWEL", vec!["OP_1", "OP_2"])?,
            EclArray::new("SEQNUM", vec![2])?,
            EclArray::new("PRESSURE", vec![240.0_f64; 9000])?,
        ];

        for mode in [FileMode::Binary, FileMode::Formatted] {
            let path = dir.path().join("CASE.X0000");
            write_file(&path, mode, &arrays)?;
            let f = EclFile::open_custom(&path, ReaderSettings::default().mode(mode))?;

            assert_eq!(f.record_count(), arrays.len());
            for (i, arr) in arrays.iter().enumerate() {
                assert_eq!(f.name_at(i)?, arr.name(), "Wrong name at {i} for {mode:?}");
                assert_eq!(f.entries()[i].kind, arr.kind());
                assert_eq!(f.entries()[i].count, arr.count());
                assert_eq!(f.entries()[i].is_formatted, mode.is_formatted());
            }

            let last = f.entries().last().unwrap();
            assert_eq!(last.offset + last.span, f.file_size(), "Directory does not cover the file for {mode:?}");

            assert!(f.has_key("ZWEL"));
            assert!(!f.has_key("SWAT"));
            assert_eq!(f.indices_of("PRESSURE"), &[1, 5]);
            assert_eq!(f.get_by_name("PRESSURE")?.as_doub().unwrap()[0], 240.0, "get_by_name did not return the last record");
            assert_eq!(f.get_nth("PRESSURE", 0)?.as_doub().unwrap()[0], 250.0);
            assert_eq!(f.load_all()?.iter().map(|a| (**a).clone()).collect::<Vec<_>>(), arrays);

            assert!(matches!(f.get(6), Err(EclError::IndexOutOfRange { index: 6, len: 6 })));
            assert!(matches!(f.get_by_name("SWAT"), Err(EclError::KeyNotFound(_))));
            assert!(matches!(f.get_nth("PRESSURE", 2), Err(EclError::IndexOutOfRange { index: 2, len: 2 })));
        }
        Ok(())
    }

    #[test]
    fn test_corrupt_record_is_isolated() -> EclResult<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("CASE.INIT");
        let arrays = [poro(), fipnum(), EclArray::new("SWAT", vec![0.5_f32; 10])?];
        let first_len = codec::encode(&arrays[0], FileMode::Binary)?.len();
        let second_len = codec::encode(&arrays[1], FileMode::Binary)?.len();

        // leading, then trailing, marker of the middle record's only block
        for marker_byte in [first_len + 16 + 3, first_len + second_len - 1] {
            write_file(&path, FileMode::Binary, &arrays)?;
            let mut bytes = std::fs::read(&path)?;
            bytes[marker_byte] ^= 0x10;
            std::fs::write(&path, &bytes)?;

            let f = EclFile::open(&path)?;
            assert_eq!(f.record_count(), 3);
            let e = f.get(1).unwrap_err();
            assert!(e.is_corrupt_record(), "Flipped marker at byte {marker_byte} gave {e}");
            assert_eq!(*f.get(0)?, arrays[0]);
            assert_eq!(*f.get(2)?, arrays[2]);
        }
        Ok(())
    }

    #[test]
    fn test_truncated_last_record() -> EclResult<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("CASE.INIT");
        write_file(&path, FileMode::Binary, &[poro(), fipnum()])?;
        let bytes = std::fs::read(&path)?;
        std::fs::write(&path, &bytes[..bytes.len() - 5])?;

        let f = EclFile::open(&path)?;
        assert_eq!(f.record_count(), 2);
        assert_eq!(*f.get(0)?, poro());
        assert!(f.get(1).unwrap_err().is_corrupt_record());

        let path = dir.path().join("CASE.FINIT");
        write_file(&path, FileMode::Formatted, &[poro(), fipnum()])?;
        let text = std::fs::read_to_string(&path)?;
        let cut = text.trim_end().rfind('\n').unwrap() + 1;
        std::fs::write(&path, &text[..cut])?;

        let f = EclFile::open(&path)?;
        assert_eq!(f.record_count(), 2);
        assert_eq!(*f.get(0)?, poro());
        assert!(f.get(1).unwrap_err().is_corrupt_record());
        Ok(())
    }

    #[test]
    fn test_bad_files() -> EclResult<()> {
        let dir = tempfile::tempdir()?;

        let path = dir.path().join("EMPTY.INIT");
        std::fs::write(&path, b"")?;
        assert_eq!(EclFile::open(&path)?.record_count(), 0);

        let path = dir.path().join("NOTES.TXT");
        std::fs::write(&path, b"these are not the records you are looking for\n")?;
        assert!(EclFile::open(&path).unwrap_err().is_file_format());

        let path = dir.path().join("PARTIAL.INIT");
        let mut bytes = codec::encode(&poro(), FileMode::Binary)?;
        bytes.extend_from_slice(b"FIPNUM  IN");
        std::fs::write(&path, &bytes)?;
        assert!(EclFile::open(&path).unwrap_err().is_file_format(), "Partial trailing header was accepted");

        let path = dir.path().join("BADTAG.INIT");
        let mut bytes = codec::encode(&poro(), FileMode::Binary)?;
        bytes.extend(codec::encode(&fipnum(), FileMode::Binary)?);
        let n = bytes.len();
        bytes[n - 40 + 8..n - 40 + 12].copy_from_slice(b"XXXX");
        std::fs::write(&path, &bytes)?;
        assert!(EclFile::open(&path).unwrap_err().is_file_format(), "Unknown tag mid-file was accepted");

        let path = dir.path().join("BADHEAD.FINIT");
        std::fs::write(&path, "ECLFMT 1\n 'PORO    ' 'REAL'           1\n  0.1E+00\n PORO REAL 1\n")?;
        assert!(EclFile::open(&path).unwrap_err().is_file_format(), "Bad formatted header was accepted");
        Ok(())
    }

    #[test]
    fn test_scan_keeps_io_errors() {
        let e = scan_error(3, 48, EclError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk went away")));
        assert!(matches!(e, EclError::Io(_)), "I/O error during the scan became {e}");

        let e = scan_error(3, 48, EclError::corrupt("", "unknown array type 'XXXX'"));
        assert!(e.is_file_format());

        let e = EclFile::open("/nonexistent/dir/CASE.INIT").unwrap_err();
        assert!(matches!(e, EclError::Io(_)), "Opening a missing file gave {e}");
    }

    #[test]
    fn test_cache() -> EclResult<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("CASE.INIT");
        write_file(&path, FileMode::Binary, &[poro(), fipnum()])?;

        let f = EclFile::open_custom(&path, ReaderSettings::default().cache_capacity(1))?;
        let a = f.get(0)?;
        let b = f.get(0)?;
        assert!(Arc::ptr_eq(&a, &b), "Second read did not come from the cache");
        let _ = f.get(1)?;
        let c = f.get(0)?;
        assert!(!Arc::ptr_eq(&a, &c), "Record was not evicted from a cache of size 1");
        assert_eq!(a, c);

        let f = EclFile::open(&path)?;
        assert!(!Arc::ptr_eq(&f.get(0)?, &f.get(0)?), "Records were cached by default");
        Ok(())
    }

    #[test]
    fn test_shared_between_threads() -> EclResult<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("CASE.INIT");
        let arrays: Vec<EclArray> = (0..20_i32)
            .map(|i| EclArray::new(format!("A{i}"), vec![i; 5000]))
            .collect::<EclResult<_>>()?;
        write_file(&path, FileMode::Binary, &arrays)?;

        let f = EclFile::open(&path)?;
        std::thread::scope(|s| {
            for t in 0..4 {
                let f = &f;
                let arrays = &arrays;
                s.spawn(move || {
                    for i in (0..arrays.len()).rev().skip(t) {
                        let arr = f.get(i).unwrap();
                        assert_eq!(*arr, arrays[i], "Thread {t} read the wrong data for record {i}");
                    }
                });
            }
        });
        Ok(())
    }
}
