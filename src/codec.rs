//! Encode and decode single records.
//!
//! A record is written in one of two representations, selected with [`FileMode`]:
//!
//! - **Binary**: a 16 byte header (8 byte space-padded name, 4 byte type tag, big-endian
//!   `i32` element count) followed by the data split into blocks of at most
//!   [`ElementKind::max_block_elements`] values. Each block is framed by its byte length
//!   (big-endian `i32`) both before and after the data, as Fortran unformatted I/O does.
//! - **Formatted**: a header line ` 'NAME    ' 'TYPE' count` followed by the values as
//!   whitespace separated text, wrapped at [`ElementKind::formatted_columns`] values per
//!   line. Each block starts on a new line. Floating point values are written with the
//!   shortest digit string that reads back as the identical value.
//!
//! ```
//! use eclformat::arrays::EclArray;
//! use eclformat::codec::{encode, decode, FileMode};
//!
//! let arr = EclArray::new("FIPNUM", vec![1, 2, 3, 4]).unwrap();
//! let bytes = encode(&arr, FileMode::Binary).unwrap();
//! // 16 header bytes, plus one block of 4 values framed by two markers
//! assert_eq!(bytes.len(), 16 + 4 + 16 + 4);
//! assert_eq!(decode(&bytes, FileMode::Binary).unwrap(), arr);
//!
//! let text = encode(&arr, FileMode::Formatted).unwrap();
//! assert_eq!(
//!     String::from_utf8(text).unwrap(),
//!     " 'FIPNUM  ' 'INTE'           4\n           1           2           3           4\n"
//! );
//! ```
//!
//! Encoding and decoding hold no state, so these functions may be called from any
//! number of threads at once.
use std::io::{BufRead, Read, Write};
use std::path::Path;

use log::trace;
use ryu_floating_decimal::d2d;

use crate::arrays::{EclArray, EclData, ElementKind, CHAR_WIDTH, LOGI_FALSE, LOGI_TRUE, NAME_WIDTH};
use crate::ecl_error::{EclError, EclResult};
use crate::parsing;

/// The first line of every formatted file
pub const FORMATTED_MARKER: &str = "ECLFMT 1";

/// Size in bytes of a binary record header
pub const BINARY_HEADER_SIZE: u64 = 16;

/// Size in bytes of one block length marker
pub const MARKER_SIZE: u64 = 4;

// Headers come from untrusted input, so don't reserve more than this up front
const PREALLOC_LIMIT: usize = 1 << 16;

/// Which representation a file or record uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FileMode {
    Binary,
    Formatted
}

impl FileMode {
    /// Guess the mode from a file name.
    ///
    /// ECLIPSE names formatted files with extensions starting with "F" (e.g. `.FUNRST`,
    /// `.FEGRID`) or "A" (e.g. `.A0001`). Any other extension is taken as binary. Returns
    /// `None` if the path has no extension. Prefer [`FileMode::detect`] when the file
    /// contents are available, since this is only a naming convention.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?;
        match ext.chars().next() {
            Some('F') | Some('A') => Some(Self::Formatted),
            Some(_) => Some(Self::Binary),
            None => None,
        }
    }

    /// Detect the mode from the first bytes of a file.
    ///
    /// Formatted files start with the [`FORMATTED_MARKER`] line. Binary files start with
    /// a record header, so bytes 8 to 12 must be a known type tag. An empty input is
    /// treated as a binary file with no records. Anything else is an
    /// [`EclError::FileFormat`].
    pub fn detect(first_bytes: &[u8]) -> EclResult<Self> {
        if first_bytes.is_empty() {
            return Ok(Self::Binary);
        }

        let marker = FORMATTED_MARKER.as_bytes();
        if first_bytes.starts_with(marker) {
            let rest = &first_bytes[marker.len()..];
            if rest.is_empty() || rest[0] == b'\n' || rest[0] == b'\r' {
                return Ok(Self::Formatted);
            }
        }

        if first_bytes.len() >= 12 && ElementKind::from_tag(&first_bytes[8..12]).is_some() {
            return Ok(Self::Binary);
        }

        Err(EclError::FileFormat(
            "file starts with neither a formatted marker line nor a binary record header".to_owned()
        ))
    }

    /// `true` if the mode is `FileMode::Formatted`, `false` otherwise
    pub fn is_formatted(&self) -> bool {
        matches!(self, Self::Formatted)
    }
}

/// The name, kind, and element count at the start of every record
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RecordHeader {
    pub name: String,
    pub kind: ElementKind,
    pub count: usize,
}

impl RecordHeader {
    fn check_mess(&self) -> EclResult<()> {
        if self.kind.is_mess() && self.count > 0 {
            Err(EclError::corrupt(&self.name, format!("MESS record declares {} elements, must be 0", self.count)))
        } else {
            Ok(())
        }
    }
}


// ------- //
// Encoder //
// ------- //

/// Encode one array into a new byte buffer.
pub fn encode(array: &EclArray, mode: FileMode) -> EclResult<Vec<u8>> {
    let mut buf = vec![];
    encode_to(array, mode, &mut buf)?;
    Ok(buf)
}

/// Encode one array, writing the bytes to `writer`.
///
/// Returns an [`EclError::Format`] if the array breaks the format's rules (see
/// [`EclArray::new`]) or has more elements than fit in an `i32` count, and an
/// [`EclError::Io`] if writing fails.
pub fn encode_to<W: Write>(array: &EclArray, mode: FileMode, mut writer: W) -> EclResult<()> {
    array.validate()?;
    if i32::try_from(array.count()).is_err() {
        return Err(EclError::Format(format!(
            "array '{}' has {} elements, more than a record can hold", array.name(), array.count()
        )));
    }

    trace!("encoding {} {} x {} ({mode:?})", array.name(), array.kind(), array.count());
    match mode {
        FileMode::Binary => write_binary(array, &mut writer),
        FileMode::Formatted => write_formatted(array, &mut writer),
    }
}

fn padded(s: &str, width: usize) -> String {
    let mut p = String::with_capacity(width.max(s.len()));
    p.push_str(s);
    for _ in s.len()..width {
        p.push(' ');
    }
    p
}

fn write_binary<W: Write>(array: &EclArray, w: &mut W) -> EclResult<()> {
    let kind = array.kind();
    let mut header = [b' '; BINARY_HEADER_SIZE as usize];
    header[..array.name().len()].copy_from_slice(array.name().as_bytes());
    header[8..12].copy_from_slice(kind.tag().as_bytes());
    // the count was checked against i32::MAX by the caller
    header[12..16].copy_from_slice(&(array.count() as i32).to_be_bytes());
    w.write_all(&header)?;

    match array.data() {
        EclData::Inte(v) => write_blocks(w, v, kind, |x, buf| buf.extend_from_slice(&x.to_be_bytes())),
        EclData::Real(v) => write_blocks(w, v, kind, |x, buf| buf.extend_from_slice(&x.to_be_bytes())),
        EclData::Doub(v) => write_blocks(w, v, kind, |x, buf| buf.extend_from_slice(&x.to_be_bytes())),
        EclData::Logi(v) => write_blocks(w, v, kind, |x, buf| {
            let word = if *x { LOGI_TRUE } else { LOGI_FALSE };
            buf.extend_from_slice(&word.to_be_bytes())
        }),
        EclData::Char(v) => write_blocks(w, v, kind, |x, buf| buf.extend_from_slice(padded(x, CHAR_WIDTH).as_bytes())),
        EclData::Mess => Ok(()),
    }
}

fn write_blocks<W, T, F>(w: &mut W, values: &[T], kind: ElementKind, put: F) -> EclResult<()>
where W: Write,
      F: Fn(&T, &mut Vec<u8>)
{
    let mut buf = Vec::with_capacity(kind.max_block_elements().min(values.len()) * kind.element_width());
    for block in values.chunks(kind.max_block_elements()) {
        buf.clear();
        for value in block {
            put(value, &mut buf);
        }

        // A block is at most 8000 doubles, so its byte length always fits an i32
        let marker = (buf.len() as i32).to_be_bytes();
        w.write_all(&marker)?;
        w.write_all(&buf)?;
        w.write_all(&marker)?;
    }
    Ok(())
}

fn write_formatted<W: Write>(array: &EclArray, w: &mut W) -> EclResult<()> {
    let kind = array.kind();
    writeln!(w, " '{}' '{}' {:>11}", padded(array.name(), NAME_WIDTH), kind.tag(), array.count())?;

    match array.data() {
        EclData::Inte(v) => write_lines(w, v, kind, |x| itoa::Buffer::new().format(*x).to_owned()),
        EclData::Real(v) => write_lines(w, v, kind, |x| format_real(*x)),
        EclData::Doub(v) => write_lines(w, v, kind, |x| format_double(*x)),
        EclData::Logi(v) => write_lines(w, v, kind, |x| if *x { "T".to_owned() } else { "F".to_owned() }),
        EclData::Char(v) => write_lines(w, v, kind, |x| format!("'{}'", padded(x, CHAR_WIDTH))),
        EclData::Mess => Ok(()),
    }
}

fn write_lines<W, T, F>(w: &mut W, values: &[T], kind: ElementKind, token: F) -> EclResult<()>
where W: Write,
      F: Fn(&T) -> String
{
    // Every token gets at least one separating space, even if it overflows its column
    let width = kind.formatted_width() - 1;
    for block in values.chunks(kind.max_block_elements()) {
        for line in block.chunks(kind.formatted_columns()) {
            for value in line {
                write!(w, " {:>width$}", token(value))?;
            }
            writeln!(w)?;
        }
    }
    Ok(())
}

/// The decimal digits of `v` (no trailing zeros) and the exponent `e` such that
/// `v == 0.digits * 10^e`. `v` must be finite and nonzero.
fn decimal_digits(v: f64) -> (String, i32) {
    let fd = d2d(v.abs());
    let mut b = itoa::Buffer::new();
    let digits = b.format(fd.mantissa);
    let exponent = fd.exponent + digits.len() as i32;
    (digits.trim_end_matches('0').to_owned(), exponent)
}

/// Round a digit string to at most `n` digits, returning the new digits (no trailing
/// zeros) and how much the exponent must grow by (1 if rounding carried into a new
/// leading digit).
fn round_digits(digits: &str, n: usize) -> (String, i32) {
    if digits.len() <= n {
        return (digits.to_owned(), 0);
    }

    let mut kept: Vec<u8> = digits.as_bytes()[..n].to_vec();
    if digits.as_bytes()[n] >= b'5' {
        let mut i = n;
        loop {
            if i == 0 {
                // every kept digit was a 9
                kept.insert(0, b'1');
                kept.truncate(n);
                let s = String::from_utf8_lossy(&kept).trim_end_matches('0').to_owned();
                return (s, 1);
            }
            i -= 1;
            if kept[i] == b'9' {
                kept[i] = b'0';
            } else {
                kept[i] += 1;
                break;
            }
        }
    }
    (String::from_utf8_lossy(&kept).trim_end_matches('0').to_owned(), 0)
}

fn exp_token(negative: bool, digits: &str, exp_ch: char, exponent: i32) -> String {
    let sign = if negative { "-" } else { "" };
    let exp_sign = if exponent < 0 { '-' } else { '+' };
    let mut b = itoa::Buffer::new();
    let e = b.format(exponent.unsigned_abs());
    let pad = if e.len() < 2 { "0" } else { "" };
    format!("{sign}0.{digits}{exp_ch}{exp_sign}{pad}{e}")
}

/// Prefix of the token for a NaN other than the default quiet NaN, followed by its bits in hex
pub(crate) const NAN_BITS_PREFIX: &str = "NaN:0x";

fn infinite_token(v: f64) -> Option<String> {
    if v.is_infinite() {
        Some(if v > 0.0 { "Inf".to_owned() } else { "-Inf".to_owned() })
    } else {
        None
    }
}

/// Format a double as e.g. "0.1D+00", with exactly enough digits to read back the same value
pub(crate) fn format_double(v: f64) -> String {
    if v.is_nan() {
        // Only the default NaN may lose its bits; sign and payload are kept otherwise
        return if v.to_bits() == f64::NAN.to_bits() {
            "NaN".to_owned()
        } else {
            format!("{NAN_BITS_PREFIX}{:016x}", v.to_bits())
        };
    }
    if let Some(s) = infinite_token(v) {
        return s;
    }
    if v == 0.0 {
        return exp_token(v.is_sign_negative(), "0", 'D', 0);
    }

    let (digits, exponent) = decimal_digits(v);
    exp_token(v.is_sign_negative(), &digits, 'D', exponent)
}

/// Format a float as e.g. "0.1E+00", with exactly enough digits to read back the same value
pub(crate) fn format_real(v: f32) -> String {
    if v.is_nan() {
        return if v.to_bits() == f32::NAN.to_bits() {
            "NaN".to_owned()
        } else {
            format!("{NAN_BITS_PREFIX}{:08x}", v.to_bits())
        };
    }
    let wide = v as f64;
    if let Some(s) = infinite_token(wide) {
        return s;
    }
    if v == 0.0 {
        return exp_token(v.is_sign_negative(), "0", 'E', 0);
    }

    // The shortest digits for the f64 are usually longer than an f32 needs. Nine
    // significant digits always identify an f32, so one of these must read back.
    let (digits, exponent) = decimal_digits(wide);
    for n in 1..=9 {
        let (short, carry) = round_digits(&digits, n);
        let candidate = exp_token(v.is_sign_negative(), &short, 'E', exponent + carry);
        if matches!(parsing::parse_real(&candidate), Ok(back) if back.to_bits() == v.to_bits()) {
            return candidate;
        }
    }
    exp_token(v.is_sign_negative(), &digits, 'E', exponent)
}


// ------- //
// Decoder //
// ------- //

/// Decode one array from a byte buffer.
pub fn decode(bytes: &[u8], mode: FileMode) -> EclResult<EclArray> {
    let mut reader = bytes;
    decode_from(&mut reader, mode)
}

/// Decode the next array from `reader`, leaving it positioned just after the record.
///
/// In binary mode, returns an [`EclError::CorruptRecord`] if a block's leading and
/// trailing length markers differ, if a block does not hold the expected number of
/// values, or if the input ends before the record is complete. In formatted mode,
/// returns an [`EclError::Parse`] if a value cannot be read as the declared kind.
/// However the data were split into blocks, a single logical array is returned.
pub fn decode_from<R: BufRead>(reader: &mut R, mode: FileMode) -> EclResult<EclArray> {
    let arr = match mode {
        FileMode::Binary => {
            let header = read_binary_header(reader)?;
            let data = read_binary_payload(reader, &header)?;
            EclArray::from_raw(header.name, data)
        },
        FileMode::Formatted => {
            let header = read_formatted_header(reader, true)?;
            let data = read_formatted_payload(reader, &header)?;
            EclArray::from_raw(header.name, data)
        },
    };
    trace!("decoded {} {} x {}", arr.name(), arr.kind(), arr.count());
    Ok(arr)
}

/// Map an early end of input to a corrupt record error, keep other I/O errors as they are
fn eof_is_corrupt(e: std::io::Error, name: &str, what: &str) -> EclError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        EclError::corrupt(name, format!("input ended while reading {what}"))
    } else {
        EclError::Io(e)
    }
}

/// Read a 16 byte binary record header.
pub(crate) fn read_binary_header<R: Read>(reader: &mut R) -> EclResult<RecordHeader> {
    let mut buf = [0u8; BINARY_HEADER_SIZE as usize];
    reader.read_exact(&mut buf).map_err(|e| eof_is_corrupt(e, "", "the record header"))?;
    parse_binary_header(&buf)
}

pub(crate) fn parse_binary_header(buf: &[u8; BINARY_HEADER_SIZE as usize]) -> EclResult<RecordHeader> {
    let name = String::from_utf8_lossy(&buf[..8]).trim_end().to_owned();
    let kind = ElementKind::from_tag(&buf[8..12])
        .ok_or_else(|| EclError::corrupt(&name, format!("unknown array type '{}'", String::from_utf8_lossy(&buf[8..12]))))?;
    let count = i32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]);
    let count = usize::try_from(count)
        .map_err(|_| EclError::corrupt(&name, format!("negative element count {count}")))?;

    let header = RecordHeader { name, kind, count };
    header.check_mess()?;
    Ok(header)
}

fn read_marker<R: Read>(reader: &mut R, name: &str) -> EclResult<i32> {
    let mut buf = [0u8; MARKER_SIZE as usize];
    reader.read_exact(&mut buf).map_err(|e| eof_is_corrupt(e, name, "a block length marker"))?;
    Ok(i32::from_be_bytes(buf))
}

/// Read the blocks that follow a binary header and join them into one buffer.
pub(crate) fn read_binary_payload<R: Read>(reader: &mut R, header: &RecordHeader) -> EclResult<EclData> {
    let RecordHeader { name, kind, count } = header;
    let mut data = EclData::with_capacity(*kind, (*count).min(PREALLOC_LIMIT));
    let width = kind.element_width();
    let max = kind.max_block_elements();

    let mut buf = vec![];
    let mut rest = *count;
    let mut block = 0;
    while rest > 0 {
        let expected = rest.min(max);
        let head = read_marker(reader, name)?;
        if usize::try_from(head).ok() != Some(expected * width) {
            return Err(EclError::corrupt(name, format!(
                "block {block} has leading length marker {head}, expected {} ({expected} values of {width} bytes)", expected * width
            )));
        }

        buf.resize(expected * width, 0);
        reader.read_exact(&mut buf).map_err(|e| eof_is_corrupt(e, name, "block data"))?;

        let tail = read_marker(reader, name)?;
        if tail != head {
            return Err(EclError::corrupt(name, format!(
                "block {block} has trailing length marker {tail}, which does not match its leading marker {head}"
            )));
        }

        append_be_values(&mut data, &buf, name)?;
        rest -= expected;
        block += 1;
    }

    Ok(data)
}

fn append_be_values(data: &mut EclData, bytes: &[u8], name: &str) -> EclResult<()> {
    match data {
        EclData::Inte(v) => v.extend(bytes.chunks_exact(4).map(|c| i32::from_be_bytes([c[0], c[1], c[2], c[3]]))),
        EclData::Real(v) => v.extend(bytes.chunks_exact(4).map(|c| f32::from_be_bytes([c[0], c[1], c[2], c[3]]))),
        EclData::Doub(v) => v.extend(bytes.chunks_exact(8).map(|c| {
            f64::from_be_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]])
        })),
        EclData::Logi(v) => {
            for c in bytes.chunks_exact(4) {
                let word = u32::from_be_bytes([c[0], c[1], c[2], c[3]]);
                // Some writers use 1 rather than all bits set for true
                let b = match word {
                    LOGI_FALSE => false,
                    LOGI_TRUE | 1 => true,
                    _ => return Err(EclError::corrupt(name, format!("{word:#x} is not a valid LOGI value")))
                };
                v.push(b);
            }
        },
        EclData::Char(v) => {
            for c in bytes.chunks_exact(CHAR_WIDTH) {
                let s = std::str::from_utf8(c)
                    .map_err(|e| EclError::corrupt(name, format!("CHAR value is not valid text: {e}")))?;
                v.push(s.trim_end().to_owned());
            }
        },
        EclData::Mess => (),
    }
    Ok(())
}

/// Read a formatted header line. If `skip_marker` is true, a leading
/// [`FORMATTED_MARKER`] line is passed over first.
pub(crate) fn read_formatted_header<R: BufRead>(reader: &mut R, skip_marker: bool) -> EclResult<RecordHeader> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(EclError::corrupt("", "input ended before the record header"));
        }
        let trimmed = parsing::strip_newline(&line);
        if skip_marker && trimmed == FORMATTED_MARKER {
            continue;
        }
        break;
    }

    parse_formatted_header(&line)
}

/// Parse one formatted header line.
pub(crate) fn parse_formatted_header(line: &str) -> EclResult<RecordHeader> {
    let header = parsing::parse_header(line)?;
    header.check_mess()?;
    Ok(header)
}

/// Read the value lines that follow a formatted header.
pub(crate) fn read_formatted_payload<R: BufRead>(reader: &mut R, header: &RecordHeader) -> EclResult<EclData> {
    let RecordHeader { name, kind, count } = header;
    let mut data = EclData::with_capacity(*kind, (*count).min(PREALLOC_LIMIT));
    let mut line = String::new();
    let mut n = 0;

    while n < *count {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(EclError::corrupt(name, format!("input ended after {n} of {count} values")));
        }

        n += match &mut data {
            EclData::Inte(v) => push_tokens(&line, v, parsing::parse_integer)?,
            EclData::Real(v) => push_tokens(&line, v, parsing::parse_real)?,
            EclData::Doub(v) => push_tokens(&line, v, parsing::parse_double)?,
            EclData::Logi(v) => push_tokens(&line, v, parsing::parse_logical)?,
            EclData::Char(v) => parsing::parse_char_line(&line, v)?,
            EclData::Mess => 0,
        };
    }

    if n > *count {
        return Err(EclError::corrupt(name, format!("found {n} values, but the header declares {count}")));
    }

    Ok(data)
}

fn push_tokens<T>(line: &str, out: &mut Vec<T>, parse: fn(&str) -> EclResult<T>) -> EclResult<usize> {
    let mut n = 0;
    for token in line.split_ascii_whitespace() {
        out.push(parse(token)?);
        n += 1;
    }
    Ok(n)
}
