//! Represent ECLIPSE records as Rust types.
//!
//! Every record in an ECLIPSE array file is a named, typed array. The element type
//! is one of six kinds, described by [`ElementKind`]; the values themselves are held
//! in an [`EclData`] and the named record in an [`EclArray`]:
//!
//! ```
//! # use eclformat::arrays::{EclArray, ElementKind};
//! let poro = EclArray::new("PORO", vec![0.1_f32, 0.2, 0.3, 0.4]).unwrap();
//! assert_eq!(poro.kind(), ElementKind::Real);
//! assert_eq!(poro.count(), 4);
//! ```
//!
//! Arrays are immutable once built; to change one, build a new array.
use std::fmt::Display;

use crate::ecl_error::{EclError, EclResult};

/// Number of bytes a record name occupies on disk.
pub const NAME_WIDTH: usize = 8;

/// Number of bytes a CHAR element occupies on disk.
pub const CHAR_WIDTH: usize = 8;

/// The bit pattern written for a `true` LOGI value.
pub const LOGI_TRUE: u32 = 0xFFFF_FFFF;

/// The bit pattern written for a `false` LOGI value.
pub const LOGI_FALSE: u32 = 0;

/// The element type of a record.
///
/// The kind fixes the on-disk width of every element and the largest number of
/// elements allowed in one physical block. Those are format constants and must
/// match other readers and writers of the format exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ElementKind {
    /// 32-bit signed integers
    Inte,
    /// 32-bit floats
    Real,
    /// 64-bit floats
    Doub,
    /// 8-character strings
    Char,
    /// Booleans stored as 32-bit words
    Logi,
    /// A message record with no data
    Mess,
}

impl Display for ElementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

impl ElementKind {
    pub const ALL: [ElementKind; 6] = [
        ElementKind::Inte, ElementKind::Real, ElementKind::Doub,
        ElementKind::Char, ElementKind::Logi, ElementKind::Mess
    ];

    /// The 4-character tag written in a record header, e.g. "INTE"
    pub fn tag(&self) -> &'static str {
        match self {
            ElementKind::Inte => "INTE",
            ElementKind::Real => "REAL",
            ElementKind::Doub => "DOUB",
            ElementKind::Char => "CHAR",
            ElementKind::Logi => "LOGI",
            ElementKind::Mess => "MESS",
        }
    }

    /// Look up the kind for a 4-byte header tag. Returns `None` for unknown tags.
    pub fn from_tag(tag: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag().as_bytes() == tag)
    }

    /// Width of one element on disk in bytes (0 for MESS).
    pub fn element_width(&self) -> usize {
        match self {
            ElementKind::Inte => 4,
            ElementKind::Real => 4,
            ElementKind::Doub => 8,
            ElementKind::Char => CHAR_WIDTH,
            ElementKind::Logi => 4,
            ElementKind::Mess => 0,
        }
    }

    /// Largest number of elements written in one physical block (0 for MESS).
    pub fn max_block_elements(&self) -> usize {
        match self {
            ElementKind::Inte => 4000,
            ElementKind::Real => 4000,
            ElementKind::Doub => 8000,
            ElementKind::Char => 840,
            ElementKind::Logi => 4000,
            ElementKind::Mess => 0,
        }
    }

    /// Number of values per line in a formatted file.
    pub fn formatted_columns(&self) -> usize {
        match self {
            ElementKind::Inte => 6,
            ElementKind::Real => 4,
            ElementKind::Doub => 3,
            ElementKind::Char => 7,
            ElementKind::Logi => 25,
            ElementKind::Mess => 1,
        }
    }

    /// Width each value is right-aligned to in a formatted file.
    pub fn formatted_width(&self) -> usize {
        match self {
            ElementKind::Inte => 12,
            ElementKind::Real => 17,
            ElementKind::Doub => 23,
            ElementKind::Char => 11,
            ElementKind::Logi => 3,
            ElementKind::Mess => 0,
        }
    }

    /// Number of physical blocks a record of `count` elements is split into.
    pub fn block_count(&self, count: usize) -> usize {
        if self.is_mess() || count == 0 {
            0
        } else {
            count.div_ceil(self.max_block_elements())
        }
    }

    /// Number of payload bytes (data plus block markers) following the header of
    /// a binary record with `count` elements.
    pub fn binary_payload_size(&self, count: usize) -> u64 {
        let data = (count * self.element_width()) as u64;
        let markers = (self.block_count(count) * 2 * 4) as u64;
        data + markers
    }

    /// Number of data lines following the header line of a formatted record with
    /// `count` elements. Every block starts a new line.
    pub fn formatted_line_count(&self, count: usize) -> usize {
        if self.is_mess() || count == 0 {
            return 0;
        }
        let max = self.max_block_elements();
        let cols = self.formatted_columns();
        let full_blocks = count / max;
        let rest = count % max;
        full_blocks * max.div_ceil(cols) + rest.div_ceil(cols)
    }

    /// `true` if the kind is `ElementKind::Mess`, `false` otherwise
    pub fn is_mess(&self) -> bool {
        matches!(self, Self::Mess)
    }
}


/// The values of one record.
///
/// Note that equality is bitwise for the floating point variants, so an array
/// holding NaNs compares equal to an exact copy of itself and `0.0` differs
/// from `-0.0`.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EclData {
    Inte(Vec<i32>),
    Real(Vec<f32>),
    Doub(Vec<f64>),
    Char(Vec<String>),
    Logi(Vec<bool>),
    Mess,
}

impl PartialEq for EclData {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (EclData::Inte(a), EclData::Inte(b)) => a == b,
            (EclData::Real(a), EclData::Real(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            },
            (EclData::Doub(a), EclData::Doub(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            },
            (EclData::Char(a), EclData::Char(b)) => a == b,
            (EclData::Logi(a), EclData::Logi(b)) => a == b,
            (EclData::Mess, EclData::Mess) => true,
            _ => false
        }
    }
}

impl EclData {
    /// The element kind these values are stored as
    pub fn kind(&self) -> ElementKind {
        match self {
            EclData::Inte(_) => ElementKind::Inte,
            EclData::Real(_) => ElementKind::Real,
            EclData::Doub(_) => ElementKind::Doub,
            EclData::Char(_) => ElementKind::Char,
            EclData::Logi(_) => ElementKind::Logi,
            EclData::Mess => ElementKind::Mess,
        }
    }

    /// Number of elements (always 0 for MESS)
    pub fn len(&self) -> usize {
        match self {
            EclData::Inte(v) => v.len(),
            EclData::Real(v) => v.len(),
            EclData::Doub(v) => v.len(),
            EclData::Char(v) => v.len(),
            EclData::Logi(v) => v.len(),
            EclData::Mess => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create an empty buffer of the given kind with room for `count` elements.
    pub(crate) fn with_capacity(kind: ElementKind, count: usize) -> Self {
        match kind {
            ElementKind::Inte => EclData::Inte(Vec::with_capacity(count)),
            ElementKind::Real => EclData::Real(Vec::with_capacity(count)),
            ElementKind::Doub => EclData::Doub(Vec::with_capacity(count)),
            ElementKind::Char => EclData::Char(Vec::with_capacity(count)),
            ElementKind::Logi => EclData::Logi(Vec::with_capacity(count)),
            ElementKind::Mess => EclData::Mess,
        }
    }
}

impl From<Vec<i32>> for EclData {
    fn from(value: Vec<i32>) -> Self {
        Self::Inte(value)
    }
}

impl From<Vec<f32>> for EclData {
    fn from(value: Vec<f32>) -> Self {
        Self::Real(value)
    }
}

impl From<Vec<f64>> for EclData {
    fn from(value: Vec<f64>) -> Self {
        Self::Doub(value)
    }
}

impl From<Vec<bool>> for EclData {
    fn from(value: Vec<bool>) -> Self {
        Self::Logi(value)
    }
}

impl From<Vec<String>> for EclData {
    fn from(value: Vec<String>) -> Self {
        Self::Char(value)
    }
}

impl From<Vec<&str>> for EclData {
    fn from(value: Vec<&str>) -> Self {
        Self::Char(value.into_iter().map(|s| s.to_owned()).collect())
    }
}


/// One named, typed record.
///
/// Names and CHAR values are padded with spaces on disk; an `EclArray` always holds
/// them with trailing spaces removed, so that reading back a written array gives an
/// equal array.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EclArray {
    name: String,
    data: EclData,
}

impl EclArray {
    /// Build an array from a name and its values.
    ///
    /// Returns an [`EclError::Format`] if:
    /// - the name is empty or longer than 8 bytes, or contains a quote or line break,
    /// - a CHAR value is longer than 8 bytes, or contains a quote or line break, or
    /// - a non-MESS array has no elements.
    pub fn new<N: AsRef<str>, D: Into<EclData>>(name: N, data: D) -> EclResult<Self> {
        let name = name.as_ref().trim_end().to_owned();
        let mut data = data.into();
        if let EclData::Char(values) = &mut data {
            for v in values.iter_mut() {
                let trimmed_len = v.trim_end().len();
                v.truncate(trimmed_len);
            }
        }

        let arr = Self { name, data };
        arr.validate()?;
        Ok(arr)
    }

    /// Build a message (MESS) record, which carries no data.
    pub fn message<N: AsRef<str>>(name: N) -> EclResult<Self> {
        Self::new(name, EclData::Mess)
    }

    /// Build an array from a `(name, kind, count, payload)` tuple supplied by a producer.
    ///
    /// In addition to the checks in [`EclArray::new`], returns an [`EclError::Format`] if
    /// `kind` does not match the payload, or if `count` differs from the payload length.
    pub fn from_parts<N: AsRef<str>>(name: N, kind: ElementKind, count: usize, data: EclData) -> EclResult<Self> {
        if data.kind() != kind {
            return Err(EclError::Format(format!(
                "array '{}' declared as {kind} but its payload holds {} values", name.as_ref(), data.kind()
            )));
        }
        if data.len() != count {
            return Err(EclError::Format(format!(
                "array '{}' declared with {count} elements but its payload holds {}", name.as_ref(), data.len()
            )));
        }
        Self::new(name, data)
    }

    /// Wrap values read from disk. These skip validation so that a file written by
    /// another program with e.g. a blank name can still be read.
    pub(crate) fn from_raw(name: String, data: EclData) -> Self {
        Self { name, data }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ElementKind {
        self.data.kind()
    }

    /// Number of elements in the array
    pub fn count(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &EclData {
        &self.data
    }

    pub fn into_data(self) -> EclData {
        self.data
    }

    /// Check the invariants that `new` enforces. Arrays built through the public
    /// constructors always pass; this also guards arrays deserialized with serde.
    pub(crate) fn validate(&self) -> EclResult<()> {
        check_text(&self.name, "record name", &self.name)?;
        if self.name.is_empty() {
            return Err(EclError::Format("record name is empty".to_owned()));
        }

        match &self.data {
            EclData::Mess => Ok(()),
            data if data.is_empty() => Err(EclError::Format(format!(
                "array '{}' of kind {} has no elements; only MESS records may be empty", self.name, data.kind()
            ))),
            EclData::Char(values) => {
                for v in values {
                    check_text(v, "CHAR value", &self.name)?;
                }
                Ok(())
            },
            _ => Ok(())
        }
    }

    /// Borrow the values as integers, or `None` if this is not an INTE array.
    pub fn as_inte(&self) -> Option<&[i32]> {
        if let EclData::Inte(v) = &self.data { Some(v) } else { None }
    }

    /// Borrow the values as 32-bit floats, or `None` if this is not a REAL array.
    pub fn as_real(&self) -> Option<&[f32]> {
        if let EclData::Real(v) = &self.data { Some(v) } else { None }
    }

    /// Borrow the values as 64-bit floats, or `None` if this is not a DOUB array.
    pub fn as_doub(&self) -> Option<&[f64]> {
        if let EclData::Doub(v) = &self.data { Some(v) } else { None }
    }

    /// Borrow the values as strings, or `None` if this is not a CHAR array.
    pub fn as_char(&self) -> Option<&[String]> {
        if let EclData::Char(v) = &self.data { Some(v) } else { None }
    }

    /// Borrow the values as booleans, or `None` if this is not a LOGI array.
    pub fn as_logi(&self) -> Option<&[bool]> {
        if let EclData::Logi(v) = &self.data { Some(v) } else { None }
    }

    pub fn into_inte(self) -> EclResult<Vec<i32>> {
        match self.data {
            EclData::Inte(v) => Ok(v),
            other => Err(mismatch(self.name, ElementKind::Inte, other.kind()))
        }
    }

    pub fn into_real(self) -> EclResult<Vec<f32>> {
        match self.data {
            EclData::Real(v) => Ok(v),
            other => Err(mismatch(self.name, ElementKind::Real, other.kind()))
        }
    }

    pub fn into_doub(self) -> EclResult<Vec<f64>> {
        match self.data {
            EclData::Doub(v) => Ok(v),
            other => Err(mismatch(self.name, ElementKind::Doub, other.kind()))
        }
    }

    pub fn into_char(self) -> EclResult<Vec<String>> {
        match self.data {
            EclData::Char(v) => Ok(v),
            other => Err(mismatch(self.name, ElementKind::Char, other.kind()))
        }
    }

    pub fn into_logi(self) -> EclResult<Vec<bool>> {
        match self.data {
            EclData::Logi(v) => Ok(v),
            other => Err(mismatch(self.name, ElementKind::Logi, other.kind()))
        }
    }
}

fn mismatch(name: String, expected: ElementKind, found: ElementKind) -> EclError {
    EclError::KindMismatch { name, expected, found }
}

fn check_text(s: &str, what: &str, array_name: &str) -> EclResult<()> {
    if s.len() > NAME_WIDTH {
        return Err(EclError::Format(format!(
            "{what} '{s}' in array '{array_name}' is {} bytes long, the limit is {NAME_WIDTH}", s.len()
        )));
    }
    if s.contains(['\'', '\n', '\r']) {
        return Err(EclError::Format(format!(
            "{what} '{s}' in array '{array_name}' contains a quote or line break"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags() {
        for kind in ElementKind::ALL {
            assert_eq!(ElementKind::from_tag(kind.tag().as_bytes()), Some(kind), "Tag for {kind} did not round trip");
        }
        assert_eq!(ElementKind::from_tag(b"C008"), None);
        assert_eq!(ElementKind::from_tag(b"INT"), None);
    }

    #[test]
    fn test_block_count() {
        assert_eq!(ElementKind::Real.block_count(9000), 3);
        assert_eq!(ElementKind::Real.block_count(4000), 1);
        assert_eq!(ElementKind::Real.block_count(4001), 2);
        assert_eq!(ElementKind::Doub.block_count(9000), 2);
        assert_eq!(ElementKind::Char.block_count(841), 2);
        assert_eq!(ElementKind::Mess.block_count(0), 0);
    }

    #[test]
    fn test_binary_payload_size() {
        // 3 blocks, each with a leading and trailing 4 byte marker
        assert_eq!(ElementKind::Real.binary_payload_size(9000), 9000 * 4 + 3 * 8);
        assert_eq!(ElementKind::Doub.binary_payload_size(2), 16 + 8);
        assert_eq!(ElementKind::Mess.binary_payload_size(0), 0);
    }

    #[test]
    fn test_formatted_line_count() {
        assert_eq!(ElementKind::Inte.formatted_line_count(6), 1);
        assert_eq!(ElementKind::Inte.formatted_line_count(7), 2);
        // 4000 / 6 -> 667 lines for the full block, then 1 line for the last 2 values
        assert_eq!(ElementKind::Inte.formatted_line_count(4002), 668);
        assert_eq!(ElementKind::Mess.formatted_line_count(0), 0);
    }

    #[test]
    fn test_trims_names_and_chars() -> EclResult<()> {
        let arr = EclArray::new("ZWEL    ", vec!["OP_1    ", "  INJ", ""])?;
        assert_eq!(arr.name(), "ZWEL");
        assert_eq!(arr.as_char().unwrap(), &["OP_1".to_string(), "  INJ".to_string(), "".to_string()]);
        Ok(())
    }

    #[test]
    fn test_rejects_invalid() {
        assert!(EclArray::new("TOOLONGNAME", vec![1]).unwrap_err().is_format());
        assert!(EclArray::new("", vec![1]).unwrap_err().is_format());
        assert!(EclArray::new("QUO'TE", vec![1]).unwrap_err().is_format());
        assert!(EclArray::new("ZWEL", vec!["NINECHARS"]).unwrap_err().is_format());
        assert!(EclArray::new("EMPTY", Vec::<i32>::new()).unwrap_err().is_format());
        assert!(EclArray::message("STARTSOL").is_ok());
    }

    #[test]
    fn test_from_parts() {
        let ok = EclArray::from_parts("FIPNUM", ElementKind::Inte, 3, EclData::Inte(vec![1, 2, 3]));
        assert!(ok.is_ok());

        let e = EclArray::from_parts("FIPNUM", ElementKind::Inte, 4, EclData::Inte(vec![1, 2, 3]));
        assert!(e.unwrap_err().is_format(), "count/payload mismatch was not rejected");

        let e = EclArray::from_parts("FIPNUM", ElementKind::Real, 3, EclData::Inte(vec![1, 2, 3]));
        assert!(e.unwrap_err().is_format(), "kind/payload mismatch was not rejected");

        let e = EclArray::from_parts("ENDSOL", ElementKind::Mess, 1, EclData::Mess);
        assert!(e.unwrap_err().is_format(), "MESS with a nonzero count was not rejected");
    }

    #[test]
    fn test_bitwise_equality() -> EclResult<()> {
        let a = EclArray::new("X", vec![f64::NAN, 1.0])?;
        let b = EclArray::new("X", vec![f64::NAN, 1.0])?;
        assert_eq!(a, b);

        let a = EclArray::new("X", vec![0.0_f32])?;
        let b = EclArray::new("X", vec![-0.0_f32])?;
        assert_ne!(a, b);
        Ok(())
    }

    #[test]
    fn test_typed_accessors() -> EclResult<()> {
        let arr = EclArray::new("FIPNUM", vec![1, 2])?;
        assert_eq!(arr.as_inte(), Some(&[1, 2][..]));
        assert!(arr.as_real().is_none());

        let e = arr.clone().into_doub().unwrap_err();
        assert!(matches!(e, EclError::KindMismatch { expected: ElementKind::Doub, found: ElementKind::Inte, .. }));
        assert_eq!(arr.into_inte()?, vec![1, 2]);
        Ok(())
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde() {
        let arr = EclArray::new("ZWEL", vec!["OP_1", "INJ"]).unwrap();
        let json = serde_json::to_string(&arr).unwrap();
        let back: EclArray = serde_json::from_str(&json).unwrap();
        assert_eq!(back, arr);

        let kind: ElementKind = serde_json::from_str("\"Doub\"").unwrap();
        assert_eq!(kind, ElementKind::Doub);
    }
}
