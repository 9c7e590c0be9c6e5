//! Read and write ECLIPSE-style array container files.
//!
//! These files are a sequence of records, each a named array of one element type.
//! [`codec`] converts single records to and from bytes in either the binary or the
//! formatted (text) representation, [`writer`] appends records to a file, [`reader`]
//! indexes an existing file for random access, and [`restart`] groups the records of
//! a unified restart file into report steps.
//!
//! ```
//! use eclformat::arrays::EclArray;
//! use eclformat::codec::FileMode;
//! use eclformat::reader::EclFile;
//! use eclformat::writer::EclWriter;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let path = dir.path().join("CASE.INIT");
//!
//! let mut w = EclWriter::create(&path, FileMode::Binary).unwrap();
//! w.write(&EclArray::new("PORO", vec![0.1_f32, 0.2, 0.3, 0.4]).unwrap()).unwrap();
//! w.write(&EclArray::new("FIPNUM", vec![1, 2, 3, 4]).unwrap()).unwrap();
//! w.close().unwrap();
//!
//! let f = EclFile::open(&path).unwrap();
//! assert_eq!(f.record_count(), 2);
//! assert_eq!(f.get_by_name("FIPNUM").unwrap().as_inte(), Some(&[1, 2, 3, 4][..]));
//! ```
extern crate pest;
#[macro_use]
extern crate pest_derive;
pub mod ecl_error;
pub mod arrays;
pub(crate) mod parsing;
pub mod codec;
pub mod writer;
pub mod reader;
pub mod restart;

pub use arrays::{EclArray, EclData, ElementKind};
pub use codec::FileMode;
pub use ecl_error::{EclError, EclResult};
pub use reader::{EclFile, ReaderSettings};
pub use restart::{DamagedStep, RestartIndex, RestartSettings};
pub use writer::EclWriter;
