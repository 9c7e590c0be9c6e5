//! Random access to the report steps of a unified restart file.
//!
//! A unified restart file holds the state of a simulation at many report steps, one
//! after the other. Each step begins with a sentinel record (`SEQNUM` unless configured
//! otherwise with [`RestartSettings`]) and runs until the next sentinel. A
//! [`RestartIndex`] partitions the directory of an [`EclFile`] into these steps once,
//! so that any step can then be found with a binary search instead of a rescan:
//!
//! ```no_run
//! use eclformat::restart::RestartIndex;
//!
//! let rst = RestartIndex::open("CASE.UNRST").unwrap();
//! for step in rst.step_numbers() {
//!     let arrays = rst.load_step(step).unwrap();
//!     let pressure = arrays.get("PRESSURE").and_then(|a| a.as_real());
//!     println!("step {step}: {:?}", pressure.map(|p| p.len()));
//! }
//! ```
//!
//! The number of a step is the first value of its sentinel record. A sentinel with no
//! integer data (e.g. a MESS record) is instead numbered by its position among the
//! sentinels, starting from 0.
use std::collections::HashMap;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use itertools::Itertools;
use log::{debug, warn};

use crate::arrays::{EclArray, ElementKind};
use crate::ecl_error::{EclError, EclResult};
use crate::reader::{DirectoryEntry, EclFile};

/// Settings for indexing a restart file
///
/// ```
/// # use eclformat::restart::RestartSettings;
/// let settings = RestartSettings::default().sentinel("REPORT");
/// assert_eq!(settings.sentinel_name(), "REPORT");
/// ```
#[derive(Debug, Clone)]
pub struct RestartSettings {
    sentinel: String,
}

impl RestartSettings {
    /// Set the name of the record that starts every report step.
    ///
    /// Default is "SEQNUM". Different generations of the restart format mark steps
    /// differently, so check a sample file if in doubt.
    pub fn sentinel<N: AsRef<str>>(mut self, name: N) -> Self {
        self.sentinel = name.as_ref().trim_end().to_owned();
        self
    }

    pub fn sentinel_name(&self) -> &str {
        &self.sentinel
    }
}

impl Default for RestartSettings {
    fn default() -> Self {
        Self { sentinel: "SEQNUM".to_owned() }
    }
}

/// The directory indices belonging to one report step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StepRange {
    pub step: i32,
    /// Index of the step's sentinel record
    pub start: usize,
    /// One past the index of the step's last record
    pub end: usize,
}

impl StepRange {
    pub fn indices(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Number of records in the step, sentinel included
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The decoded records of one report step
///
/// Records keep their file order. If a name occurs more than once in the step,
/// [`StepArrays::get`] returns the last one and [`StepArrays::get_all`] returns all
/// of them.
#[derive(Debug, Clone)]
pub struct StepArrays {
    step: i32,
    arrays: Vec<Arc<EclArray>>,
    names: HashMap<String, Vec<usize>>,
}

impl StepArrays {
    fn new(step: i32, arrays: Vec<Arc<EclArray>>) -> Self {
        let mut names: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, arr) in arrays.iter().enumerate() {
            names.entry(arr.name().to_owned()).or_default().push(i);
        }
        Self { step, arrays, names }
    }

    pub fn step(&self) -> i32 {
        self.step
    }

    pub fn get(&self, name: &str) -> Option<&EclArray> {
        let i = self.names.get(name)?.last()?;
        self.arrays.get(*i).map(|a| a.as_ref())
    }

    pub fn get_all<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a EclArray> + 'a {
        self.names.get(name)
            .into_iter()
            .flatten()
            .map(|&i| self.arrays[i].as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// Iterate over the records in file order
    pub fn iter(&self) -> impl Iterator<Item = &EclArray> {
        self.arrays.iter().map(|a| a.as_ref())
    }

    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    pub fn into_arrays(self) -> Vec<Arc<EclArray>> {
        self.arrays
    }
}

/// A step whose sentinel record could not be decoded, so its number is unknown
#[derive(Debug)]
pub struct DamagedStep {
    /// Index of the step's sentinel record
    pub start: usize,
    /// One past the index of the step's last record
    pub end: usize,
    pub error: EclError,
}

impl DamagedStep {
    pub fn indices(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// An [`EclFile`] partitioned into report steps
#[derive(Debug)]
pub struct RestartIndex {
    file: EclFile,
    settings: RestartSettings,
    /// Sorted by step number
    steps: Vec<StepRange>,
    damaged: Vec<DamagedStep>,
    preamble_end: usize,
}

impl RestartIndex {
    /// Open a file and index its report steps with the default settings.
    pub fn open<P: AsRef<Path>>(path: P) -> EclResult<Self> {
        Self::new(EclFile::open(path)?)
    }

    /// Index the report steps of an already open file with the default settings.
    pub fn new(file: EclFile) -> EclResult<Self> {
        Self::new_custom(file, RestartSettings::default())
    }

    /// Index the report steps of an already open file.
    ///
    /// The sentinel records are decoded to get the step numbers. A step whose sentinel
    /// is corrupt cannot be numbered, so it is left out of the index and listed in
    /// [`RestartIndex::damaged_steps`] instead; the other steps stay available. Other
    /// errors, such as I/O failures, are returned. If two steps have the same number,
    /// the later one in the file is kept.
    pub fn new_custom(file: EclFile, settings: RestartSettings) -> EclResult<Self> {
        let sentinel = settings.sentinel_name();
        let starts = file.entries().iter()
            .positions(|e| e.name == sentinel)
            .collect_vec();
        let preamble_end = starts.first().copied().unwrap_or(file.record_count());

        let mut steps = Vec::with_capacity(starts.len());
        let mut damaged = vec![];
        let bounds = starts.iter().copied().chain(std::iter::once(file.record_count()));
        for (ordinal, (start, end)) in bounds.tuple_windows().enumerate() {
            match step_number(&file, start, ordinal) {
                Ok(step) => steps.push(StepRange { step, start, end }),
                Err(e) if e.is_corrupt_record() => {
                    warn!(
                        "cannot number the report step at record {start} of {}, leaving it out of the index: {e}",
                        file.path().display()
                    );
                    damaged.push(DamagedStep { start, end, error: e });
                },
                Err(e) => return Err(e),
            }
        }

        // Stable, so a repeated step number keeps file order and the later copy ends up last
        steps.sort_by_key(|s| s.step);
        let mut deduped: Vec<StepRange> = Vec::with_capacity(steps.len());
        for s in steps {
            match deduped.last_mut() {
                Some(prev) if prev.step == s.step => {
                    warn!(
                        "report step {} occurs more than once in {}; using the copy at record {}",
                        s.step, file.path().display(), s.start
                    );
                    *prev = s;
                },
                _ => deduped.push(s),
            }
        }

        debug!(
            "indexed {} report steps in {} using sentinel {sentinel}", deduped.len(), file.path().display()
        );
        Ok(Self { file, settings, steps: deduped, damaged, preamble_end })
    }

    pub fn settings(&self) -> &RestartSettings {
        &self.settings
    }

    pub fn file(&self) -> &EclFile {
        &self.file
    }

    pub fn into_inner(self) -> EclFile {
        self.file
    }

    /// Step numbers in ascending order.
    ///
    /// The iterator can be cloned to walk the steps again without rebuilding anything.
    pub fn step_numbers(&self) -> impl Iterator<Item = i32> + Clone + '_ {
        self.steps.iter().map(|s| s.step)
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Every step's range, sorted by step number
    pub fn steps(&self) -> &[StepRange] {
        &self.steps
    }

    /// Steps left out of the index because their sentinel record is corrupt, in file order
    pub fn damaged_steps(&self) -> &[DamagedStep] {
        &self.damaged
    }

    pub fn has_step(&self, step: i32) -> bool {
        self.find(step).is_ok()
    }

    fn find(&self, step: i32) -> EclResult<&StepRange> {
        self.steps.binary_search_by_key(&step, |s| s.step)
            .map(|i| &self.steps[i])
            .map_err(|_| EclError::StepNotFound(step))
    }

    /// The directory indices of a step, or an [`EclError::StepNotFound`]
    pub fn step_range(&self, step: i32) -> EclResult<StepRange> {
        self.find(step).copied()
    }

    /// The directory entries of a step, starting with its sentinel
    pub fn records_for_step(&self, step: i32) -> EclResult<&[DirectoryEntry]> {
        let range = self.find(step)?;
        Ok(&self.file.entries()[range.indices()])
    }

    /// Name, kind, and element count of each record in a step
    pub fn arrays_in_step(&self, step: i32) -> EclResult<Vec<(&str, ElementKind, usize)>> {
        let entries = self.records_for_step(step)?;
        Ok(entries.iter().map(|e| (e.name.as_str(), e.kind, e.count)).collect())
    }

    /// Records before the first sentinel, which belong to no step
    pub fn preamble(&self) -> &[DirectoryEntry] {
        &self.file.entries()[..self.preamble_end]
    }

    /// Decode every record of a step.
    pub fn load_step(&self, step: i32) -> EclResult<StepArrays> {
        let range = self.find(step)?;
        let arrays = range.indices()
            .map(|i| self.file.get(i))
            .collect::<EclResult<Vec<_>>>()?;
        Ok(StepArrays::new(step, arrays))
    }

    /// Decode the last record named `name` within a step.
    ///
    /// Returns an [`EclError::StepNotFound`] if the step is missing and an
    /// [`EclError::KeyNotFound`] if the step has no such record.
    pub fn get_in_step(&self, step: i32, name: &str) -> EclResult<Arc<EclArray>> {
        let range = self.find(step)?;
        let index = self.file.indices_of(name).iter()
            .rev()
            .find(|&&i| range.indices().contains(&i))
            .ok_or_else(|| EclError::KeyNotFound(format!("{name} (in report step {step})")))?;
        self.file.get(*index)
    }

    /// Byte offset at which to start writing `step` so that it and every step numbered
    /// above it are replaced: the earliest start in the file among steps numbered
    /// `step` or higher. `None` means no such step exists and new data goes at the end
    /// of the file.
    ///
    /// Truncating here removes everything after that point. In a file whose steps are
    /// stored in ascending order, that is exactly the steps numbered `step` or higher;
    /// if lower-numbered steps were stored after a higher one, they are removed too.
    pub fn write_position(&self, step: i32) -> Option<u64> {
        let i = self.steps.partition_point(|s| s.step < step);
        self.steps[i..].iter()
            .filter_map(|s| self.file.entries().get(s.start))
            .map(|e| e.offset)
            .min()
    }
}

fn step_number(file: &EclFile, index: usize, ordinal: usize) -> EclResult<i32> {
    let entry = file.entry(index)?;
    if entry.kind == ElementKind::Inte && entry.count > 0 {
        let arr = file.get(index)?;
        if let Some(&n) = arr.as_inte().and_then(|v| v.first()) {
            return Ok(n);
        }
    }
    i32::try_from(ordinal)
        .map_err(|_| EclError::corrupt(&entry.name, format!("sentinel number {ordinal} does not fit in an i32")))
}
