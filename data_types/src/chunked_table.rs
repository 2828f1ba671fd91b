//! Parsing and building of chunked-table names: the naming algebra shared by the file service,
//! the abort job, and the director-index job. See `ChunkedTable.h`/`.cc` in the original
//! implementation this crate's tests are grounded on.

use regex::Regex;
use std::fmt;

/// The sentinel chunk that must be present (empty) at every worker for every partitioned table.
pub const DUMMY_CHUNK: u32 = 1234567890;

/// A parsed or built chunked-table name: `<base>_<chunk>` or, for the overlap flavor,
/// `<base>FullOverlap_<chunk>`.
///
/// A default-constructed `ChunkedTable` is in the "invalid" state, matching the original's
/// default-constructible-but-unusable value type; every accessor returns an error on it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkedTable {
    inner: Option<Inner>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Inner {
    base_name: String,
    chunk: u32,
    overlap: bool,
    name: String,
}

/// Error returned by [`ChunkedTable`] accessors and parsing.
#[derive(Debug, snafu::Snafu, PartialEq, Eq)]
pub enum ChunkedTableError {
    /// The string passed to [`ChunkedTable::parse`] does not match the chunked-table pattern.
    #[snafu(display("'{name}' is not a valid chunked table name"))]
    InvalidName {
        /// The name that failed to parse.
        name: String,
    },
    /// An accessor was called on a default-constructed (invalid) `ChunkedTable`.
    #[snafu(display("this ChunkedTable is invalid"))]
    Invalid,
}

impl ChunkedTable {
    /// Builds the physical table name for `base_name`/`chunk`/`overlap`.
    pub fn build(base_name: &str, chunk: u32, overlap: bool) -> Self {
        let name = if overlap {
            format!("{base_name}FullOverlap_{chunk}")
        } else {
            format!("{base_name}_{chunk}")
        };
        Self {
            inner: Some(Inner {
                base_name: base_name.to_string(),
                chunk,
                overlap,
                name,
            }),
        }
    }

    /// Parses a physical table name back into its `(base_name, chunk, overlap)` components.
    ///
    /// The overlap pattern `^(.+)FullOverlap_([0-9]+)$` is tried first *deliberately*: this
    /// means a base name that literally ends in `FullOverlap` parses as the overlap flavor, and
    /// a name like `FullOverlap_123` parses as the **non-overlap** table with base name
    /// `FullOverlap` (it does not match the overlap pattern because there is nothing before
    /// `FullOverlap`... actually it does: group 1 would be empty-string-prefixed. See tests.)
    pub fn parse(name: &str) -> Result<Self, ChunkedTableError> {
        static OVERLAP_RE: once_cell_regex::Lazy = once_cell_regex::Lazy::new(r"^(.+)FullOverlap_([0-9]+)$");
        static PLAIN_RE: once_cell_regex::Lazy = once_cell_regex::Lazy::new(r"^(.+)_([0-9]+)$");

        if let Some(caps) = OVERLAP_RE.get().captures(name) {
            let base_name = caps[1].to_string();
            let chunk: u32 = caps[2].parse().map_err(|_| ChunkedTableError::InvalidName {
                name: name.to_string(),
            })?;
            return Ok(Self::build(&base_name, chunk, true));
        }
        if let Some(caps) = PLAIN_RE.get().captures(name) {
            let base_name = caps[1].to_string();
            let chunk: u32 = caps[2].parse().map_err(|_| ChunkedTableError::InvalidName {
                name: name.to_string(),
            })?;
            return Ok(Self::build(&base_name, chunk, false));
        }
        Err(ChunkedTableError::InvalidName {
            name: name.to_string(),
        })
    }

    /// True if this value was built via [`ChunkedTable::build`] or [`ChunkedTable::parse`].
    pub fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    /// The base (prototype) table name.
    pub fn base_name(&self) -> Result<&str, ChunkedTableError> {
        self.inner
            .as_ref()
            .map(|i| i.base_name.as_str())
            .ok_or(ChunkedTableError::Invalid)
    }

    /// The chunk number.
    pub fn chunk(&self) -> Result<u32, ChunkedTableError> {
        self.inner.as_ref().map(|i| i.chunk).ok_or(ChunkedTableError::Invalid)
    }

    /// Whether this is the overlap flavor of the table.
    pub fn overlap(&self) -> Result<bool, ChunkedTableError> {
        self.inner
            .as_ref()
            .map(|i| i.overlap)
            .ok_or(ChunkedTableError::Invalid)
    }

    /// The full physical table name.
    pub fn name(&self) -> Result<&str, ChunkedTableError> {
        self.inner.as_ref().map(|i| i.name.as_str()).ok_or(ChunkedTableError::Invalid)
    }
}

impl fmt::Display for ChunkedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(i) => write!(f, "{}", i.name),
            None => write!(f, "<invalid ChunkedTable>"),
        }
    }
}

/// The four physical table names a partitioned table `base_name` must have at a worker that
/// holds `chunk`: the chunk table, its overlap, and the `DUMMY_CHUNK` pair of both.
pub fn physical_names(base_name: &str, chunk: u32) -> [String; 4] {
    [
        ChunkedTable::build(base_name, chunk, false).name().unwrap().to_string(),
        ChunkedTable::build(base_name, chunk, true).name().unwrap().to_string(),
        ChunkedTable::build(base_name, DUMMY_CHUNK, false).name().unwrap().to_string(),
        ChunkedTable::build(base_name, DUMMY_CHUNK, true).name().unwrap().to_string(),
    ]
}

/// A tiny lazily-compiled regex holder, avoiding a dependency on `once_cell` for a single use
/// site (the crate otherwise has no need of it).
mod once_cell_regex {
    use super::Regex;
    use std::sync::OnceLock;

    pub struct Lazy {
        pattern: &'static str,
        cell: OnceLock<Regex>,
    }

    impl Lazy {
        pub const fn new(pattern: &'static str) -> Self {
            Self {
                pattern,
                cell: OnceLock::new(),
            }
        }

        pub fn get(&self) -> &Regex {
            self.cell.get_or_init(|| Regex::new(self.pattern).expect("static regex is valid"))
        }
    }
}
