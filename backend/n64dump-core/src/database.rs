//! Checksum database lookup.
//!
//! The database is a text resource made of 3-line records:
//!
//! ```text
//! <display name>
//! <checksum hex>,<size in MB>,<save type>
//! <blank line>
//! ```
//!
//! Lookups are a linear scan for an exact, case-sensitive checksum match.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseEntry {
    pub name: String,
    pub checksum: String,
    pub size_mb: u32,
    /// Opaque save hardware tag, empty if the record has none
    pub save_type: String,
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("Checksum {0} not found in database")]
    NotFound(String),
    #[error("Unable to read checksum database at '{path}': {source}")]
    ResourceMissing {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Malformed database record for checksum {checksum} at line {line}: '{record}'")]
    Malformed { checksum: String, line: usize, record: String },
}

#[derive(Debug, Clone)]
struct Record {
    name: String,
    data: String,
    // 1-based line number of the data line
    line: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ChecksumDatabase {
    records: Vec<Record>,
}

impl ChecksumDatabase {
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut records = Vec::new();
        let mut group: Vec<(usize, &str)> = Vec::new();

        let mut flush = |group: &mut Vec<(usize, &str)>| {
            match group.as_slice() {
                [] => {}
                &[(_, name), (line, data)] => {
                    records.push(Record { name: name.into(), data: data.into(), line });
                }
                [(first_line, _), ..] => {
                    log::debug!(
                        "Skipping {}-line database record starting at line {first_line}",
                        group.len()
                    );
                }
            }
            group.clear();
        };

        for (i, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                flush(&mut group);
            } else {
                group.push((i + 1, line));
            }
        }
        flush(&mut group);

        Self { records }
    }

    /// # Errors
    ///
    /// Returns [`LookupError::ResourceMissing`] if the file cannot be read.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LookupError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| LookupError::ResourceMissing {
            path: path.display().to_string(),
            source,
        })?;

        let database = Self::parse(&text);
        log::info!("Loaded {} checksum database records from '{}'", database.len(), path.display());

        Ok(database)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// # Errors
    ///
    /// Returns [`LookupError::NotFound`] if no record has this checksum, or
    /// [`LookupError::Malformed`] if the matching record's size does not parse.
    pub fn lookup(&self, checksum: &str) -> Result<DatabaseEntry, LookupError> {
        for record in &self.records {
            let mut fields = record.data.split(',').map(str::trim);
            if fields.next() != Some(checksum) {
                continue;
            }

            let malformed = || LookupError::Malformed {
                checksum: checksum.into(),
                line: record.line,
                record: record.data.clone(),
            };

            let size_mb = fields.next().and_then(|s| s.parse().ok()).ok_or_else(malformed)?;
            let save_type = fields.next().unwrap_or_default().into();

            return Ok(DatabaseEntry {
                name: record.name.trim().into(),
                checksum: checksum.into(),
                size_mb,
                save_type,
            });
        }

        Err(LookupError::NotFound(checksum.into()))
    }
}

/// Where the pipeline finds the checksum database.
#[derive(Debug, Clone)]
pub enum DatabaseSource {
    /// Read the file at lookup time; a missing file is a lookup failure, not a startup failure
    File(PathBuf),
    Loaded(ChecksumDatabase),
}

impl DatabaseSource {
    /// # Errors
    ///
    /// Returns an error if the checksum is absent, the record is malformed, or the database file
    /// cannot be read.
    pub fn lookup(&self, checksum: &str) -> Result<DatabaseEntry, LookupError> {
        match self {
            Self::File(path) => ChecksumDatabase::load(path)?.lookup(checksum),
            Self::Loaded(database) => database.lookup(checksum),
        }
    }
}
