//! Archive builder: accumulates converted outputs under deduplicated entry
//! names and serializes them into one ZIP container.

use std::collections::HashSet;
use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::ArchiveError;

/// Download filename for the finished container.
pub const ARCHIVE_NAME: &str = "converted_images.zip";

/// Builds the final archive fully in memory. `finalize` consumes the builder,
/// so it can only run once per batch.
pub struct ArchiveBuilder {
    writer: ZipWriter<Cursor<Vec<u8>>>,
    used_names: HashSet<String>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self {
            writer: ZipWriter::new(Cursor::new(Vec::new())),
            used_names: HashSet::new(),
        }
    }

    /// Appends one entry, disambiguating duplicate names with an index before
    /// the extension (`photo.png`, `photo (1).png`, ...). Returns the entry
    /// name actually used.
    pub fn add(&mut self, name: &str, payload: &[u8]) -> Result<String, ArchiveError> {
        let entry_name = self.dedupe_name(name);
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        self.writer
            .start_file(&entry_name, options)
            .map_err(|source| ArchiveError::Entry {
                name: entry_name.clone(),
                source,
            })?;
        self.writer
            .write_all(payload)
            .map_err(|source| ArchiveError::Entry {
                name: entry_name.clone(),
                source: source.into(),
            })?;

        self.used_names.insert(entry_name.clone());
        Ok(entry_name)
    }

    pub fn len(&self) -> usize {
        self.used_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used_names.is_empty()
    }

    /// Serializes the accumulated entries into one fully buffered container.
    pub fn finalize(self) -> Result<Vec<u8>, ArchiveError> {
        let cursor = self.writer.finish()?;
        Ok(cursor.into_inner())
    }

    fn dedupe_name(&self, name: &str) -> String {
        if !self.used_names.contains(name) {
            return name.to_string();
        }

        let (stem, extension) = match name.rsplit_once('.') {
            Some((stem, ext)) => (stem, Some(ext)),
            None => (name, None),
        };

        for index in 1.. {
            let candidate = match extension {
                Some(ext) => format!("{} ({}).{}", stem, index, ext),
                None => format!("{} ({})", stem, index),
            };
            if !self.used_names.contains(&candidate) {
                return candidate;
            }
        }
        unreachable!("dedupe index space exhausted")
    }
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self::new()
    }
}
