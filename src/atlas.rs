//! Intensity-prior catalog read from a plain-text MGDM atlas.
//!
//! Only two markers are recognized: `Structures:` followed by the structure
//! count, and `Intensity Prior:` lines whose last token names a prior.
//! Anything else is ignored, so a malformed atlas simply yields a short
//! catalog and the problem shows up later as a contrast validation error.

use crate::error::{Error, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

const STRUCTURES_MARKER: &str = "Structures:";
const PRIOR_MARKER: &str = "Intensity Prior:";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriorCatalog {
    priors: Vec<String>,
    structures: Option<usize>,
}

impl PriorCatalog {
    pub fn parse(atlas_file: &Path) -> Result<Self> {
        let file = File::open(atlas_file).map_err(|source| Error::Read {
            path: atlas_file.to_path_buf(),
            source,
        })?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut catalog = PriorCatalog::default();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if let Some(pos) = line.find(STRUCTURES_MARKER) {
                let token = line[pos + STRUCTURES_MARKER.len()..].split_whitespace().next();
                match token.map(str::parse::<usize>) {
                    Some(Ok(n)) => catalog.structures = Some(n),
                    _ => tracing::debug!(
                        "line {}: could not read a structure count from '{}'",
                        line_no + 1,
                        line.trim()
                    ),
                }
            }
            if line.contains(PRIOR_MARKER) {
                if let Some(name) = line.split_whitespace().last() {
                    catalog.priors.push(name.to_string());
                }
            }
        }
        Ok(catalog)
    }

    /// Prior names in file order, duplicates included.
    pub fn priors(&self) -> &[String] {
        &self.priors
    }

    pub fn structure_count(&self) -> Option<usize> {
        self.structures
    }

    pub fn contains(&self, name: &str) -> bool {
        self.priors.iter().any(|p| p == name)
    }

    pub fn len(&self) -> usize {
        self.priors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.priors.is_empty()
    }
}
