use super::volume::Volume;
use crate::error::{Result, ValidationError};
use std::path::{Path, PathBuf};

pub const DEFAULT_EXTENSION: &str = "nii.gz";

/// Where and under which name an orchestrator persists its outputs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveOptions {
    pub save_data: bool,
    pub overwrite: bool,
    pub output_dir: Option<PathBuf>,
    /// Base name for outputs; suffixes are appended to its stem.
    pub file_name: Option<String>,
    /// Forces the extension (e.g. `nii`), otherwise taken from the base name.
    pub file_extension: Option<String>,
}

impl SaveOptions {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn to_dir(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            save_data: true,
            output_dir: Some(output_dir.into()),
            ..Self::default()
        }
    }
}

/// One output of an orchestrator run.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputItem {
    Volume(Volume),
    File(PathBuf),
}

/// Named outputs of a run, in the order the orchestrator produced them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultBundle {
    items: Vec<(String, OutputItem)>,
}

impl ResultBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, item: OutputItem) {
        let name = name.into();
        match self.items.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = item,
            None => self.items.push((name, item)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&OutputItem> {
        self.items.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn volume(&self, name: &str) -> Option<&Volume> {
        match self.get(name) {
            Some(OutputItem::Volume(v)) => Some(v),
            _ => None,
        }
    }

    pub fn path(&self, name: &str) -> Option<&Path> {
        match self.get(name) {
            Some(OutputItem::File(p)) => Some(p.as_path()),
            _ => None,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OutputItem)> {
        self.items.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl IntoIterator for ResultBundle {
    type Item = (String, OutputItem);
    type IntoIter = std::vec::IntoIter<(String, OutputItem)>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// Picks the output directory and creates it if needed: the explicit
/// directory, else the directory of the root input file, else the current
/// directory.
pub fn output_dir_for_saving(output_dir: Option<&Path>, rootfile: Option<&Path>) -> Result<PathBuf> {
    let dir = match output_dir {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => match rootfile.and_then(|p| p.parent()) {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => std::env::current_dir()?,
        },
    };
    if !dir.exists() {
        tracing::info!("creating output directory {}", dir.display());
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

/// Splits `name` into stem and extension, treating `*.gz` as a double extension.
fn split_extension(name: &str) -> (&str, Option<String>) {
    let parts: Vec<&str> = name.split('.').collect();
    match parts.len() {
        0 | 1 => (name, None),
        2 => (parts[0], Some(parts[1].to_string())),
        n if parts[n - 1] == "gz" => {
            let cut = parts[..n - 2].iter().map(|p| p.len() + 1).sum::<usize>() - 1;
            (&name[..cut], Some(format!("{}.gz", parts[n - 2])))
        }
        n => {
            let cut = name.len() - parts[n - 1].len() - 1;
            (&name[..cut], Some(parts[n - 1].to_string()))
        }
    }
}

/// Builds `{base}_{suffix}.{ext}` where `base` comes from `file_name` or the
/// root input's file name.
pub fn file_name_for_saving(
    file_name: Option<&str>,
    rootfile: Option<&Path>,
    suffix: &str,
    extension: Option<&str>,
) -> Result<String> {
    let name = match (file_name, rootfile) {
        (Some(name), _) => name.to_string(),
        (None, Some(root)) => root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or(ValidationError::MissingFileName)?,
        (None, None) => return Err(ValidationError::MissingFileName.into()),
    };

    let (base, found_ext) = split_extension(&name);
    let ext = extension
        .map(|e| e.trim_start_matches('.').to_string())
        .or(found_ext)
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
    Ok(format!("{}_{}.{}", base, suffix, ext))
}
