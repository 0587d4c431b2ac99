//! Description-generation seam
//!
//! The captioning model is an external collaborator: possibly slow, possibly
//! failing, and entirely opaque to the catalog core. Everything downstream
//! only sees `describe(path) -> text`.

use crate::error::Result;
use std::path::Path;

pub trait Describer {
    fn describe(&self, path: &Path) -> Result<String>;
}

/// Stand-in for a vision-model backend. Produces a searchable line from
/// the file name so the pipeline stays exercisable end to end.
pub struct PlaceholderDescriber;

impl Describer for PlaceholderDescriber {
    fn describe(&self, path: &Path) -> Result<String> {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().replace(['_', '-'], " "))
            .unwrap_or_default();
        Ok(format!("image of {}", name))
    }
}
