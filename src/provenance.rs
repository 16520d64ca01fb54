use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Where an entity was declared, as reported by the authoring layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub file: Option<PathBuf>,
    pub line: Option<usize>,
    /// Variable name the entity was bound to
    pub name: Option<String>,
}

impl Provenance {
    pub fn at(file: impl Into<PathBuf>, line: usize) -> Self {
        Provenance {
            file: Some(file.into()),
            line: Some(line),
            name: None,
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Provenance {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn location(&self) -> Option<(&Path, usize)> {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => Some((file.as_path(), line)),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.file.is_none() && self.line.is_none() && self.name.is_none()
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{}:{}", file.display(), line)?,
            (Some(file), None) => write!(f, "{}", file.display())?,
            _ => {}
        }
        if let Some(name) = &self.name {
            if self.file.is_some() {
                write!(f, " ({})", name)?;
            } else {
                f.write_str(name)?;
            }
        }
        Ok(())
    }
}

/// Label for error messages, `None` when nothing is known
pub fn label(provenance: &Option<Provenance>) -> Option<String> {
    provenance
        .as_ref()
        .filter(|p| !p.is_empty())
        .map(ToString::to_string)
}

/// Lines of source files, read once per file.
#[derive(Debug, Clone, Default)]
pub struct SourceCache {
    files: HashMap<PathBuf, Option<Rc<[String]>>>,
}

impl SourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register source text that is not (or not only) on disk
    pub fn insert(&mut self, file: impl Into<PathBuf>, text: &str) {
        let lines: Rc<[String]> = text.lines().map(str::to_string).collect();
        self.files.insert(file.into(), Some(lines));
    }

    fn lines(&mut self, file: &Path) -> Option<Rc<[String]>> {
        self.files
            .entry(file.to_path_buf())
            .or_insert_with(|| match fs::read_to_string(file) {
                Ok(text) => Some(text.lines().map(str::to_string).collect()),
                Err(e) => {
                    warn!("Can't read source {} for provenance context: {}", file.display(), e);
                    None
                }
            })
            .clone()
    }

    /// Lines `line - radius ..= line + radius` (1-based), clamped to the file
    pub fn nearby_lines(&mut self, file: &Path, line: usize, radius: usize) -> Option<Vec<String>> {
        let lines = self.lines(file)?;
        if line == 0 || line > lines.len() {
            return None;
        }
        let start = line.saturating_sub(radius + 1);
        let end = (line + radius).min(lines.len());
        Some(lines[start..end].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let p = Provenance::at("board.net", 12).with_name("r1");
        assert_eq!(p.to_string(), "board.net:12 (r1)");
        assert_eq!(Provenance::named("r2").to_string(), "r2");
        assert_eq!(label(&Some(Provenance::default())), None);
        assert_eq!(label(&None), None);
    }

    #[test]
    fn test_nearby_lines_clamped() {
        let mut cache = SourceCache::new();
        cache.insert("a.net", "one\ntwo\nthree\nfour\nfive\nsix");

        let lines = cache.nearby_lines(Path::new("a.net"), 3, 2).unwrap();
        assert_eq!(lines, vec!["one", "two", "three", "four", "five"]);

        let lines = cache.nearby_lines(Path::new("a.net"), 1, 2).unwrap();
        assert_eq!(lines, vec!["one", "two", "three"]);

        let lines = cache.nearby_lines(Path::new("a.net"), 6, 1).unwrap();
        assert_eq!(lines, vec!["five", "six"]);

        assert!(cache.nearby_lines(Path::new("a.net"), 7, 1).is_none());
    }

    #[test]
    fn test_missing_file() {
        let mut cache = SourceCache::new();
        assert!(cache
            .nearby_lines(Path::new("/nonexistent/netbind/source.net"), 1, 2)
            .is_none());
    }
}
