//! `requirements.txt` parsing.
//!
//! Only used to report and plan what a manifest install will request. The
//! actual install hands the file to pip, which does all of the resolution.

use serde::{Deserialize, Serialize};

/// A single requirement line, e.g. `numpy>=1.26`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub name: String,
    pub line: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementsManifest {
    pub requirements: Vec<Requirement>,
    /// Pip option lines (`-r other.txt`, `--index-url ...`), kept verbatim.
    pub options: Vec<String>,
}

impl RequirementsManifest {
    pub fn package_names(&self) -> Vec<String> {
        self.requirements.iter().map(|r| r.name.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty() && self.options.is_empty()
    }
}

pub fn parse_requirements_str(input: &str) -> RequirementsManifest {
    let mut manifest = RequirementsManifest::default();

    for line in logical_lines(input) {
        let line = strip_comment(&line).trim().to_owned();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('-') {
            manifest.options.push(line);
            continue;
        }
        let name = requirement_name(&line);
        if name.is_empty() {
            continue;
        }
        manifest.requirements.push(Requirement {
            name: name.to_owned(),
            line,
        });
    }

    manifest
}

// Joins backslash-continued physical lines.
fn logical_lines(input: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for raw in input.lines() {
        if let Some(head) = raw.strip_suffix('\\') {
            current.push_str(head);
            continue;
        }
        current.push_str(raw);
        out.push(std::mem::take(&mut current));
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn strip_comment(line: &str) -> &str {
    if line.trim_start().starts_with('#') {
        return "";
    }
    let bytes = line.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'#' && i > 0 && bytes[i - 1].is_ascii_whitespace() {
            return &line[..i];
        }
    }
    line
}

fn requirement_name(line: &str) -> &str {
    let end = line
        .find(|c: char| c.is_whitespace() || matches!(c, '<' | '>' | '=' | '!' | '~' | ';' | '[' | '@'))
        .unwrap_or(line.len());
    &line[..end]
}
