use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use tree_sync::MappingFile;
use tree_sync::path::basename;

/// A mapping document that cannot be run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid mapping:\n  - {}", .violations.join("\n  - "))]
pub struct MappingError {
    pub violations: Vec<String>,
}

/// Read, parse and validate a mapping document.
pub fn load(path: &Path) -> Result<MappingFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read mapping at {}", path.display()))?;
    let file: MappingFile = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse mapping at {}", path.display()))?;
    validate(&file)?;
    Ok(file)
}

fn check_path(kind: &str, role: &str, path: &str, violations: &mut Vec<String>) {
    if path.is_empty() {
        violations.push(format!("{kind} {role} path is empty"));
    } else if path.starts_with('/') || path.ends_with('/') {
        violations.push(format!(
            "{kind} {role} path {path:?} has a leading or trailing slash"
        ));
    } else if path.split('/').any(str::is_empty) {
        violations.push(format!("{kind} {role} path {path:?} has an empty segment"));
    }
}

/// Collect every violation rather than stopping at the first.
pub fn validate(file: &MappingFile) -> Result<(), MappingError> {
    let mut violations = Vec::new();
    let mut destinations: HashMap<&str, &str> = HashMap::new();

    let entries = file
        .groups
        .iter()
        .map(|(source, entry)| ("group", source, entry))
        .chain(
            file.projects
                .iter()
                .map(|(source, entry)| ("project", source, entry)),
        );

    for (kind, source, entry) in entries {
        let destination = entry.destination_path.as_str();
        check_path(kind, "source", source, &mut violations);
        check_path(kind, "destination", destination, &mut violations);

        if basename(source) != basename(destination) {
            violations.push(format!(
                "{kind} {source:?} is renamed to {destination:?}; only the namespace may change"
            ));
        }

        if let Some(previous) = destinations.insert(destination, source) {
            violations.push(format!(
                "{source:?} and {previous:?} both map to {destination:?}"
            ));
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(MappingError { violations })
    }
}
