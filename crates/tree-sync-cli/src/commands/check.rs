use std::collections::HashSet;

use anyhow::Result;
use tree_sync::{Mapping, MappingFile, PathFilters, Role};

/// Print the filters a mapping compiles to.
pub fn run(file: MappingFile) -> Result<()> {
    let mapping = Mapping::from_file(file);
    println!(
        "Mapping is valid: {} groups, {} projects.",
        mapping.group_count(),
        mapping.project_count()
    );
    print!("{}", render(&PathFilters::compile(&mapping)));
    Ok(())
}

fn section(out: &mut String, title: &str, paths: &HashSet<String>) {
    let mut sorted: Vec<&str> = paths.iter().map(String::as_str).collect();
    sorted.sort_unstable();

    out.push_str(&format!("\n{title} ({})\n", sorted.len()));
    for path in sorted {
        out.push_str(&format!("  {path}\n"));
    }
}

pub fn render(filters: &PathFilters) -> String {
    let mut out = String::new();
    for role in [Role::Source, Role::Destination] {
        section(&mut out, &format!("{role} groups"), filters.groups(role));
        section(&mut out, &format!("{role} projects"), filters.projects(role));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_lists_destination_ancestors() {
        let file: MappingFile = serde_json::from_str(
            r#"{"projects": {"g/p": {"destination_path": "top/g2/p"}}}"#,
        )
        .unwrap();
        let filters = PathFilters::compile(&Mapping::from_file(file));

        let out = render(&filters);

        assert!(out.contains("source groups (0)"));
        assert!(out.contains("source projects (1)\n  g/p\n"));
        assert!(out.contains("destination groups (2)\n  top\n  top/g2\n"));
        assert!(out.contains("destination projects (1)\n  top/g2/p\n"));
    }
}
