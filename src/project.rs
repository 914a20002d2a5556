//! Project scanner plumbing.
//!
//! The heavyweight scanners (export maps, architecture graphs) live outside
//! this crate; this module is the interface they feed: a shallow walk that
//! produces per-directory digests, stored in `adaptive_config` and rendered
//! by the context assembler's export-map and architecture sections.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;

const CODE_EXTS: &[&str] = &["rs", "ts", "tsx", "js", "jsx", "py", "go", "java", "rb"];
const SKIP_DIRS: &[&str] = &[
    "target",
    "node_modules",
    "dist",
    "build",
    "vendor",
    ".git",
];
const MAX_DIRS: usize = 40;
const MAX_FILES_PER_DIR: usize = 400;

/// Output of a project scan.
#[derive(Debug)]
pub struct ScanDigest {
    pub directories: usize,
    pub files: usize,
    /// directory → exported symbol names (best-effort line scan).
    pub export_map: serde_json::Value,
    /// layer/entry summary for the architecture section.
    pub architecture: serde_json::Value,
}

/// Walk the workspace two levels deep and digest what it finds.
pub fn scan(root: &Path) -> Result<ScanDigest> {
    let mut export_map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut total_files = 0usize;

    let mut dirs: Vec<std::path::PathBuf> = vec![root.to_path_buf()];
    for entry in std::fs::read_dir(root)?.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('.') || SKIP_DIRS.contains(&name) {
            continue;
        }
        dirs.push(path.clone());
        // One more level: src/auth, src/billing, ...
        if let Ok(children) = std::fs::read_dir(&path) {
            for child in children.flatten() {
                let child_path = child.path();
                if child_path.is_dir() {
                    if let Some(child_name) =
                        child_path.file_name().and_then(|n| n.to_str())
                    {
                        if !child_name.starts_with('.') && !SKIP_DIRS.contains(&child_name) {
                            dirs.push(child_path);
                        }
                    }
                }
            }
        }
        if dirs.len() >= MAX_DIRS {
            break;
        }
    }

    for dir in &dirs {
        let mut symbols: Vec<String> = Vec::new();
        let mut file_count = 0usize;
        let Ok(entries) = std::fs::read_dir(dir) else {
            continue;
        };
        for entry in entries.flatten().take(MAX_FILES_PER_DIR) {
            let path = entry.path();
            let is_code = path
                .extension()
                .and_then(|x| x.to_str())
                .map(|x| CODE_EXTS.contains(&x))
                .unwrap_or(false);
            if !is_code {
                continue;
            }
            file_count += 1;
            total_files += 1;
            symbols.extend(exported_symbols(&path));
        }
        if file_count == 0 {
            continue;
        }
        symbols.sort();
        symbols.dedup();
        symbols.truncate(12);
        let key = dir
            .strip_prefix(root)
            .unwrap_or(dir)
            .to_string_lossy()
            .into_owned();
        let key = if key.is_empty() { ".".to_string() } else { key };
        export_map.insert(key, symbols);
    }

    let architecture = architecture_digest(&export_map);

    Ok(ScanDigest {
        directories: export_map.len(),
        files: total_files,
        export_map: serde_json::to_value(&export_map)?,
        architecture,
    })
}

/// Best-effort public symbol extraction from a source file's first lines.
fn exported_symbols(path: &Path) -> Vec<String> {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let mut symbols = Vec::new();
    for line in contents.lines().take(400) {
        let trimmed = line.trim_start();
        let name = if let Some(rest) = trimmed.strip_prefix("pub fn ") {
            ident_prefix(rest)
        } else if let Some(rest) = trimmed.strip_prefix("pub struct ") {
            ident_prefix(rest)
        } else if let Some(rest) = trimmed.strip_prefix("export function ") {
            ident_prefix(rest)
        } else if let Some(rest) = trimmed.strip_prefix("export const ") {
            ident_prefix(rest)
        } else if let Some(rest) = trimmed.strip_prefix("export class ") {
            ident_prefix(rest)
        } else if let Some(rest) = trimmed.strip_prefix("def ") {
            ident_prefix(rest)
        } else {
            None
        };
        if let Some(name) = name {
            symbols.push(name);
        }
        if symbols.len() >= 20 {
            break;
        }
    }
    symbols
}

fn ident_prefix(rest: &str) -> Option<String> {
    let name: String = rest
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Rough layering: directories with many dependents-looking names first.
fn architecture_digest(export_map: &BTreeMap<String, Vec<String>>) -> serde_json::Value {
    let entries: Vec<&String> = export_map
        .keys()
        .filter(|k| {
            let lower = k.to_lowercase();
            lower.contains("main") || lower.contains("bin") || lower.contains("cli")
        })
        .collect();
    let leaves: Vec<&String> = export_map
        .keys()
        .filter(|k| {
            let lower = k.to_lowercase();
            lower.contains("util") || lower.contains("types") || lower.contains("common")
        })
        .collect();

    serde_json::json!({
        "directories": export_map.keys().collect::<Vec<_>>(),
        "entry_points": entries,
        "leaf_modules": leaves,
    })
}
