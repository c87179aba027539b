//! Wildcard expansion for the `LS` directive.
//!
//! Supports `*`, `?`, and `[...]` classes (`[!...]` negates) inside any path
//! component. Matching never crosses a `/`. Results are sorted per
//! directory, so the same tree always lists in the same order.

use std::{
    fs,
    path::{Component, Path, PathBuf},
};

use regex::Regex;

use crate::error::{RemapError, Result};

pub fn expand(folder: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let full = folder.join(pattern);
    let mut current = vec![PathBuf::new()];
    let components: Vec<Component<'_>> = full
        .components()
        .filter(|component| !matches!(component, Component::CurDir))
        .collect();
    let last = components.len().saturating_sub(1);

    for (position, component) in components.iter().enumerate() {
        let part = component.as_os_str().to_string_lossy();
        if !has_wildcard(&part) {
            current = current
                .into_iter()
                .map(|base| base.join(component.as_os_str()))
                .filter(|path| position != last || path.exists())
                .collect();
            continue;
        }
        let matcher = wildcard_regex(&part).map_err(|reason| RemapError::Listing {
            pattern: full.display().to_string(),
            reason,
        })?;
        let mut next = Vec::new();
        for base in &current {
            let dir = if base.as_os_str().is_empty() {
                Path::new(".")
            } else {
                base.as_path()
            };
            let Ok(entries) = fs::read_dir(dir) else {
                continue;
            };
            let mut matched = entries
                .flatten()
                .filter(|entry| position == last || entry.path().is_dir())
                .filter(|entry| matcher.is_match(&entry.file_name().to_string_lossy()))
                .map(|entry| base.join(entry.file_name()))
                .collect::<Vec<_>>();
            matched.sort();
            next.extend(matched);
        }
        current = next;
    }

    Ok(current
        .into_iter()
        .filter(|path| !path.as_os_str().is_empty())
        .collect())
}

fn has_wildcard(part: &str) -> bool {
    part.contains(['*', '?', '['])
}

fn wildcard_regex(part: &str) -> std::result::Result<Regex, String> {
    let mut pattern = String::from("^");
    let mut chars = part.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => pattern.push_str("[^/]*"),
            '?' => pattern.push_str("[^/]"),
            '[' => {
                pattern.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    pattern.push('^');
                }
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == ']' {
                        closed = true;
                        break;
                    }
                    if inner == '\\' || inner == '[' {
                        pattern.push('\\');
                    }
                    pattern.push(inner);
                }
                if !closed {
                    return Err(format!("unterminated character class in '{part}'"));
                }
                pattern.push(']');
            }
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push('$');
    Regex::new(&pattern).map_err(|err| err.to_string())
}
