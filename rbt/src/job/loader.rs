//! Job file loading.
//!
//! A job file is a YAML sequence of documents. Each document may define
//! reusable `templates` and concrete `servers`:
//!
//! ```yaml
//! - templates:
//!     - name: linux
//!       backups: 7
//!       target: /backup/{name}
//!       files: [/etc, /home]
//!   servers:
//!     - name: web1
//!       template: linux
//!     - name: db1
//!       template: linux
//!       exclude: ["/var/lib/mysql/*"]
//! ```
//!
//! Each server entry is resolved in two passes: defaults, then the named
//! template, then the entry's own keys are merged into one flat mapping;
//! afterwards every string value is interpolated once against that mapping.
//! `{key}` references that cannot be resolved are left as they are.

use super::{Job, JobConfig};
use crate::utils::{RbtError, Result};
use serde_yaml_ng::{Mapping, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Result of loading one job file. Entries that failed to resolve are kept
/// with their error so the caller can report them and carry on.
#[derive(Debug, Default)]
pub struct JobFile {
    pub path: PathBuf,
    pub jobs: Vec<Job>,
    pub rejected: Vec<RbtError>,
}

/// Locate a job file given on the command line.
///
/// A missing `.yaml` suffix is appended; a name that does not exist relative
/// to the working directory is looked up under `prefix`.
pub fn resolve_job_file(name: &str, prefix: &Path) -> Option<PathBuf> {
    let file = if name.ends_with(".yaml") {
        name.to_string()
    } else {
        format!("{}.yaml", name)
    };

    let direct = PathBuf::from(&file);
    if direct.exists() {
        return Some(direct);
    }

    let prefixed = prefix.join(&file);
    if prefixed.exists() {
        return Some(prefixed);
    }

    None
}

/// Read and resolve a job file from disk.
pub fn load_job_file(path: &Path) -> Result<JobFile> {
    let content = std::fs::read_to_string(path)?;
    let mut file = parse_jobs(&content)?;
    file.path = path.to_path_buf();
    Ok(file)
}

/// Resolve all server entries of a job file document.
pub fn parse_jobs(content: &str) -> Result<JobFile> {
    let root: Value = serde_yaml_ng::from_str(content)?;
    let documents = match root {
        Value::Sequence(items) => items,
        Value::Mapping(_) => vec![root],
        Value::Null => Vec::new(),
        _ => {
            return Err(RbtError::Config(
                "job file must be a list of documents".to_string(),
            ))
        }
    };

    let mut templates: HashMap<String, Mapping> = HashMap::new();
    let mut file = JobFile::default();

    for document in documents {
        let Value::Mapping(document) = document else {
            file.rejected
                .push(RbtError::Config("job file entry is not a mapping".to_string()));
            continue;
        };

        for template in entries(&document, "templates") {
            match template.get("name").and_then(Value::as_str) {
                Some(name) => {
                    templates.insert(name.to_string(), template.clone());
                }
                None => file
                    .rejected
                    .push(RbtError::Config("template without a name".to_string())),
            }
        }

        for server in entries(&document, "servers") {
            match resolve_entry(server, &templates) {
                Ok(job) => {
                    debug!("Loaded job {} -> {}", job.name, job.target.display());
                    file.jobs.push(job);
                }
                Err(e) => file.rejected.push(e),
            }
        }
    }

    Ok(file)
}

fn entries<'a>(document: &'a Mapping, key: &str) -> impl Iterator<Item = &'a Mapping> {
    document
        .get(key)
        .and_then(Value::as_sequence)
        .into_iter()
        .flatten()
        .filter_map(Value::as_mapping)
}

fn resolve_entry(entry: &Mapping, templates: &HashMap<String, Mapping>) -> Result<Job> {
    let merged = merge_entry(entry, templates)?;
    let interpolated = interpolate_mapping(&merged);
    let config: JobConfig = serde_yaml_ng::from_value(Value::Mapping(interpolated))?;
    Job::try_from(config)
}

/// First pass: defaults, then template, then the entry itself.
fn merge_entry(entry: &Mapping, templates: &HashMap<String, Mapping>) -> Result<Mapping> {
    let mut merged = Mapping::new();
    merged.insert(Value::from("enabled"), Value::Bool(true));

    if let Some(template) = entry.get("template") {
        let name = template
            .as_str()
            .ok_or_else(|| RbtError::Config("`template` must be a string".to_string()))?;
        let template = templates.get(name).ok_or_else(|| {
            let server = entry
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("<unnamed>");
            RbtError::Config(format!("[{}] unknown template `{}`", server, name))
        })?;
        for (k, v) in template {
            merged.insert(k.clone(), v.clone());
        }
    }

    for (k, v) in entry {
        merged.insert(k.clone(), v.clone());
    }

    Ok(merged)
}

/// Second pass: substitute `{key}` in every string, using the merged
/// mapping's scalar values as the namespace.
fn interpolate_mapping(merged: &Mapping) -> Mapping {
    let vars: HashMap<String, String> = merged
        .iter()
        .filter_map(|(k, v)| Some((k.as_str()?.to_string(), scalar_text(v)?)))
        .collect();

    merged
        .iter()
        .map(|(k, v)| (k.clone(), interpolate_value(v, &vars)))
        .collect()
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn interpolate_value(value: &Value, vars: &HashMap<String, String>) -> Value {
    match value {
        Value::String(s) => Value::String(interpolate(s, vars)),
        Value::Sequence(items) => {
            Value::Sequence(items.iter().map(|v| interpolate_value(v, vars)).collect())
        }
        other => other.clone(),
    }
}

/// Replace `{key}` references in `input`. `{{` and `}}` produce literal braces.
pub fn interpolate(input: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") || tail.starts_with("}}") {
            out.push_str(&tail[..1]);
            rest = &tail[2..];
            continue;
        }

        if tail.starts_with('}') {
            out.push('}');
            rest = &tail[1..];
            continue;
        }

        match tail[1..].find(['{', '}']) {
            Some(end) if tail.as_bytes()[end + 1] == b'}' => {
                let key = &tail[1..end + 1];
                match vars.get(key) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&tail[..end + 2]),
                }
                rest = &tail[end + 2..];
            }
            _ => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    out
}
