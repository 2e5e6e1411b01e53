//! Project label detection.
//!
//! A directory maps to a canonical project name: the repository name from
//! the source-control remote when one exists, the directory's basename
//! otherwise. Path arguments are allow-listed before any subprocess sees
//! them.

use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;
use std::process::Command;
use tracing::debug;

lazy_static! {
    static ref SAFE_PATH: Regex = Regex::new(r"^[A-Za-z0-9/_\-. ]+$").unwrap();
}

/// Derive a project label for a directory.
pub fn detect_project(dir: &Path) -> String {
    let fallback = basename(dir);

    let Some(dir_str) = dir.to_str() else {
        return fallback;
    };
    if !SAFE_PATH.is_match(dir_str) || !dir.is_dir() {
        return fallback;
    }

    match remote_origin_name(dir_str) {
        Some(name) => name,
        None => fallback,
    }
}

/// Repository name from `git config --get remote.origin.url`, with `.git`
/// stripped. `None` when the directory has no usable remote.
fn remote_origin_name(dir: &str) -> Option<String> {
    let output = Command::new("git")
        .args(["-C", dir, "config", "--get", "remote.origin.url"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let url = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if url.is_empty() {
        return None;
    }
    let name = repo_name_from_url(&url)?;
    debug!("Project from remote origin: {}", name);
    Some(name)
}

/// Last path component of a remote URL, `.git` removed. Handles both
/// `https://host/user/repo.git` and `git@host:user/repo.git` shapes.
pub fn repo_name_from_url(url: &str) -> Option<String> {
    let tail = url
        .rsplit(|c| c == '/' || c == ':')
        .next()?
        .trim()
        .trim_end_matches(".git");
    if tail.is_empty() {
        None
    } else {
        Some(tail.to_string())
    }
}

/// Resolve an encoded transcript-tree directory name (a hyphen-joined
/// absolute path such as `-Users-dev-Projects-my-app`) back to a project
/// label: everything after the `projects` segment, hyphen-joined.
pub fn project_from_encoded_dir(encoded: &str) -> Option<String> {
    let segments: Vec<&str> = encoded.split('-').filter(|s| !s.is_empty()).collect();
    let position = segments
        .iter()
        .position(|segment| segment.eq_ignore_ascii_case("projects"))?;
    let remainder = &segments[position + 1..];
    if remainder.is_empty() {
        return None;
    }
    Some(remainder.join("-"))
}

fn basename(dir: &Path) -> String {
    dir.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.to_string_lossy().into_owned())
}
