//! Collision-free `.vN` path versioning.
//!
//! A path may carry a version marker either as a terminal suffix
//! (`out/case.v3`, `out/case.v3/`) or just before a file extension
//! (`plot.v3.png`). Only the last marker counts: in `A.v23.bar.v45.foo` the
//! version is 45 and `A.v23.bar` is the base name.
//!
//! The functions here are pure. Existence checks are injected as a closure so
//! the filesystem adapter lives in [`crate::io::paths`].

use std::sync::LazyLock;

use regex::Regex;

const SEP: char = '/';

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<base>.*?)(?:\.v(?P<version>\d+))?$").unwrap());

/// A path split into the pieces that versioning rewrites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedName {
    pub dir: String,
    pub base: String,
    pub version: Option<u32>,
    pub ext: String,
    pub trailing_sep: bool,
}

impl VersionedName {
    /// Split `path` into `(dir, base, version, ext)`.
    pub fn parse(path: &str) -> Self {
        let trailing_sep = path.ends_with(SEP);
        let trimmed = if trailing_sep {
            path.trim_end_matches(SEP)
        } else {
            path
        };
        let (dir, file) = split_dir(trimmed);

        let (base, version, ext) = match split_version(file) {
            (base, Some(version)) => (base, Some(version), ""),
            (_, None) => {
                // Maybe it has an extension and then a version number.
                let (stem, ext) = split_extension(file);
                let (base, version) = split_version(stem);
                (base, version, ext)
            }
        };

        Self {
            dir: dir.to_string(),
            base: base.to_string(),
            version,
            ext: ext.to_string(),
            trailing_sep,
        }
    }

    /// Reassemble in `dir` with `version`; version 0 means no marker.
    pub fn assemble_in(&self, dir: &str, version: u32) -> String {
        let file = if version > 0 {
            format!("{}.v{}{}", self.base, version, self.ext)
        } else {
            format!("{}{}", self.base, self.ext)
        };
        let mut out = join(dir, &file);
        if self.trailing_sep {
            out.push(SEP);
        }
        out
    }

    pub fn assemble(&self, version: u32) -> String {
        self.assemble_in(&self.dir, version)
    }
}

/// Return a path that collides with nothing `exists` reports, plus its version.
///
/// With `new_version` set the path is rewritten to exactly that version and
/// returned without probing. Otherwise the version is incremented from the
/// parsed one (or 0) until the reassembled name is free in the path's own
/// directory and in every directory of `shadow_dirs`.
pub fn bump_version<F>(
    path: &str,
    new_version: Option<u32>,
    shadow_dirs: &[&str],
    exists: F,
) -> (String, u32)
where
    F: Fn(&str) -> bool,
{
    let name = VersionedName::parse(path);
    if let Some(version) = new_version {
        return (name.assemble(version), version);
    }

    let mut dirs: Vec<&str> = shadow_dirs.to_vec();
    dirs.push(&name.dir);

    let mut version = name.version.unwrap_or(0);
    while version < u32::MAX
        && dirs
            .iter()
            .any(|dir| exists(&name.assemble_in(dir, version)))
    {
        version += 1;
    }
    (name.assemble(version), version)
}

fn split_dir(path: &str) -> (&str, &str) {
    match path.rfind(SEP) {
        Some(idx) => {
            let head = &path[..=idx];
            let stripped = head.trim_end_matches(SEP);
            let dir = if stripped.is_empty() { head } else { stripped };
            (dir, &path[idx + 1..])
        }
        None => ("", path),
    }
}

fn split_version(name: &str) -> (&str, Option<u32>) {
    let Some(caps) = VERSION_RE.captures(name) else {
        return (name, None);
    };
    match caps.name("version").and_then(|m| m.as_str().parse().ok()) {
        Some(version) => (caps.name("base").map_or(name, |m| m.as_str()), Some(version)),
        None => (name, None),
    }
}

/// Split off the last `.ext`, ignoring leading dots of hidden files.
fn split_extension(name: &str) -> (&str, &str) {
    let leading = name.len() - name.trim_start_matches('.').len();
    match name[leading..].rfind('.') {
        Some(idx) => name.split_at(leading + idx),
        None => (name, ""),
    }
}

fn join(dir: &str, file: &str) -> String {
    if dir.is_empty() {
        file.to_string()
    } else if dir.ends_with(SEP) {
        format!("{dir}{file}")
    } else {
        format!("{dir}{SEP}{file}")
    }
}
