//! Root directory layout and per-case/per-POD subpaths.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use regex::{Captures, Regex};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::core::case::Case;
use crate::core::version::bump_version;
use crate::error::ConfigError;
use crate::io::settings::PathSettings;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$(?:\{(?P<braced>\w+)\}|(?P<bare>\w+))").unwrap());

/// Resolved root directories for a run.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PathManager {
    pub code_root: PathBuf,
    pub diagnostics_dir: PathBuf,
    pub conventions_dir: PathBuf,
    pub obs_data_root: PathBuf,
    pub model_data_root: PathBuf,
    pub working_dir: PathBuf,
    pub output_dir: PathBuf,
}

/// What [`PathManager::prepare`] may do to a pre-existing working directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkdirPolicy {
    pub keep_temp: bool,
    pub clean_working_dir: bool,
}

/// Per-case directories. Working and output dirs always share `version`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ModelPaths {
    pub model_data_dir: PathBuf,
    pub model_wk_dir: PathBuf,
    pub model_out_dir: PathBuf,
    pub version: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PodPaths {
    pub pod_code_dir: PathBuf,
    pub pod_obs_data: PathBuf,
    pub pod_wk_dir: PathBuf,
    pub pod_out_dir: PathBuf,
}

impl PathManager {
    /// Resolve every configured path against `code_root` and the process environment.
    ///
    /// An unset or blank working directory falls back to the output directory.
    pub fn resolve(code_root: &Path, settings: &PathSettings) -> Result<Self> {
        let code_root = if code_root.is_absolute() {
            normalize(code_root)
        } else {
            let cwd = std::env::current_dir().context("read current directory")?;
            normalize(&cwd.join(code_root))
        };
        let lookup = |key: &str| std::env::var(key).ok();
        let resolve = |raw: &str| resolve_path(raw, &code_root, lookup);

        let output_dir = resolve(&settings.output_dir);
        let working_dir = match settings.working_dir.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => resolve(raw),
            _ => output_dir.clone(),
        };
        let manager = Self {
            diagnostics_dir: resolve(&settings.diagnostics_dir),
            conventions_dir: resolve(&settings.conventions_dir),
            obs_data_root: resolve(&settings.obs_data_root),
            model_data_root: resolve(&settings.model_data_root),
            working_dir,
            output_dir,
            code_root,
        };
        debug!(?manager, "resolved paths");
        Ok(manager)
    }

    /// Check required roots and create the writable ones.
    ///
    /// A working directory left over from an earlier run is removed only when
    /// `policy.clean_working_dir` is set, temp files are not kept, and it is
    /// distinct from the output directory.
    #[instrument(skip_all, fields(working_dir = %self.working_dir.display()))]
    pub fn prepare(&self, policy: WorkdirPolicy) -> Result<()> {
        check_dirs(
            &[self.code_root.as_path(), self.obs_data_root.as_path()],
            false,
        )?;

        if self.working_dir.exists() && !policy.keep_temp && self.working_dir != self.output_dir {
            if policy.clean_working_dir {
                self.remove_working_dir()?;
            } else {
                warn!(
                    "working directory exists from a previous run; keeping it \
                     (pass --clean-working-dir to remove it). New case directories \
                     get a fresh version suffix"
                );
            }
        }

        check_dirs(
            &[
                self.model_data_root.as_path(),
                self.working_dir.as_path(),
                self.output_dir.as_path(),
            ],
            true,
        )
    }

    fn remove_working_dir(&self) -> Result<()> {
        for protected in [&self.code_root, &self.output_dir, &self.obs_data_root] {
            if protected.starts_with(&self.working_dir) {
                bail!(
                    "refusing to remove working directory {}: it contains {}",
                    self.working_dir.display(),
                    protected.display()
                );
            }
        }
        info!("removing working directory from previous run");
        fs::remove_dir_all(&self.working_dir)
            .with_context(|| format!("remove {}", self.working_dir.display()))
    }

    /// Derive the case's data, working and output directories.
    ///
    /// Unless `overwrite` is set, the working dir is bumped past anything in
    /// either tree and the output dir is forced to the same version.
    pub fn model_paths(&self, case: &Case, overwrite: bool) -> Result<ModelPaths> {
        let case_dir = format!("diag_{}_{}_{}", case.name, case.first_year, case.last_year);
        let model_data_dir = match case.case_root_dir.as_deref() {
            Some(root) => resolve_path(root, &self.code_root, |key| std::env::var(key).ok()),
            None => self.model_data_root.join(&case.name),
        };
        let mut model_wk_dir = self.working_dir.join(&case_dir);
        let mut model_out_dir = self.output_dir.join(&case_dir);
        let mut version = 0;
        if !overwrite {
            (model_wk_dir, version) =
                bump_path(&model_wk_dir, None, &[self.output_dir.as_path()])?;
            (model_out_dir, _) = bump_path(&model_out_dir, Some(version), &[])?;
        }
        Ok(ModelPaths {
            model_data_dir,
            model_wk_dir,
            model_out_dir,
            version,
        })
    }

    /// Derive a POD's directories from its case's already-versioned ones.
    pub fn pod_paths(&self, pod: &str, model: &ModelPaths) -> PodPaths {
        PodPaths {
            pod_code_dir: self.diagnostics_dir.join(pod),
            pod_obs_data: self.obs_data_root.join(pod),
            pod_wk_dir: model.model_wk_dir.join(pod),
            pod_out_dir: model.model_out_dir.join(pod),
        }
    }
}

/// Filesystem-backed [`bump_version`].
///
/// Only the final component is versioned, so parent directories need not be
/// valid UTF-8. A file name that is not valid UTF-8 is an error.
pub fn bump_path(
    path: &Path,
    new_version: Option<u32>,
    shadow_dirs: &[&Path],
) -> Result<(PathBuf, u32)> {
    let (Some(parent), Some(file_name)) = (path.parent(), path.file_name()) else {
        bail!("cannot version {}: no file name", path.display());
    };
    let Some(file_name) = file_name.to_str() else {
        bail!("cannot version {}: file name is not valid UTF-8", path.display());
    };
    let mut dirs = shadow_dirs.to_vec();
    dirs.push(parent);
    let (bumped, version) = bump_version(file_name, new_version, &[], |candidate| {
        dirs.iter().any(|dir| dir.join(candidate).exists())
    });
    Ok((parent.join(bumped), version))
}

/// Verify each of `dirs` is a directory, creating missing ones if `create`.
pub fn check_dirs(dirs: &[&Path], create: bool) -> Result<()> {
    for dir in dirs {
        if dir.is_dir() {
            continue;
        }
        if dir.exists() {
            return Err(ConfigError::NotADirectory(dir.to_path_buf()).into());
        }
        if !create {
            return Err(ConfigError::MissingDirectory(dir.to_path_buf()).into());
        }
        fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    }
    Ok(())
}

/// Recursively copy the contents of `src` into `dst`, replacing files.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<u64> {
    let mut copied = 0;
    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walk {}", src.display()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("{} is outside {}", entry.path().display(), src.display()))?;
        let to = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&to).with_context(|| format!("create directory {}", to.display()))?;
        } else {
            fs::copy(entry.path(), &to).with_context(|| {
                format!("copy {} to {}", entry.path().display(), to.display())
            })?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Expand `$VAR`/`${VAR}` and a leading `~`, then anchor relative paths at `root`.
///
/// Unknown variables are left as written. The result is lexically normalized.
pub fn resolve_path<F>(raw: &str, root: &Path, lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    let expanded = ENV_VAR_RE.replace_all(raw, |caps: &Captures<'_>| {
        let key = caps
            .name("braced")
            .or_else(|| caps.name("bare"))
            .map_or("", |m| m.as_str());
        lookup(key).unwrap_or_else(|| caps[0].to_string())
    });

    let expanded = expand_home(&expanded, &lookup);

    let path = Path::new(&expanded);
    if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&root.join(path))
    }
}

fn expand_home<F>(path: &str, lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match lookup("HOME") {
            Some(home) => format!("{home}{rest}"),
            None => path.to_string(),
        },
        _ => path.to_string(),
    }
}

/// Collapse `.` and `..` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}
