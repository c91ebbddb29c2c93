use std::fmt::Display;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Instant;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use console::Style;
use glob::{MatchOptions, Pattern, glob_with};
use indicatif::ProgressStyle;

use crate::error::{BuildError, IoResultExt};

const ANSI_BLUE: Style = Style::new().blue();

/// `*` never crosses a path separator, `**` does.
pub(crate) const MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

static TASK_STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_spinner()
        .template("{spinner:.green} [{elapsed}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
});

pub(crate) fn task_style() -> &'static ProgressStyle {
    &TASK_STYLE
}

pub fn as_overhead(s: Instant) -> impl Display {
    let e = Instant::now();
    let f = format!("(+{}ms)", e.duration_since(s).as_millis());
    ANSI_BLUE.apply_to(f)
}

/// A file matched by a glob, with its path relative to the glob base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matched {
    pub path: Utf8PathBuf,
    pub rel: Utf8PathBuf,
}

/// Builds the absolute glob for `pattern` below `base`, escaping any glob
/// metacharacters in `base` itself.
pub fn anchored(base: &Utf8Path, pattern: &str) -> String {
    format!(
        "{}/{}",
        Pattern::escape(base.as_str().trim_end_matches('/')),
        pattern.trim_start_matches('/')
    )
}

/// Expands `pattern` below `base` into the matching files, sorted by path.
/// A missing `base` yields no files.
pub fn expand(base: &Utf8Path, pattern: &str) -> Result<Vec<Matched>, BuildError> {
    let mut files = Vec::new();

    for entry in glob_with(&anchored(base, pattern), MATCH)? {
        let path = entry.map_err(|e| {
            let path = Utf8PathBuf::from_path_buf(e.path().to_path_buf())
                .unwrap_or_else(|_| base.to_path_buf());
            BuildError::fs(path, e.into_error())
        })?;
        let path = Utf8PathBuf::try_from(path)?;

        if !path.is_file() {
            continue;
        }

        let rel = path
            .strip_prefix(base)
            .map(Utf8Path::to_path_buf)
            .unwrap_or_else(|_| path.clone());

        files.push(Matched { path, rel });
    }

    files.sort_by(|a, b| a.rel.cmp(&b.rel));
    Ok(files)
}

/// Writes every `(relative path, content)` pair below `root`.
pub fn write_all<D: AsRef<[u8]>>(
    root: &Utf8Path,
    files: &[(Utf8PathBuf, D)],
) -> Result<(), BuildError> {
    for (rel, data) in files {
        let path = root.join(rel);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }

        fs::write(&path, data).at(&path)?;
    }

    Ok(())
}

/// Delete a whole directory tree. Returns whether anything was removed; an
/// absent tree is not an error.
pub fn remove_tree(path: &Utf8Path) -> Result<bool, BuildError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(BuildError::fs(path, e)),
    }
}

/// Recursively copy `src` into `dst`, skipping entries for which `skip`
/// returns true. Returns the number of copied files.
pub fn copy_tree(
    src: impl AsRef<Path>,
    dst: impl AsRef<Path>,
    skip: &dyn Fn(&Path) -> bool,
) -> std::io::Result<usize> {
    fs::create_dir_all(&dst)?;
    let mut copied = 0;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        if skip(&entry.path()) {
            continue;
        }

        let filetype = entry.file_type()?;
        if filetype.is_dir() {
            copied += copy_tree(entry.path(), dst.as_ref().join(entry.file_name()), skip)?;
        } else {
            fs::copy(entry.path(), dst.as_ref().join(entry.file_name()))?;
            copied += 1;
        }
    }

    Ok(copied)
}

/// Normalize a path, removing things like `.` and `..`.
///
/// CAUTION: This does not resolve symlinks (unlike [`std::fs::canonicalize`]).
///
/// Adapted from
/// <https://github.com/rust-lang/cargo/blob/f7acf448fc127df9a77c52cc2bba027790ac4931/crates/cargo-util/src/paths.rs#L76-L116>
pub(crate) fn normalize_path(path: &Utf8Path) -> Utf8PathBuf {
    let mut components = path.components().peekable();
    let mut ret = if let Some(c @ Utf8Component::Prefix(..)) = components.peek().cloned() {
        components.next();
        Utf8PathBuf::from(c.as_str())
    } else {
        Utf8PathBuf::new()
    };

    for component in components {
        match component {
            Utf8Component::Prefix(..) => {}
            Utf8Component::RootDir => {
                ret.push(Utf8Component::RootDir);
            }
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if ret.ends_with(Utf8Component::ParentDir) {
                    ret.push(Utf8Component::ParentDir);
                } else {
                    let popped = ret.pop();
                    if !popped && !ret.has_root() {
                        ret.push(Utf8Component::ParentDir);
                    }
                }
            }
            Utf8Component::Normal(c) => {
                ret.push(c);
            }
        }
    }
    ret
}
