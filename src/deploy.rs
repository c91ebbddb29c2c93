//! Publishing the artifact tree.
//!
//! A successful `build` seals the artifact tree by writing [`BUILD_STAMP`]
//! into it, holding a digest of everything it produced. Publishing refuses
//! to run unless the stamp is present and still matches the tree, so a
//! failed, cleaned or hand-edited build is never shipped.

use std::fs;
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::{BuildError, IoResultExt, PublishError};
use crate::io::{copy_tree, expand};

/// Marker file written into the artifact tree by the last build step.
pub const BUILD_STAMP: &str = ".kiln-build";

/// Ships a finalized artifact tree to a remote branch.
pub trait Publisher: Send + Sync {
    fn publish(&self, tree: &Utf8Path, branch: &str) -> Result<(), PublishError>;
}

/// Force-pushes the artifact tree as a single orphan commit.
///
/// The commit is assembled in a scratch repository in `cache_dir`, so the
/// project's own working tree and index are never touched.
#[derive(Debug, Clone)]
pub struct GitPublisher {
    /// Repository whose remote is published to.
    pub repo: Utf8PathBuf,
    pub remote: String,
    pub cache_dir: Utf8PathBuf,
    pub message: String,
}

impl GitPublisher {
    fn remote_url(&self) -> Result<String, PublishError> {
        let key = format!("remote.{}.url", self.remote);
        match git(&self.repo, &["config", "--get", &key]) {
            Ok(url) if !url.is_empty() => Ok(url),
            Ok(_) | Err(PublishError::Git { .. }) => {
                Err(PublishError::MissingRemote(self.remote.clone()))
            }
            Err(e) => Err(e),
        }
    }
}

impl Publisher for GitPublisher {
    fn publish(&self, tree: &Utf8Path, branch: &str) -> Result<(), PublishError> {
        let url = self.remote_url()?;

        if self.cache_dir.exists() {
            fs::remove_dir_all(&self.cache_dir)?;
        }
        let copied = copy_tree(tree, &self.cache_dir, &|path| {
            path.file_name().is_some_and(|name| name == BUILD_STAMP)
        })?;
        tracing::info!("publishing {copied} files to {}:{branch}", self.remote);

        let dir = &self.cache_dir;
        git(dir, &["init", "-q"])?;
        git(dir, &["checkout", "-q", "--orphan", branch])?;
        git(dir, &["add", "-A"])?;
        git(dir, &["commit", "-q", "-m", &self.message])?;
        git(dir, &["push", "-q", "--force", &url, &format!("HEAD:refs/heads/{branch}")])?;

        Ok(())
    }
}

fn git(dir: &Utf8Path, args: &[&str]) -> Result<String, PublishError> {
    tracing::debug!("git {}", args.join(" "));

    let output = Command::new("git").arg("-C").arg(dir).args(args).output()?;

    if !output.status.success() {
        return Err(PublishError::Git {
            command: args.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Digest over the relative paths and contents of every file in `tree`,
/// the stamp itself excluded.
pub fn digest(tree: &Utf8Path) -> Result<String, BuildError> {
    let mut hasher = blake3::Hasher::new();

    for file in expand(tree, "**/*")? {
        if file.rel == BUILD_STAMP {
            continue;
        }
        let data = fs::read(&file.path).at(&file.path)?;
        hasher.update(file.rel.as_str().as_bytes());
        hasher.update(&[0]);
        hasher.update(&(data.len() as u64).to_le_bytes());
        hasher.update(&data);
    }

    Ok(hasher.finalize().to_hex().to_string())
}

/// Marks `tree` as the output of a successful build.
pub fn seal(tree: &Utf8Path) -> Result<(), BuildError> {
    let stamp = tree.join(BUILD_STAMP);
    fs::create_dir_all(tree).at(tree)?;
    fs::write(&stamp, digest(tree)?).at(&stamp)
}

/// Fails unless `tree` was sealed by a build and left unchanged since.
pub fn check_built(tree: &Utf8Path) -> Result<(), BuildError> {
    let stamp = tree.join(BUILD_STAMP);

    let expected = match fs::read_to_string(&stamp) {
        Ok(digest) => digest,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(BuildError::BuildPrecondition(format!(
                "{tree} holds no successful build, run `kiln build` first"
            )));
        }
        Err(e) => return Err(BuildError::fs(stamp, e)),
    };

    if expected.trim() != digest(tree)? {
        return Err(BuildError::BuildPrecondition(format!(
            "{tree} changed since the last build"
        )));
    }

    Ok(())
}

/// Hands a sealed artifact tree to `publisher`.
pub fn upload(publisher: &dyn Publisher, tree: &Utf8Path, branch: &str) -> Result<(), BuildError> {
    check_built(tree)?;
    publisher.publish(tree, branch)?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Remembers every publish request instead of pushing anywhere.
    #[derive(Default)]
    pub(crate) struct Recorder {
        pub calls: Mutex<Vec<(Utf8PathBuf, String)>>,
    }

    impl Publisher for Recorder {
        fn publish(&self, tree: &Utf8Path, branch: &str) -> Result<(), PublishError> {
            self.calls
                .lock()
                .unwrap()
                .push((tree.to_path_buf(), branch.to_string()));
            Ok(())
        }
    }

    fn dist() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let dist = root.join("dist");
        fs::create_dir_all(dist.join("assets")).unwrap();
        fs::write(dist.join("index.html"), "<p>hi</p>").unwrap();
        fs::write(dist.join("assets/app.js"), "a()").unwrap();
        (dir, dist)
    }

    #[test]
    fn unsealed_tree_is_not_published() {
        let (_dir, dist) = dist();
        let recorder = Recorder::default();

        let err = upload(&recorder, &dist, "gh-pages").unwrap_err();

        assert!(matches!(err, BuildError::BuildPrecondition(_)));
        assert!(recorder.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn sealed_tree_is_published_to_branch() {
        let (_dir, dist) = dist();
        let recorder = Recorder::default();

        seal(&dist).unwrap();
        upload(&recorder, &dist, "pages").unwrap();

        assert_eq!(
            *recorder.calls.lock().unwrap(),
            vec![(dist.clone(), "pages".to_string())]
        );
    }

    #[test]
    fn edits_after_sealing_invalidate_the_build() {
        let (_dir, dist) = dist();
        seal(&dist).unwrap();
        check_built(&dist).unwrap();

        fs::write(dist.join("index.html"), "<p>edited</p>").unwrap();
        assert!(matches!(
            check_built(&dist),
            Err(BuildError::BuildPrecondition(_))
        ));
    }

    #[test]
    fn digest_depends_on_names_and_contents() {
        let (_dir, dist) = dist();
        let before = digest(&dist).unwrap();

        fs::rename(dist.join("assets/app.js"), dist.join("assets/main.js")).unwrap();
        assert_ne!(digest(&dist).unwrap(), before);

        fs::rename(dist.join("assets/main.js"), dist.join("assets/app.js")).unwrap();
        assert_eq!(digest(&dist).unwrap(), before);
    }
}
