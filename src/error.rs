use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

/// Failure of a single unit of build work.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("{count} file(s) with lint violations:\n{report}")]
    LintViolation { count: usize, report: String },

    #[error("Transform '{transform}' failed on {path}:\n{source}")]
    TransformFailure {
        transform: &'static str,
        path: Utf8PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Couldn't resolve '{reference}' referenced from {markup} (search path: {search_path})")]
    ReferenceResolution {
        reference: String,
        markup: Utf8PathBuf,
        search_path: String,
    },

    #[error("Bundle output {0} is produced twice with different content")]
    BundleConflict(Utf8PathBuf),

    #[error("Filesystem error at {path}: {source}")]
    FileSystem {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Publishing failed:\n{0}")]
    Publish(#[from] PublishError),

    #[error("Build precondition failed: {0}")]
    BuildPrecondition(String),

    #[error("Unknown transform '{0}'")]
    UnknownTransform(String),

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Task panicked: {0}")]
    Panicked(String),
}

impl BuildError {
    pub(crate) fn fs(path: impl AsRef<Utf8Path>, source: std::io::Error) -> Self {
        BuildError::FileSystem {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

/// Attaches the offending path to I/O failures.
pub(crate) trait IoResultExt<T> {
    fn at(self, path: impl AsRef<Utf8Path>) -> Result<T, BuildError>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn at(self, path: impl AsRef<Utf8Path>) -> Result<T, BuildError> {
        self.map_err(|e| BuildError::fs(path, e))
    }
}

/// The failure signal of a task graph, always naming the leaf that failed.
#[derive(Debug, Error)]
#[error("Task '{task}' failed:\n{source}")]
pub struct TaskError {
    pub task: String,
    #[source]
    pub source: BuildError,
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Couldn't run git: {0}")]
    Io(#[from] std::io::Error),

    #[error("`git {command}` failed:\n{stderr}")]
    Git { command: String, stderr: String },

    #[error("Remote '{0}' has no url configured")]
    MissingRemote(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read {path}: {source}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid {path}:\n{source}")]
    Toml {
        path: Utf8PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid {path}:\n{source}")]
    Json {
        path: Utf8PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),
}

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("Couldn't bind {what} port {port}: {source}")]
    Bind {
        what: &'static str,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Couldn't start the server runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Top-level error of a command invocation.
#[derive(Debug, Error)]
pub enum KilnError {
    #[error(transparent)]
    Task(#[from] TaskError),

    #[error("Configuration error:\n{0}")]
    Config(#[from] ConfigError),

    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),

    #[error("Error while serving:\n{0}")]
    Serve(#[from] ServeError),

    #[error("Couldn't install the Ctrl-C handler: {0}")]
    Interrupt(#[from] ctrlc::Error),
}
