//! The only point where content transforms are invoked.
//!
//! A transform is an opaque collaborator: it receives a source file and the
//! shared [`SiteData`], and returns the transformed bytes or an error. The
//! registry is declared statically at startup; tests swap entries for
//! in-process fakes.

mod image;
mod lint;
mod minify;
mod process;
mod sass;
mod script;
mod template;

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use camino::Utf8Path;

use crate::data::SiteData;
use crate::error::BuildError;

pub const SASS: &str = "sass";
pub const SCRIPT: &str = "script";
pub const TEMPLATE: &str = "template";
pub const IMAGEMIN: &str = "imagemin";
pub const LINT: &str = "lint";
pub const MINIFY_JS: &str = "minify-js";
pub const MINIFY_CSS: &str = "minify-css";
pub const MINIFY_HTML: &str = "minify-html";

/// Input handed to a transform.
#[derive(Debug, Clone, Copy)]
pub struct Source<'a> {
    pub path: &'a Utf8Path,
    pub data: &'a [u8],
}

impl<'a> Source<'a> {
    pub fn new(path: &'a Utf8Path, data: &'a [u8]) -> Self {
        Self { path, data }
    }

    pub fn text(&self) -> anyhow::Result<&'a str> {
        Ok(std::str::from_utf8(self.data)?)
    }
}

pub type TransformFn =
    Arc<dyn Fn(&Source<'_>, &SiteData) -> anyhow::Result<Vec<u8>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct TransformRegistry {
    map: HashMap<&'static str, TransformFn>,
}

impl TransformRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The default collaborators.
    ///
    /// `script`, `lint` and `minify-js` shell out to `esbuild` and `eslint`,
    /// which have to be available in `PATH`.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry
            .register(SASS, sass::compile)
            .register(SCRIPT, script::transpile)
            .register(TEMPLATE, template::render)
            .register(IMAGEMIN, image::optimize)
            .register(LINT, lint::check)
            .register(MINIFY_JS, minify::js)
            .register(MINIFY_CSS, minify::css)
            .register(MINIFY_HTML, minify::html);
        registry
    }

    /// Adds a transform, replacing any previous one with the same name.
    pub fn register<F>(&mut self, name: &'static str, func: F) -> &mut Self
    where
        F: Fn(&Source<'_>, &SiteData) -> anyhow::Result<Vec<u8>> + Send + Sync + 'static,
    {
        self.map.insert(name, Arc::new(func));
        self
    }

    pub fn get(&self, name: &str) -> Result<&TransformFn, BuildError> {
        self.map
            .get(name)
            .ok_or_else(|| BuildError::UnknownTransform(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// Runs the named transform; collaborator errors become
    /// [`BuildError::TransformFailure`].
    pub fn apply(
        &self,
        name: &'static str,
        source: &Source<'_>,
        data: &SiteData,
    ) -> Result<Vec<u8>, BuildError> {
        let func = self.get(name)?;

        func(source, data).map_err(|source_err| BuildError::TransformFailure {
            transform: name,
            path: source.path.to_path_buf(),
            source: source_err,
        })
    }
}

impl Debug for TransformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.map.keys().collect();
        names.sort();
        f.debug_struct("TransformRegistry")
            .field("transforms", &names)
            .finish()
    }
}
