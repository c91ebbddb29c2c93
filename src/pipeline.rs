//! The concrete tasks of a site project and the graphs built from them.
//!
//! Every transforming leaf reads all of its inputs, transforms them in
//! parallel and writes only if every file succeeded. A failed rebuild
//! therefore leaves the previous output in place, which is what the dev
//! server keeps serving.

use std::fs;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use rayon::prelude::*;

use crate::bundle::Bundler;
use crate::config::Config;
use crate::data::SiteData;
use crate::deploy::{self, Publisher};
use crate::error::{BuildError, IoResultExt};
use crate::io::{Matched, expand, remove_tree, write_all};
use crate::task::{Task, TaskNode, TaskResult, parallel, series};
use crate::transform::{IMAGEMIN, LINT, SASS, SCRIPT, Source, TEMPLATE, TransformRegistry};

/// One glob-to-directory transformation.
struct Step {
    base: Utf8PathBuf,
    pattern: String,
    out: Utf8PathBuf,
    transform: Option<&'static str>,
    extension: Option<&'static str>,
    skip_partials: bool,
}

/// A site project: configuration, transforms and template data, shared by
/// every task built from it.
#[derive(Debug, Clone)]
pub struct Project {
    config: Arc<Config>,
    registry: Arc<TransformRegistry>,
    data: Arc<SiteData>,
}

impl Project {
    pub fn new(config: Config, registry: TransformRegistry, data: SiteData) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            data: Arc::new(data),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// `src/assets/styles/*.scss` to staging CSS, partials skipped.
    pub fn style(&self) -> Task {
        let paths = &self.config.paths;
        self.step(
            "style",
            Step {
                base: paths.src.clone(),
                pattern: self.config.globs.styles.clone(),
                out: paths.staging.clone(),
                transform: Some(SASS),
                extension: Some("css"),
                skip_partials: true,
            },
        )
    }

    pub fn script(&self) -> Task {
        let paths = &self.config.paths;
        self.step(
            "script",
            Step {
                base: paths.src.clone(),
                pattern: self.config.globs.scripts.clone(),
                out: paths.staging.clone(),
                transform: Some(SCRIPT),
                extension: None,
                skip_partials: false,
            },
        )
    }

    pub fn page(&self) -> Task {
        let paths = &self.config.paths;
        self.step(
            "page",
            Step {
                base: paths.src.clone(),
                pattern: self.config.globs.pages.clone(),
                out: paths.staging.clone(),
                transform: Some(TEMPLATE),
                extension: None,
                skip_partials: false,
            },
        )
    }

    pub fn image(&self) -> Task {
        let paths = &self.config.paths;
        self.step(
            "image",
            Step {
                base: paths.src.clone(),
                pattern: self.config.globs.images.clone(),
                out: paths.dist.clone(),
                transform: Some(IMAGEMIN),
                extension: None,
                skip_partials: false,
            },
        )
    }

    pub fn font(&self) -> Task {
        let paths = &self.config.paths;
        self.step(
            "font",
            Step {
                base: paths.src.clone(),
                pattern: self.config.globs.fonts.clone(),
                out: paths.dist.clone(),
                transform: Some(IMAGEMIN),
                extension: None,
                skip_partials: false,
            },
        )
    }

    /// `public/**` copied verbatim into the artifact tree.
    pub fn extra(&self) -> Task {
        let paths = &self.config.paths;
        self.step(
            "extra",
            Step {
                base: paths.public.clone(),
                pattern: self.config.globs.extra.clone(),
                out: paths.dist.clone(),
                transform: None,
                extension: None,
                skip_partials: false,
            },
        )
    }

    /// Style-checks every script; all violations are reported together.
    pub fn lint(&self) -> Task {
        let project = self.clone();
        Task::new("lint", move || project.run_lint())
    }

    /// Removes the staging and artifact trees.
    pub fn clean(&self) -> Task {
        let config = self.config.clone();
        Task::new("clean", move || {
            for tree in [&config.paths.staging, &config.paths.dist] {
                if remove_tree(tree)? {
                    tracing::debug!("removed {tree}");
                }
            }
            Ok(())
        })
    }

    /// Bundles the staged pages into the artifact tree.
    pub fn useref(&self) -> Task {
        let project = self.clone();
        Task::new("useref", move || {
            let config = &project.config;
            let bundler = Bundler::new(
                &project.registry,
                &project.data,
                &config.bundle.search_path,
            );
            let outputs = bundler.run(&config.paths.staging, &config.globs.pages)?;
            write_all(&config.paths.dist, &outputs)?;
            tracing::debug!("wrote {} artifacts", outputs.len());
            Ok(())
        })
    }

    /// Marks the artifact tree as the result of a complete build.
    pub fn seal(&self) -> Task {
        let config = self.config.clone();
        Task::new("seal", move || deploy::seal(&config.paths.dist))
    }

    /// Publishes a sealed artifact tree to `branch`.
    pub fn upload(&self, publisher: Arc<dyn Publisher>, branch: impl Into<String>) -> Task {
        let config = self.config.clone();
        let branch = branch.into();
        Task::new("upload", move || {
            deploy::upload(publisher.as_ref(), &config.paths.dist, &branch)
        })
    }

    pub fn compile(&self) -> TaskNode {
        parallel([self.style(), self.script(), self.page()])
    }

    pub fn build(&self) -> TaskNode {
        series([
            self.clean().into(),
            parallel([
                series([self.compile(), self.useref().into()]),
                self.image().into(),
                self.font().into(),
                self.extra().into(),
            ]),
            self.seal().into(),
        ])
    }

    pub fn deploy(&self, publisher: Arc<dyn Publisher>, branch: impl Into<String>) -> TaskNode {
        series([self.build(), self.upload(publisher, branch).into()])
    }

    fn step(&self, name: &'static str, step: Step) -> Task {
        let project = self.clone();
        Task::new(name, move || project.run_step(&step))
    }

    fn run_step(&self, step: &Step) -> TaskResult {
        let files: Vec<Matched> = expand(&step.base, &step.pattern)?
            .into_iter()
            .filter(|file| !(step.skip_partials && is_partial(&file.rel)))
            .collect();

        let outputs = files
            .par_iter()
            .map(|file| {
                let data = fs::read(&file.path).at(&file.path)?;
                let data = match step.transform {
                    Some(name) => {
                        self.registry
                            .apply(name, &Source::new(&file.path, &data), &self.data)?
                    }
                    None => data,
                };
                let rel = match step.extension {
                    Some(ext) => file.rel.with_extension(ext),
                    None => file.rel.clone(),
                };
                Ok((rel, data))
            })
            .collect::<Result<Vec<_>, BuildError>>()?;

        write_all(&step.out, &outputs)?;
        tracing::debug!("{} file(s) into {}", outputs.len(), step.out);

        Ok(())
    }

    fn run_lint(&self) -> TaskResult {
        let files = expand(&self.config.paths.src, &self.config.globs.scripts)?;

        let reports = files
            .par_iter()
            .map(|file| {
                let data = fs::read(&file.path).at(&file.path)?;
                let report = self
                    .registry
                    .apply(LINT, &Source::new(&file.path, &data), &self.data)?;
                Ok(String::from_utf8_lossy(&report).trim().to_string())
            })
            .collect::<Result<Vec<_>, BuildError>>()?;

        let failed: Vec<_> = reports.into_iter().filter(|r| !r.is_empty()).collect();
        if failed.is_empty() {
            tracing::info!("{} script(s) clean", files.len());
            return Ok(());
        }

        Err(BuildError::LintViolation {
            count: failed.len(),
            report: failed.join("\n\n"),
        })
    }
}

/// Sass partials (`_name.scss`) are only ever imported.
fn is_partial(path: &Utf8Path) -> bool {
    path.file_name().is_some_and(|name| name.starts_with('_'))
}
