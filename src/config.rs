//! Typed project configuration.
//!
//! Defaults describe the conventional layout (`src/`, `public/`, `temp/`,
//! `dist/`). An optional `kiln.toml` in the project root overrides any
//! field; command-line flags are applied on top by the caller.

use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::data::{MenuItem, default_menus};
use crate::error::ConfigError;
use crate::io::normalize_path;

pub const CONFIG_FILE: &str = "kiln.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Project root all relative paths are resolved against.
    #[serde(skip)]
    pub root: Utf8PathBuf,
    pub paths: Paths,
    pub globs: Globs,
    pub server: ServerConfig,
    pub bundle: BundleConfig,
    pub deploy: DeployConfig,
    pub site: SiteConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Paths {
    pub src: Utf8PathBuf,
    pub public: Utf8PathBuf,
    /// Intermediate compiled output, served during development.
    pub staging: Utf8PathBuf,
    /// Bundled output, the deploy source.
    pub dist: Utf8PathBuf,
}

/// Source globs; all but `extra` are relative to `paths.src`, `extra` is
/// relative to `paths.public`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Globs {
    pub styles: String,
    pub scripts: String,
    pub pages: String,
    pub images: String,
    pub fonts: String,
    pub extra: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub port: u16,
    pub reload_port: u16,
    /// Layered roots, first existing file wins. Left empty, it becomes
    /// `[staging, src, public]`.
    pub roots: Vec<Utf8PathBuf>,
    /// Request prefix to directory, consulted before `roots`.
    pub routes: BTreeMap<String, Utf8PathBuf>,
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BundleConfig {
    /// Left empty, it becomes `[staging, root]`.
    pub search_path: Vec<Utf8PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeployConfig {
    pub branch: String,
    pub remote: String,
    pub cache_dir: Utf8PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    pub menus: Vec<MenuItem>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: Utf8PathBuf::from("."),
            paths: Paths::default(),
            globs: Globs::default(),
            server: ServerConfig::default(),
            bundle: BundleConfig::default(),
            deploy: DeployConfig::default(),
            site: SiteConfig::default(),
        }
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            src: "src".into(),
            public: "public".into(),
            staging: "temp".into(),
            dist: "dist".into(),
        }
    }
}

impl Default for Globs {
    fn default() -> Self {
        Self {
            styles: "assets/styles/*.scss".into(),
            scripts: "assets/scripts/*.js".into(),
            pages: "*.html".into(),
            images: "assets/images/**/*".into(),
            fonts: "assets/fonts/**/*".into(),
            extra: "**/*".into(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 2080,
            reload_port: 35729,
            roots: Vec::new(),
            routes: BTreeMap::from([("/node_modules".into(), "node_modules".into())]),
            debounce_ms: 200,
        }
    }
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            search_path: Vec::new(),
        }
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            branch: "gh-pages".into(),
            remote: "origin".into(),
            cache_dir: ".cache/publish".into(),
            message: "Updates".into(),
        }
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            menus: default_menus(),
        }
    }
}

impl Config {
    /// Reads `kiln.toml` from `root` when present and anchors every relative
    /// path at `root`.
    pub fn load(root: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let root = root.as_ref();
        let path = root.join(CONFIG_FILE);

        let config = match fs::read_to_string(&path) {
            Ok(text) => Self::parse(&text).map_err(|source| ConfigError::Toml {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(source) => return Err(ConfigError::Read { path, source }),
        };

        Ok(config.with_root(root))
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Rebases all relative paths onto `root` and derives the unset
    /// server roots and search path from `paths`.
    pub fn with_root(mut self, root: impl AsRef<Utf8Path>) -> Self {
        let root = root.as_ref();
        let anchor = |path: &mut Utf8PathBuf| {
            if path.is_relative() {
                *path = normalize_path(&root.join(&*path));
            }
        };

        anchor(&mut self.paths.src);
        anchor(&mut self.paths.public);
        anchor(&mut self.paths.staging);
        anchor(&mut self.paths.dist);
        anchor(&mut self.deploy.cache_dir);
        self.server.roots.iter_mut().for_each(anchor);
        self.server.routes.values_mut().for_each(anchor);
        self.bundle.search_path.iter_mut().for_each(anchor);

        let paths = &self.paths;
        if self.server.roots.is_empty() {
            self.server.roots = vec![
                paths.staging.clone(),
                paths.src.clone(),
                paths.public.clone(),
            ];
        }
        if self.bundle.search_path.is_empty() {
            self.bundle.search_path = vec![paths.staging.clone(), normalize_path(root)];
        }

        self.root = root.to_path_buf();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_conventional_layout() {
        let config = Config::default().with_root("/site");

        assert_eq!(config.paths.staging, "/site/temp");
        assert_eq!(config.paths.dist, "/site/dist");
        assert_eq!(
            config.server.roots,
            vec![
                Utf8PathBuf::from("/site/temp"),
                Utf8PathBuf::from("/site/src"),
                Utf8PathBuf::from("/site/public"),
            ]
        );
        assert_eq!(
            config.server.routes.get("/node_modules"),
            Some(&Utf8PathBuf::from("/site/node_modules"))
        );
        assert_eq!(
            config.bundle.search_path,
            vec![Utf8PathBuf::from("/site/temp"), Utf8PathBuf::from("/site")]
        );
        assert_eq!(config.deploy.branch, "gh-pages");
        assert_eq!(config.server.port, 2080);
    }

    #[test]
    fn file_overrides_selected_fields() {
        let config = Config::parse(
            r#"
            [paths]
            dist = "public_html"

            [server]
            port = 3000

            [deploy]
            branch = "pages"

            [[site.menus]]
            name = "Blog"
            link = "blog.html"
            "#,
        )
        .unwrap();

        assert_eq!(config.paths.dist, "public_html");
        assert_eq!(config.paths.src, "src");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.reload_port, 35729);
        assert_eq!(config.deploy.branch, "pages");
        assert_eq!(config.site.menus, vec![MenuItem::link("Blog", "blog.html")]);
    }

    #[test]
    fn staging_override_carries_to_roots_and_search_path() {
        let config = Config::parse("[paths]\nstaging = \"build\"\n")
            .unwrap()
            .with_root("/site");

        assert_eq!(config.paths.staging, "/site/build");
        assert_eq!(
            config.server.roots,
            vec![
                Utf8PathBuf::from("/site/build"),
                Utf8PathBuf::from("/site/src"),
                Utf8PathBuf::from("/site/public"),
            ]
        );
        assert_eq!(
            config.bundle.search_path,
            vec![Utf8PathBuf::from("/site/build"), Utf8PathBuf::from("/site")]
        );
    }

    #[test]
    fn explicit_roots_are_kept() {
        let config = Config::parse("[server]\nroots = [\"temp\", \"static\"]\n")
            .unwrap()
            .with_root("/site");

        assert_eq!(
            config.server.roots,
            vec![Utf8PathBuf::from("/site/temp"), Utf8PathBuf::from("/site/static")]
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Config::parse("[paths]\nbogus = 1\n").is_err());
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();

        let config = Config::load(root).unwrap();
        assert_eq!(config.paths.src, root.join("src"));
        assert_eq!(config.root, root);
    }

    #[test]
    fn absolute_paths_are_kept() {
        let config = Config::parse("[paths]\ndist = \"/var/www\"\n")
            .unwrap()
            .with_root("/site");
        assert_eq!(config.paths.dist, "/var/www");
    }
}
