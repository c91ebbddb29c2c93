//! An interactive development session: dev server, live reload and the
//! watch rules that keep the staging tree current.

use std::time::Duration;

use camino::Utf8Path;

use crate::error::KilnError;
use crate::pipeline::Project;
use crate::server::{DevServer, Signal};
use crate::watch::{WatchRule, Watcher, watch};

/// Everything a running session holds on to. Dropping it stops watching
/// and shuts the server down.
pub struct Session {
    // the watcher goes first, it feeds the server's reload channel
    watcher: Watcher,
    server: DevServer,
}

impl Session {
    pub fn start(project: &Project) -> Result<Self, KilnError> {
        let config = project.config();
        let server = DevServer::start(&config.server)?;

        let watcher = watch(
            rules(project)?,
            Duration::from_millis(config.server.debounce_ms),
            server.signals(),
        )?;

        Ok(Self { watcher, server })
    }

    pub fn server(&self) -> &DevServer {
        &self.server
    }

    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }
}

/// Sources are rebuilt into the staging tree; anything served straight from
/// disk only needs the browser to reload.
fn rules(project: &Project) -> Result<Vec<WatchRule>, KilnError> {
    let config = project.config();
    let paths = &config.paths;
    let globs = &config.globs;
    let at = |base: &Utf8Path, glob: &str| base.join(glob).into_string();

    Ok(vec![
        WatchRule::run(&at(&paths.src, &globs.styles), project.style().into())?
            .then(Signal::Inject),
        WatchRule::run(&at(&paths.src, &globs.scripts), project.script().into())?
            .then(Signal::Reload),
        WatchRule::run(&at(&paths.src, &globs.pages), project.page().into())?
            .then(Signal::Reload),
        WatchRule::reload(&at(&paths.src, &globs.images))?,
        WatchRule::reload(&at(&paths.src, &globs.fonts))?,
        WatchRule::reload(&at(&paths.public, &globs.extra))?,
    ])
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use camino::Utf8PathBuf;

    use super::*;
    use crate::config::Config;
    use crate::data::SiteData;
    use crate::transform::TransformRegistry;

    #[test]
    fn rules_cover_every_source_kind() {
        let config = Config::default().with_root("/site");
        let project = Project::new(config, TransformRegistry::new(), SiteData::default());

        let rules = rules(&project).unwrap();
        let patterns: Vec<_> = rules.iter().map(WatchRule::pattern).collect();

        assert_eq!(
            patterns,
            vec![
                "/site/src/assets/styles/*.scss",
                "/site/src/assets/scripts/*.js",
                "/site/src/*.html",
                "/site/src/assets/images/**/*",
                "/site/src/assets/fonts/**/*",
                "/site/public/**/*",
            ]
        );
        assert!(rules[2].matches(Path::new("/site/src/about.html")));
        assert!(!rules[2].matches(Path::new("/site/src/layouts/basic.html")));
    }

    #[test]
    fn session_serves_and_shuts_down() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("src/assets/styles")).unwrap();

        let mut config = Config::default().with_root(&root);
        config.server.port = 0;
        config.server.reload_port = 0;
        let project = Project::new(config, TransformRegistry::new(), SiteData::default());

        let session = Session::start(&project).unwrap();
        assert_ne!(session.server().addr().port(), 0);
        assert!(session.watcher().dispatcher().is_idle());
        drop(session);
    }
}
