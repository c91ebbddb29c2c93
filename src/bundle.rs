//! Production bundling of the staging tree.
//!
//! Markup pages mark groups of asset references with build blocks:
//!
//! ```html
//! <!-- build:js assets/scripts/vendor.js -->
//! <script src="/node_modules/jquery/dist/jquery.js"></script>
//! <script src="assets/scripts/main.js"></script>
//! <!-- endbuild -->
//! ```
//!
//! Every reference in a block is resolved against the search path (first
//! base directory containing the file wins), the files are concatenated in
//! source order and the block is replaced by a single reference to the
//! merged output. Afterwards every output is optimized by its extension.
//! Staging files that no block consumed are carried over as they are, so
//! the artifact tree holds each of them exactly once.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Display;
use std::fs;
use std::ops::Range;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use rayon::prelude::*;
use regex::Regex;

use crate::data::SiteData;
use crate::error::{BuildError, IoResultExt};
use crate::io::{expand, normalize_path};
use crate::transform::{MINIFY_CSS, MINIFY_HTML, MINIFY_JS, Source, TransformRegistry};

static BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!--\s*build:(\w+)\s+(\S+)\s*-->(.*?)<!--\s*endbuild\s*-->").unwrap()
});

static SCRIPT_SRC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<script\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#).unwrap());

static LINK_HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<link\b[^>]*?\bhref\s*=\s*["']([^"']+)["']"#).unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetKind {
    Script,
    Style,
    /// Development-only markup, dropped from the artifact tree.
    Remove,
    Other(String),
}

impl AssetKind {
    fn parse(kind: &str) -> Self {
        match kind {
            "js" => AssetKind::Script,
            "css" => AssetKind::Style,
            "remove" => AssetKind::Remove,
            other => AssetKind::Other(other.to_string()),
        }
    }

    fn separator(&self) -> &'static [u8] {
        match self {
            AssetKind::Script => b";\n",
            _ => b"\n",
        }
    }
}

impl Display for AssetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetKind::Script => write!(f, "js"),
            AssetKind::Style => write!(f, "css"),
            AssetKind::Remove => write!(f, "remove"),
            AssetKind::Other(kind) => write!(f, "{kind}"),
        }
    }
}

/// A link found inside a build block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetReference {
    pub kind: AssetKind,
    pub target: String,
}

impl AssetReference {
    /// The target path without query string or fragment.
    pub fn path(&self) -> &str {
        let end = self.target.find(['?', '#']).unwrap_or(self.target.len());
        &self.target[..end]
    }
}

/// One `<!-- build:... -->` block of a markup file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildBlock {
    pub kind: AssetKind,
    /// Merged output, relative to the page (`/` anchors at the artifact root).
    pub output: String,
    pub references: Vec<AssetReference>,
    range: Range<usize>,
}

impl BuildBlock {
    /// Markup that takes the block's place. A script or style block without
    /// any file reference keeps its content, there is nothing to merge.
    fn replacement(&self, inner: &str) -> String {
        let merged = !self.references.is_empty();
        match self.kind {
            AssetKind::Script if merged => {
                format!("<script src=\"{}\"></script>", self.output)
            }
            AssetKind::Style if merged => {
                format!("<link rel=\"stylesheet\" href=\"{}\">", self.output)
            }
            AssetKind::Remove => String::new(),
            _ => inner.trim().to_string(),
        }
    }
}

/// Finds all build blocks in `markup`, in document order.
pub fn parse_blocks(markup: &str) -> Vec<BuildBlock> {
    BLOCK
        .captures_iter(markup)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let kind = AssetKind::parse(&caps[1]);
            let inner = &caps[3];

            let links: &Regex = match kind {
                AssetKind::Script => &*SCRIPT_SRC,
                AssetKind::Style => &*LINK_HREF,
                AssetKind::Remove | AssetKind::Other(_) => {
                    return Some(BuildBlock {
                        kind,
                        output: caps[2].to_string(),
                        references: Vec::new(),
                        range: whole.range(),
                    });
                }
            };

            let references = links
                .captures_iter(inner)
                .map(|link| AssetReference {
                    kind: kind.clone(),
                    target: link[1].to_string(),
                })
                .collect();

            Some(BuildBlock {
                kind,
                output: caps[2].to_string(),
                references,
                range: whole.range(),
            })
        })
        .collect()
}

/// Picks the optimizing transform for an output file by its extension.
pub fn optimizer_for(path: &Utf8Path) -> Option<&'static str> {
    match path.extension()? {
        "js" => Some(MINIFY_JS),
        "css" => Some(MINIFY_CSS),
        "html" | "htm" => Some(MINIFY_HTML),
        _ => None,
    }
}

pub struct Bundler<'a> {
    registry: &'a TransformRegistry,
    data: &'a SiteData,
    search_path: &'a [Utf8PathBuf],
}

impl<'a> Bundler<'a> {
    pub fn new(
        registry: &'a TransformRegistry,
        data: &'a SiteData,
        search_path: &'a [Utf8PathBuf],
    ) -> Self {
        Self {
            registry,
            data,
            search_path,
        }
    }

    /// Resolves `reference` found in the page at `markup` (relative to the
    /// staging root) to an existing file.
    pub fn resolve(
        &self,
        reference: &AssetReference,
        markup: &Utf8Path,
    ) -> Result<Utf8PathBuf, BuildError> {
        let target = reference.path();
        let rel = match target.strip_prefix('/') {
            Some(absolute) => Utf8PathBuf::from(absolute),
            None => markup.parent().unwrap_or(Utf8Path::new("")).join(target),
        };

        self.search_path
            .iter()
            .map(|base| normalize_path(&base.join(&rel)))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| BuildError::ReferenceResolution {
                reference: reference.target.clone(),
                markup: markup.to_path_buf(),
                search_path: self
                    .search_path
                    .iter()
                    .map(|p| p.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    /// Bundles every page matching `pages` below `staging`.
    ///
    /// Returns the optimized artifact tree as `(relative path, content)`
    /// pairs sorted by path. Nothing is written.
    pub fn run(
        &self,
        staging: &Utf8Path,
        pages: &str,
    ) -> Result<Vec<(Utf8PathBuf, Vec<u8>)>, BuildError> {
        let pages = expand(staging, pages)?;

        let mut outputs = Outputs::default();
        let mut consumed = HashSet::new();

        for page in &pages {
            let markup = fs::read_to_string(&page.path).at(&page.path)?;
            let html = self.rewrite(&page.rel, &markup, &mut outputs, &mut consumed)?;
            outputs.insert(page.rel.clone(), html.into_bytes())?;
        }

        for file in expand(staging, "**/*")? {
            if consumed.contains(&file.path) || outputs.contains(&file.rel) {
                continue;
            }
            let data = fs::read(&file.path).at(&file.path)?;
            outputs.insert(file.rel, data)?;
        }

        tracing::debug!(
            "bundling {} artifacts from {} pages",
            outputs.0.len(),
            pages.len()
        );

        outputs
            .0
            .into_par_iter()
            .map(|(rel, data)| {
                let data = match optimizer_for(&rel) {
                    Some(name) => self.registry.apply(name, &Source::new(&rel, &data), self.data)?,
                    None => data,
                };
                Ok::<_, BuildError>((rel, data))
            })
            .collect()
    }

    fn rewrite(
        &self,
        page: &Utf8Path,
        markup: &str,
        outputs: &mut Outputs,
        consumed: &mut HashSet<Utf8PathBuf>,
    ) -> Result<String, BuildError> {
        let mut html = String::with_capacity(markup.len());
        let mut cursor = 0;

        for block in parse_blocks(markup) {
            html.push_str(&markup[cursor..block.range.start]);
            cursor = block.range.end;

            let inner = &markup[block.range.clone()];
            html.push_str(&block.replacement(strip_markers(inner)));

            if block.references.is_empty() {
                if matches!(block.kind, AssetKind::Script | AssetKind::Style) {
                    tracing::warn!("{page}: build:{} block references no files", block.kind);
                }
                continue;
            }

            tracing::debug!(
                "{page}: merging {} {} file(s) into {}",
                block.references.len(),
                block.kind,
                block.output
            );

            let mut merged = Vec::new();
            for (i, reference) in block.references.iter().enumerate() {
                let path = self.resolve(reference, page)?;
                if i > 0 {
                    merged.extend_from_slice(block.kind.separator());
                }
                merged.extend(fs::read(&path).at(&path)?);
                consumed.insert(path);
            }

            let output = match block.output.strip_prefix('/') {
                Some(absolute) => Utf8PathBuf::from(absolute),
                None => page.parent().unwrap_or(Utf8Path::new("")).join(&block.output),
            };
            outputs.insert(normalize_path(&output), merged)?;
        }

        html.push_str(&markup[cursor..]);
        Ok(html)
    }
}

fn strip_markers(block: &str) -> &str {
    let start = block.find("-->").map_or(0, |i| i + 3);
    let end = block.rfind("<!--").unwrap_or(block.len());
    &block[start..end.max(start)]
}

/// Artifact contents keyed by relative path; the same path may be produced
/// twice only with identical content.
#[derive(Default)]
struct Outputs(BTreeMap<Utf8PathBuf, Vec<u8>>);

impl Outputs {
    fn insert(&mut self, rel: Utf8PathBuf, data: Vec<u8>) -> Result<(), BuildError> {
        match self.0.get(&rel) {
            Some(existing) if *existing == data => Ok(()),
            Some(_) => Err(BuildError::BundleConflict(rel)),
            None => {
                self.0.insert(rel, data);
                Ok(())
            }
        }
    }

    fn contains(&self, rel: &Utf8Path) -> bool {
        self.0.contains_key(rel)
    }
}
