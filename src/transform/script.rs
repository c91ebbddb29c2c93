use crate::data::SiteData;
use crate::transform::Source;
use crate::transform::process::run_filter;

/// Transpiles a single script down to ES2015 with `esbuild`, without
/// bundling its imports.
pub(super) fn transpile(source: &Source<'_>, _: &SiteData) -> anyhow::Result<Vec<u8>> {
    let sourcefile = format!("--sourcefile={}", source.path);
    run_filter(
        "esbuild",
        &["--loader=js", "--target=es2015", &sourcefile],
        source.data,
    )
}
