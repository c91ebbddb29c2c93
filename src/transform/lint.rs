use crate::data::SiteData;
use crate::transform::Source;
use crate::transform::process::run_piped;

/// Style-checks a script with `eslint`.
///
/// Returns the violation report, which is empty for a clean file. A crash
/// of the linter itself (exit status 2, missing config) is an error.
pub(super) fn check(source: &Source<'_>, _: &SiteData) -> anyhow::Result<Vec<u8>> {
    let output = run_piped(
        "eslint",
        &["--stdin", "--stdin-filename", source.path.as_str(), "--format", "stylish"],
        source.data,
    )?;

    match output.status.code() {
        Some(0) => Ok(Vec::new()),
        Some(1) => Ok(output.stdout),
        _ => anyhow::bail!(
            "eslint exited with {}:\n{}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        ),
    }
}
