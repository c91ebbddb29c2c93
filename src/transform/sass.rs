use crate::data::SiteData;
use crate::transform::Source;

/// Compiles Sass/SCSS to expanded CSS with `grass`. Imports resolve relative
/// to the stylesheet's directory.
pub(super) fn compile(source: &Source<'_>, _: &SiteData) -> anyhow::Result<Vec<u8>> {
    let mut options = grass::Options::default().style(grass::OutputStyle::Expanded);
    if let Some(dir) = source.path.parent() {
        options = options.load_path(dir.as_std_path());
    }

    let css = grass::from_string(source.text()?, &options)
        .map_err(|e| anyhow::anyhow!("Sass compilation error: {e}"))?;

    Ok(css.into_bytes())
}

#[cfg(test)]
mod tests {
    use camino::Utf8Path;

    use super::*;

    #[test]
    fn compiles_nested_rules() {
        let source = Source::new(
            Utf8Path::new("main.scss"),
            b"$c: red;\n.nav { a { color: $c; } }\n",
        );

        let css = compile(&source, &SiteData::default()).unwrap();
        let css = String::from_utf8(css).unwrap();
        assert!(css.contains(".nav a {"));
        assert!(css.contains("color: red;"));
    }

    #[test]
    fn reports_syntax_errors() {
        let source = Source::new(Utf8Path::new("broken.scss"), b".nav { color: ");
        assert!(compile(&source, &SiteData::default()).is_err());
    }
}
