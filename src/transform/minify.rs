use crate::data::SiteData;
use crate::transform::Source;
use crate::transform::process::run_filter;

pub(super) fn js(source: &Source<'_>, _: &SiteData) -> anyhow::Result<Vec<u8>> {
    run_filter("esbuild", &["--loader=js", "--minify"], source.data)
}

pub(super) fn css(source: &Source<'_>, _: &SiteData) -> anyhow::Result<Vec<u8>> {
    let options = grass::Options::default().style(grass::OutputStyle::Compressed);
    let css = grass::from_string(source.text()?, &options)
        .map_err(|e| anyhow::anyhow!("CSS minification error: {e}"))?;

    Ok(css.into_bytes())
}

/// Collapses whitespace and minifies inline `<style>` and `<script>` blocks.
pub(super) fn html(source: &Source<'_>, _: &SiteData) -> anyhow::Result<Vec<u8>> {
    let mut cfg = minify_html::Cfg::new();
    cfg.keep_closing_tags = true;
    cfg.keep_html_and_head_opening_tags = true;
    cfg.keep_comments = false;
    cfg.minify_css = true;
    cfg.minify_js = true;

    Ok(minify_html::minify(source.data, &cfg))
}

#[cfg(test)]
mod tests {
    use camino::Utf8Path;

    use super::*;

    #[test]
    fn css_is_compressed() {
        let source = Source::new(
            Utf8Path::new("a.css"),
            b"a {\n  color: red;\n}\n\nb {\n  margin: 0;\n}\n",
        );

        let out = css(&source, &SiteData::default()).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("a{color:red}"));
        assert!(out.contains("b{margin:0}"));
    }

    #[test]
    fn html_whitespace_collapses() {
        let page = b"<!DOCTYPE html>\n<html>\n  <head>\n    <title> Hi </title>\n  </head>\n  <body>\n    <!-- note -->\n    <p>  a   b  </p>\n  </body>\n</html>\n";
        let source = Source::new(Utf8Path::new("index.html"), page);

        let out = html(&source, &SiteData::default()).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.len() < page.len());
        assert!(!out.contains("note"));
        assert!(!out.contains("\n    "));
    }

    #[test]
    fn html_minification_is_deterministic() {
        let page = b"<html><body><style> a { color : red ; } </style><p> x </p></body></html>";
        let source = Source::new(Utf8Path::new("index.html"), page);

        let first = html(&source, &SiteData::default()).unwrap();
        let second = html(&source, &SiteData::default()).unwrap();
        assert_eq!(first, second);
    }
}
