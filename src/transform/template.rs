use std::fmt::Write;

use minijinja::{Environment, Error, ErrorKind, path_loader};

use crate::data::SiteData;
use crate::transform::Source;

/// Renders a page template with `minijinja`. Includes and `extends` resolve
/// relative to the page's directory; the template cache lives only for this
/// call, so edits are always picked up.
pub(super) fn render(source: &Source<'_>, data: &SiteData) -> anyhow::Result<Vec<u8>> {
    let text = source.text()?;

    let mut env = Environment::new();
    if let Some(dir) = source.path.parent() {
        env.set_loader(path_loader(dir.as_std_path().to_path_buf()));
    }
    env.add_filter("date", format_date);

    let template = env.template_from_named_str(source.path.as_str(), text)?;
    let html = template.render(data)?;

    Ok(html.into_bytes())
}

/// `{{ date | date("%Y") }}`, strftime syntax, defaults to `%Y-%m-%d`.
fn format_date(value: String, format: Option<String>) -> Result<String, Error> {
    let date = chrono::DateTime::parse_from_rfc3339(&value)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("not a date: {e}")))?;

    let mut out = String::new();
    write!(out, "{}", date.format(format.as_deref().unwrap_or("%Y-%m-%d")))
        .map_err(|_| Error::new(ErrorKind::InvalidOperation, "invalid date format"))?;

    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use camino::{Utf8Path, Utf8PathBuf};

    use super::*;
    use crate::data::MenuItem;

    #[test]
    fn renders_site_data() {
        let data = SiteData::new(
            vec![MenuItem::link("Home", "index.html"), MenuItem::link("About", "about.html")],
            serde_json::json!({ "name": "demo" }),
        );
        let source = Source::new(
            Utf8Path::new("index.html"),
            b"{% for m in menus %}<a href=\"{{ m.link }}\">{{ m.name }}</a>{% endfor %}|{{ pkg.name }}",
        );

        let html = render(&source, &data).unwrap();
        assert_eq!(
            String::from_utf8(html).unwrap(),
            "<a href=\"index.html\">Home</a><a href=\"about.html\">About</a>|demo"
        );
    }

    #[test]
    fn date_filter_formats_build_time() {
        let data = SiteData::default();
        let source = Source::new(Utf8Path::new("index.html"), b"{{ date | date(\"%Y\") }}");

        let html = String::from_utf8(render(&source, &data).unwrap()).unwrap();
        assert_eq!(html, data.date.format("%Y").to_string());
    }

    #[test]
    fn extends_layouts_next_to_the_page() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("layouts")).unwrap();
        fs::write(
            root.join("layouts/basic.html"),
            "<main>{% block body %}{% endblock %}</main>",
        )
        .unwrap();

        let page = root.join("about.html");
        let source = Source::new(
            &page,
            b"{% extends \"layouts/basic.html\" %}{% block body %}about{% endblock %}",
        );

        let html = render(&source, &SiteData::default()).unwrap();
        assert_eq!(String::from_utf8(html).unwrap(), "<main>about</main>");
    }

    #[test]
    fn syntax_errors_fail() {
        let source = Source::new(Utf8Path::new("index.html"), b"{% for %}");
        assert!(render(&source, &SiteData::default()).is_err());
    }
}
