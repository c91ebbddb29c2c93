//! Template data handed to the `template` transform.
//!
//! The value is built once per command invocation and shared by reference
//! afterwards, so every page rendered during one build sees the same
//! timestamp.

use std::fs;

use camino::Utf8Path;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One entry of the site navigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuItem {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<MenuItem>,
}

impl MenuItem {
    pub fn link(name: &str, link: &str) -> Self {
        Self {
            name: name.into(),
            icon: None,
            link: Some(link.into()),
            children: Vec::new(),
        }
    }
}

/// Navigation used when `kiln.toml` doesn't declare any.
pub fn default_menus() -> Vec<MenuItem> {
    vec![
        MenuItem {
            icon: Some("aperture".into()),
            ..MenuItem::link("Home", "index.html")
        },
        MenuItem::link("Features", "features.html"),
        MenuItem::link("About", "about.html"),
        MenuItem {
            children: vec![
                MenuItem::link("Twitter", "https://twitter.com/w_zce"),
                MenuItem::link("About", "https://weibo.com/zceme"),
                MenuItem {
                    name: "divider".into(),
                    icon: None,
                    link: None,
                    children: Vec::new(),
                },
                MenuItem::link("About", "https://github.com/zce"),
            ],
            ..MenuItem::link("Contact", "#")
        },
    ]
}

/// Immutable rendering context: navigation, project metadata and the moment
/// the build started.
#[derive(Debug, Clone, Serialize)]
pub struct SiteData {
    pub menus: Vec<MenuItem>,
    pub pkg: serde_json::Value,
    pub date: DateTime<Local>,
}

impl SiteData {
    /// Captures the current time.
    pub fn new(menus: Vec<MenuItem>, pkg: serde_json::Value) -> Self {
        Self {
            menus,
            pkg,
            date: Local::now(),
        }
    }

    /// Reads `package.json` from the project root, if there is one.
    pub fn load(root: &Utf8Path, menus: Vec<MenuItem>) -> Result<Self, ConfigError> {
        let path = root.join("package.json");

        let pkg = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).map_err(|source| ConfigError::Json {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => serde_json::Value::Null,
            Err(source) => return Err(ConfigError::Read { path, source }),
        };

        Ok(Self::new(menus, pkg))
    }
}

impl Default for SiteData {
    fn default() -> Self {
        Self::new(default_menus(), serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_package_json_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        fs::write(root.join("package.json"), r#"{"name":"site","version":"1.2.0"}"#).unwrap();

        let data = SiteData::load(root, default_menus()).unwrap();
        assert_eq!(data.pkg["name"], "site");
        assert_eq!(data.menus.len(), 4);
    }

    #[test]
    fn missing_package_json_is_null() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();

        let data = SiteData::load(root, Vec::new()).unwrap();
        assert!(data.pkg.is_null());
    }

    #[test]
    fn serializes_date_as_string() {
        let data = SiteData::default();
        let value = serde_json::to_value(&data).unwrap();
        assert!(value["date"].is_string());
        assert!(value["menus"][3]["children"].is_array());
        assert!(value["menus"][1].get("children").is_none());
    }
}
