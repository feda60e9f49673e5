use crate::errors::{Error, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// One element of the configuration tree.
///
/// Scalars of a TOML table become attributes, nested tables and arrays of
/// tables become children carrying the key as their name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigNode {
    pub name: String,
    pub attrs: BTreeMap<String, String>,
    pub children: Vec<ConfigNode>,
}

impl ConfigNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Attribute value by key
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    /// First direct child with the given name
    pub fn child(&self, name: &str) -> Option<&ConfigNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All direct children with the given name, in document order
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ConfigNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Depth-first search for a `tag` node, optionally requiring
    /// `key == value` on it
    pub fn find(&self, tag: &str, key: Option<&str>, value: Option<&str>) -> Option<&ConfigNode> {
        for child in &self.children {
            if child.name == tag {
                let matched = match (key, value) {
                    (Some(k), Some(v)) => child.attr(k) == Some(v),
                    (Some(k), None) => child.attrs.contains_key(k),
                    _ => true,
                };
                if matched {
                    return Some(child);
                }
            }
            if let Some(found) = child.find(tag, key, value) {
                return Some(found);
            }
        }
        None
    }

    fn from_table(name: &str, table: &toml::Table) -> Self {
        let mut node = ConfigNode::new(name);
        for (key, value) in table {
            match value {
                toml::Value::Table(inner) => node.children.push(ConfigNode::from_table(key, inner)),
                toml::Value::Array(items) if items.iter().all(|v| v.is_table()) && !items.is_empty() => {
                    for item in items {
                        if let toml::Value::Table(inner) = item {
                            node.children.push(ConfigNode::from_table(key, inner));
                        }
                    }
                }
                toml::Value::Array(items) => {
                    let joined = items.iter().map(scalar_to_string).collect::<Vec<_>>().join(",");
                    node.attrs.insert(key.clone(), joined);
                }
                scalar => {
                    node.attrs.insert(key.clone(), scalar_to_string(scalar));
                }
            }
        }
        node
    }
}

fn scalar_to_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Integer(i) => i.to_string(),
        toml::Value::Float(f) => f.to_string(),
        toml::Value::Boolean(b) => b.to_string(),
        toml::Value::Datetime(d) => d.to_string(),
        other => other.to_string(),
    }
}

/// Lookup interface modules use to pull settings and routing data.
///
/// `locate` may block on the first call (lazy root load) and during reload.
pub trait ConfigRegistry: Send + Sync {
    /// Find the first `tag` node inside `section` whose `key` attribute equals
    /// `value`. Without a key the first `tag` node wins.
    fn locate(&self, section: &str, tag: &str, key: Option<&str>, value: Option<&str>) -> Option<ConfigNode>;

    /// Re-read the backing document
    fn reload(&self) -> Result<()>;
}

#[derive(Debug, Clone)]
enum RegistrySource {
    File(PathBuf),
    Inline(String),
}

/// Registry backed by a TOML document; top-level tables are sections.
#[derive(Debug)]
pub struct TomlConfigRegistry {
    source: RegistrySource,
    root: RwLock<Option<Arc<ConfigNode>>>,
}

impl TomlConfigRegistry {
    /// Registry reading `path` on first use
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: RegistrySource::File(path.into()),
            root: RwLock::new(None),
        }
    }

    /// Registry over an in-memory document
    pub fn from_toml_str(document: impl Into<String>) -> Self {
        Self {
            source: RegistrySource::Inline(document.into()),
            root: RwLock::new(None),
        }
    }

    fn parse(&self) -> Result<ConfigNode> {
        let (name, text) = match &self.source {
            RegistrySource::File(path) => (path.display().to_string(), std::fs::read_to_string(path)?),
            RegistrySource::Inline(text) => ("<inline>".to_string(), text.clone()),
        };
        let table: toml::Table = text.parse().map_err(|e| Error::parse(name, e))?;
        Ok(ConfigNode::from_table("document", &table))
    }

    fn root(&self) -> Result<Arc<ConfigNode>> {
        if let Some(root) = self.root.read().as_ref() {
            return Ok(root.clone());
        }
        let mut slot = self.root.write();
        if let Some(root) = slot.as_ref() {
            return Ok(root.clone());
        }
        let root = Arc::new(self.parse()?);
        *slot = Some(root.clone());
        tracing::debug!("Configuration registry loaded");
        Ok(root)
    }
}

impl ConfigRegistry for TomlConfigRegistry {
    fn locate(&self, section: &str, tag: &str, key: Option<&str>, value: Option<&str>) -> Option<ConfigNode> {
        let root = match self.root() {
            Ok(root) => root,
            Err(e) => {
                tracing::error!("Configuration registry unavailable: {}", e);
                return None;
            }
        };
        root.child(section)?.find(tag, key, value).cloned()
    }

    fn reload(&self) -> Result<()> {
        let root = Arc::new(self.parse()?);
        *self.root.write() = Some(root);
        tracing::info!("Configuration registry reloaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DIALPLAN: &str = r#"
[dialplan]
[[dialplan.context]]
name = "public"

[[dialplan.context]]
name = "default"

[[dialplan.context.extension]]
name = "echo"
destination = "9196"

[[dialplan.context.extension.action]]
application = "answer"

[[dialplan.context.extension.action]]
application = "echo"
"#;

    #[test]
    fn test_locate_by_key() {
        let registry = TomlConfigRegistry::from_toml_str(DIALPLAN);
        let context = registry
            .locate("dialplan", "context", Some("name"), Some("default"))
            .unwrap();
        let extension = context.child("extension").unwrap();
        assert_eq!(extension.attr("destination"), Some("9196"));
        let apps: Vec<_> = extension
            .children_named("action")
            .filter_map(|a| a.attr("application"))
            .collect();
        assert_eq!(apps, vec!["answer", "echo"]);
    }

    #[test]
    fn test_locate_missing() {
        let registry = TomlConfigRegistry::from_toml_str(DIALPLAN);
        assert!(registry.locate("dialplan", "context", Some("name"), Some("nope")).is_none());
        assert!(registry.locate("directory", "domain", None, None).is_none());
    }

    #[test]
    fn test_reload_picks_up_changes() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[modules]\n[[modules.load]]\nmodule = \"loopback\"").unwrap();
        let registry = TomlConfigRegistry::from_file(file.path());
        assert!(registry.locate("modules", "load", Some("module"), Some("loopback")).is_some());

        writeln!(file, "[[modules.load]]\nmodule = \"dptools\"").unwrap();
        assert!(registry.locate("modules", "load", Some("module"), Some("dptools")).is_none());
        registry.reload().unwrap();
        assert!(registry.locate("modules", "load", Some("module"), Some("dptools")).is_some());
    }

    #[test]
    fn test_broken_document_reports_not_found() {
        let registry = TomlConfigRegistry::from_toml_str("[dialplan");
        assert!(registry.locate("dialplan", "context", None, None).is_none());
        assert!(registry.reload().is_err());
    }
}
