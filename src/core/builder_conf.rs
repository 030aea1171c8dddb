//! Per-worker configuration written by the master
//!
//! The worker-side build tool reads a shell style `KEY="value"` file. Lists
//! are joined with spaces and booleans become `yes`/`no`.

use std::fmt::Write as _;

/// One configuration value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfValue {
    /// Plain string
    Text(String),
    /// Space separated list
    List(Vec<String>),
    /// `yes`/`no`
    Flag(bool),
}

impl ConfValue {
    fn render(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::List(items) => items.join(" "),
            Self::Flag(flag) => if *flag { "yes" } else { "no" }.to_string(),
        }
    }
}

/// Ordered key/value configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuilderConf {
    entries: Vec<(String, ConfValue)>,
}

impl BuilderConf {
    /// Empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a key, replacing an earlier value in place
    #[must_use]
    pub fn with(mut self, key: &str, value: ConfValue) -> Self {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key.to_string(), value));
        }
        self
    }

    /// Value of a key
    pub fn get(&self, key: &str) -> Option<&ConfValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Serialize, one key per line
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.entries {
            let _ = writeln!(out, "{key}=\"{}\"", value.render().replace('"', "\\\""));
        }
        out
    }
}

/// Inputs for the configuration of one worker
#[derive(Debug, Clone)]
pub struct BuilderConfParams<'a> {
    /// Ports tree on the worker
    pub tree_path: &'a str,
    /// Packages directory on the worker
    pub packages_path: &'a str,
    /// Packager identity
    pub packager: String,
    /// Target architecture
    pub target_architecture: &'a str,
    /// Secondary target architectures
    pub secondary_architectures: &'a [String],
    /// Build untested ports
    pub allow_untested: bool,
    /// Accept sources without checksums
    pub allow_unsafe_sources: bool,
    /// Also create source packages
    pub create_source_packages: bool,
}

impl BuilderConfParams<'_> {
    /// Build the configuration
    pub fn to_conf(&self) -> BuilderConf {
        BuilderConf::new()
            .with("TREE_PATH", ConfValue::Text(self.tree_path.to_string()))
            .with("PACKAGES_PATH", ConfValue::Text(self.packages_path.to_string()))
            .with("PACKAGER", ConfValue::Text(self.packager.clone()))
            .with(
                "TARGET_ARCHITECTURE",
                ConfValue::Text(self.target_architecture.to_string()),
            )
            .with(
                "SECONDARY_TARGET_ARCHITECTURES",
                ConfValue::List(self.secondary_architectures.to_vec()),
            )
            .with("ALLOW_UNTESTED", ConfValue::Flag(self.allow_untested))
            .with("ALLOW_UNSAFE_SOURCES", ConfValue::Flag(self.allow_unsafe_sources))
            .with(
                "CREATE_SOURCE_PACKAGES",
                ConfValue::Flag(self.create_source_packages),
            )
    }
}

/// Default packager identity of a worker
pub fn default_packager(builder_name: &str) -> String {
    format!("Builder {builder_name} <hpkg-builder@haiku-os.org>")
}
