//! Account defaults shared by every request.
//!
//! A `Config` is built once at startup and handed to the client by value;
//! there is no hidden process-wide cache. Call-time options always win over
//! the defaults stored here.

use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
};

use crate::{EndiciaError, RequestOptions};

/// Process defaults for requests: account credentials, the test-mode flag,
/// and any other per-call fields an application wants applied everywhere.
///
/// Keys use the carrier's field names (`AccountID`, `RequesterID`,
/// `PassPhrase`, `Test`, ...).
#[derive(Clone, Debug, Default)]
pub struct Config {
    defaults: BTreeMap<String, String>,
    path: Option<PathBuf>,
    environment: Option<String>,
}

impl Config {
    /// An empty configuration: every request supplies its own fields.
    pub fn new() -> Self {
        Default::default()
    }

    /// Load defaults from a YAML file keyed by environment name:
    ///
    /// ```yaml
    /// production:
    ///   AccountID: "123456"
    ///   RequesterID: "abcd"
    ///   PassPhrase: "secret"
    ///   Test: "NO"
    /// ```
    ///
    /// A missing file or a missing environment section yields empty
    /// defaults; only a file that exists but fails to parse is an error.
    pub fn from_file<P: AsRef<Path>>(path: P, environment: &str) -> Result<Self, EndiciaError> {
        let mut config = Config {
            defaults: BTreeMap::new(),
            path: Some(path.as_ref().to_path_buf()),
            environment: Some(environment.to_string()),
        };
        config.reload()?;
        Ok(config)
    }

    /// Build defaults from `ENDICIA_ACCOUNT_ID`, `ENDICIA_REQUESTER_ID`,
    /// `ENDICIA_PASS_PHRASE` and (optionally) `ENDICIA_TEST`.
    pub fn from_env() -> Self {
        let mut config = Config::new();
        for (var, key) in [
            ("ENDICIA_ACCOUNT_ID", "AccountID"),
            ("ENDICIA_REQUESTER_ID", "RequesterID"),
            ("ENDICIA_PASS_PHRASE", "PassPhrase"),
            ("ENDICIA_TEST", "Test"),
        ] {
            if let Ok(value) = env::var(var) {
                config.defaults.insert(key.to_string(), value);
            }
        }
        config
    }

    /// Re-read the backing file, if this configuration came from one.
    /// Defaults set via [`Config::set`] are discarded in favor of the
    /// file's current contents.
    pub fn reload(&mut self) -> Result<(), EndiciaError> {
        let (path, environment) = match (&self.path, &self.environment) {
            (Some(p), Some(e)) => (p, e),
            _ => return Ok(()),
        };
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            // Missing file means "no defaults", not a failure.
            Err(_) => {
                self.defaults.clear();
                return Ok(());
            }
        };
        let doc: BTreeMap<String, BTreeMap<String, serde_yaml::Value>> =
            serde_yaml::from_str(&text).map_err(|e| EndiciaError::Config(e.to_string()))?;
        self.defaults.clear();
        if let Some(section) = doc.get(environment) {
            for (key, value) in section {
                if let Some(v) = scalar_to_string(value) {
                    self.defaults.insert(key.clone(), v);
                }
            }
        }
        Ok(())
    }

    /// Set a single default.
    pub fn set<K, V>(&mut self, key: K, value: V) -> &mut Self
    where
        K: ToString,
        V: ToString,
    {
        self.defaults.insert(key.to_string(), value.to_string());
        self
    }

    /// Look up a single default.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.defaults.get(key).map(String::as_str)
    }

    /// Merge call-time options over these defaults. Call-time keys win.
    pub fn merge(&self, options: &RequestOptions) -> RequestOptions {
        let mut merged = self.defaults.clone();
        for (key, value) in options {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        // The carrier's flag vocabulary, so `Test: true` behaves.
        serde_yaml::Value::Bool(b) => Some(if *b { "YES" } else { "NO" }.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::Config;
    use crate::RequestOptions;

    #[test]
    fn test_merge_call_time_options_win() {
        let mut config = Config::new();
        config.set("AccountID", 1).set("Test", "YES");

        let mut options = RequestOptions::new();
        options.insert("Test".to_string(), "NO".to_string());

        let merged = config.merge(&options);
        assert_eq!(merged.get("AccountID").unwrap(), "1");
        assert_eq!(merged.get("Test").unwrap(), "NO");
    }

    #[test]
    fn test_missing_file_yields_empty_defaults() {
        let config = Config::from_file("/nonexistent/endicia.yml", "production").unwrap();
        assert!(config.get("AccountID").is_none());
    }

    #[test]
    fn test_from_file_reads_environment_section() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "production:\n  AccountID: 792190\n  RequesterID: abc123\n  PassPhrase: secret\n\
             staging:\n  AccountID: \"000000\"\n  Test: true\n"
        )
        .unwrap();

        let config = Config::from_file(file.path(), "production").unwrap();
        assert_eq!(config.get("AccountID").unwrap(), "792190");
        assert_eq!(config.get("RequesterID").unwrap(), "abc123");
        assert!(config.get("Test").is_none());

        let staging = Config::from_file(file.path(), "staging").unwrap();
        assert_eq!(staging.get("AccountID").unwrap(), "000000");
        assert_eq!(staging.get("Test").unwrap(), "YES");
    }

    #[test]
    fn test_missing_environment_section_is_empty() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "production:\n  AccountID: 792190\n").unwrap();

        let config = Config::from_file(file.path(), "development").unwrap();
        assert!(config.get("AccountID").is_none());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "production: [not: a: mapping\n").unwrap();

        assert!(Config::from_file(file.path(), "production").is_err());
    }

    #[test]
    fn test_reload_picks_up_edits() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "production:\n  PassPhrase: before\n").unwrap();

        let mut config = Config::from_file(file.path(), "production").unwrap();
        assert_eq!(config.get("PassPhrase").unwrap(), "before");

        let mut rewrite = std::fs::File::create(file.path()).unwrap();
        write!(rewrite, "production:\n  PassPhrase: after\n").unwrap();

        config.reload().unwrap();
        assert_eq!(config.get("PassPhrase").unwrap(), "after");
    }
}
