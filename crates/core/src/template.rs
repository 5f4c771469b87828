//! Template/script collaborator contract.
//!
//! The metadata engine owns a key/value store, substitutes `{{key}}`
//! placeholders, and runs the source's scripts (`download`, `build`,
//! `version`). The build pipeline consumes it through [`TemplateEngine`];
//! [`KeyStore`] is a minimal in-process implementation whose script
//! runner is pluggable, enough for embedding and for tests.

use std::collections::HashMap;
use std::path::Path;

/// Key/value store with `{{key}}` substitution and script execution.
pub trait TemplateEngine {
    fn set_key(&mut self, name: &str, value: &str);

    fn get_key(&self, name: &str) -> Option<String>;

    /// Substitute every known `{{key}}`; unknown placeholders are left
    /// untouched so deferred keys survive serialization.
    fn render(&self, template: &str) -> String;

    /// Run one script action. Returns false on failure; the script's
    /// stdout is available from `last_script_output`.
    fn run_script(&mut self, domain: &str, action: &str, work_dir: &Path, args: &[String])
    -> bool;

    fn last_script_output(&self) -> String;
}

/// Script callback for [`KeyStore`]: `Some(stdout)` on success, `None`
/// on failure.
pub type ScriptRunner = Box<dyn FnMut(&str, &str, &Path, &[String]) -> Option<String>>;

/// In-memory [`TemplateEngine`].
#[derive(Default)]
pub struct KeyStore {
    keys: HashMap<String, String>,
    runner: Option<ScriptRunner>,
    last_output: String,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a script runner; without one every script fails.
    pub fn with_runner(runner: ScriptRunner) -> Self {
        Self {
            runner: Some(runner),
            ..Self::default()
        }
    }
}

impl TemplateEngine for KeyStore {
    fn set_key(&mut self, name: &str, value: &str) {
        self.keys.insert(name.to_string(), value.to_string());
    }

    fn get_key(&self, name: &str) -> Option<String> {
        self.keys.get(name).cloned()
    }

    fn render(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            let Some(len) = rest[start + 2..].find("}}") else {
                break;
            };
            let key = &rest[start + 2..start + 2 + len];
            out.push_str(&rest[..start]);
            match self.keys.get(key) {
                Some(value) => out.push_str(value),
                None => {
                    out.push_str("{{");
                    out.push_str(key);
                    out.push_str("}}");
                }
            }
            rest = &rest[start + 2 + len + 2..];
        }
        out.push_str(rest);
        out
    }

    fn run_script(
        &mut self,
        domain: &str,
        action: &str,
        work_dir: &Path,
        args: &[String],
    ) -> bool {
        match &mut self.runner {
            Some(runner) => match runner(domain, action, work_dir, args) {
                Some(output) => {
                    self.last_output = output;
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    fn last_script_output(&self) -> String {
        self.last_output.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_known_keys() {
        let mut store = KeyStore::new();
        store.set_key("version", "1.0");
        store.set_key("arch", "x86_64");
        assert_eq!(
            store.render("pkg~{{version}}.{{arch}}.pkg"),
            "pkg~1.0.x86_64.pkg"
        );
    }

    #[test]
    fn test_render_leaves_unknown_keys() {
        let store = KeyStore::new();
        assert_eq!(store.render("v{{develver}}"), "v{{develver}}");
    }

    #[test]
    fn test_render_unterminated_placeholder() {
        let mut store = KeyStore::new();
        store.set_key("a", "x");
        assert_eq!(store.render("{{a}} and {{broken"), "x and {{broken");
    }

    #[test]
    fn test_script_runner_captures_output() {
        let mut store =
            KeyStore::with_runner(Box::new(|domain, action, _dir, _args| {
                (domain == "source" && action == "version").then(|| "git-1234\n".to_string())
            }));
        assert!(store.run_script("source", "version", Path::new("/tmp"), &[]));
        assert_eq!(store.last_script_output(), "git-1234\n");
        assert!(!store.run_script("source", "build", Path::new("/tmp"), &[]));
    }

    #[test]
    fn test_no_runner_means_failure() {
        let mut store = KeyStore::new();
        assert!(!store.run_script("source", "download", Path::new("/tmp"), &[]));
    }
}
