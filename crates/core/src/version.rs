//! Version resolution.
//!
//! The authoritative version template is the newest changelog entry.
//! Because resolution rewrites the `version` attribute in place, the
//! template is preserved across runs in a `realversion` attribute and
//! restored from there first. Development sources additionally run the
//! source's `version` script and expose its output as the `develver`
//! key, so a template like `1.0+{{develver}}` tracks the checkout.

use tracing::info;

use crate::build::BuildConfig;
use crate::descriptor::Document;
use crate::template::TemplateEngine;
use crate::{BuildError, Result};

/// Resolve the build's version string, updating both the engine keys
/// (`version`, maybe `develver`) and the changelog entry.
///
/// Without any changelog the version is simply empty.
pub fn resolve_version(
    doc: &mut Document,
    engine: &mut dyn TemplateEngine,
    config: &BuildConfig,
) -> Result<String> {
    let Some(entry) = doc.changelog_entry() else {
        engine.set_key("version", "");
        return Ok(String::new());
    };

    let raw = doc
        .attr(entry, "realversion")
        .or_else(|| doc.attr(entry, "version"))
        .unwrap_or_default()
        .to_string();

    let devel = doc
        .source_element()
        .is_some_and(|s| doc.attr(s, "devel") == Some("true"));
    if devel {
        if !engine.run_script("source", "version", &config.source_dir, &[]) {
            return Err(BuildError::ScriptFailure {
                domain: "source".to_string(),
                action: "version".to_string(),
            });
        }
        let develver = engine.last_script_output().trim().to_string();
        engine.set_key("develver", &develver);
        // Keep the unexpanded template recoverable for the next run.
        doc.set_attr(entry, "realversion", &raw);
    }

    let rendered = engine.render(&raw);
    engine.set_key("version", &rendered);
    doc.set_attr(entry, "version", &rendered);
    info!("resolved version '{}'", rendered);
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::KeyStore;
    use tempfile::TempDir;

    fn config() -> (TempDir, BuildConfig) {
        let temp = TempDir::new().unwrap();
        let config = BuildConfig::new(temp.path());
        (temp, config)
    }

    #[test]
    fn test_plain_version_passes_through() {
        let (_t, config) = config();
        let mut doc = Document::parse(
            r#"<metadata>
  <source name="s" />
  <changelog>
    <entry version="1.2" />
    <entry version="1.1" />
  </changelog>
</metadata>"#,
        )
        .unwrap();
        let mut engine = KeyStore::new();

        let version = resolve_version(&mut doc, &mut engine, &config).unwrap();
        assert_eq!(version, "1.2");
        assert_eq!(engine.get_key("version").as_deref(), Some("1.2"));
    }

    #[test]
    fn test_no_changelog_means_empty_version() {
        let (_t, config) = config();
        let mut doc =
            Document::parse(r#"<metadata><source name="s" /></metadata>"#).unwrap();
        let mut engine = KeyStore::new();

        assert_eq!(resolve_version(&mut doc, &mut engine, &config).unwrap(), "");
        assert_eq!(engine.get_key("version").as_deref(), Some(""));
    }

    #[test]
    fn test_devel_source_runs_version_script() {
        let (_t, config) = config();
        let mut doc = Document::parse(
            r#"<metadata>
  <source name="s" devel="true" />
  <changelog>
    <entry version="1.0+{{develver}}" />
  </changelog>
</metadata>"#,
        )
        .unwrap();
        let mut engine = KeyStore::with_runner(Box::new(|_, action, _, _| {
            (action == "version").then(|| "r42\n".to_string())
        }));

        let version = resolve_version(&mut doc, &mut engine, &config).unwrap();
        assert_eq!(version, "1.0+r42");

        // The template survives in realversion for the next run.
        let entry = doc.changelog_entry().unwrap();
        assert_eq!(doc.attr(entry, "version"), Some("1.0+r42"));
        assert_eq!(doc.attr(entry, "realversion"), Some("1.0+{{develver}}"));
    }

    #[test]
    fn test_realversion_restores_template() {
        let (_t, config) = config();
        let mut doc = Document::parse(
            r#"<metadata>
  <source name="s" devel="true" />
  <changelog>
    <entry version="1.0+r41" realversion="1.0+{{develver}}" />
  </changelog>
</metadata>"#,
        )
        .unwrap();
        let mut engine = KeyStore::with_runner(Box::new(|_, _, _, _| {
            Some("r42".to_string())
        }));

        let version = resolve_version(&mut doc, &mut engine, &config).unwrap();
        assert_eq!(version, "1.0+r42");
    }

    #[test]
    fn test_failing_version_script_is_fatal() {
        let (_t, config) = config();
        let mut doc = Document::parse(
            r#"<metadata>
  <source name="s" devel="true" />
  <changelog>
    <entry version="1.0+{{develver}}" />
  </changelog>
</metadata>"#,
        )
        .unwrap();
        let mut engine = KeyStore::new();

        let err = resolve_version(&mut doc, &mut engine, &config).unwrap_err();
        assert!(matches!(
            err,
            BuildError::ScriptFailure { ref domain, ref action }
                if domain == "source" && action == "version"
        ));
    }
}
