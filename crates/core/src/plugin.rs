//! Source-plugin framework.
//!
//! Plugins observe and rewrite a package's file set and its metadata
//! while the build runs. The lifecycle is: `init` once per session,
//! `process_package` once per eligible package the plugin is enabled
//! for, `end` once after every archive has been written. `init` and
//! `end` run on every registered plugin; only `process_package` is
//! gated by enablement.

use std::path::Path;

use tracing::debug;

use crate::build::BuildConfig;
use crate::db::InstalledDb;
use crate::descriptor::Document;
use crate::remark::Remark;
use crate::template::TemplateEngine;

/// Shared state a plugin works against.
pub struct PluginContext<'a> {
    pub descriptor: &'a mut Document,
    pub remarks: &'a mut Vec<Remark>,
    pub db: &'a mut dyn InstalledDb,
    pub engine: &'a mut dyn TemplateEngine,
    pub config: &'a BuildConfig,
}

/// One build-time plugin.
pub trait SourcePlugin {
    /// Stable identifier used by `<plugin name="…"/>` overrides.
    fn name(&self) -> &str;

    /// Whether the plugin runs on packages that do not mention it.
    fn by_default(&self) -> bool;

    fn init(&mut self, _ctx: &mut PluginContext<'_>) {}

    /// Inspect or rewrite `files` for `package`. `is_source` marks the
    /// source pseudo-package, whose file set is the packaging control
    /// tree rather than build output.
    fn process_package(
        &mut self,
        package: &str,
        files: &mut Vec<String>,
        is_source: bool,
        ctx: &mut PluginContext<'_>,
    );

    fn end(&mut self, _ctx: &mut PluginContext<'_>) {}
}

/// One `<plugin name="…" enable="…"/>` element, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginOverride {
    pub name: String,
    pub enable: bool,
}

/// Callback that turns a candidate plugin file into a plugin, or
/// declines it.
pub type PluginLoader = dyn Fn(&Path) -> Option<Box<dyn SourcePlugin>>;

/// Ordered plugin registry.
///
/// Registration order is execution order. Re-registering a name
/// replaces the earlier plugin in place, keeping its position.
#[derive(Default)]
pub struct Registry {
    plugins: Vec<Box<dyn SourcePlugin>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in plugins.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(crate::plugins::ShlibDeps::new()));
        registry.register(Box::new(crate::plugins::FileManyPackages::new()));
        registry.register(Box::new(crate::plugins::CheckFiles::new()));
        registry
    }

    pub fn register(&mut self, plugin: Box<dyn SourcePlugin>) {
        if let Some(slot) = self
            .plugins
            .iter_mut()
            .find(|p| p.name() == plugin.name())
        {
            *slot = plugin;
        } else {
            self.plugins.push(plugin);
        }
    }

    /// Scan `dirs` for loadable plugins, in directory order then name
    /// order, and register everything `loader` accepts.
    pub fn discover(&mut self, dirs: &[&Path], loader: &PluginLoader) {
        for dir in dirs {
            let Ok(entries) = std::fs::read_dir(dir) else {
                debug!("skipping unreadable plugin dir {}", dir.display());
                continue;
            };
            let mut paths: Vec<_> = entries.flatten().map(|e| e.path()).collect();
            paths.sort();
            for path in paths {
                if let Some(plugin) = loader(&path) {
                    debug!("loaded plugin '{}' from {}", plugin.name(), path.display());
                    self.register(plugin);
                }
            }
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Resolve which plugins run for one package: the by-default set,
    /// then the package's overrides in document order. An override
    /// naming an unregistered plugin earns a warning and is ignored.
    pub fn enabled_for(
        &self,
        package: &str,
        overrides: &[PluginOverride],
        remarks: &mut Vec<Remark>,
    ) -> Vec<String> {
        let mut enabled: Vec<String> = self
            .plugins
            .iter()
            .filter(|p| p.by_default())
            .map(|p| p.name().to_string())
            .collect();

        for ov in overrides {
            if !self.plugins.iter().any(|p| p.name() == ov.name) {
                remarks.push(Remark::warning(
                    Some(package),
                    format!("unknown plugin '{}' requested", ov.name),
                ));
                continue;
            }
            if ov.enable {
                if !enabled.contains(&ov.name) {
                    enabled.push(ov.name.clone());
                }
            } else {
                enabled.retain(|n| n != &ov.name);
            }
        }
        enabled
    }

    pub fn run_init(&mut self, ctx: &mut PluginContext<'_>) {
        for plugin in &mut self.plugins {
            plugin.init(ctx);
        }
    }

    pub fn run_package(
        &mut self,
        package: &str,
        files: &mut Vec<String>,
        is_source: bool,
        enabled: &[String],
        ctx: &mut PluginContext<'_>,
    ) {
        for plugin in &mut self.plugins {
            if enabled.iter().any(|n| n == plugin.name()) {
                plugin.process_package(package, files, is_source, ctx);
            }
        }
    }

    pub fn run_end(&mut self, ctx: &mut PluginContext<'_>) {
        for plugin in &mut self.plugins {
            plugin.end(ctx);
        }
    }
}
