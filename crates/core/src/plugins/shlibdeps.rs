//! Automatic shared-library dependencies.
//!
//! For every ELF file a package ships, resolve each `DT_NEEDED` soname
//! to the package providing it and insert a `<depend>` element into the
//! package's metadata. A soname found inside the build tree binds to
//! the sibling package that claims it, with an exact-version dependency
//! deferred to the `{{version}}` key; a soname only found on the host
//! binds to the installed owner with a greater-or-equal dependency on
//! its current version.
//!
//! Opt-in: packages enable it with `<plugin name="shlibdeps"/>`.

use std::collections::BTreeSet;

use tracing::debug;

use crate::classify::classify;
use crate::descriptor::pattern_rules;
use crate::plugin::{PluginContext, SourcePlugin};
use crate::remark::Remark;

const DEFAULT_SEARCH_PATHS: [&str; 2] = ["/lib", "/usr/lib"];

pub struct ShlibDeps {
    db_ready: bool,
    db_failed: bool,
}

impl ShlibDeps {
    pub fn new() -> Self {
        Self {
            db_ready: false,
            db_failed: false,
        }
    }

    /// One-shot database initialization; a failure disables host
    /// lookups for the rest of the build.
    fn ensure_db(&mut self, package: &str, ctx: &mut PluginContext<'_>) {
        if self.db_ready || self.db_failed {
            return;
        }
        if ctx.db.initialize() {
            self.db_ready = true;
        } else {
            self.db_failed = true;
            ctx.remarks.push(Remark::error(
                Some(package),
                "cannot initialize the installed-package database",
            ));
            if let Some(detail) = ctx.db.last_error() {
                ctx.remarks.push(Remark::error(Some(package), detail));
            }
        }
    }

    /// The first sibling package compatible with the build architecture
    /// whose pattern rules claim `rel`.
    fn local_owner(&self, rel: &str, ctx: &PluginContext<'_>) -> Option<String> {
        let listing = [rel.to_string()];
        for pkg in ctx.descriptor.package_elements() {
            let arch = ctx.descriptor.attr_or(pkg, "arch", "any");
            if arch != "any" && arch != "all" && arch != ctx.config.arch {
                continue;
            }
            let rules = pattern_rules(ctx.descriptor, pkg);
            if !classify(&listing, &rules).is_empty() {
                return ctx.descriptor.attr(pkg, "name").map(str::to_string);
            }
        }
        None
    }

    /// Resolve one soname to a dependency string, or None.
    fn resolve(
        &mut self,
        package: &str,
        need: &str,
        search_paths: &[String],
        ctx: &mut PluginContext<'_>,
    ) -> Option<String> {
        for sp in search_paths {
            let rel = format!("{}/{}", sp.trim_matches('/'), need);
            if ctx.config.build_dir.join(&rel).is_file() {
                if let Some(owner) = self.local_owner(&rel, ctx) {
                    return Some(format!("{owner}={{{{version}}}}"));
                }
            }
            if !self.db_ready && !self.db_failed {
                self.ensure_db(package, ctx);
            }
            if self.db_ready {
                if let Some(owner) = ctx.db.owner_of_path(&rel) {
                    return Some(format!("{}>={}", owner.name, owner.version));
                }
            }
        }
        None
    }
}

impl Default for ShlibDeps {
    fn default() -> Self {
        Self::new()
    }
}

impl SourcePlugin for ShlibDeps {
    fn name(&self) -> &str {
        "shlibdeps"
    }

    fn by_default(&self) -> bool {
        false
    }

    fn process_package(
        &mut self,
        package: &str,
        files: &mut Vec<String>,
        is_source: bool,
        ctx: &mut PluginContext<'_>,
    ) {
        if is_source {
            return;
        }

        let mut needed: BTreeSet<String> = BTreeSet::new();
        let mut search_paths: Vec<String> =
            DEFAULT_SEARCH_PATHS.iter().map(|s| s.to_string()).collect();
        for file in files.iter() {
            let path = ctx.config.build_dir.join(file);
            let Ok(Some(info)) = pakt_elf::scan_file(&path) else {
                continue;
            };
            debug!(
                "{}: {} needs {} libraries",
                package,
                file,
                info.needed.len()
            );
            needed.extend(info.needed);
            for sp in info.search_paths {
                if !search_paths.contains(&sp) {
                    search_paths.push(sp);
                }
            }
        }
        if needed.is_empty() {
            return;
        }

        let mut inserted: BTreeSet<String> = BTreeSet::new();
        for need in needed {
            match self.resolve(package, &need, &search_paths, ctx) {
                Some(dep) => {
                    if !inserted.insert(dep.clone()) {
                        continue;
                    }
                    ctx.remarks.push(Remark::information(
                        Some(package),
                        format!("added dependency '{dep}' for '{need}'"),
                    ));
                    if let Some(pkg) = ctx.descriptor.package_named(package) {
                        let depend = ctx.descriptor.create_element("depend");
                        ctx.descriptor.set_attr(depend, "type", "depend");
                        ctx.descriptor.set_attr(depend, "string", &dep);
                        ctx.descriptor.insert_first_child(pkg, depend);
                    }
                }
                None => {
                    ctx.remarks.push(Remark::warning(
                        Some(package),
                        format!("cannot find a package providing '{need}'"),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::BuildConfig;
    use crate::db::MemoryDatabase;
    use crate::descriptor::Document;
    use crate::remark::Severity;
    use crate::template::KeyStore;
    use pakt_elf::testutil::ElfImage;
    use std::fs;
    use tempfile::TempDir;

    const METADATA: &str = r#"<metadata>
  <source name="demo" />
  <package name="demo" arch="any">
    <files pattern="usr/bin/*" />
  </package>
  <package name="libdemo" arch="any">
    <files pattern="usr/lib/*" />
  </package>
</metadata>"#;

    struct Fixture {
        _temp: TempDir,
        doc: Document,
        db: MemoryDatabase,
        engine: KeyStore,
        config: BuildConfig,
        remarks: Vec<Remark>,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let config = BuildConfig::new(temp.path());
            fs::create_dir_all(&config.build_dir).unwrap();
            Self {
                _temp: temp,
                doc: Document::parse(METADATA).unwrap(),
                db: MemoryDatabase::new(),
                engine: KeyStore::new(),
                config,
                remarks: Vec::new(),
            }
        }

        fn run(&mut self, plugin: &mut ShlibDeps, package: &str, files: &mut Vec<String>) {
            let mut ctx = PluginContext {
                descriptor: &mut self.doc,
                remarks: &mut self.remarks,
                db: &mut self.db,
                engine: &mut self.engine,
                config: &self.config,
            };
            plugin.process_package(package, files, false, &mut ctx);
        }

        fn depend_strings(&self, package: &str) -> Vec<String> {
            let pkg = self.doc.package_named(package).unwrap();
            self.doc
                .child_elements(pkg, "depend")
                .iter()
                .map(|&d| self.doc.attr(d, "string").unwrap().to_string())
                .collect()
        }
    }

    #[test]
    fn test_local_library_binds_sibling_package() {
        let mut fx = Fixture::new();
        let bin = fx.config.build_dir.join("usr/bin/demo");
        ElfImage::elf64().needs("libdemo.so.1").write_to(&bin).unwrap();
        let lib = fx.config.build_dir.join("usr/lib/libdemo.so.1");
        fs::create_dir_all(lib.parent().unwrap()).unwrap();
        fs::write(&lib, b"not inspected").unwrap();

        let mut plugin = ShlibDeps::new();
        let mut files = vec!["usr/bin/demo".to_string()];
        fx.run(&mut plugin, "demo", &mut files);

        assert_eq!(
            fx.depend_strings("demo"),
            vec!["libdemo={{version}}".to_string()]
        );
        assert!(fx.remarks.iter().any(|r| r.severity == Severity::Information));
    }

    #[test]
    fn test_local_library_wins_over_installed_owner() {
        let mut fx = Fixture::new();
        let bin = fx.config.build_dir.join("usr/bin/demo");
        ElfImage::elf64().needs("libdemo.so.1").write_to(&bin).unwrap();
        let lib = fx.config.build_dir.join("usr/lib/libdemo.so.1");
        fs::create_dir_all(lib.parent().unwrap()).unwrap();
        fs::write(&lib, b"lib").unwrap();
        // The same path is also known to the installed database, at a
        // version that would otherwise look more attractive.
        fx.db.insert("usr/lib/libdemo.so.1", "libdemo", "9.9");

        let mut plugin = ShlibDeps::new();
        let mut files = vec!["usr/bin/demo".to_string()];
        fx.run(&mut plugin, "demo", &mut files);

        assert_eq!(
            fx.depend_strings("demo"),
            vec!["libdemo={{version}}".to_string()]
        );
    }

    #[test]
    fn test_host_library_binds_installed_owner() {
        let mut fx = Fixture::new();
        let bin = fx.config.build_dir.join("usr/bin/demo");
        ElfImage::elf64().needs("libz.so.1").write_to(&bin).unwrap();
        fx.db.insert("usr/lib/libz.so.1", "zlib", "1.2.13");

        let mut plugin = ShlibDeps::new();
        let mut files = vec!["usr/bin/demo".to_string()];
        fx.run(&mut plugin, "demo", &mut files);

        assert_eq!(fx.depend_strings("demo"), vec!["zlib>=1.2.13".to_string()]);
    }

    #[test]
    fn test_runpath_extends_search() {
        let mut fx = Fixture::new();
        let bin = fx.config.build_dir.join("usr/bin/demo");
        ElfImage::elf64()
            .needs("libpriv.so")
            .search_path("/usr/lib/demo")
            .write_to(&bin)
            .unwrap();
        fx.db.insert("usr/lib/demo/libpriv.so", "demo-libs", "2.0");

        let mut plugin = ShlibDeps::new();
        let mut files = vec!["usr/bin/demo".to_string()];
        fx.run(&mut plugin, "demo", &mut files);

        assert_eq!(
            fx.depend_strings("demo"),
            vec!["demo-libs>=2.0".to_string()]
        );
    }

    #[test]
    fn test_unresolved_soname_warns_without_depend() {
        let mut fx = Fixture::new();
        let bin = fx.config.build_dir.join("usr/bin/demo");
        ElfImage::elf64().needs("libbar.so").write_to(&bin).unwrap();

        let mut plugin = ShlibDeps::new();
        let mut files = vec!["usr/bin/demo".to_string()];
        fx.run(&mut plugin, "demo", &mut files);

        assert!(fx.depend_strings("demo").is_empty());
        let warnings: Vec<_> = fx
            .remarks
            .iter()
            .filter(|r| r.severity == Severity::Warning)
            .collect();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("libbar.so"));
    }

    #[test]
    fn test_db_failure_reported_once() {
        let mut fx = Fixture::new();
        fx.db = MemoryDatabase::failing("corrupt index");
        let bin = fx.config.build_dir.join("usr/bin/demo");
        ElfImage::elf64()
            .needs("liba.so")
            .needs("libb.so")
            .write_to(&bin)
            .unwrap();

        let mut plugin = ShlibDeps::new();
        let mut files = vec!["usr/bin/demo".to_string()];
        fx.run(&mut plugin, "demo", &mut files);

        let errors: Vec<_> = fx
            .remarks
            .iter()
            .filter(|r| r.severity == Severity::Error)
            .collect();
        assert_eq!(errors.len(), 2);
        assert!(errors[1].message.contains("corrupt index"));
    }

    #[test]
    fn test_non_elf_files_skipped() {
        let mut fx = Fixture::new();
        let doc_file = fx.config.build_dir.join("usr/bin/readme");
        fs::create_dir_all(doc_file.parent().unwrap()).unwrap();
        fs::write(&doc_file, b"plain text").unwrap();

        let mut plugin = ShlibDeps::new();
        let mut files = vec!["usr/bin/readme".to_string()];
        fx.run(&mut plugin, "demo", &mut files);

        assert!(fx.remarks.is_empty());
        assert!(fx.depend_strings("demo").is_empty());
    }

    #[test]
    fn test_source_package_ignored() {
        let mut fx = Fixture::new();
        let mut plugin = ShlibDeps::new();
        let mut files = vec!["control/metadata.xml".to_string()];
        let mut ctx = PluginContext {
            descriptor: &mut fx.doc,
            remarks: &mut fx.remarks,
            db: &mut fx.db,
            engine: &mut fx.engine,
            config: &fx.config,
        };
        plugin.process_package("demo", &mut files, true, &mut ctx);
        assert!(fx.remarks.is_empty());
    }
}
