//! Build session orchestration.
//!
//! A [`BuildSession`] drives one complete packaging run over an
//! already-compiled source tree: bind the directory keys, resolve the
//! version, scan the build tree, classify files per package, run the
//! plugin pipeline, serialize the (now rewritten) metadata once, then
//! write one archive per eligible package. The phases are strictly
//! sequential; dependency resolution needs every file set fixed before
//! a library can be called local.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::archive::{archive_file_name, build_manifest, write_archive};
use crate::classify::classify;
use crate::db::{EmptyDatabase, InstalledDb};
use crate::descriptor::{self, Document};
use crate::plugin::{PluginContext, PluginOverride, Registry};
use crate::progress::{ProgressKind, ProgressMonitor};
use crate::remark::Remark;
use crate::scan::scan;
use crate::template::TemplateEngine;
use crate::version::resolve_version;
use crate::{BuildError, Result};

/// Directory layout and target architecture for one build.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Unpacked source tree; scripts run here.
    pub source_dir: PathBuf,
    /// Staged install tree the compiled source was installed into.
    pub build_dir: PathBuf,
    /// Packaging control tree (metadata, scripts, embed sources).
    pub control_dir: PathBuf,
    /// Where output archives land.
    pub work_dir: PathBuf,
    /// Concrete build architecture; `any` packages resolve to this.
    pub arch: String,
    /// Output archive extension, without the dot.
    pub archive_ext: String,
}

impl BuildConfig {
    /// Conventional layout under one working directory.
    pub fn new(work_dir: &Path) -> Self {
        Self {
            source_dir: work_dir.join("src"),
            build_dir: work_dir.join("build"),
            control_dir: work_dir.join("control"),
            work_dir: work_dir.to_path_buf(),
            arch: host_arch().to_string(),
            archive_ext: "pkg".to_string(),
        }
    }
}

/// The architecture tag packages built here carry.
pub fn host_arch() -> &'static str {
    if cfg!(target_arch = "x86_64") {
        "x86_64"
    } else if cfg!(target_arch = "x86") {
        "i686"
    } else if cfg!(target_arch = "aarch64") {
        "aarch64"
    } else if cfg!(target_arch = "arm") {
        "arm"
    } else {
        "unknown"
    }
}

/// One package that will produce an archive in this run.
struct Eligible {
    name: String,
    arch: String,
    is_source: bool,
    files: Vec<String>,
    overrides: Vec<PluginOverride>,
    embeds: Vec<(String, String)>,
}

/// One packaging run over one source.
pub struct BuildSession<'a> {
    config: BuildConfig,
    descriptor: Document,
    registry: Registry,
    engine: &'a mut dyn TemplateEngine,
    db: Box<dyn InstalledDb>,
    remarks: Vec<Remark>,
}

impl<'a> BuildSession<'a> {
    pub fn new(
        config: BuildConfig,
        descriptor: Document,
        engine: &'a mut dyn TemplateEngine,
    ) -> Self {
        Self {
            config,
            descriptor,
            registry: Registry::with_builtins(),
            engine,
            db: Box::new(EmptyDatabase),
            remarks: Vec::new(),
        }
    }

    /// Session from a metadata file on disk.
    pub fn from_file(
        config: BuildConfig,
        metadata: &Path,
        engine: &'a mut dyn TemplateEngine,
    ) -> Result<Self> {
        let descriptor = Document::from_file(metadata)?;
        Ok(Self::new(config, descriptor, engine))
    }

    /// Replace the installed-package database collaborator.
    pub fn set_database(&mut self, db: Box<dyn InstalledDb>) {
        self.db = db;
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn descriptor(&self) -> &Document {
        &self.descriptor
    }

    /// Every remark accumulated so far, in emission order.
    pub fn remarks(&self) -> &[Remark] {
        &self.remarks
    }

    pub fn into_remarks(self) -> Vec<Remark> {
        self.remarks
    }

    /// Bind the directory and architecture keys on the engine.
    fn load_keys(&mut self) {
        let pairs = [
            ("sourcedir", self.config.source_dir.display().to_string()),
            ("builddir", self.config.build_dir.display().to_string()),
            ("controldir", self.config.control_dir.display().to_string()),
            ("arch", self.config.arch.clone()),
        ];
        for (name, value) in pairs {
            self.engine.set_key(name, &value);
        }
    }

    /// Run the source's `download` script action.
    pub fn fetch_source(&mut self) -> Result<()> {
        self.load_keys();
        self.run_source_script("download")
    }

    /// Run the source's `build` script action.
    pub fn compile(&mut self) -> Result<()> {
        self.load_keys();
        self.run_source_script("build")
    }

    fn run_source_script(&mut self, action: &str) -> Result<()> {
        info!("running source script '{}'", action);
        if self
            .engine
            .run_script("source", action, &self.config.source_dir, &[])
        {
            Ok(())
        } else {
            Err(BuildError::ScriptFailure {
                domain: "source".to_string(),
                action: action.to_string(),
            })
        }
    }

    /// Package the build tree: classify, run plugins, archive.
    ///
    /// Plugin diagnostics land in `remarks()` and never fail the
    /// build; only I/O, script failures and cancellation do.
    pub fn build(&mut self, progress: &dyn ProgressMonitor) -> Result<()> {
        self.load_keys();
        let version = resolve_version(&mut self.descriptor, &mut *self.engine, &self.config)?;
        let listing = scan(&self.config.build_dir)?;
        let mut eligible = self.eligible_packages(&listing)?;
        info!(
            "building {} package(s) at version '{}'",
            eligible.len(),
            version
        );

        let mut ctx = PluginContext {
            descriptor: &mut self.descriptor,
            remarks: &mut self.remarks,
            db: self.db.as_mut(),
            engine: &mut *self.engine,
            config: &self.config,
        };
        self.registry.run_init(&mut ctx);

        for pkg in &mut eligible {
            let enabled =
                self.registry
                    .enabled_for(&pkg.name, &pkg.overrides, &mut self.remarks);
            debug!("package '{}': plugins {:?}", pkg.name, enabled);
            let mut ctx = PluginContext {
                descriptor: &mut self.descriptor,
                remarks: &mut self.remarks,
                db: self.db.as_mut(),
                engine: &mut *self.engine,
                config: &self.config,
            };
            self.registry
                .run_package(&pkg.name, &mut pkg.files, pkg.is_source, &enabled, &mut ctx);
        }

        // Serialized once, after every plugin rewrite, shared by all
        // archives of this run.
        let mut metadata = NamedTempFile::new()?;
        metadata.write_all(self.descriptor.to_xml().as_bytes())?;

        let session = progress.begin(ProgressKind::PackageArchives, eligible.len());
        let archived = self.archive_all(&eligible, &version, metadata.path(), session, progress);
        progress.end(session);
        archived?;

        let mut ctx = PluginContext {
            descriptor: &mut self.descriptor,
            remarks: &mut self.remarks,
            db: self.db.as_mut(),
            engine: &mut *self.engine,
            config: &self.config,
        };
        self.registry.run_end(&mut ctx);
        Ok(())
    }

    /// Resolve the packages this run produces, in document order. The
    /// source pseudo-package always builds; binary packages pass the
    /// architecture filter or are skipped entirely.
    fn eligible_packages(&self, listing: &[String]) -> Result<Vec<Eligible>> {
        let doc = &self.descriptor;
        let mut out = Vec::new();
        for child in doc.children(doc.root()) {
            match doc.tag(child) {
                "source" => {
                    let name = doc.attr_or(child, "name", "").to_string();
                    out.push(Eligible {
                        name,
                        arch: "src".to_string(),
                        is_source: true,
                        files: self.control_listing()?,
                        overrides: Vec::new(),
                        embeds: Vec::new(),
                    });
                }
                "package" => {
                    let arch = match doc.attr_or(child, "arch", "any") {
                        "any" => self.config.arch.clone(),
                        "all" => "all".to_string(),
                        concrete if concrete == self.config.arch => concrete.to_string(),
                        skipped => {
                            debug!(
                                "skipping package '{}' for arch '{}'",
                                doc.attr_or(child, "name", ""),
                                skipped
                            );
                            continue;
                        }
                    };
                    out.push(Eligible {
                        name: doc.attr_or(child, "name", "").to_string(),
                        arch,
                        is_source: false,
                        files: classify(listing, &descriptor::pattern_rules(doc, child)),
                        overrides: descriptor::plugin_overrides(doc, child),
                        embeds: descriptor::embed_rules(doc, child),
                    });
                }
                _ => {}
            }
        }
        Ok(out)
    }

    /// The source pseudo-package ships its packaging control tree.
    fn control_listing(&self) -> Result<Vec<String>> {
        let root = &self.config.control_dir;
        if !root.is_dir() {
            return Err(BuildError::NotFound(root.clone()));
        }
        let mut out = Vec::new();
        for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                BuildError::Io(e.into_io_error().unwrap_or_else(|| {
                    std::io::Error::other("walk error")
                }))
            })?;
            if entry.file_type().is_dir() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            out.push(format!("control/{rel}"));
        }
        Ok(out)
    }

    fn archive_all(
        &mut self,
        eligible: &[Eligible],
        version: &str,
        metadata: &Path,
        session: u64,
        progress: &dyn ProgressMonitor,
    ) -> Result<()> {
        for (index, pkg) in eligible.iter().enumerate() {
            let file_name =
                archive_file_name(&pkg.name, version, &pkg.arch, &self.config.archive_ext);
            if !progress.step(session, index, &file_name) {
                return Err(BuildError::Cancelled);
            }
            let embeds: Vec<(String, String)> = pkg
                .embeds
                .iter()
                .map(|(from, to)| (self.engine.render(from), self.engine.render(to)))
                .collect();
            let manifest =
                build_manifest(metadata, pkg.is_source, &embeds, &pkg.files, &self.config);
            write_archive(&self.config.work_dir.join(&file_name), &manifest, progress)?;
        }
        Ok(())
    }
}
