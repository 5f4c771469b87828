//! Build-tree coverage checks.
//!
//! Two jobs: warn about build-tree files no binary package claims, and
//! strip the `usr/share/info/dir` index, which the install-time info
//! hook regenerates and which must never ship in a package.

use std::collections::BTreeSet;

use crate::plugin::{PluginContext, SourcePlugin};
use crate::remark::Remark;
use crate::scan::scan;

const INFO_DIR: &str = "usr/share/info/dir";

#[derive(Default)]
pub struct CheckFiles {
    unclaimed: BTreeSet<String>,
}

impl CheckFiles {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SourcePlugin for CheckFiles {
    fn name(&self) -> &str {
        "checkfiles"
    }

    fn by_default(&self) -> bool {
        true
    }

    fn init(&mut self, ctx: &mut PluginContext<'_>) {
        // An absent build tree just means nothing to check.
        if let Ok(listing) = scan(&ctx.config.build_dir) {
            self.unclaimed = listing.into_iter().collect();
        }
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
        for file in files.iter() {
            self.unclaimed.remove(file);
        }
        if files.iter().any(|f| f == INFO_DIR) {
            files.retain(|f| f != INFO_DIR);
            ctx.remarks.push(Remark::warning(
                Some(package),
                format!("removed '{INFO_DIR}' from the package"),
            ));
        }
    }

    fn end(&mut self, ctx: &mut PluginContext<'_>) {
        for file in &self.unclaimed {
            ctx.remarks.push(Remark::warning(
                None,
                format!("file '{file}' in the build tree belongs to no package"),
            ));
        }
    }
}
