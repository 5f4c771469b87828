//! Duplicate-claim detection.
//!
//! Flags every build-tree file that ends up in more than one binary
//! package. Overlap is usually a pattern-rule mistake, but it is only
//! reported, never fixed: shipping the same file twice is legal.

use std::collections::HashMap;

use crate::plugin::{PluginContext, SourcePlugin};
use crate::remark::Remark;

#[derive(Default)]
pub struct FileManyPackages {
    owners: HashMap<String, String>,
}

impl FileManyPackages {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SourcePlugin for FileManyPackages {
    fn name(&self) -> &str {
        "filemanypackages"
    }

    fn by_default(&self) -> bool {
        true
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
            if let Some(owner) = self.owners.get(file) {
                ctx.remarks.push(Remark::warning(
                    Some(package),
                    format!("file '{file}' is also claimed by package '{owner}'"),
                ));
            }
            self.owners.insert(file.clone(), package.to_string());
        }
    }
}
