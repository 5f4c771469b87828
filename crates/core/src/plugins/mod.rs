//! Built-in source plugins.

mod checkfiles;
mod duplicates;
mod shlibdeps;

pub use checkfiles::CheckFiles;
pub use duplicates::FileManyPackages;
pub use shlibdeps::ShlibDeps;
