//! ELF dynamic-section introspection for pakt.
//!
//! Reads just enough of an ELF image to answer one question: which
//! shared libraries does this binary require at runtime, and where
//! does it expect to find them? Both 32- and 64-bit images in either
//! byte order are handled by one reader parameterized on word size.
//!
//! Anything that is not a well-formed dynamically linked ELF image
//! yields `None` rather than an error: most files handed to this
//! crate are not binaries at all.

use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;

pub mod testutil;

const DT_NULL: i64 = 0;
const DT_NEEDED: i64 = 1;
const DT_RPATH: i64 = 15;
const DT_RUNPATH: i64 = 29;

const SHT_DYNAMIC: u32 = 6;
const SHT_STRTAB: u32 = 3;

/// What the dynamic section of one image declares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DynamicInfo {
    /// `DT_NEEDED` sonames, in declaration order, de-duplicated.
    pub needed: Vec<String>,
    /// `DT_RPATH`/`DT_RUNPATH` entries, in declaration order, de-duplicated.
    pub search_paths: Vec<String>,
}

impl DynamicInfo {
    /// True when the image names no required libraries.
    pub fn is_empty(&self) -> bool {
        self.needed.is_empty() && self.search_paths.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Elf32,
    Elf64,
}

/// Bounds-checked multi-byte reads over the raw image.
struct Reader<'a> {
    data: &'a [u8],
    class: Class,
    little: bool,
}

impl<'a> Reader<'a> {
    fn bytes(&self, off: usize, len: usize) -> Option<&'a [u8]> {
        self.data.get(off..off.checked_add(len)?)
    }

    fn u16(&self, off: usize) -> Option<u16> {
        let b: [u8; 2] = self.bytes(off, 2)?.try_into().ok()?;
        Some(if self.little {
            u16::from_le_bytes(b)
        } else {
            u16::from_be_bytes(b)
        })
    }

    fn u32(&self, off: usize) -> Option<u32> {
        let b: [u8; 4] = self.bytes(off, 4)?.try_into().ok()?;
        Some(if self.little {
            u32::from_le_bytes(b)
        } else {
            u32::from_be_bytes(b)
        })
    }

    fn u64(&self, off: usize) -> Option<u64> {
        let b: [u8; 8] = self.bytes(off, 8)?.try_into().ok()?;
        Some(if self.little {
            u64::from_le_bytes(b)
        } else {
            u64::from_be_bytes(b)
        })
    }

    /// One natural-width word, widened to u64.
    fn word(&self, off: usize) -> Option<u64> {
        match self.class {
            Class::Elf32 => self.u32(off).map(u64::from),
            Class::Elf64 => self.u64(off),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Section {
    name: u32,
    sh_type: u32,
    offset: usize,
    size: usize,
}

fn section(r: &Reader, shoff: usize, shentsize: usize, index: usize) -> Option<Section> {
    let base = shoff.checked_add(index.checked_mul(shentsize)?)?;
    let name = r.u32(base)?;
    let sh_type = r.u32(base + 4)?;
    let (offset, size) = match r.class {
        Class::Elf32 => (r.word(base + 16)?, r.word(base + 20)?),
        Class::Elf64 => (r.word(base + 24)?, r.word(base + 32)?),
    };
    Some(Section {
        name,
        sh_type,
        offset: usize::try_from(offset).ok()?,
        size: usize::try_from(size).ok()?,
    })
}

/// NUL-terminated string at `off` inside a string-table slice.
fn table_str(table: &[u8], off: u64) -> Option<String> {
    let off = usize::try_from(off).ok()?;
    let rest = table.get(off..)?;
    let end = rest.iter().position(|&b| b == 0)?;
    Some(String::from_utf8_lossy(&rest[..end]).into_owned())
}

/// Extract the dynamic-linking information from a raw ELF image.
///
/// Returns `None` for anything that is not a dynamically linked ELF
/// image with a readable section table: wrong magic, unknown class or
/// byte order, truncated headers, or no `.dynamic`/`.dynstr` pair.
pub fn parse_dynamic(data: &[u8]) -> Option<DynamicInfo> {
    if data.len() < 16 || &data[..4] != b"\x7fELF" {
        return None;
    }
    let class = match data[4] {
        1 => Class::Elf32,
        2 => Class::Elf64,
        _ => return None,
    };
    let little = match data[5] {
        1 => true,
        2 => false,
        _ => return None,
    };
    let r = Reader { data, class, little };

    let (shoff, shentsize, shnum, shstrndx) = match class {
        Class::Elf32 => (r.word(0x20)?, r.u16(0x2e)?, r.u16(0x30)?, r.u16(0x32)?),
        Class::Elf64 => (r.word(0x28)?, r.u16(0x3a)?, r.u16(0x3c)?, r.u16(0x3e)?),
    };
    if shoff == 0 || shnum == 0 || usize::from(shstrndx) >= usize::from(shnum) {
        return None;
    }
    let shoff = usize::try_from(shoff).ok()?;
    let shentsize = usize::from(shentsize);

    let shstr = section(&r, shoff, shentsize, usize::from(shstrndx))?;
    let shstrtab = r.bytes(shstr.offset, shstr.size)?;

    let mut dynamic = None;
    let mut dynstr = None;
    for i in 0..usize::from(shnum) {
        let s = section(&r, shoff, shentsize, i)?;
        match (s.sh_type, table_str(shstrtab, u64::from(s.name))?.as_str()) {
            (SHT_DYNAMIC, ".dynamic") => dynamic = Some(s),
            (SHT_STRTAB, ".dynstr") => dynstr = Some(s),
            _ => {}
        }
    }
    let (dynamic, dynstr) = (dynamic?, dynstr?);
    let strtab = r.bytes(dynstr.offset, dynstr.size)?;

    let entsize = match class {
        Class::Elf32 => 8,
        Class::Elf64 => 16,
    };
    let mut info = DynamicInfo::default();
    let mut off = dynamic.offset;
    let end = dynamic.offset.checked_add(dynamic.size)?;
    while off + entsize <= end {
        let (tag, val) = match class {
            Class::Elf32 => (i64::from(r.u32(off)? as i32), u64::from(r.u32(off + 4)?)),
            Class::Elf64 => (r.u64(off)? as i64, r.u64(off + 8)?),
        };
        match tag {
            DT_NULL => break,
            DT_NEEDED => {
                if let Some(name) = table_str(strtab, val) {
                    if !info.needed.contains(&name) {
                        info.needed.push(name);
                    }
                }
            }
            DT_RPATH | DT_RUNPATH => {
                if let Some(path) = table_str(strtab, val) {
                    if !info.search_paths.contains(&path) {
                        info.search_paths.push(path);
                    }
                }
            }
            _ => {}
        }
        off += entsize;
    }

    Some(info)
}

/// Read a file and extract its dynamic-linking information.
///
/// I/O errors propagate; parse failures are `Ok(None)`.
pub fn scan_file(path: &Path) -> io::Result<Option<DynamicInfo>> {
    let data = fs::read(path)?;
    let info = parse_dynamic(&data);
    if info.is_none() {
        debug!("not a dynamic ELF image: {}", path.display());
    }
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ElfImage;

    #[test]
    fn test_rejects_non_elf() {
        assert_eq!(parse_dynamic(b"#!/bin/sh\necho hi\n"), None);
        assert_eq!(parse_dynamic(b""), None);
        assert_eq!(parse_dynamic(b"\x7fELF"), None);
    }

    #[test]
    fn test_rejects_unknown_class() {
        let mut data = ElfImage::elf64().needs("libc.so.6").build();
        data[4] = 9;
        assert_eq!(parse_dynamic(&data), None);
    }

    #[test]
    fn test_truncated_image() {
        let data = ElfImage::elf64().needs("libc.so.6").build();
        assert_eq!(parse_dynamic(&data[..40]), None);
    }

    #[test]
    fn test_elf64_needed_and_runpath() {
        let data = ElfImage::elf64()
            .needs("libfoo.so.1")
            .needs("libbar.so")
            .search_path("/opt/app/lib")
            .build();
        let info = parse_dynamic(&data).unwrap();
        assert_eq!(info.needed, vec!["libfoo.so.1", "libbar.so"]);
        assert_eq!(info.search_paths, vec!["/opt/app/lib"]);
    }

    #[test]
    fn test_elf32_big_endian() {
        let data = ElfImage::elf32()
            .big_endian()
            .needs("libm.so.6")
            .build();
        let info = parse_dynamic(&data).unwrap();
        assert_eq!(info.needed, vec!["libm.so.6"]);
        assert!(info.search_paths.is_empty());
    }

    #[test]
    fn test_legacy_rpath_tag() {
        let data = ElfImage::elf64()
            .legacy_rpath()
            .needs("libz.so.1")
            .search_path("/usr/lib/legacy")
            .build();
        let info = parse_dynamic(&data).unwrap();
        assert_eq!(info.search_paths, vec!["/usr/lib/legacy"]);
    }

    #[test]
    fn test_duplicate_needed_collapsed() {
        let data = ElfImage::elf64()
            .needs("libdup.so")
            .needs("libdup.so")
            .build();
        let info = parse_dynamic(&data).unwrap();
        assert_eq!(info.needed, vec!["libdup.so"]);
    }

    #[test]
    fn test_static_image_has_no_dynamic_section() {
        let data = ElfImage::elf64().without_dynamic().build();
        assert_eq!(parse_dynamic(&data), None);
    }

    #[test]
    fn test_scan_file_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bin");
        ElfImage::elf64().needs("libx.so").write_to(&path).unwrap();
        let info = scan_file(&path).unwrap().unwrap();
        assert_eq!(info.needed, vec!["libx.so"]);

        let text = dir.path().join("README");
        std::fs::write(&text, "not a binary").unwrap();
        assert_eq!(scan_file(&text).unwrap(), None);
    }
}
