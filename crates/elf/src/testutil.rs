//! Synthetic ELF images for tests.
//!
//! Builds the smallest image the reader accepts: an ELF header, a
//! `.dynstr`/`.dynamic` pair, and a section-header table. No program
//! headers, no code. Used by this crate's tests and by the dependency
//! plugin tests in pakt-core.

use std::fs;
use std::io;
use std::path::Path;

/// Builder for a minimal dynamically linked ELF image.
#[derive(Debug, Clone)]
pub struct ElfImage {
    class64: bool,
    little: bool,
    rpath_tag: i64,
    with_dynamic: bool,
    needed: Vec<String>,
    search_paths: Vec<String>,
}

impl ElfImage {
    /// 64-bit little-endian image.
    pub fn elf64() -> Self {
        Self {
            class64: true,
            little: true,
            rpath_tag: 29, // DT_RUNPATH
            with_dynamic: true,
            needed: Vec::new(),
            search_paths: Vec::new(),
        }
    }

    /// 32-bit little-endian image.
    pub fn elf32() -> Self {
        Self {
            class64: false,
            ..Self::elf64()
        }
    }

    /// Emit multi-byte fields big-endian.
    pub fn big_endian(mut self) -> Self {
        self.little = false;
        self
    }

    /// Record search paths under `DT_RPATH` instead of `DT_RUNPATH`.
    pub fn legacy_rpath(mut self) -> Self {
        self.rpath_tag = 15;
        self
    }

    /// Omit the `.dynamic`/`.dynstr` pair, like a statically linked image.
    pub fn without_dynamic(mut self) -> Self {
        self.with_dynamic = false;
        self
    }

    /// Add a `DT_NEEDED` soname.
    pub fn needs(mut self, soname: &str) -> Self {
        self.needed.push(soname.to_string());
        self
    }

    /// Add a library search path entry.
    pub fn search_path(mut self, path: &str) -> Self {
        self.search_paths.push(path.to_string());
        self
    }

    fn w16(&self, buf: &mut Vec<u8>, v: u16) {
        buf.extend(if self.little { v.to_le_bytes() } else { v.to_be_bytes() });
    }

    fn w32(&self, buf: &mut Vec<u8>, v: u32) {
        buf.extend(if self.little { v.to_le_bytes() } else { v.to_be_bytes() });
    }

    fn w64(&self, buf: &mut Vec<u8>, v: u64) {
        buf.extend(if self.little { v.to_le_bytes() } else { v.to_be_bytes() });
    }

    /// One natural-width word.
    fn word(&self, buf: &mut Vec<u8>, v: u64) {
        if self.class64 {
            self.w64(buf, v);
        } else {
            self.w32(buf, v as u32);
        }
    }

    fn dyn_entry(&self, buf: &mut Vec<u8>, tag: i64, val: u64) {
        self.word(buf, tag as u64);
        self.word(buf, val);
    }

    /// sh_name, sh_type, sh_offset, sh_size with everything else zero.
    fn section_header(&self, buf: &mut Vec<u8>, name: u32, sh_type: u32, offset: u64, size: u64) {
        self.w32(buf, name);
        self.w32(buf, sh_type);
        self.word(buf, 0); // sh_flags
        self.word(buf, 0); // sh_addr
        self.word(buf, offset);
        self.word(buf, size);
        self.w32(buf, 0); // sh_link
        self.w32(buf, 0); // sh_info
        self.word(buf, 0); // sh_addralign
        self.word(buf, 0); // sh_entsize
    }

    /// Assemble the image bytes.
    pub fn build(&self) -> Vec<u8> {
        let ehsize: usize = if self.class64 { 64 } else { 52 };
        let shentsize: usize = if self.class64 { 64 } else { 40 };

        // String tables. Both start with a NUL so offset 0 is the
        // empty string, as the format requires.
        let mut dynstr = vec![0u8];
        let intern = |table: &mut Vec<u8>, s: &str| -> u64 {
            let off = table.len() as u64;
            table.extend(s.as_bytes());
            table.push(0);
            off
        };
        let needed_offs: Vec<u64> = self.needed.iter().map(|n| intern(&mut dynstr, n)).collect();
        let path_offs: Vec<u64> = self
            .search_paths
            .iter()
            .map(|p| intern(&mut dynstr, p))
            .collect();

        let mut shstrtab = vec![0u8];
        let dynamic_name = intern(&mut shstrtab, ".dynamic") as u32;
        let dynstr_name = intern(&mut shstrtab, ".dynstr") as u32;
        let shstrtab_name = intern(&mut shstrtab, ".shstrtab") as u32;

        let mut dynamic = Vec::new();
        for off in &needed_offs {
            self.dyn_entry(&mut dynamic, 1, *off); // DT_NEEDED
        }
        for off in &path_offs {
            self.dyn_entry(&mut dynamic, self.rpath_tag, *off);
        }
        self.dyn_entry(&mut dynamic, 0, 0); // DT_NULL

        // Layout: header, .dynstr, .dynamic, .shstrtab, section headers.
        let dynstr_off = ehsize as u64;
        let dynamic_off = dynstr_off + dynstr.len() as u64;
        let shstrtab_off = dynamic_off + dynamic.len() as u64;
        let shoff = shstrtab_off + shstrtab.len() as u64;

        let (shnum, shstrndx) = if self.with_dynamic { (4u16, 3u16) } else { (2u16, 1u16) };

        let mut out = Vec::new();
        out.extend(b"\x7fELF");
        out.push(if self.class64 { 2 } else { 1 });
        out.push(if self.little { 1 } else { 2 });
        out.push(1); // EI_VERSION
        out.resize(16, 0);
        self.w16(&mut out, 3); // e_type = ET_DYN
        self.w16(&mut out, if self.class64 { 62 } else { 3 }); // e_machine
        self.w32(&mut out, 1); // e_version
        self.word(&mut out, 0); // e_entry
        self.word(&mut out, 0); // e_phoff
        self.word(&mut out, shoff);
        self.w32(&mut out, 0); // e_flags
        self.w16(&mut out, ehsize as u16);
        self.w16(&mut out, 0); // e_phentsize
        self.w16(&mut out, 0); // e_phnum
        self.w16(&mut out, shentsize as u16);
        self.w16(&mut out, shnum);
        self.w16(&mut out, shstrndx);
        debug_assert_eq!(out.len(), ehsize);

        out.extend(&dynstr);
        out.extend(&dynamic);
        out.extend(&shstrtab);

        // Section header table, starting with the mandatory null entry.
        self.section_header(&mut out, 0, 0, 0, 0);
        if self.with_dynamic {
            self.section_header(&mut out, dynamic_name, 6, dynamic_off, dynamic.len() as u64);
            self.section_header(&mut out, dynstr_name, 3, dynstr_off, dynstr.len() as u64);
        }
        self.section_header(&mut out, shstrtab_name, 3, shstrtab_off, shstrtab.len() as u64);

        out
    }

    /// Write the image to disk.
    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.build())
    }
}
