// Numan Thabit 2025
//! Replay of dumped CPUID transcripts, one `pu<idx>` file per hardware
//! thread. Each record carries the input registers it applies to, an
//! input mask selecting which of them must match, and the four outputs.

use std::fs;
use std::path::Path;

use tracing::warn;

use crate::decode::{CpuidSource, Regs};
use crate::{CpuidError, Result};

#[derive(Debug, Clone, Copy)]
struct DumpEntry {
    inmask: u32,
    ineax: u32,
    inebx: u32,
    inecx: u32,
    inedx: u32,
    out: Regs,
}

/// The transcript of one PU.
#[derive(Debug, Default)]
pub struct CpuidDump {
    entries: Vec<DumpEntry>,
}

impl CpuidDump {
    /// Read `<dir>/pu<idx>`. A missing or unreadable file yields an empty
    /// dump that answers every query with zeroes, which is the
    /// discovery-soft behavior for a single bad PU.
    pub fn read(dir: &Path, idx: u32) -> Self {
        let path = dir.join(format!("pu{idx}"));
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) => {
                warn!(path = %path.display(), %err, "could not read dumped cpuid file");
                return Self::default();
            }
        };
        let mut entries = Vec::new();
        for line in text.lines() {
            if line.starts_with('#') {
                continue;
            }
            if let Some(entry) = parse_line(line) {
                entries.push(entry);
            }
        }
        Self { entries }
    }
}

fn parse_line(line: &str) -> Option<DumpEntry> {
    let (input, output) = line.split_once("=>")?;
    let mut inputs = input.split_whitespace();
    let mut read = || u32::from_str_radix(inputs.next()?, 16).ok();
    let inmask = read()?;
    let ineax = read()?;
    let inebx = read()?;
    let inecx = read()?;
    let inedx = read()?;
    let mut outputs = output.split_whitespace();
    let mut read_out = || u32::from_str_radix(outputs.next()?, 16).ok();
    let out = Regs {
        eax: read_out()?,
        ebx: read_out()?,
        ecx: read_out()?,
        edx: read_out()?,
    };
    Some(DumpEntry {
        inmask,
        ineax,
        inebx,
        inecx,
        inedx,
        out,
    })
}

impl CpuidSource for CpuidDump {
    fn cpuid(&mut self, leaf: u32, subleaf: u32) -> Regs {
        for entry in &self.entries {
            if (entry.inmask & 0x1) != 0 && leaf != entry.ineax {
                continue;
            }
            if (entry.inmask & 0x2) != 0 && entry.inebx != 0 {
                continue;
            }
            if (entry.inmask & 0x4) != 0 && subleaf != entry.inecx {
                continue;
            }
            if (entry.inmask & 0x8) != 0 && entry.inedx != 0 {
                continue;
            }
            return entry.out;
        }
        warn!(leaf, subleaf, "leaf absent from dumped cpuid, returning zeroes");
        Regs::default()
    }
}

/// Validate a dump directory: the summary file must declare an x86
/// architecture and the `pu<idx>` files must form a contiguous range
/// starting at zero. Returns the number of PUs.
pub fn check_dump_dir(dir: &Path) -> Result<u32> {
    let summary = dir.join("hwloc-cpuid-info");
    let text = fs::read_to_string(&summary)
        .map_err(|_| CpuidError::BadDumpDir(format!("missing {}", summary.display())))?;
    match text.lines().next() {
        Some("Architecture: x86") => {}
        other => {
            return Err(CpuidError::BadDumpDir(format!(
                "unexpected architecture line {other:?}"
            )))
        }
    }

    let mut indices: Vec<u32> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(rest) = name.strip_prefix("pu") {
            match rest.parse::<u32>() {
                Ok(idx) => indices.push(idx),
                Err(_) => warn!(entry = %name, "ignoring invalid dump entry"),
            }
        }
    }
    if indices.is_empty() {
        return Err(CpuidError::BadDumpDir("no pu<idx> file".to_string()));
    }
    indices.sort_unstable();
    indices.dedup();
    let last = indices[indices.len() - 1];
    if last as usize != indices.len() - 1 {
        return Err(CpuidError::BadDumpDir(
            "pu indices are not contiguous from 0".to_string(),
        ));
    }
    Ok(indices.len() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_lines_replay_by_input_mask() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("pu0"),
            "# comment line\n\
             1 0 0 0 0 => b 756e6547 6c65746e 49656e69\n\
             5 4 0 0 0 => 1c004121 1c0003f 3f 0\n\
             5 4 0 1 0 => 1c004143 1c0003f 3f 0\n",
        )
        .unwrap();
        let mut dump = CpuidDump::read(dir.path(), 0);
        let leaf0 = dump.cpuid(0, 0);
        assert_eq!(leaf0.eax, 0xb);
        assert_eq!(leaf0.ebx, 0x756e6547);
        let sub1 = dump.cpuid(4, 1);
        assert_eq!(sub1.eax, 0x1c004143);
        // Absent leaf: zeroes, not an error.
        assert_eq!(dump.cpuid(0x8000_0005, 0), Regs::default());
    }

    #[test]
    fn dump_dir_requires_contiguous_pus_and_x86() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("hwloc-cpuid-info"), "Architecture: x86\n").unwrap();
        fs::write(dir.path().join("pu0"), "").unwrap();
        fs::write(dir.path().join("pu1"), "").unwrap();
        assert_eq!(check_dump_dir(dir.path()).expect("valid"), 2);

        fs::write(dir.path().join("pu3"), "").unwrap();
        assert!(matches!(
            check_dump_dir(dir.path()),
            Err(CpuidError::BadDumpDir(_))
        ));
    }

    #[test]
    fn non_x86_dump_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("hwloc-cpuid-info"), "Architecture: arm\n").unwrap();
        fs::write(dir.path().join("pu0"), "").unwrap();
        assert!(matches!(
            check_dump_dir(dir.path()),
            Err(CpuidError::BadDumpDir(_))
        ));
    }
}
