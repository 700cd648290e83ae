// Numan Thabit 2025
//! Walk every hardware thread, pinning the calling thread to each PU in
//! turn, or replay a dumped transcript directory instead.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::decode::{decode_proc, identify, CpuidSource, Regs};
use crate::dump::{check_dump_dir, CpuidDump};
use crate::{CpuidError, ProcInfo, Result};

/// Environment variable pointing at a dumped transcript directory.
pub const CPUID_PATH_ENV: &str = "FABRIC_CPUID_PATH";

/// Probe the machine: from the dump directory named by the environment
/// when set, natively otherwise.
pub fn probe() -> Result<Vec<ProcInfo>> {
    match std::env::var_os(CPUID_PATH_ENV) {
        Some(path) => probe_from_dump(Path::new(&path)),
        None => probe_native(),
    }
}

/// Replay `pu<idx>` transcripts. The directory is validated up front;
/// an unreadable single PU only zeroes that record.
pub fn probe_from_dump(dir: &Path) -> Result<Vec<ProcInfo>> {
    let nbprocs = check_dump_dir(dir)?;
    info!(dir = %dir.display(), nbprocs, "probing from dumped cpuid");

    let mut first = CpuidDump::read(dir, 0);
    let identity = identify(&mut first)?;

    let mut infos = Vec::with_capacity(nbprocs as usize);
    for idx in 0..nbprocs {
        let mut dump = CpuidDump::read(dir, idx);
        infos.push(decode_proc(&mut dump, &identity));
    }
    Ok(infos)
}

/// Native instruction source.
struct NativeCpuid;

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
impl CpuidSource for NativeCpuid {
    fn cpuid(&mut self, leaf: u32, subleaf: u32) -> Regs {
        #[cfg(target_arch = "x86_64")]
        use core::arch::x86_64::__cpuid_count;
        #[cfg(target_arch = "x86")]
        use core::arch::x86::__cpuid_count;
        // The instruction itself has no side effects; the wrapper is only
        // unsafe because it is an intrinsic.
        let out = unsafe { __cpuid_count(leaf, subleaf) };
        Regs {
            eax: out.eax,
            ebx: out.ebx,
            ecx: out.ecx,
            edx: out.edx,
        }
    }
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
impl CpuidSource for NativeCpuid {
    fn cpuid(&mut self, _leaf: u32, _subleaf: u32) -> Regs {
        Regs::default()
    }
}

/// Probe the processors of this machine by binding to each PU in turn.
/// The caller's affinity is saved before the first bind and restored on
/// every exit path.
pub fn probe_native() -> Result<Vec<ProcInfo>> {
    if !cfg!(any(target_arch = "x86", target_arch = "x86_64")) {
        return Err(CpuidError::Unsupported);
    }
    let cores = core_affinity::get_core_ids().unwrap_or_default();
    if cores.is_empty() {
        return Err(CpuidError::NothingProbed);
    }

    let mut src = NativeCpuid;
    let identity = identify(&mut src)?;

    if cores.len() == 1 {
        // Single PU: nothing to bind to.
        return Ok(vec![decode_proc(&mut src, &identity)]);
    }

    let _guard = affinity::AffinityGuard::save()?;
    let mut infos: Vec<ProcInfo> = Vec::with_capacity(cores.len());
    let mut probed = 0usize;
    for core in cores {
        debug!(cpu = core.id, "binding for cpuid probe");
        if !core_affinity::set_for_current(core) {
            warn!(cpu = core.id, "could not bind, skipping this PU");
            infos.push(ProcInfo::default());
            continue;
        }
        infos.push(decode_proc(&mut src, &identity));
        probed += 1;
    }
    if probed == 0 {
        return Err(CpuidError::NothingProbed);
    }
    Ok(infos)
}

#[cfg(target_os = "linux")]
mod affinity {
    use std::io;
    use std::mem;

    /// Saves the calling thread's cpu mask and puts it back on drop, so
    /// the probe loop cannot leak a one-PU binding on any path.
    pub struct AffinityGuard {
        original: libc::cpu_set_t,
    }

    impl AffinityGuard {
        pub fn save() -> io::Result<Self> {
            let mut original: libc::cpu_set_t = unsafe { mem::zeroed() };
            let rc = unsafe {
                libc::sched_getaffinity(0, mem::size_of::<libc::cpu_set_t>(), &mut original)
            };
            if rc != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(Self { original })
        }
    }

    impl Drop for AffinityGuard {
        fn drop(&mut self) {
            let rc = unsafe {
                libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &self.original)
            };
            if rc != 0 {
                tracing::warn!("could not restore the original cpu affinity");
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod affinity {
    use std::io;

    pub struct AffinityGuard;

    impl AffinityGuard {
        pub fn save() -> io::Result<Self> {
            Ok(Self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn dump_probe_decodes_every_pu() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("hwloc-cpuid-info"), "Architecture: x86\n").unwrap();
        for pu in 0..2u32 {
            let apic = pu << 24;
            fs::write(
                dir.path().join(format!("pu{pu}")),
                format!(
                    "1 0 0 0 0 => 1 756e6547 6c65746e 49656e69\n\
                     1 1 0 0 0 => 306f2 {apic:x} 0 10000000\n\
                     1 80000000 0 0 0 => 80000000 0 0 0\n"
                ),
            )
            .unwrap();
        }
        let infos = probe_from_dump(dir.path()).expect("probe");
        assert_eq!(infos.len(), 2);
        assert!(infos.iter().all(|i| i.present));
        assert_eq!(infos[1].apicid, 1);
        // HT flag set but a single reported logical processor.
        assert_eq!(infos[0].max_log_proc, 1);
    }

    #[test]
    fn missing_summary_file_fails_the_probe() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("pu0"), "").unwrap();
        assert!(matches!(
            probe_from_dump(dir.path()),
            Err(CpuidError::BadDumpDir(_))
        ));
    }
}
