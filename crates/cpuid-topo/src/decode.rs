// Numan Thabit 2025
//! Decode the CPUID leaves of one hardware thread into a `ProcInfo`.

use tracing::{debug, warn};

use crate::cache;
use crate::tlb;
use crate::{ProcInfo, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Regs {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

/// Where CPUID answers come from: the instruction itself, or a dumped
/// transcript.
pub trait CpuidSource {
    fn cpuid(&mut self, leaf: u32, subleaf: u32) -> Regs;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Vendor {
    Intel,
    Amd,
    #[default]
    Unknown,
}

/// Machine-wide identification read once before the per-PU loop.
#[derive(Debug, Clone)]
pub struct CpuidIdentity {
    pub highest: u32,
    pub highest_ext: u32,
    pub vendor: Vendor,
    /// CPUID feature registers, indexed the way Linux does.
    pub features: [u32; 10],
}

impl CpuidIdentity {
    pub fn has_topoext(&self) -> bool {
        self.features[6] & (1 << 22) != 0
    }

    pub fn has_x2apic(&self) -> bool {
        self.features[4] & (1 << 21) != 0
    }

    pub fn has_ht(&self) -> bool {
        self.features[0] & (1 << 28) != 0
    }
}

const INTEL_EBX: u32 = u32::from_le_bytes(*b"Genu");
const INTEL_EDX: u32 = u32::from_le_bytes(*b"ineI");
const INTEL_ECX: u32 = u32::from_le_bytes(*b"ntel");
const AMD_EBX: u32 = u32::from_le_bytes(*b"Auth");
const AMD_EDX: u32 = u32::from_le_bytes(*b"enti");
const AMD_ECX: u32 = u32::from_le_bytes(*b"cAMD");

/// Read leaves 0, 1, 7, 0x80000000 and 0x80000001 to establish vendor,
/// leaf ranges and feature words. A highest leaf below 1 means the part
/// cannot describe itself at all, which is a hard failure.
pub fn identify(src: &mut dyn CpuidSource) -> Result<CpuidIdentity> {
    let leaf0 = src.cpuid(0, 0);
    let highest = leaf0.eax;
    let vendor = if leaf0.ebx == INTEL_EBX && leaf0.ecx == INTEL_ECX && leaf0.edx == INTEL_EDX {
        Vendor::Intel
    } else if leaf0.ebx == AMD_EBX && leaf0.ecx == AMD_ECX && leaf0.edx == AMD_EDX {
        Vendor::Amd
    } else {
        Vendor::Unknown
    };
    debug!(highest, ?vendor, "cpuid identification");
    if highest < 0x01 {
        return Err(crate::CpuidError::Unsupported);
    }

    let mut features = [0u32; 10];
    let leaf1 = src.cpuid(1, 0);
    features[0] = leaf1.edx;
    features[4] = leaf1.ecx;

    let highest_ext = src.cpuid(0x8000_0000, 0).eax;
    if highest >= 0x7 {
        features[9] = src.cpuid(0x7, 0).ebx;
    }
    if vendor != Vendor::Intel && highest_ext >= 0x8000_0001 {
        let ext1 = src.cpuid(0x8000_0001, 0);
        features[1] = ext1.edx;
        features[6] = ext1.ecx;
    }

    Ok(CpuidIdentity {
        highest,
        highest_ext,
        vendor,
        features,
    })
}

fn vendor_string(src: &mut dyn CpuidSource) -> String {
    let leaf0 = src.cpuid(0, 0);
    let mut bytes = Vec::with_capacity(12);
    bytes.extend_from_slice(&leaf0.ebx.to_le_bytes());
    bytes.extend_from_slice(&leaf0.edx.to_le_bytes());
    bytes.extend_from_slice(&leaf0.ecx.to_le_bytes());
    String::from_utf8_lossy(&bytes).into_owned()
}

fn brand_string(src: &mut dyn CpuidSource) -> String {
    let mut bytes = Vec::with_capacity(48);
    for leaf in 0x8000_0002u32..=0x8000_0004 {
        let regs = src.cpuid(leaf, 0);
        for reg in [regs.eax, regs.ebx, regs.ecx, regs.edx] {
            bytes.extend_from_slice(&reg.to_le_bytes());
        }
    }
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_string()
}

/// Decode one hardware thread. Mirrors the per-leaf walk a processor
/// answers natively, so the same code serves live probing and dumped
/// transcripts.
pub fn decode_proc(src: &mut dyn CpuidSource, id: &CpuidIdentity) -> ProcInfo {
    let mut info = ProcInfo {
        present: true,
        vendor: id.vendor,
        vendor_string: vendor_string(src),
        ..ProcInfo::default()
    };

    // Leaf 1: APIC id, logical-processor budget, family/model/stepping.
    let leaf1 = src.cpuid(1, 0);
    info.apicid = leaf1.ebx >> 24;
    info.max_log_proc = if leaf1.edx & (1 << 28) != 0 {
        let reported = (leaf1.ebx >> 16) & 0xff;
        1 << (32 - (reported.saturating_sub(1)).leading_zeros())
    } else {
        1
    };
    info.packageid = info.apicid / info.max_log_proc;
    info.logprocid = info.apicid % info.max_log_proc;

    let raw_model = (leaf1.eax >> 4) & 0xf;
    let raw_ext_model = (leaf1.eax >> 16) & 0xf;
    let raw_family = (leaf1.eax >> 8) & 0xf;
    let raw_ext_family = (leaf1.eax >> 20) & 0xff;
    info.family_number = if matches!(id.vendor, Vendor::Intel | Vendor::Amd) && raw_family == 0xf {
        raw_family + raw_ext_family
    } else {
        raw_family
    };
    info.model_number = if (id.vendor == Vendor::Intel && (raw_family == 0x6 || raw_family == 0xf))
        || (id.vendor == Vendor::Amd && raw_family == 0xf)
    {
        raw_model | (raw_ext_model << 4)
    } else {
        raw_model
    };
    info.stepping = leaf1.eax & 0xf;

    if id.highest_ext >= 0x8000_0004 {
        info.brand_string = brand_string(src);
    }

    // Leaf 0x80000008: the real core budget on AMD; the legacy
    // max_log_proc can undercount, so package/core splits are redone.
    if id.vendor != Vendor::Intel && id.highest_ext >= 0x8000_0008 {
        let ext8 = src.cpuid(0x8000_0008, 0);
        let coreidsize = (ext8.ecx >> 12) & 0xf;
        info.max_nbcores = if coreidsize == 0 {
            (ext8.ecx & 0xff) + 1
        } else {
            1 << coreidsize
        };
        info.max_nbthreads = 1;
        info.packageid = info.apicid / info.max_nbcores;
        info.logprocid = info.apicid % info.max_nbcores;
        info.threadid = Some(info.logprocid % info.max_nbthreads);
        info.coreid = Some(info.logprocid / info.max_nbthreads);
    }

    if id.vendor != Vendor::Intel && id.highest_ext >= 0x8000_0005 {
        tlb::fill_amd_tlbs(src, id, &mut info);
    } else if id.vendor != Vendor::Amd && id.highest >= 0x02 {
        tlb::fill_intel_tlbs(src, &mut info);
    }

    if id.vendor != Vendor::Intel && id.has_topoext() {
        // AMD topology extension: node and compute-unit ids, then the
        // full cache enumeration.
        let ext1e = src.cpuid(0x8000_001e, 0);
        info.apicid = ext1e.eax;
        info.nodeid = Some(ext1e.ecx & 0xff);
        let nodes_per_proc = ((ext1e.ecx >> 8) & 7) + 1;
        info.unitid = Some(ext1e.ebx & 0xff);
        let cores_per_unit = ((ext1e.ebx >> 8) & 3) + 1;
        debug!(
            apicid = info.apicid,
            nodes_per_proc, cores_per_unit, "topology extension"
        );
        cache::fill_topoext_caches(src, &mut info);
    } else if id.vendor != Vendor::Intel {
        if id.highest_ext >= 0x8000_0005 {
            let ext5 = src.cpuid(0x8000_0005, 0);
            cache::fill_amd_legacy_cache(&mut info, 1, 1, ext5.ecx);
            cache::fill_amd_legacy_cache(&mut info, 1, 2, ext5.edx);
        }
        if id.highest_ext >= 0x8000_0006 {
            let ext6 = src.cpuid(0x8000_0006, 0);
            if ext6.ecx & 0xf000 != 0 {
                cache::fill_amd_legacy_cache(&mut info, 2, 3, ext6.ecx);
            }
            if ext6.edx & 0xf000 != 0 {
                cache::fill_amd_legacy_cache(&mut info, 3, 3, ext6.edx);
            }
        }
    }

    if id.vendor != Vendor::Amd && id.highest >= 0x04 {
        cache::fill_intel_caches(src, &mut info);
    }

    if id.vendor == Vendor::Intel && id.has_x2apic() {
        decode_x2apic(src, &mut info);
    }

    info
}

/// Leaf 0xB: slice the 32-bit x2APIC id level by level. Type 1 levels
/// carry the thread id, type 2 the core id, anything else is kept as an
/// anonymous grouping id; the bits above the last level are the package.
fn decode_x2apic(src: &mut dyn CpuidSource, info: &mut ProcInfo) {
    let mut levels = 0;
    loop {
        let regs = src.cpuid(0xb, levels);
        if regs.eax == 0 && regs.ebx == 0 {
            break;
        }
        levels += 1;
    }
    if levels == 0 {
        return;
    }
    info.levels = levels;
    info.other_ids = vec![None; levels as usize];

    let mut apic_shift = 0u32;
    let mut apic_id = 0u32;
    for level in 0..levels {
        let regs = src.cpuid(0xb, level);
        let apic_nextshift = regs.eax & 0x1f;
        let apic_type = (regs.ecx >> 8) & 0xff;
        apic_id = regs.edx;
        let id =
            (apic_id >> apic_shift) & ((1u32 << apic_nextshift.saturating_sub(apic_shift)) - 1);
        match apic_type {
            1 => info.threadid = Some(id),
            2 => info.coreid = Some(id),
            other => {
                warn!(level, apic_type = other, "unknown x2apic level type");
                info.other_ids[level as usize] = Some(apic_id >> apic_shift);
            }
        }
        apic_shift = apic_nextshift;
    }
    info.apicid = apic_id;
    info.packageid = apic_id >> apic_shift;
}

#[cfg(test)]
pub(crate) mod testsrc {
    use super::*;
    use std::collections::BTreeMap;

    /// Table-driven source for scenario tests, keyed by (leaf, subleaf).
    pub struct TableSource {
        pub table: BTreeMap<(u32, u32), Regs>,
    }

    impl TableSource {
        pub fn new() -> Self {
            Self {
                table: BTreeMap::new(),
            }
        }

        pub fn set(&mut self, leaf: u32, subleaf: u32, eax: u32, ebx: u32, ecx: u32, edx: u32) {
            self.table
                .insert((leaf, subleaf), Regs { eax, ebx, ecx, edx });
        }
    }

    impl CpuidSource for TableSource {
        fn cpuid(&mut self, leaf: u32, subleaf: u32) -> Regs {
            self.table
                .get(&(leaf, subleaf))
                .copied()
                .unwrap_or_default()
        }
    }

    pub fn intel_vendor(src: &mut TableSource, highest: u32) {
        src.set(0, 0, highest, INTEL_EBX, INTEL_ECX, INTEL_EDX);
    }

    pub fn amd_vendor(src: &mut TableSource, highest: u32) {
        src.set(0, 0, highest, AMD_EBX, AMD_ECX, AMD_EDX);
    }
}

#[cfg(test)]
mod tests {
    use super::testsrc::*;
    use super::*;

    /// Scenario: two-socket Intel part, 8 cores with two threads each,
    /// topology published through leaf 0xB.
    fn intel_two_sockets(apicid: u32) -> TableSource {
        let mut src = TableSource::new();
        intel_vendor(&mut src, 0xb);
        // 16 logical processors per package, HT flag, x2APIC support.
        src.set(
            1,
            0,
            0x000306f2,
            (apicid << 24) | (16 << 16),
            1 << 21,
            1 << 28,
        );
        src.set(0x8000_0000, 0, 0x8000_0004, 0, 0, 0);
        // SMT level: shift 1, two threads.
        src.set(0xb, 0, 1, 2, 1 << 8, apicid);
        // Core level: shift 4, sixteen logical.
        src.set(0xb, 1, 4, 16, 2 << 8, apicid);
        src
    }

    #[test]
    fn intel_leaf_b_slices_thread_core_package() {
        let mut probe_results = Vec::new();
        for pu in 0..32u32 {
            let package = pu / 16;
            let core = (pu % 16) / 2;
            let thread = pu % 2;
            let apicid = (package << 4) | (core << 1) | thread;
            let mut src = intel_two_sockets(apicid);
            let id = identify(&mut src).expect("cpuid available");
            assert!(id.has_x2apic());
            let info = decode_proc(&mut src, &id);
            assert_eq!(info.threadid, Some(thread));
            assert_eq!(info.coreid, Some(core));
            assert_eq!(info.packageid, package);
            probe_results.push(info.apicid);
        }
        probe_results.sort_unstable();
        probe_results.dedup();
        assert_eq!(probe_results.len(), 32, "all apic ids unique");
    }

    #[test]
    fn family_and_model_use_extended_fields() {
        // Intel family 6: extended model contributes.
        let mut src = intel_two_sockets(0);
        src.set(1, 0, 0x000306f2, 16 << 16, 1 << 21, 1 << 28);
        let id = identify(&mut src).expect("cpuid");
        let info = decode_proc(&mut src, &id);
        assert_eq!(info.family_number, 0x6);
        assert_eq!(info.model_number, 0x3f);
        assert_eq!(info.stepping, 0x2);

        // AMD family 0x10: raw family nibble 0xf plus extended family 1.
        let mut src = TableSource::new();
        amd_vendor(&mut src, 0x1);
        src.set(1, 0, 0x0010_0f92, 16 << 16, 0, 1 << 28);
        src.set(0x8000_0000, 0, 0x8000_0001, 0, 0, 0);
        let id = identify(&mut src).expect("cpuid");
        let info = decode_proc(&mut src, &id);
        assert_eq!(info.family_number, 0x10);
        assert_eq!(info.model_number, 0x9);
    }

    #[test]
    fn missing_cpuid_is_a_hard_failure() {
        let mut src = TableSource::new();
        src.set(0, 0, 0, 0, 0, 0);
        assert!(matches!(
            identify(&mut src),
            Err(crate::CpuidError::Unsupported)
        ));
    }
}
