// Numan Thabit 2025
//! Cache hierarchy discovery: AMD topology-extension leaf 0x8000001D,
//! Intel leaf 4, and the legacy AMD leaves 0x80000005/0x80000006.

use tracing::debug;

use crate::decode::CpuidSource;
use crate::{CacheInfo, ProcInfo};

/// Associativity encoding of the legacy AMD L2/L3 descriptors.
const AMD_WAYS_TAB: [i32; 16] = [0, 1, 2, 0, 4, 0, 8, 0, 16, 0, 32, 48, 64, 96, 128, -1];

fn decode_deterministic(regs: crate::decode::Regs) -> Option<CacheInfo> {
    let cache_type = regs.eax & 0x1f;
    if cache_type == 0 {
        return None;
    }
    let linesize = (regs.ebx & 0xfff) + 1;
    let linepart = ((regs.ebx >> 12) & 0x3ff) + 1;
    let ways_raw = ((regs.ebx >> 22) & 0x3ff) + 1;
    let sets = regs.ecx + 1;
    Some(CacheInfo {
        cache_type,
        level: (regs.eax >> 5) & 0x7,
        nbthreads_sharing: ((regs.eax >> 14) & 0xfff) + 1,
        linesize,
        linepart,
        ways: if regs.eax & (1 << 9) != 0 {
            -1
        } else {
            ways_raw as i32
        },
        sets,
        size: linesize as u64 * linepart as u64 * ways_raw as u64 * sets as u64,
        inclusive: regs.edx & 0x2 != 0,
    })
}

/// AMD topology extension: walk leaf 0x8000001D until an empty record.
pub fn fill_topoext_caches(src: &mut dyn CpuidSource, info: &mut ProcInfo) {
    for subleaf in 0.. {
        let regs = src.cpuid(0x8000_001d, subleaf);
        match decode_deterministic(regs) {
            Some(cache) => {
                debug!(
                    level = cache.level,
                    size = cache.size,
                    sharing = cache.nbthreads_sharing,
                    "topoext cache"
                );
                info.caches.push(cache);
            }
            None => break,
        }
    }
}

/// Intel leaf 4. The first record also carries the core budget, from
/// which thread and core ids are derived.
pub fn fill_intel_caches(src: &mut dyn CpuidSource, info: &mut ProcInfo) {
    for subleaf in 0.. {
        let regs = src.cpuid(4, subleaf);
        let Some(cache) = decode_deterministic(regs) else {
            break;
        };
        if subleaf == 0 {
            info.max_nbcores = ((regs.eax >> 26) & 0x3f) + 1;
            info.max_nbthreads = (info.max_log_proc / info.max_nbcores).max(1);
            info.threadid = Some(info.logprocid % info.max_nbthreads);
            info.coreid = Some(info.logprocid / info.max_nbthreads);
        }
        info.caches.push(cache);
    }
}

/// Legacy AMD descriptors from leaves 0x80000005 (L1) and 0x80000006
/// (L2, L3), including the family 0x10 model 0x9 split-L3 workaround.
pub fn fill_amd_legacy_cache(info: &mut ProcInfo, level: u32, cache_type: u32, reg: u32) {
    let size: u64 = match level {
        1 => ((reg >> 24) as u64) << 10,
        2 => ((reg >> 16) as u64) << 10,
        3 => ((reg >> 18) as u64) << 19,
        _ => 0,
    };
    if size == 0 {
        return;
    }

    let mut cache = CacheInfo {
        cache_type,
        level,
        nbthreads_sharing: if level <= 2 { 1 } else { info.max_log_proc },
        linesize: reg & 0xff,
        linepart: 0,
        ways: 0,
        sets: 0,
        size,
        inclusive: false,
    };
    if level == 1 {
        let ways = (reg >> 16) & 0xff;
        cache.ways = if ways == 0xff { -1 } else { ways as i32 };
    } else {
        cache.ways = AMD_WAYS_TAB[((reg >> 12) & 0xf) as usize];
    }

    // Magny-Cours (family 0x10 model 0x9) reports one L3 that is split
    // in two halves with the associativity divided accordingly.
    if info.family_number == 0x10
        && info.model_number == 0x9
        && level == 3
        && (cache.ways == -1 || cache.ways % 2 == 0)
        && cache.nbthreads_sharing >= 8
    {
        if cache.nbthreads_sharing == 16 {
            // At most 12 PUs per package on this model.
            cache.nbthreads_sharing = 12;
        }
        cache.nbthreads_sharing /= 2;
        cache.size /= 2;
        if cache.ways != -1 {
            cache.ways /= 2;
        }
    }
    debug!(
        level = cache.level,
        size = cache.size,
        ways = cache.ways,
        "legacy amd cache"
    );
    info.caches.push(cache);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::testsrc::{amd_vendor, TableSource};
    use crate::decode::{decode_proc, identify};

    /// Scenario: AMD family 0x10 model 0x9, 16 threads reported sharing
    /// a 12 MB L3. The decoder must expose the split halves.
    #[test]
    fn magny_cours_l3_is_halved() {
        let mut src = TableSource::new();
        amd_vendor(&mut src, 0x1);
        // family 0x10 (raw f + ext 1), model 0x9, 16 logical, HT set.
        src.set(1, 0, 0x0010_0f92, 16 << 16, 0, 1 << 28);
        src.set(0x8000_0000, 0, 0x8000_0006, 0, 0, 0);
        // L1d 64KB 2-way / L1i 64KB 2-way, 64-byte lines.
        let l1 = (64 << 24) | (2 << 16) | 64;
        src.set(0x8000_0005, 0, 0, 0, l1, l1);
        // L2 512KB 16-way, L3 12MB 16-way.
        let l2 = (512 << 16) | (0x8 << 12) | 64;
        let l3 = (24 << 18) | (0x8 << 12) | 64;
        src.set(0x8000_0006, 0, 0, 0, l2, l3);

        let id = identify(&mut src).expect("cpuid");
        let info = decode_proc(&mut src, &id);

        let l3 = info
            .caches
            .iter()
            .find(|c| c.level == 3)
            .expect("l3 recorded");
        assert_eq!(l3.size, 6 << 20);
        assert_eq!(l3.nbthreads_sharing, 6);
        assert_eq!(l3.ways, 8, "half of the original 16 ways");

        let l2 = info.caches.iter().find(|c| c.level == 2).expect("l2");
        assert_eq!(l2.size, 512 << 10);
        assert_eq!(l2.ways, 16);
        assert_eq!(l2.nbthreads_sharing, 1);
    }

    #[test]
    fn topoext_enumeration_stops_on_empty_type() {
        let mut src = TableSource::new();
        // L1d: 64 sets, 8 ways, 64-byte lines, 2 threads sharing.
        src.set(
            0x8000_001d,
            0,
            1 | (1 << 5) | (1 << 14),
            (7 << 22) | 63,
            63,
            0,
        );
        let mut info = ProcInfo::default();
        fill_topoext_caches(&mut src, &mut info);
        assert_eq!(info.caches.len(), 1);
        let cache = &info.caches[0];
        assert_eq!(cache.level, 1);
        assert_eq!(cache.cache_type, 1);
        assert_eq!(cache.nbthreads_sharing, 2);
        assert_eq!(cache.size, 64 * 8 * 64);
        assert_eq!(cache.ways, 8);
    }

    #[test]
    fn fully_associative_bit_wins_over_the_way_count() {
        let mut src = TableSource::new();
        src.set(0x8000_001d, 0, 1 | (1 << 5) | (1 << 9), 63, 63, 0);
        let mut info = ProcInfo::default();
        fill_topoext_caches(&mut src, &mut info);
        assert_eq!(info.caches[0].ways, -1);
    }
}
