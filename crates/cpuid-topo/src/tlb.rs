// Numan Thabit 2025
//! TLB discovery: the Intel leaf-2 descriptor bytes and the packed AMD
//! records of leaves 0x80000005, 0x80000006 and 0x80000019.

use tracing::debug;

use crate::decode::{CpuidIdentity, CpuidSource};
use crate::{ProcInfo, TlbInfo, TlbType};

/// Intel leaf-2 descriptors carrying TLB geometry:
/// (id, type, 4K, 2M, 4M, 1G, associativity). Associativity 0 is fully
/// associative and 1 direct mapped.
const INTEL_TLB_DESCRIPTORS: &[(u8, TlbType, u32, u32, u32, u32, u32)] = &[
    (0x01, TlbType::Instruction, 32, 0, 0, 0, 4),
    (0x02, TlbType::Instruction, 0, 0, 2, 0, 0),
    (0x03, TlbType::Data, 64, 0, 0, 0, 4),
    (0x04, TlbType::Data, 0, 0, 8, 0, 4),
    (0x05, TlbType::Data, 0, 0, 32, 0, 4),
    (0x0b, TlbType::Instruction, 0, 0, 4, 0, 4),
    (0x4f, TlbType::Instruction, 32, 0, 0, 0, 1),
    (0x50, TlbType::Instruction, 64, 64, 64, 0, 1),
    (0x51, TlbType::Instruction, 128, 128, 128, 0, 1),
    (0x52, TlbType::Instruction, 256, 256, 256, 0, 1),
    (0x55, TlbType::Instruction, 0, 7, 7, 0, 0),
    (0x56, TlbType::Data, 0, 0, 16, 0, 4),
    (0x57, TlbType::Data, 16, 0, 0, 0, 4),
    (0x59, TlbType::Data, 16, 0, 0, 0, 0),
    (0x5a, TlbType::Data, 0, 32, 32, 0, 4),
    (0x5b, TlbType::Data, 64, 0, 64, 0, 1),
    (0x5c, TlbType::Data, 128, 0, 128, 0, 1),
    (0x5d, TlbType::Data, 256, 0, 256, 0, 1),
    (0x61, TlbType::Instruction, 48, 0, 0, 0, 0),
    (0x63, TlbType::Data, 0, 0, 0, 4, 4),
    (0x76, TlbType::Instruction, 0, 8, 8, 0, 0),
    (0xa0, TlbType::Data, 32, 0, 0, 0, 0),
    (0xb0, TlbType::Instruction, 128, 0, 0, 0, 4),
    (0xb1, TlbType::Instruction, 0, 8, 4, 0, 4),
    (0xb2, TlbType::Instruction, 64, 0, 0, 0, 4),
    (0xb3, TlbType::Data, 128, 0, 0, 0, 4),
    (0xb4, TlbType::Data, 256, 0, 0, 0, 4),
    (0xb5, TlbType::Instruction, 64, 0, 0, 0, 8),
    (0xb6, TlbType::Instruction, 128, 0, 0, 0, 8),
    (0xba, TlbType::Data, 64, 0, 0, 0, 4),
    (0xc0, TlbType::Data, 8, 0, 8, 0, 4),
    (0xc1, TlbType::SharedL2, 1024, 1024, 0, 0, 8),
    (0xc2, TlbType::Data, 16, 16, 0, 0, 4),
    // The 1G field is 16 in the reference table even though some manuals
    // list 0; kept as-is pending vendor clarification.
    (0xc3, TlbType::SharedL2, 1536, 1536, 0, 16, 6),
    (0xca, TlbType::SharedL2, 512, 0, 0, 0, 4),
];

fn intel_descriptor(id: u8) -> Option<TlbInfo> {
    INTEL_TLB_DESCRIPTORS
        .iter()
        .find(|entry| entry.0 == id)
        .map(
            |&(_, tlb_type, e4k, e2m, e4m, e1g, associativity)| TlbInfo {
                tlb_type,
                entries_4k: e4k,
                entries_2m: e2m,
                entries_4m: e4m,
                entries_1g: e1g,
                associativity,
            },
        )
}

/// Intel leaf 2: four registers of four descriptor bytes each. A set top
/// bit marks the register reserved; EAX byte 0 always reads 0x01 and is
/// skipped.
pub fn fill_intel_tlbs(src: &mut dyn CpuidSource, info: &mut ProcInfo) {
    let regs = src.cpuid(0x02, 0);
    for (reg_idx, reg) in [regs.eax, regs.ebx, regs.ecx, regs.edx].into_iter().enumerate() {
        if reg >> 31 != 0 {
            continue;
        }
        for byte_idx in 0..4 {
            let id = ((reg >> (8 * byte_idx)) & 0xff) as u8;
            if id == 0x01 && reg_idx == 0 && byte_idx == 0 {
                continue;
            }
            if let Some(tlb) = intel_descriptor(id) {
                debug!(descriptor = id, "intel tlb");
                info.tlbs.push(tlb);
            }
        }
    }
}

/// One packed AMD TLB record. L1 records carry 8-bit entry counts and a
/// plain 8-bit associativity; L2 and 1G records carry 12-bit counts and
/// a 4-bit encoded associativity.
fn amd_tlb_record(tlbs: &mut Vec<TlbInfo>, mut reg: u32, tlb_type: TlbType, size: u32) -> bool {
    if matches!(tlb_type, TlbType::Data | TlbType::DataL2) {
        reg >>= 16;
    }
    let wide = !matches!(tlb_type, TlbType::Instruction | TlbType::Data) || size == 2;
    let raw_assoc = if wide {
        (reg >> 12) & 0xf
    } else {
        (reg >> 8) & 0xff
    };
    if raw_assoc == 0 {
        // Invalid or disabled TLB.
        return false;
    }
    let associativity = if wide {
        match raw_assoc {
            0x1 | 0x2 | 0x4 => raw_assoc,
            0x6 => 8,
            0x8 => 16,
            0xa => 32,
            0xb => 48,
            0xc => 64,
            0xd => 96,
            0xe => 128,
            0xf => 0,
            _ => return false,
        }
    } else if raw_assoc == 0xff {
        0
    } else {
        raw_assoc
    };

    let entries = reg & if wide { 0xfff } else { 0xff };
    let entries_2m = if size == 1 { entries } else { 0 };
    tlbs.push(TlbInfo {
        tlb_type,
        entries_4k: if size == 0 { entries } else { 0 },
        entries_2m,
        entries_4m: entries_2m / 2,
        entries_1g: if size == 2 { reg & 0xfff } else { 0 },
        associativity,
    });
    true
}

/// AMD leaves 0x80000005 (L1), 0x80000006 (L2) and 0x80000019 (1G),
/// with the erratum-658 workaround for family 0x15 parts that hide
/// their L2 instruction TLB for large pages.
pub fn fill_amd_tlbs(src: &mut dyn CpuidSource, id: &CpuidIdentity, info: &mut ProcInfo) {
    let mut found_il2 = false;
    if id.highest_ext >= 0x8000_0005 {
        let regs = src.cpuid(0x8000_0005, 0);
        amd_tlb_record(&mut info.tlbs, regs.ebx, TlbType::Instruction, 0);
        amd_tlb_record(&mut info.tlbs, regs.eax, TlbType::Instruction, 1);
        amd_tlb_record(&mut info.tlbs, regs.ebx, TlbType::Data, 0);
        amd_tlb_record(&mut info.tlbs, regs.eax, TlbType::Data, 1);
    }
    if id.highest_ext >= 0x8000_0006 {
        let regs = src.cpuid(0x8000_0006, 0);
        amd_tlb_record(&mut info.tlbs, regs.ebx, TlbType::InstructionL2, 0);
        found_il2 |= amd_tlb_record(&mut info.tlbs, regs.eax, TlbType::InstructionL2, 1);
        amd_tlb_record(&mut info.tlbs, regs.ebx, TlbType::DataL2, 0);
        amd_tlb_record(&mut info.tlbs, regs.eax, TlbType::DataL2, 1);
    }
    if id.highest_ext >= 0x8000_0019 {
        let regs = src.cpuid(0x8000_0019, 0);
        amd_tlb_record(&mut info.tlbs, regs.eax, TlbType::Instruction, 2);
        amd_tlb_record(&mut info.tlbs, regs.eax, TlbType::Data, 2);
        found_il2 |= amd_tlb_record(&mut info.tlbs, regs.ebx, TlbType::InstructionL2, 2);
        amd_tlb_record(&mut info.tlbs, regs.ebx, TlbType::DataL2, 2);
    }

    // Erratum 658: family 0x15 up to model 0xF reports no L2
    // instruction TLB for 2/4M pages although one exists.
    if !found_il2 && info.family_number == 0x15 && info.model_number <= 0xf {
        info.tlbs.push(TlbInfo {
            tlb_type: TlbType::InstructionL2,
            entries_4k: 0,
            entries_2m: 1024,
            entries_4m: 512,
            entries_1g: 1024,
            associativity: 6,
        });
    }
}
