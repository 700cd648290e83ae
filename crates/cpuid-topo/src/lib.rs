// Numan Thabit 2025
#![deny(unsafe_op_in_unsafe_fn)]

pub mod cache;
pub mod decode;
pub mod dump;
pub mod probe;
pub mod summarize;
pub mod tlb;

pub use decode::{decode_proc, identify, CpuidIdentity, CpuidSource, Regs, Vendor};
pub use dump::CpuidDump;
pub use probe::{probe, probe_from_dump, CPUID_PATH_ENV};
pub use summarize::{summarize, ObjectKind, Summary, TopoObject};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CpuidError {
    #[error("cpuid is not available on this machine")]
    Unsupported,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid cpuid dump directory: {0}")]
    BadDumpDir(String),
    #[error("no processor could be probed")]
    NothingProbed,
}

pub type Result<T> = std::result::Result<T, CpuidError>;

/// One cache as reported by the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheInfo {
    /// 1 data, 2 instruction, 3 unified (leaf-4 encoding).
    pub cache_type: u32,
    pub level: u32,
    pub nbthreads_sharing: u32,
    pub linesize: u32,
    pub linepart: u32,
    /// -1 means fully associative.
    pub ways: i32,
    pub sets: u32,
    pub size: u64,
    pub inclusive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlbType {
    Instruction,
    Data,
    SharedL2,
    InstructionL2,
    DataL2,
}

/// One TLB with its per-page-size entry counts. Associativity 0 means
/// fully associative, 1 direct mapped, n an n-way set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbInfo {
    pub tlb_type: TlbType,
    pub entries_4k: u32,
    pub entries_2m: u32,
    pub entries_4m: u32,
    pub entries_1g: u32,
    pub associativity: u32,
}

/// Everything decoded for one hardware thread.
#[derive(Debug, Clone, Default)]
pub struct ProcInfo {
    pub present: bool,
    pub apicid: u32,
    pub max_log_proc: u32,
    pub max_nbcores: u32,
    pub max_nbthreads: u32,
    pub packageid: u32,
    pub nodeid: Option<u32>,
    pub unitid: Option<u32>,
    pub logprocid: u32,
    pub threadid: Option<u32>,
    pub coreid: Option<u32>,
    /// Ids of the x2APIC levels with an unknown type, indexed by level.
    pub other_ids: Vec<Option<u32>>,
    pub levels: u32,
    pub caches: Vec<CacheInfo>,
    pub tlbs: Vec<TlbInfo>,
    pub vendor: Vendor,
    pub vendor_string: String,
    pub brand_string: String,
    pub stepping: u32,
    pub model_number: u32,
    pub family_number: u32,
}
