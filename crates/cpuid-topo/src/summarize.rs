// Numan Thabit 2025
//! Turn the per-PU records into an object tree: packages, NUMA nodes,
//! caches, cores, compute-unit groups and PUs, each carrying the cpuset
//! of the hardware threads it spans. Insertion is purely cpuset driven:
//! an object lands under the smallest existing object containing it.

use std::collections::{BTreeMap, BTreeSet};

use fixedbitset::FixedBitSet;
use tracing::warn;

use crate::{CpuidError, ProcInfo, Result, TlbInfo, TlbType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ObjectKind {
    Machine,
    Package,
    NumaNode,
    Cache { level: u32, cache_type: u32 },
    Core,
    /// Compute units and unknown x2APIC levels.
    Group,
    Pu,
}

impl ObjectKind {
    /// Insertion rank for objects spanning the same number of PUs.
    fn rank(&self) -> u32 {
        match self {
            ObjectKind::Machine => 0,
            ObjectKind::Package => 1,
            ObjectKind::NumaNode => 2,
            ObjectKind::Cache { level, .. } => 10 - level.min(&7),
            ObjectKind::Group => 11,
            ObjectKind::Core => 12,
            ObjectKind::Pu => 13,
        }
    }
}

#[derive(Debug)]
pub struct TopoObject {
    pub kind: ObjectKind,
    pub os_index: Option<u32>,
    pub cpuset: FixedBitSet,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<TopoObject>,
}

impl TopoObject {
    fn new(kind: ObjectKind, os_index: Option<u32>, cpuset: FixedBitSet) -> Self {
        Self {
            kind,
            os_index,
            cpuset,
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn count(&self, kind: ObjectKind) -> usize {
        let own = usize::from(self.kind == kind);
        own + self
            .children
            .iter()
            .map(|c| c.count(kind))
            .sum::<usize>()
    }

    pub fn find_all(&self, kind: ObjectKind) -> Vec<&TopoObject> {
        let mut out = Vec::new();
        if self.kind == kind {
            out.push(self);
        }
        for child in &self.children {
            out.extend(child.find_all(kind));
        }
        out
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug)]
pub struct Summary {
    pub root: TopoObject,
    /// False when two hardware threads reported the same APIC id; the
    /// tree is then only an approximation.
    pub apicid_unique: bool,
}

fn contains_all(sup: &FixedBitSet, sub: &FixedBitSet) -> bool {
    sub.ones().all(|i| sup.contains(i))
}

fn cpuset_of(nbprocs: usize, mut pred: impl FnMut(usize) -> bool) -> FixedBitSet {
    let mut set = FixedBitSet::with_capacity(nbprocs);
    for i in 0..nbprocs {
        if pred(i) {
            set.insert(i);
        }
    }
    set
}

fn tlb_description(tlb: &TlbInfo) -> String {
    let mut out = String::from(match tlb.tlb_type {
        TlbType::Instruction => "instruction",
        TlbType::Data => "data",
        TlbType::SharedL2 => "shared L2",
        TlbType::InstructionL2 => "instruction L2",
        TlbType::DataL2 => "data L2",
    });
    match tlb.associativity {
        0 => out.push_str(", fully associative"),
        1 => out.push_str(", direct mapped"),
        n => out.push_str(&format!(", {n}-way associative")),
    }
    for (entries, label) in [
        (tlb.entries_4k, "4KB"),
        (tlb.entries_2m, "2MB"),
        (tlb.entries_4m, "4MB"),
        (tlb.entries_1g, "1GB"),
    ] {
        if entries != 0 {
            out.push_str(&format!(", {label} : {entries}"));
        }
    }
    out
}

fn cpu_info_attrs(info: &ProcInfo) -> Vec<(String, String)> {
    let mut attrs = vec![
        ("CPUVendor".to_string(), info.vendor_string.clone()),
        (
            "CPUFamilyNumber".to_string(),
            info.family_number.to_string(),
        ),
        ("CPUModelNumber".to_string(), info.model_number.to_string()),
    ];
    if !info.brand_string.is_empty() {
        attrs.push(("CPUModel".to_string(), info.brand_string.clone()));
    }
    attrs.push(("CPUStepping".to_string(), info.stepping.to_string()));
    attrs
}

/// Insert `obj` under the smallest node of `parent` whose cpuset
/// contains it. Existing children that fit inside `obj` are adopted by
/// it, so insertion order cannot break the hierarchy. An object equal in
/// kind and cpuset to an existing one is merged, not duplicated.
fn insert(parent: &mut TopoObject, obj: TopoObject) {
    for child in &mut parent.children {
        if contains_all(&child.cpuset, &obj.cpuset) {
            if child.cpuset == obj.cpuset && child.kind == obj.kind {
                for (key, value) in obj.attrs {
                    if child.attr(&key).is_none() {
                        child.attrs.push((key, value));
                    }
                }
                return;
            }
            return insert(child, obj);
        }
    }

    let overlapping = parent.children.iter().any(|child| {
        !contains_all(&obj.cpuset, &child.cpuset)
            && child.cpuset.ones().any(|i| obj.cpuset.contains(i))
    });
    if overlapping {
        warn!(object = ?obj.kind, "overlapping cpusets, dropping object");
        return;
    }

    let mut obj = obj;
    let mut kept = Vec::with_capacity(parent.children.len());
    for child in parent.children.drain(..) {
        if contains_all(&obj.cpuset, &child.cpuset) {
            obj.children.push(child);
        } else {
            kept.push(child);
        }
    }
    kept.push(obj);
    parent.children = kept;
}

fn sort_children(obj: &mut TopoObject) {
    obj.children
        .sort_by_key(|c| (c.cpuset.ones().next().unwrap_or(usize::MAX), c.kind));
    for child in &mut obj.children {
        sort_children(child);
    }
}

/// Build the object tree for one node's worth of `ProcInfo` records.
pub fn summarize(infos: &[ProcInfo]) -> Result<Summary> {
    let nbprocs = infos.len();
    let present: Vec<usize> = (0..nbprocs).filter(|&i| infos[i].present).collect();
    if present.is_empty() {
        return Err(CpuidError::NothingProbed);
    }

    let mut seen_apicids = BTreeSet::new();
    let mut apicid_unique = true;
    for &i in &present {
        if !seen_apicids.insert(infos[i].apicid) {
            apicid_unique = false;
        }
    }
    if !apicid_unique {
        warn!("duplicate APIC ids, topology is not unique");
    }

    let complete = cpuset_of(nbprocs, |i| infos[i].present);
    let mut root = TopoObject::new(ObjectKind::Machine, None, complete);
    root.attrs.push(("Backend".to_string(), "x86".to_string()));

    let mut objects: Vec<TopoObject> = Vec::new();

    // Packages, annotated with the processor identification.
    let mut package_ids: BTreeSet<u32> = BTreeSet::new();
    for &i in &present {
        package_ids.insert(infos[i].packageid);
    }
    for &pkg in &package_ids {
        let cpuset = cpuset_of(nbprocs, |i| infos[i].present && infos[i].packageid == pkg);
        let representative = present
            .iter()
            .find(|&&i| infos[i].packageid == pkg)
            .copied()
            .expect("package has a PU");
        let mut obj = TopoObject::new(ObjectKind::Package, Some(pkg), cpuset);
        obj.attrs = cpu_info_attrs(&infos[representative]);
        objects.push(obj);
    }

    // NUMA nodes, keyed inside their package; they may end up above or
    // below the package depending on the cpusets alone.
    let mut numa_keys: BTreeSet<(u32, u32)> = BTreeSet::new();
    for &i in &present {
        if let Some(node) = infos[i].nodeid {
            numa_keys.insert((infos[i].packageid, node));
        }
    }
    for &(pkg, node) in &numa_keys {
        let cpuset = cpuset_of(nbprocs, |i| {
            infos[i].present && infos[i].packageid == pkg && infos[i].nodeid == Some(node)
        });
        objects.push(TopoObject::new(ObjectKind::NumaNode, Some(node), cpuset));
    }

    // Caches, identified by package, sharing slice, level and type.
    let mut cache_keys: BTreeMap<(u32, u32, u32, u32), (usize, usize)> = BTreeMap::new();
    for &i in &present {
        let info = &infos[i];
        for (ci, cache) in info.caches.iter().enumerate() {
            let slice = (info.apicid % info.max_log_proc.max(1)) / cache.nbthreads_sharing.max(1);
            cache_keys
                .entry((info.packageid, slice, cache.level, cache.cache_type))
                .or_insert((i, ci));
        }
    }
    for (&(pkg, slice, level, cache_type), &(owner, ci)) in &cache_keys {
        let cpuset = cpuset_of(nbprocs, |i| {
            let info = &infos[i];
            info.present
                && info.packageid == pkg
                && info.caches.iter().any(|c| {
                    c.level == level
                        && c.cache_type == cache_type
                        && (info.apicid % info.max_log_proc.max(1)) / c.nbthreads_sharing.max(1)
                            == slice
                })
        });
        let cache = &infos[owner].caches[ci];
        let mut obj = TopoObject::new(ObjectKind::Cache { level, cache_type }, Some(slice), cpuset);
        obj.attrs = vec![
            ("depth".to_string(), cache.level.to_string()),
            ("size".to_string(), cache.size.to_string()),
            ("linesize".to_string(), cache.linesize.to_string()),
            ("associativity".to_string(), cache.ways.to_string()),
            (
                "inclusiveness".to_string(),
                if cache.inclusive { "true" } else { "false" }.to_string(),
            ),
        ];
        objects.push(obj);
    }

    // Cores, annotated with the TLB geometry.
    let mut core_keys: BTreeSet<(u32, u32)> = BTreeSet::new();
    for &i in &present {
        if let Some(core) = infos[i].coreid {
            core_keys.insert((infos[i].packageid, core));
        }
    }
    for &(pkg, core) in &core_keys {
        let cpuset = cpuset_of(nbprocs, |i| {
            infos[i].present && infos[i].packageid == pkg && infos[i].coreid == Some(core)
        });
        let representative = present
            .iter()
            .find(|&&i| infos[i].packageid == pkg && infos[i].coreid == Some(core))
            .copied()
            .expect("core has a PU");
        let mut obj = TopoObject::new(ObjectKind::Core, Some(core), cpuset);
        for (t, tlb) in infos[representative].tlbs.iter().enumerate() {
            obj.attrs.push((format!("TLB{t}"), tlb_description(tlb)));
        }
        objects.push(obj);
    }

    // Compute units.
    let mut unit_keys: BTreeSet<(u32, u32)> = BTreeSet::new();
    for &i in &present {
        if let Some(unit) = infos[i].unitid {
            unit_keys.insert((infos[i].packageid, unit));
        }
    }
    for &(pkg, unit) in &unit_keys {
        let cpuset = cpuset_of(nbprocs, |i| {
            infos[i].present && infos[i].packageid == pkg && infos[i].unitid == Some(unit)
        });
        objects.push(TopoObject::new(ObjectKind::Group, Some(unit), cpuset));
    }

    // Unknown x2APIC levels.
    let max_levels = present
        .iter()
        .map(|&i| infos[i].other_ids.len())
        .max()
        .unwrap_or(0);
    for level in 0..max_levels {
        let mut ids: BTreeSet<u32> = BTreeSet::new();
        for &i in &present {
            if let Some(Some(id)) = infos[i].other_ids.get(level) {
                ids.insert(*id);
            }
        }
        for &id in &ids {
            let cpuset = cpuset_of(nbprocs, |i| {
                infos[i].present && infos[i].other_ids.get(level) == Some(&Some(id))
            });
            objects.push(TopoObject::new(ObjectKind::Group, Some(id), cpuset));
        }
    }

    // PUs come last so every container exists by then.
    for &i in &present {
        let cpuset = cpuset_of(nbprocs, |j| j == i);
        objects.push(TopoObject::new(ObjectKind::Pu, Some(i as u32), cpuset));
    }

    // Largest spans first; the adoption rule makes the order a matter of
    // determinism rather than correctness.
    objects.sort_by_key(|o| {
        (
            std::cmp::Reverse(o.cpuset.count_ones(..)),
            o.kind.rank(),
            o.os_index,
        )
    });
    if package_ids.is_empty() {
        if let Some(&first) = present.first() {
            root.attrs.extend(cpu_info_attrs(&infos[first]));
        }
    }
    for obj in objects {
        insert(&mut root, obj);
    }
    sort_children(&mut root);

    Ok(Summary {
        root,
        apicid_unique,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CacheInfo;

    /// Two sockets of eight two-thread cores, Intel style: the canonical
    /// dual-socket scenario.
    fn dual_socket_infos() -> Vec<ProcInfo> {
        let mut infos = Vec::new();
        for pu in 0..32u32 {
            let package = pu / 16;
            let core = (pu % 16) / 2;
            let thread = pu % 2;
            let apicid = (package << 4) | (core << 1) | thread;
            infos.push(ProcInfo {
                present: true,
                apicid,
                max_log_proc: 16,
                max_nbcores: 8,
                max_nbthreads: 2,
                packageid: package,
                coreid: Some(core),
                threadid: Some(thread),
                logprocid: apicid % 16,
                vendor_string: "GenuineIntel".to_string(),
                family_number: 6,
                model_number: 0x3f,
                caches: vec![
                    // L2 private to each core (two threads).
                    CacheInfo {
                        cache_type: 3,
                        level: 2,
                        nbthreads_sharing: 2,
                        linesize: 64,
                        linepart: 1,
                        ways: 8,
                        sets: 512,
                        size: 256 << 10,
                        inclusive: false,
                    },
                    // L3 shared by the whole package.
                    CacheInfo {
                        cache_type: 3,
                        level: 3,
                        nbthreads_sharing: 16,
                        linesize: 64,
                        linepart: 1,
                        ways: 16,
                        sets: 16384,
                        size: 20 << 20,
                        inclusive: true,
                    },
                ],
                ..ProcInfo::default()
            });
        }
        infos
    }

    #[test]
    fn dual_socket_tree_has_the_expected_shape() {
        let summary = summarize(&dual_socket_infos()).expect("summarize");
        assert!(summary.apicid_unique);
        let root = &summary.root;

        assert_eq!(root.count(ObjectKind::Package), 2);
        assert_eq!(root.count(ObjectKind::Core), 16);
        assert_eq!(root.count(ObjectKind::Pu), 32);

        let packages = root.find_all(ObjectKind::Package);
        for package in packages {
            assert_eq!(package.count(ObjectKind::Core), 8, "cores per package");
            assert_eq!(
                package.count(ObjectKind::Cache {
                    level: 3,
                    cache_type: 3
                }),
                1
            );
            for core in package.find_all(ObjectKind::Core) {
                assert_eq!(
                    core.cpuset.count_ones(..),
                    2,
                    "two hardware threads per core"
                );
            }
            assert_eq!(package.attr("CPUVendor"), Some("GenuineIntel"));
        }
    }

    #[test]
    fn l2_caches_sit_between_core_and_package() {
        let summary = summarize(&dual_socket_infos()).expect("summarize");
        let l2 = ObjectKind::Cache {
            level: 2,
            cache_type: 3,
        };
        assert_eq!(summary.root.count(l2), 16);
        for cache in summary.root.find_all(l2) {
            assert_eq!(cache.cpuset.count_ones(..), 2);
            assert_eq!(cache.count(ObjectKind::Core), 1);
            assert_eq!(cache.attr("size"), Some("262144"));
        }
    }

    #[test]
    fn duplicate_apic_ids_mark_the_tree_non_unique() {
        let mut infos = dual_socket_infos();
        infos[1].apicid = infos[0].apicid;
        let summary = summarize(&infos).expect("summarize");
        assert!(!summary.apicid_unique);
    }

    #[test]
    fn missing_pus_are_left_out_of_the_tree() {
        let mut infos = dual_socket_infos();
        infos[5].present = false;
        let summary = summarize(&infos).expect("summarize");
        assert_eq!(summary.root.count(ObjectKind::Pu), 31);
        assert!(!summary.root.cpuset.contains(5));
    }

    #[test]
    fn numa_nodes_group_compute_units() {
        // One package, two NUMA nodes of two single-thread cores each,
        // AMD style with compute units pairing the cores.
        let mut infos = Vec::new();
        for pu in 0..4u32 {
            infos.push(ProcInfo {
                present: true,
                apicid: pu,
                max_log_proc: 4,
                packageid: 0,
                nodeid: Some(pu / 2),
                unitid: Some(pu / 2),
                coreid: Some(pu),
                threadid: Some(0),
                ..ProcInfo::default()
            });
        }
        let summary = summarize(&infos).expect("summarize");
        assert_eq!(summary.root.count(ObjectKind::NumaNode), 2);
        for numa in summary.root.find_all(ObjectKind::NumaNode) {
            assert_eq!(numa.cpuset.count_ones(..), 2);
            assert_eq!(numa.count(ObjectKind::Core), 2);
        }
    }
}
