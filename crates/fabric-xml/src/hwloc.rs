// Numan Thabit 2025
//! Index the per-host hwloc topology files living next to the machine
//! XML. A host may carry `<hostname>.xml` or `<hostname>.diff.xml`; a
//! diff references a base topology by name, which must occupy an earlier
//! slot in the table before the diff is recorded.

use std::fs;
use std::path::Path;

use tracing::warn;

use fabric_model::{Machine, PhysId};

use crate::dom::parse;
use crate::read::intern_hwloc_path;
use crate::Result;

/// Scan the machine's hwloc directory and fill `hwloc_topo_idx` on every
/// host that has a topology file. Missing or unreadable files are
/// discovery-soft: the host is skipped with a warning.
pub fn assign_hwloc_files(machine: &mut Machine) -> Result<()> {
    let Some(dir) = machine.hwloc_dir.clone() else {
        return Ok(());
    };

    let hosts: Vec<(PhysId, String)> = machine
        .explicit()?
        .nodes
        .values()
        .filter(|n| n.is_host())
        .filter_map(|n| n.hostname.clone().map(|h| (n.id, h)))
        .collect();

    for (id, hostname) in hosts {
        if hostname.starts_with("ANONYMOUS") {
            continue;
        }
        let diff_name = format!("{hostname}.diff.xml");
        let plain_name = format!("{hostname}.xml");
        let slot = if dir.join(&diff_name).is_file() {
            match diff_base(&dir.join(&diff_name)) {
                Some(base) => {
                    let base_file = format!("{base}.xml");
                    if !dir.join(&base_file).is_file() {
                        warn!(host = %hostname, base = %base, "diff base topology absent");
                        continue;
                    }
                    intern_hwloc_path(machine, &base_file);
                    Some(intern_hwloc_path(machine, &diff_name))
                }
                None => {
                    warn!(host = %hostname, "unreadable topology diff");
                    None
                }
            }
        } else if dir.join(&plain_name).is_file() {
            Some(intern_hwloc_path(machine, &plain_name))
        } else {
            warn!(host = %hostname, "hwloc file absent");
            None
        };
        if let Some(slot) = slot {
            let explicit = machine.explicit_mut()?;
            if let Some(node) = explicit.nodes.get_mut(&id) {
                node.hwloc_topo_idx = Some(slot);
            }
        }
    }
    Ok(())
}

/// Name of the topology a diff file was computed against.
fn diff_base(path: &Path) -> Option<String> {
    let text = fs::read_to_string(path).ok()?;
    let root = parse(&text).ok()?;
    root.attr("refname").map(str::to_string)
}
