// Numan Thabit 2025
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use cpuid_topo::{probe, summarize, ObjectKind};
use fabric_model::{fit_partition, virtualize, DiscoverySnapshot, GraphBuilder};
use fabric_xml::{assign_hwloc_files, save_machine};

#[derive(Debug, Parser)]
#[command(author, version, about = "HPC fabric topology discovery")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build the machine description from a discovery snapshot and write
    /// the topology directory
    Build {
        /// Discovery snapshot (TOML) produced by the fabric scanner
        #[arg(long)]
        input: PathBuf,

        /// Directory receiving IB-<subnet>-nodes.xml
        #[arg(long, default_value = "topology")]
        output: PathBuf,

        /// Directory holding per-host hwloc XML files
        #[arg(long)]
        hwloc_dir: Option<PathBuf>,

        /// Keep equivalent switches distinct instead of collapsing them
        #[arg(long)]
        no_virtualize: bool,
    },

    /// Probe the local host's CPUID topology and print a summary
    Probe,
}

fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    match Cli::parse().command {
        Command::Build {
            input,
            output,
            hwloc_dir,
            no_virtualize,
        } => build(input, output, hwloc_dir, no_virtualize),
        Command::Probe => probe_local(),
    }
}

fn build(
    input: PathBuf,
    output: PathBuf,
    hwloc_dir: Option<PathBuf>,
    no_virtualize: bool,
) -> Result<()> {
    let raw = fs::read_to_string(&input)
        .with_context(|| format!("failed to read snapshot {}", input.display()))?;
    let snapshot: DiscoverySnapshot = toml::from_str(&raw)
        .with_context(|| format!("failed to parse {} as TOML", input.display()))?;

    let mut builder = GraphBuilder::new(&output);
    builder.ingest(&snapshot)?;
    let mut machine = builder.finish()?;
    machine.hwloc_dir = hwloc_dir;

    if !no_virtualize {
        virtualize(&mut machine)?;
    }

    for p in 0..machine.partitions.len() {
        match fit_partition(&mut machine, p) {
            Ok(()) => {}
            Err(err) => warn!(
                partition = %machine.partitions[p].name,
                %err,
                "partition is not a tree, no abstract topology"
            ),
        }
    }

    assign_hwloc_files(&mut machine)?;

    let path = machine
        .default_topo_path()
        .context("snapshot declares no partition, nothing to write")?;
    save_machine(&machine, &path)?;
    info!(path = %path.display(), "topology written");
    Ok(())
}

fn probe_local() -> Result<()> {
    let infos = probe()?;
    let present = infos.iter().filter(|i| i.present).count();
    info!(pus = infos.len(), present, "cpuid probe complete");

    let summary = summarize(&infos)?;
    if !summary.apicid_unique {
        warn!("duplicate APIC ids, the topology is approximate");
    }
    println!(
        "{} package(s), {} core(s), {} PU(s)",
        summary.root.count(ObjectKind::Package),
        summary.root.count(ObjectKind::Core),
        summary.root.count(ObjectKind::Pu),
    );
    for package in summary.root.find_all(ObjectKind::Package) {
        println!(
            "package {}: {} ({} cores)",
            package.os_index.unwrap_or(0),
            package.attr("CPUModel").unwrap_or("unknown model"),
            package.count(ObjectKind::Core),
        );
    }
    Ok(())
}
