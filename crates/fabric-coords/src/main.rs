// Numan Thabit 2025
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use fabric_model::{
    get_node_coords, get_topology, PartitionChoice, TopologyFilter, TopologyKind,
};
use fabric_xml::load_machine;

#[derive(Debug, Parser)]
#[command(author, version, about = "Query a machine topology file")]
struct Cli {
    /// Machine XML file
    topofile: PathBuf,

    /// Host to locate; defaults to the current hostname
    node: Option<String>,

    /// Partition index to query instead of the node's own partition
    #[arg(long)]
    partition: Option<usize>,

    /// Only accept nodes inside the current restriction
    #[arg(long)]
    restricted_only: bool,
}

fn kind_name(kind: TopologyKind) -> &'static str {
    match kind {
        TopologyKind::Tree => "tree",
        TopologyKind::Torus => "torus",
        TopologyKind::Grid => "grid",
    }
}

fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    let machine = load_machine(&cli.topofile)?;

    let node_id = match &cli.node {
        Some(name) => {
            machine
                .find_node_by_name(name)
                .with_context(|| format!("node {name} is not in the machine"))?
                .id
        }
        None => {
            machine
                .current_node()
                .context("the current host is not in the machine")?
                .id
        }
    };

    let filter = TopologyFilter {
        partition: cli.partition.map(PartitionChoice::Index),
        restricted_only: cli.restricted_only,
    };
    let filter = if cli.partition.is_some() || cli.restricted_only {
        Some(&filter)
    } else {
        None
    };

    let flat = get_topology(&machine, filter)?;
    print!("Topology: ");
    for kind in &flat.kinds {
        print!("{}(", kind_name(*kind));
    }
    print!("{}", ")".repeat(flat.num_levels));
    println!();

    let print_levels = |label: &str, values: &[String]| {
        print!("\t{label}: ");
        for l in 0..flat.num_levels {
            let row = &values[flat.level_idx[l]..flat.level_idx[l + 1]];
            print!("{}", row.join(", "));
            print!("{}", if l == flat.num_levels - 1 { "\n" } else { "; " });
        }
    };
    let dims: Vec<String> = flat.dims.iter().map(|d| d.to_string()).collect();
    let costs: Vec<String> = flat.costs.iter().map(|c| c.to_string()).collect();
    print_levels("Dimensions", &dims);
    print_levels("Costs", &costs);

    let coords = get_node_coords(&machine, filter, &node_id)?;
    let coords: Vec<String> = coords.iter().map(|c| c.to_string()).collect();
    print_levels("Node coords", &coords);

    Ok(())
}
