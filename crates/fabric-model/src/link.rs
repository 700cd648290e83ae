// Numan Thabit 2025
use tracing::warn;

use crate::ids::{PartitionSet, PhysId};

/// A directed point-to-point segment between two ports. The machine link
/// table is the sole owner; nodes and edges refer to links by id.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalLink {
    pub id: u64,
    pub src: PhysId,
    pub src_port: i32,
    pub dest: PhysId,
    pub dest_port: i32,
    pub speed: String,
    pub width: String,
    /// Bandwidth derived from speed and width at discovery time, or read
    /// back verbatim from the XML.
    pub gbits: f32,
    pub reverse_id: u64,
    pub description: String,
    pub partitions: PartitionSet,
}

/// Effective gbit/s for an IB (speed, width) pair, line encoding included.
/// Unrecognized strings are a discovery-soft condition: warn and report 0.
pub fn gbits_for(speed: &str, width: &str) -> f32 {
    let lane = match speed {
        "SDR" => 2.5 * 0.8,
        "DDR" => 5.0 * 0.8,
        "QDR" => 10.0 * 0.8,
        "FDR10" => 10.3125 * 64.0 / 66.0,
        "FDR" => 14.0625 * 64.0 / 66.0,
        "EDR" => 25.78125 * 64.0 / 66.0,
        other => {
            warn!(speed = other, "unknown link speed");
            return 0.0;
        }
    };
    let lanes = match width {
        "1x" => 1.0,
        "4x" => 4.0,
        "8x" => 8.0,
        "12x" => 12.0,
        other => {
            warn!(width = other, "unknown link width");
            return 0.0;
        }
    };
    (lane * lanes) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qdr_4x_is_32_gbits() {
        assert!((gbits_for("QDR", "4x") - 32.0).abs() < 1e-3);
    }

    #[test]
    fn fdr_encoding_uses_64_66() {
        let g = gbits_for("FDR", "4x");
        assert!((g - 4.0 * 14.0625 * 64.0 / 66.0).abs() < 1e-3);
    }

    #[test]
    fn unknown_strings_fall_back_to_zero() {
        assert_eq!(gbits_for("XDR9", "4x"), 0.0);
        assert_eq!(gbits_for("QDR", "5x"), 0.0);
    }
}
