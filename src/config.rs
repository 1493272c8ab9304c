/*! Instrument configuration.

A JSON document enumerates the detector's hybrids by (ring, FEN, local
hybrid) and sets the clustering, matching and filter parameters. The loader
rejects malformed files explicitly instead of silently defaulting; a config
error is fatal before the pipeline threads start.
*/
use std::collections::HashMap;

use log::info;
use serde::Deserialize;

use crate::hybrid::Hybrid;
use crate::{Error, Result};

/// Largest logical ring id.
pub const MAX_RING: u8 = 11;

/// Largest front-end node id.
pub const MAX_FEN: u8 = 23;

/// Largest local hybrid index on one FEN.
pub const MAX_LOCAL_HYBRID: u8 = 7;

/// Y channels (wires) covered by one hybrid.
pub const WIRES_PER_CASSETTE: u16 = 32;

/// X channels (strips) covered by one hybrid.
pub const STRIPS_PER_CASSETTE: u16 = 64;

fn default_geometry() -> String {
    "Freia".into()
}
fn default_max_pulse_time_ns() -> u64 {
    5 * 71_428_571 // five 14 Hz frames
}
fn default_max_tof_ns() -> u64 {
    800_000_000
}
fn default_time_box_ns() -> u64 {
    2010
}
fn default_clustering_gap() -> u64 {
    500
}
fn default_coord_gap() -> u16 {
    1
}
fn default_matching_gap() -> u64 {
    500
}
fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
struct ConfigRoot {
    #[serde(rename = "Detector")]
    detector: String,
    #[serde(rename = "InstrumentGeometry", default = "default_geometry")]
    instrument_geometry: String,
    #[serde(rename = "MaxPulseTimeNS", default = "default_max_pulse_time_ns")]
    max_pulse_time_ns: u64,
    #[serde(rename = "MaxTOFNS", default = "default_max_tof_ns")]
    max_tof_ns: u64,
    #[serde(rename = "TimeBoxNs", default = "default_time_box_ns")]
    time_box_ns: u64,
    #[serde(rename = "MaxClusteringTimeGap", default = "default_clustering_gap")]
    max_clustering_time_gap: u64,
    #[serde(rename = "MaxClusteringCoordGap", default = "default_coord_gap")]
    max_coord_gap: u16,
    #[serde(rename = "MaxMatchingTimeGap", default = "default_matching_gap")]
    max_matching_time_gap: u64,
    #[serde(rename = "WireGapCheck", default = "default_true")]
    wire_gap_check: bool,
    #[serde(rename = "StripGapCheck", default = "default_true")]
    strip_gap_check: bool,
    #[serde(rename = "MaxGapWire", default)]
    max_gap_wire: u16,
    #[serde(rename = "MaxGapStrip", default)]
    max_gap_strip: u16,
    #[serde(rename = "SplitMultiEvents", default)]
    split_multi_events: bool,
    #[serde(rename = "Config")]
    mappings: Vec<Mapping>,
}

#[derive(Deserialize)]
struct Mapping {
    #[serde(rename = "Ring")]
    ring: u8,
    #[serde(rename = "FEN")]
    fen: u8,
    #[serde(rename = "Hybrid")]
    hybrid: u8,
    #[serde(rename = "HybridId")]
    hybrid_id: String,
    #[serde(rename = "CassetteNumber")]
    cassette_number: Option<u16>,
    #[serde(rename = "XOffset")]
    x_offset: Option<u16>,
    #[serde(rename = "YOffset")]
    y_offset: Option<u16>,
}

/// Validated instrument configuration.
#[derive(Debug)]
pub struct Config {
    /// Instrument name from the file.
    pub instrument_name: String,
    /// Geometry variant name ("Freia", "CSPEC", "LET", ...).
    pub instrument_geometry: String,
    /// Largest allowed pulse/prev-pulse distance.
    pub max_pulse_time_ns: u64,
    /// Largest allowed time of flight.
    pub max_tof_ns: u64,
    /// Matcher safety margin: clusters younger than this are not matched
    /// until flush.
    pub time_box_ns: u64,
    /// Clusterer time gap limit.
    pub max_clustering_time_gap: u64,
    /// Clusterer coordinate gap limit.
    pub max_coord_gap: u16,
    /// Matcher center distance limit.
    pub max_matching_time_gap: u64,
    /// Reject events with wire-plane channel gaps.
    pub wire_gap_check: bool,
    /// Reject events with strip-plane channel gaps.
    pub strip_gap_check: bool,
    /// Allowed wire gap when checking.
    pub max_gap_wire: u16,
    /// Allowed strip gap when checking.
    pub max_gap_strip: u16,
    /// Split clusters with several local maxima (reserved, off by default).
    pub split_multi_events: bool,
    /// Logical rings in use (highest configured + 1).
    pub num_rings: u8,
    /// Hybrid slots in configuration order.
    pub hybrids: Vec<Hybrid>,
    /// Logical x size of the pixel grid.
    pub size_x: u16,
    /// Logical y size of the pixel grid.
    pub size_y: u16,
    num_fens: Vec<u8>,
    lookup: HashMap<(u8, u8, u8), u8>,
}

impl Config {
    /// Load and validate a configuration for `expected_detector`.
    pub fn load(expected_detector: &str, path: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(expected_detector, &text)
    }

    /// Parse from a JSON string; see [`Config::load`].
    pub fn from_json(expected_detector: &str, text: &str) -> Result<Self> {
        let root: ConfigRoot = serde_json::from_str(text).map_err(|e| {
            if e.to_string().contains("missing field `Detector`") {
                Error::Config("missing 'Detector' field".into())
            } else {
                Error::Json(e)
            }
        })?;
        if root.detector != expected_detector {
            return Err(Error::Config(format!(
                "config is for detector '{}', expected '{expected_detector}'",
                root.detector
            )));
        }

        let max_cassette = root
            .mappings
            .iter()
            .filter_map(|m| m.cassette_number)
            .max()
            .unwrap_or(0);

        let mut hybrids = Vec::with_capacity(root.mappings.len());
        let mut lookup = HashMap::new();
        let mut num_rings = 0u8;
        let mut num_fens = vec![0u8; usize::from(MAX_RING) + 1];
        for (n, m) in root.mappings.iter().enumerate() {
            if m.ring > MAX_RING || m.fen > MAX_FEN || m.hybrid > MAX_LOCAL_HYBRID {
                return Err(Error::Config(format!(
                    "illegal Ring/FEN/Hybrid values {}/{}/{}",
                    m.ring, m.fen, m.hybrid
                )));
            }
            if lookup.insert((m.ring, m.fen, m.hybrid), n as u8).is_some() {
                return Err(Error::Config(format!(
                    "duplicate hybrid at Ring/FEN/Hybrid {}/{}/{}",
                    m.ring, m.fen, m.hybrid
                )));
            }
            let y_offset = match (m.y_offset, m.cassette_number) {
                (Some(y), _) => y,
                (None, Some(cassette)) => (max_cassette - cassette) * WIRES_PER_CASSETTE,
                (None, None) => 0,
            };
            hybrids.push(Hybrid {
                initialised: true,
                hybrid_id: m.hybrid_id.clone(),
                hybrid_number: n as u8,
                x_offset: m.x_offset.unwrap_or(0),
                y_offset,
                vmms: Default::default(),
            });
            num_rings = num_rings.max(m.ring + 1);
            let fens = &mut num_fens[usize::from(m.ring)];
            *fens = (*fens).max(m.fen);
            info!(
                "Config: hybrid {n} '{}' at Ring/FEN/Hybrid {}/{}/{}, y offset {y_offset}",
                m.hybrid_id, m.ring, m.fen, m.hybrid
            );
        }
        if hybrids.is_empty() {
            return Err(Error::Config("no hybrids configured".into()));
        }

        let size_x = STRIPS_PER_CASSETTE;
        let size_y = WIRES_PER_CASSETTE * hybrids.len() as u16;
        info!(
            "Config: detector '{}' with {} hybrids, {} pixels",
            root.detector,
            hybrids.len(),
            u32::from(size_x) * u32::from(size_y)
        );

        Ok(Self {
            instrument_name: root.detector,
            instrument_geometry: root.instrument_geometry,
            max_pulse_time_ns: root.max_pulse_time_ns,
            max_tof_ns: root.max_tof_ns,
            time_box_ns: root.time_box_ns,
            max_clustering_time_gap: root.max_clustering_time_gap,
            max_coord_gap: root.max_coord_gap,
            max_matching_time_gap: root.max_matching_time_gap,
            wire_gap_check: root.wire_gap_check,
            strip_gap_check: root.strip_gap_check,
            max_gap_wire: root.max_gap_wire,
            max_gap_strip: root.max_gap_strip,
            split_multi_events: root.split_multi_events,
            num_rings,
            hybrids,
            size_x,
            size_y,
            num_fens,
            lookup,
        })
    }

    /// Number of configured hybrids.
    #[must_use]
    pub fn num_hybrids(&self) -> usize {
        self.hybrids.len()
    }

    /// Largest configured FEN id on `ring`.
    #[must_use]
    pub fn max_fen(&self, ring: u8) -> u8 {
        self.num_fens.get(usize::from(ring)).copied().unwrap_or(0)
    }

    /// Dense hybrid index for a (ring, FEN, local hybrid) triple.
    #[must_use]
    pub fn hybrid_index(&self, ring: u8, fen: u8, hybrid: u8) -> Option<u8> {
        self.lookup.get(&(ring, fen, hybrid)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OK_CONFIG: &str = r#"
    {
      "Detector": "freia",
      "MaxPulseTimeNS": 357142855,
      "MaxGapWire": 0,
      "MaxGapStrip": 0,
      "Config": [
        { "Ring": 0, "FEN": 0, "Hybrid": 0, "HybridId": "E5533333222222221111111100000000", "CassetteNumber": 1 },
        { "Ring": 0, "FEN": 0, "Hybrid": 1, "HybridId": "E5544444222222221111111100000000", "CassetteNumber": 0 },
        { "Ring": 1, "FEN": 2, "Hybrid": 0, "HybridId": "E5555555222222221111111100000000" }
      ]
    }"#;

    #[test]
    fn ok_config() {
        let c = Config::from_json("freia", OK_CONFIG).unwrap();
        assert_eq!(c.num_hybrids(), 3);
        assert_eq!(c.num_rings, 2);
        assert_eq!(c.max_fen(0), 0);
        assert_eq!(c.max_fen(1), 2);
        assert_eq!(c.size_x, 64);
        assert_eq!(c.size_y, 96);
        assert_eq!(c.max_pulse_time_ns, 357_142_855);
        // Cassette 1 of max 1 sits at y 0, cassette 0 one cassette lower.
        assert_eq!(c.hybrids[0].y_offset, 0);
        assert_eq!(c.hybrids[1].y_offset, 32);
        // No cassette number: y offset 0.
        assert_eq!(c.hybrids[2].y_offset, 0);
        assert_eq!(c.hybrid_index(0, 0, 1), Some(1));
        assert_eq!(c.hybrid_index(1, 2, 0), Some(2));
        assert_eq!(c.hybrid_index(2, 0, 0), None);
    }

    #[test]
    fn missing_detector_field() {
        let err = Config::from_json("freia", r#"{ "Config": [] }"#).unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("Detector")));
    }

    #[test]
    fn wrong_detector() {
        assert!(Config::from_json("loki", OK_CONFIG).is_err());
    }

    #[test]
    fn not_json() {
        assert!(Config::from_json("freia", "not json at all").is_err());
    }

    #[test]
    fn illegal_ring() {
        let text = r#"
        { "Detector": "freia",
          "Config": [ { "Ring": 12, "FEN": 0, "Hybrid": 0, "HybridId": "a" } ] }"#;
        let err = Config::from_json("freia", text).unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("illegal")));
    }

    #[test]
    fn illegal_fen_and_hybrid() {
        let text = r#"
        { "Detector": "freia",
          "Config": [ { "Ring": 0, "FEN": 24, "Hybrid": 0, "HybridId": "a" } ] }"#;
        assert!(Config::from_json("freia", text).is_err());
        let text = r#"
        { "Detector": "freia",
          "Config": [ { "Ring": 0, "FEN": 0, "Hybrid": 8, "HybridId": "a" } ] }"#;
        assert!(Config::from_json("freia", text).is_err());
    }

    #[test]
    fn duplicate_hybrid() {
        let text = r#"
        { "Detector": "freia",
          "Config": [
            { "Ring": 0, "FEN": 0, "Hybrid": 0, "HybridId": "a" },
            { "Ring": 0, "FEN": 0, "Hybrid": 0, "HybridId": "b" } ] }"#;
        let err = Config::from_json("freia", text).unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("duplicate")));
    }

    #[test]
    fn empty_config_rejected() {
        let text = r#"{ "Detector": "freia", "Config": [] }"#;
        assert!(Config::from_json("freia", text).is_err());
    }

    #[test]
    fn explicit_offsets_win() {
        let text = r#"
        { "Detector": "freia",
          "Config": [
            { "Ring": 0, "FEN": 0, "Hybrid": 0, "HybridId": "a",
              "CassetteNumber": 0, "XOffset": 7, "YOffset": 11 } ] }"#;
        let c = Config::from_json("freia", text).unwrap();
        assert_eq!(c.hybrids[0].x_offset, 7);
        assert_eq!(c.hybrids[0].y_offset, 11);
    }

    #[test]
    fn defaults_apply() {
        let text = r#"
        { "Detector": "freia",
          "Config": [ { "Ring": 0, "FEN": 0, "Hybrid": 0, "HybridId": "a" } ] }"#;
        let c = Config::from_json("freia", text).unwrap();
        assert!(c.wire_gap_check);
        assert!(c.strip_gap_check);
        assert!(!c.split_multi_events);
        assert_eq!(c.max_tof_ns, 800_000_000);
        assert_eq!(c.time_box_ns, 2010);
        assert_eq!(c.instrument_geometry, "Freia");
    }
}
