/*! Per-ASIC time and amplitude calibration.

A calibration file supplies per-channel polynomial coefficients for the TDC
(fine time, ns) and ADC (amplitude, counts) corrections of every ASIC. The
polynomials are evaluated once at load time at the channel's normalised
position and clamped to the channel's interval, leaving two flat correction
tables per ASIC for the hot path. Empty polynomial arrays are the defined
null calibration.
*/
use serde::Deserialize;

use crate::hybrid::Hybrid;
use crate::{Error, Result};

/// Channels per ASIC.
pub const CHANNELS: usize = 64;

/// Calibration groups per hybrid: two ASICs times (TDC, ADC).
pub const GROUPS_PER_HYBRID: usize = 4;

/// Correction tables for one ASIC.
#[derive(Debug, Clone)]
pub struct Vmm3Calibration {
    tdc_offset: [i64; CHANNELS],
    adc_offset: [i32; CHANNELS],
}

impl Default for Vmm3Calibration {
    fn default() -> Self {
        Self {
            tdc_offset: [0; CHANNELS],
            adc_offset: [0; CHANNELS],
        }
    }
}

impl Vmm3Calibration {
    /// Null calibration: all corrections zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Time correction in ns for `channel`, added to the readout time.
    #[must_use]
    pub fn tdc_corr(&self, channel: u8) -> i64 {
        self.tdc_offset[usize::from(channel) % CHANNELS]
    }

    /// Corrected amplitude for `channel`.
    ///
    /// The result is not clamped to the 10-bit range; the caller counts
    /// saturated values and keeps them.
    #[must_use]
    pub fn adc_corr(&self, channel: u8, adc: u16) -> u16 {
        let v = i32::from(adc) + self.adc_offset[usize::from(channel) % CHANNELS];
        v.clamp(0, i32::from(u16::MAX)) as u16
    }

    fn set_tdc(&mut self, table: [i64; CHANNELS]) {
        self.tdc_offset = table;
    }

    fn set_adc(&mut self, table: [i32; CHANNELS]) {
        self.adc_offset = table;
    }
}

#[derive(Deserialize)]
struct CalibRoot {
    #[serde(rename = "Calibration")]
    calibration: CalibSection,
}

#[derive(Deserialize)]
struct CalibSection {
    #[allow(dead_code)]
    #[serde(default)]
    version: u32,
    #[allow(dead_code)]
    #[serde(default)]
    date: Option<String>,
    #[allow(dead_code)]
    #[serde(default)]
    info: Option<String>,
    instrument: String,
    groups: usize,
    groupsize: usize,
    #[serde(rename = "Parameters")]
    parameters: Vec<CalibGroup>,
}

#[derive(Deserialize)]
struct CalibGroup {
    groupindex: usize,
    intervals: Vec<[f64; 2]>,
    polynomials: Vec<[f64; 4]>,
}

/// Loaded calibration file, applied onto hybrid slots.
pub struct CalibFile {
    section: CalibSection,
}

impl CalibFile {
    /// Parse and sanity check a calibration file for `instrument`.
    pub fn load(instrument: &str, path: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(instrument, &text)
    }

    /// Parse from a JSON string; see [`CalibFile::load`].
    pub fn from_json(instrument: &str, text: &str) -> Result<Self> {
        let root: CalibRoot = serde_json::from_str(text)?;
        let section = root.calibration;
        if section.instrument != instrument {
            return Err(Error::Calibration(format!(
                "calibration is for instrument '{}', expected '{instrument}'",
                section.instrument
            )));
        }
        if section.groups != section.parameters.len() {
            return Err(Error::Calibration(format!(
                "{} groups promised, {} present",
                section.groups,
                section.parameters.len()
            )));
        }
        if section.groupsize != CHANNELS {
            return Err(Error::Calibration(format!(
                "group size {} instead of {CHANNELS}",
                section.groupsize
            )));
        }
        for group in &section.parameters {
            let n = group.polynomials.len();
            if group.intervals.len() != n {
                return Err(Error::Calibration(format!(
                    "group {}: {} intervals for {n} polynomials",
                    group.groupindex,
                    group.intervals.len()
                )));
            }
            if n != 0 && n != CHANNELS {
                return Err(Error::Calibration(format!(
                    "group {}: {n} polynomials, want 0 or {CHANNELS}",
                    group.groupindex
                )));
            }
            if let Some(bad) = group.intervals.iter().find(|iv| iv[0] > iv[1]) {
                return Err(Error::Calibration(format!(
                    "group {}: inverted interval [{}, {}]",
                    group.groupindex, bad[0], bad[1]
                )));
            }
        }
        Ok(Self { section })
    }

    /// Evaluate all groups and install the correction tables.
    ///
    /// Even group indices carry TDC corrections (ns), odd ones ADC
    /// corrections (counts); `groupindex / 2` is the global ASIC number in
    /// hybrid order.
    pub fn apply(&self, hybrids: &mut [Hybrid]) -> Result<()> {
        for group in &self.section.parameters {
            let asic_global = group.groupindex / 2;
            let hybrid = asic_global / 2;
            let asic = asic_global % 2;
            if hybrid >= hybrids.len() {
                return Err(Error::Calibration(format!(
                    "group {} addresses hybrid {hybrid}, only {} configured",
                    group.groupindex,
                    hybrids.len()
                )));
            }
            if group.polynomials.is_empty() {
                continue; // null calibration
            }
            let calib = &mut hybrids[hybrid].vmms[asic];
            if group.groupindex % 2 == 0 {
                let mut table = [0i64; CHANNELS];
                for (ch, v) in table.iter_mut().enumerate() {
                    *v = Self::evaluate(group, ch).round() as i64;
                }
                calib.set_tdc(table);
            } else {
                let mut table = [0i32; CHANNELS];
                for (ch, v) in table.iter_mut().enumerate() {
                    *v = Self::evaluate(group, ch).round() as i32;
                }
                calib.set_adc(table);
            }
        }
        Ok(())
    }

    fn evaluate(group: &CalibGroup, channel: usize) -> f64 {
        let x = channel as f64 / (CHANNELS - 1) as f64;
        let p = &group.polynomials[channel];
        let v = p[0] + p[1] * x + p[2] * x * x + p[3] * x * x * x;
        let [lo, hi] = group.intervals[channel];
        v.clamp(lo, hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn null_group(index: usize) -> String {
        let interval = "[-1000.0, 1000.0], ".repeat(63) + "[-1000.0, 1000.0]";
        let poly = "[0.0, 0.0, 0.0, 0.0], ".repeat(63) + "[0.0, 0.0, 0.0, 0.0]";
        format!(
            r#"{{ "groupindex": {index}, "intervals": [{interval}], "polynomials": [{poly}] }}"#
        )
    }

    fn file(groups: &[String]) -> String {
        format!(
            r#"{{ "Calibration": {{
                 "version": 1,
                 "instrument": "freia",
                 "groups": {},
                 "groupsize": 64,
                 "Parameters": [{}] }} }}"#,
            groups.len(),
            groups.join(",")
        )
    }

    #[test]
    fn null_calibration_loads() {
        let text = file(&[null_group(0), null_group(1)]);
        let calib = CalibFile::from_json("freia", &text).unwrap();
        let mut hybrids = vec![Hybrid::default()];
        calib.apply(&mut hybrids).unwrap();
        for ch in 0..CHANNELS as u8 {
            assert_eq!(hybrids[0].vmms[0].tdc_corr(ch), 0);
            assert_eq!(hybrids[0].vmms[0].adc_corr(ch, 123), 123);
        }
    }

    #[test]
    fn empty_parameter_arrays_are_null() {
        let g = r#"{ "groupindex": 0, "intervals": [], "polynomials": [] }"#.to_string();
        let text = file(&[g]);
        let calib = CalibFile::from_json("freia", &text).unwrap();
        let mut hybrids = vec![Hybrid::default()];
        calib.apply(&mut hybrids).unwrap();
        assert_eq!(hybrids[0].vmms[0].tdc_corr(0), 0);
    }

    #[test]
    fn constant_offset_applies() {
        let interval = "[-1000.0, 1000.0], ".repeat(63) + "[-1000.0, 1000.0]";
        let poly = "[5.0, 0.0, 0.0, 0.0], ".repeat(63) + "[5.0, 0.0, 0.0, 0.0]";
        let adc_group = format!(
            r#"{{ "groupindex": 1, "intervals": [{interval}], "polynomials": [{poly}] }}"#
        );
        let text = file(&[null_group(0), adc_group]);
        let calib = CalibFile::from_json("freia", &text).unwrap();
        let mut hybrids = vec![Hybrid::default()];
        calib.apply(&mut hybrids).unwrap();
        assert_eq!(hybrids[0].vmms[0].adc_corr(7, 100), 105);
        // TDC table untouched by the ADC group.
        assert_eq!(hybrids[0].vmms[0].tdc_corr(7), 0);
        // Other ASIC untouched.
        assert_eq!(hybrids[0].vmms[1].adc_corr(7, 100), 100);
    }

    #[test]
    fn clamped_to_interval() {
        let interval = "[0.0, 2.0], ".repeat(63) + "[0.0, 2.0]";
        let poly = "[50.0, 0.0, 0.0, 0.0], ".repeat(63) + "[50.0, 0.0, 0.0, 0.0]";
        let tdc_group = format!(
            r#"{{ "groupindex": 0, "intervals": [{interval}], "polynomials": [{poly}] }}"#
        );
        let text = file(&[tdc_group]);
        let calib = CalibFile::from_json("freia", &text).unwrap();
        let mut hybrids = vec![Hybrid::default()];
        calib.apply(&mut hybrids).unwrap();
        assert_eq!(hybrids[0].vmms[0].tdc_corr(0), 2);
    }

    #[test]
    fn not_json() {
        assert!(CalibFile::from_json("freia", "Failure is not an option.").is_err());
    }

    #[test]
    fn wrong_instrument() {
        let text = file(&[null_group(0)]);
        assert!(matches!(
            CalibFile::from_json("loki", &text),
            Err(Error::Calibration(_))
        ));
    }

    #[test]
    fn group_count_mismatch() {
        let mut text = file(&[null_group(0)]);
        text = text.replace(r#""groups": 1"#, r#""groups": 3"#);
        assert!(CalibFile::from_json("freia", &text).is_err());
    }

    #[test]
    fn interval_polynomial_mismatch() {
        let g = r#"{ "groupindex": 0, "intervals": [[0.0, 1.0]], "polynomials": [] }"#.to_string();
        let text = file(&[g]);
        assert!(CalibFile::from_json("freia", &text).is_err());
    }

    #[test]
    fn inverted_interval() {
        let interval = "[1.0, 0.0], ".repeat(63) + "[1.0, 0.0]";
        let poly = "[0.0, 0.0, 0.0, 0.0], ".repeat(63) + "[0.0, 0.0, 0.0, 0.0]";
        let g = format!(
            r#"{{ "groupindex": 0, "intervals": [{interval}], "polynomials": [{poly}] }}"#
        );
        assert!(CalibFile::from_json("freia", &file(&[g])).is_err());
    }

    #[test]
    fn group_beyond_configured_hybrids() {
        let text = file(&[null_group(4)]);
        let calib = CalibFile::from_json("freia", &text).unwrap();
        let mut hybrids = vec![Hybrid::default()];
        assert!(calib.apply(&mut hybrids).is_err());
    }
}
