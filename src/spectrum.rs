//! Fragmentation spectra as produced by the peak-detection stage.
//!
//! The engine only reads these types. They are built by the caller (HTTP
//! request, CLI flag, MGF file) and never mutated afterwards.

use serde::{Deserialize, Serialize};

/// A single fragment peak.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    pub mz: f64,
    pub intensity: f64,
}

impl Peak {
    pub fn new(mz: f64, intensity: f64) -> Self {
        Self { mz, intensity }
    }

    /// A peak is usable when both values are finite, `mz > 0` and
    /// `intensity >= 0`.
    pub fn is_valid(&self) -> bool {
        self.mz.is_finite() && self.intensity.is_finite() && self.mz > 0.0 && self.intensity >= 0.0
    }
}

/// An MS2 spectrum with its precursor information.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spectrum {
    pub peaks: Vec<Peak>,
    #[serde(default)]
    pub precursor_mz: f64,
    #[serde(default)]
    pub retention_time: f64,
}

impl Spectrum {
    pub fn new(peaks: Vec<Peak>, precursor_mz: f64, retention_time: f64) -> Self {
        Self {
            peaks,
            precursor_mz,
            retention_time,
        }
    }

    pub fn from_peaks(peaks: Vec<Peak>) -> Self {
        Self {
            peaks,
            ..Default::default()
        }
    }
}

/// One chromatographic peak of a run, carrying the MS2 spectrum extracted
/// for it. A batch search walks these in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedPeak {
    pub id: String,
    pub spectrum: Spectrum,
}

/// Returns the peaks unchanged if every one of them is valid.
///
/// A single invalid peak marks the whole list as malformed, the caller
/// then answers with no results instead of searching a partial spectrum.
pub fn sanitize_peaks(peaks: Vec<Peak>) -> Option<Vec<Peak>> {
    if peaks.iter().all(Peak::is_valid) {
        Some(peaks)
    } else {
        None
    }
}

/// Parse a `mz:intensity,mz:intensity` list as typed on the command line.
pub fn parse_peak_list(input: &str) -> anyhow::Result<Vec<Peak>> {
    input
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (mz, intensity) = part
                .split_once(':')
                .ok_or_else(|| anyhow::anyhow!("peak '{part}' is not in mz:intensity form"))?;
            let peak = Peak::new(mz.trim().parse()?, intensity.trim().parse()?);
            if !peak.is_valid() {
                anyhow::bail!("peak '{part}' is out of range");
            }
            Ok(peak)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_validity() {
        assert!(Peak::new(107.05, 100.0).is_valid());
        assert!(Peak::new(107.05, 0.0).is_valid());
        assert!(!Peak::new(0.0, 10.0).is_valid());
        assert!(!Peak::new(-5.0, 10.0).is_valid());
        assert!(!Peak::new(100.0, -1.0).is_valid());
        assert!(!Peak::new(f64::NAN, 1.0).is_valid());
        assert!(!Peak::new(100.0, f64::INFINITY).is_valid());
    }

    #[test]
    fn test_sanitize_rejects_whole_list() {
        let good = vec![Peak::new(100.0, 1.0), Peak::new(200.0, 2.0)];
        assert_eq!(sanitize_peaks(good.clone()), Some(good));

        let bad = vec![Peak::new(100.0, 1.0), Peak::new(-1.0, 2.0)];
        assert_eq!(sanitize_peaks(bad), None);
    }

    #[test]
    fn test_parse_peak_list() {
        let peaks = parse_peak_list("107.05:100, 145.06:80,181.09:40").unwrap();
        assert_eq!(peaks.len(), 3);
        assert_eq!(peaks[1], Peak::new(145.06, 80.0));

        assert!(parse_peak_list("107.05").is_err());
        assert!(parse_peak_list("abc:1").is_err());
        assert!(parse_peak_list("-1:1").is_err());
        assert!(parse_peak_list("").unwrap().is_empty());
    }

    #[test]
    fn test_spectrum_deserializes_without_precursor() {
        let spectrum: Spectrum =
            serde_json::from_str(r#"{"peaks":[{"mz":100.0,"intensity":5.0}]}"#).unwrap();
        assert_eq!(spectrum.peaks.len(), 1);
        assert_eq!(spectrum.precursor_mz, 0.0);
    }
}
