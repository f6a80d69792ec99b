//! Mascot Generic Format reader for reference libraries.
//!
//! Only what the libraries we ship actually use is understood:
//! `BEGIN IONS` / `END IONS` blocks, `KEY=VALUE` headers and
//! whitespace-separated `mz intensity` peak lines.

use std::collections::HashMap;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::spectrum::{Peak, Spectrum};

/// `[M+H]+`, `[M-H]-`, `[M+Na]+` ... at the end of a compound name.
static BRACKET_ADDUCT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s*\[M[+\-][^\]]+\][+\-]?\s*$").expect("Failed to compile adduct regex")
});

/// ` M+H`, ` M-H2O+H`, ` M+2H` ... at the end of a GNPS systematic name.
static BARE_ADDUCT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s+(M(?:[+-][A-Za-z0-9]+)+)\s*$").expect("Failed to compile GNPS adduct regex")
});

/// One `BEGIN IONS` block.
#[derive(Debug, Clone, Default)]
pub struct MgfRecord {
    /// Header fields, keys upper-cased.
    pub metadata: HashMap<String, String>,
    pub peaks: Vec<Peak>,
}

impl MgfRecord {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(&key.to_uppercase())
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn name(&self) -> Option<&str> {
        self.get("NAME")
    }

    /// First token of `PEPMASS`, 0 when absent.
    pub fn precursor_mz(&self) -> f64 {
        self.get("PEPMASS")
            .and_then(|value| value.split_whitespace().next())
            .and_then(|value| value.parse().ok())
            .unwrap_or(0.0)
    }

    pub fn retention_time(&self) -> f64 {
        self.get("RTINSECONDS")
            .and_then(|value| value.parse().ok())
            .unwrap_or(0.0)
    }

    pub fn to_spectrum(&self) -> Spectrum {
        Spectrum::new(self.peaks.clone(), self.precursor_mz(), self.retention_time())
    }
}

/// Read an MGF file. Invalid UTF-8 is replaced rather than rejected.
pub fn read_mgf(path: &Path) -> std::io::Result<Vec<MgfRecord>> {
    let raw = std::fs::read(path)?;
    Ok(parse_mgf(&String::from_utf8_lossy(&raw)))
}

/// Parse MGF content. Blocks without a `NAME` or without a closing
/// `END IONS` are skipped.
pub fn parse_mgf(content: &str) -> Vec<MgfRecord> {
    let mut records = Vec::new();

    for block in content.split("BEGIN IONS").skip(1) {
        let Some(end) = block.find("END IONS") else {
            continue;
        };

        let mut record = MgfRecord::default();
        for line in block[..end].lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(peak) = parse_peak_line(line) {
                record.peaks.push(peak);
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                record
                    .metadata
                    .insert(key.trim().to_uppercase(), value.trim().to_string());
            }
        }

        if record.name().is_some() {
            records.push(record);
        }
    }

    records
}

fn parse_peak_line(line: &str) -> Option<Peak> {
    let mut parts = line.split_whitespace();
    let (mz, intensity) = (parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    Some(Peak::new(mz.parse().ok()?, intensity.parse().ok()?))
}

/// Remove ion notation like `[M+H]+` from the end of a compound name.
pub fn strip_adduct(name: &str) -> String {
    BRACKET_ADDUCT_REGEX.replace(name, "").trim().to_string()
}

/// A GNPS `NAME` of the form `common_formula_systematic adduct`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GnpsName {
    pub common: String,
    pub formula: String,
    pub systematic: String,
}

/// Split a GNPS collection name. `None` when the name does not have three
/// underscore-separated parts.
pub fn split_gnps_name(raw: &str) -> Option<GnpsName> {
    let mut parts = raw.trim().splitn(3, '_');
    let (common, formula, rest) = (parts.next()?, parts.next()?, parts.next()?);

    Some(GnpsName {
        common: common.trim().to_string(),
        formula: formula.trim().to_string(),
        systematic: BARE_ADDUCT_REGEX.replace(rest, "").trim().to_string(),
    })
}
