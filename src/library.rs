//! Curated reference libraries: MGF spectra merged with CSV metadata.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::mgf::{self, MgfRecord};
use crate::semantic::fragment;
use crate::semantic::index::{
    top_positions, CompoundInfo, IndexError, LibraryEntry, MatchResult, SimilarityIndex,
};
use crate::semantic::vectorize::Embedding;
use crate::semantic::PeakVectorizer;
use crate::spectrum::{Peak, Spectrum};

static CAS_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+-\d+-\d+").expect("Failed to compile CAS regex"));

/// Library summary as listed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryInfo {
    pub id: String,
    pub name: String,
    pub n_spectra: usize,
    pub is_default: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("metadata csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("unknown library: {0}")]
    Unknown(String),

    #[error("no entry '{entry}' in library '{library}'")]
    UnknownEntry { library: String, entry: String },
}

/// Reference data of an entry beyond what search results carry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    /// Name as written in the MGF, adduct included
    pub mgf_name: String,
    pub cas: Option<String>,
    pub smiles: Option<String>,
    pub inchikey: Option<String>,
    pub pubchem: Option<String>,
    pub exact_mass: Option<f64>,
    pub tox_reliability: Option<String>,
    pub tox_endpoint: Option<String>,
    /// Seconds
    pub retention_time: Option<f64>,
    pub ion_mode: Option<String>,
    pub instrument: Option<String>,
    pub activation: Option<String>,
    pub spectrum_quality: Option<String>,
    pub peak_count: usize,
}

/// A library entry as listed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySummary {
    #[serde(flatten)]
    pub compound: CompoundInfo,
    #[serde(flatten)]
    pub metadata: EntryMetadata,
}

/// One entry with its reference spectrum and embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryDetail {
    #[serde(flatten)]
    pub summary: EntrySummary,
    pub precursor_mz: f64,
    pub peaks: Vec<Peak>,
    pub embedding: Embedding,
}

/// Per-compound metadata rows keyed by lower-cased compound name.
#[derive(Debug, Clone, Default)]
pub struct MetadataTable {
    rows: HashMap<String, HashMap<String, String>>,
}

impl MetadataTable {
    /// Read a semicolon-delimited metadata file with a `Name` column.
    pub fn load(path: &Path) -> Result<Self, LibraryError> {
        let raw = std::fs::read(path).map_err(|source| LibraryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &[u8]) -> Result<Self, LibraryError> {
        let raw = raw.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(raw);
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .flexible(true)
            .from_reader(raw);

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut rows = HashMap::new();
        for record in reader.records() {
            let record = record?;
            let row: HashMap<String, String> = headers
                .iter()
                .cloned()
                .zip(record.iter().map(|v| v.trim().to_string()))
                .collect();

            let name = row.get("Name").map(|n| n.to_lowercase()).unwrap_or_default();
            if !name.is_empty() {
                rows.insert(name, row);
            }
        }

        Ok(Self { rows })
    }

    pub fn get(&self, name: &str) -> Option<&HashMap<String, String>> {
        self.rows.get(&name.to_lowercase())
    }

    /// Non-empty value of `column` for compound `name`.
    fn value(&self, name: &str, column: &str) -> Option<String> {
        present(self.get(name)?.get(column).map(String::as_str))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

fn present(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty() && *v != "N/A")
        .map(str::to_string)
}

/// A loaded curated library. Reference spectra stay next to their
/// embeddings so both scoring strategies run on the same candidates.
#[derive(Debug, Clone)]
pub struct Library {
    pub id: String,
    index: SimilarityIndex,
    spectra: Vec<Spectrum>,
    metadata: Vec<EntryMetadata>,
}

impl Library {
    /// Load a library from an MGF file and an optional metadata CSV.
    pub fn load(
        id: &str,
        mgf_path: &Path,
        metadata_path: Option<&Path>,
        vectorizer: &PeakVectorizer,
    ) -> Result<Self, LibraryError> {
        let records = mgf::read_mgf(mgf_path).map_err(|source| LibraryError::Io {
            path: mgf_path.to_path_buf(),
            source,
        })?;

        let metadata = match metadata_path {
            Some(path) => MetadataTable::load(path)?,
            None => MetadataTable::default(),
        };

        let library = Self::from_records(id, records, &metadata, vectorizer)?;
        log::info!(
            "Loaded library '{}' with {} spectra from {} ({} metadata rows)",
            id,
            library.len(),
            mgf_path.display(),
            metadata.len()
        );
        if library.is_empty() {
            log::warn!("library '{id}' holds no spectra");
        }
        Ok(library)
    }

    pub fn from_records(
        id: &str,
        records: Vec<MgfRecord>,
        metadata: &MetadataTable,
        vectorizer: &PeakVectorizer,
    ) -> Result<Self, LibraryError> {
        let mut index = SimilarityIndex::new(vectorizer.dim());
        let mut spectra = Vec::with_capacity(records.len());
        let mut entry_metadata = Vec::with_capacity(records.len());

        for (ordinal, record) in records.into_iter().enumerate() {
            let (compound, details) = describe_entry(id, ordinal, &record, metadata);
            let spectrum = record.to_spectrum();
            index.push(LibraryEntry {
                compound,
                embedding: vectorizer.vectorize(&spectrum.peaks),
            })?;
            spectra.push(spectrum);
            entry_metadata.push(details);
        }

        Ok(Self {
            id: id.to_string(),
            index,
            spectra,
            metadata: entry_metadata,
        })
    }

    pub fn index(&self) -> &SimilarityIndex {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Every entry in load order.
    pub fn entries(&self) -> Vec<EntrySummary> {
        (0..self.len()).filter_map(|i| self.summary(i)).collect()
    }

    /// Look up an entry by id, with its spectrum and embedding.
    pub fn entry(&self, entry_id: &str) -> Result<EntryDetail, LibraryError> {
        let unknown = || LibraryError::UnknownEntry {
            library: self.id.clone(),
            entry: entry_id.to_string(),
        };

        let position = (0..self.len())
            .find(|&i| {
                self.index
                    .get(i)
                    .is_some_and(|entry| entry.compound.id == entry_id)
            })
            .ok_or_else(unknown)?;
        let summary = self.summary(position).ok_or_else(unknown)?;
        let (entry, spectrum) = self
            .index
            .get(position)
            .zip(self.spectra.get(position))
            .ok_or_else(unknown)?;

        Ok(EntryDetail {
            summary,
            precursor_mz: spectrum.precursor_mz,
            peaks: spectrum.peaks.clone(),
            embedding: entry.embedding.clone(),
        })
    }

    fn summary(&self, position: usize) -> Option<EntrySummary> {
        Some(EntrySummary {
            compound: self.index.get(position)?.compound.clone(),
            metadata: self.metadata.get(position)?.clone(),
        })
    }

    /// Rank the library by fragment overlap with `query`.
    pub fn fragment_rank(&self, query: &Spectrum, tolerance: f64, top_n: usize) -> Vec<MatchResult> {
        let scores: Vec<fragment::FragmentScore> = self
            .spectra
            .iter()
            .map(|reference| fragment::score(query, reference, tolerance))
            .collect();

        top_positions(scores.iter().map(|s| s.similarity).collect(), top_n)
            .into_iter()
            .filter_map(|(position, similarity)| {
                let entry = self.index.get(position)?;
                Some(MatchResult::new(
                    &entry.compound,
                    similarity,
                    Some(scores[position].matched_peaks),
                ))
            })
            .collect()
    }
}

fn describe_entry(
    library_id: &str,
    ordinal: usize,
    record: &MgfRecord,
    metadata: &MetadataTable,
) -> (CompoundInfo, EntryMetadata) {
    let raw_name = record
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("Unknown_{ordinal}"));
    let name = mgf::strip_adduct(&raw_name);
    let from_csv = |column: &str| metadata.value(&name, column);
    let from_mgf = |key: &str| present(record.get(key));

    let compound = CompoundInfo {
        id: record
            .get("SPECTRUMID")
            .map(str::to_string)
            .unwrap_or_else(|| ordinal.to_string()),
        name: name.clone(),
        formula: from_csv("Molecular Formula").or_else(|| from_mgf("FORMULA")),
        source: library_id.to_string(),
        tox_score: from_csv("EFSA Tox Score").and_then(|v| v.replace(',', ".").parse().ok()),
    };

    let details = EntryMetadata {
        cas: from_csv("CAS_RN").or_else(|| cas_from_notes(record)),
        smiles: from_mgf("SMILES").or_else(|| from_csv("SMILES")),
        inchikey: from_mgf("INCHIKEY").or_else(|| from_csv("StdInChIKey")),
        pubchem: from_csv("PubChem"),
        exact_mass: from_mgf("EXACTMASS").and_then(|v| v.parse().ok()),
        tox_reliability: from_csv("Reliability of Tox Score"),
        tox_endpoint: from_csv("Endpoint for basis of scoring"),
        retention_time: from_mgf("RTINSECONDS").and_then(|v| v.parse().ok()),
        ion_mode: from_mgf("IONMODE"),
        instrument: from_mgf("SOURCE_INSTRUMENT").or_else(|| from_mgf("INSTRUMENT")),
        activation: from_mgf("ACTIVATION"),
        spectrum_quality: from_mgf("LIBRARYQUALITY"),
        peak_count: record.peaks.len(),
        mgf_name: raw_name,
    };

    (compound, details)
}

/// Third `:`-separated token of `NOTES` when it looks like a CAS number.
fn cas_from_notes(record: &MgfRecord) -> Option<String> {
    let candidate = record.get("NOTES")?.split(':').nth(2)?.trim();
    CAS_REGEX
        .is_match(candidate)
        .then(|| candidate.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MGF: &str = "\
BEGIN IONS
NAME=Carbofuran [M+H]+
FORMULA=C12H15NO3
107.05 100
145.06 80
181.09 40
END IONS
BEGIN IONS
NAME=Atrazine [M+H]+
SPECTRUMID=CCMSLIB42
NOTES=GNPS:atrazine:1912-24-9:standard
SMILES=CCNc1nc(Cl)nc(NC(C)C)n1
EXACTMASS=215.0938
RTINSECONDS=312.5
IONMODE=Positive
INSTRUMENT=Orbitrap
500.0 100
700.0 50
END IONS
";

    const CSV: &str = "\u{feff}Name;Molecular Formula;EFSA Tox Score;CAS_RN;Reliability of Tox Score;Endpoint for basis of scoring \n\
        Carbofuran;C12H15NO3-csv;3,5;1563-66-2;reliable;ADI\n\
        Atrazine;;N/A;N/A;;\n";

    fn library() -> Library {
        let records = mgf::parse_mgf(MGF);
        let metadata = MetadataTable::parse(CSV.as_bytes()).unwrap();
        Library::from_records("ecrfs", records, &metadata, &PeakVectorizer::default()).unwrap()
    }

    #[test]
    fn test_metadata_table() {
        let table = MetadataTable::parse(CSV.as_bytes()).unwrap();
        assert_eq!(table.len(), 2);

        let row = table.get("CARBOFURAN").unwrap();
        assert_eq!(row.get("Molecular Formula").unwrap(), "C12H15NO3-csv");
    }

    #[test]
    fn test_merge_metadata() {
        let library = library();
        assert_eq!(library.len(), 2);

        let carbofuran = &library.index().get(0).unwrap().compound;
        assert_eq!(carbofuran.id, "0");
        assert_eq!(carbofuran.name, "Carbofuran");
        assert_eq!(carbofuran.formula.as_deref(), Some("C12H15NO3-csv"));
        assert_eq!(carbofuran.tox_score, Some(3.5));
        assert_eq!(carbofuran.source, "ecrfs");

        let atrazine = &library.index().get(1).unwrap().compound;
        assert_eq!(atrazine.id, "CCMSLIB42");
        assert_eq!(atrazine.formula, None);
        assert_eq!(atrazine.tox_score, None);
    }

    #[test]
    fn test_entry_metadata() {
        let entries = library().entries();
        assert_eq!(entries.len(), 2);

        let carbofuran = &entries[0].metadata;
        assert_eq!(carbofuran.mgf_name, "Carbofuran [M+H]+");
        assert_eq!(carbofuran.cas.as_deref(), Some("1563-66-2"));
        assert_eq!(carbofuran.tox_reliability.as_deref(), Some("reliable"));
        // header carries a trailing space in the source sheet
        assert_eq!(carbofuran.tox_endpoint.as_deref(), Some("ADI"));
        assert_eq!(carbofuran.peak_count, 3);
        assert_eq!(carbofuran.retention_time, None);

        // CAS falls back to the MGF notes when the sheet has none
        let atrazine = &entries[1];
        assert_eq!(atrazine.compound.id, "CCMSLIB42");
        assert_eq!(atrazine.metadata.cas.as_deref(), Some("1912-24-9"));
        assert_eq!(atrazine.metadata.smiles.as_deref(), Some("CCNc1nc(Cl)nc(NC(C)C)n1"));
        assert_eq!(atrazine.metadata.exact_mass, Some(215.0938));
        assert_eq!(atrazine.metadata.retention_time, Some(312.5));
        assert_eq!(atrazine.metadata.ion_mode.as_deref(), Some("Positive"));
        assert_eq!(atrazine.metadata.instrument.as_deref(), Some("Orbitrap"));
        assert_eq!(atrazine.metadata.tox_reliability, None);

        let json = serde_json::to_value(atrazine).unwrap();
        assert_eq!(json["id"], "CCMSLIB42");
        assert_eq!(json["name"], "Atrazine");
        assert_eq!(json["cas"], "1912-24-9");
        assert_eq!(json["peakCount"], 2);
        assert_eq!(json["mgfName"], "Atrazine [M+H]+");
    }

    #[test]
    fn test_cas_needs_number_shape() {
        let records = mgf::parse_mgf(
            "BEGIN IONS\nNAME=Odd\nNOTES=GNPS:odd:unknown\n100.0 1\nEND IONS\n",
        );
        let library = Library::from_records(
            "x",
            records,
            &MetadataTable::default(),
            &PeakVectorizer::default(),
        )
        .unwrap();
        assert_eq!(library.entries()[0].metadata.cas, None);
    }

    #[test]
    fn test_entry_lookup() {
        let library = library();

        let detail = library.entry("CCMSLIB42").unwrap();
        assert_eq!(detail.summary.compound.name, "Atrazine");
        assert_eq!(detail.peaks, vec![Peak::new(500.0, 100.0), Peak::new(700.0, 50.0)]);
        assert_eq!(detail.embedding.dim(), 300);
        assert_eq!(detail.embedding, library.index().get(1).unwrap().embedding);

        // entries without SPECTRUMID are addressed by position
        assert_eq!(library.entry("0").unwrap().summary.compound.name, "Carbofuran");

        let missing = library.entry("nope");
        assert!(matches!(
            missing,
            Err(LibraryError::UnknownEntry { ref library, ref entry })
                if library == "ecrfs" && entry == "nope"
        ));
    }

    #[test]
    fn test_fragment_rank() {
        let library = library();
        let query = mgf::parse_mgf(MGF)[0].to_spectrum();

        let results = library.fragment_rank(&query, 0.02, 5);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].name, "Carbofuran");
        assert_eq!(results[0].n_matched_peaks, Some(3));
        assert!((results[0].similarity - 1.0).abs() < 1e-6);
        assert_eq!(results[1].similarity, 0.0);
        assert_eq!(results[1].n_matched_peaks, Some(0));
    }

    #[test]
    fn test_load_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let mgf_path = dir.path().join("lib.mgf");
        let csv_path = dir.path().join("meta.csv");
        std::fs::write(&mgf_path, MGF).unwrap();
        std::fs::write(&csv_path, CSV).unwrap();

        let library = Library::load(
            "ecrfs",
            &mgf_path,
            Some(&csv_path),
            &PeakVectorizer::default(),
        )
        .unwrap();
        assert_eq!(library.len(), 2);
        assert_eq!(library.index().get(0).unwrap().compound.tox_score, Some(3.5));
    }

    #[test]
    fn test_missing_mgf() {
        let result = Library::load(
            "x",
            Path::new("/nonexistent/library.mgf"),
            None,
            &PeakVectorizer::default(),
        );
        assert!(matches!(result, Err(LibraryError::Io { .. })));
    }
}
