use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Args as ClapArgs, Parser, Subcommand};

use crate::{
    mgf,
    spectrum::{parse_peak_list, Spectrum},
};

mod handlers;

pub use handlers::*;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

/// Where the query spectrum comes from.
#[derive(ClapArgs, Debug, Clone)]
pub struct SpectrumArgs {
    /// Peaks as `mz:intensity,mz:intensity`
    #[clap(short, long, conflicts_with = "mgf")]
    pub peaks: Option<String>,

    /// Read the spectrum from an MGF file
    #[clap(long)]
    pub mgf: Option<PathBuf>,

    /// Position of the spectrum in the MGF file
    #[clap(long, default_value = "0", requires = "mgf")]
    pub index: usize,
}

impl SpectrumArgs {
    pub fn load(&self) -> anyhow::Result<Spectrum> {
        if let Some(peaks) = &self.peaks {
            return Ok(Spectrum::from_peaks(parse_peak_list(peaks)?));
        }

        let Some(path) = &self.mgf else {
            bail!("either --peaks or --mgf is required");
        };
        let records = mgf::read_mgf(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let record = records.get(self.index).with_context(|| {
            format!(
                "{} holds {} spectra, no spectrum at index {}",
                path.display(),
                records.len(),
                self.index
            )
        })?;

        Ok(record.to_spectrum())
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the HTTP API.
    Daemon {},

    /// List reference libraries
    Libraries {},

    /// Search one spectrum
    Search {
        #[clap(flatten)]
        spectrum: SpectrumArgs,

        /// Search the broad index instead of a curated library
        #[clap(long, default_value = "false", conflicts_with_all = ["fragment", "compare"])]
        broad: bool,

        /// Library id, the default library when omitted
        #[clap(short, long)]
        library: Option<String>,

        /// Number of results
        #[clap(short = 'n', long)]
        top_n: Option<usize>,

        /// Rank by fragment overlap instead of embedding similarity
        #[clap(long, default_value = "false")]
        fragment: bool,

        /// Fragment matching tolerance in Da
        #[clap(long)]
        tolerance: Option<f64>,

        /// Compare embedding and fragment-overlap rankings
        #[clap(long, default_value = "false", conflicts_with = "fragment")]
        compare: bool,
    },

    /// Search every spectrum of an MGF file, one at a time
    Batch {
        /// Each spectrum in the file is one detected peak
        #[clap(long)]
        mgf: PathBuf,

        #[clap(long, default_value = "false")]
        broad: bool,

        #[clap(short, long)]
        library: Option<String>,

        #[clap(short = 'n', long)]
        top_n: Option<usize>,
    },

    /// Browse the entries of a curated library
    Entries {
        /// Library id
        library: String,

        /// Show one entry with its peaks and embedding
        #[clap(short, long)]
        entry: Option<String>,
    },

    /// Build the broad index and follow its progress
    BuildIndex {},

    /// Print the embedding of a spectrum
    Vectorize {
        #[clap(flatten)]
        spectrum: SpectrumArgs,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search() {
        let args = Args::try_parse_from([
            "spectral-search",
            "search",
            "--peaks",
            "107.05:100,145.06:80",
            "--compare",
            "-n",
            "3",
        ])
        .unwrap();

        match args.command {
            Command::Search {
                spectrum,
                compare,
                top_n,
                broad,
                ..
            } => {
                assert!(compare);
                assert!(!broad);
                assert_eq!(top_n, Some(3));
                assert_eq!(spectrum.load().unwrap().peaks.len(), 2);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_entries() {
        let args =
            Args::try_parse_from(["spectral-search", "entries", "ecrfs", "-e", "CCMSLIB1"])
                .unwrap();
        match args.command {
            Command::Entries { library, entry } => {
                assert_eq!(library, "ecrfs");
                assert_eq!(entry.as_deref(), Some("CCMSLIB1"));
            }
            other => panic!("unexpected command {other:?}"),
        }

        assert!(Args::try_parse_from(["spectral-search", "entries"]).is_err());
    }

    #[test]
    fn test_broad_conflicts_with_fragment() {
        let parsed = Args::try_parse_from([
            "spectral-search",
            "search",
            "--peaks",
            "100:1",
            "--broad",
            "--fragment",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_spectrum_from_mgf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.mgf");
        std::fs::write(
            &path,
            "BEGIN IONS\nNAME=a\nPEPMASS=200.1\n100 1\nEND IONS\nBEGIN IONS\nNAME=b\n150 2\n160 3\nEND IONS\n",
        )
        .unwrap();

        let args = SpectrumArgs {
            peaks: None,
            mgf: Some(path.clone()),
            index: 1,
        };
        assert_eq!(args.load().unwrap().peaks.len(), 2);

        let out_of_range = SpectrumArgs {
            peaks: None,
            mgf: Some(path),
            index: 5,
        };
        assert!(out_of_range.load().is_err());

        let nothing = SpectrumArgs {
            peaks: None,
            mgf: None,
            index: 0,
        };
        assert!(nothing.load().is_err());
    }
}
