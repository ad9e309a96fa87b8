// ========================================================================================
//
//                           Readers for the tab-separated inputs
//
// ========================================================================================
//
// ### Purpose ###
//
// The search core only needs `(variant, sample) -> call` and `sample -> phenotype`. These
// readers supply both from two plain tables: a genotype table with one row per variant
// and a sample header, and a two-column phenotype table keyed by sample id. Variant ids
// of a packed dataset are kept next to it in a one-id-per-line sidecar.

use crate::types::Phenotype;
use csv::{ReaderBuilder, StringRecord, Trim};
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("failed to read {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path} has no sample columns in its header")]
    NoSamples { path: PathBuf },
    #[error("{path}, line {line}: expected 'sample<TAB>label', found {found} column(s)")]
    PhenotypeColumns { path: PathBuf, line: u64, found: usize },
    #[error("{path}, line {line}: unrecognised phenotype label '{label}'")]
    PhenotypeLabel {
        path: PathBuf,
        line: u64,
        label: String,
    },
    #[error("sample '{sample}' is listed more than once in {path}")]
    DuplicateSample { path: PathBuf, sample: String },
    #[error("sample '{sample}' of {path} has no phenotype")]
    MissingPhenotype { path: PathBuf, sample: String },
}

/// Streams rows of a genotype table.
///
/// The header is `variant<TAB>sample...`; every following row is
/// `id<TAB>call...` with one call per sample.
pub struct GenotypeTableReader {
    path: PathBuf,
    reader: csv::Reader<File>,
    sample_ids: Vec<String>,
}

impl GenotypeTableReader {
    pub fn open(path: &Path) -> Result<Self, TableError> {
        let csv_err = |source| TableError::Csv {
            path: path.to_path_buf(),
            source,
        };
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .trim(Trim::All)
            .from_path(path)
            .map_err(csv_err)?;
        let sample_ids: Vec<String> = reader
            .headers()
            .map_err(csv_err)?
            .iter()
            .skip(1)
            .map(str::to_string)
            .collect();
        if sample_ids.is_empty() {
            return Err(TableError::NoSamples {
                path: path.to_path_buf(),
            });
        }
        let mut seen = HashSet::with_capacity(sample_ids.len());
        if let Some(repeated) = sample_ids.iter().find(|id| !seen.insert(id.as_str())) {
            return Err(TableError::DuplicateSample {
                path: path.to_path_buf(),
                sample: repeated.clone(),
            });
        }
        debug!("{} lists {} samples", path.display(), sample_ids.len());
        Ok(Self {
            path: path.to_path_buf(),
            reader,
            sample_ids,
        })
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Reads the next row into `record`; field 0 is the variant id. Returns `false` at
    /// the end of the table. Rows whose width differs from the header are an error.
    pub fn read_record(&mut self, record: &mut StringRecord) -> Result<bool, TableError> {
        self.reader
            .read_record(record)
            .map_err(|source| TableError::Csv {
                path: self.path.clone(),
                source,
            })
    }
}

/// One parsed genotype row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenotypeRecord {
    pub id: String,
    pub calls: Vec<String>,
}

/// Reads a whole genotype table into memory.
pub fn read_genotype_table(
    path: &Path,
) -> Result<(Vec<String>, Vec<GenotypeRecord>), TableError> {
    let mut reader = GenotypeTableReader::open(path)?;
    let mut record = StringRecord::new();
    let mut rows = Vec::new();
    while reader.read_record(&mut record)? {
        rows.push(GenotypeRecord {
            id: record.get(0).unwrap_or_default().to_string(),
            calls: record.iter().skip(1).map(str::to_string).collect(),
        });
    }
    Ok((reader.sample_ids, rows))
}

/// Reads `sample<TAB>label` rows. Lines starting with `#` are ignored.
pub fn read_phenotypes(path: &Path) -> Result<HashMap<String, Phenotype>, TableError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .comment(Some(b'#'))
        .flexible(true)
        .trim(Trim::All)
        .from_path(path)
        .map_err(|source| TableError::Csv {
            path: path.to_path_buf(),
            source,
        })?;

    let mut labels = HashMap::new();
    for result in reader.records() {
        let record = result.map_err(|source| TableError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        let line = record.position().map_or(0, |p| p.line());
        if record.len() != 2 {
            return Err(TableError::PhenotypeColumns {
                path: path.to_path_buf(),
                line,
                found: record.len(),
            });
        }
        let sample = &record[0];
        let phenotype =
            Phenotype::from_label(&record[1]).ok_or_else(|| TableError::PhenotypeLabel {
                path: path.to_path_buf(),
                line,
                label: record[1].to_string(),
            })?;
        if labels.insert(sample.to_string(), phenotype).is_some() {
            return Err(TableError::DuplicateSample {
                path: path.to_path_buf(),
                sample: sample.to_string(),
            });
        }
    }
    Ok(labels)
}

/// Orders phenotypes like the genotype table's sample columns.
///
/// Every genotype sample must have a label. Labelled samples that never appear in the
/// genotype table are reported and otherwise ignored.
pub fn align_phenotypes(
    sample_ids: &[String],
    labels: &HashMap<String, Phenotype>,
    genotype_path: &Path,
) -> Result<Vec<Phenotype>, TableError> {
    let aligned = sample_ids
        .iter()
        .map(|sample| {
            labels
                .get(sample)
                .copied()
                .ok_or_else(|| TableError::MissingPhenotype {
                    path: genotype_path.to_path_buf(),
                    sample: sample.clone(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let unused = labels.len().saturating_sub(sample_ids.len());
    if unused > 0 {
        warn!("{unused} labelled sample(s) have no genotype column and were ignored");
    }
    Ok(aligned)
}

/// Sidecar with the variant ids of a packed dataset, in row order.
pub fn variant_ids_path(dataset: &Path) -> PathBuf {
    let mut name = dataset.as_os_str().to_owned();
    name.push(".variants");
    PathBuf::from(name)
}

pub fn write_variant_ids(path: &Path, ids: &[String]) -> Result<(), TableError> {
    let io_err = |source| TableError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = BufWriter::new(File::create(path).map_err(io_err)?);
    for id in ids {
        writeln!(writer, "{id}").map_err(io_err)?;
    }
    writer.flush().map_err(io_err)
}

pub fn read_variant_ids(path: &Path) -> Result<Vec<String>, TableError> {
    let io_err = |source| TableError::Io {
        path: path.to_path_buf(),
        source,
    };
    let reader = BufReader::new(File::open(path).map_err(io_err)?);
    reader
        .lines()
        .map(|line| line.map_err(io_err))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn table(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn genotype_table_yields_samples_and_rows() {
        let file = table("variant\ts1\ts2\ts3\nrs1\t0/0\t0/1\t1/1\nrs2\t./.\t1|1\t0/0\n");
        let (samples, rows) = read_genotype_table(file.path()).unwrap();
        assert_eq!(samples, vec!["s1", "s2", "s3"]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].id, "rs2");
        assert_eq!(rows[1].calls, vec!["./.", "1|1", "0/0"]);
    }

    #[test]
    fn genotype_table_rejects_ragged_rows() {
        let file = table("variant\ts1\ts2\nrs1\t0/0\n");
        let err = read_genotype_table(file.path()).unwrap_err();
        assert!(matches!(err, TableError::Csv { .. }));
    }

    #[test]
    fn genotype_table_rejects_repeated_sample_ids() {
        let file = table("variant\ts1\ts2\ts1\nrs1\t0/0\t0/1\t1/1\n");
        assert!(matches!(
            GenotypeTableReader::open(file.path()),
            Err(TableError::DuplicateSample { sample, .. }) if sample == "s1"
        ));
    }

    #[test]
    fn genotype_table_needs_sample_columns() {
        let file = table("variant\nrs1\n");
        assert!(matches!(
            GenotypeTableReader::open(file.path()),
            Err(TableError::NoSamples { .. })
        ));
    }

    #[test]
    fn phenotypes_skip_comments_and_align_by_id() {
        let file = table("# sample\tstatus\nb\tcontrol\na\t1\nc\tcase\n");
        let labels = read_phenotypes(file.path()).unwrap();
        let ids: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let aligned = align_phenotypes(&ids, &labels, Path::new("g.tsv")).unwrap();
        assert_eq!(
            aligned,
            vec![Phenotype::Affected, Phenotype::Unaffected, Phenotype::Affected]
        );

        let missing = vec!["a".to_string(), "zz".to_string()];
        assert!(matches!(
            align_phenotypes(&missing, &labels, Path::new("g.tsv")),
            Err(TableError::MissingPhenotype { sample, .. }) if sample == "zz"
        ));
    }

    #[test]
    fn phenotypes_report_bad_lines() {
        let bad_label = table("a\t1\nb\tmaybe\n");
        assert!(matches!(
            read_phenotypes(bad_label.path()),
            Err(TableError::PhenotypeLabel { line: 2, .. })
        ));
        let duplicate = table("a\t1\na\t0\n");
        assert!(matches!(
            read_phenotypes(duplicate.path()),
            Err(TableError::DuplicateSample { .. })
        ));
        let wide = table("a\t1\textra\n");
        assert!(matches!(
            read_phenotypes(wide.path()),
            Err(TableError::PhenotypeColumns { found: 3, .. })
        ));
    }

    #[test]
    fn variant_ids_round_trip_through_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = dir.path().join("cohort.bin");
        let sidecar = variant_ids_path(&dataset);
        assert!(sidecar.to_string_lossy().ends_with("cohort.bin.variants"));
        let ids = vec!["rs1".to_string(), "rs22".to_string()];
        write_variant_ids(&sidecar, &ids).unwrap();
        assert_eq!(read_variant_ids(&sidecar).unwrap(), ids);
    }
}
