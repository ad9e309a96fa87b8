// ========================================================================================
//
//                              The packed genotype dataset
//
// ========================================================================================
//
// ### Purpose ###
//
// A dense, variant-major byte matrix with one column per sample. Columns are grouped
// affected-first so that the class of a sample is a single comparison against
// `num_affected` inside the scoring loop. The matrix is either memory-mapped from a
// packed file or owned after an in-memory build; in both cases it is read-only and
// shared by every worker.

use crate::types::{MISSING_GENOTYPE, Phenotype};
use log::debug;
use memmap2::Mmap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// `[u64 variant_count][u32 num_affected][u32 num_unaffected]`, little-endian.
pub const HEADER_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to memory-map {path}: {source}")]
    Map {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path} is too short to hold the dataset header ({actual} of {} bytes)", HEADER_LEN)]
    MissingHeader { path: PathBuf, actual: u64 },
    #[error("unexpected end of genotype matrix in {path} (expected {expected} bytes, found {actual})")]
    Truncated {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
    #[error("variant {variant} has {actual} genotype calls but {expected} samples were labelled")]
    ShapeMismatch {
        variant: usize,
        expected: usize,
        actual: usize,
    },
    #[error("matrix of {len} bytes is not a whole number of {num_samples}-sample rows")]
    RaggedMatrix { len: usize, num_samples: usize },
    #[error("dataset dimensions do not fit the packed header: {0}")]
    TooLarge(&'static str),
}

enum MatrixStorage {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

/// Immutable genotype matrix with affected samples in the leading columns.
pub struct GenotypeDataset {
    storage: MatrixStorage,
    num_variants: usize,
    num_affected: usize,
    num_unaffected: usize,
}

impl std::fmt::Debug for GenotypeDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenotypeDataset")
            .field("num_variants", &self.num_variants)
            .field("num_affected", &self.num_affected)
            .field("num_unaffected", &self.num_unaffected)
            .field(
                "mapped",
                &matches!(self.storage, MatrixStorage::Mapped(_)),
            )
            .finish()
    }
}

impl GenotypeDataset {
    /// Memory-maps a packed dataset file.
    ///
    /// Only the header is parsed; matrix bytes are exposed as-is. Bytes past the
    /// end of the declared matrix are ignored.
    pub fn load(path: &Path) -> Result<Self, DatasetError> {
        let file = File::open(path).map_err(|source| DatasetError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let file_len = file
            .metadata()
            .map_err(|source| DatasetError::Open {
                path: path.to_path_buf(),
                source,
            })?
            .len();
        if file_len < HEADER_LEN as u64 {
            return Err(DatasetError::MissingHeader {
                path: path.to_path_buf(),
                actual: file_len,
            });
        }

        // The file is opened read-only and the map is never written through.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|source| DatasetError::Map {
            path: path.to_path_buf(),
            source,
        })?;
        #[cfg(unix)]
        mmap.advise(memmap2::Advice::WillNeed)
            .map_err(|source| DatasetError::Map {
                path: path.to_path_buf(),
                source,
            })?;

        let header = parse_header(&mmap[..HEADER_LEN]);
        let num_samples = header.num_affected + header.num_unaffected;
        let matrix_len = header
            .variant_count
            .checked_mul(num_samples)
            .ok_or(DatasetError::TooLarge("variant_count * num_samples overflows"))?;
        let expected = matrix_len
            .checked_add(HEADER_LEN as u64)
            .ok_or(DatasetError::TooLarge("matrix length plus header overflows"))?;
        if file_len < expected {
            return Err(DatasetError::Truncated {
                path: path.to_path_buf(),
                expected,
                actual: file_len,
            });
        }

        let to_usize = |value: u64| {
            usize::try_from(value).map_err(|_| DatasetError::TooLarge("exceeds address space"))
        };
        // `matrix()` slices up to `expected`, so it has to be addressable.
        to_usize(expected)?;
        let dataset = Self {
            storage: MatrixStorage::Mapped(mmap),
            num_variants: to_usize(header.variant_count)?,
            num_affected: to_usize(header.num_affected)?,
            num_unaffected: to_usize(header.num_unaffected)?,
        };
        debug!(
            "Mapped {} ({} variants, {} affected, {} unaffected)",
            path.display(),
            dataset.num_variants,
            dataset.num_affected,
            dataset.num_unaffected
        );
        Ok(dataset)
    }

    /// Packs parsed variant records into the affected-first layout.
    ///
    /// Each record holds one genotype call per sample, in the same sample order as
    /// `phenotypes`. Calls are encoded with [`encode_genotype`].
    pub fn build<I, R, S>(records: I, phenotypes: &[Phenotype]) -> Result<Self, DatasetError>
    where
        I: IntoIterator<Item = R>,
        R: AsRef<[S]>,
        S: AsRef<str>,
    {
        let (columns, num_affected) = destination_columns(phenotypes);
        let num_samples = phenotypes.len();
        let mut matrix = Vec::new();
        let mut row = vec![MISSING_GENOTYPE; num_samples];

        for (variant, record) in records.into_iter().enumerate() {
            encode_row(variant, record.as_ref().iter(), &columns, &mut row)?;
            matrix.extend_from_slice(&row);
        }

        Self::from_matrix(matrix, num_affected, num_samples - num_affected)
    }

    /// Wraps an already packed, affected-first matrix.
    pub fn from_matrix(
        matrix: Vec<u8>,
        num_affected: usize,
        num_unaffected: usize,
    ) -> Result<Self, DatasetError> {
        let num_samples = num_affected + num_unaffected;
        let num_variants = match num_samples {
            0 if matrix.is_empty() => 0,
            0 => {
                return Err(DatasetError::RaggedMatrix {
                    len: matrix.len(),
                    num_samples,
                });
            }
            n if matrix.len() % n != 0 => {
                return Err(DatasetError::RaggedMatrix {
                    len: matrix.len(),
                    num_samples,
                });
            }
            n => matrix.len() / n,
        };
        Ok(Self {
            storage: MatrixStorage::Owned(matrix),
            num_variants,
            num_affected,
            num_unaffected,
        })
    }

    /// Writes the packed file format understood by [`GenotypeDataset::load`].
    pub fn save(&self, path: &Path) -> Result<(), DatasetError> {
        let write_err = |source| DatasetError::Write {
            path: path.to_path_buf(),
            source,
        };
        let num_affected = u32::try_from(self.num_affected)
            .map_err(|_| DatasetError::TooLarge("more than u32::MAX affected samples"))?;
        let num_unaffected = u32::try_from(self.num_unaffected)
            .map_err(|_| DatasetError::TooLarge("more than u32::MAX unaffected samples"))?;

        let file = File::create(path).map_err(write_err)?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(&(self.num_variants as u64).to_le_bytes())
            .map_err(write_err)?;
        writer
            .write_all(&num_affected.to_le_bytes())
            .map_err(write_err)?;
        writer
            .write_all(&num_unaffected.to_le_bytes())
            .map_err(write_err)?;
        writer.write_all(self.matrix()).map_err(write_err)?;
        writer.flush().map_err(write_err)
    }

    /// The full variant-major matrix.
    #[inline]
    pub fn matrix(&self) -> &[u8] {
        let len = self.num_variants * self.num_samples();
        match &self.storage {
            MatrixStorage::Mapped(mmap) => &mmap[HEADER_LEN..HEADER_LEN + len],
            MatrixStorage::Owned(matrix) => &matrix[..len],
        }
    }

    /// The genotype row of one variant, one byte per packed sample column.
    #[inline]
    pub fn variant(&self, variant: usize) -> &[u8] {
        let n = self.num_samples();
        &self.matrix()[variant * n..(variant + 1) * n]
    }

    #[inline]
    pub fn num_variants(&self) -> usize {
        self.num_variants
    }

    #[inline]
    pub fn num_affected(&self) -> usize {
        self.num_affected
    }

    #[inline]
    pub fn num_unaffected(&self) -> usize {
        self.num_unaffected
    }

    #[inline]
    pub fn num_samples(&self) -> usize {
        self.num_affected + self.num_unaffected
    }
}

struct Header {
    variant_count: u64,
    num_affected: u64,
    num_unaffected: u64,
}

fn parse_header(bytes: &[u8]) -> Header {
    let mut variant_count = [0u8; 8];
    let mut affected = [0u8; 4];
    let mut unaffected = [0u8; 4];
    variant_count.copy_from_slice(&bytes[0..8]);
    affected.copy_from_slice(&bytes[8..12]);
    unaffected.copy_from_slice(&bytes[12..16]);
    Header {
        variant_count: u64::from_le_bytes(variant_count),
        num_affected: u64::from(u32::from_le_bytes(affected)),
        num_unaffected: u64::from(u32::from_le_bytes(unaffected)),
    }
}

/// Stable partition of the original sample order.
///
/// Returns the packed column of every original sample and the number of affected
/// samples. Affected samples fill `[0, num_affected)` and unaffected samples fill
/// the rest, each group keeping its original relative order.
pub fn destination_columns(phenotypes: &[Phenotype]) -> (Vec<usize>, usize) {
    let num_affected = phenotypes.iter().filter(|p| p.is_affected()).count();
    let mut next_affected = 0;
    let mut next_unaffected = num_affected;
    let columns = phenotypes
        .iter()
        .map(|phenotype| {
            let slot = if phenotype.is_affected() {
                &mut next_affected
            } else {
                &mut next_unaffected
            };
            let column = *slot;
            *slot += 1;
            column
        })
        .collect();
    (columns, num_affected)
}

/// Encodes one record's calls into `row` at their packed columns.
pub(crate) fn encode_row<I, S>(
    variant: usize,
    calls: I,
    columns: &[usize],
    row: &mut [u8],
) -> Result<(), DatasetError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = 0;
    for call in calls {
        if let Some(&column) = columns.get(seen) {
            row[column] = encode_genotype(call.as_ref());
        }
        seen += 1;
    }
    if seen != columns.len() {
        return Err(DatasetError::ShapeMismatch {
            variant,
            expected: columns.len(),
            actual: seen,
        });
    }
    Ok(())
}

/// Maps a diploid genotype call to its alternate-allele count.
///
/// `0/0`, `0/1` and `1/1` (or `|`-phased forms) become 0, 1 and 2; any allele index
/// other than 0 counts as alternate. Trailing `:`-separated fields are ignored.
/// A `.` allele, a non-diploid call or anything unparseable becomes the
/// [`MISSING_GENOTYPE`] byte.
pub fn encode_genotype(call: &str) -> u8 {
    let gt = call.split(':').next().unwrap_or_default().trim();
    let mut alleles = gt.split(['/', '|']);
    match (alleles.next(), alleles.next(), alleles.next()) {
        (Some(first), Some(second), None) => match (allele_dose(first), allele_dose(second)) {
            (Some(a), Some(b)) => a + b,
            _ => MISSING_GENOTYPE,
        },
        _ => MISSING_GENOTYPE,
    }
}

fn allele_dose(allele: &str) -> Option<u8> {
    let index: u32 = allele.parse().ok()?;
    Some(u8::from(index != 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn alternating_phenotypes(n: usize) -> Vec<Phenotype> {
        (0..n)
            .map(|i| {
                if i % 2 == 1 {
                    Phenotype::Affected
                } else {
                    Phenotype::Unaffected
                }
            })
            .collect()
    }

    #[test]
    fn destination_columns_is_a_stable_partition() {
        let phenotypes = alternating_phenotypes(20);
        let (columns, num_affected) = destination_columns(&phenotypes);
        assert_eq!(num_affected, 10);
        for (i, &column) in columns.iter().enumerate() {
            let expected = if i % 2 == 1 {
                (i + 1) / 2 - 1
            } else {
                num_affected + (i + 1) / 2
            };
            assert_eq!(column, expected, "sample {i}");
        }
    }

    #[test]
    fn encode_genotype_counts_alternate_alleles() {
        assert_eq!(encode_genotype("0/0"), 0);
        assert_eq!(encode_genotype("0|1"), 1);
        assert_eq!(encode_genotype("1/0"), 1);
        assert_eq!(encode_genotype("1/1"), 2);
        assert_eq!(encode_genotype("1/2"), 2);
        assert_eq!(encode_genotype("0/1:35:99"), 1);
        assert_eq!(encode_genotype("./."), MISSING_GENOTYPE);
        assert_eq!(encode_genotype("0/."), MISSING_GENOTYPE);
        assert_eq!(encode_genotype("1"), MISSING_GENOTYPE);
        assert_eq!(encode_genotype("0/1/1"), MISSING_GENOTYPE);
        assert_eq!(encode_genotype("A/T"), MISSING_GENOTYPE);
        assert_eq!(encode_genotype(""), MISSING_GENOTYPE);
    }

    #[test]
    fn build_rejects_records_with_wrong_sample_count() {
        let phenotypes = vec![Phenotype::Affected, Phenotype::Unaffected];
        let records = vec![vec!["0/0", "0/1"], vec!["1/1"]];
        let err = GenotypeDataset::build(records, &phenotypes).unwrap_err();
        assert!(matches!(
            err,
            DatasetError::ShapeMismatch {
                variant: 1,
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn save_then_load_reproduces_matrix() {
        let phenotypes = alternating_phenotypes(6);
        let records = vec![
            vec!["0/0", "0/1", "1/1", "./.", "0/1", "0/0"],
            vec!["1/1", "1/1", "0/0", "0/1", "0/0", "1|0"],
        ];
        let built = GenotypeDataset::build(records, &phenotypes).unwrap();
        let file = NamedTempFile::new().unwrap();
        built.save(file.path()).unwrap();

        let loaded = GenotypeDataset::load(file.path()).unwrap();
        assert_eq!(loaded.num_variants(), 2);
        assert_eq!(loaded.num_affected(), 3);
        assert_eq!(loaded.num_unaffected(), 3);
        assert_eq!(loaded.matrix(), built.matrix());
        assert_eq!(loaded.variant(1), &[2, 1, 1, 2, 0, 0]);
    }

    #[test]
    fn load_rejects_truncated_matrix() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&4u64.to_le_bytes()).unwrap();
        file.write_all(&2u32.to_le_bytes()).unwrap();
        file.write_all(&3u32.to_le_bytes()).unwrap();
        file.write_all(&[0u8; 19]).unwrap();
        file.flush().unwrap();

        match GenotypeDataset::load(file.path()) {
            Err(DatasetError::Truncated {
                expected, actual, ..
            }) => {
                assert_eq!(expected, 36);
                assert_eq!(actual, 35);
            }
            other => panic!("expected truncation error, got {other:?}"),
        }
    }

    #[test]
    fn load_rejects_header_whose_matrix_length_overflows() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&u64::MAX.to_le_bytes()).unwrap();
        file.write_all(&1u32.to_le_bytes()).unwrap();
        file.write_all(&0u32.to_le_bytes()).unwrap();
        file.write_all(&[0u8; 8]).unwrap();
        file.flush().unwrap();
        assert!(matches!(
            GenotypeDataset::load(file.path()),
            Err(DatasetError::TooLarge(_))
        ));
    }

    #[test]
    fn load_rejects_short_header() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[1, 2, 3]).unwrap();
        file.flush().unwrap();
        assert!(matches!(
            GenotypeDataset::load(file.path()),
            Err(DatasetError::MissingHeader { actual: 3, .. })
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.bin");
        assert!(matches!(
            GenotypeDataset::load(&path),
            Err(DatasetError::Open { .. })
        ));
    }

    #[test]
    fn from_matrix_rejects_ragged_rows() {
        assert!(matches!(
            GenotypeDataset::from_matrix(vec![0; 7], 2, 1),
            Err(DatasetError::RaggedMatrix { len: 7, num_samples: 3 })
        ));
    }
}
