// ========================================================================================
//
//                       Streaming ingestion of the genotype table
//
// ========================================================================================
//
// ### Purpose ###
//
// Packs a genotype table into a `GenotypeDataset` without holding the text of the whole
// table in memory. A reader thread parses rows and pushes them into a bounded queue,
// several encoder threads turn each row into packed genotype bytes, and the calling
// thread reassembles the encoded rows in their original order. Row buffers travel back
// to the encoders through a shared pool.

use crate::dataset::{DatasetError, GenotypeDataset, destination_columns, encode_row};
use crate::queue::{self, Consumer, Producer};
use crate::shared::files::{self, GenotypeTableReader, TableError};
use crate::types::MISSING_GENOTYPE;
use crossbeam_queue::ArrayQueue;
use csv::StringRecord;
use log::info;
use std::collections::BTreeMap;
use std::path::Path;
use std::thread;
use thiserror::Error;

/// Parsed rows buffered between the reader and the encoders.
const RAW_QUEUE_BOUND: usize = 256;
/// Encoded rows buffered between the encoders and the assembler.
const ENCODED_QUEUE_BOUND: usize = 256;
/// Number of reusable row buffers.
const ROW_POOL_SIZE: usize = 512;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error("an ingestion thread panicked")]
    ThreadPanicked,
}

/// A packed dataset together with the ids it was built from.
#[derive(Debug)]
pub struct PackedTables {
    pub dataset: GenotypeDataset,
    pub variant_ids: Vec<String>,
    pub sample_ids: Vec<String>,
}

struct RawRow {
    index: usize,
    record: StringRecord,
}

struct EncodedRow {
    index: usize,
    row: Vec<u8>,
}

/// Reads both tables and packs them with `threads` encoder threads.
///
/// # Arguments
/// * `genotypes`: The genotype table, `variant<TAB>sample...` header then one row per variant.
/// * `phenotypes`: The `sample<TAB>label` table; every genotype sample needs a label.
/// * `threads`: Number of encoder threads, at least one is used.
pub fn pack_tables(
    genotypes: &Path,
    phenotypes: &Path,
    threads: usize,
) -> Result<PackedTables, IngestError> {
    let labels = files::read_phenotypes(phenotypes)?;
    let reader = GenotypeTableReader::open(genotypes)?;
    let sample_ids = reader.sample_ids().to_vec();
    let sample_phenotypes = files::align_phenotypes(&sample_ids, &labels, genotypes)?;
    let (columns, num_affected) = destination_columns(&sample_phenotypes);
    let num_samples = columns.len();

    let pool = ArrayQueue::new(ROW_POOL_SIZE);
    let (raw_tx, raw_rx) = queue::bounded::<RawRow>(RAW_QUEUE_BOUND);
    let (row_tx, row_rx) = queue::bounded::<EncodedRow>(ENCODED_QUEUE_BOUND);

    let (variant_ids, matrix, assembled) = thread::scope(|s| {
        let reader_handle = s.spawn(move || read_rows(reader, raw_tx));

        let encoder_handles: Vec<_> = (0..threads.max(1))
            .map(|_| {
                let raw_rx = raw_rx.clone();
                let row_tx = row_tx.clone();
                let columns = &columns;
                let pool = &pool;
                s.spawn(move || encode_rows(raw_rx, row_tx, columns, pool))
            })
            .collect();
        // Only the threads hold queue handles from here on, so the queues close when they
        // finish.
        drop(raw_rx);
        drop(row_tx);

        let (matrix, assembled) = assemble(row_rx, num_samples, &pool);

        for handle in encoder_handles {
            handle.join().map_err(|_| IngestError::ThreadPanicked)??;
        }
        let variant_ids = reader_handle
            .join()
            .map_err(|_| IngestError::ThreadPanicked)??;
        Ok::<_, IngestError>((variant_ids, matrix, assembled))
    })?;
    debug_assert_eq!(assembled, variant_ids.len());

    let dataset = GenotypeDataset::from_matrix(matrix, num_affected, num_samples - num_affected)?;
    info!(
        "Packed {} variants across {} samples ({} affected, {} unaffected).",
        dataset.num_variants(),
        dataset.num_samples(),
        dataset.num_affected(),
        dataset.num_unaffected()
    );
    Ok(PackedTables {
        dataset,
        variant_ids,
        sample_ids,
    })
}

fn read_rows(
    mut reader: GenotypeTableReader,
    rows: Producer<RawRow>,
) -> Result<Vec<String>, TableError> {
    let mut ids = Vec::new();
    loop {
        let mut record = StringRecord::new();
        if !reader.read_record(&mut record)? {
            break;
        }
        let index = ids.len();
        ids.push(record.get(0).unwrap_or_default().to_string());
        if rows.push(RawRow { index, record }).is_err() {
            // Every encoder has stopped; their errors are reported by the caller.
            break;
        }
    }
    Ok(ids)
}

fn encode_rows(
    raw: Consumer<RawRow>,
    encoded: Producer<EncodedRow>,
    columns: &[usize],
    pool: &ArrayQueue<Vec<u8>>,
) -> Result<(), DatasetError> {
    while let Some(RawRow { index, record }) = raw.pop() {
        let mut row = pool.pop().unwrap_or_default();
        row.clear();
        row.resize(columns.len(), MISSING_GENOTYPE);
        encode_row(index, record.iter().skip(1), columns, &mut row)?;
        if encoded.push(EncodedRow { index, row }).is_err() {
            break;
        }
    }
    Ok(())
}

// Rows arrive in whatever order the encoders finish them; they are held back until every
// earlier row has been written.
fn assemble(
    rows: Consumer<EncodedRow>,
    num_samples: usize,
    pool: &ArrayQueue<Vec<u8>>,
) -> (Vec<u8>, usize) {
    let mut matrix = Vec::new();
    let mut pending = BTreeMap::new();
    let mut next = 0usize;
    for EncodedRow { index, row } in rows {
        pending.insert(index, row);
        while let Some(row) = pending.remove(&next) {
            debug_assert_eq!(row.len(), num_samples);
            matrix.extend_from_slice(&row);
            let _ = pool.push(row);
            next += 1;
        }
    }
    (matrix, next)
}
