// ========================================================================================
//
//                               Tab-separated result reports
//
// ========================================================================================

use crate::mdr::{ContingencyTable, genotype_pattern};
use crate::types::{Combination, ScoredCombination};
use itertools::Itertools;
use std::borrow::Cow;
use std::io::{self, Write};

fn variant_label<'a>(variant: usize, ids: Option<&'a [String]>) -> Cow<'a, str> {
    match ids.and_then(|ids| ids.get(variant)) {
        Some(id) => Cow::Borrowed(id.as_str()),
        None => Cow::Owned(variant.to_string()),
    }
}

/// Comma-joined variant ids, or indices for variants without an id.
pub fn combination_label(combination: &Combination, ids: Option<&[String]>) -> String {
    combination
        .as_slice()
        .iter()
        .map(|&v| variant_label(v, ids))
        .join(",")
}

/// Writes `rank, variants, test_accuracy, train_accuracy`, one row per entry, in the
/// order given.
pub fn write_ranked<W: Write>(
    mut out: W,
    ranked: &[ScoredCombination],
    ids: Option<&[String]>,
) -> io::Result<()> {
    let mut buffer = ryu::Buffer::new();
    writeln!(out, "rank\tvariants\ttest_accuracy\ttrain_accuracy")?;
    for (rank, entry) in ranked.iter().enumerate() {
        write!(
            out,
            "{}\t{}\t",
            rank + 1,
            combination_label(&entry.variants, ids)
        )?;
        out.write_all(buffer.format(entry.test_accuracy).as_bytes())?;
        out.write_all(b"\t")?;
        out.write_all(buffer.format(entry.train_accuracy).as_bytes())?;
        out.write_all(b"\n")?;
    }
    out.flush()
}

/// Writes the non-empty cells of a contingency table with their risk labels.
pub fn write_contingency<W: Write>(
    mut out: W,
    combination: &Combination,
    table: &ContingencyTable,
    ids: Option<&[String]>,
) -> io::Result<()> {
    let high_risk = table.high_risk_cells();
    writeln!(out, "# variants: {}", combination_label(combination, ids))?;
    writeln!(
        out,
        "# samples: {} affected, {} unaffected, {} excluded for missing calls",
        table.samples_affected(),
        table.samples_unaffected(),
        table.excluded()
    )?;
    writeln!(out, "genotypes\taffected\tunaffected\trisk")?;
    for (cell, counts) in table.cells().iter().enumerate() {
        if counts.affected == 0 && counts.unaffected == 0 {
            continue;
        }
        let risk = if high_risk.binary_search(&cell).is_ok() {
            "high"
        } else {
            "low"
        };
        writeln!(
            out,
            "{}\t{}\t{}\t{}",
            genotype_pattern(cell, table.order()).iter().join(","),
            counts.affected,
            counts.unaffected,
            risk
        )?;
    }
    out.flush()
}
