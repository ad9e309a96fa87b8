use epiblock::dataset::GenotypeDataset;
use epiblock::ingest::pack_tables;
use epiblock::shared::files::{read_variant_ids, variant_ids_path, write_variant_ids};
use epiblock::types::MISSING_GENOTYPE;
use std::fmt::Write as FmtWrite;
use std::fs;
use tempfile::TempDir;

const NUM_VARIANTS: usize = 3;
const NUM_SAMPLES: usize = 20;
const CYCLE: [&str; 3] = ["0/0", "0/1", "1/1"];

/// Samples alternate unaffected/affected starting with an unaffected one. Sample `i`
/// carries `CYCLE[(i + v) % 3]` at variant `v`, except variant 1 of sample 4.
fn write_fixture(dir: &TempDir) -> (std::path::PathBuf, std::path::PathBuf) {
    let mut genotypes = String::from("variant");
    for s in 0..NUM_SAMPLES {
        write!(genotypes, "\tS{s}").unwrap();
    }
    genotypes.push('\n');
    for v in 0..NUM_VARIANTS {
        write!(genotypes, "rs{}", 100 + v).unwrap();
        for s in 0..NUM_SAMPLES {
            let call = if v == 1 && s == 4 { "./." } else { CYCLE[(s + v) % 3] };
            write!(genotypes, "\t{call}").unwrap();
        }
        genotypes.push('\n');
    }

    let mut phenotypes = String::new();
    for s in 0..NUM_SAMPLES {
        writeln!(phenotypes, "S{s}\t{}", s % 2).unwrap();
    }

    let genotype_path = dir.path().join("genotypes.tsv");
    let phenotype_path = dir.path().join("phenotypes.tsv");
    fs::write(&genotype_path, genotypes).unwrap();
    fs::write(&phenotype_path, phenotypes).unwrap();
    (genotype_path, phenotype_path)
}

fn packed_column(sample: usize, num_affected: usize) -> usize {
    if sample % 2 == 1 {
        (sample + 1) / 2 - 1
    } else {
        num_affected + (sample + 1) / 2
    }
}

#[test]
fn packed_fixture_has_expected_bytes() {
    let dir = TempDir::new().unwrap();
    let (genotypes, phenotypes) = write_fixture(&dir);
    let packed = pack_tables(&genotypes, &phenotypes, 2).unwrap();
    let dataset = &packed.dataset;

    assert_eq!(dataset.num_variants(), 3);
    assert_eq!(dataset.num_affected(), 10);
    assert_eq!(dataset.num_unaffected(), 10);
    assert_eq!(packed.variant_ids, vec!["rs100", "rs101", "rs102"]);

    // Spot checks at known positions.
    assert_eq!(dataset.variant(0)[0], 1); // sample 1
    assert_eq!(dataset.variant(0)[10], 0); // sample 0
    assert_eq!(dataset.variant(1)[1], 1); // sample 3
    assert_eq!(dataset.variant(1)[12], MISSING_GENOTYPE); // sample 4
    assert_eq!(dataset.variant(2)[9], 0); // sample 19
    assert_eq!(dataset.variant(2)[19], 2); // sample 18

    for v in 0..NUM_VARIANTS {
        let row = dataset.variant(v);
        for s in 0..NUM_SAMPLES {
            let expected = if v == 1 && s == 4 {
                MISSING_GENOTYPE
            } else {
                ((s + v) % 3) as u8
            };
            assert_eq!(row[packed_column(s, 10)], expected, "variant {v}, sample {s}");
        }
    }
    let missing = dataset
        .matrix()
        .iter()
        .filter(|&&b| b == MISSING_GENOTYPE)
        .count();
    assert_eq!(missing, 1);
}

#[test]
fn saved_fixture_maps_back_identically() {
    let dir = TempDir::new().unwrap();
    let (genotypes, phenotypes) = write_fixture(&dir);
    let packed = pack_tables(&genotypes, &phenotypes, 1).unwrap();

    let out = dir.path().join("fixture.epi");
    packed.dataset.save(&out).unwrap();
    write_variant_ids(&variant_ids_path(&out), &packed.variant_ids).unwrap();

    assert_eq!(
        fs::metadata(&out).unwrap().len(),
        (16 + NUM_VARIANTS * NUM_SAMPLES) as u64
    );
    let loaded = GenotypeDataset::load(&out).unwrap();
    assert_eq!(loaded.num_variants(), NUM_VARIANTS);
    assert_eq!(loaded.num_affected(), 10);
    assert_eq!(loaded.matrix(), packed.dataset.matrix());
    assert_eq!(
        read_variant_ids(&variant_ids_path(&out)).unwrap(),
        packed.variant_ids
    );
}
