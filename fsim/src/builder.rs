//! Streams `.smi` input lines into a database writer.
//!
//! Input lines look like `<smiles> <external_id> [ignored fields...]`.
//! A line that cannot yield the two leading tokens aborts the whole build;
//! a SMILES the fingerprinter rejects only drops that record. Lines come in
//! as a fallible stream so million-line inputs never sit in memory whole.

use std::io;

use log::warn;

use crate::data::{FingerprintRecord, Fingerprinter};
use crate::database::DatabaseWriter;
use crate::error::Error;

#[derive(Debug, Default, PartialEq, Clone)]
pub struct BuildReport {
    pub written: u64,
    pub dropped: u64,
}

pub fn build_from_lines<I, F>(
    lines: I,
    fingerprinter: &F,
    trust: bool,
    writer: &mut DatabaseWriter,
) -> Result<BuildReport, Error>
where
    I: IntoIterator<Item = io::Result<String>>,
    F: Fingerprinter,
{
    let mut report = BuildReport::default();
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut tokens = line.split_whitespace();
        let (smiles, id) = match (tokens.next(), tokens.next()) {
            (Some(smiles), Some(id)) => (smiles, id),
            _ => return Err(Error::MalformedInputLine(line.clone())),
        };

        match fingerprinter.fingerprint(smiles, trust) {
            Ok((fingerprint, canonical_smiles)) => {
                writer.add_record(&FingerprintRecord {
                    fingerprint,
                    smiles: canonical_smiles,
                    id: id.to_string(),
                })?;
                report.written += 1;
            }
            Err(Error::InvalidStructure(_)) => {
                warn!("dropping {}: could not fingerprint {:?}", id, smiles);
                report.dropped += 1;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{HashedFingerprinter, DEFAULT_BITCOUNT};
    use crate::database::FingerprintDatabase;

    fn lines(raw: &[&str]) -> Vec<io::Result<String>> {
        raw.iter().map(|s| Ok(s.to_string())).collect()
    }

    #[test]
    fn invalid_structures_are_dropped_not_fatal() {
        let fingerprinter = HashedFingerprinter::new(DEFAULT_BITCOUNT).unwrap();
        let mut writer = DatabaseWriter::new(DEFAULT_BITCOUNT as u32);

        let report = build_from_lines(
            lines(&["CCO mol1", "invalid!!! mol2"]),
            &fingerprinter,
            false,
            &mut writer,
        )
        .unwrap();

        assert_eq!(report, BuildReport { written: 1, dropped: 1 });
        assert_eq!(writer.entry_count(), 1);

        let path = std::env::temp_dir()
            .join(format!("fsim_builder_test_{}", std::process::id()));
        writer.write_to(&path).unwrap();
        let db = FingerprintDatabase::open(&path).unwrap();
        let records: Vec<_> = db.iter().collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "mol1");
        assert_eq!(records[0].smiles, "CCO");
        let (expected_fp, _) = fingerprinter.fingerprint("CCO", false).unwrap();
        assert_eq!(records[0].fingerprint, expected_fp);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn malformed_line_fails_the_build() {
        let fingerprinter = HashedFingerprinter::new(DEFAULT_BITCOUNT).unwrap();
        let mut writer = DatabaseWriter::new(DEFAULT_BITCOUNT as u32);

        let res = build_from_lines(
            lines(&["CCO mol1", "just_one_token"]),
            &fingerprinter,
            false,
            &mut writer,
        );
        assert!(matches!(res, Err(Error::MalformedInputLine(ref line)) if line == "just_one_token"));
    }

    #[test]
    fn extra_fields_are_ignored() {
        let fingerprinter = HashedFingerprinter::new(DEFAULT_BITCOUNT).unwrap();
        let mut writer = DatabaseWriter::new(DEFAULT_BITCOUNT as u32);

        let report = build_from_lines(
            lines(&["CCO mol1 3.14 extra junk"]),
            &fingerprinter,
            false,
            &mut writer,
        )
        .unwrap();
        assert_eq!(report.written, 1);
    }

    #[test]
    fn trust_mode_admits_unsanitized_input() {
        let fingerprinter = HashedFingerprinter::new(DEFAULT_BITCOUNT).unwrap();

        let mut strict = DatabaseWriter::new(DEFAULT_BITCOUNT as u32);
        let report =
            build_from_lines(lines(&["C(C mol1"]), &fingerprinter, false, &mut strict).unwrap();
        assert_eq!(report, BuildReport { written: 0, dropped: 1 });

        let mut trusting = DatabaseWriter::new(DEFAULT_BITCOUNT as u32);
        let report =
            build_from_lines(lines(&["C(C mol1"]), &fingerprinter, true, &mut trusting).unwrap();
        assert_eq!(report, BuildReport { written: 1, dropped: 0 });
    }

    #[test]
    fn blank_lines_are_skipped() {
        let fingerprinter = HashedFingerprinter::new(DEFAULT_BITCOUNT).unwrap();
        let mut writer = DatabaseWriter::new(DEFAULT_BITCOUNT as u32);

        let report = build_from_lines(
            lines(&["", "CCO mol1", "   ", "CCN mol2"]),
            &fingerprinter,
            false,
            &mut writer,
        )
        .unwrap();
        assert_eq!(report, BuildReport { written: 2, dropped: 0 });
    }

    #[test]
    fn read_error_aborts_the_build() {
        let fingerprinter = HashedFingerprinter::new(DEFAULT_BITCOUNT).unwrap();
        let mut writer = DatabaseWriter::new(DEFAULT_BITCOUNT as u32);

        let input: Vec<io::Result<String>> = vec![
            Ok("CCO mol1".to_string()),
            Err(io::Error::new(io::ErrorKind::Other, "disk gone")),
        ];
        let res = build_from_lines(input, &fingerprinter, false, &mut writer);
        assert!(matches!(res, Err(Error::Io(_))));
    }

    #[test]
    fn fatal_line_stops_consuming_input() {
        let fingerprinter = HashedFingerprinter::new(DEFAULT_BITCOUNT).unwrap();
        let mut writer = DatabaseWriter::new(DEFAULT_BITCOUNT as u32);

        let mut input = lines(&["CCO mol1", "just_one_token", "CCN mol2"]).into_iter();
        let res = build_from_lines(input.by_ref(), &fingerprinter, false, &mut writer);
        assert!(matches!(res, Err(Error::MalformedInputLine(_))));
        // the stream stops at the bad line instead of being drained up front
        assert_eq!(input.next().unwrap().unwrap(), "CCN mol2");
    }

    #[test]
    fn identical_input_builds_identical_bytes() {
        let fingerprinter = HashedFingerprinter::new(DEFAULT_BITCOUNT).unwrap();
        let input = &["CCO mol1", "CCN mol2", "c1ccccc1 mol3"];

        let mut outputs: Vec<Vec<u8>> = Vec::new();
        for tag in ["a", "b"] {
            let mut writer = DatabaseWriter::new(DEFAULT_BITCOUNT as u32);
            build_from_lines(lines(input), &fingerprinter, false, &mut writer).unwrap();
            let path = std::env::temp_dir()
                .join(format!("fsim_builder_identical_{}_{}", std::process::id(), tag));
            writer.write_to(&path).unwrap();
            outputs.push(std::fs::read(&path).unwrap());
            std::fs::remove_file(path).unwrap();
        }
        assert_eq!(outputs[0], outputs[1]);
    }
}
