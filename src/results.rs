use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;

use camino::Utf8Path;

use crate::domain::{Accession, SourceKind};
use crate::error::LoaderError;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResultTable {
    counts: BTreeMap<Accession, u64>,
}

impl ResultTable {
    pub fn new() -> Self {
        Self::default()
    }

    // Saturates at u64::MAX, which the store rejects as a failed row.
    pub fn add(&mut self, accession: Accession, count: u64) {
        let total = self.counts.entry(accession).or_insert(0);
        *total = total.saturating_add(count);
    }

    pub fn get(&self, accession: &Accession) -> Option<u64> {
        self.counts.get(accession).copied()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Accession, u64)> {
        self.counts.iter().map(|(accession, count)| (accession, *count))
    }

    pub fn accessions_of_kind(&self, kind: SourceKind) -> impl Iterator<Item = &Accession> {
        self.counts
            .keys()
            .filter(move |accession| SourceKind::classify(accession).ok() == Some(kind))
    }

    pub fn from_reader<R: Read>(reader: R, source_name: &str) -> Result<Self, LoaderError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut table = ResultTable::new();
        for result in csv_reader.records() {
            let record = result.map_err(|err| {
                let line = err.position().map(|pos| pos.line()).unwrap_or(0);
                LoaderError::malformed(source_name, line, err.to_string())
            })?;
            let line = record.position().map(|pos| pos.line()).unwrap_or(0);
            if record.len() == 1 && record[0].is_empty() {
                continue;
            }
            if record.len() != 2 {
                return Err(LoaderError::malformed(
                    source_name,
                    line,
                    format!("expected 2 fields, found {}", record.len()),
                ));
            }
            let accession = record[0]
                .parse::<Accession>()
                .map_err(|err| LoaderError::malformed(source_name, line, err.to_string()))?;
            let count = record[1]
                .parse::<i64>()
                .ok()
                .and_then(|count| u64::try_from(count).ok())
                .ok_or_else(|| {
                    LoaderError::malformed(
                        source_name,
                        line,
                        format!("read count {:?} is not a non-negative integer", &record[1]),
                    )
                })?;
            // Both sides are at most i64::MAX here, so the sum cannot wrap.
            if table.get(&accession).unwrap_or(0) + count > i64::MAX as u64 {
                return Err(LoaderError::malformed(
                    source_name,
                    line,
                    format!("read count total for {accession} overflows"),
                ));
            }
            table.add(accession, count);
        }
        Ok(table)
    }

    pub fn from_path(path: &Utf8Path) -> Result<Self, LoaderError> {
        let file = File::open(path.as_std_path())
            .map_err(|err| LoaderError::Filesystem(format!("open {path}: {err}")))?;
        Self::from_reader(file, path.as_str())
    }
}

impl FromIterator<(Accession, u64)> for ResultTable {
    fn from_iter<T: IntoIterator<Item = (Accession, u64)>>(iter: T) -> Self {
        let mut table = ResultTable::new();
        for (accession, count) in iter {
            table.add(accession, count);
        }
        table
    }
}

pub fn combine<'a, I>(tables: I) -> ResultTable
where
    I: IntoIterator<Item = &'a ResultTable>,
{
    let mut combined = ResultTable::new();
    for table in tables {
        for (accession, count) in table.iter() {
            combined.add(accession.clone(), count);
        }
    }
    combined
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_uproc_lines() {
        let table = ResultTable::from_reader("K01467,4208\nK01990, 660\n\n".as_bytes(), "test").unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&"K01990".parse().unwrap()), Some(660));
    }

    #[test]
    fn empty_input_is_empty_table() {
        let table = ResultTable::from_reader("".as_bytes(), "empty").unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn bad_count_is_malformed() {
        let err = ResultTable::from_reader("K01467,4208\nK01990,lots\n".as_bytes(), "bad").unwrap_err();
        assert_matches!(err, LoaderError::MalformedRecord { line: 2, .. });
    }

    #[test]
    fn count_beyond_store_range_is_malformed() {
        let err = ResultTable::from_reader("K1,9223372036854775808\n".as_bytes(), "big").unwrap_err();
        assert_matches!(err, LoaderError::MalformedRecord { line: 1, .. });

        let repeated = "K1,9223372036854775807\nK1,1\n";
        let err = ResultTable::from_reader(repeated.as_bytes(), "big").unwrap_err();
        assert_matches!(err, LoaderError::MalformedRecord { line: 2, .. });
    }

    #[test]
    fn extra_column_is_malformed() {
        let err = ResultTable::from_reader("K01467,4208,1\n".as_bytes(), "bad").unwrap_err();
        assert_matches!(err, LoaderError::MalformedRecord { line: 1, .. });
    }
}
