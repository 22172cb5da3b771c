use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::LoaderError;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Accession(String);

impl Accession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Accession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Accession {
    type Err = LoaderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let is_valid = !normalized.is_empty()
            && !normalized
                .chars()
                .any(|ch| ch.is_whitespace() || ch == '+' || ch == ',');
        if !is_valid {
            return Err(LoaderError::InvalidAccession(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Kegg,
    Pfam,
}

impl SourceKind {
    pub fn classify(accession: &Accession) -> Result<Self, LoaderError> {
        match accession.as_str().chars().next() {
            Some('K') => Ok(SourceKind::Kegg),
            Some('P') => Ok(SourceKind::Pfam),
            _ => Err(LoaderError::UnrecognizedAccession(
                accession.as_str().to_string(),
            )),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            SourceKind::Kegg => "KEGG",
            SourceKind::Pfam => "PFAM",
        }
    }

    pub fn all() -> [SourceKind; 2] {
        [SourceKind::Kegg, SourceKind::Pfam]
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum EvidenceSource {
    #[serde(rename = "uproc")]
    #[value(name = "uproc")]
    UProC,
    #[serde(rename = "interpro")]
    #[value(name = "interpro")]
    InterPro,
}

impl EvidenceSource {
    pub fn type_name(&self) -> &'static str {
        match self {
            EvidenceSource::UProC => "UProC",
            EvidenceSource::InterPro => "InterPro",
        }
    }

    pub fn all() -> [EvidenceSource; 2] {
        [EvidenceSource::UProC, EvidenceSource::InterPro]
    }
}

impl fmt::Display for EvidenceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SampleId(i64);

impl SampleId {
    pub fn new(value: i64) -> Result<Self, LoaderError> {
        if value <= 0 {
            return Err(LoaderError::InvalidSampleId(value.to_string()));
        }
        Ok(Self(value))
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SampleId {
    type Err = LoaderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parsed = value
            .trim()
            .parse::<i64>()
            .map_err(|_| LoaderError::InvalidSampleId(value.to_string()))?;
        Self::new(parsed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnotationRecord {
    pub accession: Accession,
    pub name: String,
    pub definition: String,
    pub pathway: Option<String>,
    pub module: Option<String>,
    pub source_kind: SourceKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    pub sample_id: SampleId,
    pub annotation_id: i64,
    pub accession: Accession,
    pub read_count: u64,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_accession_trims() {
        let acc: Accession = " K01467 ".parse().unwrap();
        assert_eq!(acc.as_str(), "K01467");
    }

    #[test]
    fn parse_accession_rejects_separator() {
        let err = "K01467+K00154".parse::<Accession>().unwrap_err();
        assert_matches!(err, LoaderError::InvalidAccession(_));
    }

    #[test]
    fn parse_sample_id() {
        let id: SampleId = "3486".parse().unwrap();
        assert_eq!(id.get(), 3486);
        assert_matches!(
            "samples".parse::<SampleId>(),
            Err(LoaderError::InvalidSampleId(_))
        );
        assert_matches!("0".parse::<SampleId>(), Err(LoaderError::InvalidSampleId(_)));
    }
}
