use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read};
use std::time::{Duration, Instant};

use camino::Utf8Path;
use flate2::read::GzDecoder;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;

use crate::cache::AnnotationCache;
use crate::domain::{Accession, AnnotationRecord, SourceKind};
use crate::error::LoaderError;
use crate::store::AnnotationStore;

const PFAM_MIN_COLUMNS: usize = 9;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PfamEntry {
    pub accession: Accession,
    pub identifier: String,
    pub name: String,
    pub description: String,
}

impl PfamEntry {
    pub fn into_record(self) -> Result<AnnotationRecord, LoaderError> {
        let source_kind = SourceKind::classify(&self.accession)?;
        let definition = if self.description.is_empty() {
            self.name
        } else {
            self.description
        };
        Ok(AnnotationRecord {
            accession: self.accession,
            name: self.identifier,
            definition,
            pathway: None,
            module: None,
            source_kind,
        })
    }
}

pub fn parse_pfam_line(line: &str, line_no: u64) -> Result<PfamEntry, LoaderError> {
    let columns = line.trim_end_matches(['\r', '\n']).split('\t').collect::<Vec<_>>();
    if columns.len() < PFAM_MIN_COLUMNS {
        return Err(LoaderError::malformed(
            "pfamA",
            line_no,
            format!(
                "expected at least {PFAM_MIN_COLUMNS} tab-separated fields, found {}",
                columns.len()
            ),
        ));
    }
    let accession = columns[0]
        .parse::<Accession>()
        .map_err(|err| LoaderError::malformed("pfamA", line_no, err.to_string()))?;
    Ok(PfamEntry {
        accession,
        identifier: columns[1].trim().to_string(),
        name: columns[3].trim().to_string(),
        description: columns[8].trim().to_string(),
    })
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ReferenceImport {
    pub lines: u64,
    pub inserted: usize,
    pub existing: usize,
    pub rejected: usize,
    pub malformed: usize,
}

pub fn import_pfam_file<S: AnnotationStore + ?Sized>(
    store: &S,
    cache: &mut AnnotationCache,
    path: &Utf8Path,
    group_size: usize,
) -> Result<ReferenceImport, LoaderError> {
    let file = File::open(path.as_std_path())
        .map_err(|err| LoaderError::Filesystem(format!("open {path}: {err}")))?;
    import_pfam(store, cache, GzDecoder::new(file), group_size)
}

pub fn import_pfam<S: AnnotationStore + ?Sized, R: Read>(
    store: &S,
    cache: &mut AnnotationCache,
    reader: R,
    group_size: usize,
) -> Result<ReferenceImport, LoaderError> {
    let start = Instant::now();
    let group_size = group_size.max(1);
    let mut reader = BufReader::new(reader);
    let mut summary = ReferenceImport::default();
    let mut group = Vec::with_capacity(group_size);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .map_err(|err| LoaderError::Filesystem(err.to_string()))?;
        if read > 0 {
            summary.lines += 1;
            // The dump is latin-1, which maps byte for byte onto chars.
            let line = buf.iter().map(|&byte| byte as char).collect::<String>();
            if !line.trim().is_empty() {
                match parse_pfam_line(&line, summary.lines).and_then(PfamEntry::into_record) {
                    Ok(record) if cache.id_for(&record.accession).is_some() => summary.existing += 1,
                    Ok(record) => group.push(record),
                    Err(err) => {
                        tracing::warn!(%err, "skipping PFAM line");
                        summary.malformed += 1;
                    }
                }
            }
        }
        if group.len() >= group_size || (read == 0 && !group.is_empty()) {
            let group_start = Instant::now();
            let batch = store.insert_annotations(&group)?;
            summary.inserted += batch.inserted.len();
            summary.existing += batch.existing.len();
            summary.rejected += batch.rejected.len();
            for (accession, reason) in &batch.rejected {
                tracing::warn!(%accession, %reason, "PFAM annotation rejected by store");
            }
            for (accession, id) in batch.inserted.into_iter().chain(batch.existing) {
                cache.mark_known(accession, id);
            }
            tracing::info!(
                inserted = summary.inserted,
                elapsed_s = start.elapsed().as_secs_f64(),
                group_s = group_start.elapsed().as_secs_f64(),
                "committed PFAM group"
            );
            group.clear();
        }
        if read == 0 {
            break;
        }
    }
    Ok(summary)
}

pub trait ReferenceClient: Send + Sync {
    fn download(&self, url: &str, destination: &Utf8Path) -> Result<(), LoaderError>;
}

#[derive(Clone)]
pub struct ReferenceHttpClient {
    client: Client,
}

impl ReferenceHttpClient {
    pub fn new() -> Result<Self, LoaderError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("imicrobe-load/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| LoaderError::ReferenceHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|err| LoaderError::ReferenceHttp(err.to_string()))?;
        Ok(Self { client })
    }
}

impl ReferenceClient for ReferenceHttpClient {
    fn download(&self, url: &str, destination: &Utf8Path) -> Result<(), LoaderError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|err| LoaderError::ReferenceHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "reference download failed".to_string());
            return Err(LoaderError::ReferenceStatus { status, message });
        }
        let parent = destination
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| LoaderError::Filesystem(err.to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix("imicrobe-reference")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| LoaderError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, temp.as_file_mut())
            .map_err(|err| LoaderError::ReferenceHttp(err.to_string()))?;
        temp.persist(destination.as_std_path())
            .map_err(|err| LoaderError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

pub fn ensure_reference_file<C: ReferenceClient + ?Sized>(
    client: &C,
    url: &str,
    path: &Utf8Path,
) -> Result<bool, LoaderError> {
    if path.as_std_path().exists() {
        tracing::info!(%path, "PFAM file already exists");
        return Ok(false);
    }
    let start = Instant::now();
    client.download(url, path)?;
    tracing::info!(%path, elapsed_s = start.elapsed().as_secs_f64(), "downloaded PFAM file");
    Ok(true)
}
