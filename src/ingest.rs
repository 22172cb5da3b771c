use std::time::{Duration, Instant};

use camino::Utf8Path;
use serde::Serialize;

use crate::cache::AnnotationCache;
use crate::domain::{Accession, Association, EvidenceSource, SampleId, SourceKind};
use crate::error::LoaderError;
use crate::fetcher::BatchFetcher;
use crate::kegg::AnnotationService;
use crate::results::{ResultTable, combine};
use crate::samples::{SampleCollection, SampleSource, sample_id_from_path};
use crate::store::AnnotationStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SampleState {
    Discovered,
    SkippedNoResults,
    SkippedAlreadyLoaded,
    Combining,
    ResolvingAnnotations,
    Persisting,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleOutcome {
    pub sample_id: i64,
    pub state: SampleState,
    pub rows_written: usize,
    pub duplicate_rows: usize,
    pub failed_rows: usize,
    pub skipped_accessions: usize,
}

impl SampleOutcome {
    fn terminal(sample_id: SampleId, state: SampleState) -> Self {
        Self {
            sample_id: sample_id.get(),
            state,
            rows_written: 0,
            duplicate_rows: 0,
            failed_rows: 0,
            skipped_accessions: 0,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub samples_discovered: usize,
    pub samples_done: usize,
    pub skipped_no_results: usize,
    pub skipped_already_loaded: usize,
    pub samples_failed: usize,
    pub associations_written: usize,
    pub duplicate_associations: usize,
    pub failed_associations: usize,
    pub annotations_downloaded: usize,
    pub failed_batches: usize,
    pub bad_accessions: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct KindCount {
    pub kind: String,
    pub annotations: u64,
    pub associations: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub summary: IngestSummary,
    pub samples: Vec<SampleOutcome>,
    pub bad_accessions: Vec<String>,
    pub store_counts: Vec<KindCount>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct Ingestor<S: AnnotationStore, A: AnnotationService> {
    store: S,
    fetcher: BatchFetcher<A>,
    cache: AnnotationCache,
    evidence: EvidenceSource,
    summary: IngestSummary,
}

impl<S: AnnotationStore, A: AnnotationService> Ingestor<S, A> {
    pub fn new(store: S, fetcher: BatchFetcher<A>, evidence: EvidenceSource) -> Result<Self, LoaderError> {
        let cache = AnnotationCache::initialize(&store)?;
        Ok(Self::with_cache(store, fetcher, cache, evidence))
    }

    pub fn with_cache(
        store: S,
        fetcher: BatchFetcher<A>,
        cache: AnnotationCache,
        evidence: EvidenceSource,
    ) -> Self {
        Self {
            store,
            fetcher,
            cache,
            evidence,
            summary: IngestSummary::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn cache(&self) -> &AnnotationCache {
        &self.cache
    }

    pub fn summary(&self) -> &IngestSummary {
        &self.summary
    }

    pub fn bad_accessions(&self) -> Vec<String> {
        self.cache
            .bad_accessions()
            .map(|accession| accession.to_string())
            .collect()
    }

    pub fn ingest_source<Src: SampleSource + ?Sized>(
        &mut self,
        source: &Src,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<SampleOutcome>, LoaderError> {
        let start = Instant::now();
        let mut outcomes = Vec::new();
        for project in source.projects()? {
            sink.event(ProgressEvent {
                message: format!("project {}: {} samples", project.path, project.samples.len()),
                elapsed: Some(start.elapsed()),
            });
            for sample in &project.samples {
                let sample_start = Instant::now();
                let outcome = match self.ingest_sample(source, sample) {
                    Ok(outcome) => outcome,
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => {
                        tracing::error!(sample_id = %sample.sample_id, %err, "sample failed");
                        self.summary.samples_failed += 1;
                        SampleOutcome::terminal(sample.sample_id, SampleState::Failed)
                    }
                };
                sink.event(ProgressEvent {
                    message: format!(
                        "sample {}: {:?}, {} rows",
                        outcome.sample_id, outcome.state, outcome.rows_written
                    ),
                    elapsed: Some(sample_start.elapsed()),
                });
                outcomes.push(outcome);
            }
        }
        tracing::info!(
            samples = outcomes.len(),
            elapsed_s = start.elapsed().as_secs_f64(),
            "ingest finished"
        );
        Ok(outcomes)
    }

    pub fn ingest_sample<Src: SampleSource + ?Sized>(
        &mut self,
        source: &Src,
        sample: &SampleCollection,
    ) -> Result<SampleOutcome, LoaderError> {
        self.summary.samples_discovered += 1;
        tracing::debug!(sample_id = %sample.sample_id, state = ?SampleState::Discovered, files = sample.result_files.len());

        if sample.result_files.is_empty() {
            tracing::info!(sample_id = %sample.sample_id, "no result files");
            self.summary.skipped_no_results += 1;
            return Ok(SampleOutcome::terminal(sample.sample_id, SampleState::SkippedNoResults));
        }

        let existing = self.store.count_associations(sample.sample_id)?;
        if existing > 0 {
            tracing::info!(sample_id = %sample.sample_id, existing, "sample already loaded");
            self.summary.skipped_already_loaded += 1;
            return Ok(SampleOutcome::terminal(
                sample.sample_id,
                SampleState::SkippedAlreadyLoaded,
            ));
        }

        let tables = sample
            .result_files
            .iter()
            .map(|file| source.read_results(file))
            .collect::<Result<Vec<_>, _>>()?;
        self.load_tables(sample.sample_id, &tables)
    }

    // No already-loaded gate: sibling jobs load the other files of the sample.
    pub fn ingest_file(&mut self, path: &Utf8Path) -> Result<SampleOutcome, LoaderError> {
        let sample_id = sample_id_from_path(path)?;
        self.summary.samples_discovered += 1;
        let table = ResultTable::from_path(path)?;
        if table.is_empty() {
            tracing::info!(%path, "result file is empty");
            self.summary.skipped_no_results += 1;
            return Ok(SampleOutcome::terminal(sample_id, SampleState::SkippedNoResults));
        }
        self.load_tables(sample_id, std::slice::from_ref(&table))
    }

    fn load_tables(
        &mut self,
        sample_id: SampleId,
        tables: &[ResultTable],
    ) -> Result<SampleOutcome, LoaderError> {
        tracing::debug!(%sample_id, state = ?SampleState::Combining, tables = tables.len());
        let combined = combine(tables);

        tracing::debug!(%sample_id, state = ?SampleState::ResolvingAnnotations, keys = combined.len());
        self.resolve_annotations(&combined)?;

        let mut rows = Vec::with_capacity(combined.len());
        let mut unknown = Vec::new();
        for (accession, read_count) in combined.iter() {
            match self.cache.id_for(accession) {
                Some(annotation_id) => rows.push(Association {
                    sample_id,
                    annotation_id,
                    accession: accession.clone(),
                    read_count,
                }),
                None => unknown.push(accession.clone()),
            }
        }
        let skipped_accessions = unknown.len();
        if !unknown.is_empty() {
            tracing::debug!(%sample_id, count = unknown.len(), "skipping accessions without annotation");
            self.cache.mark_bad(unknown);
        }
        self.summary.bad_accessions = self.cache.bad_len();

        tracing::debug!(%sample_id, state = ?SampleState::Persisting, rows = rows.len());
        let start = Instant::now();
        let batch = self.store.insert_associations(self.evidence, &rows)?;
        for accession in &batch.duplicates {
            let err = LoaderError::DuplicateAssociation {
                sample_id: sample_id.get(),
                accession: accession.to_string(),
            };
            tracing::error!(%sample_id, %accession, %err, "duplicate association");
        }
        for (accession, reason) in &batch.failed {
            tracing::warn!(%sample_id, %accession, %reason, "association row rejected");
        }

        self.summary.samples_done += 1;
        self.summary.associations_written += batch.inserted;
        self.summary.duplicate_associations += batch.duplicates.len();
        self.summary.failed_associations += batch.failed.len();
        tracing::info!(
            %sample_id,
            rows = batch.inserted,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "sample done"
        );

        Ok(SampleOutcome {
            sample_id: sample_id.get(),
            state: SampleState::Done,
            rows_written: batch.inserted,
            duplicate_rows: batch.duplicates.len(),
            failed_rows: batch.failed.len(),
            skipped_accessions,
        })
    }

    // PFAM families come from the reference import, never from the service.
    fn resolve_annotations(&mut self, combined: &ResultTable) -> Result<(), LoaderError> {
        let missing = self
            .cache
            .lookup_missing(combined.accessions_of_kind(SourceKind::Kegg));
        if missing.is_empty() {
            return Ok(());
        }

        let outcome = self.fetcher.fetch(&missing)?;
        self.summary.failed_batches += outcome.failed_batches;
        if !outcome.unresolved.is_empty() {
            tracing::info!(count = outcome.unresolved.len(), "accessions unresolved by service");
            self.cache.mark_bad(outcome.unresolved);
        }

        let records = outcome.records.into_values().collect::<Vec<_>>();
        for chunk in records.chunks(self.fetcher.batch_size()) {
            let batch = match self.store.insert_annotations(chunk) {
                Ok(batch) => batch,
                Err(err) if err.is_fatal() => {
                    self.summary.bad_accessions = self.cache.bad_len();
                    return Err(err);
                }
                Err(err) => {
                    tracing::error!(%err, count = chunk.len(), "annotation batch not stored");
                    self.cache
                        .mark_bad(chunk.iter().map(|record| record.accession.clone()));
                    continue;
                }
            };
            self.summary.annotations_downloaded += batch.inserted.len();
            for (accession, id) in batch.inserted.into_iter().chain(batch.existing) {
                self.cache.mark_known(accession, id);
            }
            let rejected = batch
                .rejected
                .into_iter()
                .map(|(accession, reason)| {
                    tracing::warn!(%accession, %reason, "annotation rejected by store");
                    accession
                })
                .collect::<Vec<Accession>>();
            self.cache.mark_bad(rejected);
        }
        self.summary.bad_accessions = self.cache.bad_len();
        Ok(())
    }
}
