use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use crate::config::FailurePolicy;
use crate::domain::{Accession, AnnotationRecord};
use crate::error::LoaderError;
use crate::kegg::{AnnotationService, ServiceResponse, parse_entries};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub records: BTreeMap<Accession, AnnotationRecord>,
    pub unresolved: BTreeSet<Accession>,
    pub failed_batches: usize,
}

pub struct BatchFetcher<A: AnnotationService> {
    service: A,
    batch_size: usize,
    policy: FailurePolicy,
}

impl<A: AnnotationService> BatchFetcher<A> {
    pub fn new(service: A, batch_size: usize, policy: FailurePolicy) -> Self {
        Self {
            service,
            batch_size: batch_size.max(1),
            policy,
        }
    }

    pub fn service(&self) -> &A {
        &self.service
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn fetch(&self, missing: &[Accession]) -> Result<FetchOutcome, LoaderError> {
        let mut outcome = FetchOutcome::default();
        for batch in missing.chunks(self.batch_size) {
            let start = Instant::now();
            tracing::info!(count = batch.len(), "requesting annotations");
            match self.fetch_batch(batch) {
                Ok((records, unresolved)) => {
                    tracing::info!(
                        received = records.len(),
                        unresolved = unresolved.len(),
                        latency_ms = start.elapsed().as_millis() as u64,
                        "annotation batch done"
                    );
                    outcome.records.extend(records);
                    outcome.unresolved.extend(unresolved);
                }
                Err(err) => match self.policy {
                    FailurePolicy::Abort => return Err(err),
                    FailurePolicy::SkipBatch => {
                        tracing::error!(
                            %err,
                            first = %batch[0],
                            count = batch.len(),
                            "annotation batch failed; marking batch unresolved"
                        );
                        outcome.failed_batches += 1;
                        outcome.unresolved.extend(batch.iter().cloned());
                    }
                },
            }
        }
        Ok(outcome)
    }

    fn fetch_batch(
        &self,
        batch: &[Accession],
    ) -> Result<(BTreeMap<Accession, AnnotationRecord>, BTreeSet<Accession>), LoaderError> {
        let requested = batch.iter().cloned().collect::<BTreeSet<_>>();
        let text = match self.service.get_entries(batch)? {
            ServiceResponse::NotFound => {
                tracing::info!(count = batch.len(), "no annotations returned");
                return Ok((BTreeMap::new(), requested));
            }
            ServiceResponse::Found(text) => text,
        };

        let mut records = BTreeMap::new();
        let entries = parse_entries(&text)
            .map_err(|err| LoaderError::ServiceMalformed(err.to_string()))?;
        for entry in entries {
            if !requested.contains(&entry.accession) {
                tracing::warn!(accession = %entry.accession, "service returned an entry that was not requested");
                continue;
            }
            let accession = entry.accession.clone();
            match entry.into_record() {
                Ok(record) => {
                    records.insert(accession, record);
                }
                Err(err) => tracing::warn!(%accession, %err, "dropping malformed annotation"),
            }
        }
        let unresolved = requested
            .into_iter()
            .filter(|accession| !records.contains_key(accession))
            .collect();
        Ok((records, unresolved))
    }
}
