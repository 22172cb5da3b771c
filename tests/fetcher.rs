use std::collections::BTreeMap;
use std::sync::Mutex;

use assert_matches::assert_matches;

use imicrobe_loader::config::FailurePolicy;
use imicrobe_loader::domain::Accession;
use imicrobe_loader::error::LoaderError;
use imicrobe_loader::fetcher::BatchFetcher;
use imicrobe_loader::kegg::{AnnotationService, ServiceResponse, parse_entries};

fn acc(value: &str) -> Accession {
    value.parse().unwrap()
}

fn kegg_entry(id: &str, name: &str, definition: &str) -> String {
    format!(
        "ENTRY       {id}                      KO\n\
         NAME        {name}\n\
         DEFINITION  {definition}\n\
         PATHWAY     ko00010  Glycolysis / Gluconeogenesis\n\
         \x20           ko01100  Metabolic pathways\n\
         ///\n"
    )
}

#[derive(Default)]
struct StubKegg {
    entries: BTreeMap<String, String>,
    failing: bool,
    calls: Mutex<Vec<Vec<String>>>,
}

impl StubKegg {
    fn with_entries(ids: &[&str]) -> Self {
        let entries = ids
            .iter()
            .map(|id| (id.to_string(), kegg_entry(id, "E1.1.1.1, adh", "alcohol dehydrogenase")))
            .collect();
        Self {
            entries,
            ..Self::default()
        }
    }
}

impl AnnotationService for StubKegg {
    fn get_entries(&self, accessions: &[Accession]) -> Result<ServiceResponse, LoaderError> {
        self.calls
            .lock()
            .unwrap()
            .push(accessions.iter().map(|a| a.to_string()).collect());
        if self.failing {
            return Err(LoaderError::ServiceUnavailable {
                status: 503,
                message: "maintenance".to_string(),
            });
        }
        let text = accessions
            .iter()
            .filter_map(|accession| self.entries.get(accession.as_str()))
            .cloned()
            .collect::<String>();
        if text.is_empty() {
            Ok(ServiceResponse::NotFound)
        } else {
            Ok(ServiceResponse::Found(text))
        }
    }
}

#[test]
fn not_found_batch_is_unresolved() {
    let fetcher = BatchFetcher::new(StubKegg::default(), 10, FailurePolicy::SkipBatch);
    let outcome = fetcher.fetch(&[acc("K999")]).unwrap();
    assert!(outcome.records.is_empty());
    assert_eq!(outcome.unresolved.into_iter().collect::<Vec<_>>(), vec![acc("K999")]);
    assert_eq!(outcome.failed_batches, 0);
}

#[test]
fn requests_are_batched() {
    let ids = (1..=23).map(|n| format!("K{n:05}")).collect::<Vec<_>>();
    let id_refs = ids.iter().map(String::as_str).collect::<Vec<_>>();
    let fetcher = BatchFetcher::new(StubKegg::with_entries(&id_refs), 10, FailurePolicy::SkipBatch);

    let missing = ids.iter().map(|id| acc(id)).collect::<Vec<_>>();
    let outcome = fetcher.fetch(&missing).unwrap();

    assert_eq!(outcome.records.len(), 23);
    assert!(outcome.unresolved.is_empty());
    let calls = fetcher.service().calls.lock().unwrap();
    assert_eq!(calls.iter().map(Vec::len).collect::<Vec<_>>(), vec![10, 10, 3]);
}

#[test]
fn partial_batch_reports_missing_ids() {
    let fetcher = BatchFetcher::new(StubKegg::with_entries(&["K00001"]), 10, FailurePolicy::SkipBatch);
    let outcome = fetcher.fetch(&[acc("K00001"), acc("K00999")]).unwrap();
    assert!(outcome.records.contains_key(&acc("K00001")));
    assert!(outcome.unresolved.contains(&acc("K00999")));
}

#[test]
fn multi_line_pathway_is_concatenated() {
    let entries = parse_entries(&kegg_entry("K00001", "E1.1.1.1, adh", "alcohol dehydrogenase")).unwrap();
    assert_eq!(entries.len(), 1);
    let record = entries.into_iter().next().unwrap().into_record().unwrap();
    assert_eq!(record.name, "E1.1.1.1, adh");
    assert_eq!(record.definition, "alcohol dehydrogenase");
    assert_eq!(
        record.pathway.as_deref(),
        Some("ko00010  Glycolysis / Gluconeogenesis\nko01100  Metabolic pathways")
    );
    assert_eq!(record.module, None);
}

#[test]
fn multiple_entries_are_split() {
    let text = format!(
        "{}{}",
        kegg_entry("K00001", "adh", "alcohol dehydrogenase"),
        kegg_entry("K00002", "AKR1A1, adh", "alcohol dehydrogenase (NADP+)")
    );
    let entries = parse_entries(&text).unwrap();
    assert_eq!(
        entries.iter().map(|e| e.accession.as_str()).collect::<Vec<_>>(),
        vec!["K00001", "K00002"]
    );
}

#[test]
fn symbol_layout_uses_name_as_definition() {
    let text = "ENTRY       K00001                      KO\n\
                SYMBOL      E1.1.1.1, adh\n\
                NAME        alcohol dehydrogenase [EC:1.1.1.1]\n\
                ///\n";
    let record = parse_entries(text).unwrap().remove(0).into_record().unwrap();
    assert_eq!(record.name, "E1.1.1.1, adh");
    assert_eq!(record.definition, "alcohol dehydrogenase [EC:1.1.1.1]");
}

#[test]
fn skip_batch_marks_failed_batch_unresolved() {
    let service = StubKegg {
        failing: true,
        ..StubKegg::default()
    };
    let fetcher = BatchFetcher::new(service, 2, FailurePolicy::SkipBatch);
    let outcome = fetcher
        .fetch(&[acc("K00001"), acc("K00002"), acc("K00003")])
        .unwrap();
    assert_eq!(outcome.failed_batches, 2);
    assert_eq!(outcome.unresolved.len(), 3);
    assert_eq!(fetcher.service().calls.lock().unwrap().len(), 2);
}

#[test]
fn abort_stops_at_first_failed_batch() {
    let service = StubKegg {
        failing: true,
        ..StubKegg::default()
    };
    let fetcher = BatchFetcher::new(service, 2, FailurePolicy::Abort);
    let err = fetcher
        .fetch(&[acc("K00001"), acc("K00002"), acc("K00003")])
        .unwrap_err();
    assert_matches!(err, LoaderError::ServiceUnavailable { status: 503, .. });
    assert!(err.is_fatal());
    assert_eq!(fetcher.service().calls.lock().unwrap().len(), 1);
}

#[test]
fn unreadable_body_is_a_service_failure() {
    let garbled = || {
        let mut service = StubKegg::default();
        service
            .entries
            .insert("K00001".to_string(), "<html>rate limited</html>\n".to_string());
        service
    };

    let skipping = BatchFetcher::new(garbled(), 10, FailurePolicy::SkipBatch);
    let outcome = skipping.fetch(&[acc("K00001"), acc("K00002")]).unwrap();
    assert_eq!(outcome.failed_batches, 1);
    assert_eq!(outcome.unresolved.len(), 2);

    let aborting = BatchFetcher::new(garbled(), 10, FailurePolicy::Abort);
    let err = aborting.fetch(&[acc("K00001")]).unwrap_err();
    assert_matches!(err, LoaderError::ServiceMalformed(_));
    assert!(err.is_fatal());
}
