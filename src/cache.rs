use std::collections::{BTreeSet, HashMap};

use crate::domain::Accession;
use crate::error::LoaderError;
use crate::store::AnnotationStore;

// `known` and `bad` never share an accession.
#[derive(Debug, Default, Clone)]
pub struct AnnotationCache {
    known: HashMap<Accession, i64>,
    bad: BTreeSet<Accession>,
}

impl AnnotationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize<S: AnnotationStore + ?Sized>(store: &S) -> Result<Self, LoaderError> {
        let known = store.annotation_ids()?.into_iter().collect::<HashMap<_, _>>();
        tracing::info!(count = known.len(), "found protein annotations in store");
        Ok(Self {
            known,
            bad: BTreeSet::new(),
        })
    }

    pub fn lookup_missing<'a, I>(&self, candidates: I) -> Vec<Accession>
    where
        I: IntoIterator<Item = &'a Accession>,
    {
        candidates
            .into_iter()
            .filter(|accession| !self.known.contains_key(*accession) && !self.bad.contains(*accession))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn mark_known(&mut self, accession: Accession, id: i64) {
        debug_assert!(!self.bad.contains(&accession));
        self.known.insert(accession, id);
    }

    pub fn mark_bad<I>(&mut self, accessions: I)
    where
        I: IntoIterator<Item = Accession>,
    {
        for accession in accessions {
            if !self.known.contains_key(&accession) {
                self.bad.insert(accession);
            }
        }
    }

    pub fn id_for(&self, accession: &Accession) -> Option<i64> {
        self.known.get(accession).copied()
    }

    pub fn is_bad(&self, accession: &Accession) -> bool {
        self.bad.contains(accession)
    }

    pub fn known_len(&self) -> usize {
        self.known.len()
    }

    pub fn bad_len(&self) -> usize {
        self.bad.len()
    }

    pub fn bad_accessions(&self) -> impl Iterator<Item = &Accession> {
        self.bad.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acc(value: &str) -> Accession {
        value.parse().unwrap()
    }

    #[test]
    fn lookup_missing_is_sorted_and_deduplicated() {
        let cache = AnnotationCache::new();
        let candidates = [acc("K00003"), acc("K00001"), acc("K00003")];
        assert_eq!(
            cache.lookup_missing(&candidates),
            vec![acc("K00001"), acc("K00003")]
        );
    }

    #[test]
    fn mark_bad_skips_known() {
        let mut cache = AnnotationCache::new();
        cache.mark_known(acc("K00001"), 1);
        cache.mark_bad([acc("K00001"), acc("K00002")]);
        assert!(!cache.is_bad(&acc("K00001")));
        assert!(cache.is_bad(&acc("K00002")));
        assert_eq!(cache.bad_len(), 1);
    }
}
