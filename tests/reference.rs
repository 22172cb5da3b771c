use std::io::Write;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};
use flate2::Compression;
use flate2::write::GzEncoder;

use imicrobe_loader::cache::AnnotationCache;
use imicrobe_loader::domain::SourceKind;
use imicrobe_loader::error::LoaderError;
use imicrobe_loader::reference::{ReferenceClient, ensure_reference_file, import_pfam, import_pfam_file};
use imicrobe_loader::store::{AnnotationStore, SqliteStore};

fn pfam_line(accession: &str, identifier: &str, name: &str) -> Vec<u8> {
    format!(
        "{accession}\t{identifier}\t\t{name}\tAuthor\tPfam-B\tSeed\tFamily\tLong comment for {identifier}\t42\n"
    )
    .into_bytes()
}

fn gzip(lines: &[Vec<u8>]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    for line in lines {
        encoder.write_all(line).unwrap();
    }
    encoder.finish().unwrap()
}

fn store() -> SqliteStore {
    let store = SqliteStore::open_in_memory().unwrap();
    store.create_schema().unwrap();
    store
}

#[test]
fn import_in_groups() {
    let store = store();
    let mut cache = AnnotationCache::new();
    let lines = vec![
        pfam_line("PF00001", "7tm_1", "7 transmembrane receptor (rhodopsin family)"),
        pfam_line("PF00002", "7tm_2", "7 transmembrane receptor (Secretin family)"),
        b"PF00003\tshort\n".to_vec(),
        pfam_line("PF00004", "AAA", "ATPase family"),
    ];
    let data = gzip(&lines);

    let summary = import_pfam(&store, &mut cache, flate2::read::GzDecoder::new(data.as_slice()), 2).unwrap();

    assert_eq!(summary.lines, 4);
    assert_eq!(summary.inserted, 3);
    assert_eq!(summary.malformed, 1);
    assert_eq!(store.count_annotations(SourceKind::Pfam).unwrap(), 3);
    assert!(cache.id_for(&"PF00004".parse().unwrap()).is_some());

    let again = import_pfam(&store, &mut cache, flate2::read::GzDecoder::new(data.as_slice()), 2).unwrap();
    assert_eq!(again.inserted, 0);
    assert_eq!(again.existing, 3);
}

#[test]
fn latin1_bytes_are_decoded() {
    let store = store();
    let mut cache = AnnotationCache::new();
    let mut line = b"PF00005\tABC_tran\t\tABC transporter \xe9\tA\tB\tC\tFamily\tcomment\n".to_vec();
    line.extend(pfam_line("PF00006", "ATP-synt_ab", "ATP synthase"));
    let data = gzip(&[line]);

    let summary = import_pfam(&store, &mut cache, flate2::read::GzDecoder::new(data.as_slice()), 10).unwrap();
    assert_eq!(summary.inserted, 2);
    assert_eq!(store.annotation_ids().unwrap().len(), 2);
}

#[test]
fn import_from_gzip_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().join("pfamA.txt.gz")).unwrap();
    std::fs::write(path.as_std_path(), gzip(&[pfam_line("PF00001", "7tm_1", "GPCR")])).unwrap();

    let store = store();
    let mut cache = AnnotationCache::new();
    let summary = import_pfam_file(&store, &mut cache, &path, 2000).unwrap();
    assert_eq!(summary.inserted, 1);

    let missing = Utf8PathBuf::from_path_buf(temp.path().join("absent.gz")).unwrap();
    assert_matches!(
        import_pfam_file(&store, &mut cache, &missing, 2000),
        Err(LoaderError::Filesystem(_))
    );
}

#[derive(Default)]
struct MockReference {
    calls: Mutex<Vec<String>>,
}

impl ReferenceClient for MockReference {
    fn download(&self, url: &str, destination: &Utf8Path) -> Result<(), LoaderError> {
        self.calls.lock().unwrap().push(url.to_string());
        std::fs::write(destination.as_std_path(), gzip(&[])).unwrap();
        Ok(())
    }
}

#[test]
fn download_only_when_missing() {
    let temp = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().join("pfamA.txt.gz")).unwrap();
    let client = MockReference::default();

    assert!(ensure_reference_file(&client, "https://example.org/pfamA.txt.gz", &path).unwrap());
    assert!(!ensure_reference_file(&client, "https://example.org/pfamA.txt.gz", &path).unwrap());
    assert_eq!(client.calls.lock().unwrap().len(), 1);
}
