use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use walkdir::WalkDir;

use crate::domain::SampleId;
use crate::error::LoaderError;
use crate::results::ResultTable;

pub const RESULT_FILE_PATTERN: &str = r"\.uproc\.(kegg|pfam\d+)$";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleCollection {
    pub sample_id: SampleId,
    pub path: Utf8PathBuf,
    pub result_files: Vec<Utf8PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectCollection {
    pub path: Utf8PathBuf,
    pub samples: Vec<SampleCollection>,
}

pub trait SampleSource {
    fn projects(&self) -> Result<Vec<ProjectCollection>, LoaderError>;

    fn read_results(&self, file: &Utf8Path) -> Result<ResultTable, LoaderError> {
        ResultTable::from_path(file)
    }
}

#[derive(Debug, Clone)]
pub struct DirectorySampleSource {
    root: Utf8PathBuf,
    sample_limit: Option<usize>,
    file_re: Regex,
}

impl DirectorySampleSource {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Result<Self, LoaderError> {
        let file_re = Regex::new(RESULT_FILE_PATTERN)
            .map_err(|err| LoaderError::ConfigParse(err.to_string()))?;
        Ok(Self {
            root: root.into(),
            sample_limit: None,
            file_re,
        })
    }

    pub fn with_sample_limit(mut self, limit: Option<usize>) -> Self {
        self.sample_limit = limit;
        self
    }

    pub fn is_result_file(&self, name: &str) -> bool {
        self.file_re.is_match(name)
    }

    fn sample_dirs(&self) -> Result<Vec<Utf8PathBuf>, LoaderError> {
        if !self.root.as_std_path().is_dir() {
            return Err(LoaderError::Filesystem(format!(
                "results root {} is not a directory",
                self.root
            )));
        }
        let mut dirs = Vec::new();
        for entry in WalkDir::new(self.root.as_std_path())
            .min_depth(3)
            .max_depth(3)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|err| LoaderError::Filesystem(err.to_string()))?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let in_samples_dir = entry
                .path()
                .parent()
                .and_then(|parent| parent.file_name())
                .map(|name| name == "samples")
                .unwrap_or(false);
            if !in_samples_dir {
                continue;
            }
            let path = Utf8PathBuf::from_path_buf(entry.into_path())
                .map_err(|path| LoaderError::Filesystem(format!("non-utf8 path {}", path.display())))?;
            dirs.push(path);
        }
        Ok(dirs)
    }

    fn result_files(&self, sample_dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, LoaderError> {
        let mut files = Vec::new();
        for entry in WalkDir::new(sample_dir.as_std_path())
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|err| LoaderError::Filesystem(err.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !self.is_result_file(&name) {
                continue;
            }
            let size = entry
                .metadata()
                .map_err(|err| LoaderError::Filesystem(err.to_string()))?
                .len();
            let path = Utf8PathBuf::from_path_buf(entry.path().to_path_buf())
                .map_err(|path| LoaderError::Filesystem(format!("non-utf8 path {}", path.display())))?;
            if size == 0 {
                tracing::info!(%path, "result file is empty");
                continue;
            }
            files.push(path);
        }
        Ok(files)
    }
}

impl SampleSource for DirectorySampleSource {
    fn projects(&self) -> Result<Vec<ProjectCollection>, LoaderError> {
        let mut projects: Vec<ProjectCollection> = Vec::new();
        let mut sample_count = 0usize;
        for sample_dir in self.sample_dirs()? {
            if self.sample_limit.is_some_and(|limit| sample_count >= limit) {
                break;
            }
            let Some(sample_id) = sample_dir.file_name().and_then(|name| name.parse::<SampleId>().ok())
            else {
                tracing::warn!(path = %sample_dir, "skipping sample directory without a numeric id");
                continue;
            };
            let project_path = sample_dir
                .parent()
                .and_then(Utf8Path::parent)
                .map(Utf8Path::to_path_buf)
                .unwrap_or_else(|| self.root.clone());
            let sample = SampleCollection {
                sample_id,
                result_files: self.result_files(&sample_dir)?,
                path: sample_dir,
            };
            sample_count += 1;
            match projects.last_mut() {
                Some(project) if project.path == project_path => project.samples.push(sample),
                _ => projects.push(ProjectCollection {
                    path: project_path,
                    samples: vec![sample],
                }),
            }
        }
        Ok(projects)
    }
}

// One `ingest-file` line per result file, for GNU parallel.
pub fn job_commands<Src: SampleSource + ?Sized>(
    source: &Src,
    database: &Utf8Path,
) -> Result<Vec<String>, LoaderError> {
    let mut commands = Vec::new();
    for project in source.projects()? {
        for sample in project.samples {
            for file in sample.result_files {
                commands.push(format!(
                    "imicrobe-load --non-interactive --db {} ingest-file {}",
                    shell_quote(database.as_str()),
                    shell_quote(file.as_str())
                ));
            }
        }
    }
    tracing::info!(count = commands.len(), "wrote job commands");
    Ok(commands)
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

pub fn sample_id_from_path(path: &Utf8Path) -> Result<SampleId, LoaderError> {
    path.parent()
        .and_then(Utf8Path::file_name)
        .ok_or_else(|| LoaderError::InvalidSampleId(path.to_string()))?
        .parse()
}
