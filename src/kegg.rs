use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use regex::Regex;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::domain::{Accession, AnnotationRecord, SourceKind};
use crate::error::LoaderError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceResponse {
    Found(String),
    NotFound,
}

pub trait AnnotationService: Send + Sync {
    fn get_entries(&self, accessions: &[Accession]) -> Result<ServiceResponse, LoaderError>;
}

#[derive(Clone)]
pub struct KeggHttpClient {
    client: Client,
    base_url: String,
}

impl KeggHttpClient {
    pub fn new(base_url: &str) -> Result<Self, LoaderError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("imicrobe-load/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| LoaderError::ServiceHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| LoaderError::ServiceHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn get_url(&self, accessions: &[Accession]) -> String {
        let ids = accessions
            .iter()
            .map(|accession| format!("ko:{accession}"))
            .collect::<Vec<_>>()
            .join("+");
        format!("{}/get/{ids}", self.base_url)
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, LoaderError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 500;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        tracing::debug!(status, delay_ms = delay, "retrying KEGG request");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        tracing::debug!(%err, delay_ms = delay, "retrying KEGG request");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(LoaderError::ServiceHttp(err.to_string()));
                }
            }
        }
    }
}

impl AnnotationService for KeggHttpClient {
    fn get_entries(&self, accessions: &[Accession]) -> Result<ServiceResponse, LoaderError> {
        if accessions.is_empty() {
            return Ok(ServiceResponse::NotFound);
        }
        let url = self.get_url(accessions);
        let response = self.send_with_retries(|| self.client.get(&url))?;
        match response.status() {
            StatusCode::OK => response
                .text()
                .map(ServiceResponse::Found)
                .map_err(|err| LoaderError::ServiceHttp(err.to_string())),
            StatusCode::NOT_FOUND => Ok(ServiceResponse::NotFound),
            status => {
                let message = response
                    .text()
                    .unwrap_or_else(|_| "KEGG request failed".to_string());
                Err(LoaderError::ServiceUnavailable {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeggEntry {
    pub accession: Accession,
    fields: BTreeMap<String, Vec<String>>,
}

impl KeggEntry {
    pub fn field(&self, name: &str) -> Option<String> {
        self.fields.get(name).map(|lines| lines.join("\n"))
    }

    // Older KO records carry NAME and DEFINITION; current ones carry SYMBOL
    // and put the definition under NAME.
    pub fn into_record(self) -> Result<AnnotationRecord, LoaderError> {
        let source_kind = SourceKind::classify(&self.accession)?;
        let (name, definition) = match (
            self.field("SYMBOL"),
            self.field("NAME"),
            self.field("DEFINITION"),
        ) {
            (_, Some(name), Some(definition)) => (name, definition),
            (Some(symbol), Some(name), None) => (symbol, name),
            (None, Some(name), None) => (name, String::new()),
            (_, None, _) => {
                return Err(LoaderError::malformed(
                    format!("KEGG entry {}", self.accession),
                    0,
                    "missing NAME field",
                ));
            }
        };
        Ok(AnnotationRecord {
            pathway: self.field("PATHWAY"),
            module: self.field("MODULE"),
            accession: self.accession,
            name,
            definition,
            source_kind,
        })
    }
}

pub fn parse_entries(text: &str) -> Result<Vec<KeggEntry>, LoaderError> {
    let field_re = Regex::new(r"^(?P<name>[A-Z][A-Z_]*)(?:\s+(?P<value>.*))?$")
        .map_err(|err| LoaderError::ServiceHttp(err.to_string()))?;

    let mut entries = Vec::new();
    let mut current: Option<KeggEntry> = None;
    let mut field_name: Option<String> = None;

    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim_end();
        if line.is_empty() {
            continue;
        }
        if line.starts_with("///") {
            entries.extend(current.take());
            field_name = None;
            continue;
        }
        if line.starts_with(char::is_whitespace) {
            if let (Some(entry), Some(name)) = (current.as_mut(), field_name.as_ref()) {
                entry
                    .fields
                    .entry(name.clone())
                    .or_default()
                    .push(line.trim().to_string());
            }
            continue;
        }
        let Some(caps) = field_re.captures(line) else {
            return Err(LoaderError::malformed(
                "KEGG response",
                index as u64 + 1,
                format!("unexpected line {line:?}"),
            ));
        };
        let name = caps["name"].to_string();
        let value = caps
            .name("value")
            .map(|value| value.as_str().trim().to_string())
            .unwrap_or_default();

        if name == "ENTRY" {
            entries.extend(current.take());
            let id = value.split_whitespace().next().unwrap_or("");
            let accession = id.parse::<Accession>().map_err(|_| {
                LoaderError::malformed("KEGG response", index as u64 + 1, "ENTRY without an id")
            })?;
            current = Some(KeggEntry {
                accession,
                fields: BTreeMap::new(),
            });
        }
        if let Some(entry) = current.as_mut() {
            let values = entry.fields.entry(name.clone()).or_default();
            if !value.is_empty() {
                values.push(value);
            }
        }
        field_name = Some(name);
    }
    entries.extend(current.take());
    Ok(entries)
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}
