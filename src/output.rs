use std::io::{self, Write};

use serde::Serialize;

use crate::ingest::{IngestReport, ProgressEvent, ProgressSink, SampleOutcome};
use crate::reference::ReferenceImport;
use crate::store::AssociationRow;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub associations: Vec<AssociationRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaResult {
    pub action: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportResult {
    pub downloaded: bool,
    pub import: ReferenceImport,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_ingest(report: &IngestReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_sample(outcome: &SampleOutcome) -> io::Result<()> {
        Self::print_json(outcome)
    }

    pub fn print_list(result: &ListResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_schema(result: &SchemaResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_import(result: &ImportResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct ConsoleOutput;

impl ConsoleOutput {
    pub fn print_ingest(report: &IngestReport) -> io::Result<()> {
        let summary = &report.summary;
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "samples discovered:        {}", summary.samples_discovered)?;
        writeln!(stdout, "samples done:              {}", summary.samples_done)?;
        writeln!(stdout, "skipped (no results):      {}", summary.skipped_no_results)?;
        writeln!(stdout, "skipped (already loaded):  {}", summary.skipped_already_loaded)?;
        writeln!(stdout, "samples failed:            {}", summary.samples_failed)?;
        writeln!(stdout, "associations written:      {}", summary.associations_written)?;
        writeln!(stdout, "duplicate associations:    {}", summary.duplicate_associations)?;
        writeln!(stdout, "failed associations:       {}", summary.failed_associations)?;
        writeln!(stdout, "annotations downloaded:    {}", summary.annotations_downloaded)?;
        writeln!(stdout, "failed service batches:    {}", summary.failed_batches)?;
        writeln!(stdout, "bad accessions:            {}", summary.bad_accessions)?;
        for count in &report.store_counts {
            writeln!(
                stdout,
                "{:<5} annotations: {:>8}  associations: {:>10}",
                count.kind, count.annotations, count.associations
            )?;
        }
        Ok(())
    }

    pub fn print_sample(outcome: &SampleOutcome) -> io::Result<()> {
        println!(
            "sample {}: {:?} ({} rows, {} duplicates, {} failed, {} skipped accessions)",
            outcome.sample_id,
            outcome.state,
            outcome.rows_written,
            outcome.duplicate_rows,
            outcome.failed_rows,
            outcome.skipped_accessions
        );
        Ok(())
    }

    pub fn print_list(result: &ListResult) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        for row in &result.associations {
            writeln!(
                stdout,
                "{}\t{}\t{}\t{}\t{}",
                row.sample_id, row.accession, row.source_kind, row.evidence, row.read_count
            )?;
        }
        Ok(())
    }

    pub fn print_schema(result: &SchemaResult) -> io::Result<()> {
        println!("{}", result.action);
        Ok(())
    }

    pub fn print_import(result: &ImportResult) -> io::Result<()> {
        let import = &result.import;
        println!(
            "PFAM import: {} lines, {} inserted, {} existing, {} rejected, {} malformed{}",
            import.lines,
            import.inserted,
            import.existing,
            import.rejected,
            import.malformed,
            if result.downloaded { " (downloaded)" } else { "" }
        );
        Ok(())
    }
}

impl ProgressSink for ConsoleOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({:.1}s)", event.message, elapsed.as_secs_f64()),
            None => eprintln!("{}", event.message),
        }
    }
}
