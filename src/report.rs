use crate::error::Error;
use crate::storage::AllocationSnapshot;
use serde::Serialize;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

pub const HEADER: [&str; 4] = [
    "total_alloc_bytes",
    "curr_alloc_bytes",
    "peak_alloc_bytes",
    "acc_file_size",
];

/// One line of the output CSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    pub total_alloc_bytes: u64,
    pub curr_alloc_bytes: u64,
    pub peak_alloc_bytes: u64,
    pub acc_file_size: u64,
}

impl ReportRow {
    pub fn new(stats: &AllocationSnapshot, acc_file_size: u64) -> Self {
        Self {
            total_alloc_bytes: stats.total_alloc_bytes,
            curr_alloc_bytes: stats.curr_alloc_bytes,
            peak_alloc_bytes: stats.peak_alloc_bytes,
            acc_file_size,
        }
    }
}

/// Append-only CSV writer for measurement rows. The header is written once,
/// before the first row.
pub struct StatsReporter<W: Write> {
    writer: csv::Writer<W>,
    header_written: bool,
    rows: usize,
}

impl StatsReporter<File> {
    /// Truncates or creates the output file.
    pub fn create(path: &Path) -> Result<Self, Error> {
        let file = File::create(path).map_err(|e| Error::io(path.display().to_string(), e))?;
        Ok(Self::new(file))
    }
}

impl<W: Write> StatsReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            writer: csv::WriterBuilder::new()
                .has_headers(false)
                .terminator(csv::Terminator::Any(b'\n'))
                .from_writer(out),
            header_written: false,
            rows: 0,
        }
    }

    pub fn write_header(&mut self) -> Result<(), Error> {
        if self.header_written {
            return Ok(());
        }
        self.writer.write_record(HEADER)?;
        self.header_written = true;
        Ok(())
    }

    pub fn write_row(&mut self, stats: &AllocationSnapshot, acc_file_size: u64) -> Result<(), Error> {
        self.write_header()?;
        self.writer.serialize(ReportRow::new(stats, acc_file_size))?;
        self.rows += 1;
        Ok(())
    }

    /// Data rows written so far, header excluded.
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn flush(&mut self) -> Result<(), Error> {
        self.writer
            .flush()
            .map_err(|e| Error::io("report output", e))
    }

    pub fn into_inner(self) -> Result<W, Error> {
        self.writer
            .into_inner()
            .map_err(|e| {
                let cause = e.error();
                Error::io("report output", io::Error::new(cause.kind(), cause.to_string()))
            })
    }
}
