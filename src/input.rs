use crate::error::Error;
use std::fs;
use std::path::Path;

/// Reads the list of files to scan: one path per line, in processing order.
///
/// Only the line ending is removed. Blank lines are kept as empty paths and
/// fail later at open time.
pub fn read_file_list(path: &Path) -> Result<Vec<String>, Error> {
    let text = fs::read_to_string(path).map_err(|e| Error::io(path.display().to_string(), e))?;
    Ok(parse_file_list(&text))
}

pub fn parse_file_list(text: &str) -> Vec<String> {
    text.split_terminator('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .collect()
}
