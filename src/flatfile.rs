//! Pipe-delimited MAUDE flat-file reader.
//!
//! Files are Latin-1 encoded, `|`-separated, with a header row. Archives hold
//! a single member; the first member is read. Cells are taken verbatim, with
//! no quote processing: narrative text routinely contains unbalanced `"`.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::errors::FlatFileError;
use crate::schema::normalize_column_name;

const DELIMITER: char = '|';

/// A parsed file: normalized, unique column names and rows of nullable cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl ParsedTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Read a data file, transparently opening `.zip` archives.
///
/// Returns `Ok(None)` for an archive without members.
pub fn read_data_file(path: &Path) -> Result<Option<ParsedTable>, FlatFileError> {
    let is_zip = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("zip"))
        .unwrap_or(false);

    let bytes = if is_zip {
        match read_first_member(path)? {
            Some(bytes) => bytes,
            None => {
                tracing::warn!("empty zip file: {}", display_name(path));
                return Ok(None);
            }
        }
    } else {
        std::fs::read(path).map_err(|source| FlatFileError::Io {
            path: path.display().to_string(),
            source,
        })?
    };

    Ok(Some(parse_pipe_delimited(&decode_latin1(&bytes), &display_name(path))))
}

fn read_first_member(path: &Path) -> Result<Option<Vec<u8>>, FlatFileError> {
    let zip_err = |source| FlatFileError::Zip {
        path: path.display().to_string(),
        source,
    };

    let file = File::open(path).map_err(|source| FlatFileError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut archive = zip::ZipArchive::new(file).map_err(zip_err)?;
    if archive.is_empty() {
        return Ok(None);
    }

    let mut member = archive.by_index(0).map_err(zip_err)?;
    let mut bytes = Vec::new();
    member
        .read_to_end(&mut bytes)
        .map_err(|source| FlatFileError::Io {
            path: path.display().to_string(),
            source,
        })?;
    Ok(Some(bytes))
}

/// Every byte maps to the code point of the same value.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Parse decoded text. Blank lines are ignored.
pub fn parse_pipe_delimited(text: &str, source_name: &str) -> ParsedTable {
    let mut lines = text
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .filter(|l| !l.trim().is_empty());

    let Some(header) = lines.next() else {
        return ParsedTable {
            columns: Vec::new(),
            rows: Vec::new(),
        };
    };
    let columns = dedup_columns(header.split(DELIMITER).map(normalize_column_name).collect());

    let mut rows = Vec::new();
    for (i, line) in lines.enumerate() {
        let mut cells: Vec<Option<String>> = line
            .split(DELIMITER)
            .map(|c| if c.is_empty() { None } else { Some(c.to_string()) })
            .collect();

        if cells.len() > columns.len() {
            // Line numbers are 1-based and count the header.
            tracing::warn!(
                "{}: skipping line {}: expected {} fields, saw {}",
                source_name,
                i + 2,
                columns.len(),
                cells.len()
            );
            continue;
        }
        cells.resize(columns.len(), None);
        rows.push(cells);
    }

    ParsedTable { columns, rows }
}

/// Repeated names get `_1`, `_2`, ... in order of appearance.
fn dedup_columns(columns: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(columns.len());
    for col in columns {
        let base = if col.is_empty() { "unnamed".to_string() } else { col };
        let mut name = base.clone();
        let mut n = 1;
        while out.contains(&name) {
            name = format!("{}_{}", base, n);
            n += 1;
        }
        out.push(name);
    }
    out
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
