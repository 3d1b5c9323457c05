//! Content hashing for file- and row-level deduplication.
//!
//! Both digests are lowercase SHA-256 hex. Row digests hash the cell values
//! joined with `|` in column order, nulls as the empty string, so the same
//! cells in a different column order hash differently.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const CHUNK_SIZE: usize = 8192;

/// Hash a file's bytes, streaming in fixed-size chunks.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let file = File::open(path)?;
    hash_reader(file)
}

/// Hash everything readable from `reader`.
pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Hash one row of cells.
pub fn hash_row<S: AsRef<str>>(cells: &[Option<S>]) -> String {
    let joined = cells
        .iter()
        .map(|c| c.as_ref().map(|s| AsRef::<str>::as_ref(s)).unwrap_or(""))
        .collect::<Vec<_>>()
        .join("|");
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn file_hash_is_deterministic_and_content_sensitive() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        let c = dir.path().join("c.txt");
        std::fs::write(&a, "MDR_REPORT_KEY|FOI_TEXT\n1|hello\n").unwrap();
        std::fs::write(&b, "MDR_REPORT_KEY|FOI_TEXT\n1|hello\n").unwrap();
        std::fs::write(&c, "MDR_REPORT_KEY|FOI_TEXT\n1|hellO\n").unwrap();

        let ha = hash_file(&a).unwrap();
        assert_eq!(ha, hash_file(&a).unwrap());
        assert_eq!(ha, hash_file(&b).unwrap());
        assert_ne!(ha, hash_file(&c).unwrap());
        assert_eq!(ha.len(), 64);
    }

    #[test]
    fn file_hash_spans_multiple_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        let line = "x".repeat(1000);
        for _ in 0..50 {
            writeln!(f, "{}", line).unwrap();
        }
        drop(f);
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(hash_file(&path).unwrap(), hash_reader(bytes.as_slice()).unwrap());
    }

    #[test]
    fn known_empty_digest() {
        assert_eq!(
            hash_reader(&b""[..]).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn row_hash_depends_on_values_and_order() {
        let row = [Some("1"), None, Some("text")];
        let same = [Some("1".to_string()), None, Some("text".to_string())];
        assert_eq!(hash_row(&row), hash_row(&same));
        assert_ne!(hash_row(&row), hash_row(&[Some("1"), None, Some("texT")]));
        assert_ne!(hash_row(&row), hash_row(&[Some("text"), None, Some("1")]));
    }

    #[test]
    fn null_hashes_like_empty_string() {
        assert_eq!(hash_row(&[Some("a"), None]), hash_row(&[Some("a"), Some("")]));
        assert_eq!(hash_row::<&str>(&[Some("a"), None]), hash_row(&[Some("a|")]));
    }
}
