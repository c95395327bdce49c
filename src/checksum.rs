//! SHA256SUMS bookkeeping for pre-flight integrity.
//!
//! The file format is the one `sha256sum` writes: 64 hex digits, a two-byte
//! separator (`"  "` for text mode, `" *"` for binary mode), then the path.
//! Entries are matched by absolute-path equality, so a relative entry still
//! matches when the tool runs from the directory the sums were written in.

use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write as _};
use std::path::Path;

use anyhow::{Context as _, Result, bail};
use sha2::{Digest, Sha256};

/// Look up the digest recorded for `file_path`, if any.
///
/// # Errors
///
/// Returns an error when the sums file is unreadable or a line does not
/// follow the format above.
pub fn lookup(sums_path: &Path, file_path: &Path) -> Result<Option<String>> {
    let target = std::path::absolute(file_path)
        .with_context(|| format!("failed to resolve {}", file_path.display()))?;

    let file = File::open(sums_path)
        .with_context(|| format!("failed to open {}", sums_path.display()))?;
    for line in BufReader::new(file).lines() {
        let line = line.context("failed to read SHA256SUMS")?;
        if line.is_empty() {
            continue;
        }
        if line.len() < 67 || !line.is_ascii() {
            bail!("unsupported SHA256SUMS format");
        }
        let (sum, rest) = line.split_at(64);
        let (separator, path) = rest.split_at(2);
        if !sum.bytes().all(|b| b.is_ascii_hexdigit()) || (separator != "  " && separator != " *")
        {
            bail!("unsupported SHA256SUMS format");
        }
        let entry = std::path::absolute(Path::new(path))
            .with_context(|| format!("failed to resolve {path}"))?;
        if entry == target {
            return Ok(Some(sum.to_string()));
        }
    }
    Ok(None)
}

/// Stream the file through SHA-256 and return the lowercase hex digest.
pub fn compute(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .with_context(|| format!("failed to hash {}", path.display()))?;

    let digest = hasher.finalize();
    let mut sum = String::with_capacity(64);
    for byte in digest {
        let _ = write!(sum, "{byte:02x}");
    }
    Ok(sum)
}

/// Append a text-mode entry for `file_path`, creating the sums file if
/// needed. The path is recorded as given, the way `sha256sum` would.
pub fn append(sums_path: &Path, file_path: &Path, sum: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(sums_path)
        .with_context(|| format!("failed to open {} for appending", sums_path.display()))?;
    writeln!(file, "{sum}  {}", file_path.display())
        .with_context(|| format!("failed to append to {}", sums_path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn compute_matches_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("abc.txt");
        fs::write(&file, "abc").unwrap();
        assert_eq!(compute(&file).unwrap(), ABC_SHA256);
    }

    #[test]
    fn lookup_finds_text_and_binary_entries() {
        let dir = tempfile::tempdir().unwrap();
        let text = dir.path().join("text.bin");
        let binary = dir.path().join("binary.bin");
        fs::write(&text, "x").unwrap();
        fs::write(&binary, "y").unwrap();

        let sums = dir.path().join("SHA256SUMS");
        fs::write(
            &sums,
            format!(
                "{}  {}\n{} *{}\n",
                "a".repeat(64),
                text.display(),
                "b".repeat(64),
                binary.display(),
            ),
        )
        .unwrap();

        assert_eq!(lookup(&sums, &text).unwrap(), Some("a".repeat(64)));
        assert_eq!(lookup(&sums, &binary).unwrap(), Some("b".repeat(64)));
        let other = dir.path().join("other.bin");
        assert_eq!(lookup(&sums, &other).unwrap(), None);
    }

    #[test]
    fn lookup_rejects_bad_separator() {
        let dir = tempfile::tempdir().unwrap();
        let sums = dir.path().join("SHA256SUMS");
        fs::write(&sums, format!("{}--/some/path\n", "a".repeat(64))).unwrap();
        let err = lookup(&sums, Path::new("/some/path")).unwrap_err().to_string();
        assert!(err.contains("unsupported SHA256SUMS format"));
    }

    #[test]
    fn lookup_rejects_non_hex_digest() {
        let dir = tempfile::tempdir().unwrap();
        let sums = dir.path().join("SHA256SUMS");
        fs::write(&sums, format!("{}  /some/path\n", "z".repeat(64))).unwrap();
        assert!(lookup(&sums, Path::new("/some/path")).is_err());
    }

    #[test]
    fn append_then_lookup_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("payload.bin");
        fs::write(&file, "abc").unwrap();
        let sums = dir.path().join("SHA256SUMS");

        let sum = compute(&file).unwrap();
        append(&sums, &file, &sum).unwrap();
        assert_eq!(lookup(&sums, &file).unwrap(), Some(ABC_SHA256.to_string()));
    }
}
