//! Append-only witness file for the audit chain.
//!
//! Each durable chain append also writes `RFC3339|index|chain_hash` to a
//! plain-text file. The witness is not signed; it exists so that a chain
//! file rolled back or truncated together with a re-signed envelope still
//! disagrees with an independent record.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::chain::ChainEntry;

#[derive(Debug, Clone)]
pub(crate) struct Witness {
    path: PathBuf,
}

impl Witness {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn append(&self, entry: &ChainEntry) -> io::Result<()> {
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path)?;
        file.write_all(format_line(entry).as_bytes())?;
        file.sync_data()
    }

    /// Replace the witness with one line per entry.
    ///
    /// Used after a re-sign, when every recorded hash changes.
    pub(crate) fn rewrite(&self, entries: &[ChainEntry]) -> io::Result<()> {
        let mut content = String::new();
        for entry in entries {
            content.push_str(&format_line(entry));
        }
        let tmp = self.path.with_extension("txt.tmp");
        {
            let mut options = OpenOptions::new();
            options.create(true).write(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(0o600);
            }
            let mut file = options.open(&tmp)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)
    }

    /// Compare the witness with `entries`; returns one message per problem.
    pub(crate) fn verify(&self, entries: &[ChainEntry]) -> Vec<String> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return if entries.is_empty() {
                    Vec::new()
                } else {
                    vec![format!(
                        "witness file missing while chain holds {} entries",
                        entries.len()
                    )]
                };
            },
            Err(e) => return vec![format!("witness file unreadable: {e}")],
        };

        let mut issues = Vec::new();
        let mut highest: Option<u64> = None;
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let Some((index, hash)) = parse_line(line) else {
                issues.push(format!("malformed witness line {}", line_no.saturating_add(1)));
                continue;
            };
            highest = Some(highest.map_or(index, |h| h.max(index)));
            match usize::try_from(index).ok().and_then(|i| entries.get(i)) {
                None => issues.push(format!(
                    "witness records entry {index} beyond chain length {} (truncation or rollback)",
                    entries.len()
                )),
                Some(entry) if entry.chain_hash.to_hex() != hash => {
                    issues.push(format!("witness hash mismatch at entry {index}"));
                },
                Some(_) => {},
            }
        }

        let witnessed = highest.map_or(0, |h| h.saturating_add(1));
        let chain_len = entries.len() as u64;
        if witnessed < chain_len {
            issues.push(format!(
                "chain entries {witnessed}..{chain_len} have no witness record"
            ));
        }
        issues
    }
}

fn format_line(entry: &ChainEntry) -> String {
    format!(
        "{}|{}|{}\n",
        entry.timestamp.to_rfc3339(),
        entry.index,
        entry.chain_hash.to_hex()
    )
}

fn parse_line(line: &str) -> Option<(u64, &str)> {
    let mut parts = line.splitn(3, '|');
    let _timestamp = parts.next()?;
    let index = parts.next()?.parse().ok()?;
    let hash = parts.next()?;
    Some((index, hash))
}
