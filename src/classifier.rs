//! Black/white list classification.
//!
//! A list file holds one entry per line: either an IPv4 address / CIDR that
//! goes straight into an ipset, or a domain that dnsmasq resolves and binds
//! into the ipset at lookup time. Blank lines and `#` comments are skipped.

use ipnet::Ipv4Net;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{CompileError, Result};
use crate::fs_abstraction::FileSystem;

/// One classified list line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry<'a> {
    /// Dotted-quad address, optionally with a `/0`..`/32` prefix
    Ip(&'a str),
    /// Anything else
    Domain(&'a str),
}

impl<'a> Entry<'a> {
    pub fn is_ip_literal(&self) -> bool {
        matches!(self, Entry::Ip(_))
    }

    pub fn value(&self) -> &'a str {
        match self {
            Entry::Ip(v) | Entry::Domain(v) => v,
        }
    }
}

/// Strict IPv4 literal check: `a.b.c.d` or `a.b.c.d/len` with len in 0..=32.
pub fn is_ip_literal(token: &str) -> bool {
    match token.split_once('/') {
        Some((addr, prefix)) => {
            prefix.chars().all(|c| c.is_ascii_digit())
                && addr.parse::<Ipv4Addr>().is_ok()
                && token.parse::<Ipv4Net>().is_ok()
        }
        None => token.parse::<Ipv4Addr>().is_ok(),
    }
}

/// Classify a single raw line. Returns `None` for blank and comment lines.
pub fn classify_line(line: &str) -> Option<Entry<'_>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }

    if is_ip_literal(trimmed) {
        Some(Entry::Ip(trimmed))
    } else {
        Some(Entry::Domain(trimmed))
    }
}

/// Lazily classify every line of `content`.
pub fn classify(content: &str) -> impl Iterator<Item = Entry<'_>> {
    content.lines().filter_map(classify_line)
}

/// A list file read into memory, classified on demand.
#[derive(Debug, Clone)]
pub struct ListFile {
    path: PathBuf,
    content: String,
}

impl ListFile {
    pub fn read<F: FileSystem + ?Sized>(fs: &F, path: &Path) -> Result<Self> {
        let content = fs
            .read_to_string(path)
            .map_err(|e| CompileError::io(path, e))?;
        debug!("Read list {:?} ({} bytes)", path, content.len());
        Ok(Self {
            path: path.to_path_buf(),
            content,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> impl Iterator<Item = Entry<'_>> {
        classify(&self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs_abstraction::MockFileSystem;
    use std::io;

    #[test]
    fn test_classify_skips_blank_and_comments() {
        let content = "\n# comment\n   \n  # indented comment\nexample.com\n";
        let entries: Vec<_> = classify(content).collect();
        assert_eq!(entries, vec![Entry::Domain("example.com")]);
    }

    #[test]
    fn test_classify_trims_lines() {
        let entries: Vec<_> = classify("  10.0.0.0/8  \r\n\tgoogle.com\t").collect();
        assert_eq!(
            entries,
            vec![Entry::Ip("10.0.0.0/8"), Entry::Domain("google.com")]
        );
    }

    #[test]
    fn test_ip_literals() {
        assert!(is_ip_literal("1.2.3.4"));
        assert!(is_ip_literal("0.0.0.0/0"));
        assert!(is_ip_literal("192.168.0.0/16"));
        assert!(is_ip_literal("255.255.255.255/32"));
        // Host bits set are still a literal, ipset normalises them
        assert!(is_ip_literal("10.1.2.3/8"));
    }

    #[test]
    fn test_malformed_ip_like_tokens_are_domains() {
        assert!(!is_ip_literal("256.1.1.1"));
        assert!(!is_ip_literal("1.2.3"));
        assert!(!is_ip_literal("1.2.3.4.5"));
        assert!(!is_ip_literal("1.2.3.4/33"));
        assert!(!is_ip_literal("1.2.3.4/"));
        assert!(!is_ip_literal("1.2.3.4/+8"));
        assert!(!is_ip_literal("1.2.3.4/8/8"));
        assert!(!is_ip_literal("::1"));
        assert!(!is_ip_literal("1.2.3.4.example.com"));

        assert_eq!(classify_line("1.2.3.4/33"), Some(Entry::Domain("1.2.3.4/33")));
    }

    #[test]
    fn test_entry_accessors() {
        let ip = Entry::Ip("10.0.0.0/8");
        let domain = Entry::Domain("example.com");
        assert!(ip.is_ip_literal());
        assert!(!domain.is_ip_literal());
        assert_eq!(ip.value(), "10.0.0.0/8");
        assert_eq!(domain.value(), "example.com");
    }

    #[test]
    fn test_list_file_read_error_is_io() {
        let mut fs = MockFileSystem::new();
        fs.expect_read_to_string()
            .returning(|_| Err(io::Error::new(io::ErrorKind::NotFound, "missing")));

        let err = ListFile::read(&fs, Path::new("/lists/gfwlist.txt")).unwrap_err();
        assert!(matches!(err, CompileError::Io { .. }));
        assert!(err.to_string().contains("gfwlist.txt"));
    }

    #[test]
    fn test_list_file_entries() {
        let mut fs = MockFileSystem::new();
        fs.expect_read_to_string()
            .returning(|_| Ok("# header\n8.8.8.8\ntwitter.com\n".to_string()));

        let list = ListFile::read(&fs, Path::new("/lists/extra.txt")).unwrap();
        assert_eq!(list.path(), Path::new("/lists/extra.txt"));
        let entries: Vec<_> = list.entries().collect();
        assert_eq!(
            entries,
            vec![Entry::Ip("8.8.8.8"), Entry::Domain("twitter.com")]
        );
    }
}
