use crate::error::{Error, IoContext, Result};
use crc32fast::Hasher as Crc32;
use memmap2::Mmap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

const READ_BUF: usize = 8 * 1024;

/// A CRC-32 (zlib/gzip polynomial) value. Displays as 8 upper-case hex digits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Checksum(pub u32);

#[derive(Debug, thiserror::Error)]
#[error("invalid checksum {0:?}: expected 8 hex digits")]
pub struct ParseChecksumError(pub String);

impl Checksum {
    pub fn of(bytes: &[u8]) -> Self {
        let mut h = Crc32::new();
        h.update(bytes);
        Checksum(h.finalize())
    }

    /// Compare against a recorded hex string, ignoring case.
    pub fn matches(self, recorded: &str) -> bool {
        recorded.parse::<Checksum>().map(|c| c == self).unwrap_or(false)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

impl FromStr for Checksum {
    type Err = ParseChecksumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ParseChecksumError(s.to_string()));
        }
        u32::from_str_radix(s, 16).map(Checksum).map_err(|_| ParseChecksumError(s.to_string()))
    }
}

/// Stream a reader through the accumulator.
pub fn checksum_reader<R: Read>(mut r: R) -> io::Result<Checksum> {
    let mut h = Crc32::new();
    let mut buf = [0u8; READ_BUF];
    loop {
        let n = match r.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        h.update(&buf[..n]);
    }
    Ok(Checksum(h.finalize()))
}

/// CRC-32 of a file's current bytes. The file must exist and be regular.
pub fn checksum_file(path: &Path) -> Result<Checksum> {
    let md = match fs::metadata(path) {
        Ok(md) => md,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(Error::NotFound(path.to_path_buf()))
        }
        Err(e) => return Err(Error::io("stat", path, e)),
    };
    if !md.is_file() {
        return Err(Error::NotRegularFile(path.to_path_buf()));
    }
    let f = File::open(path).io_ctx("open", path)?;
    checksum_reader(f).io_ctx("read", path)
}

/// Memory-mapped variant used when verifying chunk files.
pub(crate) fn checksum_mapped(path: &Path) -> Result<Checksum> {
    let f = File::open(path).io_ctx("open chunk", path)?;
    if f.metadata().io_ctx("stat chunk", path)?.len() == 0 {
        return Ok(Checksum::of(&[]));
    }
    // SAFETY: the map is read-only and dropped before returning.
    let mmap = unsafe { Mmap::map(&f) }.io_ctx("map chunk", path)?;
    Ok(Checksum::of(&mmap))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors() {
        assert_eq!(Checksum::of(b"").to_string(), "00000000");
        assert_eq!(Checksum::of(b"123456789").to_string(), "CBF43926");
        assert_eq!(Checksum::of(b"hello").to_string(), "3610A686");
    }

    #[test]
    fn renders_zero_padded_upper_case() {
        assert_eq!(Checksum(0xAB).to_string(), "000000AB");
        assert_eq!(Checksum(0xdead_beef).to_string(), "DEADBEEF");
    }

    #[test]
    fn parse_and_match_ignore_case() {
        let c: Checksum = "cbf43926".parse().unwrap();
        assert_eq!(c, Checksum(0xCBF4_3926));
        assert!(Checksum::of(b"123456789").matches("cbf43926"));
        assert!(!Checksum::of(b"123456789").matches("CBF4392"));
        assert!("+BF43926".parse::<Checksum>().is_err());
        assert!("XYZ00000".parse::<Checksum>().is_err());
    }

    #[test]
    fn reader_matches_one_shot() {
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        let streamed = checksum_reader(&data[..]).unwrap();
        assert_eq!(streamed, Checksum::of(&data));
    }
}
