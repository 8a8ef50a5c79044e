use crate::audit::{self, AuditEvent, AuditSink, TracingAudit};
use crate::checksum::{checksum_mapped, Checksum};
use crate::error::{Error, IoContext, Result};
use crate::lock::BaseLock;
use crate::manifest::{self, ChunkManifest, ChunkRecord};
use crate::progress::Progress;
use crate::workspace::Workspace;
use rayon::prelude::*;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// 64 KiB, the block size used for every uploaded file.
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

pub struct SplitConfig {
    pub block_size: usize,
    pub owner: String,
}

impl SplitConfig {
    pub fn new(owner: impl Into<String>) -> Self {
        Self { block_size: DEFAULT_BLOCK_SIZE, owner: owner.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChunkStatus {
    Match,
    Mismatch { expected: String, actual: String },
    Missing,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkVerification {
    pub name: String,
    pub status: ChunkStatus,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VerifySummary {
    pub matched: usize,
    pub mismatched: usize,
    pub missing: usize,
}

impl VerifySummary {
    pub fn of(results: &[ChunkVerification]) -> Self {
        let mut s = Self::default();
        for r in results {
            match r.status {
                ChunkStatus::Match => s.matched += 1,
                ChunkStatus::Mismatch { .. } => s.mismatched += 1,
                ChunkStatus::Missing => s.missing += 1,
            }
        }
        s
    }

    pub fn is_intact(&self) -> bool {
        self.mismatched == 0 && self.missing == 0
    }
}

/// Splits, verifies and reassembles chunked files inside one workspace.
/// Holds no file state; the audit sink and progress handle are shared.
pub struct ChunkEngine {
    actor: String,
    container: Option<String>,
    audit: Arc<dyn AuditSink>,
    progress: Progress,
}

impl ChunkEngine {
    pub fn new(actor: impl Into<String>, audit: Arc<dyn AuditSink>) -> Self {
        Self { actor: actor.into(), container: None, audit, progress: Progress::default() }
    }

    /// Tag every audit event with the storage container holding the chunks.
    pub fn with_container(mut self, id: impl Into<String>) -> Self {
        self.container = Some(id.into());
        self
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    /// Stream `source` into `<base>.chunk1..N` under the workspace and return
    /// the manifest describing them. An empty source yields zero chunks.
    pub fn split(
        &self,
        source: &Path,
        ws: &Workspace,
        base: &str,
        cfg: &SplitConfig,
    ) -> Result<ChunkManifest> {
        let _lock = self.prepare(source, ws, base, cfg)?;
        self.split_locked(source, ws, base, cfg)
    }

    /// Split, then write `<base>.meta.json` atomically next to the chunks.
    pub fn ingest(
        &self,
        source: &Path,
        ws: &Workspace,
        base: &str,
        cfg: &SplitConfig,
    ) -> Result<(ChunkManifest, PathBuf)> {
        let _lock = self.prepare(source, ws, base, cfg)?;
        let mf = self.split_locked(source, ws, base, cfg)?;
        let path = ws.resolve_flat(&manifest::manifest_name(base))?;
        manifest::save(&path, &mf)?;
        info!(manifest = %path.display(), "manifest written");
        Ok((mf, path))
    }

    fn prepare(
        &self,
        source: &Path,
        ws: &Workspace,
        base: &str,
        cfg: &SplitConfig,
    ) -> Result<BaseLock> {
        if cfg.block_size == 0 {
            return Err(Error::InvalidBlockSize);
        }
        if cfg.owner.trim().is_empty() {
            return Err(Error::InvalidName {
                name: cfg.owner.clone(),
                reason: "owner must not be empty",
            });
        }
        ws.resolve_flat(base)?;
        match fs::metadata(source) {
            Ok(md) if md.is_file() => {}
            Ok(_) => return Err(Error::NotRegularFile(source.to_path_buf())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound(source.to_path_buf()))
            }
            Err(e) => return Err(Error::io("stat source", source, e)),
        }
        ws.ensure()?;
        BaseLock::acquire(ws, base)
    }

    fn split_locked(
        &self,
        source: &Path,
        ws: &Workspace,
        base: &str,
        cfg: &SplitConfig,
    ) -> Result<ChunkManifest> {
        let f = File::open(source).io_ctx("open source", source)?;
        let size = f.metadata().io_ctx("stat source", source)?.len();
        let blocks = size.div_ceil(cfg.block_size as u64) as usize;
        self.progress.set_stage("Splitting");
        self.progress.set_blocks_total(blocks);
        self.progress.reset_bytes(size as usize);
        self.progress.start();

        let written = self.write_blocks(BufReader::new(f), source, ws, base, cfg.block_size);
        self.progress.stop();
        let chunks = written?;

        let mf = ChunkManifest::new(cfg.owner.clone(), chunks);
        info!(base, chunks = mf.total_chunks, bytes = size, "split complete");
        self.record(
            AuditEvent::new(
                &self.actor,
                audit::FILE_CHUNKED,
                format!(
                    "{} chunk(s), {} bytes, block size {}",
                    mf.total_chunks, size, cfg.block_size
                ),
            )
            .target(base),
        );
        Ok(mf)
    }

    fn write_blocks<R: Read>(
        &self,
        mut reader: R,
        source: &Path,
        ws: &Workspace,
        base: &str,
        block_size: usize,
    ) -> Result<Vec<ChunkRecord>> {
        let mut buf = vec![0u8; block_size];
        let mut chunks = Vec::new();
        loop {
            self.progress.check()?;
            let n = read_block(&mut reader, &mut buf).io_ctx("read source", source)?;
            if n == 0 {
                return Ok(chunks);
            }
            let block = &buf[..n];
            let name = ChunkManifest::chunk_name(base, chunks.len() + 1);
            let path = ws.resolve_flat(&name)?;
            fs::write(&path, block).io_ctx("write chunk", &path)?;
            let crc = Checksum::of(block);
            debug!(chunk = %name, size = n, crc32 = %crc, "wrote chunk");
            chunks.push(ChunkRecord { name, crc32: crc.to_string(), size: Some(n as u64) });
            self.progress.inc_block();
            self.progress.add_bytes(n);
        }
    }

    /// Recompute every recorded chunk's checksum. Missing and corrupted chunks
    /// are outcomes, not errors; results follow manifest order.
    pub fn verify(&self, ws: &Workspace, mf: &ChunkManifest) -> Result<Vec<ChunkVerification>> {
        self.progress.set_stage("Verifying");
        self.progress.set_blocks_total(mf.chunks.len());
        self.progress.start();
        let results = mf
            .chunks
            .par_iter()
            .map(|rec| -> Result<ChunkVerification> {
                self.progress.check()?;
                let path = ws.resolve_flat(&rec.name)?;
                let status = match fs::metadata(&path) {
                    Ok(md) if md.is_file() => {
                        let actual = checksum_mapped(&path)?;
                        if actual.matches(&rec.crc32) {
                            ChunkStatus::Match
                        } else {
                            ChunkStatus::Mismatch {
                                expected: rec.crc32.to_ascii_uppercase(),
                                actual: actual.to_string(),
                            }
                        }
                    }
                    Ok(_) => ChunkStatus::Missing,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => ChunkStatus::Missing,
                    Err(e) => return Err(Error::io("stat chunk", &path, e)),
                };
                debug!(chunk = %rec.name, ?status, "verified chunk");
                self.progress.inc_block();
                Ok(ChunkVerification { name: rec.name.clone(), status })
            })
            .collect::<Result<Vec<_>>>();
        self.progress.stop();
        let results = results?;

        let s = VerifySummary::of(&results);
        info!(matched = s.matched, mismatched = s.mismatched, missing = s.missing, "verify complete");
        self.record(
            AuditEvent::new(
                &self.actor,
                audit::CHUNKS_VERIFIED,
                format!("ok={} bad={} missing={}", s.matched, s.mismatched, s.missing),
            ),
        );
        Ok(results)
    }

    /// Concatenate chunks in manifest order into `dest`, checking each one
    /// first. A partial `dest` is removed on failure.
    pub fn reassemble(&self, ws: &Workspace, mf: &ChunkManifest, dest: &Path) -> Result<u64> {
        let out = File::create(dest).io_ctx("create output", dest)?;
        let mut out = BufWriter::new(out);
        self.progress.set_stage("Reassembling");
        self.progress.set_blocks_total(mf.chunks.len());
        self.progress.start();
        let written = match self.copy_chunks(ws, mf, &mut out, dest) {
            Ok(n) => out.flush().io_ctx("write output", dest).map(|()| n),
            Err(e) => Err(e),
        };
        self.progress.stop();
        match written {
            Ok(n) => {
                self.record(
                    AuditEvent::new(
                        &self.actor,
                        audit::FILE_REASSEMBLED,
                        format!("{} chunk(s), {} bytes", mf.total_chunks, n),
                    )
                    .target(dest.display().to_string()),
                );
                Ok(n)
            }
            Err(e) => {
                drop(out);
                let _ = fs::remove_file(dest);
                Err(e)
            }
        }
    }

    fn record(&self, event: AuditEvent) {
        let event = match &self.container {
            Some(id) => event.container(id.as_str()),
            None => event,
        };
        audit::emit(&*self.audit, event);
    }

    fn copy_chunks<W: Write>(
        &self,
        ws: &Workspace,
        mf: &ChunkManifest,
        out: &mut W,
        dest: &Path,
    ) -> Result<u64> {
        let mut total = 0u64;
        for rec in &mf.chunks {
            self.progress.check()?;
            let path = ws.resolve_flat(&rec.name)?;
            let bytes = match fs::read(&path) {
                Ok(b) => b,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(Error::ChunkMissing { name: rec.name.clone() })
                }
                Err(e) => return Err(Error::io("read chunk", &path, e)),
            };
            let actual = Checksum::of(&bytes);
            if !actual.matches(&rec.crc32) {
                return Err(Error::ChunkMismatch {
                    name: rec.name.clone(),
                    expected: rec.crc32.to_ascii_uppercase(),
                    actual: actual.to_string(),
                });
            }
            out.write_all(&bytes).io_ctx("write output", dest)?;
            total += bytes.len() as u64;
            self.progress.inc_block();
        }
        Ok(total)
    }
}

impl Default for ChunkEngine {
    fn default() -> Self {
        Self::new("system", Arc::new(TracingAudit))
    }
}

/// Presence of each recorded chunk, in manifest order. No checksums.
pub fn existence(ws: &Workspace, mf: &ChunkManifest) -> Result<Vec<(String, bool)>> {
    mf.chunks
        .par_iter()
        .map(|rec| {
            let path = ws.resolve_flat(&rec.name)?;
            Ok((rec.name.clone(), path.is_file()))
        })
        .collect()
}

/// Workspace files named `<base>.chunk*` or `<base>_chunk*`, ordered by chunk number.
pub fn find_chunk_files(ws: &Workspace, base: &str) -> Result<Vec<String>> {
    ws.resolve_flat(base)?;
    let prefixes = [format!("{base}.chunk"), format!("{base}_chunk")];
    let mut found: Vec<(u64, String)> = ws
        .entries()?
        .into_iter()
        .filter(|e| e.is_file)
        .filter_map(|e| {
            let suffix = prefixes.iter().find_map(|p| e.name.strip_prefix(p.as_str()))?;
            let index = suffix.parse::<u64>().unwrap_or(u64::MAX);
            Some((index, e.name))
        })
        .collect();
    found.sort();
    Ok(found.into_iter().map(|(_, name)| name).collect())
}

/// Fill `buf` unless the reader ends first; returns the bytes read.
fn read_block<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
