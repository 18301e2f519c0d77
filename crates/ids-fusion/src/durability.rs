//! Durability sidecars: line-flushed append logs and throttled
//! full-rewrite lost-record dumps (spec.md §4.5).

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// An append-only, line-flushed log (`flow`, `protocol`, `merge`, attack
/// logs all use this shape).
pub struct AppendLog {
    writer: BufWriter<File>,
    fsync_each: bool,
}

impl AppendLog {
    pub fn open(path: impl AsRef<Path>, fsync_each: bool) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(AppendLog {
            writer: BufWriter::new(file),
            fsync_each,
        })
    }

    pub fn append_line(&mut self, line: &str) -> anyhow::Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        if self.fsync_each {
            self.writer.get_ref().sync_all()?;
        }
        Ok(())
    }
}

/// The two `lost` logs are rewritten in full on every cache mutation so
/// they always reflect current cache contents; throttled to at most one
/// rewrite per `min_interval` to avoid the O(Q)-per-event scalability cliff
/// spec.md §9 calls out (REDESIGN FLAG R5).
pub struct LostDump {
    path: PathBuf,
    min_interval: Duration,
    last_write: Option<Instant>,
}

impl LostDump {
    pub fn new(path: impl Into<PathBuf>, min_interval: Duration) -> Self {
        LostDump {
            path: path.into(),
            min_interval,
            last_write: None,
        }
    }

    /// Rewrites the dump from `lines` if the throttle window has elapsed.
    /// A caller that wants to force a final flush on shutdown should call
    /// [`LostDump::force_rewrite`] instead.
    pub fn maybe_rewrite<'a>(&mut self, lines: impl Iterator<Item = &'a str>) -> anyhow::Result<()> {
        let now = Instant::now();
        if let Some(last) = self.last_write {
            if now.duration_since(last) < self.min_interval {
                return Ok(());
            }
        }
        self.force_rewrite(lines)
    }

    pub fn force_rewrite<'a>(&mut self, lines: impl Iterator<Item = &'a str>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.path)?,
        );
        for line in lines {
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        self.last_write = Some(Instant::now());
        Ok(())
    }
}
