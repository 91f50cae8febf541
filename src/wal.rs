use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Frame one event as `[u32 len][bincode payload][u32 crc32]`, little-endian.
fn write_frame(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "ledger record too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read exactly `buf.len()` bytes. `Ok(false)` on a clean or torn end of file.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Result of reading a log back from disk.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// A torn or corrupt tail was found and ignored.
    pub discarded_tail: bool,
    /// Byte length of the intact prefix.
    pub valid_len: u64,
}

/// Append-only ledger log.
///
/// A crash can leave a partially written last frame; replay stops at the
/// first frame whose length, payload or checksum does not check out.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Open for appends, counting `existing` replayed records toward the
    /// next compaction.
    pub fn resume(path: &Path, existing: u64) -> io::Result<Self> {
        let mut wal = Self::open(path)?;
        wal.appends_since_compact = existing;
        Ok(wal)
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one event. Durable only after `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        write_frame(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    fn compact_path(path: &Path) -> PathBuf {
        path.with_extension("wal.compact")
    }

    /// Write a minimal event set to a side file and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_path(path))?);
        for event in events {
            write_frame(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the side file over the log and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::compact_path(&self.path), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Cut a damaged log back to its intact prefix so new appends are not
    /// stranded behind a torn frame.
    pub fn truncate(path: &Path, valid_len: u64) -> io::Result<()> {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(valid_len)?;
        file.sync_all()
    }

    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();

        loop {
            let mut len_buf = [0u8; 4];
            if !read_full(&mut reader, &mut len_buf)? {
                break;
            }
            let mut payload = vec![0u8; u32::from_le_bytes(len_buf) as usize];
            let mut crc_buf = [0u8; 4];
            if !read_full(&mut reader, &mut payload)? || !read_full(&mut reader, &mut crc_buf)? {
                replay.discarded_tail = true;
                break;
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                replay.discarded_tail = true;
                break;
            }
            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => {
                    replay.events.push(event);
                    replay.valid_len += 8 + payload.len() as u64;
                }
                Err(_) => {
                    replay.discarded_tail = true;
                    break;
                }
            }
        }

        Ok(replay)
    }
}
