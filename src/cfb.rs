//! Compound File Binary format MS-CFB
//!
//! Parses the container header, the sector allocation tables (FAT, DIFAT and mini FAT) and the
//! directory, then defragments streams on demand with [`Cfb::get_stream`].

use std::fmt;
use std::io::Read;
use std::sync::Arc;

use encoding_rs::UTF_16LE;
use log::debug;

use crate::cursor::{ByteCursor, CancelToken, CursorError, LoadLimits};
use crate::diagnostics::{Diagnostic, Location, LogSink, Sink};
use crate::utils::{read_u16, read_u32, read_u64, to_u32};

const OLE_SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const ENDOFCHAIN: u32 = 0xFFFF_FFFE;
const FREESECT: u32 = 0xFFFF_FFFF;
const MAXREGSECT: u32 = 0xFFFF_FFFA;
const NOSTREAM: u32 = 0xFFFF_FFFF;

const HEADER_LEN: usize = 512;
const HEADER_DIFAT_LEN: usize = 109;
const DIRECTORY_LEN: usize = 128;
const ROOT_ENTRY: &str = "Root Entry";

/// A Cfb specific error
#[derive(Debug)]
pub enum CfbError {
    /// Error while reading the raw bytes
    Cursor(CursorError),
    /// Bad signature, not a compound file
    UnrecognizedContainer,
    /// Unsupported sector shift
    SectorShift(u16),
    /// Inconsistent allocation tables or directory (cycles, dangling ids, truncated chains)
    CorruptContainer(String),
    /// No stream with that name
    StreamNotFound(String),
}

from_err!(CursorError, CfbError, Cursor);

impl From<std::io::Error> for CfbError {
    fn from(e: std::io::Error) -> CfbError {
        CfbError::Cursor(CursorError::Io(e))
    }
}

impl fmt::Display for CfbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CfbError::Cursor(e) => write!(f, "{e}"),
            CfbError::UnrecognizedContainer => {
                write!(f, "Invalid OLE signature (not an office document?)")
            }
            CfbError::SectorShift(s) => {
                write!(f, "Invalid sector shift, expecting 0x09 or 0x0C, got {s:#x}")
            }
            CfbError::CorruptContainer(e) => write!(f, "Corrupt compound file: {e}"),
            CfbError::StreamNotFound(name) => write!(f, "Cannot find '{name}' stream"),
        }
    }
}

impl std::error::Error for CfbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CfbError::Cursor(e) => Some(e),
            _ => None,
        }
    }
}

fn corrupt<S: Into<String>>(msg: S) -> CfbError {
    CfbError::CorruptContainer(msg.into())
}

/// Directory entry object type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    /// Unallocated entry
    Empty,
    /// Storage object (a folder)
    Storage,
    /// Stream object (a file)
    Stream,
    /// The root storage
    Root,
    /// Unknown object type
    Unknown(u8),
}

impl From<u8> for EntryType {
    fn from(v: u8) -> Self {
        match v {
            0 => EntryType::Empty,
            1 => EntryType::Storage,
            2 => EntryType::Stream,
            5 => EntryType::Root,
            v => EntryType::Unknown(v),
        }
    }
}

/// A directory (property storage) entry
///
/// Entries form a tree: `child` points into a red-black tree of siblings linked by `left` and
/// `right`.
#[derive(Debug, Clone)]
pub struct Directory {
    name: String,
    typ: EntryType,
    left: u32,
    right: u32,
    child: u32,
    start: u32,
    len: u64,
}

impl Directory {
    fn from_slice(buf: &[u8], sector_size: usize) -> Directory {
        let name_len = (read_u16(&buf[64..66]) as usize).min(64);
        let (name, _) = UTF_16LE.decode_without_bom_handling(&buf[..name_len]);
        let name = name.trim_end_matches('\0').to_string();
        let len = if sector_size == 512 {
            // high dword may contain garbage for version 3 files
            read_u32(&buf[120..124]) as u64
        } else {
            read_u64(&buf[120..128])
        };
        Directory {
            name,
            typ: EntryType::from(buf[66]),
            left: read_u32(&buf[68..72]),
            right: read_u32(&buf[72..76]),
            child: read_u32(&buf[76..80]),
            start: read_u32(&buf[116..120]),
            len,
        }
    }

    /// Entry name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entry type
    pub fn entry_type(&self) -> EntryType {
        self.typ
    }

    /// Declared stream size in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Is the declared stream empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn matches(&self, name: &str) -> bool {
        !self.name.is_empty() && self.name.eq_ignore_ascii_case(name)
    }
}

/// A hidden struct which defines cfb files structure
#[derive(Debug)]
struct Header {
    sector_size: usize,
    mini_sector_size: usize,
    fat_len: usize,
    dir_start: u32,
    mini_cutoff: u64,
    mini_fat_start: u32,
    mini_fat_len: usize,
    difat_start: u32,
    difat_len: usize,
    difat: Vec<u32>,
}

impl Header {
    fn parse(buf: &[u8]) -> Result<Header, CfbError> {
        if buf.len() < HEADER_LEN {
            return Err(CfbError::UnrecognizedContainer);
        }
        if buf[..8] != OLE_SIGNATURE {
            return Err(CfbError::UnrecognizedContainer);
        }
        let sector_size = match read_u16(&buf[30..32]) {
            0x0009 => 512,
            0x000C => 4096,
            s => return Err(CfbError::SectorShift(s)),
        };
        let mini_shift = read_u16(&buf[32..34]);
        if mini_shift >= 12 {
            return Err(corrupt(format!("invalid mini sector shift {mini_shift}")));
        }
        Ok(Header {
            sector_size,
            mini_sector_size: 1 << mini_shift,
            fat_len: read_u32(&buf[44..48]) as usize,
            dir_start: read_u32(&buf[48..52]),
            mini_cutoff: read_u32(&buf[56..60]) as u64,
            mini_fat_start: read_u32(&buf[60..64]),
            mini_fat_len: read_u32(&buf[64..68]) as usize,
            difat_start: read_u32(&buf[68..72]),
            difat_len: read_u32(&buf[72..76]) as usize,
            difat: to_u32(&buf[76..76 + 4 * HEADER_DIFAT_LEN]).collect(),
        })
    }
}

/// A struct for managing Compound File Binary format
///
/// Built once per input file, read-only afterwards, so a `Cfb` can be shared between threads.
pub struct Cfb {
    data: ByteCursor,
    sector_size: usize,
    mini_sector_size: usize,
    mini_cutoff: u64,
    fats: Vec<u32>,
    mini_fats: Vec<u32>,
    mini_stream: Vec<u8>,
    directories: Vec<Directory>,
    root: usize,
    sink: Sink,
}

impl fmt::Debug for Cfb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cfb")
            .field("len", &self.data.len())
            .field("sector_size", &self.sector_size)
            .field("fats", &self.fats.len())
            .field("mini_fats", &self.mini_fats.len())
            .field("directories", &self.directories)
            .finish()
    }
}

impl Cfb {
    /// Reads a whole compound file from `reader`
    pub fn new<R: Read>(
        reader: &mut R,
        limits: LoadLimits,
        cancel: &CancelToken,
        sink: Sink,
    ) -> Result<Cfb, CfbError> {
        let data = ByteCursor::load(reader, limits, cancel)?;
        Cfb::from_cursor(data, sink)
    }

    /// Parses an in-memory compound file, reporting to the `log` crate
    pub fn from_bytes(data: Vec<u8>) -> Result<Cfb, CfbError> {
        Cfb::from_cursor(ByteCursor::new(data), Arc::new(LogSink))
    }

    /// Parses an in-memory compound file
    pub fn from_cursor(mut data: ByteCursor, sink: Sink) -> Result<Cfb, CfbError> {
        debug!("load header");
        let h = Header::parse(data.read_at(0, HEADER_LEN.min(data.len()))?)?;

        // pad a truncated last sector rather than failing on its final bytes
        let rem = data.len() % h.sector_size;
        if rem != 0 {
            sink.warn(
                Diagnostic::warning(format!(
                    "file length {} is not a multiple of the sector size {}",
                    data.len(),
                    h.sector_size
                ))
                .at(Location::default().at(data.len())),
            );
            let mut v = data.into_inner();
            v.resize(v.len() + h.sector_size - rem, 0);
            data = ByteCursor::new(v);
        }

        let mut cfb = Cfb {
            data,
            sector_size: h.sector_size,
            mini_sector_size: h.mini_sector_size,
            mini_cutoff: h.mini_cutoff,
            fats: Vec::new(),
            mini_fats: Vec::new(),
            mini_stream: Vec::new(),
            directories: Vec::new(),
            root: 0,
            sink,
        };

        debug!("load difat");
        let fat_sectors = cfb.load_difat(&h)?;

        debug!("load fat");
        let mut fats = Vec::with_capacity(fat_sectors.len() * h.sector_size / 4);
        for id in fat_sectors {
            fats.extend(to_u32(cfb.sector(id)?));
        }
        cfb.fats = fats;

        debug!("load minifat");
        cfb.mini_fats = if h.mini_fat_len == 0
            || h.mini_fat_start == ENDOFCHAIN
            || h.mini_fat_start == FREESECT
        {
            cfb.sink
                .warn(Diagnostic::warning("compound file declares no mini stream"));
            Vec::new()
        } else {
            let ids = walk_chain(h.mini_fat_start, &cfb.fats, "mini fat")?;
            let mut minifat = Vec::with_capacity(ids.len() * h.sector_size / 4);
            for id in ids {
                minifat.extend(to_u32(cfb.sector(id)?));
            }
            minifat
        };

        debug!("load directories");
        cfb.load_directories(h.dir_start)?;

        debug!("load ministream");
        let (start, len) = {
            let root = &cfb.directories[cfb.root];
            (root.start, root.len)
        };
        if start != ENDOFCHAIN && start != FREESECT && len > 0 {
            cfb.mini_stream = cfb.read_big(start, len, ROOT_ENTRY)?;
        }

        Ok(cfb)
    }

    /// Collects the FAT sector ids from the header and the DIFAT chain
    fn load_difat(&self, h: &Header) -> Result<Vec<u32>, CfbError> {
        let mut ids: Vec<u32> = h.difat.clone();
        let per_sector = self.sector_size / 4 - 1;
        let mut visited = vec![false; self.sector_count()];
        let mut sector_id = h.difat_start;
        let mut count = 0;
        while sector_id != ENDOFCHAIN && sector_id != FREESECT {
            let seen = visited.get_mut(sector_id as usize).ok_or_else(|| {
                corrupt(format!("difat sector {sector_id} beyond end of file"))
            })?;
            if std::mem::replace(seen, true) {
                return Err(corrupt(format!("difat chain revisits sector {sector_id}")));
            }
            let sector = self.sector(sector_id)?;
            ids.extend(to_u32(&sector[..4 * per_sector]));
            sector_id = read_u32(&sector[4 * per_sector..]);
            count += 1;
        }
        if count != h.difat_len {
            self.sink.warn(Diagnostic::warning(format!(
                "header declares {} difat sectors, found {count}",
                h.difat_len
            )));
        }
        let ids: Vec<u32> = ids.into_iter().filter(|id| *id <= MAXREGSECT).collect();
        if ids.len() < h.fat_len {
            return Err(corrupt(format!(
                "header declares {} fat sectors, found {}",
                h.fat_len,
                ids.len()
            )));
        }
        Ok(ids.into_iter().take(h.fat_len).collect())
    }

    fn load_directories(&mut self, start: u32) -> Result<(), CfbError> {
        let ids = walk_chain(start, &self.fats, "directory")?;
        let mut dirs = Vec::with_capacity(ids.len() * self.sector_size / DIRECTORY_LEN);
        for id in ids {
            let sector = self.sector(id)?;
            dirs.extend(
                sector
                    .chunks_exact(DIRECTORY_LEN)
                    .map(|c| Directory::from_slice(c, self.sector_size)),
            );
        }
        if dirs.is_empty() {
            return Err(corrupt("empty directory"));
        }

        self.root = match dirs
            .iter()
            .position(|d| d.typ == EntryType::Root && d.matches(ROOT_ENTRY))
            .or_else(|| dirs.iter().position(|d| d.matches(ROOT_ENTRY)))
        {
            Some(i) => i,
            None => {
                self.sink.warn(Diagnostic::warning(
                    "no 'Root Entry' directory, using first entry as root",
                ));
                0
            }
        };

        for (i, d) in dirs.iter().enumerate() {
            if i != self.root && d.name.is_empty() && d.typ != EntryType::Empty {
                self.sink.warn(Diagnostic::warning(format!(
                    "directory entry {i} has no name, skipping it"
                )));
            }
        }
        self.directories = dirs;
        Ok(())
    }

    fn sector_count(&self) -> usize {
        (self.data.len() / self.sector_size).saturating_sub(1)
    }

    /// Gets the sector `id`, the header occupying the first sector slot
    fn sector(&self, id: u32) -> Result<&[u8], CfbError> {
        let start = (id as usize + 1) * self.sector_size;
        self.data
            .read_at(start, self.sector_size)
            .map_err(|_| corrupt(format!("sector {id} beyond end of file")))
    }

    fn read_big(&self, start: u32, len: u64, name: &str) -> Result<Vec<u8>, CfbError> {
        let ids = walk_chain(start, &self.fats, name)?;
        let mut stream = Vec::with_capacity(ids.len() * self.sector_size);
        for id in ids {
            stream.extend_from_slice(self.sector(id)?);
        }
        truncate(stream, len, name)
    }

    fn read_mini(&self, start: u32, len: u64, name: &str) -> Result<Vec<u8>, CfbError> {
        let ids = walk_chain(start, &self.mini_fats, name)?;
        let size = self.mini_sector_size;
        let mut stream = Vec::with_capacity(ids.len() * size);
        for id in ids {
            let start = id as usize * size;
            let sector = self.mini_stream.get(start..start + size).ok_or_else(|| {
                corrupt(format!("mini sector {id} beyond end of mini stream"))
            })?;
            stream.extend_from_slice(sector);
        }
        truncate(stream, len, name)
    }

    /// All directory entries, in storage order
    pub fn directories(&self) -> &[Directory] {
        &self.directories
    }

    /// Names of all stream entries
    pub fn streams(&self) -> impl Iterator<Item = &str> {
        self.directories
            .iter()
            .filter(|d| d.typ == EntryType::Stream && !d.name.is_empty())
            .map(|d| d.name.as_str())
    }

    /// Is there a stream or storage named `name`
    pub fn has_stream(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Gets a stream by name out of directories
    ///
    /// The returned bytes are the defragmented stream, truncated to its declared size.
    pub fn get_stream(&self, name: &str) -> Result<Vec<u8>, CfbError> {
        debug!("get stream {name}");
        let d = self
            .find(name)
            .map(|i| &self.directories[i])
            .ok_or_else(|| CfbError::StreamNotFound(name.to_string()))?;
        if d.len == 0 {
            Ok(Vec::new())
        } else if d.len < self.mini_cutoff {
            self.read_mini(d.start, d.len, name)
        } else {
            self.read_big(d.start, d.len, name)
        }
    }

    /// Finds a directory entry, first by walking the tree under the root then by a flat scan
    fn find(&self, name: &str) -> Option<usize> {
        let mut budget = self.directories.len();
        match self.find_in_tree(name, self.root, &mut budget) {
            Ok(Some(i)) => return Some(i),
            Ok(None) => (),
            Err(()) => self.sink.warn(Diagnostic::warning(
                "directory tree is cyclic, falling back to a linear scan",
            )),
        }
        let mut found = self
            .directories
            .iter()
            .enumerate()
            .filter(|(i, d)| *i != self.root && d.matches(name))
            .map(|(i, _)| i);
        let first = found.next()?;
        if found.next().is_some() {
            self.sink.warn(Diagnostic::warning(format!(
                "several directory entries named '{name}', using the first one"
            )));
        }
        Some(first)
    }

    /// Looks at the child of `base`, then its chain of left siblings, then its chain of right
    /// siblings, then moves down to the child and starts over
    ///
    /// Some producers put entries where only this exact order finds them. `budget` bounds the
    /// number of visited entries, `Err` means the links loop.
    fn find_in_tree(
        &self,
        name: &str,
        mut base: usize,
        budget: &mut usize,
    ) -> Result<Option<usize>, ()> {
        while let Some(child) = self.link(self.directories[base].child) {
            spend(budget)?;
            if self.directories[child].matches(name) {
                return Ok(Some(child));
            }

            let mut prev = child;
            while let Some(p) = self.link(self.directories[prev].left) {
                spend(budget)?;
                if self.directories[p].matches(name) {
                    return Ok(Some(p));
                }
                prev = p;
            }

            let mut next = child;
            while let Some(n) = self.link(self.directories[next].right) {
                spend(budget)?;
                if self.directories[n].matches(name) {
                    return Ok(Some(n));
                }
                next = n;
            }

            base = child;
        }
        Ok(None)
    }

    fn link(&self, id: u32) -> Option<usize> {
        if id == NOSTREAM {
            None
        } else {
            Some(id as usize).filter(|i| *i < self.directories.len())
        }
    }
}

fn spend(budget: &mut usize) -> Result<(), ()> {
    if *budget == 0 {
        return Err(());
    }
    *budget -= 1;
    Ok(())
}

/// Follows an allocation chain, failing on any cycle or dangling sector id
///
/// Each step marks a table slot, so the walk is bounded by the table length.
fn walk_chain(start: u32, table: &[u32], name: &str) -> Result<Vec<u32>, CfbError> {
    let mut ids = Vec::new();
    if start == ENDOFCHAIN || start == FREESECT {
        return Ok(ids);
    }
    let mut visited = vec![false; table.len()];
    let mut id = start;
    while id != ENDOFCHAIN {
        if id > MAXREGSECT {
            return Err(corrupt(format!(
                "'{name}' chain contains special sector id {id:#x}"
            )));
        }
        let i = id as usize;
        let (next, seen) = match (table.get(i), visited.get_mut(i)) {
            (Some(next), Some(seen)) => (*next, seen),
            _ => {
                return Err(corrupt(format!(
                    "'{name}' chain references sector {id} outside of the allocation table ({})",
                    table.len()
                )))
            }
        };
        if std::mem::replace(seen, true) {
            return Err(corrupt(format!("'{name}' chain revisits sector {id}")));
        }
        ids.push(id);
        id = next;
    }
    Ok(ids)
}

fn truncate(mut stream: Vec<u8>, len: u64, name: &str) -> Result<Vec<u8>, CfbError> {
    if (stream.len() as u64) < len {
        return Err(corrupt(format!(
            "'{name}' declares {len} bytes but its chain only holds {}",
            stream.len()
        )));
    }
    stream.truncate(len as usize);
    Ok(stream)
}
