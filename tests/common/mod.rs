//! In-memory compound files and BIFF streams for the integration tests
#![allow(dead_code)]

pub const ENDOFCHAIN: u32 = 0xFFFF_FFFE;
pub const FREESECT: u32 = 0xFFFF_FFFF;
const FATSECT: u32 = 0xFFFF_FFFD;
const NOSTREAM: u32 = 0xFFFF_FFFF;
const SECTOR: usize = 512;
const MINI_SECTOR: usize = 64;
const MINI_CUTOFF: usize = 4096;

pub const FORMULA: u16 = 0x0006;
pub const EOF: u16 = 0x000A;
pub const CODEPAGE: u16 = 0x0042;
pub const DATEMODE: u16 = 0x0022;
pub const FILEPASS: u16 = 0x002F;
pub const CONTINUE: u16 = 0x003C;
pub const WSBOOL: u16 = 0x0081;
pub const BOUNDSHEET: u16 = 0x0085;
pub const MULRK: u16 = 0x00BD;
pub const XF: u16 = 0x00E0;
pub const SST: u16 = 0x00FC;
pub const LABELSST: u16 = 0x00FD;
pub const DIMENSIONS: u16 = 0x0200;
pub const BLANK: u16 = 0x0201;
pub const NUMBER: u16 = 0x0203;
pub const LABEL: u16 = 0x0204;
pub const BOOLERR: u16 = 0x0205;
pub const STRING: u16 = 0x0207;
pub const RK: u16 = 0x027E;
pub const FORMAT: u16 = 0x041E;
pub const SHRFMLA: u16 = 0x04BC;
pub const BOF: u16 = 0x0809;

/// Physical placement of the streams of a built compound file
#[derive(Debug, Default)]
pub struct Layout {
    /// Sectors of each big stream, in chain order
    pub sectors: Vec<(String, Vec<u32>)>,
}

impl Layout {
    pub fn sectors_of(&self, name: &str) -> &[u32] {
        self.sectors
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s.as_slice())
            .unwrap_or(&[])
    }
}

/// Writes a version 3 compound file (512-byte sectors)
///
/// Streams below 4096 bytes go to the mini stream. `fragmented` interleaves the sectors of
/// every chain in reverse order so that no stream is contiguous.
#[derive(Debug, Default)]
pub struct CfbBuilder {
    streams: Vec<(String, Vec<u8>)>,
    fragmented: bool,
}

impl CfbBuilder {
    pub fn new() -> Self {
        CfbBuilder::default()
    }

    pub fn stream(mut self, name: &str, data: Vec<u8>) -> Self {
        self.streams.push((name.to_string(), data));
        self
    }

    pub fn fragmented(mut self, fragmented: bool) -> Self {
        self.fragmented = fragmented;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        self.build_with_layout().0
    }

    pub fn build_with_layout(&self) -> (Vec<u8>, Layout) {
        // mini stream
        let mut mini_stream = Vec::new();
        let mut mini_fat: Vec<u32> = Vec::new();
        let mut mini_starts = Vec::new();
        for (_, data) in &self.streams {
            if data.is_empty() || data.len() >= MINI_CUTOFF {
                mini_starts.push(None);
                continue;
            }
            let first = mini_fat.len() as u32;
            let count = data.len().div_ceil(MINI_SECTOR);
            for i in 0..count {
                let next = if i + 1 == count {
                    ENDOFCHAIN
                } else {
                    first + i as u32 + 1
                };
                mini_fat.push(next);
            }
            mini_stream.extend_from_slice(data);
            mini_stream.resize(mini_fat.len() * MINI_SECTOR, 0);
            mini_starts.push(Some(first));
        }

        // chains stored in big sectors: directory, mini fat, mini stream, then big streams
        let dir_count = self.streams.len() + 1;
        let mut chains: Vec<(String, Vec<u8>)> = vec![
            ("<directory>".into(), vec![0; dir_count.div_ceil(4) * SECTOR]),
            ("<minifat>".into(), u32s(&mini_fat, FREESECT)),
            ("Root Entry".into(), mini_stream.clone()),
        ];
        for (name, data) in &self.streams {
            if data.len() >= MINI_CUTOFF {
                chains.push((name.clone(), data.clone()));
            }
        }
        let sector_counts: Vec<usize> = chains
            .iter()
            .map(|(_, d)| d.len().div_ceil(SECTOR))
            .collect();
        let data_sectors: usize = sector_counts.iter().sum();
        let mut fat_sectors = 1;
        while fat_sectors * (SECTOR / 4) < data_sectors + fat_sectors {
            fat_sectors += 1;
        }
        assert!(fat_sectors <= 109, "fixture too large for the header difat");

        // physical placement
        let mut order: Vec<(usize, usize)> = Vec::with_capacity(data_sectors);
        if self.fragmented {
            let longest = sector_counts.iter().copied().max().unwrap_or(0);
            for k in 0..longest {
                for (c, &n) in sector_counts.iter().enumerate() {
                    if k < n {
                        order.push((c, n - 1 - k));
                    }
                }
            }
        } else {
            for (c, &n) in sector_counts.iter().enumerate() {
                order.extend((0..n).map(|k| (c, k)));
            }
        }
        let mut physical: Vec<Vec<u32>> = sector_counts.iter().map(|&n| vec![0; n]).collect();
        for (i, &(c, k)) in order.iter().enumerate() {
            physical[c][k] = (fat_sectors + i) as u32;
        }

        let total = fat_sectors + data_sectors;
        let mut fat = vec![FREESECT; fat_sectors * SECTOR / 4];
        for f in fat.iter_mut().take(fat_sectors) {
            *f = FATSECT;
        }
        for ids in &physical {
            for w in ids.windows(2) {
                fat[w[0] as usize] = w[1];
            }
            if let Some(&last) = ids.last() {
                fat[last as usize] = ENDOFCHAIN;
            }
        }

        // directory
        let first = |c: usize| physical[c].first().copied().unwrap_or(ENDOFCHAIN);
        let mut dir = Vec::with_capacity(dir_count.div_ceil(4) * SECTOR);
        dir.extend(dir_entry(
            "Root Entry",
            5,
            (NOSTREAM, NOSTREAM, if self.streams.is_empty() { NOSTREAM } else { 1 }),
            first(2),
            mini_stream.len() as u64,
        ));
        let mut big = 3;
        for (i, (name, data)) in self.streams.iter().enumerate() {
            let right = if i + 1 < self.streams.len() {
                i as u32 + 2
            } else {
                NOSTREAM
            };
            let start = match mini_starts[i] {
                Some(s) => s,
                None if data.is_empty() => ENDOFCHAIN,
                None => {
                    big += 1;
                    first(big - 1)
                }
            };
            dir.extend(dir_entry(
                name,
                2,
                (NOSTREAM, right, NOSTREAM),
                start,
                data.len() as u64,
            ));
        }
        dir.resize(chains[0].1.len(), 0);
        chains[0].1 = dir;

        let mut file = header(
            fat_sectors as u32,
            first(0),
            if mini_fat.is_empty() { ENDOFCHAIN } else { first(1) },
            sector_counts[1] as u32,
        );
        file.resize(SECTOR * (total + 1), 0);
        for (i, chunk) in u32s(&fat, FREESECT).chunks(SECTOR).enumerate() {
            let at = SECTOR * (i + 1);
            file[at..at + chunk.len()].copy_from_slice(chunk);
        }
        for (c, (_, data)) in chains.iter().enumerate() {
            for (k, chunk) in data.chunks(SECTOR).enumerate() {
                let at = SECTOR * (physical[c][k] as usize + 1);
                file[at..at + chunk.len()].copy_from_slice(chunk);
            }
        }

        let layout = Layout {
            sectors: chains
                .iter()
                .zip(physical)
                .skip(2)
                .map(|((name, _), ids)| (name.clone(), ids))
                .collect(),
        };
        (file, layout)
    }
}

/// Overwrites the FAT entry of sector `id` (FAT sectors come first in built files)
pub fn set_fat(file: &mut [u8], id: u32, next: u32) {
    let at = SECTOR + 4 * id as usize;
    file[at..at + 4].copy_from_slice(&next.to_le_bytes());
}

fn u32s(values: &[u32], pad: u32) -> Vec<u8> {
    let mut v: Vec<u8> = values.iter().flat_map(|x| x.to_le_bytes()).collect();
    while v.len() % SECTOR != 0 {
        v.extend(pad.to_le_bytes());
    }
    v
}

fn header(fat_len: u32, dir_start: u32, mini_fat_start: u32, mini_fat_len: u32) -> Vec<u8> {
    let mut h = vec![0u8; SECTOR];
    h[..8].copy_from_slice(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1]);
    h[24..26].copy_from_slice(&0x003Eu16.to_le_bytes());
    h[26..28].copy_from_slice(&3u16.to_le_bytes());
    h[28..30].copy_from_slice(&0xFFFEu16.to_le_bytes());
    h[30..32].copy_from_slice(&9u16.to_le_bytes());
    h[32..34].copy_from_slice(&6u16.to_le_bytes());
    h[44..48].copy_from_slice(&fat_len.to_le_bytes());
    h[48..52].copy_from_slice(&dir_start.to_le_bytes());
    h[56..60].copy_from_slice(&(MINI_CUTOFF as u32).to_le_bytes());
    h[60..64].copy_from_slice(&mini_fat_start.to_le_bytes());
    h[64..68].copy_from_slice(&mini_fat_len.to_le_bytes());
    h[68..72].copy_from_slice(&ENDOFCHAIN.to_le_bytes());
    for i in 0..109usize {
        let id = if (i as u32) < fat_len { i as u32 } else { FREESECT };
        h[76 + 4 * i..80 + 4 * i].copy_from_slice(&id.to_le_bytes());
    }
    h
}

fn dir_entry(name: &str, typ: u8, links: (u32, u32, u32), start: u32, len: u64) -> Vec<u8> {
    let mut e = vec![0u8; 128];
    let utf16: Vec<u8> = name.encode_utf16().flat_map(|c| c.to_le_bytes()).collect();
    e[..utf16.len()].copy_from_slice(&utf16);
    e[64..66].copy_from_slice(&(utf16.len() as u16 + 2).to_le_bytes());
    e[66] = typ;
    e[67] = 1;
    e[68..72].copy_from_slice(&links.0.to_le_bytes());
    e[72..76].copy_from_slice(&links.1.to_le_bytes());
    e[76..80].copy_from_slice(&links.2.to_le_bytes());
    e[116..120].copy_from_slice(&start.to_le_bytes());
    e[120..128].copy_from_slice(&len.to_le_bytes());
    e
}

/// One BIFF frame
pub fn record(typ: u16, payload: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(payload.len() + 4);
    v.extend(typ.to_le_bytes());
    v.extend((payload.len() as u16).to_le_bytes());
    v.extend_from_slice(payload);
    v
}

/// A record whose payload is split into CONTINUE frames after each `cuts` offset
pub fn continued(typ: u16, payload: &[u8], cuts: &[usize]) -> Vec<u8> {
    let mut v = Vec::new();
    let mut start = 0;
    let mut t = typ;
    for &cut in cuts.iter().chain(std::iter::once(&payload.len())) {
        v.extend(record(t, &payload[start..cut]));
        start = cut;
        t = CONTINUE;
    }
    v
}

fn bof(version: u16, dt: u16) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend(version.to_le_bytes());
    p.extend(dt.to_le_bytes());
    p.extend([0u8; 12]);
    record(BOF, &p)
}

pub fn number(row: u16, col: u16, xf: u16, v: f64) -> Vec<u8> {
    let mut p = cell(row, col, xf);
    p.extend(v.to_le_bytes());
    record(NUMBER, &p)
}

pub fn rk(row: u16, col: u16, int: i32) -> Vec<u8> {
    let mut p = cell(row, col, 0);
    p.extend((((int << 2) as u32) | 2).to_le_bytes());
    record(RK, &p)
}

pub fn mulrk(row: u16, first_col: u16, ints: &[i32]) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend(row.to_le_bytes());
    p.extend(first_col.to_le_bytes());
    for &i in ints {
        p.extend(0u16.to_le_bytes());
        p.extend((((i << 2) as u32) | 2).to_le_bytes());
    }
    p.extend((first_col + ints.len() as u16 - 1).to_le_bytes());
    record(MULRK, &p)
}

pub fn blank(row: u16, col: u16) -> Vec<u8> {
    record(BLANK, &cell(row, col, 0))
}

pub fn boolerr(row: u16, col: u16, value: u8, is_error: bool) -> Vec<u8> {
    let mut p = cell(row, col, 0);
    p.extend([value, is_error as u8]);
    record(BOOLERR, &p)
}

pub fn label_sst(row: u16, col: u16, index: u32) -> Vec<u8> {
    let mut p = cell(row, col, 0);
    p.extend(index.to_le_bytes());
    record(LABELSST, &p)
}

/// LABEL of a BIFF5 sheet: 8-bit text in the workbook code page
pub fn label_legacy(row: u16, col: u16, text: &[u8]) -> Vec<u8> {
    let mut p = cell(row, col, 0);
    p.extend((text.len() as u16).to_le_bytes());
    p.extend_from_slice(text);
    record(LABEL, &p)
}

pub fn dimensions(rows: u32, cols: u16) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend(0u32.to_le_bytes());
    p.extend(rows.to_le_bytes());
    p.extend(0u16.to_le_bytes());
    p.extend(cols.to_le_bytes());
    p.extend(0u16.to_le_bytes());
    record(DIMENSIONS, &p)
}

/// FORMULA with a numeric result
pub fn formula(row: u16, col: u16, value: f64, shared: bool, tokens: &[u8]) -> Vec<u8> {
    formula_raw(row, col, value.to_le_bytes(), shared, tokens)
}

/// FORMULA whose text result follows in a STRING record
pub fn formula_string(row: u16, col: u16, tokens: &[u8]) -> Vec<u8> {
    formula_raw(row, col, [0, 0, 0, 0, 0, 0, 0xFF, 0xFF], false, tokens)
}

fn formula_raw(row: u16, col: u16, value: [u8; 8], shared: bool, tokens: &[u8]) -> Vec<u8> {
    let mut p = cell(row, col, 0);
    p.extend(value);
    let flags: u16 = if shared { 0x0008 } else { 0 };
    p.extend(flags.to_le_bytes());
    p.extend(0u32.to_le_bytes());
    p.extend((tokens.len() as u16).to_le_bytes());
    p.extend_from_slice(tokens);
    record(FORMULA, &p)
}

pub fn string(text: &str) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend((text.len() as u16).to_le_bytes());
    p.push(0);
    p.extend(text.bytes());
    record(STRING, &p)
}

pub fn shrfmla(first: (u16, u8), last: (u16, u8), tokens: &[u8]) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend(first.0.to_le_bytes());
    p.extend(last.0.to_le_bytes());
    p.extend([first.1, last.1, 0, 0]);
    p.extend((tokens.len() as u16).to_le_bytes());
    p.extend_from_slice(tokens);
    record(SHRFMLA, &p)
}

/// SST payload of compressed strings
pub fn sst_payload(strings: &[&str]) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend((strings.len() as u32).to_le_bytes());
    p.extend((strings.len() as u32).to_le_bytes());
    for s in strings {
        p.extend((s.len() as u16).to_le_bytes());
        p.push(0);
        p.extend(s.bytes());
    }
    p
}

fn cell(row: u16, col: u16, xf: u16) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend(row.to_le_bytes());
    p.extend(col.to_le_bytes());
    p.extend(xf.to_le_bytes());
    p
}

/// Lays out a workbook stream: globals, BOUNDSHEET records, then one substream per sheet
#[derive(Debug, Clone)]
pub struct WorkbookBuilder {
    version: u16,
    globals: Vec<u8>,
    sheets: Vec<(String, u16, Vec<u8>)>,
}

impl WorkbookBuilder {
    /// BIFF8
    pub fn new() -> Self {
        WorkbookBuilder {
            version: 0x0600,
            globals: Vec::new(),
            sheets: Vec::new(),
        }
    }

    /// BIFF5
    pub fn legacy() -> Self {
        WorkbookBuilder {
            version: 0x0500,
            ..WorkbookBuilder::new()
        }
    }

    pub fn version(mut self, version: u16) -> Self {
        self.version = version;
        self
    }

    /// Appends raw records to the globals substream
    pub fn global(mut self, records: Vec<u8>) -> Self {
        self.globals.extend(records);
        self
    }

    /// Adds a worksheet made of raw records (BOF and EOF are added)
    pub fn sheet(self, name: &str, records: Vec<u8>) -> Self {
        self.sheet_with_type(name, 0x0010, records)
    }

    /// Adds a sheet whose BOF declares substream type `dt`
    pub fn sheet_with_type(mut self, name: &str, dt: u16, records: Vec<u8>) -> Self {
        self.sheets.push((name.to_string(), dt, records));
        self
    }

    pub fn stream(&self) -> Vec<u8> {
        self.stream_with_globals_type(0x0005)
    }

    pub fn stream_with_globals_type(&self, dt: u16) -> Vec<u8> {
        let boundsheet = |offset: u32, name: &str| {
            let mut p = Vec::new();
            p.extend(offset.to_le_bytes());
            p.extend([0, 0, name.len() as u8]);
            if self.version == 0x0600 {
                p.push(0);
            }
            p.extend(name.bytes());
            record(BOUNDSHEET, &p)
        };
        let globals_len = bof(self.version, dt).len()
            + self.globals.len()
            + self
                .sheets
                .iter()
                .map(|(n, _, _)| boundsheet(0, n).len())
                .sum::<usize>()
            + 4;
        let mut stream = bof(self.version, dt);
        stream.extend_from_slice(&self.globals);
        let mut offset = globals_len;
        let mut substreams = Vec::new();
        for (name, dt, records) in &self.sheets {
            stream.extend(boundsheet(offset as u32, name));
            let mut sub = bof(self.version, *dt);
            sub.extend_from_slice(records);
            sub.extend(record(EOF, &[]));
            offset += sub.len();
            substreams.push(sub);
        }
        stream.extend(record(EOF, &[]));
        for sub in substreams {
            stream.extend(sub);
        }
        stream
    }

    /// The workbook in a compound file, under `stream_name`
    pub fn build_as(&self, stream_name: &str) -> Vec<u8> {
        CfbBuilder::new()
            .stream(stream_name, self.stream())
            .build()
    }

    pub fn build(&self) -> Vec<u8> {
        let name = if self.version == 0x0600 {
            "Workbook"
        } else {
            "Book"
        };
        self.build_as(name)
    }
}

/// Embedded substream (e.g. a chart) of `records`
pub fn substream(dt: u16, records: Vec<u8>) -> Vec<u8> {
    let mut v = bof(0x0600, dt);
    v.extend(records);
    v.extend(record(EOF, &[]));
    v
}
