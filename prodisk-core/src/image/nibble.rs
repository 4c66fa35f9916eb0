//! Raw nibble (`.nib`) images.
//!
//! A nibble image is 35 (or more) tracks of 6656 disk bytes each, exactly as
//! they came off the drive head. There is no block addressing: sectors are
//! found by scanning each track, treated as circular, for address field
//! prologues. The resulting track/sector index is built on first access.

use log::{debug, warn};

use super::{check_block, Container, ImageFormat, Storage};
use crate::codec::{
    decode_sector, encode_sector, AddressField, ADDRESS_FIELD_LEN, ADDRESS_PROLOGUE,
    DATA_PROLOGUE, ENCODED_SECTOR_LEN, EPILOGUE, SECTOR_SIZE, SYNC_BYTE,
};
use crate::config::{NibbleOptions, SyncPolicy};
use crate::error::{DiskError, DiskResult};
use crate::BLOCK_SIZE;

/// Disk bytes per track in a `.nib` image.
pub const TRACK_LEN: usize = 6656;

pub const SECTORS_PER_TRACK: usize = 16;

const BLOCKS_PER_TRACK: u32 = 8;

/// Most tracks a nibble image may hold; the address field stores the
/// track number in one byte.
pub const MAX_TRACKS: u32 = 255;

/// How far past an address field to look for its data prologue.
const DATA_SEARCH_WINDOW: usize = 64;

/// Gap lengths used when laying out fresh tracks.
const LEAD_GAP: usize = 40;
const ADDRESS_GAP: usize = 6;

/// ProDOS sector within a track to physical sector.
const PHYSICAL_SECTOR: [u8; 16] = [0, 2, 4, 6, 8, 10, 12, 14, 1, 3, 5, 7, 9, 11, 13, 15];

/// Offset of each physical sector's data field body within its track.
type TrackIndex = [Option<usize>; SECTORS_PER_TRACK];

/// Nibble layout starting at `base`.
#[derive(Debug, Clone)]
pub struct Nibble {
    base: u64,
    tracks: u32,
    policy: SyncPolicy,
    index: Option<Vec<TrackIndex>>,
}

impl Nibble {
    pub fn new(base: u64, tracks: u32, options: &NibbleOptions) -> Self {
        Self {
            base,
            tracks,
            policy: options.sync_policy,
            index: None,
        }
    }

    pub fn open(storage: &Storage, options: &NibbleOptions) -> DiskResult<Self> {
        let tracks = Self::tracks_in(storage.len())?;
        Ok(Self::new(0, tracks, options))
    }

    /// Lay out empty, zero-filled tracks for `blocks` blocks.
    pub fn create(storage: &mut Storage, blocks: u32, options: &NibbleOptions) -> DiskResult<Self> {
        let tracks = (Self::data_len(blocks)? / TRACK_LEN as u64) as u32;
        Self::format_tracks(storage, 0, tracks, options.volume)?;
        Ok(Self::new(0, tracks, options))
    }

    pub(crate) fn tracks_in(len: u64) -> DiskResult<u32> {
        if len == 0 || len % TRACK_LEN as u64 != 0 {
            return Err(DiskError::format(
                ImageFormat::Nibble.name(),
                format!("size {len} is not a whole number of {TRACK_LEN}-byte tracks"),
            ));
        }
        let tracks = len / TRACK_LEN as u64;
        if tracks > MAX_TRACKS as u64 {
            return Err(DiskError::format(
                ImageFormat::Nibble.name(),
                format!("{tracks} tracks exceed the {MAX_TRACKS}-track limit"),
            ));
        }
        Ok(tracks as u32)
    }

    pub fn data_len(blocks: u32) -> DiskResult<u64> {
        if blocks % BLOCKS_PER_TRACK != 0 {
            return Err(DiskError::format(
                ImageFormat::Nibble.name(),
                format!("{blocks} blocks is not a whole number of tracks"),
            ));
        }
        let tracks = blocks / BLOCKS_PER_TRACK;
        if tracks > MAX_TRACKS {
            return Err(DiskError::format(
                ImageFormat::Nibble.name(),
                format!("{tracks} tracks exceed the {MAX_TRACKS}-track limit"),
            ));
        }
        Ok(tracks as u64 * TRACK_LEN as u64)
    }

    pub(crate) fn format_tracks(
        storage: &mut Storage,
        base: u64,
        tracks: u32,
        volume: u8,
    ) -> DiskResult<()> {
        for track in 0..tracks {
            let bytes = layout_track(track as u8, volume);
            storage.write_at(base + track as u64 * TRACK_LEN as u64, &bytes)?;
        }
        Ok(())
    }

    pub fn tracks(&self) -> u32 {
        self.tracks
    }

    fn track_offset(&self, track: u32) -> u64 {
        self.base + track as u64 * TRACK_LEN as u64
    }

    fn read_track(&self, storage: &Storage, track: u32) -> DiskResult<Vec<u8>> {
        let mut buf = vec![0u8; TRACK_LEN];
        storage.read_at(self.track_offset(track), &mut buf)?;
        Ok(buf)
    }

    fn ensure_index(&mut self, storage: &Storage) -> DiskResult<()> {
        if self.index.is_some() {
            return Ok(());
        }
        let mut index = Vec::with_capacity(self.tracks as usize);
        for track in 0..self.tracks {
            let buf = self.read_track(storage, track)?;
            index.push(scan_track(track, &buf, self.policy)?);
        }
        let found: usize = index
            .iter()
            .map(|t: &TrackIndex| t.iter().flatten().count())
            .sum();
        debug!(
            "nibble index: {found} of {} sectors located",
            self.tracks as usize * SECTORS_PER_TRACK
        );
        self.index = Some(index);
        Ok(())
    }

    fn locate(&mut self, storage: &Storage, track: u32, sector: u32) -> DiskResult<usize> {
        if track >= self.tracks || sector as usize >= SECTORS_PER_TRACK {
            return Err(DiskError::SectorOutOfRange { track, sector });
        }
        self.ensure_index(storage)?;
        self.index
            .as_ref()
            .and_then(|index| index[track as usize][sector as usize])
            .ok_or(DiskError::SectorNotFound { track, sector })
    }

    fn decode_at(
        track_buf: &[u8],
        offset: usize,
        track: u32,
        sector: u32,
        buf: &mut [u8],
    ) -> DiskResult<()> {
        let mut encoded = [0u8; ENCODED_SECTOR_LEN];
        copy_circular(track_buf, offset, &mut encoded);
        let decoded = decode_sector(&encoded)?;
        if !decoded.checksum_ok {
            warn!("data checksum mismatch at track {track}, sector {sector}");
        }
        buf.copy_from_slice(&decoded.data);
        Ok(())
    }

    /// Read one physical sector.
    pub fn read_sector(
        &mut self,
        storage: &Storage,
        track: u32,
        sector: u32,
        buf: &mut [u8; SECTOR_SIZE],
    ) -> DiskResult<()> {
        let offset = self.locate(storage, track, sector)?;
        let track_buf = self.read_track(storage, track)?;
        Self::decode_at(&track_buf, offset, track, sector, buf)
    }

    /// Re-encode one physical sector in place.
    pub fn write_sector(
        &mut self,
        storage: &mut Storage,
        track: u32,
        sector: u32,
        buf: &[u8; SECTOR_SIZE],
    ) -> DiskResult<()> {
        let offset = self.locate(storage, track, sector)?;
        let mut track_buf = self.read_track(storage, track)?;
        write_circular(&mut track_buf, offset, &encode_sector(buf));
        storage.write_at(self.track_offset(track), &track_buf)
    }

    fn block_sectors(block: u32) -> (u32, [u32; 2]) {
        let half = (block % BLOCKS_PER_TRACK) as usize * 2;
        (
            block / BLOCKS_PER_TRACK,
            [PHYSICAL_SECTOR[half] as u32, PHYSICAL_SECTOR[half + 1] as u32],
        )
    }
}

impl Container for Nibble {
    fn format(&self) -> ImageFormat {
        ImageFormat::Nibble
    }

    fn blocks(&self) -> u32 {
        self.tracks * BLOCKS_PER_TRACK
    }

    fn read_block(
        &mut self,
        storage: &Storage,
        block: u32,
        buf: &mut [u8; BLOCK_SIZE],
    ) -> DiskResult<()> {
        check_block(block, self.blocks())?;
        let (track, sectors) = Self::block_sectors(block);
        let offsets = [
            self.locate(storage, track, sectors[0])?,
            self.locate(storage, track, sectors[1])?,
        ];
        let track_buf = self.read_track(storage, track)?;
        for ((half, offset), sector) in buf.chunks_exact_mut(SECTOR_SIZE).zip(offsets).zip(sectors)
        {
            Self::decode_at(&track_buf, offset, track, sector, half)?;
        }
        Ok(())
    }

    fn write_block(
        &mut self,
        storage: &mut Storage,
        block: u32,
        buf: &[u8; BLOCK_SIZE],
    ) -> DiskResult<()> {
        check_block(block, self.blocks())?;
        let (track, sectors) = Self::block_sectors(block);
        let offsets = [
            self.locate(storage, track, sectors[0])?,
            self.locate(storage, track, sectors[1])?,
        ];
        let mut track_buf = self.read_track(storage, track)?;
        for (half, offset) in buf.chunks_exact(SECTOR_SIZE).zip(offsets) {
            let mut sector = [0u8; SECTOR_SIZE];
            sector.copy_from_slice(half);
            write_circular(&mut track_buf, offset, &encode_sector(&sector));
        }
        storage.write_at(self.track_offset(track), &track_buf)
    }
}

fn matches_at(buf: &[u8], pos: usize, pattern: &[u8]) -> bool {
    pattern
        .iter()
        .enumerate()
        .all(|(i, &b)| buf[(pos + i) % buf.len()] == b)
}

fn copy_circular(buf: &[u8], pos: usize, out: &mut [u8]) {
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = buf[(pos + i) % buf.len()];
    }
}

fn write_circular(buf: &mut [u8], pos: usize, data: &[u8]) {
    let len = buf.len();
    for (i, &byte) in data.iter().enumerate() {
        buf[(pos + i) % len] = byte;
    }
}

fn damaged(policy: SyncPolicy, message: String) -> DiskResult<()> {
    match policy {
        SyncPolicy::Strict => Err(DiskError::format(ImageFormat::Nibble.name(), message)),
        SyncPolicy::BestEffort => {
            warn!("{message}");
            Ok(())
        }
    }
}

/// Find every sector on one track.
fn scan_track(track: u32, buf: &[u8], policy: SyncPolicy) -> DiskResult<TrackIndex> {
    let len = buf.len();
    let mut found: TrackIndex = [None; SECTORS_PER_TRACK];

    for start in 0..len {
        if !matches_at(buf, start, &ADDRESS_PROLOGUE) {
            continue;
        }
        let mut field = [0u8; ADDRESS_FIELD_LEN];
        copy_circular(buf, start + ADDRESS_PROLOGUE.len(), &mut field);
        let address = match AddressField::decode(&field) {
            Ok(address) => address,
            Err(err) => {
                warn!("track {track}: skipping address field at {start}: {err}");
                continue;
            }
        };
        if address.track as u32 != track {
            damaged(
                policy,
                format!(
                    "track {track}: address field at {start} claims track {}",
                    address.track
                ),
            )?;
            continue;
        }
        let sector = address.sector as usize;
        if sector >= SECTORS_PER_TRACK {
            damaged(
                policy,
                format!("track {track}: address field at {start} has sector {sector}"),
            )?;
            continue;
        }

        let after = start + ADDRESS_PROLOGUE.len() + ADDRESS_FIELD_LEN;
        let Some(prologue) = (0..DATA_SEARCH_WINDOW)
            .map(|d| after + d)
            .find(|&pos| matches_at(buf, pos, &DATA_PROLOGUE))
        else {
            damaged(policy, format!("track {track}, sector {sector}: no data field"))?;
            continue;
        };
        let data = (prologue + DATA_PROLOGUE.len()) % len;

        if found[sector].is_some() {
            damaged(
                policy,
                format!("track {track}: duplicate sector {sector} at {start}"),
            )?;
            continue;
        }
        found[sector] = Some(data);
    }

    for (sector, slot) in found.iter().enumerate() {
        if slot.is_none() {
            damaged(policy, format!("track {track}: sector {sector} missing"))?;
        }
    }
    Ok(found)
}

/// Build one freshly formatted track with zero-filled sectors.
fn layout_track(track: u8, volume: u8) -> Vec<u8> {
    let zero = encode_sector(&[0u8; SECTOR_SIZE]);
    let mut buf = Vec::with_capacity(TRACK_LEN);
    for sector in 0..SECTORS_PER_TRACK as u8 {
        buf.resize(buf.len() + LEAD_GAP, SYNC_BYTE);
        buf.extend_from_slice(&ADDRESS_PROLOGUE);
        buf.extend_from_slice(&AddressField::new(volume, track, sector).encode());
        buf.extend_from_slice(&EPILOGUE);
        buf.resize(buf.len() + ADDRESS_GAP, SYNC_BYTE);
        buf.extend_from_slice(&DATA_PROLOGUE);
        buf.extend_from_slice(&zero);
        buf.extend_from_slice(&EPILOGUE);
    }
    buf.resize(TRACK_LEN, SYNC_BYTE);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode44;
    use crate::config::Backing;

    /// Bytes taken by one sector in `layout_track`.
    const SECTOR_SPAN: usize = LEAD_GAP + 3 + ADDRESS_FIELD_LEN + 3 + ADDRESS_GAP + 3
        + ENCODED_SECTOR_LEN
        + 3;

    fn address_offset(track: usize, sector: usize) -> u64 {
        (track * TRACK_LEN + sector * SECTOR_SPAN + LEAD_GAP + 3) as u64
    }

    fn new_image(dir: &tempfile::TempDir, options: &NibbleOptions) -> (Storage, Nibble) {
        let path = dir.path().join("disk.nib");
        let len = Nibble::data_len(280).unwrap();
        let mut storage = Storage::create(&path, len, Backing::Mapped).unwrap();
        let nibble = Nibble::create(&mut storage, 280, options).unwrap();
        (storage, nibble)
    }

    #[test]
    fn test_layout_fits_track() {
        let track = layout_track(3, 254);
        assert_eq!(track.len(), TRACK_LEN);
        assert!(SECTOR_SPAN * SECTORS_PER_TRACK <= TRACK_LEN);
        let index = scan_track(3, &track, SyncPolicy::Strict).unwrap();
        assert!(index.iter().all(|s| s.is_some()));
    }

    #[test]
    fn test_prologue_across_wrap() {
        let mut track = layout_track(0, 254);
        // Rotate so sector 0's address prologue straddles the end of the buffer.
        track.rotate_left(LEAD_GAP + 1);
        let index = scan_track(0, &track, SyncPolicy::Strict).unwrap();
        assert!(index.iter().all(|s| s.is_some()));
    }

    #[test]
    fn test_sector_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let (mut storage, mut nibble) = new_image(&dir, &NibbleOptions::default());
        assert_eq!(nibble.blocks(), 280);

        let mut data = [0u8; SECTOR_SIZE];
        for (i, b) in data.iter_mut().enumerate() {
            *b = (i * 7 + 3) as u8;
        }
        nibble.write_sector(&mut storage, 17, 11, &data).unwrap();

        let mut back = [0u8; SECTOR_SIZE];
        nibble.read_sector(&storage, 17, 11, &mut back).unwrap();
        assert_eq!(back, data);

        // Neighbouring sectors untouched.
        nibble.read_sector(&storage, 17, 10, &mut back).unwrap();
        assert_eq!(back, [0u8; SECTOR_SIZE]);
    }

    #[test]
    fn test_block_uses_physical_sectors() {
        let dir = tempfile::tempdir().unwrap();
        let (mut storage, mut nibble) = new_image(&dir, &NibbleOptions::default());

        let mut block = [0u8; BLOCK_SIZE];
        block[..256].fill(0xA1);
        block[256..].fill(0xB2);
        // Block 9 = track 1, ProDOS sectors 2 and 3 = physical 4 and 6.
        nibble.write_block(&mut storage, 9, &block).unwrap();

        let mut sector = [0u8; SECTOR_SIZE];
        nibble.read_sector(&storage, 1, 4, &mut sector).unwrap();
        assert_eq!(sector, [0xA1; SECTOR_SIZE]);
        nibble.read_sector(&storage, 1, 6, &mut sector).unwrap();
        assert_eq!(sector, [0xB2; SECTOR_SIZE]);

        let mut back = [0u8; BLOCK_SIZE];
        nibble.read_block(&storage, 9, &mut back).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn test_corrupt_address_checksum_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut storage, _) = new_image(&dir, &NibbleOptions::default());
        storage
            .write_at(address_offset(0, 5) + 6, &encode44(0x00))
            .unwrap();

        let mut lenient = Nibble::open(&storage, &NibbleOptions::default()).unwrap();
        let mut buf = [0u8; SECTOR_SIZE];
        assert!(matches!(
            lenient.read_sector(&storage, 0, 5, &mut buf),
            Err(DiskError::SectorNotFound { track: 0, sector: 5 })
        ));
        lenient.read_sector(&storage, 0, 4, &mut buf).unwrap();

        let strict = NibbleOptions {
            sync_policy: SyncPolicy::Strict,
            ..NibbleOptions::default()
        };
        let mut strict = Nibble::open(&storage, &strict).unwrap();
        let err = strict.read_sector(&storage, 1, 0, &mut buf).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::FatalFormat);
    }

    #[test]
    fn test_duplicate_sector() {
        let dir = tempfile::tempdir().unwrap();
        let (mut storage, _) = new_image(&dir, &NibbleOptions::default());
        // Relabel sector 4 of track 2 as sector 3.
        let field = AddressField::new(254, 2, 3).encode();
        storage.write_at(address_offset(2, 4), &field).unwrap();

        let mut lenient = Nibble::open(&storage, &NibbleOptions::default()).unwrap();
        let mut buf = [0u8; SECTOR_SIZE];
        lenient.read_sector(&storage, 2, 3, &mut buf).unwrap();
        assert!(lenient.read_sector(&storage, 2, 4, &mut buf).is_err());

        let strict = NibbleOptions {
            sync_policy: SyncPolicy::Strict,
            ..NibbleOptions::default()
        };
        let mut strict = Nibble::open(&storage, &strict).unwrap();
        assert!(strict.read_sector(&storage, 2, 3, &mut buf).is_err());
    }

    #[test]
    fn test_out_of_range_sector() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, mut nibble) = new_image(&dir, &NibbleOptions::default());
        let mut buf = [0u8; SECTOR_SIZE];
        assert!(matches!(
            nibble.read_sector(&storage, 35, 0, &mut buf),
            Err(DiskError::SectorOutOfRange { track: 35, sector: 0 })
        ));
        assert!(matches!(
            nibble.read_sector(&storage, 0, 16, &mut buf),
            Err(DiskError::SectorOutOfRange { .. })
        ));
    }

    #[test]
    fn test_open_rejects_partial_track() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.nib");
        let storage = Storage::create(&path, 6000, Backing::Descriptor).unwrap();
        assert!(Nibble::open(&storage, &NibbleOptions::default()).is_err());
    }

    #[test]
    fn test_track_count_fits_address_field() {
        assert!(Nibble::data_len(MAX_TRACKS * BLOCKS_PER_TRACK).is_ok());
        let err = Nibble::data_len((MAX_TRACKS + 1) * BLOCKS_PER_TRACK).err().unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::FatalFormat);
        assert!(Nibble::tracks_in(MAX_TRACKS as u64 * TRACK_LEN as u64).is_ok());
        assert!(Nibble::tracks_in((MAX_TRACKS as u64 + 1) * TRACK_LEN as u64).is_err());
    }
}
