//! ProDOS file index trees.
//!
//! A fork is stored in one of three shapes, chosen by size:
//! - seedling: the key block is the single data block
//! - sapling: the key block is an index node of up to 256 data blocks
//! - tree: the key block is a master index of up to 256 index nodes
//!
//! An index node holds 256 block pointers as two planes: low bytes at
//! 0..256, high bytes at 256..512. A zero pointer is a sparse hole that
//! reads as zeros, at any level.
//!
//! Extended files have a key block holding two mini directory entries, data
//! fork at offset 0 and resource fork at offset 256, each describing an
//! ordinary seedling, sapling or tree.

use crate::bitmap::Bitmap;
use crate::cache::BlockCache;
use crate::error::{DiskError, DiskResult};
use crate::BLOCK_SIZE;

/// Pointers per index node.
pub const POINTERS_PER_NODE: usize = 256;

/// Largest EOF representable in a ProDOS entry (three bytes).
pub const MAX_EOF: usize = 0xFF_FFFF;

const MINI_ENTRY_LEN: usize = 8;
const RESOURCE_ENTRY_AT: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    Seedling = 1,
    Sapling = 2,
    Tree = 3,
    Extended = 5,
}

impl TryFrom<u8> for StorageType {
    type Error = DiskError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(StorageType::Seedling),
            2 => Ok(StorageType::Sapling),
            3 => Ok(StorageType::Tree),
            5 => Ok(StorageType::Extended),
            other => Err(DiskError::InvalidStorageType(other)),
        }
    }
}

impl StorageType {
    /// Index levels above the data blocks. `None` for extended files, which
    /// must be normalized first.
    pub fn levels(self) -> Option<u32> {
        match self {
            StorageType::Seedling => Some(0),
            StorageType::Sapling => Some(1),
            StorageType::Tree => Some(2),
            StorageType::Extended => None,
        }
    }

    /// Smallest shape that holds `blocks` data blocks.
    pub fn for_blocks(blocks: usize) -> Self {
        match blocks {
            0 | 1 => StorageType::Seedling,
            2..=POINTERS_PER_NODE => StorageType::Sapling,
            _ => StorageType::Tree,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fork {
    Data,
    Resource,
}

/// Location and size of one fork.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkDescriptor {
    pub storage_type: StorageType,
    pub key_block: u32,
    /// Blocks in use, index blocks included.
    pub blocks_used: u32,
    pub eof: u32,
}

impl ForkDescriptor {
    /// Parse a mini entry from an extended key block.
    pub fn parse_mini(entry: &[u8; MINI_ENTRY_LEN]) -> DiskResult<Self> {
        let storage_type = StorageType::try_from(entry[0])?;
        if storage_type == StorageType::Extended {
            return Err(DiskError::InvalidStorageType(entry[0]));
        }
        Ok(Self {
            storage_type,
            key_block: u16::from_le_bytes([entry[1], entry[2]]) as u32,
            blocks_used: u16::from_le_bytes([entry[3], entry[4]]) as u32,
            eof: u32::from_le_bytes([entry[5], entry[6], entry[7], 0]),
        })
    }

    pub fn to_mini(&self) -> DiskResult<[u8; MINI_ENTRY_LEN]> {
        let mut entry = [0u8; MINI_ENTRY_LEN];
        entry[0] = self.storage_type as u8;
        entry[1..3].copy_from_slice(&pointer(self.key_block)?.to_le_bytes());
        entry[3..5].copy_from_slice(&pointer(self.blocks_used)?.to_le_bytes());
        entry[5..8].copy_from_slice(&self.eof.to_le_bytes()[..3]);
        Ok(entry)
    }
}

fn pointer(block: u32) -> DiskResult<u16> {
    u16::try_from(block)
        .map_err(|_| DiskError::Unsupported(format!("block {block} does not fit a 16-bit pointer")))
}

fn node_pointer(node: &[u8; BLOCK_SIZE], index: usize) -> u32 {
    u16::from_le_bytes([node[index], node[index + POINTERS_PER_NODE]]) as u32
}

fn set_node_pointer(node: &mut [u8; BLOCK_SIZE], index: usize, block: u32) -> DiskResult<()> {
    let [lo, hi] = pointer(block)?.to_le_bytes();
    node[index] = lo;
    node[index + POINTERS_PER_NODE] = hi;
    Ok(())
}

/// Resolve `fork` of a file to a plain seedling/sapling/tree descriptor.
pub fn normalize<C: BlockCache + ?Sized>(
    cache: &mut C,
    desc: &ForkDescriptor,
    fork: Fork,
) -> DiskResult<ForkDescriptor> {
    match (desc.storage_type, fork) {
        (StorageType::Extended, fork) => {
            let mut key = [0u8; BLOCK_SIZE];
            cache.read_block(desc.key_block, &mut key)?;
            let at = match fork {
                Fork::Data => 0,
                Fork::Resource => RESOURCE_ENTRY_AT,
            };
            let mut entry = [0u8; MINI_ENTRY_LEN];
            entry.copy_from_slice(&key[at..at + MINI_ENTRY_LEN]);
            ForkDescriptor::parse_mini(&entry)
        }
        (_, Fork::Data) => Ok(*desc),
        (_, Fork::Resource) => Err(DiskError::InvalidFork(
            "file has no resource fork".to_string(),
        )),
    }
}

/// Read `buf.len() / 512` consecutive file blocks starting at `byte_offset`,
/// from the subtree rooted at `block_ptr` with `level` index levels.
///
/// `byte_offset` is the file offset of the first block and selects the
/// starting child at each level. Holes read as zeros.
pub fn read_index<C: BlockCache + ?Sized>(
    cache: &mut C,
    block_ptr: u32,
    buf: &mut [u8],
    level: u32,
    byte_offset: u64,
) -> DiskResult<()> {
    if level == 0 {
        let (first, rest) = buf.split_at_mut(BLOCK_SIZE.min(buf.len()));
        if block_ptr == 0 {
            first.fill(0);
        } else {
            let mut block = [0u8; BLOCK_SIZE];
            cache.read_block(block_ptr, &mut block)?;
            first.copy_from_slice(&block[..first.len()]);
        }
        rest.fill(0);
        return Ok(());
    }

    let mut node = [0u8; BLOCK_SIZE];
    if block_ptr != 0 {
        cache.read_block(block_ptr, &mut node)?;
    }
    let child_shift = 9 + 8 * (level - 1);
    let child_blocks = 1u64 << (8 * (level - 1));
    let mut index = ((byte_offset >> child_shift) & 0xFF) as usize;
    let mut offset = byte_offset;
    let mut rest = buf;
    while !rest.is_empty() && index < POINTERS_PER_NODE {
        let within = (offset / BLOCK_SIZE as u64) % child_blocks;
        let take = ((child_blocks - within) as usize)
            .saturating_mul(BLOCK_SIZE)
            .min(rest.len());
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(take);
        read_index(cache, node_pointer(&node, index), head, level - 1, offset)?;
        offset += take as u64;
        rest = tail;
        index += 1;
    }
    // Past the last pointer of this node.
    rest.fill(0);
    Ok(())
}

/// Read a whole fork, truncated to its EOF.
pub fn read_fork<C: BlockCache + ?Sized>(
    cache: &mut C,
    desc: &ForkDescriptor,
    fork: Fork,
) -> DiskResult<Vec<u8>> {
    let desc = normalize(cache, desc, fork)?;
    let levels = desc
        .storage_type
        .levels()
        .ok_or(DiskError::InvalidStorageType(desc.storage_type as u8))?;
    let eof = desc.eof as usize;
    let mut data = vec![0u8; eof.div_ceil(BLOCK_SIZE) * BLOCK_SIZE];
    read_index(cache, desc.key_block, &mut data, levels, 0)?;
    data.truncate(eof);
    Ok(data)
}

/// Blocks taken from the bitmap during one write, released again if the
/// write fails.
struct Allocation<'a> {
    bitmap: &'a mut Bitmap,
    taken: Vec<u32>,
}

impl<'a> Allocation<'a> {
    fn new(bitmap: &'a mut Bitmap) -> Self {
        Self {
            bitmap,
            taken: Vec::new(),
        }
    }

    fn block(&mut self) -> DiskResult<u32> {
        let block = self.bitmap.alloc_block().ok_or(DiskError::DiskFull)?;
        self.taken.push(block);
        Ok(block)
    }

    fn used(&self) -> u32 {
        self.taken.len() as u32
    }

    fn rollback(self) {
        for block in self.taken {
            self.bitmap.free_block(block);
        }
    }
}

fn data_block(data: &[u8], n: usize) -> Option<[u8; BLOCK_SIZE]> {
    let start = n * BLOCK_SIZE;
    if start >= data.len() {
        return None;
    }
    let end = (start + BLOCK_SIZE).min(data.len());
    let mut block = [0u8; BLOCK_SIZE];
    block[..end - start].copy_from_slice(&data[start..end]);
    Some(block)
}

fn is_sparse(data: &[u8], n: usize) -> bool {
    data_block(data, n).map_or(true, |block| block.iter().all(|b| *b == 0))
}

/// Write data block `n`, or leave a hole when it is all zeros. Block 0 is
/// always allocated.
fn write_data<C: BlockCache + ?Sized>(
    cache: &mut C,
    alloc: &mut Allocation<'_>,
    data: &[u8],
    n: usize,
) -> DiskResult<u32> {
    if n != 0 && is_sparse(data, n) {
        return Ok(0);
    }
    let block = alloc.block()?;
    cache.write_block(block, &data_block(data, n).unwrap_or([0u8; BLOCK_SIZE]))?;
    Ok(block)
}

/// Write the index node covering data blocks `first..first + 256`. Returns
/// 0 when every block in range is a hole (and the range is not the first).
fn write_node<C: BlockCache + ?Sized>(
    cache: &mut C,
    alloc: &mut Allocation<'_>,
    data: &[u8],
    first: usize,
    blocks: usize,
) -> DiskResult<u32> {
    let end = (first + POINTERS_PER_NODE).min(blocks);
    if first != 0 && (first..end).all(|n| is_sparse(data, n)) {
        return Ok(0);
    }
    let key = alloc.block()?;
    let mut node = [0u8; BLOCK_SIZE];
    for n in first..end {
        let block = write_data(cache, alloc, data, n)?;
        set_node_pointer(&mut node, n - first, block)?;
    }
    cache.write_block(key, &node)?;
    Ok(key)
}

fn write_shape<C: BlockCache + ?Sized>(
    cache: &mut C,
    alloc: &mut Allocation<'_>,
    data: &[u8],
) -> DiskResult<ForkDescriptor> {
    if data.len() > MAX_EOF {
        return Err(DiskError::FileTooLarge(data.len()));
    }
    let blocks = data.len().div_ceil(BLOCK_SIZE).max(1);
    let storage_type = StorageType::for_blocks(blocks);
    let key_block = match storage_type {
        StorageType::Seedling => write_data(cache, alloc, data, 0)?,
        StorageType::Sapling => write_node(cache, alloc, data, 0, blocks)?,
        _ => {
            let key = alloc.block()?;
            let mut master = [0u8; BLOCK_SIZE];
            for (i, first) in (0..blocks).step_by(POINTERS_PER_NODE).enumerate() {
                let node = write_node(cache, alloc, data, first, blocks)?;
                set_node_pointer(&mut master, i, node)?;
            }
            cache.write_block(key, &master)?;
            key
        }
    };
    Ok(ForkDescriptor {
        storage_type,
        key_block,
        blocks_used: alloc.used(),
        eof: data.len() as u32,
    })
}

/// Store `data` as a new fork, allocating from `bitmap`.
///
/// All-zero data blocks after the first, and index nodes that would only
/// point at holes, are left unallocated. On failure every block taken from
/// the bitmap is returned to it. Block 0 must already be marked used.
pub fn write_fork<C: BlockCache + ?Sized>(
    cache: &mut C,
    bitmap: &mut Bitmap,
    data: &[u8],
) -> DiskResult<ForkDescriptor> {
    let mut alloc = Allocation::new(bitmap);
    match write_shape(cache, &mut alloc, data) {
        Ok(desc) => Ok(desc),
        Err(err) => {
            alloc.rollback();
            Err(err)
        }
    }
}

fn write_extended_shape<C: BlockCache + ?Sized>(
    cache: &mut C,
    alloc: &mut Allocation<'_>,
    data: &[u8],
    resource: &[u8],
) -> DiskResult<ForkDescriptor> {
    let key = alloc.block()?;
    let mut data_fork = write_shape(cache, alloc, data)?;
    data_fork.blocks_used -= 1;
    let before = alloc.used();
    let mut resource_fork = write_shape(cache, alloc, resource)?;
    resource_fork.blocks_used -= before;

    let mut block = [0u8; BLOCK_SIZE];
    block[..MINI_ENTRY_LEN].copy_from_slice(&data_fork.to_mini()?);
    block[RESOURCE_ENTRY_AT..RESOURCE_ENTRY_AT + MINI_ENTRY_LEN]
        .copy_from_slice(&resource_fork.to_mini()?);
    cache.write_block(key, &block)?;
    Ok(ForkDescriptor {
        storage_type: StorageType::Extended,
        key_block: key,
        blocks_used: alloc.used(),
        eof: BLOCK_SIZE as u32,
    })
}

/// Store a file with both a data and a resource fork. The returned
/// descriptor is the extended key block; its `blocks_used` covers both
/// forks and the key block, and its `eof` is the key block's size.
pub fn write_extended<C: BlockCache + ?Sized>(
    cache: &mut C,
    bitmap: &mut Bitmap,
    data: &[u8],
    resource: &[u8],
) -> DiskResult<ForkDescriptor> {
    let mut alloc = Allocation::new(bitmap);
    match write_extended_shape(cache, &mut alloc, data, resource) {
        Ok(desc) => Ok(desc),
        Err(err) => {
            alloc.rollback();
            Err(err)
        }
    }
}

fn free_index<C: BlockCache + ?Sized>(
    cache: &mut C,
    bitmap: &mut Bitmap,
    block_ptr: u32,
    level: u32,
) -> DiskResult<()> {
    if block_ptr == 0 {
        return Ok(());
    }
    if level > 0 {
        let mut node = [0u8; BLOCK_SIZE];
        cache.read_block(block_ptr, &mut node)?;
        for index in 0..POINTERS_PER_NODE {
            free_index(cache, bitmap, node_pointer(&node, index), level - 1)?;
        }
    }
    bitmap.free_block(block_ptr);
    Ok(())
}

/// Return every block of a file (both forks if extended) to `bitmap`.
pub fn free_fork<C: BlockCache + ?Sized>(
    cache: &mut C,
    bitmap: &mut Bitmap,
    desc: &ForkDescriptor,
) -> DiskResult<()> {
    match desc.storage_type.levels() {
        Some(levels) => free_index(cache, bitmap, desc.key_block, levels),
        None => {
            for fork in [Fork::Data, Fork::Resource] {
                let inner = normalize(cache, desc, fork)?;
                free_fork(cache, bitmap, &inner)?;
            }
            bitmap.free_block(desc.key_block);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PooledCache;
    use crate::config::DeviceOptions;
    use crate::device::BlockDevice;
    use crate::image::ImageFormat;

    const BLOCKS: u32 = 1600;

    fn setup(dir: &tempfile::TempDir) -> (PooledCache, Bitmap) {
        let dev = BlockDevice::create(
            dir.path().join("vol.po"),
            ImageFormat::ProDosOrder,
            BLOCKS,
            &DeviceOptions::default(),
        )
        .unwrap();
        let mut bitmap = Bitmap::new(BLOCKS);
        // Boot blocks, volume directory and bitmap.
        for block in 0..7 {
            assert!(bitmap.alloc_block_at(block));
        }
        (PooledCache::new(dev, 32), bitmap)
    }

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31) ^ seed).collect()
    }

    #[test]
    fn test_storage_type_bytes() {
        assert_eq!(StorageType::try_from(3).unwrap(), StorageType::Tree);
        assert!(matches!(
            StorageType::try_from(4),
            Err(DiskError::InvalidStorageType(4))
        ));
        assert_eq!(StorageType::for_blocks(1), StorageType::Seedling);
        assert_eq!(StorageType::for_blocks(256), StorageType::Sapling);
        assert_eq!(StorageType::for_blocks(257), StorageType::Tree);
    }

    #[test]
    fn test_seedling_truncates_to_eof() {
        let dir = tempfile::tempdir().unwrap();
        let (mut cache, mut bitmap) = setup(&dir);
        let data = pattern(14, 0x41);
        let desc = write_fork(&mut cache, &mut bitmap, &data).unwrap();
        assert_eq!(desc.storage_type, StorageType::Seedling);
        assert_eq!(desc.blocks_used, 1);
        assert_eq!(read_fork(&mut cache, &desc, Fork::Data).unwrap(), data);
    }

    #[test]
    fn test_empty_fork_is_seedling() {
        let dir = tempfile::tempdir().unwrap();
        let (mut cache, mut bitmap) = setup(&dir);
        let desc = write_fork(&mut cache, &mut bitmap, &[]).unwrap();
        assert_eq!(desc.storage_type, StorageType::Seedling);
        assert_eq!(desc.eof, 0);
        assert!(read_fork(&mut cache, &desc, Fork::Data).unwrap().is_empty());
    }

    #[test]
    fn test_sapling_read_spans_two_children() {
        let dir = tempfile::tempdir().unwrap();
        let (mut cache, mut bitmap) = setup(&dir);
        let data = pattern(10 * BLOCK_SIZE, 0x05);
        let desc = write_fork(&mut cache, &mut bitmap, &data).unwrap();
        assert_eq!(desc.storage_type, StorageType::Sapling);
        assert_eq!(desc.blocks_used, 11);

        let mut buf = vec![0u8; 2 * BLOCK_SIZE];
        read_index(&mut cache, desc.key_block, &mut buf, 1, 4 * BLOCK_SIZE as u64).unwrap();
        assert_eq!(buf, data[4 * BLOCK_SIZE..6 * BLOCK_SIZE]);
    }

    #[test]
    fn test_tree_read_spans_two_index_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let (mut cache, mut bitmap) = setup(&dir);
        let data = pattern(300 * BLOCK_SIZE, 0x77);
        let desc = write_fork(&mut cache, &mut bitmap, &data).unwrap();
        assert_eq!(desc.storage_type, StorageType::Tree);
        // Master, two index nodes, 300 data blocks.
        assert_eq!(desc.blocks_used, 303);

        let mut buf = vec![0u8; 2 * BLOCK_SIZE];
        read_index(&mut cache, desc.key_block, &mut buf, 2, 255 * BLOCK_SIZE as u64).unwrap();
        assert_eq!(buf, data[255 * BLOCK_SIZE..257 * BLOCK_SIZE]);
        assert_eq!(read_fork(&mut cache, &desc, Fork::Data).unwrap(), data);
    }

    #[test]
    fn test_sparse_tree_written() {
        let dir = tempfile::tempdir().unwrap();
        let (mut cache, mut bitmap) = setup(&dir);
        let mut data = vec![0u8; 600 * BLOCK_SIZE - 10];
        data[..BLOCK_SIZE].fill(0x11);
        data[300 * BLOCK_SIZE + 7] = 0x22;
        let last = data.len() - 1;
        data[last] = 0x33;

        let free = bitmap.free_blocks();
        let desc = write_fork(&mut cache, &mut bitmap, &data).unwrap();
        // Master, three index nodes, three data blocks.
        assert_eq!(desc.blocks_used, 7);
        assert_eq!(bitmap.free_blocks(), free - 7);
        assert_eq!(read_fork(&mut cache, &desc, Fork::Data).unwrap(), data);

        free_fork(&mut cache, &mut bitmap, &desc).unwrap();
        assert_eq!(bitmap.free_blocks(), free);
    }

    #[test]
    fn test_sparse_tree_built_by_hand() {
        let dir = tempfile::tempdir().unwrap();
        let (mut cache, _) = setup(&dir);
        // Master at 100: child 0 is a hole, child 1 is index node 101.
        let mut master = [0u8; BLOCK_SIZE];
        set_node_pointer(&mut master, 1, 101).unwrap();
        cache.write_block(100, &master).unwrap();
        // Index node 101: pointer 3 is data block 102.
        let mut node = [0u8; BLOCK_SIZE];
        set_node_pointer(&mut node, 3, 102).unwrap();
        cache.write_block(101, &node).unwrap();
        cache.write_block(102, &[0xEE; BLOCK_SIZE]).unwrap();

        let desc = ForkDescriptor {
            storage_type: StorageType::Tree,
            key_block: 100,
            blocks_used: 3,
            eof: (2 * 256 * BLOCK_SIZE) as u32,
        };
        let data = read_fork(&mut cache, &desc, Fork::Data).unwrap();
        let hit = (256 + 3) * BLOCK_SIZE;
        assert!(data[..hit].iter().all(|b| *b == 0));
        assert!(data[hit..hit + BLOCK_SIZE].iter().all(|b| *b == 0xEE));
        assert!(data[hit + BLOCK_SIZE..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_extended_file() {
        let dir = tempfile::tempdir().unwrap();
        let (mut cache, mut bitmap) = setup(&dir);
        let data = pattern(3 * BLOCK_SIZE + 1, 0x10);
        let resource = pattern(200, 0x20);
        let free = bitmap.free_blocks();

        let desc = write_extended(&mut cache, &mut bitmap, &data, &resource).unwrap();
        assert_eq!(desc.storage_type, StorageType::Extended);
        // Key block, sapling (index + 4 data), seedling.
        assert_eq!(desc.blocks_used, 7);

        let data_fork = normalize(&mut cache, &desc, Fork::Data).unwrap();
        assert_eq!(data_fork.storage_type, StorageType::Sapling);
        assert_eq!(data_fork.blocks_used, 5);
        assert_eq!(data_fork.eof as usize, data.len());
        let resource_fork = normalize(&mut cache, &desc, Fork::Resource).unwrap();
        assert_eq!(resource_fork.storage_type, StorageType::Seedling);
        assert_eq!(resource_fork.blocks_used, 1);

        assert_eq!(read_fork(&mut cache, &desc, Fork::Data).unwrap(), data);
        assert_eq!(read_fork(&mut cache, &desc, Fork::Resource).unwrap(), resource);

        free_fork(&mut cache, &mut bitmap, &desc).unwrap();
        assert_eq!(bitmap.free_blocks(), free);
    }

    #[test]
    fn test_plain_file_has_no_resource_fork() {
        let dir = tempfile::tempdir().unwrap();
        let (mut cache, mut bitmap) = setup(&dir);
        let desc = write_fork(&mut cache, &mut bitmap, b"hello").unwrap();
        assert!(matches!(
            normalize(&mut cache, &desc, Fork::Resource),
            Err(DiskError::InvalidFork(_))
        ));
    }

    #[test]
    fn test_invalid_mini_entry() {
        let dir = tempfile::tempdir().unwrap();
        let (mut cache, _) = setup(&dir);
        let mut key = [0u8; BLOCK_SIZE];
        key[0] = 0x0D;
        cache.write_block(50, &key).unwrap();
        let desc = ForkDescriptor {
            storage_type: StorageType::Extended,
            key_block: 50,
            blocks_used: 1,
            eof: 512,
        };
        assert!(matches!(
            normalize(&mut cache, &desc, Fork::Data),
            Err(DiskError::InvalidStorageType(0x0D))
        ));
    }

    #[test]
    fn test_disk_full_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let (mut cache, _) = setup(&dir);
        let mut bitmap = Bitmap::new(BLOCKS);
        for block in 0..BLOCKS - 5 {
            assert!(bitmap.alloc_block_at(block));
        }
        let data = pattern(8 * BLOCK_SIZE, 0x01);
        assert!(matches!(
            write_fork(&mut cache, &mut bitmap, &data),
            Err(DiskError::DiskFull)
        ));
        assert_eq!(bitmap.free_blocks(), 5);
    }

    #[test]
    fn test_file_too_large() {
        let dir = tempfile::tempdir().unwrap();
        let (mut cache, mut bitmap) = setup(&dir);
        let data = vec![0u8; MAX_EOF + 1];
        assert!(matches!(
            write_fork(&mut cache, &mut bitmap, &data),
            Err(DiskError::FileTooLarge(_))
        ));
    }
}
