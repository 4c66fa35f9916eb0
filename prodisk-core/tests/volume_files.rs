//! Allocate and store files on a volume, close it, and read them back.

use prodisk_core::bitmap::bitmap_blocks;
use prodisk_core::index_tree::{free_fork, read_fork, write_extended, write_fork};
use prodisk_core::{
    Backing, Bitmap, DeviceOptions, Fork, ForkDescriptor, ImageFormat, Session, StorageType,
    BLOCK_SIZE,
};

/// Boot blocks 0-1, volume directory 2-5, bitmap from 6.
const BITMAP_START: u32 = 6;

fn fresh_bitmap(blocks: u32) -> Bitmap {
    let mut bitmap = Bitmap::new(blocks);
    for block in 0..BITMAP_START + bitmap_blocks(blocks) {
        assert!(bitmap.alloc_block_at(block));
    }
    bitmap
}

fn text(len: usize) -> Vec<u8> {
    b"THE QUICK BROWN FOX JUMPS OVER THE LAZY DOG. "
        .iter()
        .copied()
        .cycle()
        .take(len)
        .collect()
}

fn store_and_reload(format: ImageFormat, name: &str, blocks: u32, options: &DeviceOptions) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(name);
    let mut session = Session::new();

    let small = text(100);
    let mut sparse = vec![0u8; 70_000];
    sparse[..5].copy_from_slice(b"BEGIN");
    sparse[69_995..].copy_from_slice(b"END!!");
    let large = text(200 * BLOCK_SIZE + 17);

    let id = session.create(&path, format, blocks, options).unwrap();
    let descs: Vec<ForkDescriptor> = {
        let cache = session.cache(id).unwrap();
        let mut bitmap = fresh_bitmap(blocks);
        let descs = vec![
            write_fork(cache, &mut bitmap, &small).unwrap(),
            write_fork(cache, &mut bitmap, &sparse).unwrap(),
            write_fork(cache, &mut bitmap, &large).unwrap(),
        ];
        bitmap.write(cache, BITMAP_START).unwrap();
        descs
    };
    assert_eq!(descs[0].storage_type, StorageType::Seedling);
    assert_eq!(descs[1].storage_type, StorageType::Sapling);
    // Index block, first and last data blocks only.
    assert_eq!(descs[1].blocks_used, 3);
    assert_eq!(descs[2].storage_type, StorageType::Sapling);
    session.close(id).unwrap();

    let id = session.open(&path, options).unwrap();
    let cache = session.cache(id).unwrap();
    let mut bitmap = Bitmap::load(cache, BITMAP_START, blocks).unwrap();
    let used: u32 = descs.iter().map(|d| d.blocks_used).sum();
    let reserved = BITMAP_START + bitmap_blocks(blocks);
    assert_eq!(bitmap.free_blocks(), blocks - reserved - used);

    assert_eq!(read_fork(cache, &descs[0], Fork::Data).unwrap(), small);
    assert_eq!(read_fork(cache, &descs[1], Fork::Data).unwrap(), sparse);
    assert_eq!(read_fork(cache, &descs[2], Fork::Data).unwrap(), large);

    for desc in &descs {
        free_fork(cache, &mut bitmap, desc).unwrap();
    }
    assert_eq!(bitmap.free_blocks(), blocks - reserved);
    session.close_all().unwrap();
}

#[test]
fn test_files_on_mapped_prodos_volume() {
    store_and_reload(ImageFormat::ProDosOrder, "vol.po", 1600, &DeviceOptions::default());
}

#[test]
fn test_files_on_dos_order_volume() {
    store_and_reload(ImageFormat::DosOrder, "vol.dsk", 560, &DeviceOptions::default());
}

#[test]
fn test_files_on_nibble_volume() {
    store_and_reload(ImageFormat::Nibble, "vol.nib", 560, &DeviceOptions::default());
}

#[test]
fn test_files_on_descriptor_two_img_volume() {
    let options = DeviceOptions::default().with_backing(Backing::Descriptor);
    store_and_reload(ImageFormat::TwoImg, "vol.2mg", 1600, &options);
}

#[test]
fn test_extended_file_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vol.dc42");
    let options = DeviceOptions::default();
    let mut session = Session::new();

    let data = text(300 * BLOCK_SIZE);
    let resource = text(700);
    let id = session
        .create(&path, ImageFormat::DiskCopy42, 1600, &options)
        .unwrap();
    let desc = {
        let cache = session.cache(id).unwrap();
        let mut bitmap = fresh_bitmap(1600);
        let desc = write_extended(cache, &mut bitmap, &data, &resource).unwrap();
        bitmap.write(cache, BITMAP_START).unwrap();
        desc
    };
    session.close(id).unwrap();

    let id = session.open(&path, &options).unwrap();
    let cache = session.cache(id).unwrap();
    assert_eq!(read_fork(cache, &desc, Fork::Data).unwrap(), data);
    assert_eq!(read_fork(cache, &desc, Fork::Resource).unwrap(), resource);
    let bitmap = Bitmap::load(cache, BITMAP_START, 1600).unwrap();
    assert!(!bitmap.is_free(desc.key_block));
    session.close_all().unwrap();
}
