use std::collections::BTreeSet;
use std::error::Error;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use simdrv_assign::{ResourceId, UsageId};
use simdrv_d3d9::{
    Driver, DriverConfig, DriverError, ImageKind, LockFlags, LockPrefill, LockRegion, SurfaceDesc,
    VolumeDesc,
};
use simdrv_mem::{DeviceMemory, VecDeviceMemory};
use simdrv_state::NodeHandle;
use simdrv_tiling::{D3dFormat, TiledLayout, TilingError, TilingParams};
use simdrv_types::{Id, Name};

fn setup(config: DriverConfig) -> (Driver, Rc<VecDeviceMemory>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let memory = Rc::new(VecDeviceMemory::default());
    let driver = Driver::new(memory.clone(), config).unwrap();
    (driver, memory)
}

fn volume(
    driver: &mut Driver,
    device: NodeHandle,
    (width, height, depth): (u32, u32, u32),
    format: D3dFormat,
) -> NodeHandle {
    driver
        .create_volume(
            device,
            VolumeDesc {
                width,
                height,
                depth,
                format,
            },
        )
        .unwrap()
}

fn layout(width: u32, height: u32, depth: u32, format: D3dFormat) -> TiledLayout {
    TiledLayout::new(width, height, depth, format.info(), TilingParams::default()).unwrap()
}

/// Four bytes identifying texel `(x, y)`.
fn texel_tag(x: u32, y: u32) -> [u8; 4] {
    [x as u8, y as u8, 0x5A, 0xA5]
}

#[test]
fn volume_is_backed_by_tiled_memory() {
    let (mut driver, memory) = setup(DriverConfig::default());
    let device = driver.create_device().unwrap();
    let vol = volume(&mut driver, device, (8, 8, 1), D3dFormat::A8R8G8B8);

    assert_eq!(memory.live_allocations(), 1);
    assert_eq!(memory.allocated_bytes(), 256);

    let md = driver.image_memory(vol).unwrap();
    let assigned = driver
        .context()
        .registry()
        .table(Name::VolumeMemory)
        .unwrap()
        .get_assigned_to(UsageId::new(Name::Volume, 0))
        .unwrap();
    assert_eq!(assigned, ResourceId::new(Name::Memory, md.raw()));

    assert_eq!(memory.region_bytes(md).unwrap(), vec![0xCD; 256]);
    let data = driver
        .tree()
        .get_child(vol, Id::named(Name::Data))
        .unwrap();
    assert_eq!(driver.tree().data(data).unwrap(), &[0xCD; 256][..]);
}

#[test]
fn full_lock_box_reaches_device_memory() {
    let (mut driver, memory) = setup(DriverConfig::default());
    let device = driver.create_device().unwrap();
    let vol = volume(&mut driver, device, (8, 8, 1), D3dFormat::A8R8G8B8);

    let lock = driver
        .lock_box(vol, LockRegion::full(8, 8, 1), LockFlags::empty())
        .unwrap();
    assert_eq!(driver.lock_data(lock).unwrap().len(), 256);
    let tree = driver.tree();
    assert_eq!(tree.child_value::<i32>(lock, Id::named(Name::RowPitch)).unwrap(), 32);
    assert_eq!(tree.child_value::<i32>(lock, Id::named(Name::SlicePitch)).unwrap(), 256);

    driver.write_lock(lock, &[0xAB; 256]).unwrap();

    let md = driver.image_memory(vol).unwrap();
    assert_eq!(memory.region_bytes(md).unwrap(), vec![0xAB; 256]);
}

#[test]
fn every_texel_lands_at_its_morton_offset() {
    let (mut driver, memory) = setup(DriverConfig::default());
    let device = driver.create_device().unwrap();
    let vol = volume(&mut driver, device, (8, 8, 1), D3dFormat::A8R8G8B8);
    let lock = driver
        .lock_box(vol, LockRegion::full(8, 8, 1), LockFlags::empty())
        .unwrap();

    let mut bytes = Vec::with_capacity(256);
    for y in 0..8 {
        for x in 0..8 {
            bytes.extend_from_slice(&texel_tag(x, y));
        }
    }
    driver.write_lock(lock, &bytes).unwrap();

    let device_bytes = driver.read_image_memory(vol).unwrap();
    let tiled = layout(8, 8, 1, D3dFormat::A8R8G8B8);
    let mut offsets = BTreeSet::new();
    for y in 0..8 {
        for x in 0..8 {
            let offset = tiled.element_offset(x, y, 0);
            assert_eq!(&device_bytes[offset..offset + 4], &texel_tag(x, y));
            offsets.insert(offset);
        }
    }
    assert_eq!(offsets.len(), 64);
    assert_eq!(device_bytes, memory.region_bytes(driver.image_memory(vol).unwrap()).unwrap());
}

#[test]
fn compressed_volume_is_sized_in_blocks() {
    let (mut driver, memory) = setup(DriverConfig::default());
    let device = driver.create_device().unwrap();
    volume(&mut driver, device, (8, 8, 1), D3dFormat::Dxt5);

    // 2x2 blocks of 16 bytes.
    assert_eq!(memory.allocated_bytes(), 64);
}

#[test]
fn deep_volume_slices_are_separate() {
    let (mut driver, _memory) = setup(DriverConfig::default());
    let device = driver.create_device().unwrap();
    let vol = volume(&mut driver, device, (4, 4, 2), D3dFormat::L8);

    let lock = driver
        .lock_box(vol, LockRegion::new(0, 0, 1, 4, 4, 2), LockFlags::empty())
        .unwrap();
    assert_eq!(driver.lock_data(lock).unwrap().len(), 16);
    driver.write_lock(lock, &[7; 16]).unwrap();

    let bytes = driver.read_image_memory(vol).unwrap();
    let tiled = layout(4, 4, 2, D3dFormat::L8);
    assert_eq!(bytes.len(), 32);
    assert_eq!(&bytes[..tiled.slice_bytes()], &[0xCD; 16][..]);
    assert_eq!(&bytes[tiled.slice_bytes()..], &[7; 16][..]);
}

#[test]
fn removing_a_volume_releases_its_memory() {
    let (mut driver, memory) = setup(DriverConfig::default());
    let device = driver.create_device().unwrap();
    let vol = volume(&mut driver, device, (8, 8, 1), D3dFormat::A8R8G8B8);
    let md = driver.image_memory(vol).unwrap();

    driver.release(vol).unwrap();

    assert!(!memory.is_live(md));
    assert_eq!(memory.live_allocations(), 0);
    let registry = driver.context().registry();
    let table = registry.table(Name::VolumeMemory).unwrap();
    assert!(table.is_empty());
    assert!(!table.is_assigned(UsageId::new(Name::Volume, 0)));
}

#[test]
fn releasing_a_device_drops_its_images_and_tables() {
    let (mut driver, memory) = setup(DriverConfig::default());
    let device = driver.create_device().unwrap();
    let vol = volume(&mut driver, device, (8, 8, 1), D3dFormat::A8R8G8B8);
    driver
        .create_surface(
            device,
            SurfaceDesc {
                width: 16,
                height: 16,
                format: D3dFormat::R5G6B5,
            },
        )
        .unwrap();
    driver
        .lock_box(vol, LockRegion::full(8, 8, 1), LockFlags::empty())
        .unwrap();
    assert_eq!(memory.live_allocations(), 2);

    driver.release(device).unwrap();

    assert_eq!(memory.live_allocations(), 0);
    assert_eq!(driver.tree().len(), 1);
    let registry = driver.context().registry();
    assert!(registry.table(Name::VolumeMemory).is_none());
    assert!(registry.table(Name::SurfaceMemory).is_none());
}

#[test]
fn image_indices_are_unique_across_devices() {
    let (mut driver, _memory) = setup(DriverConfig::default());
    let first = driver.create_device().unwrap();
    let second = driver.create_device().unwrap();
    let a = volume(&mut driver, first, (4, 4, 1), D3dFormat::A8R8G8B8);
    let b = volume(&mut driver, second, (4, 4, 1), D3dFormat::A8R8G8B8);

    assert_ne!(driver.image_memory(a).unwrap(), driver.image_memory(b).unwrap());
    let registry = driver.context().registry();
    assert_eq!(registry.table(Name::VolumeMemory).unwrap().len(), 2);
}

#[test]
fn lock_rect_scatters_only_its_region() {
    let (mut driver, _memory) = setup(DriverConfig::default());
    let device = driver.create_device().unwrap();
    let surface = driver
        .create_surface(
            device,
            SurfaceDesc {
                width: 8,
                height: 4,
                format: D3dFormat::R5G6B5,
            },
        )
        .unwrap();

    let lock = driver
        .lock_rect(surface, LockRegion::rect(2, 1, 6, 3), LockFlags::empty())
        .unwrap();
    assert_eq!(
        driver
            .tree()
            .child_value::<i32>(lock, Id::named(Name::Pitch))
            .unwrap(),
        8
    );
    let bytes: Vec<u8> = (0..16).collect();
    driver.write_lock(lock, &bytes).unwrap();

    let image = driver.read_image_memory(surface).unwrap();
    // Square 8x8 domain of 2-byte texels.
    assert_eq!(image.len(), 128);
    let tiled = layout(8, 4, 1, D3dFormat::R5G6B5);
    for y in 0..4u32 {
        for x in 0..8u32 {
            let offset = tiled.element_offset(x, y, 0);
            let expected = if (2..6).contains(&x) && (1..3).contains(&y) {
                let at = ((y - 1) * 8 + (x - 2) * 2) as usize;
                [bytes[at], bytes[at + 1]]
            } else {
                [0xCD, 0xCD]
            };
            assert_eq!(&image[offset..offset + 2], &expected, "texel ({x}, {y})");
        }
    }
}

#[test]
fn compressed_lock_rect_rounds_out_to_blocks() {
    let (mut driver, _memory) = setup(DriverConfig::default());
    let device = driver.create_device().unwrap();
    let surface = driver
        .create_surface(
            device,
            SurfaceDesc {
                width: 8,
                height: 8,
                format: D3dFormat::Dxt1,
            },
        )
        .unwrap();

    let lock = driver
        .lock_rect(surface, LockRegion::rect(2, 2, 6, 6), LockFlags::empty())
        .unwrap();
    assert_eq!(driver.lock_data(lock).unwrap().len(), 2 * 2 * 8);
    assert_eq!(
        driver
            .tree()
            .child_value::<i32>(lock, Id::named(Name::Pitch))
            .unwrap(),
        16
    );

    driver.write_lock(lock, &[0x11; 32]).unwrap();
    assert_eq!(driver.read_image_memory(surface).unwrap(), vec![0x11; 32]);
}

#[test]
fn partially_written_lock_overwrites_the_rest_with_zeroes() {
    let (mut driver, _memory) = setup(DriverConfig::default());
    let device = driver.create_device().unwrap();
    let vol = volume(&mut driver, device, (4, 4, 1), D3dFormat::A8R8G8B8);
    let lock = driver
        .lock_box(vol, LockRegion::full(4, 4, 1), LockFlags::empty())
        .unwrap();

    let data = driver.tree().get_child(lock, Id::named(Name::Data)).unwrap();
    driver.tree_mut().write_data(data, &[1, 2, 3, 4], 0).unwrap();

    let image = driver.read_image_memory(vol).unwrap();
    let first = layout(4, 4, 1, D3dFormat::A8R8G8B8).element_offset(0, 0, 0);
    let mut expected = vec![0u8; 64];
    expected[first..first + 4].copy_from_slice(&[1, 2, 3, 4]);
    assert_eq!(image, expected);
}

#[test]
fn prefill_gathers_the_image_unless_discarding() {
    let config = DriverConfig {
        lock_prefill: LockPrefill::UnlessDiscard,
        ..DriverConfig::default()
    };
    let (mut driver, _memory) = setup(config);
    let device = driver.create_device().unwrap();
    let vol = volume(&mut driver, device, (4, 4, 1), D3dFormat::A8R8G8B8);

    let full = driver
        .lock_box(vol, LockRegion::full(4, 4, 1), LockFlags::empty())
        .unwrap();
    assert_eq!(driver.lock_data(full).unwrap(), &[0xCD; 64][..]);
    let mut bytes = Vec::new();
    for y in 0..4 {
        for x in 0..4 {
            bytes.extend_from_slice(&texel_tag(x, y));
        }
    }
    driver.write_lock(full, &bytes).unwrap();
    driver.release(full).unwrap();

    let inner = LockRegion::new(1, 1, 0, 3, 3, 1);
    let kept = driver.lock_box(vol, inner, LockFlags::empty()).unwrap();
    let expected: Vec<u8> = [(1, 1), (2, 1), (1, 2), (2, 2)]
        .into_iter()
        .flat_map(|(x, y)| texel_tag(x, y))
        .collect();
    assert_eq!(driver.lock_data(kept).unwrap(), &expected[..]);

    let discarded = driver
        .lock_box(vol, inner, LockFlags::DISCARD | LockFlags::NOSYSLOCK)
        .unwrap();
    assert_eq!(driver.lock_data(discarded).unwrap(), &[0; 16][..]);
    assert_eq!(
        driver
            .tree()
            .child_value::<u32>(discarded, Id::named(Name::Flags))
            .unwrap(),
        0x2800
    );
}

#[test]
fn prefill_rejects_a_shrunken_image() {
    let config = DriverConfig {
        lock_prefill: LockPrefill::UnlessDiscard,
        ..DriverConfig::default()
    };
    let (mut driver, _memory) = setup(config);
    let device = driver.create_device().unwrap();
    let vol = volume(&mut driver, device, (4, 4, 1), D3dFormat::A8R8G8B8);
    let image_data = driver.tree().get_child(vol, Id::named(Name::Data)).unwrap();
    driver.tree_mut().set_data_size(image_data, 0).unwrap();

    let err = driver
        .lock_box(vol, LockRegion::full(4, 4, 1), LockFlags::empty())
        .unwrap_err();
    assert!(
        matches!(
            err,
            DriverError::ImageDataSize {
                expected: 64,
                actual: 0,
                ..
            }
        ),
        "unexpected error: {err}"
    );
    assert!(driver.tree().find_children_named(vol, Name::LockBox).is_empty());

    // Discarding locks never read the image.
    driver
        .lock_box(vol, LockRegion::full(4, 4, 1), LockFlags::DISCARD)
        .unwrap();
}

#[test]
fn locks_start_zeroed_by_default() {
    let (mut driver, _memory) = setup(DriverConfig::default());
    let device = driver.create_device().unwrap();
    let vol = volume(&mut driver, device, (4, 4, 1), D3dFormat::A8R8G8B8);

    let lock = driver
        .lock_box(vol, LockRegion::full(4, 4, 1), LockFlags::READONLY)
        .unwrap();
    assert_eq!(driver.lock_data(lock).unwrap(), &[0; 64][..]);
}

#[test]
fn lock_outside_the_image_is_rejected() {
    let (mut driver, _memory) = setup(DriverConfig::default());
    let device = driver.create_device().unwrap();
    let vol = volume(&mut driver, device, (8, 8, 1), D3dFormat::A8R8G8B8);

    let err = driver
        .lock_box(vol, LockRegion::full(9, 8, 1), LockFlags::empty())
        .unwrap_err();
    assert!(
        matches!(err, DriverError::InvalidLockRegion { width: 8, height: 8, depth: 1, .. }),
        "unexpected error: {err:?}"
    );
    assert!(driver
        .tree()
        .find_children_named(vol, Name::LockBox)
        .is_empty());

    // An empty region is valid and holds no data.
    let empty = driver
        .lock_box(vol, LockRegion::new(3, 3, 0, 3, 3, 1), LockFlags::empty())
        .unwrap();
    assert!(driver.lock_data(empty).unwrap().is_empty());
    driver.write_lock(empty, &[]).unwrap();
}

#[test]
fn unknown_formats_leave_nothing_behind() {
    let (mut driver, memory) = setup(DriverConfig::default());
    let device = driver.create_device().unwrap();

    let tree = driver.tree_mut();
    let vol = tree.create_node(Id::new(Name::Volume9, 100));
    tree.create_value_child(vol, Id::named(Name::Width), 4u32).unwrap();
    tree.create_value_child(vol, Id::named(Name::Height), 4u32).unwrap();
    tree.create_value_child(vol, Id::named(Name::Depth), 1u32).unwrap();
    tree.create_value_child(vol, Id::named(Name::Format), 0x1234u32).unwrap();
    tree.create_child(vol, Id::named(Name::Data)).unwrap();

    let err = tree.add_child(device, vol).unwrap_err();
    let cause = err
        .source()
        .and_then(|source| source.downcast_ref::<DriverError>())
        .unwrap();
    assert!(matches!(
        cause,
        DriverError::Tiling(TilingError::UnsupportedFormat(0x1234))
    ));
    assert_eq!(memory.live_allocations(), 0);

    // Nothing was set up, so taking the node out again is clean.
    driver.release(vol).unwrap();
}

#[test]
fn managers_adopt_and_release_existing_images() {
    let (mut driver, memory) = setup(DriverConfig::default());
    let device = driver.create_device().unwrap();
    let vol = volume(&mut driver, device, (4, 4, 1), D3dFormat::A8R8G8B8);
    let manager = driver
        .device_controller()
        .manager(ImageKind::Volume)
        .clone();

    driver
        .tree_mut()
        .remove_controller(device, &*manager)
        .unwrap();
    assert_eq!(memory.live_allocations(), 0);
    assert!(driver.image_memory(vol).is_err());

    driver.tree_mut().add_controller(device, manager).unwrap();
    assert_eq!(memory.live_allocations(), 1);
    let md = driver.image_memory(vol).unwrap();
    assert_eq!(memory.size_of(md).unwrap(), 64);
}
