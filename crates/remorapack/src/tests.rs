use crate::*;
use rand::Rng;

// ============================================================================
//  SCALAR TESTS (Happy Path)
// ============================================================================

#[test]
fn test_scalar_roundtrip() -> Result<()> {
    let mut buf = WireBuffer::new();
    buf.append(7u8)?;
    buf.append(-3i16)?;
    buf.append(u32::MAX)?;
    buf.append(i64::MIN)?;
    buf.append(std::f64::consts::PI)?;

    assert_eq!(buf.get::<u8>()?, 7);
    assert_eq!(buf.get::<i16>()?, -3);
    assert_eq!(buf.get::<u32>()?, u32::MAX);
    assert_eq!(buf.get::<i64>()?, i64::MIN);
    assert_eq!(buf.get::<f64>()?, std::f64::consts::PI);
    assert!(buf.is_empty());
    Ok(())
}

#[test]
fn test_roundtrip_through_fresh_copy() -> Result<()> {
    let mut buf = WireBuffer::new();
    buf.append(0xdead_beef_u32)?;
    buf.append(1.5f32)?;

    let copy = WireBuffer::from_bytes(buf.as_bytes())?;
    assert_eq!(copy.get::<u32>()?, 0xdead_beef);
    assert_eq!(copy.get::<f32>()?, 1.5);
    Ok(())
}

#[test]
fn test_unaligned_reads() -> Result<()> {
    let mut buf = WireBuffer::new();
    buf.append(1u8)?;
    buf.append(0x0102_0304_0506_0708_u64)?;

    assert_eq!(buf.get::<u8>()?, 1);
    assert_eq!(buf.get::<u64>()?, 0x0102_0304_0506_0708);
    Ok(())
}

#[test]
fn test_get_past_end_is_range_error() -> Result<()> {
    let mut buf = WireBuffer::new();
    buf.append(5u16)?;

    assert_eq!(buf.get::<u32>(), Err(Error::Range { wanted: 4, available: 2 }));
    // the failed read must not move the cursor
    assert_eq!(buf.offset(), 0);
    assert_eq!(buf.get::<u16>()?, 5);
    Ok(())
}

#[test]
fn test_marshal_handle() -> Result<()> {
    let value = 42u32;
    let handle: *const u32 = &value;

    let mut buf = WireBuffer::new();
    buf.append_marshal(handle)?;
    buf.append_marshal(std::ptr::null::<u8>())?;

    assert_eq!(buf.unmarshal::<u32>()? as *const u32, handle);
    assert!(buf.unmarshal::<u8>()?.is_null());
    Ok(())
}

// ============================================================================
//  ARRAY TESTS
// ============================================================================

#[test]
fn test_array_roundtrip() -> Result<()> {
    let data = [1i32, -2, 3, -4];
    let mut buf = WireBuffer::new();
    buf.append_array(Some(&data[..]))?;

    assert_eq!(buf.len(), PREFIX_SIZE + 16);
    assert_eq!(buf.get_array::<i32>(4)?, Some(data.to_vec()));
    assert!(buf.is_empty());
    Ok(())
}

#[test]
fn test_null_array_law() -> Result<()> {
    for n in [0usize, 1, 17, 4096] {
        let mut buf = WireBuffer::new();
        buf.append_array::<u64>(None)?;
        assert_eq!(buf.len(), PREFIX_SIZE);
        assert_eq!(buf.get_array::<u64>(n)?, None);
    }
    Ok(())
}

#[test]
fn test_empty_slice_decodes_as_absent() -> Result<()> {
    let mut buf = WireBuffer::new();
    buf.append_array::<u16>(Some(&[]))?;
    assert!(buf.assign::<u16>(0)?.is_none());
    Ok(())
}

#[test]
fn test_short_array_is_range_error() -> Result<()> {
    let mut buf = WireBuffer::new();
    buf.append_array(Some(&[1u8, 2, 3][..]))?;

    let err = buf.get_array::<u8>(8).unwrap_err();
    assert_eq!(err, Error::Range { wanted: 8, available: 3 });
    Ok(())
}

#[test]
fn test_element_count_overflow_is_range_error() -> Result<()> {
    let mut buf = WireBuffer::new();
    buf.append_array(Some(&[1u32, 2, 3, 4][..]))?;

    // 4 * (usize::MAX / 4 + 2) wraps around to a byte count of 4
    let err = buf.get_array::<u32>(usize::MAX / 4 + 2).unwrap_err();
    assert_eq!(err, Error::Range { wanted: usize::MAX, available: 16 });
    Ok(())
}

#[test]
fn test_get_all_uses_prefix() -> Result<()> {
    let mut buf = WireBuffer::new();
    buf.append_array(Some(&[9u16, 8, 7][..]))?;
    buf.append(1u8)?;

    assert_eq!(buf.get_all::<u16>()?, Some(vec![9, 8, 7]));
    assert_eq!(buf.get::<u8>()?, 1);
    Ok(())
}

#[test]
fn test_string_roundtrip() -> Result<()> {
    let mut buf = WireBuffer::new();
    buf.append_string("_Z6kernelPf")?;
    buf.append_string("")?;

    let s = buf.assign_string()?.expect("present");
    assert_eq!(s.to_str().unwrap(), "_Z6kernelPf");
    assert_eq!(s.to_bytes_with_nul().len(), 12);

    let empty = buf.assign_string()?.expect("present");
    assert_eq!(empty.to_bytes(), b"");
    Ok(())
}

#[test]
fn test_unterminated_string() -> Result<()> {
    let mut buf = WireBuffer::new();
    buf.append_array(Some(&b"abc"[..]))?;
    assert_eq!(buf.assign_string(), Err(Error::Unterminated));
    Ok(())
}

// ============================================================================
//  VIEW TESTS
// ============================================================================

#[test]
fn test_assign_is_zero_copy() -> Result<()> {
    let mut buf = WireBuffer::new();
    buf.append_array(Some(&[10u32, 20, 30][..]))?;

    let view = buf.assign::<u32>(3)?.expect("present");
    let base = buf.as_bytes().as_ptr() as usize;
    assert_eq!(view.as_bytes().as_ptr() as usize, base + PREFIX_SIZE);
    assert_eq!(view.len(), 3);
    assert_eq!(view.get(1), Some(20));
    assert_eq!(view.get(3), None);
    assert_eq!(view.to_vec(), vec![10, 20, 30]);
    Ok(())
}

#[test]
fn test_views_coexist() -> Result<()> {
    let mut buf = WireBuffer::new();
    buf.append_array(Some(&[1u8, 2][..]))?;
    buf.append_array(Some(&[3u8, 4][..]))?;

    let a = buf.assign_all::<u8>()?.expect("first");
    let b = buf.assign_all::<u8>()?.expect("second");
    assert_eq!(a.to_vec(), vec![1, 2]);
    assert_eq!(b.to_vec(), vec![3, 4]);
    Ok(())
}

#[test]
fn test_view_after_growth_sees_fresh_data() -> Result<()> {
    let mut buf = WireBuffer::with_block_size(16);
    buf.append_array(Some(&[1u32, 2][..]))?;
    assert_eq!(buf.size(), 16);

    {
        let view = buf.assign::<u32>(2)?.expect("present");
        assert_eq!(view.to_vec(), vec![1, 2]);
    }

    // growth reallocates; views can only be taken again afterwards
    buf.append_array(Some(&[3u32; 8][..]))?;
    assert!(buf.size() > 16);

    let reread = WireBuffer::from_bytes(buf.as_bytes())?;
    assert_eq!(reread.get_array::<u32>(2)?, Some(vec![1, 2]));
    assert_eq!(reread.get_array::<u32>(8)?, Some(vec![3; 8]));
    Ok(())
}

#[test]
fn test_delegate_fills_in_place() -> Result<()> {
    let mut out = WireBuffer::new();
    {
        let mut attrs = out.delegate::<u64>(2)?;
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs.get(0), Some(0));
        assert!(attrs.write(11));
        assert!(attrs.set(1, 22));
        assert!(!attrs.set(2, 33));
    }
    out.append(5i32)?;

    assert_eq!(out.get_array::<u64>(2)?, Some(vec![11, 22]));
    assert_eq!(out.get::<i32>()?, 5);
    Ok(())
}

#[test]
fn test_delegate_zeroes_reused_capacity() -> Result<()> {
    let mut buf = WireBuffer::new();
    buf.append([0xffu8; 32])?;
    buf.reset();

    let view = buf.delegate::<u8>(16)?;
    assert!((0..16).all(|i| view.get(i) == Some(0)));
    Ok(())
}

#[test]
fn test_delegate_overflow_is_alloc_error() -> Result<()> {
    let mut buf = WireBuffer::new();
    let err = buf.delegate::<u64>(usize::MAX / 4).unwrap_err();
    assert_eq!(err, Error::Alloc { requested: usize::MAX });
    assert_eq!(buf.len(), 0);

    let err = buf.read_values::<u64, _>(&mut [0u8; 8].as_slice(), usize::MAX / 4).unwrap_err();
    assert_eq!(err, Error::Alloc { requested: usize::MAX });
    assert_eq!(buf.len(), 0);
    Ok(())
}

#[test]
fn test_view_copy_from() -> Result<()> {
    let mut buf = WireBuffer::new();
    let mut view = buf.delegate::<i16>(3)?;
    assert_eq!(view.copy_from(&[1, 2, 3, 4]), 3);
    assert_eq!(view.get(2), Some(3));
    Ok(())
}

// ============================================================================
//  GROWTH TESTS
// ============================================================================

#[test]
fn test_growth_is_block_aligned() -> Result<()> {
    let mut buf = WireBuffer::with_block_size(8);
    assert_eq!(buf.size(), 0);

    buf.append(1u32)?;
    assert_eq!(buf.size(), 8);
    buf.append(2u32)?;
    assert_eq!(buf.size(), 8);
    buf.append(3u8)?;
    assert_eq!(buf.size(), 16);
    Ok(())
}

#[test]
fn test_growth_transparency_randomized() -> Result<()> {
    let mut rng = rand::thread_rng();
    for _ in 0..200 {
        let block = rng.gen_range(1..=64);
        let count = rng.gen_range(1..=100);
        let values: Vec<u32> = (0..count).map(|_| rng.r#gen()).collect();

        let mut buf = WireBuffer::with_block_size(block);
        for v in &values {
            buf.append(*v)?;
        }

        let total = values.len() * 4;
        assert_eq!(buf.len(), total);
        assert_eq!(buf.size(), total.div_ceil(block) * block, "block {}", block);
        for v in &values {
            assert_eq!(buf.get::<u32>()?, *v);
        }
    }
    Ok(())
}

#[test]
fn test_zero_block_size_is_clamped() -> Result<()> {
    let mut buf = WireBuffer::with_block_size(0);
    buf.append(1u16)?;
    assert_eq!(buf.block_size(), 1);
    assert_eq!(buf.size(), 2);
    Ok(())
}

// ============================================================================
//  BACKWARD CURSOR TESTS
// ============================================================================

#[test]
fn test_back_get_pops_in_reverse() -> Result<()> {
    let mut buf = WireBuffer::new();
    buf.append(1u32)?;
    buf.append(2u32)?;
    buf.append(3u32)?;

    assert_eq!(buf.back_get::<u32>()?, 3);
    assert_eq!(buf.back_get::<u32>()?, 2);
    assert_eq!(buf.back_get::<u32>()?, 1);
    assert!(matches!(buf.back_get::<u32>(), Err(Error::Range { .. })));
    assert_eq!(buf.back_offset(), 0);
    Ok(())
}

#[test]
fn test_back_assign_skips_prefix() -> Result<()> {
    let mut buf = WireBuffer::new();
    buf.append_array(Some(&[1u16, 2][..]))?;
    buf.append_array(Some(&[3u16, 4, 5][..]))?;

    assert_eq!(buf.back_assign::<u16>(3)?.to_vec(), vec![3, 4, 5]);
    assert_eq!(buf.back_assign::<u16>(2)?.to_vec(), vec![1, 2]);
    assert_eq!(buf.back_offset(), 0);
    Ok(())
}

#[test]
fn test_back_assign_overflow_is_range_error() -> Result<()> {
    let mut buf = WireBuffer::new();
    buf.append_array(Some(&[1u32, 2, 3, 4][..]))?;

    let err = buf.back_assign::<u32>(usize::MAX / 4 + 2).unwrap_err();
    assert_eq!(err, Error::Range { wanted: usize::MAX, available: 24 });

    // the byte count fits, the skipped prefix does not
    let err = buf.back_assign::<u8>(usize::MAX).unwrap_err();
    assert_eq!(err, Error::Range { wanted: usize::MAX, available: 24 });

    assert_eq!(buf.back_offset(), 24);
    assert_eq!(buf.back_assign::<u32>(4)?.to_vec(), vec![1, 2, 3, 4]);
    Ok(())
}

#[test]
fn test_cursors_never_overlap() -> Result<()> {
    let mut buf = WireBuffer::new();
    for i in 0..4u32 {
        buf.append(i)?;
    }

    assert_eq!(buf.get::<u32>()?, 0);
    assert_eq!(buf.back_get::<u32>()?, 3);
    assert_eq!(buf.get::<u32>()?, 1);
    assert_eq!(buf.back_get::<u32>()?, 2);

    // both cursors met in the middle
    assert_eq!(buf.offset(), buf.back_offset());
    assert!(buf.get::<u32>().is_err());
    assert!(buf.back_get::<u32>().is_err());
    assert!(buf.offset() <= buf.len());
    Ok(())
}

#[test]
fn test_append_resets_back_cursor() -> Result<()> {
    let mut buf = WireBuffer::new();
    buf.append(1u8)?;
    buf.back_get::<u8>()?;
    assert_eq!(buf.back_offset(), 0);

    buf.append(2u8)?;
    assert_eq!(buf.back_offset(), buf.len());
    Ok(())
}

// ============================================================================
//  FRAMING TESTS
// ============================================================================

#[test]
fn test_reset_keeps_capacity() -> Result<()> {
    let mut buf = WireBuffer::new();
    buf.append([0u8; 128])?;
    buf.get::<u8>()?;
    let size = buf.size();

    buf.reset();
    assert_eq!(buf.len(), 0);
    assert_eq!(buf.offset(), 0);
    assert_eq!(buf.back_offset(), 0);
    assert_eq!(buf.size(), size);
    assert!(buf.is_empty());
    Ok(())
}

#[test]
fn test_dump_then_reset_from() -> Result<()> {
    let mut buf = WireBuffer::new();
    buf.append(1i32)?;
    buf.append_string("payload")?;

    let mut wire = Vec::new();
    buf.dump(&mut wire)?;
    assert_eq!(&wire[..PREFIX_SIZE], &(buf.len() as u64).to_ne_bytes());
    assert_eq!(wire.len(), PREFIX_SIZE + buf.len());

    let mut target = WireBuffer::new();
    target.append(99u64)?;
    target.reset_from(&mut wire.as_slice())?;
    assert_eq!(target.as_bytes(), buf.as_bytes());
    assert_eq!(target.get::<i32>()?, 1);
    assert_eq!(target.assign_string()?.unwrap().to_str().unwrap(), "payload");
    Ok(())
}

#[test]
fn test_from_reader_truncated() {
    let mut wire = Vec::new();
    wire.extend_from_slice(&16u64.to_ne_bytes());
    wire.extend_from_slice(&[1, 2, 3]);

    let err = WireBuffer::from_reader(&mut wire.as_slice()).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}

#[test]
fn test_read_values_appends_from_source() -> Result<()> {
    let source: Vec<u8> = [7u32, 8u32].iter().flat_map(|v| v.to_ne_bytes()).collect();

    let mut buf = WireBuffer::with_block_size(4);
    buf.append(1u32)?;
    buf.read_values::<u32, _>(&mut source.as_slice(), 2)?;

    assert_eq!(buf.len(), 12);
    assert_eq!(buf.size(), 12);
    assert_eq!(buf.back_offset(), 12);
    assert_eq!(buf.get::<u32>()?, 1);
    assert_eq!(buf.get::<u32>()?, 7);
    assert_eq!(buf.get::<u32>()?, 8);
    Ok(())
}

#[test]
fn test_bogus_frame_length_fails_on_source() -> Result<()> {
    let mut wire = Vec::new();
    wire.extend_from_slice(&u64::MAX.to_ne_bytes());
    wire.extend_from_slice(&[1, 2, 3, 4]);

    let mut buf = WireBuffer::new();
    let err = buf.reset_from(&mut wire.as_slice()).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
    assert_eq!(buf.len(), 0);
    assert!(buf.size() <= READ_CHUNK);
    Ok(())
}

#[test]
fn test_frame_larger_than_read_chunk() -> Result<()> {
    let payload: Vec<u8> = (0..READ_CHUNK * 3 + 17).map(|i| i as u8).collect();
    let mut buf = WireBuffer::new();
    buf.append_array(Some(&payload[..]))?;

    let mut wire = Vec::new();
    buf.dump(&mut wire)?;

    let target = WireBuffer::from_reader(&mut wire.as_slice())?;
    assert_eq!(target.len(), buf.len());
    assert_eq!(target.get_all::<u8>()?, Some(payload));
    Ok(())
}
