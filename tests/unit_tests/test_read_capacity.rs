use anyhow::Result;
use sg_xfer::control_block::read_capacity::{
    Capacity, RC10_LEN, encode_read_capacity10, encode_read_capacity16,
    parse_read_capacity10_zerocopy, parse_read_capacity16_zerocopy,
};

#[test]
fn test_rc10_parse() -> Result<()> {
    let mut buf = [0u8; RC10_LEN];
    assert_eq!(encode_read_capacity10(&mut buf, 2048, 512), 8);
    assert_eq!(buf, [0x00, 0x00, 0x07, 0xFF, 0x00, 0x00, 0x02, 0x00]);

    let raw = parse_read_capacity10_zerocopy(&buf)?;
    assert!(!raw.indicates_overflow());
    let cap = Capacity::from(raw);
    assert_eq!(cap, Capacity {
        blocks: 2048,
        block_size: 512
    });
    assert_eq!(cap.bytes(), 2048 * 512);
    Ok(())
}

#[test]
fn test_rc10_overflow_sentinel() -> Result<()> {
    let mut buf = [0u8; RC10_LEN];
    encode_read_capacity10(&mut buf, 0x1_0000_0010, 4096);
    let raw = parse_read_capacity10_zerocopy(&buf)?;
    assert!(raw.indicates_overflow());
    Ok(())
}

#[test]
fn test_rc16_parse() -> Result<()> {
    let mut buf = [0u8; 32];
    assert_eq!(encode_read_capacity16(&mut buf, 0x1_0000_0010, 4096), 32);
    let cap = Capacity::from(parse_read_capacity16_zerocopy(&buf)?);
    assert_eq!(cap.blocks, 0x1_0000_0010);
    assert_eq!(cap.block_size, 4096);
    Ok(())
}

#[test]
fn test_short_buffers_fail() {
    assert!(parse_read_capacity10_zerocopy(&[0u8; 7]).is_err());
    assert!(parse_read_capacity16_zerocopy(&[0u8; 11]).is_err());
}
