//! Fixed 512-byte TAR header block codec.
//!
//! Field layout (ustar):
//!
//! | bytes     | field    | encoding                         |
//! |-----------|----------|----------------------------------|
//! | 0..100    | name     | NUL-terminated                   |
//! | 100..108  | mode     | octal                            |
//! | 124..136  | size     | octal, or GNU base-256           |
//! | 136..148  | mtime    | octal, or GNU base-256           |
//! | 148..156  | checksum | octal, NUL/space terminated      |
//! | 156       | typeflag | `'0'` file, `'5'` directory, ... |
//! | 257..265  | magic    | `"ustar\0" "00"` or `"ustar  \0"`  |
//! | 345..500  | prefix   | POSIX only, prepended with `/`   |

use crate::error::{ArchiverError, Result};

pub const BLOCK_SIZE: usize = 512;
pub const LONG_LINK_NAME: &str = "././@LongLink";

pub const TYPE_REGULAR: u8 = b'0';
pub const TYPE_DIRECTORY: u8 = b'5';
pub const TYPE_GNU_LONG_NAME: u8 = b'L';
pub const TYPE_GNU_LONG_LINK: u8 = b'K';

pub type Block = [u8; BLOCK_SIZE];

const NAME: (usize, usize) = (0, 100);
const MODE: (usize, usize) = (100, 108);
const UID: (usize, usize) = (108, 116);
const GID: (usize, usize) = (116, 124);
const SIZE: (usize, usize) = (124, 136);
const MTIME: (usize, usize) = (136, 148);
const CHECKSUM: (usize, usize) = (148, 156);
const TYPEFLAG: usize = 156;
const MAGIC: (usize, usize) = (257, 265);
const PREFIX: (usize, usize) = (345, 500);

const POSIX_MAGIC: &[u8; 6] = b"ustar\0";
const GNU_MAGIC: &[u8; 8] = b"ustar  \0";

pub const NAME_FIELD_LEN: usize = NAME.1 - NAME.0;

/// Header fields as they appear in one block, before long-name resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderFields {
    pub name: Vec<u8>,
    pub mode: u32,
    pub size: u64,
    pub mtime: u64,
    pub typeflag: u8,
}

impl HeaderFields {
    pub fn is_long_name(&self) -> bool {
        self.typeflag == TYPE_GNU_LONG_NAME
            || (self.typeflag != TYPE_GNU_LONG_LINK && self.name == LONG_LINK_NAME.as_bytes())
    }

    /// Pre-ustar writers mark directories only by a trailing `/`.
    pub fn is_directory(&self) -> bool {
        self.typeflag == TYPE_DIRECTORY
            || (matches!(self.typeflag, TYPE_REGULAR | b'\0') && self.name.last() == Some(&b'/'))
    }
}

/// Rounds `size` up to the next block boundary.
pub fn padded_size(size: u64) -> Option<u64> {
    let block = BLOCK_SIZE as u64;
    size.checked_add(block - 1).map(|s| s / block * block)
}

pub fn is_zero_block(block: &Block) -> bool {
    block.iter().all(|&b| b == 0)
}

/// Unsigned and signed header sums with the checksum field read as spaces.
fn header_sums(block: &Block) -> (u64, i64) {
    let mut unsigned = 0u64;
    let mut signed = 0i64;
    for (i, &b) in block.iter().enumerate() {
        let b = if (CHECKSUM.0..CHECKSUM.1).contains(&i) { b' ' } else { b };
        unsigned += u64::from(b);
        signed += i64::from(b as i8);
    }
    (unsigned, signed)
}

pub fn compute_checksum(block: &Block) -> u64 {
    header_sums(block).0
}

fn field(block: &Block, range: (usize, usize)) -> &[u8] {
    &block[range.0..range.1]
}

/// Bytes up to (not including) the first NUL.
fn cstr(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    &bytes[..end]
}

/// Parses an octal numeric field (leading spaces/NULs skipped, terminated by
/// NUL or space) or a GNU base-256 field (high bit of the first byte set).
pub fn parse_numeric(bytes: &[u8]) -> Option<u64> {
    if let Some(&first) = bytes.first() {
        if first & 0x80 != 0 {
            // Negative base-256 values are not meaningful for size or mtime.
            if first & 0x40 != 0 {
                return None;
            }
            let mut value = u64::from(first & 0x3f);
            for &b in &bytes[1..] {
                value = value.checked_mul(256)?.checked_add(u64::from(b))?;
            }
            return Some(value);
        }
    }

    let start = bytes.iter().position(|&b| b != b' ' && b != 0).unwrap_or(bytes.len());
    let digits = &bytes[start..];
    let end = digits.iter().position(|&b| b == b' ' || b == 0).unwrap_or(digits.len());
    let digits = &digits[..end];
    if digits.is_empty() {
        return Some(0);
    }
    let mut value = 0u64;
    for &d in digits {
        if !(b'0'..=b'7').contains(&d) {
            return None;
        }
        value = value.checked_mul(8)?.checked_add(u64::from(d - b'0'))?;
    }
    Some(value)
}

/// Verifies the header checksum of a block known not to be all zero.
pub fn verify_checksum(block: &Block, offset: u64) -> Result<()> {
    let stored = field(block, CHECKSUM);
    if cstr(stored).iter().all(|&b| b == b' ') {
        return Err(ArchiverError::corrupt(offset, "empty header checksum"));
    }
    let expected = parse_numeric(stored)
        .ok_or_else(|| ArchiverError::corrupt(offset, "malformed header checksum"))?;
    let (unsigned, signed) = header_sums(block);
    if expected == unsigned || i64::try_from(expected).map_or(false, |e| e == signed) {
        Ok(())
    } else {
        Err(ArchiverError::corrupt(
            offset,
            format!("header checksum mismatch (stored {expected:o}, computed {unsigned:o})"),
        ))
    }
}

/// Decodes and checksum-validates one non-zero header block.
pub fn decode_header(block: &Block, offset: u64) -> Result<HeaderFields> {
    verify_checksum(block, offset)?;

    let numeric = |range: (usize, usize), what: &str| {
        parse_numeric(field(block, range))
            .ok_or_else(|| ArchiverError::corrupt(offset, format!("malformed {what} field")))
    };
    let mode = numeric(MODE, "mode")?;
    let size = numeric(SIZE, "size")?;
    let mtime = numeric(MTIME, "mtime")?;

    let mut name = cstr(field(block, NAME)).to_vec();
    if &field(block, MAGIC)[..POSIX_MAGIC.len()] == POSIX_MAGIC {
        let prefix = cstr(field(block, PREFIX));
        if !prefix.is_empty() {
            let mut full = Vec::with_capacity(prefix.len() + 1 + name.len());
            full.extend_from_slice(prefix);
            full.push(b'/');
            full.extend_from_slice(&name);
            name = full;
        }
    }

    Ok(HeaderFields {
        name,
        mode: (mode & 0o7777) as u32,
        size,
        mtime,
        typeflag: block[TYPEFLAG],
    })
}

fn write_octal(dst: &mut [u8], value: u64) -> bool {
    let digits = dst.len() - 1;
    let text = format!("{value:0digits$o}");
    if text.len() > digits {
        return false;
    }
    dst[..digits].copy_from_slice(text.as_bytes());
    dst[digits] = 0;
    true
}

fn write_base256(dst: &mut [u8], value: u64) {
    dst.fill(0);
    let bytes = value.to_be_bytes();
    let n = dst.len();
    dst[n - bytes.len()..].copy_from_slice(&bytes);
    dst[0] |= 0x80;
}

/// Encodes a GNU-magic header block. `name` must fit the 100-byte name field;
/// longer names are carried by a preceding long-name record.
pub fn encode_header(name: &[u8], mode: u32, size: u64, mtime: u64, typeflag: u8) -> Result<Block> {
    let invalid = |reason: &str| ArchiverError::InvalidEntry {
        entry: String::from_utf8_lossy(name).into_owned(),
        reason: reason.to_string(),
    };
    if name.len() > NAME_FIELD_LEN {
        return Err(invalid("name does not fit the header name field"));
    }

    let mut block = [0u8; BLOCK_SIZE];
    block[..name.len()].copy_from_slice(name);
    if !write_octal(&mut block[MODE.0..MODE.1], u64::from(mode & 0o7777)) {
        return Err(invalid("mode out of range"));
    }
    write_octal(&mut block[UID.0..UID.1], 0);
    write_octal(&mut block[GID.0..GID.1], 0);
    if !write_octal(&mut block[SIZE.0..SIZE.1], size) {
        write_base256(&mut block[SIZE.0..SIZE.1], size);
    }
    if !write_octal(&mut block[MTIME.0..MTIME.1], mtime) {
        write_base256(&mut block[MTIME.0..MTIME.1], mtime);
    }
    block[TYPEFLAG] = typeflag;
    block[MAGIC.0..MAGIC.1].copy_from_slice(GNU_MAGIC);

    let checksum = compute_checksum(&block);
    let text = format!("{checksum:06o}\0 ");
    block[CHECKSUM.0..CHECKSUM.1].copy_from_slice(text.as_bytes());
    Ok(block)
}
