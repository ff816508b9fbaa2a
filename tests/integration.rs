use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use std::io::{self, Read, Seek, SeekFrom, Write};

use enctempfile::{BackingKind, Config, EncTempFileError, VirtualFile, Whence};

/// Helper to build a file with a given block size and backing
fn open(block_size: usize, backing: BackingKind) -> Result<VirtualFile> {
    Ok(VirtualFile::with_block_size(block_size)?.with_backing(backing))
}

/// Replay writes into a plain Vec with zero-filled holes
fn replay(writes: &[(u64, Vec<u8>)]) -> Vec<u8> {
    let mut model = Vec::new();
    for (pos, data) in writes {
        let start = *pos as usize;
        let end = start + data.len();
        if model.len() < end {
            model.resize(end, 0);
        }
        model[start..end].copy_from_slice(data);
    }
    model
}

#[test]
fn basic_roundtrip() -> Result<()> {
    let mut fp = VirtualFile::new();

    fp.write(b"hello")?;
    fp.flush()?;

    fp.seek(0, Whence::Set)?;
    assert_eq!(fp.read(None)?, b"hello");

    fp.seek(0, Whence::Set)?;
    let bytes: Vec<Vec<u8>> = (0..6).map(|_| fp.read(Some(1))).collect::<Result<_, _>>()?;
    assert_eq!(
        bytes,
        vec![
            b"h".to_vec(),
            b"e".to_vec(),
            b"l".to_vec(),
            b"l".to_vec(),
            b"o".to_vec(),
            Vec::new()
        ]
    );

    fp.close();
    Ok(())
}

#[test]
fn empty_file_read_terminates() -> Result<()> {
    let mut fp = open(5000, BackingKind::TempFile)?;
    assert!(fp.read(None)?.is_empty());
    assert_eq!(fp.len()?, 0);
    Ok(())
}

#[test]
fn random_positions_match_model() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(0);

    for block_size in [7usize, 64, 4096, 1 << 20] {
        let mut fp = open(block_size, BackingKind::Memory)?;
        let mut writes = Vec::new();

        for _ in 0..200 {
            let pos = rng.gen_range(0..20_000u64);
            let len = rng.gen_range(1..300usize);
            let data: Vec<u8> = (0..len).map(|_| rng.gen_range(1..=255u8)).collect();

            fp.seek(pos as i64, Whence::Set)?;
            fp.write(&data)?;
            writes.push((pos, data));
        }

        let expected = replay(&writes);
        fp.seek(0, Whence::Set)?;
        let actual = fp.read(None)?;
        assert_eq!(actual.len(), expected.len(), "block_size {}", block_size);
        assert_eq!(actual, expected, "block_size {}", block_size);
        assert_eq!(fp.len()?, expected.len() as u64);
    }
    Ok(())
}

#[test]
fn split_writes_match_single_write() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(0);
    let data: Vec<u8> = (0..6_000_000).map(|_| rng.gen_range(32..=126u8)).collect();

    let mut whole = open(5000, BackingKind::Memory)?;
    whole.write(&data)?;

    let mut pieces = open(5000, BackingKind::Memory)?;
    let mut offset = 0;
    while offset < data.len() {
        let len = rng.gen_range(1..=10_000).min(data.len() - offset);
        pieces.write(&data[offset..offset + len])?;
        offset += len;
    }

    let mut digests = Vec::new();
    for fp in [&mut whole, &mut pieces] {
        fp.seek(0, Whence::Set)?;
        let mut hasher = Sha256::new();
        loop {
            let chunk = fp.read(Some(rng.gen_range(1000..=10_000)))?;
            if chunk.is_empty() {
                break;
            }
            hasher.update(&chunk);
        }
        digests.push(hasher.finalize());
    }

    assert_eq!(digests[0], digests[1]);
    assert_eq!(digests[0], Sha256::digest(&data));
    Ok(())
}

#[test]
fn byte_by_byte_spool_on_temp_files() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(0);
    let mut fp = open(5000, BackingKind::TempFile)?;
    let mut in_hash = Sha256::new();

    for _ in 0..100 {
        let bytes_to_write = rng.gen_range(1000..10_000);
        for _ in 0..bytes_to_write {
            let byte = [rng.gen_range(32..=126u8)];
            fp.write(&byte)?;
            in_hash.update(byte);
        }
    }

    fp.seek(0, Whence::Set)?;
    let mut out_hash = Sha256::new();
    for _ in 0..100 {
        let bytes_to_read = rng.gen_range(1000..10_000);
        out_hash.update(fp.read(Some(bytes_to_read))?);
    }
    out_hash.update(fp.read(None)?);

    assert_eq!(in_hash.finalize(), out_hash.finalize());
    Ok(())
}

#[test]
fn truncate_removes_tail_blocks() -> Result<()> {
    let mut fp = open(100, BackingKind::TempFile)?;
    let data: Vec<u8> = (0..250u32).map(|i| (i % 251) as u8 + 1).collect();
    fp.write(&data)?;
    assert_eq!(fp.block_count(), 3);

    fp.seek(40, Whence::Set)?;
    fp.truncate(None)?;
    assert_eq!(fp.block_count(), 1);

    fp.seek(0, Whence::Set)?;
    assert_eq!(fp.read(None)?, &data[..40]);

    // Former tail ranges are gone, not zero-filled
    fp.seek(150, Whence::Set)?;
    assert!(fp.read(None)?.is_empty());
    assert_eq!(fp.len()?, 40);
    Ok(())
}

#[test]
fn close_twice_then_drop() -> Result<()> {
    let mut fp = open(16, BackingKind::TempFile)?;
    fp.write(b"some data spanning blocks")?;
    fp.close();
    fp.close();
    assert_eq!(fp.block_count(), 0);
    assert!(matches!(fp.flush(), Err(EncTempFileError::Closed(_))));
    drop(fp);
    Ok(())
}

#[test]
fn std_io_traits() -> Result<()> {
    let mut fp = open(8, BackingKind::Memory)?;
    io::copy(&mut &b"0123456789abcdef"[..], &mut fp)?;
    Write::flush(&mut fp)?;

    assert_eq!(Seek::seek(&mut fp, SeekFrom::End(-4))?, 12);
    let mut tail = String::new();
    Read::read_to_string(&mut fp, &mut tail)?;
    assert_eq!(tail, "cdef");

    Seek::seek(&mut fp, SeekFrom::Start(0))?;
    let mut all = Vec::new();
    Read::read_to_end(&mut fp, &mut all)?;
    assert_eq!(all, b"0123456789abcdef");

    let err = fp.fileno().map_err(io::Error::from).expect_err("no descriptor");
    assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    Ok(())
}

#[test]
fn from_config_applies_settings() -> Result<()> {
    let cfg = Config::new(4096, BackingKind::Memory);
    let mut fp = VirtualFile::from_config(&cfg)?;
    assert_eq!(fp.block_size(), 4096);

    fp.write(&vec![7u8; 10_000])?;
    assert_eq!(fp.block_count(), 3);
    assert_eq!(fp.len()?, 10_000);
    Ok(())
}
