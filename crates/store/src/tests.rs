use super::*;
use anyhow::Result;
use std::collections::HashSet;
use std::fs;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

const PAYLOAD: &[u8] = b"test gopher";
const WIDTH: u64 = LEN_WIDTH + PAYLOAD.len() as u64;

// -------------------- Helpers --------------------

fn append_three(store: &Store) -> Result<()> {
    for i in 1..4u64 {
        let (written, pos) = store.append(PAYLOAD)?;
        assert_eq!(written, WIDTH);
        assert_eq!(pos + written, i * WIDTH);
    }
    Ok(())
}

fn read_three(store: &Store) -> Result<()> {
    let mut pos = 0;
    for _ in 0..3 {
        assert_eq!(store.read(pos)?, PAYLOAD);
        pos += WIDTH;
    }
    Ok(())
}

/// In-memory file that accepts at most `budget` more bytes, then reports a
/// full device. Short writes are allowed, like a real disk filling up.
struct LimitedFile {
    data: Cursor<Vec<u8>>,
    budget: Arc<AtomicUsize>,
}

impl LimitedFile {
    fn new(budget: usize) -> (Self, Arc<AtomicUsize>) {
        let budget = Arc::new(AtomicUsize::new(budget));
        let file = Self {
            data: Cursor::new(Vec::new()),
            budget: Arc::clone(&budget),
        };
        (file, budget)
    }
}

impl Read for LimitedFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.data.read(buf)
    }
}

impl Write for LimitedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let left = self.budget.load(Ordering::SeqCst);
        if left == 0 {
            return Err(io::Error::new(io::ErrorKind::Other, "no space left on device"));
        }
        let n = left.min(buf.len());
        self.data.seek(SeekFrom::End(0))?;
        self.data.write_all(&buf[..n])?;
        self.budget.fetch_sub(n, Ordering::SeqCst);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for LimitedFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.data.seek(pos)
    }
}

// -------------------- Append & read --------------------

#[test]
fn hello_worldly_positions() -> Result<()> {
    let dir = tempdir()?;
    let store = Store::open(dir.path().join("0.store"))?;

    assert_eq!(store.append(b"hello")?, (13, 0));
    assert_eq!(store.append(b"worldly")?, (15, 13));

    assert_eq!(store.read(0)?, b"hello");
    assert_eq!(store.read(13)?, b"worldly");
    assert_eq!(store.size()?, 28);
    Ok(())
}

#[test]
fn append_then_read_survives_reopen() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("0.store");

    let store = Store::open(&path)?;
    append_three(&store)?;
    read_three(&store)?;
    store.close()?;

    let store = Store::open(&path)?;
    assert_eq!(store.size()?, 3 * WIDTH);
    read_three(&store)?;
    Ok(())
}

#[test]
fn reopen_without_close_sees_flushed_records() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("0.store");

    let first = Store::open(&path)?;
    append_three(&first)?;
    // A read flushes the buffer to the file descriptor.
    read_three(&first)?;

    let second = Store::open(&path)?;
    read_three(&second)?;
    Ok(())
}

#[test]
fn appends_after_reopen_continue_positions() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("0.store");

    let store = Store::open(&path)?;
    store.append(b"first")?;
    store.close()?;

    let store = Store::open(&path)?;
    let (_, pos) = store.append(b"second")?;
    assert_eq!(pos, LEN_WIDTH + 5);
    assert_eq!(store.read(0)?, b"first");
    assert_eq!(store.read(pos)?, b"second");
    Ok(())
}

#[test]
fn empty_payload_roundtrip() -> Result<()> {
    let dir = tempdir()?;
    let store = Store::open(dir.path().join("0.store"))?;

    let (written, pos) = store.append(b"")?;
    assert_eq!(written, LEN_WIDTH);
    assert_eq!(store.read(pos)?, Vec::<u8>::new());
    Ok(())
}

#[test]
fn large_payload_larger_than_buffer() -> Result<()> {
    let dir = tempdir()?;
    let store = Store::open(dir.path().join("0.store"))?;

    let big = vec![0xAB; 64 * 1024];
    store.append(b"small")?;
    let (_, pos) = store.append(&big)?;
    assert_eq!(store.read(pos)?, big);
    Ok(())
}

#[test]
fn records_appended_through_another_handle_are_readable() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("0.store");

    let writer = Store::open(&path)?;
    let reader = Store::open(&path)?;

    let (_, pos) = writer.append(b"late")?;
    writer.flush()?;

    assert_eq!(reader.read(pos)?, b"late");
    Ok(())
}

// -------------------- Failed writes --------------------

#[test]
fn torn_append_rejects_later_appends() -> Result<()> {
    // "hello" (13 bytes) lands whole; the big record is cut short after 4.
    let (file, budget) = LimitedFile::new(13 + 4);
    let store = Store::new(file, "limited.store")?;

    let (_, hello) = store.append(b"hello")?;
    let big = vec![0x5A; 16 * 1024];
    assert!(matches!(store.append(&big), Err(StoreError::Io(_))));
    assert_eq!(store.size()?, 13);

    // Space comes back, but the next frame would not start at the
    // position `append` hands out.
    budget.store(usize::MAX, Ordering::SeqCst);
    assert!(matches!(
        store.append(b"x"),
        Err(StoreError::Failed { position: 13 })
    ));
    assert_eq!(store.size()?, 13);
    assert_eq!(store.read(hello)?, b"hello");
    Ok(())
}

#[test]
fn store_over_custom_handle_round_trips() -> Result<()> {
    let (file, _) = LimitedFile::new(usize::MAX);
    let store = Store::new(file, "mem.store")?;

    assert_eq!(store.append(b"hello")?, (13, 0));
    assert_eq!(store.append(b"worldly")?, (15, 13));
    assert_eq!(store.read(13)?, b"worldly");
    assert_eq!(store.path(), Path::new("mem.store"));
    Ok(())
}

// -------------------- read_at --------------------

#[test]
fn read_at_returns_whole_frames() -> Result<()> {
    let dir = tempdir()?;
    let store = Store::open(dir.path().join("0.store"))?;
    append_three(&store)?;

    let mut pos = 0u64;
    for _ in 0..3 {
        let mut buf = vec![0u8; WIDTH as usize];
        let n = store.read_at(&mut buf, pos)?;
        assert_eq!(n as u64, WIDTH);

        let len = (&buf[..LEN_WIDTH as usize]).read_u64::<BigEndian>()?;
        assert_eq!(len, PAYLOAD.len() as u64);
        assert_eq!(&buf[LEN_WIDTH as usize..], PAYLOAD);
        pos += WIDTH;
    }
    Ok(())
}

#[test]
fn read_at_short_count_at_end_of_file() -> Result<()> {
    let dir = tempdir()?;
    let store = Store::open(dir.path().join("0.store"))?;
    store.append(b"abc")?;

    let mut buf = [0u8; 32];
    assert_eq!(store.read_at(&mut buf, 0)?, 11);
    assert_eq!(&buf[8..11], b"abc");
    assert_eq!(store.read_at(&mut buf, 11)?, 0);
    assert_eq!(store.read_at(&mut buf, 1_000)?, 0);
    Ok(())
}

// -------------------- Bounds --------------------

#[test]
fn read_past_end_is_end_of_data() -> Result<()> {
    let dir = tempdir()?;
    let store = Store::open(dir.path().join("0.store"))?;
    store.append(b"hello")?;

    assert!(matches!(
        store.read(13),
        Err(StoreError::EndOfData { position: 13 })
    ));
    assert!(matches!(
        store.read(9),
        Err(StoreError::EndOfData { position: 9 })
    ));
    assert!(matches!(
        store.read(u64::MAX),
        Err(StoreError::EndOfData { .. })
    ));
    Ok(())
}

#[test]
fn length_prefix_beyond_file_is_end_of_data() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("0.store");

    // Prefix announces 100 bytes but only 3 follow (torn write).
    let mut bytes = Vec::new();
    bytes.write_u64::<BigEndian>(100)?;
    bytes.extend_from_slice(b"abc");
    fs::write(&path, &bytes)?;

    let store = Store::open(&path)?;
    assert!(matches!(
        store.read(0),
        Err(StoreError::EndOfData { position: 0 })
    ));
    Ok(())
}

// -------------------- Close --------------------

#[test]
fn close_makes_buffered_bytes_durable() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("0.store");

    let store = Store::open(&path)?;
    store.append(PAYLOAD)?;

    let before = fs::metadata(&path)?.len();
    store.close()?;
    let after = fs::metadata(&path)?.len();

    assert_eq!(after - before, WIDTH);
    Ok(())
}

#[test]
fn flush_pushes_buffer_to_file_without_close() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("0.store");

    let store = Store::open(&path)?;
    store.append(b"buffered")?;
    store.flush()?;

    assert_eq!(fs::metadata(&path)?.len(), LEN_WIDTH + 8);
    Ok(())
}

#[test]
fn on_disk_format_is_big_endian_length_prefix() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("0.store");

    let store = Store::open(&path)?;
    store.append(b"hi")?;
    store.close()?;

    assert_eq!(fs::read(&path)?, vec![0, 0, 0, 0, 0, 0, 0, 2, b'h', b'i']);
    Ok(())
}

#[test]
fn path_is_exposed() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("7.store");
    let store = Store::open(&path)?;
    assert_eq!(store.path(), path.as_path());
    Ok(())
}

// -------------------- Concurrency --------------------

#[test]
fn concurrent_appends_get_unique_positions() -> Result<()> {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 200;

    let dir = tempdir()?;
    let store = Arc::new(Store::open(dir.path().join("0.store"))?);

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let mut out = Vec::with_capacity(PER_THREAD);
                for i in 0..PER_THREAD {
                    let payload = format!("thread-{t}-record-{i}").into_bytes();
                    let (_, pos) = store.append(&payload).unwrap();
                    out.push((pos, payload));
                }
                out
            })
        })
        .collect();

    let mut all = Vec::new();
    for h in handles {
        all.extend(h.join().unwrap());
    }

    let positions: HashSet<u64> = all.iter().map(|(p, _)| *p).collect();
    assert_eq!(positions.len(), THREADS * PER_THREAD);

    // Walking the file frame by frame must visit exactly the handed-out
    // positions, in increasing order, with intact payloads.
    all.sort_by_key(|(p, _)| *p);
    let mut expected_pos = 0u64;
    for (pos, payload) in &all {
        assert_eq!(*pos, expected_pos);
        assert_eq!(&store.read(*pos)?, payload);
        expected_pos += LEN_WIDTH + payload.len() as u64;
    }
    assert_eq!(store.size()?, expected_pos);
    Ok(())
}
