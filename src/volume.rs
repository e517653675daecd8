// volsnap backup system.
// Copyright 2015-2024 Martin Pool.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! Flat volumes: node data packed into a sequence of size-capped files.
//!
//! The volumes of one snapshot live in their own directory, named `0`, `1`,
//! `2`, ... Each written range becomes a [Block] in the writer's [BlockList].
//!
//! Writers claim a volume slot for as long as they're open, so no two
//! writers append to the same file at once. A slot whose volume is full is
//! retired; closing a writer returns its slot so the next writer can keep
//! filling that volume, which packs many small files into one volume.
//!
//! Readers share one lazily opened handle per volume and read from it at
//! explicit offsets, so concurrent readers of one volume don't serialize.
//! When too many volume handles are open, idle ones are closed.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use crate::attributes::{Block, BlockList};
use crate::counters::Counter;
use crate::monitor::Monitor;
use crate::{Error, Result};

/// Idle read handles are closed when more than this many are open.
pub const MAX_OPEN_READ_VOLUMES: usize = 64;

pub struct VolumeStore {
    dir: PathBuf,
    volume_size: u64,
    monitor: Arc<dyn Monitor>,
    writers: Mutex<WriterSlots>,
    readers: Mutex<HashMap<u64, Arc<ReadVolume>>>,
    open_read_handles: AtomicUsize,
}

/// A volume open for appending.
#[derive(Debug)]
struct Slot {
    volume: u64,
    file: File,
    written: u64,
}

#[derive(Debug, Default)]
struct WriterSlots {
    next_volume: u64,
    next_writer: u64,
    /// Volumes with space left that no writer holds.
    free: Vec<Slot>,
    claimed: HashMap<u64, Slot>,
    /// Full volumes, kept open until they're synced.
    filled: Vec<Slot>,
}

impl std::fmt::Debug for VolumeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeStore")
            .field("dir", &self.dir)
            .field("volume_size", &self.volume_size)
            .finish()
    }
}

impl VolumeStore {
    /// Make a new, empty volume directory.
    pub fn create(dir: &Path, volume_size: u64, monitor: Arc<dyn Monitor>) -> Result<VolumeStore> {
        fs::create_dir(dir).map_err(|source| Error::CreateDirectory {
            path: dir.to_owned(),
            source,
        })?;
        Ok(VolumeStore::new(dir, volume_size, 0, monitor))
    }

    /// Open an existing volume directory for reading.
    ///
    /// The directory need not exist: a snapshot with no stored data may have
    /// no volumes.
    pub fn open(dir: &Path, volume_size: u64, monitor: Arc<dyn Monitor>) -> Result<VolumeStore> {
        let mut store = VolumeStore::new(dir, volume_size, 0, monitor);
        let next_volume = store.volume_numbers()?.last().map_or(0, |v| v + 1);
        store.writers.get_mut().unwrap().next_volume = next_volume;
        Ok(store)
    }

    fn new(dir: &Path, volume_size: u64, next_volume: u64, monitor: Arc<dyn Monitor>) -> Self {
        VolumeStore {
            dir: dir.to_owned(),
            volume_size,
            monitor,
            writers: Mutex::new(WriterSlots {
                next_volume,
                ..WriterSlots::default()
            }),
            readers: Mutex::new(HashMap::new()),
            open_read_handles: AtomicUsize::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn volume_size(&self) -> u64 {
        self.volume_size
    }

    pub fn volume_path(&self, volume: u64) -> PathBuf {
        self.dir.join(volume.to_string())
    }

    /// Numbers of the volumes on disk, in order.
    pub fn volume_numbers(&self) -> Result<Vec<u64>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(Error::ListDirectory {
                    path: self.dir.clone(),
                    source,
                })
            }
        };
        let mut numbers = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| Error::ListDirectory {
                path: self.dir.clone(),
                source,
            })?;
            if let Some(n) = entry.file_name().to_str().and_then(|s| s.parse().ok()) {
                numbers.push(n);
            }
        }
        numbers.sort_unstable();
        Ok(numbers)
    }

    /// Start writing the data of one node.
    pub fn create_writer(&self) -> VolumeWriter<'_> {
        let id = {
            let mut slots = self.writers.lock().unwrap();
            slots.next_writer += 1;
            slots.next_writer
        };
        VolumeWriter {
            store: self,
            id,
            blocks: BlockList::new(),
        }
    }

    /// Flush everything written to disk, and close all write handles.
    pub fn finish(&self) -> Result<()> {
        let slots = {
            let mut slots = self.writers.lock().unwrap();
            debug_assert!(slots.claimed.is_empty(), "writers still open");
            let mut all = std::mem::take(&mut slots.free);
            all.append(&mut slots.filled);
            all.extend(slots.claimed.drain().map(|(_, slot)| slot));
            all
        };
        for slot in slots {
            slot.file
                .sync_all()
                .map_err(|source| self.write_error(slot.volume, source))?;
        }
        Ok(())
    }

    /// Read the concatenated content of some blocks.
    pub fn open_reader(&self, blocks: &BlockList) -> VolumeReader<'_> {
        VolumeReader {
            store: self,
            blocks: blocks.as_slice().to_vec(),
            index: 0,
            pos: 0,
            current: None,
        }
    }

    fn create_volume(&self, volume: u64) -> Result<Slot> {
        let path = self.volume_path(volume);
        trace!(?path, "Create volume");
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| self.write_error(volume, source))?;
        self.monitor.count(Counter::VolumesCreated, 1);
        Ok(Slot {
            volume,
            file,
            written: 0,
        })
    }

    fn write_error(&self, volume: u64, source: io::Error) -> Error {
        Error::WriteVolume {
            dir: self.dir.clone(),
            volume,
            source,
        }
    }

    /// Write as much of `buf` as fits in the writer's volume.
    fn write_some(&self, writer: u64, buf: &[u8]) -> Result<Block> {
        let mut guard = self.writers.lock().unwrap();
        let slots = &mut *guard;
        let slot = match slots.claimed.entry(writer) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let slot = match slots.free.pop() {
                    Some(slot) => slot,
                    None => {
                        let volume = slots.next_volume;
                        slots.next_volume += 1;
                        self.create_volume(volume)?
                    }
                };
                entry.insert(slot)
            }
        };
        let len = (self.volume_size - slot.written).min(buf.len() as u64);
        let block = Block {
            volume: slot.volume,
            offset: slot.written,
            size: len,
        };
        if let Err(source) = slot.file.write_all(&buf[..len as usize]) {
            // The file position is now unknown, so the volume can't take more.
            slots.claimed.remove(&writer);
            return Err(self.write_error(block.volume, source));
        }
        slot.written += len;
        if slot.written >= self.volume_size {
            trace!(volume = block.volume, "Volume full");
            if let Some(full) = slots.claimed.remove(&writer) {
                slots.filled.push(full);
            }
        }
        Ok(block)
    }

    fn release(&self, writer: u64) {
        let mut slots = self.writers.lock().unwrap();
        if let Some(slot) = slots.claimed.remove(&writer) {
            slots.free.push(slot);
        }
    }

    /// Get the shared state for a volume and count one more reader.
    fn acquire_volume(&self, volume: u64) -> Arc<ReadVolume> {
        let read_volume = {
            let mut readers = self.readers.lock().unwrap();
            readers
                .entry(volume)
                .or_insert_with(|| {
                    Arc::new(ReadVolume {
                        volume,
                        file: Mutex::new(None),
                        readers: AtomicUsize::new(0),
                    })
                })
                .clone()
        };
        read_volume.readers.fetch_add(1, Ordering::Relaxed);
        if self.open_read_handles.load(Ordering::Relaxed) > MAX_OPEN_READ_VOLUMES {
            self.close_idle_volumes();
        }
        read_volume
    }

    fn release_volume(&self, read_volume: &ReadVolume) {
        read_volume.readers.fetch_sub(1, Ordering::Relaxed);
    }

    /// Close handles nobody is reading, until few enough are open.
    ///
    /// Volumes that are busy are skipped rather than waited for. A reader
    /// that is mid-read keeps its own reference to the handle.
    fn close_idle_volumes(&self) {
        let readers = self.readers.lock().unwrap();
        for read_volume in readers.values() {
            if self.open_read_handles.load(Ordering::Relaxed) <= MAX_OPEN_READ_VOLUMES {
                break;
            }
            if read_volume.readers.load(Ordering::Relaxed) != 0 {
                continue;
            }
            if let Ok(mut file) = read_volume.file.try_lock() {
                if file.take().is_some() {
                    self.open_read_handles.fetch_sub(1, Ordering::Relaxed);
                    self.monitor.count(Counter::VolumeReadCloses, 1);
                }
            }
        }
    }

    /// Number of volume handles currently open for reading.
    pub fn open_read_handles(&self) -> usize {
        self.open_read_handles.load(Ordering::Relaxed)
    }
}

/// Writes the data of one node into volumes.
///
/// Dropping the writer releases its volume slot for other writers.
pub struct VolumeWriter<'a> {
    store: &'a VolumeStore,
    id: u64,
    blocks: BlockList,
}

impl VolumeWriter<'_> {
    /// Finish writing, and return where the data went.
    pub fn close(mut self) -> BlockList {
        std::mem::take(&mut self.blocks)
    }

    pub fn blocks(&self) -> &BlockList {
        &self.blocks
    }
}

impl Write for VolumeWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let block = self
            .store
            .write_some(self.id, buf)
            .map_err(Error::into_io)?;
        let len = block.size as usize;
        self.blocks.push(block);
        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for VolumeWriter<'_> {
    fn drop(&mut self) {
        self.store.release(self.id);
    }
}

#[derive(Debug)]
struct ReadVolume {
    volume: u64,
    /// Opened on first read; the lock covers only opening and closing.
    file: Mutex<Option<Arc<File>>>,
    /// Readers currently positioned in this volume.
    readers: AtomicUsize,
}

impl ReadVolume {
    fn read_at(&self, store: &VolumeStore, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let read_error = |source| Error::ReadVolume {
            dir: store.dir.clone(),
            volume: self.volume,
            source,
        };
        let file = {
            let mut slot = self.file.lock().unwrap();
            match &*slot {
                Some(file) => file.clone(),
                None => {
                    let path = store.volume_path(self.volume);
                    trace!(?path, "Open volume for reading");
                    let file = Arc::new(File::open(&path).map_err(read_error)?);
                    store.open_read_handles.fetch_add(1, Ordering::Relaxed);
                    store.monitor.count(Counter::VolumeReadOpens, 1);
                    slot.insert(file).clone()
                }
            }
        };
        loop {
            match read_file_at(&file, buf, offset) {
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                result => return result.map_err(read_error),
            }
        }
    }
}

#[cfg(unix)]
fn read_file_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn read_file_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

/// Reads the content of a list of blocks, in order, as one stream.
pub struct VolumeReader<'a> {
    store: &'a VolumeStore,
    blocks: Vec<Block>,
    /// Index of the block being read.
    index: usize,
    /// Bytes already read from that block.
    pos: u64,
    current: Option<Arc<ReadVolume>>,
}

impl VolumeReader<'_> {
    fn volume(&mut self, volume: u64) -> Arc<ReadVolume> {
        match &self.current {
            Some(current) if current.volume == volume => current.clone(),
            _ => {
                if let Some(previous) = self.current.take() {
                    self.store.release_volume(&previous);
                }
                let read_volume = self.store.acquire_volume(volume);
                self.current = Some(read_volume.clone());
                read_volume
            }
        }
    }
}

impl Read for VolumeReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let Some(&block) = self.blocks.get(self.index) else {
                return Ok(0);
            };
            let remaining = block.size - self.pos;
            if remaining == 0 {
                self.index += 1;
                self.pos = 0;
                continue;
            }
            let want = remaining.min(buf.len() as u64) as usize;
            let read_volume = self.volume(block.volume);
            let n = read_volume
                .read_at(self.store, block.offset + self.pos, &mut buf[..want])
                .map_err(Error::into_io)?;
            if n == 0 {
                debug!(?block, pos = self.pos, "Volume ended inside block");
                return Err(Error::BlockTruncated {
                    volume: block.volume,
                    offset: block.offset,
                    expected: block.size,
                    actual: self.pos,
                }
                .into_io());
            }
            self.pos += n as u64;
            return Ok(n);
        }
    }
}

impl Drop for VolumeReader<'_> {
    fn drop(&mut self) {
        if let Some(current) = self.current.take() {
            self.store.release_volume(&current);
        }
    }
}

#[cfg(test)]
mod test {
    use std::thread;

    use pretty_assertions::assert_eq;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::monitor::test::TestMonitor;
    use crate::monitor::void::VoidMonitor;

    fn store(dir: &Path, volume_size: u64) -> (VolumeStore, Arc<TestMonitor>) {
        let monitor = TestMonitor::arc();
        let store = VolumeStore::create(&dir.join("vols"), volume_size, monitor.clone()).unwrap();
        (store, monitor)
    }

    fn read_all(store: &VolumeStore, blocks: &BlockList) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        store.open_reader(blocks).read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn adjacent_writes_make_one_block() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = store(dir.path(), 1000);
        let mut w = store.create_writer();
        w.write_all(b"hello ").unwrap();
        w.write_all(b"world").unwrap();
        let blocks = w.close();
        assert_eq!(
            blocks.as_slice(),
            &[Block {
                volume: 0,
                offset: 0,
                size: 11
            }]
        );
        store.finish().unwrap();
        assert_eq!(read_all(&store, &blocks).unwrap(), b"hello world");
    }

    #[test]
    fn writes_roll_over_into_new_volumes() {
        let dir = tempfile::tempdir().unwrap();
        let (store, monitor) = store(dir.path(), 10);
        let mut w = store.create_writer();
        let content: Vec<u8> = (0..35u8).collect();
        w.write_all(&content).unwrap();
        let blocks = w.close();
        store.finish().unwrap();
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks.stored_size(), 35);
        assert_eq!(store.volume_numbers().unwrap(), [0, 1, 2, 3]);
        for v in 0..3 {
            assert_eq!(fs::metadata(store.volume_path(v)).unwrap().len(), 10);
        }
        monitor.assert_counter(Counter::VolumesCreated, 4);
        assert_eq!(read_all(&store, &blocks).unwrap(), content);
    }

    #[test]
    fn closed_writer_slot_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = store(dir.path(), 100);
        let mut a = store.create_writer();
        a.write_all(b"aaaa").unwrap();
        let a_blocks = a.close();
        let mut b = store.create_writer();
        b.write_all(b"bbb").unwrap();
        let b_blocks = b.close();
        store.finish().unwrap();
        assert_eq!(
            b_blocks.as_slice(),
            &[Block {
                volume: 0,
                offset: 4,
                size: 3
            }]
        );
        assert_eq!(read_all(&store, &a_blocks).unwrap(), b"aaaa");
        assert_eq!(read_all(&store, &b_blocks).unwrap(), b"bbb");
    }

    #[test]
    fn concurrent_writers_use_separate_volumes() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = store(dir.path(), 100);
        let mut a = store.create_writer();
        let mut b = store.create_writer();
        a.write_all(b"from a").unwrap();
        b.write_all(b"from b").unwrap();
        a.write_all(b" again").unwrap();
        let a_blocks = a.close();
        let b_blocks = b.close();
        store.finish().unwrap();
        assert_eq!(a_blocks.len(), 1);
        assert_ne!(a_blocks.as_slice()[0].volume, b_blocks.as_slice()[0].volume);
        assert_eq!(read_all(&store, &a_blocks).unwrap(), b"from a again");
        assert_eq!(read_all(&store, &b_blocks).unwrap(), b"from b");
    }

    #[test]
    fn volumes_never_exceed_capacity_under_threads() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = store(dir.path(), 1000);
        let results: Vec<(Vec<u8>, BlockList)> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8u64)
                .map(|seed| {
                    let store = &store;
                    scope.spawn(move || {
                        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
                        (0..20)
                            .map(|_| {
                                let len = rng.gen_range(0..700);
                                let content: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
                                let mut w = store.create_writer();
                                w.write_all(&content).unwrap();
                                (content, w.close())
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });
        store.finish().unwrap();
        for v in store.volume_numbers().unwrap() {
            assert!(fs::metadata(store.volume_path(v)).unwrap().len() <= 1000);
        }
        for (content, blocks) in results {
            assert_eq!(read_all(&store, &blocks).unwrap(), content);
        }
    }

    #[test]
    fn truncated_volume_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = store(dir.path(), 100);
        let mut w = store.create_writer();
        w.write_all(b"0123456789").unwrap();
        let blocks = w.close();
        store.finish().unwrap();
        let file = OpenOptions::new()
            .write(true)
            .open(store.volume_path(0))
            .unwrap();
        file.set_len(4).unwrap();
        let err = read_all(&store, &blocks).unwrap_err();
        let err = Error::from_content_io(&"/f".into(), err);
        assert!(
            matches!(
                err,
                Error::BlockTruncated {
                    volume: 0,
                    expected: 10,
                    actual: 4,
                    ..
                }
            ),
            "{err:?}"
        );
    }

    #[test]
    fn missing_volume_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = TestMonitor::arc();
        let store = VolumeStore::open(dir.path(), 100, monitor).unwrap();
        let blocks = BlockList::from_iter([Block {
            volume: 7,
            offset: 0,
            size: 3,
        }]);
        let err = read_all(&store, &blocks).unwrap_err();
        let err = Error::from_content_io(&"/f".into(), err);
        assert!(matches!(err, Error::ReadVolume { volume: 7, .. }), "{err:?}");
    }

    #[test]
    fn idle_read_handles_are_closed() {
        let dir = tempfile::tempdir().unwrap();
        let (store, monitor) = store(dir.path(), 1);
        let mut w = store.create_writer();
        let content = vec![b'x'; MAX_OPEN_READ_VOLUMES + 10];
        w.write_all(&content).unwrap();
        let blocks = w.close();
        store.finish().unwrap();
        // Read each block through its own reader so that each volume is
        // left idle.
        for block in blocks.iter() {
            let one = BlockList::from_iter([*block]);
            assert_eq!(read_all(&store, &one).unwrap(), b"x");
        }
        assert!(store.open_read_handles() <= MAX_OPEN_READ_VOLUMES + 1);
        assert!(monitor.get_counter(Counter::VolumeReadCloses) > 0);
    }

    #[test]
    fn interleaved_readers_share_one_handle() {
        let dir = tempfile::tempdir().unwrap();
        let (store, monitor) = store(dir.path(), 1000);
        let mut a = store.create_writer();
        a.write_all(&[b'a'; 40]).unwrap();
        let a_blocks = a.close();
        let mut b = store.create_writer();
        b.write_all(&[b'b'; 40]).unwrap();
        let b_blocks = b.close();
        store.finish().unwrap();

        let mut a_reader = store.open_reader(&a_blocks);
        let mut b_reader = store.open_reader(&b_blocks);
        let mut buf = [0u8; 10];
        for _ in 0..4 {
            a_reader.read_exact(&mut buf).unwrap();
            assert_eq!(buf, [b'a'; 10]);
            b_reader.read_exact(&mut buf).unwrap();
            assert_eq!(buf, [b'b'; 10]);
        }
        monitor.assert_counter(Counter::VolumeReadOpens, 1);
    }

    #[test]
    fn readers_on_many_threads_see_their_own_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = store(dir.path(), 300);
        let written: Vec<(Vec<u8>, BlockList)> = (0..20u8)
            .map(|i| {
                let content = vec![i; 100];
                let mut w = store.create_writer();
                w.write_all(&content).unwrap();
                (content, w.close())
            })
            .collect();
        store.finish().unwrap();
        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for (content, blocks) in written.iter().rev() {
                        assert_eq!(&read_all(&store, blocks).unwrap(), content);
                    }
                });
            }
        });
    }

    #[test]
    fn open_continues_numbering() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = store(dir.path(), 4);
        let mut w = store.create_writer();
        w.write_all(b"12345678").unwrap();
        drop(w);
        store.finish().unwrap();
        let reopened = VolumeStore::open(store.dir(), 4, VoidMonitor::arc()).unwrap();
        assert_eq!(reopened.volume_numbers().unwrap(), [0, 1]);
        let mut w = reopened.create_writer();
        w.write_all(b"9").unwrap();
        assert_eq!(w.close().as_slice()[0].volume, 2);
    }
}
