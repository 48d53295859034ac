/* Copyright (c) 2026 The taskd Authors
 *
 * SPDX-License-Identifier: MIT
 */

//! A bounded task queue in a named POSIX shared-memory segment, usable by any
//! number of producer and consumer processes at once.
//!
//! Three named semaphores coordinate the ring: `{name}_enq` counts free
//! slots, `{name}_deq` counts filled slots, and `{name}_mut` is a binary
//! semaphore guarding the header cursors. Producers wait on `_enq` and post
//! `_deq`; consumers do the reverse. The segment and the semaphores are
//! kernel-persistent: exactly one process creates and destroys them, all
//! others attach and detach.

use std::ffi::CString;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use super::common::{Error, Result};
use super::wireformat::{TaskRecord, RECORD_LEN};

/// Largest ring the queue will agree to create.
pub const MAX_CAPACITY: usize = 10_000;

/// Ring size used when the configuration does not say otherwise.
pub const DEFAULT_CAPACITY: usize = 100;

const SEM_SUFFIXES: [&str; 3] = ["_enq", "_deq", "_mut"];

/// Header at the start of the mapped segment. Cursor updates happen under
/// the `_mut` semaphore; `scheduler_running` is read and written without it.
#[repr(C)]
struct QueueHeader {
    front: AtomicU32,
    rear: AtomicU32,
    count: AtomicU32,
    scheduler_running: AtomicBool,
    total_enqueued: AtomicU64,
    total_dequeued: AtomicU64,
}

/// A fixed-capacity FIFO of task records backed by a named memory segment.
///
/// The data path (`enqueue`/`dequeue`) takes `&self` and is safe to share
/// across threads; lifecycle transitions (`create`/`attach`/`detach`/
/// `destroy`) take `&mut self` and happen before the queue is shared.
pub struct SharedQueue {
    name: String,
    capacity: usize,
    fd: libc::c_int,
    base: *mut u8,
    map_len: usize,
    enq: *mut libc::sem_t,
    deq: *mut libc::sem_t,
    mutex: *mut libc::sem_t,
    owner: bool,
}

// The raw segment and semaphore pointers keep the compiler from deriving
// these. All mutation of the shared state is serialized by the semaphores.
unsafe impl Send for SharedQueue {}
unsafe impl Sync for SharedQueue {}

impl SharedQueue {
    /// Builds an unattached handle to the queue named `name` (a string
    /// beginning with `/`, e.g. `/task_queue`). Call `create` or `attach`
    /// before touching the data path.
    pub fn new(name: &str, capacity: usize) -> Result<SharedQueue> {
        if capacity < 1 || capacity > MAX_CAPACITY {
            return Err(Error::InvalidArgument(format!(
                "capacity {} outside [1, {}]",
                capacity, MAX_CAPACITY
            )));
        }
        if !name.starts_with('/') || name.len() < 2 || name.as_bytes().contains(&0) {
            return Err(Error::InvalidArgument(format!(
                "segment name {:?} must begin with '/'",
                name
            )));
        }

        Ok(SharedQueue {
            name: name.to_string(),
            capacity,
            fd: -1,
            base: std::ptr::null_mut(),
            map_len: std::mem::size_of::<QueueHeader>() + capacity * RECORD_LEN,
            enq: libc::SEM_FAILED,
            deq: libc::SEM_FAILED,
            mutex: libc::SEM_FAILED,
            owner: false,
        })
    }

    /// Creates the segment and the three semaphores from scratch. Any stale
    /// names left behind by a crashed creator are unlinked first. On any
    /// failure everything allocated so far is rolled back before the error
    /// is returned.
    pub fn create(&mut self) -> Result<()> {
        self.unlink_names();

        let name = cstring(&self.name)?;
        self.fd = unsafe {
            libc::shm_open(
                name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o666 as libc::mode_t,
            )
        };
        if self.fd == -1 {
            return Err(Error::SegmentCreate(io::Error::last_os_error()));
        }

        if unsafe { libc::ftruncate(self.fd, self.map_len as libc::off_t) } == -1 {
            let err = io::Error::last_os_error();
            self.rollback_create();
            return Err(Error::Truncate(err));
        }

        if let Err(e) = self.map() {
            self.rollback_create();
            return Err(e);
        }

        {
            let header = self.header();
            header.front.store(0, Ordering::Relaxed);
            header.rear.store(0, Ordering::Relaxed);
            header.count.store(0, Ordering::Relaxed);
            header.scheduler_running.store(false, Ordering::SeqCst);
            header.total_enqueued.store(0, Ordering::Relaxed);
            header.total_dequeued.store(0, Ordering::Relaxed);
        }

        // The classic bounded-buffer triple: free slots, filled slots, mutex.
        let initial = [(0, self.capacity as u32), (1, 0), (2, 1)];
        for &(idx, value) in initial.iter() {
            match self.open_sem(SEM_SUFFIXES[idx], true, value) {
                Ok(sem) => self.store_sem(idx, sem),
                Err(e) => {
                    self.rollback_create();
                    return Err(e);
                }
            }
        }

        self.owner = true;
        info!(
            "created shared queue {} with capacity {}",
            self.name, self.capacity
        );
        Ok(())
    }

    /// Attaches to a segment some other process created, mapping it
    /// read/write and opening the existing semaphores.
    pub fn attach(&mut self) -> Result<()> {
        if self.fd == -1 {
            let name = cstring(&self.name)?;
            self.fd = unsafe { libc::shm_open(name.as_ptr(), libc::O_RDWR, 0o666 as libc::mode_t) };
            if self.fd == -1 {
                return Err(Error::SegmentCreate(io::Error::last_os_error()));
            }
        }

        if let Err(e) = self.map() {
            self.rollback_attach();
            return Err(e);
        }

        for (idx, suffix) in SEM_SUFFIXES.iter().enumerate() {
            match self.open_sem(suffix, false, 0) {
                Ok(sem) => self.store_sem(idx, sem),
                Err(e) => {
                    self.rollback_attach();
                    return Err(e);
                }
            }
        }

        debug!("attached to shared queue {}", self.name);
        Ok(())
    }

    /// Unmaps the segment. The segment, the descriptor, and the semaphores
    /// stay alive for other processes.
    pub fn detach(&mut self) {
        if !self.base.is_null() {
            if unsafe { libc::munmap(self.base as *mut libc::c_void, self.map_len) } == -1 {
                error!(
                    "munmap of {} failed: {}",
                    self.name,
                    io::Error::last_os_error()
                );
            }
            self.base = std::ptr::null_mut();
        }
    }

    /// Tears the queue down: detaches, closes everything, and unlinks the
    /// segment and all three semaphores from the kernel namespace.
    /// Idempotent, and never returns an error; failures are logged so this
    /// is safe to call from `Drop`.
    pub fn destroy(&mut self) {
        self.detach();
        self.close_handles();
        self.unlink_names();
    }

    /// Blocking enqueue. Suspends on the `_enq` semaphore while the ring is
    /// full.
    pub fn enqueue(&self, record: &TaskRecord) -> Result<()> {
        if self.base.is_null() {
            return Err(Error::NotAttached);
        }

        let mut slot = [0u8; RECORD_LEN];
        record.write_to(&mut slot);

        sem_wait(self.enq)?;
        if let Err(e) = sem_wait(self.mutex) {
            // Give back the slot permit taken above so the semaphore
            // invariant survives the failure.
            sem_post(self.enq);
            return Err(e);
        }

        let header = self.header();
        let rear = header.rear.load(Ordering::Relaxed) as usize;
        unsafe {
            std::ptr::copy_nonoverlapping(slot.as_ptr(), self.slot_ptr(rear), RECORD_LEN);
        }
        header
            .rear
            .store(((rear + 1) % self.capacity) as u32, Ordering::Relaxed);
        header.count.fetch_add(1, Ordering::Relaxed);
        header.total_enqueued.fetch_add(1, Ordering::Relaxed);

        sem_post(self.mutex);
        sem_post(self.deq);
        Ok(())
    }

    /// Blocking dequeue. Suspends on the `_deq` semaphore while the ring is
    /// empty.
    pub fn dequeue(&self) -> Result<TaskRecord> {
        if self.base.is_null() {
            return Err(Error::NotAttached);
        }

        sem_wait(self.deq)?;
        if let Err(e) = sem_wait(self.mutex) {
            sem_post(self.deq);
            return Err(e);
        }

        let header = self.header();
        if header.count.load(Ordering::Relaxed) == 0 {
            // Cannot happen under a well-formed semaphore pair; also the
            // wake-up path for shutdown sentinels.
            sem_post(self.mutex);
            sem_post(self.deq);
            return Err(Error::QueueEmpty);
        }

        let front = header.front.load(Ordering::Relaxed) as usize;
        let mut slot = [0u8; RECORD_LEN];
        unsafe {
            std::ptr::copy_nonoverlapping(self.slot_ptr(front), slot.as_mut_ptr(), RECORD_LEN);
        }
        header
            .front
            .store(((front + 1) % self.capacity) as u32, Ordering::Relaxed);
        header.count.fetch_sub(1, Ordering::Relaxed);
        header.total_dequeued.fetch_add(1, Ordering::Relaxed);

        sem_post(self.mutex);
        sem_post(self.enq);
        Ok(TaskRecord::read_from(&slot))
    }

    /// Number of records currently in the ring. Racy by design: the value is
    /// stale the moment it is read.
    #[inline]
    pub fn size(&self) -> usize {
        if self.base.is_null() {
            return 0;
        }
        self.header().count.load(Ordering::Relaxed) as usize
    }

    #[inline]
    pub fn empty(&self) -> bool {
        self.size() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Flips the segment-wide flag telling attached processes whether a
    /// scheduler is draining the queue.
    pub fn set_scheduler_running(&self, running: bool) -> Result<()> {
        if self.base.is_null() {
            return Err(Error::NotAttached);
        }
        self.header()
            .scheduler_running
            .store(running, Ordering::SeqCst);
        Ok(())
    }

    #[inline]
    pub fn is_scheduler_running(&self) -> bool {
        if self.base.is_null() {
            return false;
        }
        self.header().scheduler_running.load(Ordering::SeqCst)
    }

    /// Monotonic (enqueued, dequeued) counters, for observability and the
    /// count invariant checks in tests.
    pub fn totals(&self) -> (u64, u64) {
        if self.base.is_null() {
            return (0, 0);
        }
        let header = self.header();
        (
            header.total_enqueued.load(Ordering::Relaxed),
            header.total_dequeued.load(Ordering::Relaxed),
        )
    }

    /// Posts `n` tokens onto the dequeue semaphore without filling slots.
    /// A consumer blocked in `dequeue` wakes through the defensive
    /// empty-ring path and gets a chance to observe shutdown.
    pub(crate) fn wake_consumers(&self, n: usize) {
        if self.deq == libc::SEM_FAILED {
            return;
        }
        for _ in 0..n {
            sem_post(self.deq);
        }
    }

    #[inline]
    fn header(&self) -> &QueueHeader {
        unsafe { &*(self.base as *const QueueHeader) }
    }

    #[inline]
    fn slot_ptr(&self, index: usize) -> *mut u8 {
        unsafe {
            self.base
                .add(std::mem::size_of::<QueueHeader>() + index * RECORD_LEN)
        }
    }

    fn map(&mut self) -> Result<()> {
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                self.map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(Error::Map(io::Error::last_os_error()));
        }
        self.base = base as *mut u8;
        Ok(())
    }

    fn open_sem(&self, suffix: &str, exclusive: bool, value: u32) -> Result<*mut libc::sem_t> {
        let name = cstring(&format!("{}{}", self.name, suffix))?;
        let sem = if exclusive {
            unsafe {
                libc::sem_open(
                    name.as_ptr(),
                    libc::O_CREAT | libc::O_EXCL,
                    0o666 as libc::c_uint,
                    value as libc::c_uint,
                )
            }
        } else {
            unsafe { libc::sem_open(name.as_ptr(), 0) }
        };
        if sem == libc::SEM_FAILED {
            return Err(Error::Semaphore(io::Error::last_os_error()));
        }
        Ok(sem)
    }

    fn store_sem(&mut self, index: usize, sem: *mut libc::sem_t) {
        match index {
            0 => self.enq = sem,
            1 => self.deq = sem,
            _ => self.mutex = sem,
        }
    }

    fn close_handles(&mut self) {
        for sem in [self.enq, self.deq, self.mutex].iter() {
            if *sem != libc::SEM_FAILED {
                if unsafe { libc::sem_close(*sem) } == -1 {
                    error!("sem_close failed: {}", io::Error::last_os_error());
                }
            }
        }
        self.enq = libc::SEM_FAILED;
        self.deq = libc::SEM_FAILED;
        self.mutex = libc::SEM_FAILED;

        if self.fd != -1 {
            if unsafe { libc::close(self.fd) } == -1 {
                error!(
                    "close of {} failed: {}",
                    self.name,
                    io::Error::last_os_error()
                );
            }
            self.fd = -1;
        }
    }

    /// Removes the segment and semaphore names from the kernel namespace.
    /// Missing names are not an error; this also clears stale state left by
    /// a crashed creator.
    fn unlink_names(&self) {
        if let Ok(name) = cstring(&self.name) {
            unsafe { libc::shm_unlink(name.as_ptr()) };
        }
        for suffix in SEM_SUFFIXES.iter() {
            if let Ok(name) = cstring(&format!("{}{}", self.name, suffix)) {
                unsafe { libc::sem_unlink(name.as_ptr()) };
            }
        }
    }

    fn rollback_create(&mut self) {
        self.detach();
        self.close_handles();
        self.unlink_names();
    }

    fn rollback_attach(&mut self) {
        self.detach();
        self.close_handles();
    }
}

impl Drop for SharedQueue {
    fn drop(&mut self) {
        if self.owner {
            self.destroy();
        } else {
            self.detach();
            self.close_handles();
        }
    }
}

fn cstring(s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| Error::InvalidArgument(format!("name {:?} contains a null byte", s)))
}

fn sem_wait(sem: *mut libc::sem_t) -> Result<()> {
    loop {
        if unsafe { libc::sem_wait(sem) } == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINTR) {
            return Err(Error::Semaphore(err));
        }
    }
}

fn sem_post(sem: *mut libc::sem_t) {
    if unsafe { libc::sem_post(sem) } == -1 {
        error!("sem_post failed: {}", io::Error::last_os_error());
    }
}
