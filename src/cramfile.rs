//! The Cramfile container: header maintenance, streaming append, and
//! streaming iteration over a seekable byte stream.
//!
//! The overall shape — an owned stream, a `create`-style constructor that
//! branches on whether the file is fresh or pre-existing, private
//! `read_header`/`write_header` helpers, and an append path that writes a
//! placeholder size then backpatches it once the record body is known —
//! follows the same append-log discipline as a write-ahead event log. The
//! wire format itself (magic + version + three running counters, and
//! baseline-relative environment diffing instead of CRC framing) is this
//! container's own design.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::codec::{DEFAULT_WIDTH, SavedPosition, read_bytes, read_uint, write_bytes, write_uint};
use crate::envdiff::{self, Env, EnvDiff};
use crate::error::{Error, Result};
use crate::job::Job;

const MAGIC: u32 = 0x6372_616d;
const VERSION: u32 = 2;

const NUM_JOBS_OFFSET: u64 = 8;
const NUM_PROCS_OFFSET: u64 = 12;
const MAX_JOB_SIZE_OFFSET: u64 = 16;
const HEADER_LEN: u64 = 20;

/// Default sentinel prepended to a job's arguments by [`Cramfile::pack_args`]
/// unless the caller overrides it: the launcher substitutes the host
/// application's executable name for this placeholder at run time.
pub const EXE_SENTINEL: &[u8] = b"<exe>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Read,
    Write,
}

/// A Cramfile container over a seekable byte stream.
///
/// A `Cramfile` is single-purpose: one opened for reading never allows
/// `pack`, and one opened for writing or appending never allows
/// iteration. There is no transition between the two.
#[derive(Debug)]
pub struct Cramfile<S: Read + Write + Seek> {
    stream: S,
    mode: Mode,
    version: u32,
    num_jobs: u32,
    num_procs: u32,
    max_job_size: u32,
    baseline: Option<Job>,
}

impl<S: Read + Write + Seek> Cramfile<S> {
    /// Read and validate a header from `stream`, eagerly decoding job #0
    /// as the baseline if the file declares any jobs.
    pub fn from_read_stream(mut stream: S) -> Result<Self> {
        stream.seek(SeekFrom::Start(0))?;

        let magic = read_uint(&mut stream, DEFAULT_WIDTH)?;
        if magic != MAGIC as u64 {
            return Err(Error::BadMagic);
        }
        let version = read_uint(&mut stream, DEFAULT_WIDTH)? as u32;
        if version != VERSION {
            return Err(Error::VersionMismatch { found: version });
        }
        let num_jobs = read_uint(&mut stream, DEFAULT_WIDTH)? as u32;
        let num_procs = read_uint(&mut stream, DEFAULT_WIDTH)? as u32;
        let max_job_size = read_uint(&mut stream, DEFAULT_WIDTH)? as u32;

        let mut container = Self {
            stream,
            mode: Mode::Read,
            version,
            num_jobs,
            num_procs,
            max_job_size,
            baseline: None,
        };

        if num_jobs > 0 {
            let baseline = container.decode_record()?;
            container.baseline = Some(baseline);
        }

        tracing::debug!(num_jobs, num_procs, max_job_size, "opened cramfile for read");
        Ok(container)
    }

    /// Write a fresh, empty header to `stream`, positioning it for append.
    pub fn from_write_stream(mut stream: S) -> Result<Self> {
        stream.seek(SeekFrom::Start(0))?;
        write_uint(&mut stream, MAGIC as u64, DEFAULT_WIDTH)?;
        write_uint(&mut stream, VERSION as u64, DEFAULT_WIDTH)?;
        write_uint(&mut stream, 0, DEFAULT_WIDTH)?;
        write_uint(&mut stream, 0, DEFAULT_WIDTH)?;
        write_uint(&mut stream, 0, DEFAULT_WIDTH)?;

        tracing::debug!("opened fresh cramfile for write");
        Ok(Self {
            stream,
            mode: Mode::Write,
            version: VERSION,
            num_jobs: 0,
            num_procs: 0,
            max_job_size: 0,
            baseline: None,
        })
    }

    /// Validate an existing header (as [`Cramfile::from_read_stream`]
    /// does, including decoding the baseline), then seek to end-of-stream
    /// ready for further appends.
    pub fn from_append_stream(stream: S) -> Result<Self> {
        let mut container = Self::from_read_stream(stream)?;
        container.mode = Mode::Write;
        container.stream.seek(SeekFrom::End(0))?;
        tracing::debug!(num_jobs = container.num_jobs, "opened existing cramfile for append");
        Ok(container)
    }

    /// Number of jobs declared in the header.
    pub fn num_jobs(&self) -> u32 {
        self.num_jobs
    }

    /// Number of jobs declared in the header (`len`-style alias over
    /// [`Cramfile::num_jobs`]).
    pub fn len(&self) -> u32 {
        self.num_jobs
    }

    /// Whether the container currently holds zero jobs.
    pub fn is_empty(&self) -> bool {
        self.num_jobs == 0
    }

    /// Sum of `num_procs` across all packed jobs.
    pub fn num_procs(&self) -> u32 {
        self.num_procs
    }

    /// Byte length of the largest job record written so far.
    pub fn max_job_size(&self) -> u32 {
        self.max_job_size
    }

    /// On-disk format version (always 2 for a container this crate could
    /// have opened).
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Append `job`, compressing its environment against the baseline.
    ///
    /// Writes a placeholder size, writes the fixed and variable fields,
    /// backpatches the size, then updates the header counters — restoring
    /// the stream position after the record via a [`SavedPosition`] guard.
    pub fn pack(&mut self, job: Job) -> Result<()> {
        self.require_mode(Mode::Write, "writing")?;

        let start = self.stream.stream_position()?;
        write_uint(&mut self.stream, 0, DEFAULT_WIDTH)?;

        let mut size = 0usize;
        size += write_uint(&mut self.stream, job.num_procs as u64, DEFAULT_WIDTH)?;
        size += write_bytes(&mut self.stream, &job.working_dir)?;

        size += write_uint(&mut self.stream, job.args.len() as u64, DEFAULT_WIDTH)?;
        for arg in &job.args {
            size += write_bytes(&mut self.stream, arg)?;
        }

        let empty = Env::new();
        let base_env = self.baseline.as_ref().map_or(&empty, |j| &j.env);
        let diff = envdiff::diff(base_env, &job.env);

        size += write_uint(&mut self.stream, diff.removed.len() as u64, DEFAULT_WIDTH)?;
        for key in &diff.removed {
            size += write_bytes(&mut self.stream, key)?;
        }
        size += write_uint(&mut self.stream, diff.changed.len() as u64, DEFAULT_WIDTH)?;
        for (key, value) in &diff.changed {
            size += write_bytes(&mut self.stream, key)?;
            size += write_bytes(&mut self.stream, value)?;
        }

        let size_u32 = u32::try_from(size).map_err(|_| Error::IntegerOverflow)?;
        let new_num_jobs = self.num_jobs.checked_add(1).ok_or(Error::IntegerOverflow)?;
        let new_num_procs = self
            .num_procs
            .checked_add(job.num_procs)
            .ok_or(Error::IntegerOverflow)?;
        let new_max_job_size = self.max_job_size.max(size_u32);

        {
            let mut saved = SavedPosition::new(&mut self.stream)?;
            let stream = saved.stream();

            stream.seek(SeekFrom::Start(start))?;
            write_uint(stream, size_u32 as u64, DEFAULT_WIDTH)?;

            stream.seek(SeekFrom::Start(NUM_JOBS_OFFSET))?;
            write_uint(stream, new_num_jobs as u64, DEFAULT_WIDTH)?;

            stream.seek(SeekFrom::Start(NUM_PROCS_OFFSET))?;
            write_uint(stream, new_num_procs as u64, DEFAULT_WIDTH)?;

            stream.seek(SeekFrom::Start(MAX_JOB_SIZE_OFFSET))?;
            write_uint(stream, new_max_job_size as u64, DEFAULT_WIDTH)?;
        }

        self.num_jobs = new_num_jobs;
        self.num_procs = new_num_procs;
        self.max_job_size = new_max_job_size;

        tracing::debug!(num_jobs = self.num_jobs, record_size = size_u32, "packed job");

        if self.baseline.is_none() {
            self.baseline = Some(job);
        }

        Ok(())
    }

    /// Convenience over [`Cramfile::pack`] that prepends an executable
    /// sentinel (default [`EXE_SENTINEL`]) to `args`.
    pub fn pack_args<A, I>(
        &mut self,
        num_procs: u32,
        working_dir: impl AsRef<[u8]>,
        args: A,
        env: Env,
        exe: Option<&[u8]>,
    ) -> Result<()>
    where
        A: IntoIterator<Item = I>,
        I: AsRef<[u8]>,
    {
        let exe = exe.unwrap_or(EXE_SENTINEL);
        let mut full_args = vec![exe.to_vec()];
        full_args.extend(args.into_iter().map(|a| a.as_ref().to_vec()));
        self.pack(Job::new(num_procs, working_dir, full_args, env))
    }

    /// Iterate over every job in the container, in file order, starting
    /// with the cached baseline.
    pub fn iter(&mut self) -> Result<CramfileIter<'_, S>> {
        self.require_mode(Mode::Read, "reading")?;
        Ok(CramfileIter {
            container: self,
            yielded: 0,
        })
    }

    /// Flush any pending writes and release the stream.
    pub fn close(mut self) -> Result<()> {
        self.stream.flush()?;
        tracing::debug!("closed cramfile");
        Ok(())
    }

    /// Extract the underlying stream, bypassing the flush-on-drop glue.
    #[cfg(test)]
    fn into_inner(self) -> S {
        let mut this = std::mem::ManuallyDrop::new(self);
        let stream = unsafe { std::ptr::read(&this.stream) };
        unsafe { std::ptr::drop_in_place(&mut this.baseline) };
        stream
    }

    fn require_mode(&self, want: Mode, expected: &'static str) -> Result<()> {
        if self.mode == want {
            Ok(())
        } else {
            Err(Error::ModeViolation { expected })
        }
    }

    fn decode_record(&mut self) -> Result<Job> {
        let record_size = read_uint(&mut self.stream, DEFAULT_WIDTH)? as u32;
        let start = self.stream.stream_position()?;

        let num_procs = read_uint(&mut self.stream, DEFAULT_WIDTH)? as u32;
        let working_dir = read_bytes(&mut self.stream)?;

        let num_args = read_uint(&mut self.stream, DEFAULT_WIDTH)? as usize;
        let mut args = Vec::with_capacity(num_args);
        for _ in 0..num_args {
            args.push(read_bytes(&mut self.stream)?);
        }

        let num_removed = read_uint(&mut self.stream, DEFAULT_WIDTH)? as usize;
        let mut removed = BTreeSet::new();
        for _ in 0..num_removed {
            removed.insert(read_bytes(&mut self.stream)?);
        }

        let num_changed = read_uint(&mut self.stream, DEFAULT_WIDTH)? as usize;
        let mut changed = BTreeMap::new();
        for _ in 0..num_changed {
            let key = read_bytes(&mut self.stream)?;
            let value = read_bytes(&mut self.stream)?;
            changed.insert(key, value);
        }

        let end = self.stream.stream_position()?;
        let actual = end - start;
        if actual != record_size as u64 {
            return Err(Error::CorruptRecord {
                expected: record_size,
                actual,
            });
        }

        let empty = Env::new();
        let base_env = self.baseline.as_ref().map_or(&empty, |j| &j.env);
        let env = envdiff::apply(base_env, &EnvDiff { removed, changed });

        tracing::trace!(num_procs, record_size, "decoded job record");
        Ok(Job {
            num_procs,
            working_dir,
            args,
            env,
        })
    }
}

impl<S> Drop for Cramfile<S>
where
    S: Read + Write + Seek,
{
    fn drop(&mut self) {
        let _ = self.stream.flush();
    }
}

impl Cramfile<File> {
    /// Open an existing cramfile for reading.
    ///
    /// The path must exist and start with a valid v2 header.
    pub fn open_read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "opening for read");
        let file = File::open(path)?;
        Self::from_read_stream(file)
    }

    /// Open a cramfile for writing, truncating any existing contents.
    pub fn open_write(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "opening for write");
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(path)?;
        Self::from_write_stream(file)
    }

    /// Open a cramfile for appending: behaves like [`Cramfile::open_write`]
    /// if the path is absent or empty, otherwise validates the existing
    /// header and positions the stream at end-of-file.
    pub fn open_append(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "opening for append");
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        if file.metadata()?.len() == 0 {
            Self::from_write_stream(file)
        } else {
            Self::from_append_stream(file)
        }
    }
}

/// Streaming, non-restartable iterator over the jobs in a [`Cramfile`]
/// opened for reading.
#[derive(Debug)]
pub struct CramfileIter<'a, S: Read + Write + Seek> {
    container: &'a mut Cramfile<S>,
    yielded: u32,
}

impl<'a, S: Read + Write + Seek> Iterator for CramfileIter<'a, S> {
    type Item = Result<Job>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.yielded >= self.container.num_jobs {
            return None;
        }
        self.yielded += 1;
        if self.yielded == 1 {
            return self.container.baseline.clone().map(Ok);
        }
        Some(self.container.decode_record())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.container.num_jobs - self.yielded) as usize;
        (remaining, Some(remaining))
    }
}
