//! Cram packs many independent job invocations into a single compact
//! binary container so that one large parallel allocation can later fan
//! out and launch them all.
//!
//! This crate is the container itself: its on-disk format, the streaming
//! writer that delta-compresses each job's environment against a
//! baseline, and the streaming reader that reconstructs jobs in order.
//! Dispatching a real MPI job from the records is outside this crate;
//! see [`Cramfile`] for the API a launcher would drive.

pub mod codec;
pub mod cramfile;
pub mod envdiff;
pub mod error;
pub mod job;

pub use cramfile::{Cramfile, EXE_SENTINEL};
pub use envdiff::{Env, EnvDiff};
pub use error::{Error, Result};
pub use job::Job;
