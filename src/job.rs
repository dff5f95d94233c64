//! The value type bundling the four fields of a single job invocation.

use crate::envdiff::Env;

/// One job invocation packed into a cramfile: the context an MPI backend
/// needs to launch it later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Number of processes to run this job on. Must be `>= 1` for any job
    /// that is actually written to a cramfile.
    pub num_procs: u32,
    /// Working directory the job should run in.
    pub working_dir: Vec<u8>,
    /// Command-line arguments, including the executable name, in order.
    pub args: Vec<Vec<u8>>,
    /// The job's environment.
    pub env: Env,
}

impl Job {
    /// Construct a new job from its four fields.
    pub fn new(
        num_procs: u32,
        working_dir: impl AsRef<[u8]>,
        args: impl IntoIterator<Item = impl AsRef<[u8]>>,
        env: Env,
    ) -> Self {
        Self {
            num_procs,
            working_dir: working_dir.as_ref().to_vec(),
            args: args.into_iter().map(|a| a.as_ref().to_vec()).collect(),
            env,
        }
    }

    /// Construct a job from a single whitespace-delimited command-line
    /// string, splitting it the way a shell would. A convenience only —
    /// the on-disk representation always stores the already-split vector.
    pub fn from_command_line(
        num_procs: u32,
        working_dir: impl AsRef<[u8]>,
        command_line: &str,
        env: Env,
    ) -> Self {
        let args = command_line.split_whitespace();
        Self::new(num_procs, working_dir, args, env)
    }
}
