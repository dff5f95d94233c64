//! Thin CLI front end over the `cram` library: `pack`, `info`, `test-gen`,
//! and `test-verify`. All the interesting behavior lives in the library;
//! these commands only parse arguments, call it, and format output.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use cram::{Cramfile, Env, Job};

#[derive(Parser)]
#[command(name = "cram", about = "Pack many job invocations into a single binary container")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pack a command invocation into a cramfile
    Pack {
        /// Number of processes to run with
        #[arg(short = 'n', long = "nprocs")]
        nprocs: Option<u32>,
        /// File to store the command invocation in
        #[arg(short = 'f', long = "file", default_value = "cram.job")]
        file: PathBuf,
        /// Command line to execute
        #[arg(trailing_var_arg = true)]
        command: Vec<String>,
    },
    /// Display information about a cramfile
    Info {
        /// Print information on every job in the cramfile
        #[arg(short = 'a', long = "all")]
        all: bool,
        /// Specific job id to display in more detail
        #[arg(short = 'j', long = "job")]
        job: Option<u32>,
        /// Number of job lines to print in the summary view
        #[arg(short = 'n', default_value_t = 10)]
        num_lines: usize,
        /// Cramfile to display
        cramfile: PathBuf,
    },
    /// Generate a directory structure and a cramfile for a test ensemble
    #[command(name = "test-gen")]
    TestGen {
        /// Total number of processes to spread across jobs
        nprocs: u32,
        /// Number of processes per job
        job_size: u32,
        /// Number of jobs per working-directory bucket
        #[arg(long = "jobs-per-dir", default_value_t = 1024)]
        jobs_per_dir: u32,
        /// Print peak memory usage when done
        #[arg(long = "print-mem-usage")]
        print_mem: bool,
    },
    /// Cross-check a cramfile's header counters against its own records
    #[command(name = "test-verify")]
    TestVerify {
        /// Cramfile to verify
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Pack { nprocs, file, command } => cmd_pack(nprocs, &file, command),
        Command::Info { all, job, num_lines, cramfile } => cmd_info(all, job, num_lines, &cramfile),
        Command::TestGen {
            nprocs,
            job_size,
            jobs_per_dir,
            print_mem,
        } => cmd_test_gen(nprocs, job_size, jobs_per_dir, print_mem),
        Command::TestVerify { file } => cmd_test_verify(&file),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("cram: error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(unix)]
fn os_str_bytes(s: &OsStr) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    s.as_bytes().to_vec()
}

#[cfg(not(unix))]
fn os_str_bytes(s: &OsStr) -> Vec<u8> {
    s.to_string_lossy().into_owned().into_bytes()
}

fn current_env() -> Env {
    std::env::vars_os()
        .map(|(k, v)| (os_str_bytes(&k), os_str_bytes(&v)))
        .collect()
}

fn join_args(args: &[Vec<u8>]) -> String {
    args.iter()
        .map(|a| String::from_utf8_lossy(a).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn cmd_pack(nprocs: Option<u32>, file: &Path, command: Vec<String>) -> anyhow::Result<()> {
    if command.is_empty() {
        anyhow::bail!("you must supply a command line to pack");
    }
    let nprocs = nprocs.unwrap_or(1);
    let working_dir = std::env::current_dir()?;

    let mut cf = Cramfile::open_append(file)?;
    cf.pack_args(nprocs, os_str_bytes(working_dir.as_os_str()), command, current_env(), None)?;
    cf.close()?;
    println!("packed 1 job into {}", file.display());
    Ok(())
}

fn print_header(path: &Path, cf: &Cramfile<std::fs::File>) {
    println!("Name:             {}", path.display());
    println!("Number of Jobs:   {}", cf.num_jobs());
    println!("Total Procs:      {}", cf.num_procs());
    println!("Cram version:     {}", cf.version());
    println!("Max job record:   {}", cf.max_job_size());
}

fn print_job_info(job: &Job) {
    println!("  Num procs: {}", job.num_procs);
    println!("  Working dir: {}", String::from_utf8_lossy(&job.working_dir));
    println!("  Arguments:");
    println!("      {}", join_args(&job.args));
    println!("  Environment:");
    for (key, value) in &job.env {
        println!(
            "      '{}' : '{}'",
            String::from_utf8_lossy(key),
            String::from_utf8_lossy(value)
        );
    }
}

fn cmd_info(all: bool, job: Option<u32>, num_lines: usize, cramfile: &Path) -> anyhow::Result<()> {
    let mut cf = Cramfile::open_read(cramfile)?;

    if all {
        print_header(cramfile, &cf);
        println!();
        println!("Job information:");
        for (i, job) in cf.iter()?.enumerate() {
            println!("Job {i}:");
            print_job_info(&job?);
        }
    } else if let Some(job_id) = job {
        let jobs: cram::Result<Vec<_>> = cf.iter()?.collect();
        let jobs = jobs?;
        let job = jobs
            .get(job_id as usize)
            .ok_or_else(|| anyhow::anyhow!("no job {job_id} in this cram file"))?;
        println!("Job {job_id}:");
        print_job_info(job);
    } else {
        print_header(cramfile, &cf);
        println!();
        println!("First {num_lines} job command lines:");
        for (i, job) in cf.iter()?.take(num_lines).enumerate() {
            let job = job?;
            println!("{i:5}  {:5} procs    {}", job.num_procs, join_args(&job.args));
        }
    }

    cf.close()?;
    Ok(())
}

fn cmd_test_gen(nprocs: u32, job_size: u32, jobs_per_dir: u32, print_mem: bool) -> anyhow::Result<()> {
    if job_size == 0 {
        anyhow::bail!("job_size must be at least 1");
    }
    let cwd = std::env::current_dir()?;
    let test_dir = cwd.join("cram-test-outputs").join(nprocs.to_string()).join(job_size.to_string());
    fs::create_dir_all(&test_dir)?;
    let cramfile_path = test_dir.join("cram.job");

    let mut cf = Cramfile::open_write(&cramfile_path)?;
    let mut wdir = test_dir.clone();
    let mut i = 0u32;
    let mut rank = 0u32;
    while rank < nprocs {
        if i % jobs_per_dir == 0 {
            wdir = test_dir.join(format!("wdir.{}", i / jobs_per_dir));
            fs::create_dir_all(&wdir)?;
        }

        let mut env = current_env();
        env.insert(b"CRAM_JOB_ID".to_vec(), i.to_string().into_bytes());
        let args = [
            "exe".to_string(),
            "foo".to_string(),
            "bar".to_string(),
            "baz".to_string(),
            i.to_string(),
        ];
        cf.pack(Job::new(job_size, os_str_bytes(wdir.as_os_str()), args, env))?;

        i += 1;
        rank += job_size;
    }
    cf.close()?;

    println!("Created a test directory: {}", test_dir.display());
    println!("And a cram file: {}", cramfile_path.display());
    println!("To check that everything works, run cram test-verify on the generated file.");

    if print_mem {
        print_mem_usage();
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn print_mem_usage() {
    if let Ok(status) = fs::read_to_string("/proc/self/status") {
        for line in status.lines() {
            if let Some(kb) = line.strip_prefix("VmHWM:") {
                println!("Memory usage: {} KiB", kb.trim().trim_end_matches(" kB").trim());
                return;
            }
        }
    }
    println!("Memory usage: unavailable");
}

#[cfg(not(target_os = "linux"))]
fn print_mem_usage() {
    println!("Memory usage: unavailable on this platform");
}

fn cmd_test_verify(file: &Path) -> anyhow::Result<()> {
    let mut cf = Cramfile::open_read(file)?;
    let declared_jobs = cf.num_jobs();
    let declared_procs = cf.num_procs();

    let mut actual_jobs = 0u32;
    let mut actual_procs: u64 = 0;
    for job in cf.iter()? {
        let job = job?;
        actual_jobs += 1;
        actual_procs += job.num_procs as u64;
    }
    cf.close()?;

    if actual_jobs != declared_jobs {
        anyhow::bail!(
            "job count mismatch: header declares {declared_jobs}, found {actual_jobs} on scan"
        );
    }
    if actual_procs != declared_procs as u64 {
        anyhow::bail!(
            "proc count mismatch: header declares {declared_procs}, found {actual_procs} on scan"
        );
    }

    println!("{}: {declared_jobs} jobs, {declared_procs} procs, header matches body", file.display());
    Ok(())
}
