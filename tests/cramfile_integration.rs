//! End-to-end scenarios against real files on disk: empty container,
//! single job, many-job round trip, append-equals-fresh, version
//! rejection, and corruption detection.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};

use cram::{Cramfile, Env, Error, Job};

fn env(pairs: &[(&str, &str)]) -> Env {
    pairs
        .iter()
        .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
        .collect()
}

#[test]
fn empty_container_is_exactly_twenty_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.cram");

    let cf = Cramfile::open_write(&path).unwrap();
    cf.close().unwrap();

    let bytes = fs::read(&path).unwrap();
    assert_eq!(bytes.len(), 20);
    assert_eq!(&bytes[0..4], &[0x63, 0x72, 0x61, 0x6d]);

    let mut cf = Cramfile::open_read(&path).unwrap();
    assert_eq!(cf.num_jobs(), 0);
    assert_eq!(cf.num_procs(), 0);
    assert_eq!(cf.max_job_size(), 0);
    assert_eq!(cf.iter().unwrap().count(), 0);
}

#[test]
fn single_job_round_trips_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("single.cram");

    let job = Job::new(
        64,
        "/foo/bar/baz",
        ["foo", "bar", "baz"],
        env(&[("foo", "bar"), ("bar", "baz"), ("baz", "quux")]),
    );

    let mut cf = Cramfile::open_write(&path).unwrap();
    cf.pack(job.clone()).unwrap();
    cf.close().unwrap();

    let mut cf = Cramfile::open_read(&path).unwrap();
    assert_eq!(cf.num_jobs(), 1);
    assert_eq!(cf.num_procs(), 64);
    let jobs: Vec<_> = cf.iter().unwrap().map(Result::unwrap).collect();
    assert_eq!(jobs, vec![job]);
}

#[test]
fn many_job_round_trip_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("many.cram");

    let mut expected = Vec::new();
    {
        let mut cf = Cramfile::open_write(&path).unwrap();
        for i in 0..500u32 {
            let num_procs = [1u32, 2, 4, 8, 16][(i as usize) % 5];
            let mut e = env(&[("WORKING_DIR", "/base"), ("PATH", "/usr/bin")]);
            e.insert(b"INDEX".to_vec(), i.to_string().into_bytes());
            if i % 3 != 0 {
                e.remove(b"PATH".as_slice());
            }
            let job = Job::new(num_procs, format!("/wd/{i}"), ["exe", "arg"], e);
            cf.pack(job.clone()).unwrap();
            expected.push(job);
        }
        cf.close().unwrap();
    }

    let mut cf = Cramfile::open_read(&path).unwrap();
    assert_eq!(cf.num_jobs(), 500);
    let expected_procs: u32 = expected.iter().map(|j| j.num_procs).sum();
    assert_eq!(cf.num_procs(), expected_procs);
    let actual: Vec<_> = cf.iter().unwrap().map(Result::unwrap).collect();
    assert_eq!(actual, expected);
}

#[test]
fn append_sessions_match_one_write_session() {
    let dir = tempfile::tempdir().unwrap();
    let fresh_path = dir.path().join("fresh.cram");
    let appended_path = dir.path().join("appended.cram");

    let jobs: Vec<Job> = (0..50u32)
        .map(|i| {
            let mut e = env(&[("BASE", "x")]);
            if i % 2 == 0 {
                e.insert(b"EXTRA".to_vec(), i.to_string().into_bytes());
            }
            Job::new(i + 1, format!("/wd/{i}"), ["exe"], e)
        })
        .collect();

    {
        let mut cf = Cramfile::open_write(&fresh_path).unwrap();
        for job in &jobs {
            cf.pack(job.clone()).unwrap();
        }
        cf.close().unwrap();
    }

    for job in &jobs {
        let mut cf = Cramfile::open_append(&appended_path).unwrap();
        cf.pack(job.clone()).unwrap();
        cf.close().unwrap();
    }

    let mut fresh_reader = Cramfile::open_read(&fresh_path).unwrap();
    let mut appended_reader = Cramfile::open_read(&appended_path).unwrap();
    assert_eq!(fresh_reader.num_jobs(), appended_reader.num_jobs());
    assert_eq!(fresh_reader.num_procs(), appended_reader.num_procs());

    let fresh_jobs: Vec<_> = fresh_reader.iter().unwrap().map(Result::unwrap).collect();
    let appended_jobs: Vec<_> = appended_reader.iter().unwrap().map(Result::unwrap).collect();
    assert_eq!(fresh_jobs, appended_jobs);
}

#[test]
fn rejects_hand_crafted_v1_header() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("v1.cram");

    let mut bytes = Vec::new();
    bytes.extend_from_slice(&0x6372_616du32.to_be_bytes());
    bytes.extend_from_slice(&1u32.to_be_bytes());
    bytes.extend_from_slice(&0u32.to_be_bytes());
    fs::write(&path, &bytes).unwrap();

    let err = Cramfile::open_read(&path).unwrap_err();
    assert!(matches!(err, Error::VersionMismatch { found: 1 }));
}

#[test]
fn corrupting_a_record_byte_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corrupt.cram");

    {
        let mut cf = Cramfile::open_write(&path).unwrap();
        cf.pack(Job::new(64, "/foo/bar/baz", ["foo", "bar", "baz"], env(&[("foo", "bar")])))
            .unwrap();
        cf.close().unwrap();
    }

    // Flip a byte inside the record body (header is 20 bytes; anything
    // after that is fair game for this test).
    let mut file = fs::OpenOptions::new().read(true).write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(25)).unwrap();
    let mut byte = [0u8; 1];
    file.read_exact(&mut byte).unwrap();
    file.seek(SeekFrom::Start(25)).unwrap();
    file.write_all(&[byte[0] ^ 0xFF]).unwrap();
    drop(file);

    let mut cf = Cramfile::open_read(&path).unwrap();
    let result: Result<Vec<_>, _> = cf.iter().unwrap().collect();
    assert!(result.is_err());
}

#[test]
fn header_counters_match_body_after_every_pack() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("incremental.cram");
    let mut cf = Cramfile::open_write(&path).unwrap();

    let mut running_procs: u64 = 0;
    for i in 0..25u32 {
        let job = Job::new(i + 1, "/wd", ["exe"], BTreeMap::new());
        cf.pack(job).unwrap();
        running_procs += (i + 1) as u64;
        assert_eq!(cf.num_jobs(), i + 1);
        assert_eq!(cf.num_procs() as u64, running_procs);
    }
    cf.close().unwrap();
}
