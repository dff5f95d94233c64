//! Property tests for the two invariants the whole format rests on:
//! the integer/byte-string codec round-trips exactly, and applying an
//! env diff to its base reconstructs the modified environment exactly.

use std::collections::BTreeMap;
use std::io::Cursor;

use cram::codec::{self, IntWidth};
use cram::envdiff;
use proptest::collection::{btree_map, vec};
use proptest::prelude::*;

fn byte_vec() -> impl Strategy<Value = Vec<u8>> {
    vec(any::<u8>(), 0..64)
}

fn env_strategy() -> impl Strategy<Value = BTreeMap<Vec<u8>, Vec<u8>>> {
    btree_map(byte_vec(), byte_vec(), 0..16)
}

proptest! {
    #[test]
    fn uint_round_trips_for_one_byte(value in 0u64..=0xFF) {
        let mut buf = Cursor::new(Vec::new());
        codec::write_uint(&mut buf, value, IntWidth::One).unwrap();
        buf.set_position(0);
        let read_back = codec::read_uint(&mut buf, IntWidth::One).unwrap();
        prop_assert_eq!(read_back, value);
    }

    #[test]
    fn uint_round_trips_for_two_bytes(value in 0u64..=0xFFFF) {
        let mut buf = Cursor::new(Vec::new());
        codec::write_uint(&mut buf, value, IntWidth::Two).unwrap();
        buf.set_position(0);
        let read_back = codec::read_uint(&mut buf, IntWidth::Two).unwrap();
        prop_assert_eq!(read_back, value);
    }

    #[test]
    fn uint_round_trips_for_four_bytes(value in 0u64..=0xFFFF_FFFF) {
        let mut buf = Cursor::new(Vec::new());
        codec::write_uint(&mut buf, value, IntWidth::Four).unwrap();
        buf.set_position(0);
        let read_back = codec::read_uint(&mut buf, IntWidth::Four).unwrap();
        prop_assert_eq!(read_back, value);
    }

    #[test]
    fn uint_round_trips_for_eight_bytes(value in any::<u64>()) {
        let mut buf = Cursor::new(Vec::new());
        codec::write_uint(&mut buf, value, IntWidth::Eight).unwrap();
        buf.set_position(0);
        let read_back = codec::read_uint(&mut buf, IntWidth::Eight).unwrap();
        prop_assert_eq!(read_back, value);
    }

    #[test]
    fn bytes_round_trip_for_arbitrary_content(data in byte_vec()) {
        let mut buf = Cursor::new(Vec::new());
        codec::write_bytes(&mut buf, &data).unwrap();
        buf.set_position(0);
        let read_back = codec::read_bytes(&mut buf).unwrap();
        prop_assert_eq!(read_back, data);
    }

    #[test]
    fn applying_a_diff_reconstructs_the_modified_env(
        base in env_strategy(),
        modified in env_strategy(),
    ) {
        let diff = envdiff::diff(&base, &modified);
        let reconstructed = envdiff::apply(&base, &diff);
        prop_assert_eq!(reconstructed, modified);
    }

    #[test]
    fn diffing_an_env_against_itself_is_empty(env in env_strategy()) {
        let diff = envdiff::diff(&env, &env);
        prop_assert!(diff.removed.is_empty());
        prop_assert!(diff.changed.is_empty());
    }
}
