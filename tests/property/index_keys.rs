//! Property tests for the index key codec.
//!
//! Every key decodes back to itself, a decoded reference is either packed
//! (non-negative offset) or loose (null packfile, negative offset) and never
//! both, and no proper prefix of a key decodes.

use proptest::prelude::*;

use git_tables::git::{FileMode, Oid};
use git_tables::{FileIndexKey, ObjectRef, PackOffsetKey};

fn oid_strategy() -> impl Strategy<Value = Oid> {
    prop::array::uniform20(any::<u8>()).prop_map(Oid::new)
}

fn object_ref_strategy() -> impl Strategy<Value = ObjectRef> {
    prop_oneof![
        (oid_strategy(), 0..=i64::MAX as u64)
            .prop_map(|(pack, offset)| ObjectRef::Packed { pack, offset }),
        oid_strategy().prop_map(|oid| ObjectRef::Loose { oid }),
    ]
}

fn mode_strategy() -> impl Strategy<Value = FileMode> {
    prop::sample::select(vec![
        FileMode::REGULAR,
        FileMode::EXECUTABLE,
        FileMode::SYMLINK,
        FileMode::SUBMODULE,
        FileMode::DIR,
    ])
}

fn pack_key_strategy() -> impl Strategy<Value = PackOffsetKey> {
    ("\\PC{0,12}", object_ref_strategy())
        .prop_map(|(repository, object)| PackOffsetKey { repository, object })
}

fn file_key_strategy() -> impl Strategy<Value = FileIndexKey> {
    (
        "\\PC{0,12}",
        object_ref_strategy(),
        "[a-z/._-]{0,24}",
        mode_strategy(),
        oid_strategy(),
    )
        .prop_map(|(repository, object, name, mode, tree)| FileIndexKey {
            repository,
            object,
            name,
            mode,
            tree,
        })
}

fn assert_exclusive(object: &ObjectRef) {
    match object {
        ObjectRef::Packed { offset, .. } => {
            assert!(object.signed_offset() >= 0);
            assert_eq!(object.signed_offset() as u64, *offset);
        }
        ObjectRef::Loose { .. } => {
            assert!(object.signed_offset() < 0);
            assert_eq!(object.packfile(), Oid::NULL);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn pack_offset_keys_round_trip(key in pack_key_strategy()) {
        let bytes = key.encode().unwrap();
        let decoded = PackOffsetKey::decode(&bytes).unwrap();
        prop_assert_eq!(&decoded, &key);
        assert_exclusive(&decoded.object);

        for len in 0..bytes.len() {
            prop_assert!(PackOffsetKey::decode(&bytes[..len]).is_err());
        }
    }

    #[test]
    fn file_keys_round_trip(key in file_key_strategy()) {
        let bytes = key.encode().unwrap();
        let decoded = FileIndexKey::decode(&bytes).unwrap();
        prop_assert_eq!(&decoded, &key);
        assert_exclusive(&decoded.object);

        for len in 0..bytes.len() {
            prop_assert!(FileIndexKey::decode(&bytes[..len]).is_err());
        }
    }

    #[test]
    fn trailing_bytes_are_rejected(key in pack_key_strategy(), extra in 1usize..4) {
        let mut bytes = key.encode().unwrap();
        bytes.extend(std::iter::repeat(0u8).take(extra));
        prop_assert!(PackOffsetKey::decode(&bytes).is_err());
    }
}
