//! End-to-end scans over on-disk fixture repositories.
//!
//! # Scenarios
//! - **Single file**: a one-file commit yields the expected `files` row.
//! - **Index round-trip**: keys for packed and loose blobs replay to the
//!   rows a full scan produces.
//! - **Shared trees**: commits sharing a root tree expand it once.
//! - **Content policy**: size and binary rules apply to both tables.
//! - **Release on error**: failing cursors drop every store and pack
//!   handle they opened.
//! - **Store size cap**: blobs larger than the store's payload cap still
//!   scan, with their size and without content.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use git_tables::git::{
    open_fs_store, FileMode, FsObjectStore, HeaderIter, Object, ObjectHeader, ObjectIter,
    ObjectKind, ObjectStore, Oid, PackHandle, RepoKind, StoreError, StoreLimits,
};
use git_tables::{
    collect_rows, BlobsTable, ContentPolicy, Context, Error, Expr, FileIndexKey, FilesTable,
    IndexValueIter, Indexable, KeyList, ObjectRef, PackOffsetKey, RepositoryPool, Result, Row,
    Table, Value,
};

use crate::support::{blob, commit, oid, tree, FixtureRepo};

fn context(repos: &[(&str, &FixtureRepo)]) -> Context {
    let mut pool = RepositoryPool::new();
    for (id, repo) in repos {
        pool.add_git(*id, repo.path()).expect("register repository");
    }
    Context::with_pool(Arc::new(pool))
}

/// Commit 0x30 -> tree 0x20 -> a.txt (blob 0x01, "abc").
fn single_file_repo() -> FixtureRepo {
    let repo = FixtureRepo::new();
    repo.write_loose(&[blob(oid(0x01), b"abc")]);
    repo.write_pack(
        oid(0xaa),
        &[
            tree(oid(0x20), &[("a.txt", FileMode::REGULAR, oid(0x01))]),
            commit(oid(0x30), oid(0x20), &[]),
        ],
    );
    repo
}

#[test]
fn single_file_commit_row() {
    let repo = single_file_repo();
    let ctx = context(&[("r", &repo)]);

    let mut iter = FilesTable::default()
        .with_project_and_filters(
            &ctx,
            &[Expr::field("file_path"), Expr::field("blob_size")],
            &[Expr::eq(Expr::field("file_path"), Expr::lit("a.txt"))],
        )
        .unwrap();
    let rows = collect_rows(iter.as_mut()).unwrap();

    assert_eq!(
        rows,
        vec![vec![
            Value::from("r"),
            Value::from("a.txt"),
            Value::Text(oid(0x01).to_hex()),
            Value::Text(oid(0x20).to_hex()),
            Value::from("0100644"),
            Value::Blob(Vec::new()),
            Value::Int64(3),
        ]]
    );
}

#[test]
fn blob_index_round_trip_packed_and_loose() {
    let repo = FixtureRepo::new();
    repo.write_loose(&[blob(oid(0x01), b"loose blob")]);
    let offsets = repo.write_pack(
        oid(0xaa),
        &[blob(oid(0x02), b"packed one"), blob(oid(0x03), b"packed two")],
    );
    let ctx = context(&[("r", &repo)]);
    let table = BlobsTable::default();

    let mut kv = table.index_key_value_iter(&ctx, &["blob_hash"]).unwrap();
    let mut keys = Vec::new();
    while let Some((values, key)) = kv.next().unwrap() {
        let decoded = PackOffsetKey::decode(&key).unwrap();
        assert_eq!(decoded.repository, "r");
        let hash = values[0].as_text().unwrap().to_string();
        let expected = if hash == oid(0x01).to_hex() {
            ObjectRef::Loose { oid: oid(0x01) }
        } else if hash == oid(0x02).to_hex() {
            ObjectRef::Packed {
                pack: oid(0xaa),
                offset: offsets[0],
            }
        } else {
            ObjectRef::Packed {
                pack: oid(0xaa),
                offset: offsets[1],
            }
        };
        assert_eq!(decoded.object, expected);
        keys.push(key);
    }
    kv.close().unwrap();
    assert_eq!(keys.len(), 3);

    let mut iter = table
        .with_project_filters_and_index(
            &ctx,
            &[Expr::field("blob_content")],
            &[],
            Box::new(KeyList::new(keys)),
        )
        .unwrap();
    let replayed = collect_rows(iter.as_mut()).unwrap();
    let scanned = collect_rows(table.row_iter(&ctx).unwrap().as_mut()).unwrap();
    assert_eq!(replayed, scanned);
}

#[test]
fn file_index_keys_carry_entry_location() {
    let repo = single_file_repo();
    let ctx = context(&[("r", &repo)]);
    let table = FilesTable::default();

    let mut kv = table.index_key_value_iter(&ctx, &["tree_entry_mode"]).unwrap();
    let (values, key) = kv.next().unwrap().expect("one file");
    assert!(kv.next().unwrap().is_none());
    kv.close().unwrap();

    assert_eq!(values, vec![Value::from("0100644")]);
    assert_eq!(
        FileIndexKey::decode(&key).unwrap(),
        FileIndexKey {
            repository: "r".into(),
            object: ObjectRef::Loose { oid: oid(0x01) },
            name: "a.txt".into(),
            mode: FileMode::REGULAR,
            tree: oid(0x20),
        }
    );

    let mut iter = table
        .with_project_filters_and_index(&ctx, &[], &[], Box::new(KeyList::new(vec![key])))
        .unwrap();
    let rows = collect_rows(iter.as_mut()).unwrap();
    assert_eq!(rows[0][1], Value::from("a.txt"));
    assert_eq!(rows[0][5], Value::Blob(Vec::new()));
}

#[test]
fn shared_root_tree_is_expanded_once() {
    let repo = FixtureRepo::new();
    repo.write_loose(&[
        blob(oid(0x01), b"abc"),
        tree(oid(0x20), &[("a.txt", FileMode::REGULAR, oid(0x01))]),
        commit(oid(0x30), oid(0x20), &[]),
        commit(oid(0x31), oid(0x20), &[oid(0x30)]),
    ]);
    let ctx = context(&[("r", &repo)]);
    let rows = collect_rows(FilesTable::default().row_iter(&ctx).unwrap().as_mut()).unwrap();
    assert_eq!(rows.len(), 1);
}

#[test]
fn content_policy_applies_to_both_tables() {
    let repo = FixtureRepo::new();
    repo.write_loose(&[
        blob(oid(0x01), b"short"),
        blob(oid(0x02), b"this one is too long"),
        blob(oid(0x03), b"bin\0ary"),
        tree(
            oid(0x20),
            &[
                ("bin", FileMode::REGULAR, oid(0x03)),
                ("long", FileMode::REGULAR, oid(0x02)),
                ("short", FileMode::REGULAR, oid(0x01)),
            ],
        ),
        commit(oid(0x30), oid(0x20), &[]),
    ]);
    let ctx = context(&[("r", &repo)]);
    let strict = ContentPolicy {
        max_content_size: 10,
        allow_binary: false,
    };
    let content = [Expr::field("blob_content")];

    let blobs = |policy: ContentPolicy| -> Vec<Row> {
        let mut iter = BlobsTable::new(policy)
            .with_project_and_filters(&ctx, &content, &[])
            .unwrap();
        collect_rows(iter.as_mut()).unwrap()
    };

    let rows = blobs(strict);
    assert_eq!(rows[0][3], Value::Blob(b"short".to_vec()));
    assert_eq!(rows[1][3], Value::Blob(Vec::new()));
    assert_eq!(rows[2][3], Value::Blob(Vec::new()));
    assert_eq!(rows[1][2], Value::Int64(20));

    let rows = blobs(ContentPolicy {
        allow_binary: true,
        ..strict
    });
    assert_eq!(rows[2][3], Value::Blob(b"bin\0ary".to_vec()));

    let mut iter = FilesTable::new(strict)
        .with_project_and_filters(&ctx, &content, &[])
        .unwrap();
    let rows = collect_rows(iter.as_mut()).unwrap();
    let contents: Vec<&Value> = rows.iter().map(|r| &r[5]).collect();
    assert_eq!(
        contents,
        [
            &Value::Blob(Vec::new()),
            &Value::Blob(Vec::new()),
            &Value::Blob(b"short".to_vec()),
        ]
    );
}

/// Live and total counts of stores and pack handles opened through a
/// counting opener.
#[derive(Clone, Default)]
struct Counters {
    live_stores: Arc<AtomicUsize>,
    opened_stores: Arc<AtomicUsize>,
    live_packs: Arc<AtomicUsize>,
    opened_packs: Arc<AtomicUsize>,
}

fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

/// Wraps a store and tracks how many wrappers are alive.
struct CountingStore {
    inner: Arc<dyn ObjectStore>,
    counters: Counters,
}

impl Drop for CountingStore {
    fn drop(&mut self) {
        self.counters.live_stores.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ObjectStore for CountingStore {
    fn objects(&self, kind: ObjectKind) -> Result<ObjectIter, StoreError> {
        self.inner.objects(kind)
    }

    fn headers(&self, kind: ObjectKind) -> Result<HeaderIter, StoreError> {
        self.inner.headers(kind)
    }

    fn object(&self, oid: &Oid) -> Result<Object, StoreError> {
        self.inner.object(oid)
    }

    fn header(&self, oid: &Oid) -> Result<ObjectHeader, StoreError> {
        self.inner.header(oid)
    }

    fn open_pack(&self, pack: &Oid) -> Result<Box<dyn PackHandle>, StoreError> {
        let inner = self.inner.open_pack(pack)?;
        self.counters.opened_packs.fetch_add(1, Ordering::SeqCst);
        self.counters.live_packs.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingPack {
            inner,
            live: Arc::clone(&self.counters.live_packs),
        }))
    }
}

/// Wraps a pack handle and tracks how many wrappers are alive.
struct CountingPack {
    inner: Box<dyn PackHandle>,
    live: Arc<AtomicUsize>,
}

impl Drop for CountingPack {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl PackHandle for CountingPack {
    fn pack_id(&self) -> Oid {
        self.inner.pack_id()
    }

    fn header_at(&mut self, offset: u64) -> Result<ObjectHeader, StoreError> {
        self.inner.header_at(offset)
    }

    fn decode_at(&mut self, offset: u64) -> Result<Object, StoreError> {
        self.inner.decode_at(offset)
    }
}

fn counting_context(repos: &[(&str, &FixtureRepo)]) -> (Context, Counters) {
    let counters = Counters::default();
    let opener = {
        let counters = counters.clone();
        move |path: &Path, kind: RepoKind| -> Result<Arc<dyn ObjectStore>, StoreError> {
            let inner = open_fs_store(path, kind)?;
            counters.opened_stores.fetch_add(1, Ordering::SeqCst);
            counters.live_stores.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(CountingStore {
                inner,
                counters: counters.clone(),
            }))
        }
    };
    let opener = Arc::new(opener);

    let mut pool = RepositoryPool::new();
    for (id, repo) in repos {
        pool.add(*id, repo.path(), RepoKind::Bare, opener.clone())
            .expect("register repository");
    }
    (Context::with_pool(Arc::new(pool)), counters)
}

#[test]
fn failing_scan_releases_every_store() {
    let good = single_file_repo();
    let broken = FixtureRepo::new();
    broken.write_loose(&[
        tree(oid(0x20), &[("gone.txt", FileMode::REGULAR, oid(0x09))]),
        commit(oid(0x30), oid(0x20), &[]),
    ]);
    let (ctx, counters) = counting_context(&[("good", &good), ("broken", &broken), ("after", &good)]);

    let mut iter = FilesTable::default().row_iter(&ctx).unwrap();
    assert!(iter.next().unwrap().is_some());
    assert!(matches!(
        iter.next(),
        Err(Error::Store(StoreError::NotFound(_)))
    ));
    assert_eq!(count(&counters.opened_stores), 2);
    assert_eq!(count(&counters.live_stores), 0);

    iter.close().unwrap();
    drop(iter);
    assert_eq!(count(&counters.live_stores), 0);
}

#[test]
fn exhausted_and_closed_scans_release_stores() {
    let repo = single_file_repo();
    let (ctx, counters) = counting_context(&[("a", &repo), ("b", &repo)]);

    let mut iter = BlobsTable::default().row_iter(&ctx).unwrap();
    assert!(iter.next().unwrap().is_some());
    assert_eq!(count(&counters.live_stores), 1);
    iter.close().unwrap();
    assert_eq!(count(&counters.live_stores), 0);

    let mut kv = FilesTable::default().index_key_value_iter(&ctx, &[]).unwrap();
    while kv.next().unwrap().is_some() {}
    assert_eq!(count(&counters.live_stores), 0);
    kv.close().unwrap();
}

/// Key stream that records whether it was closed.
struct WatchedKeys {
    keys: KeyList,
    closed: Arc<AtomicBool>,
}

impl IndexValueIter for WatchedKeys {
    fn next(&mut self) -> Result<Option<Vec<u8>>> {
        self.keys.next()
    }

    fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.keys.close()
    }
}

fn blob_key(repository: &str, object: ObjectRef) -> Vec<u8> {
    PackOffsetKey {
        repository: repository.into(),
        object,
    }
    .encode()
    .unwrap()
}

#[test]
fn index_scan_error_releases_resolver_and_keys() {
    let repo = single_file_repo();
    repo.write_pack(oid(0xbb), &[blob(oid(0x02), b"in pack bb")]);
    let (ctx, counters) = counting_context(&[("r", &repo)]);

    let good = blob_key("r", ObjectRef::Loose { oid: oid(0x01) });
    let packed = blob_key(
        "r",
        ObjectRef::Packed {
            pack: oid(0xbb),
            offset: 12,
        },
    );
    // Tree 0x20 is the first entry of pack 0xaa.
    let tree_key = blob_key(
        "r",
        ObjectRef::Packed {
            pack: oid(0xaa),
            offset: 12,
        },
    );
    let closed = Arc::new(AtomicBool::new(false));
    let keys = WatchedKeys {
        keys: KeyList::new(vec![good.clone(), packed, tree_key, good]),
        closed: Arc::clone(&closed),
    };

    let mut iter = BlobsTable::default()
        .with_project_filters_and_index(&ctx, &[], &[], Box::new(keys))
        .unwrap();
    assert!(iter.next().unwrap().is_some());
    assert_eq!(count(&counters.live_stores), 1);
    assert_eq!(count(&counters.live_packs), 0);
    assert!(iter.next().unwrap().is_some());
    assert_eq!(count(&counters.live_packs), 1);
    assert!(matches!(
        iter.next(),
        Err(Error::InvalidObjectType {
            expected: ObjectKind::Blob,
            found: ObjectKind::Tree
        })
    ));
    assert!(closed.load(Ordering::SeqCst));
    assert_eq!(count(&counters.opened_packs), 2);
    assert_eq!(count(&counters.live_packs), 0);
    assert_eq!(count(&counters.live_stores), 0);
    iter.close().unwrap();
    assert_eq!(count(&counters.live_packs), 0);
}

#[test]
fn switching_packs_keeps_one_handle_open() {
    let repo = FixtureRepo::new();
    let first = repo.write_pack(
        oid(0xaa),
        &[blob(oid(0x01), b"one"), blob(oid(0x02), b"two")],
    );
    let second = repo.write_pack(oid(0xbb), &[blob(oid(0x03), b"three")]);
    let (ctx, counters) = counting_context(&[("r", &repo)]);

    let at = |pack: u8, offset: u64| {
        blob_key(
            "r",
            ObjectRef::Packed {
                pack: oid(pack),
                offset,
            },
        )
    };
    let keys = vec![
        at(0xaa, first[0]),
        at(0xaa, first[1]),
        at(0xbb, second[0]),
        at(0xaa, first[0]),
    ];

    let mut iter = BlobsTable::default()
        .with_project_filters_and_index(
            &ctx,
            &[Expr::field("blob_content")],
            &[],
            Box::new(KeyList::new(keys)),
        )
        .unwrap();
    let mut contents = Vec::new();
    while let Some(row) = iter.next().unwrap() {
        assert_eq!(count(&counters.live_packs), 1);
        contents.push(row[3].clone());
    }
    assert_eq!(
        contents,
        ["one", "two", "three", "one"].map(|c| Value::Blob(c.as_bytes().to_vec()))
    );
    assert_eq!(count(&counters.opened_packs), 3);
    assert_eq!(count(&counters.live_packs), 0);
    assert_eq!(count(&counters.live_stores), 0);
    iter.close().unwrap();
}

/// Repository with a 1 KiB loose blob and a 1 KiB packed blob, both in the
/// root tree, opened with a 256-byte payload cap. Trees and commits fit
/// under the cap; the blobs do not.
fn oversized_blobs_context() -> (FixtureRepo, Context) {
    let repo = FixtureRepo::new();
    repo.write_loose(&[
        blob(oid(0x01), &[b'l'; 1024]),
        tree(
            oid(0x20),
            &[
                ("loose", FileMode::REGULAR, oid(0x01)),
                ("packed", FileMode::REGULAR, oid(0x02)),
            ],
        ),
        commit(oid(0x30), oid(0x20), &[]),
    ]);
    repo.write_pack(oid(0xaa), &[blob(oid(0x02), &[b'p'; 1024])]);

    let limits = StoreLimits {
        max_object_bytes: 256,
        ..StoreLimits::DEFAULT
    };
    let opener = Arc::new(
        move |path: &Path, kind: RepoKind| -> Result<Arc<dyn ObjectStore>, StoreError> {
            Ok(Arc::new(FsObjectStore::open(path, kind, limits)?))
        },
    );
    let mut pool = RepositoryPool::new();
    pool.add("r", repo.path(), RepoKind::Bare, opener)
        .expect("register repository");
    (repo, Context::with_pool(Arc::new(pool)))
}

#[test]
fn blobs_over_store_cap_scan_with_size_and_no_content() {
    let (_repo, ctx) = oversized_blobs_context();
    let policy = ContentPolicy {
        max_content_size: 10,
        allow_binary: false,
    };
    let blobs = BlobsTable::new(policy);
    let files = FilesTable::new(policy);
    let empty = Value::Blob(Vec::new());

    for columns in [vec![Expr::field("blob_size")], vec![Expr::field("blob_content")]] {
        let mut iter = blobs.with_project_and_filters(&ctx, &columns, &[]).unwrap();
        let rows = collect_rows(iter.as_mut()).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r[2] == Value::Int64(1024) && r[3] == empty));

        let mut iter = files.with_project_and_filters(&ctx, &columns, &[]).unwrap();
        let rows = collect_rows(iter.as_mut()).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r[6] == Value::Int64(1024) && r[5] == empty));
    }

    let by_hash = Expr::eq(Expr::field("blob_hash"), Expr::lit(oid(0x02).to_hex()));
    let mut iter = blobs
        .with_project_and_filters(&ctx, &[Expr::field("blob_content")], &[by_hash])
        .unwrap();
    let rows = collect_rows(iter.as_mut()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][2], Value::Int64(1024));

    let mut kv = blobs
        .index_key_value_iter(&ctx, &["blob_hash", "blob_content"])
        .unwrap();
    let mut keys = Vec::new();
    while let Some((values, key)) = kv.next().unwrap() {
        assert_eq!(values[1], empty);
        keys.push(key);
    }
    kv.close().unwrap();
    let mut iter = blobs
        .with_project_filters_and_index(
            &ctx,
            &[Expr::field("blob_content")],
            &[],
            Box::new(KeyList::new(keys)),
        )
        .unwrap();
    let rows = collect_rows(iter.as_mut()).unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r[2] == Value::Int64(1024) && r[3] == empty));
}

#[test]
fn unregistered_repository_in_key_is_an_error() {
    let repo = single_file_repo();
    let ctx = context(&[("r", &repo)]);
    let key = PackOffsetKey {
        repository: "other".into(),
        object: ObjectRef::Loose { oid: oid(0x01) },
    };
    let mut iter = BlobsTable::default()
        .with_project_filters_and_index(&ctx, &[], &[], Box::new(KeyList::new(vec![key.encode().unwrap()])))
        .unwrap();
    assert!(matches!(iter.next(), Err(Error::RepositoryNotFound(id)) if id == "other"));
}

#[test]
fn scans_without_session_fail_before_iterating() {
    let ctx = Context::default();
    assert!(matches!(
        FilesTable::default().with_project_and_filters(&ctx, &[], &[]),
        Err(Error::InvalidSession)
    ));
    assert!(matches!(
        BlobsTable::default().with_project_filters_and_index(
            &ctx,
            &[],
            &[],
            Box::new(KeyList::new(Vec::new()))
        ),
        Err(Error::InvalidSession)
    ));
}
