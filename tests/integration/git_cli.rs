//! Scans over repositories built by the `git` CLI.
//!
//! History is committed, repacked into a single pack, and then extended
//! with one more loose commit, so both packed and loose objects (including
//! deltified ones) are read through the same tables.
//!
//! Requires `git` on `PATH`; tests skip gracefully if unavailable.

use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use git_tables::{
    collect_rows, BlobsTable, Context, Expr, FileIndexKey, FilesTable, Indexable, KeyList,
    ObjectRef, RepositoryPool, Table, Value,
};
use tempfile::TempDir;

fn git_available() -> bool {
    Command::new("git").arg("--version").output().is_ok()
}

fn run_git(repo: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args([
            "-c",
            "user.name=Fixture",
            "-c",
            "user.email=fixture@example.com",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .current_dir(repo)
        .status()
        .expect("failed to run git");
    assert!(status.success(), "git command failed: {args:?}");
}

fn git_output(repo: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .expect("failed to run git");
    assert!(out.status.success(), "git command failed: {args:?}");
    String::from_utf8(out.stdout)
        .expect("git output not utf8")
        .trim()
        .to_string()
}

/// Two packed commits and one loose commit on top.
fn build_repo() -> TempDir {
    let tmp = TempDir::new().expect("create temp dir");
    let repo = tmp.path();
    run_git(repo, &["init", "-q"]);

    let body: String = (0..200).map(|i| format!("line {i}\n")).collect();
    fs::write(repo.join("a.txt"), &body).unwrap();
    fs::create_dir_all(repo.join("src")).unwrap();
    fs::write(repo.join("src").join("lib.rs"), "pub fn f() {}\n").unwrap();
    run_git(repo, &["add", "."]);
    run_git(repo, &["commit", "-q", "-m", "first"]);

    fs::write(repo.join("a.txt"), format!("{body}one more\n")).unwrap();
    run_git(repo, &["commit", "-q", "-a", "-m", "second"]);
    run_git(repo, &["repack", "-a", "-d", "-q"]);

    fs::write(repo.join("b.txt"), "loose\n").unwrap();
    run_git(repo, &["add", "b.txt"]);
    run_git(repo, &["commit", "-q", "-m", "third"]);
    tmp
}

fn context(repo: &Path) -> Context {
    let mut pool = RepositoryPool::new();
    pool.add_git("r", repo).expect("register repository");
    Context::with_pool(Arc::new(pool))
}

#[test]
fn files_match_git_ls_tree() {
    if !git_available() {
        eprintln!("git not available; skipping");
        return;
    }
    let tmp = build_repo();
    let repo = tmp.path();
    let ctx = context(repo);

    let head_tree = git_output(repo, &["rev-parse", "HEAD^{tree}"]);
    let mut iter = FilesTable::default()
        .with_project_and_filters(
            &ctx,
            &[Expr::field("file_path"), Expr::field("blob_content")],
            &[Expr::eq(Expr::field("tree_hash"), Expr::lit(head_tree.as_str()))],
        )
        .unwrap();
    let rows = collect_rows(iter.as_mut()).unwrap();

    let listed = git_output(repo, &["ls-tree", "-r", "HEAD"]);
    assert_eq!(rows.len(), listed.lines().count());
    for line in listed.lines() {
        // "<mode> blob <hash>\t<path>"
        let (meta, path) = line.split_once('\t').unwrap();
        let fields: Vec<&str> = meta.split(' ').collect();
        let row = rows
            .iter()
            .find(|r| r[1] == Value::from(path))
            .unwrap_or_else(|| panic!("missing {path}"));
        assert_eq!(row[2], Value::from(fields[2]));
        assert_eq!(row[3], Value::from(head_tree.as_str()));
        assert_eq!(row[4], Value::Text(format!("0{}", fields[0])));

        let content = fs::read(repo.join(path)).unwrap();
        assert_eq!(row[5], Value::Blob(content.clone()));
        assert_eq!(row[6], Value::Int64(content.len() as i64));
    }
}

#[test]
fn distinct_trees_cover_history() {
    if !git_available() {
        eprintln!("git not available; skipping");
        return;
    }
    let tmp = build_repo();
    let ctx = context(tmp.path());

    let rows = collect_rows(FilesTable::default().row_iter(&ctx).unwrap().as_mut()).unwrap();
    // first: 2 files, second: 2 files, third: 3 files.
    assert_eq!(rows.len(), 7);

    let mut trees: Vec<&str> = rows.iter().map(|r| r[3].as_text().unwrap()).collect();
    trees.sort_unstable();
    trees.dedup();
    assert_eq!(trees.len(), 3);
}

#[test]
fn blob_lookup_by_hash_reads_deltified_objects() {
    if !git_available() {
        eprintln!("git not available; skipping");
        return;
    }
    let tmp = build_repo();
    let repo = tmp.path();
    let ctx = context(repo);

    let old = git_output(repo, &["rev-parse", "HEAD~2:a.txt"]);
    let new = git_output(repo, &["rev-parse", "HEAD:a.txt"]);
    let mut iter = BlobsTable::default()
        .with_project_and_filters(
            &ctx,
            &[Expr::field("blob_content")],
            &[Expr::in_list(
                Expr::field("blob_hash"),
                vec![Expr::lit(old.as_str()), Expr::lit(new.as_str())],
            )],
        )
        .unwrap();
    let rows = collect_rows(iter.as_mut()).unwrap();
    assert_eq!(rows.len(), 2);

    let expected_old = git_output(repo, &["cat-file", "-p", &old]);
    let old_row = rows.iter().find(|r| r[1] == Value::from(old.as_str())).unwrap();
    match &old_row[3] {
        Value::Blob(data) => assert_eq!(String::from_utf8_lossy(data).trim(), expected_old),
        other => panic!("unexpected content {other}"),
    }
}

#[test]
fn file_index_uses_pack_offsets_for_packed_blobs() {
    if !git_available() {
        eprintln!("git not available; skipping");
        return;
    }
    let tmp = build_repo();
    let repo = tmp.path();
    let ctx = context(repo);
    let table = FilesTable::default();

    let loose_blob = git_output(repo, &["rev-parse", "HEAD:b.txt"]);
    let mut kv = table.index_key_value_iter(&ctx, &["blob_hash"]).unwrap();
    let mut keys = Vec::new();
    while let Some((values, key)) = kv.next().unwrap() {
        let decoded = FileIndexKey::decode(&key).unwrap();
        let hash = values[0].as_text().unwrap();
        if hash == loose_blob {
            assert!(matches!(decoded.object, ObjectRef::Loose { .. }));
        } else {
            assert!(matches!(decoded.object, ObjectRef::Packed { .. }));
        }
        keys.push(key);
    }
    kv.close().unwrap();

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
