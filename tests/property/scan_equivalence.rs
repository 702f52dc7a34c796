//! Property tests for selector pushdown.
//!
//! For random repositories and random conjunctions of equality / `IN`
//! filters, a pushed-down scan must return exactly the rows of a full scan
//! filtered by the same predicates. Hash lookups emit rows in selector
//! order, so rows are compared as multisets.

use std::sync::Arc;

use proptest::prelude::*;

use git_tables::git::{FileMode, MemoryStore, Oid};
use git_tables::{
    collect_rows, BlobsTable, Context, Expr, FilesTable, RepositoryPool, Row, Schema, Table,
    BLOBS_SCHEMA, FILES_SCHEMA,
};

const NAMES: [&str; 3] = ["a.txt", "b.txt", "run.sh"];

fn blob_oid(i: usize) -> Oid {
    Oid::new([0x10 + i as u8; 20])
}

fn tree_oid(i: usize) -> Oid {
    Oid::new([0x40 + i as u8; 20])
}

fn commit_oid(i: usize) -> Oid {
    Oid::new([0x70 + i as u8; 20])
}

/// One repository: blob contents, trees as `(name slot -> blob index)`,
/// and the tree index of each commit.
#[derive(Clone, Debug)]
struct RepoShape {
    blobs: Vec<Vec<u8>>,
    trees: Vec<Vec<Option<usize>>>,
    commits: Vec<usize>,
}

fn repo_strategy() -> impl Strategy<Value = RepoShape> {
    (1usize..5, 1usize..4, 1usize..6).prop_flat_map(|(n_blobs, n_trees, n_commits)| {
        let blobs = prop::collection::vec(prop::collection::vec(any::<u8>(), 0..16), n_blobs);
        let entry = prop::option::of(0..n_blobs);
        let trees = prop::collection::vec(prop::collection::vec(entry, NAMES.len()), n_trees);
        let commits = prop::collection::vec(0..n_trees, n_commits);
        (blobs, trees, commits).prop_map(|(blobs, trees, commits)| RepoShape {
            blobs,
            trees,
            commits,
        })
    })
}

fn build_store(shape: &RepoShape) -> MemoryStore {
    let mut store = MemoryStore::new();
    for (i, data) in shape.blobs.iter().enumerate() {
        store.add_blob(blob_oid(i), data.clone());
    }
    for (i, slots) in shape.trees.iter().enumerate() {
        let entries: Vec<(&str, FileMode, Oid)> = slots
            .iter()
            .zip(NAMES)
            .filter_map(|(slot, name)| slot.map(|b| (name, FileMode::REGULAR, blob_oid(b))))
            .collect();
        store.add_tree(tree_oid(i), &entries);
    }
    for (i, tree) in shape.commits.iter().enumerate() {
        let parents: Vec<Oid> = if i == 0 { Vec::new() } else { vec![commit_oid(i - 1)] };
        store.add_commit(commit_oid(i), tree_oid(*tree), &parents);
    }
    store
}

/// Candidate literal values per column, including ones that match nothing.
fn literal_pool(column: &str) -> Vec<String> {
    let mut out = vec!["nothing".to_string()];
    match column {
        "repository_id" => out.extend(["r0", "r1", "r2"].map(String::from)),
        "file_path" => out.extend(NAMES.map(String::from)),
        "blob_hash" => out.extend((0..5).map(|i| blob_oid(i).to_hex())),
        "tree_hash" => out.extend((0..4).map(|i| tree_oid(i).to_hex())),
        _ => out.extend(["0100644", "0100755"].map(String::from)),
    }
    out
}

fn filter_strategy(columns: &'static [&'static str]) -> impl Strategy<Value = Expr> {
    prop::sample::select(columns).prop_flat_map(|column| {
        let values = literal_pool(column);
        (
            any::<bool>(),
            prop::collection::vec(prop::sample::select(values), 1..3),
        )
            .prop_map(move |(as_in, values)| {
                let field = Expr::field(column);
                if as_in {
                    Expr::in_list(field, values.into_iter().map(Expr::lit).collect())
                } else {
                    Expr::eq(field, Expr::lit(values[0].clone()))
                }
            })
    })
}

fn context(shapes: &[RepoShape]) -> Context {
    let mut pool = RepositoryPool::new();
    for (i, shape) in shapes.iter().enumerate() {
        pool.add_store(format!("r{i}"), Arc::new(build_store(shape)))
            .unwrap();
    }
    Context::with_pool(Arc::new(pool))
}

fn check_equivalence(table: &dyn Table, schema: Schema, ctx: &Context, filters: &[Expr]) {
    let projection = [Expr::field("blob_content")];
    let mut pushed = table.with_project_and_filters(ctx, &projection, filters).unwrap();
    let mut pushed = collect_rows(pushed.as_mut()).unwrap();

    let full = collect_rows(table.row_iter(ctx).unwrap().as_mut()).unwrap();
    let mut expected: Vec<Row> = match Expr::join_and(filters.iter().cloned()) {
        Some(predicate) => full
            .into_iter()
            .filter(|row| predicate.matches(schema, row).unwrap())
            .collect(),
        None => full,
    };
    pushed.sort_by_key(|row| format!("{row:?}"));
    expected.sort_by_key(|row| format!("{row:?}"));
    assert_eq!(pushed, expected, "filters: {filters:?}");
}

const FILE_COLUMNS: &[&str] = &[
    "repository_id",
    "file_path",
    "blob_hash",
    "tree_hash",
    "tree_entry_mode",
];
const BLOB_COLUMNS: &[&str] = &["repository_id", "blob_hash"];

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn files_pushdown_matches_filtered_scan(
        shapes in prop::collection::vec(repo_strategy(), 1..3),
        filters in prop::collection::vec(filter_strategy(FILE_COLUMNS), 0..4),
    ) {
        check_equivalence(&FilesTable::default(), FILES_SCHEMA, &context(&shapes), &filters);
    }

    #[test]
    fn blobs_pushdown_matches_filtered_scan(
        shapes in prop::collection::vec(repo_strategy(), 1..3),
        filters in prop::collection::vec(filter_strategy(BLOB_COLUMNS), 0..3),
    ) {
        check_equivalence(&BlobsTable::default(), BLOBS_SCHEMA, &context(&shapes), &filters);
    }
}
