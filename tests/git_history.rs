// tests/git_history.rs
// Git history search against a real throwaway repository.

use std::path::Path;

use git2::{Repository, Signature};
use loupe::search::GitHistorySearcher;
use tempfile::TempDir;

/// Build a repo with two commits touching src/lib.rs.
fn fixture_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    let sig = Signature::now("Test Author", "author@example.com").unwrap();

    std::fs::create_dir_all(dir.path().join("src")).unwrap();

    commit_file(
        &repo,
        &sig,
        "src/lib.rs",
        "pub fn add(a: i32, b: i32) -> i32 { a + b }\n",
        "add arithmetic helper",
        None,
    );
    let head = repo.head().unwrap().peel_to_commit().unwrap();
    commit_file(
        &repo,
        &sig,
        "src/lib.rs",
        "pub fn add(a: i32, b: i32) -> i32 { a + b }\npub fn sub(a: i32, b: i32) -> i32 { a - b }\n",
        "fix auth bug in subtraction",
        Some(&head),
    );

    drop(head);
    drop(repo);
    dir
}

fn commit_file(
    repo: &Repository,
    sig: &Signature,
    path: &str,
    content: &str,
    message: &str,
    parent: Option<&git2::Commit>,
) {
    let workdir = repo.workdir().unwrap();
    std::fs::write(workdir.join(path), content).unwrap();

    let mut index = repo.index().unwrap();
    index.add_path(Path::new(path)).unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();

    let parents: Vec<&git2::Commit> = parent.into_iter().collect();
    repo.commit(Some("HEAD"), sig, sig, message, &tree, &parents)
        .unwrap();
}

#[test]
fn search_commits_by_message_and_author() {
    let dir = fixture_repo();
    let searcher = GitHistorySearcher::open(dir.path()).unwrap();

    let matches = searcher.search_commits("auth bug", 10).unwrap();
    assert_eq!(matches.len(), 1);
    assert!(matches[0].summary.contains("fix auth bug"));
    assert_eq!(matches[0].author, "Test Author");

    let by_author = searcher.search_commits("test author", 10).unwrap();
    assert_eq!(by_author.len(), 2);

    let none = searcher.search_commits("nonexistent topic", 10).unwrap();
    assert!(none.is_empty());
}

#[test]
fn blame_points_at_the_introducing_commit() {
    let dir = fixture_repo();
    let searcher = GitHistorySearcher::open(dir.path()).unwrap();

    // Line 1 came from the first commit, line 2 from the second
    let first = searcher.blame_line("src/lib.rs", 1).unwrap().unwrap();
    assert!(first.summary.contains("add arithmetic helper"));
    assert_eq!(first.author, "Test Author");

    let second = searcher.blame_line("src/lib.rs", 2).unwrap().unwrap();
    assert!(second.summary.contains("fix auth bug"));
}
