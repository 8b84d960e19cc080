//! Git diff between two revisions

use git2::{DiffOptions, Repository};
use std::collections::BTreeSet;

/// Get files changed between two refs, sorted, with both sides of renames
pub fn diff_paths(repo: &Repository, from: &str, to: &str) -> Result<Vec<String>, git2::Error> {
    let mut files: BTreeSet<String> = BTreeSet::new();

    let from_tree = repo.revparse_single(from)?.peel_to_commit()?.tree()?;
    let to_tree = repo.revparse_single(to)?.peel_to_commit()?.tree()?;

    let mut diff_opts = DiffOptions::new();
    let diff = repo.diff_tree_to_tree(Some(&from_tree), Some(&to_tree), Some(&mut diff_opts))?;

    diff.foreach(
        &mut |delta, _| {
            if let Some(path) = delta.new_file().path() {
                files.insert(path.to_string_lossy().to_string());
            }
            if let Some(path) = delta.old_file().path() {
                files.insert(path.to_string_lossy().to_string());
            }
            true
        },
        None,
        None,
        None,
    )?;

    Ok(files.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::testing::RepoBuilder;
    use tempfile::tempdir;

    #[test]
    fn test_diff_between_commits() {
        let dir = tempdir().unwrap();
        let builder = RepoBuilder::init(dir.path());
        builder.write("packages/a/package.json", "{}");
        builder.write("packages/b/package.json", "{}");
        let first = builder.commit("first", &[], Some("HEAD"));

        builder.write("packages/b/index.js", "module.exports = 1;");
        let second = builder.commit("second", &[first], Some("HEAD"));

        let files = diff_paths(&builder.repo, &first.to_string(), &second.to_string()).unwrap();
        assert_eq!(files, vec!["packages/b/index.js"]);

        let none = diff_paths(&builder.repo, "HEAD", "HEAD").unwrap();
        assert!(none.is_empty());
    }
}
