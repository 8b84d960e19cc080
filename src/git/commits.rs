//! Ref, tag and merge-base resolution

use git2::{DescribeFormatOptions, DescribeOptions, ErrorCode, Repository};

/// Resolve a revision to the id of the commit it points at
pub fn resolve_commit(repo: &Repository, name: &str) -> Result<String, git2::Error> {
    let obj = repo.revparse_single(name)?;
    Ok(obj.peel_to_commit()?.id().to_string())
}

/// Check whether `name` is a tag (annotated or lightweight)
pub fn is_tag(repo: &Repository, name: &str) -> bool {
    repo.find_reference(&format!("refs/tags/{}", name)).is_ok()
}

/// Get the merge base between two revisions
pub fn merge_base(repo: &Repository, a: &str, b: &str) -> Result<String, git2::Error> {
    let oid1 = repo.revparse_single(a)?.peel_to_commit()?.id();
    let oid2 = repo.revparse_single(b)?.peel_to_commit()?.id();

    let merge_base = repo.merge_base(oid1, oid2)?;

    Ok(merge_base.to_string())
}

/// Find the most recent tag reachable from `reference`, like
/// `git describe --tags --abbrev=0 [--first-parent] [--match <pattern>]`.
///
/// Returns `Ok(None)` when no (matching) tag can describe the commit.
pub fn describe_tag(
    repo: &Repository,
    reference: &str,
    include_merged: bool,
    pattern: Option<&str>,
) -> Result<Option<String>, git2::Error> {
    if repo.tag_names(pattern)?.is_empty() {
        return Ok(None);
    }

    let obj = repo.revparse_single(reference)?.peel_to_commit()?.into_object();

    let mut opts = DescribeOptions::new();
    opts.describe_tags().only_follow_first_parent(!include_merged);
    if let Some(pattern) = pattern {
        opts.pattern(pattern);
    }

    let describe = match obj.describe(&opts) {
        Ok(describe) => describe,
        Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut format = DescribeFormatOptions::new();
    format.abbreviated_size(0);

    describe.format(Some(&format)).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::testing::RepoBuilder;
    use tempfile::tempdir;

    #[test]
    fn test_no_tags_describes_nothing() {
        let dir = tempdir().unwrap();
        let builder = RepoBuilder::init(dir.path());
        builder.write("README.md", "hello");
        builder.commit("initial", &[], Some("HEAD"));

        assert_eq!(describe_tag(&builder.repo, "HEAD", false, None).unwrap(), None);
    }

    #[test]
    fn test_describe_nearest_tag() {
        let dir = tempdir().unwrap();
        let builder = RepoBuilder::init(dir.path());
        builder.write("a.txt", "1");
        let first = builder.commit("first", &[], Some("HEAD"));
        builder.tag("v1.0.0", first);
        builder.write("a.txt", "2");
        let second = builder.commit("second", &[first], Some("HEAD"));
        builder.tag("v1.1.0", second);
        builder.write("a.txt", "3");
        builder.commit("third", &[second], Some("HEAD"));

        assert_eq!(
            describe_tag(&builder.repo, "HEAD", false, None).unwrap(),
            Some("v1.1.0".to_string())
        );
        assert_eq!(
            describe_tag(&builder.repo, "HEAD", false, Some("v1.0.*")).unwrap(),
            Some("v1.0.0".to_string())
        );
        assert!(is_tag(&builder.repo, "v1.0.0"));
        assert!(!is_tag(&builder.repo, "v9.9.9"));
    }

    #[test]
    fn test_merged_tags_only_followed_when_requested() {
        let dir = tempdir().unwrap();
        let builder = RepoBuilder::init(dir.path());
        builder.write("c.txt", "c0");
        builder.write("e.txt", "e0");
        let base = builder.commit("initial", &[], Some("HEAD"));
        builder.tag("1.0.0", base);

        builder.write("c.txt", "c1");
        let side = builder.commit("modify c", &[base], None);
        builder.tag("2.0.0", side);

        builder.write("c.txt", "c0");
        builder.write("e.txt", "e1");
        let main = builder.commit("modify e", &[base], Some("HEAD"));

        builder.write("c.txt", "c1");
        let merge = builder.commit("merge", &[main, side], Some("HEAD"));

        assert_eq!(
            describe_tag(&builder.repo, "HEAD", false, None).unwrap(),
            Some("1.0.0".to_string())
        );
        assert_eq!(
            describe_tag(&builder.repo, "HEAD", true, None).unwrap(),
            Some("2.0.0".to_string())
        );
        assert_eq!(merge_base(&builder.repo, "2.0.0", "HEAD").unwrap(), side.to_string());
        assert_eq!(resolve_commit(&builder.repo, "HEAD").unwrap(), merge.to_string());
    }
}
