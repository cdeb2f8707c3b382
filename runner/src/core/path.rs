//! Lexical path handling and the allowed-path policy.

use std::path::{Component, Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher};
use tracing::warn;

/// Normalize `.` and `..` components without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Anchor `raw` to `root` when relative, then normalize.
pub fn anchor(root: &Path, raw: &Path) -> PathBuf {
    if raw.is_absolute() {
        normalize(raw)
    } else {
        normalize(&root.join(raw))
    }
}

/// Anchor a glob entry at `root`, escaping the root so only the entry's own
/// metacharacters take part in matching.
fn anchored_glob(root: &Path, pattern: &str) -> String {
    let root = normalize(root);
    let anchored = anchor(&root, Path::new(pattern));
    match anchored.strip_prefix(&root) {
        Ok(rest) => PathBuf::from(globset::escape(&root.to_string_lossy()))
            .join(rest)
            .to_string_lossy()
            .into_owned(),
        Err(_) => anchored.to_string_lossy().into_owned(),
    }
}

#[derive(Debug, Clone)]
enum Allowed {
    /// Entries ending in `/**`: everything beneath the directory.
    Subtree(PathBuf),
    /// Any other entry: the anchored glob must match the whole path.
    Glob(GlobMatcher),
}

/// Allowed-path globs anchored at a project root.
#[derive(Debug, Clone)]
pub struct PathPolicy {
    entries: Vec<Allowed>,
}

impl PathPolicy {
    /// Compile `patterns` against `root`. Invalid globs are dropped with a warning.
    pub fn new(root: &Path, patterns: &[String]) -> Self {
        let mut entries = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            if let Some(dir) = pattern.strip_suffix("/**") {
                entries.push(Allowed::Subtree(anchor(root, Path::new(dir))));
                continue;
            }
            let glob = GlobBuilder::new(&anchored_glob(root, pattern))
                .literal_separator(true)
                .build();
            match glob {
                Ok(glob) => entries.push(Allowed::Glob(glob.compile_matcher())),
                Err(err) => warn!(pattern = %pattern, err = %err, "ignoring invalid allowed_paths glob"),
            }
        }
        Self { entries }
    }

    /// True if the absolute, normalized `path` falls under any entry.
    pub fn allows(&self, path: &Path) -> bool {
        self.entries.iter().any(|entry| match entry {
            Allowed::Subtree(dir) => path.starts_with(dir),
            Allowed::Glob(matcher) => matcher.is_match(path),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_parent_components() {
        assert_eq!(
            normalize(Path::new("/repo/workspace/../secrets/./key")),
            PathBuf::from("/repo/secrets/key")
        );
    }

    #[test]
    fn anchor_keeps_absolute_paths() {
        assert_eq!(
            anchor(Path::new("/repo"), Path::new("/etc/passwd")),
            PathBuf::from("/etc/passwd")
        );
        assert_eq!(
            anchor(Path::new("/repo"), Path::new("./workspace/a.md")),
            PathBuf::from("/repo/workspace/a.md")
        );
    }

    #[test]
    fn subtree_entries_match_by_component_prefix() {
        let policy = PathPolicy::new(Path::new("/repo"), &["./workspace/**".to_string()]);
        assert!(policy.allows(Path::new("/repo/workspace/notes/a.md")));
        assert!(policy.allows(Path::new("/repo/workspace")));
        assert!(!policy.allows(Path::new("/repo/workspace2/a.md")));
        assert!(!policy.allows(Path::new("/repo/roles/a.md")));
    }

    #[test]
    fn plain_entries_match_as_globs() {
        let policy = PathPolicy::new(Path::new("/repo"), &["output/*.md".to_string()]);
        assert!(policy.allows(Path::new("/repo/output/report.md")));
        assert!(!policy.allows(Path::new("/repo/output/nested/report.md")));
        assert!(!policy.allows(Path::new("/repo/output/report.json")));
    }

    #[test]
    fn glob_metacharacters_in_the_root_are_literal() {
        let root = Path::new("/srv/proj[1]{a,b}");
        let policy = PathPolicy::new(root, &["output/*.md".to_string()]);
        assert!(policy.allows(Path::new("/srv/proj[1]{a,b}/output/report.md")));
        assert!(!policy.allows(Path::new("/srv/proj1a/output/report.md")));
        assert!(!policy.allows(Path::new("/srv/proj[1]{a,b}/output/report.json")));
    }

    #[test]
    fn traversal_out_of_subtree_is_rejected_after_anchoring() {
        let policy = PathPolicy::new(Path::new("/repo"), &["./workspace/**".to_string()]);
        let escaped = anchor(Path::new("/repo"), Path::new("workspace/../roles/x/role.yml"));
        assert!(!policy.allows(&escaped));
    }

    #[test]
    fn empty_policy_allows_nothing() {
        let policy = PathPolicy::new(Path::new("/repo"), &[]);
        assert!(!policy.allows(Path::new("/repo/workspace/a.md")));
    }
}
