use std::fmt::{Display, Formatter};

const LATEST: &str = "latest";

/// Revision requested by an import token after its last `@`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Revision {
    /// No `@` suffix: the tip of the default branch.
    #[default]
    Unspecified,
    /// `@latest`: like `Unspecified`, but never reuses a cached clone.
    Latest,
    /// A tag name or any other revision git understands.
    Named(String),
}

impl Revision {
    pub fn parse(value: &str) -> Revision {
        match value {
            "" => Revision::Unspecified,
            LATEST => Revision::Latest,
            other => Revision::Named(other.to_owned()),
        }
    }
}

impl Display for Revision {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Revision::Unspecified => f.write_str("HEAD"),
            Revision::Latest => f.write_str(LATEST),
            Revision::Named(name) => f.write_str(name),
        }
    }
}

/// A remote import such as `github.com/org/repo/dir/file.proto@v1.0.0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportToken {
    pub path: String,
    pub revision: Revision,
}

impl ImportToken {
    pub fn parse(raw: &str) -> ImportToken {
        let cleaned = clean_path(raw);
        match cleaned.rsplit_once('@') {
            Some((path, revision)) => ImportToken {
                path: path.to_owned(),
                revision: Revision::parse(revision),
            },
            None => ImportToken {
                path: cleaned,
                revision: Revision::Unspecified,
            },
        }
    }
}

impl Display for ImportToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.revision {
            Revision::Unspecified => f.write_str(&self.path),
            revision => write!(f, "{}@{}", self.path, revision),
        }
    }
}

/// Lexically normalizes a slash separated path: repeated slashes and `.`
/// segments are dropped and `..` removes the preceding segment. An empty
/// result becomes `.`.
pub fn clean_path(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(last) if *last != ".." => {
                    segments.pop();
                }
                // `..` cannot climb above the root
                _ if rooted => {}
                _ => segments.push(".."),
            },
            other => segments.push(other),
        }
    }
    let joined = segments.join("/");
    if rooted {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_owned()
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn parse_without_revision() {
        let token = ImportToken::parse("github.com/org/repo/dir/file.proto");
        assert_eq!(
            token,
            ImportToken {
                path: "github.com/org/repo/dir/file.proto".to_owned(),
                revision: Revision::Unspecified,
            }
        );
    }

    #[test]
    fn parse_latest() {
        let token = ImportToken::parse("example.com/org/repo/a.proto@latest");
        assert_eq!(token.path, "example.com/org/repo/a.proto");
        assert_eq!(token.revision, Revision::Latest);
    }

    #[test]
    fn parse_named_revision() {
        let token = ImportToken::parse("example.com/org/repo/a.proto@v1.0.0");
        assert_eq!(token.path, "example.com/org/repo/a.proto");
        assert_eq!(token.revision, Revision::Named("v1.0.0".to_owned()));
    }

    #[test]
    fn parse_splits_on_last_at() {
        let token = ImportToken::parse("host/user@corp/repo/a.proto@abc123");
        assert_eq!(token.path, "host/user@corp/repo/a.proto");
        assert_eq!(token.revision, Revision::Named("abc123".to_owned()));
    }

    #[test]
    fn parse_empty_revision_is_unspecified() {
        let token = ImportToken::parse("example.com/org/repo/a.proto@");
        assert_eq!(token.path, "example.com/org/repo/a.proto");
        assert_eq!(token.revision, Revision::Unspecified);
    }

    #[test]
    fn parse_cleans_path() {
        let token = ImportToken::parse("example.com//org/./repo/x/../a.proto@v2");
        assert_eq!(token.path, "example.com/org/repo/a.proto");
        assert_eq!(token.to_string(), "example.com/org/repo/a.proto@v2");
    }

    #[test]
    fn clean_path_cases() {
        for (input, expected) in [
            ("", "."),
            (".", "."),
            ("a/b/", "a/b"),
            ("a/../..", ".."),
            ("../a/./b", "../a/b"),
            ("/../a", "/a"),
            ("/", "/"),
            ("a/b/../../c", "c"),
        ] {
            assert_eq!(clean_path(input), expected, "cleaning {input:?}");
        }
    }
}
