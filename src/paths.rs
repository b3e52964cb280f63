use std::{
    fmt::{Display, Formatter},
    path::{Path, PathBuf},
    sync::OnceLock,
};

use regex::Regex;

/// Hosting services with a fixed `host/organization/project` layout. The first
/// group is the repository, the second the path inside it.
const HOSTING_PATTERNS: [&str; 2] = [
    r"^(github\.com/[A-Za-z0-9_.\-]+/[A-Za-z0-9_.\-]+)((/[\p{L}0-9_.\-]+)*)$",
    r"^(bitbucket\.org/[A-Za-z0-9_.\-]+/[A-Za-z0-9_.\-]+)((/[A-Za-z0-9_.\-]+)*)$",
];

fn hosting_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        HOSTING_PATTERNS
            .iter()
            .map(|pattern| Regex::new(pattern).expect("hosting pattern is a valid regex"))
            .collect()
    })
}

/// Slash separated name of a remote repository, e.g. `github.com/org/repo`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepositoryIdentifier(String);

impl RepositoryIdentifier {
    pub fn new(value: impl Into<String>) -> RepositoryIdentifier {
        RepositoryIdentifier(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Relative location of the repository inside the cache.
    pub fn to_path(&self) -> PathBuf {
        self.0.split('/').collect()
    }
}

impl Display for RepositoryIdentifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One way of splitting an import path into a repository and a file inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub identifier: RepositoryIdentifier,
    pub subpath: String,
}

impl Candidate {
    fn split(segments: &[&str], at: usize) -> Candidate {
        Candidate {
            identifier: RepositoryIdentifier::new(segments[..at].join("/")),
            subpath: segments[at..].join("/"),
        }
    }

    /// Location of the file once the repository lives in `directory`.
    pub fn local_path(&self, directory: &Path) -> PathBuf {
        if self.subpath.is_empty() {
            directory.to_path_buf()
        } else {
            directory.join(&self.subpath)
        }
    }
}

/// Where to look for a repository that has to be cloned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloneCandidates {
    /// The path belongs to a known hosting service; only this split is valid.
    Hosted(Candidate),
    /// Unknown layout; every split is probed, shortest repository first.
    Probe(Vec<Candidate>),
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|segment| !segment.is_empty()).collect()
}

/// Splits used to find an already cached repository, longest repository first,
/// so nested repositories win over their parents.
pub fn open_candidates(path: &str) -> Vec<Candidate> {
    let segments = segments(path);
    (1..=segments.len())
        .rev()
        .map(|at| Candidate::split(&segments, at))
        .collect()
}

/// Splits used when nothing is cached yet.
pub fn clone_candidates(path: &str) -> CloneCandidates {
    for pattern in hosting_patterns() {
        if let Some(captures) = pattern.captures(path) {
            let identifier = captures.get(1).map_or("", |m| m.as_str());
            let subpath = captures.get(2).map_or("", |m| m.as_str());
            return CloneCandidates::Hosted(Candidate {
                identifier: RepositoryIdentifier::new(identifier),
                subpath: subpath.trim_start_matches('/').to_owned(),
            });
        }
    }
    let segments = segments(path);
    CloneCandidates::Probe(
        (1..=segments.len())
            .map(|at| Candidate::split(&segments, at))
            .collect(),
    )
}
