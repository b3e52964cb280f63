use std::path::Path;

use log::trace;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

/// Reads the credentials for `host` from a `.netrc` file. A missing or
/// unreadable file means no credentials.
pub fn read(path: &Path, host: &str) -> Option<Credentials> {
    match std::fs::read_to_string(path) {
        Ok(content) => lookup(&content, host),
        Err(error) => {
            trace!("Could not read {}: {}", path.display(), error);
            None
        }
    }
}

/// Finds the first `machine` entry matching `host`, or the `default` entry.
pub fn lookup(content: &str, host: &str) -> Option<Credentials> {
    let mut tokens = tokenize(content).into_iter();
    let mut active = false;
    let mut found: Option<Credentials> = None;
    while let Some(token) = tokens.next() {
        match token {
            "machine" => {
                if found.is_some() {
                    break;
                }
                active = tokens.next() == Some(host);
                if active {
                    found = Some(Credentials::default());
                }
            }
            "default" => {
                if found.is_some() {
                    break;
                }
                active = true;
                found = Some(Credentials::default());
            }
            "login" | "password" => {
                let value = tokens.next().unwrap_or_default();
                if let (true, Some(credentials)) = (active, found.as_mut()) {
                    if token == "login" {
                        credentials.login = value.to_owned();
                    } else {
                        credentials.password = value.to_owned();
                    }
                }
            }
            _ => {}
        }
    }
    found.filter(|credentials| !credentials.login.is_empty() || !credentials.password.is_empty())
}

fn tokenize(content: &str) -> Vec<&str> {
    content
        .lines()
        .flat_map(|line| {
            line.split_whitespace()
                .take_while(|word| !word.starts_with('#'))
        })
        .collect()
}
