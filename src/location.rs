//! Parsing of `path` / `host:path` comparison targets

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Local(PathBuf),
    Remote { host: String, path: String },
}

impl Location {
    /// A target is remote iff it contains a colon and is not an absolute
    /// local path. The first colon separates host from path.
    pub fn parse(s: &str) -> Location {
        if s.contains(':') && !Path::new(s).is_absolute() {
            if let Some((host, path)) = s.split_once(':') {
                if !host.is_empty() {
                    let path = if path.is_empty() { "." } else { path };
                    return Location::Remote {
                        host: host.to_string(),
                        path: path.to_string(),
                    };
                }
            }
        }
        Location::Local(PathBuf::from(s))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Location::Remote { .. })
    }

    /// Whether two targets denote the same tree (absolute local paths, or
    /// identical host and path)
    pub fn same_place(&self, other: &Location) -> bool {
        match (self, other) {
            (Location::Local(a), Location::Local(b)) => {
                match (std::path::absolute(a), std::path::absolute(b)) {
                    (Ok(a), Ok(b)) => a == b,
                    _ => false,
                }
            }
            (
                Location::Remote { host: ha, path: pa },
                Location::Remote { host: hb, path: pb },
            ) => ha == hb && pa.trim_end_matches('/') == pb.trim_end_matches('/'),
            _ => false,
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::Local(p) => write!(f, "{}", p.display()),
            Location::Remote { host, path } => write!(f, "{}:{}", host, path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_local_and_remote() {
        assert_eq!(Location::parse("some/dir"), Location::Local(PathBuf::from("some/dir")));
        assert_eq!(
            Location::parse("backup:/srv/data"),
            Location::Remote {
                host: "backup".into(),
                path: "/srv/data".into()
            }
        );
        assert_eq!(
            Location::parse("user@host:rel/path:with:colons"),
            Location::Remote {
                host: "user@host".into(),
                path: "rel/path:with:colons".into()
            }
        );
        assert_eq!(
            Location::parse("host:"),
            Location::Remote {
                host: "host".into(),
                path: ".".into()
            }
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_absolute_path_with_colon_is_local() {
        assert_eq!(
            Location::parse("/tmp/a:b"),
            Location::Local(PathBuf::from("/tmp/a:b"))
        );
    }

    #[test]
    fn test_same_place() {
        assert!(Location::parse("a/b").same_place(&Location::parse("./a/b")));
        assert!(!Location::parse("a/b").same_place(&Location::parse("a/c")));
        assert!(Location::parse("h:/x/").same_place(&Location::parse("h:/x")));
        assert!(!Location::parse("h:/x").same_place(&Location::parse("g:/x")));
        assert!(!Location::parse("h:/x").same_place(&Location::parse("/x")));
    }
}
