//! Absolute path normalization and splitting.

use std::fmt;

/// A normalized absolute path: `/`-separated components with `.` and `..`
/// already collapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbsPath {
    comps: Vec<String>,
}

impl AbsPath {
    /// The root directory.
    pub fn root() -> AbsPath {
        AbsPath { comps: Vec::new() }
    }

    /// Normalize `name` against `cwd`. An absolute `name` (leading `/`)
    /// ignores `cwd`; a relative one is joined onto it. `.` does nothing
    /// and `..` pops one component; `..` at the root is a no-op.
    pub fn resolve(cwd: &AbsPath, name: &str) -> AbsPath {
        let mut comps = if name.starts_with('/') {
            Vec::new()
        } else {
            cwd.comps.clone()
        };
        for tok in name.split('/').filter(|t| !t.is_empty()) {
            match tok {
                "." => {}
                ".." => {
                    let _ = comps.pop();
                }
                _ => comps.push(tok.to_string()),
            }
        }
        AbsPath { comps }
    }

    pub fn components(&self) -> &[String] {
        &self.comps
    }

    pub fn is_root(&self) -> bool {
        self.comps.is_empty()
    }

    /// Split into the enclosing directory's components and the final name.
    /// The root path has no final name.
    pub fn split(&self) -> (&[String], Option<&str>) {
        match self.comps.split_last() {
            Some((name, dir)) => (dir, Some(name)),
            None => (&[], None),
        }
    }

    /// The final path component, or `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.comps.last().map(|s| s.as_str())
    }

    /// `self` extended with one more component.
    pub fn join(&self, name: &str) -> AbsPath {
        let mut comps = self.comps.clone();
        comps.push(name.to_string());
        AbsPath { comps }
    }
}

impl fmt::Display for AbsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.comps.is_empty() {
            return write!(f, "/");
        }
        for c in &self.comps {
            write!(f, "/{}", c)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abs(s: &str) -> AbsPath {
        AbsPath::resolve(&AbsPath::root(), s)
    }

    #[test]
    fn absolute_paths() {
        assert_eq!(abs("/a/b/c").components(), &["a", "b", "c"]);
        assert_eq!(abs("/").components(), &[] as &[String]);
        assert_eq!(abs("///a//b").components(), &["a", "b"]);
    }

    #[test]
    fn dots_collapse() {
        assert_eq!(abs("/a/./b").components(), &["a", "b"]);
        assert_eq!(abs("/a/b/../c").components(), &["a", "c"]);
        assert_eq!(abs("/../../a").components(), &["a"]);
        assert_eq!(abs("/a/..").components(), &[] as &[String]);
    }

    #[test]
    fn relative_joins_cwd() {
        let cwd = abs("/home");
        assert_eq!(AbsPath::resolve(&cwd, "x").components(), &["home", "x"]);
        assert_eq!(AbsPath::resolve(&cwd, "../x").components(), &["x"]);
        assert_eq!(AbsPath::resolve(&cwd, "/x").components(), &["x"]);
    }

    #[test]
    fn split_and_display() {
        let p = abs("/a/b");
        let (dir, name) = p.split();
        assert_eq!(dir, &["a"]);
        assert_eq!(name, Some("b"));
        assert_eq!(p.to_string(), "/a/b");
        assert_eq!(AbsPath::root().to_string(), "/");
        assert_eq!(AbsPath::root().split(), (&[] as &[String], None));
    }
}
