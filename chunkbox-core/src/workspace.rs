use crate::error::{Error, IoContext, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

#[derive(Clone, Copy, Debug, Default)]
pub struct PathPolicy {
    pub follow_symlinks: bool,
}

/// One directory entry as shown by `ls`.
#[derive(Clone, Debug)]
pub struct Entry {
    pub name: String,
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub is_file: bool,
}

/// A per-identity root directory. Every name handed to the engine is resolved
/// through [`Workspace::resolve`] before the file system is touched.
#[derive(Clone, Debug)]
pub struct Workspace {
    root: PathBuf,
    policy: PathPolicy,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), policy: PathPolicy::default() }
    }

    /// `<home>/<identity>`; the identity must be a single plain component.
    pub fn for_identity(home: &Path, identity: &str) -> Result<Self> {
        if !is_plain_name(identity) {
            return Err(Error::InvalidName {
                name: identity.to_string(),
                reason: "identity must be a single plain path component",
            });
        }
        Ok(Self::new(home.join(identity)))
    }

    pub fn with_policy(mut self, policy: PathPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root (and parents) if absent.
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.root).io_ctx("create workspace", &self.root)
    }

    /// Resolve `name` beneath the root: no absolute paths, no `..`, and
    /// symlinks only when the policy follows them and the target stays inside.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        let rel = lexical_check(name)?;
        let candidate = self.root.join(rel);
        if self.policy.follow_symlinks {
            self.contain_canonical(name, &candidate)?;
        } else {
            // Also check any ancestor components are not symlinks
            let mut cur = self.root.clone();
            for comp in rel.components() {
                cur.push(comp);
                if let Ok(m) = fs::symlink_metadata(&cur) {
                    if m.file_type().is_symlink() {
                        return Err(Error::PathEscape {
                            name: name.to_string(),
                            reason: "symlink encountered (not following)",
                        });
                    }
                }
            }
        }
        Ok(candidate)
    }

    /// Like [`Workspace::resolve`], but the name must also be a single plain
    /// file name. Base names, chunk names and manifests live flat in the root.
    pub fn resolve_flat(&self, name: &str) -> Result<PathBuf> {
        let path = self.resolve(name)?;
        if !is_plain_name(name) {
            return Err(Error::InvalidName {
                name: name.to_string(),
                reason: "must be a plain file name",
            });
        }
        Ok(path)
    }

    /// Visible entries of the root, sorted by name. Dot-files (lock files) are skipped.
    pub fn entries(&self) -> Result<Vec<Entry>> {
        let mut out = Vec::new();
        for ent in fs::read_dir(&self.root).io_ctx("list workspace", &self.root)? {
            let ent = ent.io_ctx("list workspace", &self.root)?;
            let name = ent.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let md = ent.metadata().io_ctx("stat", &ent.path())?;
            out.push(Entry {
                name,
                size: md.len(),
                modified: md.modified().ok(),
                is_file: md.is_file(),
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn contain_canonical(&self, name: &str, candidate: &Path) -> Result<()> {
        let root_can = fs::canonicalize(&self.root).io_ctx("canonicalize", &self.root)?;
        // A path that does not exist yet is judged by its nearest existing ancestor.
        // Anything present that will not canonicalize (a dangling or looping
        // symlink) would be followed on write, so it is refused outright.
        let mut cur = candidate;
        let cand_can = loop {
            match fs::canonicalize(cur) {
                Ok(p) => break p,
                Err(_) if fs::symlink_metadata(cur).is_ok() => {
                    return Err(Error::PathEscape {
                        name: name.to_string(),
                        reason: "unresolvable symlink",
                    });
                }
                Err(_) => match cur.parent() {
                    Some(parent) => cur = parent,
                    None => break PathBuf::new(),
                },
            }
        };
        if !cand_can.starts_with(&root_can) {
            return Err(Error::PathEscape { name: name.to_string(), reason: "path escapes root" });
        }
        Ok(())
    }
}

fn lexical_check(name: &str) -> Result<&Path> {
    let escape = |reason| Error::PathEscape { name: name.to_string(), reason };
    if name.trim().is_empty() {
        return Err(escape("empty name"));
    }
    let rel = Path::new(name);
    if rel.is_absolute() || rel.has_root() {
        return Err(escape("absolute paths are not allowed"));
    }
    for comp in rel.components() {
        match comp {
            Component::ParentDir => return Err(escape("parent traversal not allowed")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(escape("absolute paths are not allowed"))
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }
    Ok(rel)
}

/// True when `name` is exactly one normal path component.
pub fn is_plain_name(name: &str) -> bool {
    let mut comps = Path::new(name).components();
    matches!((comps.next(), comps.next()), (Some(Component::Normal(c)), None) if c == name)
}
