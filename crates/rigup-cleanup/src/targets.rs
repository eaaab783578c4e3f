use crate::CleanupError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resource category a cleanup target belongs to.
///
/// Categories are processed strictly in configuration order: later ones
/// may assume earlier state is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Checked-out repository artifacts (build output, local env files).
    Repo,
    /// Local infrastructure state (terraform dirs, kube contexts).
    InfraLocal,
    /// Caches under the user's home directory.
    HomeCache,
    /// Installed toolchains and SDKs.
    Toolchain,
}

impl Category {
    pub fn parse(s: &str) -> Result<Self, CleanupError> {
        match s {
            "repo" => Ok(Category::Repo),
            "infra-local" => Ok(Category::InfraLocal),
            "home-cache" => Ok(Category::HomeCache),
            "toolchain" => Ok(Category::Toolchain),
            other => Err(CleanupError::UnknownCategory(other.to_owned())),
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::Repo => write!(f, "repo"),
            Category::InfraLocal => write!(f, "infra-local"),
            Category::HomeCache => write!(f, "home-cache"),
            Category::Toolchain => write!(f, "toolchain"),
        }
    }
}

/// A concrete path slated for removal. Computed fresh on every teardown
/// run; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupTarget {
    pub category: Category,
    pub path: PathBuf,
    pub exists: bool,
}

/// Static configuration for one category: fixed paths plus glob patterns.
#[derive(Debug, Clone)]
pub struct CategorySpec {
    pub category: Category,
    pub paths: Vec<String>,
    pub globs: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CleanupConfig {
    /// Repository checkout root; relative paths resolve against it.
    pub root: PathBuf,
    /// Home directory for `~/` expansion. `None` disables it.
    pub home: Option<PathBuf>,
    pub categories: Vec<CategorySpec>,
}

fn expand(raw: &str, root: &Path, home: Option<&Path>) -> PathBuf {
    if let Some(stripped) = raw.strip_prefix("~/") {
        if let Some(home) = home {
            return home.join(stripped);
        }
    }
    let p = Path::new(raw);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    }
}

/// Expand configuration into a flat ordered target list.
///
/// Fixed paths keep their configured order and are retained even when
/// missing (dry-run reports them as such); glob matches are appended
/// sorted. Ordering across categories follows configuration order.
pub fn resolve(config: &CleanupConfig) -> Result<Vec<CleanupTarget>, CleanupError> {
    let home = config.home.as_deref();
    let mut out = Vec::new();

    for spec in &config.categories {
        for raw in &spec.paths {
            let path = expand(raw, &config.root, home);
            let exists = path.symlink_metadata().is_ok();
            out.push(CleanupTarget {
                category: spec.category,
                path,
                exists,
            });
        }

        for pattern in &spec.globs {
            let full = expand(pattern, &config.root, home);
            let full_str = full.to_string_lossy().into_owned();
            let mut matches = Vec::new();
            let paths = glob::glob(&full_str).map_err(|e| CleanupError::Pattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
            for entry in paths {
                match entry {
                    Ok(p) => matches.push(p),
                    Err(e) => debug!("glob entry unreadable under '{pattern}': {e}"),
                }
            }
            matches.sort();
            for path in matches {
                // Don't list a path twice when a glob overlaps a fixed entry.
                if out
                    .iter()
                    .any(|t: &CleanupTarget| t.category == spec.category && t.path == path)
                {
                    continue;
                }
                out.push(CleanupTarget {
                    category: spec.category,
                    path,
                    exists: true,
                });
            }
        }
    }

    debug!("resolved {} cleanup targets", out.len());
    Ok(out)
}
