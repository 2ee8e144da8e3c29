use super::{Bucket, Workspace, WorkspaceError};
use std::path::{Component, Path, PathBuf};
use tracing::warn;

impl Workspace {
    /// Resolve a bucket-relative path to an absolute path inside the bucket.
    ///
    /// Any `..` segment, absolute path or drive prefix is rejected, as is a
    /// path whose deepest existing ancestor resolves (through symlinks)
    /// outside the bucket root. The target itself need not exist yet.
    pub fn resolve(&self, bucket: Bucket, relative: &str) -> Result<PathBuf, WorkspaceError> {
        let root = self.bucket_dir(bucket);
        let mut resolved = root.to_path_buf();
        let mut depth = 0usize;

        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    warn!("Rejected path outside bucket {}: {:?}", bucket, relative);
                    return Err(WorkspaceError::PathEscape(relative.to_string()));
                }
            }
        }

        if depth == 0 {
            return Err(WorkspaceError::InvalidRequest(format!(
                "Empty path for bucket {}",
                bucket
            )));
        }

        if escapes_through_link(root, &resolved) {
            warn!("Rejected symlink escape in bucket {}: {:?}", bucket, relative);
            return Err(WorkspaceError::PathEscape(relative.to_string()));
        }

        Ok(resolved)
    }

    /// Same as [`Workspace::resolve`] for a bucket given by name.
    pub fn resolve_named(&self, bucket: &str, relative: &str) -> Result<PathBuf, WorkspaceError> {
        self.resolve(bucket.parse()?, relative)
    }

    /// Forward-slash path of `path` relative to the bucket root.
    pub fn relative_string(&self, bucket: Bucket, path: &Path) -> Option<String> {
        path.strip_prefix(self.bucket_dir(bucket))
            .ok()
            .map(|rel| rel.to_string_lossy().replace('\\', "/"))
    }
}

/// Walk up from `path` to the first component that exists and check that it
/// canonicalizes inside `root`. A dangling symlink on the way counts as an
/// escape, since creating through it would write wherever it points.
fn escapes_through_link(root: &Path, path: &Path) -> bool {
    let Ok(real_root) = root.canonicalize() else {
        return false;
    };

    let mut current = path;
    loop {
        match current.canonicalize() {
            Ok(real) => return !real.starts_with(&real_root),
            Err(_) if std::fs::symlink_metadata(current).is_ok() => return true,
            Err(_) => match current.parent() {
                Some(parent) if parent.starts_with(root) => current = parent,
                _ => return false,
            },
        }
    }
}

/// Trim whitespace, drop leading `.`, `/` and `\` and use forward slashes.
pub fn normalize_relative_path(relative: &str) -> String {
    relative
        .trim()
        .trim_start_matches(['.', '/', '\\'])
        .replace('\\', "/")
}

/// Reduce a single name to a conservative file name.
///
/// Whitespace becomes `_`; anything that is not alphanumeric, `.`, `_` or
/// `-` is dropped, then leading and trailing dots and underscores are trimmed.
pub fn secure_file_name(name: &str) -> String {
    let joined = name
        .replace(['/', '\\'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_");

    let filtered: String = joined
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();

    filtered.trim_matches(['.', '_']).to_string()
}

/// Turn an uploaded or archived file name into a safe relative path,
/// preserving its directory structure.
pub fn sanitize_relative_path(raw: &str) -> PathBuf {
    let normalized = normalize_relative_path(raw);
    let parts: Vec<String> = normalized
        .split('/')
        .filter(|part| !matches!(*part, "" | "." | ".."))
        .map(secure_file_name)
        .filter(|part| !part.is_empty())
        .collect();

    if parts.is_empty() {
        let extension = Path::new(raw)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{}", secure_file_name(ext)))
            .unwrap_or_default();
        return PathBuf::from(format!("image_{}{}", uuid::Uuid::new_v4().simple(), extension));
    }

    parts.iter().collect()
}

/// First of `path`, `stem_1.ext`, `stem_2.ext`, ... that does not exist yet.
pub fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let suffix = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut counter = 1u32;
    loop {
        let candidate = path.with_file_name(format!("{}_{}{}", stem, counter, suffix));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}
