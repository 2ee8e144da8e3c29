use super::{
    Bucket, KeywordAction, OrganizeOutcome, OrganizeRequest, Workspace, WorkspaceError,
    is_supported_image, normalize_relative_path, unique_path,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

impl Workspace {
    /// Apply the keyword action, then rename the remaining source files with
    /// the prefix and/or a zero-padded sequence number.
    ///
    /// Renames never overwrite: a taken name gets a `_1`, `_2`, ... suffix.
    pub fn organize(&self, request: &OrganizeRequest) -> Result<OrganizeOutcome, WorkspaceError> {
        let keyword = request.keyword.trim().to_lowercase();
        let prefix = request.prefix.trim();

        let mut files = self.organize_targets(&request.targets);
        if files.is_empty() {
            return Err(WorkspaceError::InvalidRequest(
                "No images found to organize".to_string(),
            ));
        }

        if request.keyword_action != KeywordAction::None && keyword.is_empty() {
            return Err(WorkspaceError::InvalidRequest(
                "A keyword is required for this action".to_string(),
            ));
        }

        if request.keyword_action != KeywordAction::Delete
            && !request.apply_prefix
            && !request.apply_sequence
        {
            return Err(WorkspaceError::InvalidRequest(
                "Enable the prefix, the sequence number or both".to_string(),
            ));
        }

        let matches = |path: &Path| {
            path.file_name()
                .map(|n| n.to_string_lossy().to_lowercase().contains(&keyword))
                .unwrap_or(false)
        };

        let mut deleted = 0;
        match request.keyword_action {
            KeywordAction::None => {}
            KeywordAction::Filter => files.retain(|path| matches(path)),
            KeywordAction::Delete => {
                for path in files.iter().filter(|path| matches(path)) {
                    match std::fs::remove_file(path) {
                        Ok(()) => deleted += 1,
                        Err(e) => warn!("Failed to delete {:?}: {}", path, e),
                    }
                }
                info!("Keyword delete removed {} images", deleted);
                return Ok(OrganizeOutcome {
                    message: format!("Deleted {} images", deleted),
                    renamed: 0,
                    deleted,
                });
            }
            KeywordAction::Keep => {
                for path in files.iter().filter(|path| !matches(path)) {
                    match std::fs::remove_file(path) {
                        Ok(()) => deleted += 1,
                        Err(e) => warn!("Failed to delete {:?}: {}", path, e),
                    }
                }
                files.retain(|path| path.exists());
            }
        }

        if files.is_empty() {
            return Err(WorkspaceError::InvalidRequest(
                "No images remain after filtering".to_string(),
            ));
        }

        files.sort();

        let use_prefix = request.apply_prefix && !prefix.is_empty();
        let last_offset = if request.apply_sequence {
            files.len() as u64 - 1
        } else {
            0
        };
        let last_number = request
            .start_number
            .checked_add(last_offset)
            .ok_or_else(|| {
                WorkspaceError::InvalidRequest(format!(
                    "Start number {} is too large for {} images",
                    request.start_number,
                    files.len()
                ))
            })?;
        let pad = last_number.to_string().len().max(2);

        let mut renamed = 0;
        for (offset, path) in (0u64..).zip(&files) {
            let mut new_stem = String::new();
            if use_prefix {
                new_stem.push_str(prefix);
            }
            if request.apply_sequence {
                let number = request.start_number + offset;
                new_stem.push_str(&format!("{:0width$}", number, width = pad));
            }
            if new_stem.is_empty() {
                continue;
            }

            let extension = path
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
                .unwrap_or_default();
            let wanted = path.with_file_name(format!("{}{}", new_stem, extension));
            if wanted == *path {
                renamed += 1;
                continue;
            }

            let destination = unique_path(&wanted);
            debug!("Renaming {:?} -> {:?}", path, destination);
            std::fs::rename(path, &destination)?;
            renamed += 1;
        }

        let mut message = format!("Renamed {} images", renamed);
        if deleted > 0 {
            message.push_str(&format!(" and deleted {} images", deleted));
        }
        info!("{}", message);

        Ok(OrganizeOutcome {
            message,
            renamed,
            deleted,
        })
    }

    fn organize_targets(&self, targets: &[String]) -> Vec<PathBuf> {
        if targets.is_empty() {
            return self.image_files(Bucket::Source);
        }

        targets
            .iter()
            .filter_map(|relative| {
                self.resolve(Bucket::Source, &normalize_relative_path(relative))
                    .ok()
            })
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .map(is_supported_image)
                        .unwrap_or(false)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ImageSizeConfig;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn workspace_with(files: &[(&str, &str)]) -> (TempDir, Workspace) {
        let temp_dir = TempDir::new().unwrap();
        let ws = Workspace::new(
            temp_dir.path().to_path_buf(),
            ImageSizeConfig {
                width: 300,
                height: 300,
            },
        );
        ws.ensure_layout().unwrap();
        for (name, content) in files {
            let path = ws.bucket_dir(Bucket::Source).join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        (temp_dir, ws)
    }

    fn source_names(ws: &Workspace) -> BTreeSet<String> {
        ws.list_items(Bucket::Source, None)
            .into_iter()
            .map(|i| i.relative_path)
            .collect()
    }

    fn source_contents(ws: &Workspace) -> Vec<String> {
        let mut contents: Vec<String> = ws
            .image_files(Bucket::Source)
            .iter()
            .map(|p| std::fs::read_to_string(p).unwrap())
            .collect();
        contents.sort();
        contents
    }

    #[test]
    fn test_prefix_and_sequence_in_path_order() {
        let (_tmp, ws) = workspace_with(&[("b.PNG", "b"), ("a.jpg", "a"), ("c.webp", "c")]);

        let outcome = ws
            .organize(&OrganizeRequest {
                prefix: "cat".to_string(),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(outcome.renamed, 3);
        let expected: BTreeSet<String> = ["cat01.jpg", "cat02.png", "cat03.webp"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(source_names(&ws), expected);
        assert_eq!(
            std::fs::read_to_string(ws.bucket_dir(Bucket::Source).join("cat01.jpg")).unwrap(),
            "a"
        );
    }

    #[test]
    fn test_pad_width_follows_final_number() {
        let (_tmp, ws) = workspace_with(&[("a.png", "a"), ("b.png", "b")]);

        ws.organize(&OrganizeRequest {
            start_number: 99,
            apply_prefix: false,
            ..Default::default()
        })
        .unwrap();

        let expected: BTreeSet<String> =
            ["099.png", "100.png"].iter().map(|s| s.to_string()).collect();
        assert_eq!(source_names(&ws), expected);
    }

    #[test]
    fn test_start_number_overflow_is_rejected() {
        let (_tmp, ws) = workspace_with(&[("a.png", "a"), ("b.png", "b")]);

        let result = ws.organize(&OrganizeRequest {
            start_number: u64::MAX,
            apply_prefix: false,
            ..Default::default()
        });
        assert!(matches!(result, Err(WorkspaceError::InvalidRequest(_))));

        let expected: BTreeSet<String> = ["a.png", "b.png"].iter().map(|s| s.to_string()).collect();
        assert_eq!(source_names(&ws), expected);

        // The largest start that still fits ends exactly on u64::MAX.
        ws.organize(&OrganizeRequest {
            start_number: u64::MAX - 1,
            apply_prefix: false,
            ..Default::default()
        })
        .unwrap();
        let expected: BTreeSet<String> = [
            format!("{}.png", u64::MAX - 1),
            format!("{}.png", u64::MAX),
        ]
        .into_iter()
        .collect();
        assert_eq!(source_names(&ws), expected);
    }

    #[test]
    fn test_renaming_never_destroys_content() {
        let files = [
            ("x01.png", "one"),
            ("x02.png", "two"),
            ("a.png", "three"),
            ("sub/x01.png", "four"),
        ];

        for (apply_prefix, apply_sequence) in [(true, true), (true, false), (false, true)] {
            let (_tmp, ws) = workspace_with(&files);
            let before = source_contents(&ws);

            ws.organize(&OrganizeRequest {
                prefix: "x".to_string(),
                apply_prefix,
                apply_sequence,
                ..Default::default()
            })
            .unwrap();

            assert_eq!(source_contents(&ws), before);
        }
    }

    #[test]
    fn test_keyword_filter_limits_renames() {
        let (_tmp, ws) = workspace_with(&[("cat_a.png", "1"), ("dog_b.png", "2")]);

        let outcome = ws
            .organize(&OrganizeRequest {
                prefix: "pet".to_string(),
                keyword: "CAT".to_string(),
                keyword_action: KeywordAction::Filter,
                ..Default::default()
            })
            .unwrap();

        assert_eq!(outcome.renamed, 1);
        let names = source_names(&ws);
        assert!(names.contains("pet01.png"));
        assert!(names.contains("dog_b.png"));
    }

    #[test]
    fn test_keyword_delete_returns_early() {
        let (_tmp, ws) = workspace_with(&[("cat_a.png", "1"), ("dog_b.png", "2")]);

        let outcome = ws
            .organize(&OrganizeRequest {
                prefix: "pet".to_string(),
                keyword: "cat".to_string(),
                keyword_action: KeywordAction::Delete,
                ..Default::default()
            })
            .unwrap();

        assert_eq!(outcome.deleted, 1);
        assert_eq!(outcome.renamed, 0);
        let names = source_names(&ws);
        assert_eq!(names.len(), 1);
        assert!(names.contains("dog_b.png"));
    }

    #[test]
    fn test_keyword_keep_deletes_others_then_renames() {
        let (_tmp, ws) = workspace_with(&[("cat_a.png", "1"), ("dog_b.png", "2")]);

        let outcome = ws
            .organize(&OrganizeRequest {
                prefix: "pet".to_string(),
                keyword: "cat".to_string(),
                keyword_action: KeywordAction::Keep,
                ..Default::default()
            })
            .unwrap();

        assert_eq!(outcome.deleted, 1);
        assert_eq!(outcome.renamed, 1);
        let names = source_names(&ws);
        assert_eq!(names.len(), 1);
        assert!(names.contains("pet01.png"));
    }

    #[test]
    fn test_validation_errors() {
        let (_tmp, ws) = workspace_with(&[("a.png", "1")]);

        let both_off = ws.organize(&OrganizeRequest {
            apply_prefix: false,
            apply_sequence: false,
            ..Default::default()
        });
        assert!(matches!(both_off, Err(WorkspaceError::InvalidRequest(_))));

        let missing_keyword = ws.organize(&OrganizeRequest {
            keyword_action: KeywordAction::Keep,
            ..Default::default()
        });
        assert!(matches!(missing_keyword, Err(WorkspaceError::InvalidRequest(_))));
        assert!(ws.bucket_dir(Bucket::Source).join("a.png").exists());

        let nothing_left = ws.organize(&OrganizeRequest {
            keyword: "zebra".to_string(),
            keyword_action: KeywordAction::Filter,
            ..Default::default()
        });
        assert!(matches!(nothing_left, Err(WorkspaceError::InvalidRequest(_))));

        let (_tmp2, empty) = workspace_with(&[]);
        assert!(empty.organize(&OrganizeRequest::default()).is_err());
    }
}
