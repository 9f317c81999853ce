//! ソーススナップショット
//!
//! ビルドに参加するファイル集合を (パス, コンテンツダイジェスト) の列として
//! 確定します。集約ダイジェストはパスでソートした列から計算するため、
//! 走査順とファイルのタイムスタンプに依存しません。

use crate::error::{BuildError, BuildResult};
use glob::Pattern;
use shipflow_core::digest::Digest;
use shipflow_core::model::SourceRules;
use std::fs;
use std::path::{Path, PathBuf};

/// スナップショットが常に除外するディレクトリ
const ALWAYS_EXCLUDED: &[&str] = &[".git", ".shipflow"];

/// スナップショット内の1ファイル
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    /// ソースルートからの相対パス（区切りは常に `/`）
    pub path: String,
    pub digest: Digest,
    pub size_bytes: u64,
    pub executable: bool,
}

/// ソースツリーのスナップショット
#[derive(Debug, Clone)]
pub struct SourceSnapshot {
    /// スナップショット元のルートディレクトリ
    pub root: PathBuf,
    /// パス順にソート済みのエントリ列
    pub entries: Vec<SnapshotEntry>,
    /// 集約ダイジェスト
    pub digest: Digest,
}

impl SourceSnapshot {
    /// 指定パスに一致するエントリ（完全一致またはディレクトリ前置）
    pub fn entries_under<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a SnapshotEntry> {
        let dir_prefix = format!("{}/", prefix.trim_end_matches('/'));
        self.entries
            .iter()
            .filter(move |e| e.path == prefix || e.path.starts_with(&dir_prefix))
    }
}

/// スナップショットを生成する
pub struct Snapshotter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
    allow_symlinks: bool,
}

impl Snapshotter {
    pub fn new(rules: &SourceRules) -> BuildResult<Self> {
        Ok(Self {
            include: compile_patterns(&rules.include)?,
            exclude: compile_patterns(&rules.exclude)?,
            allow_symlinks: rules.allow_symlinks,
        })
    }

    /// ルートディレクトリを走査してスナップショットを生成
    pub fn snapshot(&self, root: &Path) -> BuildResult<SourceSnapshot> {
        if !root.is_dir() {
            return Err(BuildError::SourceRootNotFound(root.to_path_buf()));
        }

        let mut entries = Vec::new();
        self.walk(root, root, &mut entries)?;

        if entries.is_empty() {
            return Err(BuildError::EmptySnapshot);
        }

        // 走査順に依存しないよう、必ずパスでソートしてから集約する
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        let mut builder = Digest::builder();
        for entry in &entries {
            builder.update_field(&entry.path);
            builder.update_field(entry.digest.as_hex());
        }
        let digest = builder.finish();

        tracing::debug!(
            files = entries.len(),
            digest = %digest,
            "Source snapshot created"
        );

        Ok(SourceSnapshot {
            root: root.to_path_buf(),
            entries,
            digest,
        })
    }

    fn walk(
        &self,
        root: &Path,
        dir: &Path,
        entries: &mut Vec<SnapshotEntry>,
    ) -> BuildResult<()> {
        for dir_entry in fs::read_dir(dir)? {
            let dir_entry = dir_entry?;
            let path = dir_entry.path();
            let rel = relative_path(root, &path);

            if ALWAYS_EXCLUDED.iter().any(|ex| rel == *ex) {
                continue;
            }

            let file_type = dir_entry.file_type()?;

            if file_type.is_symlink() {
                if !self.allow_symlinks {
                    return Err(BuildError::UnsupportedFileType { path });
                }
                // リンク先の内容を取り込む（壊れたリンクはエラー）
                let target = fs::metadata(&path)?;
                if target.is_dir() {
                    self.walk(root, &path, entries)?;
                } else if target.is_file() {
                    if self.selected(&rel) {
                        entries.push(self.entry_for(&rel, &path)?);
                    }
                } else {
                    return Err(BuildError::UnsupportedFileType { path });
                }
                continue;
            }

            if file_type.is_dir() {
                self.walk(root, &path, entries)?;
            } else if file_type.is_file() {
                if self.selected(&rel) {
                    entries.push(self.entry_for(&rel, &path)?);
                }
            } else {
                // FIFO・ソケット等
                return Err(BuildError::UnsupportedFileType { path });
            }
        }
        Ok(())
    }

    fn entry_for(&self, rel: &str, path: &Path) -> BuildResult<SnapshotEntry> {
        let metadata = fs::metadata(path)?;
        let file = fs::File::open(path)?;
        let digest = Digest::of_reader(file)?;

        Ok(SnapshotEntry {
            path: rel.to_string(),
            digest,
            size_bytes: metadata.len(),
            executable: is_executable(&metadata),
        })
    }

    fn selected(&self, rel: &str) -> bool {
        let included =
            self.include.is_empty() || self.include.iter().any(|p| matches_rule(p, rel));
        included && !self.exclude.iter().any(|p| matches_rule(p, rel))
    }
}

fn compile_patterns(patterns: &[String]) -> BuildResult<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| BuildError::InvalidPattern {
                pattern: p.clone(),
                message: e.to_string(),
            })
        })
        .collect()
}

/// パターンがパスに一致するか
///
/// globの完全一致に加え、メタ文字なしのパターンはディレクトリ前置として
/// 扱う（`src` が `src/main.rs` に一致する）。
fn matches_rule(pattern: &Pattern, rel: &str) -> bool {
    if pattern.matches(rel) {
        return true;
    }
    let raw = pattern.as_str();
    !raw.contains(['*', '?', '[']) && rel.starts_with(&format!("{}/", raw.trim_end_matches('/')))
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(target_family = "unix")]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(target_family = "unix"))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}
