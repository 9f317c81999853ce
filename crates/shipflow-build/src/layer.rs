//! レイヤーアーカイブの生成
//!
//! ステップ実行前後のrootfsツリーを比較し、差分を決定論的なtar.gzとして
//! 固めます。tarヘッダのmtime/uid/gidは常に0に正規化するため、同じ差分は
//! 常に同じアーカイブ（同じダイジェスト）になります。

use crate::error::BuildResult;
use flate2::Compression;
use flate2::write::GzEncoder;
use shipflow_core::digest::Digest;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tar::{Builder, Header};

/// ディレクトリツリー全体の (相対パス -> コンテンツダイジェスト)
pub fn hash_tree(root: &Path) -> BuildResult<BTreeMap<String, Digest>> {
    let mut out = BTreeMap::new();
    if root.is_dir() {
        walk(root, root, &mut out)?;
    }
    Ok(out)
}

fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<String, Digest>) -> BuildResult<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk(root, &path, out)?;
        } else if file_type.is_file() {
            let rel = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let digest = Digest::of_reader(fs::File::open(&path)?)?;
            out.insert(rel, digest);
        }
        // rootfs内はビルダーの管理下なので、リンク等はここでは現れない想定
    }
    Ok(())
}

/// 前後のツリーを比較し、追加・変更されたパスを返す（ソート済み）
pub fn tree_delta(
    before: &BTreeMap<String, Digest>,
    after: &BTreeMap<String, Digest>,
) -> Vec<String> {
    after
        .iter()
        .filter(|(path, digest)| before.get(*path) != Some(digest))
        .map(|(path, _)| path.clone())
        .collect()
}

/// レイヤーアーカイブの書き込み結果
pub struct LayerArchive {
    pub digest: Digest,
    pub size_bytes: u64,
    pub file_count: usize,
}

/// 差分パス集合をtar.gzに固めて書き出す
///
/// パスはソート済みで渡すこと。tarエントリの順序もアーカイブ内容の
/// 一部なので、順序が変わるとダイジェストも変わってしまう。
pub fn write_layer_archive(
    rootfs: &Path,
    paths: &[String],
    out_path: &Path,
) -> BuildResult<LayerArchive> {
    let mut archive_data = Vec::new();
    {
        let encoder = GzEncoder::new(&mut archive_data, Compression::default());
        let mut tar = Builder::new(encoder);

        for rel in paths {
            let source = rootfs.join(rel);
            let content = fs::read(&source)?;

            let mut header = Header::new_gnu();
            header.set_path(rel)?;
            header.set_size(content.len() as u64);
            header.set_mode(archive_mode(&source)?);
            header.set_mtime(0);
            header.set_uid(0);
            header.set_gid(0);
            header.set_cksum();

            tar.append(&header, content.as_slice())?;
        }

        tar.into_inner()?.finish()?;
    }

    fs::write(out_path, &archive_data)?;

    Ok(LayerArchive {
        digest: Digest::of_bytes(&archive_data),
        size_bytes: archive_data.len() as u64,
        file_count: paths.len(),
    })
}

/// 実行ビットだけを保存し、それ以外のモードは正規化する
fn archive_mode(path: &Path) -> BuildResult<u32> {
    #[cfg(target_family = "unix")]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(path)?.permissions().mode();
        Ok(if mode & 0o111 != 0 { 0o755 } else { 0o644 })
    }
    #[cfg(not(target_family = "unix"))]
    {
        let _ = path;
        Ok(0o644)
    }
}
