//! イメージとレイヤーのモデル

use crate::digest::Digest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// ビルドステップ1つが生成するレイヤー
///
/// `digest` はコンテンツアドレス
/// （直前レイヤーのdigest + ステップ定義 + 参照パラメータ）で、
/// ビルドキャッシュとイメージ同一性の基盤になります。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    /// レイヤーアドレス
    pub digest: Digest,
    /// tar.gzアーカイブのパス（メタデータのみのステップはNone）
    pub archive: Option<PathBuf>,
    /// アーカイブ内容のダイジェスト（レジストリのblobアドレス）
    pub archive_digest: Option<Digest>,
    /// このレイヤーに含まれるファイル数
    pub file_count: usize,
    /// アーカイブサイズ（バイト）
    pub size_bytes: u64,
}

impl Layer {
    /// ファイル変更を持たないメタデータレイヤーか
    pub fn is_metadata_only(&self) -> bool {
        self.archive.is_none()
    }
}

/// イメージの実行時メタデータ
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub entrypoint: Option<Vec<String>>,
    pub cmd: Option<Vec<String>>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub exposed_ports: Vec<u16>,
    pub user: Option<String>,
    pub workdir: Option<String>,
}

impl ImageMetadata {
    /// イメージダイジェスト計算・レジストリconfig blob用の正規化JSON
    ///
    /// envはBTreeMapなのでキー順は常に安定。
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(self).expect("ImageMetadata serialization cannot fail")
    }
}

/// ビルド済みイメージ
///
/// ImageBuilderが生成した後は不変。Publisherは参照するだけで
/// 内容を変更しません。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    /// イメージダイジェスト（レイヤー列 + メタデータ）
    pub digest: Digest,
    /// 宣言順のレイヤー列
    pub layers: Vec<Layer>,
    pub metadata: ImageMetadata,
}

impl Image {
    pub fn new(layers: Vec<Layer>, metadata: ImageMetadata) -> Self {
        let digest = Self::compute_digest(&layers, &metadata);
        Self {
            digest,
            layers,
            metadata,
        }
    }

    /// イメージダイジェストを計算
    ///
    /// 入力はレイヤーdigestの列と正規化メタデータJSONのみ。
    /// アーカイブの格納パスは含まれないため、キャッシュ格納場所に
    /// 依存しません。
    pub fn compute_digest(layers: &[Layer], metadata: &ImageMetadata) -> Digest {
        let mut builder = Digest::builder();
        for layer in layers {
            builder.update_field(layer.digest.as_hex());
        }
        builder.update_field(metadata.canonical_json());
        builder.finish()
    }

    /// ファイル実体を持つレイヤーのイテレータ
    pub fn blob_layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter().filter(|l| !l.is_metadata_only())
    }
}
