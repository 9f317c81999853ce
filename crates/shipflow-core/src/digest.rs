//! コンテンツアドレス用ダイジェスト
//!
//! スナップショット・レイヤー・イメージの同一性は全てsha256ダイジェストで
//! 判定します。表示形式は `sha256:<hex>` です。

use crate::error::{CoreError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::io::Read;
use std::str::FromStr;

/// sha256ダイジェスト（hex 64文字）
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest(String);

impl Digest {
    /// バイト列のダイジェストを計算
    pub fn of_bytes(data: impl AsRef<[u8]>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data.as_ref());
        Self(hex_encode(&hasher.finalize()))
    }

    /// Readerの内容をストリーミングでハッシュ
    pub fn of_reader(mut reader: impl Read) -> std::io::Result<Self> {
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(Self(hex_encode(&hasher.finalize())))
    }

    /// 複数要素からのダイジェスト計算用ビルダー
    pub fn builder() -> DigestBuilder {
        DigestBuilder(Sha256::new())
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }

    /// 表示用の短縮形（先頭12文字）
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.0)
    }
}

impl FromStr for Digest {
    type Err = CoreError;

    /// `sha256:<hex>` 形式またはhexのみを受け付ける
    fn from_str(s: &str) -> Result<Self> {
        let hex = s.strip_prefix("sha256:").unwrap_or(s);
        if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CoreError::InvalidDigest(s.to_string()));
        }
        Ok(Self(hex.to_ascii_lowercase()))
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// 逐次updateしてダイジェストを得るビルダー
pub struct DigestBuilder(Sha256);

impl DigestBuilder {
    pub fn update(&mut self, data: impl AsRef<[u8]>) {
        self.0.update(data.as_ref());
    }

    /// 要素間の境界を明示するため、長さプレフィックス付きでupdate
    ///
    /// `update("ab"); update("c")` と `update("a"); update("bc")` が
    /// 同一ダイジェストにならないようにする。
    pub fn update_field(&mut self, data: impl AsRef<[u8]>) {
        let bytes = data.as_ref();
        self.0.update((bytes.len() as u64).to_be_bytes());
        self.0.update(bytes);
    }

    pub fn finish(self) -> Digest {
        Digest(hex_encode(&self.0.finalize()))
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{:02x}", b).expect("writing to a String cannot fail");
    }
    out
}
