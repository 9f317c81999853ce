//! Shipflow core
//!
//! パイプライン定義（ship.kdl）のモデルとパーサー、および
//! コンテンツアドレスの基盤となるダイジェスト計算を提供します。

pub mod digest;
pub mod error;
pub mod model;
pub mod parser;

pub use digest::{Digest, DigestBuilder};
pub use error::{CoreError, Result};
pub use model::*;
pub use parser::{parse_pipeline_file, parse_pipeline_string};
