//! レジストリクライアント
//!
//! プッシュプロトコル（認証、blob転送、マニフェスト登録、ダイジェスト取得）
//! の薄い抽象です。Publisherはこのtrait越しにのみネットワークへ触れます。

use crate::auth::Credential;
use crate::error::{RegistryError, RegistryResult};
use secrecy::ExposeSecret;
use shipflow_core::digest::Digest;

/// マニフェストのannotationに埋めるイメージダイジェストのキー
///
/// レジストリ側のマニフェストダイジェストはメディアタイプ等に依存する
/// ため、冪等性判定はこのannotationで行う。
pub const IMAGE_DIGEST_ANNOTATION: &str = "club.chronista.shipflow.image-digest";

pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";
pub const LAYER_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

/// レジストリとの通信契約
pub trait RegistryClient {
    /// タグが指すマニフェストからイメージダイジェストannotationを取得
    ///
    /// タグが存在しない場合はNone。
    fn manifest_image_digest(
        &self,
        repository: &str,
        tag: &str,
        auth: &Credential,
    ) -> impl Future<Output = RegistryResult<Option<Digest>>> + Send;

    /// blobが既に存在するか
    fn blob_exists(
        &self,
        repository: &str,
        digest: &Digest,
        auth: &Credential,
    ) -> impl Future<Output = RegistryResult<bool>> + Send;

    /// blobをアップロード
    fn push_blob(
        &self,
        repository: &str,
        digest: &Digest,
        data: Vec<u8>,
        auth: &Credential,
    ) -> impl Future<Output = RegistryResult<()>> + Send;

    /// マニフェストを登録し、レジストリ側のダイジェストを返す
    fn put_manifest(
        &self,
        repository: &str,
        tag: &str,
        manifest: Vec<u8>,
        auth: &Credential,
    ) -> impl Future<Output = RegistryResult<Digest>> + Send;
}

/// OCI distribution APIを話すHTTPクライアント
pub struct HttpRegistryClient {
    /// `https://ghcr.io` 形式
    origin: String,
    client: reqwest::Client,
}

impl HttpRegistryClient {
    pub fn new(host: &str) -> Self {
        // ローカルレジストリはTLSなしで扱う
        let scheme = if host.starts_with("localhost") || host.starts_with("127.") {
            "http"
        } else {
            "https"
        };
        Self {
            origin: format!("{}://{}", scheme, host),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, repository: &str, suffix: &str) -> String {
        format!("{}/v2/{}/{}", self.origin, repository, suffix)
    }
}

impl RegistryClient for HttpRegistryClient {
    async fn manifest_image_digest(
        &self,
        repository: &str,
        tag: &str,
        auth: &Credential,
    ) -> RegistryResult<Option<Digest>> {
        let url = self.url(repository, &format!("manifests/{}", tag));
        let response = self
            .client
            .get(&url)
            .header("Accept", MANIFEST_MEDIA_TYPE)
            .basic_auth(&auth.username, Some(auth.secret.expose_secret()))
            .send()
            .await
            .map_err(transport_error)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response)?;

        let manifest: serde_json::Value = response.json().await.map_err(transport_error)?;
        let digest = manifest
            .get("annotations")
            .and_then(|a| a.get(IMAGE_DIGEST_ANNOTATION))
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok());

        Ok(digest)
    }

    async fn blob_exists(
        &self,
        repository: &str,
        digest: &Digest,
        auth: &Credential,
    ) -> RegistryResult<bool> {
        let url = self.url(repository, &format!("blobs/{}", digest));
        let response = self
            .client
            .head(&url)
            .basic_auth(&auth.username, Some(auth.secret.expose_secret()))
            .send()
            .await
            .map_err(transport_error)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check_status(response)?;
        Ok(true)
    }

    async fn push_blob(
        &self,
        repository: &str,
        digest: &Digest,
        data: Vec<u8>,
        auth: &Credential,
    ) -> RegistryResult<()> {
        // 2段階アップロード: uploadセッションの開始 → 本体のPUT
        let start_url = self.url(repository, "blobs/uploads/");
        let response = self
            .client
            .post(&start_url)
            .basic_auth(&auth.username, Some(auth.secret.expose_secret()))
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response)?;

        let location = response
            .headers()
            .get("Location")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| RegistryError::Transport {
                message: "registry did not return an upload location".to_string(),
                transient: false,
            })?;

        let upload_url = if location.starts_with("http") {
            location.to_string()
        } else {
            format!("{}{}", self.origin, location)
        };
        let separator = if upload_url.contains('?') { '&' } else { '?' };
        let put_url = format!("{}{}digest={}", upload_url, separator, digest);

        let response = self
            .client
            .put(&put_url)
            .header("Content-Type", "application/octet-stream")
            .basic_auth(&auth.username, Some(auth.secret.expose_secret()))
            .body(data)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response)?;

        Ok(())
    }

    async fn put_manifest(
        &self,
        repository: &str,
        tag: &str,
        manifest: Vec<u8>,
        auth: &Credential,
    ) -> RegistryResult<Digest> {
        let url = self.url(repository, &format!("manifests/{}", tag));
        let fallback = Digest::of_bytes(&manifest);

        let response = self
            .client
            .put(&url)
            .header("Content-Type", MANIFEST_MEDIA_TYPE)
            .basic_auth(&auth.username, Some(auth.secret.expose_secret()))
            .body(manifest)
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response)?;

        let digest = response
            .headers()
            .get("Docker-Content-Digest")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(fallback);

        Ok(digest)
    }
}

fn transport_error(e: reqwest::Error) -> RegistryError {
    RegistryError::Transport {
        message: e.to_string(),
        transient: e.is_timeout() || e.is_connect(),
    }
}

fn check_status(response: reqwest::Response) -> RegistryResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(RegistryError::Transport {
        message: format!("registry returned {} for {}", status, response.url()),
        transient: status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS,
    })
}
