//! Remote object-storage backend for the store. URL prefix
//! selects the backend: `s3://bucket/prefix` or `gs://bucket/prefix`. Every
//! remote operation falls back to the local store on failure — logged,
//! never fatal, per `RemoteBackendError`'s "always recoverable" contract.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::reporter::Reporter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteKind {
    S3,
    Gcs,
}

#[derive(Debug, Clone)]
pub struct RemoteTarget {
    pub kind: RemoteKind,
    pub bucket: String,
    pub prefix: String,
}

/// Parses `s3://bucket/prefix` or `gs://bucket/prefix`. Returns `None` for
/// anything else (callers treat an unparsed URL as "no remote backend").
pub fn parse_remote_url(url: &str) -> Option<RemoteTarget> {
    let (kind, rest) = if let Some(rest) = url.strip_prefix("s3://") {
        (RemoteKind::S3, rest)
    } else if let Some(rest) = url.strip_prefix("gs://") {
        (RemoteKind::Gcs, rest)
    } else {
        return None;
    };
    let mut parts = rest.splitn(2, '/');
    let bucket = parts.next()?.to_string();
    let prefix = parts.next().unwrap_or("").to_string();
    Some(RemoteTarget { kind, bucket, prefix })
}

/// Credentials are read straight from the host environment by whatever
/// backend SDK is in use and never persisted in a manifest or lock file;
/// this type never stores a credential value itself.
pub trait RemoteBackend {
    fn put(&self, hash: &str, archive_bytes: &[u8]) -> Result<()>;
    fn get(&self, hash: &str) -> Result<Option<Vec<u8>>>;
    fn exists(&self, hash: &str) -> Result<bool>;
    fn name(&self) -> &str;
}

/// A filesystem directory standing in for a bucket — used directly when no
/// `remote_store` URL is configured, and as the always-available fallback
/// target when a real remote backend call fails.
pub struct LocalFallbackBackend {
    root: PathBuf,
}

impl LocalFallbackBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, hash: &str) -> PathBuf {
        self.root.join(format!("{hash}.archive"))
    }
}

impl RemoteBackend for LocalFallbackBackend {
    fn put(&self, hash: &str, archive_bytes: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| Error::io(&self.root, e))?;
        let path = self.path(hash);
        fs::write(&path, archive_bytes).map_err(|e| Error::io(&path, e))
    }

    fn get(&self, hash: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(hash);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(&path, e)),
        }
    }

    fn exists(&self, hash: &str) -> Result<bool> {
        Ok(self.path(hash).exists())
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// Wraps a possibly-absent remote backend with the always-present local
/// fallback directory: remote failures fall back to local, logged non-fatal.
pub struct FallbackStorage<'a> {
    pub remote: Option<&'a dyn RemoteBackend>,
    pub local: LocalFallbackBackend,
}

impl<'a> FallbackStorage<'a> {
    pub fn new(remote: Option<&'a dyn RemoteBackend>, local_root: &Path) -> Self {
        Self {
            remote,
            local: LocalFallbackBackend::new(local_root),
        }
    }

    pub fn put(&self, hash: &str, bytes: &[u8], reporter: &mut dyn Reporter) -> Result<()> {
        if let Some(remote) = self.remote {
            if let Err(err) = remote.put(hash, bytes) {
                reporter.warn(&format!(
                    "remote store put failed ({}), falling back to local: {err}",
                    remote.name()
                ));
            } else {
                return Ok(());
            }
        }
        self.local.put(hash, bytes)
    }

    pub fn get(&self, hash: &str, reporter: &mut dyn Reporter) -> Result<Option<Vec<u8>>> {
        if let Some(remote) = self.remote {
            match remote.get(hash) {
                Ok(value) => return Ok(value),
                Err(err) => reporter.warn(&format!(
                    "remote store get failed ({}), falling back to local: {err}",
                    remote.name()
                )),
            }
        }
        self.local.get(hash)
    }
}

/// Reads `META_REMOTE_STORE`/`META_REMOTE_CACHE`; any value that doesn't
/// parse as an `s3://`/`gs://` URL means "no remote backend configured",
/// not an error.
pub fn remote_store_from_env() -> Option<RemoteTarget> {
    std::env::var("META_REMOTE_STORE")
        .ok()
        .and_then(|v| parse_remote_url(&v))
}

#[cfg(feature = "remote-s3")]
pub mod s3 {
    //! AWS S3 remote backend. Enable the `remote-s3` feature to use it.

    use aws_sdk_s3::Client;
    use aws_sdk_s3::primitives::ByteStream;
    use tokio::runtime::Runtime;

    use super::{RemoteBackend, RemoteTarget};
    use crate::error::{Error, Result};

    pub struct S3Backend {
        client: Client,
        runtime: Runtime,
        bucket: String,
        prefix: String,
    }

    impl S3Backend {
        pub fn new(target: &RemoteTarget) -> Result<Self> {
            let runtime = Runtime::new().map_err(|e| Error::RemoteBackend {
                backend: "s3".into(),
                message: format!("failed to start async runtime: {e}"),
            })?;
            let config = runtime.block_on(aws_config::defaults(aws_config::BehaviorVersion::latest()).load());
            Ok(Self {
                client: Client::new(&config),
                runtime,
                bucket: target.bucket.clone(),
                prefix: target.prefix.clone(),
            })
        }

        fn key(&self, hash: &str) -> String {
            if self.prefix.is_empty() {
                format!("{hash}.archive")
            } else {
                format!("{}/{}.archive", self.prefix.trim_end_matches('/'), hash)
            }
        }
    }

    impl RemoteBackend for S3Backend {
        fn put(&self, hash: &str, archive_bytes: &[u8]) -> Result<()> {
            let key = self.key(hash);
            self.runtime
                .block_on(
                    self.client
                        .put_object()
                        .bucket(&self.bucket)
                        .key(&key)
                        .body(ByteStream::from(archive_bytes.to_vec()))
                        .send(),
                )
                .map_err(|e| Error::RemoteBackend {
                    backend: "s3".into(),
                    message: format!("put s3://{}/{key}: {e}", self.bucket),
                })?;
            Ok(())
        }

        fn get(&self, hash: &str) -> Result<Option<Vec<u8>>> {
            let key = self.key(hash);
            let result = self
                .runtime
                .block_on(self.client.get_object().bucket(&self.bucket).key(&key).send());
            match result {
                Ok(output) => {
                    let bytes = self
                        .runtime
                        .block_on(output.body.collect())
                        .map_err(|e| Error::RemoteBackend {
                            backend: "s3".into(),
                            message: format!("read body s3://{}/{key}: {e}", self.bucket),
                        })?
                        .into_bytes()
                        .to_vec();
                    Ok(Some(bytes))
                }
                Err(e) => {
                    if e.as_service_error().map(|s| s.is_no_such_key()).unwrap_or(false) {
                        Ok(None)
                    } else {
                        Err(Error::RemoteBackend {
                            backend: "s3".into(),
                            message: format!("get s3://{}/{key}: {e}", self.bucket),
                        })
                    }
                }
            }
        }

        fn exists(&self, hash: &str) -> Result<bool> {
            let key = self.key(hash);
            let result = self
                .runtime
                .block_on(self.client.head_object().bucket(&self.bucket).key(&key).send());
            match result {
                Ok(_) => Ok(true),
                Err(e) => {
                    if e.as_service_error().map(|s| s.is_not_found()).unwrap_or(false) {
                        Ok(false)
                    } else {
                        Err(Error::RemoteBackend {
                            backend: "s3".into(),
                            message: format!("head s3://{}/{key}: {e}", self.bucket),
                        })
                    }
                }
            }
        }

        fn name(&self) -> &str {
            "s3"
        }
    }
}

#[cfg(feature = "remote-gcs")]
pub mod gcs {
    //! Google Cloud Storage remote backend. Enable the `remote-gcs` feature
    //! to use it.

    use google_cloud_storage::client::{Client, ClientConfig};
    use google_cloud_storage::http::objects::download::Range;
    use google_cloud_storage::http::objects::get::GetObjectRequest;
    use google_cloud_storage::http::objects::upload::{Media, UploadObjectRequest, UploadType};
    use tokio::runtime::Runtime;

    use super::{RemoteBackend, RemoteTarget};
    use crate::error::{Error, Result};

    pub struct GcsBackend {
        client: Client,
        runtime: Runtime,
        bucket: String,
        prefix: String,
    }

    impl GcsBackend {
        pub fn new(target: &RemoteTarget) -> Result<Self> {
            let runtime = Runtime::new().map_err(|e| Error::RemoteBackend {
                backend: "gcs".into(),
                message: format!("failed to start async runtime: {e}"),
            })?;
            let config = runtime.block_on(ClientConfig::default().with_auth()).map_err(|e| Error::RemoteBackend {
                backend: "gcs".into(),
                message: format!("failed to load credentials: {e}"),
            })?;
            Ok(Self {
                client: Client::new(config),
                runtime,
                bucket: target.bucket.clone(),
                prefix: target.prefix.clone(),
            })
        }

        fn object_name(&self, hash: &str) -> String {
            if self.prefix.is_empty() {
                format!("{hash}.archive")
            } else {
                format!("{}/{}.archive", self.prefix.trim_end_matches('/'), hash)
            }
        }
    }

    impl RemoteBackend for GcsBackend {
        fn put(&self, hash: &str, archive_bytes: &[u8]) -> Result<()> {
            let object_name = self.object_name(hash);
            let request = UploadObjectRequest {
                bucket: self.bucket.clone(),
                ..Default::default()
            };
            let upload_type = UploadType::Simple(Media::new(object_name.clone()));
            self.runtime
                .block_on(self.client.upload_object(&request, archive_bytes.to_vec(), &upload_type))
                .map_err(|e| Error::RemoteBackend {
                    backend: "gcs".into(),
                    message: format!("put gs://{}/{object_name}: {e}", self.bucket),
                })?;
            Ok(())
        }

        fn get(&self, hash: &str) -> Result<Option<Vec<u8>>> {
            let object_name = self.object_name(hash);
            let request = GetObjectRequest {
                bucket: self.bucket.clone(),
                object: object_name.clone(),
                ..Default::default()
            };
            let result = self.runtime.block_on(self.client.download_object(&request, &Range::default()));
            match result {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) => {
                    let message = e.to_string();
                    if message.contains("NotFound") || message.contains("404") {
                        Ok(None)
                    } else {
                        Err(Error::RemoteBackend {
                            backend: "gcs".into(),
                            message: format!("get gs://{}/{object_name}: {e}", self.bucket),
                        })
                    }
                }
            }
        }

        fn exists(&self, hash: &str) -> Result<bool> {
            let object_name = self.object_name(hash);
            let request = GetObjectRequest {
                bucket: self.bucket.clone(),
                object: object_name.clone(),
                ..Default::default()
            };
            let result = self.runtime.block_on(self.client.get_object(&request));
            match result {
                Ok(_) => Ok(true),
                Err(e) => {
                    let message = e.to_string();
                    if message.contains("NotFound") || message.contains("404") {
                        Ok(false)
                    } else {
                        Err(Error::RemoteBackend {
                            backend: "gcs".into(),
                            message: format!("head gs://{}/{object_name}: {e}", self.bucket),
                        })
                    }
                }
            }
        }

        fn name(&self) -> &str {
            "gcs"
        }
    }
}

/// Builds a live remote backend for a parsed `s3://`/`gs://` target. Callers
/// that hold only an optional `Option<Box<dyn RemoteBackend>>` use this to
/// turn `remote_store_from_env`'s `RemoteTarget` into the real thing; without
/// the matching `remote-s3`/`remote-gcs` feature compiled in this is a
/// `RemoteBackendError` rather than a panic, so an unconfigured build still
/// degrades to the local fallback.
pub fn build_remote_backend(target: &RemoteTarget) -> Result<Box<dyn RemoteBackend>> {
    match target.kind {
        #[cfg(feature = "remote-s3")]
        RemoteKind::S3 => Ok(Box::new(s3::S3Backend::new(target)?)),
        #[cfg(not(feature = "remote-s3"))]
        RemoteKind::S3 => Err(Error::RemoteBackend {
            backend: "s3".into(),
            message: "rebuild with the `remote-s3` feature to use an s3:// remote store".into(),
        }),
        #[cfg(feature = "remote-gcs")]
        RemoteKind::Gcs => Ok(Box::new(gcs::GcsBackend::new(target)?)),
        #[cfg(not(feature = "remote-gcs"))]
        RemoteKind::Gcs => Err(Error::RemoteBackend {
            backend: "gcs".into(),
            message: "rebuild with the `remote-gcs` feature to use a gs:// remote store".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::RecordingReporter;
    use tempfile::tempdir;

    struct AlwaysFailsBackend;

    impl RemoteBackend for AlwaysFailsBackend {
        fn put(&self, _hash: &str, _bytes: &[u8]) -> Result<()> {
            Err(Error::RemoteBackend {
                backend: "fake".into(),
                message: "network unreachable".into(),
            })
        }
        fn get(&self, _hash: &str) -> Result<Option<Vec<u8>>> {
            Err(Error::RemoteBackend {
                backend: "fake".into(),
                message: "network unreachable".into(),
            })
        }
        fn exists(&self, _hash: &str) -> Result<bool> {
            Ok(false)
        }
        fn name(&self) -> &str {
            "fake"
        }
    }

    #[test]
    fn parses_s3_and_gs_urls() {
        let s3 = parse_remote_url("s3://my-bucket/prefix/path").unwrap();
        assert_eq!(s3.kind, RemoteKind::S3);
        assert_eq!(s3.bucket, "my-bucket");
        assert_eq!(s3.prefix, "prefix/path");

        let gs = parse_remote_url("gs://other-bucket").unwrap();
        assert_eq!(gs.kind, RemoteKind::Gcs);
        assert_eq!(gs.prefix, "");
    }

    #[test]
    fn unparseable_urls_return_none() {
        assert!(parse_remote_url("not-a-url").is_none());
    }

    #[test]
    fn falls_back_to_local_on_remote_failure_without_propagating_the_error() {
        let dir = tempdir().unwrap();
        let fake = AlwaysFailsBackend;
        let storage = FallbackStorage::new(Some(&fake), dir.path());
        let mut reporter = RecordingReporter::default();

        storage.put("abc", b"payload", &mut reporter).unwrap();
        let roundtrip = storage.get("abc", &mut reporter).unwrap();
        assert_eq!(roundtrip, Some(b"payload".to_vec()));
        assert!(reporter.lines.iter().any(|(level, _)| *level == "warn"));
    }

    #[test]
    fn uses_local_directly_when_no_remote_configured() {
        let dir = tempdir().unwrap();
        let storage = FallbackStorage::new(None, dir.path());
        let mut reporter = RecordingReporter::default();
        storage.put("xyz", b"data", &mut reporter).unwrap();
        assert_eq!(
            storage.get("xyz", &mut reporter).unwrap(),
            Some(b"data".to_vec())
        );
    }

    #[test]
    #[cfg(not(feature = "remote-s3"))]
    fn build_remote_backend_s3_without_feature_is_a_remote_backend_error() {
        let target = parse_remote_url("s3://my-bucket/prefix").unwrap();
        let err = build_remote_backend(&target).unwrap_err();
        assert_eq!(err.kind_tag(), "RemoteBackendError");
    }

    #[test]
    #[cfg(not(feature = "remote-gcs"))]
    fn build_remote_backend_gcs_without_feature_is_a_remote_backend_error() {
        let target = parse_remote_url("gs://other-bucket").unwrap();
        let err = build_remote_backend(&target).unwrap_err();
        assert_eq!(err.kind_tag(), "RemoteBackendError");
    }
}
