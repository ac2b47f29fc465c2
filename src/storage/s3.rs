// backupsync/src/storage/s3.rs
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::config::Region;
use s3::error::{DisplayErrorContext, SdkError};
use s3::operation::head_object::HeadObjectOutput;
use s3::primitives::ByteStream;
use std::path::Path;
use tracing::{debug, info, warn};

use super::{Existence, RemoteStore};
use crate::archive::{self, Archive, ArchiveLocation};
use crate::config::RemoteConfig;
use crate::errors::{AppError, Result};

/// Archive storage on an S3-compatible service (AWS S3, MinIO, DigitalOcean Spaces, ...).
///
/// Objects are stored at `{path_prefix}{name}`. When the remote configuration
/// is incomplete the store is constructed disabled and every fallible
/// operation fails with [`AppError::NotConfigured`].
#[derive(Debug, Clone)]
pub struct S3RemoteStore {
    client: Option<s3::Client>,
    bucket: String,
    prefix: String,
}

impl S3RemoteStore {
    pub async fn connect(config: &RemoteConfig) -> Result<Self> {
        if !config.is_enabled() {
            info!("Remote storage is not configured; running local-only");
            return Ok(Self::disabled(config));
        }

        if let Some(endpoint) = &config.endpoint {
            url::Url::parse(endpoint).map_err(|e| {
                AppError::Config(format!("Invalid S3 endpoint URL {}: {}", endpoint, e))
            })?;
        }

        let sdk_config = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(s3::config::Credentials::new(
                &config.access_key,
                &config.secret_key,
                None, // session_token
                None, // expiry
                "Static", // provider_name
            ))
            .load()
            .await;

        let mut s3_config = s3::config::Builder::from(&sdk_config);
        // Custom endpoints (MinIO, Spaces, ...) generally need path-style addressing
        if let Some(endpoint) = &config.endpoint {
            s3_config = s3_config.endpoint_url(endpoint).force_path_style(true);
        }

        info!(
            "Remote storage enabled: s3://{}/{}",
            config.bucket, config.path_prefix
        );

        Ok(Self {
            client: Some(s3::Client::from_conf(s3_config.build())),
            bucket: config.bucket.clone(),
            prefix: config.path_prefix.clone(),
        })
    }

    pub fn disabled(config: &RemoteConfig) -> Self {
        Self {
            client: None,
            bucket: config.bucket.clone(),
            prefix: config.path_prefix.clone(),
        }
    }

    fn client(&self) -> Result<&s3::Client> {
        self.client.as_ref().ok_or(AppError::NotConfigured)
    }

    fn object_key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    async fn head(&self, name: &str) -> Result<HeadObjectOutput> {
        let client = self.client()?;
        let key = self.object_key(name);
        client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                    AppError::ObjectNotFound(key.clone())
                } else {
                    store_io("head", &key, e)
                }
            })
    }
}

fn store_io<E, R>(action: &str, key: &str, err: SdkError<E, R>) -> AppError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    AppError::StoreIo(format!("{} {}: {}", action, key, DisplayErrorContext(&err)))
}

// Metadata lookups report a missing object as a store failure
fn metadata_error(err: AppError) -> AppError {
    match err {
        AppError::ObjectNotFound(key) => AppError::StoreIo(format!("no such object: {}", key)),
        other => other,
    }
}

#[async_trait]
impl RemoteStore for S3RemoteStore {
    fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    fn describe(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.prefix)
    }

    async fn upload(&self, local_path: &Path, name: &str) -> Result<()> {
        let client = self.client()?;
        if !tokio::fs::try_exists(local_path).await.unwrap_or(false) {
            return Err(AppError::LocalFileMissing(local_path.to_path_buf()));
        }
        let key = self.object_key(name);

        debug!(
            "Uploading {} to s3://{}/{}",
            local_path.display(),
            self.bucket,
            key
        );

        // The stream owns the file handle; it is closed when the request future
        // completes or is dropped.
        let body = ByteStream::from_path(local_path).await.map_err(|e| {
            AppError::local_io(local_path, std::io::Error::other(e))
        })?;

        client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body)
            .send()
            .await
            .map_err(|e| store_io("upload", &key, e))?;

        info!("✓ Uploaded {} to s3://{}/{}", name, self.bucket, key);
        Ok(())
    }

    async fn download(&self, name: &str) -> Result<Vec<u8>> {
        let client = self.client()?;
        let key = self.object_key(name);

        let object = client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    AppError::ObjectNotFound(key.clone())
                } else {
                    store_io("download", &key, e)
                }
            })?;

        let data = object
            .body
            .collect()
            .await
            .map_err(|e| AppError::StoreIo(format!("download {}: {}", key, e)))?;
        let bytes = data.into_bytes().to_vec();

        debug!("Downloaded {} bytes from s3://{}/{}", bytes.len(), self.bucket, key);
        Ok(bytes)
    }

    async fn probe(&self, name: &str) -> Existence {
        match self.head(name).await {
            Ok(_) => Existence::Present,
            Err(AppError::ObjectNotFound(_)) => Existence::Absent,
            Err(e) => {
                warn!("Existence check for {} failed: {}", name, e);
                Existence::Unknown
            }
        }
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let client = self.client()?;
        let key = self.object_key(name);

        client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| store_io("delete", &key, e))?;

        info!("Deleted s3://{}/{}", self.bucket, key);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Archive>> {
        let client = self.client()?;
        let mut archives = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            // Delimiter keeps the listing to direct children of the prefix
            let mut request = client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&self.prefix)
                .delimiter("/");
            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| store_io("list", &self.prefix, e))?;

            for object in response.contents() {
                let name = object
                    .key()
                    .and_then(|k| k.strip_prefix(self.prefix.as_str()));
                let Some(name) = name else {
                    continue;
                };
                if !archive::is_archive_name(name) {
                    continue;
                }
                archives.push(Archive::new(
                    name,
                    object.size().unwrap_or(0).max(0) as u64,
                    object.last_modified().map(|t| t.secs()).unwrap_or(0),
                    ArchiveLocation::Remote,
                ));
            }

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token().map(str::to_string);
                if continuation_token.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        archive::sort_newest_first(&mut archives);
        debug!("Found {} remote archives under {}", archives.len(), self.describe());
        Ok(archives)
    }

    async fn size(&self, name: &str) -> Result<u64> {
        let head = self.head(name).await.map_err(metadata_error)?;
        Ok(head.content_length().unwrap_or(0).max(0) as u64)
    }

    async fn last_modified(&self, name: &str) -> Result<i64> {
        let head = self.head(name).await.map_err(metadata_error)?;
        head.last_modified()
            .map(|t| t.secs())
            .ok_or_else(|| {
                AppError::StoreIo(format!("no last-modified time for {}", self.object_key(name)))
            })
    }
}
