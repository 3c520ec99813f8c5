//! S3-compatible object storage Pod.
//!
//! The `Pod` trait stays fully synchronous, so this backend owns a
//! private tokio runtime and bridges every call through
//! `Runtime::block_on`. Credential resolution (env vars, profiles, SSO,
//! instance metadata) is left entirely to `aws-config`'s default
//! provider chain; this crate never touches a credential file itself.

use anyhow::{Context, Result};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;

use super::retry::{with_retry, DEFAULT_ATTEMPTS};
use super::Pod;

pub struct S3Pod {
    client: Client,
    bucket: String,
    prefix: String,
    runtime: tokio::runtime::Runtime,
}

impl S3Pod {
    /// Connect to `bucket`, scoping every key under `prefix`. Reads the
    /// standard `AWS_*` environment variables / shared config files via
    /// `aws-config`; `AWS_ENDPOINT_URL` selects an S3-compatible service.
    pub fn connect(bucket: impl Into<String>, prefix: impl Into<String>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("starting S3 client runtime")?;

        let client = runtime.block_on(async {
            let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
            Client::new(&config)
        });

        Ok(S3Pod {
            client,
            bucket: bucket.into(),
            prefix: prefix.into(),
            runtime,
        })
    }

    fn full_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix.trim_end_matches('/'), key)
        }
    }

    fn strip_prefix(&self, key: &str) -> String {
        let key = key.strip_prefix(&self.prefix).unwrap_or(key);
        key.trim_start_matches('/').to_string()
    }
}

impl Pod for S3Pod {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let full_key = self.full_key(key);
        with_retry(&format!("s3 get {}", full_key), DEFAULT_ATTEMPTS, || {
            self.runtime.block_on(async {
                let result = self
                    .client
                    .get_object()
                    .bucket(&self.bucket)
                    .key(&full_key)
                    .send()
                    .await;
                match result {
                    Ok(output) => {
                        let bytes = output
                            .body
                            .collect()
                            .await
                            .with_context(|| format!("reading body for {}", full_key))?
                            .into_bytes();
                        Ok(Some(bytes.to_vec()))
                    }
                    Err(err) => {
                        let service_err = err.into_service_error();
                        if service_err.is_no_such_key() {
                            Ok(None)
                        } else {
                            Err(anyhow::Error::new(service_err)
                                .context(format!("getting {}", full_key)))
                        }
                    }
                }
            })
        })
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let full_key = self.full_key(key);
        with_retry(&format!("s3 put {}", full_key), DEFAULT_ATTEMPTS, || {
            self.runtime.block_on(async {
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(&full_key)
                    .body(ByteStream::from(data.to_vec()))
                    .send()
                    .await
                    .with_context(|| format!("putting {}", full_key))?;
                Ok(())
            })
        })
    }

    fn delete(&self, key: &str) -> Result<()> {
        let full_key = self.full_key(key);
        self.runtime.block_on(async {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(&full_key)
                .send()
                .await
                .with_context(|| format!("deleting {}", full_key))?;
            Ok(())
        })
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let full_prefix = self.full_key(prefix);
        self.runtime.block_on(async {
            let mut out = Vec::new();
            let mut continuation = None;
            loop {
                let mut req = self
                    .client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .prefix(&full_prefix)
                    .delimiter("/");
                if let Some(token) = continuation.take() {
                    req = req.continuation_token(token);
                }
                let resp = req
                    .send()
                    .await
                    .with_context(|| format!("listing {}", full_prefix))?;

                for common in resp.common_prefixes() {
                    if let Some(p) = common.prefix() {
                        out.push(self.strip_prefix(p.trim_end_matches('/')));
                    }
                }
                for obj in resp.contents() {
                    if let Some(k) = obj.key() {
                        out.push(self.strip_prefix(k));
                    }
                }

                if resp.is_truncated() == Some(true) {
                    continuation = resp.next_continuation_token().map(|s| s.to_string());
                } else {
                    break;
                }
            }
            out.sort();
            Ok(out)
        })
    }

    fn walk(&self, prefix: &str) -> Result<Vec<String>> {
        let full_prefix = self.full_key(prefix);
        self.runtime.block_on(async {
            let mut out = Vec::new();
            let mut continuation = None;
            loop {
                let mut req = self
                    .client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .prefix(&full_prefix);
                if let Some(token) = continuation.take() {
                    req = req.continuation_token(token);
                }
                let resp = req
                    .send()
                    .await
                    .with_context(|| format!("walking {}", full_prefix))?;

                for obj in resp.contents() {
                    if let Some(k) = obj.key() {
                        out.push(self.strip_prefix(k));
                    }
                }

                if resp.is_truncated() == Some(true) {
                    continuation = resp.next_continuation_token().map(|s| s.to_string());
                } else {
                    break;
                }
            }
            out.sort();
            Ok(out)
        })
    }

    /// `gc`'s safety horizon needs a last-modified time to withhold
    /// deletion of a blob a concurrent writer just created; S3 tracks this
    /// natively on every object, unlike the in-memory pod.
    fn mtime(&self, key: &str) -> Result<Option<std::time::SystemTime>> {
        let full_key = self.full_key(key);
        self.runtime.block_on(async {
            let result = self
                .client
                .head_object()
                .bucket(&self.bucket)
                .key(&full_key)
                .send()
                .await;
            match result {
                Ok(output) => Ok(output.last_modified().map(|dt| {
                    std::time::UNIX_EPOCH + std::time::Duration::from_secs_f64(dt.as_secs_f64())
                })),
                Err(err) => {
                    let service_err = err.into_service_error();
                    if service_err.is_not_found() {
                        Ok(None)
                    } else {
                        Err(anyhow::Error::new(service_err).context(format!("stat'ing {}", full_key)))
                    }
                }
            }
        })
    }
}
