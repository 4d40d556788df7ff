use std::path::{Path, PathBuf};

use api_topology_core::parameter_keys::function_artifact_key;
use api_topology_core::topology::{CodeLocation, FunctionArtifacts};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, Utc};

pub const DEFAULT_DIST_DIR: &str = "dist/functions";
pub const DEFAULT_ARTIFACT_PREFIX: &str = "functions";

/// Packaged functions under `dist_dir`, one `{name}.zip` per function, and
/// the bucket location each one is deployed from.
#[derive(Debug, Clone)]
pub struct DistArtifacts {
    dist_dir: PathBuf,
    bucket: String,
    prefix: String,
    service_name: String,
    require_packages: bool,
}

impl DistArtifacts {
    pub fn new(
        dist_dir: impl Into<PathBuf>,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            dist_dir: dist_dir.into(),
            bucket: bucket.into(),
            prefix: prefix.into(),
            service_name: service_name.into(),
            require_packages: true,
        }
    }

    /// Keys objects under `{prefix}/{build_id}` so that every deploy points
    /// functions at fresh objects.
    pub fn for_build(self, built_at: DateTime<Utc>) -> Self {
        let prefix = format!("{}/{}", self.prefix, build_id(built_at));
        Self { prefix, ..self }
    }

    /// Resolves locations without checking that packages exist.
    pub fn without_package_check(self) -> Self {
        Self {
            require_packages: false,
            ..self
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn package_path(&self, function_name: &str) -> PathBuf {
        self.dist_dir.join(format!("{function_name}.zip"))
    }

    pub fn location(&self, function_name: &str) -> CodeLocation {
        CodeLocation {
            bucket: self.bucket.clone(),
            key: function_artifact_key(&self.prefix, &self.service_name, function_name),
        }
    }
}

impl FunctionArtifacts for DistArtifacts {
    fn artifact_for(&self, function_name: &str) -> Result<CodeLocation, String> {
        if self.require_packages {
            check_package(&self.package_path(function_name))?;
        }
        Ok(self.location(function_name))
    }
}

fn check_package(path: &Path) -> Result<(), String> {
    match std::fs::metadata(path) {
        Ok(metadata) if metadata.is_file() && metadata.len() > 0 => Ok(()),
        Ok(_) => Err(format!("package {} is empty", path.display())),
        Err(error) => Err(format!("package {} is not readable: {error}", path.display())),
    }
}

pub fn build_id(built_at: DateTime<Utc>) -> String {
    built_at.format("%Y%m%dT%H%M%SZ").to_string()
}

pub trait ArtifactUploader {
    fn upload(&self, location: &CodeLocation, body: Vec<u8>) -> Result<(), String>;
}

pub struct S3ArtifactUploader {
    client: aws_sdk_s3::Client,
}

impl S3ArtifactUploader {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }
}

impl ArtifactUploader for S3ArtifactUploader {
    fn upload(&self, location: &CodeLocation, body: Vec<u8>) -> Result<(), String> {
        let client = self.client.clone();
        let bucket = location.bucket.clone();
        let key = location.key.clone();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                client
                    .put_object()
                    .bucket(&bucket)
                    .key(&key)
                    .body(ByteStream::from(body))
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|error| {
                        format!(
                            "failed to upload s3://{bucket}/{key}: {}",
                            DisplayErrorContext(&error)
                        )
                    })
            })
        })
    }
}
