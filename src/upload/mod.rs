//! File hosting for attachments posted on Slack.
//!
//! The relay can only carry text, so files are re-hosted and their URL is
//! sent to the buffer instead.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::common::error::UploadError;
use crate::config::types::{UploadConfig, UploadEndpoint, UploadProvider};

/// Stores a file and returns a public URL for it.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, filename: &str, content: Vec<u8>, mime: &str)
        -> Result<String, UploadError>;
}

/// Uploader selected by `upload.provider`.
pub struct HttpUploader {
    http: Client,
    provider: UploadProvider,
    endpoint: Option<UploadEndpoint>,
}

/// Reply of lolisafe and pomf style hosts.
#[derive(Debug, Deserialize)]
struct FileHostResponse {
    #[serde(default)]
    files: Vec<HostedFile>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HostedFile {
    url: String,
}

impl HttpUploader {
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            http: Client::new(),
            provider: config.provider,
            endpoint: config.endpoint().cloned(),
        }
    }

    fn part(filename: &str, content: Vec<u8>, mime: &str) -> Result<Part, UploadError> {
        Ok(Part::bytes(content)
            .file_name(filename.to_string())
            .mime_str(mime)?)
    }

    /// `{url}/put`, field `file`, `X-Api-Key` header; the final URL is the file.
    async fn gcf_upload(
        &self,
        endpoint: &UploadEndpoint,
        filename: &str,
        content: Vec<u8>,
        mime: &str,
    ) -> Result<String, UploadError> {
        let form = Form::new().part("file", Self::part(filename, content, mime)?);
        let response = self
            .http
            .post(format!("{}/put", endpoint.url.trim_end_matches('/')))
            .header("X-Api-Key", &endpoint.token)
            .multipart(form)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(UploadError::Status(response.status().as_u16()));
        }
        Ok(response.url().to_string())
    }

    /// Multipart `files[]` with a `token` header, JSON reply.
    async fn file_host(
        &self,
        url: String,
        endpoint: &UploadEndpoint,
        filename: &str,
        content: Vec<u8>,
        mime: &str,
    ) -> Result<String, UploadError> {
        let form = Form::new().part("files[]", Self::part(filename, content, mime)?);
        let response = self
            .http
            .post(url)
            .header("token", &endpoint.token)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        parse_file_host_reply(status, &body)
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(
        &self,
        filename: &str,
        content: Vec<u8>,
        mime: &str,
    ) -> Result<String, UploadError> {
        let Some(endpoint) = self.endpoint.as_ref() else {
            return Err(UploadError::Disabled);
        };
        let base = endpoint.url.trim_end_matches('/');

        match self.provider {
            UploadProvider::None => Err(UploadError::Disabled),
            UploadProvider::GcfUpload => self.gcf_upload(endpoint, filename, content, mime).await,
            UploadProvider::Lolisafe => {
                let url = format!("{}/api/upload", base);
                self.file_host(url, endpoint, filename, content, mime).await
            }
            UploadProvider::Pomf => {
                let url = format!("{}/upload.php", base);
                self.file_host(url, endpoint, filename, content, mime).await
            }
        }
    }
}

fn parse_file_host_reply(status: StatusCode, body: &str) -> Result<String, UploadError> {
    let reply: FileHostResponse =
        serde_json::from_str(body).map_err(|e| UploadError::InvalidResponse(e.to_string()))?;

    if status != StatusCode::OK {
        return Err(UploadError::Rejected(
            reply
                .description
                .unwrap_or_else(|| status.as_u16().to_string()),
        ));
    }

    reply
        .files
        .into_iter()
        .next()
        .map(|file| file.url)
        .ok_or_else(|| UploadError::InvalidResponse("no file in reply".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_provider() {
        let uploader = HttpUploader::new(&UploadConfig::default());
        let err = uploader
            .upload("a.txt", b"hi".to_vec(), "text/plain")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Uploading files is not enabled.");
    }

    #[tokio::test]
    async fn test_provider_without_endpoint_is_disabled() {
        let config = UploadConfig {
            provider: UploadProvider::Lolisafe,
            ..UploadConfig::default()
        };
        let uploader = HttpUploader::new(&config);
        assert!(matches!(
            uploader.upload("a", Vec::new(), "text/plain").await,
            Err(UploadError::Disabled)
        ));
    }

    #[test]
    fn test_file_host_success() {
        let url = parse_file_host_reply(
            StatusCode::OK,
            r#"{"success":true,"files":[{"name":"x.png","url":"https://i.example/x.png"}]}"#,
        )
        .unwrap();
        assert_eq!(url, "https://i.example/x.png");
    }

    #[test]
    fn test_file_host_rejection_uses_description() {
        let err = parse_file_host_reply(
            StatusCode::FORBIDDEN,
            r#"{"success":false,"description":"Invalid token"}"#,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Failed to upload file (status code: Invalid token)");
    }

    #[test]
    fn test_file_host_garbage_reply() {
        assert!(matches!(
            parse_file_host_reply(StatusCode::OK, "<html>"),
            Err(UploadError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_file_host_reply(StatusCode::OK, r#"{"files":[]}"#),
            Err(UploadError::InvalidResponse(_))
        ));
    }
}
