use anyhow::Context;
use azure_storage::StorageCredentials;
use azure_storage_blobs::prelude::{BlobClient, BlobServiceClient};
use base64::Engine;
use common::{AzureConfig, Backend, Error, ErrorKind, PruneOutcome, Result, ResultExt, Storage};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

/// Azure blob storage backend.
///
/// Holds one authenticated service client for its whole lifetime; every operation resolves a
/// blob in the configured container from the joined remote path. Concurrent calls on the same
/// instance share that client without further coordination.
pub struct AzureStorage {
    backend: Backend,
    client: BlobServiceClient,
    container_name: String,
}

impl AzureStorage {
    /// Builds the client. Credentials are only checked for shape here; the service rejects bad
    /// keys on the first request.
    pub fn new(config: &AzureConfig) -> Result<Self> {
        let backend = Backend::new(&config.local_path, &config.remote_path)?;
        if config.account_name.is_empty() {
            return Err(Error::msg(
                ErrorKind::Credentials,
                "azure account name must not be empty",
            ));
        }
        if config.account_key.is_empty() {
            return Err(Error::msg(
                ErrorKind::Credentials,
                "azure account key must not be empty",
            ));
        }
        base64::engine::general_purpose::STANDARD
            .decode(config.account_key.expose())
            .context("azure account key is not valid base64")
            .with_kind(ErrorKind::Credentials)?;
        if config.container_name.is_empty() {
            return Err(Error::msg(
                ErrorKind::Config,
                "azure container name must not be empty",
            ));
        }
        let credentials = StorageCredentials::access_key(
            config.account_name.clone(),
            config.account_key.expose().to_string(),
        );
        let client = BlobServiceClient::new(config.account_name.clone(), credentials);
        tracing::debug!(
            "created blob client for https://{}.blob.core.windows.net/{}",
            &config.account_name,
            &config.container_name
        );
        Ok(Self {
            backend,
            client,
            container_name: config.container_name.clone(),
        })
    }

    #[must_use]
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Blob name for `file_name`: the joined remote path without leading separators.
    pub fn blob_name(&self, file_name: &str) -> Result<String> {
        Ok(self
            .backend
            .remote_location(file_name)?
            .trim_start_matches('/')
            .to_string())
    }

    fn blob_client(&self, blob_name: &str) -> BlobClient {
        self.client
            .container_client(&self.container_name)
            .blob_client(blob_name)
    }
}

/// Appends every chunk of a download body to `file`, returning the number of bytes written.
async fn write_body<S, B, E>(file: &mut tokio::fs::File, mut body: S, blob: &str) -> Result<u64>
where
    S: futures::Stream<Item = std::result::Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Into<anyhow::Error>,
{
    let mut written = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk
            .map_err(Into::into)
            .with_context(|| format!("failed downloading blob {blob}"))
            .with_kind(ErrorKind::Transfer)?;
        let chunk = chunk.as_ref();
        file.write_all(chunk)
            .await
            .with_context(|| format!("failed to write blob {blob} to file"))
            .with_kind(ErrorKind::Io)?;
        written += chunk.len() as u64;
    }
    Ok(written)
}

#[async_trait::async_trait]
impl Storage for AzureStorage {
    #[instrument(skip(self))]
    async fn copy(&self, file_name: &str) -> Result<()> {
        let src = self.backend.local_path(file_name)?;
        let data = tokio::fs::read(&src)
            .await
            .with_context(|| format!("failed to open file {:?}", &src))
            .with_kind(ErrorKind::Io)?;
        let blob_name = self.blob_name(file_name)?;
        let size = data.len();
        self.blob_client(&blob_name)
            .put_block_blob(data)
            .content_type("application/octet-stream")
            .await
            .with_context(|| {
                format!(
                    "failed to upload {:?} to blob {}/{}",
                    &src, &self.container_name, &blob_name
                )
            })
            .with_kind(ErrorKind::Transfer)?;
        tracing::info!(
            "uploaded {:?} to {}/{} ({} bytes)",
            &src,
            &self.container_name,
            &blob_name,
            size
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn copy_from(&self, file_name: &str) -> Result<()> {
        let blob_name = self.blob_name(file_name)?;
        let dst = self.backend.local_path(file_name)?;
        let location = format!("{}/{}", &self.container_name, &blob_name);
        let mut responses = self.blob_client(&blob_name).get().into_stream();
        // the local file is only created once the blob is known to exist
        let first = match responses.next().await {
            Some(response) => Some(
                response
                    .with_context(|| format!("failed to download blob {location}"))
                    .with_kind(ErrorKind::Transfer)?,
            ),
            None => None,
        };
        let mut file = tokio::fs::File::create(&dst)
            .await
            .with_context(|| format!("failed to create local file {:?}", &dst))
            .with_kind(ErrorKind::Io)?;
        let mut written = 0u64;
        if let Some(response) = first {
            written += write_body(&mut file, response.data, &location).await?;
        }
        while let Some(response) = responses.next().await {
            let response = response
                .with_context(|| format!("failed to download blob {location}"))
                .with_kind(ErrorKind::Transfer)?;
            written += write_body(&mut file, response.data, &location).await?;
        }
        file.flush()
            .await
            .with_context(|| format!("failed flushing {:?}", &dst))
            .with_kind(ErrorKind::Io)?;
        tracing::info!("downloaded {} to {:?} ({} bytes)", &location, &dst, written);
        Ok(())
    }

    async fn prune(&self, _retention_days: u32) -> Result<PruneOutcome> {
        Ok(crate::prune_unsupported(self.name()))
    }

    fn name(&self) -> &'static str {
        "azure"
    }
}
