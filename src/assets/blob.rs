use std::collections::HashMap;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures_util::StreamExt;
use hmac::{Hmac, Mac};
use reqwest::{header, Client, Method, RequestBuilder, StatusCode, Url};
use sha2::Sha256;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

const STORAGE_VERSION: &str = "2021-08-06";
const DEV_ACCOUNT_NAME: &str = "devstoreaccount1";
const DEV_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_BLOB_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("request to blob storage failed")]
    Http(#[from] reqwest::Error),

    #[error("blob storage returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("blob properties carry no content length")]
    MissingContentLength,

    #[error("downloaded {actual} bytes, expected {expected}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("failed to write blob contents")]
    Io(#[from] std::io::Error),
}

/// Parsed `Key=Value;` storage connection string.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub protocol: String,
    pub account_name: Option<String>,
    pub account_key: Option<String>,
    pub endpoint_suffix: String,
    pub blob_endpoint: Option<String>,
    pub shared_access_signature: Option<String>,
}

impl ConnectionString {
    pub fn parse(raw: &str) -> Result<Self, BlobError> {
        let mut pairs: HashMap<String, String> = HashMap::new();
        for part in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            // Keys and SAS tokens contain '=' themselves.
            let (key, value) = part.split_once('=').ok_or_else(|| {
                BlobError::InvalidConnectionString(format!("segment without '=': {}", key_of(part)))
            })?;
            pairs.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }

        if pairs
            .get("usedevelopmentstorage")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        {
            return Ok(Self {
                protocol: "http".to_string(),
                account_name: Some(DEV_ACCOUNT_NAME.to_string()),
                account_key: Some(DEV_ACCOUNT_KEY.to_string()),
                endpoint_suffix: String::new(),
                blob_endpoint: Some(DEV_BLOB_ENDPOINT.to_string()),
                shared_access_signature: None,
            });
        }

        let parsed = Self {
            protocol: pairs
                .remove("defaultendpointsprotocol")
                .unwrap_or_else(|| "https".to_string()),
            account_name: pairs.remove("accountname"),
            account_key: pairs.remove("accountkey"),
            endpoint_suffix: pairs
                .remove("endpointsuffix")
                .unwrap_or_else(|| "core.windows.net".to_string()),
            blob_endpoint: pairs.remove("blobendpoint"),
            shared_access_signature: pairs
                .remove("sharedaccesssignature")
                .map(|sas| sas.trim_start_matches('?').to_string()),
        };

        if parsed.account_name.is_none() && parsed.blob_endpoint.is_none() {
            return Err(BlobError::InvalidConnectionString(
                "needs AccountName or BlobEndpoint".to_string(),
            ));
        }
        Ok(parsed)
    }

    pub fn blob_endpoint(&self) -> Result<Url, BlobError> {
        let endpoint = match (&self.blob_endpoint, &self.account_name) {
            (Some(endpoint), _) => endpoint.clone(),
            (None, Some(account)) => {
                format!("{}://{}.blob.{}", self.protocol, account, self.endpoint_suffix)
            }
            (None, None) => {
                return Err(BlobError::InvalidConnectionString(
                    "needs AccountName or BlobEndpoint".to_string(),
                ))
            }
        };
        Url::parse(&endpoint)
            .map_err(|e| BlobError::InvalidConnectionString(format!("bad blob endpoint: {e}")))
    }

    fn credential(&self) -> Result<Credential, BlobError> {
        if let Some(sas) = &self.shared_access_signature {
            return Ok(Credential::Sas(sas.clone()));
        }
        match (&self.account_name, &self.account_key) {
            (Some(account), Some(key)) => {
                let key = STANDARD.decode(key).map_err(|_| {
                    BlobError::InvalidConnectionString("AccountKey is not valid base64".to_string())
                })?;
                Ok(Credential::SharedKey {
                    account: account.clone(),
                    key,
                })
            }
            _ => Ok(Credential::Anonymous),
        }
    }
}

// Only the key, the value may be a secret.
fn key_of(segment: &str) -> &str {
    segment.split('=').next().unwrap_or_default()
}

impl std::fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionString")
            .field("protocol", &self.protocol)
            .field("account_name", &self.account_name)
            .field("account_key", &self.account_key.as_ref().map(|_| "<redacted>"))
            .field("endpoint_suffix", &self.endpoint_suffix)
            .field("blob_endpoint", &self.blob_endpoint)
            .field("shared_access_signature", &self.shared_access_signature.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Clone)]
enum Credential {
    Sas(String),
    SharedKey { account: String, key: Vec<u8> },
    Anonymous,
}

#[derive(Debug, Clone, Copy)]
pub struct BlobProperties {
    pub content_length: u64,
}

/// Read-only client for a single blob.
pub struct BlobClient {
    http: Client,
    url: Url,
    credential: Credential,
}

impl BlobClient {
    pub fn from_connection_string(raw: &str, container: &str, blob: &str) -> Result<Self, BlobError> {
        let connection = ConnectionString::parse(raw)?;
        let url = blob_url(&connection.blob_endpoint()?, container, blob)?;
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            url,
            credential: connection.credential()?,
        })
    }

    pub async fn properties(&self) -> Result<BlobProperties, BlobError> {
        let response = self.request(Method::HEAD)?.send().await?;
        let response = check_status(response).await?;

        // HEAD responses have no body, so the size comes from the header.
        let content_length = response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or(BlobError::MissingContentLength)?;

        Ok(BlobProperties { content_length })
    }

    /// Stream the blob into `writer`, calling `progress(downloaded, total)`
    /// after every chunk. Returns the number of bytes written.
    pub async fn download<W>(
        &self,
        writer: &mut W,
        total: u64,
        progress: &mut (dyn FnMut(u64, u64) + Send),
    ) -> Result<u64, BlobError>
    where
        W: AsyncWrite + Unpin,
    {
        let response = self.request(Method::GET)?.send().await?;
        let response = check_status(response).await?;

        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            progress(downloaded, total);
        }
        writer.flush().await?;

        if downloaded != total {
            return Err(BlobError::SizeMismatch {
                expected: total,
                actual: downloaded,
            });
        }
        Ok(downloaded)
    }

    fn request(&self, method: Method) -> Result<RequestBuilder, BlobError> {
        match &self.credential {
            Credential::Anonymous => Ok(self.http.request(method, self.url.clone())),
            Credential::Sas(token) => {
                let mut url = self.url.clone();
                url.set_query(Some(token));
                Ok(self.http.request(method, url))
            }
            Credential::SharedKey { account, key } => {
                let date = chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
                let ms_headers = [("x-ms-date", date.as_str()), ("x-ms-version", STORAGE_VERSION)];
                let to_sign = string_to_sign(method.as_str(), &self.url, account, &ms_headers);
                let signature = sign(key, &to_sign)?;
                debug!("Signed {} {}", method, self.url.path());

                let mut builder = self.http.request(method, self.url.clone());
                for (name, value) in ms_headers {
                    builder = builder.header(name, value);
                }
                Ok(builder.header(header::AUTHORIZATION, format!("SharedKey {account}:{signature}")))
            }
        }
    }
}

fn blob_url(endpoint: &Url, container: &str, blob: &str) -> Result<Url, BlobError> {
    let mut url = endpoint.clone();
    url.path_segments_mut()
        .map_err(|_| BlobError::InvalidConnectionString("blob endpoint cannot be a base URL".to_string()))?
        .pop_if_empty()
        .push(container)
        .extend(blob.split('/'));
    Ok(url)
}

/// Shared Key string-to-sign for a request without body or standard
/// conditional headers.
fn string_to_sign(method: &str, url: &Url, account: &str, ms_headers: &[(&str, &str)]) -> String {
    let mut headers: Vec<(String, &str)> = ms_headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.trim()))
        .collect();
    headers.sort();

    let mut out = String::from(method);
    out.push('\n');
    // Content-Encoding through Range.
    out.push_str(&"\n".repeat(11));
    for (name, value) in headers {
        out.push_str(&format!("{name}:{value}\n"));
    }
    out.push_str(&format!("/{}{}", account, url.path()));

    let mut query: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.into_owned()))
        .collect();
    query.sort();
    for (name, value) in query {
        out.push_str(&format!("\n{name}:{value}"));
    }
    out
}

fn sign(key: &[u8], to_sign: &str) -> Result<String, BlobError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|_| BlobError::InvalidConnectionString("unusable AccountKey".to_string()))?;
    mac.update(to_sign.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BlobError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BlobError::Status { status, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRODUCTION: &str = "DefaultEndpointsProtocol=https;AccountName=weights;AccountKey=c2VjcmV0LWtleQ==;EndpointSuffix=core.windows.net";

    #[test]
    fn parses_account_connection_string() {
        let parsed = ConnectionString::parse(PRODUCTION).unwrap();
        assert_eq!(parsed.account_name.as_deref(), Some("weights"));
        assert_eq!(parsed.account_key.as_deref(), Some("c2VjcmV0LWtleQ=="));
        assert_eq!(
            parsed.blob_endpoint().unwrap().as_str(),
            "https://weights.blob.core.windows.net/"
        );
    }

    #[test]
    fn development_storage_uses_emulator() {
        let parsed = ConnectionString::parse("UseDevelopmentStorage=true").unwrap();
        assert_eq!(parsed.account_name.as_deref(), Some(DEV_ACCOUNT_NAME));
        assert_eq!(
            parsed.blob_endpoint().unwrap().as_str(),
            "http://127.0.0.1:10000/devstoreaccount1"
        );
    }

    #[test]
    fn rejects_connection_string_without_account() {
        let err = ConnectionString::parse("EndpointSuffix=core.windows.net").unwrap_err();
        assert!(matches!(err, BlobError::InvalidConnectionString(_)));
        assert!(ConnectionString::parse("garbage").is_err());
    }

    #[test]
    fn debug_output_hides_key() {
        let parsed = ConnectionString::parse(PRODUCTION).unwrap();
        assert!(!format!("{parsed:?}").contains("c2VjcmV0"));
    }

    #[test]
    fn blob_url_encodes_each_segment() {
        let endpoint = Url::parse("http://127.0.0.1:10000/devstoreaccount1").unwrap();
        let url = blob_url(&endpoint, "translationapp", "weights/v1/Fine Tune.zip").unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:10000/devstoreaccount1/translationapp/weights/v1/Fine%20Tune.zip"
        );
    }

    #[test]
    fn sas_takes_priority_over_shared_key() {
        let raw = format!("{PRODUCTION};SharedAccessSignature=?sv=2021&sig=abc");
        let client = BlobClient::from_connection_string(&raw, "c", "b.zip").unwrap();
        assert!(matches!(&client.credential, Credential::Sas(token) if token == "sv=2021&sig=abc"));
    }

    #[test]
    fn string_to_sign_layout() {
        let url = Url::parse("https://weights.blob.core.windows.net/translationapp/w.zip").unwrap();
        let to_sign = string_to_sign(
            "GET",
            &url,
            "weights",
            &[("x-ms-version", "2021-08-06"), ("x-ms-date", "Mon, 01 Jan 2024 00:00:00 GMT")],
        );
        let expected = format!(
            "GET\n{}x-ms-date:Mon, 01 Jan 2024 00:00:00 GMT\nx-ms-version:2021-08-06\n/weights/translationapp/w.zip",
            "\n".repeat(11)
        );
        assert_eq!(to_sign, expected);
    }

    #[test]
    fn signing_is_deterministic() {
        let key = STANDARD.decode("c2VjcmV0LWtleQ==").unwrap();
        let first = sign(&key, "GET\n/weights/c/b").unwrap();
        let second = sign(&key, "GET\n/weights/c/b").unwrap();
        assert_eq!(first, second);
        assert_ne!(first, sign(&key, "HEAD\n/weights/c/b").unwrap());
        assert_eq!(STANDARD.decode(&first).unwrap().len(), 32);
    }
}
