use crate::Error;
use crate::MusicClient;
use crate::Session;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt, stream};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::ops::RangeInclusive;
use std::sync::Arc;
use stream_download::storage::memory::MemoryStorageProvider;
use stream_download::{Settings, StreamDownload};
use tokio::sync::Mutex;

/// Upper bound on concurrent segment downloads.
pub const MAX_PARALLEL_SEGMENTS: usize = 5;

/// Produces signed stream URLs for a track.
///
/// Signature schemes are not part of this crate; implement this trait to plug
/// one in with [`MusicClient::with_stream_url_deriver`]. A track may be served as
/// several URLs, each covering one byte range.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait StreamUrlDeriver: Send + Sync {
    async fn derive(&self, track_id: &str, session: &Session) -> Result<Vec<String>, Error>;
}

/// A time-limited URL for a track's audio, or one byte range of it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StreamUrl {
    pub url: String,
    /// When the URL stops working, from its `expire` parameter
    pub expires: Option<DateTime<Utc>>,
    /// Byte range served, from its `range=start-end` parameter
    pub range: Option<(u64, u64)>,
}

impl StreamUrl {
    /// Parse the expiry and byte range out of a URL.
    ///
    /// # Example
    ///
    /// ```
    /// let url = gmusicrs::StreamUrl::parse("https://example.com/a?range=0-1023&expire=1400000000").unwrap();
    /// assert_eq!(url.range, Some((0, 1023)));
    /// assert_eq!(url.expires.unwrap().timestamp(), 1_400_000_000);
    /// ```
    pub fn parse(url: &str) -> Result<Self, Error> {
        let parsed =
            url::Url::parse(url).map_err(|e| Error::Decode(format!("invalid stream URL: {e}")))?;

        let mut expires = None;
        let mut range = None;
        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "expire" => {
                    expires = value
                        .parse::<i64>()
                        .ok()
                        .and_then(|secs| DateTime::from_timestamp(secs, 0));
                }
                "range" => range = parse_range(&value),
                _ => {}
            }
        }

        Ok(Self {
            url: url.to_string(),
            expires,
            range,
        })
    }

    pub fn is_expired(&self) -> bool {
        self.expires.is_some_and(|expires| expires <= Utc::now())
    }

    fn byte_range(&self) -> Option<RangeInclusive<usize>> {
        let (start, end) = self.range?;
        Some(usize::try_from(start).ok()?..=usize::try_from(end).ok()?)
    }

    /// Get a buffered, seekable stream of the audio behind this URL.
    ///
    /// While this function is async, the returned stream is sync.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # async fn example(client: gmusicrs::MusicClient) -> Result<(), gmusicrs::Error> {
    /// let urls = client.stream_urls("track-id").await?.unwrap_or_default();
    /// if let Some(url) = urls.first() {
    ///     let mut reader = url.stream().await?;
    ///     tokio::task::spawn_blocking(move || {
    ///         let mut audio = Vec::new();
    ///         std::io::Read::read_to_end(&mut reader, &mut audio).ok();
    ///     });
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn stream(&self) -> Result<StreamDownload<MemoryStorageProvider>, Error> {
        let url: reqwest::Url = self
            .url
            .parse()
            .map_err(|_| Error::NoPrimaryUrl)?;

        StreamDownload::new_http(url, MemoryStorageProvider, Settings::default())
            .await
            .map_err(|e| Error::StreamInitializationError(e.to_string()))
    }
}

fn parse_range(value: &str) -> Option<(u64, u64)> {
    let (start, end) = value.split_once('-')?;
    let start = start.parse().ok()?;
    let end = end.parse().ok()?;
    (start <= end).then_some((start, end))
}

impl MusicClient {
    /// Get the stream URLs of a track.
    ///
    /// # Returns
    ///
    /// `Ok(None)` if there is no session, no deriver is configured, the deriver
    /// fails or a URL cannot be parsed; the error is passed to the error sink.
    /// An empty track id is an [`Error::InvalidArgument`].
    pub async fn stream_urls(&self, track_id: &str) -> Result<Option<Vec<StreamUrl>>, Error> {
        if track_id.is_empty() {
            return Err(Error::invalid_argument("track id must not be empty"));
        }

        let result = async {
            let session = self
                .get_session()
                .filter(|session| !session.is_expired())
                .ok_or(Error::NotAuthenticated)?;
            let deriver = self
                .get_stream_url_deriver()
                .ok_or(Error::NoStreamUrlDeriver)?;

            deriver
                .derive(track_id, &session)
                .await?
                .iter()
                .map(|url| StreamUrl::parse(url))
                .collect::<Result<Vec<_>, Error>>()
        }
        .await;

        match result {
            Ok(urls) => Ok(Some(urls)),
            Err(e) => {
                self.report("Obtaining stream URLs failed", &e);
                Ok(None)
            }
        }
    }

    /// Download a track's audio.
    ///
    /// A single URL is downloaded as is. Several URLs are byte ranges of one
    /// file: they are downloaded with at most [`MAX_PARALLEL_SEGMENTS`] requests
    /// in flight and each is copied to its offset in one buffer.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # async fn example(client: gmusicrs::MusicClient) -> Result<(), gmusicrs::Error> {
    /// if let Some(urls) = client.stream_urls("track-id").await? {
    ///     let audio = client.stream_audio(&urls).await?;
    ///     std::fs::write("track.mp3", audio).ok();
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn stream_audio(&self, urls: &[StreamUrl]) -> Result<Vec<u8>, Error> {
        if urls.is_empty() {
            return Err(Error::invalid_argument("no stream URLs given"));
        }

        let client = self.client.clone();
        fetch_segments(urls, move |url| {
            let client = client.clone();
            async move {
                let resp = client.get(&url).send().await?.error_for_status()?;
                Ok::<_, Error>(resp.bytes().await?.to_vec())
            }
        })
        .await
    }
}

// Downloads every URL with bounded concurrency and assembles the parts.
pub(crate) async fn fetch_segments<F, Fut>(urls: &[StreamUrl], fetch: F) -> Result<Vec<u8>, Error>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<Vec<u8>, Error>>,
{
    match urls {
        [] => return Err(Error::NoPrimaryUrl),
        [single] => return fetch(single.url.clone()).await,
        _ => {}
    }

    let ranges = urls
        .iter()
        .map(|url| {
            url.byte_range().ok_or_else(|| {
                Error::Decode(format!("segment URL has no byte range: {}", url.url))
            })
        })
        .collect::<Result<Vec<_>, Error>>()?;

    let size = ranges.iter().map(|range| range.end() + 1).max().unwrap_or(0);
    let buffer = Arc::new(Mutex::new(vec![0u8; size]));

    stream::iter(urls.iter().zip(ranges))
        .map(|(url, range)| {
            let fut = fetch(url.url.clone());
            async move { fut.await.map(|bytes| (range, bytes)) }
        })
        .buffer_unordered(MAX_PARALLEL_SEGMENTS)
        .try_for_each(|(range, bytes)| {
            let buffer = buffer.clone();
            async move {
                let start = *range.start();
                let end = start + bytes.len();
                let mut audio = buffer.lock().await;
                // A segment may be longer than its advertised range.
                if audio.len() < end {
                    audio.resize(end, 0);
                }
                audio[start..end].copy_from_slice(&bytes);
                Ok(())
            }
        })
        .await?;

    let audio = buffer.lock().await.clone();
    log::debug!("Assembled {} segments into {} bytes", urls.len(), audio.len());
    Ok(audio)
}
