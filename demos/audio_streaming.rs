//! Audio streaming example demonstrating how to download track audio.
//!
//! This example shows how to:
//! - Plug a stream URL deriver into the client
//! - Inspect stream URLs (expiry, byte ranges)
//! - Download multi-segment audio into one buffer
//! - Open a buffered, seekable stream
//!
//! Signed stream URLs are produced outside this crate. This example takes them
//! from the `GMUSIC_STREAM_URLS` environment variable (space separated) so any
//! signing tool can be used.
//!
//! Set `GMUSIC_AUTH_TOKEN` and `GMUSIC_STREAM_URLS` before running.

use gmusicrs::{Error, MusicClient, Session, StreamUrlDeriver};
use std::io::Read;

/// Hands out the same pre-signed URLs for every track.
struct PresignedUrls(Vec<String>);

#[async_trait::async_trait]
impl StreamUrlDeriver for PresignedUrls {
    async fn derive(&self, _track_id: &str, _session: &Session) -> Result<Vec<String>, Error> {
        Ok(self.0.clone())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::init();

    let (Ok(token), Ok(urls)) = (
        std::env::var("GMUSIC_AUTH_TOKEN"),
        std::env::var("GMUSIC_STREAM_URLS"),
    ) else {
        println!("Set GMUSIC_AUTH_TOKEN and GMUSIC_STREAM_URLS to run this example.");
        return Ok(());
    };

    let urls: Vec<String> = urls.split_whitespace().map(str::to_string).collect();

    let client = MusicClient::new()
        .with_session(Session::new(token))
        .with_stream_url_deriver(PresignedUrls(urls))
        .with_error_callback(|message, error| eprintln!("warning: {message}: {error}"));

    let Some(stream_urls) = client.stream_urls("example-track").await? else {
        println!("Could not obtain stream URLs.");
        return Ok(());
    };

    for url in &stream_urls {
        match (url.range, url.expires) {
            (Some((start, end)), Some(expires)) => {
                println!("Segment {start}-{end}, expires {expires}")
            }
            (None, Some(expires)) => println!("Whole file, expires {expires}"),
            _ => println!("URL without expiry: {}", url.url),
        }
        if url.is_expired() {
            println!("  warning: this URL has already expired");
        }
    }

    // Download everything into memory
    println!("\nDownloading audio...");
    let audio = client.stream_audio(&stream_urls).await?;
    println!("Downloaded {} bytes", audio.len());
    std::fs::write("track.mp3", &audio)?;
    println!("Saved to track.mp3");

    // Or stream a single URL through a seekable buffer
    if let [url] = stream_urls.as_slice() {
        println!("\nStreaming the first 64 KiB...");
        let mut reader = url.stream().await?;
        let head = tokio::task::spawn_blocking(move || {
            let mut head = vec![0u8; 64 * 1024];
            let read = reader.read(&mut head).unwrap_or(0);
            head.truncate(read);
            head
        })
        .await?;
        println!("Read {} bytes from the stream", head.len());
    }

    Ok(())
}
