//! Library sync example demonstrating incremental synchronization.
//!
//! This example shows how to:
//! - Download the whole library once
//! - Cache it on disk between runs
//! - Fetch and apply only what changed since the last sync
//! - Browse the library by album and album artist
//!
//! Set `GMUSIC_AUTH_TOKEN` to a valid auth token before running.

use gmusicrs::{MusicClient, Session, Tracklist, group_by_album, group_by_album_artist};
use std::path::Path;

const CACHE_FILE: &str = "library_cache.json";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::init();

    let Ok(token) = std::env::var("GMUSIC_AUTH_TOKEN") else {
        println!("Set GMUSIC_AUTH_TOKEN to run this example.");
        return Ok(());
    };

    let client = MusicClient::new()
        .with_session(Session::new(token))
        .with_error_callback(|message, error| eprintln!("warning: {message}: {error}"));

    // Load the cached library, or download everything on first run
    let tracks = if Path::new(CACHE_FILE).exists() {
        let mut tracks: Tracklist = serde_json::from_str(&std::fs::read_to_string(CACHE_FILE)?)?;
        println!(
            "Loaded {} cached tracks (last synced {})",
            tracks.len(),
            tracks.last_updated()
        );

        if client.update_tracks(&mut tracks).await {
            println!("Library changed: now {} tracks", tracks.len());
        } else {
            println!("Library unchanged");
        }
        tracks
    } else {
        println!("No cache found, downloading the whole library...");
        match client.get_all_tracks().await {
            Some(tracks) => tracks,
            None => {
                println!("Download failed.");
                return Ok(());
            }
        }
    };

    std::fs::write(CACHE_FILE, serde_json::to_string(&tracks)?)?;

    // Browse by album artist
    println!("\nAlbum artists:");
    for artist in group_by_album_artist(&tracks).iter().take(10) {
        println!("  {} ({} tracks)", artist.album_artist, artist.tracks.len());
    }

    // Browse by album
    println!("\nAlbums:");
    for album in group_by_album(&tracks).iter().take(10) {
        println!("  {} - {}", album.album_artist, album.album);
        for track in &album.tracks {
            println!(
                "    {:>2}. {} ({}:{:02})",
                track.track_number,
                track.title,
                track.duration_millis / 60_000,
                (track.duration_millis / 1000) % 60
            );
        }
    }

    // Sorted views
    println!("\nFirst tracks by title:");
    for track in tracks.sorted_by_title().iter().take(5) {
        println!("  {} - {}", track.title, track.artist_unified());
    }

    Ok(())
}
