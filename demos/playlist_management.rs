//! Playlist management example demonstrating how to work with playlists.
//!
//! This example shows how to:
//! - Get the user's playlists with their entries, shared playlists included
//! - Create a new playlist
//! - Add tracks to a playlist
//! - Reorder and remove entries
//! - Keep the playlist collection up to date
//! - Delete a playlist
//!
//! Set `GMUSIC_AUTH_TOKEN` to a valid auth token before running.

use gmusicrs::{MusicClient, Session, fill_placeholder_tracks};

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

    // Get user's existing playlists
    println!("Getting user's playlists...");
    let Some(mut playlists) = client.get_all_playlists().await else {
        println!("Could not fetch playlists.");
        return Ok(());
    };

    // Entries of library tracks only carry the track id; fill them in from the library
    if let Some(tracks) = client.get_all_tracks().await {
        playlists = fill_placeholder_tracks(&playlists, &tracks);
    }

    println!("Found {} playlists:", playlists.len());
    for playlist in &playlists {
        let owner = if playlist.is_shared() {
            format!(" (shared by {})", playlist.owner_name)
        } else {
            String::new()
        };
        println!(
            "  - {}{} ({} tracks) - {}",
            playlist.name,
            owner,
            playlist.entries.len(),
            playlist.id
        );
        for track in playlist.tracks().take(3) {
            println!("      {} - {}", track.artist_unified(), track.title);
        }
    }

    // Create a new playlist
    println!("\nCreating a new playlist...");
    let Some(playlist_id) = client
        .create_playlist("gmusicrs Test Playlist", Some("A test playlist created with gmusicrs"))
        .await?
    else {
        println!("Playlist creation failed.");
        return Ok(());
    };
    println!("Created playlist: {playlist_id}");

    // Add the first few library tracks
    let track_ids: Vec<String> = playlists
        .iter()
        .flat_map(|playlist| playlist.entries.iter())
        .filter(|entry| entry.source == 1)
        .map(|entry| entry.track_id.clone())
        .take(3)
        .collect();

    if !track_ids.is_empty() {
        let ids: Vec<&str> = track_ids.iter().map(String::as_str).collect();
        println!("\nAdding {} tracks to the playlist...", ids.len());
        client.add_to_playlist(&playlist_id, &ids).await?;
    }

    // Pick up our own changes
    println!("\nSynchronizing playlists...");
    if client.update_playlists(&mut playlists).await {
        println!("Playlists changed");
    }

    if let Some(playlist) = playlists.get(&playlist_id) {
        println!("Playlist '{}' now has {} entries", playlist.name, playlist.entries.len());

        // Move the last entry to the front
        if let [first, .., last] = playlist.entries.as_slice() {
            println!("\nMoving the last entry to the front...");
            client.reorder_playlist_entry(last, None, Some(first)).await?;
        }

        // Remove the first entry
        if let Some(entry) = playlist.entries.first() {
            println!("Removing entry {}...", entry.id);
            client.remove_from_playlist(&[entry.id.as_str()]).await?;
        }
    }

    client
        .rename_playlist(&playlist_id, "gmusicrs Test Playlist (renamed)", None)
        .await?;

    // Clean up
    println!("\nDeleting the test playlist...");
    if client.delete_playlist(&playlist_id).await? {
        println!("Deleted.");
    }

    Ok(())
}
