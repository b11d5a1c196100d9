//! Manifest fixtures.

use std::{sync::Arc, time::Duration};

use url::Url;
use vireo_media::{
    ChunkDescriptor, Manifest, ManifestInfo, MediaKind, QualityLevel, StreamDescriptor,
};

pub const VIDEO_LADDER: [u64; 4] = [300_000, 800_000, 1_500_000, 3_000_000];
pub const AUDIO_LADDER: [u64; 2] = [64_000, 128_000];
pub const CHUNK: Duration = Duration::from_secs(2);

pub fn base_url() -> Url {
    Url::parse("https://cdn.example.com/show/manifest.ism/").unwrap()
}

pub fn stream_descriptor(
    kind: MediaKind,
    language: Option<&str>,
    ladder: &[u64],
    chunks: usize,
    chunk_duration: Duration,
) -> StreamDescriptor {
    StreamDescriptor {
        kind,
        name: kind.to_string(),
        language: language.map(str::to_owned),
        url_template: format!("QualityLevels({{bitrate}})/Fragments({kind}={{start_time}})"),
        bitrates: ladder.iter().copied().map(QualityLevel::new).collect(),
        chunks: vec![ChunkDescriptor::new(chunk_duration); chunks],
    }
}

/// Stream 0: video; stream 1: English audio; stream 2: French audio.
pub fn av_manifest_info(chunks: usize, chunk_duration: Duration) -> ManifestInfo {
    ManifestInfo {
        duration: None,
        streams: vec![
            stream_descriptor(MediaKind::Video, None, &VIDEO_LADDER, chunks, chunk_duration),
            stream_descriptor(MediaKind::Audio, Some("en"), &AUDIO_LADDER, chunks, chunk_duration),
            stream_descriptor(MediaKind::Audio, Some("fr"), &AUDIO_LADDER, chunks, chunk_duration),
        ],
        ad_points: Vec::new(),
    }
}

pub fn video_only_info(chunks: usize, chunk_duration: Duration) -> ManifestInfo {
    ManifestInfo {
        duration: None,
        streams: vec![stream_descriptor(
            MediaKind::Video,
            None,
            &VIDEO_LADDER,
            chunks,
            chunk_duration,
        )],
        ad_points: Vec::new(),
    }
}

pub fn manifest(info: ManifestInfo) -> Arc<Manifest> {
    Arc::new(Manifest::from_info(info, base_url()).unwrap())
}
