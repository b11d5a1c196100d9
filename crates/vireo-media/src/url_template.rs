use url::Url;

use crate::{ChunkRequestInfo, MediaResult, UrlGenerator};

/// Canonical [`UrlGenerator`]: fills the stream's URL template and joins the
/// result onto the manifest base URL.
///
/// Placeholders:
/// - `{bitrate}`: bitrate in bits per second;
/// - `{start_time}`: chunk start in 100 ns ticks;
/// - `{chunk}`: chunk index.
#[derive(Clone, Copy, Debug, Default)]
pub struct TemplateUrlGenerator;

impl TemplateUrlGenerator {
    const NANOS_PER_TICK: u128 = 100;

    pub fn expand(info: &ChunkRequestInfo) -> String {
        let ticks = info.start.as_nanos() / Self::NANOS_PER_TICK;
        info.template
            .replace("{bitrate}", &info.bitrate.to_string())
            .replace("{start_time}", &ticks.to_string())
            .replace("{chunk}", &info.chunk_id.to_string())
    }
}

impl UrlGenerator for TemplateUrlGenerator {
    fn chunk_url(&self, info: &ChunkRequestInfo) -> MediaResult<Url> {
        Ok(info.base_url.join(&Self::expand(info))?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::rstest;

    use super::*;
    use crate::MediaKind;

    fn request(template: &str, start: Duration) -> ChunkRequestInfo {
        ChunkRequestInfo {
            base_url: Url::parse("https://cdn.example.com/show/manifest.ism/").unwrap(),
            template: template.into(),
            stream_id: 0,
            chunk_id: 7,
            kind: MediaKind::Video,
            bitrate: 800_000,
            start,
            duration: Duration::from_secs(2),
        }
    }

    #[rstest]
    #[case(
        "QualityLevels({bitrate})/Fragments(video={start_time})",
        Duration::from_secs(14),
        "https://cdn.example.com/show/manifest.ism/QualityLevels(800000)/Fragments(video=140000000)"
    )]
    #[case(
        "video/{bitrate}/seg-{chunk}.m4s",
        Duration::ZERO,
        "https://cdn.example.com/show/manifest.ism/video/800000/seg-7.m4s"
    )]
    #[case(
        "/absolute/{chunk}",
        Duration::ZERO,
        "https://cdn.example.com/absolute/7"
    )]
    fn expands_template(#[case] template: &str, #[case] start: Duration, #[case] expected: &str) {
        let url = TemplateUrlGenerator.chunk_url(&request(template, start)).unwrap();
        assert_eq!(url.as_str(), expected);
    }

    #[test]
    fn sub_tick_precision_is_truncated() {
        let info = request("{start_time}", Duration::from_nanos(1_999));
        assert_eq!(TemplateUrlGenerator::expand(&info), "19");
    }
}
