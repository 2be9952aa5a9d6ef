//! Mapping between FFmpeg codec ids and media type strings

use ffmpeg_next as ffmpeg;
use ffmpeg_next::codec::Id;
use ffmpeg_next::media::Type as Medium;

use crate::format::{MIME_AAC, MIME_RAW};

const KNOWN: &[(Id, &str)] = &[
    (Id::AAC, MIME_AAC),
    (Id::MP3, "audio/mpeg"),
    (Id::OPUS, "audio/opus"),
    (Id::VORBIS, "audio/vorbis"),
    (Id::FLAC, "audio/flac"),
    (Id::AC3, "audio/ac3"),
    (Id::EAC3, "audio/eac3"),
    (Id::PCM_S16LE, MIME_RAW),
    (Id::H264, "video/avc"),
    (Id::HEVC, "video/hevc"),
    (Id::VP8, "video/x-vnd.on2.vp8"),
    (Id::VP9, "video/x-vnd.on2.vp9"),
    (Id::AV1, "video/av01"),
];

/// Media type string for a stream, e.g. `audio/mp4a-latm` for AAC.
///
/// Codecs without a well-known name map to `<medium>/x-<codec name>`.
pub fn media_type_for(id: Id, medium: Medium) -> String {
    if let Some((_, mime)) = KNOWN.iter().find(|(known, _)| *known == id) {
        return (*mime).to_string();
    }
    let prefix = match medium {
        Medium::Audio => "audio",
        Medium::Video => "video",
        Medium::Subtitle => "text",
        _ => return "application/octet-stream".to_string(),
    };
    format!("{}/x-{}", prefix, id.name())
}

/// Codec id for a media type produced by [`media_type_for`].
pub fn codec_id_for(media_type: &str) -> Option<Id> {
    if let Some((id, _)) = KNOWN.iter().find(|(_, mime)| *mime == media_type) {
        return Some(*id);
    }
    let name = media_type.split_once("/x-")?.1;
    ffmpeg::codec::decoder::find_by_name(name).map(|codec| codec.id())
}
