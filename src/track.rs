//! Track selection for the decode direction

use bytes::Bytes;

use crate::driver::Chunk;
use crate::error::{PumpError, Result};
use crate::format::{AudioFormatDescriptor, AUDIO_PREFIX};

/// One track of a container as reported by its demuxer
#[derive(Debug, Clone)]
pub struct TrackInfo {
    /// Track position inside the container
    pub index: usize,
    /// Declared media type, e.g. `audio/mp4a-latm` or `video/avc`
    pub media_type: String,
    /// Sample rate and channels (zeroed for non-audio tracks)
    pub format: AudioFormatDescriptor,
    /// Codec-specific data (AudioSpecificConfig for AAC), possibly empty
    pub codec_config: Bytes,
}

impl TrackInfo {
    pub fn is_audio(&self) -> bool {
        self.media_type.starts_with(AUDIO_PREFIX)
    }
}

/// A demuxed container the decode direction reads samples from
pub trait TrackSource {
    /// All tracks, in container order.
    fn tracks(&self) -> &[TrackInfo];

    /// Restrict [`read_sample`](Self::read_sample) to the track at `index`.
    fn select_track(&mut self, index: usize) -> Result<()>;

    /// Copy the next sample of the selected track into `buf`.
    /// `None` once the track is exhausted.
    fn read_sample(&mut self, buf: &mut [u8]) -> Result<Option<Chunk>>;
}

/// Return the first track whose media type starts with `audio/`.
///
/// The caller still has to select the returned track on its source before
/// reading samples from it.
pub fn select_audio_track(tracks: &[TrackInfo]) -> Result<&TrackInfo> {
    let track = tracks
        .iter()
        .find(|t| t.is_audio())
        .ok_or(PumpError::NoAudioTrack)?;

    tracing::debug!(
        index = track.index,
        media_type = %track.media_type,
        "selected audio track"
    );
    Ok(track)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(index: usize, media_type: &str) -> TrackInfo {
        TrackInfo {
            index,
            media_type: media_type.to_string(),
            format: AudioFormatDescriptor::aac(44100, 1),
            codec_config: Bytes::new(),
        }
    }

    #[test]
    fn test_selects_first_audio_track() {
        let tracks = vec![track(0, "video/avc"), track(1, "audio/mp4a-latm")];
        let selected = select_audio_track(&tracks).unwrap();
        assert_eq!(selected.index, 1);
    }

    #[test]
    fn test_first_of_several_audio_tracks_wins() {
        let tracks = vec![
            track(0, "audio/opus"),
            track(1, "audio/mp4a-latm"),
            track(2, "video/hevc"),
        ];
        assert_eq!(select_audio_track(&tracks).unwrap().index, 0);
    }

    #[test]
    fn test_no_audio_track() {
        let tracks = vec![track(0, "video/avc"), track(1, "text/vtt")];
        assert!(matches!(
            select_audio_track(&tracks),
            Err(PumpError::NoAudioTrack)
        ));
    }

    #[test]
    fn test_empty_track_list() {
        assert!(matches!(select_audio_track(&[]), Err(PumpError::NoAudioTrack)));
    }

    #[test]
    fn test_prefix_match_is_exact() {
        let tracks = vec![track(0, "application/audio"), track(1, "AUDIO/aac")];
        assert!(select_audio_track(&tracks).is_err());
    }
}
