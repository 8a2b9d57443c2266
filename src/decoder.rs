//! Codec boundary: opaque decode-ready handles to compressed audio.
//!
//! The engine treats the codec as a service: open a byte stream, query its
//! metadata, decode an arbitrary range of sample frames. The built-in
//! [`OggDecoder`] uses the `lewton` crate for pure Rust Ogg Vorbis decoding;
//! embedders can plug other codecs (or test stubs) through the [`Decoder`]
//! trait.

use std::io::Cursor;
use std::path::Path;

use lewton::inside_ogg::OggStreamReader;
use log::warn;

/// Error type for decoder operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// File not found or unreadable.
    #[error("file not found: {0}")]
    NotFound(String),
    /// Invalid or corrupted audio data.
    #[error("invalid audio data: {0}")]
    InvalidData(String),
    /// The stream decodes but the engine cannot play it.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    /// Generic decoder error.
    #[error("decoder error: {0}")]
    DecoderError(String),
}

/// Result type for decoder operations.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Metadata of an opened sound, queried once at open time.
#[derive(Debug, Clone)]
pub struct DecodeInfo {
    /// Sound name, for log messages.
    pub name: String,
    /// 1 (mono) or 2 (stereo).
    pub channels: u16,
    /// Sample frames per second.
    pub sample_rate: u32,
    /// Total length in sample frames.
    pub length_samples: u64,
    /// Total length in seconds.
    pub length_seconds: f32,
}

/// A decode-ready handle to one sound.
///
/// Implementations produce interleaved signed 16-bit PCM. Seeking strategy is
/// the implementation's business; the engine only ever asks for ranges.
pub trait Decoder: Send {
    /// Cached metadata of the stream.
    fn info(&self) -> &DecodeInfo;

    /// Decode exactly the sample frames `[start, end)` as interleaved i16
    /// PCM (`(end - start) * channels` values).
    fn decode(&mut self, start: u64, end: u64) -> DecodeResult<Vec<i16>>;
}

/// Finds the granule position of the last Ogg page, which for a Vorbis
/// stream is the total number of sample frames.
///
/// Searches the final 64 KiB for the last `OggS` capture pattern with a
/// valid granule.
fn last_granule_position(data: &[u8]) -> Option<u64> {
    let search_start = data.len().saturating_sub(65536);
    let window = &data[search_start..];

    for i in (0..window.len().saturating_sub(27)).rev() {
        if window[i..].starts_with(b"OggS") && i + 14 <= window.len() {
            // Granule position is at byte offset 6, little-endian u64.
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&window[i + 6..i + 14]);
            let granule = u64::from_le_bytes(raw);
            // -1 means "no granule on this page"; keep searching backwards.
            if granule != u64::MAX {
                return Some(granule);
            }
        }
    }
    None
}

/// Ogg Vorbis decoder backed by `lewton`.
///
/// lewton has no native seeking, so backwards seeks rewind the stream
/// (recreating the reader over the retained compressed bytes) and skip
/// forward by decoding and discarding.
pub struct OggDecoder {
    data: Vec<u8>,
    reader: OggStreamReader<Cursor<Vec<u8>>>,
    info: DecodeInfo,
    /// Frame index of `sample_buffer[buffer_pos]`.
    next_frame: u64,
    /// Interleaved samples of the most recently decoded packet.
    sample_buffer: Vec<i16>,
    buffer_pos: usize,
}

impl OggDecoder {
    /// Opens an Ogg Vorbis stream held in memory.
    pub fn from_bytes(data: Vec<u8>, name: &str) -> DecodeResult<Self> {
        let reader = OggStreamReader::new(Cursor::new(data.clone())).map_err(|e| {
            DecodeError::InvalidData(format!("failed to open Ogg stream \"{}\": {:?}", name, e))
        })?;

        let channels = reader.ident_hdr.audio_channels as u16;
        if channels != 1 && channels != 2 {
            return Err(DecodeError::UnsupportedFormat(format!(
                "sound \"{}\" is neither mono nor stereo ({} channels)",
                name, channels
            )));
        }

        let sample_rate = reader.ident_hdr.audio_sample_rate;
        let length_samples = last_granule_position(&data).ok_or_else(|| {
            DecodeError::InvalidData(format!("could not determine length of \"{}\"", name))
        })?;

        let info = DecodeInfo {
            name: name.to_owned(),
            channels,
            sample_rate,
            length_samples,
            length_seconds: length_samples as f32 / sample_rate as f32,
        };

        Ok(OggDecoder {
            data,
            reader,
            info,
            next_frame: 0,
            sample_buffer: Vec::new(),
            buffer_pos: 0,
        })
    }

    /// Opens an Ogg Vorbis file from the file system.
    pub fn from_file(path: &Path, name: &str) -> DecodeResult<Self> {
        let data = std::fs::read(path)
            .map_err(|e| DecodeError::NotFound(format!("{}: {}", path.display(), e)))?;
        Self::from_bytes(data, name)
    }

    /// Rewind to the start of the stream by recreating the reader.
    fn rewind(&mut self) -> DecodeResult<()> {
        self.reader = OggStreamReader::new(Cursor::new(self.data.clone())).map_err(|e| {
            DecodeError::DecoderError(format!(
                "failed to rewind \"{}\": {:?}",
                self.info.name, e
            ))
        })?;
        self.next_frame = 0;
        self.sample_buffer.clear();
        self.buffer_pos = 0;
        Ok(())
    }

    /// Decode the next packet into `sample_buffer`. Returns false at end of
    /// stream.
    fn decode_next_packet(&mut self) -> DecodeResult<bool> {
        match self.reader.read_dec_packet_itl() {
            Ok(Some(samples)) => {
                self.sample_buffer = samples;
                self.buffer_pos = 0;
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => Err(DecodeError::DecoderError(format!(
                "Ogg decode error in \"{}\": {:?}",
                self.info.name, e
            ))),
        }
    }

    /// Frames still unconsumed in the current packet buffer.
    fn frames_buffered(&self) -> u64 {
        ((self.sample_buffer.len() - self.buffer_pos) / self.info.channels as usize) as u64
    }

    /// Advance past `frames` without copying them out.
    fn skip_frames(&mut self, frames: u64) {
        self.buffer_pos += frames as usize * self.info.channels as usize;
        self.next_frame += frames;
    }
}

impl Decoder for OggDecoder {
    fn info(&self) -> &DecodeInfo {
        &self.info
    }

    fn decode(&mut self, start: u64, end: u64) -> DecodeResult<Vec<i16>> {
        debug_assert!(start <= end && end <= self.info.length_samples);

        // Backwards target: rewind and skip forward from the start.
        if start < self.next_frame {
            self.rewind()?;
        }

        // Skip to `start`.
        while self.next_frame < start {
            if self.frames_buffered() == 0 {
                if !self.decode_next_packet()? {
                    return Err(DecodeError::DecoderError(format!(
                        "stream \"{}\" ended at frame {} before requested frame {}",
                        self.info.name, self.next_frame, start
                    )));
                }
                continue;
            }
            let to_skip = self.frames_buffered().min(start - self.next_frame);
            self.skip_frames(to_skip);
        }

        // Collect [start, end).
        let channels = self.info.channels as usize;
        let mut out = Vec::with_capacity((end - start) as usize * channels);
        while self.next_frame < end {
            if self.frames_buffered() == 0 {
                if !self.decode_next_packet()? {
                    return Err(DecodeError::DecoderError(format!(
                        "stream \"{}\" ended at frame {} before requested frame {}",
                        self.info.name, self.next_frame, end
                    )));
                }
                continue;
            }
            let to_copy = self.frames_buffered().min(end - self.next_frame);
            let samples = to_copy as usize * channels;
            out.extend_from_slice(&self.sample_buffer[self.buffer_pos..self.buffer_pos + samples]);
            self.skip_frames(to_copy);
        }

        Ok(out)
    }
}

/// Decoder that produces silence.
///
/// Stands in for real audio on headless builds and in tests where only the
/// buffering and lifetime behavior matters.
pub struct NullDecoder {
    info: DecodeInfo,
}

impl NullDecoder {
    pub fn new(name: &str, channels: u16, sample_rate: u32, length_samples: u64) -> Self {
        if channels != 1 && channels != 2 {
            warn!("NullDecoder: \"{}\" clamping {} channels to stereo", name, channels);
        }
        NullDecoder {
            info: DecodeInfo {
                name: name.to_owned(),
                channels: channels.clamp(1, 2),
                sample_rate,
                length_samples,
                length_seconds: length_samples as f32 / sample_rate as f32,
            },
        }
    }
}

impl Decoder for NullDecoder {
    fn info(&self) -> &DecodeInfo {
        &self.info
    }

    fn decode(&mut self, start: u64, end: u64) -> DecodeResult<Vec<i16>> {
        debug_assert!(start <= end && end <= self.info.length_samples);
        Ok(vec![0i16; (end - start) as usize * self.info.channels as usize])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_invalid_bytes_fails() {
        let result = OggDecoder::from_bytes(vec![0u8; 256], "garbage");
        assert!(matches!(result, Err(DecodeError::InvalidData(_))));
    }

    #[test]
    fn test_open_missing_file_fails() {
        let result = OggDecoder::from_file(Path::new("/nonexistent/nope.ogg"), "nope");
        assert!(matches!(result, Err(DecodeError::NotFound(_))));
    }

    #[test]
    fn test_last_granule_scan() {
        // Minimal fake page: capture pattern, version, header type, then the
        // granule position as little-endian u64.
        let mut page = Vec::new();
        page.extend_from_slice(b"OggS");
        page.extend_from_slice(&[0, 4]);
        page.extend_from_slice(&123_456u64.to_le_bytes());
        page.extend_from_slice(&[0u8; 16]);

        let mut data = vec![0u8; 100];
        data.extend_from_slice(&page);
        data.extend_from_slice(&[0u8; 40]);

        assert_eq!(last_granule_position(&data), Some(123_456));
    }

    #[test]
    fn test_last_granule_skips_no_granule_pages() {
        let mut data = Vec::new();
        for granule in [77u64, u64::MAX] {
            data.extend_from_slice(b"OggS");
            data.extend_from_slice(&[0, 0]);
            data.extend_from_slice(&granule.to_le_bytes());
            data.extend_from_slice(&[0u8; 20]);
        }
        // The trailing page carries no granule, so the earlier one counts.
        assert_eq!(last_granule_position(&data), Some(77));
    }

    #[test]
    fn test_null_decoder_range_size() {
        let mut dec = NullDecoder::new("quiet", 2, 48000, 48000);
        let pcm = dec.decode(100, 1100).unwrap();
        assert_eq!(pcm.len(), 1000 * 2);
        assert!(pcm.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::NotFound("test.ogg".to_string());
        assert_eq!(format!("{}", err), "file not found: test.ogg");
    }
}
