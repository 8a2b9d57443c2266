//! Sound data storage: compressed sources and their decoded PCM buffers.
//!
//! Sounds are kept compressed ([`UnopenedSound`]) until first played, then
//! opened into an [`OpenSound`]. Short sounds decode fully into one driver
//! buffer; long sounds stream, decoding on demand into a growing set of
//! contiguous buffer regions so that loops and replays never decode the same
//! range twice.

use std::path::PathBuf;

use log::warn;

use crate::decoder::{DecodeInfo, Decoder, OggDecoder};
use crate::driver::{BufferId, SoundDriver};
use crate::types::{MAX_SINGLE_BUFFER_SECS, MIN_STREAM_BUFFER_SECS};

/// Result of a buffer lookup: the buffer covering the requested offset (or
/// `NULL` past the end or after a decode failure), the stream offset just
/// past it, and the requested offset relative to the buffer start.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BufferAt {
    pub buffer: BufferId,
    pub end: u64,
    pub offset_in_buffer: u64,
}

/// A decoded buffer and the stream offset just past its content. Its start
/// is implicit: the previous entry's `end`, or the region start.
struct BufferUntil {
    end: u64,
    buffer: BufferId,
}

/// A run of contiguous decoded buffers starting at `start`.
struct Region {
    start: u64,
    buffers: Vec<BufferUntil>,
}

impl Region {
    fn end(&self) -> u64 {
        // Regions are never empty.
        self.buffers.last().map_or(self.start, |b| b.end)
    }
}

/// A streamed sound: decoder plus the regions decoded so far.
///
/// Regions are sorted, non-overlapping and non-adjacent (adjacent regions
/// merge on creation).
pub(crate) struct StreamData {
    decoder: Box<dyn Decoder>,
    info: DecodeInfo,
    regions: Vec<Region>,
}

impl StreamData {
    /// Returns the buffer covering `offset`, decoding it first if needed.
    ///
    /// Past the end of the stream this returns `BufferId::NULL` with
    /// `end == length_samples`.
    pub(crate) fn get_or_load_buffer_at(
        &mut self,
        driver: &mut dyn SoundDriver,
        offset: u64,
    ) -> BufferAt {
        if offset >= self.info.length_samples {
            return BufferAt {
                buffer: BufferId::NULL,
                end: self.info.length_samples,
                offset_in_buffer: 0,
            };
        }

        // Right-most region with start <= offset; after_idx is the insertion
        // point for a region starting past offset.
        let after_idx = self.regions.partition_point(|r| r.start <= offset);
        if after_idx > 0 {
            let region = &self.regions[after_idx - 1];
            // Left-most buffer with end > offset.
            let i = region.buffers.partition_point(|b| b.end <= offset);
            if i < region.buffers.len() {
                let buf_start = if i == 0 {
                    region.start
                } else {
                    region.buffers[i - 1].end
                };
                return BufferAt {
                    buffer: region.buffers[i].buffer,
                    end: region.buffers[i].end,
                    offset_in_buffer: offset - buf_start,
                };
            }
        }

        self.load_buffer_at(driver, offset, after_idx)
    }

    /// Decodes a new buffer covering `offset` and splices it into the region
    /// list at `after_idx`.
    fn load_buffer_at(
        &mut self,
        driver: &mut dyn SoundDriver,
        offset: u64,
        after_idx: usize,
    ) -> BufferAt {
        let has_before = after_idx > 0;
        let has_after = after_idx < self.regions.len();

        let end_before = if has_before {
            self.regions[after_idx - 1].end()
        } else {
            0
        };
        let start_after = if has_after {
            self.regions[after_idx].start
        } else {
            self.info.length_samples
        };

        let min_len = (self.info.sample_rate as f32 * MIN_STREAM_BUFFER_SECS) as u64;

        // Find the actual bounds of the new buffer.
        let mut new_start = offset;
        let mut new_end = offset + min_len;

        // Don't load into the next region, or past the end.
        if new_end > start_after {
            new_end = start_after;
            // Also move the start to keep the minimum size, but not into the
            // previous region.
            if new_end - new_start < min_len {
                new_start = end_before.max(new_end.saturating_sub(min_len));
            }
        }

        // Widen if the space left to either neighbor is below the minimum,
        // to keep gaps worth decoding.
        if new_start - end_before < min_len {
            new_start = end_before;
        }
        if start_after - new_end < min_len {
            new_end = start_after;
        }

        // A failed decode is stored as NULL and never retried.
        let buffer = match self.decoder.decode(new_start, new_end) {
            Ok(pcm) => driver.create_buffer(self.info.channels, self.info.sample_rate, &pcm),
            Err(e) => {
                warn!(
                    "Failed to decode [{}, {}) of \"{}\": {}",
                    new_start, new_end, self.info.name, e
                );
                BufferId::NULL
            }
        };

        // Splice: extend the previous region if we touch it, otherwise
        // insert a fresh one.
        let region_idx = if has_before && new_start == end_before {
            after_idx - 1
        } else {
            self.regions.insert(
                after_idx,
                Region {
                    start: new_start,
                    buffers: Vec::new(),
                },
            );
            after_idx
        };
        self.regions[region_idx].buffers.push(BufferUntil {
            end: new_end,
            buffer,
        });

        // Merge with the following region if the ends meet.
        if has_after && new_end == start_after {
            let mut after = self.regions.remove(region_idx + 1);
            self.regions[region_idx].buffers.append(&mut after.buffers);
        }

        BufferAt {
            buffer,
            end: new_end,
            offset_in_buffer: offset - new_start,
        }
    }
}

/// A loaded sound ready for playback.
pub(crate) enum OpenSound {
    /// Short sound, fully decoded into one driver buffer.
    Single { info: DecodeInfo, buffer: BufferId },
    /// Long sound, decoded on demand.
    Stream(StreamData),
}

impl OpenSound {
    fn from_decoder(mut decoder: Box<dyn Decoder>, driver: &mut dyn SoundDriver) -> OpenSound {
        let info = decoder.info().clone();
        if info.length_seconds <= MAX_SINGLE_BUFFER_SECS {
            let buffer = match decoder.decode(0, info.length_samples) {
                Ok(pcm) => driver.create_buffer(info.channels, info.sample_rate, &pcm),
                Err(e) => {
                    warn!("Failed to load sound \"{}\": {}", info.name, e);
                    BufferId::NULL
                }
            };
            OpenSound::Single { info, buffer }
        } else {
            OpenSound::Stream(StreamData {
                decoder,
                info,
                regions: Vec::new(),
            })
        }
    }

    pub(crate) fn info(&self) -> &DecodeInfo {
        match self {
            OpenSound::Single { info, .. } => info,
            OpenSound::Stream(stream) => &stream.info,
        }
    }

    pub(crate) fn is_streaming(&self) -> bool {
        matches!(self, OpenSound::Stream(_))
    }

    /// Uniform buffer lookup for both variants.
    pub(crate) fn get_or_load_buffer_at(
        &mut self,
        driver: &mut dyn SoundDriver,
        offset: u64,
    ) -> BufferAt {
        match self {
            OpenSound::Single { info, buffer } => {
                if offset >= info.length_samples {
                    BufferAt {
                        buffer: BufferId::NULL,
                        end: info.length_samples,
                        offset_in_buffer: 0,
                    }
                } else {
                    BufferAt {
                        buffer: *buffer,
                        end: info.length_samples,
                        offset_in_buffer: offset,
                    }
                }
            }
            OpenSound::Stream(stream) => stream.get_or_load_buffer_at(driver, offset),
        }
    }
}

/// A sound kept compressed until first needed.
pub(crate) enum UnopenedSound {
    Bytes(Vec<u8>),
    File(PathBuf),
    /// Pre-built decoder, for custom codecs.
    Source(Box<dyn Decoder>),
}

impl UnopenedSound {
    /// Opens for playback, consuming the compressed form.
    pub(crate) fn open(self, name: &str, driver: &mut dyn SoundDriver) -> Option<OpenSound> {
        let decoder: Box<dyn Decoder> = match self {
            UnopenedSound::Bytes(data) => match OggDecoder::from_bytes(data, name) {
                Ok(dec) => Box::new(dec),
                Err(e) => {
                    warn!("Failed to open sound \"{}\": {}", name, e);
                    return None;
                }
            },
            UnopenedSound::File(path) => match OggDecoder::from_file(&path, name) {
                Ok(dec) => Box::new(dec),
                Err(e) => {
                    warn!("Failed to open sound \"{}\": {}", name, e);
                    return None;
                }
            },
            UnopenedSound::Source(decoder) => decoder,
        };
        Some(OpenSound::from_decoder(decoder, driver))
    }
}
