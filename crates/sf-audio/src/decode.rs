//! Whole-file decode via symphonia, used by [`crate::cpal_backend::CpalSymphoniaBackend`].
//!
//! Clips are decoded fully on load rather than streamed incrementally — this
//! engine's clips are short scene assets, not hour-long masters, so the
//! simplicity is worth the upfront memory cost.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::{AudioError, AudioResult};

/// A fully decoded clip, channels stored de-interleaved.
pub struct DecodedAudio {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn num_channels(&self) -> u16 {
        self.channels.len() as u16
    }

    pub fn num_frames(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }
}

pub fn decode_file<P: AsRef<Path>>(path: P) -> AudioResult<DecodedAudio> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| AudioError::StreamError(format!("opening '{}': {e}", path.display())))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| AudioError::StreamError(e.to_string()))?;

    let mut format_reader = probed.format;
    let track = format_reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| AudioError::StreamError("no audio track found".into()))?;

    let track_id = track.id;
    let num_channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(2);
    let sample_rate = track.codec_params.sample_rate.unwrap_or(48_000);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AudioError::StreamError(e.to_string()))?;

    let mut channels: Vec<Vec<f32>> = vec![Vec::new(); num_channels];

    loop {
        let packet = match format_reader.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(AudioError::StreamError(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(decoded) => copy_into(&decoded, &mut channels),
            Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
            Err(e) => return Err(AudioError::StreamError(e.to_string())),
        }
    }

    Ok(DecodedAudio { channels, sample_rate })
}

fn copy_into(buffer: &AudioBufferRef, out: &mut [Vec<f32>]) {
    macro_rules! copy_as_f32 {
        ($buf:expr, |$s:ident| $convert:expr) => {
            for (ch, out_ch) in out.iter_mut().enumerate() {
                if ch < $buf.spec().channels.count() {
                    out_ch.extend($buf.chan(ch).iter().map(|&$s| $convert));
                }
            }
        };
    }

    match buffer {
        AudioBufferRef::F32(buf) => copy_as_f32!(buf, |s| s),
        AudioBufferRef::F64(buf) => copy_as_f32!(buf, |s| s as f32),
        AudioBufferRef::S16(buf) => copy_as_f32!(buf, |s| s as f32 / 32_768.0),
        AudioBufferRef::S32(buf) => copy_as_f32!(buf, |s| s as f32 / 2_147_483_648.0),
        AudioBufferRef::U8(buf) => copy_as_f32!(buf, |s| (s as f32 - 128.0) / 128.0),
        AudioBufferRef::U16(buf) => copy_as_f32!(buf, |s| (s as f32 - 32_768.0) / 32_768.0),
        AudioBufferRef::S24(buf) => copy_as_f32!(buf, |s| s.0 as f32 / 8_388_608.0),
        AudioBufferRef::U24(buf) => copy_as_f32!(buf, |s| (s.0 as f32 - 8_388_608.0) / 8_388_608.0),
        AudioBufferRef::U32(buf) => copy_as_f32!(buf, |s| (s as f32 - 2_147_483_648.0) / 2_147_483_648.0),
        AudioBufferRef::S8(buf) => copy_as_f32!(buf, |s| s as f32 / 128.0),
    }
}
