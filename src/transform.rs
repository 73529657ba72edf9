//! Transform engine: decode, convert, normalize, waveform extraction.
//!
//! Each stage takes bytes or a decoded clip and returns a result, so the
//! queue processor composes them with ordinary sequential control flow.

use std::io::Cursor;

use hound::{WavSpec, WavWriter};
use log::debug;
use ogg::writing::PacketWriter;
use opus::{Application, Bitrate as OpusBitrate, Channels, Encoder as OpusEncoder};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::audio::{create_opus_comment_header, create_opus_id_header, resample};
use crate::constants::{MAX_WAVEFORM_RESOLUTION, MIN_WAVEFORM_RESOLUTION};
use crate::error::PipelineError;
use crate::model::AudioFormat;

const OPUS_SAMPLE_RATE: u32 = 48000;
const OPUS_FRAME_SIZE: usize = 960;
const OPUS_BITRATE_BPS: i32 = 16_000;

/// Peak normalization target, ~-1 dBFS.
const NORMALIZE_TARGET: f64 = 0.891;

/// Waveform SVG canvas.
const SVG_WIDTH: f32 = 800.0;
const SVG_HEIGHT: f32 = 200.0;
const SVG_MIDLINE: f32 = 100.0;
const SVG_AMPLITUDE: f32 = 100.0 * 0.8;

/// A decoded mono clip.
#[derive(Debug, Clone)]
pub struct DecodedClip {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl DecodedClip {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Decode an audio byte buffer into mono 16-bit PCM.
///
/// Multi-channel input is averaged down to mono the same way the decode loop
/// of a recording session does. Decode failures are unrecoverable: corrupt
/// audio will not get better on retry.
pub fn decode_to_mono(bytes: &[u8], format: AudioFormat) -> Result<DecodedClip, PipelineError> {
    if !format.is_decodable() {
        return Err(PipelineError::UnsupportedFormat(format!(
            "{} cannot be decoded; convert before re-reading",
            format.as_str()
        )));
    }
    if bytes.is_empty() {
        return Err(PipelineError::Processing("empty audio payload".to_string()));
    }

    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());

    let mut hint = Hint::new();
    hint.with_extension(format.as_str());

    let format_opts = FormatOptions::default();
    let metadata_opts = MetadataOptions::default();

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &format_opts, &metadata_opts)
        .map_err(|e| PipelineError::processing("probe failed", e))?;

    let mut reader = probed.format;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .ok_or_else(|| PipelineError::Processing("no audio track found".to_string()))?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let decoder_opts = DecoderOptions::default();
    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &decoder_opts)
        .map_err(|e| PipelineError::processing("unsupported codec", e))?;

    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| PipelineError::Processing("unknown sample rate".to_string()))?;
    let channels = codec_params
        .channels
        .ok_or_else(|| PipelineError::Processing("unknown channel count".to_string()))?
        .count();

    let mut mono: Vec<i16> = Vec::new();
    let mut packets_decoded = 0usize;

    loop {
        match reader.next_packet() {
            Ok(packet) => {
                if packet.track_id() != track_id {
                    continue;
                }
                match decoder.decode(&packet) {
                    Ok(decoded) => {
                        let spec = *decoded.spec();
                        let capacity = decoded.capacity() as u64;

                        let mut sample_buf = SampleBuffer::<i16>::new(capacity, spec);
                        sample_buf.copy_interleaved_ref(decoded);
                        let samples = sample_buf.samples();

                        if channels <= 1 {
                            mono.extend_from_slice(samples);
                        } else {
                            mono.extend(samples.chunks(channels).map(|chunk| {
                                let sum: i32 = chunk.iter().map(|&s| s as i32).sum();
                                (sum / chunk.len() as i32) as i16
                            }));
                        }
                        packets_decoded += 1;
                    }
                    Err(symphonia::core::errors::Error::DecodeError(e)) => {
                        // Skip the damaged packet, keep the clip
                        debug!("Skipping undecodable packet: {}", e);
                        continue;
                    }
                    Err(e) => {
                        return Err(PipelineError::processing("decode failed", e));
                    }
                }
            }
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => {
                return Err(PipelineError::processing("format read failed", e));
            }
        }
    }

    if mono.is_empty() {
        return Err(PipelineError::Processing(
            "no audio samples decoded".to_string(),
        ));
    }
    debug!(
        "Decoded {} mono samples from {} packets ({} Hz)",
        mono.len(),
        packets_decoded,
        sample_rate
    );

    Ok(DecodedClip {
        samples: mono,
        sample_rate,
    })
}

/// Re-encode a decoded clip into the target container/codec.
/// Returns the encoded bytes and the format tag for the new artifact.
pub fn convert(clip: &DecodedClip, target: AudioFormat) -> Result<Vec<u8>, PipelineError> {
    match target {
        AudioFormat::Wav => encode_wav(clip),
        AudioFormat::Opus => encode_opus_ogg(clip),
        other => Err(PipelineError::UnsupportedFormat(format!(
            "{} is not a supported conversion target",
            other.as_str()
        ))),
    }
}

fn encode_wav(clip: &DecodedClip) -> Result<Vec<u8>, PipelineError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: clip.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)
            .map_err(|e| PipelineError::processing("WAV writer", e))?;
        for &sample in &clip.samples {
            writer
                .write_sample(sample)
                .map_err(|e| PipelineError::processing("WAV write", e))?;
        }
        writer
            .finalize()
            .map_err(|e| PipelineError::processing("WAV finalize", e))?;
    }
    Ok(cursor.into_inner())
}

fn encode_opus_ogg(clip: &DecodedClip) -> Result<Vec<u8>, PipelineError> {
    let mut encoder = OpusEncoder::new(OPUS_SAMPLE_RATE, Channels::Mono, Application::Voip)
        .map_err(|e| PipelineError::processing("Opus encoder", e))?;
    encoder
        .set_bitrate(OpusBitrate::Bits(OPUS_BITRATE_BPS))
        .map_err(|e| PipelineError::processing("Opus bitrate", e))?;

    let resampled = resample(&clip.samples, clip.sample_rate, OPUS_SAMPLE_RATE);
    let duration_secs = resampled.len() as f64 / OPUS_SAMPLE_RATE as f64;

    let mut ogg_data = Vec::new();
    {
        let mut writer = PacketWriter::new(&mut ogg_data);
        let serial = 1;

        writer
            .write_packet(
                create_opus_id_header(1, OPUS_SAMPLE_RATE),
                serial,
                ogg::writing::PacketWriteEndInfo::EndPage,
                0,
            )
            .map_err(|e| PipelineError::processing("OpusHead write", e))?;
        writer
            .write_packet(
                create_opus_comment_header(Some(duration_secs)),
                serial,
                ogg::writing::PacketWriteEndInfo::EndPage,
                0,
            )
            .map_err(|e| PipelineError::processing("OpusTags write", e))?;

        let mut encode_output = vec![0u8; 8192];
        let mut granule_pos: u64 = 0;
        let mut frames = resampled.chunks(OPUS_FRAME_SIZE).peekable();
        let mut tail = vec![0i16; OPUS_FRAME_SIZE];

        while let Some(frame) = frames.next() {
            // Pad the final short frame with silence
            let frame = if frame.len() == OPUS_FRAME_SIZE {
                frame
            } else {
                tail[..frame.len()].copy_from_slice(frame);
                tail[frame.len()..].fill(0);
                &tail[..]
            };

            let len = encoder
                .encode(frame, &mut encode_output)
                .map_err(|e| PipelineError::processing("Opus encode", e))?;
            granule_pos += OPUS_FRAME_SIZE as u64;

            let end_info = if frames.peek().is_none() {
                ogg::writing::PacketWriteEndInfo::EndStream
            } else {
                ogg::writing::PacketWriteEndInfo::NormalPacket
            };
            writer
                .write_packet(encode_output[..len].to_vec(), serial, end_info, granule_pos)
                .map_err(|e| PipelineError::processing("Ogg write", e))?;
        }
    }

    Ok(ogg_data)
}

/// Peak-normalize a clip to a fixed target loudness. A silent clip passes
/// through unchanged.
pub fn normalize(clip: &DecodedClip) -> DecodedClip {
    let peak = clip
        .samples
        .iter()
        .map(|&s| (s as i32).unsigned_abs())
        .max()
        .unwrap_or(0);
    if peak == 0 {
        return clip.clone();
    }

    let scale = NORMALIZE_TARGET * i16::MAX as f64 / peak as f64;
    let samples = clip
        .samples
        .iter()
        .map(|&s| {
            let scaled = s as f64 * scale;
            scaled.clamp(i16::MIN as f64, i16::MAX as f64) as i16
        })
        .collect();

    DecodedClip {
        samples,
        sample_rate: clip.sample_rate,
    }
}

/// Reserved noise-reduction stage. Currently a pass-through; it exists so
/// operation lists that request it still report progress and succeed.
pub fn denoise(clip: &DecodedClip) -> DecodedClip {
    clip.clone()
}

/// Clamp a caller-supplied waveform resolution into the supported range.
pub fn clamp_resolution(resolution: usize) -> usize {
    resolution.clamp(MIN_WAVEFORM_RESOLUTION, MAX_WAVEFORM_RESOLUTION)
}

/// Downsample a decoded mono clip into exactly `resolution` normalized
/// amplitude samples in [-1, 1].
///
/// Each bucket keeps its peak-magnitude sample (sign preserved) divided by
/// the clip's maximum absolute sample, so unless the clip is silent at least
/// one output value has absolute value 1.
pub fn generate_waveform(clip: &DecodedClip, resolution: usize) -> Vec<f32> {
    let resolution = clamp_resolution(resolution);
    let n = clip.samples.len();
    if n == 0 {
        return vec![0.0; resolution];
    }

    let max_abs = clip
        .samples
        .iter()
        .map(|&s| (s as i32).unsigned_abs())
        .max()
        .unwrap_or(0);
    if max_abs == 0 {
        return vec![0.0; resolution];
    }

    let mut out = Vec::with_capacity(resolution);
    for i in 0..resolution {
        let start = i * n / resolution;
        let end = ((i + 1) * n / resolution).min(n);
        if start >= end {
            out.push(0.0);
            continue;
        }
        let peak = clip.samples[start..end]
            .iter()
            .copied()
            .max_by_key(|&s| (s as i32).unsigned_abs())
            .unwrap_or(0);
        out.push(peak as f32 / max_abs as f32);
    }
    out
}

/// Render a waveform sample sequence as an SVG polyline on the fixed
/// 800x200 canvas. `color` must be a 6-hex-digit RGB value.
pub fn render_waveform_svg(samples: &[f32], color: &str) -> Result<String, PipelineError> {
    if color.len() != 6 || !color.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(PipelineError::InvalidRequest(format!(
            "invalid stroke color '{}': expected 6 hex digits",
            color
        )));
    }

    let n = samples.len().max(1);
    let mut points = String::with_capacity(samples.len() * 12);
    for (i, &sample) in samples.iter().enumerate() {
        let x = i as f32 / n as f32 * SVG_WIDTH;
        let y = SVG_MIDLINE - sample * SVG_AMPLITUDE;
        if i > 0 {
            points.push(' ');
        }
        points.push_str(&format!("{:.1},{:.1}", x, y));
    }

    Ok(format!(
        concat!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{w}\" height=\"{h}\" ",
            "viewBox=\"0 0 {w} {h}\">",
            "<polyline fill=\"none\" stroke=\"#{color}\" stroke-width=\"1\" points=\"{points}\"/>",
            "</svg>"
        ),
        w = SVG_WIDTH as u32,
        h = SVG_HEIGHT as u32,
        color = color,
        points = points,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(samples: Vec<i16>) -> DecodedClip {
        DecodedClip {
            samples,
            sample_rate: 16000,
        }
    }

    fn sine_clip(len: usize, amplitude: f64) -> DecodedClip {
        let samples = (0..len)
            .map(|i| {
                let t = i as f64 / 16000.0;
                (amplitude * (2.0 * std::f64::consts::PI * 440.0 * t).sin()) as i16
            })
            .collect();
        clip(samples)
    }

    #[test]
    fn waveform_has_exact_resolution() {
        let c = sine_clip(48000, 12000.0);
        for resolution in [100, 500, 1000, 5000] {
            let w = generate_waveform(&c, resolution);
            assert_eq!(w.len(), resolution);
        }
    }

    #[test]
    fn waveform_resolution_is_clamped() {
        let c = sine_clip(48000, 12000.0);
        assert_eq!(generate_waveform(&c, 10).len(), 100);
        assert_eq!(generate_waveform(&c, 1_000_000).len(), 5000);
    }

    #[test]
    fn waveform_values_are_normalized() {
        let c = sine_clip(48000, 9000.0);
        let w = generate_waveform(&c, 1000);
        assert!(w.iter().all(|&v| (-1.0..=1.0).contains(&v)));
        assert!(
            w.iter().any(|&v| v.abs() >= 0.999),
            "no bucket carries the clip peak"
        );
    }

    #[test]
    fn waveform_of_silence_is_all_zero() {
        let c = clip(vec![0i16; 48000]);
        let w = generate_waveform(&c, 500);
        assert_eq!(w.len(), 500);
        assert!(w.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn waveform_with_fewer_samples_than_resolution() {
        let c = clip(vec![100, -200, 300]);
        let w = generate_waveform(&c, 100);
        assert_eq!(w.len(), 100);
        assert!(w.iter().all(|&v| (-1.0..=1.0).contains(&v)));
        assert!(w.iter().any(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn normalize_scales_peak_to_target() {
        let c = clip(vec![1000, -2000, 500]);
        let normalized = normalize(&c);
        let peak = normalized.samples.iter().map(|&s| s.abs()).max().unwrap();
        let expected = (NORMALIZE_TARGET * i16::MAX as f64) as i16;
        assert!((peak - expected).abs() <= 1, "peak {} vs {}", peak, expected);
    }

    #[test]
    fn normalize_leaves_silence_alone() {
        let c = clip(vec![0i16; 100]);
        let normalized = normalize(&c);
        assert_eq!(normalized.samples, c.samples);
    }

    #[test]
    fn wav_round_trip_preserves_samples() {
        let c = sine_clip(16000, 10000.0);
        let bytes = convert(&c, AudioFormat::Wav).unwrap();
        let decoded = decode_to_mono(&bytes, AudioFormat::Wav).unwrap();
        assert_eq!(decoded.sample_rate, c.sample_rate);
        assert_eq!(decoded.samples.len(), c.samples.len());
        assert_eq!(decoded.samples[..100], c.samples[..100]);
    }

    #[test]
    fn opus_output_is_a_valid_ogg_stream() {
        let c = sine_clip(16000, 10000.0);
        let bytes = convert(&c, AudioFormat::Opus).unwrap();
        // Ogg capture pattern
        assert_eq!(&bytes[..4], b"OggS");
        assert!(bytes.len() > 100);
    }

    #[test]
    fn convert_rejects_non_target_formats() {
        let c = sine_clip(1600, 10000.0);
        assert!(matches!(
            convert(&c, AudioFormat::Mp3),
            Err(PipelineError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn decode_rejects_garbage_bytes() {
        let err = decode_to_mono(&[0u8; 64], AudioFormat::Mp3).unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn svg_render_is_well_formed() {
        let svg = render_waveform_svg(&[0.0, 0.5, -0.5, 1.0], "3b82f6").unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("<polyline"));
        assert!(svg.contains("stroke=\"#3b82f6\""));
        assert!(svg.ends_with("</svg>"));
        // midline and full-scale mappings
        assert!(svg.contains("0.0,100.0"));
        assert!(svg.contains(",20.0"));
    }

    #[test]
    fn svg_render_rejects_bad_color() {
        assert!(render_waveform_svg(&[0.0], "red").is_err());
        assert!(render_waveform_svg(&[0.0], "12345g").is_err());
    }
}
