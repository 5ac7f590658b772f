use std::fs::File;
use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};
use log::{debug, warn};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::Result;

/// Decode a whole audio file and downmix it to mono.
///
/// Returns the samples together with the file's sample rate.
pub fn decode_mono(path: impl AsRef<Path>) -> Result<(Vec<f32>, u32)> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or(SymphoniaError::Unsupported("no default track"))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or(SymphoniaError::Unsupported("unknown sample rate"))?;
    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Skipping corrupt packet in {}: {e}", path.display());
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);

        if channels == 1 {
            samples.extend_from_slice(sample_buf.samples());
        } else {
            let scale = 1.0 / channels as f32;
            samples.extend(
                sample_buf
                    .samples()
                    .chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() * scale),
            );
        }
    }

    debug!(
        "Decoded {} ({} samples at {} Hz)",
        path.display(),
        samples.len(),
        sample_rate
    );
    Ok((samples, sample_rate))
}

/// Input frames fed to the resampler per call.
const RESAMPLE_CHUNK: usize = 1024;

/// Resample a mono signal from `from_rate` to `to_rate`.
///
/// The filter delay is trimmed and the tail flushed, so the output has
/// `round(len * to_rate / from_rate)` samples aligned with the input.
pub fn resample(samples: Vec<f32>, from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples);
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let expected = (samples.len() as f64 * ratio).round() as usize;
    let mut resampler = SincFixedIn::<f32>::new(
        ratio,
        2.0,
        SincInterpolationParameters {
            sinc_len: 1024,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        },
        RESAMPLE_CHUNK,
        1,
    )?;
    let delay = resampler.output_delay();

    let mut out = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);
    let mut chunks = samples.chunks_exact(RESAMPLE_CHUNK);
    for chunk in &mut chunks {
        let waves = resampler.process(std::slice::from_ref(&chunk), None)?;
        out.extend_from_slice(&waves[0]);
    }
    let rest = chunks.remainder();
    if !rest.is_empty() {
        let waves = resampler.process_partial(Some(std::slice::from_ref(&rest)), None)?;
        out.extend_from_slice(&waves[0]);
    }
    while out.len() < delay + expected {
        let waves = resampler.process_partial(None::<&[&[f32]]>, None)?;
        out.extend_from_slice(&waves[0]);
    }

    out.drain(..delay);
    out.truncate(expected);
    Ok(out)
}

/// Load a file as mono at `sample_rate`.
pub fn load_mono(path: impl AsRef<Path>, sample_rate: u32) -> Result<Vec<f32>> {
    let (samples, source_rate) = decode_mono(path)?;
    resample(samples, source_rate, sample_rate)
}

/// Write a mono 32-bit float WAV, scaling down if the signal would clip.
pub fn write_wav(path: impl AsRef<Path>, signal: &[f32], sample_rate: u32) -> Result<()> {
    let peak = signal.iter().fold(0.0f32, |acc, &x| acc.max(x.abs()));
    let gain = if peak > 1.0 { 1.0 / peak } else { 1.0 };

    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for &sample in signal {
        writer.write_sample(sample * gain)?;
    }
    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn unique_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "evomix_audio_{}_{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos(),
            name
        ));
        path
    }

    #[test]
    fn wav_written_and_decoded_back() {
        let path = unique_path("ramp.wav");
        let signal: Vec<f32> = (0..800).map(|i| (i as f32 / 800.0) - 0.5).collect();
        write_wav(&path, &signal, 8000).unwrap();

        let (decoded, rate) = decode_mono(&path).unwrap();
        assert_eq!(rate, 8000);
        assert_eq!(decoded.len(), signal.len());
        for (a, b) in decoded.iter().zip(&signal) {
            assert!((a - b).abs() < 1e-6);
        }
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn clipping_signal_is_normalised() {
        let path = unique_path("loud.wav");
        write_wav(&path, &[2.0, -4.0, 1.0], 8000).unwrap();
        let (decoded, _) = decode_mono(&path).unwrap();
        assert!((decoded[1] + 1.0).abs() < 1e-6);
        assert!((decoded[0] - 0.5).abs() < 1e-6);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn resample_keeps_length_and_alignment() {
        let mut signal = vec![0.0; 8000];
        signal[4000] = 1.0;
        let out = resample(signal, 16000, 8000).unwrap();
        assert_eq!(out.len(), 4000);
        let peak = out
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .map(|(i, _)| i)
            .unwrap();
        assert!((1998..=2002).contains(&peak), "impulse moved to {peak}");

        let up = resample(vec![0.25; 3000], 8000, 22050).unwrap();
        assert_eq!(up.len(), 8269);
    }

    #[test]
    fn resample_is_identity_at_equal_rates() {
        let signal = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(signal.clone(), 8000, 8000).unwrap(), signal);
    }
}
