//! WAV file input and output for the renderer.

use hound::{SampleFormat as WavSampleFormat, WavReader, WavSpec, WavWriter};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use mixdown_lib::SampleFormat;

use crate::error::CliError;

pub type InputReader = WavReader<BufReader<File>>;

/// Open an integer PCM WAV file and report its sample format.
pub fn open_input(path: &Path) -> Result<(SampleFormat, InputReader), CliError> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    if spec.sample_format != WavSampleFormat::Int {
        return Err(CliError::Usage(format!(
            "{}: only integer PCM WAV files are supported",
            path.display()
        )));
    }
    let format = SampleFormat::new(spec.sample_rate, spec.bits_per_sample, spec.channels);
    format.validate()?;
    Ok((format, reader))
}

/// Serialize signed samples as little-endian PCM of `bits` width.
pub fn encode_samples(samples: &[i32], bits: u16, out: &mut Vec<u8>) {
    for &sample in samples {
        match bits {
            8 => out.push(sample as i8 as u8),
            16 => out.extend_from_slice(&(sample as i16).to_le_bytes()),
            24 => out.extend_from_slice(&sample.to_le_bytes()[..3]),
            _ => out.extend_from_slice(&sample.to_le_bytes()),
        }
    }
}

/// Parse little-endian PCM of `bits` width into signed samples.
pub fn decode_samples(bytes: &[u8], bits: u16) -> Vec<i32> {
    let width = (bits / 8) as usize;
    bytes
        .chunks_exact(width)
        .map(|chunk| match bits {
            8 => chunk[0] as i8 as i32,
            16 => i16::from_le_bytes([chunk[0], chunk[1]]) as i32,
            24 => i32::from_le_bytes([0, chunk[0], chunk[1], chunk[2]]) >> 8,
            _ => i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
        })
        .collect()
}

/// Output file fed by the engine's sink.
pub struct WavOutput {
    writer: Option<WavWriter<BufWriter<File>>>,
    bits: u16,
    pending: Vec<u8>,
    frames: u64,
    channels: u16,
}

impl WavOutput {
    pub fn create(path: &Path, format: SampleFormat) -> Result<Self, CliError> {
        let spec = WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: format.bits_per_sample,
            sample_format: WavSampleFormat::Int,
        };
        Ok(Self {
            writer: Some(WavWriter::create(path, spec)?),
            bits: format.bits_per_sample,
            pending: Vec::new(),
            frames: 0,
            channels: format.channels,
        })
    }

    /// Append PCM bytes; a trailing partial sample waits for the next call.
    pub fn write(&mut self, data: &[u8]) -> Result<(), hound::Error> {
        let writer = match self.writer.as_mut() {
            Some(writer) => writer,
            None => return Ok(()),
        };
        self.pending.extend_from_slice(data);
        let width = (self.bits / 8) as usize;
        let whole = self.pending.len() - self.pending.len() % width;
        let samples = decode_samples(&self.pending[..whole], self.bits);
        for sample in &samples {
            writer.write_sample(*sample)?;
        }
        self.pending.drain(..whole);
        self.frames += samples.len() as u64 / self.channels.max(1) as u64;
        Ok(())
    }

    /// Frames written so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn finalize(&mut self) -> Result<(), hound::Error> {
        match self.writer.take() {
            Some(writer) => writer.finalize(),
            None => Ok(()),
        }
    }
}
