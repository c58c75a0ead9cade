//! `mixdown render`: mix WAV inputs through the render engine.

use clap::ArgMatches;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use mixdown_lib::{
    AudioSink, ElementKind, GainEnvelope, RenderConfig, RenderEngine, RenderError, SampleFormat,
    SoloTarget, StreamHandle,
};

use crate::error::CliError;
use crate::wav::{encode_samples, open_input, InputReader, WavOutput};

pub fn run(args: &ArgMatches) -> Result<i32, CliError> {
    let inputs: Vec<PathBuf> = args
        .get_many::<String>("INPUT")
        .map(|values| values.map(PathBuf::from).collect())
        .unwrap_or_default();
    let output_path = args
        .get_one::<String>("output")
        .map(PathBuf::from)
        .ok_or_else(|| CliError::Usage("missing --output".to_string()))?;

    let mut config = match args.get_one::<String>("config") {
        Some(path) => RenderConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => RenderConfig::default(),
    };

    let mut opened = Vec::with_capacity(inputs.len());
    for path in &inputs {
        let (format, reader) = open_input(path)?;
        info!("{}: {}", path.display(), format);
        opened.push((path.clone(), format, reader));
    }
    let first_format = opened
        .first()
        .map(|(_, format, _)| *format)
        .ok_or_else(|| CliError::Usage("no inputs given".to_string()))?;

    let base = config.out_format.unwrap_or(first_format);
    let out_format = SampleFormat {
        sample_rate: parse_opt(args, "rate")?.unwrap_or(base.sample_rate),
        bits_per_sample: parse_opt(args, "bits")?.unwrap_or(base.bits_per_sample),
        channels: parse_opt(args, "channels")?.unwrap_or(base.channels),
    };
    out_format.validate()?;
    config.out_format = Some(out_format);
    config.max_stream_num = opened.len();
    if let Some(period) = parse_opt::<u32>(args, "period-ms")? {
        config.process_period_ms = period;
    }
    if let Some(kinds) = args.get_many::<String>("post") {
        for kind in kinds {
            let kind: ElementKind = kind.parse().map_err(CliError::Usage)?;
            config.mixed_processors.push(kind);
        }
    }
    let envelopes: Vec<GainEnvelope> = match args.get_many::<String>("gain") {
        Some(values) => values
            .map(|value| parse_envelope(value))
            .collect::<Result<_, _>>()?,
        None => Vec::new(),
    };
    if envelopes.len() > opened.len() {
        return Err(CliError::Usage(format!(
            "{} gain envelopes for {} inputs",
            envelopes.len(),
            opened.len()
        )));
    }
    let solo: Option<usize> = parse_opt(args, "solo")?;

    let output = Arc::new(Mutex::new(WavOutput::create(&output_path, out_format)?));
    config.out_writer = Some(wav_sink(output.clone()));
    let engine = RenderEngine::create(config)?;
    if let Some(index) = solo {
        engine.set_solo_stream(SoloTarget::Stream(index))?;
    }

    let started = Instant::now();
    let chunk_ms = engine.process_period().as_millis() as u32;
    // Envelopes are fixed once the first stream opens.
    for (index, envelope) in envelopes.iter().enumerate() {
        engine.stream(index)?.set_mixer_gain(*envelope)?;
    }
    let mut producers = Vec::with_capacity(opened.len());
    for (index, (path, format, reader)) in opened.into_iter().enumerate() {
        let stream = engine.stream(index)?;
        stream.open(format)?;
        let period = engine.process_period();
        producers.push(
            thread::Builder::new()
                .name(format!("mixdown-producer-{}", index))
                .spawn(move || produce(&path, stream, format, reader, chunk_ms, period))?,
        );
    }

    let mut failure = None;
    for producer in producers {
        let outcome = producer
            .join()
            .unwrap_or_else(|_| Err(CliError::Usage("producer thread panicked".to_string())));
        if let Err(err) = outcome {
            if failure.is_none() {
                failure = Some(err);
            }
        }
    }
    engine.destroy();

    let mut output = output.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    output.finalize()?;
    if let Some(err) = failure {
        return Err(err);
    }
    info!(
        "wrote {} frames to {} in {:.2?}",
        output.frames(),
        output_path.display(),
        started.elapsed()
    );
    Ok(0)
}

/// Feed one input file into its stream, then wait for the mixer to drain it.
fn produce(
    path: &Path,
    stream: StreamHandle,
    format: SampleFormat,
    mut reader: InputReader,
    chunk_ms: u32,
    period: Duration,
) -> Result<(), CliError> {
    let samples_per_chunk = format.bytes_for_ms(chunk_ms).max(format.frame_bytes())
        / format.sample_bytes();
    let mut samples = Vec::with_capacity(samples_per_chunk);
    let mut bytes = Vec::with_capacity(samples_per_chunk * format.sample_bytes());
    let mut source = reader.samples::<i32>();
    let mut total = 0_usize;
    loop {
        samples.clear();
        for sample in source.by_ref().take(samples_per_chunk) {
            samples.push(sample?);
        }
        if samples.is_empty() {
            break;
        }
        bytes.clear();
        encode_samples(&samples, format.bits_per_sample, &mut bytes);
        stream.write(&bytes)?;
        total += bytes.len();
    }
    debug!("{}: wrote {} bytes", path.display(), total);

    let deadline = Instant::now() + period * 50;
    while stream.queued_bytes() > 0 {
        if Instant::now() >= deadline {
            warn!("{}: {} bytes left unmixed", path.display(), stream.queued_bytes());
            break;
        }
        thread::sleep(period / 2);
    }
    stream.close()?;
    Ok(())
}

fn wav_sink(output: Arc<Mutex<WavOutput>>) -> Arc<dyn AudioSink> {
    Arc::new(move |data: &[u8]| -> mixdown_lib::Result<()> {
        let mut output = output.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        output
            .write(data)
            .map_err(|err| RenderError::Fail(format!("wav output: {}", err)))
    })
}

fn parse_opt<T: std::str::FromStr>(args: &ArgMatches, name: &str) -> Result<Option<T>, CliError> {
    match args.get_one::<String>(name) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| CliError::Usage(format!("invalid value for --{}: {}", name, value))),
        None => Ok(None),
    }
}

/// Parse `INITIAL:TARGET:MS`, e.g. `0:1:250`.
pub fn parse_envelope(value: &str) -> Result<GainEnvelope, CliError> {
    let invalid = || CliError::Usage(format!("invalid gain envelope: {}", value));
    let parts: Vec<&str> = value.split(':').collect();
    let [initial, target, ms] = parts.as_slice() else {
        return Err(invalid());
    };
    let envelope = GainEnvelope::new(
        initial.parse().map_err(|_| invalid())?,
        target.parse().map_err(|_| invalid())?,
        ms.parse().map_err(|_| invalid())?,
    );
    envelope.validate()?;
    Ok(envelope)
}
