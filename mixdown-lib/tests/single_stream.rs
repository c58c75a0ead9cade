mod common;

use std::sync::Arc;

use mixdown_lib::dsp::AlcElement;
use mixdown_lib::{
    ElementKind, RenderConfig, RenderEngine, RenderError, RenderEvent, SampleFormat, SoloTarget,
};
use rand::Rng;

use common::{decode16, pcm16, Capture, Events};

#[test]
fn passthrough_is_byte_identical_for_any_split() {
    let capture = Capture::new();
    let format = SampleFormat::new(44_100, 16, 2);
    let engine =
        RenderEngine::create(RenderConfig::new(capture.sink()).with_out_format(format)).unwrap();
    let stream = engine.stream(0).unwrap();
    stream.open(format).unwrap();

    let mut rng = rand::thread_rng();
    let input: Vec<u8> = (0..10_000).map(|_| rng.gen()).collect();
    let mut offset = 0;
    while offset < input.len() {
        let len = rng.gen_range(1..=700).min(input.len() - offset);
        stream.write(&input[offset..offset + len]).unwrap();
        offset += len;
    }
    stream.close().unwrap();

    assert_eq!(capture.bytes(), input);
}

#[test]
fn upconversion_scales_output_length() {
    let capture = Capture::new();
    let engine = RenderEngine::create(
        RenderConfig::new(capture.sink()).with_out_format(SampleFormat::new(48_000, 16, 2)),
    )
    .unwrap();
    let stream = engine.stream(0).unwrap();
    stream.open(SampleFormat::new(8_000, 16, 1)).unwrap();

    let input = pcm16(1_000, 8_000);
    for chunk in input.chunks(333) {
        stream.write(chunk).unwrap();
    }
    stream.close().unwrap();

    let expected = input.len() * 12;
    let produced = capture.bytes().len();
    // The resampler holds back the last input frame.
    assert!(expected.abs_diff(produced) <= 24, "produced {}", produced);
    assert!(capture.samples().iter().all(|&s| s == 1_000));
}

#[test]
fn downconversion_scales_output_length() {
    let capture = Capture::new();
    let engine = RenderEngine::create(
        RenderConfig::new(capture.sink()).with_out_format(SampleFormat::new(8_000, 16, 1)),
    )
    .unwrap();
    let stream = engine.stream(0).unwrap();
    stream.open(SampleFormat::new(48_000, 16, 2)).unwrap();

    let input = pcm16(-500, 48_000 * 2);
    for chunk in input.chunks(4_096) {
        stream.write(chunk).unwrap();
    }
    stream.close().unwrap();

    let expected = input.len() / 12;
    let produced = capture.bytes().len();
    assert!(expected.abs_diff(produced) <= 2, "produced {}", produced);
    assert!(capture.samples().iter().all(|&s| s == -500));
}

#[test]
fn opened_and_closed_fire_once_per_session() {
    let capture = Capture::new();
    let events = Events::default();
    let engine = RenderEngine::create(
        RenderConfig::new(capture.sink()).with_event_handler(events.handler()),
    )
    .unwrap();
    let stream = engine.stream(0).unwrap();
    stream.open(SampleFormat::default()).unwrap();
    stream.close().unwrap();
    stream.close().unwrap();
    assert_eq!(events.seen(), vec![RenderEvent::Opened, RenderEvent::Closed]);

    stream.open(SampleFormat::default()).unwrap();
    drop(engine);
    assert_eq!(
        events.seen(),
        vec![
            RenderEvent::Opened,
            RenderEvent::Closed,
            RenderEvent::Opened,
            RenderEvent::Closed
        ]
    );
}

#[test]
fn mixed_processors_apply_to_the_only_stream() {
    let capture = Capture::new();
    let format = SampleFormat::new(8_000, 16, 1);
    let engine = RenderEngine::create(
        RenderConfig::new(capture.sink())
            .with_out_format(format)
            .with_mixed_processors(&[ElementKind::Alc]),
    )
    .unwrap();
    let stream = engine.stream(0).unwrap();
    stream.open(format).unwrap();
    engine
        .with_mixed_element(ElementKind::Alc, |alc: &mut AlcElement| alc.set_gain(0.5))
        .unwrap();
    stream.write(&pcm16(100, 16)).unwrap();
    stream
        .with_element(ElementKind::Alc, |alc: &mut AlcElement| alc.set_gain(2.0))
        .unwrap();
    stream.write(&pcm16(100, 16)).unwrap();
    stream.close().unwrap();

    let samples = capture.samples();
    assert_eq!(samples.len(), 32);
    assert!(samples[..16].iter().all(|&s| s == 50));
    assert!(samples[16..].iter().all(|&s| s == 200));
}

#[test]
fn paused_direct_stream_drops_writes() {
    let capture = Capture::new();
    let format = SampleFormat::new(8_000, 16, 1);
    let engine =
        RenderEngine::create(RenderConfig::new(capture.sink()).with_out_format(format)).unwrap();
    let stream = engine.stream(0).unwrap();
    stream.open(format).unwrap();
    stream.pause(true).unwrap();
    assert!(stream.state().paused);
    stream.write(&pcm16(7, 8)).unwrap();
    stream.pause(false).unwrap();
    stream.write(&pcm16(9, 8)).unwrap();
    stream.close().unwrap();
    assert_eq!(decode16(&capture.bytes()), vec![9; 8]);
}

#[test]
fn sink_errors_reach_the_writer() {
    let engine = RenderEngine::create(RenderConfig::new(Arc::new(
        |_: &[u8]| -> mixdown_lib::Result<()> { Err(RenderError::Fail("device gone".into())) },
    )))
    .unwrap();
    let stream = engine.stream(0).unwrap();
    stream.open(SampleFormat::default()).unwrap();
    assert_eq!(
        stream.write(&[0; 8]),
        Err(RenderError::Fail("device gone".into()))
    );
}

#[test]
fn invalid_operations_are_rejected() {
    let capture = Capture::new();
    let engine = RenderEngine::create(RenderConfig::new(capture.sink())).unwrap();
    let stream = engine.stream(0).unwrap();

    assert!(matches!(stream.write(&[0; 4]), Err(RenderError::InvalidState(_))));
    assert!(matches!(stream.pause(true), Err(RenderError::InvalidState(_))));
    assert!(matches!(stream.flush(), Err(RenderError::InvalidState(_))));
    assert!(matches!(
        stream.open(SampleFormat::new(0, 16, 2)),
        Err(RenderError::InvalidArg(_))
    ));
    assert!(matches!(
        stream.set_fade(true),
        Err(RenderError::NotSupported(_))
    ));
    assert!(matches!(
        stream.set_mixer_gain(mixdown_lib::GainEnvelope::new(0.8, 0.2, 100)),
        Err(RenderError::InvalidArg(_))
    ));

    // Encoding is allowed on the only stream, but nothing provides one.
    stream.add_processor(&[ElementKind::Encoder]).unwrap();
    assert!(matches!(
        stream.open(SampleFormat::default()),
        Err(RenderError::NotSupported(_))
    ));
    assert!(!stream.state().is_running());

    let other = RenderEngine::create(RenderConfig::new(capture.sink())).unwrap();
    let stream = other.stream(0).unwrap();
    stream.open(SampleFormat::default()).unwrap();
    assert!(matches!(
        stream.open(SampleFormat::default()),
        Err(RenderError::InvalidState(_))
    ));
    assert!(matches!(
        stream.add_processor(&[ElementKind::Fade]),
        Err(RenderError::InvalidState(_))
    ));
    assert!(matches!(
        stream.with_element(ElementKind::Fade, |_: &mut AlcElement| ()),
        Err(RenderError::NotFound(_))
    ));
    assert!(matches!(
        other.set_solo_stream(SoloTarget::Stream(1)),
        Err(RenderError::InvalidArg(_))
    ));
    assert!(matches!(
        stream.set_mixer_gain(mixdown_lib::GainEnvelope::constant(0.5)),
        Err(RenderError::InvalidState(_))
    ));
    assert_eq!(stream.latency_ms(), Ok(0));
    stream.close().unwrap();
    stream
        .set_mixer_gain(mixdown_lib::GainEnvelope::constant(0.5))
        .unwrap();
}
