use std::io::Cursor;
use std::sync::atomic::Ordering;

use super::stub_codec::{Script, ScriptedCodec};
use crate::codec::{BufferFlags, Direction, MediaCodec};
use crate::config::DriverConfig;
use crate::driver::{AccessUnit, CodecDriver, SessionState, UnitSink};
use crate::error::{PumpError, Result};
use crate::format::AudioFormatDescriptor;
use crate::pump::PcmFeed;

#[derive(Default)]
struct CollectSink {
    units: Vec<(Vec<u8>, i64, BufferFlags)>,
}

impl CollectSink {
    fn bytes(&self) -> Vec<u8> {
        self.units.iter().flat_map(|(d, _, _)| d.clone()).collect()
    }

    fn timestamps(&self) -> Vec<i64> {
        self.units.iter().map(|(_, pts, _)| *pts).collect()
    }
}

impl UnitSink for CollectSink {
    fn write_unit(&mut self, unit: &AccessUnit<'_>) -> Result<usize> {
        self.units.push((unit.data.to_vec(), unit.pts_us, unit.flags));
        Ok(unit.data.len())
    }
}

struct BrokenSink;

impl UnitSink for BrokenSink {
    fn write_unit(&mut self, _unit: &AccessUnit<'_>) -> Result<usize> {
        Err(PumpError::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "sink closed",
        )))
    }
}

fn driver(script: Script) -> CodecDriver<ScriptedCodec> {
    CodecDriver::new(
        ScriptedCodec::new(script),
        Direction::Encode,
        AudioFormatDescriptor::default(),
        &DriverConfig::default(),
    )
}

fn source(len: usize) -> PcmFeed<Cursor<Vec<u8>>> {
    PcmFeed::new(Cursor::new((0..len).map(|i| (i % 251) as u8).collect()))
}

#[test]
fn test_terminates_with_config_unit_and_pool_change() {
    let mut driver = driver(Script {
        emit_config: true,
        change_pool_first: true,
        latency: 3,
        ..Default::default()
    });
    let mut sink = CollectSink::default();
    let stats = driver.run(&mut source(10 * 1024), &mut sink).unwrap();

    assert_eq!(driver.state(), SessionState::Done);
    assert!(driver.is_input_done());
    assert!(driver.is_output_done());
    assert_eq!(stats.input_units, 10);
    assert_eq!(stats.units_emitted, 10);
    assert_eq!(stats.config_units, 1);
    assert_eq!(stats.pool_changes, 1);
    assert_eq!(stats.format_changes, 1);
    assert!(stats.final_unit_flags.is_end_of_stream());
    // the config unit never reaches the sink
    assert_eq!(sink.bytes().len(), 10 * 1024);
}

#[test]
fn test_output_held_past_input_end_is_flushed() {
    let mut driver = driver(Script {
        latency: 100,
        ..Default::default()
    });
    let mut sink = CollectSink::default();
    let stats = driver.run(&mut source(3 * 1024), &mut sink).unwrap();
    assert_eq!(stats.units_emitted, 3);
    assert_eq!(driver.state(), SessionState::Done);
}

#[test]
fn test_empty_source_still_completes() {
    let mut driver = driver(Script::default());
    let mut sink = CollectSink::default();
    let stats = driver.run(&mut source(0), &mut sink).unwrap();
    assert_eq!(stats.units_emitted, 0);
    assert!(sink.units.is_empty());
    assert_eq!(driver.codec().queued.len(), 1);
    assert!(driver.codec().queued[0].flags.is_end_of_stream());
}

#[test]
fn test_out_of_order_unit_is_dropped_alone() {
    let mut driver = driver(Script {
        out_of_order_at: Some(3),
        ..Default::default()
    });
    let mut sink = CollectSink::default();
    let stats = driver.run(&mut source(8 * 1024), &mut sink).unwrap();

    assert_eq!(stats.units_dropped(), 1);
    assert_eq!(stats.units_emitted, 7);
    let dropped = stats.dropped[0];
    assert!(dropped.pts_us < dropped.watermark_us);

    let pts = sink.timestamps();
    assert!(pts.windows(2).all(|w| w[0] <= w[1]), "{:?}", pts);
    assert!(!pts.contains(&dropped.pts_us));
    assert_eq!(sink.bytes().len(), 7 * 1024);
}

#[test]
fn test_start_twice_is_illegal() {
    let mut driver = driver(Script::default());
    driver.start().unwrap();
    assert!(matches!(
        driver.start(),
        Err(PumpError::IllegalSessionState { .. })
    ));
}

#[test]
fn test_stop_before_start_is_illegal() {
    let mut driver = driver(Script::default());
    assert!(matches!(
        driver.stop(),
        Err(PumpError::IllegalSessionState { .. })
    ));
}

#[test]
fn test_stop_returns_to_ready() {
    let mut driver = driver(Script::default());
    driver.start().unwrap();
    driver.fill(&mut source(4096)).unwrap();
    driver.stop().unwrap();
    assert_eq!(driver.state(), SessionState::Ready);
    assert!(!driver.is_input_done());

    let mut sink = CollectSink::default();
    let stats = driver.run(&mut source(2048), &mut sink).unwrap();
    assert_eq!(stats.units_emitted, 2);
}

#[test]
fn test_pumping_after_done_is_illegal() {
    let mut driver = driver(Script::default());
    let mut sink = CollectSink::default();
    driver.run(&mut source(1024), &mut sink).unwrap();
    assert!(matches!(
        driver.fill(&mut source(1024)),
        Err(PumpError::IllegalSessionState { .. })
    ));
    assert!(matches!(
        driver.drain(&mut sink),
        Err(PumpError::IllegalSessionState { .. })
    ));
}

#[test]
fn test_pumping_after_release_is_illegal() {
    let mut driver = driver(Script::default());
    driver.start().unwrap();
    driver.release();
    assert_eq!(driver.state(), SessionState::Released);
    assert!(driver.fill(&mut source(1024)).is_err());
    assert!(driver.start().is_err());
    assert!(driver.stop().is_err());
}

#[test]
fn test_release_is_idempotent_and_runs_on_drop() {
    let mut driver = driver(Script::default());
    let releases = driver.codec().release_counter();
    driver.release();
    driver.release();
    drop(driver);
    assert_eq!(releases.load(Ordering::SeqCst), 1);

    let driver = self::driver(Script::default());
    let releases = driver.codec().release_counter();
    drop(driver);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[test]
fn test_varying_input_capacity() {
    let mut driver = driver(Script {
        input_capacities: vec![100, 37, 512],
        ..Default::default()
    });
    let input: Vec<u8> = (0..5000).map(|i| (i % 251) as u8).collect();
    let mut sink = CollectSink::default();
    driver
        .run(&mut PcmFeed::new(Cursor::new(input.clone())), &mut sink)
        .unwrap();

    assert_eq!(sink.bytes(), input);
    let queued = &driver.codec().queued;
    assert!(queued.iter().all(|q| q.size <= q.capacity));
    assert!(queued.iter().any(|q| q.size == 37));
    assert!(queued.iter().any(|q| q.size == 512));
}

#[test]
fn test_timestamps_follow_byte_count() {
    // 4410 bytes = 2205 samples = 50 ms at 44.1 kHz mono 16-bit
    let mut driver = driver(Script {
        input_capacities: vec![4410],
        ..Default::default()
    });
    let mut sink = CollectSink::default();
    driver.run(&mut source(4410 * 4 + 100), &mut sink).unwrap();

    let queued: Vec<i64> = driver.codec().queued.iter().map(|q| q.pts_us).collect();
    // end of stream is stamped with the time of the next, never-sent byte
    assert_eq!(queued, vec![0, 50_000, 100_000, 150_000, 200_000, 201_133]);
    assert_eq!(sink.timestamps(), vec![0, 50_000, 100_000, 150_000, 200_000]);
}

#[test]
fn test_input_backpressure_is_not_an_error() {
    let mut driver = driver(Script {
        refuse_input_every: Some(2),
        ..Default::default()
    });
    let mut sink = CollectSink::default();
    let stats = driver.run(&mut source(6 * 1024), &mut sink).unwrap();
    assert_eq!(stats.bytes_in, 6 * 1024);
    assert_eq!(sink.bytes().len(), 6 * 1024);
}

#[test]
fn test_silent_pool_replacement_is_caught() {
    let mut driver = driver(Script {
        replace_pool_silently: true,
        ..Default::default()
    });
    let mut sink = CollectSink::default();
    let err = driver.run(&mut source(2048), &mut sink).unwrap_err();
    assert!(matches!(err, PumpError::IllegalSessionState { .. }));
    assert!(sink.units.is_empty());
}

#[test]
fn test_stalled_codec_times_out() {
    let mut driver = CodecDriver::new(
        ScriptedCodec::new(Script {
            never_finish: true,
            ..Default::default()
        }),
        Direction::Encode,
        AudioFormatDescriptor::default(),
        &DriverConfig {
            stall_timeout_secs: 1,
            ..Default::default()
        },
    );
    let mut sink = CollectSink::default();
    let err = driver.run(&mut source(1024), &mut sink).unwrap_err();
    assert!(matches!(err, PumpError::Stalled { .. }));
    // everything before the stall still went out
    assert_eq!(sink.units.len(), 1);
}

#[test]
fn test_sink_failure_propagates() {
    let mut driver = driver(Script::default());
    let err = driver.run(&mut source(1024), &mut BrokenSink).unwrap_err();
    assert!(matches!(err, PumpError::Io(_)));
    // the failed unit's slot went back to the codec
    assert_eq!(driver.codec().output_pool().lent(), 0);
}
