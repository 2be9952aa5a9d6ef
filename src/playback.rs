//! PCM playback
//!
//! Streams raw PCM from a byte source into an [`AudioSink`] on a background
//! thread. Unlike a transcode pass, playback can be cancelled: the worker
//! checks a flag once per chunk, lets the write in flight complete, then
//! stops and releases the sink.

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::PlaybackConfig;
use crate::error::{PumpError, Result};
use crate::pump::read_full;

/// An audio output that accepts a stream of PCM bytes
pub trait AudioSink: Send {
    /// Smallest write the device wants; chunks are never smaller.
    fn min_buffer_size(&self) -> usize;

    fn play(&mut self) -> Result<()>;

    /// Blocks until the device has taken `pcm`.
    fn write(&mut self, pcm: &[u8]) -> Result<usize>;

    fn stop(&mut self) -> Result<()>;

    fn release(&mut self);
}

/// An [`AudioSink`] over any writer, e.g. stdout piped into a player
pub struct WriterSink<W: Write + Send> {
    writer: W,
    min_buffer: usize,
    playing: bool,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W, min_buffer: usize) -> Self {
        Self {
            writer,
            min_buffer,
            playing: false,
        }
    }
}

impl<W: Write + Send> AudioSink for WriterSink<W> {
    fn min_buffer_size(&self) -> usize {
        self.min_buffer
    }

    fn play(&mut self) -> Result<()> {
        self.playing = true;
        Ok(())
    }

    fn write(&mut self, pcm: &[u8]) -> Result<usize> {
        if !self.playing {
            return Err(PumpError::illegal_state("write audio", "sink not playing"));
        }
        self.writer.write_all(pcm)?;
        Ok(pcm.len())
    }

    fn stop(&mut self) -> Result<()> {
        self.playing = false;
        self.writer.flush()?;
        Ok(())
    }

    fn release(&mut self) {
        self.playing = false;
        if let Err(e) = self.writer.flush() {
            tracing::debug!("flush on release failed: {}", e);
        }
    }
}

/// Playback lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlaybackState {
    /// No session, or released
    NotReady,
    /// Session created, not started
    Ready,
    /// Worker running
    Playing,
    /// Worker finished, was stopped, or failed
    Stopped,
}

/// Notifications published by the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PlaybackEvent {
    Started,
    Finished { bytes: u64 },
    Failed(String),
}

struct PlaybackSession {
    source: Box<dyn Read + Send>,
    sink: Box<dyn AudioSink>,
}

/// Plays one PCM source at a time into an audio sink
pub struct PlaybackPump {
    id: Uuid,
    config: PlaybackConfig,
    state: Arc<Mutex<PlaybackState>>,
    cancel: Arc<AtomicBool>,
    session: Option<PlaybackSession>,
    worker: Option<JoinHandle<()>>,
    events: broadcast::Sender<PlaybackEvent>,
}

impl PlaybackPump {
    pub fn new(config: PlaybackConfig) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            id: Uuid::new_v4(),
            config,
            state: Arc::new(Mutex::new(PlaybackState::NotReady)),
            cancel: Arc::new(AtomicBool::new(false)),
            session: None,
            worker: None,
            events,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> PlaybackState {
        *self.state.lock()
    }

    /// Receive playback notifications from here on.
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    /// Open `path` as raw PCM and get ready to play it into `sink`.
    pub fn create_session<P: AsRef<Path>>(&mut self, path: P, sink: Box<dyn AudioSink>) -> Result<()> {
        let path = path.as_ref();
        let source = BufReader::new(File::open(path)?);
        tracing::debug!(playback = %self.id, path = %path.display(), "opened playback source");
        self.create_session_from_reader(Box::new(source), sink)
    }

    /// Get ready to play `source` into `sink`. Replaces an unstarted or
    /// finished session.
    pub fn create_session_from_reader(
        &mut self,
        source: Box<dyn Read + Send>,
        sink: Box<dyn AudioSink>,
    ) -> Result<()> {
        let state = self.state();
        if state == PlaybackState::Playing {
            return Err(PumpError::illegal_state("create playback session", state));
        }
        self.join_worker();
        if let Some(mut old) = self.session.take() {
            old.sink.release();
        }

        self.session = Some(PlaybackSession { source, sink });
        *self.state.lock() = PlaybackState::Ready;
        Ok(())
    }

    /// Start the worker. Only valid from `Ready`.
    pub fn start(&mut self) -> Result<()> {
        let state = self.state();
        if state != PlaybackState::Ready {
            return Err(PumpError::illegal_state("start playback", state));
        }
        let session = self
            .session
            .take()
            .ok_or_else(|| PumpError::illegal_state("start playback", "no session"))?;

        self.cancel.store(false, Ordering::Release);
        *self.state.lock() = PlaybackState::Playing;

        let worker = Worker {
            id: self.id,
            chunk_bytes: self.config.chunk_bytes,
            cancel: self.cancel.clone(),
            state: self.state.clone(),
            events: self.events.clone(),
        };
        let spawned = std::thread::Builder::new()
            .name(format!("playback-{}", self.id))
            .spawn(move || worker.run(session));
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                *self.state.lock() = PlaybackState::Stopped;
                Err(PumpError::Io(e))
            }
        }
    }

    /// Ask the worker to stop after the chunk it is writing, and wait for it.
    pub fn stop(&mut self) -> Result<()> {
        let state = self.state();
        match state {
            PlaybackState::Playing => {
                self.cancel.store(true, Ordering::Release);
                self.join_worker();
                *self.state.lock() = PlaybackState::Stopped;
                tracing::info!(playback = %self.id, "playback stopped");
                Ok(())
            }
            PlaybackState::Stopped => Ok(()),
            PlaybackState::NotReady | PlaybackState::Ready => {
                Err(PumpError::illegal_state("stop playback", state))
            }
        }
    }

    /// Block until the worker finishes on its own.
    pub fn wait(&mut self) {
        self.join_worker();
    }

    /// Stop if needed and drop the session. Idempotent.
    pub fn release(&mut self) {
        self.cancel.store(true, Ordering::Release);
        self.join_worker();
        if let Some(mut session) = self.session.take() {
            session.sink.release();
        }
        let mut state = self.state.lock();
        if *state != PlaybackState::NotReady {
            *state = PlaybackState::NotReady;
            tracing::debug!(playback = %self.id, "playback released");
        }
    }

    fn join_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::error!(playback = %self.id, "playback worker panicked");
                *self.state.lock() = PlaybackState::Stopped;
            }
        }
    }
}

impl Drop for PlaybackPump {
    fn drop(&mut self) {
        self.release();
    }
}

/// What the background thread needs from the pump
struct Worker {
    id: Uuid,
    chunk_bytes: usize,
    cancel: Arc<AtomicBool>,
    state: Arc<Mutex<PlaybackState>>,
    events: broadcast::Sender<PlaybackEvent>,
}

impl Worker {
    fn run(self, mut session: PlaybackSession) {
        let result = self.stream(&mut session);
        session.sink.release();
        *self.state.lock() = PlaybackState::Stopped;

        // Sending only fails when nobody subscribed
        let _ = match result {
            Ok(bytes) => {
                tracing::info!(playback = %self.id, bytes, "playback finished");
                self.events.send(PlaybackEvent::Finished { bytes })
            }
            Err(e) => {
                tracing::error!(playback = %self.id, error = %e, "playback failed");
                self.events.send(PlaybackEvent::Failed(e.to_string()))
            }
        };
    }

    fn stream(&self, session: &mut PlaybackSession) -> Result<u64> {
        let chunk = self.chunk_bytes.max(session.sink.min_buffer_size()).max(1);
        let mut buf = vec![0u8; chunk];
        let mut total = 0u64;

        session.sink.play()?;
        let _ = self.events.send(PlaybackEvent::Started);
        tracing::info!(playback = %self.id, chunk, "playback started");

        while !self.cancel.load(Ordering::Acquire) {
            let len = read_full(&mut session.source, &mut buf)?;
            if len == 0 {
                break;
            }
            session.sink.write(&buf[..len])?;
            total += len as u64;
            tracing::trace!(playback = %self.id, len, total, "wrote chunk");
        }

        session.sink.stop()?;
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Records writes; optionally fails on the n-th one
    #[derive(Clone, Default)]
    struct RecordingSink {
        written: Arc<Mutex<Vec<usize>>>,
        fail_at: Option<usize>,
    }

    impl AudioSink for RecordingSink {
        fn min_buffer_size(&self) -> usize {
            0
        }

        fn play(&mut self) -> Result<()> {
            Ok(())
        }

        fn write(&mut self, pcm: &[u8]) -> Result<usize> {
            let mut written = self.written.lock();
            if Some(written.len()) == self.fail_at {
                return Err(PumpError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "device gone",
                )));
            }
            written.push(pcm.len());
            Ok(pcm.len())
        }

        fn stop(&mut self) -> Result<()> {
            Ok(())
        }

        fn release(&mut self) {}
    }

    fn pump() -> PlaybackPump {
        PlaybackPump::new(PlaybackConfig { chunk_bytes: 4 })
    }

    #[test]
    fn test_start_requires_session() {
        let mut pump = pump();
        assert_eq!(pump.state(), PlaybackState::NotReady);
        assert!(matches!(
            pump.start(),
            Err(PumpError::IllegalSessionState { .. })
        ));
        assert!(pump.stop().is_err());
    }

    #[test]
    fn test_plays_whole_source_in_chunks() {
        let mut pump = pump();
        let sink = RecordingSink::default();
        let written = sink.written.clone();
        let mut events = pump.subscribe();

        pump.create_session_from_reader(Box::new(Cursor::new(vec![0u8; 10])), Box::new(sink))
            .unwrap();
        assert_eq!(pump.state(), PlaybackState::Ready);
        assert!(pump.stop().is_err());

        pump.start().unwrap();
        assert!(pump.start().is_err());
        pump.wait();

        assert_eq!(*written.lock(), vec![4, 4, 2]);
        assert_eq!(pump.state(), PlaybackState::Stopped);
        assert_eq!(events.try_recv().unwrap(), PlaybackEvent::Started);
        assert_eq!(
            events.try_recv().unwrap(),
            PlaybackEvent::Finished { bytes: 10 }
        );
    }

    #[test]
    fn test_sink_failure_is_announced_once() {
        let mut pump = pump();
        let sink = RecordingSink {
            fail_at: Some(1),
            ..Default::default()
        };
        let mut events = pump.subscribe();
        pump.create_session_from_reader(Box::new(Cursor::new(vec![0u8; 64])), Box::new(sink))
            .unwrap();
        pump.start().unwrap();
        pump.wait();

        assert_eq!(pump.state(), PlaybackState::Stopped);
        assert_eq!(events.try_recv().unwrap(), PlaybackEvent::Started);
        assert!(matches!(events.try_recv().unwrap(), PlaybackEvent::Failed(_)));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_stop_cancels_endless_source() {
        let mut pump = pump();
        let sink = RecordingSink::default();
        let written = sink.written.clone();
        pump.create_session_from_reader(Box::new(std::io::repeat(0)), Box::new(sink))
            .unwrap();
        pump.start().unwrap();
        while written.lock().is_empty() {
            std::thread::yield_now();
        }
        pump.stop().unwrap();
        assert_eq!(pump.state(), PlaybackState::Stopped);
        // stopping again is harmless
        pump.stop().unwrap();
        // every write was a whole chunk
        assert!(written.lock().iter().all(|&n| n == 4));
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut pump = pump();
        pump.create_session_from_reader(
            Box::new(Cursor::new(vec![0u8; 8])),
            Box::new(RecordingSink::default()),
        )
        .unwrap();
        pump.release();
        pump.release();
        assert_eq!(pump.state(), PlaybackState::NotReady);
        assert!(pump.start().is_err());
    }

    #[test]
    fn test_create_session_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.pcm");
        std::fs::write(&path, [1u8; 6]).unwrap();

        let mut pump = pump();
        let out = Arc::new(Mutex::new(Vec::new()));
        struct Shared(Arc<Mutex<Vec<u8>>>);
        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        pump.create_session(&path, Box::new(WriterSink::new(Shared(out.clone()), 0)))
            .unwrap();
        pump.start().unwrap();
        pump.wait();
        assert_eq!(*out.lock(), vec![1u8; 6]);
    }

    #[test]
    fn test_missing_file() {
        let mut pump = pump();
        let err = pump.create_session(
            "/nonexistent/tone.pcm",
            Box::new(RecordingSink::default()),
        );
        assert!(matches!(err, Err(PumpError::Io(_))));
        assert_eq!(pump.state(), PlaybackState::NotReady);
    }
}
