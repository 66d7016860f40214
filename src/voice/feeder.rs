//! Feeder thread for callback-audio platforms
//!
//! Moves synthesized PCM from the synthesizer's stdout into an
//! [`AudioSink`] in fixed-size chunks until told to stop.

use std::io::{ErrorKind, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::AudioSink;
use crate::{Error, Result};

/// Bytes read from the synthesizer per iteration
pub const CHUNK_SIZE: usize = 4096;

/// Pause after an empty read
const IDLE_SLEEP: Duration = Duration::from_millis(5);

/// Handle to a running feeder thread
pub struct Feeder {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Feeder {
    /// Start a feeder that opens its sink on the feeder thread
    ///
    /// Opening happens on the new thread because output streams are not
    /// always `Send`. Returns once the sink is open.
    ///
    /// # Errors
    ///
    /// Returns error if the thread cannot be spawned or the sink fails to open
    pub fn spawn<R, F, S>(reader: R, open_sink: F) -> Result<Self>
    where
        R: Read + Send + 'static,
        F: FnOnce() -> Result<S> + Send + 'static,
        S: AudioSink,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let handle = thread::Builder::new()
            .name("tts-feeder".to_string())
            .spawn(move || {
                let mut sink = match open_sink() {
                    Ok(sink) => {
                        let _ = ready_tx.send(Ok(()));
                        sink
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                pump(reader, &mut sink, &thread_stop);
                sink.close();
                tracing::debug!("feeder stopped");
            })?;

        let mut feeder = Self {
            stop,
            handle: Some(handle),
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(feeder),
            Ok(Err(e)) => {
                feeder.stop(Duration::from_secs(1));
                Err(e)
            }
            Err(_) => {
                feeder.stop(Duration::from_secs(1));
                Err(Error::Audio("feeder exited before opening the sink".to_string()))
            }
        }
    }

    /// Whether the feeder thread is still moving audio
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the feeder to stop and join it, waiting at most `timeout`
    ///
    /// Returns `false` if the thread was still running at the deadline; it
    /// is then detached and exits on its next read.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        self.stop.store(true, Ordering::Release);

        let Some(handle) = self.handle.take() else {
            return true;
        };

        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                tracing::warn!("feeder did not stop in time, detaching");
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }

        if handle.join().is_err() {
            tracing::warn!("feeder thread panicked");
        }
        true
    }
}

impl Drop for Feeder {
    fn drop(&mut self) {
        self.stop(Duration::from_secs(1));
    }
}

/// Copy chunks from `reader` into `sink` until stopped or the reader fails
fn pump<R: Read, S: AudioSink>(mut reader: R, sink: &mut S, stop: &AtomicBool) {
    let mut buf = [0u8; CHUNK_SIZE];

    while !stop.load(Ordering::Acquire) {
        match reader.read(&mut buf) {
            Ok(0) => thread::sleep(IDLE_SLEEP),
            Ok(n) => {
                if let Err(e) = sink.write(&buf[..n]) {
                    tracing::warn!(error = %e, "audio sink rejected chunk");
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                tracing::debug!(error = %e, "synthesizer output closed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Mutex;

    use super::*;

    /// Sink recording every byte written
    #[derive(Clone, Default)]
    struct MemorySink {
        bytes: Arc<Mutex<Vec<u8>>>,
        closed: Arc<AtomicBool>,
    }

    impl AudioSink for MemorySink {
        fn write(&mut self, chunk: &[u8]) -> Result<()> {
            self.bytes.lock().unwrap().extend_from_slice(chunk);
            Ok(())
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::Release);
        }
    }

    fn wait_for(cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_feeder_moves_all_bytes_in_order() {
        let data: Vec<u8> = (0..3 * CHUNK_SIZE + 17)
            .map(|i| u8::try_from(i % 251).unwrap())
            .collect();
        let sink = MemorySink::default();
        let probe = sink.clone();

        let mut feeder = Feeder::spawn(Cursor::new(data.clone()), move || Ok(sink)).unwrap();

        wait_for(|| probe.bytes.lock().unwrap().len() == data.len());
        assert!(feeder.is_running());
        assert!(feeder.stop(Duration::from_secs(1)));

        assert_eq!(*probe.bytes.lock().unwrap(), data);
        assert!(probe.closed.load(Ordering::Acquire));
    }

    #[test]
    fn test_feeder_idles_on_eof_until_stopped() {
        let sink = MemorySink::default();
        let mut feeder = Feeder::spawn(Cursor::new(Vec::<u8>::new()), move || Ok(sink)).unwrap();

        thread::sleep(Duration::from_millis(30));
        assert!(feeder.is_running());

        let started = Instant::now();
        assert!(feeder.stop(Duration::from_secs(1)));
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(!feeder.is_running());
    }

    #[test]
    fn test_open_failure_is_reported() {
        let result = Feeder::spawn(Cursor::new(Vec::<u8>::new()), || -> Result<MemorySink> {
            Err(Error::Audio("no device".to_string()))
        });

        assert!(matches!(result, Err(Error::Audio(msg)) if msg == "no device"));
    }

    #[test]
    fn test_sink_error_ends_feeder() {
        struct FailingSink;

        impl AudioSink for FailingSink {
            fn write(&mut self, _chunk: &[u8]) -> Result<()> {
                Err(Error::Audio("device gone".to_string()))
            }

            fn close(&mut self) {}
        }

        let feeder = Feeder::spawn(Cursor::new(vec![1u8; 64]), || Ok(FailingSink)).unwrap();
        wait_for(|| !feeder.is_running());
        assert!(!feeder.is_running());
    }
}
