//! Background polling of a sensor stream
//!
//! A [`SensorEventProducer`] owns one [`SensorSource`] and, while started,
//! runs a thread that polls it and forwards every sample to a callback.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};

/// How long one poll may block before the stop flag is checked again
const POLL_TIMEOUT: Duration = Duration::from_millis(20);

/// Outcome of polling a sensor source
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorPoll<T> {
    /// A new sample arrived
    Sample(T),
    /// Nothing arrived within the timeout
    Timeout,
    /// The source will never produce again
    Disconnected,
}

/// Platform boundary for a stream of timestamped sensor samples
///
/// Implementations block for at most `timeout` waiting for the next sample.
pub trait SensorSource<T>: Send + 'static {
    fn poll(&mut self, timeout: Duration) -> SensorPoll<T>;
}

impl<T: Send + 'static> SensorSource<T> for Receiver<T> {
    fn poll(&mut self, timeout: Duration) -> SensorPoll<T> {
        match self.recv_timeout(timeout) {
            Ok(sample) => SensorPoll::Sample(sample),
            Err(RecvTimeoutError::Timeout) => SensorPoll::Timeout,
            Err(RecvTimeoutError::Disconnected) => SensorPoll::Disconnected,
        }
    }
}

type BoxedSource<T> = Box<dyn SensorSource<T>>;

/// Runs a polling thread for one sensor stream
///
/// The source moves into the thread on [`start`](Self::start) and comes back
/// on [`stop`](Self::stop), so a producer can be restarted any number of times.
///
/// # Example
/// ```
/// use std::sync::mpsc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use cardboard_tracking::SensorEventProducer;
///
/// let (sender, receiver) = mpsc::channel::<u32>();
/// let mut producer = SensorEventProducer::new(receiver);
///
/// let received = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&received);
/// producer.start(move |_| {
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
///
/// sender.send(7).unwrap();
/// drop(sender);
/// // The thread exits by itself once the channel is drained and closed.
/// while producer.is_running() {
///     std::thread::sleep(std::time::Duration::from_millis(1));
/// }
/// producer.stop();
/// assert_eq!(received.load(Ordering::SeqCst), 1);
/// ```
pub struct SensorEventProducer<T> {
    source: Option<BoxedSource<T>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<BoxedSource<T>>>,
}

impl<T: Send + 'static> SensorEventProducer<T> {
    pub fn new(source: impl SensorSource<T>) -> Self {
        Self {
            source: Some(Box::new(source)),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Start forwarding samples to `callback` on a background thread
    ///
    /// Does nothing when already running or when the source was lost to a
    /// panicking callback.
    pub fn start(&mut self, callback: impl Fn(T) + Send + 'static) {
        if self.worker.is_some() {
            return;
        }
        let Some(mut source) = self.source.take() else {
            warn!("sensor producer has no source to start");
            return;
        };

        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        self.worker = Some(thread::spawn(move || {
            debug!("sensor polling thread started");
            while running.load(Ordering::Acquire) {
                match source.poll(POLL_TIMEOUT) {
                    SensorPoll::Sample(sample) => callback(sample),
                    SensorPoll::Timeout => {}
                    SensorPoll::Disconnected => {
                        warn!("sensor source disconnected, polling thread exiting");
                        break;
                    }
                }
            }
            running.store(false, Ordering::Release);
            debug!("sensor polling thread exiting");
            source
        }));
    }

    /// Stop polling and wait for the thread to exit
    ///
    /// Once this returns the callback will not run again.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        let Some(worker) = self.worker.take() else {
            return;
        };
        match worker.join() {
            Ok(source) => self.source = Some(source),
            Err(_) => warn!("sensor polling thread panicked, source dropped"),
        }
    }

    /// Whether the polling thread is active
    pub fn is_running(&self) -> bool {
        self.worker.is_some() && self.running.load(Ordering::Acquire)
    }
}

impl<T> Drop for SensorEventProducer<T> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
