//! Fixed-interval scheduling loop on a background thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::engine::Engine;
use crate::ingest::InboxScanner;

/// Ticks the engine at a fixed interval, or immediately when triggered.
/// When an inbox is attached it is scanned before every tick.
pub struct ScheduleLoop {
    engine: Arc<Engine>,
    interval: Duration,
    inbox: Option<Arc<InboxScanner>>,
    shutdown: Arc<AtomicBool>,
}

impl ScheduleLoop {
    pub fn new(engine: Arc<Engine>, interval: Duration) -> Self {
        Self {
            engine,
            interval,
            inbox: None,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_inbox(mut self, scanner: InboxScanner) -> Self {
        self.inbox = Some(Arc::new(scanner));
        self
    }

    /// Starts the loop in a background thread. A message on `trigger_rx`
    /// runs a tick without waiting for the interval.
    pub fn start(&self, mut trigger_rx: broadcast::Receiver<()>) -> std::io::Result<JoinHandle<()>> {
        let engine = Arc::clone(&self.engine);
        let inbox = self.inbox.clone();
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.interval;

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        std::thread::Builder::new()
            .name("backroom-scheduler".to_string())
            .spawn(move || {
                rt.block_on(async {
                    let mut interval_timer = tokio::time::interval(interval);
                    interval_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

                    log::info!("Scheduling loop started ({} ms interval)", interval.as_millis());
                    loop {
                        if shutdown.load(Ordering::Acquire) {
                            break;
                        }

                        tokio::select! {
                            _ = interval_timer.tick() => {},
                            Ok(()) = trigger_rx.recv() => {
                                log::debug!("Manual tick triggered");
                            },
                        }

                        if shutdown.load(Ordering::Acquire) {
                            break;
                        }

                        if let Some(scanner) = &inbox {
                            if let Err(e) = scanner.scan(&engine) {
                                log::error!("Inbox scan failed: {}", e);
                            }
                        }
                        engine.tick();
                    }
                    log::info!("Scheduling loop stopped");
                });
            })
    }

    /// Signals the loop to stop after the current tick.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}
