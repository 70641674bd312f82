//! Interrupt handler registry.
//!
//! # Responsibilities
//! - Collect shutdown handlers (close listeners, stop the member server)
//! - Run them in registration order, exactly once, on the first trigger
//! - Turn SIGINT/SIGTERM into a trigger
//!
//! # Design Decisions
//! - A context object shared through `Arc`, not a process global
//! - Two locks: registration guards the handler list, execution serialises
//!   handler passes so a second trigger waits for the first to finish
//! - Handlers registered after the pass started are accepted and never run

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::lifecycle::signals::Signals;

/// A shutdown action.
pub type InterruptHandler = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Registration {
    handlers: Vec<InterruptHandler>,
    fired: bool,
}

/// Ordered, exactly-once shutdown handlers.
pub struct InterruptRegistry {
    registration: Mutex<Registration>,
    execution: Mutex<()>,
    installed: AtomicBool,
    done: watch::Sender<bool>,
}

impl std::fmt::Debug for InterruptRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registration = lock(&self.registration);
        f.debug_struct("InterruptRegistry")
            .field("handlers", &registration.handlers.len())
            .field("fired", &registration.fired)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InterruptRegistry {
    pub fn new() -> Arc<Self> {
        let (done, _) = watch::channel(false);
        Arc::new(Self {
            registration: Mutex::new(Registration::default()),
            execution: Mutex::new(()),
            installed: AtomicBool::new(false),
            done,
        })
    }

    /// Add a handler. Always accepted; inert once the registry has fired.
    pub fn register(&self, handler: InterruptHandler) {
        let mut registration = lock(&self.registration);
        if registration.fired {
            tracing::debug!("Interrupt handler registered after shutdown began; it will not run");
        }
        registration.handlers.push(handler);
    }

    /// Run the handlers now. Returns false if another trigger already ran them.
    ///
    /// Blocks while a concurrent pass is in progress.
    pub fn stop(&self) -> bool {
        let _execution = lock(&self.execution);
        let handlers = {
            let mut registration = lock(&self.registration);
            if registration.fired {
                return false;
            }
            registration.fired = true;
            std::mem::take(&mut registration.handlers)
        };

        tracing::debug!(count = handlers.len(), "Running interrupt handlers");
        for handler in handlers {
            handler();
        }
        self.done.send_replace(true);
        true
    }

    pub fn has_fired(&self) -> bool {
        lock(&self.registration).fired
    }

    /// Wait until a handler pass has completed.
    pub async fn stopped(&self) {
        let mut done = self.done.subscribe();
        let _ = done.wait_for(|done| *done).await;
    }

    /// Install SIGINT/SIGTERM handling. Later calls are no-ops.
    ///
    /// On a signal the handlers run; when running as PID 1 the process then
    /// exits with status 0 directly.
    pub fn handle_interrupts(self: &Arc<Self>) -> std::io::Result<()> {
        if self.installed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut signals = match Signals::install() {
            Ok(signals) => signals,
            Err(e) => {
                self.installed.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        self.on_signal(async move { signals.recv().await });
        Ok(())
    }

    /// Run the handler pass once `signal` resolves to a signal name.
    pub(crate) fn on_signal<F>(self: &Arc<Self>, signal: F) -> JoinHandle<()>
    where
        F: Future<Output = &'static str> + Send + 'static,
    {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let name = signal.await;
            tracing::info!(signal = name, "Received signal, shutting down");

            let pass = Arc::clone(&registry);
            if let Err(e) = tokio::task::spawn_blocking(move || pass.stop()).await {
                tracing::error!(error = %e, "Interrupt handlers panicked");
            }

            if std::process::id() == 1 {
                std::process::exit(0);
            }
        })
    }

    /// Exit the process once any running handler pass has finished.
    pub fn exit(&self, code: i32) -> ! {
        let _execution = lock(&self.execution);
        std::process::exit(code)
    }
}
