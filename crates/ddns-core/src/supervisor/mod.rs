//! Domain supervisor
//!
//! Runs one [`DomainReconciler`] per configured domain, each on its own task.
//! A panicking reconciler is caught at its task boundary and reported on a
//! fault channel carrying the domain as it stood at the time of the fault;
//! the supervisor restarts it under [`RestartPolicy`].
//!
//! ## Architecture
//!
//! ```text
//!                     ┌──────────────┐
//!                     │  Supervisor  │◀──── DomainFault ─────┐
//!                     └──────────────┘                       │
//!                            │ spawn                         │
//!         ┌──────────────────┼──────────────────┐            │
//!         ▼                  ▼                  ▼            │
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐     │
//! │ Reconciler A │   │ Reconciler B │   │ Reconciler C │─────┘
//! └──────────────┘   └──────────────┘   └──────────────┘
//! ```
//!
//! Domains never share mutable state; a fault in one leaves the others
//! running.
//!
//! A restart count is kept per domain. It starts over once the domain has
//! run for `healthy_reset_secs` without faulting, so only faults close
//! together exhaust `max_restarts`.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Once;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{Instrument, error, info, info_span, warn};

use crate::config::{DdnsConfig, DomainConfig, RestartPolicy};
use crate::error::{Error, Result};
use crate::reconciler::{Collaborators, DomainReconciler, ReconcilerSettings};

/// Events emitted by the supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// All reconcilers spawned
    Started {
        domains: usize,
    },

    /// A reconciler panicked
    DomainFaulted {
        domain: String,
        reason: String,
    },

    /// A faulted domain was scheduled to run again
    DomainRestarted {
        domain: String,
        attempt: u32,
        delay_secs: u64,
    },

    /// Restarts exhausted; the domain is no longer reconciled
    DomainAbandoned {
        domain: String,
        restarts: u32,
    },

    /// Supervisor stopped
    Stopped {
        reason: String,
    },
}

/// A reconciler that ended abnormally
#[derive(Debug, Clone)]
pub struct DomainFault {
    /// The domain as mutated up to the fault
    pub domain: DomainConfig,
    /// Panic payload, when it was a string
    pub reason: String,
    /// Source location of the panic, when it was captured
    pub location: Option<String>,
}

/// Restart bookkeeping for one domain
#[derive(Debug, Clone, Copy)]
struct RestartBudget {
    /// Restarts since the count was last cleared
    attempts: u32,
    /// When the current run started (after any backoff)
    running_since: Instant,
}

impl RestartBudget {
    fn new(now: Instant) -> Self {
        Self {
            attempts: 0,
            running_since: now,
        }
    }

    /// Account for a fault at `now`; returns the restarts used so far
    fn on_fault(&mut self, now: Instant, healthy_reset: Option<Duration>) -> u32 {
        if let Some(reset) = healthy_reset
            && now.saturating_duration_since(self.running_since) >= reset
        {
            self.attempts = 0;
        }
        self.attempts
    }

    /// Record a restart that will begin running at `at`
    fn restarted(&mut self, at: Instant) -> u32 {
        self.attempts += 1;
        self.running_since = at;
        self.attempts
    }
}

/// Owner of all per-domain reconcilers
pub struct Supervisor {
    domains: Vec<DomainConfig>,
    settings: ReconcilerSettings,
    restart: RestartPolicy,
    collaborators: Collaborators,
    event_tx: mpsc::Sender<SupervisorEvent>,
}

impl Supervisor {
    /// Create a supervisor for every domain in `config`
    ///
    /// # Returns
    ///
    /// A tuple of (supervisor, event_receiver)
    pub fn new(
        config: DdnsConfig,
        collaborators: Collaborators,
    ) -> Result<(Self, mpsc::Receiver<SupervisorEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.engine.event_channel_capacity);
        let settings = ReconcilerSettings::from_config(&config);

        let supervisor = Self {
            settings,
            restart: config.engine.restart,
            domains: config.domains,
            collaborators,
            event_tx: tx,
        };

        Ok((supervisor, rx))
    }

    /// Run until `shutdown` flips to `true`
    ///
    /// # Returns
    ///
    /// - `Ok(())`: clean shutdown, every reconciler has finished
    /// - `Err(Error)`: every domain was abandoned
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let (fault_tx, mut fault_rx) = mpsc::channel::<DomainFault>(self.domains.len().max(1));
        let mut tasks = JoinSet::new();
        let mut budgets: HashMap<String, RestartBudget> = HashMap::new();
        let mut live = self.domains.len();

        install_panic_hook();

        let started = Instant::now();
        for domain in &self.domains {
            budgets.insert(domain.domain_name.clone(), RestartBudget::new(started));
            self.spawn_domain(&mut tasks, domain.clone(), None, &shutdown, &fault_tx);
        }

        info!("Supervising {} domain(s)", live);
        self.emit_event(SupervisorEvent::Started { domains: live });

        let result = loop {
            if *shutdown.borrow_and_update() {
                info!("Shutdown signal received");
                break Ok(());
            }

            tokio::select! {
                Some(fault) = fault_rx.recv() => {
                    let name = fault.domain.domain_name.clone();
                    self.emit_event(SupervisorEvent::DomainFaulted {
                        domain: name.clone(),
                        reason: fault.reason.clone(),
                    });

                    let now = Instant::now();
                    let budget = budgets
                        .entry(name.clone())
                        .or_insert_with(|| RestartBudget::new(now));
                    let used = budget.on_fault(now, self.restart.healthy_reset());
                    if used >= self.restart.max_restarts {
                        error!(
                            "Domain {} abandoned after {} restart(s): {}",
                            name, used, fault.reason
                        );
                        self.emit_event(SupervisorEvent::DomainAbandoned {
                            domain: name,
                            restarts: used,
                        });

                        live -= 1;
                        if live == 0 {
                            break Err(Error::Other("every domain was abandoned".to_string()));
                        }
                        continue;
                    }

                    let delay = self.restart.backoff(used + 1);
                    let attempts = budget.restarted(now + delay);
                    warn!(
                        "Restarting domain {} in {}s (attempt {}/{})",
                        name,
                        delay.as_secs(),
                        attempts,
                        self.restart.max_restarts
                    );
                    self.emit_event(SupervisorEvent::DomainRestarted {
                        domain: name,
                        attempt: attempts,
                        delay_secs: delay.as_secs(),
                    });

                    self.spawn_domain(&mut tasks, fault.domain, Some(delay), &shutdown, &fault_tx);
                }

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received");
                        break Ok(());
                    }
                }
            }
        };

        // Reconcilers observe the same watch; wait for them to wind down.
        if result.is_err() {
            tasks.abort_all();
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined
                && !e.is_cancelled()
            {
                warn!("Reconciler task ended abnormally: {}", e);
            }
        }

        let reason = match &result {
            Ok(()) => "Shutdown signal".to_string(),
            Err(e) => e.to_string(),
        };
        self.emit_event(SupervisorEvent::Stopped { reason });
        info!("Supervisor stopped");

        result
    }

    fn spawn_domain(
        &self,
        tasks: &mut JoinSet<()>,
        domain: DomainConfig,
        delay: Option<Duration>,
        shutdown: &watch::Receiver<bool>,
        fault_tx: &mpsc::Sender<DomainFault>,
    ) {
        let span = info_span!("reconciler", domain = %domain.domain_name);
        let task = supervise_domain(
            domain,
            self.settings,
            self.collaborators.clone(),
            delay,
            shutdown.clone(),
            fault_tx.clone(),
        );
        tasks.spawn(task.instrument(span));
    }

    fn emit_event(&self, event: SupervisorEvent) {
        if self.event_tx.try_send(event).is_err() {
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }
}

/// Body of one domain task: optional backoff, then the reconcile loop
async fn supervise_domain(
    domain: DomainConfig,
    settings: ReconcilerSettings,
    collaborators: Collaborators,
    delay: Option<Duration>,
    mut shutdown: watch::Receiver<bool>,
    fault_tx: mpsc::Sender<DomainFault>,
) {
    if let Some(delay) = delay {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => return,
        }
    }

    let mut reconciler = DomainReconciler::new(domain, settings, collaborators);
    let outcome = AssertUnwindSafe(reconciler.run(shutdown))
        .catch_unwind()
        .await;

    if let Err(payload) = outcome {
        let reason = panic_reason(payload.as_ref());
        let context = take_panic_context();
        let location = context.as_ref().map(|c| c.location.clone());

        match context {
            Some(PanicContext {
                location,
                backtrace,
            }) if backtrace.status() == BacktraceStatus::Captured => {
                error!("Reconciler panicked at {}: {}\n{}", location, reason, backtrace)
            }
            Some(PanicContext { location, .. }) => {
                error!("Reconciler panicked at {}: {}", location, reason)
            }
            None => error!("Reconciler panicked: {}", reason),
        }

        let fault = DomainFault {
            domain: reconciler.into_domain(),
            reason,
            location,
        };
        if fault_tx.send(fault).await.is_err() {
            warn!("Supervisor gone, fault not reported");
        }
    }
}

/// Where the most recent panic on this thread happened
struct PanicContext {
    location: String,
    backtrace: Backtrace,
}

thread_local! {
    static LAST_PANIC: RefCell<Option<PanicContext>> = const { RefCell::new(None) };
}

/// Record location and backtrace of every panic before unwinding starts.
///
/// The hook runs on the panicking thread, which is the thread whose
/// `catch_unwind` then observes the panic, so the context is read back
/// within the same poll. The previous hook still runs.
fn install_panic_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let location = info
                .location()
                .map(|l| l.to_string())
                .unwrap_or_else(|| "unknown location".to_string());
            LAST_PANIC.with(|slot| {
                *slot.borrow_mut() = Some(PanicContext {
                    location,
                    backtrace: Backtrace::capture(),
                });
            });
            previous(info);
        }));
    });
}

fn take_panic_context() -> Option<PanicContext> {
    LAST_PANIC.with(|slot| slot.borrow_mut().take())
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
