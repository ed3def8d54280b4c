use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crossbeam_channel::{Receiver, Sender};

use crate::platform::{
    Completion, CompletionSink, EventKind, MediaEvent, MediaSession, MediaSource, PlatformError,
};

/// What the relay hands to the controller thread.
pub enum Delivery {
    Event(MediaEvent),
    SourceResolved(Result<Arc<dyn MediaSource>, PlatformError>),
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Delivery::Event(event) => f.debug_tuple("Event").field(&event.kind.name()).finish(),
            Delivery::SourceResolved(Ok(source)) => {
                f.debug_tuple("SourceResolved").field(&source.url()).finish()
            }
            Delivery::SourceResolved(Err(e)) => f.debug_tuple("SourceResolved").field(e).finish(),
        }
    }
}

/// Per-session completion sink. Re-arms the session after each event so exactly one event
/// request is outstanding, stops re-arming once the session reports it closed, and
/// forwards everything else to the controller unless a close is in progress.
pub struct EventRelay {
    this: Weak<EventRelay>,
    session: Mutex<Option<Weak<dyn MediaSession>>>,
    deliveries: Sender<Delivery>,
    closed: Sender<()>,
    closing: AtomicBool,
}

/// Controller-side ends of a relay.
pub struct RelayChannels {
    pub deliveries: Receiver<Delivery>,
    pub closed: Receiver<()>,
}

impl EventRelay {
    pub fn new() -> (Arc<Self>, RelayChannels) {
        let (deliveries_tx, deliveries_rx) = crossbeam_channel::unbounded();
        let (closed_tx, closed_rx) = crossbeam_channel::bounded(1);
        let relay = Arc::new_cyclic(|this| EventRelay {
            this: this.clone(),
            session: Mutex::new(None),
            deliveries: deliveries_tx,
            closed: closed_tx,
            closing: AtomicBool::new(false),
        });
        (
            relay,
            RelayChannels {
                deliveries: deliveries_rx,
                closed: closed_rx,
            },
        )
    }

    /// Attach to a session and request its first event.
    pub fn attach(&self, session: &Arc<dyn MediaSession>) -> Result<(), PlatformError> {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::downgrade(session));
        self.arm()
    }

    pub fn set_closing(&self) {
        self.closing.store(true, Ordering::SeqCst);
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    fn arm(&self) -> Result<(), PlatformError> {
        let session = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or(PlatformError::Shutdown)?;
        let sink: Arc<dyn CompletionSink> = self.this.upgrade().ok_or(PlatformError::Shutdown)?;
        session.begin_get_event(sink)
    }

    /// The sink to hand to asynchronous platform calls.
    pub fn sink(&self) -> Option<Arc<dyn CompletionSink>> {
        self.this.upgrade().map(|relay| relay as Arc<dyn CompletionSink>)
    }
}

impl CompletionSink for EventRelay {
    fn complete(&self, completion: Completion) {
        match completion {
            Completion::SourceResolved(result) => {
                if self.is_closing() {
                    if let Ok(source) = result {
                        source.shutdown();
                    }
                    return;
                }
                let _ = self.deliveries.send(Delivery::SourceResolved(result));
            }
            Completion::Event(event) => {
                if event.kind == EventKind::SessionClosed {
                    let _ = self.closed.try_send(());
                    return;
                }
                if let Err(e) = self.arm() {
                    log::warn!("Could not request next session event: {e}");
                }
                if !self.is_closing() {
                    let _ = self.deliveries.send(Delivery::Event(event));
                }
            }
        }
    }
}
