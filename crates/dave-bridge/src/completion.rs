//! Worker-to-host completion bridge.
//!
//! Long-running engine work (the pairwise fingerprint) finishes on a worker
//! thread, but its result must reach the host on the host's own thread. The
//! bridge splits each request in two:
//!
//! - [`CompletionToken`]: host side, `!Send`, awaitable or polled with
//!   [`CompletionToken::try_take`]
//! - [`Completer`]: worker side, `Send`, holds only a channel sender and the
//!   token id
//!
//! The completer sends exactly one message over an unbounded channel;
//! [`CompletionBridge::dispatch`] or [`CompletionBridge::run`] receive it on
//! the host thread and resolve the matching token.
//!
//! # Invariants
//!
//! - A token is resolved at most once; a delivery for an unknown or already
//!   resolved id is logged as an error and dropped
//! - Worker threads never touch a token
//! - Every completer delivers something: dropping it unused resolves the
//!   token with [`BridgeError::Abandoned`]
//! - A token the host has dropped is discarded when its result arrives

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    fmt,
    future::{Future, poll_fn},
    pin::Pin,
    rc::{Rc, Weak},
    task::{Context, Poll, Waker},
};

use tokio::sync::mpsc;

use crate::BridgeError;

/// Identifier linking a completer to its token.
pub type TokenId = u64;

/// Lifecycle of a completion token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// No result has arrived.
    Pending,
    /// Result arrived on the host thread and awaits pickup.
    Resolving,
    /// Result was handed to the host.
    Resolved,
}

enum Delivery<T> {
    Value(T),
    Abandoned,
}

struct Message<T> {
    id: TokenId,
    delivery: Delivery<T>,
}

struct Slot<T> {
    state: TokenState,
    result: Option<Result<T, BridgeError>>,
    waker: Option<Waker>,
}

struct Shared<T> {
    next_id: Cell<TokenId>,
    pending: RefCell<HashMap<TokenId, Weak<RefCell<Slot<T>>>>>,
    sender: mpsc::UnboundedSender<Message<T>>,
    receiver: RefCell<mpsc::UnboundedReceiver<Message<T>>>,
}

/// Host-side end of the completion channel.
///
/// Cloning yields another handle to the same channel.
pub struct CompletionBridge<T> {
    shared: Rc<Shared<T>>,
}

impl<T> Clone for CompletionBridge<T> {
    fn clone(&self) -> Self {
        Self { shared: Rc::clone(&self.shared) }
    }
}

impl<T> Default for CompletionBridge<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CompletionBridge<T> {
    /// Creates a bridge with no pending requests.
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            shared: Rc::new(Shared {
                next_id: Cell::new(1),
                pending: RefCell::new(HashMap::new()),
                sender,
                receiver: RefCell::new(receiver),
            }),
        }
    }

    /// Starts a request.
    ///
    /// The token stays on the host thread; the completer goes to whoever
    /// produces the result.
    pub fn begin(&self) -> (CompletionToken<T>, Completer<T>) {
        let id = self.shared.next_id.get();
        self.shared.next_id.set(id + 1);

        let slot =
            Rc::new(RefCell::new(Slot { state: TokenState::Pending, result: None, waker: None }));
        self.shared.pending.borrow_mut().insert(id, Rc::downgrade(&slot));

        let token = CompletionToken { id, slot };
        let completer = Completer { id, sender: Some(self.shared.sender.clone()) };
        (token, completer)
    }

    /// Requests whose result has not arrived yet.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.borrow().len()
    }

    /// Resolves every result that has already arrived. Never blocks.
    ///
    /// Returns the number of deliveries processed.
    pub fn dispatch(&self) -> usize {
        let mut delivered = 0;
        loop {
            let next = self.shared.receiver.borrow_mut().try_recv();
            let Ok(message) = next else {
                break;
            };
            self.deliver(message);
            delivered += 1;
        }
        delivered
    }

    /// Waits for deliveries and resolves them until nothing is pending.
    ///
    /// Intended to run on the host's single-threaded executor, alongside
    /// the tasks awaiting tokens.
    pub async fn run(&self) {
        while self.pending_count() > 0 {
            let message = poll_fn(|cx| self.shared.receiver.borrow_mut().poll_recv(cx)).await;
            match message {
                Some(message) => self.deliver(message),
                None => break,
            }
        }
    }

    fn deliver(&self, message: Message<T>) {
        let Message { id, delivery } = message;
        let result = match delivery {
            Delivery::Value(value) => Ok(value),
            Delivery::Abandoned => Err(BridgeError::Abandoned(id)),
        };

        let entry = self.shared.pending.borrow_mut().remove(&id);
        let Some(weak) = entry else {
            tracing::error!(id, "delivery for unknown completion token, discarding result");
            return;
        };

        let Some(slot) = weak.upgrade() else {
            tracing::trace!(id, "completion token dropped before resolution, discarding result");
            return;
        };

        let waker = {
            let mut slot = slot.borrow_mut();
            if slot.state != TokenState::Pending {
                tracing::error!(id, state = ?slot.state, "completion token resolved twice");
                return;
            }
            slot.result = Some(result);
            slot.state = TokenState::Resolving;
            slot.waker.take()
        };

        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<T> fmt::Debug for CompletionBridge<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionBridge").field("pending", &self.pending_count()).finish()
    }
}

/// Host-side deferred result.
///
/// Resolves to the worker's value, or [`BridgeError::Abandoned`] if the
/// worker dropped its completer.
pub struct CompletionToken<T> {
    id: TokenId,
    slot: Rc<RefCell<Slot<T>>>,
}

impl<T> CompletionToken<T> {
    /// Token identifier.
    pub fn id(&self) -> TokenId {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TokenState {
        self.slot.borrow().state
    }

    /// Takes the result if it has arrived.
    pub fn try_take(&self) -> Option<Result<T, BridgeError>> {
        let mut slot = self.slot.borrow_mut();
        let result = slot.result.take()?;
        slot.state = TokenState::Resolved;
        Some(result)
    }
}

impl<T> Future for CompletionToken<T> {
    type Output = Result<T, BridgeError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.slot.borrow_mut();
        match slot.state {
            TokenState::Pending => {
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            },
            TokenState::Resolving => {
                slot.state = TokenState::Resolved;
                Poll::Ready(slot.result.take().unwrap_or(Err(BridgeError::AlreadyTaken(self.id))))
            },
            TokenState::Resolved => Poll::Ready(Err(BridgeError::AlreadyTaken(self.id))),
        }
    }
}

impl<T> fmt::Debug for CompletionToken<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionToken")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Worker-side end of one request.
///
/// Consumed by [`Completer::complete`]. Dropping it without completing
/// resolves the token as abandoned.
pub struct Completer<T> {
    id: TokenId,
    sender: Option<mpsc::UnboundedSender<Message<T>>>,
}

impl<T> Completer<T> {
    /// Token this completer resolves.
    pub fn id(&self) -> TokenId {
        self.id
    }

    /// Delivers the result to the host thread.
    pub fn complete(mut self, value: T) {
        self.send(Delivery::Value(value));
    }

    fn send(&mut self, delivery: Delivery<T>) {
        let Some(sender) = self.sender.take() else {
            return;
        };
        if sender.send(Message { id: self.id, delivery }).is_err() {
            tracing::trace!(id = self.id, "host bridge closed, dropping completion");
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        self.send(Delivery::Abandoned);
    }
}

impl<T> fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer").field("id", &self.id).finish_non_exhaustive()
    }
}
