//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of Mailsump.
//
// Mailsump is free software: you can  redistribute it and/or modify it under
// the terms of  the GNU General Public  License as published  by the Free
// Software Foundation, either version  3 of the License, or (at your option)
// any later version.
//
// Mailsump is distributed  in the hope that  it will be useful,  but WITHOUT
// ANY WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or
// FITNESS FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License
// for more details.
//
// You should have received a copy of the GNU General Public License along
// with Mailsump. If not, see <http://www.gnu.org/licenses/>.

//! In-process pub/sub fan-out of store events.
//!
//! Publishing never blocks the storage operations: events are handed to
//! a single fan-out thread over an unbounded queue, and that thread
//! delivers to each subscriber over a bounded one. A subscriber that
//! stays full past a short timeout is dropped and unregistered; the
//! websocket layer this feeds exhibits exactly that behaviour when a
//! browser tab goes to sleep.

use std::thread;
use std::time::Duration;

use crossbeam::channel::{
    bounded, unbounded, Receiver, RecvTimeoutError, SendTimeoutError,
    Sender, TryRecvError,
};
use log::warn;

use crate::store::model::Event;

/// Capacity of each subscriber's delivery queue.
const SUBSCRIBER_BUFFER: usize = 64;
/// How long delivery to a full subscriber queue may block the fan-out
/// thread before the subscriber is dropped.
const DELIVERY_TIMEOUT: Duration = Duration::from_millis(250);

/// Subscribe to all mailboxes.
pub const FILTER_ALL: &str = "*";

enum Command {
    Publish(Event),
    Subscribe(Registration),
    Close,
}

struct Registration {
    filter: String,
    queue: Sender<Event>,
}

impl Registration {
    fn wants(&self, event: &Event) -> bool {
        match event.mailbox() {
            Some(mailbox) => {
                self.filter == FILTER_ALL || self.filter == mailbox
            },
            // Lifecycle events go to everyone
            None => true,
        }
    }
}

/// A subscriber's receiving end.
///
/// Dropping the subscription unregisters it; the fan-out thread notices
/// the disconnected queue at the next delivery.
#[derive(Debug)]
pub struct Subscription {
    queue: Receiver<Event>,
}

impl Subscription {
    /// Block until the next event, or `None` once the store has closed
    /// and the queue has drained.
    pub fn recv(&self) -> Option<Event> {
        self.queue.recv().ok()
    }

    /// Block for at most `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Event> {
        match self.queue.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                None
            },
        }
    }

    /// The next already-queued event, if any.
    pub fn try_recv(&self) -> Option<Event> {
        match self.queue.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }
}

/// The fan-out hub. One per store.
pub struct Notifier {
    inbound: Sender<Command>,
    thread: std::sync::Mutex<Option<thread::JoinHandle<()>>>,
}

impl Notifier {
    pub fn new(quiet: bool) -> Self {
        let (inbound, commands) = unbounded();
        let thread = thread::Builder::new()
            .name("notify".to_owned())
            .spawn(move || run(commands, quiet))
            .expect("failed to spawn notifier thread");

        Notifier {
            inbound,
            thread: std::sync::Mutex::new(Some(thread)),
        }
    }

    /// Queue an event for delivery. Never blocks.
    pub fn publish(&self, event: Event) {
        // A send error means the hub already shut down; subscribers got
        // their Closed event and there is nobody left to tell
        let _ = self.inbound.send(Command::Publish(event));
    }

    /// Register a subscriber for one mailbox, or all of them with
    /// [`FILTER_ALL`].
    pub fn subscribe(&self, filter: &str) -> Subscription {
        let (tx, rx) = bounded(SUBSCRIBER_BUFFER);
        let _ = self.inbound.send(Command::Subscribe(Registration {
            filter: filter.to_owned(),
            queue: tx,
        }));
        Subscription { queue: rx }
    }

    /// Deliver a final `Closed` event to every subscriber and stop the
    /// fan-out thread. Idempotent.
    pub fn close(&self) {
        let _ = self.inbound.send(Command::Close);
        if let Some(thread) = self.thread.lock().unwrap().take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.close();
    }
}

fn run(commands: Receiver<Command>, quiet: bool) {
    let mut subscribers: Vec<Registration> = Vec::new();

    for command in commands.iter() {
        match command {
            Command::Subscribe(registration) => {
                subscribers.push(registration)
            },
            Command::Publish(event) => {
                subscribers.retain(|sub| {
                    if !sub.wants(&event) {
                        return true;
                    }
                    match sub
                        .queue
                        .send_timeout(event.clone(), DELIVERY_TIMEOUT)
                    {
                        Ok(()) => true,
                        Err(SendTimeoutError::Timeout(_)) => {
                            if !quiet {
                                warn!(
                                    "[notify] dropping subscriber to {}: \
                                     queue full for over {:?}",
                                    sub.filter, DELIVERY_TIMEOUT
                                );
                            }
                            false
                        },
                        Err(SendTimeoutError::Disconnected(_)) => false,
                    }
                });
            },
            Command::Close => break,
        }
    }

    for sub in subscribers {
        let _ = sub
            .queue
            .send_timeout(Event::Closed, DELIVERY_TIMEOUT);
    }
}
