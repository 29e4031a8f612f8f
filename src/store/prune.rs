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

//! The background task enforcing the per-mailbox message cap.
//!
//! One thread per store, started only when a cap is configured. Each
//! tick walks the mailboxes and deletes the oldest messages of any
//! mailbox over the cap. Ticks run serially by construction (there is
//! only the one thread, and it does not tick again until a cycle
//! completes); shutdown is honoured between deletions, not within one.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::error;

use super::message_store::StoreInner;

/// Time between pruning cycles.
pub const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

pub struct Pruner {
    shutdown: Sender<()>,
    thread: Option<thread::JoinHandle<()>>,
}

/// Start the pruning thread for the given store.
pub fn start(inner: Arc<StoreInner>) -> Pruner {
    let (shutdown, signal) = bounded(1);
    let thread = thread::Builder::new()
        .name("prune".to_owned())
        .spawn(move || run(inner, signal))
        .expect("failed to spawn pruner thread");

    Pruner {
        shutdown,
        thread: Some(thread),
    }
}

impl Pruner {
    /// Signal shutdown and wait for the thread to exit.
    pub fn stop(mut self) {
        let _ = self.shutdown.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run(inner: Arc<StoreInner>, signal: Receiver<()>) {
    loop {
        match signal.recv_timeout(PRUNE_INTERVAL) {
            Err(RecvTimeoutError::Timeout) => {
                // Peek only; the signal itself is consumed by the outer
                // recv so that shutdown is never lost mid-cycle
                let stop = || !signal.is_empty();
                if let Err(e) = inner.prune_cycle(&stop) {
                    if !inner.quiet() {
                        error!("[prune] cycle failed: {e}");
                    }
                }
            },
            // Shutdown signal, or the store dropped its handle
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
