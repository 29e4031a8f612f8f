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

//! The message store: the single write path for inbound mail and the
//! query surface consumed by the HTTP layer.
//!
//! Every stored message owns five classes of keys (see `keys`): the raw
//! blob, the summary, the parsed representation, the read flag, and one
//! index entry per search token. A successful `store` commits all of
//! them in one atomic batch, so a message is searchable by the time the
//! caller has its ID, and a failed backend write leaves nothing behind.

use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use log::{info, warn};

use super::keys;
use super::kv::{KvBackend, MemoryBackend, RedbBackend};
use super::model::{
    Event, MailboxStat, MessageSummary, ParsedMessage, PartContent,
};
use super::notify::{Notifier, Subscription};
use super::prune::Pruner;
use super::token;
use super::{id, prune};
use crate::mime::parse;
use crate::support::cancel::Cancel;
use crate::support::config::Config;
use crate::support::error::Error;
use crate::support::safe_name::is_safe_mailbox_name;

/// File name of the database inside `data_dir`.
const DB_FILE: &str = "mailsump.redb";

/// Hard cap applied to `limit` in list and search.
const MAX_PAGE: usize = 1000;

/// Length budget for summary snippets, in characters.
const SNIPPET_LEN: usize = 200;

/// How many fresh IDs to try before conceding that something is deeply
/// wrong with the random number generator.
const MAX_ID_ATTEMPTS: u32 = 10;

/// Number of keys deleted per batch by `delete_all_messages`.
const DELETE_CHUNK: usize = 512;

/// An open message store.
///
/// Cheap to share: all operations take `&self` and are safe under
/// concurrent callers. `close` (or dropping the store) stops the
/// background pruner and notifier and closes the backend.
pub struct Store {
    inner: Arc<StoreInner>,
    pruner: Mutex<Option<Pruner>>,
}

/// Store state shared with the pruner thread.
pub(crate) struct StoreInner {
    kv: Box<dyn KvBackend>,
    notifier: Notifier,
    max_messages: usize,
    quiet: bool,
    closed: AtomicBool,
}

impl Store {
    /// Open a store as described by `config`.
    ///
    /// An empty `data_dir` selects the in-memory backend; otherwise the
    /// directory is created if needed and a database file opened inside
    /// it. A pruning thread is started when `max_messages` is non-zero.
    pub fn open(config: Config) -> Result<Self, Error> {
        let kv: Box<dyn KvBackend> = if config.data_dir.is_empty() {
            Box::new(MemoryBackend::new())
        } else {
            let dir = Path::new(&config.data_dir);
            std::fs::create_dir_all(dir)?;
            Box::new(RedbBackend::open(&dir.join(DB_FILE))?)
        };

        if !config.no_logging {
            if config.data_dir.is_empty() {
                info!("[store] using in-memory storage");
            } else {
                info!("[store] using storage in {}", config.data_dir);
            }
        }

        let inner = Arc::new(StoreInner {
            kv,
            notifier: Notifier::new(config.no_logging),
            max_messages: config.max_messages,
            quiet: config.no_logging,
            closed: AtomicBool::new(false),
        });

        let pruner = if config.max_messages > 0 {
            Some(prune::start(Arc::clone(&inner)))
        } else {
            None
        };

        Ok(Store {
            inner,
            pruner: Mutex::new(pruner),
        })
    }

    /// Ingest a raw message into `mailbox` and return its new ID.
    ///
    /// This is the only write path for inbound mail and the only place
    /// IDs are generated. Unparseable content is not an error: the blob
    /// is stored with whatever could be extracted, down to nothing.
    pub fn store(&self, mailbox: &str, raw: &[u8]) -> Result<String, Error> {
        self.inner.check_open()?;
        if !is_safe_mailbox_name(mailbox) {
            return Err(Error::InvalidMailbox);
        }
        self.inner.store(mailbox, raw)
    }

    /// Fetch the parsed representation of a message.
    ///
    /// As a side effect the message is marked read if it was not
    /// already, publishing a `Read` event on the transition. Repeated
    /// fetches are idempotent.
    pub fn get_message(
        &self,
        mailbox: &str,
        id: &str,
    ) -> Result<ParsedMessage, Error> {
        self.inner.check_open()?;
        self.inner.get_message(mailbox, id)
    }

    /// Fetch the stored raw bytes, exactly as they were ingested.
    pub fn get_source(
        &self,
        mailbox: &str,
        id: &str,
    ) -> Result<Vec<u8>, Error> {
        self.inner.check_open()?;
        self.inner
            .kv
            .get(&keys::message_key(mailbox, id, keys::KIND_RAW))?
            .ok_or(Error::NotFound)
    }

    /// Extract one part's decoded content by re-parsing the raw blob.
    ///
    /// Parts are not stored separately; this trades a re-parse for
    /// byte-exact source storage.
    pub fn get_attachment_part(
        &self,
        mailbox: &str,
        id: &str,
        part_id: &str,
    ) -> Result<PartContent, Error> {
        let raw = self.get_source(mailbox, id)?;
        parse::extract_part(&raw, part_id).ok_or(Error::NotFound)
    }

    /// List summaries, newest first, skipping `start` and returning at
    /// most `limit` (0 meaning the cap, and capped at 1000 regardless;
    /// the 0/50 user-facing defaults belong to the transport edge).
    pub fn list(
        &self,
        mailbox: &str,
        start: usize,
        limit: usize,
        cancel: &Cancel,
    ) -> Result<Vec<MessageSummary>, Error> {
        self.inner.check_open()?;
        self.inner.list(mailbox, start, limit, cancel)
    }

    /// Search a mailbox. All tokens of the query must match (AND); the
    /// result is newest-first with `start`/`limit` paging. A query with
    /// no searchable tokens matches nothing.
    pub fn search(
        &self,
        mailbox: &str,
        query: &str,
        start: usize,
        limit: usize,
        cancel: &Cancel,
    ) -> Result<Vec<MessageSummary>, Error> {
        self.inner.check_open()?;
        self.inner.search(mailbox, query, start, limit, cancel)
    }

    /// Like `search`, but a query with no searchable tokens is an error
    /// instead of an empty result.
    pub fn search_strict(
        &self,
        mailbox: &str,
        query: &str,
        start: usize,
        limit: usize,
        cancel: &Cancel,
    ) -> Result<Vec<MessageSummary>, Error> {
        self.inner.check_open()?;
        if token::tokenize_query(query).is_empty() {
            return Err(Error::InvalidQuery);
        }
        self.inner.search(mailbox, query, start, limit, cancel)
    }

    /// Delete one message and all its index entries.
    pub fn delete_message(
        &self,
        mailbox: &str,
        id: &str,
    ) -> Result<(), Error> {
        self.inner.check_open()?;
        self.inner.delete_message(mailbox, id)
    }

    /// Delete every key belonging to `mailbox`, destroying it.
    pub fn delete_all_messages(
        &self,
        mailbox: &str,
        cancel: &Cancel,
    ) -> Result<(), Error> {
        self.inner.check_open()?;
        self.inner.delete_all_messages(mailbox, cancel)
    }

    /// Reset a message's read flag to unread.
    pub fn mark_unread(&self, mailbox: &str, id: &str) -> Result<(), Error> {
        self.inner.check_open()?;

        let sum_key = keys::message_key(mailbox, id, keys::KIND_SUM);
        let read_key = keys::message_key(mailbox, id, keys::KIND_READ);
        if !self.inner.kv.put_guarded(&sum_key, &read_key, &[0])? {
            return Err(Error::NotFound);
        }
        self.inner.notifier.publish(Event::Unread {
            mailbox: mailbox.to_owned(),
            id: id.to_owned(),
        });
        Ok(())
    }

    /// Number of messages currently stored in `mailbox`.
    pub fn count(&self, mailbox: &str) -> Result<usize, Error> {
        self.inner.check_open()?;
        self.inner.count(mailbox)
    }

    /// All mailboxes with their total and unread message counts.
    pub fn mailboxes(&self) -> Result<Vec<MailboxStat>, Error> {
        self.inner.check_open()?;
        self.inner.mailbox_stats()
    }

    /// Register for change events of one mailbox, or all of them with
    /// `notify::FILTER_ALL`.
    pub fn subscribe(&self, filter: &str) -> Result<Subscription, Error> {
        self.inner.check_open()?;
        Ok(self.inner.notifier.subscribe(filter))
    }

    /// Run one pruning cycle synchronously, regardless of the timer.
    pub fn prune_now(&self) -> Result<(), Error> {
        self.inner.check_open()?;
        self.inner.prune_cycle(&|| false)
    }

    /// Shut the store down: stop the pruner, deliver a final `Closed`
    /// event, and close the backend. Any further operation (including a
    /// second `close`) returns `Error::Closed`.
    pub fn close(&self) -> Result<(), Error> {
        if self.inner.closed.swap(true, SeqCst) {
            return Err(Error::Closed);
        }
        if let Some(pruner) = self.pruner.lock().unwrap().take() {
            pruner.stop();
        }
        self.inner.notifier.close();
        self.inner.kv.close()
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl StoreInner {
    pub(crate) fn quiet(&self) -> bool {
        self.quiet
    }

    fn check_open(&self) -> Result<(), Error> {
        if self.closed.load(SeqCst) {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    fn store(&self, mailbox: &str, raw: &[u8]) -> Result<String, Error> {
        let now = Utc::now();
        let msg = catch_unwind(AssertUnwindSafe(|| {
            parse::parse_message(raw, now)
        }))
        .unwrap_or_else(|_| {
            if !self.quiet {
                warn!(
                    "[store] parser panicked on a {}-byte message; \
                     storing it with minimal metadata",
                    raw.len()
                );
            }
            parse::fallback_message(raw, now)
        });
        let tokens = token::tokenize_message(&msg);

        for _ in 0..MAX_ID_ATTEMPTS {
            let id = id::generate(now);
            let raw_key = keys::message_key(mailbox, &id, keys::KIND_RAW);
            if self.kv.get(&raw_key)?.is_some() {
                continue;
            }

            let summary = summarize(&id, &msg);
            let mut batch = Vec::with_capacity(4 + tokens.len());
            batch.push((raw_key, raw.to_vec()));
            batch.push((
                keys::message_key(mailbox, &id, keys::KIND_SUM),
                serde_cbor::to_vec(&summary)?,
            ));
            batch.push((
                keys::message_key(mailbox, &id, keys::KIND_MSG),
                serde_cbor::to_vec(&msg)?,
            ));
            batch.push((
                keys::message_key(mailbox, &id, keys::KIND_READ),
                vec![0],
            ));
            for tok in &tokens {
                batch.push((keys::index_key(mailbox, tok, &id), Vec::new()));
            }

            self.kv.put(&batch)?;
            self.notifier.publish(Event::Inserted {
                mailbox: mailbox.to_owned(),
                summary,
            });
            return Ok(id);
        }

        Err(Error::GaveUpInsertion)
    }

    fn get_message(
        &self,
        mailbox: &str,
        id: &str,
    ) -> Result<ParsedMessage, Error> {
        let encoded = self
            .kv
            .get(&keys::message_key(mailbox, id, keys::KIND_MSG))?
            .ok_or(Error::NotFound)?;
        let msg: ParsedMessage = serde_cbor::from_slice(&encoded)?;

        // Mark read on the unread->read transition only. The write is
        // guarded on the summary key so that racing a delete can never
        // re-create keys for a removed message.
        let read_key = keys::message_key(mailbox, id, keys::KIND_READ);
        let unread = self
            .kv
            .get(&read_key)?
            .map_or(false, |flag| flag.first() == Some(&0));
        if unread {
            let sum_key = keys::message_key(mailbox, id, keys::KIND_SUM);
            if self.kv.put_guarded(&sum_key, &read_key, &[1])? {
                self.notifier.publish(Event::Read {
                    mailbox: mailbox.to_owned(),
                    id: id.to_owned(),
                });
            }
        }

        Ok(msg)
    }

    fn list(
        &self,
        mailbox: &str,
        start: usize,
        limit: usize,
        cancel: &Cancel,
    ) -> Result<Vec<MessageSummary>, Error> {
        let limit = effective_page(limit);
        let prefix = keys::mailbox_prefix(mailbox);
        let keys = self.kv.scan_keys(&prefix, true, 0, 0)?;

        let mut out = Vec::new();
        let mut skipped = 0;
        for key in &keys {
            cancel.check()?;
            let Some(id) = keys::id_from_summary_key(key, mailbox) else {
                continue;
            };
            if skipped < start {
                skipped += 1;
                continue;
            }
            if out.len() == limit {
                break;
            }
            match self.load_summary(mailbox, id)? {
                Some(summary) => out.push(summary),
                None => (),
            }
        }
        Ok(out)
    }

    fn search(
        &self,
        mailbox: &str,
        query: &str,
        start: usize,
        limit: usize,
        cancel: &Cancel,
    ) -> Result<Vec<MessageSummary>, Error> {
        let limit = effective_page(limit);
        let tokens = token::tokenize_query(query);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        // AND semantics: intersect the id set of every token
        let mut matching: Option<BTreeSet<String>> = None;
        for tok in &tokens {
            cancel.check()?;
            let prefix = keys::token_prefix(mailbox, tok);
            let ids: BTreeSet<String> = self
                .kv
                .scan_keys(&prefix, false, 0, 0)?
                .iter()
                .filter_map(|k| keys::id_from_index_key(k))
                .map(str::to_owned)
                .collect();

            matching = Some(match matching {
                None => ids,
                Some(acc) => acc.intersection(&ids).cloned().collect(),
            });
            if matching.as_ref().is_some_and(BTreeSet::is_empty) {
                return Ok(Vec::new());
            }
        }

        let mut out = Vec::new();
        for id in matching
            .unwrap_or_default()
            .iter()
            .rev()
            .skip(start)
        {
            cancel.check()?;
            if out.len() == limit {
                break;
            }
            match self.load_summary(mailbox, id)? {
                Some(summary) => out.push(summary),
                None => {
                    // The index can transiently point at a message a
                    // concurrent delete has already removed
                    if !self.quiet {
                        warn!(
                            "[store] search hit {mailbox}/{id} has no \
                             summary; skipping"
                        );
                    }
                },
            }
        }
        Ok(out)
    }

    fn load_summary(
        &self,
        mailbox: &str,
        id: &str,
    ) -> Result<Option<MessageSummary>, Error> {
        let Some(encoded) = self
            .kv
            .get(&keys::message_key(mailbox, id, keys::KIND_SUM))?
        else {
            return Ok(None);
        };
        let mut summary: MessageSummary = serde_cbor::from_slice(&encoded)?;

        // The read flag is the single source of truth; summaries are
        // written once at ingest and never rewritten
        summary.read = self
            .kv
            .get(&keys::message_key(mailbox, id, keys::KIND_READ))?
            .map_or(false, |flag| flag.first() == Some(&1));
        Ok(Some(summary))
    }

    pub(crate) fn delete_message(
        &self,
        mailbox: &str,
        id: &str,
    ) -> Result<(), Error> {
        let encoded = self
            .kv
            .get(&keys::message_key(mailbox, id, keys::KIND_MSG))?
            .ok_or(Error::NotFound)?;
        let msg: ParsedMessage = serde_cbor::from_slice(&encoded)?;

        let tokens = token::tokenize_message(&msg);
        let mut batch = Vec::with_capacity(4 + tokens.len());
        for kind in [
            keys::KIND_RAW,
            keys::KIND_SUM,
            keys::KIND_MSG,
            keys::KIND_READ,
        ] {
            batch.push(keys::message_key(mailbox, id, kind));
        }
        for tok in &tokens {
            batch.push(keys::index_key(mailbox, tok, id));
        }

        self.kv.delete(&batch)?;
        self.notifier.publish(Event::Deleted {
            mailbox: mailbox.to_owned(),
            id: id.to_owned(),
        });
        Ok(())
    }

    fn delete_all_messages(
        &self,
        mailbox: &str,
        cancel: &Cancel,
    ) -> Result<(), Error> {
        let mut removed = 0usize;
        for prefix in
            [keys::mailbox_prefix(mailbox), keys::index_prefix(mailbox)]
        {
            loop {
                cancel.check()?;
                let chunk =
                    self.kv.scan_keys(&prefix, false, DELETE_CHUNK, 0)?;
                if chunk.is_empty() {
                    break;
                }
                removed += chunk.len();
                self.kv.delete(&chunk)?;
            }
        }

        if !self.quiet {
            info!("[store] deleted {removed} keys under mailbox {mailbox}");
        }
        self.notifier.publish(Event::Truncated {
            mailbox: mailbox.to_owned(),
        });
        Ok(())
    }

    fn count(&self, mailbox: &str) -> Result<usize, Error> {
        let prefix = keys::mailbox_prefix(mailbox);
        Ok(self
            .kv
            .scan_keys(&prefix, false, 0, 0)?
            .iter()
            .filter(|k| keys::id_from_summary_key(k, mailbox).is_some())
            .count())
    }

    fn mailbox_stats(&self) -> Result<Vec<MailboxStat>, Error> {
        let mut stats: Vec<MailboxStat> = Vec::new();
        for key in self.kv.scan_keys(b"m/", false, 0, 0)? {
            let Some(mailbox) = keys::mailbox_from_message_key(&key) else {
                continue;
            };
            let Some(id) = keys::id_from_summary_key(&key, mailbox) else {
                continue;
            };

            let read = self
                .kv
                .get(&keys::message_key(mailbox, id, keys::KIND_READ))?
                .map_or(false, |flag| flag.first() == Some(&1));

            // The scan is ordered, so the current mailbox is always last
            match stats.last_mut() {
                Some(stat) if stat.name == mailbox => {
                    stat.total += 1;
                    stat.unread += usize::from(!read);
                },
                _ => stats.push(MailboxStat {
                    name: mailbox.to_owned(),
                    total: 1,
                    unread: usize::from(!read),
                }),
            }
        }
        Ok(stats)
    }

    /// One pass of the mailbox cap: for every mailbox over the limit,
    /// delete oldest messages until it fits. `stop` is consulted
    /// between deletions.
    pub(crate) fn prune_cycle(
        &self,
        stop: &impl Fn() -> bool,
    ) -> Result<(), Error> {
        if self.max_messages == 0 {
            return Ok(());
        }

        for stat in self.mailbox_stats()? {
            if stat.total <= self.max_messages {
                continue;
            }
            let excess = stat.total - self.max_messages;

            // Forward scan = oldest first, by ID construction
            let oldest: Vec<String> = self
                .kv
                .scan_keys(&keys::mailbox_prefix(&stat.name), false, 0, 0)?
                .iter()
                .filter_map(|k| keys::id_from_summary_key(k, &stat.name))
                .take(excess)
                .map(str::to_owned)
                .collect();

            let mut removed = 0usize;
            for id in &oldest {
                if stop() {
                    return Ok(());
                }
                match self.delete_message(&stat.name, id) {
                    Ok(()) => removed += 1,
                    // Lost a race with an explicit delete; fine
                    Err(Error::NotFound) => (),
                    Err(e) => return Err(e),
                }
            }

            if !self.quiet {
                info!(
                    "[prune] removed {removed} of {} messages from {}",
                    stat.total, stat.name
                );
            }
        }
        Ok(())
    }
}

fn effective_page(limit: usize) -> usize {
    if limit == 0 {
        MAX_PAGE
    } else {
        limit.min(MAX_PAGE)
    }
}

fn summarize(id: &str, msg: &ParsedMessage) -> MessageSummary {
    MessageSummary {
        id: id.to_owned(),
        from: msg.from.clone(),
        to: msg.to.clone(),
        subject: msg.subject.clone(),
        date: msg.date,
        size: msg.size,
        read: false,
        snippet: snippet(msg),
    }
}

/// Whitespace-collapsed opening of the text body (or, failing that, the
/// subject), truncated to `SNIPPET_LEN` characters.
fn snippet(msg: &ParsedMessage) -> String {
    let source = if msg.body_text.trim().is_empty() {
        &msg.subject
    } else {
        &msg.body_text
    };

    let mut out = String::new();
    for word in source.split_whitespace() {
        if out.chars().count() + word.chars().count() >= SNIPPET_LEN {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }

    if out.is_empty() {
        // A single over-long word; truncate it on a char boundary
        out = source.chars().take(SNIPPET_LEN).collect();
    }
    out
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;
    use crate::store::notify::FILTER_ALL;
    use crate::test_data;

    const INBOX: &str = "INBOX";

    fn test_config() -> Config {
        Config {
            data_dir: String::new(),
            max_messages: 0,
            no_logging: true,
        }
    }

    fn memory_store() -> Store {
        Store::open(test_config()).unwrap()
    }

    /// Run a test against the memory backend and then again against a
    /// fresh on-disk store, the way the engine is deployed both ways.
    fn with_stores(test: impl Fn(&Store)) {
        let store = memory_store();
        test(&store);
        store.close().unwrap();

        let dir = TempDir::new().unwrap();
        let store = Store::open(Config {
            data_dir: dir.path().to_str().unwrap().to_owned(),
            ..test_config()
        })
        .unwrap();
        test(&store);
        store.close().unwrap();
    }

    fn synthetic(i: usize) -> Vec<u8> {
        format!(
            "From: From {i} <from-{i}@example.com>\r\n\
             To: To {i} <to-{i}@example.com>\r\n\
             Subject: Subject line {i} end\r\n\
             Content-Type: text/plain; charset=us-ascii\r\n\
             \r\n\
             This is the email body {i} <jdsauk;dwqmdqw;>.\r\n"
        )
        .into_bytes()
    }

    #[test]
    fn text_email_inserts_and_truncate() {
        with_stores(|store| {
            for _ in 0..1000 {
                store.store(INBOX, test_data::PLAIN_TEXT).unwrap();
            }
            assert_eq!(1000, store.count(INBOX).unwrap());

            store.delete_all_messages(INBOX, &Cancel::new()).unwrap();
            assert_eq!(0, store.count(INBOX).unwrap());

            // Truncation is total: not a single message or index key
            // survives
            assert!(store
                .inner
                .kv
                .scan_keys(&keys::mailbox_prefix(INBOX), false, 0, 0)
                .unwrap()
                .is_empty());
            assert!(store
                .inner
                .kv
                .scan_keys(&keys::index_prefix(INBOX), false, 0, 0)
                .unwrap()
                .is_empty());
        });
    }

    #[test]
    fn source_round_trips_byte_exact() {
        with_stores(|store| {
            for raw in [
                test_data::PLAIN_TEXT,
                test_data::MIME_ATTACHMENT,
                test_data::ENCODED_HEADERS,
                b"not really a message at all\x00\xff".as_slice(),
            ] {
                let id = store.store(INBOX, raw).unwrap();
                assert_eq!(raw, store.get_source(INBOX, &id).unwrap());
            }
            store.delete_all_messages(INBOX, &Cancel::new()).unwrap();
        });
    }

    #[test]
    fn retrieve_mime_email() {
        with_stores(|store| {
            let id = store.store(INBOX, test_data::MIME_ATTACHMENT).unwrap();
            let msg = store.get_message(INBOX, &id).unwrap();

            assert_eq!("Sender Smith", msg.from.name);
            assert_eq!("sender@example.com", msg.from.address);
            assert_eq!("inline + attachment", msg.subject);
            assert_eq!(1, msg.to.len());
            assert_eq!("Recipient Ross", msg.to[0].name);
            assert_eq!("recipient@example.com", msg.to[0].address);

            assert_eq!(1, msg.attachments.len());
            assert_eq!("Sample PDF.pdf", msg.attachments[0].filename);
            assert_eq!(1, msg.inline.len());
            assert_eq!("inline-image.jpg", msg.inline[0].filename);

            let attachment = store
                .get_attachment_part(INBOX, &id, &msg.attachments[0].part_id)
                .unwrap();
            assert_eq!(msg.attachments[0].size, attachment.content.len());
            assert_eq!("application/pdf", attachment.content_type);
            assert!(attachment.content.starts_with(b"%PDF-1.4"));

            let inline = store
                .get_attachment_part(INBOX, &id, &msg.inline[0].part_id)
                .unwrap();
            assert_eq!(msg.inline[0].size, inline.content.len());
            assert_eq!("image/jpeg", inline.content_type);

            assert_matches!(
                Err(Error::NotFound),
                store.get_attachment_part(INBOX, &id, "8.8")
            );

            store.delete_all_messages(INBOX, &Cancel::new()).unwrap();
        });
    }

    #[test]
    fn search_finds_exactly_the_matching_messages() {
        with_stores(|store| {
            for i in 0..1000 {
                store.store(INBOX, &synthetic(i)).unwrap();
            }

            let cancel = Cancel::new();
            for i in 1..101 {
                for query in [
                    format!("from-{i}@example.com"),
                    format!("to-{i}@example.com"),
                    format!("Subject line {i} end"),
                    format!("the email body {i} jdsauk dwqmdqw"),
                ] {
                    let summaries = store
                        .search(INBOX, &query, 0, 200, &cancel)
                        .unwrap();
                    assert_eq!(
                        1,
                        summaries.len(),
                        "query {query:?} should match exactly once"
                    );
                    assert_eq!(format!("From {i}"), summaries[0].from.name);
                    assert_eq!(
                        format!("from-{i}@example.com"),
                        summaries[0].from.address
                    );
                    assert_eq!(format!("To {i}"), summaries[0].to[0].name);
                    assert_eq!(
                        format!("to-{i}@example.com"),
                        summaries[0].to[0].address
                    );
                    assert_eq!(
                        format!("Subject line {i} end"),
                        summaries[0].subject
                    );
                }
            }

            let summaries = store
                .search(INBOX, "This is the email body", 0, 200, &cancel)
                .unwrap();
            assert_eq!(200, summaries.len());

            // Newest first
            for pair in summaries.windows(2) {
                assert!(pair[0].id > pair[1].id);
            }

            // No usable tokens: empty result, or an error when strict
            assert!(store
                .search(INBOX, ";;; ...", 0, 200, &cancel)
                .unwrap()
                .is_empty());
            assert_matches!(
                Err(Error::InvalidQuery),
                store.search_strict(INBOX, ";;; ...", 0, 200, &cancel)
            );

            store.delete_all_messages(INBOX, &cancel).unwrap();
        });
    }

    #[test]
    fn listing_is_reverse_chronological_and_complete() {
        let store = memory_store();
        let mut ids = Vec::new();
        for i in 0..30 {
            ids.push(store.store(INBOX, &synthetic(i)).unwrap());
        }

        let cancel = Cancel::new();
        let all = store.list(INBOX, 0, 0, &cancel).unwrap();
        assert_eq!(30, all.len());
        assert_eq!(store.count(INBOX).unwrap(), all.len());
        for pair in all.windows(2) {
            assert!(pair[0].id > pair[1].id, "listing out of order");
        }

        let mut sorted = ids.clone();
        sorted.sort();
        sorted.reverse();
        let listed: Vec<String> =
            all.iter().map(|s| s.id.clone()).collect();
        assert_eq!(sorted, listed);

        // Paging
        let page = store.list(INBOX, 10, 5, &cancel).unwrap();
        assert_eq!(5, page.len());
        assert_eq!(all[10].id, page[0].id);

        // Unknown mailboxes simply list empty
        assert!(store.list("Empty", 0, 0, &cancel).unwrap().is_empty());
    }

    #[test]
    fn count_tracks_interleaved_stores_and_deletes() {
        let store = memory_store();
        let mut ids = Vec::new();
        for i in 0..20 {
            ids.push(store.store(INBOX, &synthetic(i)).unwrap());
            if i % 3 == 0 {
                let id = ids.remove(0);
                store.delete_message(INBOX, &id).unwrap();
            }
        }
        assert_eq!(ids.len(), store.count(INBOX).unwrap());
    }

    #[test]
    fn index_is_sound_and_complete() {
        let store = memory_store();
        let cancel = Cancel::new();

        let mut ids = Vec::new();
        for i in 0..10 {
            ids.push(store.store(INBOX, &synthetic(i)).unwrap());
        }

        for (i, id) in ids.iter().enumerate() {
            let msg = store.get_message(INBOX, id).unwrap();
            let tokens = token::tokenize_message(&msg);
            assert!(!tokens.is_empty());

            // Soundness: every token of the message finds it
            for tok in &tokens {
                let hits = store.search(INBOX, tok, 0, 0, &cancel).unwrap();
                assert!(
                    hits.iter().any(|s| &s.id == id),
                    "token {tok:?} of message {i} does not find it"
                );
            }
        }

        // Completeness: everything a query returns contains all the
        // query's tokens in its token set
        let query = "example com 3";
        let query_tokens = token::tokenize_query(query);
        for summary in store.search(INBOX, query, 0, 0, &cancel).unwrap() {
            let msg = store.get_message(INBOX, &summary.id).unwrap();
            let tokens = token::tokenize_message(&msg);
            for tok in &query_tokens {
                assert!(tokens.contains(tok));
            }
        }
    }

    #[test]
    fn delete_purges_message_and_index() {
        let store = memory_store();
        let cancel = Cancel::new();

        let keep = store.store(INBOX, &synthetic(1)).unwrap();
        let doomed = store.store(INBOX, &synthetic(2)).unwrap();

        store.delete_message(INBOX, &doomed).unwrap();
        assert_matches!(
            Err(Error::NotFound),
            store.get_message(INBOX, &doomed)
        );
        assert_matches!(
            Err(Error::NotFound),
            store.delete_message(INBOX, &doomed)
        );
        assert_eq!(1, store.count(INBOX).unwrap());

        // No index key anywhere still mentions the deleted id
        for key in store
            .inner
            .kv
            .scan_keys(&keys::index_prefix(INBOX), false, 0, 0)
            .unwrap()
        {
            let id = keys::id_from_index_key(&key).unwrap().to_owned();
            assert_ne!(doomed, id, "index still references deleted message");
        }

        let hits = store.search(INBOX, "example", 0, 0, &cancel).unwrap();
        assert_eq!(1, hits.len());
        assert_eq!(keep, hits[0].id);
    }

    #[test]
    fn pruner_keeps_the_newest_messages() {
        let store = Store::open(Config {
            max_messages: 10,
            ..test_config()
        })
        .unwrap();

        let mut ids = Vec::new();
        for i in 0..25 {
            ids.push(store.store(INBOX, &synthetic(i)).unwrap());
        }

        store.prune_now().unwrap();
        assert_eq!(10, store.count(INBOX).unwrap());

        ids.sort();
        let expected: Vec<String> =
            ids.iter().rev().take(10).cloned().collect();
        let surviving: Vec<String> = store
            .list(INBOX, 0, 0, &Cancel::new())
            .unwrap()
            .iter()
            .map(|s| s.id.clone())
            .collect();
        assert_eq!(expected, surviving, "pruner evicted the wrong messages");
    }

    #[test]
    fn pruning_disabled_with_zero_cap() {
        let store = memory_store();
        for i in 0..20 {
            store.store(INBOX, &synthetic(i)).unwrap();
        }
        store.prune_now().unwrap();
        assert_eq!(20, store.count(INBOX).unwrap());
    }

    #[test]
    fn subscriber_sees_inserts_in_store_order() {
        let store = memory_store();
        let sub = store.subscribe(INBOX).unwrap();
        // Another mailbox's traffic must not leak into the filter
        store.store("Other", &synthetic(99)).unwrap();

        let mut expected = Vec::new();
        for i in 0..3 {
            expected.push(store.store(INBOX, &synthetic(i)).unwrap());
        }

        for id in &expected {
            match sub.recv_timeout(Duration::from_secs(5)) {
                Some(Event::Inserted { mailbox, summary }) => {
                    assert_eq!(INBOX, mailbox);
                    assert_eq!(*id, summary.id);
                    assert!(!summary.read);
                },
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[test]
    fn read_state_transitions_publish_once() {
        let store = memory_store();
        let id = store.store(INBOX, test_data::PLAIN_TEXT).unwrap();
        let sub = store.subscribe(INBOX).unwrap();

        assert!(!store
            .list(INBOX, 0, 0, &Cancel::new())
            .unwrap()[0]
            .read);

        store.get_message(INBOX, &id).unwrap();
        store.get_message(INBOX, &id).unwrap();

        assert!(store
            .list(INBOX, 0, 0, &Cancel::new())
            .unwrap()[0]
            .read);

        store.mark_unread(INBOX, &id).unwrap();
        assert!(!store
            .list(INBOX, 0, 0, &Cancel::new())
            .unwrap()[0]
            .read);

        // Exactly one Read despite two fetches, then the Unread
        assert_matches!(
            Some(Event::Read { .. }),
            sub.recv_timeout(Duration::from_secs(5))
        );
        assert_matches!(
            Some(Event::Unread { .. }),
            sub.recv_timeout(Duration::from_secs(5))
        );
        assert_matches!(None, sub.try_recv());

        assert_matches!(
            Err(Error::NotFound),
            store.mark_unread(INBOX, "01BX5ZZKBKACTAV9WEVGEMMVRZ")
        );
    }

    #[test]
    fn delete_events_and_truncate_events() {
        let store = memory_store();
        let id = store.store(INBOX, test_data::PLAIN_TEXT).unwrap();
        store.store(INBOX, test_data::PLAIN_TEXT).unwrap();

        let sub = store.subscribe(FILTER_ALL).unwrap();
        store.delete_message(INBOX, &id).unwrap();
        store.delete_all_messages(INBOX, &Cancel::new()).unwrap();

        match sub.recv_timeout(Duration::from_secs(5)) {
            Some(Event::Deleted { mailbox, id: deleted }) => {
                assert_eq!(INBOX, mailbox);
                assert_eq!(id, deleted);
            },
            other => panic!("unexpected event: {other:?}"),
        }
        assert_matches!(
            Some(Event::Truncated { .. }),
            sub.recv_timeout(Duration::from_secs(5))
        );
    }

    #[test]
    fn mailboxes_report_totals_and_unread() {
        let store = memory_store();
        let first = store.store(INBOX, test_data::PLAIN_TEXT).unwrap();
        store.store(INBOX, test_data::PLAIN_TEXT).unwrap();
        store.store("queue", test_data::PLAIN_TEXT).unwrap();

        store.get_message(INBOX, &first).unwrap();

        let stats = store.mailboxes().unwrap();
        assert_eq!(2, stats.len());
        assert_eq!(
            MailboxStat {
                name: INBOX.to_owned(),
                total: 2,
                unread: 1,
            },
            stats[0]
        );
        assert_eq!(
            MailboxStat {
                name: "queue".to_owned(),
                total: 1,
                unread: 1,
            },
            stats[1]
        );
    }

    #[test]
    fn invalid_mailbox_names_are_rejected_at_ingest() {
        let store = memory_store();
        for name in ["", "has space", "a/b", ".hidden", "#news"] {
            assert_matches!(
                Err(Error::InvalidMailbox),
                store.store(name, test_data::PLAIN_TEXT)
            );
        }
    }

    #[test]
    fn hopeless_bytes_are_still_stored() {
        let store = memory_store();
        let raw = b"\xff\xfe\x00\x01 not mail";
        let id = store.store(INBOX, raw).unwrap();

        let msg = store.get_message(INBOX, &id).unwrap();
        assert_eq!("", msg.subject);
        assert!(msg.attachments.is_empty());
        assert_eq!(raw.as_slice(), store.get_source(INBOX, &id).unwrap());
        assert_eq!(1, store.count(INBOX).unwrap());
    }

    #[test]
    fn cancellation_aborts_queries() {
        let store = memory_store();
        store.store(INBOX, test_data::PLAIN_TEXT).unwrap();

        let cancel = Cancel::new();
        cancel.cancel();
        assert_matches!(
            Err(Error::Cancelled),
            store.list(INBOX, 0, 0, &cancel)
        );
        assert_matches!(
            Err(Error::Cancelled),
            store.search(INBOX, "plain", 0, 0, &cancel)
        );
        assert_matches!(
            Err(Error::Cancelled),
            store.delete_all_messages(INBOX, &cancel)
        );
        assert_eq!(1, store.count(INBOX).unwrap());
    }

    #[test]
    fn operations_after_close_fail_with_closed() {
        let store = memory_store();
        store.store(INBOX, test_data::PLAIN_TEXT).unwrap();
        store.close().unwrap();

        assert_matches!(
            Err(Error::Closed),
            store.store(INBOX, test_data::PLAIN_TEXT)
        );
        assert_matches!(
            Err(Error::Closed),
            store.list(INBOX, 0, 0, &Cancel::new())
        );
        assert_matches!(Err(Error::Closed), store.count(INBOX));
        assert_matches!(Err(Error::Closed), store.subscribe(INBOX));
        assert_matches!(Err(Error::Closed), store.close());
    }

    #[test]
    fn subscribers_receive_closed_on_shutdown() {
        let store = memory_store();
        let sub = store.subscribe(FILTER_ALL).unwrap();
        store.close().unwrap();
        assert_matches!(
            Some(Event::Closed),
            sub.recv_timeout(Duration::from_secs(5))
        );
    }

    #[test]
    fn disk_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            data_dir: dir.path().to_str().unwrap().to_owned(),
            ..test_config()
        };

        let id;
        {
            let store = Store::open(config.clone()).unwrap();
            id = store.store(INBOX, test_data::MIME_ATTACHMENT).unwrap();
            store.close().unwrap();
        }

        let store = Store::open(config).unwrap();
        assert_eq!(1, store.count(INBOX).unwrap());
        assert_eq!(
            test_data::MIME_ATTACHMENT,
            store.get_source(INBOX, &id).unwrap()
        );
        let hits = store
            .search(INBOX, "attachment", 0, 0, &Cancel::new())
            .unwrap();
        assert_eq!(1, hits.len());
    }

    #[test]
    fn snippets_come_from_the_body_and_stay_short() {
        let store = memory_store();
        store.store(INBOX, test_data::PLAIN_TEXT).unwrap();
        let summary =
            &store.list(INBOX, 0, 0, &Cancel::new()).unwrap()[0];
        assert!(summary
            .snippet
            .starts_with("This is a plain text message"));

        // Body-less message with an enormous subject: the snippet is
        // the truncated subject
        let subject = "s".repeat(5000);
        let raw = format!("Subject: {subject}\r\n\r\n").into_bytes();
        store.store("big", &raw).unwrap();
        let summary = &store.list("big", 0, 0, &Cancel::new()).unwrap()[0];
        assert!(summary.snippet.chars().count() <= 200);
        assert!(summary.snippet.starts_with("sss"));
    }

    #[test]
    fn encoded_headers_are_searchable_decoded() {
        let store = memory_store();
        store.store(INBOX, test_data::ENCODED_HEADERS).unwrap();

        let cancel = Cancel::new();
        // "Résumé" tokenises from the decoded subject
        let hits = store.search(INBOX, "résumé", 0, 0, &cancel).unwrap();
        assert_eq!(1, hits.len());
        assert_eq!("Résumé attached", hits[0].subject);
        assert_eq!("René Fournier", hits[0].from.name);

        // And the qp ISO 8859-1 body decodes into tokens too
        let hits = store.search(INBOX, "naïf", 0, 0, &cancel).unwrap();
        assert_eq!(1, hits.len());
    }
}
