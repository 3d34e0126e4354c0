//! Groups attachments that arrive as one album into a single batch.
//!
//! Chat platforms deliver an album as separate messages sharing a batch id, with
//! no end marker. The aggregator is an actor: handles send commands over a
//! channel and a periodic sweep inside the actor finalizes every batch that has
//! been quiet for the configured window. Membership changes, the
//! remove-on-finalize step and the bookkeeping of running downloads happen on
//! the actor task only, so a batch is finalized at most once and a flush sees
//! every download started for its owner.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::DialogConfig;
use crate::domain::record::{Attachment, AttachmentSet, MediaCategory, RecordId};
use crate::errors::DialogError;
use crate::ports::{ChatTransport, ConversationKey};

const COMMAND_BUFFER: usize = 256;

/// One media message as received from the chat.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaMessage {
    pub message_id: i64,
    pub category: MediaCategory,
    /// Transport-specific handle used to download the content.
    pub file_ref: String,
    /// Original filename, only meaningful for documents.
    pub file_name: Option<String>,
}

/// The conversation and record a batch belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BatchOwner {
    pub conversation: ConversationKey,
    pub record_id: RecordId,
}

/// Receives downloads nobody flushed. Each album or single item is delivered once.
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn batch_ready(&self, owner: BatchOwner, batch_id: String, attachments: AttachmentSet);
    async fn single_ready(&self, owner: BatchOwner, result: Result<AttachmentSet, DialogError>);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AggregatorSettings {
    pub sweep_interval: Duration,
    pub quiescence: Duration,
}

impl AggregatorSettings {
    pub fn from_config(config: &DialogConfig) -> Self {
        Self { sweep_interval: config.sweep_interval(), quiescence: config.quiescence_window() }
    }
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self { sweep_interval: Duration::from_secs(2), quiescence: Duration::from_secs(5) }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("media aggregator has stopped")]
    Stopped,
}

type DownloadResult = Result<AttachmentSet, DialogError>;

enum Command {
    Append { owner: BatchOwner, batch_id: String, message: MediaMessage, at: Instant },
    Single { owner: BatchOwner, message: MediaMessage },
    Flush { owner: BatchOwner, reply: oneshot::Sender<AttachmentSet> },
    Abandon { owner: BatchOwner },
    Downloaded { id: u64, result: DownloadResult },
}

struct PendingBatch {
    owner: BatchOwner,
    messages: Vec<MediaMessage>,
    last_update: Instant,
}

impl PendingBatch {
    fn push(&mut self, message: MediaMessage, at: Instant) {
        // redelivered messages refresh the clock but are stored once
        if !self.messages.iter().any(|existing| existing.message_id == message.message_id) {
            self.messages.push(message);
        }
        if at > self.last_update {
            self.last_update = at;
        }
    }
}

enum Job {
    Album { batch_id: String, messages: Vec<MediaMessage> },
    Single { message: MediaMessage },
}

impl Job {
    fn batch_id(&self) -> Option<String> {
        match self {
            Self::Album { batch_id, .. } => Some(batch_id.clone()),
            Self::Single { .. } => None,
        }
    }

    async fn run(self, transport: &dyn ChatTransport) -> DownloadResult {
        match self {
            Self::Album { batch_id, messages } => Ok(collect(transport, &batch_id, messages).await),
            Self::Single { message } => download_single(transport, &message).await,
        }
    }
}

/// A download that has started but not reported back.
struct InFlight {
    owner: BatchOwner,
    batch_id: Option<String>,
    abandoned: bool,
}

/// A flush waiting for running downloads of its owner.
struct FlushWaiter {
    remaining: HashSet<u64>,
    attachments: AttachmentSet,
    reply: oneshot::Sender<AttachmentSet>,
}

#[derive(Clone)]
pub struct MediaAggregatorHandle {
    commands: mpsc::Sender<Command>,
}

impl MediaAggregatorHandle {
    pub async fn append(
        &self,
        owner: BatchOwner,
        batch_id: impl Into<String>,
        message: MediaMessage,
    ) -> Result<(), MediaError> {
        let command =
            Command::Append { owner, batch_id: batch_id.into(), message, at: Instant::now() };
        self.commands.send(command).await.map_err(|_| MediaError::Stopped)
    }

    /// Starts downloading an item that was sent on its own.
    ///
    /// The result reaches [`BatchSink::single_ready`] unless a flush for the
    /// same owner claims it first.
    pub async fn single(&self, owner: BatchOwner, message: MediaMessage) -> Result<(), MediaError> {
        self.commands.send(Command::Single { owner, message }).await.map_err(|_| MediaError::Stopped)
    }

    /// Finalizes every pending batch of `owner` now, waits for downloads already
    /// running for it, and returns their contents.
    ///
    /// Flushed items never reach the [`BatchSink`].
    pub async fn flush(&self, owner: BatchOwner) -> Result<AttachmentSet, MediaError> {
        let (reply, response) = oneshot::channel();
        self.commands.send(Command::Flush { owner, reply }).await.map_err(|_| MediaError::Stopped)?;
        response.await.map_err(|_| MediaError::Stopped)
    }

    /// Drops pending batches of `owner` and discards downloads still running for it.
    pub async fn abandon(&self, owner: BatchOwner) -> Result<(), MediaError> {
        self.commands.send(Command::Abandon { owner }).await.map_err(|_| MediaError::Stopped)
    }
}

pub struct MediaAggregator {
    commands: mpsc::Receiver<Command>,
    feedback: mpsc::WeakSender<Command>,
    pending: HashMap<String, PendingBatch>,
    in_flight: HashMap<u64, InFlight>,
    waiters: Vec<FlushWaiter>,
    next_download: u64,
    transport: Arc<dyn ChatTransport>,
    sink: Arc<dyn BatchSink>,
    quiescence: Duration,
}

impl MediaAggregator {
    /// Starts the actor. It stops once every handle has been dropped and the
    /// downloads it started have reported back.
    pub fn spawn(
        settings: AggregatorSettings,
        transport: Arc<dyn ChatTransport>,
        sink: Arc<dyn BatchSink>,
    ) -> (MediaAggregatorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(COMMAND_BUFFER);
        let mut ticker = time::interval(settings.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let actor = Self {
            commands: receiver,
            feedback: sender.downgrade(),
            pending: HashMap::new(),
            in_flight: HashMap::new(),
            waiters: Vec::new(),
            next_download: 0,
            transport,
            sink,
            quiescence: settings.quiescence,
        };
        let task = tokio::spawn(actor.run(ticker));
        (MediaAggregatorHandle { commands: sender }, task)
    }

    async fn run(mut self, mut ticker: Interval) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = ticker.tick() => self.sweep(Instant::now()),
            }
        }

        for (batch_id, batch) in self.pending.drain() {
            let attachments = collect(self.transport.as_ref(), &batch_id, batch.messages).await;
            self.sink.batch_ready(batch.owner, batch_id, attachments).await;
        }
        debug!(event_name = "media.aggregator.stopped", "media aggregator stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Append { owner, batch_id, message, at } => {
                let batch = self.pending.entry(batch_id.clone()).or_insert_with(|| PendingBatch {
                    owner: owner.clone(),
                    messages: Vec::new(),
                    last_update: at,
                });
                if batch.owner != owner {
                    warn!(
                        event_name = "media.batch.owner_conflict",
                        batch_id = %batch_id,
                        "batch id already belongs to another conversation, ignoring message"
                    );
                    return;
                }
                batch.push(message, at);
            }
            Command::Single { owner, message } => {
                self.start_download(owner, Job::Single { message });
            }
            Command::Flush { owner, reply } => self.flush(owner, reply),
            Command::Abandon { owner } => {
                let dropped = self.take_where(|batch| batch.owner == owner);
                let mut discarded = 0;
                for flight in self.in_flight.values_mut().filter(|flight| flight.owner == owner) {
                    flight.abandoned = true;
                    discarded += 1;
                }
                if !dropped.is_empty() || discarded > 0 {
                    info!(
                        event_name = "media.batch.abandoned",
                        record_id = %owner.record_id,
                        batches = dropped.len(),
                        downloads = discarded,
                        "pending media dropped"
                    );
                }
            }
            Command::Downloaded { id, result } => self.finish_download(id, result),
        }
    }

    fn flush(&mut self, owner: BatchOwner, reply: oneshot::Sender<AttachmentSet>) {
        for (batch_id, batch) in self.take_where(|batch| batch.owner == owner) {
            self.start_download(batch.owner, Job::Album { batch_id, messages: batch.messages });
        }

        let claimed: HashSet<u64> =
            self.waiters.iter().flat_map(|waiter| waiter.remaining.iter().copied()).collect();
        let remaining: HashSet<u64> = self
            .in_flight
            .iter()
            .filter(|(id, flight)| {
                flight.owner == owner && !flight.abandoned && !claimed.contains(*id)
            })
            .map(|(id, _)| *id)
            .collect();

        if remaining.is_empty() {
            // the requester may have gone away; nothing to do then
            let _ = reply.send(AttachmentSet::default());
            return;
        }
        self.waiters.push(FlushWaiter { remaining, attachments: AttachmentSet::default(), reply });
    }

    fn sweep(&mut self, now: Instant) {
        let quiescence = self.quiescence;
        let expired =
            self.take_where(|batch| now.saturating_duration_since(batch.last_update) >= quiescence);

        for (batch_id, batch) in expired {
            self.start_download(batch.owner, Job::Album { batch_id, messages: batch.messages });
        }
    }

    fn start_download(&mut self, owner: BatchOwner, job: Job) {
        let id = self.next_download;
        self.next_download += 1;
        let batch_id = job.batch_id();
        self.in_flight.insert(
            id,
            InFlight { owner: owner.clone(), batch_id: batch_id.clone(), abandoned: false },
        );

        let transport = Arc::clone(&self.transport);
        let sink = Arc::clone(&self.sink);
        let feedback = self.feedback.upgrade();
        tokio::spawn(async move {
            let result = job.run(transport.as_ref()).await;
            match feedback {
                Some(feedback) => {
                    // a closed channel means the actor is gone and nobody waits
                    let _ = feedback.send(Command::Downloaded { id, result }).await;
                }
                None => deliver(sink, owner, batch_id, result).await,
            }
        });
    }

    fn finish_download(&mut self, id: u64, result: DownloadResult) {
        let Some(flight) = self.in_flight.remove(&id) else {
            return;
        };

        if let Some(index) = self.waiters.iter().position(|waiter| waiter.remaining.contains(&id)) {
            let waiter = &mut self.waiters[index];
            waiter.remaining.remove(&id);
            match result {
                Ok(attachments) => waiter.attachments.merge(attachments),
                Err(error) => warn!(
                    event_name = "media.download.failed",
                    record_id = %flight.owner.record_id,
                    error = %error,
                    "dropping flushed attachment that could not be downloaded"
                ),
            }
            if waiter.remaining.is_empty() {
                let waiter = self.waiters.swap_remove(index);
                let _ = waiter.reply.send(waiter.attachments);
            }
            return;
        }

        if flight.abandoned {
            debug!(
                event_name = "media.download.discarded",
                record_id = %flight.owner.record_id,
                "download finished after its owner abandoned it"
            );
            return;
        }
        tokio::spawn(deliver(Arc::clone(&self.sink), flight.owner, flight.batch_id, result));
    }

    fn take_where(&mut self, predicate: impl Fn(&PendingBatch) -> bool) -> Vec<(String, PendingBatch)> {
        let ids: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, batch)| predicate(batch))
            .map(|(batch_id, _)| batch_id.clone())
            .collect();
        ids.into_iter().filter_map(|batch_id| self.pending.remove_entry(&batch_id)).collect()
    }
}

async fn deliver(
    sink: Arc<dyn BatchSink>,
    owner: BatchOwner,
    batch_id: Option<String>,
    result: DownloadResult,
) {
    match (batch_id, result) {
        (Some(batch_id), Ok(attachments)) => {
            info!(
                event_name = "media.batch.finalized",
                batch_id = %batch_id,
                record_id = %owner.record_id,
                attachments = attachments.len(),
                "media batch finalized"
            );
            sink.batch_ready(owner, batch_id, attachments).await;
        }
        (Some(batch_id), Err(error)) => warn!(
            event_name = "media.download.failed",
            batch_id = %batch_id,
            error = %error,
            "media batch could not be collected"
        ),
        (None, result) => sink.single_ready(owner, result).await,
    }
}

/// Downloads a batch in message order. Items that fail to download are dropped.
async fn collect(
    transport: &dyn ChatTransport,
    batch_id: &str,
    mut messages: Vec<MediaMessage>,
) -> AttachmentSet {
    messages.sort_by_key(|message| message.message_id);
    messages.dedup_by_key(|message| message.message_id);

    let mut attachments = AttachmentSet::default();
    for (index, message) in messages.into_iter().enumerate() {
        match transport.download_attachment(&message.file_ref).await {
            Ok(bytes) => {
                let filename = message.category.batch_filename(index, message.file_name.as_deref());
                attachments.push(message.category, Attachment { filename, bytes });
            }
            Err(error) => warn!(
                event_name = "media.download.failed",
                batch_id = %batch_id,
                message_id = message.message_id,
                error = %error,
                "dropping attachment that could not be downloaded"
            ),
        }
    }
    attachments
}

/// Downloads an attachment that was sent on its own.
pub async fn download_single(
    transport: &dyn ChatTransport,
    message: &MediaMessage,
) -> Result<AttachmentSet, DialogError> {
    let bytes = transport.download_attachment(&message.file_ref).await.map_err(|error| {
        DialogError::AttachmentDownloadFailed {
            file_ref: message.file_ref.clone(),
            reason: error.to_string(),
        }
    })?;
    let mut attachments = AttachmentSet::default();
    attachments.push(
        message.category,
        Attachment { filename: message.category.single_filename(message.file_name.as_deref()), bytes },
    );
    Ok(attachments)
}
