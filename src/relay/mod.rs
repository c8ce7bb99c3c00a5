// =============================================================================
// STREAM RELAY - CONTENT FETCHES PROXIED TO A PLUGIN
// =============================================================================
//
// A plugin living in the helper asks for URLs; the relay fetches them and
// feeds the bytes back as fast as the plugin says it can take them.
//
// - At most MAX_ACTIVE_FETCHES fetches run at once, the rest wait in request
//   order.
// - A fetch is suspended while more than SUSPEND_THRESHOLD bytes are waiting
//   for the plugin and resumed once delivery has caught up.
// - Data goes out oldest arrival first, never more than write_ready allows.
// - Every stream ends with exactly one finished notification.
//
// =============================================================================

use std::collections::BTreeMap;

pub type StreamId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FinishReason {
    /// Fetch completed and every byte was delivered
    Done,
    /// Closed by the consumer or the relay
    Stopped,
    /// The fetch failed
    Error,
}

/// The fetching side, e.g. an HTTP client.
pub trait Fetcher {
    /// Starts fetching. Returns false when the fetch could not be started.
    fn open(&mut self, id: StreamId, url: &str, post: Option<&[u8]>) -> bool;
    fn suspend(&mut self, id: StreamId);
    fn resume(&mut self, id: StreamId);
    fn cancel(&mut self, id: StreamId);
}

/// The plugin side.
pub trait StreamConsumer {
    /// How many bytes the stream can take right now.
    fn write_ready(&mut self, id: StreamId) -> usize;
    /// Returns the number of bytes accepted.
    fn write(&mut self, id: StreamId, data: &[u8]) -> usize;
    fn stream_info(&mut self, id: StreamId, mime: Option<&str>, total: Option<u64>);
    fn redirected(&mut self, id: StreamId, url: &str);
    fn finished(&mut self, id: StreamId, bytes: u64, reason: FinishReason);
    /// A request with a target asks for a page to be shown, not fetched.
    fn open_page(&mut self, url: &str, target: &str);
}

#[derive(Debug, Clone)]
pub struct StreamSession {
    pub id: StreamId,
    pub url: String,
    pub post: Option<Vec<u8>>,
    pub mime: Option<String>,
    pub total: Option<u64>,
    pub bytes_sent: u64,
    pub finish: Option<FinishReason>,
    pending: Vec<u8>,
    suspended: bool,
    opened: bool,
    fetch_complete: bool,
    arrival: u64,
    info_sent: bool,
}

impl StreamSession {
    fn new(id: StreamId, url: &str, mime: Option<&str>, post: Option<Vec<u8>>) -> Self {
        Self {
            id,
            url: url.to_string(),
            post,
            mime: mime.map(str::to_string),
            total: None,
            bytes_sent: 0,
            finish: None,
            pending: Vec::new(),
            suspended: false,
            opened: false,
            fetch_complete: false,
            arrival: 0,
            info_sent: false,
        }
    }

    fn is_fetching(&self) -> bool {
        self.opened && !self.fetch_complete
    }

    fn is_terminal(&self) -> bool {
        match self.finish {
            Some(FinishReason::Stopped) | Some(FinishReason::Error) => true,
            Some(FinishReason::Done) => self.pending.is_empty(),
            None => false,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }
}

pub struct StreamRelay<F: Fetcher, C: StreamConsumer> {
    fetcher: F,
    consumer: C,
    streams: BTreeMap<StreamId, StreamSession>,
    next_id: StreamId,
    arrivals: u64,
}

impl<F: Fetcher, C: StreamConsumer> StreamRelay<F, C> {
    pub const MAX_ACTIVE_FETCHES: usize = 5;
    pub const SUSPEND_THRESHOLD: usize = 64_000;

    pub fn new(fetcher: F, consumer: C) -> Self {
        Self {
            fetcher,
            consumer,
            streams: BTreeMap::new(),
            next_id: 1,
            arrivals: 0,
        }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn consumer(&self) -> &C {
        &self.consumer
    }

    pub fn consumer_mut(&mut self) -> &mut C {
        &mut self.consumer
    }

    pub fn stream(&self, id: StreamId) -> Option<&StreamSession> {
        self.streams.get(&id)
    }

    pub fn active_fetches(&self) -> usize {
        self.streams.values().filter(|s| s.is_fetching()).count()
    }

    pub fn request_stream(
        &mut self,
        url: &str,
        mime: Option<&str>,
        target: Option<&str>,
        post: Option<Vec<u8>>,
    ) -> StreamId {
        let id = self.next_id;
        self.next_id += 1;

        if let Some(target) = target.filter(|t| !t.is_empty()) {
            log::debug!("Stream {} opens {} in {}", id, url, target);
            self.consumer.open_page(url, target);
            self.consumer.finished(id, 0, FinishReason::Done);
            return id;
        }

        log::debug!("Stream {} requested for {}", id, url);
        self.streams.insert(id, StreamSession::new(id, url, mime, post));
        self.pump();
        id
    }

    /// Data from the fetch. Returns the number of bytes taken.
    pub fn write(&mut self, id: StreamId, data: &[u8]) -> usize {
        let Some(stream) = self.streams.get_mut(&id) else {
            log::warn!("Data for unknown stream {}", id);
            return 0;
        };
        if !stream.is_fetching() || stream.finish.is_some() {
            return 0;
        }
        if data.is_empty() {
            return 0;
        }
        if stream.pending.is_empty() {
            self.arrivals += 1;
            stream.arrival = self.arrivals;
        }
        stream.pending.extend_from_slice(data);
        if stream.pending.len() > Self::SUSPEND_THRESHOLD && !stream.suspended {
            log::debug!("Suspending stream {} with {} bytes pending", id, stream.pending.len());
            stream.suspended = true;
            self.fetcher.suspend(id);
        }
        self.pump();
        data.len()
    }

    pub fn set_mime(&mut self, id: StreamId, mime: &str) {
        if let Some(stream) = self.streams.get_mut(&id) {
            stream.mime = Some(if mime.contains("adobe.flash") {
                "application/x-shockwave-flash".to_string()
            } else {
                mime.to_string()
            });
        }
    }

    pub fn set_total_size(&mut self, id: StreamId, total: u64) {
        if let Some(stream) = self.streams.get_mut(&id) {
            stream.total = Some(total);
        }
    }

    pub fn redirected(&mut self, id: StreamId, url: &str) {
        if let Some(stream) = self.streams.get_mut(&id) {
            log::debug!("Stream {} redirected to {}", id, url);
            stream.url = url.to_string();
            self.consumer.redirected(id, url);
        }
    }

    /// The fetch ended, successfully or not.
    pub fn finished(&mut self, id: StreamId, result: Result<(), String>) {
        let Some(stream) = self.streams.get_mut(&id) else {
            return;
        };
        stream.fetch_complete = true;
        stream.suspended = false;
        if stream.finish.is_none() {
            stream.finish = Some(match result {
                Ok(()) => FinishReason::Done,
                Err(e) => {
                    log::warn!("Stream {} failed: {}", id, e);
                    FinishReason::Error
                }
            });
        }
        self.pump();
    }

    /// Closes a stream from the consumer side.
    pub fn destroy(&mut self, id: StreamId, reason: FinishReason) {
        let Some(stream) = self.streams.get_mut(&id) else {
            log::warn!("Stream {} not found", id);
            return;
        };
        if stream.is_fetching() {
            self.fetcher.cancel(id);
        }
        stream.fetch_complete = true;
        stream.pending.clear();
        if stream.finish.is_none() || reason != FinishReason::Done {
            stream.finish = Some(reason);
        }
        self.pump();
    }

    /// Closes every stream, e.g. when the helper goes away.
    pub fn shutdown(&mut self) {
        let ids: Vec<StreamId> = self.streams.keys().copied().collect();
        for id in ids {
            self.destroy(id, FinishReason::Stopped);
        }
    }

    /// Delivers what the consumer can take, retires finished streams and
    /// opens queued ones.
    pub fn pump(&mut self) {
        self.deliver();
        loop {
            let retired = self.retire_finished();
            let opened = self.open_queued();
            if !retired && !opened {
                break;
            }
        }
    }

    fn deliver(&mut self) {
        let mut order: Vec<(u64, StreamId)> = self
            .streams
            .values()
            .filter(|s| !s.pending.is_empty())
            .map(|s| (s.arrival, s.id))
            .collect();
        order.sort_unstable();

        for (_, id) in order {
            let Some(stream) = self.streams.get_mut(&id) else {
                continue;
            };
            if !stream.info_sent && stream.bytes_sent == 0 {
                stream.info_sent = true;
                if stream.mime.is_some() || stream.total.is_some() {
                    self.consumer.stream_info(id, stream.mime.as_deref(), stream.total);
                }
            }

            let ready = self.consumer.write_ready(id);
            if ready == 0 {
                continue;
            }
            let chunk = ready.min(stream.pending.len());
            let accepted = self.consumer.write(id, &stream.pending[..chunk]).min(chunk);
            stream.pending.drain(..accepted);
            stream.bytes_sent += accepted as u64;

            if stream.suspended && stream.pending.len() <= Self::SUSPEND_THRESHOLD {
                stream.suspended = false;
                if stream.is_fetching() {
                    log::debug!("Resuming stream {}", id);
                    self.fetcher.resume(id);
                }
            }
        }
    }

    fn retire_finished(&mut self) -> bool {
        let done: Vec<StreamId> = self
            .streams
            .values()
            .filter(|s| s.is_terminal())
            .map(|s| s.id)
            .collect();
        for id in &done {
            if let Some(stream) = self.streams.remove(id) {
                let reason = stream.finish.unwrap_or(FinishReason::Stopped);
                log::debug!("Stream {} finished ({:?}, {} bytes)", id, reason, stream.bytes_sent);
                self.consumer.finished(*id, stream.bytes_sent, reason);
            }
        }
        !done.is_empty()
    }

    fn open_queued(&mut self) -> bool {
        let mut active = self.active_fetches();
        let mut changed = false;
        for stream in self.streams.values_mut() {
            if active >= Self::MAX_ACTIVE_FETCHES {
                break;
            }
            if stream.opened || stream.finish.is_some() {
                continue;
            }
            stream.opened = true;
            changed = true;
            if self.fetcher.open(stream.id, &stream.url, stream.post.as_deref()) {
                active += 1;
            } else {
                log::warn!("Failed to open stream {} for {}", stream.id, stream.url);
                stream.fetch_complete = true;
                stream.finish = Some(FinishReason::Error);
            }
        }
        changed
    }
}
