// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory job source for tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use printlink_core::error::{PrintlinkError, Result};

use crate::link::{Connector, Link};

#[derive(Default)]
struct ServerInner {
    unreachable: bool,
    connects: Vec<Instant>,
    links: Vec<LinkRecord>,
}

struct LinkRecord {
    to_client: Option<mpsc::UnboundedSender<String>>,
    alive: Arc<AtomicBool>,
    broken: Arc<AtomicBool>,
    received: Arc<Mutex<Vec<String>>>,
    closed_by_client: Arc<AtomicBool>,
}

/// In-memory job source.
#[derive(Clone, Default)]
pub(crate) struct FakeSource(Arc<Mutex<ServerInner>>);

impl FakeSource {
    pub(crate) fn set_reachable(&self, reachable: bool) {
        self.0.lock().unwrap().unreachable = !reachable;
    }

    /// Drop the newest link from the source side.
    pub(crate) fn drop_link(&self) {
        let mut inner = self.0.lock().unwrap();
        if let Some(link) = inner.links.last_mut() {
            link.alive.store(false, Ordering::SeqCst);
            link.to_client = None;
        }
    }

    /// Writes to the newest link start failing; it still looks open.
    pub(crate) fn break_writes(&self) {
        let inner = self.0.lock().unwrap();
        if let Some(link) = inner.links.last() {
            link.broken.store(true, Ordering::SeqCst);
        }
    }

    /// The newest link reports itself closed without the read side
    /// noticing.
    pub(crate) fn go_quiet(&self) {
        let inner = self.0.lock().unwrap();
        if let Some(link) = inner.links.last() {
            link.alive.store(false, Ordering::SeqCst);
        }
    }

    pub(crate) fn push(&self, text: &str) {
        let inner = self.0.lock().unwrap();
        let link = inner.links.last().expect("no link");
        link.to_client
            .as_ref()
            .expect("link dropped")
            .send(text.to_string())
            .unwrap();
    }

    pub(crate) fn received(&self, link: usize) -> Vec<String> {
        self.0.lock().unwrap().links[link].received.lock().unwrap().clone()
    }

    pub(crate) fn link_count(&self) -> usize {
        self.0.lock().unwrap().links.len()
    }

    pub(crate) fn closed_by_client(&self, link: usize) -> bool {
        self.0.lock().unwrap().links[link]
            .closed_by_client
            .load(Ordering::SeqCst)
    }

    pub(crate) fn connects(&self) -> Vec<Instant> {
        self.0.lock().unwrap().connects.clone()
    }
}

#[async_trait]
impl Connector for FakeSource {
    async fn connect(&self) -> Result<Box<dyn Link>> {
        let mut inner = self.0.lock().unwrap();
        inner.connects.push(Instant::now());
        if inner.unreachable {
            return Err(PrintlinkError::Connect("connection refused".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(true));
        let broken = Arc::new(AtomicBool::new(false));
        let received = Arc::new(Mutex::new(Vec::new()));
        let closed_by_client = Arc::new(AtomicBool::new(false));
        inner.links.push(LinkRecord {
            to_client: Some(tx),
            alive: Arc::clone(&alive),
            broken: Arc::clone(&broken),
            received: Arc::clone(&received),
            closed_by_client: Arc::clone(&closed_by_client),
        });
        Ok(Box::new(FakeLink {
            from_source: rx,
            alive,
            broken,
            received,
            closed_by_client,
        }))
    }

    fn endpoint(&self) -> String {
        "fake://source".into()
    }
}

struct FakeLink {
    from_source: mpsc::UnboundedReceiver<String>,
    alive: Arc<AtomicBool>,
    broken: Arc<AtomicBool>,
    received: Arc<Mutex<Vec<String>>>,
    closed_by_client: Arc<AtomicBool>,
}

#[async_trait]
impl Link for FakeLink {
    async fn send(&mut self, text: String) -> Result<()> {
        if !self.alive.load(Ordering::SeqCst) || self.broken.load(Ordering::SeqCst) {
            return Err(PrintlinkError::LinkSend("broken pipe".into()));
        }
        self.received.lock().unwrap().push(text);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        let text = self.from_source.recv().await;
        if text.is_none() {
            self.alive.store(false, Ordering::SeqCst);
        }
        text.map(Ok)
    }

    async fn close(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        self.closed_by_client.store(true, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

