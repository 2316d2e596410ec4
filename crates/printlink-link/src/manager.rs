// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Connection Manager.
//
// A single task owns the active link and walks the state machine
//
//   Disconnected -> Connecting -> Connected -> Reconnecting -> Connecting ...
//
// An establishment pass tries to connect up to `max_retries + 1` times.  If
// it gives up, or an established link is lost, the manager polls with
// throwaway trial links every `reconnect_interval` and starts a new pass
// once one opens.  While connected it forwards jobs to the queue, writes the
// frames other components request through a `LinkHandle`, and pings on the
// keepalive interval.
//
// Acknowledgments that cannot be written while the link is down are kept
// and written first thing on the next link, ahead of the `reconnected`
// notice that makes the source resend its backlog.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument};

use printlink_core::ack::AckSink;
use printlink_core::config::LinkSettings;
use printlink_core::error::{PrintlinkError, Result};
use printlink_core::events::{ClientEvent, EventSink};
use printlink_core::types::{ConnectionState, JobId, PrintJob};
use printlink_core::wire::{InboundFrame, OutboundFrame, decode_inbound};

use crate::link::{Connector, Link};

/// Where the state machine goes next.
enum Step {
    Connect,
    Reconnect,
    Shutdown,
}

/// Cloneable handle for talking to the Connection Manager.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    state: watch::Receiver<ConnectionState>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl LinkHandle {
    /// Queue a frame for the source. It is written as soon as a link is up.
    pub fn send(&self, frame: OutboundFrame) {
        if self.outbound.send(frame).is_err() {
            debug!("connection manager has stopped; frame discarded");
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Ask the manager to close the link and stop.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

impl AckSink for LinkHandle {
    fn acknowledge(&self, job_id: &JobId) {
        self.send(OutboundFrame::Ack {
            job_id: job_id.clone(),
        });
    }

    fn reject(&self, job_id: &JobId, reason: &str) {
        self.send(OutboundFrame::Nack {
            job_id: job_id.clone(),
            reason: reason.to_string(),
        });
    }
}

/// Owns the link to the job source. Consumed by `run`.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    jobs: mpsc::UnboundedSender<PrintJob>,
    events: Arc<dyn EventSink>,
    outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    outbound_open: bool,
    /// Frames that failed to go out on a dying link.
    backlog: VecDeque<OutboundFrame>,
    state: watch::Sender<ConnectionState>,
    shutdown: watch::Receiver<bool>,
    max_retries: u32,
    keepalive_interval: Duration,
    reconnect_interval: Duration,
    connect_timeout: Duration,
    resume_notice_delay: Duration,
}

impl ConnectionManager {
    /// Create a manager delivering jobs to `jobs`, and its handle.
    pub fn new(
        connector: Arc<dyn Connector>,
        settings: &LinkSettings,
        jobs: mpsc::UnboundedSender<PrintJob>,
        events: Arc<dyn EventSink>,
    ) -> (LinkHandle, Self) {
        let (outbound_tx, outbound) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, shutdown) = watch::channel(false);

        let handle = LinkHandle {
            outbound: outbound_tx,
            state: state_rx,
            shutdown: Arc::new(shutdown_tx),
        };
        let manager = Self {
            connector,
            jobs,
            events,
            outbound,
            outbound_open: true,
            backlog: VecDeque::new(),
            state: state_tx,
            shutdown,
            max_retries: settings.max_retries,
            // `interval_at` rejects a zero period.
            keepalive_interval: Duration::from_millis(settings.keepalive_interval_ms.max(1)),
            reconnect_interval: Duration::from_millis(settings.reconnect_interval_ms.max(1)),
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            resume_notice_delay: Duration::from_millis(settings.resume_notice_delay_ms),
        };
        (handle, manager)
    }

    /// Run until shutdown is requested. There is no other way out: every
    /// failure leads back to reconnecting.
    #[instrument(skip_all, fields(endpoint = %self.connector.endpoint()))]
    pub async fn run(mut self) {
        let mut step = Step::Connect;
        loop {
            step = match step {
                Step::Connect => self.establish().await,
                Step::Reconnect => self.await_reachable().await,
                Step::Shutdown => break,
            };
        }
        self.set_state(ConnectionState::Disconnected);
        info!("connection manager stopped");
    }

    /// One establishment pass; serves the link when it comes up.
    async fn establish(&mut self) -> Step {
        self.set_state(ConnectionState::Connecting);

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::select! {
                    _ = wait_for_shutdown(&mut self.shutdown) => return Step::Shutdown,
                    _ = tokio::time::sleep(self.reconnect_interval) => {}
                }
            }
            let connected = tokio::select! {
                _ = wait_for_shutdown(&mut self.shutdown) => return Step::Shutdown,
                connected = open_link(self.connector.as_ref(), self.connect_timeout) => connected,
            };
            match connected {
                Ok(link) => return self.serve(link).await,
                Err(e) => {
                    debug!(attempt = attempt + 1, max_attempts = self.max_retries + 1, "connect attempt failed");
                    self.events.emit(ClientEvent::ConnectFailed {
                        error: e.to_string(),
                    });
                }
            }
        }
        Step::Reconnect
    }

    /// Poll with trial links until one opens.
    async fn await_reachable(&mut self) -> Step {
        self.set_state(ConnectionState::Reconnecting);

        let mut poll = tokio::time::interval_at(
            Instant::now() + self.reconnect_interval,
            self.reconnect_interval,
        );
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut self.shutdown) => return Step::Shutdown,
                _ = poll.tick() => {}
            }
            let trial = tokio::select! {
                _ = wait_for_shutdown(&mut self.shutdown) => return Step::Shutdown,
                trial = open_link(self.connector.as_ref(), self.connect_timeout) => trial,
            };
            match trial {
                Ok(mut trial) => {
                    // Reachable again; the real link comes from a fresh pass.
                    trial.close().await;
                    info!("job source reachable again");
                    return Step::Connect;
                }
                Err(e) => self.events.emit(ClientEvent::TrialLinkFailed {
                    error: e.to_string(),
                }),
            }
        }
    }

    /// Drive an established link until it is lost or shutdown is requested.
    async fn serve(&mut self, mut link: Box<dyn Link>) -> Step {
        self.set_state(ConnectionState::Connected);

        if let Err(e) = self.flush_pending(link.as_mut()).await {
            return self.lose(link, e).await;
        }

        let resume_at = Instant::now() + self.resume_notice_delay;
        let mut resumed = false;
        let mut keepalive = tokio::time::interval_at(
            Instant::now() + self.keepalive_interval,
            self.keepalive_interval,
        );
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut self.shutdown) => {
                    link.close().await;
                    return Step::Shutdown;
                }
                _ = tokio::time::sleep_until(resume_at), if !resumed => {
                    resumed = true;
                    if let Err(e) = self.write(link.as_mut(), OutboundFrame::Reconnected).await {
                        return self.lose(link, e).await;
                    }
                }
                frame = link.recv() => match frame {
                    Some(Ok(text)) => self.handle_inbound(&text),
                    Some(Err(e)) if e.is_link_loss() => return self.lose(link, e).await,
                    Some(Err(e)) => self.events.emit(ClientEvent::MalformedFrame {
                        error: e.to_string(),
                    }),
                    None => return self.lose(link, PrintlinkError::LinkClosed).await,
                },
                frame = self.outbound.recv(), if self.outbound_open => match frame {
                    Some(frame) => {
                        if let Err(e) = self.write(link.as_mut(), frame.clone()).await {
                            self.keep_for_later(frame);
                            return self.lose(link, e).await;
                        }
                    }
                    None => self.outbound_open = false,
                },
                _ = keepalive.tick() => {
                    if link.is_open() {
                        self.events.emit(ClientEvent::KeepaliveSent);
                        if let Err(e) = self.write(link.as_mut(), OutboundFrame::Ping).await {
                            return self.lose(link, e).await;
                        }
                    } else {
                        self.events.emit(ClientEvent::KeepaliveSkipped);
                        return self.lose(link, PrintlinkError::LinkClosed).await;
                    }
                }
            }
        }
    }

    /// Write kept and queued frames on a fresh link, oldest first.
    async fn flush_pending(&mut self, link: &mut dyn Link) -> Result<()> {
        while let Ok(frame) = self.outbound.try_recv() {
            self.backlog.push_back(frame);
        }
        if !self.backlog.is_empty() {
            info!(frames = self.backlog.len(), "flushing frames held while disconnected");
        }
        while let Some(frame) = self.backlog.pop_front() {
            if let Err(e) = self.write(link, frame.clone()).await {
                self.backlog.push_front(frame);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Only acknowledgments survive a lost link; pings and notices are
    /// regenerated per connection.
    fn keep_for_later(&mut self, frame: OutboundFrame) {
        if matches!(frame, OutboundFrame::Ack { .. } | OutboundFrame::Nack { .. }) {
            self.backlog.push_back(frame);
        }
    }

    async fn write(&self, link: &mut dyn Link, frame: OutboundFrame) -> Result<()> {
        let kind = frame.kind();
        let text = match frame.encode() {
            Ok(text) => text,
            // The link itself is fine; only this frame is lost.
            Err(e) => {
                self.events.emit(ClientEvent::FrameDropped {
                    kind,
                    error: e.to_string(),
                });
                return Ok(());
            }
        };
        match link.send(text).await {
            Ok(()) => {
                self.events.emit(ClientEvent::FrameSent { kind });
                Ok(())
            }
            Err(e) => {
                self.events.emit(ClientEvent::FrameDropped {
                    kind,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn lose(&self, mut link: Box<dyn Link>, cause: PrintlinkError) -> Step {
        info!(cause = %cause, "link to job source lost");
        link.close().await;
        Step::Reconnect
    }

    fn handle_inbound(&self, text: &str) {
        match decode_inbound(text) {
            Ok(InboundFrame::Job(job)) => {
                debug!(job_id = %job.id, bytes = job.payload.len(), "job frame received");
                if self.jobs.send(job).is_err() {
                    error!("job queue has stopped; dropping received job");
                }
            }
            Ok(InboundFrame::Control(kind)) => debug!(kind, "control frame ignored"),
            Err(e) => self.events.emit(ClientEvent::MalformedFrame {
                error: e.to_string(),
            }),
        }
    }

    fn set_state(&self, to: ConnectionState) {
        let from = self.state.send_replace(to);
        if from != to {
            self.events.emit(ClientEvent::StateChanged { from, to });
        }
    }
}

async fn open_link(connector: &dyn Connector, timeout: Duration) -> Result<Box<dyn Link>> {
    match tokio::time::timeout(timeout, connector.connect()).await {
        Ok(result) => result,
        Err(_) => Err(PrintlinkError::Connect(format!(
            "timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

/// Resolve once shutdown has been requested. If every handle is gone nobody
/// can request it any more, so this never resolves.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSource;
    use printlink_core::events::RecordingSink;

    const RECONNECTED: &str = r#"{"type":"reconnected"}"#;
    const PING: &str = r#"{"type":"ping"}"#;

    struct Running {
        source: FakeSource,
        handle: LinkHandle,
        jobs: mpsc::UnboundedReceiver<PrintJob>,
        events: RecordingSink,
        task: tokio::task::JoinHandle<()>,
    }

    fn start(source: FakeSource, settings: LinkSettings) -> Running {
        let (jobs_tx, jobs) = mpsc::unbounded_channel();
        let events = RecordingSink::new();
        let (handle, manager) = ConnectionManager::new(
            Arc::new(source.clone()),
            &settings,
            jobs_tx,
            Arc::new(events.clone()),
        );
        let task = tokio::spawn(manager.run());
        Running {
            source,
            handle,
            jobs,
            events,
            task,
        }
    }

    async fn wait_for_state(handle: &LinkHandle, wanted: ConnectionState) {
        let mut state = handle.subscribe();
        state.wait_for(|s| *s == wanted).await.unwrap();
    }

    fn transitions(events: &RecordingSink) -> Vec<(ConnectionState, ConnectionState)> {
        events
            .events()
            .into_iter()
            .filter_map(|e| match e {
                ClientEvent::StateChanged { from, to } => Some((from, to)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn connects_and_announces_once() {
        let r = start(FakeSource::default(), LinkSettings::default());
        wait_for_state(&r.handle, ConnectionState::Connected).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(r.source.received(0), vec![RECONNECTED]);
        assert_eq!(
            transitions(&r.events),
            vec![
                (ConnectionState::Disconnected, ConnectionState::Connecting),
                (ConnectionState::Connecting, ConnectionState::Connected),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn zero_intervals_are_clamped() {
        let settings = LinkSettings {
            keepalive_interval_ms: 0,
            reconnect_interval_ms: 0,
            ..LinkSettings::default()
        };
        let r = start(FakeSource::default(), settings);
        wait_for_state(&r.handle, ConnectionState::Connected).await;

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(r.events.count(|e| matches!(e, ClientEvent::KeepaliveSent)) > 0);

        r.source.drop_link();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(r.source.link_count() > 1);
        assert_eq!(r.handle.state(), ConnectionState::Connected);
        assert!(!r.task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn lost_link_polls_with_trial_links_until_reachable() {
        let r = start(FakeSource::default(), LinkSettings::default());
        wait_for_state(&r.handle, ConnectionState::Connected).await;

        r.source.set_reachable(false);
        r.source.drop_link();
        wait_for_state(&r.handle, ConnectionState::Reconnecting).await;
        let lost_at = Instant::now();

        tokio::time::sleep(Duration::from_millis(16_000)).await;
        let trials: Vec<Duration> = r.source.connects()[1..]
            .iter()
            .map(|at| *at - lost_at)
            .collect();
        assert_eq!(
            trials,
            vec![
                Duration::from_secs(5),
                Duration::from_secs(10),
                Duration::from_secs(15)
            ]
        );
        assert_eq!(r.handle.state(), ConnectionState::Reconnecting);

        r.source.set_reachable(true);
        wait_for_state(&r.handle, ConnectionState::Connected).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        // Links: the first one, the successful trial, and the new active link.
        assert_eq!(r.source.link_count(), 3);
        assert!(r.source.closed_by_client(1));
        assert!(r.source.received(1).is_empty());
        assert_eq!(r.source.received(2), vec![RECONNECTED]);
        assert_eq!(
            transitions(&r.events)[2..],
            [
                (ConnectionState::Connected, ConnectionState::Reconnecting),
                (ConnectionState::Reconnecting, ConnectionState::Connecting),
                (ConnectionState::Connecting, ConnectionState::Connected),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_pings_while_connected() {
        let r = start(FakeSource::default(), LinkSettings::default());
        wait_for_state(&r.handle, ConnectionState::Connected).await;

        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(r.source.received(0), vec![RECONNECTED, PING, PING, PING]);
        assert_eq!(r.events.count(|e| *e == ClientEvent::KeepaliveSent), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_ping_moves_to_reconnecting() {
        let r = start(FakeSource::default(), LinkSettings::default());
        wait_for_state(&r.handle, ConnectionState::Connected).await;

        // The source goes silent without closing; only the ping notices.
        r.source.break_writes();
        tokio::time::sleep(Duration::from_secs(21)).await;

        assert_eq!(r.handle.state(), ConnectionState::Reconnecting);
        assert_eq!(
            r.events
                .count(|e| matches!(e, ClientEvent::FrameDropped { kind: "ping", .. })),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_skips_ping_on_closed_link() {
        let r = start(FakeSource::default(), LinkSettings::default());
        wait_for_state(&r.handle, ConnectionState::Connected).await;

        r.source.go_quiet();
        tokio::time::sleep(Duration::from_secs(21)).await;

        assert_eq!(r.events.count(|e| *e == ClientEvent::KeepaliveSkipped), 1);
        assert_eq!(r.events.count(|e| *e == ClientEvent::KeepaliveSent), 0);
        assert_eq!(r.source.received(0), vec![RECONNECTED]);
        assert_eq!(r.handle.state(), ConnectionState::Reconnecting);
    }

    #[tokio::test(start_paused = true)]
    async fn jobs_are_forwarded_and_malformed_frames_dropped() {
        let mut r = start(FakeSource::default(), LinkSettings::default());
        wait_for_state(&r.handle, ConnectionState::Connected).await;

        r.source.push("not json at all");
        r.source.push(r#"{"hello":"world"}"#);
        r.source.push(r#"{"jobId":5,"data":42}"#);
        r.source.push(r#"{"type":"pong"}"#);
        r.source.push(r#"{"jobId":6,"data":"A"}"#);

        let job = r.jobs.recv().await.unwrap();
        assert_eq!(job.id, JobId::from(6u64));
        assert_eq!(job.payload.as_bytes(), b"A");
        assert_eq!(
            r.events
                .count(|e| matches!(e, ClientEvent::MalformedFrame { .. })),
            3
        );
        assert_eq!(r.handle.state(), ConnectionState::Connected);
        assert_eq!(r.source.link_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn acks_during_outage_go_out_before_reconnected() {
        let r = start(FakeSource::default(), LinkSettings::default());
        wait_for_state(&r.handle, ConnectionState::Connected).await;

        r.source.set_reachable(false);
        r.source.drop_link();
        wait_for_state(&r.handle, ConnectionState::Reconnecting).await;

        r.handle.acknowledge(&JobId::from(1u64));
        r.handle.acknowledge(&JobId::from("two"));
        tokio::time::sleep(Duration::from_secs(7)).await;

        r.source.set_reachable(true);
        wait_for_state(&r.handle, ConnectionState::Connected).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let active = r.source.link_count() - 1;
        assert_eq!(
            r.source.received(active),
            vec![
                r#"{"type":"ack","jobId":1}"#,
                r#"{"type":"ack","jobId":"two"}"#,
                RECONNECTED,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn establishment_retries_then_falls_back_to_polling() {
        let source = FakeSource::default();
        source.set_reachable(false);
        let settings = LinkSettings {
            max_retries: 2,
            ..LinkSettings::default()
        };
        let r = start(source, settings);

        wait_for_state(&r.handle, ConnectionState::Reconnecting).await;
        let started = r.source.connects()[0];
        let offsets: Vec<Duration> = r.source.connects().iter().map(|at| *at - started).collect();
        assert_eq!(
            offsets,
            vec![Duration::ZERO, Duration::from_secs(5), Duration::from_secs(10)]
        );
        assert_eq!(
            r.events
                .count(|e| matches!(e, ClientEvent::ConnectFailed { .. })),
            3
        );

        r.source.set_reachable(true);
        wait_for_state(&r.handle, ConnectionState::Connected).await;
    }

    #[tokio::test(start_paused = true)]
    async fn resume_notice_waits_for_configured_delay() {
        let settings = LinkSettings {
            resume_notice_delay_ms: 5000,
            ..LinkSettings::default()
        };
        let r = start(FakeSource::default(), settings);
        wait_for_state(&r.handle, ConnectionState::Connected).await;

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert!(r.source.received(0).is_empty());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(r.source.received(0), vec![RECONNECTED]);
    }

    #[tokio::test(start_paused = true)]
    async fn nack_is_sent_on_reject() {
        let r = start(FakeSource::default(), LinkSettings::default());
        wait_for_state(&r.handle, ConnectionState::Connected).await;

        r.handle.reject(&JobId::from(9u64), "printer unavailable");
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            r.source.received(0),
            vec![
                RECONNECTED,
                r#"{"type":"nack","jobId":9,"reason":"printer unavailable"}"#,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_link_and_stops() {
        let r = start(FakeSource::default(), LinkSettings::default());
        wait_for_state(&r.handle, ConnectionState::Connected).await;

        r.handle.shutdown();
        r.task.await.unwrap();

        assert!(r.source.closed_by_client(0));
        assert_eq!(r.handle.state(), ConnectionState::Disconnected);
    }
}
