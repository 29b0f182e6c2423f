//! # Loopback Transport
//!
//! An in-process [`RingLink`] backed by a [`LinkSession`] — no radio, no
//! host stack. Lets the client crates run full measurement workflows
//! against the emulated peripheral in a single test binary.
//!
//! One driver task per subscription paces the session; `unsubscribe`
//! disarms it before returning, so no emission ever races a teardown.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::debug;

use ringlink_protocol::retry::Connector;
use ringlink_protocol::transport::{Capability, PhyRequest, RingLink};

use crate::impairment::{ChannelModel, ImpairmentConfig};
use crate::session::{unix_millis, LinkSession, SessionConfig, TickNext};

/// Largest ATT MTU the loopback pretends to negotiate.
const MAX_MTU: u16 = 247;

// ─── Link ───────────────────────────────────────────────────────────────────

/// An in-process connected link wrapping one emulated session.
pub struct LoopbackLink {
    session: Arc<Mutex<LinkSession>>,
    shutdown: Option<watch::Sender<bool>>,
}

impl LoopbackLink {
    pub fn new(session: LinkSession) -> Self {
        LoopbackLink {
            session: Arc::new(Mutex::new(session)),
            shutdown: None,
        }
    }

    /// Shared handle to the underlying session (tests inspect state).
    pub fn session(&self) -> Arc<Mutex<LinkSession>> {
        Arc::clone(&self.session)
    }

    fn stop_driver(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
    }
}

impl RingLink for LoopbackLink {
    async fn write_command(&mut self, frame: Bytes) -> anyhow::Result<()> {
        self.session.lock().await.handle_command(&frame);
        Ok(())
    }

    async fn subscribe(&mut self) -> anyhow::Result<mpsc::UnboundedReceiver<Bytes>> {
        self.stop_driver();
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.session.lock().await.set_subscribed(true);
        tokio::spawn(drive(Arc::clone(&self.session), tx, shutdown_rx));
        self.shutdown = Some(shutdown_tx);
        Ok(rx)
    }

    async fn unsubscribe(&mut self) -> anyhow::Result<()> {
        self.session.lock().await.set_subscribed(false);
        self.stop_driver();
        Ok(())
    }

    async fn request_mtu(&mut self, mtu: u16) -> Capability<u16> {
        Capability::Success {
            value: mtu.clamp(23, MAX_MTU),
        }
    }

    async fn request_phy(&mut self, phy: PhyRequest) -> Capability<PhyRequest> {
        // The emulated stack has no PHY control, mirroring hosts that lack it.
        match phy {
            PhyRequest::Auto => Capability::Skipped,
            _ => Capability::Unsupported,
        }
    }

    async fn disconnect(&mut self) {
        {
            let mut session = self.session.lock().await;
            session.set_subscribed(false);
            session.stop();
        }
        self.stop_driver();
    }
}

impl Drop for LoopbackLink {
    fn drop(&mut self) {
        self.stop_driver();
    }
}

/// Pacing loop: poll at the base interval while idle, follow the session's
/// re-arm delays while streaming. Outlives Stop/Start cycles within one
/// subscription.
async fn drive(
    session: Arc<Mutex<LinkSession>>,
    out: mpsc::UnboundedSender<Bytes>,
    mut shutdown: watch::Receiver<bool>,
) {
    let base = Duration::from_millis(session.lock().await.config().base_interval_ms);
    let mut delay = base;
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        let outcome = {
            let mut session = session.lock().await;
            if !session.is_emitting() {
                delay = base;
                continue;
            }
            session.tick(unix_millis())
        };
        if let Some(frame) = outcome.frame {
            if out.send(frame).is_err() {
                break;
            }
        }
        if let Some(pause) = outcome.pause {
            tokio::time::sleep(pause).await;
        }
        match outcome.next {
            TickNext::Rearm(next) => delay = next,
            TickNext::Stop(reason) => {
                debug!(?reason, "stream ended, driver idling");
                delay = base;
            }
        }
    }
}

// ─── Connector ──────────────────────────────────────────────────────────────

/// Connector producing loopback links, with a scripted number of initial
/// failures for exercising the retry coordinator.
pub struct LoopbackConnector {
    session_cfg: SessionConfig,
    impairment: ImpairmentConfig,
    seed: u64,
    failures_left: u32,
}

impl LoopbackConnector {
    pub fn new(session_cfg: SessionConfig, impairment: ImpairmentConfig, seed: u64) -> Self {
        LoopbackConnector {
            session_cfg,
            impairment,
            seed,
            failures_left: 0,
        }
    }

    /// Fail the first `n` attempts before connecting.
    pub fn failing_first(mut self, n: u32) -> Self {
        self.failures_left = n;
        self
    }
}

impl Connector for LoopbackConnector {
    type Handle = LoopbackLink;

    async fn attempt(&mut self, _timeout: Duration) -> anyhow::Result<LoopbackLink> {
        if self.failures_left > 0 {
            self.failures_left -= 1;
            anyhow::bail!("emulated peripheral not advertising");
        }
        let channel = ChannelModel::new(self.impairment.clone(), self.seed);
        Ok(LoopbackLink::new(LinkSession::new(
            self.session_cfg.clone(),
            channel,
        )))
    }

    async fn abort(&mut self) {}
}
