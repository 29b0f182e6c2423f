//! # Transport Boundary
//!
//! The link protocol sits on top of a host wireless stack (BlueZ, CoreBluetooth,
//! an in-process loopback for tests). This module defines the boundary the
//! rest of the workspace consumes: a connected-link trait and a capability
//! negotiation result type.
//!
//! Everything here is best-effort: a stack that cannot negotiate MTU or
//! PHY reports a status, it does not fail the run.

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;

// ─── Capability Negotiation ─────────────────────────────────────────────────

/// Outcome of probing an optional transport capability (MTU, PHY).
///
/// Recorded verbatim in run metadata so throughput anomalies can later be
/// correlated with what the stack actually granted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Capability<T> {
    /// The stack honored the request; carries the negotiated value.
    Success { value: T },
    /// The stack has no such operation.
    Unsupported,
    /// The stack has the operation but it failed.
    Failed { reason: String },
    /// The request was not attempted (e.g. PHY left on auto).
    Skipped,
}

impl<T> Capability<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Capability::Success { .. })
    }
}

/// PHY preference a client may request from the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhyRequest {
    /// Leave the PHY to the controller; probing is skipped.
    Auto,
    Le1M,
    Le2M,
    Coded,
}

// ─── Connected Link ─────────────────────────────────────────────────────────

/// A live, connected notification link.
///
/// `subscribe` enables the push-style notification stream and hands back the
/// receiving end of a FIFO queue; the transport may deliver from any
/// execution context, the consumer only ever awaits the queue. `unsubscribe`
/// must disarm delivery before the connection is torn down so no notification
/// races a close.
pub trait RingLink {
    /// Write a command frame without response.
    fn write_command(
        &mut self,
        frame: Bytes,
    ) -> impl std::future::Future<Output = anyhow::Result<()>>;

    /// Enable notifications; returns the delivery queue.
    fn subscribe(
        &mut self,
    ) -> impl std::future::Future<Output = anyhow::Result<mpsc::UnboundedReceiver<Bytes>>>;

    /// Disable notifications and stop delivery.
    fn unsubscribe(&mut self) -> impl std::future::Future<Output = anyhow::Result<()>>;

    /// Best-effort MTU negotiation.
    fn request_mtu(&mut self, mtu: u16) -> impl std::future::Future<Output = Capability<u16>>;

    /// Best-effort PHY preference.
    fn request_phy(
        &mut self,
        phy: PhyRequest,
    ) -> impl std::future::Future<Output = Capability<PhyRequest>>;

    /// Tear the connection down. Always succeeds from the caller's view.
    fn disconnect(&mut self) -> impl std::future::Future<Output = ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_serializes_with_status_tag() {
        let ok: Capability<u16> = Capability::Success { value: 247 };
        let json = serde_json::to_string(&ok).unwrap();
        assert!(json.contains("\"status\":\"success\""));
        assert!(json.contains("\"value\":247"));

        let failed: Capability<u16> = Capability::Failed {
            reason: "timed out".into(),
        };
        let json = serde_json::to_string(&failed).unwrap();
        assert!(json.contains("\"status\":\"failed\""));
        assert!(json.contains("timed out"));

        let skipped: Capability<PhyRequest> = Capability::Skipped;
        assert_eq!(serde_json::to_string(&skipped).unwrap(), "{\"status\":\"skipped\"}");
    }

    #[test]
    fn capability_success_check() {
        assert!(Capability::Success { value: 1u16 }.is_success());
        assert!(!Capability::<u16>::Unsupported.is_success());
    }
}
