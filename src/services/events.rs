use tokio::sync::mpsc;

use crate::models::{CertificationRequest, CertificationStatus};

/// A committed status change of one certification request
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub before: CertificationStatus,
    pub after: CertificationRequest,
}

impl StatusChange {
    /// Only `pending -> approved|rejected` fans out to the dispatcher
    pub fn is_decision(&self) -> bool {
        self.before == CertificationStatus::Pending && self.after.status.is_terminal()
    }
}

#[derive(Debug, Clone)]
pub enum CertificationEvent {
    /// A new request was stored and its approval token issued
    Submitted {
        request: CertificationRequest,
        token: String,
    },
    StatusChanged(StatusChange),
}

/// In-process bus between the workflow and the notification dispatcher
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<CertificationEvent>,
}

impl EventBus {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CertificationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn publish(&self, event: CertificationEvent) {
        if self.tx.send(event).is_err() {
            tracing::error!("Notification dispatcher is not running, event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::certification::sample_request;
    use crate::models::{Actor, Decision};
    use chrono::Utc;

    #[test]
    fn test_only_pending_to_terminal_is_a_decision() {
        let pending = sample_request("r1");
        let approved = pending
            .transition(&Decision::Approve, &Actor::email_link(), Utc::now())
            .unwrap();

        let decision = StatusChange {
            before: CertificationStatus::Pending,
            after: approved.clone(),
        };
        assert!(decision.is_decision());

        let replay = StatusChange {
            before: CertificationStatus::Approved,
            after: approved,
        };
        assert!(!replay.is_decision());

        let noop = StatusChange {
            before: CertificationStatus::Pending,
            after: pending,
        };
        assert!(!noop.is_decision());
    }

    #[tokio::test]
    async fn test_published_events_reach_the_receiver() {
        let (bus, mut rx) = EventBus::channel();
        bus.publish(CertificationEvent::Submitted {
            request: sample_request("r1"),
            token: "t".to_string(),
        });

        match rx.recv().await {
            Some(CertificationEvent::Submitted { request, .. }) => {
                assert_eq!(request.request_id, "r1")
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
