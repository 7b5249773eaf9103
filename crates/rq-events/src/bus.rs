use crate::types::JobEvent;
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: JobEvent) -> Result<(), broadcast::error::SendError<JobEvent>> {
        self.sender.send(event).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventSource, JobEventKind};

    #[tokio::test]
    async fn subscribers_receive_events_published_after_subscribing() {
        let bus = EventBus::new(8);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(JobEvent::new(7, JobEventKind::Canceled, EventSource::Api))
            .unwrap();

        let a = first.recv().await.unwrap();
        let b = second.recv().await.unwrap();
        assert_eq!(a.job_id, 7);
        assert_eq!(b.kind, JobEventKind::Canceled);
    }

    #[test]
    fn publish_without_subscribers_reports_error() {
        let bus = EventBus::new(8);
        let result = bus.publish(JobEvent::new(1, JobEventKind::Enqueued, EventSource::Api));
        assert!(result.is_err());
    }
}
