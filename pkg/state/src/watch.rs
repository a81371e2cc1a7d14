use tokio::sync::broadcast;

use pkg_types::stackset::StackSet;

/// Type of change delivered by the StackSet watch feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Added,
    Updated,
    Deleted,
}

/// A single watch notification. Carries an owned copy of the object: the
/// deliverer may mutate or reuse its buffers, so the copy is taken at the
/// feed boundary.
#[derive(Debug, Clone)]
pub struct StackSetEvent {
    pub event_type: EventType,
    pub stackset: StackSet,
}

/// Broadcast feed of StackSet add/update/delete notifications. The driver
/// subscribes once at startup and applies ownership filtering before
/// admitting objects into its watched store.
#[derive(Clone)]
pub struct WatchFeed {
    sender: broadcast::Sender<StackSetEvent>,
}

impl WatchFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StackSetEvent> {
        self.sender.subscribe()
    }

    /// Publish a notification. Lagging or absent subscribers are not an
    /// error; the periodic tick re-lists and catches up.
    pub fn notify(&self, event_type: EventType, stackset: &StackSet) {
        let _ = self.sender.send(StackSetEvent {
            event_type,
            stackset: stackset.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::metadata::ObjectMeta;
    use pkg_types::stack::StackSpec;
    use pkg_types::stackset::{StackSet, StackSetSpec, StackSetStatus, StackTemplate};

    fn make_stackset(name: &str) -> StackSet {
        StackSet {
            metadata: ObjectMeta::new(name, "default"),
            spec: StackSetSpec {
                stack_template: StackTemplate {
                    version: "v1".to_string(),
                    spec: StackSpec {
                        replicas: 1,
                        pod_template: Default::default(),
                        service_ports: vec![],
                        autoscaler: None,
                        configuration_resources: vec![],
                    },
                },
                traffic: vec![],
                ingress: None,
                route_group: None,
                stack_lifecycle: Default::default(),
            },
            status: StackSetStatus::default(),
        }
    }

    #[tokio::test]
    async fn subscribers_receive_owned_copies() {
        let feed = WatchFeed::new(16);
        let mut rx = feed.subscribe();

        let mut original = make_stackset("app");
        feed.notify(EventType::Added, &original);

        // Mutating the deliverer's object after notify must not affect the
        // already-published event.
        original.metadata.name = "mutated".to_string();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::Added);
        assert_eq!(event.stackset.metadata.name, "app");
    }
}
