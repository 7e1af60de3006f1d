//! Northbound and southbound message buses.
//!
//! Telemetry rides north (task prosecution up toward the aspirational
//! layer), directives ride south. Publication is broadcast unless a
//! target layer is named. Subscriber failures are captured and logged;
//! they never abort the publisher.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::packet::Packet;
use crate::vocabulary::{LayerId, PacketKind};

/// Default bound on the recent-message log.
pub const DEFAULT_LOG_CAPACITY: usize = 256;

/// Which way a bus carries traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusDirection {
    /// Telemetry up: observations, results, belief updates, escalations,
    /// integrity alerts.
    Northbound,
    /// Directives down: decisions, verification plans, tokens, task
    /// directives.
    Southbound,
}

impl BusDirection {
    /// Returns true when the bus carries this packet kind.
    #[must_use]
    pub const fn carries(&self, kind: PacketKind) -> bool {
        match self {
            Self::Northbound => kind.is_northbound(),
            Self::Southbound => kind.is_southbound(),
        }
    }

    /// Returns true when a message may route from `from` to `to` on this
    /// bus. The integrity overlay receives northbound traffic from any
    /// layer and may send southbound to any layer.
    #[must_use]
    pub const fn routes(&self, from: LayerId, to: LayerId) -> bool {
        match self {
            Self::Northbound => {
                matches!(to, LayerId::Integrity) || to.depth() < from.depth()
            },
            Self::Southbound => {
                matches!(from, LayerId::Integrity)
                    || (to.depth() > from.depth() && !matches!(to, LayerId::Integrity))
            },
        }
    }
}

/// Errors raised by bus publication.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BusError {
    /// The packet kind does not ride this bus.
    #[error("{kind} packets do not ride the {direction:?} bus")]
    WrongDirection {
        /// The rejected kind.
        kind: PacketKind,
        /// The bus it was published on.
        direction: BusDirection,
    },
}

/// A packet wrapped with routing metadata for bus transport.
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// The packet being carried.
    pub packet: Packet,
    /// Layer that published the message.
    pub source_layer: LayerId,
    /// Target layer; `None` broadcasts to every eligible subscriber.
    pub target_layer: Option<LayerId>,
    /// Episode the packet belongs to.
    pub correlation_id: String,
    /// When the message was published.
    pub published_at: DateTime<Utc>,
}

impl BusMessage {
    /// Wraps a packet for broadcast.
    #[must_use]
    pub fn broadcast(packet: Packet, published_at: DateTime<Utc>) -> Self {
        let source_layer = packet.header.source_layer;
        let correlation_id = packet.header.correlation_id.clone();
        Self {
            packet,
            source_layer,
            target_layer: None,
            correlation_id,
            published_at,
        }
    }

    /// Wraps a packet for point-to-point delivery.
    #[must_use]
    pub fn to_layer(packet: Packet, target: LayerId, published_at: DateTime<Utc>) -> Self {
        Self {
            target_layer: Some(target),
            ..Self::broadcast(packet, published_at)
        }
    }
}

/// A failed delivery to one subscriber.
#[derive(Debug, Clone)]
pub struct DeliveryFailure {
    /// The subscriber that failed.
    pub subscriber: LayerId,
    /// The handler's error.
    pub message: String,
}

/// Outcome of one publication.
#[derive(Debug, Clone, Default)]
pub struct PublishReceipt {
    /// Subscribers that received the message.
    pub delivered_to: Vec<LayerId>,
    /// Subscribers whose handler failed.
    pub failures: Vec<DeliveryFailure>,
}

type Handler = Box<dyn FnMut(&BusMessage) -> Result<(), String> + Send>;

/// A FIFO message channel between layers.
pub struct Bus {
    direction: BusDirection,
    subscribers: BTreeMap<LayerId, Handler>,
    log: VecDeque<BusMessage>,
    log_capacity: usize,
}

impl Bus {
    /// A northbound (telemetry) bus.
    #[must_use]
    pub fn northbound() -> Self {
        Self::new(BusDirection::Northbound)
    }

    /// A southbound (directive) bus.
    #[must_use]
    pub fn southbound() -> Self {
        Self::new(BusDirection::Southbound)
    }

    fn new(direction: BusDirection) -> Self {
        Self {
            direction,
            subscribers: BTreeMap::new(),
            log: VecDeque::new(),
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }

    /// Overrides the recent-message log bound.
    #[must_use]
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }

    /// Which way this bus carries traffic.
    #[must_use]
    pub const fn direction(&self) -> BusDirection {
        self.direction
    }

    /// Subscribes a layer with a handler. Replaces any previous handler
    /// for the layer.
    pub fn subscribe(
        &mut self,
        layer: LayerId,
        handler: impl FnMut(&BusMessage) -> Result<(), String> + Send + 'static,
    ) {
        self.subscribers.insert(layer, Box::new(handler));
    }

    /// Removes a layer's subscription.
    pub fn unsubscribe(&mut self, layer: LayerId) {
        self.subscribers.remove(&layer);
    }

    /// Publishes a message to every eligible subscriber.
    ///
    /// Handler failures are collected in the receipt and logged; they do
    /// not abort delivery to other subscribers.
    ///
    /// # Errors
    ///
    /// Returns `BusError::WrongDirection` when the packet kind does not
    /// ride this bus. The message is not logged or delivered.
    pub fn publish(&mut self, message: BusMessage) -> Result<PublishReceipt, BusError> {
        let kind = message.packet.kind();
        if !self.direction.carries(kind) {
            return Err(BusError::WrongDirection {
                kind,
                direction: self.direction,
            });
        }

        let mut receipt = PublishReceipt::default();
        for (layer, handler) in &mut self.subscribers {
            if let Some(target) = message.target_layer {
                if *layer != target {
                    continue;
                }
            }
            if !self.direction.routes(message.source_layer, *layer) {
                continue;
            }
            match handler(&message) {
                Ok(()) => receipt.delivered_to.push(*layer),
                Err(error) => {
                    tracing::error!(
                        subscriber = %layer,
                        correlation_id = %message.correlation_id,
                        "bus delivery failed: {error}"
                    );
                    receipt.failures.push(DeliveryFailure {
                        subscriber: *layer,
                        message: error,
                    });
                },
            }
        }

        if self.log.len() == self.log_capacity {
            self.log.pop_front();
        }
        self.log.push_back(message);

        Ok(receipt)
    }

    /// Recent messages, oldest first, optionally filtered by episode.
    #[must_use]
    pub fn recent(&self, correlation_id: Option<&str>) -> Vec<&BusMessage> {
        self.log
            .iter()
            .filter(|m| correlation_id.is_none_or(|corr| m.correlation_id == corr))
            .collect()
    }

    /// Clears the recent-message log.
    pub fn clear_log(&mut self) {
        self.log.clear();
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("direction", &self.direction)
            .field("subscribers", &self.subscribers.keys().collect::<Vec<_>>())
            .field("logged", &self.log.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::testing;

    use super::*;

    #[test]
    fn test_northbound_rejects_directives() {
        let mut bus = Bus::northbound();
        let directive = testing::directive_builder("corr_bus", "task_x").build(testing::t0());
        let result = bus.publish(BusMessage::broadcast(directive, testing::t0()));
        assert!(matches!(result, Err(BusError::WrongDirection { .. })));
        assert!(bus.recent(None).is_empty());
    }

    #[test]
    fn test_southbound_rejects_telemetry() {
        let mut bus = Bus::southbound();
        let observation = testing::observation("corr_bus", testing::t0());
        let result = bus.publish(BusMessage::broadcast(observation, testing::t0()));
        assert!(matches!(result, Err(BusError::WrongDirection { .. })));
    }

    #[test]
    fn test_northbound_routing_goes_up() {
        // An observation from layer 6 reaches layer 5 and integrity, not
        // layer 6 itself.
        let mut bus = Bus::northbound();
        let delivered = Arc::new(AtomicUsize::new(0));

        for layer in [
            LayerId::CognitiveControl,
            LayerId::TaskProsecution,
            LayerId::Integrity,
        ] {
            let counter = Arc::clone(&delivered);
            bus.subscribe(layer, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        let observation = testing::observation("corr_bus", testing::t0());
        let receipt = bus
            .publish(BusMessage::broadcast(observation, testing::t0()))
            .unwrap();
        assert_eq!(delivered.load(Ordering::SeqCst), 2);
        assert!(receipt.delivered_to.contains(&LayerId::CognitiveControl));
        assert!(receipt.delivered_to.contains(&LayerId::Integrity));
        assert!(!receipt.delivered_to.contains(&LayerId::TaskProsecution));
    }

    #[test]
    fn test_southbound_routing_goes_down() {
        let mut bus = Bus::southbound();
        let delivered = Arc::new(AtomicUsize::new(0));
        for layer in [LayerId::Strategy, LayerId::TaskProsecution] {
            let counter = Arc::clone(&delivered);
            bus.subscribe(layer, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        // A directive from layer 5 only reaches layer 6.
        let directive = testing::directive_builder("corr_bus", "task_x").build(testing::t0());
        let receipt = bus
            .publish(BusMessage::broadcast(directive, testing::t0()))
            .unwrap();
        assert_eq!(receipt.delivered_to, vec![LayerId::TaskProsecution]);
    }

    #[test]
    fn test_point_to_point_delivery() {
        let mut bus = Bus::northbound();
        let delivered = Arc::new(AtomicUsize::new(0));
        for layer in [LayerId::Aspirational, LayerId::Strategy] {
            let counter = Arc::clone(&delivered);
            bus.subscribe(layer, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        let observation = testing::observation("corr_bus", testing::t0());
        let receipt = bus
            .publish(BusMessage::to_layer(
                observation,
                LayerId::Strategy,
                testing::t0(),
            ))
            .unwrap();
        assert_eq!(receipt.delivered_to, vec![LayerId::Strategy]);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_failure_does_not_abort_delivery() {
        let mut bus = Bus::northbound();
        bus.subscribe(LayerId::Strategy, |_| Err("handler exploded".to_string()));
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);
        bus.subscribe(LayerId::Aspirational, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let observation = testing::observation("corr_bus", testing::t0());
        let receipt = bus
            .publish(BusMessage::broadcast(observation, testing::t0()))
            .unwrap();
        assert_eq!(receipt.failures.len(), 1);
        assert_eq!(receipt.failures[0].subscriber, LayerId::Strategy);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_log_is_bounded() {
        let mut bus = Bus::northbound().with_log_capacity(2);
        for i in 0..4 {
            let observation = testing::observation("corr_bus", testing::at(i));
            bus.publish(BusMessage::broadcast(observation, testing::at(i)))
                .unwrap();
        }
        assert_eq!(bus.recent(None).len(), 2);
        assert_eq!(bus.recent(None)[0].published_at, testing::at(2));
    }

    #[test]
    fn test_recent_filters_by_correlation() {
        let mut bus = Bus::northbound();
        bus.publish(BusMessage::broadcast(
            testing::observation("corr_a", testing::t0()),
            testing::t0(),
        ))
        .unwrap();
        bus.publish(BusMessage::broadcast(
            testing::observation("corr_b", testing::at(1)),
            testing::at(1),
        ))
        .unwrap();
        assert_eq!(bus.recent(Some("corr_a")).len(), 1);
        assert_eq!(bus.recent(None).len(), 2);
    }
}
