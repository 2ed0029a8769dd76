use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, warn};

use super::change_queue::ChangeQueue;
use super::stream::{ErasedStream, StreamChange, StreamEvent, StreamId, StreamItems};
use crate::hotels::HotelCollection;
use crate::model::*;
use crate::observability;
use crate::planning::PlanningBoard;

/// What one integration pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntegrationReport {
    pub integrated: usize,
    /// Streams dropped because their observer or handle went away.
    pub pruned: usize,
}

/// Sole mutator of the canonical hotel collection and planning board, and
/// the router of differentials to connected streams. Lives on the consuming
/// thread; never touched by the worker.
pub struct ResultIntegrator {
    queue: Arc<ChangeQueue>,
    streams: BTreeMap<StreamId, Rc<dyn ErasedStream>>,
    hotels: HotelCollection,
    planning: PlanningBoard,
    hotels_stream: CanonicalStream,
    reservations_stream: CanonicalStream,
}

#[derive(Debug, Clone, Copy)]
struct CanonicalStream {
    id: StreamId,
    initialized: bool,
}

impl ResultIntegrator {
    pub(crate) fn new(queue: Arc<ChangeQueue>, hotels_stream: StreamId, reservations_stream: StreamId) -> Self {
        Self {
            queue,
            streams: BTreeMap::new(),
            hotels: HotelCollection::new(),
            planning: PlanningBoard::new(),
            hotels_stream: CanonicalStream {
                id: hotels_stream,
                initialized: false,
            },
            reservations_stream: CanonicalStream {
                id: reservations_stream,
                initialized: false,
            },
        }
    }

    pub(crate) fn add_stream(&mut self, stream: Rc<dyn ErasedStream>) {
        self.streams.insert(stream.spec().id, stream);
        metrics::gauge!(observability::STREAMS_ACTIVE).set(self.streams.len() as f64);
    }

    pub fn hotels(&self) -> &HotelCollection {
        &self.hotels
    }

    pub fn planning(&self) -> &PlanningBoard {
        &self.planning
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// True while the canonical state or a live stream still waits for its
    /// initial snapshot.
    pub fn has_uninitialized_streams(&self) -> bool {
        !self.hotels_stream.initialized
            || !self.reservations_stream.initialized
            || self
                .streams
                .values()
                .any(|s| s.is_valid() && !s.is_initialized())
    }

    /// Prune dead streams, drain the change queue, update streams, then
    /// update canonical state.
    pub fn process_integration_queue(&mut self) -> IntegrationReport {
        let pruned = self.prune_invalid_streams();

        let changes = self.queue.take_changes();
        let integrated = changes.len();
        for diff in changes {
            if diff.stream == self.hotels_stream.id {
                self.apply_hotel_change(diff.change);
            } else if diff.stream == self.reservations_stream.id {
                self.apply_reservation_change(diff.change);
            } else if let Some(stream) = self.streams.get(&diff.stream) {
                stream.apply(&diff.change);
            }
        }
        if integrated > 0 {
            metrics::counter!(observability::DIFFERENTIALS_INTEGRATED_TOTAL).increment(integrated as u64);
        }
        IntegrationReport { integrated, pruned }
    }

    fn prune_invalid_streams(&mut self) -> usize {
        let dead: Vec<StreamId> = self
            .streams
            .iter()
            .filter(|(_, s)| !s.is_valid())
            .map(|(id, _)| *id)
            .collect();
        for id in &dead {
            self.streams.remove(id);
            self.queue.add_stream_event(StreamEvent::Deregistered(*id));
            debug!(stream = id, "pruned stream without observer");
        }
        if !dead.is_empty() {
            metrics::gauge!(observability::STREAMS_ACTIVE).set(self.streams.len() as f64);
        }
        dead.len()
    }

    fn apply_hotel_change(&mut self, change: StreamChange) {
        match change {
            StreamChange::ItemsAdded(StreamItems::Hotels(hotels))
            | StreamChange::ItemsUpdated(StreamItems::Hotels(hotels)) => {
                for hotel in hotels {
                    if self.hotels.get_hotel(hotel.id).is_some() {
                        self.hotels.update_hotel(hotel);
                    } else {
                        self.hotels.add_hotel(hotel);
                    }
                }
            }
            StreamChange::ItemsRemoved(ids) => {
                for id in ids {
                    self.hotels.remove_hotel(id);
                }
            }
            StreamChange::Cleared => self.hotels.clear(),
            StreamChange::Initialized => self.hotels_stream.initialized = true,
            StreamChange::ItemsAdded(_) | StreamChange::ItemsUpdated(_) => {
                warn!("reservations routed to the canonical hotel stream");
            }
        }
    }

    fn apply_reservation_change(&mut self, change: StreamChange) {
        match change {
            StreamChange::ItemsAdded(StreamItems::Reservations(reservations)) => {
                for reservation in reservations {
                    let id = reservation.id;
                    if let Err(e) = self.planning.add_reservation(reservation) {
                        warn!(reservation = id, error = %e, "reservation rejected by planning board");
                    }
                }
            }
            StreamChange::ItemsUpdated(StreamItems::Reservations(reservations)) => {
                for reservation in reservations {
                    self.integrate_updated_reservation(reservation);
                }
            }
            StreamChange::ItemsRemoved(ids) => {
                for id in ids {
                    if self.planning.remove_reservation_by_id(id).is_err() {
                        debug!(reservation = id, "removed reservation was not on the planning board");
                    }
                }
            }
            StreamChange::Cleared => self.planning.clear(),
            StreamChange::Initialized => self.reservations_stream.initialized = true,
            StreamChange::ItemsAdded(_) | StreamChange::ItemsUpdated(_) => {
                warn!("hotels routed to the canonical reservation stream");
            }
        }
    }

    fn integrate_updated_reservation(&mut self, reservation: Reservation) {
        let id = reservation.id;
        let result = if self.planning.get_reservation_by_id(id).is_some() {
            self.planning.update_reservation(reservation)
        } else {
            // An earlier version was rejected; the update may fit now.
            self.planning.add_reservation(reservation)
        };
        if let Err(e) = result {
            warn!(reservation = id, error = %e, "updated reservation rejected by planning board");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::stream::{
        DataStream, StreamDifferential, StreamFilter, StreamObserver, StreamSpec, VecObserver,
    };
    use chrono::NaiveDate;
    use std::cell::RefCell;

    const HOTELS: StreamId = 1;
    const RESERVATIONS: StreamId = 2;

    fn day(n: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2017, 1, 1).unwrap() + chrono::Duration::days(n)
    }

    fn reservation(id: Id, room: Id, from: i64, to: i64) -> Reservation {
        let mut r = Reservation::new(format!("r{id}"), room, DateRange::new(day(from), day(to)));
        r.id = id;
        r
    }

    fn push(queue: &ChangeQueue, stream: StreamId, change: StreamChange) {
        queue.add_changes(vec![StreamDifferential { stream, change }]);
    }

    fn integrator() -> (Arc<ChangeQueue>, ResultIntegrator) {
        let queue = Arc::new(ChangeQueue::new());
        let integrator = ResultIntegrator::new(Arc::clone(&queue), HOTELS, RESERVATIONS);
        (queue, integrator)
    }

    #[test]
    fn canonical_reservations_feed_planning_board() {
        let (queue, mut integrator) = integrator();
        push(
            &queue,
            RESERVATIONS,
            StreamChange::ItemsAdded(StreamItems::Reservations(vec![
                reservation(10, 1, 0, 3),
                // Overlaps r10 and is rejected, not fatal.
                reservation(11, 1, 2, 4),
                reservation(12, 2, 0, 3),
            ])),
        );
        push(&queue, RESERVATIONS, StreamChange::Initialized);
        assert!(integrator.has_uninitialized_streams());

        let report = integrator.process_integration_queue();
        assert_eq!(report.integrated, 2);
        assert_eq!(integrator.planning().len(), 2);
        assert!(integrator.planning().get_reservation_by_id(11).is_none());

        push(&queue, RESERVATIONS, StreamChange::ItemsRemoved(vec![10]));
        push(
            &queue,
            RESERVATIONS,
            StreamChange::ItemsUpdated(StreamItems::Reservations(vec![reservation(11, 1, 2, 4)])),
        );
        integrator.process_integration_queue();
        assert!(integrator.planning().get_reservation_by_id(10).is_none());
        assert!(integrator.planning().get_reservation_by_id(11).is_some());

        push(&queue, RESERVATIONS, StreamChange::Cleared);
        integrator.process_integration_queue();
        assert!(integrator.planning().is_empty());
    }

    #[test]
    fn canonical_hotels_feed_collection() {
        let (queue, mut integrator) = integrator();
        let mut hotel = Hotel::new("Hotel 1");
        hotel.id = 5;
        push(&queue, HOTELS, StreamChange::ItemsAdded(StreamItems::Hotels(vec![hotel.clone()])));
        push(&queue, HOTELS, StreamChange::Initialized);
        push(&queue, RESERVATIONS, StreamChange::Initialized);
        integrator.process_integration_queue();
        assert!(!integrator.has_uninitialized_streams());
        assert_eq!(integrator.hotels().hotels(), &[hotel.clone()]);

        hotel.name = "Renamed".into();
        push(&queue, HOTELS, StreamChange::ItemsUpdated(StreamItems::Hotels(vec![hotel])));
        push(&queue, HOTELS, StreamChange::ItemsRemoved(vec![99]));
        integrator.process_integration_queue();
        assert_eq!(integrator.hotels().get_hotel(5).unwrap().name, "Renamed");
    }

    #[test]
    fn dead_streams_are_pruned_and_deregistered() {
        let (queue, mut integrator) = integrator();
        let observer = Rc::new(RefCell::new(VecObserver::<Hotel>::new()));
        let erased: Rc<RefCell<dyn StreamObserver<Hotel>>> = observer.clone();
        let spec = StreamSpec {
            id: 3,
            kind: EntityKind::Hotel,
            filter: StreamFilter::All,
        };
        integrator.add_stream(Rc::new(DataStream::new(spec, Rc::downgrade(&erased))));
        drop(erased);

        push(&queue, 3, StreamChange::Initialized);
        integrator.process_integration_queue();
        assert!(observer.borrow().is_initialized());
        assert_eq!(integrator.stream_count(), 1);

        drop(observer);
        let report = integrator.process_integration_queue();
        assert_eq!(report.pruned, 1);
        assert_eq!(integrator.stream_count(), 0);
        assert_eq!(queue.take_stream_events(), vec![StreamEvent::Deregistered(3)]);
    }
}
