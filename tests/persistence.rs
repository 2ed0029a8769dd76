use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use chrono::NaiveDate;

use hotelplan::model::*;
use hotelplan::persistence::{DataSource, Operation, StreamFilter, TaskError, TaskStatus, VecObserver};
use hotelplan::storage::{FileStorage, MemoryStorage, StorageError};

// ── Helpers ──────────────────────────────────────────────────

fn day(n: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2017, 1, 1).unwrap() + chrono::Duration::days(n)
}

/// Pump the integrator until `done` holds. Panics after 5s.
fn pump_until(source: &mut DataSource, mut done: impl FnMut(&DataSource) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        source.process_integration_queue();
        if done(source) {
            return;
        }
        assert!(Instant::now() < deadline, "integration did not converge");
        source.wait_for_changes(Duration::from_millis(10));
    }
}

fn initialized(source: &mut DataSource) {
    pump_until(source, |s| !s.has_uninitialized_streams());
}

fn hotel_with_rooms(name: &str, rooms: usize) -> Hotel {
    let mut h = Hotel::new(name);
    h.add_category("DZ", "Double room");
    for i in 0..rooms {
        h.add_room(format!("{name} room {i}"), "DZ");
    }
    h
}

/// Store `hotel` and return the stored version from the canonical collection.
fn store_hotel(source: &mut DataSource, hotel: Hotel) -> Hotel {
    let results = source
        .queue_operation(Operation::StoreNew(Item::Hotel(hotel)))
        .wait_for_completion()
        .unwrap();
    let id = results[0].id.unwrap();
    source.process_integration_queue();
    source.hotels().get_hotel(id).cloned().unwrap()
}

fn store_reservation(source: &mut DataSource, room: Id, from: i64, to: i64) -> Id {
    let r = Reservation::new(format!("{room}:{from}-{to}"), room, DateRange::new(day(from), day(to)));
    let results = source
        .queue_operation(Operation::StoreNew(Item::Reservation(r)))
        .wait_for_completion()
        .unwrap();
    results[0].id.unwrap()
}

// ── Streams ──────────────────────────────────────────────────

#[test]
fn stream_sees_snapshot_then_new_hotel() {
    let mut source = DataSource::with_storage(MemoryStorage::new()).unwrap();
    let observer = Rc::new(RefCell::new(VecObserver::<Hotel>::new()));
    let handle = source.connect_stream::<Hotel, _>(&observer);

    initialized(&mut source);
    assert!(handle.is_initialized());
    assert!(observer.borrow().is_initialized());
    assert!(observer.borrow().items().is_empty());

    let task = source.queue_operation(Operation::StoreNew(Item::Hotel(Hotel::new("Hotel 1"))));
    task.wait_for_completion().unwrap();
    assert_eq!(task.status(), TaskStatus::Completed);

    // Differentials are queued before the task resolves: one pass is enough.
    source.process_integration_queue();
    let items = observer.borrow().items().to_vec();
    assert_eq!(items.len(), 1);
    assert_ne!(items[0].id, UNPERSISTED);
    assert_eq!(items[0].name, "Hotel 1");
    assert_eq!(handle.items(), items);
    assert_eq!(source.hotels().len(), 1);
}

#[test]
fn filtered_stream_follows_one_hotel() {
    let mut source = DataSource::with_storage(MemoryStorage::new()).unwrap();
    initialized(&mut source);
    let first = store_hotel(&mut source, Hotel::new("first"));
    let second = store_hotel(&mut source, Hotel::new("second"));

    let observer = Rc::new(RefCell::new(VecObserver::<Hotel>::new()));
    let handle = source.connect_stream_with::<Hotel, _>(&observer, StreamFilter::ById(second.id));
    initialized(&mut source);
    assert_eq!(handle.filter(), StreamFilter::ById(second.id));
    assert_eq!(observer.borrow().items(), &[second.clone()]);

    let mut renamed = first.clone();
    renamed.name = "renamed".into();
    source
        .queue_operation(Operation::Update(Item::Hotel(renamed)))
        .wait_for_completion()
        .unwrap();
    source.process_integration_queue();
    assert_eq!(observer.borrow().items(), &[second.clone()]);
    assert_eq!(source.hotels().get_hotel(first.id).unwrap().name, "renamed");

    source
        .queue_operation(Operation::Delete {
            kind: EntityKind::Hotel,
            id: second.id,
        })
        .wait_for_completion()
        .unwrap();
    source.process_integration_queue();
    assert!(observer.borrow().items().is_empty());
    assert_eq!(source.hotels().len(), 1);
}

#[test]
fn erase_all_clears_streams_and_canonical_state() {
    let mut source = DataSource::with_storage(MemoryStorage::new()).unwrap();
    let observer = Rc::new(RefCell::new(VecObserver::<Hotel>::new()));
    let _handle = source.connect_stream::<Hotel, _>(&observer);
    initialized(&mut source);

    let hotel = store_hotel(&mut source, hotel_with_rooms("H", 2));
    store_reservation(&mut source, hotel.rooms[0].id, 0, 3);
    source.process_integration_queue();
    assert_eq!(source.planning().len(), 1);

    let results = source
        .queue_operation(Operation::EraseAll)
        .wait_for_completion()
        .unwrap();
    assert_eq!(results[0].affected, 2);
    source.process_integration_queue();
    assert!(observer.borrow().items().is_empty());
    assert!(source.hotels().is_empty());
    assert!(source.planning().is_empty());
}

#[test]
fn load_all_redelivers_snapshot() {
    let mut source = DataSource::with_storage(MemoryStorage::new()).unwrap();
    let observer = Rc::new(RefCell::new(VecObserver::<Hotel>::new()));
    let _handle = source.connect_stream::<Hotel, _>(&observer);
    initialized(&mut source);
    store_hotel(&mut source, Hotel::new("a"));
    store_hotel(&mut source, Hotel::new("b"));

    let results = source
        .queue_operation(Operation::LoadAll)
        .wait_for_completion()
        .unwrap();
    assert!(results[0].affected >= 2);
    source.process_integration_queue();
    let names: Vec<_> = observer.borrow().items().iter().map(|h| h.name.clone()).collect();
    assert_eq!(names, ["a", "b"]);
    assert_eq!(source.hotels().len(), 2);
}

#[test]
fn dropped_observer_is_pruned() {
    let mut source = DataSource::with_storage(MemoryStorage::new()).unwrap();
    let observer = Rc::new(RefCell::new(VecObserver::<Reservation>::new()));
    let handle = source.connect_stream::<Reservation, _>(&observer);
    initialized(&mut source);
    assert!(handle.is_valid());

    drop(observer);
    assert!(!handle.is_valid());
    let report = source.process_integration_queue();
    assert_eq!(report.pruned, 1);

    // The worker no longer routes to the pruned stream.
    let hotel = store_hotel(&mut source, hotel_with_rooms("H", 1));
    store_reservation(&mut source, hotel.rooms[0].id, 0, 2);
    let report = source.process_integration_queue();
    assert_eq!(report.pruned, 0);
    assert_eq!(source.planning().len(), 1);
}

// ── Planning board integration ───────────────────────────────

#[test]
fn canonical_board_rejects_overlaps_that_storage_accepts() {
    let mut source = DataSource::with_storage(MemoryStorage::new()).unwrap();
    initialized(&mut source);
    let hotel = store_hotel(&mut source, hotel_with_rooms("H", 2));
    let (room1, room2) = (hotel.rooms[0].id, hotel.rooms[1].id);

    let r1 = store_reservation(&mut source, room1, 1, 3);
    let r2 = store_reservation(&mut source, room1, 3, 5);
    let r3 = store_reservation(&mut source, room1, 2, 4);
    let r4 = store_reservation(&mut source, room2, 2, 4);
    source.process_integration_queue();

    let board = source.planning();
    assert_eq!(board.len(), 3);
    assert!(board.get_reservation_by_id(r1).is_some());
    assert!(board.get_reservation_by_id(r2).is_some());
    assert!(board.get_reservation_by_id(r3).is_none());
    assert!(board.get_reservation_by_id(r4).is_some());
    assert_eq!(board.get_available_days_from(room1, day(0)), 1);
    assert_eq!(board.get_planning_extent(), Some(DateRange::new(day(1), day(5))));
}

#[test]
fn referenced_rooms_block_hotel_delete() {
    let mut source = DataSource::with_storage(MemoryStorage::new()).unwrap();
    initialized(&mut source);
    let hotel = store_hotel(&mut source, hotel_with_rooms("H", 1));
    store_reservation(&mut source, hotel.rooms[0].id, 0, 2);

    let err = source
        .queue_operation(Operation::Delete {
            kind: EntityKind::Hotel,
            id: hotel.id,
        })
        .wait_for_completion()
        .unwrap_err();
    assert!(matches!(err, TaskError::Storage(StorageError::Constraint(_))));
    source.process_integration_queue();
    assert_eq!(source.hotels().len(), 1);
}

// ── Failures and shutdown ────────────────────────────────────

#[test]
fn failed_commit_fails_task_without_side_effects() {
    let storage = MemoryStorage::new();
    let switch = storage.commit_failure_switch();
    let mut source = DataSource::with_storage(storage).unwrap();
    let observer = Rc::new(RefCell::new(VecObserver::<Hotel>::new()));
    let _handle = source.connect_stream::<Hotel, _>(&observer);
    initialized(&mut source);

    switch.store(true, Ordering::SeqCst);
    let task = source.queue_operation(Operation::StoreNew(Item::Hotel(Hotel::new("lost"))));
    let err = task.wait_for_completion().unwrap_err();
    assert!(matches!(err, TaskError::Storage(StorageError::Io(_))));
    assert_eq!(task.status(), TaskStatus::Failed);
    source.process_integration_queue();
    assert!(observer.borrow().items().is_empty());

    switch.store(false, Ordering::SeqCst);
    let kept = store_hotel(&mut source, Hotel::new("kept"));
    assert_eq!(kept.id, 1);
    assert_eq!(observer.borrow().items().len(), 1);
}

#[test]
fn shutdown_resolves_every_task() {
    let mut source = DataSource::with_storage(MemoryStorage::new()).unwrap();
    let tasks: Vec<_> = (0..50)
        .map(|i| source.queue_operation(Operation::StoreNew(Item::Hotel(Hotel::new(format!("h{i}"))))))
        .collect();
    source.shutdown();

    for task in &tasks {
        assert!(task.is_finished());
        if let Some(Err(e)) = task.try_result() {
            assert_eq!(e, TaskError::Aborted);
        }
    }
    assert!(!source.has_pending_tasks());

    let late = source.queue_operation(Operation::LoadAll);
    assert_eq!(late.try_result(), Some(Err(TaskError::ShuttingDown)));
}

// ── Durability ───────────────────────────────────────────────

#[test]
fn file_storage_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plan.wal");

    let (hotels, reservations) = {
        let storage = FileStorage::open(&path, 1_000).unwrap();
        let mut source = DataSource::with_storage(storage).unwrap();
        initialized(&mut source);
        let hotel = store_hotel(&mut source, hotel_with_rooms("H", 3));
        for (i, room) in hotel.rooms.iter().enumerate() {
            store_reservation(&mut source, room.id, i as i64, i as i64 + 4);
        }
        let mut moved = Reservation::new("moving", hotel.rooms[0].id, DateRange::new(day(10), day(12)));
        moved.add_continuation(hotel.rooms[1].id, day(15));
        source
            .queue_operation(Operation::StoreNew(Item::Reservation(moved)))
            .wait_for_completion()
            .unwrap();
        source.process_integration_queue();

        let reservations: Vec<Reservation> = source.planning().reservations().map(|(_, r)| r.clone()).collect();
        (source.hotels().hotels().to_vec(), reservations)
    };
    assert_eq!(reservations.len(), 4);

    let mut source = DataSource::open(&path).unwrap();
    initialized(&mut source);
    assert_eq!(source.hotels().hotels(), hotels.as_slice());
    let mut reloaded: Vec<Reservation> = source.planning().reservations().map(|(_, r)| r.clone()).collect();
    reloaded.sort_by_key(|r| r.id);
    let mut expected = reservations;
    expected.sort_by_key(|r| r.id);
    assert_eq!(reloaded, expected);

    // Ids keep increasing across restarts.
    let max_id = expected.iter().map(|r| r.id).max().unwrap();
    let next = store_reservation(&mut source, hotels[0].rooms[2].id, 20, 22);
    assert!(next > max_id);
}
