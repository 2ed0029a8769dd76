use super::*;

fn day(n: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2017, 1, 1).unwrap() + chrono::Duration::days(n)
}

fn range(from: i64, to: i64) -> DateRange {
    DateRange::new(day(from), day(to))
}

fn reservation(room: Id, from: i64, to: i64) -> Reservation {
    Reservation::new("", room, range(from, to))
}

/// Room   1 2 3 4 5 6 7 8 9 A B C
///    1   [###|###]
///    2     [###]   [###########]
///    3         [#########]
fn populated_board() -> PlanningBoard {
    let mut board = PlanningBoard::new();
    board.add_reservation(reservation(1, 1, 3)).unwrap();
    board.add_reservation(reservation(1, 3, 5)).unwrap();
    board.add_reservation(reservation(3, 4, 9)).unwrap();
    board.add_reservation(reservation(2, 2, 4)).unwrap();
    board.add_reservation(reservation(2, 6, 12)).unwrap();
    board
}

// ── Empty board ──────────────────────────────────────────

#[test]
fn empty_board_queries() {
    let board = PlanningBoard::new();
    assert!(board.is_empty());
    assert!(board
        .get_reservations_in_period(&DateRange::new(
            NaiveDate::from_ymd_opt(2016, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2018, 1, 1).unwrap(),
        ))
        .is_empty());
    assert!(board.get_planning_extent().is_none());
    assert!(board.is_free(1, &range(1, 3)));
    assert!(board.can_add_reservation(&reservation(1, 1, 3)));
}

#[test]
fn unbooked_room_is_unbounded() {
    let board = PlanningBoard::new();
    assert_eq!(
        board.get_available_days_from(1, NaiveDate::from_ymd_opt(2016, 1, 1).unwrap()),
        UNBOUNDED_DAYS
    );
    assert_eq!(UNBOUNDED_DAYS, u32::MAX);
}

// ── Adding ───────────────────────────────────────────────

#[test]
fn add_rejects_overlaps_and_accepts_other_rooms() {
    let mut board = PlanningBoard::new();
    board.add_reservation(reservation(1, 1, 3)).unwrap();
    board.add_reservation(reservation(1, 3, 5)).unwrap();

    // Same dates again
    assert!(matches!(
        board.add_reservation(reservation(1, 3, 5)),
        Err(PlanningError::Conflict { room_id: 1, .. })
    ));
    // Overlaps the second one
    let err = board.add_reservation(reservation(1, 4, 5)).unwrap_err();
    assert_eq!(
        err,
        PlanningError::Conflict {
            room_id: 1,
            range: range(3, 5)
        }
    );
    // Different room
    assert!(board.add_reservation(reservation(3, 4, 9)).is_ok());
    assert_eq!(board.len(), 3);
    assert_eq!(board.get_planning_extent(), Some(range(1, 9)));
}

#[test]
fn add_rejects_empty_atom_range() {
    let mut board = PlanningBoard::new();
    let mut empty = reservation(3, 2, 3);
    empty.atoms[0].range = DateRange { begin: day(2), end: day(2) };
    assert!(!board.can_add_reservation(&empty));
    assert!(matches!(
        board.add_reservation(empty),
        Err(PlanningError::InvalidArgument(_))
    ));
    assert!(board.is_empty());
}

#[test]
fn add_rejects_reservation_without_atoms() {
    let mut board = PlanningBoard::new();
    let mut r = reservation(1, 0, 1);
    r.atoms.clear();
    assert!(matches!(
        board.add_reservation(r),
        Err(PlanningError::InvalidArgument("reservation has no atoms"))
    ));
}

#[test]
fn add_is_all_or_nothing() {
    let mut board = PlanningBoard::new();
    board.add_reservation(reservation(2, 5, 8)).unwrap();

    // First atom fits in room 1, continuation collides in room 2.
    let mut moving = reservation(1, 2, 5);
    moving.add_continuation(2, day(7)).unwrap();
    assert!(!board.can_add_reservation(&moving));
    assert!(matches!(
        board.add_reservation(moving),
        Err(PlanningError::Conflict { room_id: 2, .. })
    ));

    assert!(board.is_free(1, &range(2, 5)));
    assert_eq!(board.len(), 1);
}

#[test]
fn add_rejects_duplicate_persisted_id() {
    let mut board = PlanningBoard::new();
    let mut a = reservation(1, 0, 2);
    a.id = 42;
    let mut b = reservation(2, 0, 2);
    b.id = 42;
    board.add_reservation(a).unwrap();
    assert!(matches!(
        board.add_reservation(b),
        Err(PlanningError::InvalidArgument(_))
    ));
}

#[test]
fn can_add_matches_add() {
    let board = populated_board();
    let candidates = [
        (reservation(1, 0, 1), true),
        (reservation(1, 0, 2), false),
        (reservation(1, 5, 7), true),
        (reservation(2, 4, 5), true),
        (reservation(2, 4, 6), true),
        (reservation(2, 4, 7), false),
    ];
    for (candidate, expected) in candidates {
        assert_eq!(board.can_add_reservation(&candidate), expected, "{candidate:?}");
        let mut copy = board.clone();
        let result = copy.add_reservation(candidate);
        if expected {
            assert!(result.is_ok());
        } else {
            assert!(matches!(result, Err(PlanningError::Conflict { .. })));
        }
    }
}

#[test]
fn zero_length_stay_inside_booking_cannot_be_added() {
    let board = populated_board();
    let mut r = reservation(2, 9, 11);
    r.atoms[0].range = DateRange { begin: day(10), end: day(10) };
    assert!(!board.can_add_reservation(&r));
}

// ── Availability ─────────────────────────────────────────

#[test]
fn available_days_room_one() {
    let board = populated_board();
    assert_eq!(board.get_available_days_from(1, day(-10)), 11);
    assert_eq!(board.get_available_days_from(1, day(0)), 1);
    assert_eq!(board.get_available_days_from(1, day(1)), 0);
    assert_eq!(board.get_available_days_from(1, day(3)), 0);
    assert_eq!(board.get_available_days_from(1, day(4)), 0);
    assert_eq!(board.get_available_days_from(1, day(5)), UNBOUNDED_DAYS);
}

#[test]
fn available_days_room_two() {
    let board = populated_board();
    assert_eq!(board.get_available_days_from(2, day(-10)), 12);
    assert_eq!(board.get_available_days_from(2, day(0)), 2);
    assert_eq!(board.get_available_days_from(2, day(1)), 1);
    assert_eq!(board.get_available_days_from(2, day(3)), 0);
    assert_eq!(board.get_available_days_from(2, day(4)), 2);
    assert_eq!(board.get_available_days_from(2, day(6)), 0);
    assert_eq!(board.get_available_days_from(2, day(7)), 0);
    assert_eq!(board.get_available_days_from(2, day(12)), UNBOUNDED_DAYS);
}

#[test]
fn is_free_touching_boundaries() {
    let board = populated_board();
    assert!(board.is_free(1, &range(0, 1)));
    assert!(board.is_free(1, &range(5, 6)));
    assert!(!board.is_free(1, &range(4, 6)));
    assert!(board.is_free(2, &range(4, 6)));
    assert!(board.is_free(99, &range(0, 100)));
}

// ── Range queries ────────────────────────────────────────

#[test]
fn reservations_in_period_counts() {
    let board = populated_board();
    assert_eq!(board.get_reservations_in_period(&range(0, 1)).len(), 0);
    assert_eq!(board.get_reservations_in_period(&range(1, 2)).len(), 1);
    assert_eq!(board.get_reservations_in_period(&range(1, 3)).len(), 2);
    assert_eq!(board.get_reservations_in_period(&range(1, 4)).len(), 3);
    assert_eq!(board.get_reservations_in_period(&range(1, 7)).len(), 5);
    assert_eq!(board.get_reservations_in_period(&range(5, 7)).len(), 2);
}

#[test]
fn reservations_in_period_is_insertion_ordered() {
    let board = populated_board();
    let keys: Vec<_> = board
        .get_reservations_in_period(&range(0, 20))
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
    // Repeated queries yield the same order
    let again: Vec<_> = board
        .get_reservations_in_period(&range(0, 20))
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(keys, again);
}

#[test]
fn multi_room_reservation_reported_once() {
    let mut board = PlanningBoard::new();
    let mut r = reservation(1, 0, 2);
    r.add_continuation(2, day(4)).unwrap();
    r.add_continuation(3, day(6)).unwrap();
    board.add_reservation(r).unwrap();
    assert_eq!(board.get_reservations_in_period(&range(0, 6)).len(), 1);
    assert_eq!(board.get_planning_extent(), Some(range(0, 6)));
    assert!(board.is_free(1, &range(2, 6)));
    assert!(!board.is_free(2, &range(3, 4)));
}

#[test]
fn planning_extent_grows() {
    let mut board = PlanningBoard::new();
    board.add_reservation(reservation(1, 1, 3)).unwrap();
    board.add_reservation(reservation(3, 4, 9)).unwrap();
    assert_eq!(board.get_planning_extent(), Some(range(1, 9)));
    board.add_reservation(reservation(2, 6, 12)).unwrap();
    assert_eq!(board.get_planning_extent(), Some(range(1, 12)));
}

// ── Removal ──────────────────────────────────────────────

#[test]
fn remove_one_by_one() {
    let mut board = populated_board();
    let extent = board.get_planning_extent().unwrap();
    let keys: Vec<_> = board
        .get_reservations_in_period(&extent)
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(keys.len(), 5);

    for (removed, key) in keys.iter().enumerate() {
        board.remove_reservation(*key).unwrap();
        let remaining = match board.get_planning_extent() {
            Some(extent) => board.get_reservations_in_period(&extent).len(),
            None => 0,
        };
        assert_eq!(remaining, 4 - removed);
    }
    assert!(board.is_empty());
    assert!(board.get_planning_extent().is_none());
}

#[test]
fn remove_inactive_key_fails() {
    let mut board = populated_board();
    let (key, _) = board.reservations().next().unwrap();
    board.remove_reservation(key).unwrap();
    assert!(matches!(
        board.remove_reservation(key),
        Err(PlanningError::InvalidArgument(_))
    ));
}

#[test]
fn add_then_remove_restores_queries() {
    let mut board = populated_board();
    let before_extent = board.get_planning_extent();
    let before_days = board.get_available_days_from(1, day(5));
    let before_count = board.len();

    let key = board.add_reservation(reservation(1, 5, 20)).unwrap();
    assert_eq!(board.get_available_days_from(1, day(5)), 0);
    board.remove_reservation(key).unwrap();

    assert_eq!(board.get_planning_extent(), before_extent);
    assert_eq!(board.get_available_days_from(1, day(5)), before_days);
    assert_eq!(board.len(), before_count);
    assert!(board.is_free(1, &range(5, 20)));
}

#[test]
fn remove_by_persisted_id() {
    let mut board = PlanningBoard::new();
    let mut r = reservation(1, 0, 3);
    r.id = 7;
    board.add_reservation(r).unwrap();
    assert!(board.get_reservation_by_id(7).is_some());
    let removed = board.remove_reservation_by_id(7).unwrap();
    assert_eq!(removed.id, 7);
    assert!(board.get_reservation_by_id(7).is_none());
    assert!(board.remove_reservation_by_id(7).is_err());
}

#[test]
fn update_keeps_previous_on_conflict() {
    let mut board = PlanningBoard::new();
    let mut a = reservation(1, 0, 3);
    a.id = 1;
    let mut b = reservation(1, 5, 8);
    b.id = 2;
    board.add_reservation(a).unwrap();
    board.add_reservation(b).unwrap();

    // Move a onto b's dates
    let mut moved = reservation(1, 4, 6);
    moved.id = 1;
    assert!(matches!(
        board.update_reservation(moved),
        Err(PlanningError::Conflict { .. })
    ));
    assert_eq!(board.get_reservation_by_id(1).unwrap().atoms[0].range, range(0, 3));

    // Shrinking is fine
    let mut shrunk = reservation(1, 0, 2);
    shrunk.id = 1;
    board.update_reservation(shrunk).unwrap();
    assert!(board.is_free(1, &range(2, 5)));
}

#[test]
fn clear_empties_everything() {
    let mut board = populated_board();
    board.clear();
    assert!(board.is_empty());
    assert!(board.get_planning_extent().is_none());
    assert_eq!(board.get_available_days_from(2, day(0)), UNBOUNDED_DAYS);
}
