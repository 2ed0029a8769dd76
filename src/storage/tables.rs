use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::*;

use super::StorageError;

/// Durable record format. One committed storage call produces one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record {
    HotelStored(Hotel),
    HotelUpdated(Hotel),
    HotelDeleted(Id),
    ReservationStored(Reservation),
    ReservationUpdated(Reservation),
    ReservationDeleted(Id),
    AllDeleted,
    /// Lower bound for the next assigned id. Written first by compaction.
    NextId(Id),
}

/// Committed rows, keyed by id. Ids come from one shared counter.
#[derive(Debug, Clone)]
pub struct Tables {
    hotels: BTreeMap<Id, Hotel>,
    reservations: BTreeMap<Id, Reservation>,
    next_id: Id,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            hotels: BTreeMap::new(),
            reservations: BTreeMap::new(),
            next_id: 1,
        }
    }
}

impl Tables {
    pub fn hotel_count(&self) -> usize {
        self.hotels.len()
    }

    pub fn reservation_count(&self) -> usize {
        self.reservations.len()
    }

    pub fn hotels(&self) -> Vec<Hotel> {
        self.hotels.values().cloned().collect()
    }

    pub fn reservations(&self) -> Vec<Reservation> {
        self.reservations.values().cloned().collect()
    }

    pub fn hotel(&self, id: Id) -> Option<Hotel> {
        self.hotels.get(&id).cloned()
    }

    pub fn reservation(&self, id: Id) -> Option<Reservation> {
        self.reservations.get(&id).cloned()
    }

    fn assign_id(&mut self) -> Id {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn room_exists(&self, room_id: Id) -> bool {
        self.hotels
            .values()
            .any(|h| h.rooms.iter().any(|r| r.id == room_id))
    }

    fn room_in_use(&self, room_id: Id, ignoring: Option<Id>) -> bool {
        self.reservations
            .values()
            .filter(|r| Some(r.id) != ignoring)
            .any(|r| r.atoms.iter().any(|a| a.room_id == room_id))
    }

    fn check_hotel_shape(hotel: &Hotel) -> Result<(), StorageError> {
        for room in &hotel.rooms {
            if !hotel.categories.iter().any(|c| c.short_code == room.category) {
                return Err(StorageError::Constraint(format!(
                    "room {:?} references unknown category {:?}",
                    room.name, room.category
                )));
            }
        }
        Ok(())
    }

    fn check_reservation_rooms(&self, reservation: &Reservation) -> Result<(), StorageError> {
        reservation
            .validate()
            .map_err(|e| StorageError::Constraint(e.to_string()))?;
        for atom in &reservation.atoms {
            if !self.room_exists(atom.room_id) {
                return Err(StorageError::Constraint(format!("unknown room {}", atom.room_id)));
            }
        }
        Ok(())
    }

    fn assign_nested_hotel_ids(&mut self, hotel: &mut Hotel) {
        for category in hotel.categories.iter_mut().filter(|c| c.id == UNPERSISTED) {
            category.id = self.assign_id();
        }
        for room in hotel.rooms.iter_mut().filter(|r| r.id == UNPERSISTED) {
            room.id = self.assign_id();
        }
    }

    fn assign_atom_ids(&mut self, reservation: &mut Reservation) {
        for atom in reservation.atoms.iter_mut().filter(|a| a.id == UNPERSISTED) {
            atom.id = self.assign_id();
        }
    }

    // ── Mutations ────────────────────────────────────────────

    pub fn store_new_hotel(&mut self, hotel: &mut Hotel) -> Result<Record, StorageError> {
        if hotel.is_persisted() {
            return Err(StorageError::Constraint(format!("hotel {} is already stored", hotel.id)));
        }
        Self::check_hotel_shape(hotel)?;
        hotel.id = self.assign_id();
        hotel.revision = 0;
        self.assign_nested_hotel_ids(hotel);
        self.hotels.insert(hotel.id, hotel.clone());
        Ok(Record::HotelStored(hotel.clone()))
    }

    pub fn store_new_reservation(&mut self, reservation: &mut Reservation) -> Result<Record, StorageError> {
        if reservation.is_persisted() {
            return Err(StorageError::Constraint(format!(
                "reservation {} is already stored",
                reservation.id
            )));
        }
        self.check_reservation_rooms(reservation)?;
        reservation.id = self.assign_id();
        reservation.revision = 0;
        self.assign_atom_ids(reservation);
        self.reservations.insert(reservation.id, reservation.clone());
        Ok(Record::ReservationStored(reservation.clone()))
    }

    pub fn update_hotel(&mut self, hotel: &mut Hotel) -> Result<Record, StorageError> {
        if !hotel.is_persisted() {
            return Err(StorageError::Constraint("cannot update a hotel without id".into()));
        }
        let previous = self.hotels.get(&hotel.id).ok_or(StorageError::NotFound {
            kind: EntityKind::Hotel,
            id: hotel.id,
        })?;
        Self::check_hotel_shape(hotel)?;
        for room in &previous.rooms {
            let kept = hotel.rooms.iter().any(|r| r.id == room.id);
            if !kept && self.room_in_use(room.id, None) {
                return Err(StorageError::Constraint(format!(
                    "room {} is still referenced by reservations",
                    room.id
                )));
            }
        }
        hotel.revision = previous.revision + 1;
        self.assign_nested_hotel_ids(hotel);
        self.hotels.insert(hotel.id, hotel.clone());
        Ok(Record::HotelUpdated(hotel.clone()))
    }

    pub fn update_reservation(&mut self, reservation: &mut Reservation) -> Result<Record, StorageError> {
        if !reservation.is_persisted() {
            return Err(StorageError::Constraint("cannot update a reservation without id".into()));
        }
        let previous_revision = self
            .reservations
            .get(&reservation.id)
            .map(|r| r.revision)
            .ok_or(StorageError::NotFound {
                kind: EntityKind::Reservation,
                id: reservation.id,
            })?;
        self.check_reservation_rooms(reservation)?;
        reservation.revision = previous_revision + 1;
        self.assign_atom_ids(reservation);
        self.reservations.insert(reservation.id, reservation.clone());
        Ok(Record::ReservationUpdated(reservation.clone()))
    }

    pub fn delete_hotel(&mut self, id: Id) -> Result<Record, StorageError> {
        let hotel = self.hotels.get(&id).ok_or(StorageError::NotFound {
            kind: EntityKind::Hotel,
            id,
        })?;
        if let Some(room) = hotel.rooms.iter().find(|r| self.room_in_use(r.id, None)) {
            return Err(StorageError::Constraint(format!(
                "room {} is still referenced by reservations",
                room.id
            )));
        }
        self.hotels.remove(&id);
        Ok(Record::HotelDeleted(id))
    }

    pub fn delete_reservation(&mut self, id: Id) -> Result<Record, StorageError> {
        self.reservations.remove(&id).ok_or(StorageError::NotFound {
            kind: EntityKind::Reservation,
            id,
        })?;
        Ok(Record::ReservationDeleted(id))
    }

    pub fn delete_all(&mut self) -> Record {
        self.hotels.clear();
        self.reservations.clear();
        Record::AllDeleted
    }

    // ── Replay ───────────────────────────────────────────────

    /// Apply a record read back from the journal. Ids are taken as stored;
    /// records that contradict the tables are reported as corruption.
    pub fn apply(&mut self, record: &Record) -> Result<(), StorageError> {
        match record {
            Record::HotelStored(hotel) | Record::HotelUpdated(hotel) => {
                let stored = matches!(record, Record::HotelStored(_));
                if !hotel.is_persisted() || stored == self.hotels.contains_key(&hotel.id) {
                    return Err(corrupt(record));
                }
                self.bump_next_id(hotel.id);
                for c in &hotel.categories {
                    self.bump_next_id(c.id);
                }
                for r in &hotel.rooms {
                    self.bump_next_id(r.id);
                }
                self.hotels.insert(hotel.id, hotel.clone());
            }
            Record::ReservationStored(reservation) | Record::ReservationUpdated(reservation) => {
                let stored = matches!(record, Record::ReservationStored(_));
                if !reservation.is_persisted()
                    || stored == self.reservations.contains_key(&reservation.id)
                {
                    return Err(corrupt(record));
                }
                self.bump_next_id(reservation.id);
                for a in &reservation.atoms {
                    self.bump_next_id(a.id);
                }
                self.reservations.insert(reservation.id, reservation.clone());
            }
            Record::HotelDeleted(id) => {
                self.hotels.remove(id).ok_or_else(|| corrupt(record))?;
            }
            Record::ReservationDeleted(id) => {
                self.reservations.remove(id).ok_or_else(|| corrupt(record))?;
            }
            Record::AllDeleted => {
                self.hotels.clear();
                self.reservations.clear();
            }
            Record::NextId(id) => {
                self.next_id = self.next_id.max(*id);
            }
        }
        Ok(())
    }

    fn bump_next_id(&mut self, id: Id) {
        if id >= self.next_id {
            self.next_id = id + 1;
        }
    }

    /// Minimal record set that recreates the current tables.
    pub fn snapshot_records(&self) -> Vec<Record> {
        let hotels = self.hotels.values().cloned().map(Record::HotelStored);
        let reservations = self
            .reservations
            .values()
            .cloned()
            .map(Record::ReservationStored);
        std::iter::once(Record::NextId(self.next_id))
            .chain(hotels)
            .chain(reservations)
            .collect()
    }
}

fn corrupt(record: &Record) -> StorageError {
    StorageError::Corrupt(format!("journal record does not fit the tables: {record:?}"))
}
