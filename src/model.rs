use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Storage-assigned identity. `0` means the object was never persisted.
pub type Id = i64;

pub const UNPERSISTED: Id = 0;

/// Half-open date interval `[begin, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(rename = "from")]
    pub begin: NaiveDate,
    #[serde(rename = "to")]
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(begin: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(begin < end, "DateRange begin must be before end");
        Self { begin, end }
    }

    /// Returns `None` for empty or inverted ranges.
    pub fn try_new(begin: NaiveDate, end: NaiveDate) -> Option<Self> {
        (begin < end).then_some(Self { begin, end })
    }

    pub fn is_empty(&self) -> bool {
        self.begin >= self.end
    }

    pub fn days(&self) -> i64 {
        (self.end - self.begin).num_days()
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.begin < other.end && other.begin < self.end
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.begin <= date && date < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_range(&self, other: &DateRange) -> bool {
        self.begin <= other.begin && other.end <= self.end
    }

    /// Smallest range covering both `self` and `other`.
    pub fn hull(&self, other: &DateRange) -> DateRange {
        DateRange {
            begin: self.begin.min(other.begin),
            end: self.end.max(other.end),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    #[default]
    New,
    Temporary,
    Confirmed,
    CheckedIn,
    CheckedOut,
    Archived,
}

/// One room occupied by a reservation over a contiguous date range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationAtom {
    #[serde(default)]
    pub id: Id,
    #[serde(default, rename = "rev")]
    pub revision: u32,
    pub room_id: Id,
    pub range: DateRange,
}

impl ReservationAtom {
    pub fn new(room_id: Id, range: DateRange) -> Self {
        Self {
            id: UNPERSISTED,
            revision: 0,
            room_id,
            range,
        }
    }
}

/// A stay, possibly spread over several rooms. Each room change starts a new
/// atom exactly where the previous one ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    #[serde(default)]
    pub id: Id,
    #[serde(default, rename = "rev")]
    pub revision: u32,
    pub description: String,
    #[serde(default)]
    pub status: ReservationStatus,
    #[serde(default)]
    pub adults: u32,
    #[serde(default)]
    pub children: u32,
    pub atoms: Vec<ReservationAtom>,
}

impl Reservation {
    pub fn new(description: impl Into<String>, room_id: Id, range: DateRange) -> Self {
        Self {
            id: UNPERSISTED,
            revision: 0,
            description: description.into(),
            status: ReservationStatus::New,
            adults: 0,
            children: 0,
            atoms: vec![ReservationAtom::new(room_id, range)],
        }
    }

    /// Move the guest to `room_id` from the end of the current last atom until `end`.
    /// Returns `None` if `end` does not lie after the current end of the stay.
    pub fn add_continuation(&mut self, room_id: Id, end: NaiveDate) -> Option<&ReservationAtom> {
        let last_end = self.atoms.last()?.range.end;
        let range = DateRange::try_new(last_end, end)?;
        self.atoms.push(ReservationAtom::new(room_id, range));
        self.atoms.last()
    }

    /// Range from the first atom's begin to the last atom's end.
    pub fn date_range(&self) -> Option<DateRange> {
        let first = self.atoms.first()?;
        let last = self.atoms.last()?;
        Some(DateRange {
            begin: first.range.begin,
            end: last.range.end,
        })
    }

    pub fn length_in_days(&self) -> i64 {
        self.date_range().map_or(0, |r| r.days())
    }

    pub fn is_persisted(&self) -> bool {
        self.id != UNPERSISTED
    }

    /// Check the atom invariants: non-empty, every range non-empty, contiguous.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.atoms.is_empty() {
            return Err("reservation has no atoms");
        }
        if self.atoms.iter().any(|a| a.range.is_empty()) {
            return Err("reservation atom has an empty date range");
        }
        if self
            .atoms
            .windows(2)
            .any(|pair| pair[1].range.begin != pair[0].range.end)
        {
            return Err("reservation atoms are not contiguous");
        }
        Ok(())
    }

    /// Equality on everything except storage-assigned ids and revisions.
    pub fn same_content(&self, other: &Reservation) -> bool {
        self.description == other.description
            && self.status == other.status
            && self.adults == other.adults
            && self.children == other.children
            && self.atoms.len() == other.atoms.len()
            && self
                .atoms
                .iter()
                .zip(&other.atoms)
                .all(|(a, b)| a.room_id == b.room_id && a.range == b.range)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomCategory {
    #[serde(default)]
    pub id: Id,
    #[serde(default, rename = "rev")]
    pub revision: u32,
    pub short_code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotelRoom {
    #[serde(default)]
    pub id: Id,
    #[serde(default, rename = "rev")]
    pub revision: u32,
    pub name: String,
    /// Short code of the owning category.
    #[serde(rename = "category_id")]
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hotel {
    #[serde(default)]
    pub id: Id,
    #[serde(default, rename = "rev")]
    pub revision: u32,
    pub name: String,
    #[serde(default)]
    pub categories: Vec<RoomCategory>,
    #[serde(default)]
    pub rooms: Vec<HotelRoom>,
}

impl Hotel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: UNPERSISTED,
            revision: 0,
            name: name.into(),
            categories: Vec::new(),
            rooms: Vec::new(),
        }
    }

    pub fn add_category(&mut self, short_code: impl Into<String>, name: impl Into<String>) {
        self.categories.push(RoomCategory {
            id: UNPERSISTED,
            revision: 0,
            short_code: short_code.into(),
            name: name.into(),
        });
    }

    /// Add a room to an existing category. Returns false if the category is unknown.
    pub fn add_room(&mut self, name: impl Into<String>, category: &str) -> bool {
        if !self.categories.iter().any(|c| c.short_code == category) {
            return false;
        }
        self.rooms.push(HotelRoom {
            id: UNPERSISTED,
            revision: 0,
            name: name.into(),
            category: category.to_string(),
        });
        true
    }

    pub fn room_by_id(&self, id: Id) -> Option<&HotelRoom> {
        self.rooms.iter().find(|r| r.id == id)
    }

    pub fn is_persisted(&self) -> bool {
        self.id != UNPERSISTED
    }

    /// Equality on everything except storage-assigned ids and revisions.
    pub fn same_content(&self, other: &Hotel) -> bool {
        self.name == other.name
            && self.categories.len() == other.categories.len()
            && self
                .categories
                .iter()
                .zip(&other.categories)
                .all(|(a, b)| a.short_code == b.short_code && a.name == b.name)
            && self.rooms.len() == other.rooms.len()
            && self
                .rooms
                .iter()
                .zip(&other.rooms)
                .all(|(a, b)| a.name == b.name && a.category == b.category)
    }
}

/// The entity types that can be stored and streamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Hotel,
    Reservation,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Hotel => write!(f, "hotel"),
            EntityKind::Reservation => write!(f, "reservation"),
        }
    }
}

/// A single storable entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Hotel(Hotel),
    Reservation(Reservation),
}

impl Item {
    pub fn kind(&self) -> EntityKind {
        match self {
            Item::Hotel(_) => EntityKind::Hotel,
            Item::Reservation(_) => EntityKind::Reservation,
        }
    }

    pub fn id(&self) -> Id {
        match self {
            Item::Hotel(h) => h.id,
            Item::Reservation(r) => r.id,
        }
    }
}
