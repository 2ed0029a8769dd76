use crate::model::*;

/// Canonical list of hotels, kept in the order they were integrated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HotelCollection {
    hotels: Vec<Hotel>,
}

impl HotelCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hotels(&self) -> &[Hotel] {
        &self.hotels
    }

    pub fn len(&self) -> usize {
        self.hotels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hotels.is_empty()
    }

    pub fn add_hotel(&mut self, hotel: Hotel) {
        self.hotels.push(hotel);
    }

    /// Replace the hotel with the same id. Returns false if there is none.
    pub fn update_hotel(&mut self, hotel: Hotel) -> bool {
        match self.hotels.iter_mut().find(|h| h.id == hotel.id) {
            Some(slot) => {
                *slot = hotel;
                true
            }
            None => false,
        }
    }

    pub fn remove_hotel(&mut self, id: Id) -> Option<Hotel> {
        let pos = self.hotels.iter().position(|h| h.id == id)?;
        Some(self.hotels.remove(pos))
    }

    pub fn get_hotel(&self, id: Id) -> Option<&Hotel> {
        self.hotels.iter().find(|h| h.id == id)
    }

    pub fn clear(&mut self) {
        self.hotels.clear();
    }

    pub fn all_room_ids(&self) -> Vec<Id> {
        self.all_rooms().map(|r| r.id).collect()
    }

    pub fn all_category_ids(&self) -> Vec<Id> {
        self.hotels
            .iter()
            .flat_map(|h| h.categories.iter().map(|c| c.id))
            .collect()
    }

    pub fn find_room_by_id(&self, id: Id) -> Option<&HotelRoom> {
        self.all_rooms().find(|r| r.id == id)
    }

    pub fn all_rooms(&self) -> impl Iterator<Item = &HotelRoom> {
        self.hotels.iter().flat_map(|h| h.rooms.iter())
    }

    /// Rooms whose category has the given id.
    pub fn rooms_by_category(&self, category_id: Id) -> Vec<&HotelRoom> {
        self.hotels
            .iter()
            .filter_map(|h| {
                let category = h.categories.iter().find(|c| c.id == category_id)?;
                Some(h.rooms.iter().filter(move |r| r.category == category.short_code))
            })
            .flatten()
            .collect()
    }
}
