pub mod hotels;
pub mod hub;
pub mod limits;
pub mod model;
pub mod observability;
pub mod persistence;
pub mod planning;
pub mod protocol;
pub mod session;
pub mod storage;
