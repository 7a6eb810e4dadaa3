//! Shared record types, keys and the crate error.

pub mod calendar;
mod error;
mod observation;

pub use error::{Result, StoreError};
pub use observation::{
    FullKey, GeoType, Missingness, NaturalKey, ObservationDraft, SignalObservation,
    StoredObservation, TimeType,
};
