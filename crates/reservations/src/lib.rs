//! Reservation domain module.
//!
//! Short-lived holds against available stock, modelled as a small state
//! machine (Active → Confirmed | Released | Expired) with pure transition
//! guards. Stores linearize transitions per reservation by compare-and-swap
//! on status; this crate only decides what is allowed.

pub mod reservation;

pub use reservation::{
    ConfirmReservation, ReleaseReservation, Reservation, ReservationId, ReservationStatus,
    ReserveStock,
};
