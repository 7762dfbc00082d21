pub mod customer;
pub mod ptp;
