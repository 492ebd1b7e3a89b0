mod test_reservation;

pub mod utils;
