pub mod market;
pub mod reserve_holder;
