pub mod keeper;
pub mod ledger;
pub mod leverage_engine;
pub mod price_converter;
pub mod strategy;
pub mod swapper;
pub mod tend_trigger;
pub mod withdrawal;
pub mod yield_model;
