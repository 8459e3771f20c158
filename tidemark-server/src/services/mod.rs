pub mod aggregators;
pub mod broadcaster;
pub mod chat_list;
pub mod detectors;
pub mod hub;
pub mod registry;
pub mod rooms;
