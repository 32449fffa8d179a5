pub mod cards;
pub mod events;
pub mod persist;
pub mod refine;
pub mod text;
